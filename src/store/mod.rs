//! Storage collaborator seam: the five graph operations plus the shared path pattern matcher.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::node::NodeRecord;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::{PgGraphStore, TableName};

/// Storage-assigned node identifier.
pub type NodeId = i64;

/// Strength recorded for references resolved by exact path match.
pub const EXACT_STRENGTH: f32 = 0.9;
/// Strength recorded for references resolved by path pattern.
pub const FUZZY_STRENGTH: f32 = 0.7;

/// A node row as returned by path lookups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredNode {
    pub id: NodeId,
    pub document_id: String,
    pub path: String,
    pub title: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// How a reference edge was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReferenceKind {
    #[serde(rename = "related_section_exact")]
    Exact,
    #[serde(rename = "related_section_fuzzy")]
    Fuzzy,
}

impl ReferenceKind {
    /// Value persisted in the `reference_type` column.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Exact => "related_section_exact",
            Self::Fuzzy => "related_section_fuzzy",
        }
    }

    pub fn strength(self) -> f32 {
        match self {
            Self::Exact => EXACT_STRENGTH,
            Self::Fuzzy => FUZZY_STRENGTH,
        }
    }
}

/// Reference edge to be written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewReference {
    pub source_node_id: NodeId,
    pub target_node_id: NodeId,
    pub reference_type: ReferenceKind,
    pub strength: f32,
}

impl NewReference {
    pub fn new(source_node_id: NodeId, target_node_id: NodeId, kind: ReferenceKind) -> Self {
        Self {
            source_node_id,
            target_node_id,
            reference_type: kind,
            strength: kind.strength(),
        }
    }
}

/// Persistent graph backend.
///
/// Every call is fallible and bounded by the caller; implementations must make
/// `insert_node` atomic per record.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Nodes whose path matches a LIKE pattern (case-insensitive), at most `max_results`.
    async fn find_nodes_by_path(&self, pattern: &str, max_results: usize)
        -> Result<Vec<StoredNode>>;

    /// Removes every node of a document along with its references.
    async fn delete_nodes_by_document_id(&self, document_id: &str) -> Result<u64>;

    /// Inserts a node and returns its storage id.
    async fn insert_node(&self, node: &NodeRecord) -> Result<NodeId>;

    async fn update_node_parent(&self, node_id: NodeId, parent_id: NodeId) -> Result<()>;

    async fn insert_reference(&self, reference: &NewReference) -> Result<()>;
}

/// Builds a substring pattern for `mention`, escaping LIKE metacharacters.
pub fn like_pattern(mention: &str) -> String {
    let mut pattern = String::with_capacity(mention.len() + 2);
    pattern.push('%');
    for ch in mention.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(ch);
    }
    pattern.push('%');
    pattern
}

/// Case-insensitive LIKE evaluation with `\` as the escape character.
pub fn like_match(pattern: &str, text: &str) -> bool {
    let pattern = compile_like(pattern);
    let text: Vec<char> = text.chars().flat_map(char::to_lowercase).collect();

    // Classic wildcard DP over pattern tokens × text positions.
    let mut reachable = vec![false; text.len() + 1];
    reachable[0] = true;
    for token in &pattern {
        let mut next = vec![false; text.len() + 1];
        match token {
            LikeToken::AnySequence => {
                let mut seen = false;
                for (pos, slot) in next.iter_mut().enumerate() {
                    seen |= reachable[pos];
                    *slot = seen;
                }
            }
            LikeToken::AnyChar => {
                for pos in 0..text.len() {
                    next[pos + 1] = reachable[pos];
                }
            }
            LikeToken::Literal(expected) => {
                for pos in 0..text.len() {
                    next[pos + 1] = reachable[pos] && text[pos] == *expected;
                }
            }
        }
        reachable = next;
    }
    reachable[text.len()]
}

enum LikeToken {
    AnySequence,
    AnyChar,
    Literal(char),
}

fn compile_like(pattern: &str) -> Vec<LikeToken> {
    let mut tokens = Vec::new();
    let mut chars = pattern.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '%' => tokens.push(LikeToken::AnySequence),
            '_' => tokens.push(LikeToken::AnyChar),
            '\\' => {
                if let Some(escaped) = chars.next() {
                    tokens.extend(escaped.to_lowercase().map(LikeToken::Literal));
                }
            }
            other => tokens.extend(other.to_lowercase().map(LikeToken::Literal)),
        }
    }
    tokens
}
