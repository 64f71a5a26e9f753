//! Chunk → storage-ready node mapping and the path/identity indexes built alongside it.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::chunk::{path_key, Chunk};

/// Path value stored for chunks that carry no hierarchy path.
pub const UNKNOWN_PATH: &str = "Unknown Path";
/// Metadata key that carries the chunk id through storage.
pub const ORIGINAL_ID_KEY: &str = "original_id";

/// Storage-ready representation of one chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub document_id: String,
    pub node_type: String,
    pub title: Option<String>,
    pub content: String,
    pub level: Option<i32>,
    pub path: String,
    pub section_type: String,
    pub content_type: String,
    pub document_position: Option<f64>,
    /// Chunk metadata minus promoted columns, plus `original_id`.
    pub metadata: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub embedding_generated: bool,
}

impl NodeRecord {
    /// Chunk id carried in the metadata payload.
    pub fn original_id(&self) -> Option<&str> {
        self.metadata
            .get(ORIGINAL_ID_KEY)
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
    }

    /// Marks the record as embedded with the given vector.
    pub fn set_embedding(&mut self, vector: Vec<f32>) {
        self.embedding = Some(vector);
        self.embedding_generated = true;
    }

    /// Marks the record as having no usable embedding.
    pub fn clear_embedding(&mut self) {
        self.embedding = None;
        self.embedding_generated = false;
    }
}

/// Path key → claiming chunk ids, in document order.
///
/// Several chunks may share a path; exact resolution picks the first claimant.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PathIndex {
    claims: BTreeMap<String, Vec<String>>,
}

impl PathIndex {
    /// Registers `chunk_id` as a claimant of `key`.
    pub fn claim(&mut self, key: String, chunk_id: String) {
        let claimants = self.claims.entry(key).or_default();
        if !claimants.contains(&chunk_id) {
            claimants.push(chunk_id);
        }
    }

    /// First chunk that claimed `key`.
    pub fn resolve(&self, key: &str) -> Option<&str> {
        self.claims
            .get(key)
            .and_then(|claimants| claimants.first())
            .map(String::as_str)
    }

    /// All claimants of `key`.
    pub fn claimants(&self, key: &str) -> &[String] {
        self.claims.get(key).map(Vec::as_slice).unwrap_or_default()
    }

    /// Keys claimed by more than one chunk.
    pub fn ambiguous(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.claims
            .iter()
            .filter(|(_, claimants)| claimants.len() > 1)
            .map(|(key, claimants)| (key.as_str(), claimants.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.claims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }
}

/// Valid chunks keyed by id, remembering document order.
#[derive(Debug, Clone, Default)]
pub struct ChunkIndex {
    order: Vec<String>,
    by_id: HashMap<String, Chunk>,
}

impl ChunkIndex {
    fn insert(&mut self, id: String, chunk: Chunk) -> bool {
        if self.by_id.contains_key(&id) {
            return false;
        }
        self.order.push(id.clone());
        self.by_id.insert(id, chunk);
        true
    }

    pub fn get(&self, id: &str) -> Option<&Chunk> {
        self.by_id.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    /// Chunks in document order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Chunk)> {
        self.order
            .iter()
            .filter_map(|id| self.by_id.get(id).map(|chunk| (id.as_str(), chunk)))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Why a chunk was left out of the node batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscardReason {
    MissingId,
    MissingMetadata,
    DuplicateId,
}

/// A chunk the mapper refused, identified by its position in the input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscardedChunk {
    pub position: usize,
    pub chunk_id: Option<String>,
    pub reason: DiscardReason,
}

/// Outcome of the node mapping phase.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MappingReport {
    pub mapped: usize,
    pub discarded: Vec<DiscardedChunk>,
    /// Path keys claimed by several chunks, with every claimant.
    pub ambiguous_paths: BTreeMap<String, Vec<String>>,
}

/// Node records plus the indexes later phases resolve identities through.
#[derive(Debug, Clone, Default)]
pub struct MappedDocument {
    pub nodes: Vec<NodeRecord>,
    pub chunks: ChunkIndex,
    pub paths: PathIndex,
    pub report: MappingReport,
}

/// Metadata keys stored as dedicated columns or kept only for graph wiring.
const PROMOTED_KEYS: &[&str] = &[
    "hierarchy_path",
    "section_type",
    "content_type",
    "document_position",
    "parent_id",
    "child_ids",
    "sibling_ids",
];

/// Converts enriched chunks into node records and builds the identity indexes.
pub fn map_chunks(document_id: &str, chunks: Vec<Chunk>) -> MappedDocument {
    let mut mapped = MappedDocument::default();

    for (position, chunk) in chunks.into_iter().enumerate() {
        let Some(chunk_id) = chunk.id().map(str::to_string) else {
            warn!(document_id, position, "skipping chunk without an id");
            mapped.report.discarded.push(DiscardedChunk {
                position,
                chunk_id: None,
                reason: DiscardReason::MissingId,
            });
            continue;
        };
        let Some(node) = node_record(document_id, &chunk_id, &chunk) else {
            warn!(document_id, chunk_id, "skipping chunk without metadata");
            mapped.report.discarded.push(DiscardedChunk {
                position,
                chunk_id: Some(chunk_id),
                reason: DiscardReason::MissingMetadata,
            });
            continue;
        };
        if mapped.chunks.contains(&chunk_id) {
            warn!(document_id, chunk_id, "skipping chunk with duplicate id");
            mapped.report.discarded.push(DiscardedChunk {
                position,
                chunk_id: Some(chunk_id),
                reason: DiscardReason::DuplicateId,
            });
            continue;
        }

        if node.path != UNKNOWN_PATH {
            mapped.paths.claim(node.path.clone(), chunk_id.clone());
        }
        mapped.nodes.push(node);
        mapped.chunks.insert(chunk_id, chunk);
    }

    mapped.report.mapped = mapped.nodes.len();
    mapped.report.ambiguous_paths = mapped
        .paths
        .ambiguous()
        .map(|(key, claimants)| (key.to_string(), claimants.to_vec()))
        .collect();
    for (key, claimants) in &mapped.report.ambiguous_paths {
        warn!(
            document_id,
            path = key.as_str(),
            claimants = claimants.len(),
            "path claimed by several chunks; exact references resolve to the first"
        );
    }
    debug!(
        document_id,
        nodes = mapped.nodes.len(),
        paths = mapped.paths.len(),
        "mapped chunks to node records"
    );
    mapped
}

fn node_record(document_id: &str, chunk_id: &str, chunk: &Chunk) -> Option<NodeRecord> {
    let meta = chunk.metadata.as_ref()?;
    let path = if meta.hierarchy_path.is_empty() {
        UNKNOWN_PATH.to_string()
    } else {
        path_key(&meta.hierarchy_path)
    };

    let mut payload: Map<String, Value> = meta
        .extra
        .iter()
        .filter(|(key, _)| !PROMOTED_KEYS.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    if !meta.related_sections.is_empty() {
        payload.insert(
            "related_sections".to_string(),
            serde_json::to_value(&meta.related_sections).unwrap_or(Value::Null),
        );
    }
    payload.insert(
        ORIGINAL_ID_KEY.to_string(),
        Value::String(chunk_id.to_string()),
    );
    payload.insert(
        "link_count".to_string(),
        meta.link_count.map(Value::from).unwrap_or(Value::Null),
    );
    payload.insert(
        "contains_links".to_string(),
        meta.contains_links.map(Value::Bool).unwrap_or(Value::Null),
    );

    Some(NodeRecord {
        document_id: document_id.to_string(),
        node_type: chunk.kind.clone().unwrap_or_else(|| "unknown".to_string()),
        title: chunk.title.clone(),
        content: chunk.content.clone().unwrap_or_default(),
        level: chunk.level,
        path,
        section_type: meta
            .section_type
            .clone()
            .unwrap_or_else(|| "unknown".to_string()),
        content_type: meta
            .content_type
            .clone()
            .unwrap_or_else(|| "text".to_string()),
        document_position: meta.document_position,
        metadata: payload,
        embedding: None,
        embedding_generated: false,
    })
}
