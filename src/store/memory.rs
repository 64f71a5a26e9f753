//! In-process graph store used for dry runs and tests.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{bail, Result};
use async_trait::async_trait;

use super::{like_match, GraphStore, NewReference, NodeId, ReferenceKind, StoredNode};
use crate::node::NodeRecord;

/// A node row held by [`MemoryStore`].
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryNode {
    pub id: NodeId,
    pub parent_id: Option<NodeId>,
    pub record: NodeRecord,
}

/// A reference row held by [`MemoryStore`].
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryReference {
    pub source_node_id: NodeId,
    pub target_node_id: NodeId,
    pub reference_type: ReferenceKind,
    pub strength: f32,
}

#[derive(Debug, Default)]
struct Tables {
    next_id: NodeId,
    nodes: BTreeMap<NodeId, MemoryNode>,
    references: Vec<MemoryReference>,
}

/// Graph store backed by process memory with the same semantics as the Postgres backend:
/// monotonically increasing ids, case-insensitive LIKE path lookups, and reference rows
/// that cascade with their nodes.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Nodes of a document, in id order.
    pub fn nodes(&self, document_id: &str) -> Vec<MemoryNode> {
        self.tables()
            .nodes
            .values()
            .filter(|node| node.record.document_id == document_id)
            .cloned()
            .collect()
    }

    /// Every reference row, in insertion order.
    pub fn references(&self) -> Vec<MemoryReference> {
        self.tables().references.clone()
    }

    /// Reference rows whose source node belongs to `document_id`.
    pub fn document_references(&self, document_id: &str) -> Vec<MemoryReference> {
        let tables = self.tables();
        tables
            .references
            .iter()
            .filter(|reference| {
                tables
                    .nodes
                    .get(&reference.source_node_id)
                    .is_some_and(|node| node.record.document_id == document_id)
            })
            .cloned()
            .collect()
    }

    pub fn node_count(&self) -> usize {
        self.tables().nodes.len()
    }
}

#[async_trait]
impl GraphStore for MemoryStore {
    async fn find_nodes_by_path(
        &self,
        pattern: &str,
        max_results: usize,
    ) -> Result<Vec<StoredNode>> {
        Ok(self
            .tables()
            .nodes
            .values()
            .filter(|node| like_match(pattern, &node.record.path))
            .take(max_results)
            .map(|node| StoredNode {
                id: node.id,
                document_id: node.record.document_id.clone(),
                path: node.record.path.clone(),
                title: node.record.title.clone(),
                metadata: node.record.metadata.clone(),
            })
            .collect())
    }

    async fn delete_nodes_by_document_id(&self, document_id: &str) -> Result<u64> {
        let mut tables = self.tables();
        let doomed: Vec<NodeId> = tables
            .nodes
            .values()
            .filter(|node| node.record.document_id == document_id)
            .map(|node| node.id)
            .collect();
        for id in &doomed {
            tables.nodes.remove(id);
        }
        tables.references.retain(|reference| {
            !doomed.contains(&reference.source_node_id)
                && !doomed.contains(&reference.target_node_id)
        });
        for node in tables.nodes.values_mut() {
            if node.parent_id.is_some_and(|parent| doomed.contains(&parent)) {
                node.parent_id = None;
            }
        }
        Ok(doomed.len() as u64)
    }

    async fn insert_node(&self, node: &NodeRecord) -> Result<NodeId> {
        let mut tables = self.tables();
        tables.next_id += 1;
        let id = tables.next_id;
        tables.nodes.insert(
            id,
            MemoryNode {
                id,
                parent_id: None,
                record: node.clone(),
            },
        );
        Ok(id)
    }

    async fn update_node_parent(&self, node_id: NodeId, parent_id: NodeId) -> Result<()> {
        let mut tables = self.tables();
        if !tables.nodes.contains_key(&parent_id) {
            bail!("parent node {parent_id} does not exist");
        }
        match tables.nodes.get_mut(&node_id) {
            Some(node) => {
                node.parent_id = Some(parent_id);
                Ok(())
            }
            None => bail!("node {node_id} does not exist"),
        }
    }

    async fn insert_reference(&self, reference: &NewReference) -> Result<()> {
        let mut tables = self.tables();
        for id in [reference.source_node_id, reference.target_node_id] {
            if !tables.nodes.contains_key(&id) {
                bail!("reference endpoint {id} does not exist");
            }
        }
        tables.references.push(MemoryReference {
            source_node_id: reference.source_node_id,
            target_node_id: reference.target_node_id,
            reference_type: reference.reference_type,
            strength: reference.strength,
        });
        Ok(())
    }
}
