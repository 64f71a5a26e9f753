//! Clears a document's previous graph and inserts the embedding-gated nodes.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::bounded::bounded;
use crate::error::PipelineError;
use crate::node::NodeRecord;
use crate::store::{GraphStore, NodeId};

/// Chunk id → storage id for nodes persisted in this run.
#[derive(Debug, Clone, Default)]
pub struct StorageIds {
    by_chunk: HashMap<String, NodeId>,
    persisted: HashSet<NodeId>,
}

impl StorageIds {
    fn record(&mut self, chunk_id: String, id: NodeId) {
        self.by_chunk.insert(chunk_id, id);
        self.persisted.insert(id);
    }

    pub fn get(&self, chunk_id: &str) -> Option<NodeId> {
        self.by_chunk.get(chunk_id).copied()
    }

    /// True when `id` was assigned during this run.
    pub fn is_persisted(&self, id: NodeId) -> bool {
        self.persisted.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.by_chunk.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_chunk.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum SkipReason {
    MissingOriginalId,
    NoEmbedding,
    InsertFailed(String),
}

/// A node record that did not make it into the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedNode {
    pub chunk_id: Option<String>,
    pub path: String,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PersistReport {
    /// Rows removed by the clear step, when it succeeded.
    pub cleared: Option<u64>,
    pub clear_error: Option<String>,
    pub attempted: usize,
    pub inserted: usize,
    pub failed: usize,
    pub skipped: Vec<SkippedNode>,
}

impl PersistReport {
    /// Fails when records were offered but none were stored.
    pub fn ensure_persisted(&self) -> Result<(), PipelineError> {
        if self.inserted == 0 && self.attempted > 0 {
            return Err(PipelineError::NothingPersisted {
                attempted: self.attempted,
                failed: self.failed,
            });
        }
        Ok(())
    }

    fn skip(&mut self, node: &NodeRecord, chunk_id: Option<&str>, reason: SkipReason) {
        self.failed += 1;
        self.skipped.push(SkippedNode {
            chunk_id: chunk_id.map(str::to_string),
            path: node.path.clone(),
            reason,
        });
    }
}

/// Replaces the stored graph of `document_id` with `nodes`, one insert at a time.
///
/// A failed clear is logged and the run continues. Each insert failure is counted
/// without aborting the batch.
pub async fn persist_nodes(
    store: &dyn GraphStore,
    document_id: &str,
    nodes: &[NodeRecord],
    limit: Duration,
) -> (StorageIds, PersistReport) {
    let mut ids = StorageIds::default();
    let mut report = PersistReport {
        attempted: nodes.len(),
        ..PersistReport::default()
    };

    match bounded(
        limit,
        "clear document",
        store.delete_nodes_by_document_id(document_id),
    )
    .await
    {
        Ok(removed) => {
            debug!(document_id, removed, "cleared previous graph");
            report.cleared = Some(removed);
        }
        Err(err) => {
            warn!(
                document_id,
                error = %format!("{err:#}"),
                "failed to clear previous graph; stale nodes may remain"
            );
            report.clear_error = Some(format!("{err:#}"));
        }
    }

    for node in nodes {
        let Some(chunk_id) = node.original_id() else {
            warn!(document_id, path = node.path.as_str(), "node lacks original_id");
            report.skip(node, None, SkipReason::MissingOriginalId);
            continue;
        };
        if !node.embedding_generated {
            debug!(document_id, chunk_id, "skipping node without embedding");
            report.skip(node, Some(chunk_id), SkipReason::NoEmbedding);
            continue;
        }
        match bounded(limit, "insert node", store.insert_node(node)).await {
            Ok(id) => {
                ids.record(chunk_id.to_string(), id);
                report.inserted += 1;
            }
            Err(err) => {
                warn!(
                    document_id,
                    chunk_id,
                    path = node.path.as_str(),
                    error = %format!("{err:#}"),
                    "failed to insert node"
                );
                report.skip(
                    node,
                    Some(chunk_id),
                    SkipReason::InsertFailed(format!("{err:#}")),
                );
            }
        }
    }

    info!(
        document_id,
        inserted = report.inserted,
        failed = report.failed,
        "persisted nodes"
    );
    (ids, report)
}
