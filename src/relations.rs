//! Writes parent links and deduplicated reference edges for persisted nodes.

use std::collections::HashSet;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::bounded::bounded;
use crate::fuzzy::FuzzyCandidates;
use crate::node::{ChunkIndex, MappedDocument, PathIndex};
use crate::persist::StorageIds;
use crate::resolver::Resolution;
use crate::store::{GraphStore, NewReference, NodeId, ReferenceKind, StoredNode};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParentFailure {
    pub chunk_id: String,
    pub node_id: NodeId,
    pub parent_id: NodeId,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReferenceFailure {
    pub source_node_id: NodeId,
    pub target_node_id: NodeId,
    pub reference_type: ReferenceKind,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RelationReport {
    pub parent_links: usize,
    pub parent_failures: Vec<ParentFailure>,
    /// Chunks whose declared parent chain leads back to themselves.
    pub parent_cycles: Vec<String>,
    pub references_created: usize,
    pub exact_created: usize,
    pub fuzzy_created: usize,
    pub reference_failures: Vec<ReferenceFailure>,
    /// Candidate pairs already attempted earlier in the run.
    pub duplicate_pairs: usize,
    pub self_pairs: usize,
    /// Candidates with an endpoint that was never persisted.
    pub unpersisted_endpoints: usize,
    /// Fuzzy candidates that map to no node of this run.
    pub stale_candidates: usize,
}

/// Inputs the materializer needs from earlier phases.
pub struct GraphInputs<'a> {
    pub document_id: &'a str,
    pub mapped: &'a MappedDocument,
    pub resolution: &'a Resolution,
    pub fuzzy: &'a FuzzyCandidates,
    pub ids: &'a StorageIds,
}

/// Sets parent pointers, then writes exact and fuzzy references sharing one dedup set.
pub async fn materialize(
    store: &dyn GraphStore,
    inputs: GraphInputs<'_>,
    limit: Duration,
) -> RelationReport {
    let mut writer = EdgeWriter {
        store,
        limit,
        document_id: inputs.document_id,
        attempted: HashSet::new(),
        report: RelationReport::default(),
    };

    writer.link_parents(&inputs.mapped.chunks, inputs.ids).await;

    for candidate in &inputs.resolution.exact {
        let (Some(source), Some(target)) = (
            inputs.ids.get(&candidate.source),
            inputs.ids.get(&candidate.target),
        ) else {
            writer.report.unpersisted_endpoints += 1;
            continue;
        };
        writer.reference(source, target, ReferenceKind::Exact).await;
    }

    for mention in &inputs.resolution.fuzzy_mentions {
        let Some(candidates) = inputs.fuzzy.by_pattern.get(&mention.pattern) else {
            continue;
        };
        let Some(source) = inputs.ids.get(&mention.source) else {
            writer.report.unpersisted_endpoints += 1;
            continue;
        };
        for candidate in candidates {
            let Some(target) = current_generation(candidate, &inputs.mapped.paths, inputs.ids) else {
                debug!(
                    document_id = inputs.document_id,
                    pattern = mention.pattern.as_str(),
                    node_id = candidate.id,
                    "fuzzy candidate has no counterpart in this run"
                );
                writer.report.stale_candidates += 1;
                continue;
            };
            writer.reference(source, target, ReferenceKind::Fuzzy).await;
        }
    }

    let report = writer.report;
    info!(
        document_id = inputs.document_id,
        parent_links = report.parent_links,
        exact = report.exact_created,
        fuzzy = report.fuzzy_created,
        failures = report.parent_failures.len() + report.reference_failures.len(),
        "materialized relationships"
    );
    report
}

/// Storage id of this run's node for a previously stored candidate row.
///
/// Rows of an earlier generation are matched on path, not chunk id: positional
/// chunk ids move to other sections when a document is edited.
fn current_generation(candidate: &StoredNode, paths: &PathIndex, ids: &StorageIds) -> Option<NodeId> {
    if ids.is_persisted(candidate.id) {
        return Some(candidate.id);
    }
    paths
        .resolve(&candidate.path)
        .and_then(|chunk_id| ids.get(chunk_id))
}

/// True when following `parent_id` from `chunk_id` returns to `chunk_id`.
fn is_own_ancestor(chunk_id: &str, chunks: &ChunkIndex) -> bool {
    let mut visited = HashSet::new();
    let mut cursor = chunks.get(chunk_id).and_then(|chunk| chunk.parent_id());
    while let Some(ancestor) = cursor {
        if ancestor == chunk_id {
            return true;
        }
        if !visited.insert(ancestor) {
            return false;
        }
        cursor = chunks.get(ancestor).and_then(|chunk| chunk.parent_id());
    }
    false
}

struct EdgeWriter<'a> {
    store: &'a dyn GraphStore,
    limit: Duration,
    document_id: &'a str,
    attempted: HashSet<(NodeId, NodeId)>,
    report: RelationReport,
}

impl EdgeWriter<'_> {
    async fn link_parents(&mut self, chunks: &ChunkIndex, ids: &StorageIds) {
        for (chunk_id, chunk) in chunks.iter() {
            let Some(parent_chunk) = chunk.parent_id() else {
                continue;
            };
            let Some(node_id) = ids.get(chunk_id) else {
                continue;
            };
            if is_own_ancestor(chunk_id, chunks) {
                warn!(
                    document_id = self.document_id,
                    chunk_id, "parent chain is cyclic; leaving node as a root"
                );
                self.report.parent_cycles.push(chunk_id.to_string());
                continue;
            }
            let Some(parent_id) = ids.get(parent_chunk) else {
                continue;
            };

            match bounded(
                self.limit,
                "update parent",
                self.store.update_node_parent(node_id, parent_id),
            )
            .await
            {
                Ok(()) => self.report.parent_links += 1,
                Err(err) => {
                    warn!(
                        document_id = self.document_id,
                        chunk_id,
                        node_id,
                        parent_id,
                        error = %format!("{err:#}"),
                        "failed to set parent"
                    );
                    self.report.parent_failures.push(ParentFailure {
                        chunk_id: chunk_id.to_string(),
                        node_id,
                        parent_id,
                        error: format!("{err:#}"),
                    });
                }
            }
        }
    }

    async fn reference(&mut self, source: NodeId, target: NodeId, kind: ReferenceKind) {
        if source == target {
            self.report.self_pairs += 1;
            return;
        }
        if !self.attempted.insert((source, target)) {
            self.report.duplicate_pairs += 1;
            return;
        }

        let reference = NewReference::new(source, target, kind);
        match bounded(
            self.limit,
            "insert reference",
            self.store.insert_reference(&reference),
        )
        .await
        {
            Ok(()) => {
                self.report.references_created += 1;
                match kind {
                    ReferenceKind::Exact => self.report.exact_created += 1,
                    ReferenceKind::Fuzzy => self.report.fuzzy_created += 1,
                }
            }
            Err(err) => {
                warn!(
                    document_id = self.document_id,
                    source_node_id = source,
                    target_node_id = target,
                    kind = kind.as_str(),
                    error = %format!("{err:#}"),
                    "failed to insert reference"
                );
                self.report.reference_failures.push(ReferenceFailure {
                    source_node_id: source,
                    target_node_id: target,
                    reference_type: kind,
                    error: format!("{err:#}"),
                });
            }
        }
    }
}
