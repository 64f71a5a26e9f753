//! Embedding collaborator seam and the gate that applies its results to node records.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, warn};

use crate::bounded::bounded;
use crate::error::PipelineError;
use crate::node::NodeRecord;

pub mod openai;

pub use openai::OpenAiEmbedder;

/// Produces embeddings for a batch of node records.
///
/// Implementations must return every input record, in input order, each either
/// carrying a vector with `embedding_generated = true` or flagged `false` without one.
/// An `Err` means the provider could not be invoked at all.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn generate_node_embeddings(&self, nodes: Vec<NodeRecord>) -> Result<Vec<NodeRecord>>;
}

/// Outcome of the embedding gate.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EmbeddingReport {
    pub requested: usize,
    pub generated: usize,
    pub failed: usize,
    /// Chunk ids of records left without an embedding.
    pub failed_chunks: Vec<String>,
}

/// Runs the provider once over the whole batch and enforces its contract.
pub async fn gate_embeddings(
    provider: &dyn EmbeddingProvider,
    nodes: Vec<NodeRecord>,
    limit: Duration,
) -> Result<(Vec<NodeRecord>, EmbeddingReport), PipelineError> {
    let mut report = EmbeddingReport {
        requested: nodes.len(),
        ..EmbeddingReport::default()
    };
    if nodes.is_empty() {
        return Ok((nodes, report));
    }

    let expected = nodes.len();
    let mut embedded = bounded(
        limit,
        "embedding provider",
        provider.generate_node_embeddings(nodes),
    )
    .await
    .map_err(|err| PipelineError::EmbeddingProvider(format!("{err:#}")))?;
    if embedded.len() != expected {
        return Err(PipelineError::EmbeddingContract {
            expected,
            returned: embedded.len(),
        });
    }

    for node in &mut embedded {
        let usable = node.embedding_generated
            && node
                .embedding
                .as_ref()
                .is_some_and(|vector| !vector.is_empty());
        if usable {
            report.generated += 1;
            continue;
        }
        if node.embedding_generated {
            warn!(
                chunk_id = node.original_id().unwrap_or_default(),
                path = node.path.as_str(),
                "provider flagged a record as embedded without a vector"
            );
        }
        node.clear_embedding();
        report.failed += 1;
        report
            .failed_chunks
            .push(node.original_id().unwrap_or_default().to_string());
    }

    info!(
        generated = report.generated,
        failed = report.failed,
        "embedding gate complete"
    );
    Ok((embedded, report))
}
