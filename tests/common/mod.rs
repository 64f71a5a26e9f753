#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use docgraph::node::ORIGINAL_ID_KEY;
use docgraph::{
    Chunk, ChunkMetadata, EmbeddingProvider, GraphStore, MemoryStore, NewReference, NodeId,
    NodeRecord, Pipeline, PipelineConfig, RelatedSection, StoredNode,
};
use serde_json::{json, Map};

/// Builds an enriched chunk with string mentions.
pub fn chunk(id: &str, path: &[&str], parent: Option<&str>, related: &[&str]) -> Chunk {
    Chunk {
        chunk_id: Some(id.to_string()),
        kind: Some("section".to_string()),
        title: path.last().map(|title| title.to_string()),
        content: Some(format!("Body of {}", path.join(" / "))),
        level: Some(path.len() as i32),
        metadata: Some(ChunkMetadata {
            hierarchy_path: path.iter().map(|title| title.to_string()).collect(),
            parent_id: parent.map(str::to_string),
            related_sections: related
                .iter()
                .map(|mention| RelatedSection::Joined(mention.to_string()))
                .collect(),
            ..ChunkMetadata::default()
        }),
    }
}

/// A node row as an earlier run would have stored it.
pub fn stored_record(document_id: &str, chunk_id: &str, path: &str) -> NodeRecord {
    let mut metadata = Map::new();
    metadata.insert(ORIGINAL_ID_KEY.to_string(), json!(chunk_id));
    NodeRecord {
        document_id: document_id.to_string(),
        node_type: "section".to_string(),
        title: path.rsplit(" > ").next().map(str::to_string),
        content: "previous generation".to_string(),
        level: None,
        path: path.to_string(),
        section_type: "unknown".to_string(),
        content_type: "text".to_string(),
        document_position: None,
        metadata,
        embedding: Some(vec![0.0, 1.0]),
        embedding_generated: true,
    }
}

pub fn pipeline(store: Arc<dyn GraphStore>, embedder: Arc<dyn EmbeddingProvider>) -> Pipeline {
    let config = PipelineConfig::new(Duration::from_secs(2), Duration::from_secs(2), 10, 4);
    Pipeline::new(store, embedder, config)
}

/// Embeds everything except the listed chunk ids.
#[derive(Default)]
pub struct StubEmbedder {
    refuse: HashSet<String>,
    pub calls: AtomicUsize,
}

impl StubEmbedder {
    pub fn refusing(ids: &[&str]) -> Self {
        Self {
            refuse: ids.iter().map(|id| id.to_string()).collect(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for StubEmbedder {
    async fn generate_node_embeddings(&self, mut nodes: Vec<NodeRecord>) -> Result<Vec<NodeRecord>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        for node in &mut nodes {
            let refused = node
                .original_id()
                .is_some_and(|id| self.refuse.contains(id));
            if refused {
                node.clear_embedding();
            } else {
                node.set_embedding(vec![node.content.len() as f32, 1.0]);
            }
        }
        Ok(nodes)
    }
}

/// Fails every call, as an unreachable provider would.
pub struct DownEmbedder;

#[async_trait]
impl EmbeddingProvider for DownEmbedder {
    async fn generate_node_embeddings(&self, _nodes: Vec<NodeRecord>) -> Result<Vec<NodeRecord>> {
        bail!("connection refused")
    }
}

/// Embeds after a delay, keeping the run in flight.
pub struct SlowEmbedder(pub Duration);

#[async_trait]
impl EmbeddingProvider for SlowEmbedder {
    async fn generate_node_embeddings(&self, nodes: Vec<NodeRecord>) -> Result<Vec<NodeRecord>> {
        tokio::time::sleep(self.0).await;
        StubEmbedder::default().generate_node_embeddings(nodes).await
    }
}

/// Memory store with switchable per-operation failures.
#[derive(Default)]
pub struct FaultyStore {
    pub inner: MemoryStore,
    pub fail_lookups: AtomicBool,
    pub fail_clear: AtomicBool,
    pub fail_inserts: AtomicBool,
    pub fail_parents: AtomicBool,
    pub fail_references: AtomicBool,
}

impl FaultyStore {
    pub fn set(flag: &AtomicBool, value: bool) {
        flag.store(value, Ordering::SeqCst);
    }
}

fn tripped(flag: &AtomicBool) -> bool {
    flag.load(Ordering::SeqCst)
}

#[async_trait]
impl GraphStore for FaultyStore {
    async fn find_nodes_by_path(&self, pattern: &str, max_results: usize) -> Result<Vec<StoredNode>> {
        if tripped(&self.fail_lookups) {
            bail!("lookup unavailable");
        }
        self.inner.find_nodes_by_path(pattern, max_results).await
    }

    async fn delete_nodes_by_document_id(&self, document_id: &str) -> Result<u64> {
        if tripped(&self.fail_clear) {
            bail!("delete unavailable");
        }
        self.inner.delete_nodes_by_document_id(document_id).await
    }

    async fn insert_node(&self, node: &NodeRecord) -> Result<NodeId> {
        if tripped(&self.fail_inserts) {
            bail!("insert unavailable");
        }
        self.inner.insert_node(node).await
    }

    async fn update_node_parent(&self, node_id: NodeId, parent_id: NodeId) -> Result<()> {
        if tripped(&self.fail_parents) {
            bail!("update unavailable");
        }
        self.inner.update_node_parent(node_id, parent_id).await
    }

    async fn insert_reference(&self, reference: &NewReference) -> Result<()> {
        if tripped(&self.fail_references) {
            bail!("reference insert unavailable");
        }
        self.inner.insert_reference(reference).await
    }
}
