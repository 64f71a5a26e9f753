//! Core library entry points for docgraph: turn a chunked document into a persisted
//! graph of embedded nodes, parent links and cross-reference edges.

pub mod bounded;
pub mod chunk;
pub mod chunker;
pub mod config;
pub mod embedder;
pub mod error;
pub mod fuzzy;
pub mod node;
pub mod persist;
pub mod pipeline;
pub mod relations;
pub mod resolver;
pub mod store;

pub use chunk::{path_key, Chunk, ChunkMetadata, RelatedSection, PATH_SEPARATOR};
pub use chunker::{ChunkSource, JsonlChunkSource, MarkdownChunkSource};
pub use config::{Cli, PipelineConfig};
pub use embedder::{EmbeddingProvider, EmbeddingReport, OpenAiEmbedder};
pub use error::{PipelineError, PipelineFailure};
pub use node::{NodeRecord, PathIndex, UNKNOWN_PATH};
pub use pipeline::{Pipeline, PipelineReport};
pub use store::{
    GraphStore, MemoryStore, NewReference, NodeId, PgGraphStore, ReferenceKind, StoredNode,
    TableName, EXACT_STRENGTH, FUZZY_STRENGTH,
};
