//! Pipeline tuning knobs and the command-line surface that fills them.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::embedder::openai::DEFAULT_MAX_INPUT_CHARS;
use crate::fuzzy::DEFAULT_FUZZY_MAX_RESULTS;

/// Output width of text-embedding-3-small.
pub const DEFAULT_VECTOR_DIMENSIONS: usize = 1536;

/// Bounds applied to one document run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PipelineConfig {
    store_timeout: Duration,
    embedding_timeout: Duration,
    fuzzy_max_results: usize,
    fuzzy_concurrency: usize,
}

impl PipelineConfig {
    /// Constructs a new set of pipeline bounds.
    pub fn new(
        store_timeout: Duration,
        embedding_timeout: Duration,
        fuzzy_max_results: usize,
        fuzzy_concurrency: usize,
    ) -> Self {
        Self {
            store_timeout,
            embedding_timeout,
            fuzzy_max_results: fuzzy_max_results.max(1),
            fuzzy_concurrency: fuzzy_concurrency.max(1),
        }
    }

    /// Deadline for each store call.
    pub fn store_timeout(&self) -> Duration {
        self.store_timeout
    }

    /// Deadline for the single embedding provider call.
    pub fn embedding_timeout(&self) -> Duration {
        self.embedding_timeout
    }

    /// Candidates requested per fuzzy pattern.
    pub fn fuzzy_max_results(&self) -> usize {
        self.fuzzy_max_results
    }

    /// Pattern lookups allowed in flight at once.
    pub fn fuzzy_concurrency(&self) -> usize {
        self.fuzzy_concurrency
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            store_timeout: Duration::from_secs(30),
            embedding_timeout: Duration::from_secs(300),
            fuzzy_max_results: DEFAULT_FUZZY_MAX_RESULTS,
            fuzzy_concurrency: 4,
        }
    }
}

/// Command-line interface for the `docgraph` binary.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "docgraph",
    version,
    about = "Build a node/reference graph with embeddings from a chunked document"
)]
pub struct Cli {
    /// Markdown (.md/.txt) or pre-chunked JSONL (.jsonl) source
    #[arg(short, long, env = "DOCGRAPH_FILE")]
    pub file: PathBuf,

    /// Document id (defaults to the file stem)
    #[arg(long, env = "DOCGRAPH_DOCUMENT_ID")]
    pub id: Option<String>,

    /// Postgres connection string (postgres://...)
    #[arg(long, env = "DATABASE_URL", required_unless_present = "dry_run")]
    pub database_url: Option<String>,

    /// Schema holding the graph tables
    #[arg(long, env = "DOCGRAPH_SCHEMA", default_value = "public")]
    pub schema: String,

    /// Node table name inside the schema
    #[arg(long, env = "DOCGRAPH_NODES_TABLE", default_value = "document_nodes")]
    pub nodes_table: String,

    /// Reference table name inside the schema
    #[arg(
        long,
        env = "DOCGRAPH_REFERENCES_TABLE",
        default_value = "document_references"
    )]
    pub references_table: String,

    /// Create the vector extension and graph tables if missing
    #[arg(long, env = "DOCGRAPH_PREPARE_SCHEMA", default_value_t = false)]
    pub prepare_schema: bool,

    /// Keep the graph in memory instead of writing to Postgres
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,

    /// OpenAI API key used for embedding calls
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: String,

    /// Embedding model identifier (e.g. text-embedding-3-small)
    #[arg(
        long,
        env = "DOCGRAPH_OPENAI_MODEL",
        default_value = "text-embedding-3-small"
    )]
    pub openai_model: String,

    /// Optional dimension override when supported by the model
    #[arg(long, env = "DOCGRAPH_OPENAI_DIMENSIONS")]
    pub openai_dimensions: Option<usize>,

    /// Base URL for the OpenAI-compatible API
    #[arg(
        long,
        env = "DOCGRAPH_OPENAI_BASE",
        default_value = "https://api.openai.com/v1"
    )]
    pub openai_base_url: String,

    /// Max number of nodes sent per embedding request
    #[arg(long, env = "DOCGRAPH_OPENAI_BATCH", default_value_t = 32)]
    pub openai_batch_size: usize,

    /// Max seconds to wait for each embedding request
    #[arg(long, env = "DOCGRAPH_OPENAI_TIMEOUT_SECS", default_value_t = 30)]
    pub openai_timeout_secs: u64,

    /// Characters of path and content sent per node
    #[arg(long, env = "DOCGRAPH_OPENAI_MAX_INPUT_CHARS", default_value_t = DEFAULT_MAX_INPUT_CHARS)]
    pub openai_max_input_chars: usize,

    /// Number of retries for rate limits or transient errors
    #[arg(long, env = "DOCGRAPH_OPENAI_MAX_RETRIES", default_value_t = 5)]
    pub openai_max_retries: usize,

    /// Seconds allowed for each store call
    #[arg(long, env = "DOCGRAPH_STORE_TIMEOUT_SECS", default_value_t = 30)]
    pub store_timeout_secs: u64,

    /// Seconds allowed for the whole embedding step
    #[arg(long, env = "DOCGRAPH_EMBEDDING_TIMEOUT_SECS", default_value_t = 300)]
    pub embedding_timeout_secs: u64,

    /// Candidates fetched per fuzzy path pattern
    #[arg(long, env = "DOCGRAPH_FUZZY_MAX_RESULTS", default_value_t = DEFAULT_FUZZY_MAX_RESULTS)]
    pub fuzzy_max_results: usize,

    /// Fuzzy path lookups in flight at once
    #[arg(long, env = "DOCGRAPH_FUZZY_CONCURRENCY", default_value_t = 4)]
    pub fuzzy_concurrency: usize,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    /// Converts the parsed CLI into `PipelineConfig`.
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig::new(
            Duration::from_secs(self.store_timeout_secs.max(1)),
            Duration::from_secs(self.embedding_timeout_secs.max(1)),
            self.fuzzy_max_results,
            self.fuzzy_concurrency,
        )
    }

    /// Width of the VECTOR column created by `--prepare-schema`.
    pub fn vector_dimensions(&self) -> usize {
        self.openai_dimensions.unwrap_or(DEFAULT_VECTOR_DIMENSIONS)
    }

    /// Default log filter for the requested verbosity.
    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "docgraph=info",
            1 => "docgraph=debug",
            2 => "docgraph=trace",
            _ => "trace",
        }
    }
}
