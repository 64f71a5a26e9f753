//! OpenAI-compatible embedding provider.

use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::blocking::Client;
use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::EmbeddingProvider;
use crate::node::NodeRecord;

/// Default cap on characters sent per node.
pub const DEFAULT_MAX_INPUT_CHARS: usize = 8_000;

/// Blocking embeddings client that talks to OpenAI-compatible endpoints.
#[derive(Clone)]
pub struct OpenAiEmbedder {
    client: Client,
    endpoint: String,
    model: String,
    dimensions: Option<usize>,
    max_retries: usize,
    batch_size: usize,
    max_input_chars: usize,
}

impl OpenAiEmbedder {
    /// Builds a new OpenAI embeddings client.
    pub fn new(
        api_key: String,
        base_url: String,
        model: String,
        dimensions: Option<usize>,
        timeout: Duration,
        max_retries: usize,
        batch_size: usize,
    ) -> Result<Self> {
        anyhow::ensure!(!api_key.trim().is_empty(), "missing OpenAI API key");
        anyhow::ensure!(!model.trim().is_empty(), "missing OpenAI model name");
        let mut headers = reqwest::header::HeaderMap::new();
        let auth = format!("Bearer {}", api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth).context("invalid OpenAI API key")?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .context("failed to build OpenAI HTTP client")?;
        let endpoint = format!("{}/embeddings", base_url.trim_end_matches('/'));
        Ok(Self {
            client,
            endpoint,
            model,
            dimensions,
            max_retries,
            batch_size: batch_size.max(1),
            max_input_chars: DEFAULT_MAX_INPUT_CHARS,
        })
    }

    /// Overrides the per-node character cap.
    pub fn with_max_input_chars(mut self, max_input_chars: usize) -> Self {
        self.max_input_chars = max_input_chars.max(1);
        self
    }

    /// Sends a batch of strings to OpenAI and returns embedding vectors.
    pub fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        anyhow::ensure!(
            inputs.len() <= self.batch_size,
            "batch of {} exceeds configured max {}",
            inputs.len(),
            self.batch_size
        );

        let mut attempt = 0usize;
        loop {
            let request = EmbeddingRequest {
                model: &self.model,
                input: inputs,
                dimensions: self.dimensions,
            };
            let response = self.client.post(&self.endpoint).json(&request).send();
            match response {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let mut parsed: EmbeddingResponse = resp
                            .json()
                            .context("failed to parse OpenAI embedding response")?;
                        parsed.data.sort_by_key(|entry| entry.index);
                        anyhow::ensure!(
                            parsed.data.len() == inputs.len(),
                            "OpenAI returned {} embeddings for {} inputs",
                            parsed.data.len(),
                            inputs.len()
                        );
                        return Ok(parsed
                            .data
                            .into_iter()
                            .map(|entry| entry.embedding)
                            .collect());
                    }

                    let body = resp
                        .text()
                        .unwrap_or_else(|_| "<body unavailable>".to_string());
                    if self.should_retry(status) && attempt + 1 < self.max_retries {
                        attempt += 1;
                        thread::sleep(self.retry_backoff(attempt));
                        continue;
                    }
                    anyhow::bail!("OpenAI embeddings request failed ({}): {}", status, body);
                }
                Err(err) => {
                    if self.is_retryable_error(&err) && attempt + 1 < self.max_retries {
                        attempt += 1;
                        thread::sleep(self.retry_backoff(attempt));
                        continue;
                    }
                    return Err(err.into());
                }
            }
        }
    }

    /// Embeds every node with content, batch by batch.
    ///
    /// A batch that still fails after retries leaves its records flagged as not
    /// embedded. When every attempted batch fails the whole call fails.
    pub fn embed_nodes(&self, mut nodes: Vec<NodeRecord>) -> Result<Vec<NodeRecord>> {
        let mut pending = Vec::new();
        for (idx, node) in nodes.iter_mut().enumerate() {
            node.clear_embedding();
            if node.content.trim().is_empty() {
                continue;
            }
            pending.push((idx, embedding_input(node, self.max_input_chars)));
        }

        let mut attempted = 0usize;
        let mut failed = 0usize;
        let mut last_error = None;
        for batch in pending.chunks(self.batch_size) {
            attempted += 1;
            let inputs: Vec<&str> = batch.iter().map(|(_, text)| text.as_str()).collect();
            match self.embed_batch(&inputs) {
                Ok(vectors) => {
                    for ((idx, _), vector) in batch.iter().zip(vectors) {
                        nodes[*idx].set_embedding(vector);
                    }
                    debug!(size = batch.len(), "embedded batch");
                }
                Err(err) => {
                    warn!(size = batch.len(), error = %format!("{err:#}"), "embedding batch failed");
                    failed += 1;
                    last_error = Some(err);
                }
            }
        }

        match last_error {
            Some(err) if failed == attempted => {
                Err(err.context(format!("all {attempted} embedding batches failed")))
            }
            _ => Ok(nodes),
        }
    }

    fn should_retry(&self, status: StatusCode) -> bool {
        status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
    }

    fn is_retryable_error(&self, err: &reqwest::Error) -> bool {
        err.is_timeout() || err.is_connect() || err.is_body() || err.is_request() || err.is_decode()
    }

    fn retry_backoff(&self, attempt: usize) -> Duration {
        let capped = attempt.min(5) as u32;
        Duration::from_millis(500 * (1 << capped))
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    async fn generate_node_embeddings(&self, nodes: Vec<NodeRecord>) -> Result<Vec<NodeRecord>> {
        let embedder = self.clone();
        tokio::task::spawn_blocking(move || embedder.embed_nodes(nodes))
            .await
            .context("embedding worker panicked")?
    }
}

/// Text submitted for a node: its path, a blank line, then its content, capped in characters.
fn embedding_input(node: &NodeRecord, max_chars: usize) -> String {
    format!("{}\n\n{}", node.path, node.content)
        .chars()
        .take(max_chars)
        .collect()
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    #[serde(borrow)]
    input: &'a [&'a str],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}
