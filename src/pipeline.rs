//! Document run orchestration: map, resolve, look up, embed, persist, materialize.

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tracing::{info, warn};

use crate::chunk::Chunk;
use crate::chunker::source_for_path;
use crate::config::PipelineConfig;
use crate::embedder::{gate_embeddings, EmbeddingProvider, EmbeddingReport};
use crate::error::{PipelineError, PipelineFailure};
use crate::fuzzy::{lookup_candidates, FuzzyLookup, FuzzyReport};
use crate::node::{map_chunks, MappingReport};
use crate::persist::{persist_nodes, PersistReport};
use crate::relations::{materialize, GraphInputs, RelationReport};
use crate::resolver::{resolve_references, ResolutionReport};
use crate::store::GraphStore;

const KNOWN_EXTENSIONS: &[&str] = &["md", "markdown", "txt", "jsonl"];

/// Per-phase results of one document run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PipelineReport {
    pub document_id: String,
    pub chunks: usize,
    pub mapping: MappingReport,
    pub resolution: ResolutionReport,
    pub fuzzy: FuzzyReport,
    pub embedding: EmbeddingReport,
    pub persistence: PersistReport,
    pub relations: RelationReport,
}

impl PipelineReport {
    fn new(document_id: &str) -> Self {
        Self {
            document_id: document_id.to_string(),
            ..Self::default()
        }
    }

    pub fn inserted(&self) -> usize {
        self.persistence.inserted
    }

    pub fn failed(&self) -> usize {
        self.persistence.failed
    }

    pub fn parent_links(&self) -> usize {
        self.relations.parent_links
    }

    pub fn references_created(&self) -> usize {
        self.relations.references_created
    }

    pub fn lookup_errors(&self) -> usize {
        self.fuzzy.failures.len()
    }
}

/// Builds document graphs with injected storage and embedding collaborators.
pub struct Pipeline {
    store: Arc<dyn GraphStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    config: PipelineConfig,
    in_flight: Mutex<HashSet<String>>,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn GraphStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            config,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Reads `source`, chunks it, and replaces the stored graph of the document.
    ///
    /// The document id defaults to the file stem. A blank source succeeds with an
    /// empty report without touching either collaborator.
    pub async fn process_document(
        &self,
        source: &Path,
        document_id: Option<&str>,
    ) -> Result<PipelineReport, PipelineFailure> {
        let document_id = match document_id.map(str::trim).filter(|id| !id.is_empty()) {
            Some(id) => id.to_string(),
            None => document_id_from_path(source).ok_or_else(|| {
                fail(
                    PipelineError::Input {
                        path: source.to_path_buf(),
                        reason: "cannot derive a document id from the file name".to_string(),
                    },
                    PipelineReport::default(),
                )
            })?,
        };
        let report = PipelineReport::new(&document_id);

        let text = fs::read_to_string(source).map_err(|err| {
            fail(
                PipelineError::Input {
                    path: source.to_path_buf(),
                    reason: err.to_string(),
                },
                report.clone(),
            )
        })?;
        let known = source
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| KNOWN_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));
        if !known {
            warn!(path = %source.display(), "unrecognized extension; treating source as markdown");
        }
        if text.trim().is_empty() {
            info!(document_id, "source is empty; nothing to process");
            return Ok(report);
        }

        let chunks = source_for_path(source).chunks(&text).map_err(|err| {
            fail(
                PipelineError::Parse {
                    path: source.to_path_buf(),
                    reason: format!("{err:#}"),
                },
                report.clone(),
            )
        })?;
        self.process_chunks(&document_id, chunks).await
    }

    /// Runs every phase over already-enriched chunks.
    pub async fn process_chunks(
        &self,
        document_id: &str,
        chunks: Vec<Chunk>,
    ) -> Result<PipelineReport, PipelineFailure> {
        let mut report = PipelineReport::new(document_id);
        let _claim = DocumentClaim::acquire(&self.in_flight, document_id)
            .map_err(|err| fail(err, report.clone()))?;
        report.chunks = chunks.len();
        info!(document_id, chunks = chunks.len(), "processing document");

        let mapped = map_chunks(document_id, chunks);
        report.mapping = mapped.report.clone();
        if mapped.nodes.is_empty() {
            info!(document_id, "no valid chunks; nothing to persist");
            return Ok(report);
        }

        let resolution = resolve_references(&mapped);
        report.resolution = resolution.report.clone();
        info!(
            document_id,
            exact = resolution.exact.len(),
            patterns = resolution.pending.len(),
            "resolved references"
        );

        let fuzzy = lookup_candidates(
            self.store.as_ref(),
            document_id,
            &resolution.pending,
            FuzzyLookup {
                max_results: self.config.fuzzy_max_results(),
                concurrency: self.config.fuzzy_concurrency(),
                timeout: self.config.store_timeout(),
            },
        )
        .await;
        report.fuzzy = fuzzy.report.clone();

        let (nodes, embedding) = gate_embeddings(
            self.embedder.as_ref(),
            mapped.nodes.clone(),
            self.config.embedding_timeout(),
        )
        .await
        .map_err(|err| fail(err, report.clone()))?;
        report.embedding = embedding;

        let (ids, persistence) = persist_nodes(
            self.store.as_ref(),
            document_id,
            &nodes,
            self.config.store_timeout(),
        )
        .await;
        report.persistence = persistence;
        if let Err(err) = report.persistence.ensure_persisted() {
            return Err(fail(err, report));
        }

        report.relations = materialize(
            self.store.as_ref(),
            GraphInputs {
                document_id,
                mapped: &mapped,
                resolution: &resolution,
                fuzzy: &fuzzy,
                ids: &ids,
            },
            self.config.store_timeout(),
        )
        .await;

        info!(
            document_id,
            inserted = report.inserted(),
            failed = report.failed(),
            parent_links = report.parent_links(),
            references = report.references_created(),
            lookup_errors = report.lookup_errors(),
            "document processed"
        );
        Ok(report)
    }
}

fn fail(error: PipelineError, report: PipelineReport) -> PipelineFailure {
    PipelineFailure::new(error, report)
}

fn document_id_from_path(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .map(str::trim)
        .filter(|stem| !stem.is_empty())
        .map(str::to_string)
}

/// Marks a document as in flight until dropped.
struct DocumentClaim<'a> {
    in_flight: &'a Mutex<HashSet<String>>,
    document_id: String,
}

impl<'a> DocumentClaim<'a> {
    fn acquire(
        in_flight: &'a Mutex<HashSet<String>>,
        document_id: &str,
    ) -> Result<Self, PipelineError> {
        let mut active = in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if !active.insert(document_id.to_string()) {
            return Err(PipelineError::DocumentBusy(document_id.to_string()));
        }
        Ok(Self {
            in_flight,
            document_id: document_id.to_string(),
        })
    }
}

impl Drop for DocumentClaim<'_> {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.document_id);
    }
}
