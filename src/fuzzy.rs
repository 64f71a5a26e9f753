//! Batched pattern lookups for mentions that missed the exact path index.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, warn};

use crate::bounded::bounded;
use crate::store::{like_pattern, GraphStore, StoredNode};

/// Default upper bound on candidates fetched per pattern.
pub const DEFAULT_FUZZY_MAX_RESULTS: usize = 10;

/// A pattern whose lookup failed or timed out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LookupFailure {
    pub pattern: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FuzzyReport {
    pub patterns: usize,
    /// Patterns that produced at least one same-document candidate.
    pub matched: usize,
    /// Candidates dropped because they belong to another document.
    pub foreign_candidates: usize,
    pub failures: Vec<LookupFailure>,
}

/// Pattern → same-document candidates, plus the lookup report.
#[derive(Debug, Clone, Default)]
pub struct FuzzyCandidates {
    pub by_pattern: BTreeMap<String, Vec<StoredNode>>,
    pub report: FuzzyReport,
}

/// Lookup knobs for [`lookup_candidates`].
#[derive(Debug, Clone, Copy)]
pub struct FuzzyLookup {
    pub max_results: usize,
    pub concurrency: usize,
    pub timeout: Duration,
}

/// Queries the store once per unique pattern and keeps candidates from `document_id`.
///
/// A failing pattern is recorded and the remaining patterns are still attempted.
pub async fn lookup_candidates(
    store: &dyn GraphStore,
    document_id: &str,
    pending: &BTreeSet<String>,
    settings: FuzzyLookup,
) -> FuzzyCandidates {
    let mut out = FuzzyCandidates::default();
    out.report.patterns = pending.len();
    if pending.is_empty() {
        return out;
    }

    let results: Vec<_> = stream::iter(pending.iter())
        .map(|key| async move {
            let pattern = like_pattern(key);
            let found = bounded(
                settings.timeout,
                "path lookup",
                store.find_nodes_by_path(&pattern, settings.max_results),
            )
            .await;
            (key, found)
        })
        .buffer_unordered(settings.concurrency.max(1))
        .collect()
        .await;

    for (key, found) in results {
        match found {
            Ok(rows) => {
                let total = rows.len();
                let same_document: Vec<StoredNode> = rows
                    .into_iter()
                    .filter(|row| row.document_id == document_id)
                    .collect();
                out.report.foreign_candidates += total - same_document.len();
                if !same_document.is_empty() {
                    out.by_pattern.insert(key.clone(), same_document);
                }
            }
            Err(err) => {
                warn!(document_id, pattern = key.as_str(), error = %format!("{err:#}"), "path lookup failed");
                out.report.failures.push(LookupFailure {
                    pattern: key.clone(),
                    error: format!("{err:#}"),
                });
            }
        }
    }
    out.report.failures.sort_by(|a, b| a.pattern.cmp(&b.pattern));
    out.report.matched = out.by_pattern.len();
    debug!(
        document_id,
        patterns = out.report.patterns,
        matched = out.report.matched,
        failures = out.report.failures.len(),
        "fuzzy lookups complete"
    );
    out
}
