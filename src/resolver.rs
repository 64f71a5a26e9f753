//! Classifies "related section" mentions as exact edges or pending fuzzy lookups.

use std::collections::BTreeSet;

use serde::Serialize;
use tracing::{debug, warn};

use crate::node::MappedDocument;

/// Source → target pair resolved by exact path match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ExactCandidate {
    pub source: String,
    pub target: String,
}

/// A mention that missed the path index and awaits a pattern lookup.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct FuzzyMention {
    pub source: String,
    pub pattern: String,
}

/// A mention that could not be turned into a path key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnsupportedMention {
    pub chunk_id: String,
    pub shape: &'static str,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResolutionReport {
    pub mentions: usize,
    pub exact: usize,
    pub self_references: usize,
    pub pending_patterns: usize,
    pub unsupported: Vec<UnsupportedMention>,
}

/// Output of the resolver.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub exact: Vec<ExactCandidate>,
    /// Unique path keys that need a store lookup.
    pub pending: BTreeSet<String>,
    /// Every (source, key) pair behind `pending`, in document order.
    pub fuzzy_mentions: Vec<FuzzyMention>,
    pub report: ResolutionReport,
}

/// Resolves every mention of every indexed chunk against the document's path index.
pub fn resolve_references(mapped: &MappedDocument) -> Resolution {
    let mut resolution = Resolution::default();
    let mut seen_exact = BTreeSet::new();
    let mut seen_fuzzy = BTreeSet::new();

    for (source, chunk) in mapped.chunks.iter() {
        for mention in chunk.related_sections() {
            resolution.report.mentions += 1;
            let Some(key) = mention.path_key().filter(|key| !key.trim().is_empty()) else {
                warn!(
                    chunk_id = source,
                    shape = mention.shape(),
                    "skipping related section with unsupported shape"
                );
                resolution.report.unsupported.push(UnsupportedMention {
                    chunk_id: source.to_string(),
                    shape: mention.shape(),
                });
                continue;
            };

            match mapped.paths.resolve(&key) {
                Some(target) if target == source => {
                    resolution.report.self_references += 1;
                }
                Some(target) => {
                    if seen_exact.insert((source.to_string(), target.to_string())) {
                        resolution.exact.push(ExactCandidate {
                            source: source.to_string(),
                            target: target.to_string(),
                        });
                    }
                }
                None => {
                    if seen_fuzzy.insert((source.to_string(), key.clone())) {
                        resolution.fuzzy_mentions.push(FuzzyMention {
                            source: source.to_string(),
                            pattern: key.clone(),
                        });
                    }
                    resolution.pending.insert(key);
                }
            }
        }
    }

    resolution.report.exact = resolution.exact.len();
    resolution.report.pending_patterns = resolution.pending.len();
    debug!(
        mentions = resolution.report.mentions,
        exact = resolution.report.exact,
        pending = resolution.report.pending_patterns,
        "resolved related sections"
    );
    resolution
}
