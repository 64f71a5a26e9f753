//! Upstream chunk producers: markdown sections and pre-enriched JSONL.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use anyhow::{Context, Result};
use md_sections::{extract_sections, BlockKind, Section};
use serde_json::Value;

use crate::chunk::{Chunk, ChunkMetadata, RelatedSection};

/// Produces enriched chunks from a document's text.
pub trait ChunkSource: Send + Sync {
    fn chunks(&self, text: &str) -> Result<Vec<Chunk>>;
}

/// Picks the chunk source for a file by extension: `.jsonl` is read as chunks, anything else as markdown.
pub fn source_for_path(path: &Path) -> Box<dyn ChunkSource> {
    let is_jsonl = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("jsonl"));
    if is_jsonl {
        Box::new(JsonlChunkSource)
    } else {
        Box::new(MarkdownChunkSource)
    }
}

/// One chunk per JSON object line.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonlChunkSource;

impl ChunkSource for JsonlChunkSource {
    fn chunks(&self, text: &str) -> Result<Vec<Chunk>> {
        let mut chunks = Vec::new();
        for (line_no, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let chunk: Chunk = serde_json::from_str(line)
                .with_context(|| format!("invalid chunk record at line {}", line_no + 1))?;
            chunks.push(chunk);
        }
        Ok(chunks)
    }
}

/// One chunk per heading section, plus a preamble chunk for text before the first heading.
///
/// Chunk ids follow section order (`chunk-0000`, `chunk-0001`, ...), so an unchanged
/// document yields the same ids on every run.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkdownChunkSource;

impl ChunkSource for MarkdownChunkSource {
    fn chunks(&self, text: &str) -> Result<Vec<Chunk>> {
        let sections = extract_sections(text);
        let anchors = anchor_targets(&sections);
        let total = sections.len();

        Ok(sections
            .iter()
            .map(|section| section_chunk(section, &sections, &anchors, total))
            .collect())
    }
}

fn chunk_id(index: usize) -> String {
    format!("chunk-{index:04}")
}

/// Slug → section index, with GitHub's `-1`, `-2` suffixes for repeated headings.
fn anchor_targets(sections: &[Section]) -> HashMap<String, usize> {
    let mut targets = HashMap::new();
    let mut seen: HashMap<String, usize> = HashMap::new();
    for section in sections {
        let Some(slug) = section.slug() else {
            continue;
        };
        let repeats = seen.entry(slug.clone()).or_insert(0);
        let anchor = if *repeats == 0 {
            slug
        } else {
            format!("{slug}-{repeats}")
        };
        *repeats += 1;
        targets.entry(anchor).or_insert(section.index);
    }
    targets
}

fn section_chunk(
    section: &Section,
    sections: &[Section],
    anchors: &HashMap<String, usize>,
    total: usize,
) -> Chunk {
    let siblings: Vec<usize> = match section.parent {
        Some(parent) => sections[parent].children.clone(),
        None => sections
            .iter()
            .filter(|other| other.parent.is_none())
            .map(|other| other.index)
            .collect(),
    };

    let content = if section.body.is_empty() {
        section.title.clone().unwrap_or_default()
    } else {
        section.body.clone()
    };
    let kind = if section.title.is_some() {
        "section"
    } else {
        "preamble"
    };
    let document_position = if total > 1 {
        section.index as f64 / (total - 1) as f64
    } else {
        0.0
    };

    Chunk {
        chunk_id: Some(chunk_id(section.index)),
        kind: Some(kind.to_string()),
        title: section.title.clone(),
        content: Some(content),
        level: Some(i32::from(section.level)),
        metadata: Some(ChunkMetadata {
            hierarchy_path: section.path.clone(),
            section_type: Some(section_type(section).to_string()),
            content_type: Some(content_type(&section.block_kinds).to_string()),
            document_position: Some(document_position),
            parent_id: section.parent.map(chunk_id),
            child_ids: section
                .children
                .iter()
                .map(|child| Value::String(chunk_id(*child)))
                .collect(),
            sibling_ids: siblings
                .into_iter()
                .filter(|idx| *idx != section.index)
                .map(|idx| Value::String(chunk_id(idx)))
                .collect(),
            related_sections: related_sections(section, sections, anchors),
            link_count: Some(section.links.len() as u64),
            contains_links: Some(!section.links.is_empty()),
            extra: Default::default(),
        }),
    }
}

/// In-document anchor links become mentions: the target's path when the anchor
/// names a heading, otherwise the link text.
fn related_sections(
    section: &Section,
    sections: &[Section],
    anchors: &HashMap<String, usize>,
) -> Vec<RelatedSection> {
    let mut seen = BTreeSet::new();
    let mut related = Vec::new();
    for link in &section.links {
        let Some(anchor) = link.anchor() else {
            continue;
        };
        let mention = match anchors.get(&anchor.to_lowercase()) {
            Some(target) => RelatedSection::path(sections[*target].path.iter().cloned()),
            None if !link.text.is_empty() => RelatedSection::Joined(link.text.clone()),
            None => continue,
        };
        if let Some(key) = mention.path_key() {
            if seen.insert(key) {
                related.push(mention);
            }
        }
    }
    related
}

const SECTION_KEYWORDS: &[(&str, &[&str])] = &[
    ("introduction", &["intro", "overview", "about", "summary"]),
    (
        "setup",
        &[
            "install",
            "setup",
            "set up",
            "getting started",
            "quickstart",
            "requirement",
            "configur",
        ],
    ),
    ("usage", &["usage", "example", "tutorial", "how to", "guide"]),
    ("reference", &["api", "reference", "option", "parameter"]),
    (
        "troubleshooting",
        &["troubleshoot", "faq", "error", "known issue"],
    ),
    ("conclusion", &["conclusion", "next step", "see also"]),
];

fn section_type(section: &Section) -> &'static str {
    let Some(title) = section.title.as_deref() else {
        return "preamble";
    };
    let title = title.to_lowercase();
    SECTION_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|keyword| title.contains(keyword)))
        .map(|(kind, _)| *kind)
        .unwrap_or("content")
}

fn content_type(kinds: &[BlockKind]) -> &'static str {
    let special: BTreeSet<&'static str> = kinds
        .iter()
        .filter_map(|kind| match kind {
            BlockKind::Code => Some("code"),
            BlockKind::Table => Some("table"),
            BlockKind::ListItem => Some("list"),
            BlockKind::Paragraph | BlockKind::Heading => None,
        })
        .collect();
    match special.len() {
        0 => "text",
        1 => special.into_iter().next().unwrap_or("text"),
        _ => "mixed",
    }
}
