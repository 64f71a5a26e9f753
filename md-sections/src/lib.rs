//! Extract heading-scoped blocks and sections from markdown documents.
//!
//! Every block carries the heading breadcrumb that encloses it, and blocks are
//! grouped into sections (one per heading, plus an untitled preamble for text
//! that precedes the first heading). Links are captured per block so callers
//! can turn in-document anchors into cross-references.

use pulldown_cmark::{Event, Options, Parser, Tag, TagEnd};
use serde::{Deserialize, Serialize};

/// Classification for extracted blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    Paragraph,
    Heading,
    ListItem,
    Code,
    Table,
}

/// Hyperlink found inside a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    /// Visible link text.
    pub text: String,
    /// Raw destination as written (`#anchor`, relative path or URL).
    pub target: String,
}

impl Link {
    /// Returns the fragment when the link points inside the current document.
    pub fn anchor(&self) -> Option<&str> {
        self.target
            .strip_prefix('#')
            .map(str::trim)
            .filter(|anchor| !anchor.is_empty())
    }
}

/// A structured block of extracted content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub kind: BlockKind,
    pub text: String,
    pub section_path: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<u8>,
    pub index: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<Link>,
}

/// Heading-delimited slice of a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    /// Position of the section in document order.
    pub index: usize,
    /// Heading text; `None` for the preamble.
    pub title: Option<String>,
    /// Heading depth (1-6); 0 for the preamble.
    pub level: u8,
    /// Heading titles from the document root down to this section.
    pub path: Vec<String>,
    /// Index of the enclosing section.
    pub parent: Option<usize>,
    /// Indices of directly nested sections.
    pub children: Vec<usize>,
    /// Body text without the heading line (blocks joined by blank lines).
    pub body: String,
    /// Kinds of the body blocks, in order.
    pub block_kinds: Vec<BlockKind>,
    /// Links found in the heading and body.
    pub links: Vec<Link>,
}

impl Section {
    /// GitHub-style anchor slug for the section heading.
    pub fn slug(&self) -> Option<String> {
        self.title.as_deref().map(slugify)
    }
}

/// Extracts heading-scoped blocks from a markdown document.
///
/// # Example
///
/// ```
/// use md_sections::{extract_blocks, BlockKind};
///
/// let blocks = extract_blocks("# Guide\n\nHello *world*.\n");
/// assert_eq!(blocks.len(), 2);
/// assert_eq!(blocks[1].kind, BlockKind::Paragraph);
/// assert_eq!(blocks[1].section_path, vec!["Guide".to_string()]);
/// ```
pub fn extract_blocks(markdown: &str) -> Vec<ContentBlock> {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    let parser = Parser::new_ext(markdown, options);

    let mut collector = BlockCollector::default();
    for event in parser {
        collector.handle(event);
    }
    collector.blocks
}

/// Groups blocks into sections, linking each to its enclosing heading.
///
/// # Example
///
/// ```
/// use md_sections::extract_sections;
///
/// let sections = extract_sections("# Guide\n\nIntro.\n\n## Step1\n\nDo it.\n");
/// assert_eq!(sections.len(), 2);
/// assert_eq!(sections[1].path, vec!["Guide".to_string(), "Step1".to_string()]);
/// assert_eq!(sections[1].parent, Some(0));
/// ```
pub fn extract_sections(markdown: &str) -> Vec<Section> {
    let mut sections: Vec<Section> = Vec::new();
    let mut open: Vec<(u8, usize)> = Vec::new();

    for block in extract_blocks(markdown) {
        if block.kind == BlockKind::Heading {
            let level = block.level.unwrap_or(1);
            while open.last().is_some_and(|(open_level, _)| *open_level >= level) {
                open.pop();
            }
            let index = sections.len();
            let parent = open.last().map(|(_, idx)| *idx);
            if let Some(parent) = parent {
                sections[parent].children.push(index);
            }
            sections.push(Section {
                index,
                title: Some(block.text),
                level,
                path: block.section_path,
                parent,
                children: Vec::new(),
                body: String::new(),
                block_kinds: Vec::new(),
                links: block.links,
            });
            open.push((level, index));
            continue;
        }

        if sections.is_empty() {
            sections.push(Section {
                index: 0,
                title: None,
                level: 0,
                path: Vec::new(),
                parent: None,
                children: Vec::new(),
                body: String::new(),
                block_kinds: Vec::new(),
                links: Vec::new(),
            });
        }
        let current = sections.len() - 1;
        let section = &mut sections[current];
        if !section.body.is_empty() {
            section.body.push_str("\n\n");
        }
        section.body.push_str(&block.text);
        section.block_kinds.push(block.kind);
        section.links.extend(block.links);
    }

    sections
}

/// Extracts readable text from a markdown document, one block per line.
///
/// # Example
///
/// ```
/// use md_sections::extract_text;
///
/// assert_eq!(extract_text("# Title\n\nSome `code` here.\n"), "Title\nSome code here.");
/// ```
pub fn extract_text(markdown: &str) -> String {
    extract_blocks(markdown)
        .into_iter()
        .map(|block| block.text)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Converts heading text into the anchor slug used by GitHub-flavoured renderers.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    for ch in title.trim().chars() {
        if ch.is_alphanumeric() || ch == '-' || ch == '_' {
            slug.extend(ch.to_lowercase());
        } else if ch.is_whitespace() {
            slug.push('-');
        }
    }
    slug
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Capture {
    Heading(u8),
    Code,
    Table,
    Item,
    Paragraph,
}

#[derive(Default)]
struct BlockCollector {
    blocks: Vec<ContentBlock>,
    headings: Vec<HeadingEntry>,
    capture: Option<Capture>,
    buffer: String,
    links: Vec<Link>,
    link_stack: Vec<PendingLink>,
    item_depth: usize,
}

struct PendingLink {
    target: String,
    text: String,
}

impl BlockCollector {
    fn handle(&mut self, event: Event<'_>) {
        match event {
            Event::Start(tag) => self.start(tag),
            Event::End(tag) => self.end(tag),
            Event::Text(text) | Event::Code(text) => self.push_text(&text),
            Event::SoftBreak | Event::HardBreak => {
                if self.capture == Some(Capture::Code) {
                    self.push_text("\n");
                } else {
                    self.push_text(" ");
                }
            }
            _ => {}
        }
    }

    fn start(&mut self, tag: Tag<'_>) {
        match tag {
            Tag::Heading { level, .. } => self.begin(Capture::Heading(level as u8)),
            Tag::CodeBlock(_) | Tag::Table(_) if self.capture == Some(Capture::Item) => {
                self.push_text(" ");
            }
            Tag::CodeBlock(_) => self.begin(Capture::Code),
            Tag::Table(_) => self.begin(Capture::Table),
            Tag::Item => {
                self.item_depth += 1;
                if self.item_depth == 1 {
                    self.begin(Capture::Item);
                } else {
                    self.push_text(" ");
                }
            }
            Tag::Paragraph => {
                if self.capture.is_none() {
                    self.begin(Capture::Paragraph);
                } else if self.capture == Some(Capture::Item) && !self.buffer.is_empty() {
                    self.push_text(" ");
                }
            }
            Tag::Link { dest_url, .. } => self.link_stack.push(PendingLink {
                target: dest_url.to_string(),
                text: String::new(),
            }),
            _ => {}
        }
    }

    fn end(&mut self, tag: TagEnd) {
        match tag {
            TagEnd::Heading(_) => {
                if let Some(Capture::Heading(level)) = self.capture {
                    self.flush(BlockKind::Heading, Some(level));
                }
            }
            TagEnd::CodeBlock if self.capture == Some(Capture::Code) => {
                self.flush(BlockKind::Code, None)
            }
            TagEnd::Table if self.capture == Some(Capture::Table) => {
                self.flush(BlockKind::Table, None)
            }
            TagEnd::TableCell => self.push_text(" | "),
            TagEnd::TableHead | TagEnd::TableRow => self.push_text("\n"),
            TagEnd::Item => {
                self.item_depth = self.item_depth.saturating_sub(1);
                if self.item_depth == 0 && self.capture == Some(Capture::Item) {
                    self.flush(BlockKind::ListItem, None);
                }
            }
            TagEnd::Paragraph => {
                if self.capture == Some(Capture::Paragraph) {
                    self.flush(BlockKind::Paragraph, None);
                }
            }
            TagEnd::Link => {
                if let Some(link) = self.link_stack.pop() {
                    self.links.push(Link {
                        text: normalize_whitespace(&link.text),
                        target: link.target,
                    });
                }
            }
            _ => {}
        }
    }

    fn begin(&mut self, capture: Capture) {
        self.capture = Some(capture);
        self.buffer.clear();
    }

    fn push_text(&mut self, text: &str) {
        if self.capture.is_none() {
            // Loose text outside any container (e.g. raw inline content) still counts.
            self.begin(Capture::Paragraph);
        }
        self.buffer.push_str(text);
        for link in &mut self.link_stack {
            link.text.push_str(text);
        }
    }

    fn flush(&mut self, kind: BlockKind, level: Option<u8>) {
        let raw = std::mem::take(&mut self.buffer);
        self.capture = None;
        let text = match kind {
            BlockKind::Code => normalize_code(&raw),
            BlockKind::Table => normalize_table(&raw),
            _ => normalize_whitespace(&raw),
        };
        let links = std::mem::take(&mut self.links);
        if text.is_empty() {
            return;
        }

        let section_path = match level {
            Some(level) => update_heading_path(&mut self.headings, level, text.clone()),
            None => self.headings.iter().map(|entry| entry.text.clone()).collect(),
        };
        self.blocks.push(ContentBlock {
            kind,
            text,
            section_path,
            level,
            index: self.blocks.len(),
            links,
        });
    }
}

struct HeadingEntry {
    level: u8,
    text: String,
}

fn update_heading_path(headings: &mut Vec<HeadingEntry>, level: u8, text: String) -> Vec<String> {
    while headings.last().is_some_and(|entry| entry.level >= level) {
        headings.pop();
    }
    headings.push(HeadingEntry { level, text });
    headings.iter().map(|entry| entry.text.clone()).collect()
}

fn normalize_whitespace(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut last_was_space = false;
    for ch in input.chars() {
        if ch.is_whitespace() {
            if !last_was_space {
                out.push(' ');
                last_was_space = true;
            }
        } else {
            out.push(ch);
            last_was_space = false;
        }
    }
    out.trim().to_string()
}

fn normalize_code(input: &str) -> String {
    input.trim_end().trim_start_matches('\n').to_string()
}

fn normalize_table(input: &str) -> String {
    input
        .lines()
        .map(|line| normalize_whitespace(line.trim_end_matches(" | ")))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
