//! Enriched chunk records handed over by the upstream parsing/chunking stages.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Separator used when joining hierarchy titles into a path key.
pub const PATH_SEPARATOR: &str = " > ";

/// One semantic unit of a document, as produced by chunking and enrichment.
///
/// `chunk_id` and `metadata` are optional on the wire; the node mapper
/// discards chunks that lack either.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    #[serde(
        rename = "id",
        alias = "chunk_id",
        default,
        deserialize_with = "opaque_id"
    )]
    pub chunk_id: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub level: Option<i32>,
    #[serde(default)]
    pub metadata: Option<ChunkMetadata>,
}

impl Chunk {
    /// Identifier of the chunk, when present and non-blank.
    pub fn id(&self) -> Option<&str> {
        self.chunk_id.as_deref().filter(|id| !id.trim().is_empty())
    }

    /// Outgoing "related section" mentions, empty when metadata is absent.
    pub fn related_sections(&self) -> &[RelatedSection] {
        self.metadata
            .as_ref()
            .map(|meta| meta.related_sections.as_slice())
            .unwrap_or_default()
    }

    /// Declared parent chunk id.
    pub fn parent_id(&self) -> Option<&str> {
        self.metadata
            .as_ref()
            .and_then(|meta| meta.parent_id.as_deref())
            .filter(|id| !id.trim().is_empty())
    }
}

/// Enrichment metadata with the well-known keys promoted to typed fields.
///
/// Keys not listed here survive in `extra` and are carried into the stored
/// node's metadata payload untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    #[serde(default, deserialize_with = "null_as_default")]
    pub hierarchy_path: Vec<String>,
    #[serde(default)]
    pub section_type: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub document_position: Option<f64>,
    #[serde(default, deserialize_with = "opaque_id")]
    pub parent_id: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub child_ids: Vec<Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub sibling_ids: Vec<Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub related_sections: Vec<RelatedSection>,
    #[serde(default)]
    pub link_count: Option<u64>,
    #[serde(default)]
    pub contains_links: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A mention of another section, either as title segments or pre-joined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RelatedSection {
    /// Ordered titles from the document root to the referenced section.
    Path(Vec<Value>),
    /// Path already joined with [`PATH_SEPARATOR`].
    Joined(String),
    /// Anything else upstream emitted; never resolvable.
    Other(Value),
}

impl RelatedSection {
    /// Builds a path mention from title segments.
    pub fn path<I, S>(titles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Path(
            titles
                .into_iter()
                .map(|title| Value::String(title.into()))
                .collect(),
        )
    }

    /// Normalizes the mention to a path key, or `None` for unsupported shapes.
    pub fn path_key(&self) -> Option<String> {
        match self {
            Self::Path(titles) => Some(
                titles
                    .iter()
                    .map(segment_text)
                    .collect::<Vec<_>>()
                    .join(PATH_SEPARATOR),
            ),
            Self::Joined(joined) => Some(joined.clone()),
            Self::Other(_) => None,
        }
    }

    /// Short description of the JSON shape, for diagnostics.
    pub fn shape(&self) -> &'static str {
        match self {
            Self::Path(_) => "array",
            Self::Joined(_) => "string",
            Self::Other(Value::Null) => "null",
            Self::Other(Value::Bool(_)) => "bool",
            Self::Other(Value::Number(_)) => "number",
            Self::Other(Value::Object(_)) => "object",
            Self::Other(_) => "other",
        }
    }
}

/// Joins hierarchy titles into the canonical path key.
pub fn path_key<S: AsRef<str>>(titles: &[S]) -> String {
    titles
        .iter()
        .map(|title| title.as_ref())
        .collect::<Vec<_>>()
        .join(PATH_SEPARATOR)
}

fn segment_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Reads an explicit `null` the same as a missing key.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Accepts string or integer identifiers and normalizes them to strings.
fn opaque_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(text)) => Some(text),
        Some(Value::Number(number)) => Some(number.to_string()),
        _ => None,
    })
}
