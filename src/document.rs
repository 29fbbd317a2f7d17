use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};

/// Number of hex characters kept from the blake3 digest.
const SOURCE_ID_LEN: usize = 16;

/// A stable identifier for an ingested source, derived from its descriptor.
///
/// The same locator always yields the same id, across processes and
/// platforms, so re-ingesting a source maps onto the chunks already stored.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SourceId(String);

impl SourceId {
    /// Derive the id of a source from its locator (URL, path, ...).
    ///
    /// # Examples
    ///
    /// ```
    /// use ragdigest::document::SourceId;
    ///
    /// let a = SourceId::from_locator("https://example.com/a");
    /// let b = SourceId::from_locator("https://example.com/a");
    /// assert_eq!(a, b);
    /// assert_eq!(a.as_str().len(), 16);
    /// ```
    pub fn from_locator(locator: &str) -> Self {
        Self::digest(locator.trim().as_bytes())
    }

    /// Derive an id from raw content, for sources without a locator.
    pub fn from_content(text: &str) -> Self {
        Self::digest(text.as_bytes())
    }

    fn digest(bytes: &[u8]) -> Self {
        let hash = blake3::hash(bytes).to_hex();
        Self(hash[..SOURCE_ID_LEN].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for SourceId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of content a source carries. Selects prompts and the default
/// collection.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    News,
    Video,
    Pdf,
    #[default]
    Generic,
}

impl SourceType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::News => "news",
            Self::Video => "video",
            Self::Pdf => "pdf",
            Self::Generic => "generic",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "news" | "article" => Ok(Self::News),
            "video" | "youtube" | "transcript" => Ok(Self::Video),
            "pdf" => Ok(Self::Pdf),
            "generic" | "text" => Ok(Self::Generic),
            other => Err(format!("unknown source type: {other}")),
        }
    }
}

/// Structured metadata attached to a document and inherited by its chunks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<String>,
    /// Publication time as reported by the loader, kept verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published: Option<String>,
    #[serde(default)]
    pub source_type: SourceType,
    /// Where the content came from (URL or path).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

/// One ingested source. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub source_id: SourceId,
    pub text: String,
    pub metadata: Metadata,
}

impl Document {
    pub fn new(source_id: SourceId, text: String, metadata: Metadata) -> Self {
        Self {
            source_id,
            text,
            metadata,
        }
    }

    /// Build a document whose id is derived from `metadata.source`, or from
    /// the text when no locator is known.
    pub fn from_content(text: String, metadata: Metadata) -> Self {
        let source_id = match metadata.source.as_deref() {
            Some(locator) => SourceId::from_locator(locator),
            None => SourceId::from_content(&text),
        };
        Self::new(source_id, text, metadata)
    }
}
