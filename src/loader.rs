//! Content loaders: turn a source descriptor into text plus metadata.

use std::path::Path;

use async_trait::async_trait;
use tracing::debug;

use crate::{
    document::{Document, Metadata, SourceId, SourceType},
    error::{Error, Result},
};

/// Identifies one source to ingest: where it lives and what kind it is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDescriptor {
    /// URL, file path, or any other locator the loader understands.
    pub locator: String,
    pub source_type: SourceType,
}

impl SourceDescriptor {
    pub fn new(locator: impl Into<String>, source_type: SourceType) -> Self {
        Self {
            locator: locator.into(),
            source_type,
        }
    }

    /// Stable id of this source, shared by every chunk ingested from it.
    pub fn source_id(&self) -> SourceId {
        SourceId::from_locator(&self.locator)
    }
}

/// What a loader returns for one source.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedContent {
    pub text: String,
    pub metadata: Metadata,
}

impl LoadedContent {
    /// Build the document for `source`, filling in the metadata the loader
    /// left blank.
    pub fn into_document(self, source: &SourceDescriptor) -> Document {
        let mut metadata = self.metadata;
        metadata.source_type = source.source_type;
        if metadata.source.is_none() {
            metadata.source = Some(source.locator.clone());
        }
        Document::new(source.source_id(), self.text, metadata)
    }
}

#[async_trait]
pub trait ContentLoader: Send + Sync {
    /// Fetch and extract the text of `source`.
    ///
    /// Fails with [`Error::Load`] when the source cannot be read or holds no
    /// usable text.
    async fn load(&self, source: &SourceDescriptor) -> Result<LoadedContent>;
}

/// Loads plain-text and markdown files from the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileLoader;

const SUPPORTED_EXTENSIONS: &[&str] = &["txt", "md", "markdown"];

#[async_trait]
impl ContentLoader for FileLoader {
    async fn load(&self, source: &SourceDescriptor) -> Result<LoadedContent> {
        let path = Path::new(&source.locator);
        let fail = |reason: String| Error::Load {
            source_name: source.locator.clone(),
            reason,
        };

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        if !SUPPORTED_EXTENSIONS.contains(&extension.as_str()) {
            return Err(fail(format!(
                "unsupported file type '.{extension}' (expected .txt or .md)"
            )));
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| fail(e.to_string()))?;
        if content.trim().is_empty() {
            return Err(fail("no text content".to_string()));
        }

        debug!(path = %path.display(), bytes = content.len(), "loaded file");
        let metadata = Metadata {
            title: Some(extract_title(&content, path)),
            source: Some(source.locator.clone()),
            source_type: source.source_type,
            ..Metadata::default()
        };
        Ok(LoadedContent {
            text: content,
            metadata,
        })
    }
}

/// Extract a title from file content.
///
/// Looks for the first markdown heading (line starting with `# `).
/// Falls back to the filename without extension.
fn extract_title(content: &str, file_path: &Path) -> String {
    for line in content.lines() {
        let trimmed = line.trim();
        if let Some(heading) = trimmed.strip_prefix("# ") {
            let title = heading.trim();
            if !title.is_empty() {
                return title.to_string();
            }
        }
    }

    file_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("untitled")
        .to_string()
}
