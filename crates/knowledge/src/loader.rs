//! Document loading from the filesystem.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{KnowledgeError, Result};

/// A document read from its source, not yet indexed.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedDocument {
    /// Source path, used as the document's identity
    pub file_path: String,

    /// Display title
    pub title: String,

    /// Full text
    pub content: String,
}

/// Source of documents to index.
#[async_trait]
pub trait DocumentLoader: Send + Sync {
    /// Load one document.
    async fn load(&self, path: &Path) -> Result<LoadedDocument>;

    /// Paths under `dir` this loader would load, in a stable order.
    async fn discover(&self, dir: &Path) -> Result<Vec<PathBuf>>;

    /// Load every discoverable document under `dir`.
    ///
    /// Files that fail to load are skipped with a warning.
    async fn load_directory(&self, dir: &Path) -> Result<Vec<LoadedDocument>> {
        let mut documents = Vec::new();
        for path in self.discover(dir).await? {
            match self.load(&path).await {
                Ok(doc) => documents.push(doc),
                Err(e) => warn!("Skipping {}: {}", path.display(), e),
            }
        }
        Ok(documents)
    }
}

/// Loads plain-text and Markdown files from disk.
#[derive(Debug, Clone)]
pub struct FsDocumentLoader {
    extensions: Vec<String>,
}

impl FsDocumentLoader {
    /// Create a loader accepting the given file extensions (without dot).
    pub fn new(extensions: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            extensions: extensions
                .into_iter()
                .map(|e| e.into().trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        }
    }

    fn accepts(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| self.extensions.iter().any(|x| x.eq_ignore_ascii_case(e)))
            .unwrap_or(false)
    }
}

impl Default for FsDocumentLoader {
    fn default() -> Self {
        Self::new(["md", "txt"])
    }
}

#[async_trait]
impl DocumentLoader for FsDocumentLoader {
    async fn load(&self, path: &Path) -> Result<LoadedDocument> {
        // The canonical path is the document's identity in the store.
        let path = &canonical(path).await?;
        let content = tokio::fs::read_to_string(path).await.map_err(|e| load_error(path, e))?;

        let title = extract_title(&content).unwrap_or_else(|| {
            path.file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string())
        });

        debug!("Loaded {} ({} chars)", path.display(), content.chars().count());
        Ok(LoadedDocument {
            file_path: path.display().to_string(),
            title,
            content,
        })
    }

    async fn discover(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let root = canonical(dir).await?;
        let mut paths = Vec::new();
        for entry in WalkDir::new(&root).follow_links(true) {
            let entry = entry.map_err(|e| load_error(&root, e))?;
            if entry.file_type().is_file() && self.accepts(entry.path()) {
                paths.push(entry.into_path());
            }
        }
        paths.sort();
        Ok(paths)
    }
}

async fn canonical(path: &Path) -> Result<PathBuf> {
    tokio::fs::canonicalize(path).await.map_err(|e| load_error(path, e))
}

fn load_error(path: &Path, err: impl ToString) -> KnowledgeError {
    KnowledgeError::Load {
        path: path.display().to_string(),
        message: err.to_string(),
    }
}

/// First level-one Markdown heading, if any.
fn extract_title(content: &str) -> Option<String> {
    content
        .lines()
        .map(str::trim)
        .find_map(|line| line.strip_prefix("# "))
        .map(|title| title.trim().to_string())
        .filter(|title| !title.is_empty())
}
