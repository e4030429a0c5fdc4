//! Document selectors scope which files a language session receives.
//!
//! Each session gets a selector built from its own folder, so documents in
//! one folder never reach another folder's server.

use std::path::Path;

use globset::{GlobBuilder, GlobMatcher};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::folder::WorkspaceFolder;

pub const FILE_SCHEME: &str = "file";

#[derive(Debug, Error)]
pub enum SelectorError {
    #[error("invalid document extension '{0}'")]
    InvalidExtension(String),
    #[error("document language must not be empty")]
    EmptyLanguage,
    #[error("invalid document pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: globset::Error,
    },
}

/// A language id paired with the file extension that carries it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentKind {
    pub language: String,
    pub extension: String,
}

impl DocumentKind {
    #[must_use]
    pub fn new(language: impl Into<String>, extension: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            extension: extension.into(),
        }
    }

    /// Plain-text and Markdown manuscripts.
    #[must_use]
    pub fn defaults() -> Vec<Self> {
        vec![Self::new("plaintext", "txt"), Self::new("markdown", "md")]
    }
}

/// One `(scheme, language, pattern)` matching rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentFilter {
    pub scheme: String,
    pub language: String,
    pub pattern: String,
}

#[derive(Debug, Clone)]
struct CompiledFilter {
    filter: DocumentFilter,
    matcher: GlobMatcher,
}

#[derive(Debug, Clone)]
pub struct DocumentSelector {
    filters: Vec<CompiledFilter>,
}

impl DocumentSelector {
    /// Build a selector that matches `kinds` only beneath `folder`.
    pub fn for_folder(
        folder: &WorkspaceFolder,
        kinds: &[DocumentKind],
    ) -> Result<Self, SelectorError> {
        let root = glob_root(folder.path());
        let mut filters = Vec::with_capacity(kinds.len());
        for kind in kinds {
            if kind.language.trim().is_empty() {
                return Err(SelectorError::EmptyLanguage);
            }
            let ext = kind.extension.trim_start_matches('.');
            if ext.is_empty() || ext.contains(['/', '\\']) {
                return Err(SelectorError::InvalidExtension(kind.extension.clone()));
            }
            let pattern = format!("{root}/**/*.{}", globset::escape(ext));
            let matcher = GlobBuilder::new(&pattern)
                .literal_separator(true)
                .build()
                .map_err(|source| SelectorError::Pattern {
                    pattern: pattern.clone(),
                    source,
                })?
                .compile_matcher();
            filters.push(CompiledFilter {
                filter: DocumentFilter {
                    scheme: FILE_SCHEME.to_string(),
                    language: kind.language.clone(),
                    pattern,
                },
                matcher,
            });
        }
        Ok(Self { filters })
    }

    pub fn filters(&self) -> impl Iterator<Item = &DocumentFilter> {
        self.filters.iter().map(|f| &f.filter)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    #[must_use]
    pub fn matches(&self, scheme: &str, language: &str, path: &Path) -> bool {
        self.filters.iter().any(|f| {
            f.filter.scheme == scheme && f.filter.language == language && f.matcher.is_match(path)
        })
    }

    /// Like [`matches`](Self::matches) for a document URI. Non-file URIs never match.
    #[must_use]
    pub fn matches_uri(&self, uri: &Url, language: &str) -> bool {
        match uri.to_file_path() {
            Ok(path) => self.matches(uri.scheme(), language, &path),
            Err(()) => false,
        }
    }
}

fn glob_root(path: &Path) -> String {
    let raw = path.to_string_lossy();
    #[cfg(windows)]
    let raw = raw.replace('\\', "/");
    globset::escape(raw.trim_end_matches('/'))
}
