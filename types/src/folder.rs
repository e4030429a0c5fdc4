//! Workspace folders and their registry identity.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FolderError {
    #[error("workspace folder path must be absolute: {}", .0.display())]
    RelativePath(PathBuf),
    #[error("workspace folder URI is not a file URI: {0}")]
    NotFileUri(String),
    #[error("invalid workspace folder URI '{uri}': {reason}")]
    InvalidUri { uri: String, reason: String },
    #[error("workspace folder needs either `path` or `uri`")]
    MissingLocation,
}

/// Canonical identity of a workspace folder.
///
/// Derived from the `file://` URI of the lexically normalized folder path,
/// so two descriptors for the same directory always produce the same key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct FolderKey(String);

impl FolderKey {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FolderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A root directory the host treats as one project scope.
///
/// Immutable once constructed; the only ways in are [`WorkspaceFolder::from_path`]
/// and [`WorkspaceFolder::from_uri`], which both normalize the location.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawFolder")]
pub struct WorkspaceFolder {
    uri: Url,
    name: String,
    path: PathBuf,
}

impl WorkspaceFolder {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, FolderError> {
        let path = path.as_ref();
        if !path.is_absolute() {
            return Err(FolderError::RelativePath(path.to_path_buf()));
        }
        let path = normalize_path(path);
        let uri = Url::from_file_path(&path)
            .map_err(|()| FolderError::RelativePath(path.clone()))?;
        let name = default_name(&path);
        Ok(Self { uri, name, path })
    }

    pub fn from_uri(uri: &str) -> Result<Self, FolderError> {
        let parsed = Url::parse(uri).map_err(|e| FolderError::InvalidUri {
            uri: uri.to_string(),
            reason: e.to_string(),
        })?;
        if parsed.scheme() != "file" {
            return Err(FolderError::NotFileUri(uri.to_string()));
        }
        let path = parsed
            .to_file_path()
            .map_err(|()| FolderError::NotFileUri(uri.to_string()))?;
        Self::from_path(path)
    }

    /// Replace the display name. Identity is unaffected.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub fn key(&self) -> FolderKey {
        FolderKey(self.uri.to_string())
    }

    #[must_use]
    pub fn uri(&self) -> &Url {
        &self.uri
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether `path` lies inside this folder (after lexical normalization).
    #[must_use]
    pub fn contains(&self, path: &Path) -> bool {
        normalize_path(path).starts_with(&self.path)
    }
}

impl fmt::Display for WorkspaceFolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.path.display())
    }
}

/// Wire shape accepted from event sources and config files.
#[derive(Debug, Deserialize)]
struct RawFolder {
    #[serde(default)]
    path: Option<PathBuf>,
    #[serde(default)]
    uri: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

impl TryFrom<RawFolder> for WorkspaceFolder {
    type Error = FolderError;

    fn try_from(raw: RawFolder) -> Result<Self, Self::Error> {
        let folder = match (raw.path, raw.uri) {
            (Some(path), _) => Self::from_path(path)?,
            (None, Some(uri)) => Self::from_uri(&uri)?,
            (None, None) => return Err(FolderError::MissingLocation),
        };
        Ok(match raw.name {
            Some(name) if !name.trim().is_empty() => folder.with_name(name),
            _ => folder,
        })
    }
}

fn default_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Resolve `.` and `..` without touching the filesystem.
#[must_use]
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = Vec::new();
    for c in path.components() {
        match c {
            Component::ParentDir => {
                if matches!(out.last(), Some(Component::Normal(_))) {
                    out.pop();
                }
            }
            Component::CurDir => {}
            other => out.push(other),
        }
    }
    out.iter().collect()
}
