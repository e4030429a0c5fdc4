//! Workspace events delivered to the host, one JSON object per line on the wire.

use std::path::PathBuf;

use saga_types::WorkspaceFolder;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WorkspaceEvent {
    Folders(FoldersChanged),
    Document(DocumentChange),
    Shutdown,
}

/// Folders added to and removed from the workspace. Either side may be empty.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FoldersChanged {
    #[serde(default)]
    pub added: Vec<WorkspaceFolder>,
    #[serde(default)]
    pub removed: Vec<WorkspaceFolder>,
}

impl FoldersChanged {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Full text of a document that was opened or edited.
#[derive(Debug, Clone, Deserialize)]
pub struct DocumentChange {
    pub path: PathBuf,
    pub language: String,
    #[serde(default)]
    pub text: String,
}

impl WorkspaceEvent {
    pub fn from_json_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line.trim())
    }
}
