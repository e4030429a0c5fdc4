//! Core domain types for the NovelSaga client.
//!
//! This crate contains pure domain types with no IO, no async, and minimal dependencies.
//! Workspace folders, their registry identity, and the document selectors that
//! scope a language session to one folder all live here.

// Pedantic lint configuration - these are intentional design choices
#![allow(clippy::missing_errors_doc)] // Result-returning functions are self-explanatory

mod folder;
mod selector;

pub use folder::{FolderError, FolderKey, WorkspaceFolder, normalize_path};
pub use selector::{DocumentFilter, DocumentKind, DocumentSelector, FILE_SCHEME, SelectorError};

/// Environment variable patterns stripped from language-server processes.
///
/// Matched case-insensitively; `*` is allowed at either end of a pattern.
pub const ENV_SECRET_DENYLIST: &[&str] = &[
    "*_KEY",
    "*_TOKEN",
    "*_SECRET",
    "*_PASSWORD",
    "*_CREDENTIAL*",
    "AWS_*",
];
