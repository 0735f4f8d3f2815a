//! Error taxonomy for a catalog run.
//!
//! Only [`CatalogError::FatalRoot`] stops a run. Every other variant is
//! scoped to a single path or key, gets recorded in the
//! [`RunReport`](crate::report::RunReport), and processing moves on.

use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    /// The scan root is missing, not a directory, or cannot be listed.
    #[error("scan root {path} is not accessible: {reason}")]
    FatalRoot { path: PathBuf, reason: String },

    /// A directory or file below the root could not be read.
    #[error("cannot read {path}: {message}")]
    Path { path: PathBuf, message: String },

    /// The tag library failed to parse a specific file.
    #[error("tag extraction failed for {path}: {message}")]
    Extraction { path: PathBuf, message: String },

    /// A catalog write for one key failed after all retries.
    #[error("write failed for clip '{key}': {message}")]
    Write { key: String, message: String },
}

/// Discriminant recorded alongside each non-fatal error in the run summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    FatalRoot,
    Path,
    Extraction,
    Write,
}

impl CatalogError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CatalogError::FatalRoot { .. } => ErrorKind::FatalRoot,
            CatalogError::Path { .. } => ErrorKind::Path,
            CatalogError::Extraction { .. } => ErrorKind::Extraction,
            CatalogError::Write { .. } => ErrorKind::Write,
        }
    }

    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            CatalogError::FatalRoot { path, .. }
            | CatalogError::Path { path, .. }
            | CatalogError::Extraction { path, .. } => Some(path),
            CatalogError::Write { .. } => None,
        }
    }

    pub(crate) fn path_error(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        CatalogError::Path {
            path: path.into(),
            message: err.to_string(),
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::FatalRoot => "fatal_root",
            ErrorKind::Path => "path",
            ErrorKind::Extraction => "extraction",
            ErrorKind::Write => "write",
        };
        f.write_str(s)
    }
}
