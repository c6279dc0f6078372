//! Error taxonomy shared by every SCM adapter.

use thiserror::Error;

/// Failures surfaced by adapter operations.
///
/// `Unavailable` means the backend could not be reached at all (missing client
/// binary, missing repository, bad connection settings) while `Backend` means
/// the backend was reachable but a specific call failed. The sync engine
/// treats both as "skip this repository for this cycle"; browse callers
/// usually surface them directly.
#[derive(Debug, Error)]
pub enum ScmError {
    #[error("{backend} backend unavailable: {reason}")]
    Unavailable { backend: String, reason: String },

    #[error("{backend} backend error: {reason}")]
    Backend { backend: String, reason: String },

    #[error("path {path} not found{}", revision_suffix(.revision))]
    NotFound {
        path: String,
        revision: Option<String>,
    },

    #[error("{backend} backend does not support {operation}")]
    Unsupported {
        backend: String,
        operation: &'static str,
    },
}

impl ScmError {
    pub fn unavailable(backend: &str, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            backend: backend.to_string(),
            reason: reason.into(),
        }
    }

    pub fn backend(backend: &str, reason: impl Into<String>) -> Self {
        Self::Backend {
            backend: backend.to_string(),
            reason: reason.into(),
        }
    }

    /// True when the failure means the whole backend is unreachable rather
    /// than one call having failed.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

fn revision_suffix(revision: &Option<String>) -> String {
    match revision {
        Some(rev) => format!(" at revision {rev}"),
        None => String::new(),
    }
}

pub type ScmResult<T> = Result<T, ScmError>;
