//! Error types for project snapshots and loop creation.

use thiserror::Error;

/// Errors raised while loading or validating a project snapshot.
///
/// Loading is all-or-nothing: any of these means no part of the snapshot
/// was applied.
#[derive(Debug, Error)]
pub enum ProjectError {
    /// The input is not JSON at all.
    #[error("project file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The JSON is well-formed but violates the snapshot contract.
    #[error("invalid project file: {0}")]
    Invalid(String),
}

impl ProjectError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        ProjectError::Invalid(msg.into())
    }
}

/// Why a manual loop could not be created.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LoopError {
    #[error("a loop needs at least two instrument tags")]
    TooFewTags,

    #[error("loop {0} already exists")]
    DuplicateId(String),
}
