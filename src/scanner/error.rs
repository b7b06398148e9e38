//! Scanner error types
//!
//! Every phase boundary of a scan cycle is an isolation boundary: errors are
//! returned as values, logged, and recorded in the cycle report. None of them
//! propagate to the caller that reported the edit.

use thiserror::Error;

/// Errors produced while scanning a document.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScanError {
    /// A capture transform rejected its input. The match is skipped.
    #[error("malformed pattern match for `{pattern_id}`: {message}")]
    MalformedPattern { pattern_id: String, message: String },

    /// A phase produced more results than its cap allows.
    #[error("{phase} produced {found} results, cap is {cap}")]
    OverCapacity {
        phase: &'static str,
        cap: usize,
        found: usize,
    },

    /// Entity or pattern catalogue could not be fetched.
    #[error("catalogue unavailable: {0}")]
    CatalogueUnavailable(String),

    /// A single persistence write failed.
    #[error("persistence failed for {item}: {message}")]
    PersistenceFailure { item: String, message: String },

    /// Offloaded relationship extraction missed its deadline.
    #[error("relation worker request {request_id} timed out after {timeout_ms}ms")]
    WorkerTimeout { request_id: u64, timeout_ms: u64 },

    /// Relation worker has shut down or dropped the reply.
    #[error("relation worker unavailable: {0}")]
    WorkerUnavailable(String),

    /// The document text could not be read.
    #[error("document {document_id} unavailable: {message}")]
    DocumentUnavailable { document_id: String, message: String },

    /// An Aho-Corasick / double-array automaton failed to build.
    #[error("automaton build failed: {0}")]
    AutomatonBuild(String),

    /// A pattern regex failed to compile.
    #[error("invalid regex for pattern `{pattern_id}`: {message}")]
    InvalidRegex { pattern_id: String, message: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("unknown calendar: {0}")]
    UnknownCalendar(String),
}

impl ScanError {
    /// Short machine-readable name, used as a log field and in cycle reports.
    pub fn kind(&self) -> &'static str {
        match self {
            ScanError::MalformedPattern { .. } => "malformed_pattern",
            ScanError::OverCapacity { .. } => "over_capacity",
            ScanError::CatalogueUnavailable(_) => "catalogue_unavailable",
            ScanError::PersistenceFailure { .. } => "persistence_failure",
            ScanError::WorkerTimeout { .. } => "worker_timeout",
            ScanError::WorkerUnavailable(_) => "worker_unavailable",
            ScanError::DocumentUnavailable { .. } => "document_unavailable",
            ScanError::AutomatonBuild(_) => "automaton_build",
            ScanError::InvalidRegex { .. } => "invalid_regex",
            ScanError::InvalidConfig(_) => "invalid_config",
            ScanError::UnknownCalendar(_) => "unknown_calendar",
        }
    }
}

/// Errors reported by external collaborators (catalogues, stores, providers).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("registry unavailable: {0}")]
    Unavailable(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("rejected: {0}")]
    Rejected(String),
}

impl RegistryError {
    pub(crate) fn into_catalogue_error(self) -> ScanError {
        ScanError::CatalogueUnavailable(self.to_string())
    }

    pub(crate) fn into_persistence_error(self, item: impl Into<String>) -> ScanError {
        ScanError::PersistenceFailure {
            item: item.into(),
            message: self.to_string(),
        }
    }
}
