use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, KestrelError};

/// Why one file failed to index. Recorded in the report; never aborts the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileFailure {
    pub file_path: String,
    pub kind: String,
    pub message: String,
}

impl FileFailure {
    pub fn new(file_path: impl Into<String>, err: &KestrelError) -> Self {
        Self {
            file_path: file_path.into(),
            kind: err.kind().as_str().to_string(),
            message: err.to_string(),
        }
    }

    /// Reverse of `ErrorKind::as_str`, for consumers of a stored report.
    #[allow(dead_code)]
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self.kind.as_str() {
            "configuration" => Some(ErrorKind::Configuration),
            "validation" => Some(ErrorKind::Validation),
            "connectivity" => Some(ErrorKind::Connectivity),
            "timeout" => Some(ErrorKind::Timeout),
            "io" => Some(ErrorKind::Io),
            "storage" => Some(ErrorKind::Storage),
            "embedding" => Some(ErrorKind::Embedding),
            "not_found" => Some(ErrorKind::NotFound),
            _ => None,
        }
    }
}

/// Outcome of one indexing run over a codebase root.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexReport {
    pub project_id: String,
    pub files_seen: u64,
    pub files_indexed: u64,
    /// Unchanged files skipped by the checksum gate.
    pub files_skipped: u64,
    pub files_failed: Vec<FileFailure>,
    pub total_chunks: u64,
    /// Stale registry entries reconciled after the run.
    pub files_deleted: u64,
}

impl IndexReport {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_round_trips_kind() {
        let err = KestrelError::Connectivity("store down".into());
        let failure = FileFailure::new("src/a.rs", &err);
        assert_eq!(failure.error_kind(), Some(ErrorKind::Connectivity));
        assert!(failure.message.contains("store down"));
    }
}
