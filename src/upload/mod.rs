//! Upload module
//!
//! Resumable uploads to B2-compatible object storage: size estimation, part
//! sizing, chunking, checksums and the upload state machine itself.

use std::sync::Arc;
use thiserror::Error;

pub mod checksum;
pub mod chunker;
pub mod client;
pub mod engine;
pub mod part_size;
pub mod source;

pub use chunker::RawDataPart;
pub use client::{StorageClient, StorageError};
pub use engine::{Upload, UploadMetadata, UploadOptions, UploadParams};
pub use part_size::PartLimits;
pub use source::UploadSource;

/// Upload errors
///
/// Storage failures are wrapped once, at the phase where they were detected,
/// so callers can tell which step of the upload went wrong.
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Multipart file id is missing")]
    MissingFileId,

    #[error("Unknown upload error: {0}")]
    Unknown(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("Upload canceled")]
    Canceled,

    #[error("Whole-body upload failed")]
    PutFailed(#[source] StorageError),

    #[error("Upload of part {part_number} failed")]
    UploadPartFailed {
        part_number: u32,
        #[source]
        source: StorageError,
    },

    #[error("Failed to start multipart upload")]
    MultipartInitFailed(#[source] StorageError),

    #[error("Failed to finish multipart upload")]
    MultipartFinalizeFailed(#[source] StorageError),

    #[error(
        "Response for part {part_number} has no content SHA-1 (is the header exposed via CORS?)"
    )]
    ChecksumMissing { part_number: u32 },

    #[error("Failed to create checksum: {0}")]
    ChecksumCreation(String),

    #[error("Source produced more than {max} parts")]
    TooManyParts { max: u32 },
}

/// Fieldless view of [`UploadError`], handy for matching and metric labels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UploadErrorKind {
    MissingFileId,
    Unknown,
    Canceled,
    PutFailed,
    UploadPartFailed,
    MultipartInitFailed,
    MultipartFinalizeFailed,
    ChecksumMissing,
    ChecksumCreation,
    TooManyParts,
}

impl UploadErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadErrorKind::MissingFileId => "missing_file_id",
            UploadErrorKind::Unknown => "unknown",
            UploadErrorKind::Canceled => "canceled",
            UploadErrorKind::PutFailed => "put_failed",
            UploadErrorKind::UploadPartFailed => "upload_part_failed",
            UploadErrorKind::MultipartInitFailed => "multipart_init_failed",
            UploadErrorKind::MultipartFinalizeFailed => "multipart_finalize_failed",
            UploadErrorKind::ChecksumMissing => "checksum_missing",
            UploadErrorKind::ChecksumCreation => "checksum_creation",
            UploadErrorKind::TooManyParts => "too_many_parts",
        }
    }
}

impl UploadError {
    pub(crate) fn unknown<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        UploadError::Unknown(Box::new(err))
    }

    pub fn kind(&self) -> UploadErrorKind {
        match self {
            UploadError::MissingFileId => UploadErrorKind::MissingFileId,
            UploadError::Unknown(_) => UploadErrorKind::Unknown,
            UploadError::Canceled => UploadErrorKind::Canceled,
            UploadError::PutFailed(_) => UploadErrorKind::PutFailed,
            UploadError::UploadPartFailed { .. } => UploadErrorKind::UploadPartFailed,
            UploadError::MultipartInitFailed(_) => UploadErrorKind::MultipartInitFailed,
            UploadError::MultipartFinalizeFailed(_) => UploadErrorKind::MultipartFinalizeFailed,
            UploadError::ChecksumMissing { .. } => UploadErrorKind::ChecksumMissing,
            UploadError::ChecksumCreation(_) => UploadErrorKind::ChecksumCreation,
            UploadError::TooManyParts { .. } => UploadErrorKind::TooManyParts,
        }
    }

    /// Whether a fresh upload of the same source could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            UploadError::PutFailed(source)
            | UploadError::UploadPartFailed { source, .. }
            | UploadError::MultipartInitFailed(source)
            | UploadError::MultipartFinalizeFailed(source) => source.is_retryable(),
            UploadError::Unknown(_) => true,
            _ => false,
        }
    }
}

/// Upload lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UploadState {
    None,
    Running,
    Paused,
    Success,
    Error,
    Canceled,
}

impl UploadState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UploadState::Success | UploadState::Error | UploadState::Canceled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UploadState::None => "none",
            UploadState::Running => "running",
            UploadState::Paused => "paused",
            UploadState::Success => "success",
            UploadState::Error => "error",
            UploadState::Canceled => "canceled",
        }
    }
}

impl std::fmt::Display for UploadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of an upload, carried by state and progress events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadSnapshot {
    pub state: UploadState,
    pub total_bytes: Option<u64>,
    pub uploaded_bytes: u64,
}

/// Events emitted by an [`Upload`]
#[derive(Debug, Clone)]
pub enum UploadEvent {
    StateChanged(UploadSnapshot),
    Progress(UploadSnapshot),
    Failed(Arc<UploadError>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!UploadState::None.is_terminal());
        assert!(!UploadState::Running.is_terminal());
        assert!(!UploadState::Paused.is_terminal());
        assert!(UploadState::Success.is_terminal());
        assert!(UploadState::Error.is_terminal());
        assert!(UploadState::Canceled.is_terminal());
    }

    #[test]
    fn test_error_kind_and_retryable() {
        let err = UploadError::UploadPartFailed {
            part_number: 3,
            source: StorageError::Request("connection reset".into()),
        };
        assert_eq!(err.kind(), UploadErrorKind::UploadPartFailed);
        assert!(err.is_retryable());
        assert_eq!(err.to_string(), "Upload of part 3 failed");

        let err = UploadError::ChecksumMissing { part_number: 1 };
        assert_eq!(err.kind().as_str(), "checksum_missing");
        assert!(!err.is_retryable());

        let err = UploadError::MultipartInitFailed(StorageError::Api {
            status: 400,
            code: "bad_request".into(),
            message: "no such bucket".into(),
        });
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_storage_error_kept_as_source() {
        use std::error::Error;

        let err = UploadError::PutFailed(StorageError::Aborted);
        let source = err.source().expect("source");
        assert_eq!(source.to_string(), StorageError::Aborted.to_string());
    }
}
