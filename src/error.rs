//! Error taxonomy for the processing pipeline.
//!
//! Errors are grouped by origin (capture, import, processing, network,
//! storage, persistence, auth). Every variant answers `is_retryable()`:
//! retryable errors permit a manual or automatic retry that resumes from
//! the last durably committed stage; non-retryable errors are terminal.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur anywhere in the sermon processing pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    // --- Capture ---
    #[error("Microphone permission denied")]
    PermissionDenied,

    #[error("Audio hardware interrupted: {0}")]
    HardwareInterrupted(String),

    // --- Import ---
    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),

    #[error("Import file too large: {actual} bytes (limit {limit})")]
    FileTooLarge { actual: u64, limit: u64 },

    #[error("Audio file not found: {0}")]
    FileNotFound(PathBuf),

    // --- Processing ---
    #[error("Transcription failed for segment {segment_index}: {reason}")]
    TranscriptionFailed { segment_index: u32, reason: String },

    #[error("Transcription timed out for segment {segment_index}")]
    TranscriptionTimeout { segment_index: u32 },

    #[error("Study guide generation failed: {0}")]
    GenerationFailed(String),

    #[error("Content flagged by moderation: {reason}")]
    ContentFlagged { reason: String },

    // --- Network ---
    #[error("Upload failed for segment {segment_index}: {reason}")]
    UploadFailed { segment_index: u32, reason: String },

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Sync failed: {0}")]
    SyncFailed(String),

    #[error("Remote service unreachable: {0}")]
    Unreachable(String),

    // --- Storage ---
    #[error("Disk full while writing {0}")]
    DiskFull(PathBuf),

    #[error("Corrupted audio file: {path} (expected hash {expected}, got {actual})")]
    CorruptedFile {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("Audio cache error: {0}")]
    CacheError(String),

    // --- Persistence ---
    #[error("Record not found: {kind} {id}")]
    RecordNotFound { kind: &'static str, id: String },

    #[error("Database write failed: {0}")]
    WriteFailed(String),

    #[error(transparent)]
    Database(#[from] rusqlite::Error),

    // --- Auth ---
    #[error("Not signed in")]
    NotSignedIn,

    #[error("Authorization denied: {0}")]
    AuthorizationDenied(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Whether the operation that produced this error may be retried.
    ///
    /// Content flagged by moderation is always terminal. Format and
    /// permission errors cannot succeed on retry either. Network and
    /// timeout errors can.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::TranscriptionTimeout { .. }
            | Self::UploadFailed { .. }
            | Self::DownloadFailed(_)
            | Self::SyncFailed(_)
            | Self::Unreachable(_)
            | Self::GenerationFailed(_)
            | Self::CacheError(_)
            | Self::WriteFailed(_) => true,

            // A hash mismatch means the bytes on disk or in flight are bad;
            // re-uploading the same bytes can succeed after re-read.
            Self::CorruptedFile { .. } => true,

            Self::TranscriptionFailed { .. } => false,
            Self::ContentFlagged { .. } => false,
            Self::PermissionDenied
            | Self::HardwareInterrupted(_)
            | Self::UnsupportedFormat(_)
            | Self::FileTooLarge { .. }
            | Self::FileNotFound(_)
            | Self::DiskFull(_)
            | Self::RecordNotFound { .. }
            | Self::NotSignedIn
            | Self::AuthorizationDenied(_) => false,

            Self::Database(_) | Self::Io(_) => false,
        }
    }

    /// True for failures that must never be retried automatically or
    /// manually (distinct from ordinary technical failure).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::ContentFlagged { .. })
    }
}

/// Convenience alias used throughout the crate.
pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_errors_are_retryable() {
        assert!(PipelineError::Unreachable("dns".into()).is_retryable());
        assert!(PipelineError::SyncFailed("503".into()).is_retryable());
        assert!(PipelineError::TranscriptionTimeout { segment_index: 2 }.is_retryable());
    }

    #[test]
    fn test_flagged_content_is_terminal() {
        let err = PipelineError::ContentFlagged {
            reason: "policy".into(),
        };
        assert!(!err.is_retryable());
        assert!(err.is_terminal());
    }

    #[test]
    fn test_format_errors_not_retryable() {
        assert!(!PipelineError::UnsupportedFormat("ogg".into()).is_retryable());
        assert!(!PipelineError::PermissionDenied.is_retryable());
        assert!(!PipelineError::TranscriptionFailed {
            segment_index: 0,
            reason: "bad container".into()
        }
        .is_retryable());
    }
}
