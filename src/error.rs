//! Error types for the `stillframe` crate.
//!
//! This module defines [`ThumbnailError`], the unified error type returned by
//! every fallible operation in the crate, and [`ErrorKind`], the flat
//! taxonomy a host uses to decide between "no thumbnail, try later" and
//! "no thumbnail for this file".

use std::{fmt, path::PathBuf, time::Duration};

use thiserror::Error;

/// Why the admission gate refused a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionReason {
    /// The wait queue already holds `max_queue_depth` requests.
    QueueFull,
    /// The request waited the full queue timeout without being granted a slot.
    QueueTimeout(Duration),
    /// The gate was closed and accepts no further requests.
    GateClosed,
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectionReason::QueueFull => write!(f, "admission queue is full"),
            RejectionReason::QueueTimeout(waited) => {
                write!(f, "no slot became free within {waited:?}")
            }
            RejectionReason::GateClosed => write!(f, "admission gate is closed"),
        }
    }
}

/// The unified error type for all `stillframe` operations.
///
/// Every variant maps onto exactly one [`ErrorKind`] via
/// [`kind`](ThumbnailError::kind). Variants carry the file path or the
/// upstream library message so the error can be reported without extra
/// logging at the call site.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ThumbnailError {
    /// The admission gate refused or timed out the request. No native
    /// resource was opened.
    #[error("Memory budget exceeded: {0}")]
    BudgetExceeded(RejectionReason),

    /// The container could not be opened or its stream info could not be read.
    #[error("Failed to open media file at {path}: {reason}")]
    OpenFailed {
        /// Path from the extraction request.
        path: PathBuf,
        /// Underlying reason the open failed.
        reason: String,
    },

    /// The container has no usable video stream.
    #[error("No video stream found in {0}")]
    NoVideoStream(PathBuf),

    /// The decoder could not be initialised for the selected stream.
    #[error("Failed to open decoder for stream {stream_index}: {reason}")]
    CodecOpenFailed {
        /// Index of the selected video stream.
        stream_index: usize,
        /// Underlying reason the decoder failed to open.
        reason: String,
    },

    /// The container rejected the seek.
    #[error("Failed to seek to timestamp {target}: {reason}")]
    SeekFailed {
        /// Target timestamp in the stream time base.
        target: i64,
        /// Underlying reason the seek failed.
        reason: String,
    },

    /// No frame could be decoded, or the decoder reported an unrecoverable error.
    #[error("Failed to decode video frame: {0}")]
    DecodeFailed(String),

    /// Rescaling failed or produced an invalid buffer.
    #[error("Failed to scale frame: {0}")]
    ScaleFailed(String),

    /// The request was cancelled by the host.
    #[error("Operation cancelled")]
    Cancelled,

    /// The host surface failed to draw a deferred reply.
    #[error("Failed to draw thumbnail: {0}")]
    DrawFailed(String),
}

/// The error taxonomy seen by the host collaborator.
///
/// `FatalResourceExhaustion` has no variant: exceeding the process memory
/// ceiling terminates the process, so it can never be returned. The
/// [`AdmissionGate`](crate::AdmissionGate) keeps it out of reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Admission refused or timed out.
    BudgetExceeded,
    /// Container could not be opened or parsed.
    OpenFailed,
    /// Container has no usable video stream.
    NoVideoStream,
    /// Decoder could not be initialised.
    CodecOpenFailed,
    /// Seek rejected by the container.
    SeekFailed,
    /// No frame decoded, or decode error.
    DecodeFailed,
    /// Rescale failed.
    ScaleFailed,
    /// Host cancelled the request.
    Cancelled,
    /// Deferred draw failed.
    DrawFailed,
}

impl ErrorKind {
    /// Returns `true` when the failure says nothing about the file itself and
    /// the host may ask again later.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::BudgetExceeded | ErrorKind::Cancelled)
    }
}

impl ThumbnailError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ThumbnailError::BudgetExceeded(_) => ErrorKind::BudgetExceeded,
            ThumbnailError::OpenFailed { .. } => ErrorKind::OpenFailed,
            ThumbnailError::NoVideoStream(_) => ErrorKind::NoVideoStream,
            ThumbnailError::CodecOpenFailed { .. } => ErrorKind::CodecOpenFailed,
            ThumbnailError::SeekFailed { .. } => ErrorKind::SeekFailed,
            ThumbnailError::DecodeFailed(_) => ErrorKind::DecodeFailed,
            ThumbnailError::ScaleFailed(_) => ErrorKind::ScaleFailed,
            ThumbnailError::Cancelled => ErrorKind::Cancelled,
            ThumbnailError::DrawFailed(_) => ErrorKind::DrawFailed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_budget_and_cancel_are_retryable() {
        assert!(ErrorKind::BudgetExceeded.is_retryable());
        assert!(ErrorKind::Cancelled.is_retryable());
        assert!(!ErrorKind::OpenFailed.is_retryable());
        assert!(!ErrorKind::DecodeFailed.is_retryable());
        assert!(!ErrorKind::ScaleFailed.is_retryable());
    }

    #[test]
    fn budget_message_names_reason() {
        let error = ThumbnailError::BudgetExceeded(RejectionReason::QueueFull);
        assert_eq!(error.kind(), ErrorKind::BudgetExceeded);
        assert!(error.to_string().contains("queue is full"));
    }
}
