//! The request/result contract between the host, the gate, and the pipeline.

use std::path::{Path, PathBuf};

use crate::{error::ThumbnailError, thumbnail::DeferredReply};

/// A size in logical (display-independent) points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogicalSize {
    /// Width in points.
    pub width: f64,
    /// Height in points.
    pub height: f64,
}

impl LogicalSize {
    /// Create a logical size.
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

/// One thumbnail request from the host.
///
/// # Example
///
/// ```
/// use stillframe::{ExtractionRequest, LogicalSize};
///
/// let request = ExtractionRequest::new("clip.mov", LogicalSize::new(256.0, 256.0), 2.0);
/// assert_eq!(request.display_scale_factor(), 2.0);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionRequest {
    file_path: PathBuf,
    maximum_logical_size: LogicalSize,
    display_scale_factor: f64,
}

impl ExtractionRequest {
    /// Create a request for `file_path` at `maximum_logical_size` points on a
    /// display with `display_scale_factor` pixels per point.
    pub fn new<P: Into<PathBuf>>(
        file_path: P,
        maximum_logical_size: LogicalSize,
        display_scale_factor: f64,
    ) -> Self {
        Self {
            file_path: file_path.into(),
            maximum_logical_size,
            display_scale_factor,
        }
    }

    /// Path of the media file.
    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    /// Largest thumbnail size the host will display, in points.
    pub fn maximum_logical_size(&self) -> LogicalSize {
        self.maximum_logical_size
    }

    /// Pixels per point on the target display.
    pub fn display_scale_factor(&self) -> f64 {
        self.display_scale_factor
    }
}

/// The single outcome delivered for each request.
pub type ExtractionResult = Result<DeferredReply, ThumbnailError>;
