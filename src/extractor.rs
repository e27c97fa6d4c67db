//! The extraction service.
//!
//! [`ThumbnailExtractor`] is what a host holds on to. Each call to
//! [`extract`](ThumbnailExtractor::extract) estimates the request's cost,
//! waits for admission, then runs the synchronous pipeline on a blocking
//! thread via `tokio::task::spawn_blocking`. The admission slot moves into
//! that blocking task, so it is released only when the pipeline has
//! actually finished and released its native resources, whether it
//! succeeded, failed, was cancelled, or panicked.
//!
//! # Example
//!
//! ```no_run
//! use stillframe::{ExtractOptions, ExtractionRequest, LogicalSize, ThumbnailExtractor};
//!
//! # async fn example() {
//! let extractor = ThumbnailExtractor::new(ExtractOptions::new());
//! let request = ExtractionRequest::new("input.mp4", LogicalSize::new(128.0, 128.0), 2.0);
//! match extractor.extract(request).await {
//!     Ok(reply) => println!("thumbnail ready: {:?}", reply.pixel_size()),
//!     Err(error) if error.kind().is_retryable() => println!("skipped for now: {error}"),
//!     Err(error) => println!("no thumbnail: {error}"),
//! }
//! # }
//! ```

use std::{
    fmt::{Debug, Formatter, Result as FmtResult},
    sync::Arc,
};

use crate::{
    backend::MediaBackend,
    configuration::ExtractOptions,
    error::ThumbnailError,
    ffmpeg::FfmpegBackend,
    gate::AdmissionGate,
    pipeline,
    progress::{CancelOnDrop, CancellationToken},
    request::{ExtractionRequest, ExtractionResult},
    resource::ResourceLedger,
};

/// Bounded-memory thumbnail extraction service.
///
/// Cheap to share behind an `Arc`; all methods take `&self`.
pub struct ThumbnailExtractor<B: MediaBackend = FfmpegBackend> {
    backend: Arc<B>,
    gate: AdmissionGate,
    options: Arc<ExtractOptions>,
    ledger: Arc<ResourceLedger>,
}

impl ThumbnailExtractor<FfmpegBackend> {
    /// Create an extractor backed by FFmpeg.
    pub fn new(options: ExtractOptions) -> Self {
        Self::with_backend(FfmpegBackend::new(), options)
    }
}

impl<B: MediaBackend> ThumbnailExtractor<B> {
    /// Create an extractor driving `backend`.
    pub fn with_backend(backend: B, options: ExtractOptions) -> Self {
        Self {
            backend: Arc::new(backend),
            gate: AdmissionGate::new(options.gate().clone()),
            options: Arc::new(options),
            ledger: Arc::new(ResourceLedger::new()),
        }
    }

    /// The admission gate shared by every request.
    pub fn gate(&self) -> &AdmissionGate {
        &self.gate
    }

    /// Acquire/release totals for every native resource this extractor has
    /// opened.
    pub fn resources(&self) -> &ResourceLedger {
        &self.ledger
    }

    /// The backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// The configuration.
    pub fn options(&self) -> &ExtractOptions {
        &self.options
    }

    /// Extract one thumbnail.
    ///
    /// Dropping the returned future cancels the request: a queued request
    /// leaves the queue, an admitted one stops at its next step and releases
    /// its slot once its resources are closed.
    pub async fn extract(&self, request: ExtractionRequest) -> ExtractionResult {
        self.extract_with_cancellation(request, CancellationToken::new())
            .await
    }

    /// Extract one thumbnail, observing `cancellation`.
    ///
    /// # Errors
    ///
    /// [`ThumbnailError::BudgetExceeded`] if the gate refuses the request,
    /// [`ThumbnailError::Cancelled`] if `cancellation` fires first, or any
    /// pipeline error. A panic on the pipeline thread surfaces as
    /// [`ThumbnailError::DecodeFailed`] ("extraction worker panicked"),
    /// whichever step it came from; everything it held is released by
    /// unwinding.
    pub async fn extract_with_cancellation(
        &self,
        request: ExtractionRequest,
        cancellation: CancellationToken,
    ) -> ExtractionResult {
        let cost = self.options.cost_model().estimate(request.file_path());
        log::debug!(
            "Requesting admission for {} (cost {cost})",
            request.file_path().display()
        );

        let slot = tokio::select! {
            biased;
            _ = cancellation.cancelled() => return Err(ThumbnailError::Cancelled),
            slot = self.gate.acquire(cost) => slot?,
        };

        let guard = CancelOnDrop::new(cancellation.clone());
        let backend = Arc::clone(&self.backend);
        let options = Arc::clone(&self.options);
        let ledger = Arc::clone(&self.ledger);

        let handle = tokio::task::spawn_blocking(move || {
            let result = pipeline::run(&*backend, &request, &options, &ledger, &cancellation);
            log::debug!(
                "Pipeline for {} finished in slot {}: {}",
                request.file_path().display(),
                slot.token().value(),
                if result.is_ok() { "ok" } else { "failed" }
            );
            AdmissionGate::release(slot);
            result
        });

        let result = handle.await.unwrap_or_else(|error| {
            let outcome = if error.is_panic() { "panicked" } else { "was aborted" };
            log::warn!("Extraction worker {outcome}");
            Err(ThumbnailError::DecodeFailed(format!(
                "extraction worker {outcome}"
            )))
        });
        guard.disarm();
        result
    }
}

impl<B: MediaBackend> Debug for ThumbnailExtractor<B> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("ThumbnailExtractor")
            .field("gate", &self.gate)
            .field("options", &self.options)
            .field("outstanding_resources", &self.ledger.outstanding())
            .finish_non_exhaustive()
    }
}
