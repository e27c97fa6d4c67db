//! # stillframe
//!
//! Bounded-memory still-frame extraction for thumbnail hosts.
//!
//! `stillframe` turns a video file into one representative frame, scaled
//! to fit a requested size and handed back as a deferred reply the host can
//! draw later. Decoding is powered by FFmpeg via the
//! [`ffmpeg-next`](https://crates.io/crates/ffmpeg-next) crate.
//!
//! Thumbnail hosts often run under a hard memory ceiling and receive many
//! requests at once. Every extraction therefore passes an
//! [`AdmissionGate`] first: a fixed number of slots bounds how many
//! pipelines run concurrently, a bounded queue absorbs bursts, and anything
//! beyond is rejected with [`ThumbnailError::BudgetExceeded`] before a
//! single native resource is opened.
//!
//! ## Quick Start
//!
//! ```no_run
//! use stillframe::{
//!     ExtractOptions, ExtractionRequest, ImageSurface, LogicalSize, ThumbnailExtractor,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let extractor = ThumbnailExtractor::new(ExtractOptions::new());
//! let request = ExtractionRequest::new("input.mp4", LogicalSize::new(256.0, 256.0), 2.0);
//!
//! let reply = extractor.extract(request).await?;
//! let mut surface = ImageSurface::for_reply(&reply, 2.0);
//! reply.draw(&mut surface)?;
//! surface.image().save("thumbnail.png")?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Pipeline
//!
//! Each admitted request runs, strictly in order: open container, select
//! the best video stream, open its decoder, seek backward to the keyframe
//! at or before 25% of the duration, decode the nearest frame, close the
//! decoder and container, convert to premultiplied RGBA at the target size,
//! and package the frame. Every native object is wrapped in a
//! [`ResourceHandle`], so no exit path leaks one.
//!
//! ## Backends
//!
//! The pipeline is generic over [`MediaBackend`]. [`FfmpegBackend`] is the
//! production backend; [`SyntheticBackend`] serves in-memory videos with
//! fault injection and is what the test suite and benchmarks drive.
//!
//! ## Requirements
//!
//! FFmpeg development libraries must be installed on your system.

pub mod backend;
pub mod configuration;
pub mod error;
pub mod extractor;
pub mod ffmpeg;
pub mod gate;
pub mod pipeline;
pub mod progress;
pub mod request;
pub mod resource;
pub mod scaler;
pub mod seek;
pub mod synthetic;
pub mod thumbnail;
mod utilities;

pub use backend::{
    DecodedFrame, DemuxContainer, FrameDecoder, MediaBackend, MediaPacket, Received,
    VideoStreamDescriptor,
};
pub use configuration::{CostModel, ExtractOptions, GateOptions};
pub use error::{ErrorKind, RejectionReason, ThumbnailError};
pub use extractor::ThumbnailExtractor;
pub use ffmpeg::{FfmpegBackend, FfmpegLogLevel, get_ffmpeg_log_level, set_ffmpeg_log_level};
pub use gate::{AdmissionGate, AdmissionSlot, GateStats, SlotToken};
pub use progress::CancellationToken;
pub use request::{ExtractionRequest, ExtractionResult, LogicalSize};
pub use resource::{ResourceCounts, ResourceHandle, ResourceKind, ResourceLedger};
pub use scaler::OutputFrame;
pub use seek::{SeekPrecision, SeekStrategy};
pub use synthetic::{
    FaultPoint, SyntheticBackend, SyntheticCounters, SyntheticCounts, SyntheticMedia,
};
pub use thumbnail::{DeferredReply, DrawSurface, ImageSurface};
pub use utilities::pts_to_duration;
