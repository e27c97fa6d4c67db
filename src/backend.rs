//! The demux/decode/scale collaborator contract.
//!
//! The pipeline never talks to a media library directly. It drives a
//! [`MediaBackend`], which provides container open and stream selection,
//! decoder open/flush/send/receive, seek-by-timestamp with a backward bias,
//! and rescaling to RGBA. [`FfmpegBackend`](crate::FfmpegBackend) is the
//! production implementation; [`SyntheticBackend`](crate::SyntheticBackend)
//! is an in-memory one for tests.

use std::{path::Path, time::Duration};

use ffmpeg_next::{Rational, format::Pixel};

use crate::error::ThumbnailError;

/// Read-only view of the chosen video stream.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoStreamDescriptor {
    /// Index of the stream inside its container.
    pub index: usize,
    /// Unit of every timestamp on this stream.
    pub time_base: Rational,
    /// Short codec name (e.g. `h264`).
    pub codec: String,
    /// Coded width in pixels, 0 when the container does not say.
    pub width: u32,
    /// Coded height in pixels, 0 when the container does not say.
    pub height: u32,
    /// Native pixel format, [`Pixel::None`] when the container does not say.
    pub pixel_format: Pixel,
    /// Stream duration in `time_base` units, if known.
    pub duration: Option<i64>,
    /// Presentation time of the first frame in `time_base` units.
    pub start_time: i64,
}

/// Outcome of asking a decoder for its next frame.
#[derive(Debug)]
pub enum Received<F> {
    /// A complete frame.
    Frame(F),
    /// The decoder needs another packet before it can emit a frame.
    NeedMoreInput,
    /// The decoder has been drained after end of input.
    EndOfStream,
}

/// One demuxed packet.
pub trait MediaPacket {
    /// Index of the stream the packet belongs to.
    fn stream_index(&self) -> usize;
}

/// One decoded frame in the decoder's native pixel format.
pub trait DecodedFrame {
    /// Width in pixels.
    fn width(&self) -> u32;
    /// Height in pixels.
    fn height(&self) -> u32;
    /// Presentation timestamp in the stream time base, if the decoder set one.
    fn pts(&self) -> Option<i64>;
}

/// An opened demux context.
pub trait DemuxContainer {
    /// Packet type read from this container.
    type Packet: MediaPacket;

    /// Container-level duration, if known.
    fn duration(&self) -> Option<Duration>;

    /// Seek so that the next packet read for `stream` is the keyframe at or
    /// before `target` (in the stream time base).
    fn seek_backward(
        &mut self,
        stream: &VideoStreamDescriptor,
        target: i64,
    ) -> Result<(), ThumbnailError>;

    /// Read the next packet of any stream. `Ok(None)` at end of file.
    fn read_packet(&mut self) -> Result<Option<Self::Packet>, ThumbnailError>;
}

/// An opened decoder bound to one stream.
pub trait FrameDecoder {
    /// Packet type accepted by this decoder.
    type Packet: MediaPacket;
    /// Frame type produced by this decoder.
    type Frame: DecodedFrame;

    /// Discard every buffered packet and frame.
    fn flush(&mut self);

    /// Feed one packet.
    fn send_packet(&mut self, packet: &Self::Packet) -> Result<(), ThumbnailError>;

    /// Signal end of input so buffered frames can be drained.
    fn send_eof(&mut self) -> Result<(), ThumbnailError>;

    /// Pull the next frame, if one is ready.
    fn receive_frame(&mut self) -> Result<Received<Self::Frame>, ThumbnailError>;
}

/// A media library able to open containers, decode and rescale frames.
///
/// Implementations are shared across concurrent pipeline runs, so the
/// backend itself must be `Send + Sync`. The per-run objects it creates
/// (containers, decoders, frames) are used on a single thread and need
/// not be.
pub trait MediaBackend: Send + Sync + 'static {
    /// Packet type shared by the container and decoder.
    type Packet: MediaPacket;
    /// Decoded frame type.
    type Frame: DecodedFrame;
    /// Opened container type.
    type Container: DemuxContainer<Packet = Self::Packet>;
    /// Opened decoder type.
    type Decoder: FrameDecoder<Packet = Self::Packet, Frame = Self::Frame>;

    /// Open `path` and read its stream info.
    fn open(&self, path: &Path) -> Result<Self::Container, ThumbnailError>;

    /// Pick the best video stream, or fail with
    /// [`ThumbnailError::NoVideoStream`].
    fn select_video_stream(
        &self,
        container: &Self::Container,
        path: &Path,
    ) -> Result<VideoStreamDescriptor, ThumbnailError>;

    /// Open a decoder for `stream`.
    fn open_decoder(
        &self,
        container: &Self::Container,
        stream: &VideoStreamDescriptor,
    ) -> Result<Self::Decoder, ThumbnailError>;

    /// Convert `frame` to tightly packed, straight-alpha RGBA at
    /// `width` × `height` with a bilinear kernel.
    fn rescale(
        &self,
        frame: &Self::Frame,
        width: u32,
        height: u32,
    ) -> Result<Vec<u8>, ThumbnailError>;
}
