//! FFmpeg-backed media collaborator and FFmpeg log control.
//!
//! [`FfmpegBackend`] implements [`MediaBackend`] on top of
//! [`ffmpeg-next`](https://crates.io/crates/ffmpeg-next): `avformat` for
//! demuxing and seeking, `avcodec` for decoding, and `swscale` for the
//! bilinear conversion to RGBA.
//!
//! FFmpeg also prints its own diagnostics to stderr, independently of the
//! Rust [`log`](https://crates.io/crates/log) facade used by this crate.
//! [`set_ffmpeg_log_level`] tunes or silences that output.
//!
//! ```no_run
//! use stillframe::FfmpegLogLevel;
//!
//! stillframe::set_ffmpeg_log_level(FfmpegLogLevel::Error);
//! ```

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use ffmpeg_next::{
    Error as FfmpegError, Packet,
    codec::context::Context as CodecContext,
    decoder::Video as VideoDecoder,
    format::{Pixel, context::Input},
    frame::Video as VideoFrame,
    media::Type,
    software::scaling::{Context as ScalingContext, Flags as ScalingFlags},
    util::{error::EAGAIN, log::Level},
};
use ffmpeg_sys_next::AV_NOPTS_VALUE;

use crate::{
    backend::{
        DecodedFrame, DemuxContainer, FrameDecoder, MediaBackend, MediaPacket, Received,
        VideoStreamDescriptor,
    },
    error::ThumbnailError,
    scaler::BYTES_PER_PIXEL,
    utilities::{frame_to_buffer, stream_timestamp_to_micros},
};

/// The production [`MediaBackend`], built on FFmpeg.
#[derive(Debug, Clone, Copy, Default)]
pub struct FfmpegBackend;

impl FfmpegBackend {
    /// Create the backend. FFmpeg itself is initialised on first open.
    pub fn new() -> Self {
        Self
    }
}

/// An opened FFmpeg demuxer.
pub struct FfmpegContainer {
    input: Input,
    path: PathBuf,
}

/// A packet read from an [`FfmpegContainer`].
pub struct FfmpegPacket(Packet);

/// An opened FFmpeg video decoder.
pub struct FfmpegDecoder {
    decoder: VideoDecoder,
}

/// A decoded FFmpeg video frame in its native pixel format.
pub struct FfmpegFrame(VideoFrame);

impl MediaPacket for FfmpegPacket {
    fn stream_index(&self) -> usize {
        self.0.stream()
    }
}

impl DecodedFrame for FfmpegFrame {
    fn width(&self) -> u32 {
        self.0.width()
    }

    fn height(&self) -> u32 {
        self.0.height()
    }

    fn pts(&self) -> Option<i64> {
        self.0.timestamp().or_else(|| self.0.pts())
    }
}

impl DemuxContainer for FfmpegContainer {
    type Packet = FfmpegPacket;

    fn duration(&self) -> Option<Duration> {
        let micros = self.input.duration();
        (micros > 0 && micros != AV_NOPTS_VALUE).then(|| Duration::from_micros(micros as u64))
    }

    fn seek_backward(
        &mut self,
        stream: &VideoStreamDescriptor,
        target: i64,
    ) -> Result<(), ThumbnailError> {
        // Container-level seeking takes AV_TIME_BASE; an upper bound of the
        // target itself lands on the keyframe at or before it.
        let micros = stream_timestamp_to_micros(target, stream.time_base);
        self.input
            .seek(micros, ..micros)
            .map_err(|error| ThumbnailError::SeekFailed {
                target,
                reason: error.to_string(),
            })
    }

    fn read_packet(&mut self) -> Result<Option<FfmpegPacket>, ThumbnailError> {
        let mut packet = Packet::empty();
        match packet.read(&mut self.input) {
            Ok(()) => Ok(Some(FfmpegPacket(packet))),
            Err(FfmpegError::Eof) => Ok(None),
            Err(error) => Err(ThumbnailError::DecodeFailed(format!(
                "failed to read packet from {}: {error}",
                self.path.display()
            ))),
        }
    }
}

impl FrameDecoder for FfmpegDecoder {
    type Packet = FfmpegPacket;
    type Frame = FfmpegFrame;

    fn flush(&mut self) {
        self.decoder.flush();
    }

    fn send_packet(&mut self, packet: &FfmpegPacket) -> Result<(), ThumbnailError> {
        self.decoder
            .send_packet(&packet.0)
            .map_err(|error| ThumbnailError::DecodeFailed(error.to_string()))
    }

    fn send_eof(&mut self) -> Result<(), ThumbnailError> {
        match self.decoder.send_eof() {
            Ok(()) | Err(FfmpegError::Eof) => Ok(()),
            Err(error) => Err(ThumbnailError::DecodeFailed(error.to_string())),
        }
    }

    fn receive_frame(&mut self) -> Result<Received<FfmpegFrame>, ThumbnailError> {
        let mut frame = VideoFrame::empty();
        match self.decoder.receive_frame(&mut frame) {
            Ok(()) => Ok(Received::Frame(FfmpegFrame(frame))),
            Err(FfmpegError::Other { errno }) if errno == EAGAIN => Ok(Received::NeedMoreInput),
            Err(FfmpegError::Eof) => Ok(Received::EndOfStream),
            Err(error) => Err(ThumbnailError::DecodeFailed(error.to_string())),
        }
    }
}

impl MediaBackend for FfmpegBackend {
    type Packet = FfmpegPacket;
    type Frame = FfmpegFrame;
    type Container = FfmpegContainer;
    type Decoder = FfmpegDecoder;

    fn open(&self, path: &Path) -> Result<FfmpegContainer, ThumbnailError> {
        ffmpeg_next::init().map_err(|error| ThumbnailError::OpenFailed {
            path: path.to_path_buf(),
            reason: format!("FFmpeg initialisation failed: {error}"),
        })?;

        // `format::input` also reads the stream info.
        let input = ffmpeg_next::format::input(&path).map_err(|error| {
            ThumbnailError::OpenFailed {
                path: path.to_path_buf(),
                reason: error.to_string(),
            }
        })?;

        Ok(FfmpegContainer {
            input,
            path: path.to_path_buf(),
        })
    }

    fn select_video_stream(
        &self,
        container: &FfmpegContainer,
        path: &Path,
    ) -> Result<VideoStreamDescriptor, ThumbnailError> {
        let stream = container
            .input
            .streams()
            .best(Type::Video)
            .ok_or_else(|| ThumbnailError::NoVideoStream(path.to_path_buf()))?;

        let parameters = stream.parameters();
        // SAFETY: `parameters` borrows the stream's codec parameters, which stay
        // valid while `container` is borrowed.
        let (width, height) = unsafe {
            let raw = parameters.as_ptr();
            ((*raw).width.max(0) as u32, (*raw).height.max(0) as u32)
        };

        // Copying the parameters into an unopened codec context gives a typed
        // pixel format without opening a decoder.
        let pixel_format = CodecContext::from_parameters(stream.parameters())
            .map(|context| {
                // SAFETY: `context` owns a valid AVCodecContext until dropped.
                Pixel::from(unsafe { (*context.as_ptr()).pix_fmt })
            })
            .unwrap_or(Pixel::None);

        let duration = stream.duration();
        let start_time = stream.start_time();

        Ok(VideoStreamDescriptor {
            index: stream.index(),
            time_base: stream.time_base(),
            codec: parameters.id().name().to_string(),
            width,
            height,
            pixel_format,
            duration: (duration > 0 && duration != AV_NOPTS_VALUE).then_some(duration),
            start_time: if start_time == AV_NOPTS_VALUE {
                0
            } else {
                start_time
            },
        })
    }

    fn open_decoder(
        &self,
        container: &FfmpegContainer,
        descriptor: &VideoStreamDescriptor,
    ) -> Result<FfmpegDecoder, ThumbnailError> {
        let codec_open_failed = |reason: String| ThumbnailError::CodecOpenFailed {
            stream_index: descriptor.index,
            reason,
        };

        let stream = container
            .input
            .stream(descriptor.index)
            .ok_or_else(|| codec_open_failed("stream disappeared from container".to_string()))?;
        let context = CodecContext::from_parameters(stream.parameters())
            .map_err(|error| codec_open_failed(error.to_string()))?;
        let decoder = context
            .decoder()
            .video()
            .map_err(|error| codec_open_failed(error.to_string()))?;

        log::debug!(
            "Opened {} decoder ({:?}, {}x{})",
            descriptor.codec,
            decoder.format(),
            decoder.width(),
            decoder.height()
        );
        Ok(FfmpegDecoder { decoder })
    }

    fn rescale(
        &self,
        frame: &FfmpegFrame,
        width: u32,
        height: u32,
    ) -> Result<Vec<u8>, ThumbnailError> {
        let source = &frame.0;
        let mut scaler = ScalingContext::get(
            source.format(),
            source.width(),
            source.height(),
            Pixel::RGBA,
            width,
            height,
            ScalingFlags::BILINEAR,
        )
        .map_err(|error| ThumbnailError::ScaleFailed(error.to_string()))?;

        let mut rgba = VideoFrame::empty();
        scaler
            .run(source, &mut rgba)
            .map_err(|error| ThumbnailError::ScaleFailed(error.to_string()))?;

        frame_to_buffer(&rgba, width, height, BYTES_PER_PIXEL).ok_or_else(|| {
            ThumbnailError::ScaleFailed(format!(
                "scaler output is smaller than {width}x{height} RGBA"
            ))
        })
    }
}

/// FFmpeg internal log verbosity, from most quiet to most verbose.
///
/// Maps onto FFmpeg's `AV_LOG_*` levels; messages below the configured
/// severity are suppressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FfmpegLogLevel {
    /// No output at all.
    Quiet,
    /// Conditions that abort the process.
    Panic,
    /// Unrecoverable errors.
    Fatal,
    /// Recoverable errors.
    Error,
    /// Warnings (FFmpeg's default).
    Warning,
    /// Informational messages.
    Info,
    /// Verbose informational messages.
    Verbose,
    /// Debugging messages.
    Debug,
    /// Tracing output.
    Trace,
}

impl From<FfmpegLogLevel> for Level {
    fn from(level: FfmpegLogLevel) -> Self {
        match level {
            FfmpegLogLevel::Quiet => Level::Quiet,
            FfmpegLogLevel::Panic => Level::Panic,
            FfmpegLogLevel::Fatal => Level::Fatal,
            FfmpegLogLevel::Error => Level::Error,
            FfmpegLogLevel::Warning => Level::Warning,
            FfmpegLogLevel::Info => Level::Info,
            FfmpegLogLevel::Verbose => Level::Verbose,
            FfmpegLogLevel::Debug => Level::Debug,
            FfmpegLogLevel::Trace => Level::Trace,
        }
    }
}

impl From<Level> for FfmpegLogLevel {
    fn from(level: Level) -> Self {
        match level {
            Level::Quiet => FfmpegLogLevel::Quiet,
            Level::Panic => FfmpegLogLevel::Panic,
            Level::Fatal => FfmpegLogLevel::Fatal,
            Level::Error => FfmpegLogLevel::Error,
            Level::Warning => FfmpegLogLevel::Warning,
            Level::Info => FfmpegLogLevel::Info,
            Level::Verbose => FfmpegLogLevel::Verbose,
            Level::Debug => FfmpegLogLevel::Debug,
            Level::Trace => FfmpegLogLevel::Trace,
        }
    }
}

impl FfmpegLogLevel {
    /// Parse a level name as accepted on the command line.
    pub fn parse(name: &str) -> Option<Self> {
        let level = match name.to_ascii_lowercase().as_str() {
            "quiet" => FfmpegLogLevel::Quiet,
            "panic" => FfmpegLogLevel::Panic,
            "fatal" => FfmpegLogLevel::Fatal,
            "error" => FfmpegLogLevel::Error,
            "warning" | "warn" => FfmpegLogLevel::Warning,
            "info" => FfmpegLogLevel::Info,
            "verbose" => FfmpegLogLevel::Verbose,
            "debug" => FfmpegLogLevel::Debug,
            "trace" => FfmpegLogLevel::Trace,
            _ => return None,
        };
        Some(level)
    }
}

/// Set FFmpeg's own stderr verbosity. Does not affect the `log` facade.
pub fn set_ffmpeg_log_level(level: FfmpegLogLevel) {
    ffmpeg_next::util::log::set_level(level.into());
}

/// Current FFmpeg stderr verbosity, if it maps to a known level.
pub fn get_ffmpeg_log_level() -> Option<FfmpegLogLevel> {
    ffmpeg_next::util::log::get_level().ok().map(FfmpegLogLevel::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_level_names() {
        assert_eq!(FfmpegLogLevel::parse("quiet"), Some(FfmpegLogLevel::Quiet));
        assert_eq!(FfmpegLogLevel::parse("WARN"), Some(FfmpegLogLevel::Warning));
        assert_eq!(FfmpegLogLevel::parse("loud"), None);
    }

    #[test]
    fn opening_missing_file_is_open_failed() {
        let result = FfmpegBackend::new().open(Path::new("this_file_does_not_exist.mp4"));
        assert!(matches!(result, Err(ThumbnailError::OpenFailed { .. })));
    }
}
