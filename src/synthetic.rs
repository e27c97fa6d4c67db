//! An in-memory [`MediaBackend`] for tests and benchmarks.
//!
//! [`SyntheticBackend`] serves solid-colour videos registered under virtual
//! paths. Each video has a fixed frame rate, keyframe interval, and decoder
//! latency, and can be told to fail at any pipeline step through a
//! [`FaultPoint`]. Every container, decoder, and frame it hands out counts
//! its own open and close in [`SyntheticCounters`], so tests can prove that
//! nothing leaks on any path.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//!
//! use stillframe::{SyntheticBackend, SyntheticMedia};
//!
//! let backend = SyntheticBackend::new()
//!     .with_media("clip.mov", SyntheticMedia::video(640, 480, Duration::from_secs(10)));
//! assert_eq!(backend.counters().snapshot().containers_opened, 0);
//! ```

use std::{
    collections::{HashMap, VecDeque},
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicI64, AtomicU64, Ordering},
    },
    time::Duration,
};

use ffmpeg_next::{Rational, format::Pixel};
use image::{Rgba, RgbaImage, imageops::FilterType};

use crate::{
    backend::{
        DecodedFrame, DemuxContainer, FrameDecoder, MediaBackend, MediaPacket, Received,
        VideoStreamDescriptor,
    },
    error::ThumbnailError,
};

/// Milliseconds.
const TIME_BASE: Rational = Rational(1, 1000);

/// A pipeline step at which a synthetic video fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultPoint {
    /// Container open fails.
    Open,
    /// Stream selection finds no video stream.
    SelectStream,
    /// Decoder open fails.
    CodecOpen,
    /// Seek is rejected.
    Seek,
    /// The decoder rejects every packet.
    Decode,
    /// Rescaling fails.
    Scale,
    /// The backend panics while rescaling.
    Panic,
}

/// Description of one synthetic video.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticMedia {
    width: u32,
    height: u32,
    duration: Duration,
    frames_per_second: u32,
    keyframe_interval: u32,
    color: [u8; 4],
    has_video: bool,
    has_audio: bool,
    decoder_latency: usize,
    decode_delay: Duration,
    fault: Option<FaultPoint>,
}

impl SyntheticMedia {
    /// A `width` × `height` video of `duration` at 25 fps with a keyframe every
    /// second, an interleaved audio track, and opaque grey frames.
    pub fn video(width: u32, height: u32, duration: Duration) -> Self {
        Self {
            width,
            height,
            duration,
            frames_per_second: 25,
            keyframe_interval: 25,
            color: [128, 128, 128, 255],
            has_video: true,
            has_audio: true,
            decoder_latency: 1,
            decode_delay: Duration::ZERO,
            fault: None,
        }
    }

    /// A container with only an audio track.
    pub fn audio_only(duration: Duration) -> Self {
        Self {
            has_video: false,
            ..Self::video(0, 0, duration)
        }
    }

    /// Frame rate (minimum 1).
    #[must_use]
    pub fn with_frame_rate(mut self, frames_per_second: u32) -> Self {
        self.frames_per_second = frames_per_second.max(1);
        self
    }

    /// Frames between keyframes (minimum 1).
    #[must_use]
    pub fn with_keyframe_interval(mut self, frames: u32) -> Self {
        self.keyframe_interval = frames.max(1);
        self
    }

    /// Straight-alpha RGBA colour of every frame.
    #[must_use]
    pub fn with_color(mut self, color: [u8; 4]) -> Self {
        self.color = color;
        self
    }

    /// Packets the decoder buffers before emitting its first frame.
    #[must_use]
    pub fn with_decoder_latency(mut self, packets: usize) -> Self {
        self.decoder_latency = packets;
        self
    }

    /// Time the decoder spends on every packet.
    #[must_use]
    pub fn with_decode_delay(mut self, delay: Duration) -> Self {
        self.decode_delay = delay;
        self
    }

    /// Drop the audio track.
    #[must_use]
    pub fn without_audio(mut self) -> Self {
        self.has_audio = false;
        self
    }

    /// Fail at `point`.
    #[must_use]
    pub fn with_fault(mut self, point: FaultPoint) -> Self {
        self.fault = Some(point);
        self
    }

    /// Time base of every synthetic stream (1/1000 s).
    pub fn time_base() -> Rational {
        TIME_BASE
    }

    /// Presentation timestamp (in milliseconds) of frame `index`.
    pub fn frame_pts(&self, index: u64) -> i64 {
        (index * 1000 / u64::from(self.frames_per_second)) as i64
    }

    fn frame_count(&self) -> u64 {
        self.duration.as_millis() as u64 * u64::from(self.frames_per_second) / 1000
    }

    fn fails_at(&self, point: FaultPoint) -> bool {
        self.fault == Some(point)
    }

    fn audio_stream_index(&self) -> Option<usize> {
        self.has_audio.then_some(0)
    }

    fn video_stream_index(&self) -> Option<usize> {
        self.has_video.then_some(usize::from(self.has_audio))
    }

    fn packets(&self) -> Vec<SyntheticPacket> {
        let mut packets = Vec::new();
        for index in 0..self.frame_count() {
            let pts = self.frame_pts(index);
            if let Some(stream) = self.audio_stream_index() {
                packets.push(SyntheticPacket {
                    stream,
                    pts,
                    keyframe: true,
                });
            }
            if let Some(stream) = self.video_stream_index() {
                packets.push(SyntheticPacket {
                    stream,
                    pts,
                    keyframe: index % u64::from(self.keyframe_interval) == 0,
                });
            }
        }
        packets
    }
}

/// Open/close totals recorded by a [`SyntheticBackend`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyntheticCounts {
    /// Containers opened.
    pub containers_opened: u64,
    /// Containers closed.
    pub containers_closed: u64,
    /// Most containers open at the same time.
    pub peak_open_containers: u64,
    /// Decoders opened.
    pub decoders_opened: u64,
    /// Decoders closed.
    pub decoders_closed: u64,
    /// Frames produced by decoders.
    pub frames_decoded: u64,
    /// Frames released.
    pub frames_released: u64,
}

impl SyntheticCounts {
    /// Whether every container, decoder, and frame has been released.
    pub fn is_balanced(&self) -> bool {
        self.containers_opened == self.containers_closed
            && self.decoders_opened == self.decoders_closed
            && self.frames_decoded == self.frames_released
    }
}

/// Shared counters of a [`SyntheticBackend`].
#[derive(Debug, Default)]
pub struct SyntheticCounters {
    containers_opened: AtomicU64,
    containers_closed: AtomicU64,
    open_containers: AtomicU64,
    peak_open_containers: AtomicU64,
    decoders_opened: AtomicU64,
    decoders_closed: AtomicU64,
    frames_decoded: AtomicU64,
    frames_released: AtomicU64,
    last_seek_landing: AtomicI64,
    rescales: AtomicU64,
    containers_open_at_rescale: AtomicU64,
    decoders_open_at_rescale: AtomicU64,
}

impl SyntheticCounters {
    /// Current totals.
    pub fn snapshot(&self) -> SyntheticCounts {
        SyntheticCounts {
            containers_opened: self.containers_opened.load(Ordering::Acquire),
            containers_closed: self.containers_closed.load(Ordering::Acquire),
            peak_open_containers: self.peak_open_containers.load(Ordering::Acquire),
            decoders_opened: self.decoders_opened.load(Ordering::Acquire),
            decoders_closed: self.decoders_closed.load(Ordering::Acquire),
            frames_decoded: self.frames_decoded.load(Ordering::Acquire),
            frames_released: self.frames_released.load(Ordering::Acquire),
        }
    }

    /// Timestamp of the packet the most recent seek landed on.
    pub fn last_seek_landing(&self) -> i64 {
        self.last_seek_landing.load(Ordering::Acquire)
    }

    /// Number of rescale calls.
    pub fn rescales(&self) -> u64 {
        self.rescales.load(Ordering::Acquire)
    }

    /// Containers and decoders still open when the most recent rescale
    /// started.
    pub fn open_at_last_rescale(&self) -> (u64, u64) {
        (
            self.containers_open_at_rescale.load(Ordering::Acquire),
            self.decoders_open_at_rescale.load(Ordering::Acquire),
        )
    }

    fn rescale_started(&self) {
        let decoders_open = self
            .decoders_opened
            .load(Ordering::Acquire)
            .saturating_sub(self.decoders_closed.load(Ordering::Acquire));
        self.containers_open_at_rescale
            .store(self.open_containers.load(Ordering::Acquire), Ordering::Release);
        self.decoders_open_at_rescale.store(decoders_open, Ordering::Release);
        self.rescales.fetch_add(1, Ordering::AcqRel);
    }

    fn container_opened(&self) {
        self.containers_opened.fetch_add(1, Ordering::AcqRel);
        let open = self.open_containers.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak_open_containers.fetch_max(open, Ordering::AcqRel);
    }

    fn container_closed(&self) {
        self.open_containers.fetch_sub(1, Ordering::AcqRel);
        self.containers_closed.fetch_add(1, Ordering::AcqRel);
    }
}

/// A demuxed synthetic packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyntheticPacket {
    stream: usize,
    pts: i64,
    keyframe: bool,
}

impl MediaPacket for SyntheticPacket {
    fn stream_index(&self) -> usize {
        self.stream
    }
}

/// A decoded synthetic frame.
#[derive(Debug)]
pub struct SyntheticFrame {
    width: u32,
    height: u32,
    pts: i64,
    color: [u8; 4],
    fault: Option<FaultPoint>,
    counters: Arc<SyntheticCounters>,
}

impl DecodedFrame for SyntheticFrame {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn pts(&self) -> Option<i64> {
        Some(self.pts)
    }
}

impl Drop for SyntheticFrame {
    fn drop(&mut self) {
        self.counters.frames_released.fetch_add(1, Ordering::AcqRel);
    }
}

/// An opened synthetic container.
#[derive(Debug)]
pub struct SyntheticContainer {
    media: SyntheticMedia,
    packets: Vec<SyntheticPacket>,
    cursor: usize,
    counters: Arc<SyntheticCounters>,
}

impl DemuxContainer for SyntheticContainer {
    type Packet = SyntheticPacket;

    fn duration(&self) -> Option<Duration> {
        Some(self.media.duration)
    }

    fn seek_backward(
        &mut self,
        stream: &VideoStreamDescriptor,
        target: i64,
    ) -> Result<(), ThumbnailError> {
        if self.media.fails_at(FaultPoint::Seek) {
            return Err(ThumbnailError::SeekFailed {
                target,
                reason: "stream is not seekable".to_string(),
            });
        }

        let keyframes = || {
            self.packets
                .iter()
                .enumerate()
                .filter(|(_, packet)| packet.stream == stream.index && packet.keyframe)
        };
        let landing = keyframes()
            .filter(|(_, packet)| packet.pts <= target)
            .last()
            .or_else(|| keyframes().next());

        match landing {
            Some((position, packet)) => {
                self.counters
                    .last_seek_landing
                    .store(packet.pts, Ordering::Release);
                self.cursor = position;
            }
            None => self.cursor = self.packets.len(),
        }
        Ok(())
    }

    fn read_packet(&mut self) -> Result<Option<SyntheticPacket>, ThumbnailError> {
        let packet = self.packets.get(self.cursor).copied();
        if packet.is_some() {
            self.cursor += 1;
        }
        Ok(packet)
    }
}

impl Drop for SyntheticContainer {
    fn drop(&mut self) {
        self.counters.container_closed();
    }
}

/// An opened synthetic decoder.
#[derive(Debug)]
pub struct SyntheticDecoder {
    media: SyntheticMedia,
    pending: VecDeque<i64>,
    seen_keyframe: bool,
    draining: bool,
    counters: Arc<SyntheticCounters>,
}

impl FrameDecoder for SyntheticDecoder {
    type Packet = SyntheticPacket;
    type Frame = SyntheticFrame;

    fn flush(&mut self) {
        self.pending.clear();
        self.seen_keyframe = false;
        self.draining = false;
    }

    fn send_packet(&mut self, packet: &SyntheticPacket) -> Result<(), ThumbnailError> {
        if self.media.fails_at(FaultPoint::Decode) {
            return Err(ThumbnailError::DecodeFailed(
                "invalid data found when processing input".to_string(),
            ));
        }
        if self.draining {
            return Err(ThumbnailError::DecodeFailed(
                "packet sent after end of stream".to_string(),
            ));
        }
        if !self.media.decode_delay.is_zero() {
            std::thread::sleep(self.media.decode_delay);
        }
        // Like a real decoder, nothing is decodable before the first keyframe.
        if !self.seen_keyframe && !packet.keyframe {
            return Ok(());
        }
        self.seen_keyframe = true;
        self.pending.push_back(packet.pts);
        Ok(())
    }

    fn send_eof(&mut self) -> Result<(), ThumbnailError> {
        self.draining = true;
        Ok(())
    }

    fn receive_frame(&mut self) -> Result<Received<SyntheticFrame>, ThumbnailError> {
        let ready = self.pending.len() > self.media.decoder_latency
            || (self.draining && !self.pending.is_empty());
        if !ready {
            return Ok(if self.draining {
                Received::EndOfStream
            } else {
                Received::NeedMoreInput
            });
        }
        let Some(pts) = self.pending.pop_front() else {
            return Ok(Received::EndOfStream);
        };
        self.counters.frames_decoded.fetch_add(1, Ordering::AcqRel);
        Ok(Received::Frame(SyntheticFrame {
            width: self.media.width,
            height: self.media.height,
            pts,
            color: self.media.color,
            fault: self.media.fault,
            counters: Arc::clone(&self.counters),
        }))
    }
}

impl Drop for SyntheticDecoder {
    fn drop(&mut self) {
        self.counters.decoders_closed.fetch_add(1, Ordering::AcqRel);
    }
}

/// In-memory media library.
#[derive(Debug, Default)]
pub struct SyntheticBackend {
    media: HashMap<PathBuf, SyntheticMedia>,
    counters: Arc<SyntheticCounters>,
}

impl SyntheticBackend {
    /// An empty backend; every path fails to open.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `media` under `path`.
    #[must_use]
    pub fn with_media<P: Into<PathBuf>>(mut self, path: P, media: SyntheticMedia) -> Self {
        self.media.insert(path.into(), media);
        self
    }

    /// Shared counters; clone the `Arc` before handing the backend away.
    pub fn counters(&self) -> &Arc<SyntheticCounters> {
        &self.counters
    }
}

impl MediaBackend for SyntheticBackend {
    type Packet = SyntheticPacket;
    type Frame = SyntheticFrame;
    type Container = SyntheticContainer;
    type Decoder = SyntheticDecoder;

    fn open(&self, path: &Path) -> Result<SyntheticContainer, ThumbnailError> {
        let open_failed = |reason: &str| ThumbnailError::OpenFailed {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        };
        let media = self
            .media
            .get(path)
            .ok_or_else(|| open_failed("No such file or directory"))?;
        if media.fails_at(FaultPoint::Open) {
            return Err(open_failed("Invalid data found when processing input"));
        }

        self.counters.container_opened();
        Ok(SyntheticContainer {
            packets: media.packets(),
            media: media.clone(),
            cursor: 0,
            counters: Arc::clone(&self.counters),
        })
    }

    fn select_video_stream(
        &self,
        container: &SyntheticContainer,
        path: &Path,
    ) -> Result<VideoStreamDescriptor, ThumbnailError> {
        let media = &container.media;
        let index = media
            .video_stream_index()
            .filter(|_| !media.fails_at(FaultPoint::SelectStream))
            .ok_or_else(|| ThumbnailError::NoVideoStream(path.to_path_buf()))?;

        Ok(VideoStreamDescriptor {
            index,
            time_base: TIME_BASE,
            codec: "synthetic".to_string(),
            width: media.width,
            height: media.height,
            pixel_format: Pixel::RGBA,
            duration: Some(media.duration.as_millis() as i64),
            start_time: 0,
        })
    }

    fn open_decoder(
        &self,
        container: &SyntheticContainer,
        stream: &VideoStreamDescriptor,
    ) -> Result<SyntheticDecoder, ThumbnailError> {
        if container.media.fails_at(FaultPoint::CodecOpen) {
            return Err(ThumbnailError::CodecOpenFailed {
                stream_index: stream.index,
                reason: "Decoder not found".to_string(),
            });
        }

        self.counters.decoders_opened.fetch_add(1, Ordering::AcqRel);
        Ok(SyntheticDecoder {
            media: container.media.clone(),
            pending: VecDeque::new(),
            seen_keyframe: false,
            draining: false,
            counters: Arc::clone(&self.counters),
        })
    }

    fn rescale(
        &self,
        frame: &SyntheticFrame,
        width: u32,
        height: u32,
    ) -> Result<Vec<u8>, ThumbnailError> {
        self.counters.rescale_started();
        match frame.fault {
            Some(FaultPoint::Scale) => {
                return Err(ThumbnailError::ScaleFailed(
                    "swscale rejected the conversion".to_string(),
                ));
            }
            Some(FaultPoint::Panic) => {
                panic!("synthetic rescale of frame {} panicked", frame.pts)
            }
            _ => {}
        }

        let source = RgbaImage::from_pixel(frame.width, frame.height, Rgba(frame.color));
        Ok(image::imageops::resize(&source, width, height, FilterType::Triangle).into_raw())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(media: &SyntheticMedia) -> VideoStreamDescriptor {
        VideoStreamDescriptor {
            index: media.video_stream_index().unwrap(),
            time_base: TIME_BASE,
            codec: "synthetic".to_string(),
            width: media.width,
            height: media.height,
            pixel_format: Pixel::RGBA,
            duration: Some(media.duration.as_millis() as i64),
            start_time: 0,
        }
    }

    #[test]
    fn seek_lands_on_preceding_keyframe() {
        let media = SyntheticMedia::video(64, 48, Duration::from_secs(10));
        let backend = SyntheticBackend::new().with_media("a.mov", media.clone());
        let mut container = backend.open(Path::new("a.mov")).unwrap();
        container.seek_backward(&descriptor(&media), 2_500).unwrap();
        assert_eq!(backend.counters().last_seek_landing(), 2_000);
        let packet = container.read_packet().unwrap().unwrap();
        assert_eq!(packet.pts, 2_000);
        assert!(packet.keyframe);
    }

    #[test]
    fn decoder_waits_for_latency_then_emits() {
        let media = SyntheticMedia::video(64, 48, Duration::from_secs(1)).with_decoder_latency(1);
        let backend = SyntheticBackend::new().with_media("a.mov", media.clone());
        let container = backend.open(Path::new("a.mov")).unwrap();
        let mut decoder = backend.open_decoder(&container, &descriptor(&media)).unwrap();
        let key = SyntheticPacket { stream: 1, pts: 0, keyframe: true };
        decoder.send_packet(&key).unwrap();
        assert!(matches!(decoder.receive_frame().unwrap(), Received::NeedMoreInput));
        decoder.send_packet(&SyntheticPacket { pts: 40, keyframe: false, ..key }).unwrap();
        assert!(matches!(
            decoder.receive_frame().unwrap(),
            Received::Frame(frame) if frame.pts == 0
        ));
    }

    #[test]
    fn descriptor_reports_rgba_frames() {
        let media = SyntheticMedia::video(64, 48, Duration::from_secs(1));
        let backend = SyntheticBackend::new().with_media("a.mov", media);
        let container = backend.open(Path::new("a.mov")).unwrap();
        let stream = backend.select_video_stream(&container, Path::new("a.mov")).unwrap();
        assert_eq!(stream.pixel_format, Pixel::RGBA);
        assert_eq!((stream.width, stream.height, stream.index), (64, 48, 1));
    }

    #[test]
    fn counts_balance_after_drop() {
        let media = SyntheticMedia::video(64, 48, Duration::from_secs(1));
        let backend = SyntheticBackend::new().with_media("a.mov", media.clone());
        {
            let container = backend.open(Path::new("a.mov")).unwrap();
            let _decoder = backend.open_decoder(&container, &descriptor(&media)).unwrap();
        }
        let counts = backend.counters().snapshot();
        assert_eq!(counts.containers_opened, 1);
        assert_eq!(counts.decoders_opened, 1);
        assert!(counts.is_balanced());
    }
}
