//! Seek target selection and positioning.
//!
//! The target is a fixed percentage into the stream:
//! `start_time + floor(duration * percent / 100)` in the stream time base.
//! Seeking is biased backward so the demuxer lands on the keyframe at or
//! before the target; the decoder is flushed on both sides of the seek so
//! no frame from a previous position survives.

use std::time::Duration;

use crate::{
    backend::{DemuxContainer, FrameDecoder, VideoStreamDescriptor},
    error::ThumbnailError,
    utilities::duration_to_stream_timestamp,
};

/// How close to the seek target the extracted frame must be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SeekPrecision {
    /// Take the first frame decoded after the backward seek, i.e. the
    /// keyframe at or before the target.
    #[default]
    Keyframe,
    /// Decode forward from that keyframe to the first frame at or after the
    /// target.
    Accurate,
}

/// Computes the representative timestamp and positions the demuxer on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeekStrategy {
    position_percent: u32,
}

impl Default for SeekStrategy {
    fn default() -> Self {
        Self::new(25)
    }
}

impl SeekStrategy {
    /// A strategy targeting `position_percent` of the duration (clamped to 100).
    pub fn new(position_percent: u32) -> Self {
        Self {
            position_percent: position_percent.min(100),
        }
    }

    /// Configured percentage.
    pub fn position_percent(&self) -> u32 {
        self.position_percent
    }

    /// Target timestamp in the stream time base.
    ///
    /// Uses the stream duration when the container reports one, otherwise
    /// the container duration. With no duration at all the target is the
    /// stream start.
    pub fn target_timestamp(
        &self,
        stream: &VideoStreamDescriptor,
        container_duration: Option<Duration>,
    ) -> i64 {
        let duration = stream
            .duration
            .filter(|duration| *duration > 0)
            .or_else(|| {
                container_duration
                    .map(|duration| duration_to_stream_timestamp(duration, stream.time_base))
            })
            .unwrap_or(0);
        let offset = i128::from(duration) * i128::from(self.position_percent) / 100;
        stream.start_time.saturating_add(offset as i64)
    }

    /// Flush `decoder`, seek `container` backward to `target`, flush again.
    ///
    /// # Errors
    ///
    /// Returns [`ThumbnailError::SeekFailed`] if the container rejects the
    /// seek. The failure is not retried at another position.
    pub fn seek<C, D>(
        &self,
        container: &mut C,
        decoder: &mut D,
        stream: &VideoStreamDescriptor,
        target: i64,
    ) -> Result<(), ThumbnailError>
    where
        C: DemuxContainer,
        D: FrameDecoder,
    {
        log::debug!(
            "Seeking stream {} to {} ({}% in)",
            stream.index,
            target,
            self.position_percent
        );
        decoder.flush();
        container.seek_backward(stream, target)?;
        decoder.flush();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use ffmpeg_next::{Rational, format::Pixel};

    use super::*;

    fn descriptor(duration: Option<i64>, start_time: i64) -> VideoStreamDescriptor {
        VideoStreamDescriptor {
            index: 0,
            time_base: Rational::new(1, 1000),
            codec: "h264".to_string(),
            width: 640,
            height: 480,
            pixel_format: Pixel::YUV420P,
            duration,
            start_time,
        }
    }

    #[test]
    fn quarter_of_ten_seconds() {
        let strategy = SeekStrategy::default();
        assert_eq!(strategy.target_timestamp(&descriptor(Some(10_000), 0), None), 2_500);
    }

    #[test]
    fn target_is_offset_by_start_time_and_floored() {
        let strategy = SeekStrategy::new(33);
        // floor(1001 * 33 / 100) = 330
        assert_eq!(strategy.target_timestamp(&descriptor(Some(1_001), 40), None), 370);
    }

    #[test]
    fn falls_back_to_container_duration() {
        let strategy = SeekStrategy::new(50);
        let target =
            strategy.target_timestamp(&descriptor(None, 0), Some(Duration::from_secs(8)));
        assert_eq!(target, 4_000);
    }

    #[test]
    fn unknown_duration_targets_start() {
        let strategy = SeekStrategy::new(50);
        assert_eq!(strategy.target_timestamp(&descriptor(Some(0), 12), None), 12);
    }

    #[test]
    fn percent_is_clamped() {
        assert_eq!(SeekStrategy::new(400).position_percent(), 100);
    }
}
