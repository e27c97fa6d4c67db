//! Internal utility functions.
//!
//! Helpers for pixel-data copying and timestamp conversion shared by the
//! seek strategy and the FFmpeg backend.

use std::time::Duration;

use ffmpeg_next::{Rational, frame::Video as VideoFrame};

/// Copy plane 0 of an FFmpeg video frame into a tightly packed buffer.
///
/// `bytes_per_pixel` is 4 for RGBA. Returns `None` if the plane is shorter
/// than `height` rows of the expected width.
pub(crate) fn frame_to_buffer(
    video_frame: &VideoFrame,
    width: u32,
    height: u32,
    bytes_per_pixel: usize,
) -> Option<Vec<u8>> {
    let stride = video_frame.stride(0);
    let row_bytes = (width as usize) * bytes_per_pixel;
    let rows = height as usize;
    let data = video_frame.data(0);

    if stride < row_bytes || rows == 0 || data.len() < stride * (rows - 1) + row_bytes {
        return None;
    }

    if stride == row_bytes {
        return Some(data[..row_bytes * rows].to_vec());
    }

    let mut buffer = Vec::with_capacity(row_bytes * rows);
    for row in 0..rows {
        let row_start = row * stride;
        buffer.extend_from_slice(&data[row_start..row_start + row_bytes]);
    }
    Some(buffer)
}

/// Convert a [`Duration`] to a timestamp in `time_base` units, rounding down.
pub(crate) fn duration_to_stream_timestamp(duration: Duration, time_base: Rational) -> i64 {
    let numerator = i128::from(time_base.numerator());
    let denominator = i128::from(time_base.denominator());
    if numerator <= 0 || denominator <= 0 {
        return 0;
    }
    let micros = duration.as_micros() as i128;
    (micros * denominator / (numerator * 1_000_000)) as i64
}

/// Convert a timestamp in `time_base` units to microseconds (FFmpeg's
/// `AV_TIME_BASE`).
pub(crate) fn stream_timestamp_to_micros(timestamp: i64, time_base: Rational) -> i64 {
    let numerator = i128::from(time_base.numerator());
    let denominator = i128::from(time_base.denominator());
    if denominator <= 0 {
        return 0;
    }
    (i128::from(timestamp) * numerator * 1_000_000 / denominator) as i64
}

/// Rescale a PTS value from stream time base to a [`Duration`], clamping
/// negative values to zero.
pub fn pts_to_duration(pts: i64, time_base: Rational) -> Duration {
    let micros = stream_timestamp_to_micros(pts, time_base);
    Duration::from_micros(micros.max(0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn millisecond_time_base_round_trips() {
        let time_base = Rational::new(1, 1000);
        let ts = duration_to_stream_timestamp(Duration::from_millis(2500), time_base);
        assert_eq!(ts, 2500);
        assert_eq!(pts_to_duration(ts, time_base), Duration::from_millis(2500));
    }

    #[test]
    fn mpeg_time_base_converts_to_micros() {
        let time_base = Rational::new(1, 90_000);
        assert_eq!(stream_timestamp_to_micros(90_000, time_base), 1_000_000);
        assert_eq!(
            duration_to_stream_timestamp(Duration::from_secs(2), time_base),
            180_000
        );
    }

    #[test]
    fn degenerate_time_base_is_zero() {
        let time_base = Rational::new(0, 0);
        assert_eq!(duration_to_stream_timestamp(Duration::from_secs(3), time_base), 0);
        assert_eq!(stream_timestamp_to_micros(42, time_base), 0);
    }

    #[test]
    fn negative_pts_clamps_to_zero() {
        assert_eq!(pts_to_duration(-40, Rational::new(1, 1000)), Duration::ZERO);
    }
}
