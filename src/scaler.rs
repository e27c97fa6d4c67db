//! Frame scaling to the display format.
//!
//! The output width is driven by the request and the height follows the
//! source aspect ratio:
//!
//! ```text
//! target_width  = round(max_width * display_scale_factor)
//! target_height = round(target_width / (raw_width / raw_height))
//! ```
//!
//! The requested maximum height is deliberately not consulted. Output is
//! tightly packed, premultiplied RGBA (row stride = width × 4), and never
//! larger than the configured pixel cap.

use image::RgbaImage;

use crate::{
    backend::{DecodedFrame, MediaBackend},
    error::ThumbnailError,
    request::LogicalSize,
    resource::ResourceHandle,
};

/// Bytes per pixel of the display format.
pub const BYTES_PER_PIXEL: usize = 4;

/// Default cap on output pixels: 4096 × 4096, 64 MiB of RGBA.
pub const DEFAULT_MAX_OUTPUT_PIXELS: u64 = 4096 * 4096;

/// A scaled frame in premultiplied RGBA.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFrame {
    image: RgbaImage,
}

impl OutputFrame {
    /// Wrap a premultiplied RGBA image.
    pub fn from_image(image: RgbaImage) -> Self {
        Self { image }
    }

    /// Width in pixels.
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    /// Height in pixels.
    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Bytes per row.
    pub fn stride(&self) -> usize {
        self.image.width() as usize * BYTES_PER_PIXEL
    }

    /// Raw premultiplied RGBA bytes.
    pub fn pixels(&self) -> &[u8] {
        self.image.as_raw()
    }

    /// The frame as an image.
    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    /// Consume the frame and return the image.
    pub fn into_image(self) -> RgbaImage {
        self.image
    }
}

/// Compute the output size for a `raw_width` × `raw_height` frame.
///
/// # Errors
///
/// Returns [`ThumbnailError::ScaleFailed`] if any input dimension or the
/// scale factor is zero, negative, or not finite, if the result rounds to
/// zero pixels, or if it has more than `max_output_pixels` pixels.
pub fn target_dimensions(
    raw_width: u32,
    raw_height: u32,
    requested_max_size: LogicalSize,
    display_scale_factor: f64,
    max_output_pixels: u64,
) -> Result<(u32, u32), ThumbnailError> {
    if raw_width == 0 || raw_height == 0 {
        return Err(ThumbnailError::ScaleFailed(format!(
            "decoded frame has empty dimensions {raw_width}x{raw_height}"
        )));
    }
    if !(display_scale_factor.is_finite() && display_scale_factor > 0.0) {
        return Err(ThumbnailError::ScaleFailed(format!(
            "invalid display scale factor {display_scale_factor}"
        )));
    }
    if !(requested_max_size.width.is_finite() && requested_max_size.width > 0.0) {
        return Err(ThumbnailError::ScaleFailed(format!(
            "invalid requested width {}",
            requested_max_size.width
        )));
    }

    let target_width = (requested_max_size.width * display_scale_factor).round();
    let aspect_ratio = f64::from(raw_width) / f64::from(raw_height);
    let target_height = (target_width / aspect_ratio).round();

    if target_width < 1.0 || target_height < 1.0 {
        return Err(ThumbnailError::ScaleFailed(format!(
            "target size {target_width}x{target_height} is empty"
        )));
    }
    // Checked in floating point so absurd requests cannot overflow.
    if target_width > f64::from(u32::MAX)
        || target_height > f64::from(u32::MAX)
        || target_width * target_height > max_output_pixels as f64
    {
        return Err(ThumbnailError::ScaleFailed(format!(
            "target size {target_width}x{target_height} exceeds the limit of \
             {max_output_pixels} pixels"
        )));
    }

    Ok((target_width as u32, target_height as u32))
}

/// Premultiply one straight-alpha RGBA pixel.
pub fn premultiply_pixel([red, green, blue, alpha]: [u8; 4]) -> [u8; 4] {
    let scale = |channel: u8| ((u16::from(channel) * u16::from(alpha) + 127) / 255) as u8;
    [scale(red), scale(green), scale(blue), alpha]
}

fn premultiply_in_place(pixels: &mut [u8]) {
    for pixel in pixels.chunks_exact_mut(BYTES_PER_PIXEL) {
        if pixel[3] == u8::MAX {
            continue;
        }
        let premultiplied = premultiply_pixel([pixel[0], pixel[1], pixel[2], pixel[3]]);
        pixel.copy_from_slice(&premultiplied);
    }
}

/// Scale `raw_frame` into an [`OutputFrame`].
///
/// Takes ownership of the raw frame and releases it as soon as the backend
/// has produced the rescaled buffer.
///
/// # Errors
///
/// Returns [`ThumbnailError::ScaleFailed`] for invalid or oversized
/// dimensions, a backend rescale failure, or a buffer of the wrong length.
/// Oversized requests fail before the backend allocates anything. No
/// partially filled buffer is returned.
pub fn scale<B: MediaBackend>(
    backend: &B,
    raw_frame: ResourceHandle<B::Frame>,
    requested_max_size: LogicalSize,
    display_scale_factor: f64,
    max_output_pixels: u64,
) -> Result<OutputFrame, ThumbnailError> {
    let (raw_width, raw_height) = (raw_frame.width(), raw_frame.height());
    let (width, height) = target_dimensions(
        raw_width,
        raw_height,
        requested_max_size,
        display_scale_factor,
        max_output_pixels,
    )?;
    log::debug!("Scaling {raw_width}x{raw_height} -> {width}x{height}");

    let rescaled = backend.rescale(&raw_frame, width, height);
    raw_frame.close();
    let mut pixels = rescaled?;

    let expected = width as usize * height as usize * BYTES_PER_PIXEL;
    if pixels.len() != expected {
        return Err(ThumbnailError::ScaleFailed(format!(
            "rescaled buffer has {} bytes, expected {expected}",
            pixels.len()
        )));
    }

    premultiply_in_place(&mut pixels);
    let image = RgbaImage::from_raw(width, height, pixels).ok_or_else(|| {
        ThumbnailError::ScaleFailed("failed to construct RGBA image from buffer".to_string())
    })?;
    Ok(OutputFrame::from_image(image))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CAP: u64 = DEFAULT_MAX_OUTPUT_PIXELS;

    #[test]
    fn width_driven_by_request_height_by_aspect() {
        let size = LogicalSize::new(128.0, 128.0);
        assert_eq!(target_dimensions(1920, 1080, size, 2.0, CAP).unwrap(), (256, 144));
    }

    #[test]
    fn requested_height_is_ignored() {
        // A portrait source still gets the requested width.
        let size = LogicalSize::new(100.0, 10.0);
        assert_eq!(target_dimensions(480, 640, size, 1.0, CAP).unwrap(), (100, 133));
    }

    #[test]
    fn rejects_degenerate_inputs() {
        let size = LogicalSize::new(100.0, 100.0);
        assert!(target_dimensions(0, 480, size, 1.0, CAP).is_err());
        assert!(target_dimensions(640, 480, size, 0.0, CAP).is_err());
        assert!(target_dimensions(640, 480, size, f64::NAN, CAP).is_err());
        assert!(target_dimensions(640, 480, LogicalSize::new(0.2, 1.0), 1.0, CAP).is_err());
        // Extremely wide source rounds height to zero.
        assert!(target_dimensions(100_000, 1, LogicalSize::new(10.0, 10.0), 1.0, CAP).is_err());
    }

    #[test]
    fn pixel_cap_is_inclusive() {
        let size = LogicalSize::new(100.0, 100.0);
        assert_eq!(target_dimensions(100, 100, size, 1.0, 10_000).unwrap(), (100, 100));
        assert!(matches!(
            target_dimensions(100, 100, size, 1.0, 9_999),
            Err(ThumbnailError::ScaleFailed(_))
        ));
    }

    #[test]
    fn premultiply_scales_color_by_alpha() {
        assert_eq!(premultiply_pixel([200, 100, 50, 128]), [100, 50, 25, 128]);
        assert_eq!(premultiply_pixel([200, 100, 50, 255]), [200, 100, 50, 255]);
        assert_eq!(premultiply_pixel([200, 100, 50, 0]), [0, 0, 0, 0]);
    }

    #[test]
    fn in_place_premultiply_touches_every_pixel() {
        let mut pixels = vec![255, 255, 255, 51, 10, 20, 30, 255];
        premultiply_in_place(&mut pixels);
        assert_eq!(pixels, vec![51, 51, 51, 51, 10, 20, 30, 255]);
    }
}
