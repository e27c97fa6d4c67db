//! Thumbnail packaging and deferred drawing.
//!
//! A successful extraction hands the host a [`DeferredReply`]: the scaled
//! frame plus the logical size it should occupy. The host draws it whenever
//! it chooses by passing a [`DrawSurface`]. The frame buffer is released
//! exactly once, right after drawing, or when the reply is dropped without
//! ever being drawn.
//!
//! # Example
//!
//! ```no_run
//! use stillframe::{
//!     ExtractionRequest, ImageSurface, LogicalSize, ThumbnailError, ThumbnailExtractor,
//! };
//!
//! # async fn example() -> Result<(), ThumbnailError> {
//! let extractor = ThumbnailExtractor::new(Default::default());
//! let request = ExtractionRequest::new("input.mp4", LogicalSize::new(128.0, 128.0), 2.0);
//! let reply = extractor.extract(request).await?;
//! let mut surface = ImageSurface::for_reply(&reply, 2.0);
//! reply.draw(&mut surface)?;
//! surface.into_image().save("thumb.png").map_err(|e| ThumbnailError::DrawFailed(e.to_string()))?;
//! # Ok(())
//! # }
//! ```

use std::fmt::{Debug, Formatter, Result as FmtResult};

use image::{RgbaImage, imageops::FilterType};

use crate::{
    error::ThumbnailError, request::LogicalSize, resource::ResourceHandle, scaler::OutputFrame,
};

/// A graphics context the host draws replies into.
pub trait DrawSurface {
    /// Draw `frame` into a rectangle of `logical_size` points at the origin.
    fn draw_frame(
        &mut self,
        frame: &OutputFrame,
        logical_size: LogicalSize,
    ) -> Result<(), ThumbnailError>;
}

/// A lazily drawn thumbnail.
pub struct DeferredReply {
    frame: Option<ResourceHandle<OutputFrame>>,
    logical_size: LogicalSize,
    pixel_size: (u32, u32),
}

/// Wrap `frame` for deferred drawing on a display with
/// `display_scale_factor` pixels per point.
///
/// The logical size is the pixel size divided by the scale factor.
pub fn package(frame: ResourceHandle<OutputFrame>, display_scale_factor: f64) -> DeferredReply {
    let pixel_size = (frame.width(), frame.height());
    let logical_size = LogicalSize::new(
        f64::from(pixel_size.0) / display_scale_factor,
        f64::from(pixel_size.1) / display_scale_factor,
    );
    DeferredReply {
        frame: Some(frame),
        logical_size,
        pixel_size,
    }
}

impl DeferredReply {
    /// Size the thumbnail occupies, in points.
    pub fn logical_size(&self) -> LogicalSize {
        self.logical_size
    }

    /// Size of the pixel buffer, `(width, height)`.
    pub fn pixel_size(&self) -> (u32, u32) {
        self.pixel_size
    }

    /// Borrow the frame without drawing it.
    pub fn frame(&self) -> Option<&OutputFrame> {
        self.frame.as_deref()
    }

    /// Draw the thumbnail into `surface`, then release the pixel buffer.
    ///
    /// The buffer is released even if the surface reports an error.
    pub fn draw<S: DrawSurface + ?Sized>(mut self, surface: &mut S) -> Result<(), ThumbnailError> {
        let frame = self
            .frame
            .take()
            .ok_or_else(|| ThumbnailError::DrawFailed("reply already drawn".to_string()))?;
        let result = surface.draw_frame(&frame, self.logical_size);
        frame.close();
        result
    }
}

impl Debug for DeferredReply {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("DeferredReply")
            .field("logical_size", &self.logical_size)
            .field("pixel_size", &self.pixel_size)
            .field("drawn", &self.frame.is_none())
            .finish()
    }
}

/// A CPU surface backed by an RGBA image.
///
/// Logical points map to pixels through the surface's own backing scale.
/// Frames whose size differs from the destination rectangle are resized
/// with the bilinear kernel.
#[derive(Debug, Clone)]
pub struct ImageSurface {
    canvas: RgbaImage,
    backing_scale: f64,
}

impl ImageSurface {
    /// A transparent surface of `width` × `height` pixels.
    pub fn new(width: u32, height: u32, backing_scale: f64) -> Self {
        Self {
            canvas: RgbaImage::new(width, height),
            backing_scale,
        }
    }

    /// A surface exactly large enough for `reply` at `backing_scale`.
    pub fn for_reply(reply: &DeferredReply, backing_scale: f64) -> Self {
        let size = reply.logical_size();
        Self::new(
            (size.width * backing_scale).round().max(1.0) as u32,
            (size.height * backing_scale).round().max(1.0) as u32,
            backing_scale,
        )
    }

    /// The drawn canvas.
    pub fn image(&self) -> &RgbaImage {
        &self.canvas
    }

    /// Consume the surface and return the canvas.
    pub fn into_image(self) -> RgbaImage {
        self.canvas
    }
}

impl DrawSurface for ImageSurface {
    fn draw_frame(
        &mut self,
        frame: &OutputFrame,
        logical_size: LogicalSize,
    ) -> Result<(), ThumbnailError> {
        let width = (logical_size.width * self.backing_scale).round();
        let height = (logical_size.height * self.backing_scale).round();
        if !(width >= 1.0 && height >= 1.0) {
            return Err(ThumbnailError::DrawFailed(format!(
                "destination rectangle {width}x{height} is empty"
            )));
        }
        let (width, height) = (width as u32, height as u32);

        if (width, height) == (frame.width(), frame.height()) {
            image::imageops::replace(&mut self.canvas, frame.image(), 0, 0);
        } else {
            let resized =
                image::imageops::resize(frame.image(), width, height, FilterType::Triangle);
            image::imageops::replace(&mut self.canvas, &resized, 0, 0);
        }
        Ok(())
    }
}
