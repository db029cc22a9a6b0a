use crate::types::BoundingBox;
use failure::Error;
use image::{imageops, DynamicImage, ImageOutputFormat, RgbImage};
use std::fmt;
use std::sync::Arc;

/// A decoded video frame. The pixels are shared and never mutated; crops
/// are copied out into new buffers.
#[derive(Clone)]
pub struct Frame {
    ordinal: u64,
    image: Arc<RgbImage>,
}

impl Frame {
    /// `ordinal` is the 1-based position of the frame in its video.
    pub fn new(ordinal: u64, image: RgbImage) -> Self {
        Frame {
            ordinal,
            image: Arc::new(image),
        }
    }

    pub fn ordinal(&self) -> u64 {
        self.ordinal
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    /// Copies out the region under `bbox`, clamped to the frame. Returns
    /// `None` when nothing of the box lies inside the frame.
    pub fn crop(&self, bbox: &BoundingBox) -> Option<RgbImage> {
        let x0 = bbox.x_min.min(self.width());
        let y0 = bbox.y_min.min(self.height());
        let x1 = bbox.x_max.min(self.width());
        let y1 = bbox.y_max.min(self.height());
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(imageops::crop_imm(self.image.as_ref(), x0, y0, x1 - x0, y1 - y0).to_image())
    }

    pub fn to_jpeg(&self, quality: u8) -> Result<Vec<u8>, Error> {
        encode_jpeg(&self.image, quality)
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Frame(#{} {}x{})",
            self.ordinal,
            self.width(),
            self.height()
        )
    }
}

/// Encodes an image the way the inference server expects uploads.
pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, Error> {
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(image.clone())
        .write_to(&mut bytes, ImageOutputFormat::Jpeg(quality))?;
    Ok(bytes)
}
