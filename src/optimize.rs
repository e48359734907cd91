//! Image optimisation for downloaded slide images.
//!
//! Slide exports are often full-resolution screenshots; Anki only needs
//! something that fits a phone screen. [`JpegOptimizer`] caps the longest
//! edge and re-encodes in the source format. Callers treat failures as
//! "keep the original bytes".

use crate::config::ServiceConfig;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;
use tracing::debug;

/// `(imageBytes) -> reduced imageBytes`, best-effort.
pub trait ImageOptimizer: Send + Sync {
    fn optimize(&self, bytes: &[u8]) -> Result<Vec<u8>, image::ImageError>;
}

/// Downscale-and-re-encode optimiser for JPEG and PNG input.
#[derive(Debug, Clone, Copy)]
pub struct JpegOptimizer {
    pub max_dimension: u32,
    pub quality: u8,
}

impl JpegOptimizer {
    pub fn new(max_dimension: u32, quality: u8) -> Self {
        Self {
            max_dimension,
            quality: quality.clamp(1, 100),
        }
    }

    pub fn from_config(config: &ServiceConfig) -> Self {
        Self::new(config.max_image_dimension, config.jpeg_quality)
    }
}

impl ImageOptimizer for JpegOptimizer {
    fn optimize(&self, bytes: &[u8]) -> Result<Vec<u8>, image::ImageError> {
        let format = image::guess_format(bytes)?;
        if !matches!(format, ImageFormat::Jpeg | ImageFormat::Png) {
            return Ok(bytes.to_vec());
        }

        let img = image::load_from_memory_with_format(bytes, format)?;
        let (w, h) = (img.width(), img.height());
        let img = if w.max(h) > self.max_dimension {
            img.resize(self.max_dimension, self.max_dimension, FilterType::Lanczos3)
        } else {
            img
        };

        let mut out = Vec::new();
        match format {
            ImageFormat::Jpeg => {
                let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
                rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut out, self.quality))?;
            }
            _ => img.write_to(&mut Cursor::new(&mut out), ImageFormat::Png)?,
        }

        if out.len() >= bytes.len() {
            debug!("Re-encoding did not shrink image ({} bytes); keeping original", bytes.len());
            return Ok(bytes.to_vec());
        }
        debug!(
            "Optimised {}x{} {:?}: {} → {} bytes",
            w,
            h,
            format,
            bytes.len(),
            out.len()
        );
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn jpeg(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
        }));
        let mut buf = Vec::new();
        img.write_with_encoder(JpegEncoder::new_with_quality(&mut buf, 100))
            .unwrap();
        buf
    }

    #[test]
    fn large_image_is_downscaled() {
        let input = jpeg(800, 400);
        let out = JpegOptimizer::new(200, 70).optimize(&input).unwrap();
        let decoded = image::load_from_memory(&out).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (200, 100));
        assert!(out.len() < input.len());
    }

    #[test]
    fn never_grows_output() {
        let input = jpeg(16, 16);
        let out = JpegOptimizer::new(1280, 100).optimize(&input).unwrap();
        assert!(out.len() <= input.len());
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(JpegOptimizer::new(100, 80).optimize(b"not an image").is_err());
    }
}
