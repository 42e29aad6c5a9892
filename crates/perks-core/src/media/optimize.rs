//! Image optimization: raw imported bytes to the native representation.

use std::io::Cursor;

use image::{codecs::jpeg::JpegEncoder, GenericImageView};

use crate::error::{Error, Result};

/// Configuration for the raw-to-native optimization pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptimizeOptions {
    /// Maximum output width in pixels.
    pub max_width: u32,
    /// Maximum output height in pixels.
    pub max_height: u32,
    /// JPEG quality of the native copy.
    pub jpeg_quality: u8,
}

impl Default for OptimizeOptions {
    fn default() -> Self {
        Self {
            max_width: 1024,
            max_height: 1024,
            jpeg_quality: 85,
        }
    }
}

/// Produce the optimized native bytes for raw imported image bytes.
///
/// The image is resized to fit within `max_width` x `max_height` while
/// preserving aspect ratio; images already within bounds are not upscaled.
/// Failures leave the caller's attachment untouched (fail-closed).
pub fn optimize_image(source_bytes: &[u8], options: OptimizeOptions) -> Result<Vec<u8>> {
    if source_bytes.is_empty() {
        return Err(Error::Validation(
            "Optimization source bytes cannot be empty".to_string(),
        ));
    }
    if options.max_width == 0 || options.max_height == 0 {
        return Err(Error::Validation(
            "Optimization max dimensions must be greater than zero".to_string(),
        ));
    }

    let source = image::load_from_memory(source_bytes).map_err(|error| {
        Error::Validation(format!("Failed to decode source image: {error}"))
    })?;

    let (source_width, source_height) = source.dimensions();
    let resized = if source_width <= options.max_width && source_height <= options.max_height {
        source
    } else {
        source.thumbnail(options.max_width, options.max_height)
    };

    let mut bytes = Vec::new();
    let encoder = JpegEncoder::new_with_quality(Cursor::new(&mut bytes), options.jpeg_quality);
    resized
        .into_rgb8()
        .write_with_encoder(encoder)
        .map_err(|error| Error::Validation(format!("Failed to encode native image: {error}")))?;

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, RgbImage};

    fn png_fixture(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        });
        let mut bytes = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn oversized_image_is_resized_within_bounds() {
        let source = png_fixture(64, 32);
        let options = OptimizeOptions {
            max_width: 16,
            max_height: 16,
            jpeg_quality: 80,
        };
        let native = optimize_image(&source, options).unwrap();
        let decoded = image::load_from_memory(&native).unwrap();
        let (width, height) = decoded.dimensions();
        assert!(width <= 16 && height <= 16);
    }

    #[test]
    fn small_image_is_not_upscaled() {
        let source = png_fixture(8, 8);
        let native = optimize_image(&source, OptimizeOptions::default()).unwrap();
        let decoded = image::load_from_memory(&native).unwrap();
        assert_eq!(decoded.dimensions(), (8, 8));
    }

    #[test]
    fn invalid_input_is_rejected() {
        assert!(optimize_image(&[], OptimizeOptions::default()).is_err());
        assert!(optimize_image(b"not an image", OptimizeOptions::default()).is_err());

        let zero = OptimizeOptions {
            max_width: 0,
            max_height: 16,
            jpeg_quality: 80,
        };
        assert!(optimize_image(&png_fixture(8, 8), zero).is_err());
    }
}
