//! Image preprocessing: grayscale + hard threshold before OCR.
//!
//! Scans carry paper texture, JPEG noise and faint bleed-through from the
//! back of the sheet. Forcing every pixel to pure black or pure white at a
//! fixed luminance cutoff removes most of it for the common case of dark text
//! on a light background. The cutoff is not adaptive: inverted or
//! low-contrast pages come out mostly black or mostly white.

use image::{DynamicImage, GrayImage};
use std::io::Cursor;
use thiserror::Error;

/// Why an image could not be binarised.
#[derive(Debug, Error)]
pub enum PreprocessError {
    /// The rendered bitmap has no pixels.
    #[error("image has zero size ({width}x{height})")]
    EmptyImage { width: u32, height: u32 },
}

/// A single-channel image containing only the values 0 and 255.
#[derive(Debug, Clone)]
pub struct PreprocessedImage {
    image: GrayImage,
}

impl PreprocessedImage {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn as_gray(&self) -> &GrayImage {
        &self.image
    }

    pub fn into_gray(self) -> GrayImage {
        self.image
    }

    /// True when no pixel is black, i.e. nothing for OCR to read.
    pub fn is_blank(&self) -> bool {
        self.image.pixels().all(|p| p.0[0] == u8::MAX)
    }

    /// Lossless PNG encoding, the format handed to the OCR binary.
    pub fn to_png(&self) -> Result<Vec<u8>, image::ImageError> {
        let mut buf = Vec::new();
        self.image
            .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
        Ok(buf)
    }
}

/// Convert `image` to grayscale and binarise it at `threshold`.
///
/// Pixels with luminance below `threshold` become 0, all others 255.
pub fn preprocess(image: &DynamicImage, threshold: u8) -> Result<PreprocessedImage, PreprocessError> {
    if image.width() == 0 || image.height() == 0 {
        return Err(PreprocessError::EmptyImage {
            width: image.width(),
            height: image.height(),
        });
    }

    let mut gray = image.to_luma8();
    binarise(&mut gray, threshold);
    Ok(PreprocessedImage { image: gray })
}

fn binarise(gray: &mut GrayImage, threshold: u8) {
    for pixel in gray.pixels_mut() {
        pixel.0[0] = if pixel.0[0] < threshold { 0 } else { u8::MAX };
    }
}
