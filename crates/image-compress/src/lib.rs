//! Re-encodes image bytes below a target byte budget.
//!
//! Used for two things: shrinking user-supplied and cover reference images
//! to 200KB before they're handed back to a generator as a reference, and
//! producing the ≤ 50KB JPEG thumbnail that sits alongside every uploaded
//! original.

use std::io::Cursor;

use image::{codecs::jpeg::JpegEncoder, ImageReader};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("failed to encode image: {0}")]
    Encode(String),
}

/// JPEG quality levels tried in order until the encoded size fits the
/// budget. Mirrors the "lossy if needed" requirement without an unbounded
/// search: once we hit the floor we return the smallest encoding we found.
const QUALITY_STEPS: &[u8] = &[90, 80, 70, 60, 50, 40, 30, 20, 10];

/// Re-encode `bytes` as a JPEG no larger than `max_kb` kilobytes.
///
/// If the source decodes to something already small enough at the highest
/// quality step, that's what's returned — this never upsizes or pads.
pub fn compress_to_budget(bytes: &[u8], max_kb: u32) -> Result<Vec<u8>, ImageError> {
    let budget = max_kb as usize * 1024;
    let image = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()?
        .decode()?;
    let rgb = image.to_rgb8();

    let mut smallest = encode_jpeg(&rgb, *QUALITY_STEPS.last().unwrap())?;
    for &quality in QUALITY_STEPS {
        let encoded = encode_jpeg(&rgb, quality)?;
        if encoded.len() <= budget {
            return Ok(encoded);
        }
        if encoded.len() < smallest.len() {
            smallest = encoded;
        }
    }

    tracing::warn!(
        bytes = smallest.len(),
        budget,
        "could not compress image below budget even at lowest quality step"
    );
    Ok(smallest)
}

fn encode_jpeg(rgb: &image::RgbImage, quality: u8) -> Result<Vec<u8>, ImageError> {
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality)
        .encode(rgb.as_raw(), rgb.width(), rgb.height(), image::ColorType::Rgb8)
        .map_err(|e| ImageError::Encode(e.to_string()))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};

    fn sample_png(width: u32, height: u32) -> Vec<u8> {
        let buf: ImageBuffer<Rgb<u8>, Vec<u8>> =
            ImageBuffer::from_fn(width, height, |x, y| Rgb([(x % 255) as u8, (y % 255) as u8, 128]));
        let mut out = Vec::new();
        buf.write_to(&mut Cursor::new(&mut out), image::ImageFormat::Png)
            .unwrap();
        out
    }

    #[test]
    fn compresses_below_budget() {
        let png = sample_png(800, 800);
        let compressed = compress_to_budget(&png, 50).unwrap();
        assert!(compressed.len() <= 50 * 1024);
    }

    #[test]
    fn small_image_still_encodes() {
        let png = sample_png(16, 16);
        let compressed = compress_to_budget(&png, 200).unwrap();
        assert!(!compressed.is_empty());
    }
}
