//! Image binarization: base64 image in, base64 PNG out.
//!
//! Implements Niblack local thresholding over the grayscale image:
//! `T(x, y) = m(x, y) - k * s(x, y)` where `m` and `s` are the mean and
//! standard deviation of the window centred on the pixel. Both statistics
//! are computed from integral images so the cost is independent of the
//! window size.

use std::io::Cursor;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::GrayImage;

/// Side length of the local window.
const WINDOW: u32 = 15;

/// Niblack `k` coefficient.
const K: f64 = 0.2;

/// Algorithms this module can run.
pub const SUPPORTED_ALGORITHMS: &[&str] = &["niblack"];

/// Errors from the binarization step.
#[derive(Debug, thiserror::Error)]
pub enum BinarizeError {
    /// The payload is empty or is not valid base64 after normalization.
    #[error("invalid base64 payload: {0}")]
    InvalidBase64(String),

    /// The decoded bytes are not a readable image.
    #[error("invalid image data: {0}")]
    InvalidImage(String),

    /// The requested algorithm is not in [`SUPPORTED_ALGORITHMS`].
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Re-encoding the binarized image failed.
    #[error("failed to encode result: {0}")]
    Encode(String),
}

/// Binarize a base64-encoded image, returning the result as base64 PNG.
///
/// Accepts the payload shapes clients actually send: an optional
/// `data:image/...;base64,` prefix, surrounding whitespace, and missing
/// `=` padding are all tolerated. The algorithm name is matched
/// case-insensitively.
pub fn binarize(image_b64: &str, algorithm: &str) -> Result<String, BinarizeError> {
    if !SUPPORTED_ALGORITHMS
        .iter()
        .any(|a| a.eq_ignore_ascii_case(algorithm))
    {
        return Err(BinarizeError::UnsupportedAlgorithm(algorithm.to_string()));
    }

    let normalized = normalize_base64(image_b64)?;
    let bytes = BASE64
        .decode(normalized.as_bytes())
        .map_err(|e| BinarizeError::InvalidBase64(e.to_string()))?;

    let gray = image::load_from_memory(&bytes)
        .map_err(|e| BinarizeError::InvalidImage(e.to_string()))?
        .to_luma8();

    let binarized = niblack(&gray);

    let mut png = Vec::new();
    image::DynamicImage::ImageLuma8(binarized)
        .write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
        .map_err(|e| BinarizeError::Encode(e.to_string()))?;

    Ok(BASE64.encode(&png))
}

/// Strip data-URI prefixes, trim whitespace, and repair missing padding.
fn normalize_base64(input: &str) -> Result<String, BinarizeError> {
    let mut payload = input.trim();
    if payload.starts_with("data:image") {
        payload = payload
            .split_once(',')
            .map(|(_, rest)| rest)
            .unwrap_or(payload);
    }
    let mut payload: String = payload.split_whitespace().collect();

    if payload.is_empty() {
        return Err(BinarizeError::InvalidBase64("empty payload".to_string()));
    }

    let missing = (4 - payload.len() % 4) % 4;
    payload.extend(std::iter::repeat('=').take(missing));
    Ok(payload)
}

/// Apply Niblack thresholding to a grayscale image.
fn niblack(gray: &GrayImage) -> GrayImage {
    let (width, height) = gray.dimensions();
    let (sums, squares) = integral_images(gray);
    let half = (WINDOW / 2) as i64;

    let stride = width as usize + 1;
    let area_sum = |x0: usize, y0: usize, x1: usize, y1: usize, table: &[u64]| -> u64 {
        table[y1 * stride + x1] + table[y0 * stride + x0]
            - table[y0 * stride + x1]
            - table[y1 * stride + x0]
    };

    GrayImage::from_fn(width, height, |x, y| {
        // Clamp the window at the borders.
        let x0 = (x as i64 - half).max(0) as usize;
        let y0 = (y as i64 - half).max(0) as usize;
        let x1 = ((x as i64 + half + 1).min(width as i64)) as usize;
        let y1 = ((y as i64 + half + 1).min(height as i64)) as usize;
        let count = ((x1 - x0) * (y1 - y0)) as f64;

        let sum = area_sum(x0, y0, x1, y1, &sums) as f64;
        let sum_sq = area_sum(x0, y0, x1, y1, &squares) as f64;

        let mean = sum / count;
        let variance = (sum_sq / count - mean * mean).max(0.0);
        let threshold = mean - K * variance.sqrt();

        let value = gray.get_pixel(x, y).0[0] as f64;
        image::Luma([if value > threshold { 255u8 } else { 0u8 }])
    })
}

/// Build integral images of pixel values and squared values, with a
/// zeroed first row and column so window sums need no edge cases.
fn integral_images(gray: &GrayImage) -> (Vec<u64>, Vec<u64>) {
    let (width, height) = gray.dimensions();
    let stride = width as usize + 1;
    let mut sums = vec![0u64; stride * (height as usize + 1)];
    let mut squares = vec![0u64; stride * (height as usize + 1)];

    for y in 0..height as usize {
        let mut row_sum = 0u64;
        let mut row_sq = 0u64;
        for x in 0..width as usize {
            let v = gray.get_pixel(x as u32, y as u32).0[0] as u64;
            row_sum += v;
            row_sq += v * v;
            sums[(y + 1) * stride + x + 1] = sums[y * stride + x + 1] + row_sum;
            squares[(y + 1) * stride + x + 1] = squares[y * stride + x + 1] + row_sq;
        }
    }

    (sums, squares)
}
