//! Photo normalization before upload to the emotion service.
//!
//! Decode, rotate upright from the EXIF orientation tag, shrink so the longer
//! side fits the policy limit, then JPEG re-encode into a fresh buffer. The
//! caller overwrites the original file only once this has succeeded.

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageDecoder, ImageReader};
use std::io::Cursor;
use thiserror::Error;

const DEFAULT_MAX_DIMENSION: u32 = 2000;
const DEFAULT_JPEG_QUALITY: u8 = 90;
/// Upload ceiling enforced by the emotion service.
const DEFAULT_MAX_BYTES: usize = 4 * 1024 * 1024;
const DEFAULT_MIN_QUALITY: u8 = 50;
const QUALITY_STEP: u8 = 10;

#[derive(Error, Debug)]
pub enum PostProcessError {
    #[error("failed to decode photo: {0}")]
    Decode(#[source] image::ImageError),
    #[error("failed to encode photo: {0}")]
    Encode(#[source] image::ImageError),
    #[error("encoded photo is {size} bytes, over the {limit}-byte limit even at quality {quality}")]
    TooLarge {
        size: usize,
        limit: usize,
        quality: u8,
    },
    #[error("invalid post-processing policy: {0}")]
    InvalidPolicy(String),
}

/// Tunables for [`ImagePostProcessor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PostProcessPolicy {
    /// Longest allowed side, in pixels.
    pub max_dimension: u32,
    /// JPEG quality for the first encode attempt (1–100).
    pub jpeg_quality: u8,
    /// Size ceiling for the encoded file. Quality is stepped down to meet it.
    pub max_bytes: usize,
    /// Lowest quality tried before giving up on `max_bytes`.
    pub min_quality: u8,
}

impl Default for PostProcessPolicy {
    fn default() -> Self {
        Self {
            max_dimension: DEFAULT_MAX_DIMENSION,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            max_bytes: DEFAULT_MAX_BYTES,
            min_quality: DEFAULT_MIN_QUALITY,
        }
    }
}

impl PostProcessPolicy {
    pub fn validate(&self) -> Result<(), PostProcessError> {
        if self.max_dimension == 0 {
            return Err(PostProcessError::InvalidPolicy("max_dimension must be > 0".into()));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(PostProcessError::InvalidPolicy(format!(
                "jpeg_quality {} not in 1..=100",
                self.jpeg_quality
            )));
        }
        if self.min_quality == 0 || self.min_quality > self.jpeg_quality {
            return Err(PostProcessError::InvalidPolicy(format!(
                "min_quality {} must be in 1..={}",
                self.min_quality, self.jpeg_quality
            )));
        }
        Ok(())
    }
}

/// Encoded result of [`ImagePostProcessor::process`].
#[derive(Debug, Clone)]
pub struct ProcessedImage {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub quality: u8,
}

/// Deterministic, CPU-bound photo transform. Run it off the async executor.
#[derive(Debug, Clone, Default)]
pub struct ImagePostProcessor {
    policy: PostProcessPolicy,
}

impl ImagePostProcessor {
    pub fn new(policy: PostProcessPolicy) -> Result<Self, PostProcessError> {
        policy.validate()?;
        Ok(Self { policy })
    }

    pub fn policy(&self) -> &PostProcessPolicy {
        &self.policy
    }

    /// Transform raw photo bytes into an upright, bounded JPEG.
    pub fn process(&self, raw: &[u8]) -> Result<ProcessedImage, PostProcessError> {
        let image = decode_upright(raw)?;
        let (src_w, src_h) = (image.width(), image.height());
        let (width, height) = scaled_dimensions(src_w, src_h, self.policy.max_dimension);

        let image = if (width, height) != (src_w, src_h) {
            image.resize_exact(width, height, FilterType::Triangle)
        } else {
            image
        };
        // JPEG has no alpha channel.
        let rgb = DynamicImage::ImageRgb8(image.to_rgb8());

        let mut quality = self.policy.jpeg_quality;
        loop {
            let bytes = encode_jpeg(&rgb, quality)?;
            tracing::debug!(
                src_w,
                src_h,
                width,
                height,
                quality,
                size = bytes.len(),
                "photo re-encoded"
            );

            if bytes.len() <= self.policy.max_bytes {
                return Ok(ProcessedImage {
                    bytes,
                    width,
                    height,
                    quality,
                });
            }

            let next = quality.saturating_sub(QUALITY_STEP);
            if next < self.policy.min_quality || next == 0 {
                return Err(PostProcessError::TooLarge {
                    size: bytes.len(),
                    limit: self.policy.max_bytes,
                    quality,
                });
            }
            quality = next;
        }
    }
}

/// Decode and apply the embedded orientation so the pixels are upright.
fn decode_upright(raw: &[u8]) -> Result<DynamicImage, PostProcessError> {
    let mut decoder = ImageReader::new(Cursor::new(raw))
        .with_guessed_format()
        .map_err(|e| PostProcessError::Decode(image::ImageError::IoError(e)))?
        .into_decoder()
        .map_err(PostProcessError::Decode)?;
    let orientation = decoder.orientation().map_err(PostProcessError::Decode)?;
    let mut image = DynamicImage::from_decoder(decoder).map_err(PostProcessError::Decode)?;
    image.apply_orientation(orientation);
    Ok(image)
}

fn encode_jpeg(image: &DynamicImage, quality: u8) -> Result<Vec<u8>, PostProcessError> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality)
        .encode_image(image)
        .map_err(PostProcessError::Encode)?;
    Ok(buf)
}

/// Target size with the longer side capped at `max`, aspect ratio preserved.
///
/// The shorter side is `short * max / long` in integer arithmetic, truncated.
/// Images already within the limit are left alone.
pub fn scaled_dimensions(width: u32, height: u32, max: u32) -> (u32, u32) {
    let long = width.max(height);
    if long <= max || long == 0 {
        return (width, height);
    }
    let scale = |short: u32| -> u32 {
        let scaled = short as u64 * max as u64 / long as u64;
        (scaled as u32).max(1)
    };
    if width >= height {
        (max, scale(height))
    } else {
        (scale(width), max)
    }
}
