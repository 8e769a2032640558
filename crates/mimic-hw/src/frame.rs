//! Frame type and pixel conversion: YUYV, GREY and Y16 to RGB, dark detection.

use image::RgbImage;

/// A captured RGB camera frame.
#[derive(Clone)]
pub struct Frame {
    /// Packed RGB8 pixel data (width * height * 3 bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub sequence: u32,
}

impl Frame {
    /// Average luma (0.0–255.0).
    pub fn avg_brightness(&self) -> f32 {
        let luma = rgb_to_luma(&self.data);
        if luma.is_empty() {
            return 0.0;
        }
        luma.iter().map(|&b| b as f32).sum::<f32>() / luma.len() as f32
    }

    pub fn into_image(self) -> Result<RgbImage, FrameError> {
        let expected = (self.width * self.height * 3) as usize;
        let actual = self.data.len();
        RgbImage::from_raw(self.width, self.height, self.data)
            .ok_or(FrameError::InvalidLength { expected, actual })
    }
}

/// Convert packed YUYV (4:2:2) to RGB8 using BT.601 studio-swing coefficients.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V]; both pixels share U/V.
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }

    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    for chunk in yuyv[..expected].chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
        rgb.extend_from_slice(&ycbcr_to_rgb(y0, u, v));
        rgb.extend_from_slice(&ycbcr_to_rgb(y1, u, v));
    }
    Ok(rgb)
}

fn ycbcr_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    let clamp = |x: i32| ((x + 128) >> 8).clamp(0, 255) as u8;
    [
        clamp(298 * c + 409 * e),
        clamp(298 * c - 100 * d - 208 * e),
        clamp(298 * c + 516 * d),
    ]
}

/// Expand 8-bit grayscale to RGB8.
pub fn grey_to_rgb(gray: &[u8]) -> Vec<u8> {
    gray.iter().flat_map(|&g| [g, g, g]).collect()
}

/// Downscale 16-bit little-endian grayscale to 8-bit by keeping the high byte.
pub fn y16_to_grey(buf: &[u8], pixels: usize) -> Result<Vec<u8>, FrameError> {
    let expected = pixels * 2;
    if buf.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: buf.len(),
        });
    }
    Ok(buf[..expected].chunks_exact(2).map(|px| px[1]).collect())
}

/// ITU-R BT.601 luma for packed RGB8 data.
pub fn rgb_to_luma(rgb: &[u8]) -> Vec<u8> {
    rgb.chunks_exact(3)
        .map(|px| ((77 * px[0] as u32 + 150 * px[1] as u32 + 29 * px[2] as u32) >> 8) as u8)
        .collect()
}

/// Check if a frame is dark.
///
/// Returns true if more than `threshold_pct` of pixels have luma below 32.
pub fn is_dark_frame(luma: &[u8], threshold_pct: f32) -> bool {
    if luma.is_empty() {
        return true;
    }
    let dark_count = luma.iter().filter(|&&p| p < 32).count();
    (dark_count as f32 / luma.len() as f32) > threshold_pct
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid frame buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}
