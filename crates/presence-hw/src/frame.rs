//! RGB frame type, pixel format conversion, annotation and JPEG encoding.

use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageBuffer, Rgb, RgbImage};

/// A captured camera frame in packed 8-bit RGB.
#[derive(Clone)]
pub struct Frame {
    /// RGB pixel data (width * height * 3 bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: std::time::Instant,
    pub sequence: u32,
    pub is_dark: bool,
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("sequence", &self.sequence)
            .field("is_dark", &self.is_dark)
            .finish_non_exhaustive()
    }
}

impl Frame {
    /// Build a frame from packed RGB bytes, checking the buffer size.
    pub fn from_rgb(
        data: Vec<u8>,
        width: u32,
        height: u32,
        sequence: u32,
    ) -> Result<Self, FrameError> {
        let expected = width as usize * height as usize * 3;
        if data.len() != expected {
            return Err(FrameError::InvalidLength {
                expected,
                actual: data.len(),
            });
        }
        let is_dark = is_dark_frame(&data, DARK_FRAME_THRESHOLD);
        Ok(Self {
            data,
            width,
            height,
            timestamp: std::time::Instant::now(),
            sequence,
            is_dark,
        })
    }

    /// Average luma (0.0–255.0).
    pub fn avg_brightness(&self) -> f32 {
        if self.data.len() < 3 {
            return 0.0;
        }
        let pixels = self.data.len() / 3;
        self.data.chunks_exact(3).map(luma).sum::<f32>() / pixels as f32
    }

    /// Draw an axis-aligned rectangle outline, clipped to the frame.
    pub fn draw_rect(
        &mut self,
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        color: [u8; 3],
        thickness: u32,
    ) {
        if self.width == 0 || self.height == 0 {
            return;
        }
        let max_x = (self.width - 1) as i64;
        let max_y = (self.height - 1) as i64;
        let x0 = (x.round() as i64).clamp(0, max_x);
        let y0 = (y.round() as i64).clamp(0, max_y);
        let x1 = ((x + width).round() as i64).clamp(0, max_x);
        let y1 = ((y + height).round() as i64).clamp(0, max_y);
        let t = thickness.max(1) as i64;

        for py in y0..=y1 {
            for px in x0..=x1 {
                let on_edge = px < x0 + t || px > x1 - t || py < y0 + t || py > y1 - t;
                if on_edge {
                    let idx = (py as usize * self.width as usize + px as usize) * 3;
                    self.data[idx..idx + 3].copy_from_slice(&color);
                }
            }
        }
    }

    /// Copy into an owned `image` buffer.
    pub fn to_image(&self) -> Result<RgbImage, FrameError> {
        ImageBuffer::<Rgb<u8>, Vec<u8>>::from_raw(self.width, self.height, self.data.clone()).ok_or(
            FrameError::InvalidLength {
                expected: self.width as usize * self.height as usize * 3,
                actual: self.data.len(),
            },
        )
    }

    /// Encode as JPEG at the given quality (1–100).
    pub fn encode_jpeg(&self, quality: u8) -> Result<Vec<u8>, FrameError> {
        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100))
            .encode(&self.data, self.width, self.height, ExtendedColorType::Rgb8)
            .map_err(|e| FrameError::Encode(e.to_string()))?;
        Ok(out)
    }
}

/// Fraction of near-black pixels above which a frame counts as dark.
pub const DARK_FRAME_THRESHOLD: f32 = 0.95;

fn luma(px: &[u8]) -> f32 {
    0.299 * px[0] as f32 + 0.587 * px[1] as f32 + 0.114 * px[2] as f32
}

/// True if more than `threshold_pct` of pixels have luma below 32.
pub fn is_dark_frame(rgb: &[u8], threshold_pct: f32) -> bool {
    let pixels = rgb.len() / 3;
    if pixels == 0 {
        return true;
    }
    let dark = rgb.chunks_exact(3).filter(|px| luma(px) < 32.0).count();
    (dark as f32 / pixels as f32) > threshold_pct
}

/// Convert packed YUYV (4:2:2) to RGB using BT.601 coefficients.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V].
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = width as usize * height as usize * 2;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }

    let mut rgb = Vec::with_capacity(width as usize * height as usize * 3);
    for chunk in yuyv[..expected].chunks_exact(4) {
        let u = chunk[1] as f32 - 128.0;
        let v = chunk[3] as f32 - 128.0;
        for y in [chunk[0], chunk[2]] {
            let y = y as f32;
            rgb.push((y + 1.402 * v).round().clamp(0.0, 255.0) as u8);
            rgb.push((y - 0.344_136 * u - 0.714_136 * v).round().clamp(0.0, 255.0) as u8);
            rgb.push((y + 1.772 * u).round().clamp(0.0, 255.0) as u8);
        }
    }
    Ok(rgb)
}

/// Replicate an 8-bit grayscale buffer into RGB.
pub fn grey_to_rgb(grey: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let pixels = width as usize * height as usize;
    if grey.len() < pixels {
        return Err(FrameError::InvalidLength {
            expected: pixels,
            actual: grey.len(),
        });
    }
    Ok(grey[..pixels].iter().flat_map(|&g| [g, g, g]).collect())
}

/// Decode a Motion-JPEG buffer to RGB, checking it matches the negotiated size.
pub fn mjpeg_to_rgb(jpeg: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let decoded = image::load_from_memory_with_format(jpeg, image::ImageFormat::Jpeg)
        .map_err(|e| FrameError::Decode(e.to_string()))?
        .to_rgb8();
    if decoded.width() != width || decoded.height() != height {
        return Err(FrameError::Decode(format!(
            "expected {width}x{height}, decoded {}x{}",
            decoded.width(),
            decoded.height()
        )));
    }
    Ok(decoded.into_raw())
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("decode failed: {0}")]
    Decode(String),
    #[error("encode failed: {0}")]
    Encode(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(width: u32, height: u32, color: [u8; 3]) -> Frame {
        let data = color.repeat((width * height) as usize);
        Frame::from_rgb(data, width, height, 0).unwrap()
    }

    #[test]
    fn test_yuyv_to_rgb_grey_levels() {
        // Neutral chroma: RGB equals Y.
        let yuyv = vec![100, 128, 200, 128];
        let rgb = yuyv_to_rgb(&yuyv, 2, 1).unwrap();
        assert_eq!(rgb, vec![100, 100, 100, 200, 200, 200]);
    }

    #[test]
    fn test_yuyv_to_rgb_red_chroma() {
        let yuyv = vec![76, 85, 76, 255];
        let rgb = yuyv_to_rgb(&yuyv, 2, 1).unwrap();
        assert!(rgb[0] > 240, "red channel {}", rgb[0]);
        assert!(rgb[2] < 20, "blue channel {}", rgb[2]);
    }

    #[test]
    fn test_yuyv_invalid_length() {
        assert!(yuyv_to_rgb(&[100, 128], 2, 1).is_err());
    }

    #[test]
    fn test_grey_to_rgb() {
        let rgb = grey_to_rgb(&[7, 9], 2, 1).unwrap();
        assert_eq!(rgb, vec![7, 7, 7, 9, 9, 9]);
        assert!(grey_to_rgb(&[7], 2, 1).is_err());
    }

    #[test]
    fn test_from_rgb_checks_length() {
        assert!(Frame::from_rgb(vec![0; 5], 2, 1, 0).is_err());
    }

    #[test]
    fn test_dark_frame() {
        assert!(solid(10, 10, [0, 0, 0]).is_dark);
        assert!(!solid(10, 10, [128, 128, 128]).is_dark);
        assert!(is_dark_frame(&[], DARK_FRAME_THRESHOLD));
    }

    #[test]
    fn test_avg_brightness() {
        let frame = solid(4, 4, [100, 100, 100]);
        assert!((frame.avg_brightness() - 100.0).abs() < 0.01);
    }

    #[test]
    fn test_draw_rect_outline_only() {
        let mut frame = solid(10, 10, [0, 0, 0]);
        frame.draw_rect(2.0, 2.0, 5.0, 5.0, [255, 0, 0], 1);
        let at = |x: usize, y: usize| &frame.data[(y * 10 + x) * 3..(y * 10 + x) * 3 + 3];
        assert_eq!(at(2, 2), &[255, 0, 0]);
        assert_eq!(at(7, 4), &[255, 0, 0]);
        assert_eq!(at(4, 4), &[0, 0, 0]);
        assert_eq!(at(0, 0), &[0, 0, 0]);
    }

    #[test]
    fn test_draw_rect_clipped() {
        let mut frame = solid(4, 4, [0, 0, 0]);
        frame.draw_rect(-10.0, -10.0, 100.0, 100.0, [0, 255, 0], 1);
        assert_eq!(&frame.data[0..3], &[0, 255, 0]);
    }

    #[test]
    fn test_jpeg_roundtrip_dimensions() {
        let frame = solid(16, 8, [120, 60, 30]);
        let jpeg = frame.encode_jpeg(90).unwrap();
        let rgb = mjpeg_to_rgb(&jpeg, 16, 8).unwrap();
        assert_eq!(rgb.len(), 16 * 8 * 3);
        assert!(mjpeg_to_rgb(&jpeg, 8, 8).is_err());
    }
}
