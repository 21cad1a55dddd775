//! Frame type and pixel processing: raw buffer decoding to RGB, dark detection, cropping.

use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::path::Path;

const RGB_CHANNELS: usize = 3;
/// Luma below this counts as a dark pixel.
const DARK_PIXEL_LUMA: u8 = 32;

/// A captured camera frame in packed RGB8.
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

/// Square region of a frame, in pixels from the top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropRegion {
    pub x: u32,
    pub y: u32,
    pub size: u32,
}

impl Frame {
    /// Average luma (0.0–255.0).
    pub fn avg_brightness(&self) -> f32 {
        let pixels = self.data.len() / RGB_CHANNELS;
        if pixels == 0 {
            return 0.0;
        }
        self.data
            .chunks_exact(RGB_CHANNELS)
            .map(|px| luma(px[0], px[1], px[2]) as f32)
            .sum::<f32>()
            / pixels as f32
    }

    /// Copy out a square region. Fails if the region leaves the frame.
    pub fn crop(&self, region: CropRegion) -> Result<Frame, FrameError> {
        let x_end = region.x.checked_add(region.size);
        let y_end = region.y.checked_add(region.size);
        let fits = matches!((x_end, y_end), (Some(xe), Some(ye)) if xe <= self.width && ye <= self.height);
        if region.size == 0 || !fits {
            return Err(FrameError::CropOutOfBounds {
                region,
                width: self.width,
                height: self.height,
            });
        }

        let expected = self.width as usize * self.height as usize * RGB_CHANNELS;
        if self.data.len() != expected {
            return Err(FrameError::InvalidLength {
                expected,
                actual: self.data.len(),
            });
        }

        let w = self.width as usize;
        let size = region.size as usize;
        let row_bytes = size * RGB_CHANNELS;
        let mut data = Vec::with_capacity(size * row_bytes);
        for row in region.y as usize..region.y as usize + size {
            let start = (row * w + region.x as usize) * RGB_CHANNELS;
            data.extend_from_slice(&self.data[start..start + row_bytes]);
        }

        let is_dark = is_dark_frame(&data, 0.95);
        Ok(Frame {
            data,
            width: region.size,
            height: region.size,
            timestamp: self.timestamp,
            sequence: self.sequence,
            is_dark,
        })
    }

    /// The largest centred square that fits in the frame.
    pub fn center_square(&self) -> Result<Frame, FrameError> {
        self.crop(center_square_region(self.width, self.height))
    }

    /// Crop to `region` when given, otherwise to the centred square.
    pub fn crop_or_center(&self, region: Option<CropRegion>) -> Result<Frame, FrameError> {
        match region {
            Some(region) => self.crop(region),
            None => self.center_square(),
        }
    }

    pub fn to_rgb_image(&self) -> Result<RgbImage, FrameError> {
        let expected = self.width as usize * self.height as usize * RGB_CHANNELS;
        let actual = self.data.len();
        RgbImage::from_raw(self.width, self.height, self.data.clone())
            .ok_or(FrameError::InvalidLength { expected, actual })
    }

    /// Write the frame to `path`, creating parent directories and
    /// overwriting any existing file. Format follows the extension.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), FrameError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        self.to_rgb_image()?.save(path)?;
        tracing::debug!(path = %path.display(), seq = self.sequence, "frame saved");
        Ok(())
    }
}

/// Raw pixel layout delivered by the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel).
    Yuyv,
    /// Motion-JPEG, one JPEG image per buffer.
    Mjpg,
    /// Packed 24-bit RGB.
    Rgb3,
    /// 8-bit grayscale.
    Grey,
}

/// Convert a raw capture buffer to packed RGB8.
///
/// Returns the pixel data with its dimensions; MJPG buffers report the
/// size of the decoded JPEG rather than `width x height`.
pub fn decode_buffer(
    format: PixelFormat,
    buf: &[u8],
    width: u32,
    height: u32,
) -> Result<(Vec<u8>, u32, u32), FrameError> {
    match format {
        PixelFormat::Yuyv => yuyv_to_rgb(buf, width, height).map(|rgb| (rgb, width, height)),
        PixelFormat::Grey => grey_to_rgb(buf, width, height).map(|rgb| (rgb, width, height)),
        PixelFormat::Rgb3 => {
            let expected = width as usize * height as usize * RGB_CHANNELS;
            if buf.len() < expected {
                return Err(FrameError::InvalidLength {
                    expected,
                    actual: buf.len(),
                });
            }
            Ok((buf[..expected].to_vec(), width, height))
        }
        PixelFormat::Mjpg => {
            let decoded =
                image::load_from_memory_with_format(buf, image::ImageFormat::Jpeg)?.to_rgb8();
            let (w, h) = decoded.dimensions();
            Ok((decoded.into_raw(), w, h))
        }
    }
}

/// Largest centred square region for a `width x height` frame.
pub fn center_square_region(width: u32, height: u32) -> CropRegion {
    let size = width.min(height);
    CropRegion {
        x: (width - size) / 2,
        y: (height - size) / 2,
        size,
    }
}

/// BT.601 integer luma.
pub fn luma(r: u8, g: u8, b: u8) -> u8 {
    ((77 * r as u32 + 150 * g as u32 + 29 * b as u32) >> 8) as u8
}

/// Convert packed YUYV (4:2:2) to packed RGB8 using BT.601 limited range.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V], sharing chroma.
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let pixels = (width * height) as usize;
    let expected = pixels * 2;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }

    let mut rgb = Vec::with_capacity(pixels * RGB_CHANNELS);
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
    let clamp = |x: i32| (x >> 8).clamp(0, 255) as u8;
    [
        clamp(298 * c + 409 * e + 128),
        clamp(298 * c - 100 * d - 208 * e + 128),
        clamp(298 * c + 516 * d + 128),
    ]
}

/// Replicate 8-bit grayscale into packed RGB8.
pub fn grey_to_rgb(grey: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let pixels = (width * height) as usize;
    if grey.len() < pixels {
        return Err(FrameError::InvalidLength {
            expected: pixels,
            actual: grey.len(),
        });
    }
    Ok(grey[..pixels].iter().flat_map(|&p| [p, p, p]).collect())
}

/// Check if an RGB frame is dark.
///
/// Returns true if more than `threshold_pct` of pixels have luma below 32.
pub fn is_dark_frame(rgb: &[u8], threshold_pct: f32) -> bool {
    let pixels = rgb.len() / RGB_CHANNELS;
    if pixels == 0 {
        return true;
    }
    let dark_count = rgb
        .chunks_exact(RGB_CHANNELS)
        .filter(|px| luma(px[0], px[1], px[2]) < DARK_PIXEL_LUMA)
        .count();
    (dark_count as f32 / pixels as f32) > threshold_pct
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("crop {region:?} does not fit in {width}x{height} frame")]
    CropOutOfBounds {
        region: CropRegion,
        width: u32,
        height: u32,
    },
    #[error("image: {0}")]
    Image(#[from] image::ImageError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(width: u32, height: u32) -> Frame {
        let data = (0..width * height)
            .flat_map(|i| [(i % 256) as u8, 100, 200])
            .collect();
        Frame {
            data,
            width,
            height,
            timestamp: std::time::Instant::now(),
            sequence: 7,
            is_dark: false,
        }
    }

    #[test]
    fn test_yuyv_black_and_white() {
        // 2x1 image: Y0=16 (black), Y1=235 (white), neutral chroma
        let yuyv = vec![16, 128, 235, 128];
        let rgb = yuyv_to_rgb(&yuyv, 2, 1).unwrap();
        assert_eq!(rgb, vec![0, 0, 0, 255, 255, 255]);
    }

    #[test]
    fn test_yuyv_output_length() {
        let yuyv = vec![128u8; 4 * 2 * 2];
        let rgb = yuyv_to_rgb(&yuyv, 4, 2).unwrap();
        assert_eq!(rgb.len(), 4 * 2 * 3);
    }

    #[test]
    fn test_yuyv_red_dominant() {
        // High V (Cr) pushes red up and green down.
        let rgb = yuyv_to_rgb(&[120, 128, 120, 240], 2, 1).unwrap();
        assert!(rgb[0] > rgb[1]);
        assert!(rgb[0] > rgb[2]);
    }

    #[test]
    fn test_yuyv_invalid_length() {
        assert!(yuyv_to_rgb(&[100, 128], 2, 1).is_err());
    }

    #[test]
    fn test_grey_to_rgb() {
        let rgb = grey_to_rgb(&[10, 20], 2, 1).unwrap();
        assert_eq!(rgb, vec![10, 10, 10, 20, 20, 20]);
        assert!(grey_to_rgb(&[10], 2, 1).is_err());
    }

    #[test]
    fn test_dark_frame_all_black() {
        assert!(is_dark_frame(&vec![0u8; 300], 0.95));
    }

    #[test]
    fn test_dark_frame_normal() {
        assert!(!is_dark_frame(&vec![128u8; 300], 0.95));
    }

    #[test]
    fn test_dark_frame_empty() {
        assert!(is_dark_frame(&[], 0.95));
    }

    #[test]
    fn test_dark_frame_borderline_bright() {
        // 94% dark, 6% bright → should NOT be dark
        let mut rgb = vec![10u8; 940 * 3];
        rgb.extend(vec![128u8; 60 * 3]);
        assert!(!is_dark_frame(&rgb, 0.95));
    }

    #[test]
    fn test_avg_brightness_white() {
        let f = Frame {
            data: vec![255; 12],
            width: 2,
            height: 2,
            timestamp: std::time::Instant::now(),
            sequence: 0,
            is_dark: false,
        };
        assert_eq!(f.avg_brightness(), 255.0);
    }

    #[test]
    fn test_crop_copies_region() {
        let f = frame(4, 3);
        let c = f.crop(CropRegion { x: 1, y: 1, size: 2 }).unwrap();
        assert_eq!((c.width, c.height), (2, 2));
        assert_eq!(c.sequence, 7);
        // Top-left of crop is source pixel (1, 1) = index 5.
        assert_eq!(&c.data[..3], &[5, 100, 200]);
        // Bottom-right of crop is source pixel (2, 2) = index 10.
        assert_eq!(&c.data[9..12], &[10, 100, 200]);
    }

    #[test]
    fn test_crop_out_of_bounds() {
        let f = frame(4, 3);
        assert!(matches!(
            f.crop(CropRegion { x: 2, y: 0, size: 3 }),
            Err(FrameError::CropOutOfBounds { .. })
        ));
        assert!(f.crop(CropRegion { x: 0, y: 0, size: 0 }).is_err());
        assert!(f.crop(CropRegion { x: u32::MAX, y: 0, size: 2 }).is_err());
    }

    #[test]
    fn test_center_square_landscape() {
        assert_eq!(
            center_square_region(1280, 720),
            CropRegion { x: 280, y: 0, size: 720 }
        );
        let c = frame(6, 4).center_square().unwrap();
        assert_eq!((c.width, c.height), (4, 4));
        assert_eq!(c.data[0], 1);
    }

    #[test]
    fn test_center_square_portrait() {
        assert_eq!(
            center_square_region(480, 640),
            CropRegion { x: 0, y: 80, size: 480 }
        );
    }

    #[test]
    fn test_crop_rejects_short_buffer() {
        let mut f = frame(3, 3);
        f.data.truncate(24);
        assert!(matches!(
            f.crop(CropRegion { x: 0, y: 0, size: 3 }),
            Err(FrameError::InvalidLength { expected: 27, actual: 24 })
        ));
    }

    #[test]
    fn test_crop_or_center() {
        let f = frame(6, 4);
        let centred = f.crop_or_center(None).unwrap();
        assert_eq!((centred.width, centred.data[0]), (4, 1));
        let explicit = f.crop_or_center(Some(CropRegion { x: 2, y: 1, size: 2 })).unwrap();
        assert_eq!((explicit.width, explicit.data[0]), (2, 8));
    }

    #[test]
    fn test_decode_buffer_yuyv() {
        let (rgb, w, h) = decode_buffer(PixelFormat::Yuyv, &[16, 128, 235, 128], 2, 1).unwrap();
        assert_eq!((w, h), (2, 1));
        assert_eq!(rgb, vec![0, 0, 0, 255, 255, 255]);
    }

    #[test]
    fn test_decode_buffer_rgb3() {
        let (rgb, _, _) = decode_buffer(PixelFormat::Rgb3, &[1, 2, 3, 4, 5, 6, 7], 2, 1).unwrap();
        assert_eq!(rgb, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_decode_buffer_rgb3_short() {
        assert!(matches!(
            decode_buffer(PixelFormat::Rgb3, &[0u8; 5], 2, 1),
            Err(FrameError::InvalidLength { expected: 6, actual: 5 })
        ));
    }

    #[test]
    fn test_decode_buffer_mjpg_uses_jpeg_size() {
        let img = RgbImage::from_pixel(16, 8, image::Rgb([200, 200, 200]));
        let mut jpeg = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut std::io::Cursor::new(&mut jpeg), image::ImageFormat::Jpeg)
            .unwrap();

        // Negotiated size is ignored for MJPG.
        let (rgb, w, h) = decode_buffer(PixelFormat::Mjpg, &jpeg, 640, 480).unwrap();
        assert_eq!((w, h), (16, 8));
        assert_eq!(rgb.len(), 16 * 8 * 3);
        assert!(rgb.iter().all(|&v| (190..=210).contains(&v)));
    }

    #[test]
    fn test_decode_buffer_mjpg_garbage() {
        assert!(matches!(
            decode_buffer(PixelFormat::Mjpg, b"not a jpeg", 2, 1),
            Err(FrameError::Image(_))
        ));
    }

    #[test]
    fn test_save_creates_parent_and_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input_image").join("input_image.png");

        frame(8, 8).save(&path).unwrap();
        let first = image::open(&path).unwrap();
        assert_eq!((first.width(), first.height()), (8, 8));

        frame(5, 5).save(&path).unwrap();
        let second = image::open(&path).unwrap();
        assert_eq!((second.width(), second.height()), (5, 5));
    }
}
