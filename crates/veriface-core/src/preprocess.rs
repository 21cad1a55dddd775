//! Image preprocessing for the Siamese network.
//!
//! Decodes an image, resizes it to a fixed 105x105 square with bilinear
//! sampling and scales pixel intensities into [0, 1].

use image::{DynamicImage, RgbImage};
use ndarray::{Array3, ArrayView4, Axis};
use std::path::Path;
use thiserror::Error;

/// Side length of the square network input.
pub const FACE_IMAGE_SIZE: usize = 105;
const FACE_IMAGE_CHANNELS: usize = 3;
const PIXEL_SCALE: f32 = 255.0;

#[derive(Error, Debug)]
pub enum PreprocessError {
    #[error("image file not found: {0}")]
    NotFound(String),
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to decode {path}: {source}")]
    Decode {
        path: String,
        source: image::ImageError,
    },
    #[error("image has zero width or height")]
    EmptyImage,
}

/// A preprocessed 105x105x3 (HWC, RGB) tensor with values in [0, 1].
#[derive(Debug, Clone)]
pub struct FaceImage {
    tensor: Array3<f32>,
}

impl FaceImage {
    /// Load, decode and preprocess an image file.
    ///
    /// The format is detected from the file contents, not the extension.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, PreprocessError> {
        let path = path.as_ref();
        let shown = path.display().to_string();
        if !path.exists() {
            return Err(PreprocessError::NotFound(shown));
        }

        let bytes = std::fs::read(path).map_err(|source| PreprocessError::Io {
            path: shown.clone(),
            source,
        })?;
        let image = image::load_from_memory(&bytes).map_err(|source| PreprocessError::Decode {
            path: shown.clone(),
            source,
        })?;

        tracing::debug!(
            path = %shown,
            width = image.width(),
            height = image.height(),
            "decoded image"
        );

        Self::from_image(&image)
    }

    /// Preprocess an already-decoded image. Grayscale and alpha inputs are
    /// converted to RGB first.
    pub fn from_image(image: &DynamicImage) -> Result<Self, PreprocessError> {
        let rgb = image.to_rgb8();
        if rgb.width() == 0 || rgb.height() == 0 {
            return Err(PreprocessError::EmptyImage);
        }
        Ok(Self {
            tensor: resize_normalized(&rgb, FACE_IMAGE_SIZE),
        })
    }

    /// Tensor shape, always `[105, 105, 3]`.
    pub fn shape(&self) -> &[usize] {
        self.tensor.shape()
    }

    pub fn tensor(&self) -> &Array3<f32> {
        &self.tensor
    }

    /// View with a leading batch axis: `[1, 105, 105, 3]` (NHWC).
    pub fn batch_view(&self) -> ArrayView4<'_, f32> {
        self.tensor.view().insert_axis(Axis(0))
    }
}

/// Bilinear resize to `size x size` with half-pixel centres and no
/// antialiasing, writing `pixel / 255` straight into an HWC tensor.
///
/// Aspect ratio is not preserved: non-square inputs are stretched.
fn resize_normalized(rgb: &RgbImage, size: usize) -> Array3<f32> {
    let width = rgb.width() as usize;
    let height = rgb.height() as usize;
    let raw = rgb.as_raw();
    let scale_x = width as f32 / size as f32;
    let scale_y = height as f32 / size as f32;

    let mut tensor = Array3::<f32>::zeros((size, size, FACE_IMAGE_CHANNELS));

    for y in 0..size {
        let src_y = ((y as f32 + 0.5) * scale_y - 0.5).max(0.0);
        let y0 = (src_y.floor() as usize).min(height - 1);
        let y1 = (y0 + 1).min(height - 1);
        let fy = (src_y - y0 as f32).clamp(0.0, 1.0);

        for x in 0..size {
            let src_x = ((x as f32 + 0.5) * scale_x - 0.5).max(0.0);
            let x0 = (src_x.floor() as usize).min(width - 1);
            let x1 = (x0 + 1).min(width - 1);
            let fx = (src_x - x0 as f32).clamp(0.0, 1.0);

            for c in 0..FACE_IMAGE_CHANNELS {
                let px = |row: usize, col: usize| {
                    raw[(row * width + col) * FACE_IMAGE_CHANNELS + c] as f32
                };
                let tl = px(y0, x0);
                let tr = px(y0, x1);
                let bl = px(y1, x0);
                let br = px(y1, x1);

                let val = tl * (1.0 - fx) * (1.0 - fy)
                    + tr * fx * (1.0 - fy)
                    + bl * (1.0 - fx) * fy
                    + br * fx * fy;

                tensor[[y, x, c]] = (val / PIXEL_SCALE).clamp(0.0, 1.0);
            }
        }
    }

    tensor
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, Rgb};

    fn gradient(width: u32, height: u32) -> DynamicImage {
        let img = RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, ((x * 7 + y * 13) % 256) as u8])
        });
        DynamicImage::ImageRgb8(img)
    }

    fn assert_in_unit_range(face: &FaceImage) {
        for &v in face.tensor().iter() {
            assert!((0.0..=1.0).contains(&v), "value {v} out of [0, 1]");
        }
    }

    #[test]
    fn test_output_shape_large_square() {
        let face = FaceImage::from_image(&gradient(800, 800)).unwrap();
        assert_eq!(face.shape(), &[FACE_IMAGE_SIZE, FACE_IMAGE_SIZE, 3]);
        assert_in_unit_range(&face);
    }

    #[test]
    fn test_output_shape_small_square() {
        let face = FaceImage::from_image(&gradient(3, 3)).unwrap();
        assert_eq!(face.shape(), &[FACE_IMAGE_SIZE, FACE_IMAGE_SIZE, 3]);
        assert_in_unit_range(&face);
    }

    #[test]
    fn test_output_shape_non_square() {
        let face = FaceImage::from_image(&gradient(640, 360)).unwrap();
        assert_eq!(face.shape(), &[FACE_IMAGE_SIZE, FACE_IMAGE_SIZE, 3]);
        assert_in_unit_range(&face);
    }

    #[test]
    fn test_same_size_is_identity() {
        // At 105x105 every sample lands exactly on a source pixel.
        let src = gradient(105, 105);
        let rgb = src.to_rgb8();
        let face = FaceImage::from_image(&src).unwrap();
        for (x, y, px) in rgb.enumerate_pixels() {
            for c in 0..3 {
                let expected = px.0[c] as f32 / PIXEL_SCALE;
                assert_eq!(face.tensor()[[y as usize, x as usize, c]], expected);
            }
        }
    }

    #[test]
    fn test_white_image_normalizes_to_one() {
        let img = RgbImage::from_pixel(250, 250, Rgb([255, 255, 255]));
        let face = FaceImage::from_image(&DynamicImage::ImageRgb8(img)).unwrap();
        for &v in face.tensor().iter() {
            assert!((v - 1.0).abs() < 1e-6, "got {v}");
        }
    }

    #[test]
    fn test_grayscale_replicated_to_rgb() {
        let img = GrayImage::from_pixel(50, 50, Luma([100]));
        let face = FaceImage::from_image(&DynamicImage::ImageLuma8(img)).unwrap();
        let expected = 100.0 / PIXEL_SCALE;
        for &v in face.tensor().iter() {
            assert!((v - expected).abs() < 1e-6);
        }
    }

    #[test]
    fn test_batch_view_shape() {
        let face = FaceImage::from_image(&gradient(10, 10)).unwrap();
        assert_eq!(
            face.batch_view().shape(),
            &[1, FACE_IMAGE_SIZE, FACE_IMAGE_SIZE, 3]
        );
    }

    #[test]
    fn test_empty_image_rejected() {
        let img = DynamicImage::new_rgb8(0, 0);
        assert!(matches!(
            FaceImage::from_image(&img),
            Err(PreprocessError::EmptyImage)
        ));
    }

    #[test]
    fn test_from_path_missing_file() {
        let result = FaceImage::from_path("/nonexistent/veriface/input_image.jpg");
        assert!(matches!(result, Err(PreprocessError::NotFound(_))));
    }

    #[test]
    fn test_from_path_not_an_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.jpg");
        std::fs::write(&path, b"definitely not a jpeg").unwrap();
        let result = FaceImage::from_path(&path);
        assert!(matches!(result, Err(PreprocessError::Decode { .. })));
    }

    #[test]
    fn test_from_path_round_trip_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("face.png");
        gradient(320, 240).save(&path).unwrap();
        let face = FaceImage::from_path(&path).unwrap();
        assert_eq!(face.shape(), &[FACE_IMAGE_SIZE, FACE_IMAGE_SIZE, 3]);
        assert_in_unit_range(&face);
    }
}
