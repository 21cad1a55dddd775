//! Reference set: the stored images of the identity being verified.

use crate::preprocess::{FaceImage, PreprocessError};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReferenceError {
    #[error("reference directory not found: {0}")]
    DirectoryNotFound(String),
    #[error("failed to list {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("reference image {name}: {source}")]
    Image {
        name: String,
        source: PreprocessError,
    },
}

/// One preprocessed reference image and the file name it came from.
#[derive(Debug, Clone)]
pub struct ReferenceImage {
    pub name: String,
    pub image: FaceImage,
}

/// Ordered, read-only collection of reference images.
#[derive(Debug, Clone, Default)]
pub struct ReferenceSet {
    images: Vec<ReferenceImage>,
}

impl ReferenceSet {
    pub fn from_images(images: Vec<ReferenceImage>) -> Self {
        Self { images }
    }

    /// Load every image file in `dir`, sorted by file name.
    ///
    /// Files without a recognised image extension are skipped. A file that
    /// looks like an image but fails to decode fails the whole load.
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Self, ReferenceError> {
        let dir = dir.as_ref();
        let shown = dir.display().to_string();
        if !dir.is_dir() {
            return Err(ReferenceError::DirectoryNotFound(shown));
        }

        let entries = std::fs::read_dir(dir).map_err(|source| ReferenceError::Io {
            path: shown.clone(),
            source,
        })?;

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| ReferenceError::Io {
                path: shown.clone(),
                source,
            })?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            if image::ImageFormat::from_path(&path).is_err() {
                tracing::debug!(path = %path.display(), "skipping non-image file");
                continue;
            }
            files.push(path);
        }
        files.sort();

        let mut images = Vec::with_capacity(files.len());
        for path in files {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let image = FaceImage::from_path(&path).map_err(|source| ReferenceError::Image {
                name: name.clone(),
                source,
            })?;
            images.push(ReferenceImage { name, image });
        }

        tracing::info!(dir = %shown, count = images.len(), "loaded reference set");

        Ok(Self { images })
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ReferenceImage> {
        self.images.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.images.iter().map(|r| r.name.as_str()).collect()
    }
}
