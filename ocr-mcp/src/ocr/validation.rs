use std::path::{Path, PathBuf};

use image::ImageReader;

use crate::error::{OcrError, Result};

/// An input image that exists, is a regular file and has a decodable header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedImage {
    /// Absolute, symlink-resolved path.
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
}

/// Check an image path before any backend sees it.
///
/// Only the header is decoded, which is enough to reject unknown formats and
/// truncated files without paying for a full decode of large scans.
pub fn validate_image(path: &Path) -> Result<ValidatedImage> {
    if !path.exists() {
        return Err(OcrError::InvalidInput(format!(
            "Image file not found: {}",
            path.display()
        )));
    }
    if !path.is_file() {
        return Err(OcrError::InvalidInput(format!(
            "Path is not a file: {}",
            path.display()
        )));
    }

    let reader = ImageReader::open(path)
        .map_err(|e| OcrError::InvalidInput(format!("Failed to open image: {e}")))?
        .with_guessed_format()
        .map_err(|e| OcrError::InvalidInput(format!("Failed to read image: {e}")))?;

    if reader.format().is_none() {
        return Err(OcrError::InvalidInput(format!(
            "Unrecognized image format: {}",
            path.display()
        )));
    }

    let (width, height) = reader
        .into_dimensions()
        .map_err(|e| OcrError::InvalidInput(format!("Failed to decode image: {e}")))?;

    if width == 0 || height == 0 {
        return Err(OcrError::InvalidInput(format!(
            "Image has no pixels: {width}x{height}"
        )));
    }

    let path = std::fs::canonicalize(path)
        .map_err(|e| OcrError::InvalidInput(format!("Failed to resolve image path: {e}")))?;

    Ok(ValidatedImage {
        path,
        width,
        height,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage};

    #[test]
    fn test_missing_file_is_invalid_input() {
        let err = validate_image(Path::new("/definitely/not/here.png")).unwrap_err();
        assert!(matches!(err, OcrError::InvalidInput(_)));
        assert!(err.to_string().contains("Image file not found"));
    }

    #[test]
    fn test_directory_is_invalid_input() {
        let dir = tempfile::tempdir().unwrap();
        let err = validate_image(dir.path()).unwrap_err();
        assert!(err.to_string().contains("not a file"));
    }

    #[test]
    fn test_non_image_is_invalid_input() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.png");
        std::fs::write(&path, b"this is plain text, not pixels").unwrap();

        let err = validate_image(&path).unwrap_err();
        assert!(matches!(err, OcrError::InvalidInput(_)));
    }

    #[test]
    fn test_valid_png_resolves_absolute_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ok.png");
        RgbImage::from_pixel(64, 32, Rgb([255, 255, 255]))
            .save_with_format(&path, ImageFormat::Png)
            .unwrap();

        let image = validate_image(&path).unwrap();
        assert!(image.path.is_absolute());
        assert_eq!((image.width, image.height), (64, 32));
    }
}
