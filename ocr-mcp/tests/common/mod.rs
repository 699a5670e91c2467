#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use image::{ImageFormat, Rgb, RgbImage};
use tempfile::TempDir;

use ocr_mcp::models::ProgressSnapshot;
use ocr_mcp::progress::ProgressCallback;

/// Write a small white PNG into `dir` and return its path.
pub fn write_png(dir: &Path, name: &str, width: u32, height: u32) -> PathBuf {
    let path = dir.join(name);
    RgbImage::from_pixel(width, height, Rgb([255, 255, 255]))
        .save_with_format(&path, ImageFormat::Png)
        .unwrap_or_else(|e| panic!("Failed to write fixture '{name}': {e}"));
    path
}

/// A temp directory holding `sample.png` (64x32).
pub fn sample_image() -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("Failed to create fixture directory");
    let path = write_png(dir.path(), "sample.png", 64, 32);
    (dir, path)
}

/// Callback recording every update it receives.
pub fn recording_callback() -> (ProgressCallback, Arc<Mutex<Vec<ProgressSnapshot>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let callback: ProgressCallback = Arc::new(move |percentage, stage, message| {
        sink.lock()
            .unwrap()
            .push(ProgressSnapshot::new(percentage, stage, message));
    });
    (callback, seen)
}
