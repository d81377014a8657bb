//! Captured frames: opaque encoded image bytes plus their capture position.
//! Pixels are only decoded when the compiler needs them.

use std::path::{Path, PathBuf};

use base64::Engine;
use image::RgbImage;

/// One captured still image.
/// `index` is the position in capture order; frames are never reordered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub index: usize,
    /// Encoded image bytes (PNG from a browser screenshot, usually)
    pub data: Vec<u8>,
}

/// Frame decode errors
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("Image decode failed: {0}")]
    Decode(#[from] image::ImageError),
    #[error("Base64 decode failed: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Frame {
    pub fn new(index: usize, data: Vec<u8>) -> Self {
        Self { index, data }
    }

    /// Build a frame from a base64 screenshot payload (DevTools/WebDriver style)
    pub fn from_base64(index: usize, payload: &str) -> Result<Self, FrameError> {
        let data = base64::engine::general_purpose::STANDARD.decode(payload.trim())?;
        Ok(Self { index, data })
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Decode the in-memory bytes to RGB24
    pub fn decode(&self) -> Result<RgbImage, FrameError> {
        decode_bytes(&self.data)
    }

    /// Pixel dimensions, read from the image header without a full decode
    pub fn dimensions(&self) -> Result<(u32, u32), FrameError> {
        let reader = image::ImageReader::new(std::io::Cursor::new(&self.data)).with_guessed_format()?;
        Ok(reader.into_dimensions()?)
    }
}

/// Decode encoded image bytes to RGB24
pub fn decode_bytes(data: &[u8]) -> Result<RgbImage, FrameError> {
    Ok(image::load_from_memory(data)?.to_rgb8())
}

/// Decode an image file from disk to RGB24
pub fn decode_file(path: &Path) -> Result<RgbImage, FrameError> {
    Ok(image::open(path)?.to_rgb8())
}

/// Ordered frame files found in a folder of previously materialized frames.
///
/// Only `<number>.<ext>` files are picked up; they are sorted numerically so
/// `10.png` follows `9.png`.
pub fn list_frame_files(dir: &Path, extension: &str) -> std::io::Result<Vec<PathBuf>> {
    let mut numbered: Vec<(u64, PathBuf)> = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let ext_ok = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case(extension))
            .unwrap_or(false);
        if !ext_ok {
            continue;
        }
        let number = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.parse::<u64>().ok());
        if let Some(n) = number {
            numbered.push((n, path));
        }
    }
    numbered.sort_by_key(|(n, _)| *n);
    Ok(numbered.into_iter().map(|(_, p)| p).collect())
}

/// Read a folder of numbered frame files back into frames, in order
pub fn load_frame_folder(dir: &Path, extension: &str) -> Result<Vec<Frame>, FrameError> {
    list_frame_files(dir, extension)?
        .into_iter()
        .enumerate()
        .map(|(index, path)| Ok(Frame::new(index, std::fs::read(path)?)))
        .collect()
}

#[cfg(test)]
pub(crate) mod test_images {
    use image::{ImageFormat, Rgb, RgbImage};

    /// Solid-color PNG whose red channel carries `marker`
    pub fn marker_png(width: u32, height: u32, marker: u8) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb([marker, 0, 0]));
        let mut out = std::io::Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::test_images::marker_png;
    use super::*;

    #[test]
    fn test_decode_png() {
        let frame = Frame::new(0, marker_png(8, 6, 42));
        let img = frame.decode().unwrap();
        assert_eq!(img.dimensions(), (8, 6));
        assert_eq!(img.get_pixel(0, 0)[0], 42);
        assert_eq!(frame.dimensions().unwrap(), (8, 6));
    }

    #[test]
    fn test_decode_garbage_fails() {
        let frame = Frame::new(0, b"not an image".to_vec());
        assert!(frame.decode().is_err());
        assert!(frame.dimensions().is_err());
    }

    #[test]
    fn test_from_base64() {
        let png = marker_png(2, 2, 7);
        let payload = base64::engine::general_purpose::STANDARD.encode(&png);
        let frame = Frame::from_base64(3, &payload).unwrap();
        assert_eq!(frame.index, 3);
        assert_eq!(frame.data, png);
        assert!(Frame::from_base64(0, "%%%").is_err());
    }

    #[test]
    fn test_list_frame_files_numeric_order() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["10.png", "2.png", "1.png", "notes.png", "3.txt"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        let files = list_frame_files(dir.path(), "png").unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["1.png", "2.png", "10.png"]);
    }

    #[test]
    fn test_load_frame_folder_reindexes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("5.png"), b"b").unwrap();
        std::fs::write(dir.path().join("4.png"), b"a").unwrap();
        let frames = load_frame_folder(dir.path(), "png").unwrap();
        assert_eq!(frames, vec![Frame::new(0, b"a".to_vec()), Frame::new(1, b"b".to_vec())]);
    }
}
