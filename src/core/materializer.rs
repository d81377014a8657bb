//! Writes in-memory frames to numbered image files in a temp folder.

use std::path::{Path, PathBuf};

/// Temp-frame write failure (disk full, permissions, ...)
#[derive(Debug, thiserror::Error)]
#[error("Failed to write frame {index} to {}: {source}", path.display())]
pub struct MaterializeError {
    pub index: usize,
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

/// Path of frame `index` inside `temp_dir`: `{temp_dir}/{index}.{ext}`
pub fn frame_path(temp_dir: &Path, index: usize, extension: &str) -> PathBuf {
    temp_dir.join(format!("{index}.{extension}"))
}

/// Write `data` to `{temp_dir}/{index}.{extension}`, creating `temp_dir` if needed
pub fn materialize(
    data: &[u8],
    temp_dir: &Path,
    index: usize,
    extension: &str,
) -> Result<PathBuf, MaterializeError> {
    let path = frame_path(temp_dir, index, extension);
    let wrap = |source| MaterializeError { index, path: path.clone(), source };

    std::fs::create_dir_all(temp_dir).map_err(wrap)?;
    std::fs::write(&path, data).map_err(wrap)?;
    Ok(path)
}
