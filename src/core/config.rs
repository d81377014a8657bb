//! Recorder configuration: output location, container format, nominal fps.
//! Serializable so test harnesses can keep it next to their own settings.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default nominal frame rate written into the container
pub const DEFAULT_FPS: u32 = 4;
/// File name used when `file_name` turns out to be a directory
pub const DEFAULT_FILE_STEM: &str = "screen_recording";
/// Sub-folder of the output root that holds materialized frames
pub const DEFAULT_TEMP_DIR_NAME: &str = "temp_images";

/// Supported video containers.
///
/// The codec for each container is fixed; see [`VideoFormat::fourcc`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoFormat {
    Mp4,
    Avi,
}

impl VideoFormat {
    /// Parse a container extension (`"mp4"`, `".AVI"`, ...)
    pub fn from_extension(ext: &str) -> Result<Self, ConfigError> {
        let trimmed = ext.trim().trim_start_matches('.');
        match trimmed.to_ascii_lowercase().as_str() {
            "mp4" => Ok(Self::Mp4),
            "avi" => Ok(Self::Avi),
            _ => Err(ConfigError::UnsupportedFormat(ext.to_string())),
        }
    }

    /// Infer the container from a path's extension
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .ok_or_else(|| ConfigError::UnsupportedFormat(path.display().to_string()))?;
        Self::from_extension(ext)
    }

    pub fn file_extension(&self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::Avi => "avi",
        }
    }

    /// FourCC of the codec written into this container.
    /// mp4 → MPEG-4 Part 2 (`mp4v`), avi → DivX-tagged MPEG-4 (`DIVX`).
    pub fn fourcc(&self) -> [u8; 4] {
        match self {
            Self::Mp4 => *b"mp4v",
            Self::Avi => *b"DIVX",
        }
    }
}

impl std::fmt::Display for VideoFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.file_extension())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Unsupported video format: {0}")]
    UnsupportedFormat(String),
    #[error("Frame rate must be at least 1, got {0}")]
    InvalidFps(u32),
    #[error("File name must not be empty")]
    EmptyFileName,
    #[error("Frame extension must not be empty")]
    EmptyFrameExtension,
    #[error("Config parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Recorder configuration.
///
/// `file_name` may be a bare name, a relative path under `output_root`, or an
/// absolute path. When it does not end with the container extension it is
/// treated as a directory and `screen_recording.<ext>` is placed inside it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RecorderConfig {
    pub output_root: PathBuf,
    pub file_name: String,
    /// Container format; inferred from `file_name` when `None`
    pub video_format: Option<VideoFormat>,
    pub fps: u32,
    /// Replace an existing output file instead of skipping compilation
    pub overwrite: bool,
    pub temp_dir_name: String,
    /// Extension used for materialized frame files
    pub frame_extension: String,
    /// Delay between "is the session ready" checks before capture begins
    #[serde(with = "duration_millis")]
    pub ready_poll_interval: Duration,
    /// Upper bound on waiting for the capture thread to drain after stop
    #[serde(with = "duration_millis")]
    pub stop_timeout: Duration,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            output_root: default_output_root(),
            file_name: format!("{DEFAULT_FILE_STEM}.mp4"),
            video_format: None,
            fps: DEFAULT_FPS,
            overwrite: true,
            temp_dir_name: DEFAULT_TEMP_DIR_NAME.into(),
            frame_extension: "png".into(),
            ready_poll_interval: Duration::from_millis(50),
            stop_timeout: Duration::from_secs(10),
        }
    }
}

impl RecorderConfig {
    pub fn new(output_root: impl Into<PathBuf>, file_name: impl Into<String>) -> Self {
        Self {
            output_root: output_root.into(),
            file_name: file_name.into(),
            ..Default::default()
        }
    }

    pub fn with_format(mut self, format: VideoFormat) -> Self {
        self.video_format = Some(format);
        self
    }

    pub fn with_fps(mut self, fps: u32) -> Self {
        self.fps = fps;
        self
    }

    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    /// Load a JSON config file; missing keys take their defaults
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fps == 0 {
            return Err(ConfigError::InvalidFps(self.fps));
        }
        if self.file_name.trim().is_empty() {
            return Err(ConfigError::EmptyFileName);
        }
        if self.frame_extension.trim().trim_start_matches('.').is_empty() {
            return Err(ConfigError::EmptyFrameExtension);
        }
        self.resolved_format()?;
        Ok(())
    }

    /// Explicit format, or the one implied by `file_name`'s extension
    pub fn resolved_format(&self) -> Result<VideoFormat, ConfigError> {
        match self.video_format {
            Some(format) => Ok(format),
            None => VideoFormat::from_path(Path::new(&self.file_name)),
        }
    }

    /// Full path of the video file to produce
    pub fn output_path(&self) -> Result<PathBuf, ConfigError> {
        let format = self.resolved_format()?;
        let named = self.output_root.join(&self.file_name);
        let has_ext = named
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case(format.file_extension()))
            .unwrap_or(false);

        if has_ext {
            Ok(named)
        } else {
            Ok(named.join(format!("{DEFAULT_FILE_STEM}.{}", format.file_extension())))
        }
    }

    /// Per-session folder for materialized frames (next to the output file)
    pub fn temp_dir(&self) -> Result<PathBuf, ConfigError> {
        let output = self.output_path()?;
        let dir = output.parent().unwrap_or(Path::new("."));
        Ok(dir.join(&self.temp_dir_name))
    }

    pub fn frame_extension(&self) -> &str {
        self.frame_extension.trim().trim_start_matches('.')
    }
}

/// `~/Videos/Shotreel`, or the platform equivalent
pub fn default_output_root() -> PathBuf {
    dirs::video_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_default().join("Videos"))
        .join("Shotreel")
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = RecorderConfig::default();
        assert_eq!(cfg.fps, 4);
        assert!(cfg.overwrite);
        assert_eq!(cfg.temp_dir_name, "temp_images");
        assert_eq!(cfg.frame_extension(), "png");
        assert_eq!(cfg.resolved_format().unwrap(), VideoFormat::Mp4);
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(VideoFormat::from_extension("mp4").unwrap(), VideoFormat::Mp4);
        assert_eq!(VideoFormat::from_extension(".AVI").unwrap(), VideoFormat::Avi);
        assert!(matches!(
            VideoFormat::from_extension("mkv"),
            Err(ConfigError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_fourcc_table() {
        assert_eq!(&VideoFormat::Mp4.fourcc(), b"mp4v");
        assert_eq!(&VideoFormat::Avi.fourcc(), b"DIVX");
    }

    #[test]
    fn test_output_path_with_extension() {
        let cfg = RecorderConfig::new("/tmp/out", "run.avi");
        assert_eq!(cfg.resolved_format().unwrap(), VideoFormat::Avi);
        assert_eq!(cfg.output_path().unwrap(), PathBuf::from("/tmp/out/run.avi"));
        assert_eq!(cfg.temp_dir().unwrap(), PathBuf::from("/tmp/out/temp_images"));
    }

    #[test]
    fn test_output_path_directory_name() {
        let cfg = RecorderConfig::new("/tmp/out", "session_1").with_format(VideoFormat::Mp4);
        assert_eq!(
            cfg.output_path().unwrap(),
            PathBuf::from("/tmp/out/session_1/screen_recording.mp4")
        );
    }

    #[test]
    fn test_name_without_format_is_rejected() {
        let cfg = RecorderConfig::new("/tmp/out", "session_1");
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_zero_fps_rejected() {
        let cfg = RecorderConfig::new("/tmp/out", "a.mp4").with_fps(0);
        assert!(matches!(cfg.validate(), Err(ConfigError::InvalidFps(0))));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recorder.json");
        let cfg = RecorderConfig::new(dir.path(), "clip.avi")
            .with_fps(10)
            .with_overwrite(false);
        cfg.save(&path).unwrap();

        let loaded = RecorderConfig::load(&path).unwrap();
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let cfg: RecorderConfig =
            serde_json::from_str(r#"{"fileName":"x.mp4","fps":12,"stopTimeout":250}"#).unwrap();
        assert_eq!(cfg.fps, 12);
        assert_eq!(cfg.stop_timeout, Duration::from_millis(250));
        assert!(cfg.overwrite);
    }
}
