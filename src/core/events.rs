//! Lifecycle events with stable outcome codes.
//!
//! Every event is also logged; the callback is for harnesses that want to
//! assert on outcomes without scraping log text.

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum RecorderEvent {
    RecordingStarted { session_id: String, desktop_fallback: bool },
    RecordingStopped { session_id: String, frames: usize },
    CompilationSkippedByCaller { frames: usize },
    NothingToCompile,
    CompileStarted { output: PathBuf, frames: usize },
    OverwritingExisting { output: PathBuf },
    CompileSkippedExisting { output: PathBuf },
    FrameDropped { index: usize, reason: String },
    CompileCompleted {
        output: PathBuf,
        frames_written: usize,
        frames_dropped: usize,
        elapsed_ms: u64,
        /// FourCC the backend wrote, when it reports one
        codec: Option<String>,
    },
    CompileFailed { output: PathBuf, reason: String },
    ValidationCreated { output: PathBuf },
    ValidationEmpty { output: PathBuf },
    ValidationMissing { output: PathBuf },
    CleanupCompleted { temp_dir: PathBuf },
    CleanupFailed { temp_dir: PathBuf, reason: String },
}

impl RecorderEvent {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Self::RecordingStarted { .. } => "recording_started",
            Self::RecordingStopped { .. } => "recording_stopped",
            Self::CompilationSkippedByCaller { .. } => "compilation_skipped_by_caller",
            Self::NothingToCompile => "nothing_to_compile",
            Self::CompileStarted { .. } => "compile_started",
            Self::OverwritingExisting { .. } => "overwriting_existing",
            Self::CompileSkippedExisting { .. } => "compile_skipped_existing",
            Self::FrameDropped { .. } => "frame_dropped",
            Self::CompileCompleted { .. } => "compile_completed",
            Self::CompileFailed { .. } => "compile_failed",
            Self::ValidationCreated { .. } => "validation_created",
            Self::ValidationEmpty { .. } => "validation_empty",
            Self::ValidationMissing { .. } => "validation_missing",
            Self::CleanupCompleted { .. } => "cleanup_completed",
            Self::CleanupFailed { .. } => "cleanup_failed",
        }
    }

    /// Write the event to the `log` facade at its level
    pub fn log(&self) {
        match self {
            Self::RecordingStarted { session_id, desktop_fallback } => {
                if *desktop_fallback {
                    log::info!("Recording started ({session_id}, desktop capture)");
                } else {
                    log::info!("Recording started ({session_id})");
                }
            }
            Self::RecordingStopped { session_id, frames } => {
                log::info!("Recording stopped ({session_id}): {frames} frames captured");
            }
            Self::CompilationSkippedByCaller { frames } => {
                log::warn!("Cleanup disabled, video was not compiled ({frames} frames kept)");
            }
            Self::NothingToCompile => log::warn!("No frames captured, nothing to compile"),
            Self::CompileStarted { output, frames } => {
                log::info!("Compiling screen recording: {frames} frames -> '{}'", output.display());
            }
            Self::OverwritingExisting { output } => {
                log::warn!("File '{}' already exists, and will be overwritten.", output.display());
            }
            Self::CompileSkippedExisting { output } => {
                log::warn!("File '{}' already exists, and will NOT be overwritten.", output.display());
            }
            Self::FrameDropped { index, reason } => log::warn!("Dropped frame {index}: {reason}"),
            Self::CompileCompleted { frames_written, frames_dropped, elapsed_ms, codec, .. } => {
                log::info!(
                    "Video compilation complete - Duration: {} ({frames_written} frames, {frames_dropped} dropped, codec {})",
                    format_elapsed(Duration::from_millis(*elapsed_ms)),
                    codec.as_deref().unwrap_or("unknown")
                );
            }
            Self::CompileFailed { output, reason } => {
                log::error!("Compilation of '{}' failed: {reason}", output.display());
            }
            Self::ValidationCreated { output } => {
                log::info!("File '{}' has been created and populated.", output.display());
            }
            Self::ValidationEmpty { output } => {
                log::warn!("File '{}' was created but is EMPTY.", output.display());
            }
            Self::ValidationMissing { output } => {
                log::error!("File '{}' was NOT created.", output.display());
            }
            Self::CleanupCompleted { temp_dir } => {
                log::info!("Removed temporary images at '{}'.", temp_dir.display());
            }
            Self::CleanupFailed { temp_dir, reason } => {
                log::warn!("There was an issue deleting the folder '{}' - {reason}", temp_dir.display());
            }
        }
    }
}

/// Receives lifecycle events
pub type EventCallback = Box<dyn FnMut(&RecorderEvent) + Send>;

/// Log the event and forward it to the callback, if any
pub fn emit(callback: &mut Option<EventCallback>, event: RecorderEvent) {
    event.log();
    if let Some(cb) = callback.as_mut() {
        cb(&event);
    }
}

/// `H:MM:SS.mmm`
pub fn format_elapsed(d: Duration) -> String {
    let total_ms = d.as_millis();
    let hours = total_ms / 3_600_000;
    let minutes = (total_ms / 60_000) % 60;
    let seconds = (total_ms / 1000) % 60;
    let millis = total_ms % 1000;
    format!("{hours}:{minutes:02}:{seconds:02}.{millis:03}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(Duration::from_millis(0)), "0:00:00.000");
        assert_eq!(format_elapsed(Duration::from_millis(3_723_045)), "1:02:03.045");
    }

    #[test]
    fn test_serialized_code_matches_code() {
        let event = RecorderEvent::ValidationEmpty { output: PathBuf::from("/tmp/a.mp4") };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["code"], event.code());
        assert_eq!(json["output"], "/tmp/a.mp4");

        let json = serde_json::to_value(RecorderEvent::NothingToCompile).unwrap();
        assert_eq!(json["code"], "nothing_to_compile");
    }

    #[test]
    fn test_emit_forwards_to_callback() {
        let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = seen.clone();
        let mut cb: Option<EventCallback> = Some(Box::new(move |e| sink.lock().unwrap().push(e.code())));

        emit(&mut cb, RecorderEvent::NothingToCompile);
        emit(&mut None, RecorderEvent::NothingToCompile);

        assert_eq!(*seen.lock().unwrap(), vec!["nothing_to_compile"]);
    }
}
