//! Post-write validation of the output file and temp-frame cleanup.

use std::path::{Path, PathBuf};

use serde::Serialize;

use super::events::{emit, EventCallback, RecorderEvent};

/// State of the output file after compilation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationOutcome {
    /// Exists and has content
    Created,
    /// Exists but is zero bytes
    CreatedEmpty,
    Missing,
}

impl ValidationOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Created)
    }
}

/// What happened to the temp folder
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupOutcome {
    /// No temp folder was given
    NotRequested,
    /// Kept for diagnosis because the output is missing or empty
    Preserved,
    Removed,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    pub output: PathBuf,
    pub outcome: ValidationOutcome,
    pub cleanup: CleanupOutcome,
}

/// Inspect `output` without side effects
pub fn inspect(output: &Path) -> ValidationOutcome {
    match std::fs::metadata(output) {
        Ok(meta) if meta.is_file() && meta.len() > 0 => ValidationOutcome::Created,
        Ok(meta) if meta.is_file() => ValidationOutcome::CreatedEmpty,
        _ => ValidationOutcome::Missing,
    }
}

/// Check the output file; on success remove `temp_dir` (if given).
///
/// Deletion errors are reported, never raised. Temp files are kept whenever
/// the output is missing or empty.
pub fn validate(
    output: &Path,
    temp_dir: Option<&Path>,
    events: &mut Option<EventCallback>,
) -> ValidationReport {
    let outcome = inspect(output);
    let output_buf = output.to_path_buf();

    let cleanup = match outcome {
        ValidationOutcome::Missing => {
            emit(events, RecorderEvent::ValidationMissing { output: output_buf.clone() });
            preserved_or_none(temp_dir)
        }
        ValidationOutcome::CreatedEmpty => {
            emit(events, RecorderEvent::ValidationEmpty { output: output_buf.clone() });
            preserved_or_none(temp_dir)
        }
        ValidationOutcome::Created => {
            emit(events, RecorderEvent::ValidationCreated { output: output_buf.clone() });
            match temp_dir {
                Some(dir) => remove_temp_dir(dir, events),
                None => CleanupOutcome::NotRequested,
            }
        }
    };

    ValidationReport { output: output_buf, outcome, cleanup }
}

fn preserved_or_none(temp_dir: Option<&Path>) -> CleanupOutcome {
    match temp_dir {
        Some(_) => CleanupOutcome::Preserved,
        None => CleanupOutcome::NotRequested,
    }
}

fn remove_temp_dir(dir: &Path, events: &mut Option<EventCallback>) -> CleanupOutcome {
    log::info!("Removing temporary images at '{}'.", dir.display());
    match std::fs::remove_dir_all(dir) {
        Ok(()) => {
            emit(events, RecorderEvent::CleanupCompleted { temp_dir: dir.to_path_buf() });
            CleanupOutcome::Removed
        }
        // Already gone counts as clean
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => CleanupOutcome::Removed,
        Err(e) => {
            let reason = e.to_string();
            emit(
                events,
                RecorderEvent::CleanupFailed { temp_dir: dir.to_path_buf(), reason: reason.clone() },
            );
            CleanupOutcome::Failed(reason)
        }
    }
}
