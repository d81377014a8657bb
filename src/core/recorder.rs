//! Recording controller: owns the session lifecycle and the frame buffer.
//! State machine: NotStarted → Recording → Stopped (→ Recording again)
//!
//! Frame pipeline: capture thread fills its own buffer → stop() joins the
//! thread and takes the buffer → compiler → validation/cleanup.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::capture::{CaptureLoop, CaptureLoopError};
use super::compiler::{CompileError, CompileOptions, PipelineResult, VideoCompiler};
use super::config::{ConfigError, RecorderConfig};
use super::events::{emit, EventCallback, RecorderEvent};
use super::frame::Frame;
use super::progress::{ProgressSink, TextProgressBar};
use super::source::{create_desktop_capture, DesktopCapture, DesktopSource, FrameSource};

/// Recording session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RecordingState {
    NotStarted,
    Recording,
    Stopped,
}

/// Recording session info for callers polling progress
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingStatus {
    pub state: RecordingState,
    pub session_id: Option<String>,
    /// Elapsed recording time in seconds
    pub elapsed: f64,
    /// Frames captured so far
    pub frame_count: u64,
    /// Captures that failed and were skipped
    pub failed_captures: u64,
}

/// Recording controller errors
#[derive(Debug, thiserror::Error)]
pub enum RecorderError {
    #[error("No frame source configured and no desktop capture available")]
    NotConfigured,
    #[error("Recording already in progress")]
    AlreadyRecording,
    #[error("Previous capture thread has not stopped yet; call stop again")]
    StopPending,
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    #[error("Capture error: {0}")]
    Capture(#[from] CaptureLoopError),
    #[error("Compile error: {0}")]
    Compile(#[from] CompileError),
}

/// How `stop` ended
#[derive(Debug, Clone, PartialEq)]
pub enum StopOutcome {
    /// `stop` was called without a running recording
    NotRecording,
    /// No frames were captured; the compiler was not invoked
    NothingToCompile,
    /// Cleanup was disabled; frames stay available via `take_frames`
    CompilationSkipped { frames: usize },
    Compiled(PipelineResult),
}

/// Screen recording session.
///
/// Configure a frame source (or a desktop fallback), `start`, do the work
/// being recorded, then `stop(true)` to compile the video.
pub struct ScreenRecorder {
    config: RecorderConfig,
    source: Option<Box<dyn FrameSource>>,
    desktop: Option<Box<dyn DesktopCapture>>,
    desktop_fallback: bool,
    compiler: VideoCompiler,
    progress: Box<dyn ProgressSink + Send>,
    events: Option<EventCallback>,

    state: RecordingState,
    capture: Option<CaptureLoop>,
    frames: Vec<Frame>,
    session_id: Option<Uuid>,
    recording_start: Option<Instant>,
    recording_duration: Option<Duration>,
    /// Counters of the last collected capture thread
    last_frame_count: u64,
    last_failed_captures: u64,
}

impl ScreenRecorder {
    pub fn new(config: RecorderConfig) -> Self {
        Self {
            config,
            source: None,
            desktop: None,
            desktop_fallback: false,
            compiler: VideoCompiler::new(),
            progress: Box::new(TextProgressBar::stderr()),
            events: None,
            state: RecordingState::NotStarted,
            capture: None,
            frames: Vec::new(),
            session_id: None,
            recording_start: None,
            recording_duration: None,
            last_frame_count: 0,
            last_failed_captures: 0,
        }
    }

    /// Browser (or other) screenshot source
    pub fn with_source(mut self, source: Box<dyn FrameSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Used when no frame source is configured
    pub fn with_desktop_fallback(mut self, desktop: Box<dyn DesktopCapture>) -> Self {
        self.desktop = Some(desktop);
        self
    }

    /// Use this build's platform desktop capture as the fallback, if any
    pub fn with_platform_desktop(mut self) -> Self {
        if let Some(desktop) = create_desktop_capture() {
            self.desktop = Some(desktop);
        }
        self
    }

    pub fn with_compiler(mut self, compiler: VideoCompiler) -> Self {
        self.compiler = compiler;
        self
    }

    pub fn with_progress(mut self, progress: Box<dyn ProgressSink + Send>) -> Self {
        self.progress = progress;
        self
    }

    /// Receive structured lifecycle events
    pub fn on_event(mut self, callback: EventCallback) -> Self {
        self.events = Some(callback);
        self
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    pub fn state(&self) -> RecordingState {
        self.state
    }

    pub fn is_recording(&self) -> bool {
        self.state == RecordingState::Recording
    }

    pub fn status(&self) -> RecordingStatus {
        let (frame_count, failed_captures) = match &self.capture {
            Some(capture) => (capture.frame_count(), capture.failed_captures()),
            None => (self.last_frame_count, self.last_failed_captures),
        };

        RecordingStatus {
            state: self.state,
            session_id: self.session_id.map(|id| id.to_string()),
            elapsed: self.elapsed(),
            frame_count,
            failed_captures,
        }
    }

    /// Elapsed recording time in seconds
    pub fn elapsed(&self) -> f64 {
        match (self.recording_duration, self.recording_start) {
            (Some(d), _) => d.as_secs_f64(),
            (None, Some(start)) => start.elapsed().as_secs_f64(),
            (None, None) => 0.0,
        }
    }

    /// Output file this session compiles to
    pub fn output_path(&self) -> Result<PathBuf, ConfigError> {
        self.config.output_path()
    }

    /// Start recording on a background thread
    pub fn start(&mut self) -> Result<(), RecorderError> {
        if self.state == RecordingState::Recording {
            return Err(RecorderError::AlreadyRecording);
        }
        match self.collect_capture(Duration::ZERO) {
            Err(CaptureLoopError::StopTimedOut(_)) => return Err(RecorderError::StopPending),
            other => other?,
        }
        self.config.validate()?;

        if self.source.is_none() {
            let desktop = self.desktop.take().ok_or(RecorderError::NotConfigured)?;
            self.source = Some(Box::new(DesktopSource(desktop)));
            self.desktop_fallback = true;
        }
        let source = self.source.take().ok_or(RecorderError::NotConfigured)?;

        self.frames.clear();
        let capture = CaptureLoop::spawn(source, self.config.ready_poll_interval)?;
        let session_id = Uuid::new_v4();

        self.capture = Some(capture);
        self.session_id = Some(session_id);
        self.recording_start = Some(Instant::now());
        self.recording_duration = None;
        self.last_frame_count = 0;
        self.last_failed_captures = 0;
        self.state = RecordingState::Recording;

        emit(
            &mut self.events,
            RecorderEvent::RecordingStarted {
                session_id: session_id.to_string(),
                desktop_fallback: self.desktop_fallback,
            },
        );
        Ok(())
    }

    /// Stop recording; with `cleanup`, compile, validate and remove temp frames.
    ///
    /// Calling this without a running recording is a no-op. If the capture
    /// thread does not exit within `stop_timeout` this fails with
    /// [`CaptureLoopError::StopTimedOut`]; the thread stays attached and
    /// calling `stop` again resumes waiting for it.
    pub fn stop(&mut self, cleanup: bool) -> Result<StopOutcome, RecorderError> {
        let pending = self.state == RecordingState::Stopped && self.capture.is_some();
        if self.state != RecordingState::Recording && !pending {
            return Ok(StopOutcome::NotRecording);
        }
        if !pending {
            self.state = RecordingState::Stopped;
            self.recording_duration = self.recording_start.map(|s| s.elapsed());
        }

        self.collect_capture(self.config.stop_timeout)?;

        let frames = self.frames.len();
        emit(
            &mut self.events,
            RecorderEvent::RecordingStopped {
                session_id: self.session_id.map(|id| id.to_string()).unwrap_or_default(),
                frames,
            },
        );

        if !cleanup {
            emit(&mut self.events, RecorderEvent::CompilationSkippedByCaller { frames });
            return Ok(StopOutcome::CompilationSkipped { frames });
        }
        if frames == 0 {
            emit(&mut self.events, RecorderEvent::NothingToCompile);
            return Ok(StopOutcome::NothingToCompile);
        }

        let result = self.compile_captured()?;
        self.frames.clear();
        Ok(StopOutcome::Compiled(result))
    }

    /// Compile the captured frames to the configured output
    fn compile_captured(&mut self) -> Result<PipelineResult, RecorderError> {
        let output = self.config.output_path()?;
        let opts = CompileOptions {
            fps: self.config.fps,
            width: None,
            height: None,
            overwrite: self.config.overwrite,
            temp_dir: Some(self.config.temp_dir()?),
            frame_extension: self.config.frame_extension().to_string(),
        };

        let result = self.compiler.compile_and_validate(
            &self.frames,
            &output,
            &opts,
            self.progress.as_mut(),
            &mut self.events,
        )?;
        Ok(result)
    }

    /// Take the captured frames (e.g. after `stop(false)`)
    pub fn take_frames(&mut self) -> Vec<Frame> {
        if self.state == RecordingState::Stopped {
            if let Err(e) = self.collect_capture(Duration::ZERO) {
                log::debug!("Capture thread not collected yet: {e}");
            }
        }
        std::mem::take(&mut self.frames)
    }

    /// Join a stopped capture thread, taking back its frames and source.
    /// A thread still running after `timeout` stays attached.
    fn collect_capture(&mut self, timeout: Duration) -> Result<(), CaptureLoopError> {
        let Some(mut capture) = self.capture.take() else {
            return Ok(());
        };

        let stopped = capture.stop(timeout);
        self.last_frame_count = capture.frame_count();
        self.last_failed_captures = capture.failed_captures();
        match stopped {
            Ok(Some(drained)) => {
                self.frames = drained.frames;
                self.source = Some(drained.source);
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(e @ CaptureLoopError::StopTimedOut(_)) => {
                self.capture = Some(capture);
                Err(e)
            }
            Err(e) => Err(e),
        }
    }
}

impl Drop for ScreenRecorder {
    fn drop(&mut self) {
        if self.state == RecordingState::Recording {
            log::warn!("Recorder dropped while recording; frames discarded");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::compiler::test_support::memory_compiler;
    use crate::core::compiler::CompileOutcome;
    use crate::core::frame::test_images::marker_png;
    use crate::core::progress::NoProgress;
    use crate::core::source::CaptureError;
    use crate::core::validate::{CleanupOutcome, ValidationOutcome};
    use std::sync::{Arc, Mutex};

    /// Serves PNG frames with increasing markers; can be limited to `limit` frames
    struct PngSource {
        next: u8,
        limit: Option<u8>,
    }

    impl FrameSource for PngSource {
        fn is_ready(&mut self) -> bool {
            true
        }

        fn capture_one(&mut self) -> Result<Vec<u8>, CaptureError> {
            std::thread::sleep(Duration::from_millis(1));
            if self.limit.is_some_and(|l| self.next >= l) {
                return Err(CaptureError::Unavailable("done".into()));
            }
            let marker = self.next;
            self.next += 1;
            Ok(marker_png(12, 12, marker))
        }
    }

    struct BlankDesktop;

    impl DesktopCapture for BlankDesktop {
        fn capture_desktop(&mut self) -> Result<Vec<u8>, CaptureError> {
            std::thread::sleep(Duration::from_millis(1));
            Ok(marker_png(4, 4, 1))
        }
    }

    fn wait_for(recorder: &ScreenRecorder, frames: u64) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while recorder.status().frame_count < frames && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    fn recorder_in(dir: &std::path::Path, limit: Option<u8>) -> ScreenRecorder {
        let (compiler, _) = memory_compiler();
        ScreenRecorder::new(RecorderConfig::new(dir, "out.mp4"))
            .with_source(Box::new(PngSource { next: 0, limit }))
            .with_compiler(compiler)
            .with_progress(Box::new(NoProgress))
    }

    #[test]
    fn test_state_machine_happy_path() {
        let dir = tempfile::tempdir().unwrap();
        let mut rec = recorder_in(dir.path(), Some(3));
        assert_eq!(rec.state(), RecordingState::NotStarted);

        rec.start().unwrap();
        assert_eq!(rec.state(), RecordingState::Recording);
        wait_for(&rec, 3);

        let outcome = rec.stop(true).unwrap();
        assert_eq!(rec.state(), RecordingState::Stopped);
        match outcome {
            StopOutcome::Compiled(result) => {
                assert_eq!(result.outcome.report().unwrap().frames_written, 3);
                let validation = result.validation.unwrap();
                assert_eq!(validation.outcome, ValidationOutcome::Created);
                assert_eq!(validation.cleanup, CleanupOutcome::Removed);
            }
            other => panic!("Expected Compiled, got {other:?}"),
        }
        assert!(dir.path().join("out.mp4").exists());
        assert!(!dir.path().join("temp_images").exists());
    }

    #[test]
    fn test_start_twice_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut rec = recorder_in(dir.path(), None);
        rec.start().unwrap();
        assert!(matches!(rec.start(), Err(RecorderError::AlreadyRecording)));
        rec.stop(false).unwrap();
    }

    #[test]
    fn test_start_without_source_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut rec = ScreenRecorder::new(RecorderConfig::new(dir.path(), "out.mp4"));
        assert!(matches!(rec.start(), Err(RecorderError::NotConfigured)));
        assert_eq!(rec.state(), RecordingState::NotStarted);
    }

    #[test]
    fn test_invalid_config_rejected_at_start() {
        let dir = tempfile::tempdir().unwrap();
        let mut rec = ScreenRecorder::new(RecorderConfig::new(dir.path(), "out.mp4").with_fps(0))
            .with_source(Box::new(PngSource { next: 0, limit: None }));
        assert!(matches!(rec.start(), Err(RecorderError::Config(_))));
    }

    #[test]
    fn test_desktop_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let (compiler, log) = memory_compiler();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let mut rec = ScreenRecorder::new(RecorderConfig::new(dir.path(), "out.mp4"))
            .with_desktop_fallback(Box::new(BlankDesktop))
            .with_compiler(compiler)
            .with_progress(Box::new(NoProgress))
            .on_event(Box::new(move |e| sink.lock().unwrap().push(e.clone())));

        rec.start().unwrap();
        wait_for(&rec, 2);
        rec.stop(true).unwrap();

        assert!(log.lock().unwrap().markers.len() >= 2);
        assert!(events
            .lock()
            .unwrap()
            .iter()
            .any(|e| matches!(e, RecorderEvent::RecordingStarted { desktop_fallback: true, .. })));
    }

    #[test]
    fn test_stop_when_never_started_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let mut rec = recorder_in(dir.path(), None);
        assert_eq!(rec.stop(true).unwrap(), StopOutcome::NotRecording);
        assert_eq!(rec.state(), RecordingState::NotStarted);
    }

    #[test]
    fn test_stop_without_cleanup_keeps_frames() {
        let dir = tempfile::tempdir().unwrap();
        let mut rec = recorder_in(dir.path(), Some(2));
        rec.start().unwrap();
        wait_for(&rec, 2);

        assert_eq!(rec.stop(false).unwrap(), StopOutcome::CompilationSkipped { frames: 2 });
        assert!(!dir.path().join("out.mp4").exists());
        let frames = rec.take_frames();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].index, 1);
        assert!(rec.take_frames().is_empty());
    }

    #[test]
    fn test_restart_after_stop() {
        let dir = tempfile::tempdir().unwrap();
        let mut rec = recorder_in(dir.path(), None);
        rec.start().unwrap();
        wait_for(&rec, 1);
        rec.stop(false).unwrap();
        let first = rec.status().session_id;

        rec.start().unwrap();
        assert_eq!(rec.status().frame_count, 0);
        assert_ne!(rec.status().session_id, first);
        rec.stop(false).unwrap();
    }

    #[test]
    fn test_overwrite_disabled_skips_compile() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.mp4");
        std::fs::write(&output, b"keep me").unwrap();

        let (compiler, _) = memory_compiler();
        let mut rec = ScreenRecorder::new(RecorderConfig::new(dir.path(), "out.mp4").with_overwrite(false))
            .with_source(Box::new(PngSource { next: 0, limit: Some(2) }))
            .with_compiler(compiler)
            .with_progress(Box::new(NoProgress));
        rec.start().unwrap();
        wait_for(&rec, 2);

        match rec.stop(true).unwrap() {
            StopOutcome::Compiled(result) => {
                assert_eq!(result.outcome, CompileOutcome::SkippedExisting(output.clone()));
                assert!(result.validation.is_none());
            }
            other => panic!("Expected Compiled, got {other:?}"),
        }
        assert_eq!(std::fs::read(&output).unwrap(), b"keep me");
    }

    /// Captures three frames quickly, then blocks on the fourth
    struct StallingSource {
        next: u8,
        stall: Duration,
    }

    impl FrameSource for StallingSource {
        fn is_ready(&mut self) -> bool {
            true
        }

        fn capture_one(&mut self) -> Result<Vec<u8>, CaptureError> {
            std::thread::sleep(if self.next == 3 { self.stall } else { Duration::from_millis(1) });
            let marker = self.next;
            self.next += 1;
            Ok(marker_png(12, 12, marker))
        }
    }

    fn stalling_recorder(dir: &std::path::Path) -> (ScreenRecorder, Arc<Mutex<crate::core::compiler::test_support::Recorded>>) {
        let (compiler, log) = memory_compiler();
        let mut config = RecorderConfig::new(dir, "out.mp4");
        config.stop_timeout = Duration::from_millis(50);
        let rec = ScreenRecorder::new(config)
            .with_source(Box::new(StallingSource { next: 0, stall: Duration::from_millis(400) }))
            .with_compiler(compiler)
            .with_progress(Box::new(NoProgress));
        (rec, log)
    }

    fn is_stop_timeout(result: &Result<StopOutcome, RecorderError>) -> bool {
        matches!(result, Err(RecorderError::Capture(CaptureLoopError::StopTimedOut(_))))
    }

    #[test]
    fn test_stop_timeout_keeps_recording_for_retry() {
        let dir = tempfile::tempdir().unwrap();
        let (mut rec, log) = stalling_recorder(dir.path());
        rec.start().unwrap();
        wait_for(&rec, 3);

        assert!(is_stop_timeout(&rec.stop(true)));
        assert_eq!(rec.state(), RecordingState::Stopped);
        assert!(matches!(rec.start(), Err(RecorderError::StopPending)));

        let deadline = Instant::now() + Duration::from_secs(5);
        let outcome = loop {
            let result = rec.stop(true);
            if is_stop_timeout(&result) && Instant::now() < deadline {
                continue;
            }
            break result.unwrap();
        };

        match outcome {
            StopOutcome::Compiled(result) => assert_eq!(result.outcome.report().unwrap().frames_written, 4),
            other => panic!("Expected Compiled, got {other:?}"),
        }
        assert_eq!(log.lock().unwrap().markers, vec![0, 1, 2, 3]);
        assert_eq!(rec.stop(true).unwrap(), StopOutcome::NotRecording);

        // The source came back, so a new session can start
        rec.start().unwrap();
        rec.stop(false).unwrap();
    }

    #[test]
    fn test_take_frames_after_stop_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let (mut rec, _) = stalling_recorder(dir.path());
        rec.start().unwrap();
        wait_for(&rec, 3);
        assert!(is_stop_timeout(&rec.stop(false)));

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut frames = rec.take_frames();
        while frames.is_empty() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
            frames = rec.take_frames();
        }
        assert_eq!(frames.len(), 4);
        assert_eq!(rec.status().frame_count, 4);
    }

    #[test]
    fn test_status_keeps_counts_after_stop() {
        let dir = tempfile::tempdir().unwrap();
        let mut rec = recorder_in(dir.path(), Some(2));
        rec.start().unwrap();
        wait_for(&rec, 2);
        let deadline = Instant::now() + Duration::from_secs(5);
        while rec.status().failed_captures == 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(2));
        }
        rec.stop(false).unwrap();

        let status = rec.status();
        assert_eq!(status.state, RecordingState::Stopped);
        assert_eq!(status.frame_count, 2);
        assert!(status.failed_captures > 0);

        rec.take_frames();
        assert!(rec.status().failed_captures > 0);
    }

    #[test]
    fn test_status_serializes() {
        let dir = tempfile::tempdir().unwrap();
        let rec = recorder_in(dir.path(), None);
        let json = serde_json::to_value(rec.status()).unwrap();
        assert_eq!(json["state"], "notStarted");
        assert_eq!(json["frameCount"], 0);
    }
}
