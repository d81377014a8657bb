//! Record a browser (or desktop) session as a stream of screenshots and
//! compile it into a video once recording stops.
//!
//! ```ignore
//! use shotreel_lib::{RecorderConfig, ScreenRecorder};
//!
//! let config = RecorderConfig::new("/tmp/evidence", "login_test.avi").with_fps(4);
//! let mut recorder = ScreenRecorder::new(config).with_source(Box::new(my_browser));
//! recorder.start()?;
//! // ... drive the browser ...
//! let outcome = recorder.stop(true)?;
//! ```

pub mod core;

pub use core::compiler::{
    CompileError, CompileOptions, CompileOutcome, CompileReport, PipelineResult, VideoCompiler,
};
pub use core::config::{ConfigError, RecorderConfig, VideoFormat};
pub use core::encoder::{create_encoder, EncoderConfig, EncoderError, VideoEncoder, VideoFrame};
pub use core::events::{EventCallback, RecorderEvent};
pub use core::frame::Frame;
pub use core::progress::{NoProgress, ProgressSink, TextProgressBar};
pub use core::recorder::{RecorderError, RecordingState, RecordingStatus, ScreenRecorder, StopOutcome};
pub use core::source::{CaptureError, DesktopCapture, FrameSource};
pub use core::validate::{validate, CleanupOutcome, ValidationOutcome, ValidationReport};

use std::path::Path;

/// Compile a folder of numbered frames (`0.png`, `1.png`, ...) left behind by
/// an earlier session, using the config's output path, fps and overwrite
/// policy. The folder is removed once the video validates.
pub fn compile_frame_folder(
    config: &RecorderConfig,
    folder: &Path,
    progress: &mut dyn ProgressSink,
) -> Result<PipelineResult, CompileError> {
    config.validate()?;
    let output = config.output_path()?;
    let opts = CompileOptions {
        fps: config.fps,
        overwrite: config.overwrite,
        frame_extension: config.frame_extension().to_string(),
        ..Default::default()
    };
    VideoCompiler::new().compile_folder(folder, &output, &opts, true, progress, &mut None)
}
