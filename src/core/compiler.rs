//! Video compiler: ordered frames in, one video container out.
//!
//! Per frame, in capture order:
//! 1. materialize to `{temp_dir}/{index}.{ext}`, decode the file, encode
//! 2. if materializing or decoding failed, decode the in-memory bytes and encode
//! 3. if that fails too, drop the frame and keep going
//!
//! A frame the encoder rejects is dropped straight away; it is never sent twice.
//!
//! The encoder is always finished (file closed) before results are returned.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use image::imageops::FilterType;
use image::RgbImage;

use super::config::{ConfigError, VideoFormat};
use super::encoder::{
    default_factory, fourcc_string, EncoderConfig, EncoderError, EncoderFactory, VideoEncoder, VideoFrame,
};
use super::events::{emit, EventCallback, RecorderEvent};
use super::frame::{decode_file, load_frame_folder, Frame, FrameError};
use super::materializer::materialize;
use super::progress::ProgressSink;
use super::validate::{validate, ValidationReport};

/// Per-call compile settings
#[derive(Debug, Clone, PartialEq)]
pub struct CompileOptions {
    pub fps: u32,
    /// Container size; inferred from the first frame when either is `None`
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub overwrite: bool,
    /// Where frames are materialized; `None` skips straight to in-memory decode
    pub temp_dir: Option<PathBuf>,
    pub frame_extension: String,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            fps: super::config::DEFAULT_FPS,
            width: None,
            height: None,
            overwrite: true,
            temp_dir: None,
            frame_extension: "png".into(),
        }
    }
}

/// Compile errors. Per-frame problems never show up here.
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("No frames to compile")]
    NoFrames,
    #[error("Could not determine video resolution: {0}")]
    ResolutionInference(#[source] FrameError),
    #[error("Unsupported output: {0}")]
    Format(#[from] ConfigError),
    #[error("Encoder error: {0}")]
    Encoder(#[from] EncoderError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// How a frame made it into the video
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePath {
    TempFile,
    InMemory,
}

/// Result of pushing one frame through the fallback chain
#[derive(Debug)]
pub enum FrameAttempt {
    Written(FramePath),
    /// Neither the temp file nor the in-memory bytes could be decoded
    Undecodable {
        /// Why the temp-file path failed (`None` when it was not tried)
        temp_file: Option<String>,
        in_memory: String,
    },
    /// The frame decoded but the encoder refused it
    EncoderRejected { path: FramePath, reason: String },
}

impl FrameAttempt {
    /// Why the frame was dropped, `None` if it was written
    pub fn drop_reason(&self) -> Option<String> {
        match self {
            Self::Written(_) => None,
            Self::Undecodable { temp_file: Some(t), in_memory } => {
                Some(format!("temp file: {t}; in memory: {in_memory}"))
            }
            Self::Undecodable { temp_file: None, in_memory } => Some(in_memory.clone()),
            Self::EncoderRejected { reason, .. } => Some(format!("encoder: {reason}")),
        }
    }
}

/// Summary of a finished compilation
#[derive(Debug, Clone, PartialEq)]
pub struct CompileReport {
    pub output: PathBuf,
    pub width: u32,
    pub height: u32,
    pub frames_written: usize,
    /// Capture indices of frames that could not be written
    pub dropped: Vec<usize>,
    /// FourCC the backend wrote (`mp4v`, `DIVX`, `MJPG`), when it reports one
    pub codec: Option<String>,
    /// Frames that needed the in-memory fallback
    pub fallbacks: usize,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CompileOutcome {
    Written(CompileReport),
    /// Output exists and overwrite is off; the file was left untouched
    SkippedExisting(PathBuf),
}

impl CompileOutcome {
    pub fn report(&self) -> Option<&CompileReport> {
        match self {
            Self::Written(report) => Some(report),
            Self::SkippedExisting(_) => None,
        }
    }
}

/// Compilation plus the validation that followed it
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineResult {
    pub outcome: CompileOutcome,
    /// `None` when compilation was skipped
    pub validation: Option<ValidationReport>,
}

pub struct VideoCompiler {
    factory: EncoderFactory,
}

impl Default for VideoCompiler {
    fn default() -> Self {
        Self::new()
    }
}

impl VideoCompiler {
    pub fn new() -> Self {
        Self { factory: default_factory() }
    }

    /// Use a caller-supplied encoder backend
    pub fn with_encoder_factory(factory: EncoderFactory) -> Self {
        Self { factory }
    }

    /// Encode `frames` into `output`, in order.
    pub fn compile(
        &self,
        frames: &[Frame],
        output: &Path,
        opts: &CompileOptions,
        progress: &mut dyn ProgressSink,
        events: &mut Option<EventCallback>,
    ) -> Result<CompileOutcome, CompileError> {
        let first = frames.first().ok_or(CompileError::NoFrames)?;
        emit(events, RecorderEvent::CompileStarted { output: output.to_path_buf(), frames: frames.len() });

        let (width, height) = match (opts.width, opts.height) {
            (Some(w), Some(h)) => (w, h),
            _ => first.dimensions().map_err(|e| {
                let reason = format!("could not determine video resolution: {e}");
                emit(events, RecorderEvent::CompileFailed { output: output.to_path_buf(), reason });
                CompileError::ResolutionInference(e)
            })?,
        };

        let format = VideoFormat::from_path(output)?;

        if output.exists() {
            if opts.overwrite {
                emit(events, RecorderEvent::OverwritingExisting { output: output.to_path_buf() });
            } else {
                emit(events, RecorderEvent::CompileSkippedExisting { output: output.to_path_buf() });
                return Ok(CompileOutcome::SkippedExisting(output.to_path_buf()));
            }
        }

        let start = Instant::now();
        let config = EncoderConfig::new(width, height, opts.fps, format, output.to_path_buf());
        let mut encoder = self.open_encoder(config).map_err(|e| {
            emit(events, RecorderEvent::CompileFailed { output: output.to_path_buf(), reason: e.to_string() });
            e
        })?;

        let codec = encoder.fourcc();
        if let Some(tag) = codec.filter(|tag| *tag != format.fourcc()) {
            log::warn!(
                "{format} output uses codec {} instead of {}",
                fourcc_string(tag),
                fourcc_string(format.fourcc())
            );
        }
        let codec = codec.map(fourcc_string);

        let total = frames.len();
        let mut written = 0usize;
        let mut fallbacks = 0usize;
        let mut dropped = Vec::new();

        for (i, frame) in frames.iter().enumerate() {
            let attempt = write_frame(encoder.as_mut(), frame, opts, width, height);
            match attempt.drop_reason() {
                None => {
                    written += 1;
                    if matches!(attempt, FrameAttempt::Written(FramePath::InMemory)) && opts.temp_dir.is_some() {
                        fallbacks += 1;
                    }
                }
                Some(reason) => {
                    emit(events, RecorderEvent::FrameDropped { index: frame.index, reason });
                    dropped.push(frame.index);
                }
            }
            progress.on_progress(i + 1, total);
        }
        progress.on_complete();

        let finished = encoder.finish();
        drop(encoder);
        if let Err(e) = finished {
            emit(events, RecorderEvent::CompileFailed { output: output.to_path_buf(), reason: e.to_string() });
            return Err(e.into());
        }

        let elapsed = start.elapsed();
        emit(
            events,
            RecorderEvent::CompileCompleted {
                output: output.to_path_buf(),
                frames_written: written,
                frames_dropped: dropped.len(),
                elapsed_ms: elapsed.as_millis() as u64,
                codec: codec.clone(),
            },
        );

        Ok(CompileOutcome::Written(CompileReport {
            output: output.to_path_buf(),
            width,
            height,
            frames_written: written,
            dropped,
            codec,
            fallbacks,
            elapsed,
        }))
    }

    /// Compile, then validate the output and clean `opts.temp_dir` on success
    pub fn compile_and_validate(
        &self,
        frames: &[Frame],
        output: &Path,
        opts: &CompileOptions,
        progress: &mut dyn ProgressSink,
        events: &mut Option<EventCallback>,
    ) -> Result<PipelineResult, CompileError> {
        let outcome = self.compile(frames, output, opts, progress, events)?;
        let validation = match &outcome {
            CompileOutcome::Written(_) => Some(validate(output, opts.temp_dir.as_deref(), events)),
            CompileOutcome::SkippedExisting(_) => None,
        };
        Ok(PipelineResult { outcome, validation })
    }

    /// Compile a folder of numbered frame files (`0.png`, `1.png`, ...).
    ///
    /// The folder is removed after a successful validation when
    /// `remove_folder` is set.
    pub fn compile_folder(
        &self,
        folder: &Path,
        output: &Path,
        opts: &CompileOptions,
        remove_folder: bool,
        progress: &mut dyn ProgressSink,
        events: &mut Option<EventCallback>,
    ) -> Result<PipelineResult, CompileError> {
        let frames = load_frame_folder(folder, &opts.frame_extension).map_err(|e| match e {
            FrameError::Io(io) => CompileError::Io(io),
            other => CompileError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, other.to_string())),
        })?;
        if frames.is_empty() {
            emit(events, RecorderEvent::NothingToCompile);
            return Err(CompileError::NoFrames);
        }

        // Frames are already on disk; no need to materialize them again
        let direct = CompileOptions { temp_dir: None, ..opts.clone() };
        let outcome = self.compile(&frames, output, &direct, progress, events)?;
        let validation = match &outcome {
            CompileOutcome::Written(_) => {
                let cleanup = if remove_folder { Some(folder) } else { None };
                Some(validate(output, cleanup, events))
            }
            CompileOutcome::SkippedExisting(_) => None,
        };
        Ok(PipelineResult { outcome, validation })
    }

    fn open_encoder(&self, config: EncoderConfig) -> Result<Box<dyn VideoEncoder>, CompileError> {
        let mut encoder = (self.factory)(config)?;
        encoder.start()?;
        Ok(encoder)
    }
}

/// Push one frame through temp-file → in-memory → drop.
///
/// Only a failed materialize or decode falls through to the in-memory
/// path. Once the encoder has seen a frame it is not offered again.
pub fn write_frame(
    encoder: &mut dyn VideoEncoder,
    frame: &Frame,
    opts: &CompileOptions,
    width: u32,
    height: u32,
) -> FrameAttempt {
    let temp_file = match &opts.temp_dir {
        Some(dir) => {
            let decoded = materialize(&frame.data, dir, frame.index, &opts.frame_extension)
                .map_err(|e| e.to_string())
                .and_then(|path| decode_file(&path).map_err(|e| e.to_string()));
            match decoded {
                Ok(img) => return append(encoder, img, width, height, FramePath::TempFile),
                Err(reason) => {
                    log::debug!("Frame {}: temp-file path failed ({reason}), trying in memory", frame.index);
                    Some(reason)
                }
            }
        }
        None => None,
    };

    match frame.decode() {
        Ok(img) => append(encoder, img, width, height, FramePath::InMemory),
        Err(e) => FrameAttempt::Undecodable { temp_file, in_memory: e.to_string() },
    }
}

fn append(encoder: &mut dyn VideoEncoder, img: RgbImage, width: u32, height: u32, path: FramePath) -> FrameAttempt {
    let img = fit_to(img, width, height);
    match encoder.append_frame(&VideoFrame::from_rgb(img)) {
        Ok(()) => FrameAttempt::Written(path),
        Err(e) => FrameAttempt::EncoderRejected { path, reason: e.to_string() },
    }
}

/// Frames that differ from the container size are resized to it
pub fn fit_to(img: RgbImage, width: u32, height: u32) -> RgbImage {
    if img.dimensions() == (width, height) {
        img
    } else {
        image::imageops::resize(&img, width, height, FilterType::Triangle)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::{Arc, Mutex};

    use super::*;

    /// What a [`MemoryEncoder`] saw
    #[derive(Debug, Default)]
    pub struct Recorded {
        pub config: Option<EncoderConfig>,
        /// Red channel of the center pixel of each appended frame
        pub markers: Vec<u8>,
        pub finished: bool,
    }

    /// Records frames and writes one byte per frame to the output path
    pub struct MemoryEncoder {
        config: EncoderConfig,
        log: Arc<Mutex<Recorded>>,
        bytes: Option<Vec<u8>>,
    }

    impl VideoEncoder for MemoryEncoder {
        fn start(&mut self) -> Result<(), EncoderError> {
            if self.bytes.is_some() {
                return Err(EncoderError::AlreadyStarted);
            }
            self.bytes = Some(Vec::new());
            self.log.lock().unwrap().config = Some(self.config.clone());
            Ok(())
        }

        fn append_frame(&mut self, frame: &VideoFrame) -> Result<(), EncoderError> {
            crate::core::encoder::check_frame_size(&self.config, frame)?;
            let bytes = self.bytes.as_mut().ok_or(EncoderError::NotStarted)?;
            let center = ((frame.height / 2) as usize * frame.stride()) + (frame.width / 2) as usize * 3;
            let marker = frame.data[center];
            bytes.push(marker);
            self.log.lock().unwrap().markers.push(marker);
            Ok(())
        }

        fn finish(&mut self) -> Result<PathBuf, EncoderError> {
            let bytes = self.bytes.take().ok_or(EncoderError::NotStarted)?;
            std::fs::write(&self.config.output_path, bytes)?;
            self.log.lock().unwrap().finished = true;
            Ok(self.config.output_path.clone())
        }

        fn is_encoding(&self) -> bool {
            self.bytes.is_some()
        }

        fn frames_encoded(&self) -> u64 {
            self.log.lock().unwrap().markers.len() as u64
        }
    }

    pub fn memory_compiler() -> (VideoCompiler, Arc<Mutex<Recorded>>) {
        let log = Arc::new(Mutex::new(Recorded::default()));
        let shared = log.clone();
        let compiler = VideoCompiler::with_encoder_factory(Box::new(move |config| {
            Ok(Box::new(MemoryEncoder { config, log: shared.clone(), bytes: None }) as Box<dyn VideoEncoder>)
        }));
        (compiler, log)
    }
}
