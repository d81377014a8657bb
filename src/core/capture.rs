//! Background capture loop.
//!
//! The loop thread owns the frame buffer while recording. Stopping flips a
//! shared flag; joining the thread hands the buffer back, so the controller
//! only ever reads frames after the writer has drained.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use super::frame::Frame;
use super::source::FrameSource;

/// Poll interval while waiting for the capture thread to finish
const JOIN_POLL: Duration = Duration::from_millis(10);

/// Errors surfaced when stopping the loop
#[derive(Debug, thiserror::Error)]
pub enum CaptureLoopError {
    #[error("Capture thread panicked")]
    Panicked,
    #[error("Capture thread did not stop within {0:?}")]
    StopTimedOut(Duration),
    #[error("Failed to spawn capture thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// What the loop hands back once it has stopped
pub struct Drained {
    pub source: Box<dyn FrameSource>,
    pub frames: Vec<Frame>,
}

/// Handle to a running capture loop
pub struct CaptureLoop {
    recording: Arc<AtomicBool>,
    frame_count: Arc<AtomicU64>,
    failed_captures: Arc<AtomicU64>,
    handle: Option<thread::JoinHandle<Drained>>,
}

impl CaptureLoop {
    /// Spawn the loop on a dedicated thread.
    ///
    /// The thread first waits for `source.is_ready()`, then captures as fast
    /// as the source allows until [`CaptureLoop::stop`] is called.
    pub fn spawn(
        mut source: Box<dyn FrameSource>,
        ready_poll_interval: Duration,
    ) -> Result<Self, CaptureLoopError> {
        let recording = Arc::new(AtomicBool::new(true));
        let frame_count = Arc::new(AtomicU64::new(0));
        let failed_captures = Arc::new(AtomicU64::new(0));

        let flag = recording.clone();
        let count = frame_count.clone();
        let failed = failed_captures.clone();

        let handle = thread::Builder::new()
            .name("screen-recorder".into())
            .spawn(move || {
                // Skip the blank frames a browser shows before its first page
                while flag.load(Ordering::Acquire) && !source.is_ready() {
                    thread::sleep(ready_poll_interval);
                }

                let mut frames = Vec::new();
                while flag.load(Ordering::Acquire) {
                    match source.capture_one() {
                        Ok(data) => {
                            frames.push(Frame::new(frames.len(), data));
                            count.store(frames.len() as u64, Ordering::Relaxed);
                        }
                        Err(e) => {
                            // Transient: the surface may be mid-navigation
                            failed.fetch_add(1, Ordering::Relaxed);
                            log::trace!("Capture failed, skipping: {e}");
                        }
                    }
                }

                log::info!("Stopping recording...");
                Drained { source, frames }
            })?;

        Ok(Self {
            recording,
            frame_count,
            failed_captures,
            handle: Some(handle),
        })
    }

    /// Frames captured so far
    pub fn frame_count(&self) -> u64 {
        self.frame_count.load(Ordering::Relaxed)
    }

    /// Captures that failed and were skipped
    pub fn failed_captures(&self) -> u64 {
        self.failed_captures.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().map(|h| !h.is_finished()).unwrap_or(false)
    }

    /// Signal the loop to stop and wait (bounded) for it to hand back its
    /// frames and source. `None` if it was already collected.
    ///
    /// A capture already in flight is allowed to finish and is kept. On
    /// [`CaptureLoopError::StopTimedOut`] the thread stays attached, so a later
    /// call (a zero timeout just checks) still collects everything.
    pub fn stop(&mut self, timeout: Duration) -> Result<Option<Drained>, CaptureLoopError> {
        self.recording.store(false, Ordering::Release);

        let Some(handle) = self.handle.as_ref() else {
            return Ok(None);
        };

        let deadline = Instant::now() + timeout;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                return Err(CaptureLoopError::StopTimedOut(timeout));
            }
            thread::sleep(JOIN_POLL);
        }

        match self.handle.take() {
            Some(handle) => handle.join().map(Some).map_err(|_| CaptureLoopError::Panicked),
            None => Ok(None),
        }
    }
}

impl Drop for CaptureLoop {
    fn drop(&mut self) {
        self.recording.store(false, Ordering::Release);
    }
}
