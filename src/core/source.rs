//! Frame source abstraction.
//!
//! The pipeline never drives a browser itself: callers plug in anything that
//! can hand back one encoded screenshot on request. When no browser source is
//! configured a desktop capture backend can stand in.

/// Capture error types
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("Capture surface unavailable: {0}")]
    Unavailable(String),
    #[error("Capture target not found")]
    TargetNotFound,
    #[error("Image encode failed: {0}")]
    Encode(String),
    #[error("Platform error: {0}")]
    Platform(String),
}

/// A browser session (or anything similar) that can produce screenshots.
pub trait FrameSource: Send {
    /// Whether the session has something worth recording yet.
    /// Browsers report a blank target (`data:,`, `about:blank`) on startup.
    fn is_ready(&mut self) -> bool;

    /// Take one screenshot as encoded image bytes
    fn capture_one(&mut self) -> Result<Vec<u8>, CaptureError>;
}

/// Whole-desktop screenshot capability, used when no `FrameSource` is given.
pub trait DesktopCapture: Send {
    fn capture_desktop(&mut self) -> Result<Vec<u8>, CaptureError>;
}

/// True for the placeholder URLs a browser shows before the first navigation
pub fn is_blank_target(url: &str) -> bool {
    let url = url.trim();
    url.is_empty() || url == "data:," || url == "about:blank"
}

/// Adapts a desktop capture backend to the `FrameSource` interface.
/// The desktop is always ready.
pub struct DesktopSource(pub Box<dyn DesktopCapture>);

impl FrameSource for DesktopSource {
    fn is_ready(&mut self) -> bool {
        true
    }

    fn capture_one(&mut self) -> Result<Vec<u8>, CaptureError> {
        self.0.capture_desktop()
    }
}

/// Primary-monitor capture through `xcap`, PNG-encoded
#[cfg(feature = "desktop")]
pub mod xcap_desktop {
    use super::*;

    pub struct PrimaryMonitorCapture {
        monitor: xcap::Monitor,
    }

    impl PrimaryMonitorCapture {
        pub fn new() -> Result<Self, CaptureError> {
            let monitors = xcap::Monitor::all().map_err(|e| CaptureError::Platform(e.to_string()))?;
            let monitor = monitors.into_iter().next().ok_or(CaptureError::TargetNotFound)?;
            Ok(Self { monitor })
        }
    }

    impl DesktopCapture for PrimaryMonitorCapture {
        fn capture_desktop(&mut self) -> Result<Vec<u8>, CaptureError> {
            let shot = self
                .monitor
                .capture_image()
                .map_err(|e| CaptureError::Unavailable(e.to_string()))?;
            let mut out = std::io::Cursor::new(Vec::new());
            image::DynamicImage::ImageRgba8(shot)
                .write_to(&mut out, image::ImageFormat::Png)
                .map_err(|e| CaptureError::Encode(e.to_string()))?;
            Ok(out.into_inner())
        }
    }
}

/// Create the platform desktop fallback, if this build has one
pub fn create_desktop_capture() -> Option<Box<dyn DesktopCapture>> {
    #[cfg(feature = "desktop")]
    {
        match xcap_desktop::PrimaryMonitorCapture::new() {
            Ok(capture) => return Some(Box::new(capture)),
            Err(e) => {
                log::warn!("Desktop capture unavailable: {e}");
            }
        }
    }

    None
}
