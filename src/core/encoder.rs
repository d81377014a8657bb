//! Video encoding abstraction.
//! Trait-based so the compiler can run against FFmpeg (default), the opt-in
//! Motion-JPEG AVI writer, or a caller-supplied backend.

use std::path::PathBuf;

use image::RgbImage;

use super::config::VideoFormat;

/// Video encoder configuration
#[derive(Debug, Clone)]
pub struct EncoderConfig {
    pub width: u32,
    pub height: u32,
    /// Nominal playback rate; frames are not timed against the wall clock
    pub frame_rate: u32,
    pub format: VideoFormat,
    pub output_path: PathBuf,
    /// JPEG quality for the built-in Motion-JPEG writer (1-100)
    pub jpeg_quality: u8,
}

impl EncoderConfig {
    pub fn new(width: u32, height: u32, frame_rate: u32, format: VideoFormat, output_path: PathBuf) -> Self {
        Self {
            width,
            height,
            frame_rate: frame_rate.max(1),
            format,
            output_path,
            jpeg_quality: 85,
        }
    }

    /// Rough MPEG-4 bit rate: ~0.2 bits per pixel per frame, floor of 400 kbit/s
    pub fn bit_rate(&self) -> u64 {
        let bits = self.width as f64 * self.height as f64 * self.frame_rate as f64 * 0.2;
        (bits as u64).max(400_000)
    }
}

/// A decoded RGB24 frame, tightly packed (`width * 3` bytes per row)
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl VideoFrame {
    pub fn from_rgb(img: RgbImage) -> Self {
        let (width, height) = img.dimensions();
        Self { data: img.into_raw(), width, height }
    }

    pub fn stride(&self) -> usize {
        self.width as usize * 3
    }
}

/// Encoder error types
#[derive(Debug, thiserror::Error)]
pub enum EncoderError {
    #[error("Encoder already started")]
    AlreadyStarted,
    #[error("Encoder not started")]
    NotStarted,
    #[error("No encoder available for {0}")]
    Unavailable(VideoFormat),
    #[error("Frame is {got_w}x{got_h}, encoder expects {want_w}x{want_h}")]
    FrameSize { got_w: u32, got_h: u32, want_w: u32, want_h: u32 },
    #[error("Image encode error: {0}")]
    Image(#[from] image::ImageError),
    #[error("FFmpeg error: {0}")]
    Ffmpeg(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Video encoder abstraction trait.
pub trait VideoEncoder: Send {
    /// Open the output file and write the container header
    fn start(&mut self) -> Result<(), EncoderError>;

    /// Append a frame (call in capture order)
    fn append_frame(&mut self, frame: &VideoFrame) -> Result<(), EncoderError>;

    /// Flush and close the output file
    fn finish(&mut self) -> Result<PathBuf, EncoderError>;

    fn is_encoding(&self) -> bool;

    fn frames_encoded(&self) -> u64;

    /// Codec tag written to the container, when the backend knows it
    fn fourcc(&self) -> Option<[u8; 4]> {
        None
    }
}

/// Printable form of a FourCC (`mp4v`, `DIVX`, ...)
pub fn fourcc_string(tag: [u8; 4]) -> String {
    String::from_utf8_lossy(&tag).into_owned()
}

/// Builds an encoder for a given configuration
pub type EncoderFactory = Box<dyn Fn(EncoderConfig) -> Result<Box<dyn VideoEncoder>, EncoderError> + Send + Sync>;

/// Reject frames that do not match the configured resolution
pub(crate) fn check_frame_size(config: &EncoderConfig, frame: &VideoFrame) -> Result<(), EncoderError> {
    if frame.width != config.width || frame.height != config.height {
        return Err(EncoderError::FrameSize {
            got_w: frame.width,
            got_h: frame.height,
            want_w: config.width,
            want_h: config.height,
        });
    }
    Ok(())
}

/// FFmpeg-based video encoder using ffmpeg-next crate.
/// Encodes RGB24 frames to MPEG-4 Part 2 in mp4 or avi, tagged per
/// [`VideoFormat::fourcc`].
#[cfg(feature = "ffmpeg")]
pub mod ffmpeg_encoder {
    use super::*;
    use ffmpeg::codec;
    use ffmpeg::format;
    use ffmpeg::software::scaling;
    use ffmpeg::util::frame::video::Video as FfmpegFrame;
    use ffmpeg_next as ffmpeg;

    /// Wrapper to make scaling::Context Send-safe.
    /// SwsContext is safe to use from one thread at a time (our usage pattern).
    struct SendScaler(scaling::Context);
    // SAFETY: the scaler is only touched by the thread that owns the encoder.
    unsafe impl Send for SendScaler {}

    impl std::ops::Deref for SendScaler {
        type Target = scaling::Context;
        fn deref(&self) -> &Self::Target {
            &self.0
        }
    }
    impl std::ops::DerefMut for SendScaler {
        fn deref_mut(&mut self) -> &mut Self::Target {
            &mut self.0
        }
    }

    struct Session {
        output_ctx: format::context::Output,
        encoder: codec::encoder::video::Encoder,
        scaler: SendScaler,
        stream_index: usize,
    }

    pub struct FfmpegEncoder {
        config: EncoderConfig,
        session: Option<Session>,
        frame_count: u64,
        time_base: ffmpeg::Rational,
    }

    impl FfmpegEncoder {
        pub fn new(config: EncoderConfig) -> Result<Self, EncoderError> {
            ffmpeg::init().map_err(|e| EncoderError::Ffmpeg(format!("FFmpeg init: {e}")))?;
            let time_base = ffmpeg::Rational::new(1, config.frame_rate as i32);
            Ok(Self { config, session: None, frame_count: 0, time_base })
        }

        fn write_pending_packets(session: &mut Session, time_base: ffmpeg::Rational) -> Result<(), EncoderError> {
            let mut packet = ffmpeg::Packet::empty();
            while session.encoder.receive_packet(&mut packet).is_ok() {
                packet.set_stream(session.stream_index);
                let stream_tb = session
                    .output_ctx
                    .stream(session.stream_index)
                    .map(|s| s.time_base())
                    .unwrap_or(time_base);
                packet.rescale_ts(time_base, stream_tb);
                packet
                    .write_interleaved(&mut session.output_ctx)
                    .map_err(|e| EncoderError::Ffmpeg(format!("Write packet: {e}")))?;
            }
            Ok(())
        }
    }

    impl VideoEncoder for FfmpegEncoder {
        fn start(&mut self) -> Result<(), EncoderError> {
            if self.session.is_some() {
                return Err(EncoderError::AlreadyStarted);
            }

            let mut output_ctx = format::output(&self.config.output_path)
                .map_err(|e| EncoderError::Ffmpeg(format!("Open output: {e}")))?;

            let codec = codec::encoder::find(codec::Id::MPEG4)
                .ok_or_else(|| EncoderError::Ffmpeg("MPEG-4 encoder not found".into()))?;

            // Check global header flag before add_stream borrows output_ctx
            let needs_global_header = output_ctx.format().flags().contains(format::Flags::GLOBAL_HEADER);

            let mut stream = output_ctx
                .add_stream(codec)
                .map_err(|e| EncoderError::Ffmpeg(format!("Add stream: {e}")))?;
            let stream_index = stream.index();
            stream.set_time_base(self.time_base);

            let mut encoder_ctx = codec::context::Context::new_with_codec(codec)
                .encoder()
                .video()
                .map_err(|e| EncoderError::Ffmpeg(format!("Encoder context: {e}")))?;

            encoder_ctx.set_width(self.config.width);
            encoder_ctx.set_height(self.config.height);
            encoder_ctx.set_format(ffmpeg::format::Pixel::YUV420P);
            encoder_ctx.set_time_base(self.time_base);
            encoder_ctx.set_frame_rate(Some(ffmpeg::Rational::new(self.config.frame_rate as i32, 1)));
            encoder_ctx.set_bit_rate(self.config.bit_rate() as usize);

            if needs_global_header {
                encoder_ctx.set_flags(codec::Flags::GLOBAL_HEADER);
            }

            let tag = u32::from_le_bytes(self.config.format.fourcc());
            // SAFETY: plain field write on a context we own and have not opened yet.
            unsafe {
                (*encoder_ctx.as_mut_ptr()).codec_tag = tag;
            }

            let encoder = encoder_ctx
                .open_as(codec)
                .map_err(|e| EncoderError::Ffmpeg(format!("Open encoder: {e}")))?;

            stream.set_parameters(&encoder);

            output_ctx
                .write_header()
                .map_err(|e| EncoderError::Ffmpeg(format!("Write header: {e}")))?;

            // RGB24 -> YUV420P scaler
            let scaler = scaling::Context::get(
                ffmpeg::format::Pixel::RGB24,
                self.config.width,
                self.config.height,
                ffmpeg::format::Pixel::YUV420P,
                self.config.width,
                self.config.height,
                scaling::Flags::BILINEAR,
            )
            .map_err(|e| EncoderError::Ffmpeg(format!("Scaler init: {e}")))?;

            self.session = Some(Session { output_ctx, encoder, scaler: SendScaler(scaler), stream_index });
            self.frame_count = 0;
            Ok(())
        }

        fn append_frame(&mut self, frame: &VideoFrame) -> Result<(), EncoderError> {
            check_frame_size(&self.config, frame)?;
            let time_base = self.time_base;
            let pts = self.frame_count as i64;
            let session = self.session.as_mut().ok_or(EncoderError::NotStarted)?;

            let mut rgb_frame = FfmpegFrame::new(ffmpeg::format::Pixel::RGB24, frame.width, frame.height);
            let dst_stride = rgb_frame.stride(0);
            let src_stride = frame.stride();
            let dst = rgb_frame.data_mut(0);
            for (row, src_row) in frame.data.chunks_exact(src_stride).enumerate() {
                let start = row * dst_stride;
                dst[start..start + src_stride].copy_from_slice(src_row);
            }

            let mut yuv_frame = FfmpegFrame::empty();
            session
                .scaler
                .run(&rgb_frame, &mut yuv_frame)
                .map_err(|e| EncoderError::Ffmpeg(format!("Scale frame: {e}")))?;
            yuv_frame.set_pts(Some(pts));

            session
                .encoder
                .send_frame(&yuv_frame)
                .map_err(|e| EncoderError::Ffmpeg(format!("Send frame: {e}")))?;
            Self::write_pending_packets(session, time_base)?;

            self.frame_count += 1;
            Ok(())
        }

        fn finish(&mut self) -> Result<PathBuf, EncoderError> {
            let time_base = self.time_base;
            let mut session = self.session.take().ok_or(EncoderError::NotStarted)?;

            session
                .encoder
                .send_eof()
                .map_err(|e| EncoderError::Ffmpeg(format!("Send EOF: {e}")))?;
            Self::write_pending_packets(&mut session, time_base)?;

            session
                .output_ctx
                .write_trailer()
                .map_err(|e| EncoderError::Ffmpeg(format!("Write trailer: {e}")))?;

            Ok(self.config.output_path.clone())
        }

        fn is_encoding(&self) -> bool {
            self.session.is_some()
        }

        fn frames_encoded(&self) -> u64 {
            self.frame_count
        }

        fn fourcc(&self) -> Option<[u8; 4]> {
            Some(self.config.format.fourcc())
        }
    }
}

/// Create the encoder for the configured container.
///
/// FFmpeg handles every format and writes the [`VideoFormat::fourcc`] tag.
/// With the `mjpeg` feature, `avi` falls back to the built-in Motion-JPEG
/// writer when FFmpeg is missing or fails to initialise; that file carries
/// an `MJPG` tag instead of `DIVX`.
pub fn create_encoder(config: EncoderConfig) -> Result<Box<dyn VideoEncoder>, EncoderError> {
    #[cfg(feature = "ffmpeg")]
    {
        match ffmpeg_encoder::FfmpegEncoder::new(config.clone()) {
            Ok(enc) => return Ok(Box::new(enc)),
            Err(e) if cfg!(feature = "mjpeg") && config.format == VideoFormat::Avi => {
                log::warn!("FFmpeg encoder init failed, using built-in Motion-JPEG writer: {e}");
            }
            Err(e) => return Err(e),
        }
    }

    #[cfg(feature = "mjpeg")]
    if config.format == VideoFormat::Avi {
        return Ok(Box::new(super::avi::MjpegAviEncoder::new(config)));
    }

    Err(EncoderError::Unavailable(config.format))
}

/// Factory that defers to [`create_encoder`]
pub fn default_factory() -> EncoderFactory {
    Box::new(create_encoder)
}
