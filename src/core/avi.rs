//! Built-in Motion-JPEG AVI writer.
//!
//! Pure Rust, so `avi` output works without FFmpeg. Selected automatically
//! only with the `mjpeg` feature; callers can also hand it to
//! [`VideoCompiler::with_encoder_factory`](super::compiler::VideoCompiler::with_encoder_factory).
//! The stream is tagged `MJPG`, not the `DIVX` tag FFmpeg writes for avi.
//!
//! Layout:
//!
//! ```text
//! RIFF 'AVI '
//!   LIST 'hdrl'
//!     avih            main header
//!     LIST 'strl'
//!       strh          stream header ('vids' / 'MJPG')
//!       strf          BITMAPINFOHEADER
//!   LIST 'movi'
//!     00dc ...        one JPEG per frame
//!   idx1              keyframe index
//! ```
//!
//! Sizes and frame counts are written as placeholders and patched in
//! `finish`, so frames stream to disk as they arrive.

use std::fs::File;
use std::io::{BufWriter, Cursor, Seek, SeekFrom, Write};
use std::path::PathBuf;

use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;

use super::encoder::{check_frame_size, EncoderConfig, EncoderError, VideoEncoder, VideoFrame};

/// Codec tag of every file this writer produces
pub const MJPEG_FOURCC: [u8; 4] = *b"MJPG";

const AVIF_HASINDEX: u32 = 0x10;
const AVIIF_KEYFRAME: u32 = 0x10;
const MAIN_HEADER_LEN: u32 = 56;
const STREAM_HEADER_LEN: u32 = 56;
const BITMAP_INFO_LEN: u32 = 40;

/// Offsets of the header fields patched once all frames are written
#[derive(Debug, Default, Clone, Copy)]
struct Placeholders {
    riff_size: u64,
    total_frames: u64,
    main_buffer_size: u64,
    stream_length: u64,
    stream_buffer_size: u64,
    movi_size: u64,
    /// Position of the 'movi' fourcc; idx1 offsets are relative to it
    movi_start: u64,
}

struct IndexEntry {
    offset: u32,
    size: u32,
}

struct Writer {
    out: BufWriter<File>,
    marks: Placeholders,
    index: Vec<IndexEntry>,
    max_chunk: u32,
}

pub struct MjpegAviEncoder {
    config: EncoderConfig,
    writer: Option<Writer>,
    frame_count: u64,
}

impl MjpegAviEncoder {
    pub fn new(config: EncoderConfig) -> Self {
        Self { config, writer: None, frame_count: 0 }
    }

    fn encode_jpeg(&self, frame: &VideoFrame) -> Result<Vec<u8>, EncoderError> {
        let mut buffer = Cursor::new(Vec::new());
        {
            let mut encoder = JpegEncoder::new_with_quality(&mut buffer, self.config.jpeg_quality.clamp(1, 100));
            encoder.encode(&frame.data, frame.width, frame.height, ExtendedColorType::Rgb8)?;
        }
        Ok(buffer.into_inner())
    }
}

fn u32le<W: Write>(w: &mut W, v: u32) -> std::io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

fn u16le<W: Write>(w: &mut W, v: u16) -> std::io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

/// Write the header block; returns the placeholder offsets
fn write_headers<W: Write + Seek>(w: &mut W, cfg: &EncoderConfig) -> std::io::Result<Placeholders> {
    let mut marks = Placeholders::default();
    let fps = cfg.frame_rate.max(1);
    let frame_bytes = cfg.width * cfg.height * 3;

    w.write_all(b"RIFF")?;
    marks.riff_size = w.stream_position()?;
    u32le(w, 0)?;
    w.write_all(b"AVI ")?;

    // hdrl: 'hdrl' + avih chunk + strl list
    let strl_len = 4 + (8 + STREAM_HEADER_LEN) + (8 + BITMAP_INFO_LEN);
    let hdrl_len = 4 + (8 + MAIN_HEADER_LEN) + (8 + strl_len);
    w.write_all(b"LIST")?;
    u32le(w, hdrl_len)?;
    w.write_all(b"hdrl")?;

    w.write_all(b"avih")?;
    u32le(w, MAIN_HEADER_LEN)?;
    u32le(w, 1_000_000 / fps)?; // dwMicroSecPerFrame
    u32le(w, frame_bytes.saturating_mul(fps))?; // dwMaxBytesPerSec
    u32le(w, 0)?; // dwPaddingGranularity
    u32le(w, AVIF_HASINDEX)?;
    marks.total_frames = w.stream_position()?;
    u32le(w, 0)?; // dwTotalFrames
    u32le(w, 0)?; // dwInitialFrames
    u32le(w, 1)?; // dwStreams
    marks.main_buffer_size = w.stream_position()?;
    u32le(w, 0)?; // dwSuggestedBufferSize
    u32le(w, cfg.width)?;
    u32le(w, cfg.height)?;
    w.write_all(&[0u8; 16])?; // dwReserved[4]

    w.write_all(b"LIST")?;
    u32le(w, strl_len)?;
    w.write_all(b"strl")?;

    w.write_all(b"strh")?;
    u32le(w, STREAM_HEADER_LEN)?;
    w.write_all(b"vids")?;
    w.write_all(&MJPEG_FOURCC)?;
    u32le(w, 0)?; // dwFlags
    u16le(w, 0)?; // wPriority
    u16le(w, 0)?; // wLanguage
    u32le(w, 0)?; // dwInitialFrames
    u32le(w, 1)?; // dwScale
    u32le(w, fps)?; // dwRate
    u32le(w, 0)?; // dwStart
    marks.stream_length = w.stream_position()?;
    u32le(w, 0)?; // dwLength
    marks.stream_buffer_size = w.stream_position()?;
    u32le(w, 0)?; // dwSuggestedBufferSize
    u32le(w, u32::MAX)?; // dwQuality (default)
    u32le(w, 0)?; // dwSampleSize
    u16le(w, 0)?; // rcFrame
    u16le(w, 0)?;
    u16le(w, cfg.width.min(u16::MAX as u32) as u16)?;
    u16le(w, cfg.height.min(u16::MAX as u32) as u16)?;

    w.write_all(b"strf")?;
    u32le(w, BITMAP_INFO_LEN)?;
    u32le(w, BITMAP_INFO_LEN)?; // biSize
    u32le(w, cfg.width)?;
    u32le(w, cfg.height)?;
    u16le(w, 1)?; // biPlanes
    u16le(w, 24)?; // biBitCount
    w.write_all(&MJPEG_FOURCC)?;
    u32le(w, frame_bytes)?; // biSizeImage
    w.write_all(&[0u8; 16])?; // resolution + palette

    w.write_all(b"LIST")?;
    marks.movi_size = w.stream_position()?;
    u32le(w, 0)?;
    marks.movi_start = w.stream_position()?;
    w.write_all(b"movi")?;

    Ok(marks)
}

fn patch<W: Write + Seek>(w: &mut W, at: u64, value: u32) -> std::io::Result<()> {
    w.seek(SeekFrom::Start(at))?;
    u32le(w, value)
}

impl VideoEncoder for MjpegAviEncoder {
    fn start(&mut self) -> Result<(), EncoderError> {
        if self.writer.is_some() {
            return Err(EncoderError::AlreadyStarted);
        }

        if let Some(parent) = self.config.output_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut out = BufWriter::new(File::create(&self.config.output_path)?);
        let marks = write_headers(&mut out, &self.config)?;

        self.writer = Some(Writer { out, marks, index: Vec::new(), max_chunk: 0 });
        self.frame_count = 0;
        Ok(())
    }

    fn append_frame(&mut self, frame: &VideoFrame) -> Result<(), EncoderError> {
        if self.writer.is_none() {
            return Err(EncoderError::NotStarted);
        }
        check_frame_size(&self.config, frame)?;
        let jpeg = self.encode_jpeg(frame)?;
        let size = jpeg.len() as u32;

        let writer = self.writer.as_mut().ok_or(EncoderError::NotStarted)?;
        let chunk_pos = writer.out.stream_position()?;
        writer.out.write_all(b"00dc")?;
        u32le(&mut writer.out, size)?;
        writer.out.write_all(&jpeg)?;
        if size % 2 == 1 {
            writer.out.write_all(&[0])?;
        }

        writer.index.push(IndexEntry { offset: (chunk_pos - writer.marks.movi_start) as u32, size });
        writer.max_chunk = writer.max_chunk.max(size);
        self.frame_count += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<PathBuf, EncoderError> {
        let mut writer = self.writer.take().ok_or(EncoderError::NotStarted)?;
        let w = &mut writer.out;

        let movi_end = w.stream_position()?;
        w.write_all(b"idx1")?;
        u32le(w, writer.index.len() as u32 * 16)?;
        for entry in &writer.index {
            w.write_all(b"00dc")?;
            u32le(w, AVIIF_KEYFRAME)?;
            u32le(w, entry.offset)?;
            u32le(w, entry.size)?;
        }
        let file_end = w.stream_position()?;

        let frames = self.frame_count as u32;
        let buffer = writer.max_chunk + 8;
        let marks = writer.marks;
        patch(w, marks.riff_size, (file_end - 8) as u32)?;
        patch(w, marks.total_frames, frames)?;
        patch(w, marks.main_buffer_size, buffer)?;
        patch(w, marks.stream_length, frames)?;
        patch(w, marks.stream_buffer_size, buffer)?;
        patch(w, marks.movi_size, (movi_end - marks.movi_start) as u32)?;
        w.seek(SeekFrom::Start(file_end))?;
        w.flush()?;
        w.get_ref().sync_all()?;

        Ok(self.config.output_path.clone())
    }

    fn is_encoding(&self) -> bool {
        self.writer.is_some()
    }

    fn frames_encoded(&self) -> u64 {
        self.frame_count
    }

    fn fourcc(&self) -> Option<[u8; 4]> {
        Some(MJPEG_FOURCC)
    }
}

/// Minimal reader for files produced by [`MjpegAviEncoder`]
pub mod inspect {
    /// Header facts read back from an AVI file
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct AviSummary {
        pub width: u32,
        pub height: u32,
        pub rate: u32,
        pub total_frames: u32,
        pub codec: [u8; 4],
        /// JPEG payloads from the 'movi' list, in file order
        pub frames: Vec<Vec<u8>>,
    }

    fn read_u32(data: &[u8], at: usize) -> Option<u32> {
        data.get(at..at + 4).map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Parse the fixed header layout and walk the 'movi' chunks
    pub fn read_summary(data: &[u8]) -> Option<AviSummary> {
        if data.get(0..4)? != b"RIFF" || data.get(8..12)? != b"AVI " {
            return None;
        }
        // avih payload starts after RIFF(12) + LIST hdrl(12) + 'avih' header(8)
        let avih = 32;
        let total_frames = read_u32(data, avih + 16)?;
        let width = read_u32(data, avih + 32)?;
        let height = read_u32(data, avih + 36)?;
        // strh payload: avih(56) + LIST strl(12) + 'strh' header(8)
        let strh = avih + 56 + 12 + 8;
        let mut codec = [0u8; 4];
        codec.copy_from_slice(data.get(strh + 4..strh + 8)?);
        let rate = read_u32(data, strh + 24)?;

        let movi = find(data, b"movi")?;
        let movi_len = read_u32(data, movi - 4)? as usize;
        let movi_end = movi + movi_len;
        let mut pos = movi + 4;
        let mut frames = Vec::new();
        while pos + 8 <= movi_end {
            let id = data.get(pos..pos + 4)?;
            let size = read_u32(data, pos + 4)? as usize;
            if id == b"00dc" {
                frames.push(data.get(pos + 8..pos + 8 + size)?.to_vec());
            }
            pos += 8 + size + (size % 2);
        }

        Some(AviSummary { width, height, rate, total_frames, codec, frames })
    }

    fn find(data: &[u8], needle: &[u8]) -> Option<usize> {
        data.windows(needle.len()).position(|w| w == needle)
    }
}
