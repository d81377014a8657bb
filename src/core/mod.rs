//! Capture-and-compile pipeline.
//!
//! Flow: `recorder` starts a `capture` loop over a `source` → frames pile up
//! in memory → on stop, `compiler` materializes them to a temp folder,
//! encodes them through an `encoder` backend, and `validate` checks the
//! output and removes the temp folder.

pub mod avi;
pub mod capture;
pub mod compiler;
pub mod config;
pub mod encoder;
pub mod events;
pub mod frame;
pub mod materializer;
pub mod progress;
pub mod recorder;
pub mod source;
pub mod validate;
