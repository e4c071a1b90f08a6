//! `ob-common` — Shared types and errors for the Overburn transcode pipeline.
//!
//! This crate is the foundation that every other pipeline crate depends on.
//! It defines the core abstractions:
//!
//! - **Types**: `MediaTime`, `Resolution`, `Rational` (newtypes for safety)
//! - **Samples**: `Sample`, `BufferInfo`, `SampleFlags` (compressed data flow)
//! - **Formats**: `MimeType`, `TrackFormat`, `TrackKind` (track descriptors)
//! - **Frames**: `VideoFrame`, `FrameSlot`, `InputSurface` (decoded-image
//!   handoff between the codecs and the compositing surface)
//! - **Config**: `TranscodeConfig`, `EncoderSettings`
//! - **Errors**: `DemuxError`, `CodecError`, `SurfaceError` (thiserror-based)

pub mod config;
pub mod error;
pub mod format;
pub mod frame;
pub mod sample;
pub mod types;

// Re-export commonly used items at crate root
pub use config::{EncoderSettings, TranscodeConfig};
pub use error::{
    CodecError, CodecResult, ConfigError, DemuxError, DemuxResult, SurfaceError, SurfaceResult,
};
pub use format::{MimeType, TrackFormat, TrackKind};
pub use frame::{CompositedFrame, FrameSlot, InputSurface, VideoFrame};
pub use sample::{BufferInfo, Sample, SampleFlags};
pub use types::{MediaTime, Rational, Resolution};
