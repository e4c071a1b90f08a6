//! `ob-mux` — streaming MP4 muxing for the Overburn pipeline.
//!
//! The muxer writes sample payloads into an open mdat box as they arrive
//! and defers all index metadata (moov) to finalization, so a transcode
//! can stream arbitrarily many samples with constant memory for payloads.
//! Track registration is separated from writing: all tracks must be added
//! before `start()`, which mirrors how encoders report their real output
//! format only once the first frames have been consumed.

pub mod atoms;
pub mod error;
pub mod mp4;
pub mod muxer;

pub use error::{MuxError, MuxResult};
pub use muxer::{Mp4Muxer, MuxerState, TrackId};
