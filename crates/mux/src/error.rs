//! Error surface of the mux crate.

use thiserror::Error;

/// Failure while writing an MP4 file.
#[derive(Error, Debug)]
pub enum MuxError {
    /// Underlying file write or seek failed.
    #[error("IO failure: {0}")]
    Io(#[from] std::io::Error),

    /// A track format the muxer cannot serialize.
    #[error("Invalid track configuration: {0}")]
    InvalidConfig(String),

    /// Call arrived in the wrong lifecycle state.
    #[error("Muxer lifecycle violation: {0}")]
    InvalidState(String),

    /// Sample written to a track id that was never registered.
    #[error("No such track: {0}")]
    TrackNotFound(u32),

    /// An atom grew past what a 32-bit size field can describe.
    #[error("Atom size {0} does not fit a 32-bit header")]
    BoxTooLarge(u64),
}

pub type MuxResult<T> = Result<T, MuxError>;
