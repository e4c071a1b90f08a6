//! Error types shared across the pipeline crates.
//!
//! Each stage of the pipeline has its own error enum so callers can match on
//! exactly the failures that stage can produce. The muxer and the pipeline
//! orchestrator define their own crate-local errors and convert these via
//! `#[from]`.

use crate::types::Resolution;
use thiserror::Error;

/// Errors from validating a transcode or encoder configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Output dimensions must be even, got {0}")]
    OddDimensions(Resolution),

    #[error("Bitrate must be non-zero")]
    ZeroBitrate,

    #[error("Frame rate must be non-zero")]
    ZeroFrameRate,
}

/// Errors from reading a container.
#[derive(Debug, Error)]
pub enum DemuxError {
    #[error("Unsupported container format")]
    UnsupportedContainer,

    #[error("Invalid box at offset {offset}: {reason}")]
    InvalidStructure { offset: u64, reason: String },

    #[error("No track with MIME prefix '{prefix}' found")]
    NoMatchingTrack { prefix: String },

    #[error("A track has already been selected on this demuxer")]
    TrackAlreadySelected,

    #[error("No track selected; call select_track first")]
    NoTrackSelected,

    #[error("Truncated data: expected {expected} bytes, got {got}")]
    TruncatedData { expected: u64, got: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the decoder and encoder queues.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Invalid codec configuration: {0}")]
    InvalidConfig(String),

    #[error("Codec is not running")]
    NotRunning,

    #[error("Codec protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Codec failed: {0}")]
    Failed(String),
}

/// Errors from the compositing surface.
#[derive(Debug, Error)]
pub enum SurfaceError {
    #[error("Timed out waiting for a new decoded image")]
    AwaitTimeout,

    #[error("Frame producer disconnected")]
    Disconnected,

    #[error("Surface context is not current on this thread")]
    NotCurrent,

    #[error("No decoded image has arrived yet")]
    NoImage,

    #[error("Surface has been released")]
    Released,
}

pub type DemuxResult<T> = Result<T, DemuxError>;
pub type CodecResult<T> = Result<T, CodecError>;
pub type SurfaceResult<T> = Result<T, SurfaceError>;
