//! Pipeline error aggregation.

use ob_common::{CodecError, ConfigError, DemuxError, SurfaceError};
use ob_mux::MuxError;
use thiserror::Error;

/// Any failure from a transcode or merge session.
///
/// Each stage keeps its own error domain; this enum folds them together at
/// the session boundary so `?` works across the whole pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Demux: {0}")]
    Demux(#[from] DemuxError),

    #[error("Codec: {0}")]
    Codec(#[from] CodecError),

    #[error("Surface: {0}")]
    Surface(#[from] SurfaceError),

    #[error("Mux: {0}")]
    Mux(#[from] MuxError),

    /// The encoder reported a second format change after the output track
    /// was already created.
    #[error("Encoder changed its output format after the video track was added")]
    FormatChangedTwice,

    /// An encoded sample arrived before the encoder declared its format.
    #[error("Encoded sample arrived before the encoder declared its output format")]
    SampleBeforeFormat,
}

/// Convenience Result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;
