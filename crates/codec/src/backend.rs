//! Codec backend traits.
//!
//! A backend is the synchronous core of a codec: the worker thread feeds it
//! one unit of work at a time and forwards whatever it produces to the
//! queue. Backends never see the queue, the threads, or the surfaces, which
//! keeps the asynchronous protocol in one place (`CodecQueue`) and the
//! pixel work swappable.
//!
//! The built-in backend treats payloads as uncompressed RGBA (`video/raw`),
//! which lets the whole pipeline run without codec hardware. Hardware
//! decoders and encoders plug in behind these same traits.

use ob_common::{
    BufferInfo, CodecError, CodecResult, EncoderSettings, MediaTime, MimeType, Sample,
    TrackFormat, VideoFrame,
};

use crate::raw::{RawDecoderBackend, RawEncoderBackend};

/// Decodes compressed samples into RGBA frames.
pub trait DecoderBackend: Send + std::fmt::Debug {
    /// Decode one sample. `None` means the sample produced no frame (codec
    /// configuration data, or a codec that buffers frames internally).
    fn decode(&mut self, data: &[u8], info: &BufferInfo) -> CodecResult<Option<VideoFrame>>;
}

/// Encodes RGBA frames into compressed samples.
pub trait EncoderBackend: Send + std::fmt::Debug {
    /// The format this encoder will emit, including any codec-specific
    /// data. Reported once, before the first encoded sample.
    fn output_format(&mut self) -> CodecResult<TrackFormat>;

    /// Encode one frame stamped with the given presentation time. `None`
    /// means the frame was absorbed (the codec needs more input before it
    /// can emit).
    fn encode(&mut self, frame: &VideoFrame, pts: MediaTime) -> CodecResult<Option<Sample>>;

    /// Emit any samples still buffered at end-of-stream.
    fn flush(&mut self) -> CodecResult<Vec<Sample>>;
}

/// Pick a decoder backend for the given track format.
pub fn create_decoder_backend(format: &TrackFormat) -> CodecResult<Box<dyn DecoderBackend>> {
    match format.mime.as_str() {
        MimeType::VIDEO_RAW => Ok(Box::new(RawDecoderBackend::new(format)?)),
        other => Err(CodecError::InvalidConfig(format!(
            "No decoder backend available for '{}'",
            other
        ))),
    }
}

/// Pick an encoder backend for the given settings.
pub fn create_encoder_backend(settings: &EncoderSettings) -> CodecResult<Box<dyn EncoderBackend>> {
    match settings.mime.as_str() {
        MimeType::VIDEO_RAW => Ok(Box::new(RawEncoderBackend::new(settings.clone()))),
        other => Err(CodecError::InvalidConfig(format!(
            "No encoder backend available for '{}'",
            other
        ))),
    }
}
