//! `ob-codec` — asynchronous video decoding and encoding for the Overburn
//! pipeline.
//!
//! Both codecs run their backend on a dedicated worker thread behind the
//! non-blocking [`CodecQueue`] protocol: dequeue a slot, queue a payload,
//! poll for output, release what you consumed. The decoder renders released
//! frames into a [`FrameSlot`](ob_common::FrameSlot) for the compositing
//! surface; the encoder is fed by an [`InputSurface`](ob_common::InputSurface)
//! instead of input slots and announces its real output format before the
//! first buffer.
//!
//! Backends are selected by MIME type through [`DecoderBackend`] and
//! [`EncoderBackend`]; the built-in pair handles `video/raw` RGBA payloads.

pub mod backend;
pub mod decoder;
pub mod encoder;
pub mod queue;
pub mod raw;

pub use backend::{create_decoder_backend, create_encoder_backend, DecoderBackend, EncoderBackend};
pub use decoder::VideoDecoder;
pub use encoder::VideoEncoder;
pub use ob_common::{CodecError, CodecResult};
pub use queue::{CodecQueue, OutputBuffer, OutputPoll, INPUT_SLOT_COUNT};
