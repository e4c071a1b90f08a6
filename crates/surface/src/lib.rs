//! `ob-surface` — software compositing between decoder and encoder for the
//! Overburn pipeline.
//!
//! [`SurfaceContext`] plays the role a GL context plays in a hardware
//! pipeline: it receives decoded images from the decoder's frame slot,
//! renders each one into an offscreen [`Canvas`] with the compensating
//! rotation and output scaling applied, runs the caller's overlay drawing
//! on top, and presents the result to the encoder's input surface with an
//! explicit presentation timestamp.

pub mod canvas;
pub mod context;

pub use canvas::Canvas;
pub use context::{SurfaceContext, NEW_IMAGE_TIMEOUT};
pub use ob_common::{SurfaceError, SurfaceResult};
