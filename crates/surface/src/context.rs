//! The compositing context between decoder output and encoder input.
//!
//! `SurfaceContext` owns the render state for one transcode session: the
//! [`FrameSlot`] the decoder publishes into, the [`InputSurface`] the
//! encoder consumes from, and an offscreen [`Canvas`] at the output
//! resolution. The drain loop binds it to one thread with `make_current`,
//! then per frame: `await_new_image`, `draw_image` (base layer plus
//! overlay), `set_presentation_time`, `swap_buffers`.

use std::thread::{self, ThreadId};
use std::time::Duration;

use ob_common::{
    FrameSlot, InputSurface, MediaTime, Resolution, SurfaceError, SurfaceResult, VideoFrame,
};
use tracing::debug;

use crate::canvas::Canvas;

/// Bounded wait for the decoder to publish the next image.
pub const NEW_IMAGE_TIMEOUT: Duration = Duration::from_millis(2500);

/// Offscreen compositor bridging decoded frames to the encoder input.
pub struct SurfaceContext {
    input: FrameSlot,
    output: Option<InputSurface>,
    target: Resolution,
    rotation_degrees: u32,
    canvas: Canvas,
    current_image: Option<VideoFrame>,
    pending_pts_ns: Option<i64>,
    bound_thread: Option<ThreadId>,
    released: bool,
}

impl SurfaceContext {
    /// Build a context that composites into `target`-sized frames, turning
    /// each decoded image by `rotation_degrees` counter-clockwise
    /// (quarter-turns) before scaling it to fill the canvas.
    pub fn new(
        input: FrameSlot,
        output: InputSurface,
        target: Resolution,
        rotation_degrees: u32,
    ) -> Self {
        debug!(
            %target,
            rotation = rotation_degrees % 360,
            "surface context created"
        );
        SurfaceContext {
            input,
            output: Some(output),
            target,
            rotation_degrees: rotation_degrees % 360,
            canvas: Canvas::new(target),
            current_image: None,
            pending_pts_ns: None,
            bound_thread: None,
            released: false,
        }
    }

    pub fn target_resolution(&self) -> Resolution {
        self.target
    }

    /// The compensating rotation applied during composite.
    pub fn rotation_degrees(&self) -> u32 {
        self.rotation_degrees
    }

    /// Bind the context to the calling thread. Required before any other
    /// operation. Rebinding from the owning thread is a no-op; a second
    /// thread cannot steal the binding.
    pub fn make_current(&mut self) -> SurfaceResult<()> {
        if self.released {
            return Err(SurfaceError::Released);
        }
        let caller = thread::current().id();
        match self.bound_thread {
            Some(bound) if bound != caller => Err(SurfaceError::NotCurrent),
            _ => {
                self.bound_thread = Some(caller);
                Ok(())
            }
        }
    }

    fn ensure_current(&self) -> SurfaceResult<()> {
        if self.released {
            return Err(SurfaceError::Released);
        }
        if self.bound_thread != Some(thread::current().id()) {
            return Err(SurfaceError::NotCurrent);
        }
        Ok(())
    }

    /// Block until the decoder publishes its next frame, for at most
    /// [`NEW_IMAGE_TIMEOUT`]. The frame becomes the current image for the
    /// following `draw_image`.
    pub fn await_new_image(&mut self) -> SurfaceResult<()> {
        self.ensure_current()?;
        let frame = self.input.await_frame(NEW_IMAGE_TIMEOUT)?;
        self.current_image = Some(frame);
        Ok(())
    }

    /// Composite the current image into the offscreen canvas and run the
    /// overlay callback on top of it.
    ///
    /// The callback receives the canvas and the frame's elapsed source
    /// time in milliseconds.
    pub fn draw_image<F>(&mut self, mut overlay: F) -> SurfaceResult<()>
    where
        F: FnMut(&mut Canvas, i64),
    {
        self.ensure_current()?;
        let frame = self.current_image.as_ref().ok_or(SurfaceError::NoImage)?;
        self.canvas.draw_frame(frame, self.rotation_degrees);
        overlay(&mut self.canvas, frame.pts.as_millis());
        Ok(())
    }

    /// Stamp the next `swap_buffers` with a presentation time in
    /// nanoseconds.
    pub fn set_presentation_time(&mut self, pts_ns: i64) -> SurfaceResult<()> {
        self.ensure_current()?;
        self.pending_pts_ns = Some(pts_ns);
        Ok(())
    }

    /// Publish the composited canvas to the encoder's input surface.
    ///
    /// Uses the pending presentation time, or zero when none was set.
    pub fn swap_buffers(&mut self) -> SurfaceResult<()> {
        self.ensure_current()?;
        let output = self.output.as_ref().ok_or(SurfaceError::Released)?;
        let pts_ns = self.pending_pts_ns.take().unwrap_or(0);
        let frame = VideoFrame::new(
            self.target,
            MediaTime::from_micros(pts_ns / 1_000),
            self.canvas.data().to_vec(),
        );
        output.present(frame, pts_ns)
    }

    /// Tear down the context: close the decoder-facing slot and drop the
    /// encoder-facing surface. Every later operation fails with
    /// [`SurfaceError::Released`]. Safe to call more than once.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.input.close();
        self.output = None;
        self.current_image = None;
        debug!("surface context released");
    }
}

impl Drop for SurfaceContext {
    fn drop(&mut self) {
        self.release();
    }
}
