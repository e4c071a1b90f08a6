//! Decoded-frame handoff primitives.
//!
//! Two hand-offs connect the codecs to the compositing surface:
//!
//! - `FrameSlot` carries decoded images from the decoder to the surface. It
//!   holds at most one frame; the consumer blocks on `await_frame` with a
//!   timeout, and a producer publishing into an occupied slot replaces the
//!   old image (latest wins, matching a single-buffered output texture).
//! - `InputSurface` carries composited frames from the surface to the
//!   encoder over an unbounded channel, so the render thread never blocks
//!   on a slow encoder.

use crate::error::{SurfaceError, SurfaceResult};
use crate::types::{MediaTime, Resolution};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// One decoded image in RGBA8, row-major, no padding.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoFrame {
    pub resolution: Resolution,
    pub pts: MediaTime,
    pub data: Vec<u8>,
}

impl VideoFrame {
    pub fn new(resolution: Resolution, pts: MediaTime, data: Vec<u8>) -> Self {
        debug_assert_eq!(data.len() as u64, resolution.rgba_byte_size());
        VideoFrame { resolution, pts, data }
    }

    /// A frame filled with a single RGBA color.
    pub fn solid(resolution: Resolution, pts: MediaTime, rgba: [u8; 4]) -> Self {
        let mut data = Vec::with_capacity(resolution.rgba_byte_size() as usize);
        for _ in 0..resolution.pixel_count() {
            data.extend_from_slice(&rgba);
        }
        VideoFrame { resolution, pts, data }
    }

    pub fn byte_size(&self) -> usize {
        self.data.len()
    }
}

#[derive(Debug)]
struct SlotState {
    frame: Option<VideoFrame>,
    closed: bool,
}

/// Single-slot rendezvous between a frame producer and a frame consumer.
///
/// Cloning shares the slot. `publish` never blocks; `await_frame` blocks
/// until a frame arrives, the slot is closed, or the timeout elapses.
#[derive(Debug, Clone)]
pub struct FrameSlot {
    state: Arc<(Mutex<SlotState>, Condvar)>,
}

impl FrameSlot {
    pub fn new() -> Self {
        FrameSlot {
            state: Arc::new((Mutex::new(SlotState { frame: None, closed: false }), Condvar::new())),
        }
    }

    /// Places a frame in the slot, replacing any frame already there.
    /// Ignored after `close`.
    pub fn publish(&self, frame: VideoFrame) {
        let (lock, cvar) = &*self.state;
        let mut state = lock.lock();
        if state.closed {
            return;
        }
        if let Some(old) = state.frame.replace(frame) {
            debug!(pts_us = old.pts.as_micros(), "dropping unconsumed frame");
        }
        cvar.notify_one();
    }

    /// Blocks until a frame is available and takes it out of the slot.
    ///
    /// Returns `SurfaceError::AwaitTimeout` if no frame arrives within
    /// `timeout`, or `SurfaceError::Disconnected` if the slot was closed
    /// with no frame pending.
    pub fn await_frame(&self, timeout: Duration) -> SurfaceResult<VideoFrame> {
        let (lock, cvar) = &*self.state;
        let mut state = lock.lock();
        loop {
            if let Some(frame) = state.frame.take() {
                return Ok(frame);
            }
            if state.closed {
                return Err(SurfaceError::Disconnected);
            }
            if cvar.wait_for(&mut state, timeout).timed_out() {
                // Re-check: the producer may have published right at the
                // deadline and we lost the race to the notification.
                if let Some(frame) = state.frame.take() {
                    return Ok(frame);
                }
                return Err(SurfaceError::AwaitTimeout);
            }
        }
    }

    /// Marks the slot closed. Pending frames stay consumable; further
    /// publishes are ignored and waiters wake up with `Disconnected`.
    pub fn close(&self) {
        let (lock, cvar) = &*self.state;
        lock.lock().closed = true;
        cvar.notify_all();
    }
}

impl Default for FrameSlot {
    fn default() -> Self {
        FrameSlot::new()
    }
}

/// A composited frame handed to the encoder, timestamped in nanoseconds.
#[derive(Debug, Clone)]
pub struct CompositedFrame {
    pub frame: VideoFrame,
    /// Presentation time in nanoseconds.
    pub pts_ns: i64,
}

/// Producer end of the encoder's frame input.
///
/// `channel()` builds the pair; the encoder owns the `Receiver`. Presenting
/// after the encoder has shut down returns `Disconnected`.
#[derive(Debug, Clone)]
pub struct InputSurface {
    sender: Sender<CompositedFrame>,
}

impl InputSurface {
    pub fn channel() -> (InputSurface, Receiver<CompositedFrame>) {
        let (sender, receiver) = crossbeam_channel::unbounded();
        (InputSurface { sender }, receiver)
    }

    pub fn present(&self, frame: VideoFrame, pts_ns: i64) -> SurfaceResult<()> {
        self.sender
            .send(CompositedFrame { frame, pts_ns })
            .map_err(|_| SurfaceError::Disconnected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn slot_delivers_published_frame() {
        let slot = FrameSlot::new();
        let frame = VideoFrame::solid(Resolution::new(2, 2), MediaTime::from_micros(42), [1, 2, 3, 4]);
        slot.publish(frame.clone());
        let got = slot.await_frame(Duration::from_millis(100)).unwrap();
        assert_eq!(got.pts, frame.pts);
        assert_eq!(got.data, frame.data);
    }

    #[test]
    fn slot_times_out_when_empty() {
        let slot = FrameSlot::new();
        let err = slot.await_frame(Duration::from_millis(10)).unwrap_err();
        assert!(matches!(err, SurfaceError::AwaitTimeout));
    }

    #[test]
    fn slot_latest_wins() {
        let slot = FrameSlot::new();
        let res = Resolution::new(1, 1);
        slot.publish(VideoFrame::solid(res, MediaTime::from_micros(1), [0; 4]));
        slot.publish(VideoFrame::solid(res, MediaTime::from_micros(2), [0; 4]));
        let got = slot.await_frame(Duration::from_millis(100)).unwrap();
        assert_eq!(got.pts.as_micros(), 2);
    }

    #[test]
    fn slot_wakes_cross_thread() {
        let slot = FrameSlot::new();
        let producer = slot.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.publish(VideoFrame::solid(
                Resolution::new(1, 1),
                MediaTime::from_micros(7),
                [9; 4],
            ));
        });
        let got = slot.await_frame(Duration::from_millis(500)).unwrap();
        assert_eq!(got.pts.as_micros(), 7);
        handle.join().unwrap();
    }

    #[test]
    fn closed_slot_disconnects_waiters() {
        let slot = FrameSlot::new();
        slot.close();
        let err = slot.await_frame(Duration::from_millis(100)).unwrap_err();
        assert!(matches!(err, SurfaceError::Disconnected));
    }

    #[test]
    fn pending_frame_survives_close() {
        let slot = FrameSlot::new();
        slot.publish(VideoFrame::solid(Resolution::new(1, 1), MediaTime::ZERO, [0; 4]));
        slot.close();
        assert!(slot.await_frame(Duration::from_millis(10)).is_ok());
        // Publishing after close is dropped.
        slot.publish(VideoFrame::solid(Resolution::new(1, 1), MediaTime::ZERO, [0; 4]));
        assert!(slot.await_frame(Duration::from_millis(10)).is_err());
    }

    #[test]
    fn input_surface_delivers_in_order() {
        let (surface, rx) = InputSurface::channel();
        let res = Resolution::new(1, 1);
        surface.present(VideoFrame::solid(res, MediaTime::from_micros(1), [0; 4]), 1_000).unwrap();
        surface.present(VideoFrame::solid(res, MediaTime::from_micros(2), [0; 4]), 2_000).unwrap();
        assert_eq!(rx.recv().unwrap().pts_ns, 1_000);
        assert_eq!(rx.recv().unwrap().pts_ns, 2_000);
    }

    #[test]
    fn present_after_receiver_drop_is_disconnected() {
        let (surface, rx) = InputSurface::channel();
        drop(rx);
        let err = surface
            .present(VideoFrame::solid(Resolution::new(1, 1), MediaTime::ZERO, [0; 4]), 0)
            .unwrap_err();
        assert!(matches!(err, SurfaceError::Disconnected));
    }
}
