//! Asynchronous video encoder with surface input.
//!
//! `VideoEncoder` takes frames through an [`InputSurface`] rather than
//! through input slots: the compositing surface presents finished frames
//! into a channel and the encoder worker consumes them at its own pace.
//! The output side is the shared [`CodecQueue`] protocol, with one
//! guarantee on top: the first event is always `FormatChanged` carrying
//! the encoder's real output format, before any buffer — even when the
//! stream ends with zero frames. The muxer's lazy track registration
//! hangs off that event.

use crossbeam_channel::{select, Receiver, Sender, TrySendError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use ob_common::{
    BufferInfo, CodecError, CodecResult, CompositedFrame, EncoderSettings, InputSurface,
    MediaTime, SampleFlags,
};
use tracing::{debug, warn};

use crate::backend::{create_encoder_backend, EncoderBackend};
use crate::queue::{CodecQueue, OutputBuffer, OutputPoll, INPUT_SLOT_COUNT};

/// Asynchronous encoder fed by a surface, drained through a buffer queue.
#[derive(Debug)]
pub struct VideoEncoder {
    queue: CodecQueue,
    eos_tx: Sender<()>,
    worker: Option<JoinHandle<()>>,
}

impl VideoEncoder {
    /// Create an encoder and the input surface that feeds it.
    ///
    /// The returned surface is handed to the compositing context; every
    /// frame presented on it reaches the worker in presentation order.
    pub fn configure(settings: &EncoderSettings) -> CodecResult<(Self, InputSurface)> {
        settings
            .validate()
            .map_err(|e| CodecError::InvalidConfig(e.to_string()))?;
        let backend = create_encoder_backend(settings)?;

        let (surface, frames) = InputSurface::channel();
        let (eos_tx, eos_rx) = crossbeam_channel::bounded::<()>(1);
        let queue = CodecQueue::new(INPUT_SLOT_COUNT);

        let worker_queue = queue.clone();
        let worker = thread::Builder::new()
            .name("video-encoder".into())
            .spawn(move || encoder_worker(worker_queue, backend, frames, eos_rx))
            .map_err(|e| CodecError::Failed(format!("Failed to spawn encoder worker: {e}")))?;

        debug!(
            mime = %settings.mime,
            resolution = %settings.resolution,
            bitrate = settings.bitrate,
            "encoder configured"
        );

        Ok((
            VideoEncoder {
                queue,
                eos_tx,
                worker: Some(worker),
            },
            surface,
        ))
    }

    /// Poll for the next output event: `FormatChanged` first, then encoded
    /// buffers, then one buffer flagged `END_OF_STREAM`.
    pub fn dequeue_output(&self, timeout: Duration) -> CodecResult<OutputPoll> {
        self.queue.dequeue_output(timeout)
    }

    /// Return an output buffer after its payload has been consumed.
    pub fn release_output(&self, buffer: OutputBuffer) -> CodecResult<()> {
        self.queue.release_output(buffer.id)
    }

    /// Declare that no more frames will be presented. The worker drains
    /// frames already in flight, flushes the backend, and emits the
    /// end-of-stream buffer. Signaling more than once is harmless.
    pub fn signal_end_of_input(&self) -> CodecResult<()> {
        match self.eos_tx.try_send(()) {
            Ok(()) | Err(TrySendError::Full(_)) => Ok(()),
            Err(TrySendError::Disconnected(_)) => Err(CodecError::NotRunning),
        }
    }

    /// Shut the encoder down and join its worker thread. Safe to call more
    /// than once.
    pub fn stop(&mut self) -> CodecResult<()> {
        let _ = self.eos_tx.try_send(());
        self.queue.close();
        if let Some(worker) = self.worker.take() {
            worker
                .join()
                .map_err(|_| CodecError::Failed("Encoder worker panicked".into()))?;
        }
        Ok(())
    }
}

impl Drop for VideoEncoder {
    fn drop(&mut self) {
        let _ = self.eos_tx.try_send(());
        self.queue.close();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("encoder worker panicked during drop");
            }
        }
    }
}

fn encoder_worker(
    queue: CodecQueue,
    mut backend: Box<dyn EncoderBackend>,
    frames: Receiver<CompositedFrame>,
    eos: Receiver<()>,
) {
    // The real output format must be on the queue before any buffer.
    match backend.output_format() {
        Ok(format) => queue.push_format_change(format),
        Err(err) => {
            queue.fail(err.to_string());
            return;
        }
    }

    let mut last_pts = MediaTime::ZERO;
    loop {
        select! {
            recv(frames) -> msg => match msg {
                Ok(composited) => {
                    if !encode_one(&queue, backend.as_mut(), &composited, &mut last_pts) {
                        return;
                    }
                }
                // All surface handles dropped: same as end-of-input.
                Err(_) => break,
            },
            recv(eos) -> _ => {
                // Presented frames are already in the channel when
                // end-of-input is signaled; drain them before flushing.
                while let Ok(composited) = frames.try_recv() {
                    if !encode_one(&queue, backend.as_mut(), &composited, &mut last_pts) {
                        return;
                    }
                }
                break;
            }
        }
    }

    match backend.flush() {
        Ok(samples) => {
            for sample in samples {
                last_pts = sample.info.pts;
                queue.push_output(sample.data, sample.info);
            }
        }
        Err(err) => {
            queue.fail(err.to_string());
            return;
        }
    }

    queue.push_output(
        Vec::new(),
        BufferInfo::new(last_pts, SampleFlags::END_OF_STREAM),
    );
    queue.mark_finished();
}

fn encode_one(
    queue: &CodecQueue,
    backend: &mut dyn EncoderBackend,
    composited: &CompositedFrame,
    last_pts: &mut MediaTime,
) -> bool {
    let pts = MediaTime::from_micros(composited.pts_ns / 1_000);
    match backend.encode(&composited.frame, pts) {
        Ok(Some(sample)) => {
            *last_pts = sample.info.pts;
            queue.push_output(sample.data, sample.info);
            true
        }
        Ok(None) => true,
        Err(err) => {
            queue.fail(err.to_string());
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ob_common::{MimeType, Rational, Resolution, TrackFormat, VideoFrame};
    use std::time::Instant;

    const POLL: Duration = Duration::from_millis(50);
    const DEADLINE: Duration = Duration::from_secs(2);

    fn settings(width: u32, height: u32) -> EncoderSettings {
        EncoderSettings {
            mime: MimeType::new(MimeType::VIDEO_RAW),
            resolution: Resolution::new(width, height),
            bitrate: 1_000_000,
            frame_rate: Rational::FPS_30,
        }
    }

    fn next_event(encoder: &VideoEncoder) -> OutputPoll {
        let deadline = Instant::now() + DEADLINE;
        loop {
            match encoder.dequeue_output(POLL).unwrap() {
                OutputPoll::TryAgain => {
                    assert!(Instant::now() < deadline, "no encoder event arrived");
                }
                event => return event,
            }
        }
    }

    fn expect_format(encoder: &VideoEncoder) -> TrackFormat {
        match next_event(encoder) {
            OutputPoll::FormatChanged(format) => format,
            other => panic!("expected FormatChanged first, got {other:?}"),
        }
    }

    fn expect_buffer(encoder: &VideoEncoder) -> OutputBuffer {
        match next_event(encoder) {
            OutputPoll::Buffer(buffer) => buffer,
            other => panic!("expected Buffer, got {other:?}"),
        }
    }

    #[test]
    fn format_change_precedes_everything_even_with_zero_frames() {
        let (mut encoder, _surface) = VideoEncoder::configure(&settings(4, 4)).unwrap();
        encoder.signal_end_of_input().unwrap();

        let format = expect_format(&encoder);
        assert_eq!(format.mime.as_str(), MimeType::VIDEO_RAW);
        assert_eq!(format.resolution(), Some(Resolution::new(4, 4)));

        let eos = expect_buffer(&encoder);
        assert!(eos.info.is_end_of_stream());
        assert!(eos.data.is_empty());
        encoder.release_output(eos).unwrap();
        encoder.stop().unwrap();
    }

    #[test]
    fn encodes_presented_frames_in_order() {
        let (mut encoder, surface) = VideoEncoder::configure(&settings(2, 2)).unwrap();
        let res = Resolution::new(2, 2);

        let first = VideoFrame::solid(res, MediaTime::from_micros(0), [1, 1, 1, 255]);
        let second = VideoFrame::solid(res, MediaTime::from_micros(33_333), [2, 2, 2, 255]);
        surface.present(first.clone(), 0).unwrap();
        surface.present(second.clone(), 33_333_000).unwrap();
        encoder.signal_end_of_input().unwrap();

        let _format = expect_format(&encoder);

        let a = expect_buffer(&encoder);
        assert_eq!(a.info.pts.as_micros(), 0);
        assert!(a.info.is_key_frame());
        assert_eq!(a.data, first.data);
        encoder.release_output(a).unwrap();

        let b = expect_buffer(&encoder);
        // Presentation nanoseconds round-trip to microseconds.
        assert_eq!(b.info.pts.as_micros(), 33_333);
        assert_eq!(b.data, second.data);
        encoder.release_output(b).unwrap();

        let eos = expect_buffer(&encoder);
        assert!(eos.info.is_end_of_stream());
        assert_eq!(eos.info.pts.as_micros(), 33_333);
        encoder.release_output(eos).unwrap();
        encoder.stop().unwrap();
    }

    #[test]
    fn dropping_the_surface_ends_the_stream() {
        let (mut encoder, surface) = VideoEncoder::configure(&settings(2, 2)).unwrap();
        drop(surface);

        let _format = expect_format(&encoder);
        let eos = expect_buffer(&encoder);
        assert!(eos.info.is_end_of_stream());
        encoder.release_output(eos).unwrap();
        encoder.stop().unwrap();
    }

    #[test]
    fn odd_dimensions_rejected_at_configure() {
        let err = VideoEncoder::configure(&settings(3, 4)).unwrap_err();
        assert!(matches!(err, CodecError::InvalidConfig(_)));
    }

    #[test]
    fn wrong_resolution_frame_poisons_the_queue() {
        let (mut encoder, surface) = VideoEncoder::configure(&settings(4, 4)).unwrap();
        surface
            .present(
                VideoFrame::solid(Resolution::new(2, 2), MediaTime::ZERO, [0; 4]),
                0,
            )
            .unwrap();

        let deadline = Instant::now() + DEADLINE;
        loop {
            match encoder.dequeue_output(POLL) {
                Err(CodecError::Failed(_)) => break,
                Ok(_) => {
                    assert!(Instant::now() < deadline, "queue never reported the failure");
                }
                Err(other) => panic!("expected Failed, got {other:?}"),
            }
        }
        encoder.stop().unwrap();
    }

    #[test]
    fn signal_after_stop_reports_not_running() {
        let (mut encoder, _surface) = VideoEncoder::configure(&settings(2, 2)).unwrap();
        encoder.stop().unwrap();
        // The worker consumed its end-of-input receiver when it exited.
        let err = encoder.signal_end_of_input().unwrap_err();
        assert!(matches!(err, CodecError::NotRunning));
    }
}
