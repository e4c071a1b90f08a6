//! Asynchronous video decoder.
//!
//! `VideoDecoder` pairs a [`CodecQueue`] front-end with a named worker
//! thread that runs the decoder backend. The client feeds compressed
//! samples through input slots and polls outputs; releasing an output
//! buffer with `render = true` publishes the decoded image to the
//! decoder's output surface (a [`FrameSlot`]), which is where the
//! compositing surface picks it up.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use ob_common::{
    BufferInfo, CodecError, CodecResult, FrameSlot, Resolution, SampleFlags, TrackFormat,
    VideoFrame,
};
use tracing::{debug, warn};

use crate::backend::{create_decoder_backend, DecoderBackend};
use crate::queue::{CodecQueue, OutputBuffer, OutputPoll, INPUT_SLOT_COUNT};

/// Asynchronous decoder driven through a buffer-queue protocol.
#[derive(Debug)]
pub struct VideoDecoder {
    queue: CodecQueue,
    output: FrameSlot,
    resolution: Resolution,
    worker: Option<JoinHandle<()>>,
}

impl VideoDecoder {
    /// Create a decoder for the given track, rendering onto `output`.
    ///
    /// Any rotation hint on the format is cleared before the backend sees
    /// it: decoded frames come out in stored orientation, and rotation is
    /// applied by the compositing pass downstream.
    pub fn configure(format: &TrackFormat, output: FrameSlot) -> CodecResult<Self> {
        let format = format.clone().with_rotation(0);
        let resolution = format.resolution().ok_or_else(|| {
            CodecError::InvalidConfig("Decoder requires a video format with dimensions".into())
        })?;

        let backend = create_decoder_backend(&format)?;
        let queue = CodecQueue::new(INPUT_SLOT_COUNT);

        let worker_queue = queue.clone();
        let worker = thread::Builder::new()
            .name("video-decoder".into())
            .spawn(move || decoder_worker(worker_queue, backend))
            .map_err(|e| CodecError::Failed(format!("Failed to spawn decoder worker: {e}")))?;

        debug!(mime = %format.mime, resolution = %resolution, "decoder configured");

        Ok(VideoDecoder {
            queue,
            output,
            resolution,
            worker: Some(worker),
        })
    }

    /// Wait up to `timeout` for a free input slot.
    pub fn dequeue_input_buffer(&self, timeout: Duration) -> CodecResult<Option<usize>> {
        self.queue.dequeue_input(timeout)
    }

    /// Submit one compressed sample into a previously dequeued slot. A
    /// zero-length buffer flagged `END_OF_STREAM` ends the input side.
    pub fn queue_input_buffer(
        &self,
        slot: usize,
        data: &[u8],
        info: BufferInfo,
    ) -> CodecResult<()> {
        self.queue.queue_input(slot, data.to_vec(), info)
    }

    /// Poll for a decoded output buffer or end-of-stream marker.
    pub fn dequeue_output(&self, timeout: Duration) -> CodecResult<OutputPoll> {
        self.queue.dequeue_output(timeout)
    }

    /// Release an output buffer. With `render = true` and a non-empty
    /// payload, the decoded image is published to the output surface;
    /// otherwise the frame is discarded.
    pub fn release_output(&self, buffer: OutputBuffer, render: bool) -> CodecResult<()> {
        self.queue.release_output(buffer.id)?;
        if render && !buffer.data.is_empty() {
            self.output
                .publish(VideoFrame::new(self.resolution, buffer.info.pts, buffer.data));
        }
        Ok(())
    }

    /// Stored (coded) dimensions of decoded frames.
    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// Shut the decoder down and join its worker thread. Safe to call more
    /// than once.
    pub fn stop(&mut self) -> CodecResult<()> {
        self.queue.close();
        if let Some(worker) = self.worker.take() {
            worker
                .join()
                .map_err(|_| CodecError::Failed("Decoder worker panicked".into()))?;
        }
        Ok(())
    }
}

impl Drop for VideoDecoder {
    fn drop(&mut self) {
        self.queue.close();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("decoder worker panicked during drop");
            }
        }
    }
}

fn decoder_worker(queue: CodecQueue, mut backend: Box<dyn DecoderBackend>) {
    while let Some(sample) = queue.take_work() {
        if sample.info.is_end_of_stream() {
            // EOS propagates as an empty output buffer so the client
            // observes it in stream order, after every decoded frame.
            queue.push_output(
                Vec::new(),
                BufferInfo::new(sample.info.pts, SampleFlags::END_OF_STREAM),
            );
            break;
        }
        match backend.decode(&sample.data, &sample.info) {
            Ok(Some(frame)) => {
                queue.push_output(frame.data, BufferInfo::new(frame.pts, SampleFlags::NONE));
            }
            Ok(None) => {}
            Err(err) => {
                queue.fail(err.to_string());
                return;
            }
        }
    }
    queue.mark_finished();
}

#[cfg(test)]
mod tests {
    use super::*;
    use ob_common::{MediaTime, MimeType, SurfaceError};
    use std::time::Instant;

    const POLL: Duration = Duration::from_millis(50);
    const DEADLINE: Duration = Duration::from_secs(2);

    fn raw_format(width: u32, height: u32) -> TrackFormat {
        TrackFormat::video(MimeType::VIDEO_RAW, Resolution::new(width, height))
    }

    fn sample_info(pts_us: i64) -> BufferInfo {
        BufferInfo::new(MediaTime::from_micros(pts_us), SampleFlags::KEY_FRAME)
    }

    fn feed(decoder: &VideoDecoder, data: &[u8], info: BufferInfo) {
        let deadline = Instant::now() + DEADLINE;
        loop {
            if let Some(slot) = decoder.dequeue_input_buffer(POLL).unwrap() {
                decoder.queue_input_buffer(slot, data, info).unwrap();
                return;
            }
            assert!(Instant::now() < deadline, "no input slot became available");
        }
    }

    fn next_buffer(decoder: &VideoDecoder) -> OutputBuffer {
        let deadline = Instant::now() + DEADLINE;
        loop {
            match decoder.dequeue_output(POLL).unwrap() {
                OutputPoll::Buffer(buffer) => return buffer,
                OutputPoll::FormatChanged(_) => panic!("decoder does not emit format changes"),
                OutputPoll::TryAgain => {
                    assert!(Instant::now() < deadline, "no decoder output arrived");
                }
            }
        }
    }

    #[test]
    fn decodes_and_renders_to_output_slot() {
        let slot = FrameSlot::new();
        let mut decoder = VideoDecoder::configure(&raw_format(2, 2), slot.clone()).unwrap();

        let payload = vec![0xAB; 16];
        feed(&decoder, &payload, sample_info(33_333));

        let buffer = next_buffer(&decoder);
        assert_eq!(buffer.info.pts.as_micros(), 33_333);
        assert_eq!(buffer.data, payload);
        decoder.release_output(buffer, true).unwrap();

        let frame = slot.await_frame(Duration::from_millis(500)).unwrap();
        assert_eq!(frame.pts.as_micros(), 33_333);
        assert_eq!(frame.data, payload);
        decoder.stop().unwrap();
    }

    #[test]
    fn release_without_render_publishes_nothing() {
        let slot = FrameSlot::new();
        let mut decoder = VideoDecoder::configure(&raw_format(2, 2), slot.clone()).unwrap();

        feed(&decoder, &[1u8; 16], sample_info(0));
        let buffer = next_buffer(&decoder);
        decoder.release_output(buffer, false).unwrap();

        let err = slot.await_frame(Duration::from_millis(50)).unwrap_err();
        assert!(matches!(err, SurfaceError::AwaitTimeout));
        decoder.stop().unwrap();
    }

    #[test]
    fn end_of_stream_arrives_after_frames() {
        let slot = FrameSlot::new();
        let mut decoder = VideoDecoder::configure(&raw_format(2, 2), slot).unwrap();

        feed(&decoder, &[2u8; 16], sample_info(0));
        let eos = BufferInfo::new(MediaTime::from_micros(0), SampleFlags::END_OF_STREAM);
        feed(&decoder, &[], eos);

        let first = next_buffer(&decoder);
        assert!(!first.info.is_end_of_stream());
        decoder.release_output(first, false).unwrap();

        let last = next_buffer(&decoder);
        assert!(last.info.is_end_of_stream());
        assert!(last.data.is_empty());
        decoder.release_output(last, false).unwrap();
        decoder.stop().unwrap();
    }

    #[test]
    fn rotation_hint_is_cleared_before_decode() {
        let format = raw_format(2, 2).with_rotation(90);
        let slot = FrameSlot::new();
        let mut decoder = VideoDecoder::configure(&format, slot.clone()).unwrap();
        // Frames come out at stored dimensions, unrotated.
        assert_eq!(decoder.resolution(), Resolution::new(2, 2));

        feed(&decoder, &[3u8; 16], sample_info(0));
        let buffer = next_buffer(&decoder);
        decoder.release_output(buffer, true).unwrap();
        let frame = slot.await_frame(Duration::from_millis(500)).unwrap();
        assert_eq!(frame.resolution, Resolution::new(2, 2));
        decoder.stop().unwrap();
    }

    #[test]
    fn bad_payload_poisons_the_queue() {
        let mut decoder = VideoDecoder::configure(&raw_format(2, 2), FrameSlot::new()).unwrap();
        feed(&decoder, &[0u8; 3], sample_info(0));

        let deadline = Instant::now() + DEADLINE;
        loop {
            match decoder.dequeue_output(POLL) {
                Err(CodecError::Failed(_)) => break,
                Ok(OutputPoll::TryAgain) => {
                    assert!(Instant::now() < deadline, "queue never reported the failure");
                }
                other => panic!("expected failure, got {other:?}"),
            }
        }
        decoder.stop().unwrap();
    }

    #[test]
    fn compressed_mime_is_rejected_at_configure() {
        let format = TrackFormat::video(MimeType::VIDEO_AVC, Resolution::new(1280, 720));
        let err = VideoDecoder::configure(&format, FrameSlot::new()).unwrap_err();
        assert!(matches!(err, CodecError::InvalidConfig(_)));
    }

    #[test]
    fn stop_is_idempotent() {
        let mut decoder = VideoDecoder::configure(&raw_format(2, 2), FrameSlot::new()).unwrap();
        decoder.stop().unwrap();
        decoder.stop().unwrap();
    }
}
