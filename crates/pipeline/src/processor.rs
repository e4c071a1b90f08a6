//! Video transcode session.
//!
//! ```text
//! VideoProcessor::process
//! +-- setup: open source, select video track, resolve rotation geometry
//! |          decoder -> frame slot -> compositing surface -> encoder input
//! |          muxer created up front, video track deferred
//! +-- drain loop (single thread) until input and output are both done:
//! |   +-- feed decoder       <- next sample, then one end-of-stream buffer
//! |   +-- drain encoder      -> muxer writes; first format change opens
//! |   |                         the video track and starts the muxer
//! |   +-- poll decoder once  -> render to surface, composite overlay,
//! |                             present with the decoder's timestamp
//! +-- teardown in pipeline order on every exit path, then finalize
//! ```
//!
//! The drain loop never blocks on any one stage: codec queues are polled
//! with short timeouts so a stall in one stage cannot deadlock the others.

use std::path::Path;
use std::time::Duration;

use crossbeam_channel::Sender;
use ob_codec::{OutputPoll, VideoDecoder, VideoEncoder};
use ob_common::{
    BufferInfo, CodecError, EncoderSettings, FrameSlot, MediaTime, MimeType, Resolution,
    SampleFlags, SurfaceError, TrackFormat, TranscodeConfig,
};
use ob_demux::Mp4Demuxer;
use ob_mux::{Mp4Muxer, TrackId};
use ob_surface::{Canvas, SurfaceContext};
use tracing::{debug, info, warn};

use crate::error::{PipelineError, PipelineResult};
use crate::progress::{send_progress, Phase, Progress};

/// Poll timeout for the non-blocking codec queue calls in the drain loop.
const POLL_TIMEOUT: Duration = Duration::from_millis(10);

/// Rendered frames between progress snapshots.
const PROGRESS_STRIDE: u64 = 10;

/// Summary of one completed transcode session.
#[derive(Clone, Debug)]
pub struct TranscodeReport {
    /// Frames composited and presented to the encoder.
    pub frames_rendered: u64,
    /// Renders skipped because the composited image never arrived.
    pub frames_skipped: u64,
    /// Encoded samples written to the output container.
    pub samples_written: u64,
    /// Declared dimensions of the output video track.
    pub output_resolution: Resolution,
    /// Presentation duration of the written track.
    pub duration: MediaTime,
}

/// Rotation baked into the composite so output pixels sit upright
/// regardless of how the source was recorded.
fn compensating_rotation(declared: u32) -> u32 {
    (360 - declared % 360) % 360
}

/// Mutable state of one `process` invocation. Created after setup
/// succeeds, torn down on every exit path.
struct Session {
    demuxer: Option<Mp4Demuxer>,
    decoder: VideoDecoder,
    encoder: VideoEncoder,
    surface: SurfaceContext,
    muxer: Mp4Muxer,
    video_track: Option<TrackId>,
    input_done: bool,
    decoder_done: bool,
    output_done: bool,
    frames_rendered: u64,
    frames_skipped: u64,
    samples_written: u64,
    last_render_pts: MediaTime,
    last_written_pts: MediaTime,
    source_duration: MediaTime,
}

/// Re-encodes the video track of a source file with an overlay composited
/// onto every frame.
///
/// The overlay callback runs once per rendered frame with the output
/// canvas and the frame's source-timeline position in milliseconds.
pub struct VideoProcessor<F> {
    config: TranscodeConfig,
    overlay: F,
    progress: Option<Sender<Progress>>,
}

impl<F> VideoProcessor<F>
where
    F: FnMut(&mut Canvas, i64),
{
    pub fn new(config: TranscodeConfig, overlay: F) -> Self {
        VideoProcessor { config, overlay, progress: None }
    }

    /// Stream [`Progress`] snapshots to `progress` while processing.
    pub fn with_progress(mut self, progress: Sender<Progress>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Transcode `source` into a video-only MP4 at `output`.
    pub fn process(
        &mut self,
        source: impl AsRef<Path>,
        output: impl AsRef<Path>,
    ) -> PipelineResult<TranscodeReport> {
        let source = source.as_ref();
        let output = output.as_ref();
        self.config.validate()?;

        let mut demuxer = Mp4Demuxer::open(source)?;
        let source_format = demuxer.select_track("video/")?;
        let source_duration = demuxer.duration();

        let declared = source_format.rotation_degrees();
        let upright = source_format.upright_resolution().ok_or_else(|| {
            CodecError::InvalidConfig("selected video track reports no dimensions".into())
        })?;
        let target = self.config.resolution.unwrap_or(upright);
        let compensation = compensating_rotation(declared);
        info!(
            source = %source.display(),
            output = %output.display(),
            target = %target,
            declared_rotation = declared,
            compensation,
            "transcode session starting"
        );

        let slot = FrameSlot::new();
        let decoder = VideoDecoder::configure(&source_format, slot.clone())?;
        let settings = EncoderSettings {
            mime: MimeType::new(MimeType::VIDEO_RAW),
            resolution: target,
            bitrate: self.config.bitrate,
            frame_rate: self.config.frame_rate,
        };
        let (encoder, encoder_input) = VideoEncoder::configure(&settings)?;
        let mut surface = SurfaceContext::new(slot, encoder_input, target, compensation);
        surface.make_current()?;
        let muxer = Mp4Muxer::new(output)?;

        let mut session = Session {
            demuxer: Some(demuxer),
            decoder,
            encoder,
            surface,
            muxer,
            video_track: None,
            input_done: false,
            decoder_done: false,
            output_done: false,
            frames_rendered: 0,
            frames_skipped: 0,
            samples_written: 0,
            last_render_pts: MediaTime::ZERO,
            last_written_pts: MediaTime::ZERO,
            source_duration,
        };
        self.emit_progress(&session, Phase::Preparing);

        let outcome = self.drain(&mut session);

        // Teardown runs in pipeline order whether the loop succeeded or
        // not; only then does the first error surface.
        let decoder_stop = session.decoder.stop();
        session.surface.release();
        let encoder_stop = session.encoder.stop();
        outcome?;
        decoder_stop?;
        encoder_stop?;

        self.emit_progress(&session, Phase::Finalizing);
        let report = TranscodeReport {
            frames_rendered: session.frames_rendered,
            frames_skipped: session.frames_skipped,
            samples_written: session.samples_written,
            output_resolution: target,
            duration: if session.samples_written > 0 {
                session.last_written_pts + self.config.frame_rate.frame_duration()
            } else {
                MediaTime::ZERO
            },
        };
        session.muxer.stop()?;

        send_progress(
            self.progress.as_ref(),
            Progress {
                phase: Phase::Complete,
                frames_rendered: report.frames_rendered,
                samples_written: report.samples_written,
                position: session.source_duration,
                duration: session.source_duration,
            },
        );
        info!(
            frames_rendered = report.frames_rendered,
            frames_skipped = report.frames_skipped,
            samples_written = report.samples_written,
            duration = %report.duration,
            "transcode session complete"
        );
        Ok(report)
    }

    fn drain(&mut self, session: &mut Session) -> PipelineResult<()> {
        let mut sample_buf = Vec::new();
        while !(session.input_done && session.output_done) {
            if !session.input_done {
                self.feed_decoder(session, &mut sample_buf)?;
            }
            self.drain_encoder(session)?;
            if !session.decoder_done {
                self.poll_decoder(session)?;
            }
        }
        Ok(())
    }

    /// Move at most one compressed sample from the demuxer to the decoder.
    fn feed_decoder(
        &mut self,
        session: &mut Session,
        sample_buf: &mut Vec<u8>,
    ) -> PipelineResult<()> {
        let slot = match session.decoder.dequeue_input_buffer(POLL_TIMEOUT)? {
            Some(slot) => slot,
            None => return Ok(()),
        };
        let demuxer = match session.demuxer.as_mut() {
            Some(demuxer) => demuxer,
            None => {
                session.input_done = true;
                return Ok(());
            }
        };
        match demuxer.read_sample(sample_buf)? {
            Some(info) => session.decoder.queue_input_buffer(slot, sample_buf, info)?,
            None => {
                session.decoder.queue_input_buffer(
                    slot,
                    &[],
                    BufferInfo::new(MediaTime::ZERO, SampleFlags::END_OF_STREAM),
                )?;
                session.demuxer = None;
                session.input_done = true;
                debug!("source exhausted, end-of-stream queued to decoder");
            }
        }
        Ok(())
    }

    /// Write every immediately-available encoder output to the muxer.
    fn drain_encoder(&mut self, session: &mut Session) -> PipelineResult<()> {
        while !session.output_done {
            match session.encoder.dequeue_output(POLL_TIMEOUT)? {
                OutputPoll::TryAgain => break,
                OutputPoll::FormatChanged(format) => self.open_video_track(session, &format)?,
                OutputPoll::Buffer(buffer) => {
                    if buffer.info.is_end_of_stream() {
                        session.output_done = true;
                        debug!("encoder reached end of stream");
                    }
                    if !buffer.info.is_codec_config() && !buffer.data.is_empty() {
                        let track = session.video_track.ok_or(PipelineError::SampleBeforeFormat)?;
                        session.muxer.write_sample(track, &buffer.data, buffer.info)?;
                        session.samples_written += 1;
                        session.last_written_pts = buffer.info.pts;
                    }
                    session.encoder.release_output(buffer)?;
                }
            }
        }
        Ok(())
    }

    /// First encoder format change: add the video track and start the
    /// muxer. A second change is a protocol violation.
    fn open_video_track(
        &mut self,
        session: &mut Session,
        format: &TrackFormat,
    ) -> PipelineResult<()> {
        if session.video_track.is_some() {
            return Err(PipelineError::FormatChangedTwice);
        }
        let track = session.muxer.add_track(format)?;
        session.muxer.start()?;
        session.video_track = Some(track);
        info!(track_id = %track, mime = %format.mime, "video track opened on first format change");
        Ok(())
    }

    /// Try to take one decoded frame through composite and present.
    fn poll_decoder(&mut self, session: &mut Session) -> PipelineResult<()> {
        let buffer = match session.decoder.dequeue_output(POLL_TIMEOUT)? {
            OutputPoll::TryAgain => return Ok(()),
            OutputPoll::FormatChanged(format) => {
                debug!(mime = %format.mime, "decoder output format changed");
                return Ok(());
            }
            OutputPoll::Buffer(buffer) => buffer,
        };

        let pts = buffer.info.pts;
        let end_of_stream = buffer.info.is_end_of_stream();
        let render = !buffer.data.is_empty();
        session.decoder.release_output(buffer, render)?;

        if render {
            match session.surface.await_new_image() {
                Ok(()) => {
                    session.surface.draw_image(&mut self.overlay)?;
                    session.surface.set_presentation_time(pts.as_nanos())?;
                    session.surface.swap_buffers()?;
                    session.frames_rendered += 1;
                    session.last_render_pts = pts;
                    if session.frames_rendered % PROGRESS_STRIDE == 0 {
                        self.emit_progress(session, Phase::Transcoding);
                    }
                }
                // One missed image skips that frame; the session goes on.
                Err(SurfaceError::AwaitTimeout) => {
                    warn!(
                        pts_us = pts.as_micros(),
                        "composited image did not arrive in time, skipping frame"
                    );
                    session.frames_skipped += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }

        if end_of_stream {
            session.encoder.signal_end_of_input()?;
            session.decoder_done = true;
            debug!("decoder reached end of stream, encoder flushing");
        }
        Ok(())
    }

    fn emit_progress(&self, session: &Session, phase: Phase) {
        send_progress(
            self.progress.as_ref(),
            Progress {
                phase,
                frames_rendered: session.frames_rendered,
                samples_written: session.samples_written,
                position: session.last_render_pts,
                duration: session.source_duration,
            },
        );
    }
}
