//! Second pass: attach the source's audio track to the transcoded video.
//!
//! No decoding happens here. Both tracks are copied sample by sample with
//! timestamps and flags unchanged, so the result plays the new video with
//! the original sound.

use std::path::Path;

use ob_demux::Mp4Demuxer;
use ob_mux::{Mp4Muxer, TrackId};
use tracing::{debug, info};

use crate::error::PipelineResult;

/// Per-track sample counts from a completed merge.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MergeReport {
    pub video_samples: u64,
    pub audio_samples: u64,
}

/// Copies the video track of one file and the audio track of another into
/// a single container.
///
/// Unlike the transcode pass, both track formats are known before any
/// sample moves, so both tracks are added up front and the muxer starts
/// immediately.
#[derive(Debug, Default)]
pub struct AudioTrackMerger;

impl AudioTrackMerger {
    pub fn new() -> Self {
        AudioTrackMerger
    }

    /// Merge the video track of `video_only` with the audio track of
    /// `audio_source` into `output`.
    ///
    /// A source without an audio track is an error; this never silently
    /// produces a video-only file.
    pub fn merge(
        &mut self,
        video_only: impl AsRef<Path>,
        audio_source: impl AsRef<Path>,
        output: impl AsRef<Path>,
    ) -> PipelineResult<MergeReport> {
        let video_only = video_only.as_ref();
        let audio_source = audio_source.as_ref();
        let output = output.as_ref();

        // Select both tracks before the output file exists so a missing
        // audio track cannot leave an empty container behind.
        let mut video_demux = Mp4Demuxer::open(video_only)?;
        let video_format = video_demux.select_track("video/")?;
        let mut audio_demux = Mp4Demuxer::open(audio_source)?;
        let audio_format = audio_demux.select_track("audio/")?;

        info!(
            video = %video_only.display(),
            audio = %audio_source.display(),
            output = %output.display(),
            "merging audio track"
        );

        let mut muxer = Mp4Muxer::new(output)?;
        let video_track = muxer.add_track(&video_format)?;
        let audio_track = muxer.add_track(&audio_format)?;
        muxer.start()?;

        let mut sample_buf = Vec::new();
        let video_samples = copy_track(&mut video_demux, &mut muxer, video_track, &mut sample_buf)?;
        drop(video_demux);
        let audio_samples = copy_track(&mut audio_demux, &mut muxer, audio_track, &mut sample_buf)?;
        drop(audio_demux);

        muxer.stop()?;
        info!(video_samples, audio_samples, "merge complete");
        Ok(MergeReport { video_samples, audio_samples })
    }
}

/// Copy every remaining sample of the demuxer's selected track verbatim.
fn copy_track(
    demuxer: &mut Mp4Demuxer,
    muxer: &mut Mp4Muxer,
    track: TrackId,
    sample_buf: &mut Vec<u8>,
) -> PipelineResult<u64> {
    let mut copied = 0u64;
    while let Some(info) = demuxer.read_sample(sample_buf)? {
        muxer.write_sample(track, sample_buf, info)?;
        copied += 1;
    }
    debug!(track_id = %track, copied, "track copied");
    Ok(copied)
}
