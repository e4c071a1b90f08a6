//! Streaming MP4 muxer.
//!
//! Writes samples progressively into an open mdat box while collecting the
//! per-sample metadata (offsets, sizes, timing, sync status) needed to emit
//! the moov box when the file is finalized.
//!
//! Lifecycle: tracks are registered while the muxer is `Configured`, then
//! `start()` locks the track list and `write_sample` streams payloads until
//! `stop()` consumes the muxer and patches the file into a valid MP4.
//!
//! File layout: `[ftyp][mdat ...samples...][moov]`

use std::fs::File;
use std::io::{BufWriter, Seek, Write};
use std::path::{Path, PathBuf};

use crate::atoms::{
    close_large_atom, media_time_to_ticks, open_large_atom, VIDEO_TIMESCALE,
};
use crate::error::{MuxError, MuxResult};
use crate::mp4::{write_ftyp, write_moov, SampleInfo, TrackInfo};
use ob_common::{BufferInfo, MediaTime, MimeType, TrackFormat, TrackKind};

/// Default video sample duration when timing cannot be derived: one frame
/// at 30fps in the 90kHz timescale.
const DEFAULT_VIDEO_SAMPLE_TICKS: u32 = 3000;

/// Samples per AAC frame; the audio timescale is the sample rate, so this
/// is also the default duration in ticks.
const AAC_FRAME_TICKS: u32 = 1024;

/// Identifier returned by [`Mp4Muxer::add_track`] and required to write
/// samples. Track IDs are 1-based, matching the IDs written into tkhd.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrackId(pub u32);

impl std::fmt::Display for TrackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Muxer lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuxerState {
    /// Accepting track registrations.
    Configured,
    /// Accepting samples; the track list is frozen.
    Started,
}

/// One sample's bookkeeping, collected while its payload streams into mdat.
#[derive(Debug, Clone, Copy)]
struct PendingSample {
    offset: u64,
    size: u32,
    pts: MediaTime,
    is_sync: bool,
}

struct TrackState {
    id: TrackId,
    format: TrackFormat,
    timescale: u32,
    samples: Vec<PendingSample>,
}

/// Streaming MP4 file writer.
pub struct Mp4Muxer {
    writer: BufWriter<File>,
    path: PathBuf,
    tracks: Vec<TrackState>,
    state: MuxerState,
    /// Position of the mdat extended size field, patched at stop.
    mdat_size_pos: u64,
    next_track_id: u32,
}

impl Mp4Muxer {
    /// Create a muxer writing to `path`. Writes the ftyp box and opens the
    /// mdat box immediately; the file is not a valid MP4 until `stop()`.
    pub fn new(path: impl AsRef<Path>) -> MuxResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)?;
        let mut writer = BufWriter::new(file);

        write_ftyp(&mut writer)?;
        let mdat_size_pos = open_large_atom(&mut writer, b"mdat")?;

        tracing::info!(path = %path.display(), "Created MP4 muxer");

        Ok(Mp4Muxer {
            writer,
            path,
            tracks: Vec::new(),
            state: MuxerState::Configured,
            mdat_size_pos,
            next_track_id: 1,
        })
    }

    /// Register a track and return its ID. Only legal before `start()`.
    ///
    /// The format is validated up front so a misconfigured track fails here
    /// rather than when the moov box is written at stop.
    pub fn add_track(&mut self, format: &TrackFormat) -> MuxResult<TrackId> {
        if self.state != MuxerState::Configured {
            return Err(MuxError::InvalidState(
                "Cannot add a track after the muxer has started".into(),
            ));
        }

        let timescale = match format.kind {
            TrackKind::Video { .. } => {
                self.validate_video_format(format)?;
                VIDEO_TIMESCALE
            }
            TrackKind::Audio { sample_rate, .. } => {
                self.validate_audio_format(format)?;
                sample_rate
            }
        };

        let id = TrackId(self.next_track_id);
        self.next_track_id += 1;

        if format.is_video() {
            tracing::info!(
                track_id = id.0,
                mime = %format.mime,
                resolution = ?format.resolution(),
                rotation = format.rotation_degrees(),
                "Added video track"
            );
        } else {
            tracing::info!(track_id = id.0, mime = %format.mime, timescale, "Added audio track");
        }

        self.tracks.push(TrackState {
            id,
            format: format.clone(),
            timescale,
            samples: Vec::new(),
        });

        Ok(id)
    }

    fn validate_video_format(&self, format: &TrackFormat) -> MuxResult<()> {
        match format.mime.as_str() {
            MimeType::VIDEO_AVC => {
                if format.csd.is_empty() {
                    return Err(MuxError::InvalidConfig(
                        "H.264 track requires SPS/PPS codec data".into(),
                    ));
                }
            }
            MimeType::VIDEO_RAW => {}
            other => {
                return Err(MuxError::InvalidConfig(format!(
                    "Unsupported video MIME: {}",
                    other
                )));
            }
        }
        Ok(())
    }

    fn validate_audio_format(&self, format: &TrackFormat) -> MuxResult<()> {
        if format.mime.as_str() != MimeType::AUDIO_AAC {
            return Err(MuxError::InvalidConfig(format!(
                "Unsupported audio MIME: {}",
                format.mime
            )));
        }
        if format.csd.is_empty() {
            return Err(MuxError::InvalidConfig(
                "AAC track requires AudioSpecificConfig codec data".into(),
            ));
        }
        Ok(())
    }

    /// Freeze the track list and begin accepting samples.
    pub fn start(&mut self) -> MuxResult<()> {
        if self.state != MuxerState::Configured {
            return Err(MuxError::InvalidState("Muxer is already started".into()));
        }
        if self.tracks.is_empty() {
            return Err(MuxError::InvalidState(
                "Cannot start a muxer with no tracks".into(),
            ));
        }
        self.state = MuxerState::Started;
        tracing::debug!(tracks = self.tracks.len(), "Muxer started");
        Ok(())
    }

    /// Append one compressed sample to the given track.
    ///
    /// The payload is written to mdat immediately; timing and sync metadata
    /// are held until `stop()` builds the sample tables.
    pub fn write_sample(
        &mut self,
        track: TrackId,
        data: &[u8],
        info: BufferInfo,
    ) -> MuxResult<()> {
        if self.state != MuxerState::Started {
            return Err(MuxError::InvalidState(
                "Cannot write a sample before the muxer has started".into(),
            ));
        }

        let track_index = self
            .tracks
            .iter()
            .position(|t| t.id == track)
            .ok_or(MuxError::TrackNotFound(track.0))?;

        let offset = self.writer.stream_position()?;
        self.writer.write_all(data)?;

        self.tracks[track_index].samples.push(PendingSample {
            offset,
            size: data.len() as u32,
            pts: info.pts,
            is_sync: info.is_key_frame(),
        });

        tracing::trace!(
            track_id = track.0,
            size = data.len(),
            pts_us = info.pts.as_micros(),
            "Wrote sample"
        );
        Ok(())
    }

    /// Finalize the file: patch the mdat size, write the moov box and flush.
    ///
    /// Consumes the muxer; the file is a complete MP4 once this returns.
    pub fn stop(mut self) -> MuxResult<()> {
        if self.state != MuxerState::Started {
            return Err(MuxError::InvalidState(
                "Cannot stop a muxer that was never started".into(),
            ));
        }

        close_large_atom(&mut self.writer, self.mdat_size_pos)?;

        let track_infos: Vec<TrackInfo> = self
            .tracks
            .iter()
            .map(|track| {
                let default_ticks = default_sample_ticks(&track.format, track.timescale);
                let durations =
                    compute_sample_durations(&track.samples, track.timescale, default_ticks);
                let duration: u64 = durations.iter().map(|&d| d as u64).sum();

                let samples = track
                    .samples
                    .iter()
                    .zip(durations)
                    .map(|(s, duration)| SampleInfo {
                        offset: s.offset,
                        size: s.size,
                        duration,
                        is_sync: s.is_sync,
                    })
                    .collect();

                TrackInfo {
                    track_id: track.id.0,
                    timescale: track.timescale,
                    duration,
                    format: track.format.clone(),
                    samples,
                }
            })
            .collect();

        write_moov(&mut self.writer, &track_infos)?;
        self.writer.flush()?;

        let total_samples: usize = track_infos.iter().map(|t| t.samples.len()).sum();
        tracing::info!(
            path = %self.path.display(),
            tracks = track_infos.len(),
            samples = total_samples,
            "Finalized MP4 file"
        );
        Ok(())
    }

    pub fn state(&self) -> MuxerState {
        self.state
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    /// Number of samples written to a track so far.
    pub fn track_sample_count(&self, track: TrackId) -> MuxResult<usize> {
        self.tracks
            .iter()
            .find(|t| t.id == track)
            .map(|t| t.samples.len())
            .ok_or(MuxError::TrackNotFound(track.0))
    }
}

/// Per-sample default duration in track timescale units, used when a track
/// has a single sample or a non-increasing timestamp.
fn default_sample_ticks(format: &TrackFormat, timescale: u32) -> u32 {
    match &format.kind {
        TrackKind::Video { frame_rate, .. } => frame_rate
            .map(|rate| media_time_to_ticks(rate.frame_duration(), timescale) as u32)
            .filter(|&t| t > 0)
            .unwrap_or(DEFAULT_VIDEO_SAMPLE_TICKS),
        TrackKind::Audio { .. } => AAC_FRAME_TICKS,
    }
}

/// Derive sample durations from consecutive pts deltas.
///
/// The last sample reuses the previous delta; a non-increasing delta also
/// reuses the previous value so durations stay positive.
fn compute_sample_durations(
    samples: &[PendingSample],
    timescale: u32,
    default_ticks: u32,
) -> Vec<u32> {
    let ticks: Vec<u64> = samples
        .iter()
        .map(|s| media_time_to_ticks(s.pts, timescale))
        .collect();

    let mut durations = Vec::with_capacity(samples.len());
    let mut prev = default_ticks;
    for i in 0..ticks.len() {
        let duration = if i + 1 < ticks.len() {
            let delta = ticks[i + 1] as i64 - ticks[i] as i64;
            if delta > 0 {
                delta as u32
            } else {
                prev
            }
        } else {
            prev
        };
        durations.push(duration);
        prev = duration;
    }
    durations
}
