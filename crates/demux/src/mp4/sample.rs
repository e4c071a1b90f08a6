//! Sample table interpretation.
//!
//! The stbl boxes describe samples as run-length tables (stts, stsc,
//! ctts) plus flat arrays (stsz, stco, stss). This module flattens them
//! into one entry per sample so reads and seeks are plain indexing.

use crate::mp4::boxes::{
    CttsEntry, ParsedAudioTrack, ParsedVideoTrack, StscEntry, SttsEntry,
};
use ob_common::{DemuxError, MediaTime};
use tracing::debug;

/// Flat entry for a single sample, pre-computed for fast access.
#[derive(Clone, Debug)]
pub struct SampleEntry {
    /// 0-based sample index.
    pub index: u32,
    /// Byte offset in the file where this sample's data starts.
    pub offset: u64,
    /// Byte size of the sample data.
    pub size: u32,
    /// Decoding timestamp in media timescale units.
    pub dts: u64,
    /// Composition (presentation) timestamp in media timescale units.
    pub cts: i64,
    /// Whether this sample is a sync sample (keyframe).
    pub is_sync: bool,
}

/// Borrowed view of the sample table boxes, shared by video and audio
/// tracks. Both track kinds carry the same stbl layout.
struct TrackTables<'a> {
    timescale: u32,
    duration: u64,
    stts: &'a [SttsEntry],
    ctts: &'a [CttsEntry],
    stsc: &'a [StscEntry],
    sample_sizes: &'a [u32],
    default_sample_size: u32,
    sample_count: usize,
    chunk_offsets: &'a [u64],
    sync_samples: &'a [u32],
}

impl<'a> From<&'a ParsedVideoTrack> for TrackTables<'a> {
    fn from(t: &'a ParsedVideoTrack) -> Self {
        TrackTables {
            timescale: t.timescale,
            duration: t.duration,
            stts: &t.stts,
            ctts: &t.ctts,
            stsc: &t.stsc,
            sample_sizes: &t.stsz.sample_sizes,
            default_sample_size: t.stsz.default_sample_size,
            sample_count: t.stsz.sample_count as usize,
            chunk_offsets: &t.chunk_offsets,
            sync_samples: &t.sync_samples,
        }
    }
}

impl<'a> From<&'a ParsedAudioTrack> for TrackTables<'a> {
    fn from(t: &'a ParsedAudioTrack) -> Self {
        TrackTables {
            timescale: t.timescale,
            duration: t.duration,
            stts: &t.stts,
            ctts: &t.ctts,
            stsc: &t.stsc,
            sample_sizes: &t.stsz.sample_sizes,
            default_sample_size: t.stsz.default_sample_size,
            sample_count: t.stsz.sample_count as usize,
            chunk_offsets: &t.chunk_offsets,
            sync_samples: &t.sync_samples,
        }
    }
}

/// View of the stsz box. Either every sample shares one size or each
/// sample carries its own.
enum SizeTable<'a> {
    Uniform(u32),
    PerSample(&'a [u32]),
}

impl<'a> SizeTable<'a> {
    fn new(default_sample_size: u32, sizes: &'a [u32]) -> Self {
        if default_sample_size > 0 {
            SizeTable::Uniform(default_sample_size)
        } else {
            SizeTable::PerSample(sizes)
        }
    }

    fn get(&self, index: usize) -> Option<u32> {
        match self {
            SizeTable::Uniform(size) => Some(*size),
            SizeTable::PerSample(sizes) => sizes.get(index).copied(),
        }
    }
}

/// Pre-computed sample table for one track.
#[derive(Clone, Debug)]
pub struct SampleTable {
    /// Flat list of all samples, ordered by sample index (decode order).
    pub samples: Vec<SampleEntry>,
    /// Media timescale (ticks per second).
    pub timescale: u32,
    /// Total duration in timescale units.
    pub duration: u64,
}

impl SampleTable {
    /// Build a `SampleTable` from parsed video track data.
    pub fn build(track: &ParsedVideoTrack) -> Result<Self, DemuxError> {
        Self::build_from_tables(track.into())
    }

    /// Build a `SampleTable` from parsed audio track data.
    ///
    /// Audio tracks typically have no stss box, so every sample comes out
    /// marked sync.
    pub fn build_from_audio(track: &ParsedAudioTrack) -> Result<Self, DemuxError> {
        Self::build_from_tables(track.into())
    }

    fn build_from_tables(t: TrackTables<'_>) -> Result<Self, DemuxError> {
        if t.sample_count == 0 {
            return Ok(SampleTable {
                samples: Vec::new(),
                timescale: t.timescale,
                duration: t.duration,
            });
        }

        let placed = lay_out_samples(
            t.stsc,
            t.chunk_offsets,
            SizeTable::new(t.default_sample_size, t.sample_sizes),
            t.sample_count,
        )?;
        let stamps = decode_times(t.stts, t.sample_count);
        let shifts = decode_composition_shifts(t.ctts, t.sample_count);

        // An absent stss box means every sample is sync.
        let all_sync = t.sync_samples.is_empty();

        let mut samples = Vec::with_capacity(t.sample_count);
        for (i, (&(offset, size), (&dts, &shift))) in placed
            .iter()
            .zip(stamps.iter().zip(shifts.iter()))
            .enumerate()
        {
            samples.push(SampleEntry {
                index: i as u32,
                offset,
                size,
                dts,
                cts: dts as i64 + i64::from(shift),
                is_sync: all_sync || t.sync_samples.contains(&(i as u32 + 1)),
            });
        }

        debug!(
            "sample table ready: {} samples at {} ticks/s, duration {} ticks",
            samples.len(),
            t.timescale,
            t.duration
        );

        Ok(SampleTable {
            samples,
            timescale: t.timescale,
            duration: t.duration,
        })
    }

    /// Total track duration.
    pub fn duration(&self) -> MediaTime {
        self.ticks_to_media_time(self.duration as i64)
    }

    /// Convert a DTS/CTS in timescale units to a media timestamp.
    pub fn ticks_to_media_time(&self, ticks: i64) -> MediaTime {
        if self.timescale == 0 {
            return MediaTime::ZERO;
        }
        let us = ticks as i128 * 1_000_000 / self.timescale as i128;
        MediaTime::from_micros(us as i64)
    }

    /// Convert a media timestamp to timescale units.
    pub fn media_time_to_ticks(&self, time: MediaTime) -> i64 {
        (time.as_micros() as i128 * self.timescale as i128 / 1_000_000) as i64
    }

    /// Find the sync sample (keyframe) at or before the given time.
    /// Returns the sample index, or None if the table is empty or no sync
    /// sample precedes the target.
    pub fn find_sync_at_or_before(&self, target: MediaTime) -> Option<usize> {
        let ticks = self.media_time_to_ticks(target);
        // CTS need not be monotonic once frames reorder, so take the last
        // qualifying entry instead of binary-searching.
        self.samples
            .iter()
            .rposition(|s| s.is_sync && s.cts <= ticks)
    }
}

/// Walk the chunk list and hand each sample its byte position. The stsc
/// runs say how many samples each chunk holds; sizes advance the cursor
/// within a chunk.
fn lay_out_samples(
    stsc: &[StscEntry],
    chunk_offsets: &[u64],
    sizes: SizeTable<'_>,
    sample_count: usize,
) -> Result<Vec<(u64, u32)>, DemuxError> {
    let per_chunk = expand_chunk_runs(stsc, chunk_offsets.len());
    let mut placed = Vec::with_capacity(sample_count);

    'chunks: for (&chunk_start, &count) in chunk_offsets.iter().zip(per_chunk.iter()) {
        let mut cursor = chunk_start;
        for _ in 0..count {
            if placed.len() == sample_count {
                break 'chunks;
            }
            let size = sizes.get(placed.len()).ok_or_else(|| {
                DemuxError::InvalidStructure {
                    offset: 0,
                    reason: format!(
                        "stsz ran out of sizes at sample {} of {}",
                        placed.len(),
                        sample_count
                    ),
                }
            })?;
            placed.push((cursor, size));
            cursor += u64::from(size);
        }
    }

    if placed.len() != sample_count {
        return Err(DemuxError::InvalidStructure {
            offset: 0,
            reason: format!(
                "chunk layout placed {} of {} samples (stsc/stco disagree with stsz)",
                placed.len(),
                sample_count
            ),
        });
    }

    Ok(placed)
}

/// Expand the stsc run-length table into one samples-per-chunk count per
/// chunk. Entry N covers chunks [first_chunk, next first_chunk) with
/// 1-based numbering; the final entry runs to the end of the chunk list.
fn expand_chunk_runs(stsc: &[StscEntry], chunk_count: usize) -> Vec<u32> {
    let mut counts = vec![1u32; chunk_count];
    for (i, entry) in stsc.iter().enumerate() {
        let start = (entry.first_chunk.saturating_sub(1) as usize).min(chunk_count);
        let end = stsc
            .get(i + 1)
            .map(|next| next.first_chunk.saturating_sub(1) as usize)
            .unwrap_or(chunk_count)
            .min(chunk_count);
        for slot in &mut counts[start..end] {
            *slot = entry.samples_per_chunk;
        }
    }
    counts
}

/// Expand stts runs into one DTS per sample. A table that falls short
/// keeps ticking with its last delta so trailing samples still get
/// increasing stamps.
fn decode_times(stts: &[SttsEntry], sample_count: usize) -> Vec<u64> {
    let deltas = stts
        .iter()
        .flat_map(|e| std::iter::repeat(u64::from(e.sample_delta)).take(e.sample_count as usize));

    let mut stamps = Vec::with_capacity(sample_count);
    let mut clock = 0u64;
    for delta in deltas.take(sample_count) {
        stamps.push(clock);
        clock += delta;
    }

    let tail_delta = stts.last().map_or(1, |e| u64::from(e.sample_delta));
    while stamps.len() < sample_count {
        stamps.push(clock);
        clock += tail_delta;
    }

    stamps
}

/// Expand ctts runs into one composition shift per sample, zero-filled
/// past the table's end.
fn decode_composition_shifts(ctts: &[CttsEntry], sample_count: usize) -> Vec<i32> {
    let mut shifts: Vec<i32> = ctts
        .iter()
        .flat_map(|e| std::iter::repeat(e.sample_offset).take(e.sample_count as usize))
        .take(sample_count)
        .collect();
    shifts.resize(sample_count, 0);
    shifts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mp4::boxes::{
        AudioSampleDesc, StszBox, VideoSampleDesc, MP4A, RAW_,
    };

    fn run(sample_count: u32, sample_delta: u32) -> SttsEntry {
        SttsEntry {
            sample_count,
            sample_delta,
        }
    }

    fn chunk_map(first_chunk: u32, samples_per_chunk: u32) -> StscEntry {
        StscEntry {
            first_chunk,
            samples_per_chunk,
            sample_description_index: 1,
        }
    }

    fn shift(sample_count: u32, sample_offset: i32) -> CttsEntry {
        CttsEntry {
            sample_count,
            sample_offset,
        }
    }

    /// Table fixture with empty defaults so each test only spells out
    /// what it cares about.
    struct Tables {
        timescale: u32,
        stts: Vec<SttsEntry>,
        ctts: Vec<CttsEntry>,
        stsc: Vec<StscEntry>,
        sizes: Vec<u32>,
        uniform_size: u32,
        chunks: Vec<u64>,
        syncs: Vec<u32>,
    }

    impl Default for Tables {
        fn default() -> Self {
            Tables {
                timescale: 90_000,
                stts: vec![],
                ctts: vec![],
                stsc: vec![],
                sizes: vec![],
                uniform_size: 0,
                chunks: vec![],
                syncs: vec![],
            }
        }
    }

    impl Tables {
        fn stsz(&self) -> StszBox {
            let sample_count = if self.uniform_size > 0 {
                self.stts.iter().map(|e| e.sample_count).sum()
            } else {
                self.sizes.len() as u32
            };
            StszBox {
                default_sample_size: self.uniform_size,
                sample_sizes: self.sizes.clone(),
                sample_count,
            }
        }

        fn video(self) -> ParsedVideoTrack {
            ParsedVideoTrack {
                track_id: 1,
                timescale: self.timescale,
                duration: 0,
                width: 1280,
                height: 720,
                rotation_degrees: 0,
                sample_desc: VideoSampleDesc {
                    codec_fourcc: RAW_,
                    width: 1280,
                    height: 720,
                    avcc: None,
                },
                stsz: self.stsz(),
                stts: self.stts,
                ctts: self.ctts,
                stsc: self.stsc,
                chunk_offsets: self.chunks,
                sync_samples: self.syncs,
            }
        }

        fn audio(self) -> ParsedAudioTrack {
            ParsedAudioTrack {
                track_id: 2,
                timescale: self.timescale,
                duration: 0,
                sample_desc: AudioSampleDesc {
                    codec_fourcc: MP4A,
                    channel_count: 2,
                    sample_size: 16,
                    sample_rate: self.timescale,
                    aac_config: None,
                },
                stsz: self.stsz(),
                stts: self.stts,
                ctts: self.ctts,
                stsc: self.stsc,
                chunk_offsets: self.chunks,
                sync_samples: self.syncs,
            }
        }
    }

    #[test]
    fn test_single_chunk_layout() {
        let track = Tables {
            stts: vec![run(3, 3_000)],
            stsc: vec![chunk_map(1, 3)],
            sizes: vec![96, 204, 156],
            chunks: vec![4096],
            syncs: vec![1],
            ..Tables::default()
        }
        .video();

        let table = SampleTable::build(&track).unwrap();
        assert_eq!(table.samples.len(), 3);

        assert_eq!(table.samples[0].offset, 4096);
        assert_eq!(table.samples[0].size, 96);
        assert_eq!(table.samples[0].dts, 0);
        assert!(table.samples[0].is_sync);

        assert_eq!(table.samples[1].offset, 4192);
        assert_eq!(table.samples[1].size, 204);
        assert_eq!(table.samples[1].dts, 3_000);
        assert!(!table.samples[1].is_sync);

        assert_eq!(table.samples[2].offset, 4396);
        assert_eq!(table.samples[2].size, 156);
        assert_eq!(table.samples[2].dts, 6_000);
        assert!(!table.samples[2].is_sync);
    }

    #[test]
    fn test_chunk_runs_spread_samples_across_chunks() {
        // chunk 1 holds two samples, chunk 2 the remaining one
        let track = Tables {
            stts: vec![run(3, 512)],
            stsc: vec![chunk_map(1, 2), chunk_map(2, 1)],
            sizes: vec![100, 200, 300],
            chunks: vec![1_000, 5_000],
            ..Tables::default()
        }
        .video();

        let table = SampleTable::build(&track).unwrap();
        assert_eq!(table.samples.len(), 3);

        assert_eq!(table.samples[0].offset, 1_000);
        assert_eq!(table.samples[1].offset, 1_100);
        assert_eq!(table.samples[2].offset, 5_000);
        assert_eq!(table.samples[2].size, 300);

        // no stss box, so everything is sync
        assert!(table.samples.iter().all(|s| s.is_sync));
    }

    #[test]
    fn test_composition_shifts_apply_to_cts() {
        let track = Tables {
            stts: vec![run(4, 1_000)],
            ctts: vec![shift(2, 2_000), shift(2, 1_000)],
            stsc: vec![chunk_map(1, 4)],
            sizes: vec![64; 4],
            chunks: vec![1_000],
            syncs: vec![1],
            ..Tables::default()
        }
        .video();

        let table = SampleTable::build(&track).unwrap();

        assert_eq!(table.samples[0].cts, 2_000);
        assert_eq!(table.samples[1].cts, 3_000);
        assert_eq!(table.samples[2].cts, 3_000);
        assert_eq!(table.samples[3].cts, 4_000);
    }

    #[test]
    fn test_sync_lookup_picks_last_preceding_keyframe() {
        // one sample per second, keyframes at samples 1, 4, 7 (1-based)
        let track = Tables {
            stts: vec![run(10, 90_000)],
            stsc: vec![chunk_map(1, 10)],
            sizes: vec![100; 10],
            chunks: vec![0],
            syncs: vec![1, 4, 7],
            ..Tables::default()
        }
        .video();

        let table = SampleTable::build(&track).unwrap();

        assert_eq!(table.find_sync_at_or_before(MediaTime::ZERO), Some(0));
        assert_eq!(
            table.find_sync_at_or_before(MediaTime::from_millis(2_500)),
            Some(0)
        );
        assert_eq!(
            table.find_sync_at_or_before(MediaTime::from_millis(5_000)),
            Some(3)
        );
        assert_eq!(
            table.find_sync_at_or_before(MediaTime::from_millis(8_000)),
            Some(6)
        );
    }

    #[test]
    fn test_empty_track_builds_empty_table() {
        let table = SampleTable::build(&Tables::default().video()).unwrap();
        assert!(table.samples.is_empty());
        assert_eq!(table.find_sync_at_or_before(MediaTime::ZERO), None);
    }

    #[test]
    fn test_timescale_conversions() {
        let table = SampleTable {
            samples: vec![],
            timescale: 48_000,
            duration: 96_000,
        };

        assert_eq!(table.ticks_to_media_time(48_000).as_micros(), 1_000_000);
        assert_eq!(table.duration().as_micros(), 2_000_000);
        assert_eq!(
            table.media_time_to_ticks(MediaTime::from_millis(500)),
            24_000
        );
    }

    #[test]
    fn test_uniform_size_layout() {
        let track = Tables {
            stts: vec![run(3, 1_000)],
            stsc: vec![chunk_map(1, 3)],
            uniform_size: 256,
            chunks: vec![2_000],
            ..Tables::default()
        }
        .video();

        let table = SampleTable::build(&track).unwrap();
        assert_eq!(table.samples.len(), 3);
        assert_eq!(table.samples[0].offset, 2_000);
        assert_eq!(table.samples[1].offset, 2_256);
        assert_eq!(table.samples[2].offset, 2_512);
        assert!(table.samples.iter().all(|s| s.size == 256));
    }

    #[test]
    fn test_layout_shortfall_is_an_error() {
        // three samples declared but the single chunk only maps one
        let track = Tables {
            stts: vec![run(3, 1_000)],
            stsc: vec![chunk_map(1, 1)],
            sizes: vec![100, 100, 100],
            chunks: vec![1_000],
            ..Tables::default()
        }
        .video();

        let err = SampleTable::build(&track).unwrap_err();
        assert!(matches!(err, DemuxError::InvalidStructure { .. }));
    }

    #[test]
    fn test_short_stts_extends_with_last_delta() {
        // stts covers 2 of 4 samples; the rest keep the 1000-tick spacing
        let track = Tables {
            stts: vec![run(2, 1_000)],
            stsc: vec![chunk_map(1, 4)],
            sizes: vec![50; 4],
            chunks: vec![0],
            ..Tables::default()
        }
        .video();

        let table = SampleTable::build(&track).unwrap();
        let stamps: Vec<u64> = table.samples.iter().map(|s| s.dts).collect();
        assert_eq!(stamps, vec![0, 1_000, 2_000, 3_000]);
    }

    // ─── Audio sample tables ────────────────────────────────────

    #[test]
    fn test_audio_layout_marks_everything_sync() {
        // one chunk of three AAC frames, 1024 PCM frames each at 44.1kHz
        let track = Tables {
            timescale: 44_100,
            stts: vec![run(3, 1_024)],
            stsc: vec![chunk_map(1, 3)],
            sizes: vec![400, 380, 410],
            chunks: vec![5_000],
            ..Tables::default()
        }
        .audio();

        let table = SampleTable::build_from_audio(&track).unwrap();
        assert_eq!(table.samples.len(), 3);
        assert_eq!(table.timescale, 44_100);

        assert_eq!(table.samples[0].offset, 5_000);
        assert_eq!(table.samples[1].offset, 5_400);
        assert_eq!(table.samples[2].offset, 5_780);
        assert_eq!(table.samples[2].dts, 2_048);
        assert!(table.samples.iter().all(|s| s.is_sync));
    }

    #[test]
    fn test_audio_pts_spacing_matches_frame_length() {
        let track = Tables {
            timescale: 44_100,
            stts: vec![run(5, 1_024)],
            stsc: vec![chunk_map(1, 5)],
            sizes: vec![400; 5],
            chunks: vec![1_000],
            ..Tables::default()
        }
        .audio();

        let table = SampleTable::build_from_audio(&track).unwrap();

        // 1024 PCM frames at 44.1kHz is about 23.2ms per AAC frame
        let pts1 = table.ticks_to_media_time(table.samples[1].cts);
        assert_eq!(pts1.as_micros(), 1_024 * 1_000_000 / 44_100);
    }
}
