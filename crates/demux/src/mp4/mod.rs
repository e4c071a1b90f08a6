//! MP4 demuxer — opens a file, lists track formats, and streams
//! compressed samples from one selected track in decode order.
//!
//! The access model mirrors platform media extractors: formats are
//! readable up front, exactly one track can be selected per instance,
//! and `read_sample` walks that track until the table runs out.

pub mod boxes;
pub mod sample;

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use tracing::{debug, info};

use ob_common::{
    BufferInfo, DemuxError, DemuxResult, MediaTime, MimeType, Rational, Resolution,
    SampleFlags, TrackFormat,
};

use crate::probe;
use boxes::{
    parse_ftyp, read_box_header, skip_box, ParsedAudioTrack, ParsedMoov, ParsedVideoTrack,
    StszBox, AVC1, AVC3, FTYP, MOOV, MP4A, RAW_,
};
use sample::SampleTable;

/// Demuxer for MP4/ISO-BMFF files.
pub struct Mp4Demuxer {
    reader: BufReader<File>,
    moov: ParsedMoov,
    tracks: Vec<TrackHandle>,
    selection: Option<Selection>,
}

/// A track visible in the container, with its format pre-built.
struct TrackHandle {
    format: TrackFormat,
    source: TrackSource,
}

/// Index into the parsed moov track lists.
enum TrackSource {
    Video(usize),
    Audio(usize),
}

/// State for the single selected track.
struct Selection {
    format: TrackFormat,
    table: SampleTable,
    cursor: usize,
}

impl Mp4Demuxer {
    /// Open an MP4 file and parse the moov structure.
    pub fn open(path: impl AsRef<Path>) -> DemuxResult<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);

        probe::verify_mp4_magic(&mut reader)?;
        reader.seek(SeekFrom::Start(0))?;

        let moov = find_and_parse_moov(&mut reader)?;
        let tracks = build_track_handles(&moov);

        info!(
            "Opened {}: {} video / {} audio track(s), duration {:.2}s",
            path.display(),
            moov.video_tracks.len(),
            moov.audio_tracks.len(),
            container_duration(&moov).as_secs_f64()
        );

        Ok(Mp4Demuxer {
            reader,
            moov,
            tracks,
            selection: None,
        })
    }

    /// Formats of all tracks in the container, video tracks first.
    pub fn track_formats(&self) -> Vec<TrackFormat> {
        self.tracks.iter().map(|t| t.format.clone()).collect()
    }

    /// Number of tracks in the container.
    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    /// Select the first track whose MIME type starts with `prefix`
    /// (e.g. `"video/"` or `"audio/"`) and return its format.
    ///
    /// Only one track may be selected per demuxer instance.
    pub fn select_track(&mut self, prefix: &str) -> DemuxResult<TrackFormat> {
        if self.selection.is_some() {
            return Err(DemuxError::TrackAlreadySelected);
        }

        let handle = self
            .tracks
            .iter()
            .find(|t| t.format.mime.has_prefix(prefix))
            .ok_or_else(|| DemuxError::NoMatchingTrack {
                prefix: prefix.to_string(),
            })?;

        let table = match handle.source {
            TrackSource::Video(i) => SampleTable::build(&self.moov.video_tracks[i])?,
            TrackSource::Audio(i) => SampleTable::build_from_audio(&self.moov.audio_tracks[i])?,
        };

        let format = handle.format.clone();
        debug!(
            "Selected {} track: {} samples",
            format.mime,
            table.samples.len()
        );

        self.selection = Some(Selection {
            format: format.clone(),
            table,
            cursor: 0,
        });
        Ok(format)
    }

    /// Format of the selected track, if one is selected.
    pub fn selected_format(&self) -> Option<&TrackFormat> {
        self.selection.as_ref().map(|s| &s.format)
    }

    /// Number of samples in the selected track.
    pub fn selected_sample_count(&self) -> Option<usize> {
        self.selection.as_ref().map(|s| s.table.samples.len())
    }

    /// Read the next sample of the selected track into `buf`, resizing it
    /// to the sample's exact length. Returns `Ok(None)` once the track is
    /// exhausted.
    pub fn read_sample(&mut self, buf: &mut Vec<u8>) -> DemuxResult<Option<BufferInfo>> {
        let sel = self.selection.as_mut().ok_or(DemuxError::NoTrackSelected)?;

        let entry = match sel.table.samples.get(sel.cursor) {
            Some(e) => e.clone(),
            None => return Ok(None),
        };

        self.reader.seek(SeekFrom::Start(entry.offset))?;
        buf.resize(entry.size as usize, 0);
        if let Err(e) = self.reader.read_exact(buf) {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                let available = self
                    .reader
                    .get_ref()
                    .metadata()?
                    .len()
                    .saturating_sub(entry.offset);
                return Err(DemuxError::TruncatedData {
                    expected: entry.size as u64,
                    got: available,
                });
            }
            return Err(DemuxError::Io(e));
        }

        let flags = if entry.is_sync {
            SampleFlags::KEY_FRAME
        } else {
            SampleFlags::NONE
        };
        let info = BufferInfo::new(sel.table.ticks_to_media_time(entry.cts), flags);

        sel.cursor += 1;
        Ok(Some(info))
    }

    /// Reposition the selected track to the sync sample at or before
    /// `target`. Returns the timestamp actually landed on.
    pub fn seek_to_sync(&mut self, target: MediaTime) -> DemuxResult<MediaTime> {
        let sel = self.selection.as_mut().ok_or(DemuxError::NoTrackSelected)?;

        let idx = sel.table.find_sync_at_or_before(target).unwrap_or(0);
        sel.cursor = idx;

        let landed = sel
            .table
            .samples
            .get(idx)
            .map(|e| sel.table.ticks_to_media_time(e.cts))
            .unwrap_or(MediaTime::ZERO);
        debug!("Seek to {} landed on sample {} at {}", target, idx, landed);
        Ok(landed)
    }

    /// Total presentation duration of the container.
    pub fn duration(&self) -> MediaTime {
        container_duration(&self.moov)
    }
}

/// Scan top-level boxes until moov is found, then parse it.
fn find_and_parse_moov<R: Read + Seek>(reader: &mut R) -> DemuxResult<ParsedMoov> {
    loop {
        let header = match read_box_header(reader)? {
            Some(h) => h,
            None => {
                return Err(DemuxError::InvalidStructure {
                    offset: 0,
                    reason: "No moov box found".to_string(),
                })
            }
        };

        match header.box_type {
            MOOV => return boxes::parse_moov(reader, &header),
            FTYP => {
                let ftyp = parse_ftyp(reader, &header)?;
                debug!(
                    "container brand '{}'",
                    boxes::fourcc_to_string(ftyp.major_brand)
                );
                skip_box(reader, &header)?;
            }
            _ => skip_box(reader, &header)?,
        }
    }
}

fn container_duration(moov: &ParsedMoov) -> MediaTime {
    if moov.timescale == 0 {
        return MediaTime::ZERO;
    }
    let us = moov.duration as i128 * 1_000_000 / moov.timescale as i128;
    MediaTime::from_micros(us as i64)
}

/// Build format handles for every track, video first.
fn build_track_handles(moov: &ParsedMoov) -> Vec<TrackHandle> {
    let mut tracks = Vec::new();

    for (i, vt) in moov.video_tracks.iter().enumerate() {
        match build_video_format(vt) {
            Some(format) => tracks.push(TrackHandle {
                format,
                source: TrackSource::Video(i),
            }),
            None => debug!(
                "Skipping video track {}: unsupported codec '{}'",
                vt.track_id,
                boxes::fourcc_to_string(vt.sample_desc.codec_fourcc)
            ),
        }
    }

    for (i, at) in moov.audio_tracks.iter().enumerate() {
        match build_audio_format(at) {
            Some(format) => tracks.push(TrackHandle {
                format,
                source: TrackSource::Audio(i),
            }),
            None => debug!(
                "Skipping audio track {}: unsupported codec '{}'",
                at.track_id,
                boxes::fourcc_to_string(at.sample_desc.codec_fourcc)
            ),
        }
    }

    tracks
}

fn build_video_format(track: &ParsedVideoTrack) -> Option<TrackFormat> {
    let mime = video_mime_from_fourcc(track.sample_desc.codec_fourcc)?;
    let resolution = Resolution::new(track.width, track.height);

    let mut format =
        TrackFormat::video(mime, resolution).with_rotation(track.rotation_degrees);

    if let Some(rate) = estimate_frame_rate(track) {
        format = format.with_frame_rate(rate);
    }
    if let Some(bitrate) = estimate_bitrate(&track.stsz, track.timescale, track.duration) {
        format = format.with_bitrate(bitrate);
    }
    if let Some(avcc) = &track.sample_desc.avcc {
        let csd: Vec<Vec<u8>> = avcc
            .sps_list
            .iter()
            .chain(avcc.pps_list.iter())
            .cloned()
            .collect();
        format = format.with_csd(csd);
    }

    Some(format)
}

fn build_audio_format(track: &ParsedAudioTrack) -> Option<TrackFormat> {
    let mime = audio_mime_from_fourcc(track.sample_desc.codec_fourcc)?;

    // The esds config is authoritative when present; the fixed-point
    // sample entry fields are a fallback.
    let (sample_rate, channels) = match &track.sample_desc.aac_config {
        Some(cfg) if cfg.sample_rate > 0 => (cfg.sample_rate, cfg.channel_config as u16),
        _ => (
            track.sample_desc.sample_rate,
            track.sample_desc.channel_count,
        ),
    };

    let mut format = TrackFormat::audio(mime, sample_rate, channels);
    if let Some(cfg) = &track.sample_desc.aac_config {
        format = format.with_csd(vec![cfg.raw_config.clone()]);
    }

    Some(format)
}

/// Map a video sample-entry fourcc to a MIME type.
fn video_mime_from_fourcc(cc: u32) -> Option<MimeType> {
    match cc {
        AVC1 | AVC3 => Some(MimeType::new(MimeType::VIDEO_AVC)),
        RAW_ => Some(MimeType::new(MimeType::VIDEO_RAW)),
        _ => None,
    }
}

/// Map an audio sample-entry fourcc to a MIME type.
fn audio_mime_from_fourcc(cc: u32) -> Option<MimeType> {
    match cc {
        MP4A => Some(MimeType::new(MimeType::AUDIO_AAC)),
        _ => None,
    }
}

/// Estimate the frame rate from the time-to-sample table. The most common
/// delta wins so a few odd edit-edge durations don't skew the result.
fn estimate_frame_rate(track: &ParsedVideoTrack) -> Option<Rational> {
    if track.timescale == 0 {
        return None;
    }

    let most_common = track
        .stts
        .iter()
        .filter(|e| e.sample_delta > 0)
        .max_by_key(|e| e.sample_count)?;

    let g = gcd(track.timescale, most_common.sample_delta);
    Some(Rational::new(
        track.timescale / g,
        most_common.sample_delta / g,
    ))
}

/// Estimate average bitrate in bits per second from total sample bytes.
fn estimate_bitrate(stsz: &StszBox, timescale: u32, duration: u64) -> Option<u32> {
    if timescale == 0 || duration == 0 {
        return None;
    }

    let total_bytes: u64 = if stsz.default_sample_size > 0 {
        stsz.default_sample_size as u64 * stsz.sample_count as u64
    } else {
        stsz.sample_sizes.iter().map(|&s| s as u64).sum()
    };
    if total_bytes == 0 {
        return None;
    }

    let secs = duration as f64 / timescale as f64;
    Some((total_bytes as f64 * 8.0 / secs) as u32)
}

fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        let t = b;
        b = a % b;
        a = t;
    }
    a
}
