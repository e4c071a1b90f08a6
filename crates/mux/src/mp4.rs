//! Structural box writers for the ISO Base Media File Format.
//!
//! Everything under moov is assembled here, top down: mvhd, one trak
//! per registered track, and the stbl sample tables built from the
//! [`SampleInfo`] records the muxer collected while streaming mdat.

use byteorder::{BigEndian, WriteBytesExt};
use std::io::{Seek, Write};

use crate::atoms::{
    atom, encode_language, fixed_16_16, fixed_8_8, full_atom, media_time_to_ticks,
    mp4_creation_time, pad, ticks_to_media_time, write_matrix, MOVIE_TIMESCALE,
};
use crate::error::{MuxError, MuxResult};
use ob_common::{MediaTime, MimeType, Resolution, TrackFormat, TrackKind};

/// Metadata for a single written sample, collected while streaming mdat.
#[derive(Clone, Copy, Debug)]
pub struct SampleInfo {
    /// Byte offset of the sample in the file (within mdat).
    pub offset: u64,
    /// Size of the sample in bytes.
    pub size: u32,
    /// Duration of this sample in track timescale units.
    pub duration: u32,
    /// Whether this is a sync sample (keyframe).
    pub is_sync: bool,
}

/// Describes a finalized track for the moov writer.
#[derive(Clone, Debug)]
pub struct TrackInfo {
    /// 1-based track ID.
    pub track_id: u32,
    /// Track timescale (ticks per second).
    pub timescale: u32,
    /// Total duration in timescale units.
    pub duration: u64,
    /// The declared track format (codec, dimensions, csd).
    pub format: TrackFormat,
    /// All samples in this track, in decode order.
    pub samples: Vec<SampleInfo>,
}

impl TrackInfo {
    /// Track duration on the presentation clock.
    pub fn presentation_duration(&self) -> MediaTime {
        ticks_to_media_time(self.duration, self.timescale)
    }

    fn handler(&self) -> &'static [u8; 4] {
        if self.format.is_video() {
            b"vide"
        } else {
            b"soun"
        }
    }
}

/// Write the ftyp (File Type) box.
///
/// Compatible brands: isom, iso6, mp41
pub fn write_ftyp<W: Write + Seek>(writer: &mut W) -> MuxResult<()> {
    atom(writer, b"ftyp", |w| {
        w.write_all(b"isom")?; // major brand
        w.write_u32::<BigEndian>(0x200)?; // minor version
        w.write_all(b"isom")?;
        w.write_all(b"iso6")?;
        w.write_all(b"mp41")?;
        Ok(())
    })
}

/// Write the complete moov (Movie) box with all tracks.
pub fn write_moov<W: Write + Seek>(writer: &mut W, tracks: &[TrackInfo]) -> MuxResult<()> {
    atom(writer, b"moov", |w| {
        // the movie clock runs as long as the longest track
        let longest = tracks
            .iter()
            .map(|t| t.presentation_duration())
            .max()
            .unwrap_or(MediaTime::ZERO);
        write_mvhd(w, longest)?;
        tracks.iter().try_for_each(|track| write_trak(w, track))
    })
}

fn write_mvhd<W: Write + Seek>(writer: &mut W, duration: MediaTime) -> MuxResult<()> {
    full_atom(writer, b"mvhd", 0, 0, |w| {
        let now = mp4_creation_time() as u32;
        w.write_u32::<BigEndian>(now)?; // creation_time
        w.write_u32::<BigEndian>(now)?; // modification_time
        w.write_u32::<BigEndian>(MOVIE_TIMESCALE)?;
        w.write_u32::<BigEndian>(media_time_to_ticks(duration, MOVIE_TIMESCALE) as u32)?;
        w.write_i32::<BigEndian>(fixed_16_16(1.0))?; // rate
        w.write_i16::<BigEndian>(fixed_8_8(1.0))?; // volume
        pad(w, 10)?; // reserved
        write_matrix(w, 0)?;
        pad(w, 24)?; // pre_defined
        w.write_u32::<BigEndian>(0xFFFF_FFFF)?; // next_track_ID
        Ok(())
    })
}

fn write_trak<W: Write + Seek>(writer: &mut W, track: &TrackInfo) -> MuxResult<()> {
    atom(writer, b"trak", |w| {
        let display = track
            .format
            .resolution()
            .map(|res| (res, track.format.rotation_degrees()));
        write_tkhd(w, track.track_id, track.presentation_duration(), display)?;
        write_mdia(w, track)
    })
}

/// Track header. Video tracks carry their coded dimensions plus the
/// display rotation matrix; audio tracks pass `None` and get full
/// volume instead.
fn write_tkhd<W: Write + Seek>(
    writer: &mut W,
    track_id: u32,
    duration: MediaTime,
    display: Option<(Resolution, u32)>,
) -> MuxResult<()> {
    // flags: track_enabled | track_in_movie
    full_atom(writer, b"tkhd", 0, 0x000003, |w| {
        let now = mp4_creation_time() as u32;
        w.write_u32::<BigEndian>(now)?; // creation_time
        w.write_u32::<BigEndian>(now)?; // modification_time
        w.write_u32::<BigEndian>(track_id)?;
        pad(w, 4)?; // reserved
        w.write_u32::<BigEndian>(media_time_to_ticks(duration, MOVIE_TIMESCALE) as u32)?;
        pad(w, 8)?; // reserved
        w.write_i16::<BigEndian>(0)?; // layer
        w.write_i16::<BigEndian>(0)?; // alternate_group
        w.write_i16::<BigEndian>(if display.is_none() { fixed_8_8(1.0) } else { 0 })?;
        pad(w, 2)?; // reserved

        let (resolution, rotation) = display.unwrap_or((Resolution::new(0, 0), 0));
        write_matrix(w, rotation)?;
        w.write_i32::<BigEndian>(fixed_16_16(f64::from(resolution.width)))?;
        w.write_i32::<BigEndian>(fixed_16_16(f64::from(resolution.height)))?;
        Ok(())
    })
}

fn write_mdia<W: Write + Seek>(writer: &mut W, track: &TrackInfo) -> MuxResult<()> {
    atom(writer, b"mdia", |w| {
        write_mdhd(w, track.timescale, track.duration)?;
        write_hdlr(w, track.handler())?;
        write_minf(w, track)
    })
}

fn write_mdhd<W: Write + Seek>(writer: &mut W, timescale: u32, duration: u64) -> MuxResult<()> {
    full_atom(writer, b"mdhd", 0, 0, |w| {
        let now = mp4_creation_time() as u32;
        w.write_u32::<BigEndian>(now)?;
        w.write_u32::<BigEndian>(now)?;
        w.write_u32::<BigEndian>(timescale)?;
        w.write_u32::<BigEndian>(duration as u32)?;
        w.write_u16::<BigEndian>(encode_language("und"))?;
        w.write_u16::<BigEndian>(0)?; // pre_defined
        Ok(())
    })
}

fn write_hdlr<W: Write + Seek>(writer: &mut W, handler_type: &[u8; 4]) -> MuxResult<()> {
    let name: &[u8] = match handler_type {
        b"vide" => b"VideoHandler\0",
        b"soun" => b"SoundHandler\0",
        _ => b"DataHandler\0",
    };

    full_atom(writer, b"hdlr", 0, 0, |w| {
        pad(w, 4)?; // pre_defined
        w.write_all(handler_type)?;
        pad(w, 12)?; // reserved
        w.write_all(name)?;
        Ok(())
    })
}

fn write_minf<W: Write + Seek>(writer: &mut W, track: &TrackInfo) -> MuxResult<()> {
    atom(writer, b"minf", |w| {
        if track.format.is_video() {
            // vmhd flags must be 1
            full_atom(w, b"vmhd", 0, 0x000001, |w| {
                w.write_u16::<BigEndian>(0)?; // graphicsmode
                pad(w, 6) // opcolor
            })?;
        } else {
            full_atom(w, b"smhd", 0, 0, |w| {
                w.write_i16::<BigEndian>(0)?; // balance
                pad(w, 2) // reserved
            })?;
        }
        write_dinf(w)?;
        write_stbl(w, &track.samples, &track.format)
    })
}

fn write_dinf<W: Write + Seek>(writer: &mut W) -> MuxResult<()> {
    atom(writer, b"dinf", |w| {
        full_atom(w, b"dref", 0, 0, |w| {
            w.write_u32::<BigEndian>(1)?; // entry_count
            // self-contained url entry
            full_atom(w, b"url ", 0, 0x000001, |_| Ok(()))
        })
    })
}

/// Write the stbl (Sample Table) box containing all sample metadata.
pub fn write_stbl<W: Write + Seek>(
    writer: &mut W,
    samples: &[SampleInfo],
    format: &TrackFormat,
) -> MuxResult<()> {
    atom(writer, b"stbl", |w| {
        if format.is_video() {
            write_stsd_video(w, format)?;
        } else {
            write_stsd_audio(w, format)?;
        }

        write_stts(w, samples)?;
        write_stsc(w, samples)?;
        write_stsz(w, samples)?;

        if samples.iter().any(|s| s.offset > u32::MAX as u64) {
            write_co64(w, samples)?;
        } else {
            write_stco(w, samples)?;
        }

        // A missing stss means every sample is sync, which suits raw
        // video and audio tracks; only mixed tracks get the box.
        if format.is_video() && !samples.iter().all(|s| s.is_sync) {
            write_stss(w, samples)?;
        }
        Ok(())
    })
}

/// Sample description for a video track.
///
/// `video/avc` produces an avc1 entry with an avcC record built from the
/// format's csd; `video/raw` produces a raw RGBA entry with no sub-box.
fn write_stsd_video<W: Write + Seek>(writer: &mut W, format: &TrackFormat) -> MuxResult<()> {
    let resolution = format.resolution().ok_or_else(|| {
        MuxError::InvalidConfig("Video track format is missing a resolution".into())
    })?;

    full_atom(writer, b"stsd", 0, 0, |w| {
        w.write_u32::<BigEndian>(1)?; // entry_count
        match format.mime.as_str() {
            MimeType::VIDEO_AVC => atom(w, b"avc1", |w| {
                visual_entry_fields(w, resolution)?;
                let (sps, pps) = split_h264_parameter_sets(&format.csd);
                write_avcc(w, &sps, &pps)
            }),
            MimeType::VIDEO_RAW => atom(w, b"raw ", |w| visual_entry_fields(w, resolution)),
            other => Err(MuxError::InvalidConfig(format!(
                "Unsupported video MIME for MP4 stsd: {}",
                other
            ))),
        }
    })
}

/// Fixed VisualSampleEntry fields shared by avc1 and raw entries.
fn visual_entry_fields<W: Write>(w: &mut W, resolution: Resolution) -> MuxResult<()> {
    pad(w, 6)?; // reserved
    w.write_u16::<BigEndian>(1)?; // data_reference_index
    pad(w, 16)?; // pre_defined + reserved
    w.write_u16::<BigEndian>(resolution.width as u16)?;
    w.write_u16::<BigEndian>(resolution.height as u16)?;
    w.write_u32::<BigEndian>(0x0048_0000)?; // horizresolution (72 dpi)
    w.write_u32::<BigEndian>(0x0048_0000)?; // vertresolution (72 dpi)
    pad(w, 4)?; // reserved
    w.write_u16::<BigEndian>(1)?; // frame_count
    pad(w, 32)?; // compressorname
    w.write_u16::<BigEndian>(0x0018)?; // depth (24-bit color)
    w.write_i16::<BigEndian>(-1)?; // pre_defined
    Ok(())
}

/// Sort H.264 parameter sets out of a track's csd buffers by NAL type.
fn split_h264_parameter_sets(csd: &[Vec<u8>]) -> (Vec<&[u8]>, Vec<&[u8]>) {
    let mut sps = Vec::new();
    let mut pps = Vec::new();
    for buf in csd {
        match buf.first().map(|b| b & 0x1F) {
            Some(7) => sps.push(buf.as_slice()),
            Some(8) => pps.push(buf.as_slice()),
            _ => {}
        }
    }
    (sps, pps)
}

/// avcC carries the SPS and PPS an H.264 decoder needs before the first
/// frame.
fn write_avcc<W: Write + Seek>(
    writer: &mut W,
    sps_list: &[&[u8]],
    pps_list: &[&[u8]],
) -> MuxResult<()> {
    let first_sps = sps_list.first().copied().ok_or_else(|| {
        MuxError::InvalidConfig("H.264 track requires an SPS in its codec data".into())
    })?;
    if pps_list.is_empty() {
        return Err(MuxError::InvalidConfig(
            "H.264 track requires a PPS in its codec data".into(),
        ));
    }

    atom(writer, b"avcC", |w| {
        w.write_u8(1)?; // configurationVersion
        // profile, compatibility and level mirror the SPS header bytes
        w.write_u8(first_sps.get(1).copied().unwrap_or(0x64))?;
        w.write_u8(first_sps.get(2).copied().unwrap_or(0x00))?;
        w.write_u8(first_sps.get(3).copied().unwrap_or(0x1F))?;
        w.write_u8(0xFF)?; // 4-byte NAL lengths, reserved bits set

        w.write_u8(0xE0 | (sps_list.len() as u8 & 0x1F))?;
        for sps in sps_list {
            w.write_u16::<BigEndian>(sps.len() as u16)?;
            w.write_all(sps)?;
        }
        w.write_u8(pps_list.len() as u8)?;
        for pps in pps_list {
            w.write_u16::<BigEndian>(pps.len() as u16)?;
            w.write_all(pps)?;
        }
        Ok(())
    })
}

/// Sample description for an AAC audio track (mp4a + esds).
fn write_stsd_audio<W: Write + Seek>(writer: &mut W, format: &TrackFormat) -> MuxResult<()> {
    let (sample_rate, channels) = match format.kind {
        TrackKind::Audio {
            sample_rate,
            channels,
        } => (sample_rate, channels),
        _ => {
            return Err(MuxError::InvalidConfig(
                "Audio stsd requires an audio track format".into(),
            ))
        }
    };

    if format.mime.as_str() != MimeType::AUDIO_AAC {
        return Err(MuxError::InvalidConfig(format!(
            "Unsupported audio MIME for MP4 stsd: {}",
            format.mime
        )));
    }
    let config = format.csd.first().ok_or_else(|| {
        MuxError::InvalidConfig("AAC track requires an AudioSpecificConfig in its codec data".into())
    })?;

    full_atom(writer, b"stsd", 0, 0, |w| {
        w.write_u32::<BigEndian>(1)?; // entry_count
        atom(w, b"mp4a", |w| {
            pad(w, 6)?; // reserved
            w.write_u16::<BigEndian>(1)?; // data_reference_index
            pad(w, 8)?; // reserved
            w.write_u16::<BigEndian>(channels)?;
            w.write_u16::<BigEndian>(16)?; // samplesize (16-bit)
            pad(w, 4)?; // pre_defined + reserved
            w.write_u32::<BigEndian>(sample_rate << 16)?; // 16.16 fixed point
            write_esds(w, config)
        })
    })
}

/// esds (Elementary Stream Descriptor) for AAC, with the
/// AudioSpecificConfig nested in a DecoderSpecificInfo descriptor.
fn write_esds<W: Write + Seek>(writer: &mut W, config: &[u8]) -> MuxResult<()> {
    full_atom(writer, b"esds", 0, 0, |w| {
        // descriptor sizes count nested descriptors, headers included
        let dsi_total = 1 + descr_len_size(config.len()) + config.len();
        let dec_body = 13 + dsi_total;
        let sl_total = 1 + descr_len_size(1) + 1;
        let es_body = 3 + 1 + descr_len_size(dec_body) + dec_body + sl_total;

        write_descr(w, 0x03, es_body)?; // ES_Descriptor
        w.write_u16::<BigEndian>(1)?; // ES_ID
        w.write_u8(0)?; // no optional fields, priority 0

        write_descr(w, 0x04, dec_body)?; // DecoderConfigDescriptor
        w.write_u8(0x40)?; // objectTypeIndication = ISO/IEC 14496-3 (AAC)
        w.write_u8(0x15)?; // streamType = audio
        pad(w, 3)?; // bufferSizeDB
        w.write_u32::<BigEndian>(128_000)?; // maxBitrate
        w.write_u32::<BigEndian>(128_000)?; // avgBitrate

        write_descr(w, 0x05, config.len())?; // DecoderSpecificInfo
        w.write_all(config)?;

        write_descr(w, 0x06, 1)?; // SLConfigDescriptor
        w.write_u8(0x02)?; // predefined = MP4
        Ok(())
    })
}

/// Number of bytes an expandable descriptor length occupies (7 bits per
/// byte).
fn descr_len_size(len: usize) -> usize {
    let mut bytes = 1;
    let mut rest = len >> 7;
    while rest > 0 {
        bytes += 1;
        rest >>= 7;
    }
    bytes
}

/// Write an MPEG-4 descriptor tag plus its expandable length.
fn write_descr<W: Write>(w: &mut W, tag: u8, len: usize) -> MuxResult<()> {
    w.write_u8(tag)?;
    let mut shift = 7 * (descr_len_size(len) - 1);
    loop {
        let septet = ((len >> shift) & 0x7F) as u8;
        if shift == 0 {
            w.write_u8(septet)?;
            return Ok(());
        }
        w.write_u8(septet | 0x80)?;
        shift -= 7;
    }
}

fn write_stts<W: Write + Seek>(writer: &mut W, samples: &[SampleInfo]) -> MuxResult<()> {
    let runs = duration_runs(samples);
    full_atom(writer, b"stts", 0, 0, |w| {
        w.write_u32::<BigEndian>(runs.len() as u32)?;
        for (count, duration) in &runs {
            w.write_u32::<BigEndian>(*count)?;
            w.write_u32::<BigEndian>(*duration)?;
        }
        Ok(())
    })
}

/// Collapse consecutive equal durations into (count, duration) runs.
fn duration_runs(samples: &[SampleInfo]) -> Vec<(u32, u32)> {
    let mut runs: Vec<(u32, u32)> = Vec::new();
    for s in samples {
        match runs.last_mut() {
            Some((count, duration)) if *duration == s.duration => *count += 1,
            _ => runs.push((1, s.duration)),
        }
    }
    runs
}

/// One sample per chunk keeps stsc a single entry.
fn write_stsc<W: Write + Seek>(writer: &mut W, samples: &[SampleInfo]) -> MuxResult<()> {
    full_atom(writer, b"stsc", 0, 0, |w| {
        if samples.is_empty() {
            w.write_u32::<BigEndian>(0)?; // entry_count
        } else {
            w.write_u32::<BigEndian>(1)?; // entry_count
            w.write_u32::<BigEndian>(1)?; // first_chunk
            w.write_u32::<BigEndian>(1)?; // samples_per_chunk
            w.write_u32::<BigEndian>(1)?; // sample_description_index
        }
        Ok(())
    })
}

/// stsz in the uniform form when every sample matches, the table form
/// otherwise.
fn write_stsz<W: Write + Seek>(writer: &mut W, samples: &[SampleInfo]) -> MuxResult<()> {
    full_atom(writer, b"stsz", 0, 0, |w| {
        match samples.split_first() {
            Some((first, rest)) if rest.iter().all(|s| s.size == first.size) => {
                w.write_u32::<BigEndian>(first.size)?;
                w.write_u32::<BigEndian>(samples.len() as u32)?;
            }
            _ => {
                w.write_u32::<BigEndian>(0)?; // per-sample sizes follow
                w.write_u32::<BigEndian>(samples.len() as u32)?;
                for sample in samples {
                    w.write_u32::<BigEndian>(sample.size)?;
                }
            }
        }
        Ok(())
    })
}

fn write_stco<W: Write + Seek>(writer: &mut W, samples: &[SampleInfo]) -> MuxResult<()> {
    full_atom(writer, b"stco", 0, 0, |w| {
        w.write_u32::<BigEndian>(samples.len() as u32)?;
        for sample in samples {
            w.write_u32::<BigEndian>(sample.offset as u32)?;
        }
        Ok(())
    })
}

/// 64-bit chunk offsets for files past 4GB.
fn write_co64<W: Write + Seek>(writer: &mut W, samples: &[SampleInfo]) -> MuxResult<()> {
    full_atom(writer, b"co64", 0, 0, |w| {
        w.write_u32::<BigEndian>(samples.len() as u32)?;
        for sample in samples {
            w.write_u64::<BigEndian>(sample.offset)?;
        }
        Ok(())
    })
}

/// stss lists 1-based keyframe sample numbers.
fn write_stss<W: Write + Seek>(writer: &mut W, samples: &[SampleInfo]) -> MuxResult<()> {
    let sync_numbers: Vec<u32> = samples
        .iter()
        .enumerate()
        .filter(|(_, s)| s.is_sync)
        .map(|(i, _)| (i + 1) as u32)
        .collect();

    full_atom(writer, b"stss", 0, 0, |w| {
        w.write_u32::<BigEndian>(sync_numbers.len() as u32)?;
        for number in &sync_numbers {
            w.write_u32::<BigEndian>(*number)?;
        }
        Ok(())
    })
}
