//! Box-level parsing for the ISO base media file format.
//!
//! MP4 files nest length-prefixed boxes. moov carries one trak per stream,
//! and each trak leads through mdia and minf to the stbl sample tables that
//! locate and time every sample. The parsers here handle one box each;
//! [`parse_moov`] drives the whole walk and yields assembled tracks.

use byteorder::{BigEndian, ReadBytesExt};
use ob_common::DemuxError;
use std::io::{self, Read, Seek, SeekFrom};
use tracing::{debug, trace};

// ─── FourCC codes ───────────────────────────────────────────────────

/// Packs a four-byte tag into the u32 form box headers use.
pub const fn fourcc(tag: &[u8; 4]) -> u32 {
    u32::from_be_bytes(*tag)
}

pub const FTYP: u32 = fourcc(b"ftyp");
pub const MOOV: u32 = fourcc(b"moov");
pub const MVHD: u32 = fourcc(b"mvhd");
pub const TRAK: u32 = fourcc(b"trak");
pub const TKHD: u32 = fourcc(b"tkhd");
pub const MDIA: u32 = fourcc(b"mdia");
pub const MDHD: u32 = fourcc(b"mdhd");
pub const HDLR: u32 = fourcc(b"hdlr");
pub const MINF: u32 = fourcc(b"minf");
pub const STBL: u32 = fourcc(b"stbl");
pub const STSD: u32 = fourcc(b"stsd");
pub const STTS: u32 = fourcc(b"stts");
pub const STSC: u32 = fourcc(b"stsc");
pub const STSZ: u32 = fourcc(b"stsz");
pub const STCO: u32 = fourcc(b"stco");
pub const CO64: u32 = fourcc(b"co64");
pub const STSS: u32 = fourcc(b"stss");
pub const CTTS: u32 = fourcc(b"ctts");
pub const MDAT: u32 = fourcc(b"mdat");
pub const AVCC: u32 = fourcc(b"avcC");
pub const AVC1: u32 = fourcc(b"avc1");
pub const AVC3: u32 = fourcc(b"avc3");
pub const RAW_: u32 = fourcc(b"raw ");
pub const VIDE: u32 = fourcc(b"vide");
pub const SOUN: u32 = fourcc(b"soun");
pub const MP4A: u32 = fourcc(b"mp4a");
pub const ESDS: u32 = fourcc(b"esds");
pub const WAVE: u32 = fourcc(b"wave");

/// Renders a FourCC for log and error messages, masking unprintable bytes.
pub fn fourcc_to_string(cc: u32) -> String {
    cc.to_be_bytes()
        .map(|b| {
            if b.is_ascii_graphic() || b == b' ' {
                b as char
            } else {
                '?'
            }
        })
        .iter()
        .collect()
}

// ─── Box headers ────────────────────────────────────────────────────

/// Location and extent of one box within the file.
#[derive(Clone, Copy, Debug)]
pub struct BoxHeader {
    /// FourCC type code.
    pub box_type: u32,
    /// Whole box size including the header, or 0 when it runs to EOF.
    pub size: u64,
    /// File offset of the first header byte.
    pub offset: u64,
    /// 8 for compact headers, 16 when the 64-bit size escape is used.
    pub header_size: u8,
}

impl BoxHeader {
    /// File offset where the payload begins.
    pub fn content_offset(&self) -> u64 {
        self.offset + u64::from(self.header_size)
    }

    /// Payload size, or None for a box that runs to EOF.
    pub fn content_size(&self) -> Option<u64> {
        (self.size != 0).then(|| self.size - u64::from(self.header_size))
    }

    /// File offset one past the box, or None for a box that runs to EOF.
    pub fn end_offset(&self) -> Option<u64> {
        (self.size != 0).then(|| self.offset + self.size)
    }
}

/// Reads the next box header. Returns None on a clean EOF between boxes.
pub fn read_box_header<R: Read + Seek>(reader: &mut R) -> Result<Option<BoxHeader>, DemuxError> {
    let offset = reader.stream_position()?;

    let size32 = match reader.read_u32::<BigEndian>() {
        Ok(word) => word,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let box_type = reader.read_u32::<BigEndian>()?;

    // size 1 means a 64-bit size follows the type; size 0 runs to EOF
    let (size, header_size): (u64, u8) = match size32 {
        0 => (0, 8),
        1 => (reader.read_u64::<BigEndian>()?, 16),
        compact => (u64::from(compact), 8),
    };

    if size != 0 && size < u64::from(header_size) {
        return Err(DemuxError::InvalidStructure {
            offset,
            reason: format!(
                "box '{}' declares {} bytes, less than its own header",
                fourcc_to_string(box_type),
                size
            ),
        });
    }

    if size == 0 {
        trace!("box '{}' at {} runs to EOF", fourcc_to_string(box_type), offset);
    } else {
        trace!(
            "box '{}' at {} spans {} bytes",
            fourcc_to_string(box_type),
            offset,
            size
        );
    }

    Ok(Some(BoxHeader {
        box_type,
        size,
        offset,
        header_size,
    }))
}

/// Positions the reader just past the given box.
pub fn skip_box<R: Read + Seek>(reader: &mut R, header: &BoxHeader) -> Result<(), DemuxError> {
    let target = match header.end_offset() {
        Some(end) => SeekFrom::Start(end),
        None => SeekFrom::End(0),
    };
    reader.seek(target)?;
    Ok(())
}

/// Boxes we walk into must declare where they end.
fn required_end(header: &BoxHeader, what: &str) -> Result<u64, DemuxError> {
    header.end_offset().ok_or_else(|| DemuxError::InvalidStructure {
        offset: header.offset,
        reason: format!("{} box must carry an explicit size", what),
    })
}

/// Consumes the version-and-flags word that opens every full box and
/// returns the version. No parser here inspects the flag bits.
fn read_version_and_flags<R: Read>(reader: &mut R) -> Result<u8, DemuxError> {
    let word = reader.read_u32::<BigEndian>()?;
    Ok((word >> 24) as u8)
}

/// Header time fields widen from 32 to 64 bits in version 1 boxes.
fn read_u32_or_u64<R: Read>(reader: &mut R, wide: bool) -> Result<u64, DemuxError> {
    if wide {
        Ok(reader.read_u64::<BigEndian>()?)
    } else {
        Ok(u64::from(reader.read_u32::<BigEndian>()?))
    }
}

/// Reads and throws away reserved or unused fields.
fn discard<R: Read>(reader: &mut R, mut count: usize) -> Result<(), DemuxError> {
    let mut scratch = [0u8; 64];
    while count > 0 {
        let chunk = count.min(scratch.len());
        reader.read_exact(&mut scratch[..chunk])?;
        count -= chunk;
    }
    Ok(())
}

// ─── File and movie headers ─────────────────────────────────────────

/// Brand information from the ftyp box.
#[derive(Clone, Debug)]
pub struct FtypBox {
    pub major_brand: u32,
    pub minor_version: u32,
    pub compatible_brands: Vec<u32>,
}

/// Parses ftyp. The reader must sit at the start of the payload.
pub fn parse_ftyp<R: Read>(reader: &mut R, header: &BoxHeader) -> Result<FtypBox, DemuxError> {
    let content_size = header
        .content_size()
        .ok_or_else(|| DemuxError::InvalidStructure {
            offset: header.offset,
            reason: "ftyp must declare its size".into(),
        })?;

    let major_brand = reader.read_u32::<BigEndian>()?;
    let minor_version = reader.read_u32::<BigEndian>()?;

    let brand_count = content_size.saturating_sub(8) / 4;
    let mut compatible_brands = Vec::with_capacity(brand_count.min(64) as usize);
    for _ in 0..brand_count {
        compatible_brands.push(reader.read_u32::<BigEndian>()?);
    }

    debug!(
        "ftyp: brand '{}' v{}, {} compatible",
        fourcc_to_string(major_brand),
        minor_version,
        compatible_brands.len()
    );

    Ok(FtypBox {
        major_brand,
        minor_version,
        compatible_brands,
    })
}

/// Movie-wide timescale and duration from mvhd.
#[derive(Clone, Debug)]
pub struct MvhdBox {
    pub timescale: u32,
    pub duration: u64,
}

pub fn parse_mvhd<R: Read>(reader: &mut R) -> Result<MvhdBox, DemuxError> {
    let (timescale, duration) = read_versioned_header_times(reader)?;
    debug!("mvhd: duration {} at timescale {}", duration, timescale);
    Ok(MvhdBox { timescale, duration })
}

/// Per-track timescale and duration from mdhd.
#[derive(Clone, Debug)]
pub struct MdhdBox {
    pub timescale: u32,
    pub duration: u64,
}

pub fn parse_mdhd<R: Read>(reader: &mut R) -> Result<MdhdBox, DemuxError> {
    let (timescale, duration) = read_versioned_header_times(reader)?;
    debug!("mdhd: duration {} at timescale {}", duration, timescale);
    Ok(MdhdBox { timescale, duration })
}

/// mvhd and mdhd open identically: version and flags, two timestamps,
/// timescale, duration. Only the timescale and duration are kept.
fn read_versioned_header_times<R: Read>(reader: &mut R) -> Result<(u32, u64), DemuxError> {
    let wide = read_version_and_flags(reader)? == 1;
    read_u32_or_u64(reader, wide)?; // creation time
    read_u32_or_u64(reader, wide)?; // modification time
    let timescale = reader.read_u32::<BigEndian>()?;
    let duration = read_u32_or_u64(reader, wide)?;
    Ok((timescale, duration))
}

/// Track role from the hdlr box.
#[derive(Clone, Debug)]
pub struct HdlrBox {
    /// 'vide' or 'soun' for the tracks we handle.
    pub handler_type: u32,
    pub name: String,
}

pub fn parse_hdlr<R: Read>(reader: &mut R, header: &BoxHeader) -> Result<HdlrBox, DemuxError> {
    let content_size = header
        .content_size()
        .ok_or_else(|| DemuxError::InvalidStructure {
            offset: header.offset,
            reason: "hdlr must declare its size".into(),
        })?;

    read_version_and_flags(reader)?;
    reader.read_u32::<BigEndian>()?; // pre_defined
    let handler_type = reader.read_u32::<BigEndian>()?;
    discard(reader, 12)?;

    // The rest of the payload is the handler name, nul terminated.
    let name_len = content_size.saturating_sub(24) as usize;
    let mut raw_name = vec![0u8; name_len];
    reader.read_exact(&mut raw_name)?;
    let terminated = raw_name.split(|&b| b == 0).next().unwrap_or(&raw_name);
    let name = String::from_utf8_lossy(terminated).into_owned();

    debug!(
        "hdlr: '{}' handler, name '{}'",
        fourcc_to_string(handler_type),
        name
    );

    Ok(HdlrBox { handler_type, name })
}

// ─── Track headers ──────────────────────────────────────────────────

/// Track id, display geometry and duration from tkhd.
#[derive(Clone, Debug)]
pub struct TkhdBox {
    pub track_id: u32,
    pub width: u32,
    pub height: u32,
    pub duration: u64,
    /// Quarter-turn rotation recovered from the transformation matrix.
    pub rotation_degrees: u32,
}

pub fn parse_tkhd<R: Read>(reader: &mut R) -> Result<TkhdBox, DemuxError> {
    let wide = read_version_and_flags(reader)? == 1;

    read_u32_or_u64(reader, wide)?; // creation time
    read_u32_or_u64(reader, wide)?; // modification time
    let track_id = reader.read_u32::<BigEndian>()?;
    reader.read_u32::<BigEndian>()?; // reserved
    let duration = read_u32_or_u64(reader, wide)?;

    // reserved words, layer, alternate group, volume
    discard(reader, 16)?;

    let mut matrix = [0u32; 9];
    for cell in matrix.iter_mut() {
        *cell = reader.read_u32::<BigEndian>()?;
    }
    let rotation_degrees = matrix_to_rotation(&matrix);

    // display dimensions are 16.16 fixed point
    let width = reader.read_u32::<BigEndian>()? >> 16;
    let height = reader.read_u32::<BigEndian>()? >> 16;

    debug!(
        "tkhd: track {} is {}x{} rot {}, duration {}",
        track_id, width, height, rotation_degrees, duration
    );

    Ok(TkhdBox {
        track_id,
        width,
        height,
        duration,
        rotation_degrees,
    })
}

/// Maps a tkhd transformation matrix onto a quarter-turn rotation.
///
/// Anything other than the four exact rotation matrices (scales, shears,
/// arbitrary angles) is treated as unrotated.
pub fn matrix_to_rotation(matrix: &[u32; 9]) -> u32 {
    // a, b, c, d sit at indices 0, 1, 3, 4 as 16.16 fixed point values
    let quad = [matrix[0], matrix[1], matrix[3], matrix[4]].map(|v| (v as i32) >> 16);

    match quad {
        [1, 0, 0, 1] => 0,
        [0, 1, -1, 0] => 90,
        [-1, 0, 0, -1] => 180,
        [0, -1, 1, 0] => 270,
        [a, b, c, d] => {
            debug!("non-quarter-turn tkhd matrix [{} {} {} {}], ignoring", a, b, c, d);
            0
        }
    }
}

// ─── Sample descriptions ────────────────────────────────────────────

/// Description of the coded video stream from the stsd box.
#[derive(Clone, Debug)]
pub struct VideoSampleDesc {
    pub codec_fourcc: u32,
    /// Coded width from the sample entry.
    pub width: u16,
    /// Coded height from the sample entry.
    pub height: u16,
    /// Parameter sets for H.264 entries; raw video carries none.
    pub avcc: Option<AvccConfig>,
}

/// Decoder configuration carried by the avcC box.
#[derive(Clone, Debug)]
pub struct AvccConfig {
    pub profile: u8,
    pub profile_compat: u8,
    pub level: u8,
    /// NAL length field size minus one; streams almost always use 3.
    pub length_size_minus_one: u8,
    pub sps_list: Vec<Vec<u8>>,
    pub pps_list: Vec<Vec<u8>>,
}

impl AvccConfig {
    /// Byte width of the length prefix in front of each NAL unit.
    pub fn length_size(&self) -> u8 {
        self.length_size_minus_one + 1
    }
}

/// Outcome of reading an stsd box.
pub enum StsdResult {
    Video(VideoSampleDesc),
    Audio(AudioSampleDesc),
    None,
}

/// Parses stsd and returns the first sample description we can decode.
pub fn parse_stsd<R: Read + Seek>(
    reader: &mut R,
    header: &BoxHeader,
) -> Result<StsdResult, DemuxError> {
    let box_end = required_end(header, "stsd")?;

    read_version_and_flags(reader)?;
    let entry_count = reader.read_u32::<BigEndian>()?;
    debug!("stsd: {} sample descriptions", entry_count);

    for _ in 0..entry_count {
        let entry = match read_box_header(reader)? {
            Some(h) => h,
            None => {
                return Err(DemuxError::InvalidStructure {
                    offset: header.offset,
                    reason: format!("stsd promises {} entries but ends early", entry_count),
                })
            }
        };

        match entry.box_type {
            AVC1 | AVC3 | RAW_ => {
                return Ok(StsdResult::Video(parse_visual_sample_entry(reader, &entry)?));
            }
            MP4A => {
                return Ok(StsdResult::Audio(parse_mp4a_sample_entry(reader, &entry)?));
            }
            other => {
                debug!(
                    "stsd: no decoder for '{}', skipping entry",
                    fourcc_to_string(other)
                );
                skip_box(reader, &entry)?;
            }
        }
    }

    reader.seek(SeekFrom::Start(box_end))?;
    Ok(StsdResult::None)
}

/// Parses a VisualSampleEntry (avc1, avc3 or raw ). The fixed prefix is
/// identical for every visual codec; H.264 entries then carry an avcC
/// sub box with the parameter sets.
fn parse_visual_sample_entry<R: Read + Seek>(
    reader: &mut R,
    header: &BoxHeader,
) -> Result<VideoSampleDesc, DemuxError> {
    let entry_end = required_end(header, "visual sample entry")?;

    // reserved bytes, data reference index, pre_defined block
    discard(reader, 24)?;
    let width = reader.read_u16::<BigEndian>()?;
    let height = reader.read_u16::<BigEndian>()?;
    // resolution, frame count, compressor name, depth
    discard(reader, 50)?;

    debug!(
        "visual entry '{}': {}x{}",
        fourcc_to_string(header.box_type),
        width,
        height
    );

    let mut avcc = None;
    while reader.stream_position()? < entry_end {
        let sub = match read_box_header(reader)? {
            Some(h) => h,
            None => break,
        };
        match sub.box_type {
            AVCC => avcc = Some(parse_avcc(reader, &sub)?),
            _ => skip_box(reader, &sub)?,
        }
    }
    reader.seek(SeekFrom::Start(entry_end))?;

    Ok(VideoSampleDesc {
        codec_fourcc: header.box_type,
        width,
        height,
        avcc,
    })
}

/// Parses the AVCDecoderConfigurationRecord inside an avcC box.
pub fn parse_avcc<R: Read>(reader: &mut R, header: &BoxHeader) -> Result<AvccConfig, DemuxError> {
    let config_version = reader.read_u8()?;
    if config_version != 1 {
        return Err(DemuxError::InvalidStructure {
            offset: header.offset,
            reason: format!("avcC configuration version {} is not supported", config_version),
        });
    }

    let profile = reader.read_u8()?;
    let profile_compat = reader.read_u8()?;
    let level = reader.read_u8()?;
    // low 2 bits
    let length_size_minus_one = reader.read_u8()? & 0x03;

    // low 5 bits of the SPS count byte; the PPS count uses the whole byte
    let sps_count = (reader.read_u8()? & 0x1F) as usize;
    let sps_list = read_nal_parameter_sets(reader, sps_count)?;
    let pps_count = reader.read_u8()? as usize;
    let pps_list = read_nal_parameter_sets(reader, pps_count)?;

    debug!(
        "avcC: profile {:#04x} level {}, {} SPS / {} PPS, {}-byte NAL lengths",
        profile,
        level,
        sps_list.len(),
        pps_list.len(),
        length_size_minus_one + 1
    );

    Ok(AvccConfig {
        profile,
        profile_compat,
        level,
        length_size_minus_one,
        sps_list,
        pps_list,
    })
}

/// Reads `count` length-prefixed parameter sets.
fn read_nal_parameter_sets<R: Read>(
    reader: &mut R,
    count: usize,
) -> Result<Vec<Vec<u8>>, DemuxError> {
    let mut sets = Vec::with_capacity(count);
    for _ in 0..count {
        let len = reader.read_u16::<BigEndian>()? as usize;
        let mut nal = vec![0u8; len];
        reader.read_exact(&mut nal)?;
        sets.push(nal);
    }
    Ok(sets)
}

/// Description of the coded audio stream from the stsd box.
#[derive(Clone, Debug)]
pub struct AudioSampleDesc {
    pub codec_fourcc: u32,
    pub channel_count: u16,
    /// Bits per sample, typically 16.
    pub sample_size: u16,
    /// Rate from the sample entry's 16.16 fixed point field.
    pub sample_rate: u32,
    /// AAC configuration from the esds box, when present.
    pub aac_config: Option<AacConfig>,
}

/// AudioSpecificConfig fields for an AAC stream.
#[derive(Clone, Debug)]
pub struct AacConfig {
    /// Object type: 2 is AAC-LC.
    pub audio_object_type: u8,
    pub sampling_frequency_index: u8,
    /// Rate looked up from the frequency index, 0 when the index is escape.
    pub sample_rate: u32,
    pub channel_config: u8,
    /// The config bytes exactly as stored, for re-muxing and decoders.
    pub raw_config: Vec<u8>,
}

/// Sampling rates addressed by the 4-bit frequency index (ISO 14496-3).
const AAC_SAMPLE_RATES: [u32; 13] = [
    96_000, 88_200, 64_000, 48_000, 44_100, 32_000, 24_000, 22_050, 16_000, 12_000, 11_025, 8_000,
    7_350,
];

/// Parses an mp4a AudioSampleEntry: fixed fields, then the sub boxes where
/// the esds descriptor lives.
fn parse_mp4a_sample_entry<R: Read + Seek>(
    reader: &mut R,
    header: &BoxHeader,
) -> Result<AudioSampleDesc, DemuxError> {
    let entry_end = required_end(header, "mp4a sample entry")?;

    // reserved bytes, data reference index, version, revision, vendor
    discard(reader, 16)?;
    let channel_count = reader.read_u16::<BigEndian>()?;
    let sample_size = reader.read_u16::<BigEndian>()?;
    // compression id, packet size
    discard(reader, 4)?;
    // 16.16 fixed point
    let sample_rate = reader.read_u32::<BigEndian>()? >> 16;

    debug!(
        "mp4a entry: {} ch, {} bit, {} Hz",
        channel_count, sample_size, sample_rate
    );

    let mut aac_config = None;
    scan_for_esds(reader, entry_end, &mut aac_config)?;
    reader.seek(SeekFrom::Start(entry_end))?;

    Ok(AudioSampleDesc {
        codec_fourcc: header.box_type,
        channel_count,
        sample_size,
        sample_rate,
        aac_config,
    })
}

/// Walks sub boxes up to `end` looking for esds, descending into the wave
/// wrapper some MOV muxers put around it.
fn scan_for_esds<R: Read + Seek>(
    reader: &mut R,
    end: u64,
    found: &mut Option<AacConfig>,
) -> Result<(), DemuxError> {
    while reader.stream_position()? < end {
        let sub = match read_box_header(reader)? {
            Some(h) => h,
            None => break,
        };
        match sub.box_type {
            ESDS => *found = Some(parse_esds(reader, &sub)?),
            WAVE => scan_for_esds(reader, sub.end_offset().unwrap_or(end), found)?,
            _ => skip_box(reader, &sub)?,
        }
    }
    Ok(())
}

/// Reads the esds payload and extracts the AAC configuration from its
/// descriptor chain.
fn parse_esds<R: Read + Seek>(reader: &mut R, header: &BoxHeader) -> Result<AacConfig, DemuxError> {
    let box_end = required_end(header, "esds")?;
    read_version_and_flags(reader)?;

    let remaining = box_end.saturating_sub(reader.stream_position()?) as usize;
    let mut descriptors = vec![0u8; remaining];
    reader.read_exact(&mut descriptors)?;

    parse_es_descriptor(&descriptors)
}

// ─── esds descriptors ───────────────────────────────────────────────

/// Cursor over the raw descriptor bytes of an esds payload.
struct DescriptorReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> DescriptorReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn truncated(&self, what: &str) -> DemuxError {
        DemuxError::InvalidStructure {
            offset: self.pos as u64,
            reason: format!("esds: {} cut short", what),
        }
    }

    /// Consumes the expected descriptor tag and its length field, returning
    /// the descriptor body length.
    fn expect_tag(&mut self, tag: u8, what: &str) -> Result<usize, DemuxError> {
        match self.data.get(self.pos) {
            Some(&b) if b == tag => {}
            _ => {
                return Err(DemuxError::InvalidStructure {
                    offset: self.pos as u64,
                    reason: format!("esds: {} tag {:#04x} not found", what, tag),
                })
            }
        }
        self.pos += 1;
        Ok(self.read_length())
    }

    /// Expandable length field: 7 bits per byte, high bit continues, at
    /// most 4 bytes.
    fn read_length(&mut self) -> usize {
        let mut len = 0usize;
        for _ in 0..4 {
            let b = match self.data.get(self.pos) {
                Some(&b) => b,
                None => break,
            };
            self.pos += 1;
            len = (len << 7) | usize::from(b & 0x7F);
            if b & 0x80 == 0 {
                break;
            }
        }
        len
    }

    fn skip(&mut self, count: usize, what: &str) -> Result<(), DemuxError> {
        if self.pos + count > self.data.len() {
            return Err(self.truncated(what));
        }
        self.pos += count;
        Ok(())
    }

    fn take(&mut self, count: usize, what: &str) -> Result<&'a [u8], DemuxError> {
        let bytes = self
            .data
            .get(self.pos..self.pos + count)
            .ok_or_else(|| self.truncated(what))?;
        self.pos += count;
        Ok(bytes)
    }
}

/// Follows the descriptor chain ES (tag 3) to DecoderConfig (tag 4) to
/// DecoderSpecificInfo (tag 5), which holds the AudioSpecificConfig.
fn parse_es_descriptor(data: &[u8]) -> Result<AacConfig, DemuxError> {
    let mut d = DescriptorReader::new(data);

    d.expect_tag(0x03, "ES descriptor")?;
    // ES_ID and stream priority
    d.skip(3, "ES descriptor body")?;

    d.expect_tag(0x04, "decoder config descriptor")?;
    // object type, stream type, buffer size, max and average bitrate
    d.skip(13, "decoder config descriptor body")?;

    let dsi_len = d.expect_tag(0x05, "decoder specific info")?;
    let raw_config = d.take(dsi_len, "decoder specific info")?;

    decode_audio_specific_config(raw_config)
}

/// Unpacks the leading AudioSpecificConfig fields: object type, frequency
/// index and channel configuration (5 + 4 + 4 bits).
fn decode_audio_specific_config(raw_config: &[u8]) -> Result<AacConfig, DemuxError> {
    let (byte0, byte1) = match (raw_config.first(), raw_config.get(1)) {
        (Some(&a), Some(&b)) => (a, b),
        _ => {
            return Err(DemuxError::InvalidStructure {
                offset: 0,
                reason: "esds: AudioSpecificConfig shorter than two bytes".into(),
            })
        }
    };

    let audio_object_type = byte0 >> 3;
    let sampling_frequency_index = ((byte0 & 0x07) << 1) | (byte1 >> 7);
    let channel_config = (byte1 >> 3) & 0x0F;

    // Index 0x0F escapes to an explicit rate later in the config; callers
    // then fall back to the rate in the sample entry.
    let sample_rate = AAC_SAMPLE_RATES
        .get(sampling_frequency_index as usize)
        .copied()
        .unwrap_or(0);

    debug!(
        "AudioSpecificConfig: object type {}, frequency index {} ({} Hz), {} channels",
        audio_object_type, sampling_frequency_index, sample_rate, channel_config
    );

    Ok(AacConfig {
        audio_object_type,
        sampling_frequency_index,
        sample_rate,
        channel_config,
        raw_config: raw_config.to_vec(),
    })
}

// ─── Sample tables ──────────────────────────────────────────────────

/// One stts run: `sample_count` samples, each `sample_delta` ticks long.
#[derive(Clone, Copy, Debug)]
pub struct SttsEntry {
    pub sample_count: u32,
    pub sample_delta: u32,
}

pub fn parse_stts<R: Read>(reader: &mut R) -> Result<Vec<SttsEntry>, DemuxError> {
    let runs = read_entry_table(reader, |r, _| {
        let sample_count = r.read_u32::<BigEndian>()?;
        let sample_delta = r.read_u32::<BigEndian>()?;
        Ok(SttsEntry {
            sample_count,
            sample_delta,
        })
    })?;
    debug!("stts: {} timing runs", runs.len());
    Ok(runs)
}

/// One ctts run of composition-time offsets.
#[derive(Clone, Copy, Debug)]
pub struct CttsEntry {
    pub sample_count: u32,
    /// Offset added to the decode time; negative only in version 1.
    pub sample_offset: i32,
}

pub fn parse_ctts<R: Read>(reader: &mut R) -> Result<Vec<CttsEntry>, DemuxError> {
    let runs = read_entry_table(reader, |r, version| {
        let sample_count = r.read_u32::<BigEndian>()?;
        // unsigned in version 0, signed in version 1
        let sample_offset = match version {
            0 => r.read_u32::<BigEndian>()? as i32,
            _ => r.read_i32::<BigEndian>()?,
        };
        Ok(CttsEntry {
            sample_count,
            sample_offset,
        })
    })?;
    debug!("ctts: {} composition runs", runs.len());
    Ok(runs)
}

/// One stsc run mapping chunks to their per-chunk sample count.
#[derive(Clone, Copy, Debug)]
pub struct StscEntry {
    /// 1-based number of the first chunk this run covers.
    pub first_chunk: u32,
    pub samples_per_chunk: u32,
    pub sample_description_index: u32,
}

pub fn parse_stsc<R: Read>(reader: &mut R) -> Result<Vec<StscEntry>, DemuxError> {
    let entries = read_entry_table(reader, |r, _| {
        let first_chunk = r.read_u32::<BigEndian>()?;
        let samples_per_chunk = r.read_u32::<BigEndian>()?;
        let sample_description_index = r.read_u32::<BigEndian>()?;
        Ok(StscEntry {
            first_chunk,
            samples_per_chunk,
            sample_description_index,
        })
    })?;
    debug!("stsc: {} chunk mappings", entries.len());
    Ok(entries)
}

/// Sample sizes from stsz: either one uniform size or a per-sample list.
#[derive(Clone, Debug)]
pub struct StszBox {
    /// Non-zero when every sample shares this size.
    pub default_sample_size: u32,
    /// Per-sample sizes; empty when a uniform size is set.
    pub sample_sizes: Vec<u32>,
    pub sample_count: u32,
}

pub fn parse_stsz<R: Read>(reader: &mut R) -> Result<StszBox, DemuxError> {
    read_version_and_flags(reader)?;
    let default_sample_size = reader.read_u32::<BigEndian>()?;
    let sample_count = reader.read_u32::<BigEndian>()?;

    let mut sample_sizes = Vec::new();
    if default_sample_size == 0 {
        sample_sizes.reserve((sample_count as usize).min(1 << 16));
        for _ in 0..sample_count {
            sample_sizes.push(reader.read_u32::<BigEndian>()?);
        }
    }

    debug!(
        "stsz: {} samples, uniform size {}",
        sample_count, default_sample_size
    );

    Ok(StszBox {
        default_sample_size,
        sample_sizes,
        sample_count,
    })
}

/// Parses stco, widening the 32-bit chunk offsets to u64.
pub fn parse_stco<R: Read>(reader: &mut R) -> Result<Vec<u64>, DemuxError> {
    let offsets = read_entry_table(reader, |r, _| Ok(u64::from(r.read_u32::<BigEndian>()?)))?;
    debug!("stco: {} chunks", offsets.len());
    Ok(offsets)
}

/// Parses co64, the 64-bit chunk offset variant.
pub fn parse_co64<R: Read>(reader: &mut R) -> Result<Vec<u64>, DemuxError> {
    let offsets = read_entry_table(reader, |r, _| Ok(r.read_u64::<BigEndian>()?))?;
    debug!("co64: {} chunks", offsets.len());
    Ok(offsets)
}

/// Parses stss into 1-based keyframe sample numbers.
pub fn parse_stss<R: Read>(reader: &mut R) -> Result<Vec<u32>, DemuxError> {
    let sync_samples = read_entry_table(reader, |r, _| Ok(r.read_u32::<BigEndian>()?))?;
    debug!("stss: {} keyframes", sync_samples.len());
    Ok(sync_samples)
}

/// Reads a count-prefixed full-box table, applying `read_row` per entry.
/// The row reader receives the box version for layouts that depend on it.
fn read_entry_table<R: Read, T>(
    reader: &mut R,
    read_row: impl Fn(&mut R, u8) -> Result<T, DemuxError>,
) -> Result<Vec<T>, DemuxError> {
    let version = read_version_and_flags(reader)?;
    let count = reader.read_u32::<BigEndian>()? as usize;
    // capacity clamped so a corrupt count cannot force a giant allocation
    let mut rows = Vec::with_capacity(count.min(1 << 16));
    for _ in 0..count {
        rows.push(read_row(reader, version)?);
    }
    Ok(rows)
}

// ─── Track assembly ─────────────────────────────────────────────────

/// Everything demuxing needs from one video trak.
#[derive(Clone, Debug)]
pub struct ParsedVideoTrack {
    pub track_id: u32,
    pub timescale: u32,
    pub duration: u64,
    pub width: u32,
    pub height: u32,
    /// Quarter-turn display rotation from the tkhd matrix.
    pub rotation_degrees: u32,
    pub sample_desc: VideoSampleDesc,
    pub stts: Vec<SttsEntry>,
    pub ctts: Vec<CttsEntry>,
    pub stsc: Vec<StscEntry>,
    pub stsz: StszBox,
    pub chunk_offsets: Vec<u64>,
    /// 1-based keyframe numbers; an empty list marks every sample sync.
    pub sync_samples: Vec<u32>,
}

/// Everything demuxing needs from one audio trak.
#[derive(Clone, Debug)]
pub struct ParsedAudioTrack {
    pub track_id: u32,
    pub timescale: u32,
    pub duration: u64,
    pub sample_desc: AudioSampleDesc,
    pub stts: Vec<SttsEntry>,
    pub ctts: Vec<CttsEntry>,
    pub stsc: Vec<StscEntry>,
    pub stsz: StszBox,
    pub chunk_offsets: Vec<u64>,
    /// 1-based sync numbers; audio tracks usually leave this empty.
    pub sync_samples: Vec<u32>,
}

/// The fully parsed moov tree.
#[derive(Clone, Debug)]
pub struct ParsedMoov {
    pub timescale: u32,
    pub duration: u64,
    pub video_tracks: Vec<ParsedVideoTrack>,
    pub audio_tracks: Vec<ParsedAudioTrack>,
}

/// Walks the moov hierarchy and assembles every video and audio track.
pub fn parse_moov<R: Read + Seek>(
    reader: &mut R,
    moov_header: &BoxHeader,
) -> Result<ParsedMoov, DemuxError> {
    let moov_end = required_end(moov_header, "moov")?;

    let mut movie_header: Option<MvhdBox> = None;
    let mut video_tracks = Vec::new();
    let mut audio_tracks = Vec::new();

    while reader.stream_position()? < moov_end {
        let child = match read_box_header(reader)? {
            Some(h) => h,
            None => break,
        };

        match child.box_type {
            MVHD => {
                movie_header = Some(parse_mvhd(reader)?);
                // mvhd parsing stops at the duration field
                if let Some(end) = child.end_offset() {
                    reader.seek(SeekFrom::Start(end))?;
                }
            }
            TRAK => match parse_trak(reader, &child)? {
                Some(ParsedTrak::Video(track)) => video_tracks.push(track),
                Some(ParsedTrak::Audio(track)) => audio_tracks.push(track),
                None => {}
            },
            _ => skip_box(reader, &child)?,
        }
    }

    let mvhd = movie_header.ok_or_else(|| DemuxError::InvalidStructure {
        offset: moov_header.offset,
        reason: "moov carries no mvhd header".into(),
    })?;

    debug!(
        "moov parsed: timescale {}, duration {}, {} video / {} audio tracks",
        mvhd.timescale,
        mvhd.duration,
        video_tracks.len(),
        audio_tracks.len()
    );

    Ok(ParsedMoov {
        timescale: mvhd.timescale,
        duration: mvhd.duration,
        video_tracks,
        audio_tracks,
    })
}

enum ParsedTrak {
    Video(ParsedVideoTrack),
    Audio(ParsedAudioTrack),
}

/// Parses one trak subtree. Tracks that are neither video nor audio
/// (subtitles, metadata) come back as None.
fn parse_trak<R: Read + Seek>(
    reader: &mut R,
    trak_header: &BoxHeader,
) -> Result<Option<ParsedTrak>, DemuxError> {
    let trak_end = required_end(trak_header, "trak")?;

    let mut found = TrakCollector::default();
    collect_trak_children(reader, trak_end, &mut found)?;
    reader.seek(SeekFrom::Start(trak_end))?;

    match found.handler_type {
        Some(VIDE) => Ok(Some(ParsedTrak::Video(found.into_video(trak_header.offset)?))),
        Some(SOUN) => Ok(Some(ParsedTrak::Audio(found.into_audio(trak_header.offset)?))),
        _ => Ok(None),
    }
}

/// Child boxes gathered while walking one trak subtree.
#[derive(Default)]
struct TrakCollector {
    tkhd: Option<TkhdBox>,
    mdhd: Option<MdhdBox>,
    handler_type: Option<u32>,
    video_desc: Option<VideoSampleDesc>,
    audio_desc: Option<AudioSampleDesc>,
    stts: Option<Vec<SttsEntry>>,
    ctts: Vec<CttsEntry>,
    stsc: Option<Vec<StscEntry>>,
    stsz: Option<StszBox>,
    chunk_offsets: Option<Vec<u64>>,
    sync_samples: Vec<u32>,
}

impl TrakCollector {
    fn into_video(self, at: u64) -> Result<ParsedVideoTrack, DemuxError> {
        let tkhd = need(self.tkhd, at, "tkhd")?;
        let mdhd = need(self.mdhd, at, "mdhd")?;
        let desc = need(self.video_desc, at, "video sample description")?;

        // stsd carries coded dimensions; tkhd display values win when set
        let width = if tkhd.width > 0 {
            tkhd.width
        } else {
            u32::from(desc.width)
        };
        let height = if tkhd.height > 0 {
            tkhd.height
        } else {
            u32::from(desc.height)
        };

        Ok(ParsedVideoTrack {
            track_id: tkhd.track_id,
            timescale: mdhd.timescale,
            duration: mdhd.duration,
            width,
            height,
            rotation_degrees: tkhd.rotation_degrees,
            sample_desc: desc,
            stts: need(self.stts, at, "stts")?,
            ctts: self.ctts,
            stsc: need(self.stsc, at, "stsc")?,
            stsz: need(self.stsz, at, "stsz")?,
            chunk_offsets: need(self.chunk_offsets, at, "stco or co64")?,
            sync_samples: self.sync_samples,
        })
    }

    fn into_audio(self, at: u64) -> Result<ParsedAudioTrack, DemuxError> {
        let tkhd = need(self.tkhd, at, "tkhd")?;
        let mdhd = need(self.mdhd, at, "mdhd")?;
        let desc = need(self.audio_desc, at, "audio sample description")?;

        Ok(ParsedAudioTrack {
            track_id: tkhd.track_id,
            timescale: mdhd.timescale,
            duration: mdhd.duration,
            sample_desc: desc,
            stts: need(self.stts, at, "stts")?,
            ctts: self.ctts,
            stsc: need(self.stsc, at, "stsc")?,
            stsz: need(self.stsz, at, "stsz")?,
            chunk_offsets: need(self.chunk_offsets, at, "stco or co64")?,
            sync_samples: self.sync_samples,
        })
    }
}

/// Reports a mandatory child box a trak failed to provide.
fn need<T>(value: Option<T>, trak_offset: u64, what: &str) -> Result<T, DemuxError> {
    value.ok_or_else(|| DemuxError::InvalidStructure {
        offset: trak_offset,
        reason: format!("trak is missing its {} box", what),
    })
}

/// Recursively walks trak, mdia, minf and stbl containers, parsing the
/// leaves into the collector.
fn collect_trak_children<R: Read + Seek>(
    reader: &mut R,
    container_end: u64,
    out: &mut TrakCollector,
) -> Result<(), DemuxError> {
    while reader.stream_position()? < container_end {
        let child = match read_box_header(reader)? {
            Some(h) => h,
            None => break,
        };

        // Leaf parsers may leave trailing bytes unread, so the walk always
        // resynchronizes to each child's end.
        let child_end = child.end_offset().unwrap_or(container_end);

        match child.box_type {
            MDIA | MINF | STBL => collect_trak_children(reader, child_end, out)?,
            TKHD => out.tkhd = Some(parse_tkhd(reader)?),
            MDHD => out.mdhd = Some(parse_mdhd(reader)?),
            HDLR => out.handler_type = Some(parse_hdlr(reader, &child)?.handler_type),
            STSD => match parse_stsd(reader, &child)? {
                StsdResult::Video(desc) => out.video_desc = Some(desc),
                StsdResult::Audio(desc) => out.audio_desc = Some(desc),
                StsdResult::None => {}
            },
            STTS => out.stts = Some(parse_stts(reader)?),
            CTTS => out.ctts = parse_ctts(reader)?,
            STSC => out.stsc = Some(parse_stsc(reader)?),
            STSZ => out.stsz = Some(parse_stsz(reader)?),
            STCO => out.chunk_offsets = Some(parse_stco(reader)?),
            CO64 => out.chunk_offsets = Some(parse_co64(reader)?),
            STSS => out.sync_samples = parse_stss(reader)?,
            _ => {}
        }

        reader.seek(SeekFrom::Start(child_end))?;
    }
    Ok(())
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn push_u32s(buf: &mut Vec<u8>, values: &[u32]) {
        for v in values {
            buf.extend_from_slice(&v.to_be_bytes());
        }
    }

    /// Wraps a payload in a compact box header.
    fn boxed(tag: u32, body: &[u8]) -> Vec<u8> {
        let mut out = ((body.len() + 8) as u32).to_be_bytes().to_vec();
        out.extend_from_slice(&tag.to_be_bytes());
        out.extend_from_slice(body);
        out
    }

    /// Wraps a payload in a header using the 64-bit size escape.
    fn boxed_wide(tag: u32, body: &[u8]) -> Vec<u8> {
        let mut out = 1u32.to_be_bytes().to_vec();
        out.extend_from_slice(&tag.to_be_bytes());
        out.extend_from_slice(&((body.len() + 16) as u64).to_be_bytes());
        out.extend_from_slice(body);
        out
    }

    /// Opens a cursor over box bytes and consumes the header.
    fn header_of(data: &[u8]) -> (Cursor<&[u8]>, BoxHeader) {
        let mut cursor = Cursor::new(data);
        let header = read_box_header(&mut cursor).unwrap().unwrap();
        (cursor, header)
    }

    #[test]
    fn test_compact_header() {
        let data = boxed(FTYP, &[0u8; 16]);
        let (_, header) = header_of(&data);

        assert_eq!(header.box_type, FTYP);
        assert_eq!(header.size, 24);
        assert_eq!(header.offset, 0);
        assert_eq!(header.header_size, 8);
        assert_eq!(header.content_offset(), 8);
        assert_eq!(header.content_size(), Some(16));
        assert_eq!(header.end_offset(), Some(24));
    }

    #[test]
    fn test_wide_header() {
        let data = boxed_wide(MOOV, &[0u8; 40]);
        let (_, header) = header_of(&data);

        assert_eq!(header.box_type, MOOV);
        assert_eq!(header.size, 56);
        assert_eq!(header.header_size, 16);
        assert_eq!(header.content_offset(), 16);
        assert_eq!(header.content_size(), Some(40));
    }

    #[test]
    fn test_header_at_eof_is_none() {
        let mut cursor = Cursor::new(&[][..]);
        assert!(read_box_header(&mut cursor).unwrap().is_none());
    }

    #[test]
    fn test_header_smaller_than_itself_rejected() {
        let mut data = 6u32.to_be_bytes().to_vec();
        data.extend_from_slice(&FTYP.to_be_bytes());
        let mut cursor = Cursor::new(&data[..]);
        assert!(read_box_header(&mut cursor).is_err());
    }

    #[test]
    fn test_fourcc_display() {
        assert_eq!(fourcc_to_string(MDAT), "mdat");
        assert_eq!(fourcc_to_string(RAW_), "raw ");
        assert_eq!(fourcc_to_string(0x0001_0203), "????");
    }

    #[test]
    fn test_skip_box_lands_on_next_header() {
        let mut data = boxed(FTYP, &[0u8; 20]);
        let second_at = data.len() as u64;
        data.extend_from_slice(&boxed(MDAT, &[0u8; 9]));

        let mut cursor = Cursor::new(&data[..]);
        let first = read_box_header(&mut cursor).unwrap().unwrap();
        skip_box(&mut cursor, &first).unwrap();

        let second = read_box_header(&mut cursor).unwrap().unwrap();
        assert_eq!(second.box_type, MDAT);
        assert_eq!(second.offset, second_at);
    }

    #[test]
    fn test_ftyp_brands() {
        let mut body = Vec::new();
        push_u32s(
            &mut body,
            &[fourcc(b"mp42"), 1, fourcc(b"mp42"), fourcc(b"iso6")],
        );

        let data = boxed(FTYP, &body);
        let (mut cursor, header) = header_of(&data);
        let ftyp = parse_ftyp(&mut cursor, &header).unwrap();

        assert_eq!(ftyp.major_brand, fourcc(b"mp42"));
        assert_eq!(ftyp.minor_version, 1);
        assert_eq!(ftyp.compatible_brands, vec![fourcc(b"mp42"), fourcc(b"iso6")]);
    }

    #[test]
    fn test_mvhd_version0() {
        let mut body = vec![0, 0, 0, 0];
        push_u32s(&mut body, &[0, 0, 600, 7200]);

        let mut cursor = Cursor::new(&body[..]);
        let mvhd = parse_mvhd(&mut cursor).unwrap();

        assert_eq!(mvhd.timescale, 600);
        assert_eq!(mvhd.duration, 7200);
    }

    #[test]
    fn test_mvhd_version1_wide_fields() {
        let mut body = vec![1, 0, 0, 0];
        body.extend_from_slice(&0u64.to_be_bytes());
        body.extend_from_slice(&0u64.to_be_bytes());
        push_u32s(&mut body, &[48_000]);
        body.extend_from_slice(&5_760_000u64.to_be_bytes());

        let mut cursor = Cursor::new(&body[..]);
        let mvhd = parse_mvhd(&mut cursor).unwrap();

        assert_eq!(mvhd.timescale, 48_000);
        assert_eq!(mvhd.duration, 5_760_000);
    }

    fn rotation_matrix(a: i32, b: i32, c: i32, d: i32) -> [u32; 9] {
        let fp = |v: i32| (v << 16) as u32;
        [fp(a), fp(b), 0, fp(c), fp(d), 0, 0, 0, 0x4000_0000]
    }

    fn tkhd_body(track_id: u32, width: u32, height: u32, matrix: [u32; 9]) -> Vec<u8> {
        let mut body = vec![0, 0, 0, 7]; // version 0, track enabled and in movie
        push_u32s(&mut body, &[0, 0, track_id, 0, 6000]);
        body.extend_from_slice(&[0u8; 16]);
        push_u32s(&mut body, &matrix);
        push_u32s(&mut body, &[width << 16, height << 16]);
        body
    }

    #[test]
    fn test_tkhd_identity() {
        let body = tkhd_body(3, 1920, 1080, rotation_matrix(1, 0, 0, 1));
        let mut cursor = Cursor::new(&body[..]);
        let tkhd = parse_tkhd(&mut cursor).unwrap();

        assert_eq!(tkhd.track_id, 3);
        assert_eq!(tkhd.duration, 6000);
        assert_eq!(tkhd.width, 1920);
        assert_eq!(tkhd.height, 1080);
        assert_eq!(tkhd.rotation_degrees, 0);
    }

    #[test]
    fn test_tkhd_quarter_turns() {
        let turns = [
            (90, rotation_matrix(0, 1, -1, 0)),
            (180, rotation_matrix(-1, 0, 0, -1)),
            (270, rotation_matrix(0, -1, 1, 0)),
        ];
        for (degrees, matrix) in turns {
            let body = tkhd_body(1, 720, 1280, matrix);
            let mut cursor = Cursor::new(&body[..]);
            let tkhd = parse_tkhd(&mut cursor).unwrap();
            assert_eq!(tkhd.rotation_degrees, degrees);
        }
    }

    #[test]
    fn test_sheared_matrix_is_unrotated() {
        assert_eq!(matrix_to_rotation(&rotation_matrix(1, 1, 0, 1)), 0);
        assert_eq!(matrix_to_rotation(&rotation_matrix(2, 0, 0, 2)), 0);
    }

    #[test]
    fn test_avcc_parameter_sets() {
        let sps = vec![0x67, 0x64, 0x00, 0x28, 0xAC];
        let pps = vec![0x68, 0xEE, 0x3C, 0x80];

        let mut body = vec![1, 0x64, 0x00, 0x28, 0xFF, 0xE1];
        body.extend_from_slice(&(sps.len() as u16).to_be_bytes());
        body.extend_from_slice(&sps);
        body.push(1);
        body.extend_from_slice(&(pps.len() as u16).to_be_bytes());
        body.extend_from_slice(&pps);

        let data = boxed(AVCC, &body);
        let (mut cursor, header) = header_of(&data);
        let avcc = parse_avcc(&mut cursor, &header).unwrap();

        assert_eq!(avcc.profile, 0x64);
        assert_eq!(avcc.profile_compat, 0x00);
        assert_eq!(avcc.level, 0x28);
        assert_eq!(avcc.length_size(), 4);
        assert_eq!(avcc.sps_list, vec![sps]);
        assert_eq!(avcc.pps_list, vec![pps]);
    }

    #[test]
    fn test_avcc_bad_version_rejected() {
        let body = [2u8, 0x42, 0xC0, 0x1E, 0xFF, 0xE0];
        let data = boxed(AVCC, &body);
        let (mut cursor, header) = header_of(&data);
        assert!(parse_avcc(&mut cursor, &header).is_err());
    }

    #[test]
    fn test_stts_runs() {
        let mut body = vec![0, 0, 0, 0];
        push_u32s(&mut body, &[2, 3, 1200, 2, 800]);

        let mut cursor = Cursor::new(&body[..]);
        let runs = parse_stts(&mut cursor).unwrap();

        assert_eq!(runs.len(), 2);
        assert_eq!((runs[0].sample_count, runs[0].sample_delta), (3, 1200));
        assert_eq!((runs[1].sample_count, runs[1].sample_delta), (2, 800));
    }

    #[test]
    fn test_ctts_version1_signed_offsets() {
        let mut body = vec![1, 0, 0, 0];
        push_u32s(&mut body, &[2, 4, 2000, 2]);
        body.extend_from_slice(&(-1000i32).to_be_bytes());

        let mut cursor = Cursor::new(&body[..]);
        let runs = parse_ctts(&mut cursor).unwrap();

        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].sample_offset, 2000);
        assert_eq!(runs[1].sample_offset, -1000);
    }

    #[test]
    fn test_ctts_version0_offsets_are_unsigned() {
        let mut body = vec![0, 0, 0, 0];
        push_u32s(&mut body, &[1, 5, 3000]);

        let mut cursor = Cursor::new(&body[..]);
        let runs = parse_ctts(&mut cursor).unwrap();

        assert_eq!(runs[0].sample_count, 5);
        assert_eq!(runs[0].sample_offset, 3000);
    }

    #[test]
    fn test_stsc_mapping() {
        let mut body = vec![0, 0, 0, 0];
        push_u32s(&mut body, &[1, 1, 6, 1]);

        let mut cursor = Cursor::new(&body[..]);
        let entries = parse_stsc(&mut cursor).unwrap();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].first_chunk, 1);
        assert_eq!(entries[0].samples_per_chunk, 6);
        assert_eq!(entries[0].sample_description_index, 1);
    }

    #[test]
    fn test_stsz_per_sample_sizes() {
        let mut body = vec![0, 0, 0, 0];
        push_u32s(&mut body, &[0, 3, 640, 512, 768]);

        let mut cursor = Cursor::new(&body[..]);
        let stsz = parse_stsz(&mut cursor).unwrap();

        assert_eq!(stsz.default_sample_size, 0);
        assert_eq!(stsz.sample_count, 3);
        assert_eq!(stsz.sample_sizes, vec![640, 512, 768]);
    }

    #[test]
    fn test_stsz_uniform_size_has_no_list() {
        let mut body = vec![0, 0, 0, 0];
        push_u32s(&mut body, &[1024, 250]);

        let mut cursor = Cursor::new(&body[..]);
        let stsz = parse_stsz(&mut cursor).unwrap();

        assert_eq!(stsz.default_sample_size, 1024);
        assert_eq!(stsz.sample_count, 250);
        assert!(stsz.sample_sizes.is_empty());
    }

    #[test]
    fn test_chunk_offsets_narrow_and_wide() {
        let mut body = vec![0, 0, 0, 0];
        push_u32s(&mut body, &[3, 4096, 9000, 12_345]);
        let mut cursor = Cursor::new(&body[..]);
        assert_eq!(parse_stco(&mut cursor).unwrap(), vec![4096, 9000, 12_345]);

        let mut wide = vec![0, 0, 0, 0];
        push_u32s(&mut wide, &[2]);
        wide.extend_from_slice(&0x1_2345_6789u64.to_be_bytes());
        wide.extend_from_slice(&0x2_0000_0000u64.to_be_bytes());
        let mut cursor = Cursor::new(&wide[..]);
        assert_eq!(
            parse_co64(&mut cursor).unwrap(),
            vec![0x1_2345_6789, 0x2_0000_0000]
        );
    }

    #[test]
    fn test_stss_keyframe_numbers() {
        let mut body = vec![0, 0, 0, 0];
        push_u32s(&mut body, &[3, 1, 9, 31]);

        let mut cursor = Cursor::new(&body[..]);
        assert_eq!(parse_stss(&mut cursor).unwrap(), vec![1, 9, 31]);
    }

    /// Packs a two-byte AudioSpecificConfig and wraps it in the descriptor
    /// chain an esds payload carries.
    fn esds_body(object_type: u8, freq_idx: u8, channels: u8) -> Vec<u8> {
        let asc = [
            (object_type << 3) | (freq_idx >> 1),
            ((freq_idx & 1) << 7) | (channels << 3),
        ];

        let mut dec_config = vec![0x40, 0x15, 0, 0, 0];
        push_u32s(&mut dec_config, &[96_000, 96_000]);
        dec_config.extend_from_slice(&[0x05, asc.len() as u8]);
        dec_config.extend_from_slice(&asc);

        let mut es = vec![0, 2, 0]; // ES_ID 2, priority 0
        es.extend_from_slice(&[0x04, dec_config.len() as u8]);
        es.extend_from_slice(&dec_config);

        let mut body = vec![0, 0, 0, 0];
        body.extend_from_slice(&[0x03, es.len() as u8]);
        body.extend_from_slice(&es);
        body
    }

    #[test]
    fn test_esds_aac_lc_stereo() {
        let data = boxed(ESDS, &esds_body(2, 4, 2));
        let (mut cursor, header) = header_of(&data);
        let config = parse_esds(&mut cursor, &header).unwrap();

        assert_eq!(config.audio_object_type, 2);
        assert_eq!(config.sampling_frequency_index, 4);
        assert_eq!(config.sample_rate, 44_100);
        assert_eq!(config.channel_config, 2);
        assert_eq!(config.raw_config, vec![0x12, 0x10]);
    }

    #[test]
    fn test_esds_mono_8khz() {
        let data = boxed(ESDS, &esds_body(2, 11, 1));
        let (mut cursor, header) = header_of(&data);
        let config = parse_esds(&mut cursor, &header).unwrap();

        assert_eq!(config.sample_rate, 8000);
        assert_eq!(config.channel_config, 1);
    }

    #[test]
    fn test_esds_missing_decoder_config_rejected() {
        // ES descriptor whose body ends before the next tag
        let body = [0u8, 0, 0, 0, 0x03, 0x03, 0, 2, 0];
        let data = boxed(ESDS, &body);
        let (mut cursor, header) = header_of(&data);
        assert!(parse_esds(&mut cursor, &header).is_err());
    }

    #[test]
    fn test_expandable_length_short_form() {
        let mut d = DescriptorReader::new(&[0x25]);
        assert_eq!(d.read_length(), 37);
        assert_eq!(d.pos, 1);
    }

    #[test]
    fn test_expandable_length_continuation() {
        let mut d = DescriptorReader::new(&[0x81, 0x48]);
        assert_eq!(d.read_length(), 200);
        assert_eq!(d.pos, 2);
    }

    #[test]
    fn test_frequency_index_table() {
        assert_eq!(AAC_SAMPLE_RATES[0], 96_000);
        assert_eq!(AAC_SAMPLE_RATES[4], 44_100);
        assert_eq!(AAC_SAMPLE_RATES[12], 7350);
    }
}
