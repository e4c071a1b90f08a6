//! Byte-level atom writing.
//!
//! Every MP4 atom opens with a 4-byte big-endian size that covers the
//! whole atom, then a 4-byte fourcc. The size is only known once the
//! payload is written, so [`atom`] takes the payload as a closure,
//! leaves a size placeholder, and patches it when the closure returns.
//! Full atoms carry a version byte and 24 bits of flags after the
//! fourcc.

use byteorder::{BigEndian, WriteBytesExt};
use std::io::{Seek, SeekFrom, Write};

use crate::error::{MuxError, MuxResult};
use ob_common::MediaTime;

/// Standard video timescale (90kHz, same as MPEG-TS).
pub const VIDEO_TIMESCALE: u32 = 90_000;

/// Movie-level timescale (1000 = millisecond precision).
pub const MOVIE_TIMESCALE: u32 = 1000;

/// Seconds between the MP4 epoch (1904-01-01) and the Unix epoch (1970-01-01).
pub const MP4_EPOCH_OFFSET: u64 = 2_082_844_800;

/// Write one atom: size placeholder, fourcc, then whatever `body`
/// produces. The size field is patched once the body is done, so atoms
/// nest naturally and close from the inside out.
pub fn atom<W, F>(writer: &mut W, fourcc: &[u8; 4], body: F) -> MuxResult<()>
where
    W: Write + Seek,
    F: FnOnce(&mut W) -> MuxResult<()>,
{
    let size_pos = writer.stream_position()?;
    writer.write_u32::<BigEndian>(0)?;
    writer.write_all(fourcc)?;
    body(writer)?;
    patch_size(writer, size_pos)
}

/// Write a full atom: like [`atom`] but with the version byte and
/// 24-bit flags field ahead of the body.
pub fn full_atom<W, F>(
    writer: &mut W,
    fourcc: &[u8; 4],
    version: u8,
    flags: u32,
    body: F,
) -> MuxResult<()>
where
    W: Write + Seek,
    F: FnOnce(&mut W) -> MuxResult<()>,
{
    atom(writer, fourcc, |w| {
        w.write_u32::<BigEndian>(((version as u32) << 24) | (flags & 0x00FF_FFFF))?;
        body(w)
    })
}

fn patch_size<W: Write + Seek>(writer: &mut W, size_pos: u64) -> MuxResult<()> {
    let end = writer.stream_position()?;
    let size = end - size_pos;

    // The standard size field is u32; anything larger needs a large atom.
    if size > u32::MAX as u64 {
        return Err(MuxError::BoxTooLarge(size));
    }

    writer.seek(SeekFrom::Start(size_pos))?;
    writer.write_u32::<BigEndian>(size as u32)?;
    writer.seek(SeekFrom::Start(end))?;
    Ok(())
}

/// Open an atom with a 64-bit size (size field 1 plus an 8-byte
/// extended size). Returns the position of the extended size field for
/// [`close_large_atom`].
///
/// Used for mdat, whose final size is unknown while samples stream in
/// and may pass 4GB.
pub fn open_large_atom<W: Write + Seek>(writer: &mut W, fourcc: &[u8; 4]) -> MuxResult<u64> {
    writer.write_u32::<BigEndian>(1)?; // 1 selects the extended size field
    writer.write_all(fourcc)?;
    let size_pos = writer.stream_position()?;
    writer.write_u64::<BigEndian>(0)?;
    Ok(size_pos)
}

/// Patch a large atom's extended size field. The total counts the
/// 8-byte standard header sitting before `size_pos`.
pub fn close_large_atom<W: Write + Seek>(writer: &mut W, size_pos: u64) -> MuxResult<()> {
    let end = writer.stream_position()?;
    let total = end - (size_pos - 8);
    writer.seek(SeekFrom::Start(size_pos))?;
    writer.write_u64::<BigEndian>(total)?;
    writer.seek(SeekFrom::Start(end))?;
    Ok(())
}

/// Convert a media timestamp to timescale ticks, rounding to nearest.
/// Negative timestamps clamp to zero.
pub fn media_time_to_ticks(time: MediaTime, timescale: u32) -> u64 {
    let us = time.as_micros() as i128;
    let ticks = (us * timescale as i128 + 500_000) / 1_000_000;
    ticks.max(0) as u64
}

/// Convert timescale ticks back to a media timestamp.
pub fn ticks_to_media_time(ticks: u64, timescale: u32) -> MediaTime {
    if timescale == 0 {
        return MediaTime::ZERO;
    }
    let us = ticks as i128 * 1_000_000 / timescale as i128;
    MediaTime::from_micros(us as i64)
}

/// 16.16 fixed-point representation of `value`.
pub fn fixed_16_16(value: f64) -> i32 {
    (value * 65536.0).round() as i32
}

/// 8.8 fixed-point representation of `value`.
pub fn fixed_8_8(value: f64) -> i16 {
    (value * 256.0).round() as i16
}

/// Write `count` reserved/padding zero bytes.
pub fn pad<W: Write>(writer: &mut W, count: usize) -> MuxResult<()> {
    writer.write_all(&vec![0u8; count])?;
    Ok(())
}

/// Write the 9-element tkhd/mvhd transformation matrix for a quarter-turn
/// display rotation. 0 produces the unity matrix.
pub fn write_matrix<W: Write>(writer: &mut W, rotation_degrees: u32) -> MuxResult<()> {
    // (a, b, c, d) rows of the 2x2 rotation part, 16.16 fixed point
    let (a, b, c, d): (i32, i32, i32, i32) = match rotation_degrees % 360 {
        90 => (0, 1, -1, 0),
        180 => (-1, 0, 0, -1),
        270 => (0, -1, 1, 0),
        _ => (1, 0, 0, 1),
    };

    writer.write_i32::<BigEndian>(a << 16)?;
    writer.write_i32::<BigEndian>(b << 16)?;
    writer.write_i32::<BigEndian>(0)?; // u
    writer.write_i32::<BigEndian>(c << 16)?;
    writer.write_i32::<BigEndian>(d << 16)?;
    writer.write_i32::<BigEndian>(0)?; // v
    writer.write_i32::<BigEndian>(0)?; // x translation
    writer.write_i32::<BigEndian>(0)?; // y translation
    writer.write_u32::<BigEndian>(0x4000_0000)?; // w = 1.0 in 2.30 fixed point

    Ok(())
}

/// ISO 639-2/T language code packed into 3x5 bits.
/// Falls back to "und" (undetermined) for short input.
pub fn encode_language(lang: &str) -> u16 {
    let bytes = lang.as_bytes();
    if bytes.len() < 3 {
        return encode_language("und");
    }
    let a = (bytes[0] - 0x60) as u16;
    let b = (bytes[1] - 0x60) as u16;
    let c = (bytes[2] - 0x60) as u16;
    (a << 10) | (b << 5) | c
}

/// Current time as MP4 creation time (seconds since 1904-01-01 UTC).
pub fn mp4_creation_time() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() + MP4_EPOCH_OFFSET)
        .unwrap_or(MP4_EPOCH_OFFSET)
}
