//! Container probing — verifies that a byte stream looks like an MP4
//! file before full parsing begins.

use std::io::Read;
use std::path::Path;

use crate::DemuxError;

/// Top-level box types that can legally open an MP4 file. `ftyp` is the
/// overwhelmingly common case; the rest appear in files written by muxers
/// that front-load free space or the movie box.
const LEADING_BOX_TYPES: [&[u8; 4]; 6] =
    [b"ftyp", b"moov", b"mdat", b"wide", b"free", b"skip"];

/// Check that the stream opens with a recognizable MP4 top-level box.
///
/// Reads up to 12 bytes. The caller is expected to rewind the stream
/// afterwards if it intends to parse from the start.
pub fn verify_mp4_magic<R: Read>(reader: &mut R) -> Result<(), DemuxError> {
    let mut magic = [0u8; 12];
    let n = read_up_to(reader, &mut magic)?;

    // Need at least a box header (size + type) to judge anything.
    if n < 8 {
        return Err(DemuxError::UnsupportedContainer);
    }

    let box_type = &magic[4..8];
    if LEADING_BOX_TYPES.iter().any(|t| *t == box_type) {
        Ok(())
    } else {
        Err(DemuxError::UnsupportedContainer)
    }
}

/// Check whether a path carries one of the usual MP4-family extensions.
pub fn has_mp4_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let e = e.to_ascii_lowercase();
            e == "mp4" || e == "m4v" || e == "mov"
        })
        .unwrap_or(false)
}

/// Read as many bytes as available into `buf`, stopping at EOF.
fn read_up_to<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize, DemuxError> {
    let mut total = 0;
    while total < buf.len() {
        match reader.read(&mut buf[total..]) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(DemuxError::Io(e)),
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_ftyp_accepted() {
        let mut data = vec![0x00, 0x00, 0x00, 0x20];
        data.extend_from_slice(b"ftyp");
        data.extend_from_slice(b"isom");
        let mut cursor = Cursor::new(data);
        assert!(verify_mp4_magic(&mut cursor).is_ok());
    }

    #[test]
    fn test_moov_first_accepted() {
        let mut data = vec![0x00, 0x00, 0x01, 0x00];
        data.extend_from_slice(b"moov");
        data.extend_from_slice(&[0u8; 8]);
        let mut cursor = Cursor::new(data);
        assert!(verify_mp4_magic(&mut cursor).is_ok());
    }

    #[test]
    fn test_ebml_magic_rejected() {
        // Matroska/WebM leader
        let data = vec![0x1A, 0x45, 0xDF, 0xA3, 0x9F, 0x42, 0x86, 0x81, 0x01];
        let mut cursor = Cursor::new(data);
        assert!(matches!(
            verify_mp4_magic(&mut cursor),
            Err(DemuxError::UnsupportedContainer)
        ));
    }

    #[test]
    fn test_riff_rejected() {
        let mut data = Vec::new();
        data.extend_from_slice(b"RIFF");
        data.extend_from_slice(&[0x24, 0x00, 0x00, 0x00]);
        data.extend_from_slice(b"AVI ");
        let mut cursor = Cursor::new(data);
        assert!(matches!(
            verify_mp4_magic(&mut cursor),
            Err(DemuxError::UnsupportedContainer)
        ));
    }

    #[test]
    fn test_short_input_rejected() {
        let mut cursor = Cursor::new(vec![0x00, 0x00, 0x00]);
        assert!(matches!(
            verify_mp4_magic(&mut cursor),
            Err(DemuxError::UnsupportedContainer)
        ));
    }

    #[test]
    fn test_extension_checks() {
        assert!(has_mp4_extension(Path::new("clip.mp4")));
        assert!(has_mp4_extension(Path::new("clip.MP4")));
        assert!(has_mp4_extension(Path::new("clip.m4v")));
        assert!(has_mp4_extension(Path::new("clip.mov")));
        assert!(!has_mp4_extension(Path::new("clip.mkv")));
        assert!(!has_mp4_extension(Path::new("clip")));
    }
}
