//! Compressed sample metadata and flags.

use crate::types::MediaTime;
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Per-buffer flags carried alongside compressed data through the pipeline.
///
/// The bit values match what codecs and muxers exchange: a buffer can be a
/// sync point, carry codec configuration instead of media data, or mark the
/// end of the stream (usually with an empty payload).
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct SampleFlags(u32);

impl SampleFlags {
    pub const NONE: SampleFlags = SampleFlags(0);
    /// Buffer starts at a sync point (key frame).
    pub const KEY_FRAME: SampleFlags = SampleFlags(1);
    /// Buffer holds codec-specific data, not media samples.
    pub const CODEC_CONFIG: SampleFlags = SampleFlags(1 << 1);
    /// Last buffer of the stream. The payload may be empty.
    pub const END_OF_STREAM: SampleFlags = SampleFlags(1 << 2);

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn from_bits(bits: u32) -> Self {
        SampleFlags(bits)
    }

    pub const fn contains(self, other: SampleFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for SampleFlags {
    type Output = SampleFlags;

    fn bitor(self, rhs: SampleFlags) -> SampleFlags {
        SampleFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for SampleFlags {
    fn bitor_assign(&mut self, rhs: SampleFlags) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for SampleFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "NONE");
        }
        let mut first = true;
        let mut named = |f: &mut fmt::Formatter<'_>, name: &str| -> fmt::Result {
            if !first {
                write!(f, "|")?;
            }
            first = false;
            write!(f, "{name}")
        };
        if self.contains(SampleFlags::KEY_FRAME) {
            named(f, "KEY_FRAME")?;
        }
        if self.contains(SampleFlags::CODEC_CONFIG) {
            named(f, "CODEC_CONFIG")?;
        }
        if self.contains(SampleFlags::END_OF_STREAM) {
            named(f, "END_OF_STREAM")?;
        }
        Ok(())
    }
}

/// Timing and flags for one compressed buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferInfo {
    /// Presentation timestamp.
    pub pts: MediaTime,
    pub flags: SampleFlags,
}

impl BufferInfo {
    pub fn new(pts: MediaTime, flags: SampleFlags) -> Self {
        BufferInfo { pts, flags }
    }

    pub fn is_key_frame(&self) -> bool {
        self.flags.contains(SampleFlags::KEY_FRAME)
    }

    pub fn is_codec_config(&self) -> bool {
        self.flags.contains(SampleFlags::CODEC_CONFIG)
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.flags.contains(SampleFlags::END_OF_STREAM)
    }
}

/// One compressed sample: payload plus timing.
#[derive(Debug, Clone)]
pub struct Sample {
    pub data: Vec<u8>,
    pub info: BufferInfo,
}

impl Sample {
    pub fn new(data: Vec<u8>, info: BufferInfo) -> Self {
        Sample { data, info }
    }

    pub fn byte_size(&self) -> usize {
        self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_operations() {
        let flags = SampleFlags::KEY_FRAME | SampleFlags::END_OF_STREAM;
        assert!(flags.contains(SampleFlags::KEY_FRAME));
        assert!(flags.contains(SampleFlags::END_OF_STREAM));
        assert!(!flags.contains(SampleFlags::CODEC_CONFIG));
        assert!(SampleFlags::NONE.is_empty());
    }

    #[test]
    fn flag_debug_format() {
        let flags = SampleFlags::KEY_FRAME | SampleFlags::CODEC_CONFIG;
        assert_eq!(format!("{flags:?}"), "KEY_FRAME|CODEC_CONFIG");
        assert_eq!(format!("{:?}", SampleFlags::NONE), "NONE");
    }

    #[test]
    fn buffer_info_predicates() {
        let info = BufferInfo::new(MediaTime::from_micros(100), SampleFlags::END_OF_STREAM);
        assert!(info.is_end_of_stream());
        assert!(!info.is_key_frame());
    }
}
