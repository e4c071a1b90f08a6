//! Track format descriptors.
//!
//! A `TrackFormat` describes one track: its MIME type, video or audio
//! parameters, and any codec-specific data (SPS/PPS for H.264, the
//! AudioSpecificConfig for AAC). Demuxers produce formats when a track is
//! selected, encoders emit the final output format on their first drain, and
//! muxers consume formats when tracks are registered.

use crate::types::{Rational, Resolution};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A track's MIME type, e.g. `video/avc` or `audio/mp4a-latm`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MimeType(String);

impl MimeType {
    /// Uncompressed RGBA frames stored as raw samples.
    pub const VIDEO_RAW: &'static str = "video/raw";
    /// H.264 / AVC.
    pub const VIDEO_AVC: &'static str = "video/avc";
    /// AAC audio.
    pub const AUDIO_AAC: &'static str = "audio/mp4a-latm";

    pub fn new(mime: impl Into<String>) -> Self {
        MimeType(mime.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn has_prefix(&self, prefix: &str) -> bool {
        self.0.starts_with(prefix)
    }

    pub fn is_video(&self) -> bool {
        self.has_prefix("video/")
    }

    pub fn is_audio(&self) -> bool {
        self.has_prefix("audio/")
    }
}

impl fmt::Display for MimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MimeType {
    fn from(s: &str) -> Self {
        MimeType(s.to_owned())
    }
}

/// Parameters specific to the kind of track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TrackKind {
    Video {
        resolution: Resolution,
        frame_rate: Option<Rational>,
        bitrate: Option<u32>,
        /// Display rotation in degrees (0, 90, 180 or 270), as declared by
        /// the container. Stored frames are not rotated; players apply this
        /// at display time.
        rotation_degrees: u32,
    },
    Audio {
        sample_rate: u32,
        channels: u16,
    },
}

/// Complete description of one track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackFormat {
    pub mime: MimeType,
    pub kind: TrackKind,
    /// Codec-specific data blobs in codec-defined order. For H.264 this is
    /// `[sps, pps]`; for AAC a single AudioSpecificConfig. Empty for raw.
    pub csd: Vec<Vec<u8>>,
}

impl TrackFormat {
    pub fn video(mime: impl Into<MimeType>, resolution: Resolution) -> Self {
        TrackFormat {
            mime: mime.into(),
            kind: TrackKind::Video {
                resolution,
                frame_rate: None,
                bitrate: None,
                rotation_degrees: 0,
            },
            csd: Vec::new(),
        }
    }

    pub fn audio(mime: impl Into<MimeType>, sample_rate: u32, channels: u16) -> Self {
        TrackFormat {
            mime: mime.into(),
            kind: TrackKind::Audio { sample_rate, channels },
            csd: Vec::new(),
        }
    }

    pub fn with_rotation(mut self, degrees: u32) -> Self {
        if let TrackKind::Video { rotation_degrees, .. } = &mut self.kind {
            *rotation_degrees = degrees % 360;
        }
        self
    }

    pub fn with_frame_rate(mut self, rate: Rational) -> Self {
        if let TrackKind::Video { frame_rate, .. } = &mut self.kind {
            *frame_rate = Some(rate);
        }
        self
    }

    pub fn with_bitrate(mut self, bits_per_sec: u32) -> Self {
        if let TrackKind::Video { bitrate, .. } = &mut self.kind {
            *bitrate = Some(bits_per_sec);
        }
        self
    }

    pub fn with_csd(mut self, csd: Vec<Vec<u8>>) -> Self {
        self.csd = csd;
        self
    }

    pub fn is_video(&self) -> bool {
        matches!(self.kind, TrackKind::Video { .. })
    }

    pub fn is_audio(&self) -> bool {
        matches!(self.kind, TrackKind::Audio { .. })
    }

    /// Stored (coded) dimensions for video tracks.
    pub fn resolution(&self) -> Option<Resolution> {
        match self.kind {
            TrackKind::Video { resolution, .. } => Some(resolution),
            TrackKind::Audio { .. } => None,
        }
    }

    pub fn rotation_degrees(&self) -> u32 {
        match self.kind {
            TrackKind::Video { rotation_degrees, .. } => rotation_degrees,
            TrackKind::Audio { .. } => 0,
        }
    }

    /// Dimensions as displayed: stored dimensions with width and height
    /// exchanged when the declared rotation is 90 or 270 degrees.
    pub fn upright_resolution(&self) -> Option<Resolution> {
        let res = self.resolution()?;
        match self.rotation_degrees() {
            90 | 270 => Some(res.transposed()),
            _ => Some(res),
        }
    }
}
