//! Core newtypes used throughout the pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};

/// A point on a media timeline, stored in microseconds.
///
/// Microseconds are the native unit of the pipeline: sample timestamps come
/// out of the demuxer in microseconds, codecs consume and produce them, and
/// the muxer converts to track timescale ticks only at write time. Nanosecond
/// conversion exists for the presentation-time handoff to the surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MediaTime(pub i64);

impl MediaTime {
    pub const ZERO: MediaTime = MediaTime(0);

    pub const fn from_micros(us: i64) -> Self {
        MediaTime(us)
    }

    pub const fn from_millis(ms: i64) -> Self {
        MediaTime(ms * 1_000)
    }

    pub fn from_secs_f64(secs: f64) -> Self {
        MediaTime((secs * 1_000_000.0).round() as i64)
    }

    pub const fn as_micros(self) -> i64 {
        self.0
    }

    pub const fn as_millis(self) -> i64 {
        self.0 / 1_000
    }

    pub const fn as_nanos(self) -> i64 {
        self.0 * 1_000
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / 1_000_000.0
    }
}

impl Add for MediaTime {
    type Output = MediaTime;

    fn add(self, rhs: MediaTime) -> MediaTime {
        MediaTime(self.0 + rhs.0)
    }
}

impl Sub for MediaTime {
    type Output = MediaTime;

    fn sub(self, rhs: MediaTime) -> MediaTime {
        MediaTime(self.0 - rhs.0)
    }
}

impl fmt::Display for MediaTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}s", self.as_secs_f64())
    }
}

/// A frame rate or aspect ratio as an exact fraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rational {
    pub num: u32,
    pub den: u32,
}

impl Rational {
    pub const FPS_24: Rational = Rational { num: 24, den: 1 };
    pub const FPS_25: Rational = Rational { num: 25, den: 1 };
    pub const FPS_30: Rational = Rational { num: 30, den: 1 };
    pub const FPS_29_97: Rational = Rational { num: 30000, den: 1001 };
    pub const FPS_60: Rational = Rational { num: 60, den: 1 };

    pub fn new(num: u32, den: u32) -> Self {
        assert!(den > 0, "denominator must be non-zero");
        Rational { num, den }
    }

    pub fn as_f64(&self) -> f64 {
        f64::from(self.num) / f64::from(self.den)
    }

    /// Duration of a single frame at this rate.
    pub fn frame_duration(&self) -> MediaTime {
        MediaTime((1_000_000u64 * self.den as u64 / self.num as u64) as i64)
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.den {
            1 => write!(f, "{}", self.num),
            den => write!(f, "{}/{}", self.num, den),
        }
    }
}

/// Pixel dimensions of a frame or track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const HD: Resolution = Resolution { width: 1920, height: 1080 };
    pub const HD_720: Resolution = Resolution { width: 1280, height: 720 };

    pub const fn new(width: u32, height: u32) -> Self {
        Resolution { width, height }
    }

    pub const fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Byte size of one frame at this resolution in RGBA8.
    pub const fn rgba_byte_size(&self) -> u64 {
        self.pixel_count() * 4
    }

    pub fn aspect_ratio(&self) -> f64 {
        self.width as f64 / self.height as f64
    }

    /// Width and height exchanged. Used when a rotation of 90 or 270
    /// degrees turns a portrait track into a landscape one or vice versa.
    pub const fn transposed(&self) -> Resolution {
        Resolution { width: self.height, height: self.width }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_time_conversions() {
        let t = MediaTime::from_millis(1_500);
        assert_eq!(t.as_micros(), 1_500_000);
        assert_eq!(t.as_millis(), 1_500);
        assert_eq!(t.as_nanos(), 1_500_000_000);
        assert!((t.as_secs_f64() - 1.5).abs() < 1e-9);
    }

    #[test]
    fn media_time_arithmetic() {
        let a = MediaTime::from_micros(100);
        let b = MediaTime::from_micros(40);
        assert_eq!((a + b).as_micros(), 140);
        assert_eq!((a - b).as_micros(), 60);
        assert!(a > b);
    }

    #[test]
    fn rational_display() {
        assert_eq!(Rational::FPS_60.to_string(), "60");
        assert_eq!(Rational::new(24_000, 1_001).to_string(), "24000/1001");
    }

    #[test]
    fn frame_duration_at_30fps() {
        assert_eq!(Rational::FPS_30.frame_duration().as_micros(), 33_333);
    }

    #[test]
    fn rgba_frame_bytes() {
        let r = Resolution::new(1280, 720);
        assert_eq!(r.pixel_count(), 921_600);
        assert_eq!(r.rgba_byte_size(), 3_686_400);
    }

    #[test]
    fn resolution_transpose() {
        let portrait = Resolution::new(720, 1280);
        assert_eq!(portrait.transposed(), Resolution::new(1280, 720));
        assert_eq!(portrait.to_string(), "720x1280");
    }
}
