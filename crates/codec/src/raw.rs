//! Uncompressed RGBA codec backend.
//!
//! "Decoding" a `video/raw` sample is a validated copy: the payload already
//! is the frame, laid out as tightly packed RGBA8 rows at the configured
//! resolution. Encoding is the same copy in reverse, with every sample a
//! sync sample. This backend exists so the full pipeline — demux, decode,
//! composite, encode, mux — runs end to end with nothing but the CPU, and
//! it doubles as the reference for what hardware backends must produce.

use ob_common::{
    BufferInfo, CodecError, CodecResult, EncoderSettings, MediaTime, MimeType, Resolution,
    Sample, SampleFlags, TrackFormat, VideoFrame,
};
use tracing::debug;

use crate::backend::{DecoderBackend, EncoderBackend};

/// Passthrough decoder for raw RGBA samples.
#[derive(Debug)]
pub struct RawDecoderBackend {
    resolution: Resolution,
    frames_decoded: u64,
}

impl RawDecoderBackend {
    pub fn new(format: &TrackFormat) -> CodecResult<Self> {
        let resolution = format.resolution().ok_or_else(|| {
            CodecError::InvalidConfig("Raw decoder requires a video format with dimensions".into())
        })?;
        if resolution.pixel_count() == 0 {
            return Err(CodecError::InvalidConfig(format!(
                "Raw decoder dimensions must be non-zero, got {}",
                resolution
            )));
        }
        Ok(RawDecoderBackend { resolution, frames_decoded: 0 })
    }

    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded
    }
}

impl DecoderBackend for RawDecoderBackend {
    fn decode(&mut self, data: &[u8], info: &BufferInfo) -> CodecResult<Option<VideoFrame>> {
        if info.is_codec_config() || data.is_empty() {
            return Ok(None);
        }

        let expected = self.resolution.rgba_byte_size() as usize;
        if data.len() != expected {
            return Err(CodecError::Failed(format!(
                "Raw frame payload is {} bytes, expected {} for {}",
                data.len(),
                expected,
                self.resolution
            )));
        }

        self.frames_decoded += 1;
        Ok(Some(VideoFrame::new(self.resolution, info.pts, data.to_vec())))
    }
}

/// Passthrough encoder producing raw RGBA samples.
#[derive(Debug)]
pub struct RawEncoderBackend {
    settings: EncoderSettings,
    frames_encoded: u64,
}

impl RawEncoderBackend {
    pub fn new(settings: EncoderSettings) -> Self {
        RawEncoderBackend { settings, frames_encoded: 0 }
    }
}

impl EncoderBackend for RawEncoderBackend {
    fn output_format(&mut self) -> CodecResult<TrackFormat> {
        debug!(resolution = %self.settings.resolution, "raw encoder reporting output format");
        Ok(
            TrackFormat::video(MimeType::VIDEO_RAW, self.settings.resolution)
                .with_frame_rate(self.settings.frame_rate)
                .with_bitrate(self.settings.bitrate),
        )
    }

    fn encode(&mut self, frame: &VideoFrame, pts: MediaTime) -> CodecResult<Option<Sample>> {
        if frame.resolution != self.settings.resolution {
            return Err(CodecError::Failed(format!(
                "Encoder input is {}, configured for {}",
                frame.resolution, self.settings.resolution
            )));
        }

        self.frames_encoded += 1;
        // Every raw sample stands alone, so every sample is a sync sample.
        let info = BufferInfo::new(pts, SampleFlags::KEY_FRAME);
        Ok(Some(Sample::new(frame.data.clone(), info)))
    }

    fn flush(&mut self) -> CodecResult<Vec<Sample>> {
        // Nothing is ever buffered.
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ob_common::Rational;

    fn decoder(width: u32, height: u32) -> RawDecoderBackend {
        let format = TrackFormat::video(MimeType::VIDEO_RAW, Resolution::new(width, height));
        RawDecoderBackend::new(&format).unwrap()
    }

    fn settings(width: u32, height: u32) -> EncoderSettings {
        EncoderSettings {
            mime: MimeType::new(MimeType::VIDEO_RAW),
            resolution: Resolution::new(width, height),
            bitrate: 500_000,
            frame_rate: Rational::FPS_30,
        }
    }

    fn plain(pts_us: i64) -> BufferInfo {
        BufferInfo::new(MediaTime::from_micros(pts_us), SampleFlags::NONE)
    }

    #[test]
    fn decode_produces_frame_with_source_timing() {
        let mut dec = decoder(2, 2);
        let payload = vec![7u8; 16];
        let frame = dec.decode(&payload, &plain(42)).unwrap().unwrap();
        assert_eq!(frame.resolution, Resolution::new(2, 2));
        assert_eq!(frame.pts.as_micros(), 42);
        assert_eq!(frame.data, payload);
        assert_eq!(dec.frames_decoded(), 1);
    }

    #[test]
    fn decode_skips_codec_config_and_empty() {
        let mut dec = decoder(2, 2);
        let config = BufferInfo::new(MediaTime::ZERO, SampleFlags::CODEC_CONFIG);
        assert!(dec.decode(&[0u8; 16], &config).unwrap().is_none());
        assert!(dec.decode(&[], &plain(0)).unwrap().is_none());
        assert_eq!(dec.frames_decoded(), 0);
    }

    #[test]
    fn decode_rejects_wrong_payload_size() {
        let mut dec = decoder(2, 2);
        let err = dec.decode(&[0u8; 15], &plain(0)).unwrap_err();
        assert!(matches!(err, CodecError::Failed(_)));
    }

    #[test]
    fn decoder_rejects_zero_dimensions() {
        let format = TrackFormat::video(MimeType::VIDEO_RAW, Resolution::new(0, 4));
        assert!(matches!(
            RawDecoderBackend::new(&format).unwrap_err(),
            CodecError::InvalidConfig(_)
        ));
    }

    #[test]
    fn encoder_reports_format_with_settings() {
        let mut enc = RawEncoderBackend::new(settings(4, 4));
        let format = enc.output_format().unwrap();
        assert_eq!(format.mime.as_str(), MimeType::VIDEO_RAW);
        assert_eq!(format.resolution(), Some(Resolution::new(4, 4)));
        assert!(format.csd.is_empty());
    }

    #[test]
    fn encode_copies_frame_and_marks_sync() {
        let mut enc = RawEncoderBackend::new(settings(2, 2));
        let frame =
            VideoFrame::solid(Resolution::new(2, 2), MediaTime::from_micros(5), [1, 2, 3, 4]);
        let sample = enc.encode(&frame, MediaTime::from_micros(99)).unwrap().unwrap();
        // The explicit pts wins over the frame's own timestamp.
        assert_eq!(sample.info.pts.as_micros(), 99);
        assert!(sample.info.is_key_frame());
        assert_eq!(sample.data, frame.data);
    }

    #[test]
    fn encode_rejects_resolution_mismatch() {
        let mut enc = RawEncoderBackend::new(settings(4, 4));
        let frame = VideoFrame::solid(Resolution::new(2, 2), MediaTime::ZERO, [0; 4]);
        assert!(matches!(
            enc.encode(&frame, MediaTime::ZERO).unwrap_err(),
            CodecError::Failed(_)
        ));
    }

    #[test]
    fn flush_is_empty() {
        let mut enc = RawEncoderBackend::new(settings(2, 2));
        assert!(enc.flush().unwrap().is_empty());
    }
}
