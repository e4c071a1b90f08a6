//! Transcode configuration.

use crate::error::ConfigError;
use crate::format::MimeType;
use crate::types::{Rational, Resolution};
use serde::{Deserialize, Serialize};

/// Caller-facing knobs for a transcode run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscodeConfig {
    /// Output resolution as displayed upright. `None` keeps the source's
    /// upright dimensions.
    pub resolution: Option<Resolution>,
    /// Target video bitrate in bits per second.
    pub bitrate: u32,
    /// Output frame rate hint for the encoder.
    pub frame_rate: Rational,
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        TranscodeConfig {
            resolution: None,
            bitrate: 2_000_000,
            frame_rate: Rational::FPS_30,
        }
    }
}

impl TranscodeConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(res) = self.resolution {
            if res.width % 2 != 0 || res.height % 2 != 0 {
                return Err(ConfigError::OddDimensions(res));
            }
        }
        if self.bitrate == 0 {
            return Err(ConfigError::ZeroBitrate);
        }
        if self.frame_rate.num == 0 {
            return Err(ConfigError::ZeroFrameRate);
        }
        Ok(())
    }
}

/// Resolved encoder parameters, derived from `TranscodeConfig` and the
/// selected source track.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncoderSettings {
    pub mime: MimeType,
    pub resolution: Resolution,
    pub bitrate: u32,
    pub frame_rate: Rational,
}

impl EncoderSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.resolution.width % 2 != 0 || self.resolution.height % 2 != 0 {
            return Err(ConfigError::OddDimensions(self.resolution));
        }
        if self.bitrate == 0 {
            return Err(ConfigError::ZeroBitrate);
        }
        if self.frame_rate.num == 0 {
            return Err(ConfigError::ZeroFrameRate);
        }
        Ok(())
    }
}
