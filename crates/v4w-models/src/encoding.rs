//! Output encodings and compression levels.

use std::fmt;
use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// Target widths offered for downscaling. Height follows the aspect ratio.
pub const SCALE_WIDTHS: [u32; 16] = [
    1920, 1680, 1600, 1440, 1400, 1280, 1024, 960, 800, 720, 640, 576, 480, 320, 240, 160,
];

/// One target output container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Encoding {
    /// H.264 in an MP4 container
    Mp4,
    /// VP9 in a WebM container
    Webm,
}

impl Encoding {
    /// All encodings, in output order.
    pub const ALL: [Encoding; 2] = [Encoding::Mp4, Encoding::Webm];

    pub fn as_str(&self) -> &'static str {
        match self {
            Encoding::Mp4 => "mp4",
            Encoding::Webm => "webm",
        }
    }

    /// File extension used for outputs of this encoding.
    pub fn extension(&self) -> &'static str {
        self.as_str()
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Encoding {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mp4" => Ok(Encoding::Mp4),
            "webm" => Ok(Encoding::Webm),
            other => Err(ModelError::invalid_value(format!("unknown encoding '{}'", other))),
        }
    }
}

/// How aggressively outputs are compressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum CompressionLevel {
    /// Best quality, largest files
    Low,
    #[default]
    Medium,
    /// Smallest files
    High,
}

impl CompressionLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompressionLevel::Low => "low",
            CompressionLevel::Medium => "medium",
            CompressionLevel::High => "high",
        }
    }

    /// Constant Rate Factor for the given encoding.
    ///
    /// The scales differ per codec: x264 spans 0-51, VP9 spans 0-63.
    pub fn crf(&self, encoding: Encoding) -> u8 {
        match (encoding, self) {
            (Encoding::Mp4, CompressionLevel::Low) => 23,
            (Encoding::Mp4, CompressionLevel::Medium) => 28,
            (Encoding::Mp4, CompressionLevel::High) => 32,
            (Encoding::Webm, CompressionLevel::Low) => 40,
            (Encoding::Webm, CompressionLevel::Medium) => 47,
            (Encoding::Webm, CompressionLevel::High) => 53,
        }
    }
}

impl fmt::Display for CompressionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for CompressionLevel {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(CompressionLevel::Low),
            "medium" => Ok(CompressionLevel::Medium),
            "high" => Ok(CompressionLevel::High),
            other => Err(ModelError::invalid_value(format!(
                "unknown compression level '{}'",
                other
            ))),
        }
    }
}
