//! User preference set applied to each submission.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::encoding::{CompressionLevel, Encoding};

/// Preferences captured when a file is submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct VideoSettings {
    /// Compression level
    #[serde(default)]
    pub compression_level: CompressionLevel,

    /// Strip audio tracks from outputs
    #[serde(default = "default_true")]
    pub remove_audio: bool,

    /// Produce an MP4 output
    #[serde(default = "default_true")]
    pub mp4_output: bool,

    /// Produce a WebM output
    #[serde(default = "default_true")]
    pub webm_output: bool,

    /// Downscale to this width, keeping the aspect ratio
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale_width: Option<u32>,
}

fn default_true() -> bool {
    true
}

impl Default for VideoSettings {
    fn default() -> Self {
        Self {
            compression_level: CompressionLevel::default(),
            remove_audio: true,
            mp4_output: true,
            webm_output: true,
            scale_width: None,
        }
    }
}

impl VideoSettings {
    /// Create default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns settings with only the given encodings enabled.
    pub fn with_encodings(mut self, encodings: &[Encoding]) -> Self {
        self.mp4_output = encodings.contains(&Encoding::Mp4);
        self.webm_output = encodings.contains(&Encoding::Webm);
        self
    }

    /// Returns settings with the given compression level.
    pub fn with_compression(mut self, level: CompressionLevel) -> Self {
        self.compression_level = level;
        self
    }

    /// Returns settings that downscale to `width`.
    pub fn with_scale_width(mut self, width: u32) -> Self {
        self.scale_width = Some(width);
        self
    }

    /// Enabled encodings, in output order.
    pub fn enabled_encodings(&self) -> Vec<Encoding> {
        Encoding::ALL
            .into_iter()
            .filter(|encoding| match encoding {
                Encoding::Mp4 => self.mp4_output,
                Encoding::Webm => self.webm_output,
            })
            .collect()
    }
}
