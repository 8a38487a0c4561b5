//! Codec capability descriptors reported by a platform

use serde::{Deserialize, Serialize};

use super::format::ColorFormat;

/// Limits and input formats a codec declares for one mime type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecCapabilities {
    /// Input colour formats in the order the codec reports them
    pub color_formats: Vec<ColorFormat>,
    pub max_width: u32,
    pub max_height: u32,
    pub max_bit_rate: u32,
    pub max_frame_rate: u32,
}

impl CodecCapabilities {
    /// Returns true when a `width` x `height` picture fits the declared limits
    /// in either orientation.
    pub fn supports_size(&self, width: u32, height: u32) -> bool {
        let limit_long = self.max_width.max(self.max_height);
        let limit_short = self.max_width.min(self.max_height);
        let long = width.max(height);
        let short = width.min(height);
        width > 0 && height > 0 && long <= limit_long && short <= limit_short
    }

    pub fn supports_color_format(&self, format: ColorFormat) -> bool {
        self.color_formats.contains(&format)
    }
}

impl Default for CodecCapabilities {
    fn default() -> Self {
        Self {
            color_formats: vec![ColorFormat::YuvFlexible420],
            max_width: 3840,
            max_height: 2160,
            max_bit_rate: 40_000_000,
            max_frame_rate: 60,
        }
    }
}

/// One codec installed on the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecInfo {
    /// Name accepted by `CodecPlatform::create_codec_by_name`
    pub name: String,
    pub is_encoder: bool,
    pub hardware_accelerated: bool,
    /// Mime types this codec handles
    pub supported_types: Vec<String>,
    pub capabilities: CodecCapabilities,
}

impl CodecInfo {
    pub fn supports_type(&self, mime: &str) -> bool {
        self.supported_types
            .iter()
            .any(|supported| supported.eq_ignore_ascii_case(mime))
    }
}
