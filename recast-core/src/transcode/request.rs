//! Conversion requests and their validation

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::TranscodeError;
use crate::codec::{CropRect, VideoCodec};

pub const DEFAULT_WIDTH: u32 = 1280;
pub const DEFAULT_HEIGHT: u32 = 720;
pub const DEFAULT_BIT_RATE: u32 = 4_000_000;
pub const DEFAULT_FRAME_RATE: u32 = 30;

/// Nominal output resolution selected by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawResolution", into = "RawResolution")]
pub enum ResolutionClass {
    P480,
    P720,
    P1080,
    /// Use the explicit width and height
    Custom,
}

impl ResolutionClass {
    /// Landscape size of the class, `None` for `Custom`.
    pub fn landscape_size(self) -> Option<(u32, u32)> {
        match self {
            ResolutionClass::P480 => Some((854, 480)),
            ResolutionClass::P720 => Some((1280, 720)),
            ResolutionClass::P1080 => Some((1920, 1080)),
            ResolutionClass::Custom => None,
        }
    }
}

impl fmt::Display for ResolutionClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolutionClass::P480 => write!(f, "480"),
            ResolutionClass::P720 => write!(f, "720"),
            ResolutionClass::P1080 => write!(f, "1080"),
            ResolutionClass::Custom => write!(f, "custom"),
        }
    }
}

impl std::str::FromStr for ResolutionClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "480" | "480p" => Ok(ResolutionClass::P480),
            "720" | "720p" => Ok(ResolutionClass::P720),
            "1080" | "1080p" => Ok(ResolutionClass::P1080),
            "custom" => Ok(ResolutionClass::Custom),
            _ => Err(format!("Unknown resolution class: {s}")),
        }
    }
}

/// Wire form of a resolution class: a number or a string.
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawResolution {
    Lines(u32),
    Named(String),
}

impl TryFrom<RawResolution> for ResolutionClass {
    type Error = String;

    fn try_from(raw: RawResolution) -> Result<Self, Self::Error> {
        match raw {
            RawResolution::Lines(480) => Ok(ResolutionClass::P480),
            RawResolution::Lines(720) => Ok(ResolutionClass::P720),
            RawResolution::Lines(1080) => Ok(ResolutionClass::P1080),
            RawResolution::Lines(other) => Err(format!("Unknown resolution class: {other}")),
            RawResolution::Named(name) => name.parse(),
        }
    }
}

impl From<ResolutionClass> for RawResolution {
    fn from(class: ResolutionClass) -> Self {
        match class {
            ResolutionClass::P480 => RawResolution::Lines(480),
            ResolutionClass::P720 => RawResolution::Lines(720),
            ResolutionClass::P1080 => RawResolution::Lines(1080),
            ResolutionClass::Custom => RawResolution::Named("custom".to_string()),
        }
    }
}

fn default_width() -> u32 {
    DEFAULT_WIDTH
}

fn default_height() -> u32 {
    DEFAULT_HEIGHT
}

fn default_bit_rate() -> u32 {
    DEFAULT_BIT_RATE
}

fn default_frame_rate() -> u32 {
    DEFAULT_FRAME_RATE
}

/// Parameters of one conversion. Immutable once handed to the transcoder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscodeRequest {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    /// Explicit output width, used when no resolution class applies
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default)]
    pub resolution: Option<ResolutionClass>,
    /// Target bitrate in bits per second
    #[serde(default = "default_bit_rate", alias = "bitRate")]
    pub bitrate: u32,
    #[serde(default = "default_frame_rate", alias = "frameRate")]
    pub fps: u32,
    #[serde(default)]
    pub codec: VideoCodec,
    #[serde(default)]
    pub hdr: bool,
    #[serde(default)]
    pub crop: Option<CropRect>,
}

impl TranscodeRequest {
    pub fn new(input_path: impl Into<PathBuf>, output_path: impl Into<PathBuf>) -> Self {
        Self {
            input_path: input_path.into(),
            output_path: output_path.into(),
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            resolution: None,
            bitrate: DEFAULT_BIT_RATE,
            fps: DEFAULT_FRAME_RATE,
            codec: VideoCodec::default(),
            hdr: false,
            crop: None,
        }
    }

    /// Parses the flat key/value form used by the request bridge.
    ///
    /// # Errors
    /// - `TranscodeError::Validation` - Missing paths or values of the wrong type
    pub fn from_map(map: &Map<String, Value>) -> Result<Self, TranscodeError> {
        serde_json::from_value(Value::Object(map.clone())).map_err(|e| {
            TranscodeError::Validation {
                reason: format!("Malformed request: {e}"),
            }
        })
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_resolution(mut self, resolution: ResolutionClass) -> Self {
        self.resolution = Some(resolution);
        self
    }

    pub fn with_bitrate(mut self, bitrate: u32) -> Self {
        self.bitrate = bitrate;
        self
    }

    pub fn with_fps(mut self, fps: u32) -> Self {
        self.fps = fps;
        self
    }

    pub fn with_codec(mut self, codec: VideoCodec) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_hdr(mut self, hdr: bool) -> Self {
        self.hdr = hdr;
        self
    }

    pub fn with_crop(mut self, crop: CropRect) -> Self {
        self.crop = Some(crop);
        self
    }

    /// Checks everything that can be checked without opening a codec.
    ///
    /// # Errors
    /// - `TranscodeError::Validation` - Input missing or empty, or a
    ///   non-positive, odd, or empty parameter
    pub fn validate(&self) -> Result<(), TranscodeError> {
        validate_input_file(&self.input_path)?;

        if self.output_path.as_os_str().is_empty() {
            return Err(invalid("Output path is empty"));
        }
        if self.width == 0 || self.height == 0 {
            return Err(invalid(format!(
                "Dimensions must be positive: {}x{}",
                self.width, self.height
            )));
        }
        if self.width % 2 != 0 || self.height % 2 != 0 {
            return Err(invalid(format!(
                "Dimensions must be even: {}x{}",
                self.width, self.height
            )));
        }
        if self.bitrate == 0 {
            return Err(invalid("Bitrate must be positive"));
        }
        if self.fps == 0 {
            return Err(invalid("Frame rate must be positive"));
        }
        if let Some(crop) = self.crop
            && !crop.has_area()
        {
            return Err(invalid(format!(
                "Crop rectangle must have positive size: {}x{}",
                crop.width, crop.height
            )));
        }
        Ok(())
    }
}

fn validate_input_file(path: &Path) -> Result<(), TranscodeError> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| invalid(format!("Input {} is not readable: {e}", path.display())))?;
    if !metadata.is_file() {
        return Err(invalid(format!("Input {} is not a file", path.display())));
    }
    if metadata.len() == 0 {
        return Err(invalid(format!("Input {} is empty", path.display())));
    }
    Ok(())
}

fn invalid(reason: impl Into<String>) -> TranscodeError {
    TranscodeError::Validation {
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::NamedTempFile;

    use super::*;

    fn non_empty_input() -> NamedTempFile {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), b"data").unwrap();
        file
    }

    fn as_map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_map_parsing_applies_defaults() {
        let map = as_map(json!({
            "inputPath": "/tmp/in.mp4",
            "outputPath": "/tmp/out.mp4",
        }));
        let request = TranscodeRequest::from_map(&map).unwrap();

        assert_eq!(request.width, 1280);
        assert_eq!(request.height, 720);
        assert_eq!(request.bitrate, 4_000_000);
        assert_eq!(request.fps, 30);
        assert_eq!(request.codec, VideoCodec::H264);
        assert_eq!(request.resolution, None);
        assert!(!request.hdr);
    }

    #[test]
    fn test_map_parsing_reads_every_key() {
        let map = as_map(json!({
            "inputPath": "/tmp/in.mp4",
            "outputPath": "/tmp/out.mp4",
            "width": 640,
            "height": 360,
            "resolution": 1080,
            "bitrate": 2_500_000,
            "fps": 24,
            "codec": "h265",
            "hdr": true,
            "crop": {"x": 0, "y": 10, "width": 320, "height": 180},
        }));
        let request = TranscodeRequest::from_map(&map).unwrap();

        assert_eq!(request.resolution, Some(ResolutionClass::P1080));
        assert_eq!(request.codec, VideoCodec::Hevc);
        assert_eq!(request.crop, Some(CropRect::new(0, 10, 320, 180)));
        assert!(request.hdr);
        assert_eq!((request.width, request.height), (640, 360));
    }

    #[test]
    fn test_resolution_accepts_custom_and_null() {
        let custom = as_map(json!({
            "inputPath": "a", "outputPath": "b", "resolution": "custom"
        }));
        assert_eq!(
            TranscodeRequest::from_map(&custom).unwrap().resolution,
            Some(ResolutionClass::Custom)
        );

        let null = as_map(json!({ "inputPath": "a", "outputPath": "b", "resolution": null }));
        assert_eq!(TranscodeRequest::from_map(&null).unwrap().resolution, None);

        let unknown = as_map(json!({ "inputPath": "a", "outputPath": "b", "resolution": 360 }));
        assert!(matches!(
            TranscodeRequest::from_map(&unknown),
            Err(TranscodeError::Validation { .. })
        ));
    }

    #[test]
    fn test_missing_input_path_is_rejected() {
        let map = as_map(json!({ "outputPath": "/tmp/out.mp4" }));
        assert!(matches!(
            TranscodeRequest::from_map(&map),
            Err(TranscodeError::Validation { .. })
        ));
    }

    #[test]
    fn test_validation_rejects_bad_parameters() {
        let input = non_empty_input();
        let base = TranscodeRequest::new(input.path(), "/tmp/out.mp4");
        assert!(base.validate().is_ok());

        assert!(base.clone().with_size(1281, 720).validate().is_err());
        assert!(base.clone().with_size(0, 720).validate().is_err());
        assert!(base.clone().with_bitrate(0).validate().is_err());
        assert!(base.clone().with_fps(0).validate().is_err());
        assert!(
            base.clone()
                .with_crop(CropRect::new(0, 0, 0, 10))
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_validation_rejects_empty_and_missing_input() {
        let empty = NamedTempFile::new().unwrap();
        let request = TranscodeRequest::new(empty.path(), "/tmp/out.mp4");
        assert!(matches!(
            request.validate(),
            Err(TranscodeError::Validation { .. })
        ));

        let missing = TranscodeRequest::new("/nonexistent/recast/input.mp4", "/tmp/out.mp4");
        assert!(missing.validate().is_err());

        let directory = tempfile::tempdir().unwrap();
        let request = TranscodeRequest::new(directory.path(), "/tmp/out.mp4");
        assert!(request.validate().is_err());
    }
}
