//! On-disk format of simulated media files.
//!
//! A simulated container is JSON: track formats plus per-sample metadata.
//! Sample bytes are not stored. Input samples are generated from their
//! `content` key when read, and samples written by the muxer record a hash of
//! the bytes they carried.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use recast_core::codec::{MediaFormat, SampleFlags};
use serde::{Deserialize, Serialize};

use crate::SimulationError;

/// Magic string identifying simulated containers.
pub const SIM_CONTAINER_MAGIC: &str = "recast-sim/1";

/// One sample of a simulated track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimSample {
    pub presentation_time_us: i64,
    pub flags: SampleFlags,
    pub size: usize,
    /// Payload seed for inputs, payload hash for muxer output
    pub content: u64,
}

impl SimSample {
    /// Deterministic payload bytes for an input sample.
    pub fn fill_payload(&self, buffer: &mut [u8]) {
        let mut rng = ChaCha8Rng::seed_from_u64(self.content);
        let len = self.size.min(buffer.len());
        rng.fill_bytes(&mut buffer[..len]);
    }

    pub fn payload(&self) -> Vec<u8> {
        let mut payload = vec![0; self.size];
        self.fill_payload(&mut payload);
        payload
    }
}

/// FNV-1a hash used as the content key of written samples.
pub fn content_hash(data: &[u8]) -> u64 {
    data.iter().fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(0x0100_0000_01b3)
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimTrack {
    pub format: MediaFormat,
    pub samples: Vec<SimSample>,
}

impl SimTrack {
    pub fn new(format: MediaFormat) -> Self {
        Self {
            format,
            samples: Vec::new(),
        }
    }

    pub fn total_bytes(&self) -> usize {
        self.samples.iter().map(|s| s.size).sum()
    }
}

/// Whole simulated media file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimContainer {
    pub magic: String,
    pub tracks: Vec<SimTrack>,
    /// Display rotation in degrees recorded by the muxer
    #[serde(default)]
    pub orientation_hint: u32,
}

impl Default for SimContainer {
    fn default() -> Self {
        Self {
            magic: SIM_CONTAINER_MAGIC.to_string(),
            tracks: Vec::new(),
            orientation_hint: 0,
        }
    }
}

impl SimContainer {
    /// # Errors
    /// - `SimulationError::Io` - File cannot be read
    /// - `SimulationError::InvalidContainer` - Not a simulated container
    pub fn read(path: &Path) -> Result<Self, SimulationError> {
        let file = File::open(path)?;
        let container: SimContainer = serde_json::from_reader(BufReader::new(file)).map_err(
            |e| SimulationError::InvalidContainer {
                reason: format!("{}: {e}", path.display()),
            },
        )?;
        if container.magic != SIM_CONTAINER_MAGIC {
            return Err(SimulationError::InvalidContainer {
                reason: format!("{}: unexpected magic {}", path.display(), container.magic),
            });
        }
        Ok(container)
    }

    /// # Errors
    /// - `SimulationError::Io` - File cannot be written
    pub fn write(&self, path: &Path) -> Result<(), SimulationError> {
        let file = File::create(path)?;
        serde_json::to_writer(BufWriter::new(file), self).map_err(|e| {
            SimulationError::InvalidContainer {
                reason: format!("serializing {}: {e}", path.display()),
            }
        })
    }

    pub fn video_track(&self) -> Option<&SimTrack> {
        self.tracks.iter().find(|t| t.format.is_video())
    }

    pub fn audio_track(&self) -> Option<&SimTrack> {
        self.tracks.iter().find(|t| t.format.is_audio())
    }
}

#[cfg(test)]
mod tests {
    use recast_core::codec::MIME_AVC;

    use super::*;

    #[test]
    fn test_payload_is_deterministic() {
        let sample = SimSample {
            presentation_time_us: 0,
            flags: SampleFlags::KEY_FRAME,
            size: 64,
            content: 7,
        };
        assert_eq!(sample.payload(), sample.payload());
        assert_ne!(
            sample.payload(),
            SimSample {
                content: 8,
                ..sample
            }
            .payload()
        );
    }

    #[test]
    fn test_container_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.json");

        let mut track = SimTrack::new(MediaFormat::video(MIME_AVC, 640, 360));
        track.samples.push(SimSample {
            presentation_time_us: 0,
            flags: SampleFlags::KEY_FRAME,
            size: 100,
            content: 1,
        });
        let container = SimContainer {
            tracks: vec![track],
            orientation_hint: 90,
            ..Default::default()
        };
        container.write(&path).unwrap();

        let read = SimContainer::read(&path).unwrap();
        assert_eq!(read.orientation_hint, 90);
        assert_eq!(read.video_track().unwrap().total_bytes(), 100);
        assert!(read.audio_track().is_none());
    }

    #[test]
    fn test_empty_file_is_not_a_container() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(matches!(
            SimContainer::read(file.path()),
            Err(SimulationError::InvalidContainer { .. })
        ));
    }
}
