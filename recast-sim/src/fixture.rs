//! Builder for simulated input media.

use std::path::Path;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use recast_core::codec::{MIME_AAC, MIME_AVC, MediaFormat, SampleFlags};

use crate::SimulationError;
use crate::container::{SimContainer, SimSample, SimTrack};

/// AAC frames always carry this many PCM samples per channel.
pub const AAC_FRAME_SAMPLES: u64 = 1024;

/// Describes a clip to write as a simulated container.
#[derive(Debug, Clone)]
pub struct MediaFixture {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    pub duration_secs: u32,
    pub rotation_degrees: u32,
    pub video_mime: String,
    /// Audio sample rate, `None` for a silent clip
    pub audio_sample_rate: Option<u32>,
    pub audio_channels: u32,
    pub seed: u64,
}

impl Default for MediaFixture {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            frame_rate: 30,
            duration_secs: 10,
            rotation_degrees: 0,
            video_mime: MIME_AVC.to_string(),
            audio_sample_rate: Some(44_100),
            audio_channels: 2,
            seed: 42,
        }
    }
}

impl MediaFixture {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ..Default::default()
        }
    }

    pub fn frame_rate(mut self, frame_rate: u32) -> Self {
        self.frame_rate = frame_rate;
        self
    }

    pub fn duration_secs(mut self, duration_secs: u32) -> Self {
        self.duration_secs = duration_secs;
        self
    }

    pub fn rotation(mut self, degrees: u32) -> Self {
        self.rotation_degrees = degrees;
        self
    }

    pub fn without_audio(mut self) -> Self {
        self.audio_sample_rate = None;
        self
    }

    pub fn video_mime(mut self, mime: &str) -> Self {
        self.video_mime = mime.to_string();
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn duration_us(&self) -> i64 {
        i64::from(self.duration_secs) * 1_000_000
    }

    /// Builds the container in memory.
    pub fn build(&self) -> SimContainer {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let mut tracks = vec![self.video_track(&mut rng)];
        if let Some(sample_rate) = self.audio_sample_rate {
            tracks.push(self.audio_track(sample_rate, &mut rng));
        }
        SimContainer {
            tracks,
            ..Default::default()
        }
    }

    /// Writes the container to `path`.
    ///
    /// # Errors
    /// - `SimulationError::Io` - File cannot be written
    pub fn write(&self, path: &Path) -> Result<SimContainer, SimulationError> {
        let container = self.build();
        container.write(path)?;
        Ok(container)
    }

    fn video_track(&self, rng: &mut ChaCha8Rng) -> SimTrack {
        let fps = self.frame_rate.max(1);
        let frames = u64::from(self.duration_secs) * u64::from(fps);

        let samples: Vec<SimSample> = (0..frames)
            .map(|frame| {
                let key = frame % u64::from(fps) == 0;
                SimSample {
                    presentation_time_us: (frame * 1_000_000 / u64::from(fps)) as i64,
                    flags: if key {
                        SampleFlags::KEY_FRAME
                    } else {
                        SampleFlags::NONE
                    },
                    size: if key {
                        rng.random_range(2_000..4_000)
                    } else {
                        rng.random_range(200..1_200)
                    },
                    content: rng.random(),
                }
            })
            .collect();

        let mut format = MediaFormat::video(self.video_mime.clone(), self.width, self.height)
            .with_duration_us(self.duration_us())
            .with_frame_rate(fps)
            .with_rotation(self.rotation_degrees);
        format.max_input_size = samples.iter().map(|s| s.size).max();

        SimTrack { format, samples }
    }

    fn audio_track(&self, sample_rate: u32, rng: &mut ChaCha8Rng) -> SimTrack {
        let total_pcm = u64::from(self.duration_secs) * u64::from(sample_rate);
        let frames = total_pcm.div_ceil(AAC_FRAME_SAMPLES);

        let samples: Vec<SimSample> = (0..frames)
            .map(|frame| SimSample {
                presentation_time_us: (frame * AAC_FRAME_SAMPLES * 1_000_000
                    / u64::from(sample_rate)) as i64,
                flags: SampleFlags::KEY_FRAME,
                size: rng.random_range(180..420),
                content: rng.random(),
            })
            .collect();

        let mut format = MediaFormat::audio(MIME_AAC, sample_rate, self.audio_channels)
            .with_duration_us(self.duration_us());
        format.max_input_size = samples.iter().map(|s| s.size).max();

        SimTrack { format, samples }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_fixture_layout() {
        let container = MediaFixture::default().build();

        let video = container.video_track().unwrap();
        assert_eq!(video.samples.len(), 300);
        assert_eq!(video.format.width, Some(1920));
        assert_eq!(video.format.duration_us, Some(10_000_000));
        assert!(video.samples[0].flags.is_key_frame());
        assert!(!video.samples[1].flags.is_key_frame());
        assert_eq!(video.samples[30].presentation_time_us, 1_000_000);

        let audio = container.audio_track().unwrap();
        assert_eq!(audio.samples.len(), 431);
        assert_eq!(audio.samples[1].presentation_time_us, 23_219);
    }

    #[test]
    fn test_same_seed_same_clip() {
        let a = MediaFixture::new(640, 360).duration_secs(1).build();
        let b = MediaFixture::new(640, 360).duration_secs(1).build();
        let c = MediaFixture::new(640, 360).duration_secs(1).seed(7).build();

        assert_eq!(a.tracks[0].samples, b.tracks[0].samples);
        assert_ne!(a.tracks[0].samples, c.tracks[0].samples);
    }

    #[test]
    fn test_silent_rotated_clip() {
        let container = MediaFixture::new(1080, 1920)
            .rotation(90)
            .without_audio()
            .build();
        assert!(container.audio_track().is_none());
        assert_eq!(
            container.video_track().unwrap().format.rotation_degrees,
            Some(90)
        );
    }
}
