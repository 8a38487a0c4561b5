//! Output writer producing simulated containers.

use std::fs::File;
use std::path::{Path, PathBuf};

use recast_core::codec::{BufferInfo, CodecError, CodecResult, CodecState, MediaFormat, Muxer};
use tracing::{debug, trace};

use crate::container::{SimContainer, SimSample, SimTrack, content_hash};

/// Records written samples and serializes them as a `SimContainer` on stop.
pub struct SimMuxer {
    path: PathBuf,
    container: SimContainer,
    state: CodecState,
    /// Audio writes accepted before every further audio write fails
    audio_write_budget: Option<usize>,
    audio_writes: usize,
}

impl SimMuxer {
    /// Creates the output file, truncating any existing one.
    ///
    /// # Errors
    /// - `CodecError::Io` - Output cannot be created
    pub fn create(path: &Path, audio_write_budget: Option<usize>) -> CodecResult<Self> {
        File::create(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            container: SimContainer::default(),
            state: CodecState::Configured,
            audio_write_budget,
            audio_writes: 0,
        })
    }

    fn illegal(&self, operation: &'static str) -> CodecError {
        CodecError::IllegalState {
            operation,
            state: self.state,
        }
    }
}

impl Muxer for SimMuxer {
    fn add_track(&mut self, format: &MediaFormat) -> CodecResult<usize> {
        if self.state != CodecState::Configured {
            return Err(self.illegal("add_track"));
        }
        self.container.tracks.push(SimTrack::new(format.clone()));
        Ok(self.container.tracks.len() - 1)
    }

    fn set_orientation_hint(&mut self, degrees: u32) -> CodecResult<()> {
        if degrees % 90 != 0 {
            return Err(CodecError::Configuration {
                reason: format!("orientation hint {degrees} is not a multiple of 90"),
            });
        }
        self.container.orientation_hint = degrees % 360;
        Ok(())
    }

    fn start(&mut self) -> CodecResult<()> {
        if self.state != CodecState::Configured || self.container.tracks.is_empty() {
            return Err(self.illegal("start"));
        }
        self.state = CodecState::Started;
        debug!(
            "Simulated muxer started with {} tracks",
            self.container.tracks.len()
        );
        Ok(())
    }

    fn write_sample_data(
        &mut self,
        track: usize,
        data: &[u8],
        info: &BufferInfo,
    ) -> CodecResult<()> {
        if self.state != CodecState::Started {
            return Err(self.illegal("write_sample_data"));
        }
        let Some(target) = self.container.tracks.get_mut(track) else {
            return Err(CodecError::Container {
                reason: format!("no track {track}"),
            });
        };

        if target.format.is_audio() {
            if self
                .audio_write_budget
                .is_some_and(|budget| self.audio_writes >= budget)
            {
                return Err(CodecError::Container {
                    reason: format!("simulated audio write failure on track {track}"),
                });
            }
            self.audio_writes += 1;
        }

        let payload = data
            .get(info.offset..info.offset.saturating_add(info.size))
            .unwrap_or(data);
        target.samples.push(SimSample {
            presentation_time_us: info.presentation_time_us,
            flags: info.flags,
            size: payload.len(),
            content: content_hash(payload),
        });
        trace!(
            "Muxed {} bytes on track {track} at {} us",
            payload.len(),
            info.presentation_time_us
        );
        Ok(())
    }

    fn stop(&mut self) -> CodecResult<()> {
        if self.state != CodecState::Started {
            return Err(self.illegal("stop"));
        }
        self.container.write(&self.path)?;
        self.state = CodecState::Stopped;
        debug!("Simulated container written to {}", self.path.display());
        Ok(())
    }

    fn release(&mut self) -> CodecResult<()> {
        self.state = CodecState::Released;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use recast_core::codec::{MIME_AAC, MIME_AVC, SampleFlags};

    use super::*;

    #[test]
    fn test_written_container_matches_samples() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");

        let mut muxer = SimMuxer::create(&path, None).unwrap();
        let video = muxer
            .add_track(&MediaFormat::video(MIME_AVC, 854, 480))
            .unwrap();
        let audio = muxer
            .add_track(&MediaFormat::audio(MIME_AAC, 44_100, 2))
            .unwrap();
        muxer.set_orientation_hint(90).unwrap();
        muxer.start().unwrap();

        let data = [1u8, 2, 3, 4];
        muxer
            .write_sample_data(video, &data, &BufferInfo::new(0, 4, 0, SampleFlags::KEY_FRAME))
            .unwrap();
        muxer
            .write_sample_data(audio, &data, &BufferInfo::new(1, 2, 0, SampleFlags::NONE))
            .unwrap();
        muxer.stop().unwrap();
        muxer.release().unwrap();

        let written = SimContainer::read(&path).unwrap();
        assert_eq!(written.orientation_hint, 90);
        assert_eq!(written.tracks[0].samples[0].size, 4);
        assert_eq!(written.tracks[1].samples[0].size, 2);
        assert_eq!(written.tracks[1].samples[0].content, content_hash(&[2, 3]));
    }

    #[test]
    fn test_lifecycle_is_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let mut muxer = SimMuxer::create(&dir.path().join("out.json"), None).unwrap();

        assert!(muxer.start().is_err());
        assert!(muxer.stop().is_err());
        assert!(muxer.set_orientation_hint(45).is_err());

        muxer
            .add_track(&MediaFormat::video(MIME_AVC, 640, 480))
            .unwrap();
        muxer.start().unwrap();
        assert!(
            muxer
                .add_track(&MediaFormat::audio(MIME_AAC, 48_000, 2))
                .is_err()
        );
    }

    #[test]
    fn test_audio_write_budget() {
        let dir = tempfile::tempdir().unwrap();
        let mut muxer = SimMuxer::create(&dir.path().join("out.json"), Some(1)).unwrap();
        let video = muxer
            .add_track(&MediaFormat::video(MIME_AVC, 640, 480))
            .unwrap();
        let audio = muxer
            .add_track(&MediaFormat::audio(MIME_AAC, 48_000, 2))
            .unwrap();
        muxer.start().unwrap();

        let info = BufferInfo::new(0, 1, 0, SampleFlags::NONE);
        muxer.write_sample_data(audio, &[0], &info).unwrap();
        assert!(muxer.write_sample_data(audio, &[0], &info).is_err());
        muxer.write_sample_data(video, &[0], &info).unwrap();
    }
}
