//! Sample cursor over a simulated container.

use std::path::Path;

use recast_core::codec::{CodecError, CodecResult, Extractor, MediaFormat, SampleFlags};
use tracing::debug;

use crate::container::{SimContainer, SimSample};

/// Walks the selected tracks of a `SimContainer` in presentation order.
pub struct SimExtractor {
    container: SimContainer,
    selected: Vec<usize>,
    /// (track, sample) pairs of the selected tracks ordered by time
    order: Vec<(usize, usize)>,
    cursor: usize,
    released: bool,
}

impl SimExtractor {
    /// Opens and validates `path`.
    ///
    /// # Errors
    /// - `CodecError::Io` - File cannot be opened
    /// - `CodecError::Container` - File is empty, not a container, or has no tracks
    pub fn open(path: &Path) -> CodecResult<Self> {
        let container = SimContainer::read(path)?;
        if container.tracks.is_empty() {
            return Err(CodecError::Container {
                reason: format!("{} has no tracks", path.display()),
            });
        }
        debug!(
            "Opened simulated container {} with {} tracks",
            path.display(),
            container.tracks.len()
        );
        Ok(Self::from_container(container))
    }

    pub fn from_container(container: SimContainer) -> Self {
        Self {
            container,
            selected: Vec::new(),
            order: Vec::new(),
            cursor: 0,
            released: false,
        }
    }

    fn rebuild_order(&mut self) {
        let tracks = &self.container.tracks;
        let mut order: Vec<(usize, usize)> = self
            .selected
            .iter()
            .flat_map(|&track| (0..tracks[track].samples.len()).map(move |s| (track, s)))
            .collect();
        order.sort_by_key(|&(track, sample)| {
            (tracks[track].samples[sample].presentation_time_us, track)
        });
        self.order = order;
        self.cursor = 0;
    }

    fn current(&self) -> Option<(usize, &SimSample)> {
        if self.released {
            return None;
        }
        let &(track, sample) = self.order.get(self.cursor)?;
        Some((track, &self.container.tracks[track].samples[sample]))
    }
}

impl Extractor for SimExtractor {
    fn track_count(&self) -> usize {
        self.container.tracks.len()
    }

    fn track_format(&self, index: usize) -> CodecResult<MediaFormat> {
        self.container
            .tracks
            .get(index)
            .map(|track| track.format.clone())
            .ok_or_else(|| CodecError::Container {
                reason: format!("track {index} out of range"),
            })
    }

    fn select_track(&mut self, index: usize) -> CodecResult<()> {
        if index >= self.container.tracks.len() {
            return Err(CodecError::Container {
                reason: format!("cannot select track {index}"),
            });
        }
        if !self.selected.contains(&index) {
            self.selected.push(index);
            self.rebuild_order();
        }
        Ok(())
    }

    fn read_sample_data(&mut self, buffer: &mut [u8]) -> CodecResult<Option<usize>> {
        let Some((_, sample)) = self.current() else {
            return Ok(None);
        };
        if sample.size > buffer.len() {
            return Err(CodecError::BufferTooSmall {
                needed: sample.size,
                available: buffer.len(),
            });
        }
        sample.fill_payload(buffer);
        Ok(Some(sample.size))
    }

    fn sample_time(&self) -> Option<i64> {
        self.current().map(|(_, sample)| sample.presentation_time_us)
    }

    fn sample_track_index(&self) -> Option<usize> {
        self.current().map(|(track, _)| track)
    }

    fn sample_flags(&self) -> SampleFlags {
        self.current()
            .map(|(_, sample)| sample.flags)
            .unwrap_or(SampleFlags::NONE)
    }

    fn advance(&mut self) -> bool {
        if self.cursor < self.order.len() {
            self.cursor += 1;
        }
        self.current().is_some()
    }

    fn release(&mut self) -> CodecResult<()> {
        self.released = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::MediaFixture;

    #[test]
    fn test_selected_tracks_interleave_by_time() {
        let container = MediaFixture::new(640, 360).duration_secs(1).build();
        let video_samples = container.tracks[0].samples.len();
        let audio_samples = container.tracks[1].samples.len();
        let mut extractor = SimExtractor::from_container(container);

        extractor.select_track(0).unwrap();
        extractor.select_track(1).unwrap();

        let mut buffer = vec![0u8; 8192];
        let mut last_pts = i64::MIN;
        let mut counts = [0usize; 2];
        while let Some(size) = extractor.read_sample_data(&mut buffer).unwrap() {
            let pts = extractor.sample_time().unwrap();
            assert!(pts >= last_pts);
            assert!(size > 0);
            last_pts = pts;
            counts[extractor.sample_track_index().unwrap()] += 1;
            extractor.advance();
        }
        assert_eq!(counts, [video_samples, audio_samples]);
    }

    #[test]
    fn test_unselected_tracks_are_skipped() {
        let container = MediaFixture::new(640, 360).duration_secs(1).build();
        let mut extractor = SimExtractor::from_container(container);

        assert_eq!(extractor.sample_time(), None);
        extractor.select_track(1).unwrap();
        assert_eq!(extractor.sample_track_index(), Some(1));
        assert!(extractor.sample_flags().is_key_frame());
    }

    #[test]
    fn test_small_buffer_is_reported() {
        let container = MediaFixture::new(640, 360).duration_secs(1).build();
        let mut extractor = SimExtractor::from_container(container);
        extractor.select_track(0).unwrap();

        let mut buffer = [0u8; 4];
        assert!(matches!(
            extractor.read_sample_data(&mut buffer),
            Err(CodecError::BufferTooSmall { available: 4, .. })
        ));
    }

    #[test]
    fn test_open_rejects_empty_files() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(matches!(
            SimExtractor::open(file.path()),
            Err(CodecError::Container { .. })
        ));
        assert!(matches!(
            SimExtractor::open(Path::new("/nonexistent/recast/clip.json")),
            Err(CodecError::Io(_))
        ));
    }
}
