//! Compressed audio passthrough into a started muxer.

use tracing::{debug, trace, warn};

use super::tracks::TrackDescriptor;
use crate::codec::{BufferInfo, Extractor, Muxer, SampleFlags};

/// What the copier managed to write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AudioCopyReport {
    pub samples_written: u64,
    /// Samples dropped for negative or missing timestamps
    pub samples_skipped: u64,
    pub bytes_written: u64,
    /// The copy stopped early on a read or write failure
    pub aborted: bool,
}

/// Copies audio samples unmodified from a dedicated extractor.
pub struct AudioPassthrough {
    buffer: Vec<u8>,
}

impl AudioPassthrough {
    pub fn new(buffer_size: usize) -> Self {
        Self {
            buffer: vec![0; buffer_size.max(1)],
        }
    }

    /// Copies every sample of `track` into `muxer_track`.
    ///
    /// Failures are logged and end the copy; whatever was written stays in
    /// the output. The extractor is always released.
    pub fn copy(
        &mut self,
        mut extractor: Box<dyn Extractor>,
        track: &TrackDescriptor,
        muxer: &mut dyn Muxer,
        muxer_track: usize,
    ) -> AudioCopyReport {
        let report = self.copy_samples(extractor.as_mut(), track, muxer, muxer_track);

        if let Err(e) = extractor.release() {
            warn!("Releasing audio extractor failed: {e}");
        }

        debug!(
            "Audio copy finished: {} samples, {} bytes, {} skipped{}",
            report.samples_written,
            report.bytes_written,
            report.samples_skipped,
            if report.aborted { ", aborted" } else { "" }
        );
        report
    }

    fn copy_samples(
        &mut self,
        extractor: &mut dyn Extractor,
        track: &TrackDescriptor,
        muxer: &mut dyn Muxer,
        muxer_track: usize,
    ) -> AudioCopyReport {
        let mut report = AudioCopyReport::default();

        if let Err(e) = extractor.select_track(track.index) {
            warn!("Selecting audio track {} failed: {e}", track.index);
            report.aborted = true;
            return report;
        }

        loop {
            let size = match extractor.read_sample_data(&mut self.buffer) {
                Ok(Some(size)) => size,
                Ok(None) => break,
                Err(e) => {
                    warn!("Reading audio sample failed, keeping partial audio: {e}");
                    report.aborted = true;
                    break;
                }
            };

            match extractor.sample_time() {
                Some(pts) if pts >= 0 => {
                    let flags = if extractor.sample_flags().is_key_frame() {
                        SampleFlags::KEY_FRAME
                    } else {
                        SampleFlags::NONE
                    };
                    let info = BufferInfo::new(0, size, pts, flags);

                    if let Err(e) =
                        muxer.write_sample_data(muxer_track, &self.buffer[..size], &info)
                    {
                        warn!(
                            "Writing audio sample at {pts} us failed, keeping partial audio: {e}"
                        );
                        report.aborted = true;
                        break;
                    }
                    trace!("Copied {size} audio bytes at {pts} us");
                    report.samples_written += 1;
                    report.bytes_written += size as u64;
                }
                Some(pts) => {
                    debug!("Skipping audio sample with negative timestamp {pts} us");
                    report.samples_skipped += 1;
                }
                None => {
                    debug!("Skipping audio sample without a timestamp");
                    report.samples_skipped += 1;
                }
            }

            if !extractor.advance() {
                break;
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::codec::test_mocks::{MockExtractor, MockLog, MockMuxer, MockSample};
    use crate::codec::{MIME_AAC, MIME_AVC, MediaFormat};

    fn tracks() -> Vec<MediaFormat> {
        vec![
            MediaFormat::video(MIME_AVC, 1280, 720),
            MediaFormat::audio(MIME_AAC, 44_100, 2),
        ]
    }

    fn audio_track() -> TrackDescriptor {
        TrackDescriptor::from_format(1, MediaFormat::audio(MIME_AAC, 44_100, 2))
    }

    fn extractor(samples: Vec<MockSample>, log: &Arc<MockLog>) -> Box<dyn Extractor> {
        Box::new(MockExtractor::new(tracks(), samples, log.clone()))
    }

    #[test]
    fn test_copies_only_audio_samples_with_flags() {
        let log = MockLog::new();
        let samples = vec![
            MockSample::new(0, 0, 500),
            MockSample::new(1, 0, 200).key_frame(),
            MockSample::new(0, 33_333, 500),
            MockSample::new(1, 23_219, 210),
        ];
        let mut muxer = MockMuxer::new(log.clone());

        let report = AudioPassthrough::new(65536).copy(
            extractor(samples, &log),
            &audio_track(),
            &mut muxer,
            1,
        );

        assert_eq!(report.samples_written, 2);
        assert_eq!(report.bytes_written, 410);
        assert!(!report.aborted);

        let written = log.written();
        assert_eq!(written.len(), 2);
        assert!(written.iter().all(|(track, _)| *track == 1));
        assert!(written[0].1.flags.is_key_frame());
        assert_eq!(written[1].1.presentation_time_us, 23_219);
        assert_eq!(log.count("extractor.release"), 1);
    }

    #[test]
    fn test_negative_timestamps_are_skipped() {
        let log = MockLog::new();
        let samples = vec![
            MockSample::new(1, -21_333, 100),
            MockSample::new(1, 0, 100),
        ];
        let mut muxer = MockMuxer::new(log.clone());

        let report =
            AudioPassthrough::new(1024).copy(extractor(samples, &log), &audio_track(), &mut muxer, 1);

        assert_eq!(report.samples_skipped, 1);
        assert_eq!(report.samples_written, 1);
    }

    #[test]
    fn test_samples_without_timestamp_are_skipped() {
        let log = MockLog::new();
        let samples = vec![
            MockSample::new(1, 0, 100).untimed(),
            MockSample::new(1, 0, 100).untimed(),
            MockSample::new(1, 46_438, 120),
        ];
        let mut muxer = MockMuxer::new(log.clone());

        let report =
            AudioPassthrough::new(1024).copy(extractor(samples, &log), &audio_track(), &mut muxer, 1);

        assert_eq!(report.samples_skipped, 2);
        assert_eq!(report.samples_written, 1);
        assert!(!report.aborted);
        let written = log.written();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].1.presentation_time_us, 46_438);
    }

    #[test]
    fn test_write_failure_keeps_partial_audio() {
        let log = MockLog::new();
        let samples = (0..10)
            .map(|i| MockSample::new(1, i * 23_219, 100))
            .collect();
        let mut muxer = MockMuxer::new(log.clone()).failing_writes_after(4);

        let report =
            AudioPassthrough::new(1024).copy(extractor(samples, &log), &audio_track(), &mut muxer, 1);

        assert_eq!(report.samples_written, 4);
        assert!(report.aborted);
        assert_eq!(log.count("extractor.release"), 1);
    }

    #[test]
    fn test_oversized_sample_aborts_copy() {
        let log = MockLog::new();
        let samples = vec![MockSample::new(1, 0, 64), MockSample::new(1, 1_000, 4096)];
        let mut muxer = MockMuxer::new(log.clone());

        let report =
            AudioPassthrough::new(128).copy(extractor(samples, &log), &audio_track(), &mut muxer, 1);

        assert_eq!(report.samples_written, 1);
        assert!(report.aborted);
        assert_eq!(log.count("extractor.release"), 1);
    }
}
