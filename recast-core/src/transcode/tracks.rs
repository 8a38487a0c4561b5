//! Track discovery on an opened input container.

use super::dimensions::Dimensions;
use super::error::TranscodeError;
use crate::codec::{Extractor, MediaFormat};

/// Metadata of one input track.
#[derive(Debug, Clone)]
pub struct TrackDescriptor {
    pub index: usize,
    pub mime: String,
    /// Microseconds, 0 when the container does not say
    pub duration_us: i64,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub rotation_degrees: u32,
    pub sample_rate: Option<u32>,
    pub channel_count: Option<u32>,
    /// Full format, handed to decoders and to the muxer
    pub format: MediaFormat,
}

impl TrackDescriptor {
    pub fn from_format(index: usize, format: MediaFormat) -> Self {
        Self {
            index,
            mime: format.mime.clone(),
            duration_us: format.duration_us.unwrap_or(0),
            width: format.width,
            height: format.height,
            rotation_degrees: format.rotation_degrees.unwrap_or(0),
            sample_rate: format.sample_rate,
            channel_count: format.channel_count,
            format,
        }
    }

    /// Coded picture size, video tracks only.
    pub fn dimensions(&self) -> Option<Dimensions> {
        match (self.width, self.height) {
            (Some(width), Some(height)) => Some(Dimensions::new(width, height)),
            _ => None,
        }
    }
}

/// The tracks one pipeline works on.
#[derive(Debug, Clone)]
pub struct SelectedTracks {
    pub video: TrackDescriptor,
    pub audio: Option<TrackDescriptor>,
}

/// Finds the first video track and the first audio track.
///
/// # Errors
/// - `TranscodeError::NoVideoTrack` - No track has a `video/` mime type
/// - `TranscodeError::Codec` - A track format could not be read
pub fn select_tracks(extractor: &dyn Extractor) -> Result<SelectedTracks, TranscodeError> {
    let mut video = None;
    let mut audio = None;

    for index in 0..extractor.track_count() {
        let format = extractor.track_format(index)?;
        if video.is_none() && format.is_video() {
            video = Some(TrackDescriptor::from_format(index, format));
        } else if audio.is_none() && format.is_audio() {
            audio = Some(TrackDescriptor::from_format(index, format));
        }
    }

    let video = video.ok_or(TranscodeError::NoVideoTrack)?;
    Ok(SelectedTracks { video, audio })
}

/// First audio track, if the container has one.
///
/// # Errors
/// - `TranscodeError::Codec` - A track format could not be read
pub fn find_audio_track(
    extractor: &dyn Extractor,
) -> Result<Option<TrackDescriptor>, TranscodeError> {
    for index in 0..extractor.track_count() {
        let format = extractor.track_format(index)?;
        if format.is_audio() {
            return Ok(Some(TrackDescriptor::from_format(index, format)));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::test_mocks::{MockExtractor, MockLog};
    use crate::codec::{MIME_AAC, MIME_AVC};

    fn extractor(tracks: Vec<MediaFormat>) -> MockExtractor {
        MockExtractor::new(tracks, Vec::new(), MockLog::new())
    }

    #[test]
    fn test_first_video_and_audio_tracks_win() {
        let extractor = extractor(vec![
            MediaFormat::audio(MIME_AAC, 48_000, 2),
            MediaFormat::video(MIME_AVC, 1920, 1080)
                .with_duration_us(10_000_000)
                .with_rotation(90),
            MediaFormat::video(MIME_AVC, 640, 360),
            MediaFormat::audio(MIME_AAC, 44_100, 1),
        ]);

        let tracks = select_tracks(&extractor).unwrap();
        assert_eq!(tracks.video.index, 1);
        assert_eq!(tracks.video.duration_us, 10_000_000);
        assert_eq!(tracks.video.rotation_degrees, 90);
        assert_eq!(tracks.video.dimensions(), Some(Dimensions::new(1920, 1080)));

        let audio = tracks.audio.unwrap();
        assert_eq!(audio.index, 0);
        assert_eq!(audio.sample_rate, Some(48_000));
    }

    #[test]
    fn test_missing_video_track_is_fatal() {
        let extractor = extractor(vec![MediaFormat::audio(MIME_AAC, 44_100, 2)]);
        assert!(matches!(
            select_tracks(&extractor),
            Err(TranscodeError::NoVideoTrack)
        ));
        assert_eq!(find_audio_track(&extractor).unwrap().unwrap().index, 0);
    }

    #[test]
    fn test_audio_is_optional() {
        let extractor = extractor(vec![MediaFormat::video(MIME_AVC, 1280, 720)]);
        assert!(select_tracks(&extractor).unwrap().audio.is_none());
        assert!(find_audio_track(&extractor).unwrap().is_none());
    }
}
