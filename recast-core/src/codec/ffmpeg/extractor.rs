//! Sample cursor over `format::input`

use std::collections::BTreeSet;
use std::path::Path;

use ffmpeg_next as ffmpeg;
use ffmpeg::{Packet, Rational, Rescale, media};
use tracing::{debug, trace};

use super::{MICROS, Owned, StreamParameters, mime_for};
use crate::codec::{
    CodecError, CodecResult, Extractor, MediaFormat, NativeHandle, SampleFlags, yuv420_len,
};

/// Input slots must hold any compressed sample; bounded by one raw picture.
const MIN_MAX_INPUT_SIZE: usize = 1 << 20;

struct TrackInfo {
    format: MediaFormat,
    time_base: Rational,
}

pub struct FfmpegExtractor {
    input: Owned<ffmpeg::format::context::Input>,
    tracks: Vec<TrackInfo>,
    selected: BTreeSet<usize>,
    current: Option<Owned<Packet>>,
    started: bool,
}

impl FfmpegExtractor {
    /// Opens `path` and describes every stream.
    ///
    /// # Errors
    /// - `CodecError::Io` - The file does not exist
    /// - `CodecError::Container` - FFmpeg cannot demux it
    pub fn open(path: &Path) -> CodecResult<Self> {
        std::fs::metadata(path)?;
        let input = ffmpeg::format::input(&path).map_err(|e| CodecError::Container {
            reason: format!("{}: {e}", path.display()),
        })?;

        let tracks = input
            .streams()
            .map(|stream| TrackInfo {
                format: describe_stream(&stream),
                time_base: stream.time_base(),
            })
            .collect::<Vec<_>>();
        if tracks.is_empty() {
            return Err(CodecError::Container {
                reason: format!("{} has no streams", path.display()),
            });
        }

        debug!("Opened {} with {} streams", path.display(), tracks.len());
        Ok(Self {
            input: Owned(input),
            tracks,
            selected: BTreeSet::new(),
            current: None,
            started: false,
        })
    }

    /// Reads packets until one belongs to a selected track.
    fn load_next(&mut self) -> bool {
        loop {
            let mut packet = Packet::empty();
            match packet.read(&mut self.input) {
                Ok(()) if self.selected.contains(&packet.stream()) => {
                    self.current = Some(Owned(packet));
                    return true;
                }
                Ok(()) => continue,
                Err(ffmpeg::Error::Eof) => {
                    self.current = None;
                    return false;
                }
                Err(e) => {
                    debug!("Demuxing stopped: {e}");
                    self.current = None;
                    return false;
                }
            }
        }
    }
}

/// Translates stream parameters into a `MediaFormat`, keeping the raw
/// parameters for the decoder and muxer.
fn describe_stream(stream: &ffmpeg::format::stream::Stream) -> MediaFormat {
    let parameters = stream.parameters();
    let medium = parameters.medium();
    let mut format = MediaFormat {
        mime: mime_for(parameters.id(), medium),
        ..Default::default()
    };

    // SAFETY: reads plain fields of the stream's own codec parameters.
    let (width, height, sample_rate, channels) = unsafe {
        let raw = parameters.as_ptr();
        (
            (*raw).width,
            (*raw).height,
            (*raw).sample_rate,
            (*raw).ch_layout.nb_channels,
        )
    };

    match medium {
        media::Type::Video => {
            let width = u32::try_from(width).unwrap_or(0);
            let height = u32::try_from(height).unwrap_or(0);
            format.width = Some(width);
            format.height = Some(height);
            format.max_input_size = Some(yuv420_len(width, height).max(MIN_MAX_INPUT_SIZE));

            let rate = stream.avg_frame_rate();
            if rate.denominator() > 0 && rate.numerator() > 0 {
                format.frame_rate =
                    Some((f64::from(rate.numerator()) / f64::from(rate.denominator())).round() as u32);
            }
            format.rotation_degrees = stream
                .metadata()
                .get("rotate")
                .and_then(|value| value.parse::<i32>().ok())
                .map(|degrees| degrees.rem_euclid(360) as u32);
        }
        media::Type::Audio => {
            format.sample_rate = u32::try_from(sample_rate).ok();
            format.channel_count = u32::try_from(channels).ok();
            format.max_input_size = Some(MIN_MAX_INPUT_SIZE);
        }
        _ => {}
    }

    if stream.duration() > 0 {
        format.duration_us = Some(stream.duration().rescale(stream.time_base(), MICROS));
    }
    // Deep copy, detached from the input context
    format.native = Some(NativeHandle::new(StreamParameters::new(parameters.clone())));
    format
}

impl Extractor for FfmpegExtractor {
    fn track_count(&self) -> usize {
        self.tracks.len()
    }

    fn track_format(&self, index: usize) -> CodecResult<MediaFormat> {
        self.tracks
            .get(index)
            .map(|track| track.format.clone())
            .ok_or_else(|| CodecError::Container {
                reason: format!("Track {index} out of range"),
            })
    }

    fn select_track(&mut self, index: usize) -> CodecResult<()> {
        if index >= self.tracks.len() {
            return Err(CodecError::Container {
                reason: format!("Track {index} out of range"),
            });
        }
        self.selected.insert(index);
        if !self.started {
            self.started = true;
            self.load_next();
        }
        Ok(())
    }

    fn read_sample_data(&mut self, buffer: &mut [u8]) -> CodecResult<Option<usize>> {
        let Some(packet) = self.current.as_ref() else {
            return Ok(None);
        };
        let data = packet.data().unwrap_or_default();
        if data.len() > buffer.len() {
            return Err(CodecError::BufferTooSmall {
                needed: data.len(),
                available: buffer.len(),
            });
        }
        buffer[..data.len()].copy_from_slice(data);
        trace!("Read {} bytes from stream {}", data.len(), packet.stream());
        Ok(Some(data.len()))
    }

    fn sample_time(&self) -> Option<i64> {
        let packet = self.current.as_ref()?;
        let track = self.tracks.get(packet.stream())?;
        packet
            .pts()
            .or(packet.dts())
            .map(|pts| pts.rescale(track.time_base, MICROS))
    }

    fn sample_track_index(&self) -> Option<usize> {
        self.current.as_ref().map(|packet| packet.stream())
    }

    fn sample_flags(&self) -> SampleFlags {
        match self.current.as_ref() {
            Some(packet) if packet.is_key() => SampleFlags::KEY_FRAME,
            _ => SampleFlags::NONE,
        }
    }

    fn advance(&mut self) -> bool {
        self.current.is_some() && self.load_next()
    }

    fn release(&mut self) -> CodecResult<()> {
        self.current = None;
        self.selected.clear();
        Ok(())
    }
}

