//! MP4 writer over `format::output_as`

use std::path::{Path, PathBuf};

use ffmpeg_next as ffmpeg;
use ffmpeg::{Dictionary, Packet, Rational, codec, encoder};
use tracing::{debug, trace};

use super::{MICROS, Owned, StreamParameters, platform_error};
use crate::codec::{BufferInfo, CodecError, CodecResult, CodecState, MediaFormat, Muxer};

pub struct FfmpegMuxer {
    path: PathBuf,
    output: Option<Owned<ffmpeg::format::context::Output>>,
    state: CodecState,
    track_count: usize,
    video_tracks: Vec<usize>,
    orientation: u32,
    /// Stream time bases, known once the header is written
    time_bases: Vec<Rational>,
}

impl FfmpegMuxer {
    /// Creates the output file as an MP4 container.
    ///
    /// # Errors
    /// - `CodecError::Io` - Output cannot be created
    /// - `CodecError::Container` - FFmpeg has no MP4 muxer
    pub fn create(path: &Path) -> CodecResult<Self> {
        std::fs::File::create(path)?;
        let output =
            ffmpeg::format::output_as(&path, "mp4").map_err(|e| CodecError::Container {
                reason: format!("{}: {e}", path.display()),
            })?;
        Ok(Self {
            path: path.to_path_buf(),
            output: Some(Owned(output)),
            state: CodecState::Configured,
            track_count: 0,
            video_tracks: Vec::new(),
            orientation: 0,
            time_bases: Vec::new(),
        })
    }

    fn illegal(&self, operation: &'static str) -> CodecError {
        CodecError::IllegalState {
            operation,
            state: self.state,
        }
    }

    fn output_mut(
        &mut self,
        operation: &'static str,
    ) -> CodecResult<&mut ffmpeg::format::context::Output> {
        let state = self.state;
        self.output
            .as_deref_mut()
            .ok_or(CodecError::IllegalState { operation, state })
    }
}

impl Muxer for FfmpegMuxer {
    fn add_track(&mut self, format: &MediaFormat) -> CodecResult<usize> {
        if self.state != CodecState::Configured {
            return Err(self.illegal("add_track"));
        }
        let Some(parameters) = format
            .native
            .as_ref()
            .and_then(|native| native.downcast_ref::<StreamParameters>())
        else {
            return Err(CodecError::Configuration {
                reason: format!("{} track carries no FFmpeg stream parameters", format.mime),
            });
        };
        let parameters = parameters.get();
        let is_video = format.is_video();

        let output = self.output_mut("add_track")?;
        let mut stream = output
            .add_stream(encoder::find(codec::Id::None))
            .map_err(|e| platform_error("adding output stream", e))?;
        stream.set_parameters(parameters);
        // SAFETY: the stream was just added and is exclusively borrowed.
        unsafe {
            (*stream.parameters().as_mut_ptr()).codec_tag = 0;
        }
        let index = stream.index();

        self.track_count += 1;
        if is_video {
            self.video_tracks.push(index);
        }
        debug!("Added {} track {index} to {}", format.mime, self.path.display());
        Ok(index)
    }

    fn set_orientation_hint(&mut self, degrees: u32) -> CodecResult<()> {
        if degrees % 90 != 0 {
            return Err(CodecError::Configuration {
                reason: format!("orientation hint {degrees} is not a multiple of 90"),
            });
        }
        if self.state != CodecState::Configured {
            return Err(self.illegal("set_orientation_hint"));
        }
        self.orientation = degrees % 360;
        Ok(())
    }

    fn start(&mut self) -> CodecResult<()> {
        if self.state != CodecState::Configured || self.track_count == 0 {
            return Err(self.illegal("start"));
        }
        let orientation = self.orientation;
        let video_tracks = self.video_tracks.clone();
        let output = self.output_mut("start")?;

        if orientation != 0 {
            for index in video_tracks {
                if let Some(mut stream) = output.stream_mut(index) {
                    let mut metadata = Dictionary::new();
                    metadata.set("rotate", &orientation.to_string());
                    stream.set_metadata(metadata);
                }
            }
        }

        output
            .write_header()
            .map_err(|e| platform_error("writing container header", e))?;
        let time_bases = output.streams().map(|stream| stream.time_base()).collect();

        self.time_bases = time_bases;
        self.state = CodecState::Started;
        debug!("Muxer started for {}", self.path.display());
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
        let Some(time_base) = self.time_bases.get(track).copied() else {
            return Err(CodecError::Container {
                reason: format!("no track {track}"),
            });
        };
        let payload = data
            .get(info.offset..info.offset.saturating_add(info.size))
            .ok_or(CodecError::BufferTooSmall {
                needed: info.offset.saturating_add(info.size),
                available: data.len(),
            })?;

        let mut packet = Packet::copy(payload);
        packet.set_stream(track);
        packet.set_pts(Some(info.presentation_time_us));
        packet.set_dts(Some(info.presentation_time_us));
        if info.flags.is_key_frame() {
            packet.set_flags(codec::packet::Flags::KEY);
        }
        packet.rescale_ts(MICROS, time_base);

        let output = self.output_mut("write_sample_data")?;
        packet
            .write_interleaved(output)
            .map_err(|e| CodecError::Container {
                reason: format!("writing sample on track {track}: {e}"),
            })?;
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
        self.output_mut("stop")?
            .write_trailer()
            .map_err(|e| CodecError::Io(std::io::Error::other(e.to_string())))?;
        self.state = CodecState::Stopped;
        debug!("Container finalized at {}", self.path.display());
        Ok(())
    }

    fn release(&mut self) -> CodecResult<()> {
        self.output = None;
        self.state = CodecState::Released;
        Ok(())
    }
}
