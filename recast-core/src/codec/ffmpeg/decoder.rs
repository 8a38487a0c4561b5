//! Video decoder adapter over libavcodec's send/receive API

use std::collections::VecDeque;
use std::time::Duration;

use ffmpeg_next as ffmpeg;
use ffmpeg::format::Pixel;
use ffmpeg::util::frame::Video as VideoFrame;
use ffmpeg::{Packet, codec};
use tracing::{debug, trace};

use super::frames::{Converter, pack_yuv420};
use super::slots::InputSlots;
use super::{FfmpegPicture, Owned, StreamParameters, platform_error};
use crate::codec::{
    BufferInfo, Codec, CodecError, CodecResult, CodecState, ColorFormat, InputSurface,
    MediaFormat, OutputEvent, SampleFlags, SurfaceFrame, yuv420_len,
};

const INPUT_SLOTS: usize = 4;
const OUTPUT_SLOTS: usize = 2;
const DEFAULT_INPUT_SIZE: usize = 4 << 20;
const MIME_RAW_VIDEO: &str = "video/raw";

/// Decoded picture held between `dequeue_output_buffer` and release.
struct HeldOutput {
    frame: Option<Owned<VideoFrame>>,
    /// Packed bytes on the buffer path, empty on the surface path
    bytes: Vec<u8>,
}

pub struct FfmpegDecoder {
    codec: codec::Codec,
    state: CodecState,
    decoder: Option<Owned<codec::decoder::Video>>,
    surface: Option<InputSurface>,
    max_input_size: usize,
    inputs: InputSlots,
    pending: VecDeque<Owned<Packet>>,
    input_ended: bool,
    eof_sent: bool,
    outputs: Vec<Option<HeldOutput>>,
    format_announced: bool,
    output_ended: bool,
    last_pts: i64,
    converter: Converter,
}

impl FfmpegDecoder {
    pub fn new(codec: codec::Codec) -> Self {
        Self {
            codec,
            state: CodecState::Uninitialized,
            decoder: None,
            surface: None,
            max_input_size: DEFAULT_INPUT_SIZE,
            inputs: InputSlots::default(),
            pending: VecDeque::new(),
            input_ended: false,
            eof_sent: false,
            outputs: Vec::new(),
            format_announced: false,
            output_ended: false,
            last_pts: 0,
            converter: Converter::default(),
        }
    }

    fn illegal(&self, operation: &'static str) -> CodecError {
        CodecError::IllegalState {
            operation,
            state: self.state,
        }
    }

    fn decoder_mut(&mut self) -> CodecResult<&mut codec::decoder::Video> {
        let state = self.state;
        self.decoder
            .as_deref_mut()
            .ok_or(CodecError::IllegalState {
                operation: "decode",
                state,
            })
    }

    /// Pushes queued packets until the decoder asks for output to be drained.
    fn send_pending(&mut self) -> CodecResult<()> {
        while let Some(packet) = self.pending.pop_front() {
            let result = self.decoder_mut()?.send_packet(&packet.0);
            match result {
                Ok(()) => {}
                Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::util::error::EAGAIN => {
                    self.pending.push_front(packet);
                    return Ok(());
                }
                Err(e) => return Err(platform_error("sending packet to decoder", e)),
            }
        }

        if self.input_ended && !self.eof_sent {
            self.decoder_mut()?
                .send_eof()
                .map_err(|e| platform_error("flushing decoder", e))?;
            self.eof_sent = true;
        }
        Ok(())
    }

    fn hold(&mut self, slot: usize, frame: VideoFrame) -> CodecResult<BufferInfo> {
        let pts = frame.pts().or(frame.timestamp()).unwrap_or(self.last_pts);
        self.last_pts = pts;

        let (bytes, size) = if self.surface.is_some() {
            (Vec::new(), yuv420_len(frame.width(), frame.height()))
        } else {
            let planar = self.converter.convert(
                &frame,
                Pixel::YUV420P,
                frame.width(),
                frame.height(),
            )?;
            let bytes = pack_yuv420(&planar, pts)?;
            let size = bytes.len();
            (bytes, size)
        };

        self.outputs[slot] = Some(HeldOutput {
            frame: Some(Owned(frame)),
            bytes,
        });
        Ok(BufferInfo::new(0, size, pts, SampleFlags::NONE))
    }
}

impl Codec for FfmpegDecoder {
    fn name(&self) -> &str {
        self.codec.name()
    }

    fn state(&self) -> CodecState {
        self.state
    }

    fn configure(
        &mut self,
        format: &MediaFormat,
        surface: Option<&InputSurface>,
    ) -> CodecResult<()> {
        if self.state != CodecState::Uninitialized {
            return Err(self.illegal("configure"));
        }
        let Some(parameters) = format
            .native
            .as_ref()
            .and_then(|native| native.downcast_ref::<StreamParameters>())
        else {
            return Err(CodecError::Configuration {
                reason: format!("{} needs the demuxed stream parameters", self.name()),
            });
        };

        let context = codec::context::Context::from_parameters(parameters.get())
            .map_err(|e| CodecError::Configuration {
                reason: format!("decoder context: {e}"),
            })?;
        let decoder = context
            .decoder()
            .open_as(self.codec)
            .and_then(|opened| opened.video())
            .map_err(|e| CodecError::Configuration {
                reason: format!("{} cannot decode {}: {e}", self.name(), format.mime),
            })?;

        debug!(
            "Decoder {} opened for {}x{}",
            self.name(),
            decoder.width(),
            decoder.height()
        );
        self.decoder = Some(Owned(decoder));
        self.surface = surface.cloned();
        self.max_input_size = format.max_input_size.unwrap_or(DEFAULT_INPUT_SIZE);
        self.state = CodecState::Configured;
        Ok(())
    }

    fn create_input_surface(&mut self) -> CodecResult<InputSurface> {
        Err(CodecError::Unsupported {
            reason: format!("{} is a decoder", self.name()),
        })
    }

    fn start(&mut self) -> CodecResult<()> {
        if self.state != CodecState::Configured {
            return Err(self.illegal("start"));
        }
        self.inputs = InputSlots::new(INPUT_SLOTS, self.max_input_size);
        self.outputs = (0..OUTPUT_SLOTS).map(|_| None).collect();
        self.state = CodecState::Started;
        Ok(())
    }

    fn dequeue_input_buffer(&mut self, _timeout: Duration) -> CodecResult<Option<usize>> {
        if !self.state.is_running() {
            return Err(self.illegal("dequeue_input_buffer"));
        }
        if self.input_ended || self.pending.len() >= INPUT_SLOTS {
            return Ok(None);
        }
        Ok(self.inputs.dequeue())
    }

    fn input_buffer(&mut self, index: usize) -> CodecResult<&mut [u8]> {
        self.inputs.buffer_mut(index)
    }

    fn queue_input_buffer(&mut self, index: usize, info: BufferInfo) -> CodecResult<()> {
        let data = self.inputs.payload(index, &info)?;
        if !data.is_empty() {
            let mut packet = Packet::copy(data);
            packet.set_pts(Some(info.presentation_time_us));
            packet.set_dts(None);
            if info.flags.is_key_frame() {
                packet.set_flags(codec::packet::Flags::KEY);
            }
            self.pending.push_back(Owned(packet));
        }
        self.inputs.recycle(index);
        self.input_ended |= info.is_end_of_stream();
        self.send_pending()
    }

    fn dequeue_output_buffer(&mut self, _timeout: Duration) -> CodecResult<OutputEvent> {
        if !self.state.is_running() {
            return Err(self.illegal("dequeue_output_buffer"));
        }
        if !self.format_announced {
            self.format_announced = true;
            return Ok(OutputEvent::FormatChanged);
        }
        if self.output_ended {
            return Ok(OutputEvent::TryAgainLater);
        }
        let Some(slot) = self.outputs.iter().position(Option::is_none) else {
            return Ok(OutputEvent::TryAgainLater);
        };

        loop {
            let mut frame = VideoFrame::empty();
            let received = self.decoder_mut()?.receive_frame(&mut frame);
            match received {
                Ok(()) => {
                    let info = self.hold(slot, frame)?;
                    trace!("Decoded frame at {} us", info.presentation_time_us);
                    return Ok(OutputEvent::Buffer { index: slot, info });
                }
                Err(ffmpeg::Error::Eof) => {
                    self.output_ended = true;
                    self.outputs[slot] = Some(HeldOutput {
                        frame: None,
                        bytes: Vec::new(),
                    });
                    return Ok(OutputEvent::Buffer {
                        index: slot,
                        info: BufferInfo::end_of_stream(self.last_pts),
                    });
                }
                Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::util::error::EAGAIN => {
                    let backlog = self.pending.len();
                    let flushing = self.input_ended && !self.eof_sent;
                    if backlog == 0 && !flushing {
                        return Ok(OutputEvent::TryAgainLater);
                    }
                    self.send_pending()?;
                    if self.pending.len() == backlog && !flushing {
                        return Ok(OutputEvent::TryAgainLater);
                    }
                }
                Err(e) => return Err(platform_error("decoding frame", e)),
            }
        }
    }

    fn output_buffer(&mut self, index: usize) -> CodecResult<&[u8]> {
        match self.outputs.get(index) {
            Some(Some(held)) => Ok(&held.bytes),
            _ => Err(CodecError::InvalidBuffer { index }),
        }
    }

    fn output_format(&self) -> CodecResult<MediaFormat> {
        let Some(decoder) = self.decoder.as_ref().filter(|_| self.format_announced) else {
            return Err(self.illegal("output_format"));
        };
        Ok(MediaFormat::video(MIME_RAW_VIDEO, decoder.width(), decoder.height())
            .with_color_format(Some(ColorFormat::YuvPlanar420)))
    }

    fn release_output_buffer(&mut self, index: usize, render: bool) -> CodecResult<()> {
        let Some(held) = self.outputs.get_mut(index).and_then(Option::take) else {
            return Err(CodecError::InvalidBuffer { index });
        };
        if let (true, Some(surface), Some(frame)) = (render, self.surface.as_ref(), held.frame) {
            let pts = frame.pts().unwrap_or(self.last_pts);
            surface.push(SurfaceFrame::new(pts, FfmpegPicture(frame)))?;
        }
        Ok(())
    }

    fn signal_end_of_input_stream(&mut self) -> CodecResult<()> {
        Err(self.illegal("signal_end_of_input_stream"))
    }

    fn stop(&mut self) -> CodecResult<()> {
        if matches!(self.state, CodecState::Uninitialized | CodecState::Released) {
            return Err(self.illegal("stop"));
        }
        self.pending.clear();
        self.outputs.iter_mut().for_each(|held| *held = None);
        self.state = CodecState::Stopped;
        Ok(())
    }

    fn release(&mut self) -> CodecResult<()> {
        if self.state == CodecState::Released {
            return Ok(());
        }
        self.state = CodecState::Released;
        self.pending.clear();
        self.outputs.clear();
        self.inputs.clear();
        self.decoder = None;
        self.surface = None;
        Ok(())
    }
}
