//! Video encoder adapter. Frames arrive either through an `InputSurface`
//! or as packed raw buffers and are cropped and scaled to the configured
//! picture before they reach libavcodec.

use std::collections::VecDeque;
use std::time::Duration;

use ffmpeg_next as ffmpeg;
use ffmpeg::format::Pixel;
use ffmpeg::util::frame::Video as VideoFrame;
use ffmpeg::{Dictionary, Packet, Rational, codec};
use tracing::{debug, trace};

use super::frames::{Converter, unpack_yuv420};
use super::slots::InputSlots;
use super::{FfmpegPicture, MICROS, Owned, StreamParameters, codec_id_for, platform_error};
use crate::codec::{
    BufferInfo, Codec, CodecError, CodecResult, CodecState, ColorFormat, CropRect, InputSurface,
    MediaFormat, NativeHandle, OutputEvent, RAW_FRAME_HEADER_LEN, SampleFlags, yuv420_len,
};

const INPUT_SLOTS: usize = 4;
const OUTPUT_SLOTS: usize = 2;
/// Largest source picture the buffer path carries.
const MAX_SOURCE_SIZE: (u32, u32) = (3840, 2160);
const DEFAULT_KEY_FRAME_INTERVAL_SECS: u32 = 1;

struct Settings {
    width: u32,
    height: u32,
    pixel: Pixel,
    bit_rate: u32,
    frame_rate: u32,
    crop: Option<CropRect>,
}

pub struct FfmpegEncoder {
    codec: codec::Codec,
    mime: String,
    state: CodecState,
    encoder: Option<Owned<codec::encoder::video::Encoder>>,
    settings: Option<Settings>,
    surface: Option<InputSurface>,
    inputs: InputSlots,
    pending: VecDeque<Owned<VideoFrame>>,
    input_ended: bool,
    eof_sent: bool,
    outputs: Vec<Option<Option<Owned<Packet>>>>,
    format_announced: bool,
    output_ended: bool,
    last_pts: i64,
    converter: Converter,
}

impl FfmpegEncoder {
    pub fn new(codec: codec::Codec, mime: &str) -> Self {
        Self {
            codec,
            mime: mime.to_string(),
            state: CodecState::Uninitialized,
            encoder: None,
            settings: None,
            surface: None,
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

    fn supported_pixels(&self) -> Vec<Pixel> {
        self.codec
            .video()
            .ok()
            .and_then(|video| video.formats())
            .map(Iterator::collect)
            .unwrap_or_default()
    }

    /// Pixel layout fed to libavcodec for the requested colour format.
    fn pick_pixel(&self, color_format: Option<ColorFormat>) -> Result<Pixel, String> {
        let supported = self.supported_pixels();
        let accepts = |pixel: Pixel| supported.is_empty() || supported.contains(&pixel);

        match color_format {
            Some(ColorFormat::YuvSemiPlanar420) if accepts(Pixel::NV12) => Ok(Pixel::NV12),
            Some(ColorFormat::YuvSemiPlanar420) => {
                Err(format!("{} does not take semi-planar input", self.codec.name()))
            }
            Some(ColorFormat::YuvPlanar420) if !accepts(Pixel::YUV420P) => {
                Err(format!("{} does not take planar input", self.codec.name()))
            }
            Some(ColorFormat::Other(id)) => Err(format!("Unknown colour format {id:#x}")),
            _ if accepts(Pixel::YUV420P) => Ok(Pixel::YUV420P),
            _ if accepts(Pixel::NV12) => Ok(Pixel::NV12),
            _ => supported
                .first()
                .copied()
                .ok_or_else(|| format!("{} lists no input formats", self.codec.name())),
        }
    }

    fn validate(&self, format: &MediaFormat) -> Result<Settings, String> {
        if codec_id_for(&format.mime) != Some(self.codec.id()) {
            return Err(format!("{} cannot encode {}", self.codec.name(), format.mime));
        }
        let (Some(width), Some(height)) = (format.width, format.height) else {
            return Err("missing picture size".to_string());
        };
        if width == 0 || height == 0 || width % 2 != 0 || height % 2 != 0 {
            return Err(format!("picture size {width}x{height} must be even and positive"));
        }
        let bit_rate = format.bit_rate.filter(|rate| *rate > 0).ok_or("missing bitrate")?;
        let frame_rate = format
            .frame_rate
            .filter(|rate| *rate > 0)
            .ok_or("missing frame rate")?;

        Ok(Settings {
            width,
            height,
            pixel: self.pick_pixel(format.color_format)?,
            bit_rate,
            frame_rate,
            crop: format.crop,
        })
    }

    fn encoder_mut(&mut self) -> CodecResult<&mut codec::encoder::video::Encoder> {
        let state = self.state;
        self.encoder
            .as_deref_mut()
            .ok_or(CodecError::IllegalState {
                operation: "encode",
                state,
            })
    }

    /// Converts a decoded picture to the configured layout and queues it.
    fn enqueue(&mut self, frame: &VideoFrame, presentation_time_us: i64) -> CodecResult<()> {
        let Some(settings) = self.settings.as_ref() else {
            return Err(self.illegal("enqueue"));
        };
        let (crop, pixel, width, height) =
            (settings.crop, settings.pixel, settings.width, settings.height);

        let mut prepared = self.converter.prepare(frame, crop, pixel, width, height)?;
        prepared.set_pts(Some(presentation_time_us));
        self.last_pts = presentation_time_us;
        self.pending.push_back(Owned(prepared));
        Ok(())
    }

    /// Moves rendered surface frames into the pending queue.
    fn pull_surface(&mut self) -> CodecResult<()> {
        let Some(surface) = self.surface.clone() else {
            return Ok(());
        };
        while self.pending.len() < INPUT_SLOTS {
            let Some(rendered) = surface.pop() else {
                break;
            };
            let pts = rendered.presentation_time_us;
            let picture = rendered
                .payload
                .downcast::<FfmpegPicture>()
                .map_err(|_| CodecError::Platform {
                    reason: "surface frame was not rendered by an FFmpeg decoder".to_string(),
                })?;
            self.enqueue(&picture.0, pts)?;
        }
        Ok(())
    }

    fn send_pending(&mut self) -> CodecResult<()> {
        while let Some(frame) = self.pending.pop_front() {
            let result = self.encoder_mut()?.send_frame(&frame);
            match result {
                Ok(()) => {}
                Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::util::error::EAGAIN => {
                    self.pending.push_front(frame);
                    return Ok(());
                }
                Err(e) => return Err(platform_error("sending frame to encoder", e)),
            }
        }

        let surface_drained = self.surface.as_ref().is_none_or(|s| s.pending() == 0);
        if self.input_ended && surface_drained && !self.eof_sent {
            self.encoder_mut()?
                .send_eof()
                .map_err(|e| platform_error("flushing encoder", e))?;
            self.eof_sent = true;
        }
        Ok(())
    }
}

impl Codec for FfmpegEncoder {
    fn name(&self) -> &str {
        self.codec.name()
    }

    fn state(&self) -> CodecState {
        self.state
    }

    fn configure(
        &mut self,
        format: &MediaFormat,
        _surface: Option<&InputSurface>,
    ) -> CodecResult<()> {
        if self.state != CodecState::Uninitialized {
            return Err(self.illegal("configure"));
        }
        let settings = self
            .validate(format)
            .map_err(|reason| CodecError::Configuration { reason })?;
        let rejected = |e: ffmpeg::Error| CodecError::Configuration {
            reason: format!("{} rejected the configuration: {e}", self.codec.name()),
        };

        let mut encoder = codec::context::Context::new_with_codec(self.codec)
            .encoder()
            .video()
            .map_err(rejected)?;
        encoder.set_width(settings.width);
        encoder.set_height(settings.height);
        encoder.set_format(settings.pixel);
        encoder.set_time_base(MICROS);
        encoder.set_frame_rate(Some(Rational(settings.frame_rate as i32, 1)));
        encoder.set_bit_rate(settings.bit_rate as usize);
        encoder.set_max_b_frames(0);
        encoder.set_gop(
            settings.frame_rate
                * format
                    .key_frame_interval_secs
                    .unwrap_or(DEFAULT_KEY_FRAME_INTERVAL_SECS)
                    .max(1),
        );
        encoder.set_flags(codec::Flags::GLOBAL_HEADER);
        if format.hdr {
            encoder.set_colorspace(ffmpeg::util::color::Space::BT2020NCL);
        }

        let mut options = Dictionary::new();
        if self.codec.name().starts_with("libx26") {
            options.set("preset", "veryfast");
        }
        let opened = encoder.open_as_with(self.codec, options).map_err(rejected)?;

        debug!(
            "Encoder {} opened: {}x{} {:?} @ {} bps, {} fps",
            self.codec.name(),
            settings.width,
            settings.height,
            settings.pixel,
            settings.bit_rate,
            settings.frame_rate
        );
        self.encoder = Some(Owned(opened));
        self.settings = Some(settings);
        self.state = CodecState::Configured;
        Ok(())
    }

    fn create_input_surface(&mut self) -> CodecResult<InputSurface> {
        if self.state != CodecState::Configured {
            return Err(self.illegal("create_input_surface"));
        }
        let surface = InputSurface::new();
        self.surface = Some(surface.clone());
        Ok(surface)
    }

    fn start(&mut self) -> CodecResult<()> {
        if self.state != CodecState::Configured {
            return Err(self.illegal("start"));
        }
        if self.surface.is_none() {
            let (width, height) = self
                .settings
                .as_ref()
                .map(|s| (s.width, s.height))
                .unwrap_or_default();
            let picture = yuv420_len(width, height)
                .max(yuv420_len(MAX_SOURCE_SIZE.0, MAX_SOURCE_SIZE.1));
            self.inputs = InputSlots::new(INPUT_SLOTS, RAW_FRAME_HEADER_LEN + picture);
        }
        self.outputs = (0..OUTPUT_SLOTS).map(|_| None).collect();
        self.state = CodecState::Started;
        Ok(())
    }

    fn dequeue_input_buffer(&mut self, _timeout: Duration) -> CodecResult<Option<usize>> {
        if !self.state.is_running() || self.surface.is_some() {
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
        let unpacked = if data.is_empty() {
            None
        } else {
            Some(unpack_yuv420(data)?)
        };
        self.inputs.recycle(index);

        if let Some((frame, _)) = unpacked {
            self.enqueue(&frame, info.presentation_time_us)?;
        }
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

        self.pull_surface()?;
        self.send_pending()?;

        let mut packet = Packet::empty();
        let received = self.encoder_mut()?.receive_packet(&mut packet);
        match received {
            Ok(()) => {
                let pts = packet.pts().unwrap_or(self.last_pts);
                let flags = if packet.is_key() {
                    SampleFlags::KEY_FRAME
                } else {
                    SampleFlags::NONE
                };
                let size = packet.size();
                trace!("Encoded {size} bytes at {pts} us");
                self.outputs[slot] = Some(Some(Owned(packet)));
                Ok(OutputEvent::Buffer {
                    index: slot,
                    info: BufferInfo::new(0, size, pts, flags),
                })
            }
            Err(ffmpeg::Error::Eof) => {
                self.output_ended = true;
                self.outputs[slot] = Some(None);
                Ok(OutputEvent::Buffer {
                    index: slot,
                    info: BufferInfo::end_of_stream(self.last_pts),
                })
            }
            Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::util::error::EAGAIN => {
                Ok(OutputEvent::TryAgainLater)
            }
            Err(e) => Err(platform_error("encoding frame", e)),
        }
    }

    fn output_buffer(&mut self, index: usize) -> CodecResult<&[u8]> {
        match self.outputs.get(index) {
            Some(Some(Some(packet))) => Ok(packet.data().unwrap_or_default()),
            Some(Some(None)) => Ok(&[]),
            _ => Err(CodecError::InvalidBuffer { index }),
        }
    }

    fn output_format(&self) -> CodecResult<MediaFormat> {
        let (Some(encoder), Some(settings)) = (self.encoder.as_deref(), self.settings.as_ref())
        else {
            return Err(self.illegal("output_format"));
        };
        if !self.format_announced {
            return Err(self.illegal("output_format"));
        }

        let parameters = codec::Parameters::from(encoder);
        Ok(MediaFormat::video(self.mime.clone(), settings.width, settings.height)
            .with_bit_rate(settings.bit_rate)
            .with_frame_rate(settings.frame_rate)
            .with_native(NativeHandle::new(StreamParameters::new(parameters))))
    }

    fn release_output_buffer(&mut self, index: usize, _render: bool) -> CodecResult<()> {
        match self.outputs.get_mut(index).and_then(Option::take) {
            Some(_) => Ok(()),
            None => Err(CodecError::InvalidBuffer { index }),
        }
    }

    fn signal_end_of_input_stream(&mut self) -> CodecResult<()> {
        if self.surface.is_none() || !self.state.is_running() {
            return Err(self.illegal("signal_end_of_input_stream"));
        }
        self.input_ended = true;
        Ok(())
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
        self.encoder = None;
        if let Some(surface) = self.surface.take() {
            surface.release();
        }
        Ok(())
    }
}
