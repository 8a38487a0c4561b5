//! Simulated decoder and encoder.
//!
//! Both roles follow the slot model of `recast_core::codec::Codec` and never
//! block: a poll with nothing ready answers `TryAgainLater` at once. Decoders
//! hand out raw pictures (a `RawFrameHeader` followed by 4:2:0 planes) or
//! render `SimPicture`s onto an input surface. Encoders emit one codec config
//! buffer followed by one compressed sample per input frame, sized from the
//! configured bitrate.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use recast_core::codec::{
    BufferInfo, Codec, CodecCapabilities, CodecError, CodecResult, CodecState, ColorFormat,
    InputSurface, MediaFormat, OutputEvent, RAW_FRAME_HEADER_LEN, RawFrameHeader, SampleFlags,
    SurfaceFrame, yuv420_len,
};
use tracing::{debug, trace};

use crate::platform::{ConfigPredicate, SimStats};

/// Mime type announced by decoders for their raw output.
pub const MIME_RAW_VIDEO: &str = "video/raw";

const INPUT_SLOTS: usize = 4;
const OUTPUT_SLOTS: usize = 2;
const DEFAULT_INPUT_SIZE: usize = 1 << 20;
const CODEC_CONFIG_LEN: usize = 32;
const MIN_SAMPLE_LEN: usize = 64;
const MAX_SAMPLE_LEN: usize = 256 * 1024;

/// Picture a simulated decoder renders onto an input surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimPicture {
    pub width: u32,
    pub height: u32,
    pub presentation_time_us: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecRole {
    Decoder,
    Encoder,
}

/// Device behaviour a codec inherits from its platform.
#[derive(Clone, Default)]
pub struct CodecFaults {
    pub surface_supported: bool,
    /// Returns true for configurations the device refuses
    pub reject: Option<ConfigPredicate>,
    /// Successful surface renders before every further render fails
    pub render_failures_after: Option<u64>,
}

/// Decoder or encoder of the simulated platform.
pub struct SimCodec {
    name: String,
    mime: String,
    role: CodecRole,
    capabilities: CodecCapabilities,
    faults: CodecFaults,
    stats: Arc<SimStats>,
    state: CodecState,
    format: Option<MediaFormat>,
    surface: Option<InputSurface>,
    inputs: Vec<Vec<u8>>,
    free_inputs: VecDeque<usize>,
    dequeued_inputs: Vec<bool>,
    pending: VecDeque<(usize, BufferInfo)>,
    outputs: Vec<Vec<u8>>,
    held_outputs: Vec<Option<BufferInfo>>,
    format_announced: bool,
    codec_config_sent: bool,
    input_ended: bool,
    output_ended: bool,
    last_presentation_time_us: i64,
    frames_rendered: u64,
    frames_encoded: u64,
}

impl SimCodec {
    pub fn new(
        name: impl Into<String>,
        mime: impl Into<String>,
        role: CodecRole,
        capabilities: CodecCapabilities,
        faults: CodecFaults,
        stats: Arc<SimStats>,
    ) -> Self {
        Self {
            name: name.into(),
            mime: mime.into(),
            role,
            capabilities,
            faults,
            stats,
            state: CodecState::Uninitialized,
            format: None,
            surface: None,
            inputs: Vec::new(),
            free_inputs: VecDeque::new(),
            dequeued_inputs: Vec::new(),
            pending: VecDeque::new(),
            outputs: vec![Vec::new(); OUTPUT_SLOTS],
            held_outputs: vec![None; OUTPUT_SLOTS],
            format_announced: false,
            codec_config_sent: false,
            input_ended: false,
            output_ended: false,
            last_presentation_time_us: 0,
            frames_rendered: 0,
            frames_encoded: 0,
        }
    }

    pub fn role(&self) -> CodecRole {
        self.role
    }

    pub fn frames_encoded(&self) -> u64 {
        self.frames_encoded
    }

    fn illegal(&self, operation: &'static str) -> CodecError {
        CodecError::IllegalState {
            operation,
            state: self.state,
        }
    }

    fn ensure_running(&self, operation: &'static str) -> CodecResult<()> {
        if self.state.is_running() {
            Ok(())
        } else {
            Err(self.illegal(operation))
        }
    }

    fn configured_size(&self) -> (u32, u32) {
        self.format
            .as_ref()
            .map(|f| (f.width.unwrap_or(0), f.height.unwrap_or(0)))
            .unwrap_or((0, 0))
    }

    /// Checks an encoder configuration the way a device codec would.
    fn validate_encoder_format(&self, format: &MediaFormat) -> Result<(), String> {
        if !format.mime.eq_ignore_ascii_case(&self.mime) {
            return Err(format!("{} cannot encode {}", self.name, format.mime));
        }
        let (Some(width), Some(height)) = (format.width, format.height) else {
            return Err("missing picture size".to_string());
        };
        if width == 0 || height == 0 || width % 2 != 0 || height % 2 != 0 {
            return Err(format!("invalid picture size {width}x{height}"));
        }
        if !self.capabilities.supports_size(width, height) {
            return Err(format!(
                "{width}x{height} exceeds {}x{}",
                self.capabilities.max_width, self.capabilities.max_height
            ));
        }
        match format.bit_rate {
            Some(rate) if rate > 0 && rate <= self.capabilities.max_bit_rate => {}
            Some(rate) => return Err(format!("unsupported bitrate {rate}")),
            None => return Err("missing bitrate".to_string()),
        }
        match format.frame_rate {
            Some(fps) if fps > 0 && fps <= self.capabilities.max_frame_rate => {}
            Some(fps) => return Err(format!("unsupported frame rate {fps}")),
            None => return Err("missing frame rate".to_string()),
        }
        match format.color_format {
            Some(ColorFormat::Surface) if !self.faults.surface_supported => {
                return Err("surface input is not supported".to_string());
            }
            Some(ColorFormat::Surface) | None => {}
            Some(color) if !self.capabilities.supports_color_format(color) => {
                return Err(format!("unsupported colour format {color:?}"));
            }
            Some(_) => {}
        }
        if let Some(reject) = &self.faults.reject
            && reject(&self.name, format)
        {
            return Err("configuration refused by device".to_string());
        }
        Ok(())
    }

    fn free_output_slot(&self) -> Option<usize> {
        self.held_outputs.iter().position(Option::is_none)
    }

    fn hand_out(&mut self, slot: usize, info: BufferInfo) -> OutputEvent {
        self.held_outputs[slot] = Some(info);
        if info.is_end_of_stream() {
            self.output_ended = true;
        }
        OutputEvent::Buffer { index: slot, info }
    }

    fn decode_next(&mut self, slot: usize) -> CodecResult<OutputEvent> {
        let Some((input, sample)) = self.pending.pop_front() else {
            return Ok(OutputEvent::TryAgainLater);
        };
        self.free_inputs.push_back(input);

        let eos = if sample.is_end_of_stream() {
            SampleFlags::END_OF_STREAM
        } else {
            SampleFlags::NONE
        };
        if sample.size == 0 {
            let info = BufferInfo::end_of_stream(self.last_presentation_time_us);
            return Ok(self.hand_out(slot, info));
        }

        let pts = sample.presentation_time_us;
        self.last_presentation_time_us = pts;
        let (width, height) = self.configured_size();
        let picture_len = yuv420_len(width, height);

        let size = if self.surface.is_some() {
            picture_len
        } else {
            let total = RAW_FRAME_HEADER_LEN + picture_len;
            let buffer = &mut self.outputs[slot];
            if buffer.len() != total {
                buffer.resize(total, 0);
            }
            RawFrameHeader::new(width, height, pts).write_to(buffer)?;
            let marker = pts.to_le_bytes();
            let end = (RAW_FRAME_HEADER_LEN + marker.len()).min(total);
            buffer[RAW_FRAME_HEADER_LEN..end].copy_from_slice(&marker[..end - RAW_FRAME_HEADER_LEN]);
            total
        };

        trace!("{} decoded frame at {pts} us", self.name);
        Ok(self.hand_out(slot, BufferInfo::new(0, size, pts, eos)))
    }

    fn encode_next(&mut self, slot: usize) -> CodecResult<OutputEvent> {
        if !self.codec_config_sent {
            self.codec_config_sent = true;
            let buffer = &mut self.outputs[slot];
            buffer.clear();
            buffer.resize(CODEC_CONFIG_LEN, 0x67);
            let info = BufferInfo::new(0, CODEC_CONFIG_LEN, 0, SampleFlags::CODEC_CONFIG);
            return Ok(self.hand_out(slot, info));
        }

        let (pts, eos, has_frame) = match &self.surface {
            Some(surface) => match surface.pop() {
                Some(frame) => {
                    let picture = picture_of(&frame)?;
                    (picture.presentation_time_us, false, true)
                }
                None if self.input_ended => (self.last_presentation_time_us, true, false),
                None => return Ok(OutputEvent::TryAgainLater),
            },
            None => match self.pending.pop_front() {
                Some((input, sample)) => {
                    self.free_inputs.push_back(input);
                    (
                        sample.presentation_time_us,
                        sample.is_end_of_stream(),
                        sample.size > 0,
                    )
                }
                None => return Ok(OutputEvent::TryAgainLater),
            },
        };

        if !has_frame {
            let info = BufferInfo::end_of_stream(pts);
            debug!(
                "{} reached end of stream after {} frames",
                self.name, self.frames_encoded
            );
            return Ok(self.hand_out(slot, info));
        }

        let (flags, size) = self.compressed_frame(slot, pts);
        self.last_presentation_time_us = pts;
        let flags = if eos {
            flags | SampleFlags::END_OF_STREAM
        } else {
            flags
        };
        Ok(self.hand_out(slot, BufferInfo::new(0, size, pts, flags)))
    }

    fn compressed_frame(&mut self, slot: usize, pts: i64) -> (SampleFlags, usize) {
        let (bit_rate, fps, interval) = self
            .format
            .as_ref()
            .map(|f| {
                (
                    f.bit_rate.unwrap_or(1_000_000),
                    f.frame_rate.unwrap_or(30).max(1),
                    f.key_frame_interval_secs.unwrap_or(1).max(1),
                )
            })
            .unwrap_or((1_000_000, 30, 1));

        let key = self.frames_encoded % u64::from(fps * interval) == 0;
        let size = (bit_rate as usize / 8 / fps as usize).clamp(MIN_SAMPLE_LEN, MAX_SAMPLE_LEN);

        let buffer = &mut self.outputs[slot];
        buffer.clear();
        buffer.extend_from_slice(&pts.to_le_bytes());
        buffer.extend_from_slice(&self.frames_encoded.to_le_bytes());
        buffer.resize(size, if key { 0x65 } else { 0x41 });

        self.frames_encoded += 1;
        let flags = if key {
            SampleFlags::KEY_FRAME
        } else {
            SampleFlags::NONE
        };
        (flags, size)
    }

    fn render(&mut self, info: BufferInfo) -> CodecResult<()> {
        let Some(surface) = &self.surface else {
            return Ok(());
        };
        if self
            .faults
            .render_failures_after
            .is_some_and(|limit| self.frames_rendered >= limit)
        {
            return Err(CodecError::Platform {
                reason: format!(
                    "{} failed to render frame at {} us",
                    self.name, info.presentation_time_us
                ),
            });
        }

        let (width, height) = self.configured_size();
        surface.push(SurfaceFrame::new(
            info.presentation_time_us,
            SimPicture {
                width,
                height,
                presentation_time_us: info.presentation_time_us,
            },
        ))?;
        self.frames_rendered += 1;
        Ok(())
    }
}

fn picture_of(frame: &SurfaceFrame) -> CodecResult<SimPicture> {
    frame
        .payload
        .downcast_ref::<SimPicture>()
        .copied()
        .ok_or_else(|| CodecError::Platform {
            reason: "surface frame was not rendered by a simulated decoder".to_string(),
        })
}

impl Codec for SimCodec {
    fn name(&self) -> &str {
        &self.name
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

        match self.role {
            CodecRole::Encoder => {
                self.stats.record_configure();
                if let Err(reason) = self.validate_encoder_format(format) {
                    self.stats.record_rejection();
                    debug!("{} rejected configuration: {reason}", self.name);
                    return Err(CodecError::Configuration { reason });
                }
            }
            CodecRole::Decoder => {
                if !format.is_video() || format.width.is_none() || format.height.is_none() {
                    return Err(CodecError::Configuration {
                        reason: format!("{} cannot decode {}", self.name, format.mime),
                    });
                }
                self.surface = surface.cloned();
            }
        }

        self.format = Some(format.clone());
        self.state = CodecState::Configured;
        Ok(())
    }

    fn create_input_surface(&mut self) -> CodecResult<InputSurface> {
        if self.role != CodecRole::Encoder || !self.faults.surface_supported {
            return Err(CodecError::Unsupported {
                reason: format!("{} does not accept surface input", self.name),
            });
        }
        if self.state != CodecState::Configured {
            return Err(self.illegal("create_input_surface"));
        }
        let surface = InputSurface::new();
        self.surface = Some(surface.clone());
        self.stats.record_surface();
        Ok(surface)
    }

    fn start(&mut self) -> CodecResult<()> {
        if self.state != CodecState::Configured {
            return Err(self.illegal("start"));
        }

        let slot_len = match self.role {
            CodecRole::Decoder => self
                .format
                .as_ref()
                .and_then(|f| f.max_input_size)
                .unwrap_or(DEFAULT_INPUT_SIZE),
            CodecRole::Encoder if self.surface.is_some() => 0,
            CodecRole::Encoder => {
                let (width, height) = self.configured_size();
                RAW_FRAME_HEADER_LEN + yuv420_len(width, height)
            }
        };
        if slot_len > 0 {
            self.inputs = vec![vec![0; slot_len]; INPUT_SLOTS];
            self.free_inputs = (0..INPUT_SLOTS).collect();
            self.dequeued_inputs = vec![false; INPUT_SLOTS];
        }

        self.state = CodecState::Started;
        Ok(())
    }

    fn dequeue_input_buffer(&mut self, _timeout: Duration) -> CodecResult<Option<usize>> {
        self.ensure_running("dequeue_input_buffer")?;
        if self.role == CodecRole::Encoder && self.surface.is_some() {
            return Err(self.illegal("dequeue_input_buffer"));
        }
        if self.input_ended {
            return Ok(None);
        }
        let index = self.free_inputs.pop_front();
        if let Some(index) = index {
            self.dequeued_inputs[index] = true;
        }
        Ok(index)
    }

    fn input_buffer(&mut self, index: usize) -> CodecResult<&mut [u8]> {
        if !self.dequeued_inputs.get(index).copied().unwrap_or(false) {
            return Err(CodecError::InvalidBuffer { index });
        }
        Ok(&mut self.inputs[index])
    }

    fn queue_input_buffer(&mut self, index: usize, info: BufferInfo) -> CodecResult<()> {
        if !self.dequeued_inputs.get(index).copied().unwrap_or(false) {
            return Err(CodecError::InvalidBuffer { index });
        }
        let available = self.inputs[index].len();
        if info.offset.saturating_add(info.size) > available {
            return Err(CodecError::BufferTooSmall {
                needed: info.offset.saturating_add(info.size),
                available,
            });
        }

        self.dequeued_inputs[index] = false;
        self.input_ended |= info.is_end_of_stream();
        self.pending.push_back((index, info));
        Ok(())
    }

    fn dequeue_output_buffer(&mut self, _timeout: Duration) -> CodecResult<OutputEvent> {
        self.ensure_running("dequeue_output_buffer")?;
        if !self.format_announced {
            self.format_announced = true;
            return Ok(OutputEvent::FormatChanged);
        }
        if self.output_ended {
            return Ok(OutputEvent::TryAgainLater);
        }
        let Some(slot) = self.free_output_slot() else {
            return Ok(OutputEvent::TryAgainLater);
        };

        match self.role {
            CodecRole::Decoder => self.decode_next(slot),
            CodecRole::Encoder => self.encode_next(slot),
        }
    }

    fn output_buffer(&mut self, index: usize) -> CodecResult<&[u8]> {
        match self.held_outputs.get(index) {
            Some(Some(_)) => Ok(&self.outputs[index]),
            _ => Err(CodecError::InvalidBuffer { index }),
        }
    }

    fn output_format(&self) -> CodecResult<MediaFormat> {
        if !self.format_announced {
            return Err(self.illegal("output_format"));
        }
        let (width, height) = self.configured_size();
        let format = match (self.role, &self.format) {
            (CodecRole::Encoder, Some(configured)) => {
                let mut format = MediaFormat::video(self.mime.clone(), width, height);
                format.bit_rate = configured.bit_rate;
                format.frame_rate = configured.frame_rate;
                format
            }
            _ => MediaFormat::video(MIME_RAW_VIDEO, width, height)
                .with_color_format(Some(ColorFormat::YuvFlexible420)),
        };
        Ok(format)
    }

    fn release_output_buffer(&mut self, index: usize, render: bool) -> CodecResult<()> {
        let Some(info) = self.held_outputs.get_mut(index).and_then(Option::take) else {
            return Err(CodecError::InvalidBuffer { index });
        };
        if render && self.role == CodecRole::Decoder && info.size > 0 {
            self.render(info)?;
        }
        Ok(())
    }

    fn signal_end_of_input_stream(&mut self) -> CodecResult<()> {
        if self.role != CodecRole::Encoder || self.surface.is_none() {
            return Err(self.illegal("signal_end_of_input_stream"));
        }
        self.input_ended = true;
        Ok(())
    }

    fn stop(&mut self) -> CodecResult<()> {
        if matches!(
            self.state,
            CodecState::Uninitialized | CodecState::Released
        ) {
            return Err(self.illegal("stop"));
        }
        self.pending.clear();
        self.held_outputs.iter_mut().for_each(|held| *held = None);
        self.state = CodecState::Stopped;
        Ok(())
    }

    fn release(&mut self) -> CodecResult<()> {
        if self.state == CodecState::Released {
            return Ok(());
        }
        self.state = CodecState::Released;
        self.inputs.clear();
        self.free_inputs.clear();
        self.dequeued_inputs.clear();
        self.pending.clear();
        self.held_outputs.iter_mut().for_each(|held| *held = None);
        self.stats.record_release();
        Ok(())
    }
}
