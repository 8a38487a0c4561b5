//! Decoder to encoder transfer loop.
//!
//! One loop body serves both transfer methods. Each pass feeds one sample
//! to the decoder, drains one decoder output through the pluggable
//! `FrameTransfer`, and drains one encoder output into the muxer. Every call
//! into a codec waits at most `poll_timeout`, so a silent codec can only
//! stall the loop until the stall guard fires.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use super::error::TranscodeError;
use super::progress::ProgressReporter;
use super::strategy::TransferMode;
use super::tracks::TrackDescriptor;
use crate::codec::{BufferInfo, Codec, Extractor, Muxer, OutputEvent, SampleFlags};

/// Cooperative cancellation shared between a service and its worker.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Moves decoded frames from the decoder to the encoder.
pub trait FrameTransfer {
    fn mode(&self) -> TransferMode;

    /// Handles the decoder output buffer at `index`. Must return it to the
    /// decoder. Returns true when data moved towards the encoder.
    ///
    /// # Errors
    /// - `TranscodeError::Codec` - A codec call failed
    fn transfer(
        &mut self,
        decoder: &mut dyn Codec,
        encoder: &mut dyn Codec,
        index: usize,
        info: BufferInfo,
    ) -> Result<bool, TranscodeError>;

    /// Called once per pass for work deferred by `transfer`.
    ///
    /// # Errors
    /// - `TranscodeError::Codec` - A codec call failed
    fn pump(&mut self, _encoder: &mut dyn Codec) -> Result<bool, TranscodeError> {
        Ok(false)
    }

    /// Decoded frames handed to the encoder so far.
    fn frames_transferred(&self) -> u64;

    /// Decoded frames dropped because the encoder had no room.
    fn frames_skipped(&self) -> u64 {
        0
    }
}

/// Decoder renders straight onto the encoder's input surface.
#[derive(Debug, Default)]
pub struct SurfaceTransfer {
    frames_rendered: u64,
}

impl SurfaceTransfer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FrameTransfer for SurfaceTransfer {
    fn mode(&self) -> TransferMode {
        TransferMode::Surface
    }

    fn transfer(
        &mut self,
        decoder: &mut dyn Codec,
        encoder: &mut dyn Codec,
        index: usize,
        info: BufferInfo,
    ) -> Result<bool, TranscodeError> {
        let render = info.size > 0;
        decoder.release_output_buffer(index, render)?;
        if render {
            self.frames_rendered += 1;
        }

        if info.is_end_of_stream() {
            debug!(
                "Decoder finished after {} rendered frames, signalling encoder",
                self.frames_rendered
            );
            encoder.signal_end_of_input_stream()?;
        }
        Ok(render)
    }

    fn frames_transferred(&self) -> u64 {
        self.frames_rendered
    }
}

/// Decoded frames are copied into encoder input buffers.
pub struct BufferTransfer {
    poll_timeout: Duration,
    frames_copied: u64,
    frames_skipped: u64,
    last_presentation_time_us: i64,
    eos_pending: bool,
    eos_forwarded: bool,
}

impl BufferTransfer {
    pub fn new(poll_timeout: Duration) -> Self {
        Self {
            poll_timeout,
            frames_copied: 0,
            frames_skipped: 0,
            last_presentation_time_us: 0,
            eos_pending: false,
            eos_forwarded: false,
        }
    }
}

impl FrameTransfer for BufferTransfer {
    fn mode(&self) -> TransferMode {
        TransferMode::Buffer
    }

    fn transfer(
        &mut self,
        decoder: &mut dyn Codec,
        encoder: &mut dyn Codec,
        index: usize,
        info: BufferInfo,
    ) -> Result<bool, TranscodeError> {
        let end_of_stream = info.is_end_of_stream();
        let mut moved = false;

        if info.size > 0 {
            match encoder.dequeue_input_buffer(self.poll_timeout)? {
                Some(input_index) => {
                    let source = payload(decoder.output_buffer(index)?, &info);
                    let target = encoder.input_buffer(input_index)?;
                    let len = source.len().min(target.len());
                    target[..len].copy_from_slice(&source[..len]);

                    let flags = if end_of_stream {
                        SampleFlags::END_OF_STREAM
                    } else {
                        SampleFlags::NONE
                    };
                    encoder.queue_input_buffer(
                        input_index,
                        BufferInfo::new(0, len, info.presentation_time_us, flags),
                    )?;

                    self.frames_copied += 1;
                    self.eos_forwarded |= end_of_stream;
                    moved = true;
                }
                None => {
                    self.frames_skipped += 1;
                    trace!(
                        "No encoder input free, skipping frame at {} us",
                        info.presentation_time_us
                    );
                }
            }
        }

        self.last_presentation_time_us = info.presentation_time_us;
        decoder.release_output_buffer(index, false)?;

        if end_of_stream && !self.eos_forwarded {
            self.eos_pending = true;
            moved |= self.pump(encoder)?;
        }
        Ok(moved)
    }

    fn pump(&mut self, encoder: &mut dyn Codec) -> Result<bool, TranscodeError> {
        if !self.eos_pending || self.eos_forwarded {
            return Ok(false);
        }
        let Some(input_index) = encoder.dequeue_input_buffer(self.poll_timeout)? else {
            return Ok(false);
        };

        encoder.queue_input_buffer(
            input_index,
            BufferInfo::end_of_stream(self.last_presentation_time_us),
        )?;
        self.eos_forwarded = true;
        self.eos_pending = false;
        debug!(
            "Forwarded end of stream to encoder after {} frames ({} skipped)",
            self.frames_copied, self.frames_skipped
        );
        Ok(true)
    }

    fn frames_transferred(&self) -> u64 {
        self.frames_copied
    }

    fn frames_skipped(&self) -> u64 {
        self.frames_skipped
    }
}

/// Valid region of an output buffer.
fn payload<'b>(buffer: &'b [u8], info: &BufferInfo) -> &'b [u8] {
    let end = info.offset.saturating_add(info.size).min(buffer.len());
    let start = info.offset.min(end);
    &buffer[start..end]
}

/// Where the transfer loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopPhase {
    /// Samples still go into the decoder
    Feeding,
    /// Input exhausted, decoder still producing frames
    Decoding,
    /// Decoder done, waiting for the encoder's end of stream
    Flushing,
    Finished,
}

impl fmt::Display for LoopPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopPhase::Feeding => write!(f, "feeding"),
            LoopPhase::Decoding => write!(f, "decoding"),
            LoopPhase::Flushing => write!(f, "flushing"),
            LoopPhase::Finished => write!(f, "finished"),
        }
    }
}

/// Handles and settings one loop run works with.
pub struct TransferLoop<'a> {
    pub extractor: &'a mut dyn Extractor,
    pub decoder: &'a mut dyn Codec,
    pub encoder: &'a mut dyn Codec,
    pub muxer: &'a mut dyn Muxer,
    /// Set when `muxer.start` succeeded
    pub muxer_started: &'a mut bool,
    pub progress: &'a mut ProgressReporter,
    pub cancel: &'a CancelFlag,
    /// Audio track added to the muxer alongside video
    pub audio: Option<&'a TrackDescriptor>,
    /// Rotation written as the muxer orientation hint
    pub rotation_degrees: u32,
    pub poll_timeout: Duration,
    pub stall_timeout: Duration,
}

/// Counters and muxer track indices from a finished loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopSummary {
    pub samples_fed: u64,
    pub frames_decoded: u64,
    pub frames_transferred: u64,
    /// Buffer path only: frames dropped for want of encoder input
    pub frames_skipped: u64,
    pub samples_written: u64,
    pub video_track: Option<usize>,
    pub audio_track: Option<usize>,
}

#[derive(Default)]
struct LoopState {
    input_done: bool,
    decoder_done: bool,
    encoder_done: bool,
    summary: LoopSummary,
}

impl LoopState {
    fn phase(&self) -> LoopPhase {
        if self.encoder_done {
            LoopPhase::Finished
        } else if self.decoder_done {
            LoopPhase::Flushing
        } else if self.input_done {
            LoopPhase::Decoding
        } else {
            LoopPhase::Feeding
        }
    }
}

impl TransferLoop<'_> {
    /// Runs until the encoder reports end of stream.
    ///
    /// # Errors
    /// - `TranscodeError::Cancelled` - The cancel flag was raised
    /// - `TranscodeError::Pipeline` - No buffer moved for `stall_timeout`,
    ///   or the encoder misbehaved
    /// - `TranscodeError::Codec` - A codec, extractor or muxer call failed
    pub fn run(&mut self, transfer: &mut dyn FrameTransfer) -> Result<LoopSummary, TranscodeError> {
        let mut state = LoopState::default();
        let mut last_activity = Instant::now();

        debug!("Starting {} transfer loop", transfer.mode());
        while !state.encoder_done {
            if self.cancel.is_cancelled() {
                debug!("Transfer loop cancelled while {}", state.phase());
                return Err(TranscodeError::Cancelled);
            }

            let mut moved = self.feed(&mut state)?;
            if !state.decoder_done {
                moved |= self.drain_decoder(&mut state, transfer)?;
            }
            moved |= transfer.pump(self.encoder)?;
            moved |= self.drain_encoder(&mut state)?;

            if moved {
                last_activity = Instant::now();
            } else if last_activity.elapsed() > self.stall_timeout {
                return Err(TranscodeError::Pipeline {
                    stage: "transfer",
                    reason: format!(
                        "no progress for {:?} while {}",
                        self.stall_timeout,
                        state.phase()
                    ),
                });
            }
        }

        state.summary.frames_transferred = transfer.frames_transferred();
        state.summary.frames_skipped = transfer.frames_skipped();
        debug!(
            "{} transfer loop finished: {} samples in, {} frames decoded, {} transferred ({} skipped), {} samples out",
            transfer.mode(),
            state.summary.samples_fed,
            state.summary.frames_decoded,
            state.summary.frames_transferred,
            state.summary.frames_skipped,
            state.summary.samples_written
        );
        Ok(state.summary)
    }

    fn feed(&mut self, state: &mut LoopState) -> Result<bool, TranscodeError> {
        if state.input_done {
            return Ok(false);
        }
        let Some(index) = self.decoder.dequeue_input_buffer(self.poll_timeout)? else {
            return Ok(false);
        };

        let buffer = self.decoder.input_buffer(index)?;
        match self.extractor.read_sample_data(buffer)? {
            None => {
                self.decoder
                    .queue_input_buffer(index, BufferInfo::end_of_stream(0))?;
                state.input_done = true;
                debug!(
                    "Input exhausted after {} samples",
                    state.summary.samples_fed
                );
            }
            Some(size) => {
                let pts = self.extractor.sample_time().unwrap_or(0);
                let flags = self
                    .extractor
                    .sample_flags()
                    .without(SampleFlags::END_OF_STREAM);
                self.decoder
                    .queue_input_buffer(index, BufferInfo::new(0, size, pts, flags))?;
                self.progress.report_position(pts);
                state.summary.samples_fed += 1;
                trace!("Fed {size} bytes at {pts} us");
                self.extractor.advance();
            }
        }
        Ok(true)
    }

    fn drain_decoder(
        &mut self,
        state: &mut LoopState,
        transfer: &mut dyn FrameTransfer,
    ) -> Result<bool, TranscodeError> {
        match self.decoder.dequeue_output_buffer(self.poll_timeout)? {
            OutputEvent::TryAgainLater => Ok(false),
            OutputEvent::FormatChanged => {
                debug!("Decoder output format changed");
                Ok(true)
            }
            OutputEvent::Buffer { index, info } => {
                if info.size > 0 {
                    state.summary.frames_decoded += 1;
                }
                let moved = transfer.transfer(self.decoder, self.encoder, index, info)?;
                if info.is_end_of_stream() {
                    state.decoder_done = true;
                }
                Ok(moved || info.is_end_of_stream())
            }
        }
    }

    fn drain_encoder(&mut self, state: &mut LoopState) -> Result<bool, TranscodeError> {
        match self.encoder.dequeue_output_buffer(self.poll_timeout)? {
            OutputEvent::TryAgainLater => Ok(false),
            OutputEvent::FormatChanged => {
                self.start_muxer(state)?;
                Ok(true)
            }
            OutputEvent::Buffer { index, info } => {
                if info.flags.is_codec_config() {
                    trace!("Dropping {} bytes of codec config", info.size);
                } else if info.size > 0 {
                    let Some(track) = state.summary.video_track.filter(|_| *self.muxer_started)
                    else {
                        return Err(TranscodeError::Pipeline {
                            stage: "mux",
                            reason: "encoder produced a sample before its output format".to_string(),
                        });
                    };
                    let data = payload(self.encoder.output_buffer(index)?, &info);
                    self.muxer.write_sample_data(
                        track,
                        data,
                        &BufferInfo::new(
                            0,
                            data.len(),
                            info.presentation_time_us,
                            info.flags.without(SampleFlags::END_OF_STREAM),
                        ),
                    )?;
                    state.summary.samples_written += 1;
                }

                self.encoder.release_output_buffer(index, false)?;
                if info.is_end_of_stream() {
                    state.encoder_done = true;
                }
                Ok(true)
            }
        }
    }

    /// Adds the tracks and starts the muxer. The only place it is started.
    fn start_muxer(&mut self, state: &mut LoopState) -> Result<(), TranscodeError> {
        if *self.muxer_started {
            return Err(TranscodeError::Pipeline {
                stage: "mux",
                reason: "encoder output format changed after the muxer started".to_string(),
            });
        }

        let format = self.encoder.output_format()?;
        debug!(
            "Encoder output format: {} {:?}x{:?}",
            format.mime, format.width, format.height
        );

        state.summary.video_track = Some(self.muxer.add_track(&format)?);
        if let Some(audio) = self.audio {
            state.summary.audio_track = Some(self.muxer.add_track(&audio.format)?);
        }
        if self.rotation_degrees != 0 {
            self.muxer.set_orientation_hint(self.rotation_degrees)?;
        }

        self.muxer.start()?;
        *self.muxer_started = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::test_mocks::{MockLog, MockSlotCodec};

    const POLL: Duration = Duration::from_millis(1);

    fn frame(size: usize, pts: i64, flags: SampleFlags) -> BufferInfo {
        BufferInfo::new(0, size, pts, flags)
    }

    #[test]
    fn test_payload_respects_offset_and_bounds() {
        let buffer = [0u8, 1, 2, 3, 4, 5];
        assert_eq!(
            payload(&buffer, &BufferInfo::new(2, 3, 0, SampleFlags::NONE)),
            &[2, 3, 4]
        );
        assert_eq!(
            payload(&buffer, &BufferInfo::new(4, 10, 0, SampleFlags::NONE)),
            &[4, 5]
        );
        assert!(payload(&buffer, &BufferInfo::new(9, 1, 0, SampleFlags::NONE)).is_empty());
    }

    #[test]
    fn test_cancel_flag_is_shared() {
        let flag = CancelFlag::new();
        let worker = flag.clone();
        assert!(!worker.is_cancelled());
        flag.cancel();
        assert!(worker.is_cancelled());
    }

    #[test]
    fn test_loop_phase_progression() {
        let mut state = LoopState::default();
        assert_eq!(state.phase(), LoopPhase::Feeding);
        state.input_done = true;
        assert_eq!(state.phase(), LoopPhase::Decoding);
        state.decoder_done = true;
        assert_eq!(state.phase(), LoopPhase::Flushing);
        state.encoder_done = true;
        assert_eq!(state.phase(), LoopPhase::Finished);
    }

    #[test]
    fn test_buffer_transfer_skips_frame_without_free_input() {
        let log = MockLog::new();
        let mut decoder = MockSlotCodec::new("decoder", 0, log.clone()).with_output(vec![7; 16]);
        let mut encoder = MockSlotCodec::new("encoder", 16, log.clone()).busy_for(1);
        let mut transfer = BufferTransfer::new(POLL);

        let moved = transfer
            .transfer(&mut decoder, &mut encoder, 0, frame(16, 33_366, SampleFlags::NONE))
            .unwrap();

        assert!(!moved);
        assert_eq!(transfer.frames_skipped(), 1);
        assert_eq!(transfer.frames_transferred(), 0);
        assert!(log.queued().is_empty());
        assert_eq!(log.count("decoder.release_output 0 false"), 1);

        // Next frame finds the slot free again.
        let moved = transfer
            .transfer(&mut decoder, &mut encoder, 0, frame(16, 66_733, SampleFlags::NONE))
            .unwrap();
        assert!(moved);
        assert_eq!(transfer.frames_transferred(), 1);
        assert_eq!(encoder.input(), &[7; 16]);
        assert_eq!(
            log.queued(),
            vec![("encoder", frame(16, 66_733, SampleFlags::NONE))]
        );
        assert_eq!(log.count("decoder.release_output 0 false"), 2);
    }

    #[test]
    fn test_buffer_transfer_retries_end_of_stream_once() {
        let log = MockLog::new();
        let mut decoder = MockSlotCodec::new("decoder", 0, log.clone()).with_output(vec![3; 8]);
        // Busy for the payload, the end-of-stream attempt inside `transfer`
        // and the first pump.
        let mut encoder = MockSlotCodec::new("encoder", 8, log.clone()).busy_for(3);
        let mut transfer = BufferTransfer::new(POLL);

        let moved = transfer
            .transfer(
                &mut decoder,
                &mut encoder,
                0,
                frame(8, 100_000, SampleFlags::END_OF_STREAM),
            )
            .unwrap();
        assert!(!moved);
        assert!(transfer.eos_pending);
        assert!(!transfer.eos_forwarded);
        assert_eq!(transfer.frames_skipped(), 1);
        assert_eq!(log.count("decoder.release_output 0 false"), 1);

        assert!(!transfer.pump(&mut encoder).unwrap());
        assert!(log.queued().is_empty());

        assert!(transfer.pump(&mut encoder).unwrap());
        assert_eq!(
            log.queued(),
            vec![("encoder", BufferInfo::end_of_stream(100_000))]
        );
        assert_eq!(log.queued()[0].1.size, 0);
        assert!(!transfer.eos_pending);

        let polls = log.count("encoder.dequeue_input");
        assert!(!transfer.pump(&mut encoder).unwrap());
        assert_eq!(log.queued().len(), 1);
        assert_eq!(log.count("encoder.dequeue_input"), polls);
    }

    #[test]
    fn test_buffer_transfer_end_of_stream_rides_on_last_frame() {
        let log = MockLog::new();
        let mut decoder = MockSlotCodec::new("decoder", 0, log.clone()).with_output(vec![1; 4]);
        let mut encoder = MockSlotCodec::new("encoder", 4, log.clone());
        let mut transfer = BufferTransfer::new(POLL);

        let moved = transfer
            .transfer(&mut decoder, &mut encoder, 0, frame(4, 5_000, SampleFlags::END_OF_STREAM))
            .unwrap();

        assert!(moved);
        assert!(transfer.eos_forwarded);
        assert!(!transfer.eos_pending);
        assert_eq!(
            log.queued(),
            vec![("encoder", frame(4, 5_000, SampleFlags::END_OF_STREAM))]
        );
        assert!(!transfer.pump(&mut encoder).unwrap());
        assert_eq!(log.queued().len(), 1);
    }

    #[test]
    fn test_surface_transfer_counts_rendered_frames() {
        let log = MockLog::new();
        let mut decoder = MockSlotCodec::new("decoder", 0, log.clone());
        let mut encoder = MockSlotCodec::new("encoder", 0, log.clone());
        let mut transfer = SurfaceTransfer::new();

        assert!(transfer
            .transfer(&mut decoder, &mut encoder, 0, frame(64, 0, SampleFlags::NONE))
            .unwrap());
        assert!(!transfer
            .transfer(&mut decoder, &mut encoder, 0, frame(0, 0, SampleFlags::END_OF_STREAM))
            .unwrap());

        assert_eq!(transfer.frames_transferred(), 1);
        assert_eq!(transfer.frames_skipped(), 0);
        assert_eq!(log.count("decoder.release_output 0 true"), 1);
        assert_eq!(log.count("decoder.release_output 0 false"), 1);
        assert_eq!(log.count("encoder.signal_eos"), 1);
    }
}
