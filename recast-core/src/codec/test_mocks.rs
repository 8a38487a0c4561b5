//! Mock codec platform for unit tests.
//!
//! Every mock writes to a shared `MockLog` so tests can assert on call order
//! and counts after the objects under test have consumed the handles.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::{
    BufferInfo, Codec, CodecCapabilities, CodecError, CodecInfo, CodecPlatform, CodecResult,
    CodecState, Extractor, InputSurface, MediaFormat, Muxer, OutputEvent, SampleFlags,
};

type ConfigPredicate = Arc<dyn Fn(&str, &MediaFormat) -> bool + Send + Sync>;

/// Shared record of everything the mocks were asked to do.
#[derive(Default)]
pub struct MockLog {
    events: Mutex<Vec<String>>,
    configured: Mutex<Vec<(String, MediaFormat)>>,
    written: Mutex<Vec<(usize, BufferInfo)>>,
    queued: Mutex<Vec<(&'static str, BufferInfo)>>,
}

impl MockLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record(&self, event: impl Into<String>) {
        self.events.lock().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    pub fn count(&self, event: &str) -> usize {
        self.events.lock().iter().filter(|e| *e == event).count()
    }

    /// Formats passed to `configure`, with the codec name, in call order.
    pub fn configured(&self) -> Vec<(String, MediaFormat)> {
        self.configured.lock().clone()
    }

    pub fn written(&self) -> Vec<(usize, BufferInfo)> {
        self.written.lock().clone()
    }

    /// Input buffers queued on `MockSlotCodec`s, with the codec role.
    pub fn queued(&self) -> Vec<(&'static str, BufferInfo)> {
        self.queued.lock().clone()
    }
}

/// Codec that accepts or rejects configuration and otherwise idles.
pub struct MockCodec {
    name: String,
    role: &'static str,
    state: CodecState,
    reject: Option<ConfigPredicate>,
    fail_release: bool,
    log: Arc<MockLog>,
}

impl MockCodec {
    pub fn new(name: &str, role: &'static str, log: Arc<MockLog>) -> Self {
        Self {
            name: name.to_string(),
            role,
            state: CodecState::Uninitialized,
            reject: None,
            fail_release: false,
            log,
        }
    }

    pub fn started(mut self) -> Self {
        self.state = CodecState::Started;
        self
    }

    pub fn failing_release(mut self) -> Self {
        self.fail_release = true;
        self
    }

    fn illegal(&self, operation: &'static str) -> CodecError {
        CodecError::IllegalState {
            operation,
            state: self.state,
        }
    }
}

impl Codec for MockCodec {
    fn name(&self) -> &str {
        &self.name
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
        self.log
            .configured
            .lock()
            .push((self.name.clone(), format.clone()));
        if let Some(reject) = &self.reject
            && reject(&self.name, format)
        {
            return Err(CodecError::Configuration {
                reason: format!("{} rejected format", self.name),
            });
        }
        self.state = CodecState::Configured;
        Ok(())
    }

    fn create_input_surface(&mut self) -> CodecResult<InputSurface> {
        if self.state != CodecState::Configured {
            return Err(self.illegal("create_input_surface"));
        }
        Ok(InputSurface::new())
    }

    fn start(&mut self) -> CodecResult<()> {
        if self.state != CodecState::Configured {
            return Err(self.illegal("start"));
        }
        self.state = CodecState::Started;
        Ok(())
    }

    fn dequeue_input_buffer(&mut self, _timeout: Duration) -> CodecResult<Option<usize>> {
        Ok(None)
    }

    fn input_buffer(&mut self, index: usize) -> CodecResult<&mut [u8]> {
        Err(CodecError::InvalidBuffer { index })
    }

    fn queue_input_buffer(&mut self, index: usize, _info: BufferInfo) -> CodecResult<()> {
        Err(CodecError::InvalidBuffer { index })
    }

    fn dequeue_output_buffer(&mut self, _timeout: Duration) -> CodecResult<OutputEvent> {
        Ok(OutputEvent::TryAgainLater)
    }

    fn output_buffer(&mut self, index: usize) -> CodecResult<&[u8]> {
        Err(CodecError::InvalidBuffer { index })
    }

    fn output_format(&self) -> CodecResult<MediaFormat> {
        Err(self.illegal("output_format"))
    }

    fn release_output_buffer(&mut self, index: usize, _render: bool) -> CodecResult<()> {
        Err(CodecError::InvalidBuffer { index })
    }

    fn signal_end_of_input_stream(&mut self) -> CodecResult<()> {
        Ok(())
    }

    fn stop(&mut self) -> CodecResult<()> {
        self.log.record(format!("{}.stop", self.role));
        self.state = CodecState::Stopped;
        Ok(())
    }

    fn release(&mut self) -> CodecResult<()> {
        self.log.record(format!("{}.release", self.role));
        self.state = CodecState::Released;
        if self.fail_release {
            return Err(CodecError::Platform {
                reason: format!("{} release failed", self.role),
            });
        }
        Ok(())
    }
}

/// Started codec with a single input slot and a single output slot.
///
/// `busy_for` makes the next polls for input find nothing free.
pub struct MockSlotCodec {
    role: &'static str,
    busy_polls: usize,
    input: Vec<u8>,
    output: Vec<u8>,
    log: Arc<MockLog>,
}

impl MockSlotCodec {
    pub fn new(role: &'static str, capacity: usize, log: Arc<MockLog>) -> Self {
        Self {
            role,
            busy_polls: 0,
            input: vec![0; capacity],
            output: Vec::new(),
            log,
        }
    }

    pub fn busy_for(mut self, polls: usize) -> Self {
        self.busy_polls = polls;
        self
    }

    pub fn with_output(mut self, data: Vec<u8>) -> Self {
        self.output = data;
        self
    }

    pub fn input(&self) -> &[u8] {
        &self.input
    }
}

impl Codec for MockSlotCodec {
    fn name(&self) -> &str {
        self.role
    }

    fn state(&self) -> CodecState {
        CodecState::Started
    }

    fn configure(
        &mut self,
        _format: &MediaFormat,
        _surface: Option<&InputSurface>,
    ) -> CodecResult<()> {
        Err(CodecError::IllegalState {
            operation: "configure",
            state: CodecState::Started,
        })
    }

    fn create_input_surface(&mut self) -> CodecResult<InputSurface> {
        Err(CodecError::Unsupported {
            reason: "slot codec takes buffers".to_string(),
        })
    }

    fn start(&mut self) -> CodecResult<()> {
        Ok(())
    }

    fn dequeue_input_buffer(&mut self, _timeout: Duration) -> CodecResult<Option<usize>> {
        self.log.record(format!("{}.dequeue_input", self.role));
        if self.busy_polls > 0 {
            self.busy_polls -= 1;
            return Ok(None);
        }
        Ok(Some(0))
    }

    fn input_buffer(&mut self, index: usize) -> CodecResult<&mut [u8]> {
        match index {
            0 => Ok(&mut self.input),
            _ => Err(CodecError::InvalidBuffer { index }),
        }
    }

    fn queue_input_buffer(&mut self, index: usize, info: BufferInfo) -> CodecResult<()> {
        if index != 0 {
            return Err(CodecError::InvalidBuffer { index });
        }
        self.log.queued.lock().push((self.role, info));
        Ok(())
    }

    fn dequeue_output_buffer(&mut self, _timeout: Duration) -> CodecResult<OutputEvent> {
        Ok(OutputEvent::TryAgainLater)
    }

    fn output_buffer(&mut self, index: usize) -> CodecResult<&[u8]> {
        match index {
            0 => Ok(&self.output),
            _ => Err(CodecError::InvalidBuffer { index }),
        }
    }

    fn output_format(&self) -> CodecResult<MediaFormat> {
        Err(CodecError::IllegalState {
            operation: "output_format",
            state: CodecState::Started,
        })
    }

    fn release_output_buffer(&mut self, index: usize, render: bool) -> CodecResult<()> {
        self.log
            .record(format!("{}.release_output {index} {render}", self.role));
        Ok(())
    }

    fn signal_end_of_input_stream(&mut self) -> CodecResult<()> {
        self.log.record(format!("{}.signal_eos", self.role));
        Ok(())
    }

    fn stop(&mut self) -> CodecResult<()> {
        Ok(())
    }

    fn release(&mut self) -> CodecResult<()> {
        Ok(())
    }
}

/// One sample served by `MockExtractor`.
#[derive(Debug, Clone)]
pub struct MockSample {
    pub track: usize,
    pub presentation_time_us: i64,
    pub flags: SampleFlags,
    pub data: Vec<u8>,
    /// Cleared for samples the container carries without a timestamp
    pub timed: bool,
}

impl MockSample {
    pub fn new(track: usize, presentation_time_us: i64, len: usize) -> Self {
        Self {
            track,
            presentation_time_us,
            flags: SampleFlags::NONE,
            data: vec![0xA5; len],
            timed: true,
        }
    }

    pub fn key_frame(mut self) -> Self {
        self.flags = SampleFlags::KEY_FRAME;
        self
    }

    pub fn untimed(mut self) -> Self {
        self.timed = false;
        self
    }
}

/// Extractor over an in-memory track list.
pub struct MockExtractor {
    tracks: Vec<MediaFormat>,
    samples: Vec<MockSample>,
    selected: Vec<usize>,
    cursor: usize,
    fail_release: bool,
    log: Arc<MockLog>,
}

impl MockExtractor {
    pub fn new(tracks: Vec<MediaFormat>, samples: Vec<MockSample>, log: Arc<MockLog>) -> Self {
        Self {
            tracks,
            samples,
            selected: Vec::new(),
            cursor: 0,
            fail_release: false,
            log,
        }
    }

    pub fn failing_release(mut self) -> Self {
        self.fail_release = true;
        self
    }

    fn skip_unselected(&mut self) {
        while self.cursor < self.samples.len()
            && !self.selected.contains(&self.samples[self.cursor].track)
        {
            self.cursor += 1;
        }
    }

    fn current(&self) -> Option<&MockSample> {
        self.samples.get(self.cursor)
    }
}

impl Extractor for MockExtractor {
    fn track_count(&self) -> usize {
        self.tracks.len()
    }

    fn track_format(&self, index: usize) -> CodecResult<MediaFormat> {
        self.tracks
            .get(index)
            .cloned()
            .ok_or_else(|| CodecError::Container {
                reason: format!("No track {index}"),
            })
    }

    fn select_track(&mut self, index: usize) -> CodecResult<()> {
        if index >= self.tracks.len() {
            return Err(CodecError::Container {
                reason: format!("No track {index}"),
            });
        }
        self.selected.push(index);
        self.skip_unselected();
        Ok(())
    }

    fn read_sample_data(&mut self, buffer: &mut [u8]) -> CodecResult<Option<usize>> {
        let Some(sample) = self.current() else {
            return Ok(None);
        };
        if sample.data.len() > buffer.len() {
            return Err(CodecError::BufferTooSmall {
                needed: sample.data.len(),
                available: buffer.len(),
            });
        }
        let len = sample.data.len();
        buffer[..len].copy_from_slice(&sample.data);
        Ok(Some(len))
    }

    fn sample_time(&self) -> Option<i64> {
        self.current()
            .filter(|s| s.timed)
            .map(|s| s.presentation_time_us)
    }

    fn sample_track_index(&self) -> Option<usize> {
        self.current().map(|s| s.track)
    }

    fn sample_flags(&self) -> SampleFlags {
        self.current().map(|s| s.flags).unwrap_or_default()
    }

    fn advance(&mut self) -> bool {
        if self.cursor < self.samples.len() {
            self.cursor += 1;
        }
        self.skip_unselected();
        self.cursor < self.samples.len()
    }

    fn release(&mut self) -> CodecResult<()> {
        self.log.record("extractor.release");
        if self.fail_release {
            return Err(CodecError::Platform {
                reason: "extractor release failed".to_string(),
            });
        }
        Ok(())
    }
}

/// Muxer that records writes instead of producing a file.
pub struct MockMuxer {
    tracks: usize,
    started: bool,
    fail_writes_after: Option<usize>,
    writes: usize,
    fail_release: bool,
    log: Arc<MockLog>,
}

impl MockMuxer {
    pub fn new(log: Arc<MockLog>) -> Self {
        Self {
            tracks: 0,
            started: false,
            fail_writes_after: None,
            writes: 0,
            fail_release: false,
            log,
        }
    }

    pub fn failing_writes_after(mut self, writes: usize) -> Self {
        self.fail_writes_after = Some(writes);
        self
    }

    pub fn failing_release(mut self) -> Self {
        self.fail_release = true;
        self
    }
}

impl Muxer for MockMuxer {
    fn add_track(&mut self, _format: &MediaFormat) -> CodecResult<usize> {
        self.tracks += 1;
        Ok(self.tracks - 1)
    }

    fn set_orientation_hint(&mut self, degrees: u32) -> CodecResult<()> {
        self.log.record(format!("muxer.orientation.{degrees}"));
        Ok(())
    }

    fn start(&mut self) -> CodecResult<()> {
        self.log.record("muxer.start");
        self.started = true;
        Ok(())
    }

    fn write_sample_data(
        &mut self,
        track: usize,
        _data: &[u8],
        info: &BufferInfo,
    ) -> CodecResult<()> {
        if let Some(limit) = self.fail_writes_after
            && self.writes >= limit
        {
            return Err(CodecError::Container {
                reason: "mock write failure".to_string(),
            });
        }
        self.writes += 1;
        self.log.written.lock().push((track, *info));
        Ok(())
    }

    fn stop(&mut self) -> CodecResult<()> {
        self.log.record("muxer.stop");
        self.started = false;
        Ok(())
    }

    fn release(&mut self) -> CodecResult<()> {
        self.log.record("muxer.release");
        if self.fail_release {
            return Err(CodecError::Platform {
                reason: "muxer release failed".to_string(),
            });
        }
        Ok(())
    }
}

/// Platform whose codec table and configuration behaviour tests control.
pub struct MockPlatform {
    infos: Option<Vec<CodecInfo>>,
    reject: Option<ConfigPredicate>,
    tracks: Vec<MediaFormat>,
    samples: Vec<MockSample>,
    pub log: Arc<MockLog>,
}

impl MockPlatform {
    pub fn new() -> Self {
        Self {
            infos: Some(vec![
                mock_encoder_info("mock.avc.hw", "video/avc", true),
                mock_encoder_info("mock.avc.sw", "video/avc", false),
            ]),
            reject: None,
            tracks: Vec::new(),
            samples: Vec::new(),
            log: MockLog::new(),
        }
    }

    /// Makes `codec_infos` fail.
    pub fn with_broken_codec_list(mut self) -> Self {
        self.infos = None;
        self
    }

    pub fn with_codec_infos(mut self, infos: Vec<CodecInfo>) -> Self {
        self.infos = Some(infos);
        self
    }

    /// Rejects `configure` calls for which `predicate(codec_name, format)` holds.
    pub fn rejecting(
        mut self,
        predicate: impl Fn(&str, &MediaFormat) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.reject = Some(Arc::new(predicate));
        self
    }

    pub fn with_media(mut self, tracks: Vec<MediaFormat>, samples: Vec<MockSample>) -> Self {
        self.tracks = tracks;
        self.samples = samples;
        self
    }

    fn codec(&self, name: &str, role: &'static str) -> Box<dyn Codec> {
        self.log.record(format!("create.{role}"));
        let mut codec = MockCodec::new(name, role, Arc::clone(&self.log));
        codec.reject = self.reject.clone();
        Box::new(codec)
    }
}

impl Default for MockPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl CodecPlatform for MockPlatform {
    fn name(&self) -> &str {
        "mock"
    }

    fn codec_infos(&self) -> CodecResult<Vec<CodecInfo>> {
        self.infos.clone().ok_or_else(|| CodecError::Platform {
            reason: "codec list unavailable".to_string(),
        })
    }

    fn open_extractor(&self, _path: &Path) -> CodecResult<Box<dyn Extractor>> {
        self.log.record("create.extractor");
        Ok(Box::new(MockExtractor::new(
            self.tracks.clone(),
            self.samples.clone(),
            Arc::clone(&self.log),
        )))
    }

    fn create_decoder_by_type(&self, mime: &str) -> CodecResult<Box<dyn Codec>> {
        Ok(self.codec(&format!("mock.decoder.{mime}"), "decoder"))
    }

    fn create_encoder_by_type(&self, mime: &str) -> CodecResult<Box<dyn Codec>> {
        Ok(self.codec(&format!("mock.default.{mime}"), "encoder"))
    }

    fn create_codec_by_name(&self, name: &str) -> CodecResult<Box<dyn Codec>> {
        let known = self
            .infos
            .as_ref()
            .is_some_and(|infos| infos.iter().any(|info| info.name == name));
        if !known {
            return Err(CodecError::NoCodec {
                mime: name.to_string(),
            });
        }
        Ok(self.codec(name, "encoder"))
    }

    fn create_muxer(&self, _path: &Path) -> CodecResult<Box<dyn Muxer>> {
        self.log.record("create.muxer");
        Ok(Box::new(MockMuxer::new(Arc::clone(&self.log))))
    }
}

pub fn mock_encoder_info(name: &str, mime: &str, hardware: bool) -> CodecInfo {
    CodecInfo {
        name: name.to_string(),
        is_encoder: true,
        hardware_accelerated: hardware,
        supported_types: vec![mime.to_string()],
        capabilities: CodecCapabilities::default(),
    }
}
