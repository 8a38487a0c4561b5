//! Codec and container boundary.
//!
//! The pipeline never talks to a vendor API directly. A `CodecPlatform`
//! hands out decoders, encoders, extractors and muxers behind the traits in
//! this module, and the pipeline drives them with bounded-wait polling:
//!
//! - `Codec`: slot based queue/dequeue model shared by decoders and encoders
//! - `Extractor`: sample cursor over an input container
//! - `Muxer`: output container writer
//! - `InputSurface`: zero-copy frame hand-off from decoder to encoder
//!
//! Production platforms live behind feature flags; `recast-sim` provides a
//! deterministic implementation for tests and demos.

pub mod capabilities;
#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;
pub mod format;
pub mod raw_frame;
pub mod surface;

#[cfg(test)]
pub(crate) mod test_mocks;

use std::path::Path;
use std::time::Duration;

pub use capabilities::{CodecCapabilities, CodecInfo};
pub use format::{
    BufferInfo, ColorFormat, CropRect, MIME_AAC, MIME_AUDIO_PREFIX, MIME_AV1, MIME_AVC,
    MIME_HEVC, MIME_VIDEO_PREFIX, MediaFormat, NativeHandle, OutputEvent, SampleFlags,
    VideoCodec,
};
pub use raw_frame::{RAW_FRAME_HEADER_LEN, RawFrameHeader, yuv420_len};
pub use surface::{InputSurface, SurfaceFrame};

/// Errors raised by platform codec, extractor and muxer objects.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Codec configuration rejected: {reason}")]
    Configuration { reason: String },

    #[error("Illegal state for {operation}: codec is {state:?}")]
    IllegalState {
        operation: &'static str,
        state: CodecState,
    },

    #[error("Unsupported operation: {reason}")]
    Unsupported { reason: String },

    #[error("No codec available for {mime}")]
    NoCodec { mime: String },

    #[error("Invalid buffer index: {index}")]
    InvalidBuffer { index: usize },

    #[error("Buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall { needed: usize, available: usize },

    #[error("Surface {id} has been released")]
    SurfaceReleased { id: u64 },

    #[error("Container error: {reason}")]
    Container { reason: String },

    #[error("Platform error: {reason}")]
    Platform { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CodecError {
    /// Returns true for errors raised while a codec validated its configuration.
    pub fn is_configuration(&self) -> bool {
        matches!(self, CodecError::Configuration { .. })
    }
}

pub type CodecResult<T> = Result<T, CodecError>;

/// Lifecycle state of a decoder or encoder instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecState {
    Uninitialized,
    Configured,
    Started,
    Flushed,
    Stopped,
    Released,
}

impl CodecState {
    /// Returns true while the codec holds running resources that `stop` tears down.
    pub fn is_running(self) -> bool {
        matches!(self, CodecState::Started | CodecState::Flushed)
    }
}

/// Decoder or encoder driven through bounded-wait buffer polling.
///
/// Input side: `dequeue_input_buffer` hands out a slot index, the caller fills
/// `input_buffer(index)` and returns it with `queue_input_buffer`. Output side:
/// `dequeue_output_buffer` reports a ready buffer, a format change, or nothing
/// within the timeout; ready buffers go back with `release_output_buffer`.
pub trait Codec: Send {
    fn name(&self) -> &str;

    fn state(&self) -> CodecState;

    /// Configures the codec. Decoders given a surface render into it.
    ///
    /// # Errors
    /// - `CodecError::Configuration` - Parameters rejected; the codec stays uninitialized
    /// - `CodecError::IllegalState` - Codec was already configured
    fn configure(&mut self, format: &MediaFormat, surface: Option<&InputSurface>)
    -> CodecResult<()>;

    /// Creates the encoder's input surface. Must be called between `configure`
    /// and `start`.
    ///
    /// # Errors
    /// - `CodecError::Unsupported` - Codec cannot take surface input
    fn create_input_surface(&mut self) -> CodecResult<InputSurface>;

    /// # Errors
    /// - `CodecError::IllegalState` - Codec is not configured
    fn start(&mut self) -> CodecResult<()>;

    /// Returns a free input slot, or `None` if none became free within `timeout`.
    ///
    /// # Errors
    /// - `CodecError::IllegalState` - Codec is not started or takes surface input
    fn dequeue_input_buffer(&mut self, timeout: Duration) -> CodecResult<Option<usize>>;

    /// Writable storage of a dequeued input slot.
    ///
    /// # Errors
    /// - `CodecError::InvalidBuffer` - `index` is not currently dequeued
    fn input_buffer(&mut self, index: usize) -> CodecResult<&mut [u8]>;

    /// Returns a filled input slot to the codec.
    ///
    /// # Errors
    /// - `CodecError::InvalidBuffer` - `index` is not currently dequeued
    fn queue_input_buffer(&mut self, index: usize, info: BufferInfo) -> CodecResult<()>;

    /// Polls the output side for at most `timeout`.
    ///
    /// # Errors
    /// - `CodecError::IllegalState` - Codec is not started
    fn dequeue_output_buffer(&mut self, timeout: Duration) -> CodecResult<OutputEvent>;

    /// Payload of a dequeued output buffer.
    ///
    /// # Errors
    /// - `CodecError::InvalidBuffer` - `index` is not currently dequeued
    fn output_buffer(&mut self, index: usize) -> CodecResult<&[u8]>;

    /// Current output format, valid after the first `FormatChanged` event.
    ///
    /// # Errors
    /// - `CodecError::IllegalState` - No output format announced yet
    fn output_format(&self) -> CodecResult<MediaFormat>;

    /// Returns an output buffer. Decoders with a surface render the frame
    /// onto it when `render` is true.
    ///
    /// # Errors
    /// - `CodecError::InvalidBuffer` - `index` is not currently dequeued
    fn release_output_buffer(&mut self, index: usize, render: bool) -> CodecResult<()>;

    /// Tells a surface-fed encoder that no more frames will be rendered.
    ///
    /// # Errors
    /// - `CodecError::IllegalState` - Codec has no input surface
    fn signal_end_of_input_stream(&mut self) -> CodecResult<()>;

    /// # Errors
    /// - `CodecError::IllegalState` - Codec was never configured
    fn stop(&mut self) -> CodecResult<()>;

    /// Frees the codec. Safe to call in any state.
    ///
    /// # Errors
    /// - `CodecError::Platform` - Backend failed to free native resources
    fn release(&mut self) -> CodecResult<()>;
}

/// Sample cursor over an input container.
pub trait Extractor: Send {
    fn track_count(&self) -> usize;

    /// # Errors
    /// - `CodecError::Container` - `index` is out of range or unreadable
    fn track_format(&self, index: usize) -> CodecResult<MediaFormat>;

    /// Adds a track to the set the cursor walks.
    ///
    /// # Errors
    /// - `CodecError::Container` - `index` is out of range
    fn select_track(&mut self, index: usize) -> CodecResult<()>;

    /// Copies the current sample into `buffer`. Returns `None` once every
    /// selected track is exhausted.
    ///
    /// # Errors
    /// - `CodecError::BufferTooSmall` - Sample does not fit in `buffer`
    fn read_sample_data(&mut self, buffer: &mut [u8]) -> CodecResult<Option<usize>>;

    /// Presentation time of the current sample in microseconds.
    fn sample_time(&self) -> Option<i64>;

    /// Track index of the current sample.
    fn sample_track_index(&self) -> Option<usize>;

    fn sample_flags(&self) -> SampleFlags;

    /// Moves to the next sample. Returns false when none remain.
    fn advance(&mut self) -> bool;

    /// # Errors
    /// - `CodecError::Platform` - Backend failed to close the container
    fn release(&mut self) -> CodecResult<()>;
}

/// Output container writer.
///
/// Tracks are added while the muxer is created, samples are only accepted
/// between `start` and `stop`.
pub trait Muxer: Send {
    /// Returns the index used for `write_sample_data`.
    ///
    /// # Errors
    /// - `CodecError::IllegalState` - Muxer already started
    fn add_track(&mut self, format: &MediaFormat) -> CodecResult<usize>;

    /// Records the display rotation for the video track.
    ///
    /// # Errors
    /// - `CodecError::Configuration` - Rotation is not a multiple of 90
    fn set_orientation_hint(&mut self, degrees: u32) -> CodecResult<()>;

    /// # Errors
    /// - `CodecError::IllegalState` - No tracks added or already started
    fn start(&mut self) -> CodecResult<()>;

    /// # Errors
    /// - `CodecError::IllegalState` - Muxer not started
    /// - `CodecError::Container` - Sample rejected by the container
    fn write_sample_data(&mut self, track: usize, data: &[u8], info: &BufferInfo)
    -> CodecResult<()>;

    /// Finalizes the container.
    ///
    /// # Errors
    /// - `CodecError::IllegalState` - Muxer not started
    /// - `CodecError::Io` - Writing the container failed
    fn stop(&mut self) -> CodecResult<()>;

    /// # Errors
    /// - `CodecError::Platform` - Backend failed to free resources
    fn release(&mut self) -> CodecResult<()>;
}

/// Host codec subsystem: codec discovery and factory for every handle the
/// pipeline uses.
pub trait CodecPlatform: Send + Sync {
    /// Short identifier for logs.
    fn name(&self) -> &str;

    /// Every codec installed on the device.
    ///
    /// # Errors
    /// - `CodecError::Platform` - The codec list could not be queried
    fn codec_infos(&self) -> CodecResult<Vec<CodecInfo>>;

    /// # Errors
    /// - `CodecError::Io` - Input cannot be opened
    /// - `CodecError::Container` - Input is not a readable container
    fn open_extractor(&self, path: &Path) -> CodecResult<Box<dyn Extractor>>;

    /// Default decoder for `mime`.
    ///
    /// # Errors
    /// - `CodecError::NoCodec` - No decoder handles `mime`
    fn create_decoder_by_type(&self, mime: &str) -> CodecResult<Box<dyn Codec>>;

    /// Default encoder for `mime`.
    ///
    /// # Errors
    /// - `CodecError::NoCodec` - No encoder handles `mime`
    fn create_encoder_by_type(&self, mime: &str) -> CodecResult<Box<dyn Codec>>;

    /// Specific codec from `codec_infos`.
    ///
    /// # Errors
    /// - `CodecError::NoCodec` - No codec is registered under `name`
    fn create_codec_by_name(&self, name: &str) -> CodecResult<Box<dyn Codec>>;

    /// MP4 writer for `path`, truncating any existing file.
    ///
    /// # Errors
    /// - `CodecError::Io` - Output cannot be created
    fn create_muxer(&self, path: &Path) -> CodecResult<Box<dyn Muxer>>;
}
