//! Recast Core - hardware-accelerated video transcoding
//!
//! Converts an input video into a re-encoded MP4 at a target size, frame
//! rate, bitrate and codec. Decoding and encoding go through an abstract
//! codec platform, with a surface based zero-copy path, a buffer based
//! fallback, a six tier encoder strategy chain and passthrough audio.

pub mod codec;
pub mod config;
pub mod service;
pub mod tracing_setup;
pub mod transcode;

// Re-export main types for convenient access
pub use codec::{CodecError, CodecPlatform, MediaFormat, VideoCodec};
pub use config::{EncoderLimits, PipelineConfig, TranscoderConfig};
pub use service::{JobId, TranscodeService};
pub use transcode::{
    CancelFlag, Dimensions, ResolutionClass, StrategyTier, TranscodeError, TranscodeOutcome,
    TranscodeRequest, Transcoder, TransferMode,
};

pub type Result<T> = std::result::Result<T, TranscodeError>;
