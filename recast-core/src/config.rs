//! Centralized configuration for Recast.
//!
//! Every timeout, buffer size and encoder limit the pipeline uses is defined
//! here and passed into the components that need it.

use std::time::Duration;

/// Central configuration for the transcode pipeline.
#[derive(Debug, Clone, Default)]
pub struct TranscoderConfig {
    pub pipeline: PipelineConfig,
    pub limits: EncoderLimits,
}

/// Transfer loop and teardown timing.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Bounded wait for every dequeue call in the transfer loop
    pub poll_timeout: Duration,
    /// Attempt fails when no buffer moves for this long
    pub stall_timeout: Duration,
    /// Sample buffer used by the audio copier
    pub audio_buffer_size: usize,
    /// Pause after teardown so the platform can reclaim hardware
    pub teardown_settle: Duration,
    /// Canonical size used for encoder availability checks
    pub probe_width: u32,
    pub probe_height: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_millis(10),
            stall_timeout: Duration::from_secs(10),
            audio_buffer_size: 65536, // 64 KiB
            teardown_settle: Duration::from_millis(250),
            probe_width: 1280,
            probe_height: 720,
        }
    }
}

/// Bounds applied by the encoder strategy chain.
///
/// Edge limits are orientation agnostic: `*_long_edge` bounds the larger
/// picture edge and `*_short_edge` the smaller one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderLimits {
    /// Device-safe maxima for the capability-checked tier
    pub safe_long_edge: u32,
    pub safe_short_edge: u32,
    pub safe_bit_rate: u32,
    pub safe_frame_rate: u32,
    /// Conservative H.264 tier
    pub conservative_long_edge: u32,
    pub conservative_short_edge: u32,
    pub conservative_bit_rate: u32,
    pub conservative_frame_rate: u32,
    /// Minimum safe baseline, landscape orientation
    pub baseline_width: u32,
    pub baseline_height: u32,
    pub baseline_bit_rate: u32,
    pub baseline_frame_rate: u32,
    /// Macroblock alignment for the aligned tier
    pub alignment: u32,
    /// Keyframe interval for the first configure of each tier
    pub key_frame_interval_secs: u32,
    /// Keyframe interval for the nested retry
    pub fallback_key_frame_interval_secs: u32,
}

impl Default for EncoderLimits {
    fn default() -> Self {
        Self {
            safe_long_edge: 1920,
            safe_short_edge: 1080,
            safe_bit_rate: 5_000_000,
            safe_frame_rate: 30,
            conservative_long_edge: 1280,
            conservative_short_edge: 720,
            conservative_bit_rate: 2_000_000,
            conservative_frame_rate: 30,
            baseline_width: 640,
            baseline_height: 480,
            baseline_bit_rate: 1_000_000,
            baseline_frame_rate: 24,
            alignment: 16,
            key_frame_interval_secs: 1,
            fallback_key_frame_interval_secs: 5,
        }
    }
}

impl TranscoderConfig {
    /// Creates configuration with environment variable overrides.
    ///
    /// Unparseable values are ignored and the default kept.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(ms) = env_number::<u64>("RECAST_POLL_TIMEOUT_MS") {
            config.pipeline.poll_timeout = Duration::from_millis(ms);
        }

        if let Some(secs) = env_number::<u64>("RECAST_STALL_TIMEOUT_SECS") {
            config.pipeline.stall_timeout = Duration::from_secs(secs);
        }

        if let Some(ms) = env_number::<u64>("RECAST_TEARDOWN_SETTLE_MS") {
            config.pipeline.teardown_settle = Duration::from_millis(ms);
        }

        if let Some(size) = env_number::<usize>("RECAST_AUDIO_BUFFER_SIZE")
            && size > 0
        {
            config.pipeline.audio_buffer_size = size;
        }

        config
    }

    /// Creates a configuration for fast deterministic tests.
    pub fn for_testing() -> Self {
        Self {
            pipeline: PipelineConfig {
                poll_timeout: Duration::from_millis(1),
                stall_timeout: Duration::from_secs(2),
                teardown_settle: Duration::ZERO,
                ..Default::default()
            },
            limits: EncoderLimits::default(),
        }
    }
}

fn env_number<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = TranscoderConfig::default();

        assert_eq!(config.pipeline.poll_timeout, Duration::from_millis(10));
        assert_eq!(config.pipeline.stall_timeout, Duration::from_secs(10));
        assert_eq!(config.pipeline.audio_buffer_size, 65536);
        assert_eq!(config.pipeline.teardown_settle, Duration::from_millis(250));
        assert_eq!(config.limits.safe_long_edge, 1920);
        assert_eq!(config.limits.safe_bit_rate, 5_000_000);
        assert_eq!(config.limits.conservative_bit_rate, 2_000_000);
        assert_eq!(
            (config.limits.baseline_width, config.limits.baseline_height),
            (640, 480)
        );
        assert_eq!(config.limits.baseline_frame_rate, 24);
    }

    #[test]
    fn test_testing_preset() {
        let config = TranscoderConfig::for_testing();
        assert_eq!(config.pipeline.teardown_settle, Duration::ZERO);
        assert!(config.pipeline.poll_timeout < Duration::from_millis(10));
        assert_eq!(config.limits, EncoderLimits::default());
    }

    #[test]
    fn test_env_override() {
        unsafe {
            std::env::set_var("RECAST_POLL_TIMEOUT_MS", "25");
            std::env::set_var("RECAST_STALL_TIMEOUT_SECS", "3");
            std::env::set_var("RECAST_TEARDOWN_SETTLE_MS", "0");
            std::env::set_var("RECAST_AUDIO_BUFFER_SIZE", "not-a-number");
        }

        let config = TranscoderConfig::from_env();

        assert_eq!(config.pipeline.poll_timeout, Duration::from_millis(25));
        assert_eq!(config.pipeline.stall_timeout, Duration::from_secs(3));
        assert_eq!(config.pipeline.teardown_settle, Duration::ZERO);
        assert_eq!(config.pipeline.audio_buffer_size, 65536);

        // Cleanup
        unsafe {
            std::env::remove_var("RECAST_POLL_TIMEOUT_MS");
            std::env::remove_var("RECAST_STALL_TIMEOUT_SECS");
            std::env::remove_var("RECAST_TEARDOWN_SETTLE_MS");
            std::env::remove_var("RECAST_AUDIO_BUFFER_SIZE");
        }
    }
}
