//! Error taxonomy for transcode attempts

use crate::codec::CodecError;

/// Errors that end a transcode attempt or the whole conversion.
#[derive(Debug, thiserror::Error)]
pub enum TranscodeError {
    #[error("Invalid request: {reason}")]
    Validation { reason: String },

    #[error("All {attempts} encoder strategies failed")]
    StrategyExhausted { attempts: usize },

    #[error("Input has no video track")]
    NoVideoTrack,

    #[error("Pipeline failed during {stage}: {reason}")]
    Pipeline { stage: &'static str, reason: String },

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("A conversion is already running")]
    Busy,

    #[error("Conversion was cancelled")]
    Cancelled,

    #[error("Worker failed: {reason}")]
    Worker { reason: String },
}

impl TranscodeError {
    /// Returns true when a different transfer method may still succeed.
    ///
    /// Validation, admission and cancellation failures end the conversion
    /// outright. Missing video tracks cannot be fixed by retrying either.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            TranscodeError::Validation { .. }
                | TranscodeError::NoVideoTrack
                | TranscodeError::Busy
                | TranscodeError::Cancelled
                | TranscodeError::Worker { .. }
        )
    }

    pub(crate) fn pipeline(stage: &'static str, error: impl std::fmt::Display) -> Self {
        TranscodeError::Pipeline {
            stage,
            reason: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverability_classification() {
        assert!(!TranscodeError::Validation {
            reason: "bad".to_string()
        }
        .is_recoverable());
        assert!(!TranscodeError::Cancelled.is_recoverable());
        assert!(!TranscodeError::Busy.is_recoverable());
        assert!(TranscodeError::StrategyExhausted { attempts: 6 }.is_recoverable());
        assert!(TranscodeError::pipeline("drain", "boom").is_recoverable());
        assert!(
            TranscodeError::from(CodecError::Configuration {
                reason: "x".to_string()
            })
            .is_recoverable()
        );
    }
}
