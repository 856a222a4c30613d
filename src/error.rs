//! Error types for the DDC/CI command channel.

use thiserror::Error;

use crate::vcp::FeatureCode;

/// Failure modes of a DDC/CI operation.
#[derive(Debug, Clone, Error)]
pub enum DdcError {
    /// The display rejected the feature; recorded and short-circuited on
    /// later attempts until the channel is reset.
    #[error("feature {0} is not supported by this display")]
    Unsupported(FeatureCode),

    /// The command did not complete within the per-attempt timeout, or the
    /// underlying process could not be run.
    #[error("DDC command timed out: {0}")]
    Timeout(String),

    /// The reply arrived but could not be interpreted.
    #[error("unparseable DDC reply: {0}")]
    Parse(String),

    /// A write was sent but the display reported failure.
    #[error("write of {code} failed: {reason}")]
    Write { code: FeatureCode, reason: String },
}

pub type DdcResult<T> = Result<T, DdcError>;

impl DdcError {
    /// Permanent errors mark the feature unsupported; transient ones are
    /// retried on the next call.
    pub fn is_permanent(&self) -> bool {
        matches!(self, DdcError::Unsupported(_))
    }
}
