//! Error taxonomy for leader election.

use thiserror::Error;

/// Errors raised while building or running an elector
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ElectionError {
    /// Timing policy violates one of its bounds (fatal, never retried)
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Strategy could not reach its backend at startup
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// Transient per-tick backend/transport failure
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Membership view is empty or does not contain this member
    #[error("Capability mismatch: {0}")]
    CapabilityMismatch(String),
}

impl ElectionError {
    /// Short label used as a structured log field
    pub fn reason(&self) -> &'static str {
        match self {
            Self::InvalidConfiguration(_) => "invalid_configuration",
            Self::InitializationFailed(_) => "initialization_failed",
            Self::BackendUnavailable(_) => "backend_unavailable",
            Self::CapabilityMismatch(_) => "capability_mismatch",
        }
    }

    /// Returns true if another attempt (next tick or next strategy) may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::BackendUnavailable(_) | Self::InitializationFailed(_)
        )
    }

    /// Promote a transient failure into a startup failure.
    ///
    /// Used when a backend call made during construction fails: at that point
    /// the caller needs to fall back, not retry on the next tick.
    pub fn into_initialization(self) -> Self {
        match self {
            Self::BackendUnavailable(msg) | Self::CapabilityMismatch(msg) => {
                Self::InitializationFailed(msg)
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(ElectionError::BackendUnavailable("timeout".into()).is_retryable());
        assert!(ElectionError::InitializationFailed("refused".into()).is_retryable());
        assert!(!ElectionError::InvalidConfiguration("lease".into()).is_retryable());
        assert!(!ElectionError::CapabilityMismatch("empty".into()).is_retryable());
    }

    #[test]
    fn test_into_initialization() {
        let err = ElectionError::BackendUnavailable("connection refused".into());
        assert_eq!(
            err.into_initialization(),
            ElectionError::InitializationFailed("connection refused".into())
        );

        let fatal = ElectionError::InvalidConfiguration("renew deadline".into());
        assert_eq!(fatal.clone().into_initialization(), fatal);
    }
}
