//! Payment rail error types

use std::time::Duration;

use thiserror::Error;

use super::types::RailKind;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RailError {
    /// The rail answered and refused the request
    #[error("Rail rejected request ({code}): {message}")]
    Rejected {
        code: String,
        message: String,
        retryable: bool,
    },

    #[error("Rail call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Rail transport error: {0}")]
    Transport(String),

    #[error("Unexpected rail response: {0}")]
    InvalidResponse(String),

    #[error("No rail configured for {0}")]
    Unsupported(RailKind),
}

impl RailError {
    /// Whether the request may have taken effect on the rail.
    ///
    /// Only an explicit terminal rejection proves nothing happened. Timeouts,
    /// transport failures, unparsable answers and retryable rejections leave
    /// the outcome unknown: the caller MUST NOT assume failure.
    pub fn is_unknown_outcome(&self) -> bool {
        match self {
            RailError::Timeout(_) | RailError::Transport(_) | RailError::InvalidResponse(_) => {
                true
            }
            RailError::Rejected { retryable, .. } => *retryable,
            RailError::Unsupported(_) => false,
        }
    }

    /// Machine-readable code for API responses
    pub fn code(&self) -> &str {
        match self {
            RailError::Rejected { code, .. } => code,
            RailError::Timeout(_) => "rail_timeout",
            RailError::Transport(_) => "rail_unreachable",
            RailError::InvalidResponse(_) => "rail_invalid_response",
            RailError::Unsupported(_) => "rail_unsupported",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_outcome_classification() {
        assert!(RailError::Timeout(Duration::from_secs(1)).is_unknown_outcome());
        assert!(RailError::Transport("reset".into()).is_unknown_outcome());
        assert!(
            RailError::Rejected {
                code: "rate_limit".into(),
                message: "slow down".into(),
                retryable: true
            }
            .is_unknown_outcome()
        );
        assert!(
            !RailError::Rejected {
                code: "card_declined".into(),
                message: "declined".into(),
                retryable: false
            }
            .is_unknown_outcome()
        );
        assert!(!RailError::Unsupported(RailKind::BankTransfer).is_unknown_outcome());
    }

    #[test]
    fn test_code() {
        let err = RailError::Rejected {
            code: "card_declined".into(),
            message: "declined".into(),
            retryable: false,
        };
        assert_eq!(err.code(), "card_declined");
        assert_eq!(
            RailError::Timeout(Duration::from_millis(5)).code(),
            "rail_timeout"
        );
    }
}
