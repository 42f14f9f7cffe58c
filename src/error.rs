// 🚫 Settlement Errors
// Error taxonomy shared by the rate allocator and the settlement calculator.
//
// Zero total rate and empty rank groups are NOT errors: they produce
// zero-valued output (see SettlementReport::degenerate).

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SettleError {
    /// Malformed or out-of-range arguments (unknown target rank,
    /// negative amount, negative or non-finite rate, ...)
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Strict rate policy: the committed rates do not add up to 100%
    #[error("rank rates total {total}% instead of 100%")]
    RateTotalMismatch { total: f64 },
}

impl SettleError {
    pub fn invalid(message: impl Into<String>) -> Self {
        SettleError::InvalidInput(message.into())
    }

    /// True for errors caused by the caller's data (maps to HTTP 400)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            SettleError::InvalidInput(_) | SettleError::RateTotalMismatch { .. }
        )
    }
}

pub type SettleResult<T> = Result<T, SettleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = SettleError::invalid("rank 7 is not among the party ranks");
        assert_eq!(
            err.to_string(),
            "invalid input: rank 7 is not among the party ranks"
        );

        let err = SettleError::RateTotalMismatch { total: 90.0 };
        assert_eq!(err.to_string(), "rank rates total 90% instead of 100%");
        assert!(err.is_client_error());
    }
}
