//! Error types for the payment-gateway client.
//!
//! [`PaymentError`] separates declines (retryable via the sweep) from
//! configuration errors (hard failures, never retried) and plain transport
//! failures.

use thiserror::Error;

/// Errors that can occur while talking to the payment gateway.
#[derive(Debug, Error)]
pub enum PaymentError {
    /// The gateway refused the charge (card declined, no payment method on
    /// file, insufficient funds). The fee record is marked failed and the
    /// sweep retries it.
    #[error("charge declined: {message}")]
    Declined { message: String },

    /// Any other gateway error (invalid key, malformed request, 5xx).
    #[error("gateway error (status {status}): {message}")]
    ApiError { status: u16, message: String },

    /// Underlying network failure (DNS, connection refused, timeout).
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The gateway is not configured (missing API key). Surfaced to the
    /// caller as-is; the settlement routine does not mark the record failed.
    #[error("payment gateway is not configured")]
    NotConfigured,
}

impl PaymentError {
    /// True when the failure is a configuration problem rather than a
    /// per-charge outcome.
    pub fn is_configuration(&self) -> bool {
        matches!(self, PaymentError::NotConfigured)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declined_display() {
        let err = PaymentError::Declined {
            message: "insufficient funds".into(),
        };
        assert_eq!(err.to_string(), "charge declined: insufficient funds");
    }

    #[test]
    fn api_error_display() {
        let err = PaymentError::ApiError {
            status: 401,
            message: "Invalid API key".into(),
        };
        assert_eq!(err.to_string(), "gateway error (status 401): Invalid API key");
    }

    #[test]
    fn only_not_configured_is_configuration() {
        assert!(PaymentError::NotConfigured.is_configuration());
        assert!(
            !PaymentError::Declined {
                message: "card declined".into()
            }
            .is_configuration()
        );
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<PaymentError>();
    }
}
