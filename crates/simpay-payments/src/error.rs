//! Payment Error Types

use simpay_core::FlowError;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, PaymentError>;

/// Payment-related errors
#[derive(Error, Debug)]
pub enum PaymentError {
    /// Stripe API error carrying Stripe's own message
    #[error("Stripe error: {0}")]
    Stripe(String),

    /// Stripe could not be reached or answered unexpectedly
    #[error("Stripe transport error: {0}")]
    Transport(String),

    /// Nonce missing, expired, or already used
    #[error("Nonce invalid: {0}")]
    NonceInvalid(String),

    /// Rate limit exceeded
    #[error("Rate limit exceeded")]
    RateLimited,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(String),
}

impl PaymentError {
    /// Get user-friendly message
    pub fn user_message(&self) -> &str {
        match self {
            PaymentError::Stripe(msg) => msg,
            PaymentError::Transport(_) => "Payment processing failed. Please try again.",
            PaymentError::NonceInvalid(_) => "Invalid request. Please refresh and try again.",
            PaymentError::RateLimited => "Too many requests. Please try again in a few minutes.",
            PaymentError::Config(_) => "Service configuration error.",
            PaymentError::Storage(_) => "An error occurred processing your request.",
        }
    }
}

impl From<PaymentError> for FlowError {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::Stripe(_) | PaymentError::Transport(_) => {
                FlowError::Processor(err.user_message().to_string())
            }
            PaymentError::RateLimited => FlowError::denied("rate_limit", err.user_message()),
            PaymentError::NonceInvalid(_) => FlowError::denied("nonce", err.user_message()),
            PaymentError::Config(msg) => FlowError::Config(msg),
            other => FlowError::Config(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stripe_message_passes_through() {
        let flow: FlowError = PaymentError::Stripe("Your card was declined.".into()).into();
        assert_eq!(flow.user_message(), "Your card was declined.");
    }

    #[test]
    fn test_transport_detail_hidden() {
        let flow: FlowError = PaymentError::Transport("tcp connect error 10.0.0.3:443".into()).into();
        assert!(!flow.user_message().contains("10.0.0.3"));
        assert!(flow.is_processor_side());
    }
}
