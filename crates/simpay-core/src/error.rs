//! Error Types

use thiserror::Error;

use crate::form::FormId;

/// Result type alias for request flow operations
pub type Result<T> = std::result::Result<T, FlowError>;

/// Failures raised by any stage of the payment form request flow.
///
/// Every variant is caught at the controller boundary and turned into a
/// `{message}` envelope with a 400 status.
#[derive(Error, Debug)]
pub enum FlowError {
    /// A permission check rejected the request
    #[error("Permission check '{check}' failed: {reason}")]
    AuthorizationFailed { check: String, reason: String },

    /// Both a PaymentMethod and a legacy Source were supplied
    #[error("Request sets both payment_method_id and source_id")]
    ConflictingPaymentSource,

    /// A required request field is absent
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// The form identifier does not resolve to a form
    #[error("Form not found: {0}")]
    FormNotFound(FormId),

    /// A request field could not be parsed
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// Card payments need a PaymentMethod id
    #[error("Missing payment method")]
    MissingPaymentMethod,

    /// Payment method type not enabled for this form or license
    #[error("Unsupported payment method type: {0}")]
    UnsupportedPaymentMethod(String),

    /// Processor call failed (network, validation, decline)
    #[error("Processor error: {0}")]
    Processor(String),

    /// A pre-call hook aborted the request
    #[error("Hook error: {0}")]
    Hook(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl FlowError {
    /// Build an authorization failure for a named check
    pub fn denied(check: impl Into<String>, reason: impl Into<String>) -> Self {
        FlowError::AuthorizationFailed {
            check: check.into(),
            reason: reason.into(),
        }
    }

    /// Whether the processor was reached before this error occurred
    pub fn is_processor_side(&self) -> bool {
        matches!(self, FlowError::Processor(_))
    }

    /// Message safe to show to the payment form visitor
    pub fn user_message(&self) -> String {
        match self {
            FlowError::AuthorizationFailed { reason, .. } => reason.clone(),
            FlowError::ConflictingPaymentSource => "Unable to complete payment.".into(),
            FlowError::MissingField(field) => match field.as_str() {
                "form_id" => "Unable to locate payment form.".into(),
                "customer_id" => "A customer must be provided.".into(),
                "payment_intent_id" => "Unable to locate PaymentIntent".into(),
                other => format!("Missing required field: {}", other),
            },
            FlowError::FormNotFound(_) => "Unable to locate payment form.".into(),
            FlowError::MalformedPayload(_) => "Invalid payment form submission.".into(),
            FlowError::MissingPaymentMethod => "A Payment Method is required.".into(),
            FlowError::UnsupportedPaymentMethod(kind) => {
                format!("The payment method '{}' is not available.", kind)
            }
            // Processor messages are written for end users (e.g. card declines)
            FlowError::Processor(msg) => msg.clone(),
            FlowError::Hook(_) | FlowError::Config(_) => {
                "Unable to complete payment. Please try again.".into()
            }
        }
    }
}

impl From<serde_json::Error> for FlowError {
    fn from(err: serde_json::Error) -> Self {
        FlowError::MalformedPayload(err.to_string())
    }
}
