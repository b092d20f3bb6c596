//! Response Envelope

use serde::Serialize;
use serde_json::{json, Value};

use crate::error::FlowError;
use crate::gateway::ProcessorObject;

pub const STATUS_OK: u16 = 200;
pub const STATUS_BAD_REQUEST: u16 = 400;

/// Uniform outcome of a payment form request
#[derive(Clone, Debug, PartialEq)]
pub struct ResponseEnvelope {
    pub status: u16,
    pub body: Value,
}

/// Successful Customer creation or update
#[derive(Clone, Debug, Serialize)]
pub struct CustomerResponse {
    pub customer: ProcessorObject,
    /// Empty when an existing Customer was updated
    pub nonce: String,
}

impl ResponseEnvelope {
    pub fn success(body: impl Serialize) -> Self {
        match serde_json::to_value(body) {
            Ok(body) => Self {
                status: STATUS_OK,
                body,
            },
            Err(err) => Self::failure(&FlowError::from(err)),
        }
    }

    /// Sanitized `{message}` body with a 400 status
    pub fn failure(err: &FlowError) -> Self {
        Self {
            status: STATUS_BAD_REQUEST,
            body: json!({ "message": err.user_message() }),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == STATUS_OK
    }

    pub fn message(&self) -> Option<&str> {
        self.body.get("message").and_then(Value::as_str)
    }
}
