//! Processor Gateway
//!
//! The single fallible network boundary of the flow. Implement
//! [`ProcessorGateway`] for each payment processor backend.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::args::PaymentObjectArgs;
use crate::error::Result;
use crate::form::ApiCredentials;

/// Object returned by the processor, forwarded to the client untouched
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessorObject(pub Value);

impl ProcessorObject {
    pub fn id(&self) -> Option<&str> {
        self.0.get("id").and_then(Value::as_str)
    }

    pub fn status(&self) -> Option<&str> {
        self.0.get("status").and_then(Value::as_str)
    }

    pub fn into_value(self) -> Value {
        self.0
    }
}

/// Payment processor operations used by the payment form controllers
///
/// Implementations perform exactly one remote call per method and never
/// retry; failures surface as [`crate::FlowError::Processor`].
#[async_trait]
pub trait ProcessorGateway: Send + Sync {
    /// Processor name for logging
    fn name(&self) -> &str;

    async fn create_customer(
        &self,
        args: &PaymentObjectArgs,
        credentials: &ApiCredentials,
    ) -> Result<ProcessorObject>;

    async fn update_customer(
        &self,
        customer_id: &str,
        args: &PaymentObjectArgs,
        credentials: &ApiCredentials,
    ) -> Result<ProcessorObject>;

    async fn create_payment_intent(
        &self,
        args: &PaymentObjectArgs,
        credentials: &ApiCredentials,
    ) -> Result<ProcessorObject>;

    async fn confirm_payment_intent(
        &self,
        payment_intent_id: &str,
        credentials: &ApiCredentials,
    ) -> Result<ProcessorObject>;
}
