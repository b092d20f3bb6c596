//! Mock gateway for testing the payment form flow without Stripe.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use simpay_core::{
    ApiCredentials, FlowError, PaymentObjectArgs, ProcessorGateway, ProcessorObject, Result,
};

/// One recorded gateway call
#[derive(Clone, Debug, PartialEq)]
pub enum GatewayCall {
    CreateCustomer(PaymentObjectArgs),
    UpdateCustomer(String, PaymentObjectArgs),
    CreatePaymentIntent(PaymentObjectArgs),
    ConfirmPaymentIntent(String),
}

/// In-memory gateway that shapes its objects like Stripe's
///
/// Can be configured to fail the next call for testing error paths.
#[derive(Clone, Default)]
pub struct MockGateway {
    calls: Arc<RwLock<Vec<(GatewayCall, ApiCredentials)>>>,
    customers: Arc<RwLock<HashMap<String, Value>>>,
    payment_intents: Arc<RwLock<HashMap<String, Value>>>,
    fail_next: Arc<RwLock<Option<String>>>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next call with `message` as the processor's error
    pub async fn set_fail_next(&self, message: impl Into<String>) {
        *self.fail_next.write().await = Some(message.into());
    }

    pub async fn calls(&self) -> Vec<GatewayCall> {
        self.calls.read().await.iter().map(|(call, _)| call.clone()).collect()
    }

    /// Credentials passed with each call, in order
    pub async fn credentials(&self) -> Vec<ApiCredentials> {
        self.calls.read().await.iter().map(|(_, creds)| creds.clone()).collect()
    }

    pub async fn call_count(&self) -> usize {
        self.calls.read().await.len()
    }

    pub async fn customer_count(&self) -> usize {
        self.customers.read().await.len()
    }

    async fn record(&self, call: GatewayCall, credentials: &ApiCredentials) -> Result<()> {
        self.calls.write().await.push((call, credentials.clone()));
        match self.fail_next.write().await.take() {
            Some(message) => Err(FlowError::Processor(message)),
            None => Ok(()),
        }
    }
}

fn merge(object: &mut Value, args: &PaymentObjectArgs) {
    if let Value::Object(map) = object {
        for (key, value) in args.as_map() {
            if key != "expand" {
                map.insert(key.clone(), value.clone());
            }
        }
    }
}

#[async_trait]
impl ProcessorGateway for MockGateway {
    fn name(&self) -> &str {
        "mock"
    }

    async fn create_customer(
        &self,
        args: &PaymentObjectArgs,
        credentials: &ApiCredentials,
    ) -> Result<ProcessorObject> {
        self.record(GatewayCall::CreateCustomer(args.clone()), credentials).await?;

        let id = format!("cus_mock_{}", Uuid::new_v4().simple());
        let mut customer = json!({
            "id": id,
            "object": "customer",
            "livemode": credentials.mode == simpay_core::ApiMode::Live,
            "created": chrono::Utc::now().timestamp(),
        });
        merge(&mut customer, args);

        self.customers.write().await.insert(id, customer.clone());
        Ok(ProcessorObject(customer))
    }

    async fn update_customer(
        &self,
        customer_id: &str,
        args: &PaymentObjectArgs,
        credentials: &ApiCredentials,
    ) -> Result<ProcessorObject> {
        self.record(
            GatewayCall::UpdateCustomer(customer_id.to_string(), args.clone()),
            credentials,
        )
        .await?;

        let mut customers = self.customers.write().await;
        let Some(customer) = customers.get_mut(customer_id) else {
            return Err(FlowError::Processor(format!("No such customer: '{customer_id}'")));
        };
        merge(customer, args);
        Ok(ProcessorObject(customer.clone()))
    }

    async fn create_payment_intent(
        &self,
        args: &PaymentObjectArgs,
        credentials: &ApiCredentials,
    ) -> Result<ProcessorObject> {
        self.record(GatewayCall::CreatePaymentIntent(args.clone()), credentials).await?;

        let id = format!("pi_mock_{}", Uuid::new_v4().simple());
        let mut intent = json!({
            "id": id,
            "object": "payment_intent",
            "client_secret": format!("{id}_secret_{}", Uuid::new_v4().simple()),
            "status": "requires_confirmation",
            "livemode": credentials.mode == simpay_core::ApiMode::Live,
        });
        merge(&mut intent, args);

        // Mirror `expand[]=customer`
        if let Some(customer_id) = args.get_str("customer") {
            if let Some(customer) = self.customers.read().await.get(customer_id) {
                intent["customer"] = customer.clone();
            }
        }

        self.payment_intents.write().await.insert(id, intent.clone());
        Ok(ProcessorObject(intent))
    }

    async fn confirm_payment_intent(
        &self,
        payment_intent_id: &str,
        credentials: &ApiCredentials,
    ) -> Result<ProcessorObject> {
        self.record(
            GatewayCall::ConfirmPaymentIntent(payment_intent_id.to_string()),
            credentials,
        )
        .await?;

        let mut intents = self.payment_intents.write().await;
        let Some(intent) = intents.get_mut(payment_intent_id) else {
            return Err(FlowError::Processor(format!(
                "No such payment_intent: '{payment_intent_id}'"
            )));
        };
        intent["status"] = json!("succeeded");
        Ok(ProcessorObject(intent.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use simpay_core::ApiMode;

    fn creds() -> ApiCredentials {
        ApiCredentials::new("sk_test_mock", ApiMode::Test)
    }

    #[tokio::test]
    async fn test_customer_then_intent() {
        let gateway = MockGateway::new();
        let mut args = PaymentObjectArgs::new();
        args.insert("email", "jo@example.com");

        let customer = gateway.create_customer(&args, &creds()).await.unwrap();
        let customer_id = customer.id().unwrap().to_string();
        assert!(customer_id.starts_with("cus_mock_"));

        let mut intent_args = PaymentObjectArgs::new();
        intent_args.insert("amount", 1000);
        intent_args.insert("customer", customer_id.clone());
        let intent = gateway.create_payment_intent(&intent_args, &creds()).await.unwrap();
        assert_eq!(intent.0["customer"]["email"], "jo@example.com");

        let confirmed = gateway
            .confirm_payment_intent(intent.id().unwrap(), &creds())
            .await
            .unwrap();
        assert_eq!(confirmed.status(), Some("succeeded"));
        assert_eq!(gateway.call_count().await, 3);
    }

    #[tokio::test]
    async fn test_fail_next() {
        let gateway = MockGateway::new();
        gateway.set_fail_next("Your card was declined.").await;

        let err = gateway
            .create_customer(&PaymentObjectArgs::new(), &creds())
            .await
            .unwrap_err();
        assert_eq!(err.user_message(), "Your card was declined.");
        // Only the next call fails
        assert!(gateway.create_customer(&PaymentObjectArgs::new(), &creds()).await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_intent() {
        let gateway = MockGateway::new();
        assert!(gateway.confirm_payment_intent("pi_missing", &creds()).await.is_err());
        assert_eq!(gateway.customer_count().await, 0);
    }
}
