//! Stripe Gateway
//!
//! Sends the built argument sets to Stripe's Customer and PaymentIntent
//! endpoints. Arguments are form-encoded as-is, so hooks can add any
//! parameter Stripe accepts without a matching typed field here.

use async_trait::async_trait;
use serde_json::{Map, Value};
use stripe::{AccountId, Client, StripeError};

use simpay_core::{ApiCredentials, PaymentObjectArgs, ProcessorGateway, ProcessorObject};

use crate::error::{PaymentError, Result};

/// Stripe API paths used by the gateway
pub mod paths {
    pub const CUSTOMERS: &str = "/customers";
    pub const PAYMENT_INTENTS: &str = "/payment_intents";

    pub fn customer(id: &str) -> String {
        format!("{CUSTOMERS}/{id}")
    }

    pub fn confirm_payment_intent(id: &str) -> String {
        format!("{PAYMENT_INTENTS}/{id}/confirm")
    }
}

/// Gateway backed by the Stripe REST API
///
/// A client is built per call from the form's credentials, as each form may
/// run in a different mode or on a connected account.
#[derive(Clone, Debug, Default)]
pub struct StripeGateway;

impl StripeGateway {
    pub fn new() -> Self {
        Self
    }

    fn client(credentials: &ApiCredentials) -> Result<Client> {
        if !credentials.is_configured() {
            return Err(PaymentError::Config(format!(
                "Stripe {:?} secret key not set",
                credentials.mode
            )));
        }

        let client = Client::new(credentials.secret_key.clone());
        match credentials.account.as_deref() {
            Some(account) => {
                let account: AccountId = account
                    .parse()
                    .map_err(|_| PaymentError::Config(format!("invalid Stripe account id: {account}")))?;
                Ok(client.with_stripe_account(account))
            }
            None => Ok(client),
        }
    }

    async fn post(&self, path: &str, args: &PaymentObjectArgs, credentials: &ApiCredentials) -> Result<ProcessorObject> {
        let client = Self::client(credentials)?;
        tracing::debug!(path, mode = ?credentials.mode, "Stripe request");

        let object: Value = client
            .post_form(path, args.as_map())
            .await
            .map_err(map_stripe_error)?;

        let (kind, id) = describe(&object);
        tracing::info!(path, object = kind, id, "Stripe object returned");
        Ok(ProcessorObject(object))
    }
}

/// `object` and `id` of a returned Stripe object, for logging
fn describe(object: &Value) -> (&str, &str) {
    let kind = object.get("object").and_then(|v| v.as_str()).unwrap_or("unknown");
    let id = object.get("id").and_then(|v| v.as_str()).unwrap_or("");
    (kind, id)
}

/// Keep Stripe's own message for API errors; hide transport detail
pub fn map_stripe_error(err: StripeError) -> PaymentError {
    match err {
        StripeError::Stripe(request) => {
            tracing::warn!(
                status = request.http_status,
                code = ?request.code,
                decline_code = ?request.decline_code,
                "Stripe rejected request"
            );
            PaymentError::Stripe(
                request
                    .message
                    .unwrap_or_else(|| "Unable to complete payment.".to_string()),
            )
        }
        other => {
            tracing::error!(error = %other, "Stripe transport failure");
            PaymentError::Transport(other.to_string())
        }
    }
}

#[async_trait]
impl ProcessorGateway for StripeGateway {
    fn name(&self) -> &str {
        "stripe"
    }

    async fn create_customer(
        &self,
        args: &PaymentObjectArgs,
        credentials: &ApiCredentials,
    ) -> simpay_core::Result<ProcessorObject> {
        Ok(self.post(paths::CUSTOMERS, args, credentials).await?)
    }

    async fn update_customer(
        &self,
        customer_id: &str,
        args: &PaymentObjectArgs,
        credentials: &ApiCredentials,
    ) -> simpay_core::Result<ProcessorObject> {
        Ok(self.post(&paths::customer(customer_id), args, credentials).await?)
    }

    async fn create_payment_intent(
        &self,
        args: &PaymentObjectArgs,
        credentials: &ApiCredentials,
    ) -> simpay_core::Result<ProcessorObject> {
        Ok(self.post(paths::PAYMENT_INTENTS, args, credentials).await?)
    }

    async fn confirm_payment_intent(
        &self,
        payment_intent_id: &str,
        credentials: &ApiCredentials,
    ) -> simpay_core::Result<ProcessorObject> {
        let args = PaymentObjectArgs::from(Map::new());
        Ok(self
            .post(&paths::confirm_payment_intent(payment_intent_id), &args, credentials)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use simpay_core::{ApiMode, FlowError};

    #[test]
    fn test_paths() {
        assert_eq!(paths::customer("cus_123"), "/customers/cus_123");
        assert_eq!(
            paths::confirm_payment_intent("pi_123"),
            "/payment_intents/pi_123/confirm"
        );
    }

    #[test]
    fn test_describe_object() {
        let customer = serde_json::json!({"id": "cus_123", "object": "customer"});
        assert_eq!(describe(&customer), ("customer", "cus_123"));
        assert_eq!(describe(&serde_json::json!({})), ("unknown", ""));
    }

    #[test]
    fn test_client_requires_key() {
        let creds = ApiCredentials::new("", ApiMode::Test);
        assert!(matches!(StripeGateway::client(&creds), Err(PaymentError::Config(_))));
    }

    #[test]
    fn test_client_rejects_bad_account() {
        let mut creds = ApiCredentials::new("sk_test_123", ApiMode::Test);
        creds.account = Some("not-an-account".into());
        assert!(StripeGateway::client(&creds).is_err());

        creds.account = Some("acct_1032D82eZvKYlo2C".into());
        assert!(StripeGateway::client(&creds).is_ok());
    }

    #[test]
    fn test_transport_error_mapping() {
        let err = map_stripe_error(StripeError::Timeout);
        assert!(matches!(err, PaymentError::Transport(_)));
        let flow: FlowError = err.into();
        assert!(flow.is_processor_side());
    }

    #[tokio::test]
    async fn test_unconfigured_key_never_calls_stripe() {
        let gateway = StripeGateway::new();
        let creds = ApiCredentials::new("", ApiMode::Live);
        let err = gateway
            .create_customer(&PaymentObjectArgs::new(), &creds)
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::Config(_)));
    }
}
