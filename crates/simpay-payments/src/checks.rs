//! Permission Checks
//!
//! The concrete checks payment form routes are gated with.

use async_trait::async_trait;
use std::sync::Arc;

use simpay_core::gate::{customer_nonce_action, CUSTOMER_NONCE_LIFETIME};
use simpay_core::{
    FlowError, FormId, FormRepository, FormValues, PermissionCheck, RawRequest, Result,
};

use crate::nonce::{NonceService, FORM_NONCE_ACTION, FORM_NONCE_LIFETIME};
use crate::rate_limit::RateLimiter;

fn nonce_field(request: &RawRequest, field: &str) -> Option<String> {
    request.get(field).and_then(|v| v.as_str()).map(str::to_string)
}

/// `rate_limit`: per-client request budget
pub struct RateLimitCheck {
    limiter: Arc<RateLimiter>,
}

impl RateLimitCheck {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self { limiter }
    }
}

#[async_trait]
impl PermissionCheck for RateLimitCheck {
    fn name(&self) -> &str {
        "rate_limit"
    }

    async fn check(&self, request: &RawRequest) -> Result<()> {
        self.limiter
            .hit(request.client_ip())
            .map_err(|e| FlowError::denied(self.name(), e.user_message()))
    }
}

/// `form_nonce`: request comes from a rendered payment form
pub struct FormNonceCheck {
    nonces: Arc<NonceService>,
}

impl FormNonceCheck {
    pub fn new(nonces: Arc<NonceService>) -> Self {
        Self { nonces }
    }
}

#[async_trait]
impl PermissionCheck for FormNonceCheck {
    fn name(&self) -> &str {
        "form_nonce"
    }

    async fn check(&self, request: &RawRequest) -> Result<()> {
        let nonce = nonce_field(request, "form_nonce").unwrap_or_default();
        self.nonces
            .verify(FORM_NONCE_ACTION, &nonce, FORM_NONCE_LIFETIME)
            .map_err(|e| FlowError::denied(self.name(), e.user_message()))
    }
}

/// `customer_nonce`: request follows the creation of its Customer
///
/// The check never spends the nonce. The PaymentIntent controller consumes
/// it once the create call has succeeded.
pub struct CustomerNonceCheck {
    nonces: Arc<NonceService>,
    unspent: bool,
}

impl CustomerNonceCheck {
    /// Verify and require that the nonce was not consumed yet
    pub fn unspent(nonces: Arc<NonceService>) -> Self {
        Self { nonces, unspent: true }
    }

    /// Verify only, accepting a spent nonce for a follow-up request
    pub fn verifying(nonces: Arc<NonceService>) -> Self {
        Self { nonces, unspent: false }
    }
}

#[async_trait]
impl PermissionCheck for CustomerNonceCheck {
    fn name(&self) -> &str {
        "customer_nonce"
    }

    async fn check(&self, request: &RawRequest) -> Result<()> {
        let Some(customer_id) = request.get_str("customer_id") else {
            return Err(FlowError::denied(self.name(), "A customer must be provided."));
        };
        let nonce = nonce_field(request, "customer_nonce").unwrap_or_default();
        let action = customer_nonce_action(&customer_id);

        let outcome = if self.unspent {
            self.nonces.verify_unspent(&action, &nonce, CUSTOMER_NONCE_LIFETIME)
        } else {
            self.nonces.verify(&action, &nonce, CUSTOMER_NONCE_LIFETIME)
        };
        outcome.map_err(|e| FlowError::denied(self.name(), e.user_message()))
    }
}

/// `required_fields`: every required form field was filled in
pub struct RequiredFieldsCheck {
    forms: Arc<dyn FormRepository>,
}

impl RequiredFieldsCheck {
    pub fn new(forms: Arc<dyn FormRepository>) -> Self {
        Self { forms }
    }
}

#[async_trait]
impl PermissionCheck for RequiredFieldsCheck {
    fn name(&self) -> &str {
        "required_fields"
    }

    async fn check(&self, request: &RawRequest) -> Result<()> {
        // Unresolvable forms are reported by the normalizer
        let Some(form) = request
            .get_str("form_id")
            .and_then(|id| id.parse::<u64>().ok())
            .and_then(|id| self.forms.get(FormId(id)))
        else {
            return Ok(());
        };

        let values: FormValues = request
            .get("form_values")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();
        for field in form.required_fields() {
            if !values.is_filled(&field.key) {
                return Err(FlowError::denied(
                    self.name(),
                    format!("{} is a required field.", field.label),
                ));
            }
        }
        Ok(())
    }
}
