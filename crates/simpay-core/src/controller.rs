//! Payment Form Controllers
//!
//! Orchestrates one request through the flow:
//!
//! ```text
//! Received → Gated → Normalized → ArgsBuilt → ProcessorCalled → {Succeeded, Failed}
//! ```
//!
//! Every stage short-circuits into a 400 envelope. Each call is independent;
//! nothing is retried or resumed.

use std::sync::Arc;

use crate::args::{customer_args, payment_intent_args};
use crate::error::{FlowError, Result};
use crate::form::PaymentMethodType;
use crate::gate::{customer_nonce_action, NonceIssuer, PermissionGate, CUSTOMER_NONCE_LIFETIME};
use crate::gateway::{ProcessorGateway, ProcessorObject};
use crate::hooks::{HookContext, HookRegistry, PostCallHook, PreCallHook};
use crate::request::{RawRequest, RequestNormalizer};
use crate::response::{CustomerResponse, ResponseEnvelope};

/// Position of a request in the flow, used when reporting failures
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlowStage {
    Received,
    Gated,
    Normalized,
    ArgsBuilt,
    ProcessorCalled,
}

/// Decides which payment method types may be used at all
pub trait PaymentMethodPolicy: Send + Sync {
    fn allows(&self, kind: &PaymentMethodType) -> bool;
}

/// Policy that lets every form-enabled type through
pub struct AllowAllPaymentMethods;

impl PaymentMethodPolicy for AllowAllPaymentMethods {
    fn allows(&self, _kind: &PaymentMethodType) -> bool {
        true
    }
}

fn finish(operation: &'static str, stage: FlowStage, result: Result<ResponseEnvelope>) -> ResponseEnvelope {
    match result {
        Ok(envelope) => envelope,
        Err(err) => {
            if err.is_processor_side() {
                tracing::warn!(operation, stage = ?stage, error = %err, "Processor rejected request");
            } else {
                tracing::info!(operation, stage = ?stage, error = %err, "Request rejected");
            }
            ResponseEnvelope::failure(&err)
        }
    }
}

/// `POST customer`: create or update a Customer from a payment form
pub struct CustomerController {
    gate: PermissionGate,
    normalizer: RequestNormalizer,
    gateway: Arc<dyn ProcessorGateway>,
    nonces: Arc<dyn NonceIssuer>,
    hooks: Arc<HookRegistry>,
}

impl CustomerController {
    pub fn new(
        normalizer: RequestNormalizer,
        gateway: Arc<dyn ProcessorGateway>,
        nonces: Arc<dyn NonceIssuer>,
    ) -> Self {
        Self {
            gate: PermissionGate::new(),
            normalizer,
            gateway,
            nonces,
            hooks: Arc::new(HookRegistry::new()),
        }
    }

    pub fn with_gate(mut self, gate: PermissionGate) -> Self {
        self.gate = gate;
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<HookRegistry>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn gate(&self) -> &PermissionGate {
        &self.gate
    }

    pub async fn create(&self, request: &RawRequest) -> ResponseEnvelope {
        let mut stage = FlowStage::Received;
        let result = self.try_create(request, &mut stage).await;
        finish("customer", stage, result)
    }

    async fn try_create(&self, request: &RawRequest, stage: &mut FlowStage) -> Result<ResponseEnvelope> {
        self.gate.evaluate(request).await?;
        *stage = FlowStage::Gated;

        let customer_request = self.normalizer.customer(request)?;
        *stage = FlowStage::Normalized;

        let submission = &customer_request.submission;
        let ctx = HookContext {
            submission,
            customer_id: customer_request.object_id.as_deref(),
        };

        let mut args = customer_args(submission);
        self.hooks.run_before(PreCallHook::BeforeCustomer, &mut args, &ctx)?;
        *stage = FlowStage::ArgsBuilt;

        let credentials = &submission.form.credentials;
        let (customer, nonce) = match customer_request.object_id.as_deref() {
            None => {
                let customer = self.gateway.create_customer(&args, credentials).await?;
                *stage = FlowStage::ProcessorCalled;
                let id = customer
                    .id()
                    .ok_or_else(|| FlowError::Processor("Customer response has no id.".into()))?;
                let nonce = self
                    .nonces
                    .issue(&customer_nonce_action(id), CUSTOMER_NONCE_LIFETIME);
                (customer, nonce)
            }
            Some(object_id) => {
                let customer = self.gateway.update_customer(object_id, &args, credentials).await?;
                *stage = FlowStage::ProcessorCalled;
                (customer, String::new())
            }
        };

        tracing::info!(
            form_id = %submission.form.id,
            customer_id = customer.id().unwrap_or_default(),
            updated = customer_request.object_id.is_some(),
            "Customer saved from payment form"
        );

        self.hooks.notify_after(PostCallHook::AfterCustomer, &customer, &ctx);

        Ok(ResponseEnvelope::success(CustomerResponse { customer, nonce }))
    }
}

/// `POST paymentintent/create` and `POST paymentintent/confirm`
pub struct PaymentIntentController {
    create_gate: PermissionGate,
    confirm_gate: PermissionGate,
    normalizer: RequestNormalizer,
    gateway: Arc<dyn ProcessorGateway>,
    policy: Arc<dyn PaymentMethodPolicy>,
    hooks: Arc<HookRegistry>,
    /// Spends the customer nonce once a PaymentIntent exists
    nonces: Option<Arc<dyn NonceIssuer>>,
}

impl PaymentIntentController {
    pub fn new(normalizer: RequestNormalizer, gateway: Arc<dyn ProcessorGateway>) -> Self {
        Self {
            create_gate: PermissionGate::new(),
            confirm_gate: PermissionGate::new(),
            normalizer,
            gateway,
            policy: Arc::new(AllowAllPaymentMethods),
            hooks: Arc::new(HookRegistry::new()),
            nonces: None,
        }
    }

    pub fn with_gates(mut self, create: PermissionGate, confirm: PermissionGate) -> Self {
        self.create_gate = create;
        self.confirm_gate = confirm;
        self
    }

    pub fn with_policy(mut self, policy: Arc<dyn PaymentMethodPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<HookRegistry>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_nonces(mut self, nonces: Arc<dyn NonceIssuer>) -> Self {
        self.nonces = Some(nonces);
        self
    }

    pub async fn create(&self, request: &RawRequest) -> ResponseEnvelope {
        let mut stage = FlowStage::Received;
        let result = self.try_create(request, &mut stage).await;
        finish("paymentintent.create", stage, result)
    }

    pub async fn confirm(&self, request: &RawRequest) -> ResponseEnvelope {
        let mut stage = FlowStage::Received;
        let result = self.try_confirm(request, &mut stage).await;
        finish("paymentintent.confirm", stage, result)
    }

    async fn try_create(&self, request: &RawRequest, stage: &mut FlowStage) -> Result<ResponseEnvelope> {
        self.create_gate.evaluate(request).await?;
        *stage = FlowStage::Gated;

        let intent_request = self.normalizer.payment_intent(request)?;
        *stage = FlowStage::Normalized;

        let kind = &intent_request.payment_method_type;
        if !self.policy.allows(kind) {
            return Err(FlowError::UnsupportedPaymentMethod(kind.to_string()));
        }

        let submission = &intent_request.submission;
        let ctx = HookContext {
            submission,
            customer_id: Some(intent_request.customer_id.as_str()),
        };

        let mut args = payment_intent_args(&intent_request)?;
        self.hooks.run_before(PreCallHook::BeforePaymentIntent, &mut args, &ctx)?;
        *stage = FlowStage::ArgsBuilt;

        let intent = self
            .gateway
            .create_payment_intent(&args, &submission.form.credentials)
            .await?;
        *stage = FlowStage::ProcessorCalled;

        tracing::info!(
            form_id = %submission.form.id,
            customer_id = %intent_request.customer_id,
            payment_intent_id = intent.id().unwrap_or_default(),
            payment_method_type = %kind,
            status = intent.status().unwrap_or_default(),
            "PaymentIntent created"
        );
        self.spend_customer_nonce(request, &intent_request.customer_id);

        self.hooks.notify_after(PostCallHook::AfterPaymentIntent, &intent, &ctx);
        Ok(self.payment_response(intent, &ctx))
    }

    async fn try_confirm(&self, request: &RawRequest, stage: &mut FlowStage) -> Result<ResponseEnvelope> {
        self.confirm_gate.evaluate(request).await?;
        *stage = FlowStage::Gated;

        let confirm_request = self.normalizer.confirm(request)?;
        *stage = FlowStage::Normalized;

        let submission = &confirm_request.submission;
        let ctx = HookContext {
            submission,
            customer_id: Some(confirm_request.customer_id.as_str()),
        };
        *stage = FlowStage::ArgsBuilt;

        let intent = self
            .gateway
            .confirm_payment_intent(&confirm_request.payment_intent_id, &submission.form.credentials)
            .await?;
        *stage = FlowStage::ProcessorCalled;

        tracing::info!(
            form_id = %submission.form.id,
            payment_intent_id = %confirm_request.payment_intent_id,
            status = intent.status().unwrap_or_default(),
            "PaymentIntent confirmed"
        );

        Ok(self.payment_response(intent, &ctx))
    }

    /// The intent already exists, so a failure here is only logged
    fn spend_customer_nonce(&self, request: &RawRequest, customer_id: &str) {
        let Some(nonces) = &self.nonces else {
            return;
        };
        let nonce = request.get_str("customer_nonce").unwrap_or_default();
        if let Err(e) = nonces.consume(&customer_nonce_action(customer_id), &nonce, CUSTOMER_NONCE_LIFETIME) {
            tracing::warn!(customer_id, error = %e, "Customer nonce was not consumed");
        }
    }

    /// Build the envelope first so observers cannot alter it
    fn payment_response(&self, intent: ProcessorObject, ctx: &HookContext<'_>) -> ResponseEnvelope {
        let envelope = ResponseEnvelope::success(&intent);
        self.hooks
            .notify_after(PostCallHook::AfterPaymentIntentResponse, &intent, ctx);
        envelope
    }
}
