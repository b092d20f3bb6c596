//! Application State

use ipnet::IpNet;
use std::net::IpAddr;
use std::sync::Arc;

use simpay_core::{
    CustomerController, FormRepository, HookRegistry, PaymentIntentController, PermissionGate,
    ProcessorGateway, RequestNormalizer,
};
use simpay_payments::{
    checks::{CustomerNonceCheck, FormNonceCheck, RateLimitCheck, RequiredFieldsCheck},
    License, LicenseGate, NonceService, RateLimiter,
};

use crate::config::ServerConfig;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// `POST /customer`
    pub customers: Arc<CustomerController>,

    /// `POST /paymentintent/{create,confirm}`
    pub payment_intents: Arc<PaymentIntentController>,

    pub forms: Arc<dyn FormRepository>,

    /// Issues the form nonce handed out with form configs
    pub nonces: Arc<NonceService>,

    pub license: Arc<License>,

    /// Shared with the background sweep
    pub rate_limiter: Arc<RateLimiter>,

    pub trusted_proxies: Arc<[IpNet]>,

    pub stripe_configured: bool,
}

impl AppState {
    /// Wire the controllers and their permission gates
    pub fn new(
        config: &ServerConfig,
        forms: Arc<dyn FormRepository>,
        gateway: Arc<dyn ProcessorGateway>,
        hooks: Arc<HookRegistry>,
    ) -> anyhow::Result<Self> {
        let nonces = Arc::new(NonceService::new(&config.nonce_secret)?);
        let limiter = Arc::new(RateLimiter::new(config.rate_limit_max, config.rate_limit_window)?);
        let rate_limit = Arc::new(RateLimitCheck::new(limiter.clone()));
        let form_nonce = Arc::new(FormNonceCheck::new(nonces.clone()));

        let customer_gate = PermissionGate::new()
            .with_shared(rate_limit.clone())
            .with_shared(form_nonce.clone())
            .with(RequiredFieldsCheck::new(forms.clone()));

        let create_gate = PermissionGate::new()
            .with_shared(rate_limit.clone())
            .with_shared(form_nonce.clone())
            .with(CustomerNonceCheck::unspent(nonces.clone()));

        let confirm_gate = PermissionGate::new()
            .with_shared(rate_limit)
            .with_shared(form_nonce)
            .with(CustomerNonceCheck::verifying(nonces.clone()));

        let customers = CustomerController::new(
            RequestNormalizer::new(forms.clone()),
            gateway.clone(),
            nonces.clone(),
        )
        .with_gate(customer_gate)
        .with_hooks(hooks.clone());

        let payment_intents = PaymentIntentController::new(RequestNormalizer::new(forms.clone()), gateway)
            .with_gates(create_gate, confirm_gate)
            .with_policy(Arc::new(LicenseGate::new(config.license.clone())))
            .with_hooks(hooks)
            .with_nonces(nonces.clone());

        Ok(Self {
            customers: Arc::new(customers),
            payment_intents: Arc::new(payment_intents),
            forms,
            nonces,
            license: Arc::new(config.license.clone()),
            rate_limiter: limiter,
            trusted_proxies: config.trusted_proxies.clone().into(),
            stripe_configured: config.stripe_configured(),
        })
    }

    pub fn is_trusted_proxy(&self, peer: IpAddr) -> bool {
        self.trusted_proxies.iter().any(|net| net.contains(&peer))
    }
}
