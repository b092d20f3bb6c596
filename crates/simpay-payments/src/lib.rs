//! # simpay-payments
//!
//! Stripe-backed pieces of the payment form flow.
//!
//! - [`StripeGateway`]: the `ProcessorGateway` that talks to Stripe
//! - [`NonceService`]: form and customer nonces
//! - [`RateLimiter`]: per-client request budget
//! - [`checks`]: the permission checks the routes are gated with
//! - [`License`]: edition and tier gating of payment method types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use simpay_payments::{checks, NonceService, RateLimiter, StripeGateway};
//!
//! let nonces = Arc::new(NonceService::new(secret)?);
//! let limiter = Arc::new(RateLimiter::new(30, Duration::from_secs(60))?);
//! let gate = PermissionGate::new()
//!     .with(checks::RateLimitCheck::new(limiter))
//!     .with(checks::FormNonceCheck::new(nonces.clone()));
//!
//! let controller = CustomerController::new(normalizer, Arc::new(StripeGateway::new()), nonces)
//!     .with_gate(gate);
//! ```

pub mod checks;
mod error;
mod gateway;
mod license;
pub mod mock;
mod nonce;
mod rate_limit;

pub use error::{PaymentError, Result};
pub use gateway::{map_stripe_error, paths, StripeGateway};
pub use license::{
    compare_versions, Comparison, Edition, License, LicenseGate, LicenseKey, LicenseReport,
    LicenseStatus, Tier,
};
pub use mock::{GatewayCall, MockGateway};
pub use nonce::{NonceService, FORM_NONCE_ACTION, FORM_NONCE_LIFETIME};
pub use rate_limit::RateLimiter;
