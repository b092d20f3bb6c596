//! Permission Gate
//!
//! Ordered list of named checks run before any business logic. The first
//! failing check short-circuits the request.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{FlowError, Result};
use crate::request::RawRequest;

/// A named authorization predicate
///
/// Implementations own whatever state they need (rate-limit counters, nonce
/// stores). The gate itself holds none.
#[async_trait]
pub trait PermissionCheck: Send + Sync {
    /// Check identifier (e.g. `rate_limit`, `form_nonce`)
    fn name(&self) -> &str;

    /// Reject the request with [`FlowError::AuthorizationFailed`] or let it through
    async fn check(&self, request: &RawRequest) -> Result<()>;
}

/// Lifetime of the token handed out after a Customer is created
pub const CUSTOMER_NONCE_LIFETIME: Duration = Duration::from_secs(120);

/// Nonce action proving a PaymentIntent request follows its Customer creation
pub fn customer_nonce_action(customer_id: &str) -> String {
    format!("simpay_payment_form_customer_{}", customer_id)
}

/// Issues nonces the gate later verifies
pub trait NonceIssuer: Send + Sync {
    fn issue(&self, action: &str, lifetime: Duration) -> String;

    /// Spend a nonce so it cannot authorize the same step again
    fn consume(&self, action: &str, nonce: &str, lifetime: Duration) -> Result<()>;
}

/// Ordered set of permission checks for one route
#[derive(Clone, Default)]
pub struct PermissionGate {
    checks: Vec<Arc<dyn PermissionCheck>>,
}

impl PermissionGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a check; checks run in insertion order
    pub fn with<C: PermissionCheck + 'static>(mut self, check: C) -> Self {
        self.checks.push(Arc::new(check));
        self
    }

    pub fn with_shared(mut self, check: Arc<dyn PermissionCheck>) -> Self {
        self.checks.push(check);
        self
    }

    pub fn names(&self) -> Vec<&str> {
        self.checks.iter().map(|c| c.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    /// Run every check in order, stopping at the first failure
    pub async fn evaluate(&self, request: &RawRequest) -> Result<()> {
        for check in &self.checks {
            if let Err(err) = check.check(request).await {
                tracing::info!(check = check.name(), error = %err, "Permission check failed");
                if matches!(err, FlowError::AuthorizationFailed { .. }) {
                    return Err(err);
                }
                return Err(FlowError::denied(check.name(), err.user_message()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixed {
        name: &'static str,
        pass: bool,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl PermissionCheck for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        async fn check(&self, _request: &RawRequest) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.pass {
                Ok(())
            } else {
                Err(FlowError::denied(self.name, format!("{} rejected", self.name)))
            }
        }
    }

    fn fixed(name: &'static str, pass: bool, calls: &Arc<AtomicUsize>) -> Fixed {
        Fixed {
            name,
            pass,
            calls: calls.clone(),
        }
    }

    #[tokio::test]
    async fn test_all_pass() {
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = PermissionGate::new()
            .with(fixed("rate_limit", true, &calls))
            .with(fixed("form_nonce", true, &calls));

        assert!(gate.evaluate(&RawRequest::default()).await.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(gate.names(), vec!["rate_limit", "form_nonce"]);
    }

    #[tokio::test]
    async fn test_short_circuits_on_first_failure() {
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = PermissionGate::new()
            .with(fixed("rate_limit", true, &calls))
            .with(fixed("form_nonce", false, &calls))
            .with(fixed("required_fields", true, &calls));

        let err = gate.evaluate(&RawRequest::default()).await.unwrap_err();
        match err {
            FlowError::AuthorizationFailed { check, reason } => {
                assert_eq!(check, "form_nonce");
                assert_eq!(reason, "form_nonce rejected");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        // required_fields never ran
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_empty_gate_allows() {
        assert!(PermissionGate::new().evaluate(&RawRequest::default()).await.is_ok());
    }
}
