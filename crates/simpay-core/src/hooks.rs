//! Extension Points
//!
//! Callbacks registered at fixed points of the flow and run synchronously in
//! registration order. Pre-call hooks receive the in-flight arguments mutably
//! and can abort the request; post-call hooks only observe the processor
//! object, and their failures never reach the response.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::args::PaymentObjectArgs;
use crate::error::{FlowError, Result};
use crate::gateway::ProcessorObject;
use crate::request::FormSubmission;

/// Points where the arguments can still be changed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PreCallHook {
    BeforeCustomer,
    BeforePaymentIntent,
}

impl PreCallHook {
    pub fn as_str(&self) -> &'static str {
        match self {
            PreCallHook::BeforeCustomer => "simpay_before_customer_from_payment_form_request",
            PreCallHook::BeforePaymentIntent => {
                "simpay_before_paymentintent_from_payment_form_request"
            }
        }
    }
}

/// Points notified after the processor responded
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PostCallHook {
    AfterCustomer,
    /// PaymentIntent creation only
    AfterPaymentIntent,
    /// PaymentIntent creation and confirmation
    AfterPaymentIntentResponse,
}

impl PostCallHook {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostCallHook::AfterCustomer => "simpay_after_customer_from_payment_form_request",
            PostCallHook::AfterPaymentIntent => {
                "simpay_after_paymentintent_from_payment_form_request"
            }
            PostCallHook::AfterPaymentIntentResponse => {
                "simpay_after_paymentintent_response_from_payment_form_request"
            }
        }
    }
}

/// What a hook gets to see about the request
#[derive(Clone, Copy, Debug)]
pub struct HookContext<'a> {
    pub submission: &'a FormSubmission,
    pub customer_id: Option<&'a str>,
}

pub type PreCallFn =
    dyn Fn(&mut PaymentObjectArgs, &HookContext<'_>) -> anyhow::Result<()> + Send + Sync;
pub type PostCallFn =
    dyn Fn(&ProcessorObject, &HookContext<'_>) -> anyhow::Result<()> + Send + Sync;

struct Registered<F: ?Sized> {
    name: String,
    callback: Arc<F>,
}

impl<F: ?Sized> Clone for Registered<F> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            callback: self.callback.clone(),
        }
    }
}

/// Registry of callbacks per extension point
#[derive(Clone, Default)]
pub struct HookRegistry {
    pre: HashMap<PreCallHook, Vec<Registered<PreCallFn>>>,
    post: HashMap<PostCallHook, Vec<Registered<PostCallFn>>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback that may mutate the arguments before the call
    pub fn before<F>(&mut self, point: PreCallHook, name: impl Into<String>, callback: F)
    where
        F: Fn(&mut PaymentObjectArgs, &HookContext<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.pre.entry(point).or_default().push(Registered {
            name: name.into(),
            callback: Arc::new(callback),
        });
    }

    /// Register an observer of the processor's response
    pub fn after<F>(&mut self, point: PostCallHook, name: impl Into<String>, callback: F)
    where
        F: Fn(&ProcessorObject, &HookContext<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.post.entry(point).or_default().push(Registered {
            name: name.into(),
            callback: Arc::new(callback),
        });
    }

    pub fn count(&self) -> usize {
        self.pre.values().map(Vec::len).sum::<usize>() + self.post.values().map(Vec::len).sum::<usize>()
    }

    /// Run pre-call hooks in order; the first failure aborts the request
    pub fn run_before(
        &self,
        point: PreCallHook,
        args: &mut PaymentObjectArgs,
        ctx: &HookContext<'_>,
    ) -> Result<()> {
        let Some(hooks) = self.pre.get(&point) else {
            return Ok(());
        };

        for hook in hooks {
            let outcome = catch_unwind(AssertUnwindSafe(|| (hook.callback)(args, ctx)));
            let failure = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(err)) => err.to_string(),
                Err(_) => "hook panicked".to_string(),
            };
            tracing::warn!(point = point.as_str(), hook = %hook.name, error = %failure, "Pre-call hook failed");
            return Err(FlowError::Hook(format!("{}: {}", hook.name, failure)));
        }
        Ok(())
    }

    /// Notify post-call observers; failures are logged and swallowed
    pub fn notify_after(&self, point: PostCallHook, object: &ProcessorObject, ctx: &HookContext<'_>) {
        let Some(hooks) = self.post.get(&point) else {
            return;
        };

        for hook in hooks {
            match catch_unwind(AssertUnwindSafe(|| (hook.callback)(object, ctx))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    tracing::warn!(point = point.as_str(), hook = %hook.name, error = %err, "Post-call hook failed");
                }
                Err(_) => {
                    tracing::warn!(point = point.as_str(), hook = %hook.name, "Post-call hook panicked");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::form::{FormData, FormDefinition, FormValues};
    use std::sync::Mutex;

    fn submission() -> FormSubmission {
        FormSubmission {
            form: FormDefinition::new(1, "Test", 100),
            form_data: FormData::default(),
            form_values: FormValues::default(),
        }
    }

    #[test]
    fn test_pre_hooks_mutate_in_order() {
        let mut hooks = HookRegistry::new();
        hooks.before(PreCallHook::BeforeCustomer, "first", |args, _| {
            args.insert("description", "first");
            Ok(())
        });
        hooks.before(PreCallHook::BeforeCustomer, "second", |args, _| {
            let prev = args.get_str("description").unwrap_or_default().to_string();
            args.insert("description", format!("{prev}+second"));
            Ok(())
        });

        let sub = submission();
        let ctx = HookContext { submission: &sub, customer_id: None };
        let mut args = PaymentObjectArgs::new();
        hooks.run_before(PreCallHook::BeforeCustomer, &mut args, &ctx).unwrap();

        assert_eq!(args.get_str("description"), Some("first+second"));
        // Other points untouched
        let mut other = PaymentObjectArgs::new();
        hooks.run_before(PreCallHook::BeforePaymentIntent, &mut other, &ctx).unwrap();
        assert!(other.as_map().is_empty());
    }

    #[test]
    fn test_pre_hook_failure_aborts() {
        let mut hooks = HookRegistry::new();
        hooks.before(PreCallHook::BeforePaymentIntent, "fraud", |_, _| {
            anyhow::bail!("blocked")
        });

        let sub = submission();
        let ctx = HookContext { submission: &sub, customer_id: Some("cus_1") };
        let err = hooks
            .run_before(PreCallHook::BeforePaymentIntent, &mut PaymentObjectArgs::new(), &ctx)
            .unwrap_err();
        assert!(matches!(err, FlowError::Hook(ref m) if m.contains("blocked")));
    }

    #[test]
    fn test_post_hook_failures_are_swallowed() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut hooks = HookRegistry::new();
        hooks.after(PostCallHook::AfterCustomer, "broken", |_, _| anyhow::bail!("smtp down"));
        hooks.after(PostCallHook::AfterCustomer, "panics", |_, _| panic!("boom"));
        let sink = seen.clone();
        hooks.after(PostCallHook::AfterCustomer, "records", move |obj, _| {
            sink.lock().unwrap().push(obj.id().unwrap_or_default().to_string());
            Ok(())
        });

        let sub = submission();
        let ctx = HookContext { submission: &sub, customer_id: None };
        let object = ProcessorObject(serde_json::json!({"id": "cus_9"}));
        hooks.notify_after(PostCallHook::AfterCustomer, &object, &ctx);

        // Later observers still run
        assert_eq!(*seen.lock().unwrap(), vec!["cus_9".to_string()]);
        assert_eq!(hooks.count(), 3);
    }
}
