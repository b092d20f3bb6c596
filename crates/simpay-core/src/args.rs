//! Payment Object Arguments
//!
//! Maps a form definition and submitted values into the argument set sent to
//! the processor's Customer and PaymentIntent APIs.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::{FlowError, Result};
use crate::form::{FormValues, PaymentMethodType};
use crate::request::{FormSubmission, PaymentIntentRequest};

/// Metadata key tagging processor objects with their originating form
pub const FORM_ID_METADATA_KEY: &str = "simpay_form_id";

/// Key/value arguments for one processor call
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaymentObjectArgs(Map<String, Value>);

impl PaymentObjectArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn metadata(&self) -> Option<&Map<String, Value>> {
        self.0.get("metadata").and_then(Value::as_object)
    }

    /// Add one metadata entry, keeping every other entry in place
    ///
    /// A `metadata` value that is not an object is replaced by an empty one
    /// first.
    pub fn add_metadata(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let metadata = self
            .0
            .entry("metadata")
            .or_insert_with(|| Value::Object(Map::new()));
        if !metadata.is_object() {
            *metadata = Value::Object(Map::new());
        }
        if let Value::Object(map) = metadata {
            map.insert(key.into(), value.into());
        }
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Map<String, Value>> for PaymentObjectArgs {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Values of fields marked for metadata, keyed by field key
fn field_metadata(submission: &FormSubmission) -> Map<String, Value> {
    submission
        .form
        .fields
        .iter()
        .filter(|field| field.metadata)
        .filter_map(|field| {
            submission
                .form_values
                .metadata_value(&field.key)
                .map(|v| (field.key.clone(), Value::String(v)))
        })
        .collect()
}

fn insert_opt(args: &mut PaymentObjectArgs, key: &str, values: &FormValues, field: &str) {
    if let Some(value) = values.get_str(field) {
        args.insert(key, value);
    }
}

/// Base Customer arguments derived from the submitted form
pub fn customer_base_args(submission: &FormSubmission) -> PaymentObjectArgs {
    let values = &submission.form_values;
    let mut args = PaymentObjectArgs::new();

    insert_opt(&mut args, "email", values, "simpay_email");
    insert_opt(&mut args, "name", values, "simpay_customer_name");
    insert_opt(&mut args, "phone", values, "simpay_telephone");

    let metadata = field_metadata(submission);
    if !metadata.is_empty() {
        args.insert("metadata", Value::Object(metadata));
    }

    args
}

/// Customer arguments with the form id tagged into metadata
pub fn customer_args(submission: &FormSubmission) -> PaymentObjectArgs {
    let mut args = customer_base_args(submission);
    args.add_metadata(FORM_ID_METADATA_KEY, submission.form.id.to_string());
    args
}

/// Base PaymentIntent arguments derived from the submitted form
pub fn payment_intent_base_args(submission: &FormSubmission) -> Result<PaymentObjectArgs> {
    let form = &submission.form;
    let mut args = PaymentObjectArgs::new();

    args.insert("amount", form.resolve_amount(&submission.form_data)?);
    args.insert("currency", form.currency.to_lowercase());
    args.insert(
        "description",
        form.description.clone().unwrap_or_else(|| form.title.clone()),
    );
    insert_opt(&mut args, "receipt_email", &submission.form_values, "simpay_email");

    let metadata = field_metadata(submission);
    if !metadata.is_empty() {
        args.insert("metadata", Value::Object(metadata));
    }
    args.add_metadata(FORM_ID_METADATA_KEY, form.id.to_string());

    Ok(args)
}

/// Full PaymentIntent arguments, including payment method overrides
pub fn payment_intent_args(request: &PaymentIntentRequest) -> Result<PaymentObjectArgs> {
    let kind = &request.payment_method_type;
    if !request.submission.form.supports(kind) {
        return Err(FlowError::UnsupportedPaymentMethod(kind.to_string()));
    }

    let mut args = payment_intent_base_args(&request.submission)?;
    args.insert("customer", request.customer_id.as_str());
    args.insert("expand", json!(["customer"]));
    args.insert("payment_method_types", json!([kind.as_str()]));

    match kind {
        PaymentMethodType::Card => {
            let payment_method = request
                .payment_method_id
                .as_deref()
                .ok_or(FlowError::MissingPaymentMethod)?;
            args.insert("payment_method", payment_method);
        }
        kind if kind.requires_off_session_usage() => {
            args.insert("setup_future_usage", "off_session");
        }
        _ => {}
    }

    Ok(args)
}
