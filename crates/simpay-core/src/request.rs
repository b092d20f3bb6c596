//! Request Normalization
//!
//! Turns the raw field map of an inbound call into a typed request, failing
//! fast on the first absent or malformed field. The form reference is always
//! resolved here, so no processor call can happen for an unknown form.

use serde_json::{Map, Value};
use std::net::IpAddr;
use std::sync::Arc;

use crate::error::{FlowError, Result};
use crate::form::{
    json_kind, FormData, FormDefinition, FormId, FormRepository, FormValues, PaymentMethodType,
};

/// An inbound call before validation
#[derive(Clone, Debug, Default)]
pub struct RawRequest {
    fields: Map<String, Value>,
    client_ip: Option<IpAddr>,
}

impl RawRequest {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self {
            fields,
            client_ip: None,
        }
    }

    /// Build from any JSON value; non-objects yield an empty field map
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(fields) => Self::new(fields),
            _ => Self::default(),
        }
    }

    pub fn with_client_ip(mut self, ip: Option<IpAddr>) -> Self {
        self.client_ip = ip;
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn client_ip(&self) -> Option<IpAddr> {
        self.client_ip
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Field is set and not null
    pub fn has(&self, key: &str) -> bool {
        !matches!(self.fields.get(key), None | Some(Value::Null))
    }

    /// Field as text; numbers are rendered, empty strings count as absent
    pub fn get_str(&self, key: &str) -> Option<String> {
        match self.fields.get(key)? {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// Form and submitted state shared by every endpoint
#[derive(Clone, Debug)]
pub struct FormSubmission {
    pub form: FormDefinition,
    pub form_data: FormData,
    pub form_values: FormValues,
}

/// Create or update a Customer
#[derive(Clone, Debug)]
pub struct CustomerRequest {
    pub submission: FormSubmission,
    /// Existing Customer to update instead of creating one
    pub object_id: Option<String>,
}

/// Create a PaymentIntent for a previously created Customer
#[derive(Clone, Debug)]
pub struct PaymentIntentRequest {
    pub submission: FormSubmission,
    pub customer_id: String,
    pub payment_method_type: PaymentMethodType,
    pub payment_method_id: Option<String>,
}

/// Confirm an existing PaymentIntent
#[derive(Clone, Debug)]
pub struct ConfirmRequest {
    pub submission: FormSubmission,
    pub payment_intent_id: String,
    pub customer_id: String,
}

/// Validates raw requests and resolves their form
#[derive(Clone)]
pub struct RequestNormalizer {
    forms: Arc<dyn FormRepository>,
}

impl RequestNormalizer {
    pub fn new(forms: Arc<dyn FormRepository>) -> Self {
        Self { forms }
    }

    pub fn forms(&self) -> &Arc<dyn FormRepository> {
        &self.forms
    }

    pub fn customer(&self, request: &RawRequest) -> Result<CustomerRequest> {
        reject_legacy_source(request)?;

        let submission = self.submission(request)?;
        let object_id = request.get_str("object_id");

        Ok(CustomerRequest {
            submission,
            object_id,
        })
    }

    pub fn payment_intent(&self, request: &RawRequest) -> Result<PaymentIntentRequest> {
        reject_legacy_source(request)?;

        let payment_method_type = request
            .get_str("payment_method_type")
            .map(|t| PaymentMethodType::from_str(&t))
            .unwrap_or_default();
        let customer_id = required_str(request, "customer_id")?;
        let submission = self.submission(request)?;

        Ok(PaymentIntentRequest {
            submission,
            customer_id,
            payment_method_type,
            payment_method_id: request.get_str("payment_method_id"),
        })
    }

    pub fn confirm(&self, request: &RawRequest) -> Result<ConfirmRequest> {
        reject_legacy_source(request)?;

        let payment_intent_id = required_str(request, "payment_intent_id")?;
        let customer_id = required_str(request, "customer_id")?;
        let submission = self.submission(request)?;

        Ok(ConfirmRequest {
            submission,
            payment_intent_id,
            customer_id,
        })
    }

    fn submission(&self, request: &RawRequest) -> Result<FormSubmission> {
        let form_id = parse_form_id(request)?;
        let form_data = parse_form_data(request.get("form_data"))?;
        let form_values = parse_form_values(request.get("form_values"))?;

        let form = self.forms.get(form_id).ok_or(FlowError::FormNotFound(form_id))?;

        Ok(FormSubmission {
            form,
            form_data,
            form_values,
        })
    }
}

/// A PaymentMethod and a legacy Source are never accepted together
fn reject_legacy_source(request: &RawRequest) -> Result<()> {
    if request.has("payment_method_id") && request.has("source_id") {
        return Err(FlowError::ConflictingPaymentSource);
    }
    Ok(())
}

fn required_str(request: &RawRequest, key: &str) -> Result<String> {
    request
        .get_str(key)
        .ok_or_else(|| FlowError::MissingField(key.to_string()))
}

pub(crate) fn parse_form_id(request: &RawRequest) -> Result<FormId> {
    match request.get("form_id") {
        None | Some(Value::Null) => Err(FlowError::MissingField("form_id".into())),
        Some(Value::Number(n)) => n
            .as_u64()
            .map(FormId)
            .ok_or_else(|| FlowError::MalformedPayload(format!("form_id {} is not a valid id", n))),
        Some(Value::String(s)) if s.trim().is_empty() => {
            Err(FlowError::MissingField("form_id".into()))
        }
        Some(Value::String(s)) => s
            .trim()
            .parse::<u64>()
            .map(FormId)
            .map_err(|_| FlowError::MalformedPayload(format!("form_id '{}' is not a valid id", s))),
        Some(other) => Err(FlowError::MalformedPayload(format!(
            "form_id must be an integer, got {}",
            json_kind(other)
        ))),
    }
}

fn parse_form_data(value: Option<&Value>) -> Result<FormData> {
    match value {
        None | Some(Value::Null) => Ok(FormData::default()),
        Some(Value::String(raw)) => FormData::parse(raw),
        // Already-decoded JSON bodies are accepted as is
        Some(Value::Object(map)) => Ok(FormData(map.clone())),
        Some(other) => Err(FlowError::MalformedPayload(format!(
            "form_data must be a serialized object, got {}",
            json_kind(other)
        ))),
    }
}

fn parse_form_values(value: Option<&Value>) -> Result<FormValues> {
    match value {
        None | Some(Value::Null) => Ok(FormValues::default()),
        Some(Value::Object(map)) => Ok(FormValues(
            map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        )),
        Some(other) => Err(FlowError::MalformedPayload(format!(
            "form_values must be an object, got {}",
            json_kind(other)
        ))),
    }
}
