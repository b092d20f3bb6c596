//! Payment Forms
//!
//! Form definitions are configured ahead of time and loaded read-only for
//! each request through a [`FormRepository`].

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::error::{FlowError, Result};

/// Payment form identifier
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FormId(pub u64);

impl std::fmt::Display for FormId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Processor API mode
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiMode {
    #[default]
    Test,
    Live,
}

/// Credentials used for every processor call made on behalf of a form
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ApiCredentials {
    pub secret_key: String,
    pub mode: ApiMode,
    /// Connected account the request is made on behalf of
    pub account: Option<String>,
}

impl ApiCredentials {
    pub fn new(secret_key: impl Into<String>, mode: ApiMode) -> Self {
        Self {
            secret_key: secret_key.into(),
            mode,
            account: None,
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.secret_key.is_empty()
    }
}

impl std::fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiCredentials")
            .field("secret_key", &"[redacted]")
            .field("mode", &self.mode)
            .field("account", &self.account)
            .finish()
    }
}

/// Payment method types a form can collect
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PaymentMethodType {
    Card,
    SepaDebit,
    AchDebit,
    Ideal,
    Bancontact,
    Giropay,
    P24,
    Other(String),
}

impl PaymentMethodType {
    pub fn as_str(&self) -> &str {
        match self {
            PaymentMethodType::Card => "card",
            PaymentMethodType::SepaDebit => "sepa_debit",
            PaymentMethodType::AchDebit => "ach_debit",
            PaymentMethodType::Ideal => "ideal",
            PaymentMethodType::Bancontact => "bancontact",
            PaymentMethodType::Giropay => "giropay",
            PaymentMethodType::P24 => "p24",
            PaymentMethodType::Other(s) => s,
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "card" => PaymentMethodType::Card,
            "sepa_debit" => PaymentMethodType::SepaDebit,
            "ach_debit" => PaymentMethodType::AchDebit,
            "ideal" => PaymentMethodType::Ideal,
            "bancontact" => PaymentMethodType::Bancontact,
            "giropay" => PaymentMethodType::Giropay,
            "p24" => PaymentMethodType::P24,
            other => PaymentMethodType::Other(other.to_string()),
        }
    }

    /// Mandate-based debits are reused off-session once authorized
    pub fn requires_off_session_usage(&self) -> bool {
        matches!(self, PaymentMethodType::SepaDebit)
    }
}

impl Default for PaymentMethodType {
    fn default() -> Self {
        PaymentMethodType::Card
    }
}

impl std::fmt::Display for PaymentMethodType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for PaymentMethodType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for PaymentMethodType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(PaymentMethodType::from_str(&s))
    }
}

/// A named input rendered on the payment form
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FormField {
    /// Name the value is submitted under (e.g. `simpay_email`)
    pub key: String,

    pub label: String,

    #[serde(rename = "type", default = "default_field_type")]
    pub field_type: String,

    #[serde(default)]
    pub required: bool,

    /// Copy the submitted value into processor metadata
    #[serde(default)]
    pub metadata: bool,
}

fn default_field_type() -> String {
    "text".into()
}

/// Bounds for visitor-entered amounts
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomAmount {
    /// Smallest accepted amount in minor units
    pub minimum: i64,
}

/// A configured payment form
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FormDefinition {
    pub id: FormId,

    pub title: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Default amount in minor units
    pub amount: i64,

    #[serde(default = "default_currency")]
    pub currency: String,

    #[serde(default)]
    pub custom_amount: Option<CustomAmount>,

    #[serde(default)]
    pub fields: Vec<FormField>,

    #[serde(default = "default_payment_methods")]
    pub payment_methods: Vec<PaymentMethodType>,

    #[serde(default)]
    pub livemode: bool,

    /// Filled in from server configuration, never from the forms file
    #[serde(skip)]
    pub credentials: ApiCredentials,
}

fn default_currency() -> String {
    "usd".into()
}

fn default_payment_methods() -> Vec<PaymentMethodType> {
    vec![PaymentMethodType::Card]
}

impl FormDefinition {
    pub fn new(id: u64, title: impl Into<String>, amount: i64) -> Self {
        Self {
            id: FormId(id),
            title: title.into(),
            description: None,
            amount,
            currency: default_currency(),
            custom_amount: None,
            fields: Vec::new(),
            payment_methods: default_payment_methods(),
            livemode: false,
            credentials: ApiCredentials::default(),
        }
    }

    pub fn with_field(mut self, field: FormField) -> Self {
        self.fields.push(field);
        self
    }

    pub fn with_payment_methods(mut self, methods: Vec<PaymentMethodType>) -> Self {
        self.payment_methods = methods;
        self
    }

    pub fn with_credentials(mut self, credentials: ApiCredentials) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn api_mode(&self) -> ApiMode {
        if self.livemode { ApiMode::Live } else { ApiMode::Test }
    }

    pub fn supports(&self, kind: &PaymentMethodType) -> bool {
        self.payment_methods.contains(kind)
    }

    pub fn required_fields(&self) -> impl Iterator<Item = &FormField> {
        self.fields.iter().filter(|f| f.required)
    }

    /// Amount to charge, honoring a visitor-entered amount when allowed
    pub fn resolve_amount(&self, form_data: &FormData) -> Result<i64> {
        let Some(custom) = &self.custom_amount else {
            return Ok(self.amount);
        };

        match form_data.custom_amount()? {
            None => Ok(self.amount),
            Some(amount) if amount >= custom.minimum => Ok(amount),
            Some(amount) => Err(FlowError::MalformedPayload(format!(
                "custom amount {} is below the minimum of {}",
                amount, custom.minimum
            ))),
        }
    }
}

/// Client-generated form state, submitted as a JSON string
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FormData(pub serde_json::Map<String, serde_json::Value>);

impl FormData {
    pub fn parse(raw: &str) -> Result<Self> {
        match serde_json::from_str::<serde_json::Value>(raw)? {
            serde_json::Value::Object(map) => Ok(Self(map)),
            serde_json::Value::Null => Ok(Self::default()),
            other => Err(FlowError::MalformedPayload(format!(
                "form_data must be an object, got {}",
                json_kind(&other)
            ))),
        }
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    /// `customAmount`, accepted as a number or a numeric string
    pub fn custom_amount(&self) -> Result<Option<i64>> {
        match self.0.get("customAmount") {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(serde_json::Value::Number(n)) => n
                .as_i64()
                .map(Some)
                .ok_or_else(|| FlowError::MalformedPayload("customAmount is not an integer".into())),
            Some(serde_json::Value::String(s)) if s.trim().is_empty() => Ok(None),
            Some(serde_json::Value::String(s)) => s
                .trim()
                .parse::<i64>()
                .map(Some)
                .map_err(|_| FlowError::MalformedPayload("customAmount is not an integer".into())),
            Some(other) => Err(FlowError::MalformedPayload(format!(
                "customAmount must be a number, got {}",
                json_kind(other)
            ))),
        }
    }
}

/// Values of the named fields on the payment form
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FormValues(pub BTreeMap<String, serde_json::Value>);

impl FormValues {
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Trimmed, non-empty string value
    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.0.get(key) {
            Some(serde_json::Value::String(s)) if !s.trim().is_empty() => Some(s.trim()),
            _ => None,
        }
    }

    /// Whether a value was actually filled in
    pub fn is_filled(&self, key: &str) -> bool {
        match self.0.get(key) {
            None | Some(serde_json::Value::Null) => false,
            Some(serde_json::Value::String(s)) => !s.trim().is_empty(),
            Some(serde_json::Value::Array(items)) => !items.is_empty(),
            Some(serde_json::Value::Bool(b)) => *b,
            Some(_) => true,
        }
    }

    /// Scalar value rendered as processor metadata text
    pub fn metadata_value(&self, key: &str) -> Option<String> {
        match self.0.get(key)? {
            serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            serde_json::Value::Bool(b) => Some(b.to_string()),
            serde_json::Value::Array(items) if !items.is_empty() => Some(
                items
                    .iter()
                    .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
                    .collect::<Vec<_>>()
                    .join(", "),
            ),
            _ => None,
        }
    }
}

pub(crate) fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// Form lookup capability
pub trait FormRepository: Send + Sync {
    /// Resolve a form by id
    fn get(&self, id: FormId) -> Option<FormDefinition>;

    /// Number of forms available
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory form repository
#[derive(Default)]
pub struct MemoryFormRepository {
    forms: HashMap<FormId, FormDefinition>,
}

impl MemoryFormRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_forms(forms: impl IntoIterator<Item = FormDefinition>) -> Self {
        let mut repo = Self::new();
        for form in forms {
            repo.insert(form);
        }
        repo
    }

    /// Parse a JSON array of form definitions
    pub fn from_json(json: &str) -> Result<Self> {
        let forms: Vec<FormDefinition> = serde_json::from_str(json)
            .map_err(|e| FlowError::Config(format!("invalid forms definition: {}", e)))?;
        Ok(Self::from_forms(forms))
    }

    pub fn insert(&mut self, form: FormDefinition) {
        self.forms.insert(form.id, form);
    }

    /// Assign credentials to every form according to its API mode
    pub fn apply_credentials(&mut self, test: &ApiCredentials, live: &ApiCredentials) {
        for form in self.forms.values_mut() {
            form.credentials = match form.api_mode() {
                ApiMode::Test => test.clone(),
                ApiMode::Live => live.clone(),
            };
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &FormDefinition> {
        self.forms.values()
    }
}

impl FormRepository for MemoryFormRepository {
    fn get(&self, id: FormId) -> Option<FormDefinition> {
        self.forms.get(&id).cloned()
    }

    fn len(&self) -> usize {
        self.forms.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_form_data_parse() {
        let data = FormData::parse(r#"{"customAmount": "1500"}"#).unwrap();
        assert_eq!(data.custom_amount().unwrap(), Some(1500));

        assert!(FormData::parse("[1, 2]").is_err());
        assert!(FormData::parse("{not json").is_err());
        assert_eq!(FormData::parse("null").unwrap(), FormData::default());
    }

    #[test]
    fn test_resolve_amount() {
        let mut form = FormDefinition::new(1, "Donation", 1000);
        let data = FormData::parse(r#"{"customAmount": 250}"#).unwrap();

        // Fixed price forms ignore client amounts
        assert_eq!(form.resolve_amount(&data).unwrap(), 1000);

        form.custom_amount = Some(CustomAmount { minimum: 100 });
        assert_eq!(form.resolve_amount(&data).unwrap(), 250);
        assert_eq!(form.resolve_amount(&FormData::default()).unwrap(), 1000);

        form.custom_amount = Some(CustomAmount { minimum: 500 });
        assert!(matches!(
            form.resolve_amount(&data),
            Err(FlowError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_form_values() {
        let mut values = FormValues::default();
        values.insert("simpay_email", "  jo@example.com ");
        values.insert("blank", "   ");
        values.insert("options", serde_json::json!(["a", "b"]));

        assert_eq!(values.get_str("simpay_email"), Some("jo@example.com"));
        assert!(!values.is_filled("blank"));
        assert!(values.is_filled("options"));
        assert_eq!(values.metadata_value("options").as_deref(), Some("a, b"));
    }

    #[test]
    fn test_repository_from_json() {
        let json = r#"[
            {"id": 7, "title": "Tickets", "amount": 2500, "livemode": true,
             "payment_methods": ["card", "sepa_debit"],
             "fields": [{"key": "simpay_email", "label": "Email", "required": true}]}
        ]"#;
        let mut repo = MemoryFormRepository::from_json(json).unwrap();
        repo.apply_credentials(
            &ApiCredentials::new("sk_test_1", ApiMode::Test),
            &ApiCredentials::new("sk_live_1", ApiMode::Live),
        );

        let form = repo.get(FormId(7)).unwrap();
        assert_eq!(form.currency, "usd");
        assert_eq!(form.credentials.secret_key, "sk_live_1");
        assert!(form.supports(&PaymentMethodType::SepaDebit));
        assert_eq!(form.required_fields().count(), 1);
        assert!(repo.get(FormId(8)).is_none());
    }

    #[test]
    fn test_credentials_debug_redacted() {
        let creds = ApiCredentials::new("sk_live_secret", ApiMode::Live);
        assert!(!format!("{:?}", creds).contains("sk_live_secret"));
    }
}
