//! License Management
//!
//! Product license records and tier gating. A license's price id encodes its
//! tier (`1` personal through `4` ultimate) and is compared with
//! version-string semantics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use simpay_core::{PaymentMethodPolicy, PaymentMethodType};


/// License key (formatted: XXXX-XXXX-XXXX-XXXX)
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LicenseKey(String);

impl LicenseKey {
    /// Parse from string
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into().trim().to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for LicenseKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Product edition installed
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Edition {
    #[default]
    Lite,
    Pro,
}

impl Edition {
    pub fn from_str(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "pro" => Edition::Pro,
            _ => Edition::Lite,
        }
    }
}

/// License tiers, lowest first
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Personal,
    Plus,
    Professional,
    Ultimate,
}

impl Tier {
    pub const ALL: [Tier; 4] = [Tier::Personal, Tier::Plus, Tier::Professional, Tier::Ultimate];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Personal => "personal",
            Tier::Plus => "plus",
            Tier::Professional => "professional",
            Tier::Ultimate => "ultimate",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "personal" => Some(Tier::Personal),
            "plus" => Some(Tier::Plus),
            "professional" => Some(Tier::Professional),
            "ultimate" => Some(Tier::Ultimate),
            _ => None,
        }
    }

    /// Price id the tier starts at
    pub fn price_id(&self) -> &'static str {
        match self {
            Tier::Personal => "1",
            Tier::Plus => "2",
            Tier::Professional => "3",
            Tier::Ultimate => "4",
        }
    }

    /// Lowest tier a payment method type is available on; `None` means Lite
    pub fn for_payment_method(kind: &PaymentMethodType) -> Option<Tier> {
        match kind {
            PaymentMethodType::Card => None,
            _ => Some(Tier::Professional),
        }
    }
}

/// Comparison applied between a license's price id and a tier threshold
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Comparison {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl Comparison {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim() {
            "<" | "lt" => Some(Comparison::Lt),
            "<=" | "le" => Some(Comparison::Le),
            ">" | "gt" => Some(Comparison::Gt),
            ">=" | "ge" => Some(Comparison::Ge),
            "==" | "=" | "eq" => Some(Comparison::Eq),
            "!=" | "<>" | "ne" => Some(Comparison::Ne),
            _ => None,
        }
    }

    pub fn holds(&self, ordering: Ordering) -> bool {
        match self {
            Comparison::Lt => ordering == Ordering::Less,
            Comparison::Le => ordering != Ordering::Greater,
            Comparison::Gt => ordering == Ordering::Greater,
            Comparison::Ge => ordering != Ordering::Less,
            Comparison::Eq => ordering == Ordering::Equal,
            Comparison::Ne => ordering != Ordering::Equal,
        }
    }
}

/// Rank of a non-numeric version segment, matched by prefix
///
/// `dev < alpha = a < beta = b < RC = rc < # < pl = p`; anything else sorts
/// below `dev`.
fn special_rank(segment: &str) -> i8 {
    const FORMS: [(&str, i8); 10] = [
        ("dev", 0),
        ("alpha", 1),
        ("a", 1),
        ("beta", 2),
        ("b", 2),
        ("RC", 3),
        ("rc", 3),
        ("#", 4),
        ("pl", 5),
        ("p", 5),
    ];
    FORMS
        .iter()
        .find(|(form, _)| segment.starts_with(form))
        .map_or(-6, |(_, rank)| *rank)
}

/// Split into segments: `-`, `_` and `+` act as `.`, and a change between
/// digits and non-digits starts a new segment (`1.0rc1` → `1 0 rc 1`).
fn canonical_segments(version: &str) -> Vec<String> {
    let mut segments: Vec<String> = Vec::new();
    let mut current = String::new();
    for c in version.trim().chars() {
        if matches!(c, '.' | '-' | '_' | '+') {
            if !current.is_empty() {
                segments.push(std::mem::take(&mut current));
            }
            continue;
        }
        if current
            .chars()
            .last()
            .is_some_and(|last| last.is_ascii_digit() != c.is_ascii_digit())
        {
            segments.push(std::mem::take(&mut current));
        }
        current.push(c);
    }
    if !current.is_empty() {
        segments.push(current);
    }
    segments
}

fn is_numeric(segment: &str) -> bool {
    segment.starts_with(|c: char| c.is_ascii_digit())
}

fn compare_segments(a: &str, b: &str) -> Ordering {
    match (is_numeric(a), is_numeric(b)) {
        (true, true) => {
            let (a, b) = (a.trim_start_matches('0'), b.trim_start_matches('0'));
            a.len().cmp(&b.len()).then_with(|| a.cmp(b))
        }
        (false, false) => special_rank(a).cmp(&special_rank(b)),
        // A number ranks as `#`
        (true, false) => special_rank("#").cmp(&special_rank(b)),
        (false, true) => special_rank(a).cmp(&special_rank("#")),
    }
}

/// Compare version strings the way PHP's `version_compare` does
///
/// Numeric segments compare numerically. Named segments follow the
/// special-form order of [`special_rank`]. When one version runs out, a
/// trailing number makes the longer one greater (`1.0.1 > 1.0`), while a
/// trailing name is ranked against `#` (`1.0rc1 < 1.0`, `1.0pl1 > 1.0`).
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let (left, right) = (canonical_segments(a), canonical_segments(b));

    for (l, r) in left.iter().zip(&right) {
        let ordering = compare_segments(l, r);
        if ordering != Ordering::Equal {
            return ordering;
        }
    }

    match (left.get(right.len()), right.get(left.len())) {
        (Some(rest), _) if is_numeric(rest) => Ordering::Greater,
        (Some(rest), _) => compare_segments(rest, "#"),
        (_, Some(rest)) if is_numeric(rest) => Ordering::Less,
        (_, Some(rest)) => compare_segments("#", rest),
        (None, None) => Ordering::Equal,
    }
}

/// License status as reported by the licensing server
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LicenseStatus {
    Valid,
    Expired,
    Disabled,
    Revoked,
    SiteInactive,
    Invalid,
    #[default]
    #[serde(other)]
    Empty,
}

impl LicenseStatus {
    pub fn from_str(s: &str) -> Self {
        serde_json::from_value(serde_json::Value::String(s.trim().to_lowercase()))
            .unwrap_or(LicenseStatus::Empty)
    }
}

/// A license record
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct License {
    pub key: LicenseKey,

    #[serde(default)]
    pub customer_email: Option<String>,

    #[serde(default)]
    pub customer_name: Option<String>,

    #[serde(default)]
    pub item_id: Option<u64>,

    /// Tier-encoding price id; absent means the tier is unknown
    #[serde(default)]
    pub price_id: Option<String>,

    /// `None` for lifetime licenses
    #[serde(default)]
    pub expiration: Option<DateTime<Utc>>,

    #[serde(default)]
    pub status: LicenseStatus,

    #[serde(default)]
    pub edition: Edition,
}

impl License {
    pub fn new(key: LicenseKey, edition: Edition, status: LicenseStatus, price_id: Option<String>) -> Self {
        Self {
            key,
            customer_email: None,
            customer_name: None,
            item_id: None,
            price_id,
            expiration: None,
            status,
            edition,
        }
    }

    /// The Lite edition with no license key
    pub fn lite() -> Self {
        Self::new(LicenseKey::from_string(""), Edition::Lite, LicenseStatus::Empty, None)
    }

    pub fn is_valid(&self) -> bool {
        self.status == LicenseStatus::Valid
    }

    pub fn is_lite(&self) -> bool {
        self.edition == Edition::Lite
    }

    pub fn is_expired(&self) -> bool {
        self.expiration.is_some_and(|expires| Utc::now() > expires)
    }

    /// Compare the license tier against `tier` (e.g. `is_pro(Tier::Plus, Comparison::Ge)`)
    pub fn is_pro(&self, tier: Tier, comparison: Comparison) -> bool {
        if self.is_lite() {
            return false;
        }
        let Some(price_id) = self.price_id.as_deref() else {
            return false;
        };
        comparison.holds(compare_versions(price_id, tier.price_id()))
    }

    /// Highest tier the price id reaches
    pub fn tier(&self) -> Option<Tier> {
        Tier::ALL
            .iter()
            .rev()
            .copied()
            .find(|tier| self.is_pro(*tier, Comparison::Ge))
    }

    /// Whether this license unlocks a payment method type
    pub fn allows_payment_method(&self, kind: &PaymentMethodType) -> bool {
        match Tier::for_payment_method(kind) {
            None => true,
            Some(tier) => self.is_valid() && !self.is_expired() && self.is_pro(tier, Comparison::Ge),
        }
    }

    pub fn report(&self) -> LicenseReport {
        LicenseReport {
            edition: self.edition,
            status: self.status.clone(),
            valid: self.is_valid(),
            tier: self.tier(),
            expiration: self.expiration,
            expired: self.is_expired(),
        }
    }
}

/// Payment method policy backed by the installed license
#[derive(Clone, Debug)]
pub struct LicenseGate {
    license: License,
}

impl LicenseGate {
    pub fn new(license: License) -> Self {
        Self { license }
    }

    pub fn license(&self) -> &License {
        &self.license
    }
}

impl PaymentMethodPolicy for LicenseGate {
    fn allows(&self, kind: &PaymentMethodType) -> bool {
        let allowed = self.license.allows_payment_method(kind);
        if !allowed {
            tracing::debug!(
                payment_method_type = %kind,
                edition = ?self.license.edition,
                status = ?self.license.status,
                "Payment method type requires a higher license tier"
            );
        }
        allowed
    }
}

/// License state exposed to clients (the key itself is never included)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LicenseReport {
    pub edition: Edition,
    pub status: LicenseStatus,
    pub valid: bool,
    pub tier: Option<Tier>,
    pub expiration: Option<DateTime<Utc>>,
    pub expired: bool,
}
