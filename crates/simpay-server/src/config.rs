//! Server Configuration
//!
//! Read from the environment (after `.env` is loaded).

use anyhow::{bail, Context};
use ipnet::IpNet;
use std::net::IpAddr;
use std::time::Duration;

use simpay_core::{ApiCredentials, ApiMode};
use simpay_payments::{Edition, License, LicenseKey, LicenseStatus};

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_addr: String,

    /// JSON array of form definitions
    pub forms_path: String,

    pub test_credentials: ApiCredentials,
    pub live_credentials: ApiCredentials,

    pub nonce_secret: String,

    pub rate_limit_max: u32,
    pub rate_limit_window: Duration,

    /// Peers whose `X-Forwarded-For` / `X-Real-IP` headers are believed
    pub trusted_proxies: Vec<IpNet>,

    pub license: License,
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; empty values count as unset
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let Some(nonce_secret) = var("SIMPAY_NONCE_SECRET") else {
            bail!("SIMPAY_NONCE_SECRET not set");
        };

        let rate_limit_max = match var("SIMPAY_RATE_LIMIT_MAX") {
            Some(v) => v.parse().context("SIMPAY_RATE_LIMIT_MAX must be a number")?,
            None => 30,
        };
        let rate_limit_window = match var("SIMPAY_RATE_LIMIT_WINDOW_SECS") {
            Some(v) => Duration::from_secs(
                v.parse()
                    .context("SIMPAY_RATE_LIMIT_WINDOW_SECS must be a number of seconds")?,
            ),
            None => Duration::from_secs(60),
        };
        if rate_limit_max == 0 || rate_limit_window.is_zero() {
            bail!("SIMPAY_RATE_LIMIT_MAX and SIMPAY_RATE_LIMIT_WINDOW_SECS must be greater than zero");
        }

        let trusted_proxies = match var("SIMPAY_TRUSTED_PROXIES") {
            Some(list) => parse_proxies(&list)?,
            None => Vec::new(),
        };

        let license = match var("SIMPAY_LICENSE_KEY") {
            Some(key) => {
                let mut license = License::new(
                    LicenseKey::from_string(key),
                    var("SIMPAY_EDITION").map_or(Edition::Pro, |e| Edition::from_str(&e)),
                    var("SIMPAY_LICENSE_STATUS")
                        .map_or(LicenseStatus::Empty, |s| LicenseStatus::from_str(&s)),
                    var("SIMPAY_LICENSE_PRICE_ID"),
                );
                license.customer_email = var("SIMPAY_LICENSE_EMAIL");
                license
            }
            None => {
                let mut license = License::lite();
                license.edition = var("SIMPAY_EDITION").map_or(Edition::Lite, |e| Edition::from_str(&e));
                license
            }
        };

        Ok(Self {
            bind_addr: var("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:3000".into()),
            forms_path: var("SIMPAY_FORMS_PATH").unwrap_or_else(|| "forms.json".into()),
            test_credentials: ApiCredentials::new(
                var("STRIPE_TEST_SECRET_KEY").unwrap_or_default(),
                ApiMode::Test,
            ),
            live_credentials: ApiCredentials::new(
                var("STRIPE_LIVE_SECRET_KEY").unwrap_or_default(),
                ApiMode::Live,
            ),
            nonce_secret,
            rate_limit_max,
            rate_limit_window,
            trusted_proxies,
            license,
        })
    }

    pub fn stripe_configured(&self) -> bool {
        self.test_credentials.is_configured() || self.live_credentials.is_configured()
    }
}

/// Comma-separated CIDR networks or single addresses
fn parse_proxies(list: &str) -> anyhow::Result<Vec<IpNet>> {
    list.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            entry
                .parse::<IpNet>()
                .or_else(|_| entry.parse::<IpAddr>().map(IpNet::from))
                .with_context(|| format!("SIMPAY_TRUSTED_PROXIES: invalid address '{}'", entry))
        })
        .collect()
}
