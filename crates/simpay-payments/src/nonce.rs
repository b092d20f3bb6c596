//! Nonces
//!
//! Time-bucketed HMAC tokens bound to an action string. A nonce issued in
//! tick `t` verifies during ticks `t` and `t + 1`, where a tick is half the
//! nonce lifetime. Consumed nonces are remembered until they would have
//! expired anyway. A spent nonce still passes [`NonceService::verify`] but
//! fails [`NonceService::verify_unspent`] and a second consume.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use simpay_core::NonceIssuer;

use crate::error::{PaymentError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Lifetime of the nonce embedded in rendered payment forms
pub const FORM_NONCE_LIFETIME: Duration = Duration::from_secs(24 * 60 * 60);

/// Action the form nonce is issued for
pub const FORM_NONCE_ACTION: &str = "simpay_payment_form_nonce";

const NONCE_HEX_LEN: usize = 20;

/// Issues and verifies nonces with a server secret
pub struct NonceService {
    secret: Vec<u8>,
    /// Consumed nonce → unix time after which it can be forgotten
    consumed: Mutex<HashMap<String, i64>>,
}

impl NonceService {
    pub fn new(secret: impl AsRef<[u8]>) -> Result<Self> {
        let secret = secret.as_ref();
        if secret.len() < 16 {
            return Err(PaymentError::Config(
                "nonce secret must be at least 16 bytes".into(),
            ));
        }
        Ok(Self {
            secret: secret.to_vec(),
            consumed: Mutex::new(HashMap::new()),
        })
    }

    fn tick(now: i64, lifetime: Duration) -> i64 {
        let half = (lifetime.as_secs() / 2).max(1) as i64;
        // Ceiling division, as ticks roll over at the end of each half
        (now + half - 1) / half
    }

    fn mac(&self, action: &str, tick: i64) -> HmacSha256 {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .unwrap_or_else(|_| unreachable!("HMAC takes keys of any size"));
        mac.update(tick.to_string().as_bytes());
        mac.update(b"|");
        mac.update(action.as_bytes());
        mac
    }

    pub fn issue_at(&self, action: &str, lifetime: Duration, now: i64) -> String {
        let digest = self.mac(action, Self::tick(now, lifetime)).finalize().into_bytes();
        hex::encode(&digest[..NONCE_HEX_LEN / 2])
    }

    /// Check a nonce without consuming it
    pub fn verify_at(&self, action: &str, nonce: &str, lifetime: Duration, now: i64) -> Result<()> {
        let tag = match hex::decode(nonce) {
            Ok(tag) if tag.len() == NONCE_HEX_LEN / 2 => tag,
            _ => return Err(PaymentError::NonceInvalid("malformed nonce".into())),
        };

        // Constant-time comparison against the leading bytes of each tick's MAC
        let tick = Self::tick(now, lifetime);
        let matches = [tick, tick - 1]
            .iter()
            .any(|t| self.mac(action, *t).verify_truncated_left(&tag).is_ok());

        if matches {
            Ok(())
        } else {
            Err(PaymentError::NonceInvalid(format!("nonce for '{}' expired or invalid", action)))
        }
    }

    /// Check a nonce that must not have been consumed yet
    pub fn verify_unspent_at(&self, action: &str, nonce: &str, lifetime: Duration, now: i64) -> Result<()> {
        if self.is_consumed(nonce, now) {
            return Err(PaymentError::NonceInvalid("nonce already used".into()));
        }
        self.verify_at(action, nonce, lifetime, now)
    }

    /// Verify and mark the nonce as used
    pub fn consume_at(&self, action: &str, nonce: &str, lifetime: Duration, now: i64) -> Result<()> {
        self.verify_at(action, nonce, lifetime, now)?;

        let mut consumed = self
            .consumed
            .lock()
            .map_err(|_| PaymentError::Storage("nonce store poisoned".into()))?;
        consumed.retain(|_, expires| *expires > now);
        if consumed
            .insert(consumed_key(nonce), now + lifetime.as_secs() as i64)
            .is_some()
        {
            return Err(PaymentError::NonceInvalid("nonce already used".into()));
        }
        Ok(())
    }

    pub fn verify(&self, action: &str, nonce: &str, lifetime: Duration) -> Result<()> {
        self.verify_at(action, nonce, lifetime, now())
    }

    pub fn verify_unspent(&self, action: &str, nonce: &str, lifetime: Duration) -> Result<()> {
        self.verify_unspent_at(action, nonce, lifetime, now())
    }

    pub fn consume(&self, action: &str, nonce: &str, lifetime: Duration) -> Result<()> {
        self.consume_at(action, nonce, lifetime, now())
    }

    pub fn is_consumed(&self, nonce: &str, now: i64) -> bool {
        self.consumed
            .lock()
            .map(|consumed| {
                consumed
                    .get(&consumed_key(nonce))
                    .is_some_and(|expires| *expires > now)
            })
            .unwrap_or(true)
    }
}

impl NonceIssuer for NonceService {
    fn issue(&self, action: &str, lifetime: Duration) -> String {
        self.issue_at(action, lifetime, now())
    }

    fn consume(&self, action: &str, nonce: &str, lifetime: Duration) -> simpay_core::Result<()> {
        Ok(NonceService::consume(self, action, nonce, lifetime)?)
    }
}

/// Hex is case-insensitive, so spent nonces are keyed in one case
fn consumed_key(nonce: &str) -> String {
    nonce.to_ascii_lowercase()
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}
