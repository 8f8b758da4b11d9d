pub mod activation;
pub mod memory;
pub mod provision;

pub use activation::{
    ActivationError, ActivationMode, ActivationOutcome, activate_or_validate, renew,
};
pub use memory::MemoryKeyStore;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use thiserror::Error;

/// Length of a subscription period, counted from the moment of activation or renewal.
pub const ACTIVATION_PERIOD_DAYS: i64 = 30;

/// Key inserted by the bootstrap endpoint and by the in-memory store at startup.
pub const BOOTSTRAP_KEY: &str = "ETSY-SEO-TEST123";

pub fn expiry_from(now: DateTime<Utc>) -> DateTime<Utc> {
    now + Duration::days(ACTIVATION_PERIOD_DAYS)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStatus {
    Inactive,
    Active,
}

/// One row of the `activation_keys` table.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyRecord {
    pub key_code: String,
    #[serde(default)]
    pub status: Option<KeyStatus>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub activated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl KeyRecord {
    pub fn provisioned(key_code: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            key_code: key_code.into(),
            status: Some(KeyStatus::Inactive),
            email: None,
            activated_at: None,
            expires_at: None,
            created_at: Some(created_at),
        }
    }

    /// Email the key is bound to. Blank values count as unbound.
    pub fn bound_email(&self) -> Option<&str> {
        self.email
            .as_deref()
            .map(str::trim)
            .filter(|email| !email.is_empty())
    }

    /// Stored status, or one derived from the binding columns for rows that predate it.
    pub fn effective_status(&self) -> KeyStatus {
        self.status.unwrap_or_else(|| {
            if self.bound_email().is_some() && self.expires_at.is_some() {
                KeyStatus::Active
            } else {
                KeyStatus::Inactive
            }
        })
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("invalid response: {0}")]
    Deserialize(String),
    #[error("activation key `{0}` does not exist")]
    NotFound(String),
}

/// Persistence boundary for activation keys.
///
/// Every mutation is a single statement against one row; callers get no
/// transactional guarantees across a lookup and a following write.
#[async_trait]
pub trait KeyStore: Send + Sync + 'static {
    async fn ping(&self) -> Result<(), StoreError>;

    async fn lookup(&self, key_code: &str) -> Result<Option<KeyRecord>, StoreError>;

    /// Inserts an unbound key. Returns `false` when the key already existed.
    async fn create(&self, key_code: &str) -> Result<bool, StoreError>;

    async fn bind(
        &self,
        key_code: &str,
        email: &str,
        activated_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn renew(
        &self,
        key_code: &str,
        activated_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn expiry_is_thirty_days_out() {
        let now = Utc.with_ymd_and_hms(2025, 1, 31, 12, 0, 0).unwrap();
        let expires = expiry_from(now);
        assert_eq!(
            expires,
            Utc.with_ymd_and_hms(2025, 3, 2, 12, 0, 0).unwrap()
        );
    }

    #[test]
    fn status_is_derived_when_column_missing() {
        let row: KeyRecord = serde_json::from_value(serde_json::json!({
            "key_code": "ETSY-SEO-AAAA",
            "email": "a@b.com",
            "expires_at": "2025-03-02T12:00:00Z",
        }))
        .unwrap();
        assert_eq!(row.status, None);
        assert_eq!(row.effective_status(), KeyStatus::Active);

        let fresh: KeyRecord =
            serde_json::from_value(serde_json::json!({ "key_code": "ETSY-SEO-BBBB" })).unwrap();
        assert_eq!(fresh.effective_status(), KeyStatus::Inactive);
        assert_eq!(fresh.bound_email(), None);
    }

    #[test]
    fn blank_email_is_unbound() {
        let mut row = KeyRecord::provisioned("K", Utc::now());
        row.email = Some("  ".into());
        assert_eq!(row.bound_email(), None);
    }
}
