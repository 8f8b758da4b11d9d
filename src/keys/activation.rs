//! License state machine.
//!
//! A key starts unbound, is bound to the first email that activates it, and
//! then stays usable by that email until `expires_at`. Only the privileged
//! renewal path moves `expires_at` forward again.

use super::{KeyRecord, KeyStore, StoreError, expiry_from};
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationMode {
    /// Bind an unbound key to the presented email.
    Bind,
    /// Accept only keys already bound to the presented email.
    ValidateOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyState {
    Unknown,
    Unbound,
    BoundMatch,
    BoundMismatch,
    Expired,
    Active,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationOutcome {
    pub state: KeyState,
    pub expires_at: DateTime<Utc>,
    /// `true` when this call performed the binding.
    pub newly_bound: bool,
}

#[derive(Debug, Error)]
pub enum ActivationError {
    #[error("missing required field `{0}`")]
    Validation(&'static str),
    #[error("activation key not recognized")]
    UnknownKey,
    #[error("activation key is bound to a different email")]
    EmailMismatch,
    #[error("subscription expired")]
    Expired,
    #[error("activation key has not been activated")]
    NotActivated,
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ActivationError {
    pub fn code(&self) -> &'static str {
        match self {
            ActivationError::Validation(_) => "invalid_input",
            ActivationError::UnknownKey => "unknown_key",
            ActivationError::EmailMismatch => "email_mismatch",
            ActivationError::Expired => "expired",
            ActivationError::NotActivated => "not_activated",
            ActivationError::Store(_) => "internal",
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            ActivationError::Validation(field) => format!("Field `{field}` is required"),
            ActivationError::UnknownKey => "Invalid activation key".into(),
            ActivationError::EmailMismatch => {
                "This key is activated with a different email address".into()
            }
            ActivationError::Expired => {
                "Your subscription has expired. Renew it to keep using the optimizer".into()
            }
            ActivationError::NotActivated => "Key is not activated. Please activate it first".into(),
            ActivationError::Store(_) => "Internal server error".into(),
        }
    }
}

/// Where a key stands relative to a presented email at `now`.
pub fn classify(record: Option<&KeyRecord>, email: &str, now: DateTime<Utc>) -> KeyState {
    let Some(record) = record else {
        return KeyState::Unknown;
    };
    let Some(bound) = record.bound_email() else {
        return KeyState::Unbound;
    };
    if bound != email {
        return KeyState::BoundMismatch;
    }
    // A bound row without an expiry has no valid period left to honor.
    match record.expires_at {
        Some(expires_at) if now <= expires_at => KeyState::BoundMatch,
        _ => KeyState::Expired,
    }
}

pub async fn activate_or_validate(
    store: &dyn KeyStore,
    key_code: &str,
    email: &str,
    now: DateTime<Utc>,
    mode: ActivationMode,
) -> Result<ActivationOutcome, ActivationError> {
    let key_code = required("activation_key", key_code)?;
    let email = required("email", email)?;

    let record = store.lookup(key_code).await?;
    match classify(record.as_ref(), email, now) {
        KeyState::Unknown => {
            warn!(target = "listing_gate.activation", key = %key_code, "unknown_key");
            Err(ActivationError::UnknownKey)
        }
        KeyState::Unbound if mode == ActivationMode::ValidateOnly => {
            Err(ActivationError::NotActivated)
        }
        KeyState::Unbound => {
            let expires_at = expiry_from(now);
            store.bind(key_code, email, now, expires_at).await?;
            info!(
                target = "listing_gate.activation",
                key = %key_code,
                email = %mask_email(email),
                %expires_at,
                "key_bound",
            );
            Ok(ActivationOutcome {
                state: KeyState::Active,
                expires_at,
                newly_bound: true,
            })
        }
        KeyState::BoundMismatch => {
            warn!(
                target = "listing_gate.activation",
                key = %key_code,
                email = %mask_email(email),
                "email_mismatch",
            );
            Err(ActivationError::EmailMismatch)
        }
        KeyState::Expired => Err(ActivationError::Expired),
        KeyState::BoundMatch | KeyState::Active => {
            let expires_at = record
                .and_then(|row| row.expires_at)
                .ok_or(ActivationError::Expired)?;
            Ok(ActivationOutcome {
                state: KeyState::Active,
                expires_at,
                newly_bound: false,
            })
        }
    }
}

/// Restarts the subscription period of an existing key. Does not look at the email.
pub async fn renew(
    store: &dyn KeyStore,
    key_code: &str,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>, ActivationError> {
    let key_code = required("activation_key", key_code)?;
    if store.lookup(key_code).await?.is_none() {
        return Err(ActivationError::UnknownKey);
    }
    let expires_at = expiry_from(now);
    store.renew(key_code, now, expires_at).await?;
    info!(target = "listing_gate.activation", key = %key_code, %expires_at, "key_renewed");
    Ok(expires_at)
}

fn required<'a>(field: &'static str, value: &'a str) -> Result<&'a str, ActivationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ActivationError::Validation(field));
    }
    Ok(trimmed)
}

/// `jane@example.com` -> `j***@example.com`
pub fn mask_email(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) => {
            let first = local.chars().next().map(String::from).unwrap_or_default();
            format!("{first}***@{domain}")
        }
        None => "***".to_string(),
    }
}
