use super::{KeyRecord, KeyStatus, KeyStore, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::Mutex;

/// Process-local key store used when no database is configured, and by tests.
#[derive(Clone, Default)]
pub struct MemoryKeyStore {
    rows: Arc<Mutex<HashMap<String, KeyRecord>>>,
}

impl MemoryKeyStore {
    pub fn seeded<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let now = Utc::now();
        let rows = keys
            .into_iter()
            .map(|key| {
                let key: String = key.into();
                (key.clone(), KeyRecord::provisioned(key, now))
            })
            .collect();
        Self {
            rows: Arc::new(Mutex::new(rows)),
        }
    }

    /// Replaces or inserts a full row, bypassing the state machine.
    #[cfg(test)]
    pub async fn put(&self, record: KeyRecord) {
        self.rows
            .lock()
            .await
            .insert(record.key_code.clone(), record);
    }
}

#[async_trait]
impl KeyStore for MemoryKeyStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn lookup(&self, key_code: &str) -> Result<Option<KeyRecord>, StoreError> {
        Ok(self.rows.lock().await.get(key_code).cloned())
    }

    async fn create(&self, key_code: &str) -> Result<bool, StoreError> {
        let mut guard = self.rows.lock().await;
        if guard.contains_key(key_code) {
            return Ok(false);
        }
        guard.insert(
            key_code.to_string(),
            KeyRecord::provisioned(key_code, Utc::now()),
        );
        Ok(true)
    }

    async fn bind(
        &self,
        key_code: &str,
        email: &str,
        activated_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut guard = self.rows.lock().await;
        let row = guard
            .get_mut(key_code)
            .ok_or_else(|| StoreError::NotFound(key_code.to_string()))?;
        row.status = Some(KeyStatus::Active);
        row.email = Some(email.to_string());
        row.activated_at = Some(activated_at);
        row.expires_at = Some(expires_at);
        Ok(())
    }

    async fn renew(
        &self,
        key_code: &str,
        activated_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut guard = self.rows.lock().await;
        let row = guard
            .get_mut(key_code)
            .ok_or_else(|| StoreError::NotFound(key_code.to_string()))?;
        row.status = Some(KeyStatus::Active);
        row.activated_at = Some(activated_at);
        row.expires_at = Some(expires_at);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::expiry_from;

    #[tokio::test]
    async fn create_is_insert_if_absent() {
        let store = MemoryKeyStore::default();
        assert!(store.create("K-1").await.unwrap());
        assert!(!store.create("K-1").await.unwrap());
        let row = store.lookup("K-1").await.unwrap().expect("row");
        assert_eq!(row.effective_status(), KeyStatus::Inactive);
    }

    #[tokio::test]
    async fn renew_keeps_email() {
        let store = MemoryKeyStore::seeded(["K-2"]);
        let t0 = Utc::now();
        store.bind("K-2", "a@b.com", t0, expiry_from(t0)).await.unwrap();
        let t1 = t0 + chrono::Duration::days(45);
        store.renew("K-2", t1, expiry_from(t1)).await.unwrap();
        let row = store.lookup("K-2").await.unwrap().unwrap();
        assert_eq!(row.email.as_deref(), Some("a@b.com"));
        assert_eq!(row.activated_at, Some(t1));
        assert_eq!(row.expires_at, Some(expiry_from(t1)));
    }

    #[tokio::test]
    async fn writes_to_missing_key_fail() {
        let store = MemoryKeyStore::default();
        let now = Utc::now();
        let err = store
            .bind("nope", "a@b.com", now, expiry_from(now))
            .await
            .expect_err("missing row");
        assert!(matches!(err, StoreError::NotFound(key) if key == "nope"));
    }
}
