use crate::http::{HttpSettings, build_client};
use crate::keys::{KeyRecord, KeyStatus, KeyStore, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::Serialize;
use tracing::debug;

pub static ACTIVATION_KEYS_TABLE: Lazy<String> = Lazy::new(|| {
    std::env::var("ACTIVATION_KEYS_TABLE").unwrap_or_else(|_| "activation_keys".to_string())
});

/// Activation keys stored in Postgres, reached through Supabase's PostgREST API.
#[derive(Debug, Clone)]
pub struct SupabaseStore {
    base_url: String,
    service_key: String,
    table: String,
    http: Client,
}

#[derive(Debug, Serialize)]
struct BindPatch<'a> {
    status: KeyStatus,
    email: &'a str,
    activated_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct RenewPatch {
    status: KeyStatus,
    activated_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl SupabaseStore {
    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var("SUPABASE_URL").ok()?;
        let service_key = std::env::var("SUPABASE_SERVICE_ROLE_KEY")
            .or_else(|_| std::env::var("SUPABASE_SERVICE_KEY"))
            .or_else(|_| std::env::var("SUPABASE_KEY"))
            .ok()?;
        Some(Self::new(
            &base_url,
            service_key,
            ACTIVATION_KEYS_TABLE.as_str(),
        ))
    }

    pub fn new(base_url: &str, service_key: String, table: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            service_key,
            table: table.to_string(),
            http: build_client(&HttpSettings::from_env()),
        }
    }

    fn table_url(&self) -> String {
        format!("{}/rest/v1/{}", self.base_url, self.table)
    }

    /// `?key_code=eq.<code>` filter addressing a single row.
    fn row_url(&self, key_code: &str) -> String {
        format!(
            "{}?key_code=eq.{}",
            self.table_url(),
            urlencoding::encode(key_code)
        )
    }

    fn request(&self, method: Method, url: String) -> RequestBuilder {
        self.http
            .request(method, url)
            .header("apikey", &self.service_key)
            .header("Authorization", format!("Bearer {}", self.service_key))
    }

    async fn rows(response: Result<Response, reqwest::Error>) -> Result<Vec<KeyRecord>, StoreError> {
        let response = response.map_err(|err| StoreError::Request(err.to_string()))?;
        if !response.status().is_success() {
            return Err(StoreError::Request(format!(
                "HTTP {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|err| StoreError::Deserialize(err.to_string()))
    }

    async fn patch_row<T: Serialize + Sync>(&self, key_code: &str, body: &T) -> Result<(), StoreError> {
        let response = self
            .request(Method::PATCH, self.row_url(key_code))
            .header("Prefer", "return=representation")
            .json(body)
            .send()
            .await;
        let updated = Self::rows(response).await?;
        if updated.is_empty() {
            return Err(StoreError::NotFound(key_code.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl KeyStore for SupabaseStore {
    async fn ping(&self) -> Result<(), StoreError> {
        let url = format!("{}?select=key_code&limit=1", self.table_url());
        let response = self.request(Method::GET, url).send().await;
        let response = response.map_err(|err| StoreError::Request(err.to_string()))?;
        if !response.status().is_success() {
            return Err(StoreError::Request(format!(
                "HTTP {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn lookup(&self, key_code: &str) -> Result<Option<KeyRecord>, StoreError> {
        let url = format!("{}&select=*&limit=1", self.row_url(key_code));
        let response = self.request(Method::GET, url).send().await;
        let mut rows = Self::rows(response).await?;
        debug!(target = "listing_gate.store", key = %key_code, found = !rows.is_empty(), "key_lookup");
        Ok(rows.pop())
    }

    async fn create(&self, key_code: &str) -> Result<bool, StoreError> {
        let url = format!("{}?on_conflict=key_code", self.table_url());
        let row = KeyRecord::provisioned(key_code, Utc::now());
        let response = self
            .request(Method::POST, url)
            .header("Prefer", "resolution=ignore-duplicates,return=representation")
            .json(&[row])
            .send()
            .await;
        // Ignored duplicates come back as an empty representation.
        Ok(!Self::rows(response).await?.is_empty())
    }

    async fn bind(
        &self,
        key_code: &str,
        email: &str,
        activated_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let patch = BindPatch {
            status: KeyStatus::Active,
            email,
            activated_at,
            expires_at,
        };
        self.patch_row(key_code, &patch).await
    }

    async fn renew(
        &self,
        key_code: &str,
        activated_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let patch = RenewPatch {
            status: KeyStatus::Active,
            activated_at,
            expires_at,
        };
        self.patch_row(key_code, &patch).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_url_encodes_key() {
        let store = SupabaseStore::new(
            "https://db.example.supabase.co/",
            "service".into(),
            "activation_keys",
        );
        assert_eq!(
            store.row_url("ETSY-SEO-TEST123"),
            "https://db.example.supabase.co/rest/v1/activation_keys?key_code=eq.ETSY-SEO-TEST123"
        );
        assert_eq!(
            store.row_url("a b&c"),
            "https://db.example.supabase.co/rest/v1/activation_keys?key_code=eq.a%20b%26c"
        );
    }

    #[test]
    fn bind_patch_shape() {
        let at = DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let body = serde_json::to_value(BindPatch {
            status: KeyStatus::Active,
            email: "a@b.com",
            activated_at: at,
            expires_at: crate::keys::expiry_from(at),
        })
        .unwrap();
        assert_eq!(body["status"], "active");
        assert_eq!(body["email"], "a@b.com");
        assert_eq!(body["expires_at"], "2025-01-31T00:00:00Z");
    }

    #[test]
    fn provisioned_row_omits_unset_columns() {
        let row = KeyRecord::provisioned("K", Utc::now());
        let body = serde_json::to_value(&row).unwrap();
        assert_eq!(body["status"], "inactive");
        assert!(body.get("email").is_none());
        assert!(body.get("expires_at").is_none());
    }
}
