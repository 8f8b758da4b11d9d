use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActivateRequest {
    #[serde(default, alias = "activationKey")]
    pub activation_key: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActivationStatus {
    /// This request bound the key.
    Activated,
    /// The key was already bound to the same email.
    Active,
}

#[derive(Debug, Serialize)]
pub struct ActivateResponse {
    pub valid: bool,
    pub status: ActivationStatus,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RenewRequest {
    #[serde(default, alias = "activationKey")]
    pub activation_key: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RenewResponse {
    pub success: bool,
    pub message: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeRequest {
    #[serde(default, alias = "product_title")]
    pub product_title: Option<String>,
    #[serde(default, alias = "product_description")]
    pub product_description: Option<String>,
    #[serde(default, alias = "activation_key")]
    pub activation_key: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

/// Optimized listing returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingResult {
    pub optimized_title: String,
    /// Characters in `optimized_title`, except on the fallback path where it is
    /// the original title length clamped to the title bounds.
    pub character_count: usize,
    pub tags: Vec<String>,
    pub description_improvements: Vec<String>,
    #[serde(default)]
    pub used_fallback: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProvisionRequest {
    #[serde(default)]
    pub count: Option<usize>,
    #[serde(default)]
    pub prefix: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ProvisionResponse {
    pub keys: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct InitDbResponse {
    pub success: bool,
    pub created: bool,
    pub verified: bool,
    pub key: &'static str,
}

#[derive(Debug, Serialize)]
pub struct LlmCheckResponse {
    pub success: bool,
    pub status: &'static str,
    pub response: String,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid: Option<bool>,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}
