pub mod prompt;
pub mod sanitize;

pub use prompt::build_prompt;
pub use sanitize::{fallback, sanitize};

use crate::keys::{
    ActivationError, ActivationMode, ActivationOutcome, KeyStore, activate_or_validate,
};
use crate::llm::GenerationService;
use crate::models::ListingResult;
use crate::security::Session;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::{sync::Arc, time::Instant};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum OptimizeError {
    #[error("missing required field `{0}`")]
    Validation(&'static str),
    #[error(transparent)]
    Activation(#[from] ActivationError),
}

/// Title/description pair after input validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingInput {
    title: String,
    description: Option<String>,
}

impl ListingInput {
    pub fn new(title: Option<&str>, description: Option<&str>) -> Result<Self, OptimizeError> {
        let title = title
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(OptimizeError::Validation("productTitle"))?;
        let description = description
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string);
        Ok(Self {
            title: title.to_string(),
            description,
        })
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }
}

#[derive(Debug, Error)]
enum UpstreamFailure {
    #[error("generation service failed: {0}")]
    Unavailable(String),
    #[error("malformed model output: {0}")]
    Malformed(String),
}

impl UpstreamFailure {
    fn reason(&self) -> &'static str {
        match self {
            UpstreamFailure::Unavailable(_) => "upstream_failure",
            UpstreamFailure::Malformed(_) => "malformed_response",
        }
    }
}

#[derive(Clone)]
pub struct ListingOptimizer {
    store: Arc<dyn KeyStore>,
    llm: Arc<dyn GenerationService>,
}

impl ListingOptimizer {
    pub fn new(store: Arc<dyn KeyStore>, llm: Arc<dyn GenerationService>) -> Self {
        Self { store, llm }
    }

    /// Re-checks the session against the key store without binding.
    pub async fn authorize(
        &self,
        session: &Session,
        now: DateTime<Utc>,
    ) -> Result<ActivationOutcome, ActivationError> {
        activate_or_validate(
            self.store.as_ref(),
            &session.activation_key,
            &session.email,
            now,
            ActivationMode::ValidateOnly,
        )
        .await
    }

    pub async fn optimize(
        &self,
        session: &Session,
        input: &ListingInput,
        now: DateTime<Utc>,
    ) -> Result<ListingResult, OptimizeError> {
        self.authorize(session, now).await?;
        Ok(self.generate(input).await)
    }

    /// Calls the model once and repairs its answer. Never fails: any upstream
    /// problem yields the fallback result.
    pub async fn generate(&self, input: &ListingInput) -> ListingResult {
        let started = Instant::now();
        let outcome = self.request_listing(input).await;
        crate::metrics::stage_elapsed("generate", started.elapsed());

        match outcome {
            Ok(raw) => {
                let result = sanitize(&raw);
                info!(
                    target = "listing_gate.llm",
                    title_chars = result.character_count,
                    tags = result.tags.len(),
                    "listing_generated",
                );
                result
            }
            Err(err) => {
                warn!(target = "listing_gate.llm", error = %err, "listing_fallback");
                crate::metrics::fallback_used(err.reason());
                fallback(input.title())
            }
        }
    }

    async fn request_listing(
        &self,
        input: &ListingInput,
    ) -> Result<Map<String, Value>, UpstreamFailure> {
        let prompt = build_prompt(input.title(), input.description());
        let text = self
            .llm
            .complete(&prompt)
            .await
            .map_err(|err| UpstreamFailure::Unavailable(err.to_string()))?;
        parse_listing_json(&text)
    }
}

/// Strips code fences and a leading `JSON:` label from a model reply.
pub fn clean_response(raw: &str) -> &str {
    let mut text = raw.trim();
    if let Some(rest) = strip_prefix_ignore_case(text, "```json") {
        text = rest;
    } else if let Some(rest) = text.strip_prefix("```") {
        text = rest;
    }
    if let Some(rest) = text.trim_end().strip_suffix("```") {
        text = rest;
    }
    text = text.trim();
    if let Some(rest) = strip_prefix_ignore_case(text, "JSON:") {
        text = rest;
    }
    text.trim()
}

fn strip_prefix_ignore_case<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    let head = text.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix)
        .then(|| &text[prefix.len()..])
}

fn parse_listing_json(text: &str) -> Result<Map<String, Value>, UpstreamFailure> {
    let cleaned = clean_response(text);
    match serde_json::from_str::<Value>(cleaned) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(UpstreamFailure::Malformed(format!(
            "expected a JSON object, got {}",
            json_kind(&other)
        ))),
        Err(err) => Err(UpstreamFailure::Malformed(err.to_string())),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
