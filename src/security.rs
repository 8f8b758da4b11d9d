use crate::models::ApiError;
use axum::{
    Json,
    body::Body,
    extract::State,
    http::{self, Request, StatusCode, header::HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::{collections::HashMap, convert::Infallible, env, sync::Arc, time::Instant};
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Activation key and email presented by a client. Built per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub activation_key: String,
    pub email: String,
}

impl Session {
    /// Body fields take precedence over `X-Activation-Key` / `X-Activation-Email`.
    pub fn resolve(
        key: Option<&str>,
        email: Option<&str>,
        headers: &http::HeaderMap,
    ) -> Option<Self> {
        let activation_key = non_blank(key).or_else(|| header_value(headers, "X-Activation-Key"))?;
        let email = non_blank(email).or_else(|| header_value(headers, "X-Activation-Email"))?;
        Some(Self {
            activation_key,
            email,
        })
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn header_value(headers: &http::HeaderMap, name: &str) -> Option<String> {
    non_blank(headers.get(name).and_then(|v| v.to_str().ok()))
}

#[derive(Clone)]
pub struct AdminState {
    records: Arc<HashMap<String, AdminRecord>>,
    limiter: Arc<TokenBuckets>,
}

#[derive(Clone, Debug)]
pub struct AdminContext {
    pub admin_id: String,
}

#[derive(Clone)]
struct AdminRecord {
    admin_id: String,
}

impl AdminState {
    pub fn from_env() -> Self {
        let raw = env::var("ADMIN_API_KEYS").unwrap_or_default();
        Self::new(parse_admin_keys(&raw), TokenBuckets::from_env())
    }

    fn new(records: HashMap<String, AdminRecord>, limiter: TokenBuckets) -> Self {
        Self {
            records: Arc::new(records),
            limiter: Arc::new(limiter),
        }
    }

    /// Admin state with explicit `(name, secret)` pairs and a fixed bucket.
    #[cfg(test)]
    pub fn with_keys(pairs: &[(&str, &str)], rate_per_sec: f64, capacity: f64) -> Self {
        let records = pairs
            .iter()
            .map(|(name, secret)| {
                (
                    secret.to_string(),
                    AdminRecord {
                        admin_id: name.to_string(),
                    },
                )
            })
            .collect();
        Self::new(records, TokenBuckets::new(rate_per_sec, capacity))
    }

    pub fn key_count(&self) -> usize {
        self.records.len()
    }

    fn authenticate(&self, presented: &str) -> Option<AdminContext> {
        self.records.get(presented).map(|record| AdminContext {
            admin_id: record.admin_id.clone(),
        })
    }

    async fn consume(&self, admin_id: &str) -> Result<RateSnapshot, RateSnapshot> {
        self.limiter.consume(admin_id).await
    }
}

pub async fn require_admin_auth(
    State(state): State<AdminState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, Infallible> {
    let Some(presented) = extract_admin_key(request.headers()) else {
        let response =
            unauthorized_response("missing_admin_key", "Provide X-Admin-Key or Bearer token");
        return Ok(response);
    };

    let Some(context) = state.authenticate(&presented) else {
        warn!(target = "listing_gate.api", "admin_key_rejected");
        let response = unauthorized_response("invalid_admin_key", "Key not recognized");
        return Ok(response);
    };

    match state.consume(&context.admin_id).await {
        Ok(snapshot) => {
            request.extensions_mut().insert(context);
            let mut response = next.run(request).await;
            snapshot.apply_headers(response.headers_mut());
            Ok(response)
        }
        Err(snapshot) => {
            warn!(target = "listing_gate.api", admin = %context.admin_id, "admin_rate_limited");
            let mut response = too_many_requests("rate_limited", "Too many requests");
            snapshot.apply_headers(response.headers_mut());
            Ok(response)
        }
    }
}

fn extract_admin_key(headers: &http::HeaderMap) -> Option<String> {
    if let Some(value) = headers.get(http::header::AUTHORIZATION)
        && let Ok(raw) = value.to_str()
        && let Some(scheme) = raw.get(..7)
        && scheme.eq_ignore_ascii_case("bearer ")
    {
        return non_blank(raw.get(7..));
    }
    header_value(headers, "X-Admin-Key")
}

fn unauthorized_response(code: &str, message: &str) -> Response {
    let payload = ApiError {
        valid: None,
        error: code.to_string(),
        detail: Some(message.to_string()),
    };
    (StatusCode::UNAUTHORIZED, Json(payload)).into_response()
}

fn too_many_requests(code: &str, message: &str) -> Response {
    let payload = ApiError {
        valid: None,
        error: code.to_string(),
        detail: Some(message.to_string()),
    };
    (StatusCode::TOO_MANY_REQUESTS, Json(payload)).into_response()
}

fn parse_admin_keys(raw: &str) -> HashMap<String, AdminRecord> {
    let mut entries = HashMap::new();
    for token in raw.split(',') {
        let trimmed = token.trim();
        if trimmed.is_empty() {
            continue;
        }
        let mut parts = trimmed.splitn(2, ':');
        let name = parts.next().map(str::trim).filter(|s| !s.is_empty());
        let secret = parts.next().map(str::trim).filter(|s| !s.is_empty());
        match (name, secret) {
            (Some(name), Some(secret)) => {
                entries.insert(
                    secret.to_string(),
                    AdminRecord {
                        admin_id: name.to_string(),
                    },
                );
            }
            _ => warn!(
                target = "listing_gate.api",
                "ignored malformed ADMIN_API_KEYS entry"
            ),
        }
    }

    if entries.is_empty() {
        warn!(
            target = "listing_gate.api",
            "ADMIN_API_KEYS is empty; admin routes will reject every request"
        );
    } else {
        info!(
            target = "listing_gate.api",
            key_count = entries.len(),
            "loaded admin keys from env"
        );
    }

    entries
}

struct TokenBuckets {
    rate_per_sec: f64,
    capacity: f64,
    buckets: Mutex<HashMap<String, Bucket>>,
}

struct Bucket {
    tokens: f64,
    refilled_at: Instant,
}

impl Bucket {
    fn refill(&mut self, now: Instant, rate_per_sec: f64, capacity: f64) {
        let elapsed = now.saturating_duration_since(self.refilled_at).as_secs_f64();
        self.tokens = (self.tokens + elapsed * rate_per_sec).min(capacity);
        self.refilled_at = now;
    }
}

impl TokenBuckets {
    fn new(rate_per_sec: f64, capacity: f64) -> Self {
        Self {
            rate_per_sec,
            capacity,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    fn from_env() -> Self {
        let rate_per_sec = env_f64("RATE_LIMIT_PER_SEC")
            .filter(|value| *value > 0.0)
            .unwrap_or(1.0);
        let capacity = env_f64("RATE_LIMIT_CAPACITY")
            .filter(|value| *value >= 1.0)
            .unwrap_or(10.0);
        Self::new(rate_per_sec, capacity)
    }

    /// Takes one token for `key`. `Err` carries the state after refusing.
    async fn consume(&self, key: &str) -> Result<RateSnapshot, RateSnapshot> {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().await;
        let bucket = buckets.entry(key.to_string()).or_insert(Bucket {
            tokens: self.capacity,
            refilled_at: now,
        });
        bucket.refill(now, self.rate_per_sec, self.capacity);

        let allowed = bucket.tokens >= 1.0;
        if allowed {
            bucket.tokens -= 1.0;
        }
        let snapshot = RateSnapshot {
            limit: self.capacity as u64,
            remaining: bucket.tokens.max(0.0).floor() as u64,
            reset_secs: ((self.capacity - bucket.tokens) / self.rate_per_sec).ceil() as u64,
            retry_after_secs: (!allowed)
                .then(|| ((1.0 - bucket.tokens) / self.rate_per_sec).ceil().max(1.0) as u64),
        };
        if allowed { Ok(snapshot) } else { Err(snapshot) }
    }
}

fn env_f64(name: &str) -> Option<f64> {
    env::var(name).ok().and_then(|value| value.parse().ok())
}

/// Bucket state reported back to the caller in `X-RateLimit-*` headers.
#[derive(Debug, Clone, PartialEq, Eq)]
struct RateSnapshot {
    limit: u64,
    remaining: u64,
    reset_secs: u64,
    retry_after_secs: Option<u64>,
}

impl RateSnapshot {
    fn apply_headers(&self, headers: &mut http::HeaderMap) {
        headers.insert("X-RateLimit-Limit", HeaderValue::from(self.limit));
        headers.insert("X-RateLimit-Remaining", HeaderValue::from(self.remaining));
        headers.insert("X-RateLimit-Reset", HeaderValue::from(self.reset_secs));
        if let Some(retry) = self.retry_after_secs {
            headers.insert(http::header::RETRY_AFTER, HeaderValue::from(retry));
        }
    }
}
