mod http;
mod idempotency;
mod keys;
mod llm;
mod metrics;
mod models;
mod optimizer;
mod security;
mod supabase;

use axum::{
    Json, Router,
    extract::{Extension, State},
    http::{HeaderMap, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use eyre::WrapErr;
use idempotency::IdempotencyCache;
use keys::{ActivationError, ActivationMode, BOOTSTRAP_KEY, KeyStore, MemoryKeyStore, StoreError};
use llm::{GenerationService, LlmConfig, OpenRouterClient};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use models::{
    ActivateRequest, ActivateResponse, ActivationStatus, AnalyzeRequest, ApiError,
    InitDbResponse, ListingResult, LlmCheckResponse, ProvisionRequest, ProvisionResponse,
    RenewRequest, RenewResponse,
};
use optimizer::{ListingInput, ListingOptimizer, OptimizeError};
use security::{AdminContext, AdminState, Session, require_admin_auth};
use serde_json::json;
use std::{net::SocketAddr, sync::Arc};
use supabase::SupabaseStore;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};
use uuid::Uuid;

const SERVICE_NAME: &str = "listing-gate";

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(target = "listing_gate.api", "server crashed: {err:?}");
    }
}

async fn run() -> eyre::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let store: Arc<dyn KeyStore> = match SupabaseStore::from_env() {
        Some(db) => {
            info!(target = "listing_gate.store", "using supabase key store");
            Arc::new(db)
        }
        None => {
            warn!(
                target = "listing_gate.store",
                key = BOOTSTRAP_KEY,
                "SUPABASE_URL not set; using in-memory key store seeded with the bootstrap key",
            );
            Arc::new(MemoryKeyStore::seeded([BOOTSTRAP_KEY]))
        }
    };

    let client = OpenRouterClient::new(LlmConfig::from_env());
    info!(target = "listing_gate.llm", model = %client.model(), "generation service configured");
    let llm: Arc<dyn GenerationService> = Arc::new(client);

    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .wrap_err("installing prometheus recorder")?;

    let idempotency = IdempotencyCache::from_env();
    info!(target = "listing_gate.api", backend = idempotency.backend(), "idempotency cache ready");

    let admin = AdminState::from_env();
    if admin.key_count() == 0 {
        warn!(target = "listing_gate.api", "no admin keys configured");
    }

    let state = AppState::new(store, llm, idempotency, prometheus_handle);
    let app = build_router(state, admin);

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(8000);
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    info!(target = "listing_gate.api", "listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .wrap_err_with(|| format!("binding {addr}"))?;
    axum::serve(listener, app.into_make_service())
        .await
        .wrap_err("serving http")?;
    Ok(())
}

#[derive(Clone)]
struct AppState {
    store: Arc<dyn KeyStore>,
    llm: Arc<dyn GenerationService>,
    optimizer: ListingOptimizer,
    idempotency: IdempotencyCache,
    openapi: Arc<serde_json::Value>,
    prometheus_handle: PrometheusHandle,
}

impl AppState {
    fn new(
        store: Arc<dyn KeyStore>,
        llm: Arc<dyn GenerationService>,
        idempotency: IdempotencyCache,
        prometheus_handle: PrometheusHandle,
    ) -> Self {
        let openapi: serde_json::Value = serde_yaml::from_str(include_str!("../docs/openapi.yaml"))
            .unwrap_or(json!({"openapi": "3.0.3"}));
        Self {
            optimizer: ListingOptimizer::new(store.clone(), llm.clone()),
            store,
            llm,
            idempotency,
            openapi: Arc::new(openapi),
            prometheus_handle,
        }
    }
}

fn build_router(state: AppState, admin: AdminState) -> Router {
    let cors = CorsLayer::new()
        .allow_headers(Any)
        .allow_methods(Any)
        .allow_origin(Any);

    let privileged = Router::new()
        .route("/renew", post(renew_key))
        .route("/keys", post(provision_keys))
        .route("/init-db", get(init_db))
        .route("/test-llm", get(test_llm))
        .route_layer(middleware::from_fn_with_state(admin, require_admin_auth));

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/openapi.json", get(openapi_json))
        .route("/docs", get(swagger_ui))
        .route("/activate", post(activate))
        .route("/check-key", post(activate))
        .route("/analyze", post(analyze))
        .merge(privileged)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(axum::extract::DefaultBodyLimit::max(body_limit_from_env()))
}

/// Health and readiness check.
///
/// - Method: `GET`
/// - Path: `/health`
/// - Auth: none
///
/// Reports whether the key store answers; the process itself is always `ok`.
async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let store = match state.store.ping().await {
        Ok(()) => "ok",
        Err(err) => {
            warn!(target = "listing_gate.store", error = %err, "store_ping_failed");
            "unavailable"
        }
    };
    Json(json!({
        "status": "ok",
        "service": SERVICE_NAME,
        "store": store,
    }))
}

async fn openapi_json(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, AppError> {
    if let Ok(key) = std::env::var("OPENAPI_KEY") {
        let presented = headers
            .get("X-Docs-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != key {
            return Err(AppError::Unauthorized {
                error: "docs",
                detail: "unauthorized".into(),
            });
        }
    }
    Ok(Json((*state.openapi).clone()))
}

async fn swagger_ui() -> Response {
    let html = r#"<!doctype html>
<html>
<head>
  <meta charset='utf-8'/>
  <title>Listing Gate API Docs</title>
  <link rel="stylesheet" href="https://unpkg.com/swagger-ui-dist@5/swagger-ui.css" />
</head>
<body>
  <div id="swagger-ui"></div>
  <script src="https://unpkg.com/swagger-ui-dist@5/swagger-ui-bundle.js"></script>
  <script>
    window.onload = () => {
      window.ui = SwaggerUIBundle({ url: '/openapi.json', dom_id: '#swagger-ui' });
    };
  </script>
</body>
</html>"#;
    (
        [(axum::http::header::CONTENT_TYPE, "text/html; charset=utf-8")],
        html,
    )
        .into_response()
}

fn body_limit_from_env() -> usize {
    std::env::var("REQUEST_MAX_BYTES")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(64 * 1024)
}

async fn metrics_endpoint(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Ok(secret) = std::env::var("METRICS_KEY") {
        let presented = headers
            .get("X-Metrics-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != secret {
            return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
        }
    }
    (
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.prometheus_handle.render(),
    )
        .into_response()
}

/// Activate a key for an email, or confirm an existing binding.
///
/// - Method: `POST`
/// - Path: `/activate` (also `/check-key`)
/// - Auth: none
/// - Body: `ActivateRequest`
/// - Response: `ActivateResponse`
async fn activate(
    State(state): State<AppState>,
    Json(payload): Json<ActivateRequest>,
) -> Result<Json<ActivateResponse>, AppError> {
    crate::metrics::inc_requests("/activate");
    let outcome = keys::activate_or_validate(
        state.store.as_ref(),
        payload.activation_key.as_deref().unwrap_or_default(),
        payload.email.as_deref().unwrap_or_default(),
        Utc::now(),
        ActivationMode::Bind,
    )
    .await
    .map_err(|err| {
        crate::metrics::activation_result(err.code());
        AppError::invalid_key(err)
    })?;

    crate::metrics::activation_result(if outcome.newly_bound { "bound" } else { "accepted" });
    info!(
        target = "listing_gate.activation",
        state = ?outcome.state,
        expires_at = %outcome.expires_at,
        "activation_accepted",
    );
    Ok(Json(ActivateResponse {
        valid: true,
        status: if outcome.newly_bound {
            ActivationStatus::Activated
        } else {
            ActivationStatus::Active
        },
        expires_at: outcome.expires_at,
    }))
}

/// Optimize a listing for an activated session.
///
/// - Method: `POST`
/// - Path: `/analyze`
/// - Auth: activation key + email in the body, or `X-Activation-Key` / `X-Activation-Email`
/// - Body: `AnalyzeRequest`
/// - Response: `ListingResult`
///
/// Model failures never surface here; the fallback result is returned instead.
async fn analyze(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<AnalyzeRequest>,
) -> Result<Json<ListingResult>, AppError> {
    crate::metrics::inc_requests("/analyze");
    let session = Session::resolve(
        payload.activation_key.as_deref(),
        payload.email.as_deref(),
        &headers,
    )
    .ok_or_else(|| AppError::Unauthorized {
        error: "missing_credentials",
        detail: "Activation key and email required".into(),
    })?;
    let input = ListingInput::new(
        payload.product_title.as_deref(),
        payload.product_description.as_deref(),
    )?;
    let request_id = Uuid::new_v4();
    info!(
        target = "listing_gate.api",
        %request_id,
        key = %session.activation_key,
        title_chars = input.title().chars().count(),
        "analyze_requested",
    );

    let Some(replay_key) = headers
        .get("Idempotency-Key")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
    else {
        let result = state.optimizer.optimize(&session, &input, Utc::now()).await?;
        return Ok(Json(result));
    };

    state
        .optimizer
        .authorize(&session, Utc::now())
        .await
        .map_err(AppError::denied)?;
    let cache_key = IdempotencyCache::cache_key(&session.activation_key, replay_key);
    if let Some(existing) = state.idempotency.get(&cache_key).await {
        info!(target = "listing_gate.api", %request_id, "analyze_replayed");
        return Ok(Json(existing));
    }
    let result = state.optimizer.generate(&input).await;
    state.idempotency.put(&cache_key, &result).await;
    Ok(Json(result))
}

/// Restart the 30-day period of a key.
///
/// - Method: `POST`
/// - Path: `/renew`
/// - Auth: admin
async fn renew_key(
    State(state): State<AppState>,
    Extension(admin): Extension<AdminContext>,
    Json(payload): Json<RenewRequest>,
) -> Result<Json<RenewResponse>, AppError> {
    crate::metrics::inc_requests("/renew");
    let key = payload.activation_key.unwrap_or_default();
    let expires_at = keys::renew(state.store.as_ref(), &key, Utc::now())
        .await
        .map_err(AppError::rejected)?;
    info!(target = "listing_gate.api", admin = %admin.admin_id, key = %key.trim(), "renew_requested");
    Ok(Json(RenewResponse {
        success: true,
        message: format!("Subscription renewed for {} days", keys::ACTIVATION_PERIOD_DAYS),
        expires_at,
    }))
}

/// Generate and store new unbound keys.
///
/// - Method: `POST`
/// - Path: `/keys`
/// - Auth: admin
async fn provision_keys(
    State(state): State<AppState>,
    Extension(admin): Extension<AdminContext>,
    Json(payload): Json<ProvisionRequest>,
) -> Result<Json<ProvisionResponse>, AppError> {
    crate::metrics::inc_requests("/keys");
    let count = payload.count.unwrap_or(1);
    if count == 0 || count > keys::provision::MAX_BATCH {
        return Err(AppError::InvalidInput {
            error: "invalid_input",
            detail: format!("count must be between 1 and {}", keys::provision::MAX_BATCH),
        });
    }
    let prefix = keys::provision::normalize_prefix(payload.prefix.as_deref());
    let keys = keys::provision::provision(state.store.as_ref(), &prefix, count).await?;
    info!(target = "listing_gate.api", admin = %admin.admin_id, count = keys.len(), "keys_issued");
    Ok(Json(ProvisionResponse { keys }))
}

/// Make sure the bootstrap key exists and can be read back.
///
/// - Method: `GET`
/// - Path: `/init-db`
/// - Auth: admin
async fn init_db(State(state): State<AppState>) -> Result<Json<InitDbResponse>, AppError> {
    crate::metrics::inc_requests("/init-db");
    let created = state.store.create(BOOTSTRAP_KEY).await?;
    let verified = state.store.lookup(BOOTSTRAP_KEY).await?.is_some();
    info!(target = "listing_gate.store", created, verified, key = BOOTSTRAP_KEY, "bootstrap_key_checked");
    Ok(Json(InitDbResponse {
        success: verified,
        created,
        verified,
        key: BOOTSTRAP_KEY,
    }))
}

/// Round-trip a tiny prompt through the generation service.
///
/// - Method: `GET`
/// - Path: `/test-llm`
/// - Auth: admin
async fn test_llm(State(state): State<AppState>) -> Result<Json<LlmCheckResponse>, AppError> {
    crate::metrics::inc_requests("/test-llm");
    let reply = state
        .llm
        .complete(r#"Reply with exactly this JSON and nothing else: {"message": "Hello World"}"#)
        .await
        .map_err(|err| AppError::Upstream(err.to_string()))?;
    Ok(Json(LlmCheckResponse {
        success: true,
        status: "connected",
        response: reply,
    }))
}

#[derive(Debug)]
enum AppError {
    InvalidInput {
        error: &'static str,
        detail: String,
    },
    Unauthorized {
        error: &'static str,
        detail: String,
    },
    Activation {
        source: ActivationError,
        status: StatusCode,
        /// Adds `valid: false` so the body mirrors `ActivateResponse`.
        reports_validity: bool,
    },
    Upstream(String),
    Internal(String),
}

impl AppError {
    /// Activation failures on `/activate` and `/check-key`.
    fn invalid_key(source: ActivationError) -> Self {
        Self::Activation {
            source,
            status: StatusCode::BAD_REQUEST,
            reports_validity: true,
        }
    }

    /// Activation failures on privileged key maintenance.
    fn rejected(source: ActivationError) -> Self {
        Self::Activation {
            source,
            status: StatusCode::BAD_REQUEST,
            reports_validity: false,
        }
    }

    /// Activation failures while authorizing another operation.
    fn denied(source: ActivationError) -> Self {
        Self::Activation {
            source,
            status: StatusCode::UNAUTHORIZED,
            reports_validity: false,
        }
    }
}

impl From<StoreError> for AppError {
    fn from(value: StoreError) -> Self {
        Self::Internal(value.to_string())
    }
}

impl From<OptimizeError> for AppError {
    fn from(value: OptimizeError) -> Self {
        match value {
            OptimizeError::Validation(field) => Self::InvalidInput {
                error: "invalid_input",
                detail: format!("Field `{field}` is required"),
            },
            OptimizeError::Activation(err) => Self::denied(err),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut valid = None;
        let (status, error, detail) = match self {
            AppError::InvalidInput { error, detail } => (StatusCode::BAD_REQUEST, error, detail),
            AppError::Unauthorized { error, detail } => (StatusCode::UNAUTHORIZED, error, detail),
            AppError::Activation {
                source,
                status,
                reports_validity,
            } => match source {
                ActivationError::Store(err) => {
                    error!(target = "listing_gate.store", error = %err, "key_store_failure");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "internal",
                        "Internal server error".to_string(),
                    )
                }
                ActivationError::Validation(_) => {
                    valid = reports_validity.then_some(false);
                    (StatusCode::BAD_REQUEST, source.code(), source.user_message())
                }
                other => {
                    valid = reports_validity.then_some(false);
                    (status, other.code(), other.user_message())
                }
            },
            AppError::Upstream(detail) => {
                warn!(target = "listing_gate.llm", error = %detail, "upstream_check_failed");
                (StatusCode::BAD_GATEWAY, "upstream_unavailable", detail)
            }
            AppError::Internal(detail) => {
                error!(target = "listing_gate.api", error = %detail, "request_failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal",
                    "Internal server error".to_string(),
                )
            }
        };
        let payload = ApiError {
            valid,
            error: error.to_string(),
            detail: Some(detail),
        };
        (status, Json(payload)).into_response()
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}
