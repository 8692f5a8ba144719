//! HTTP API for SafeDLP
//!
//! ## Endpoint Map
//!
//! | Method | Path                            | Description                          |
//! |--------|---------------------------------|--------------------------------------|
//! | GET    | `/health`                       | Liveness probe                       |
//! | POST   | `/api/v1/dlp/scan`              | Classify text                        |
//! | POST   | `/api/v1/dlp/redact`            | Sanitize text                        |
//! | POST   | `/api/v1/dlp/validate`          | Transmission verdict                 |
//! | GET    | `/api/v1/dlp/patterns`          | Registered detectors                 |
//! | POST   | `/api/v1/audit/chains`          | Build and persist an audit chain     |
//! | GET    | `/api/v1/audit/chains/:id`      | Fetch a stored chain                 |
//! | POST   | `/api/v1/audit/chains/verify`   | Verify a stored or supplied chain    |
//! | GET    | `/api/v1/audit/rows`            | Search routine audit rows            |
//!
//! `text` fields accept any JSON value; anything but a string yields an empty
//! result. Errors use the `{"error": {"code", "message"}}` envelope.

use crate::audit::{
    generate_trail, log_best_effort, verify_chain, AuditChain, AuditFilter, AuditRecord, AuditRow,
    AuditStore, ChainVerification,
};
use crate::config::SafeDlpConfig;
use crate::crypto::{seal_tokens, EncryptedField, FieldCipher};
use crate::dlp::{
    Category, DlpEngine, RedactOptions, RedactionEntry, RedactionStyle, ScanOptions, ScanResult,
    Severity, ValidateOptions, ValidationResult,
};
use crate::error::Error;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Shared state for all handlers
#[derive(Clone)]
pub struct AppState {
    pub engine: DlpEngine,
    pub config: Arc<SafeDlpConfig>,
    pub store: Arc<dyn AuditStore>,
    /// Seals tokenization maps returned to callers; tokenize is refused without it
    pub cipher: Option<Arc<dyn FieldCipher>>,
}

impl AppState {
    pub fn new(engine: DlpEngine, config: SafeDlpConfig, store: Arc<dyn AuditStore>) -> Self {
        Self {
            engine,
            config: Arc::new(config),
            store,
            cipher: None,
        }
    }

    pub fn with_cipher(mut self, cipher: Arc<dyn FieldCipher>) -> Self {
        self.cipher = Some(cipher);
        self
    }

    /// Engine and context for one request
    fn resolve(&self, tenant_id: Option<&str>, context: Option<&str>) -> (DlpEngine, String) {
        let engine = match tenant_id {
            Some(id) => self.engine.for_tenant(&self.config.tenant(id)),
            None => self.engine.clone(),
        };
        let context = context
            .map(str::to_string)
            .unwrap_or_else(|| self.config.context_for(tenant_id));
        (engine, context)
    }

    fn check_size(&self, text: &serde_json::Value) -> ApiResult<()> {
        let limit = self.config.engine.max_input_bytes;
        match text.as_str() {
            Some(s) if s.len() > limit => Err(ApiError::payload_too_large(format!(
                "Input is {} bytes; limit is {}",
                s.len(),
                limit
            ))
            .into_status()),
            _ => Ok(()),
        }
    }

    async fn log_row(&self, tenant_id: Option<&str>, operation: &str, context: &str, text: &str, scan: &ScanResult) {
        let row = AuditRow::from_scan(tenant_id.unwrap_or(ANONYMOUS_TENANT), operation, context, text, scan);
        log_best_effort(self.store.as_ref(), row).await;
    }
}

const ANONYMOUS_TENANT: &str = "anonymous";

/// Build the SafeDLP router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/v1/dlp/scan", post(scan))
        .route("/api/v1/dlp/redact", post(redact))
        .route("/api/v1/dlp/validate", post(validate))
        .route("/api/v1/dlp/patterns", get(list_patterns))
        .route("/api/v1/audit/chains", post(create_chain))
        .route("/api/v1/audit/chains/verify", post(verify))
        .route("/api/v1/audit/chains/:id", get(get_chain))
        .route("/api/v1/audit/rows", get(search_rows))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// =============================================================================
// Errors
// =============================================================================

/// API error response
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: ApiErrorDetail,
}

/// API error detail
#[derive(Debug, Serialize)]
pub struct ApiErrorDetail {
    pub code: String,
    pub message: String,
}

type ApiResult<T> = std::result::Result<T, (StatusCode, Json<ApiError>)>;

impl ApiError {
    fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            error: ApiErrorDetail {
                code: code.to_string(),
                message: message.into(),
            },
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("NOT_FOUND", message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new("BAD_REQUEST", message)
    }

    pub fn payload_too_large(message: impl Into<String>) -> Self {
        Self::new("PAYLOAD_TOO_LARGE", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new("INTERNAL_ERROR", message)
    }

    fn status(&self) -> StatusCode {
        match self.error.code.as_str() {
            "NOT_FOUND" => StatusCode::NOT_FOUND,
            "BAD_REQUEST" => StatusCode::BAD_REQUEST,
            "PAYLOAD_TOO_LARGE" => StatusCode::PAYLOAD_TOO_LARGE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn into_status(self) -> (StatusCode, Json<ApiError>) {
        (self.status(), Json(self))
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::Validation { .. } | Error::Audit(_) | Error::Pattern(_) => {
                Self::bad_request(err.to_string())
            }
            other => {
                tracing::error!("Request failed: {}", other);
                Self::internal(other.to_string())
            }
        }
    }
}

fn fail(err: Error) -> (StatusCode, Json<ApiError>) {
    ApiError::from(err).into_status()
}

// =============================================================================
// Request / Response types
// =============================================================================

/// Request body for scan
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanRequest {
    #[serde(default)]
    pub text: serde_json::Value,
    pub context: Option<String>,
    pub tenant_id: Option<String>,
    pub categories: Option<Vec<Category>>,
    #[serde(default)]
    pub include_matches: bool,
}

/// Request body for redact
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedactRequest {
    #[serde(default)]
    pub text: serde_json::Value,
    pub context: Option<String>,
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub style: RedactionStyle,
    #[serde(default)]
    pub preserve_format: bool,
    #[serde(default)]
    pub include_matches: bool,
}

/// Redaction response; token maps leave the process only sealed
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RedactResponse {
    pub text: String,
    pub redactions: Vec<RedactionEntry>,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sealed_tokens: Option<EncryptedField>,
}

/// Request body for validate
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateRequest {
    #[serde(default)]
    pub text: serde_json::Value,
    pub context: Option<String>,
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub allowed_categories: Vec<Category>,
}

/// Detector description (matchers are not exposed)
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternInfo {
    pub id: String,
    pub description: String,
    pub severity: Severity,
    pub categories: Vec<Category>,
}

/// Request body for chain creation
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateChainRequest {
    pub records: Vec<AuditRecord>,
    pub genesis_hash: Option<String>,
}

/// Verify a stored chain by id, or a chain supplied inline
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    pub chain_id: Option<String>,
    pub chain: Option<AuditChain>,
}

// =============================================================================
// Handlers
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// POST /api/v1/dlp/scan
async fn scan(
    State(state): State<AppState>,
    Json(request): Json<ScanRequest>,
) -> ApiResult<Json<ScanResult>> {
    state.check_size(&request.text)?;
    let tenant = request.tenant_id.as_deref();
    let (engine, context) = state.resolve(tenant, request.context.as_deref());

    let mut options = ScanOptions::new(context.clone()).include_matches(request.include_matches);
    if let Some(categories) = request.categories {
        options = options.categories(categories);
    }
    let result = engine.scan_value(&request.text, &options);

    if let Some(text) = request.text.as_str() {
        state.log_row(tenant, "scan", &context, text, &result).await;
    }
    Ok(Json(result))
}

/// POST /api/v1/dlp/redact
async fn redact(
    State(state): State<AppState>,
    Json(request): Json<RedactRequest>,
) -> ApiResult<Json<RedactResponse>> {
    state.check_size(&request.text)?;
    if request.style == RedactionStyle::Tokenize && state.cipher.is_none() {
        return Err(ApiError::bad_request(
            "Tokenize requires a field encryption key (SAFEDLP_FIELD_KEY)",
        )
        .into_status());
    }

    let tenant = request.tenant_id.as_deref();
    let (engine, context) = state.resolve(tenant, request.context.as_deref());
    let options = RedactOptions::new(context.clone(), request.style)
        .preserve_format(request.preserve_format)
        .include_matches(request.include_matches);
    let result = engine.redact_value(&request.text, &options);

    let sealed_tokens = match (&state.cipher, result.tokens.is_empty()) {
        (Some(cipher), false) => Some(
            seal_tokens(cipher.as_ref(), &result.tokens, tenant.unwrap_or(""))
                .map_err(fail)?,
        ),
        _ => None,
    };

    if let Some(text) = request.text.as_str() {
        let scan = engine.scan(text, &ScanOptions::new(context.clone()));
        state.log_row(tenant, "redact", &context, text, &scan).await;
    }

    Ok(Json(RedactResponse {
        text: result.text,
        redactions: result.redactions,
        timestamp: result.timestamp,
        sealed_tokens,
    }))
}

/// POST /api/v1/dlp/validate
async fn validate(
    State(state): State<AppState>,
    Json(request): Json<ValidateRequest>,
) -> ApiResult<Json<ValidationResult>> {
    state.check_size(&request.text)?;
    let tenant = request.tenant_id.as_deref();
    let (engine, context) = state.resolve(tenant, request.context.as_deref());
    let options = ValidateOptions::new(context.clone()).allow(request.allowed_categories);
    let result = engine.validate_value(&request.text, &options);

    if let Some(text) = request.text.as_str() {
        let scan = engine.scan(text, &ScanOptions::new(context.clone()));
        state.log_row(tenant, "validate", &context, text, &scan).await;
    }
    Ok(Json(result))
}

/// GET /api/v1/dlp/patterns
async fn list_patterns(State(state): State<AppState>) -> impl IntoResponse {
    let patterns: Vec<PatternInfo> = state
        .engine
        .registry()
        .iter()
        .map(|p| PatternInfo {
            id: p.id().to_string(),
            description: p.description().to_string(),
            severity: p.severity(),
            categories: p.categories().to_vec(),
        })
        .collect();
    Json(patterns)
}

/// POST /api/v1/audit/chains
async fn create_chain(
    State(state): State<AppState>,
    Json(request): Json<CreateChainRequest>,
) -> ApiResult<(StatusCode, Json<AuditChain>)> {
    let chain = generate_trail(
        state.store.as_ref(),
        &request.records,
        request.genesis_hash.as_deref(),
    )
    .await
    .map_err(fail)?;
    Ok((StatusCode::CREATED, Json(chain)))
}

/// GET /api/v1/audit/chains/:id
async fn get_chain(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<AuditChain>> {
    match state.store.get_chain(&id).await.map_err(fail)? {
        Some(chain) => Ok(Json(chain)),
        None => Err(ApiError::not_found(format!("Chain {} not found", id)).into_status()),
    }
}

/// POST /api/v1/audit/chains/verify
async fn verify(
    State(state): State<AppState>,
    Json(request): Json<VerifyRequest>,
) -> ApiResult<Json<ChainVerification>> {
    let chain = match (request.chain, request.chain_id) {
        (Some(chain), _) => chain,
        (None, Some(id)) => state
            .store
            .get_chain(&id)
            .await
            .map_err(fail)?
            .ok_or_else(|| ApiError::not_found(format!("Chain {} not found", id)).into_status())?,
        (None, None) => {
            return Err(ApiError::bad_request("Either chainId or chain is required").into_status())
        }
    };
    Ok(Json(verify_chain(&chain)))
}

/// GET /api/v1/audit/rows?tenant=&since=&limit=
async fn search_rows(
    State(state): State<AppState>,
    Query(filter): Query<AuditFilter>,
) -> ApiResult<Json<Vec<AuditRow>>> {
    Ok(Json(state.store.search(&filter).await.map_err(fail)?))
}
