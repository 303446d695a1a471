//! Admin handlers.
//!
//! Every route requires [`AdminAuth`].

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use wallet_core::{
    ApiClient, HealthReport, ProfileScope, RateLimitRule, RateLimitScope, RatePeriod,
    RequestLog, RuleProfile, SystemKey,
};

use super::ListQuery;
use crate::auth::AdminAuth;
use crate::crypto::{private_key_from_pem, public_key_from_pem};
use crate::error::ApiError;
use crate::response::ApiResponse;
use crate::state::AppState;

/// Request logs returned when no limit is given.
const DEFAULT_REQUEST_LOG_LIMIT: usize = 50;

/// System-wide wallet figures.
pub async fn health_report(
    State(state): State<Arc<AppState>>,
    _admin: AdminAuth,
) -> Result<ApiResponse<HealthReport>, ApiError> {
    let report = state.engine.health_report()?;
    if !report.is_healthy() {
        tracing::warn!(
            unbalanced = report.unbalanced_accounts.len(),
            "Accounts break the balance invariant"
        );
    }
    Ok(ApiResponse::ok("Health report", report))
}

// ============================================================================
// API clients and keys
// ============================================================================

/// Register API client request.
#[derive(Debug, Deserialize)]
pub struct CreateApiClientRequest {
    /// Display name.
    pub name: String,
    /// Comma-separated IP allowlist; empty admits any IP.
    #[serde(default)]
    pub allowed_ips: Option<String>,
    /// PEM public key for request signatures.
    #[serde(default)]
    pub public_key_pem: Option<String>,
}

/// Register an API client. The response carries its generated key.
pub async fn create_api_client(
    State(state): State<Arc<AppState>>,
    admin: AdminAuth,
    Json(body): Json<CreateApiClientRequest>,
) -> Result<ApiResponse<ApiClient>, ApiError> {
    let name = body.name.trim();
    if name.is_empty() {
        return Err(ApiError::BadRequest("name is required".into()));
    }
    if let Some(pem) = &body.public_key_pem {
        public_key_from_pem(pem).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    }

    let mut client = ApiClient::new(name);
    client.allowed_ips = body
        .allowed_ips
        .as_deref()
        .map(ApiClient::parse_allowed_ips)
        .unwrap_or_default();
    client.public_key_pem = body.public_key_pem;
    state.store.put_api_client(&client)?;

    tracing::info!(
        admin_id = %admin.admin_id,
        client_id = %client.id,
        client = %client.name,
        "API client registered"
    );
    Ok(ApiResponse::created("API client registered", client))
}

/// Register system key request.
#[derive(Debug, Deserialize)]
pub struct CreateSystemKeyRequest {
    /// Key name.
    pub name: String,
    /// PEM private key.
    pub private_key_pem: String,
    /// PEM public key.
    pub public_key_pem: String,
}

/// The public half of a system key.
#[derive(Debug, Serialize)]
pub struct SystemKeyResponse {
    /// Key name.
    pub name: String,
    /// PEM public key handed to clients.
    pub public_key_pem: String,
    /// Creation time.
    pub created_at: String,
}

/// Register the keypair used for payload encryption. The newest active key
/// wins.
pub async fn create_system_key(
    State(state): State<Arc<AppState>>,
    admin: AdminAuth,
    Json(body): Json<CreateSystemKeyRequest>,
) -> Result<ApiResponse<SystemKeyResponse>, ApiError> {
    private_key_from_pem(&body.private_key_pem)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    public_key_from_pem(&body.public_key_pem).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let key = SystemKey {
        name: body.name,
        private_key_pem: body.private_key_pem,
        public_key_pem: body.public_key_pem,
        active: true,
        created_at: Utc::now(),
    };
    state.store.put_system_key(&key)?;

    tracing::info!(admin_id = %admin.admin_id, key = %key.name, "System key registered");
    Ok(ApiResponse::created(
        "System key registered",
        SystemKeyResponse {
            name: key.name,
            public_key_pem: key.public_key_pem,
            created_at: key.created_at.to_rfc3339(),
        },
    ))
}

// ============================================================================
// Rate limits and rule profiles
// ============================================================================

/// Create rate-limit rule request.
#[derive(Debug, Deserialize)]
pub struct CreateRateLimitRuleRequest {
    /// Display name.
    pub name: String,
    /// Counting scope.
    pub scope: RateLimitScope,
    /// Requests per window.
    pub limit: u32,
    /// Window unit.
    pub period: RatePeriod,
    /// Units per window.
    #[serde(default)]
    pub period_count: Option<u32>,
    /// Regex matched against the start of the path.
    #[serde(default)]
    pub endpoint_pattern: Option<String>,
    /// Comma-separated methods; empty means all.
    #[serde(default)]
    pub http_methods: Option<String>,
    /// Higher runs first.
    #[serde(default)]
    pub priority: i32,
    /// Minimum ban once exceeded.
    #[serde(default)]
    pub block_duration_minutes: u32,
    /// Defaults to active.
    #[serde(default)]
    pub active: Option<bool>,
}

/// Create a rate-limit rule.
pub async fn create_rate_limit_rule(
    State(state): State<Arc<AppState>>,
    admin: AdminAuth,
    Json(body): Json<CreateRateLimitRuleRequest>,
) -> Result<ApiResponse<RateLimitRule>, ApiError> {
    if body.limit == 0 {
        return Err(ApiError::BadRequest("limit must be positive".into()));
    }

    let mut rule = RateLimitRule::new(body.name, body.scope, body.limit, body.period);
    rule.period_count = body.period_count.unwrap_or(1).max(1);
    rule.endpoint_pattern = body.endpoint_pattern.filter(|p| !p.is_empty());
    rule.http_methods = body
        .http_methods
        .as_deref()
        .map(RateLimitRule::parse_methods)
        .unwrap_or_default();
    rule.priority = body.priority;
    rule.block_duration_minutes = body.block_duration_minutes;
    rule.active = body.active.unwrap_or(true);
    rule.compile_pattern()
        .map_err(|e| ApiError::BadRequest(format!("invalid endpoint_pattern: {e}")))?;

    state.store.put_rate_limit_rule(&rule)?;
    tracing::info!(
        admin_id = %admin.admin_id,
        rule = %rule.name,
        scope = ?rule.scope,
        limit = rule.limit,
        "Rate-limit rule created"
    );
    Ok(ApiResponse::created("Rate-limit rule created", rule))
}

/// Upsert rule profile request.
#[derive(Debug, Deserialize)]
pub struct PutRuleProfileRequest {
    /// Executor or processor name.
    pub name: String,
    /// Pipeline level.
    pub scope: ProfileScope,
    /// Processor or command names, in run order.
    pub commands: Vec<String>,
    /// Defaults to active.
    #[serde(default)]
    pub active: Option<bool>,
    /// Delay honoured after the run.
    #[serde(default)]
    pub step_delay_ms: u64,
}

/// Create or replace the profile for a scope and name.
pub async fn put_rule_profile(
    State(state): State<Arc<AppState>>,
    admin: AdminAuth,
    Json(body): Json<PutRuleProfileRequest>,
) -> Result<ApiResponse<RuleProfile>, ApiError> {
    if body.name.trim().is_empty() {
        return Err(ApiError::BadRequest("name is required".into()));
    }
    let commands: Vec<&str> = body.commands.iter().map(String::as_str).collect();
    let mut profile = RuleProfile::new(body.name.trim(), body.scope, &commands);
    profile.active = body.active.unwrap_or(true);
    profile.step_delay_ms = body.step_delay_ms;

    state.store.put_rule_profile(&profile)?;
    tracing::info!(
        admin_id = %admin.admin_id,
        profile = %profile.name,
        scope = ?profile.scope,
        commands = profile.commands.len(),
        "Rule profile saved"
    );
    Ok(ApiResponse::ok("Rule profile saved", profile))
}

/// Register balance entry type request.
#[derive(Debug, Deserialize)]
pub struct CreateEntryTypeRequest {
    /// Entry type name, as referenced by ledger commands.
    pub name: String,
}

/// Register a balance entry type.
pub async fn create_balance_entry_type(
    State(state): State<Arc<AppState>>,
    admin: AdminAuth,
    Json(body): Json<CreateEntryTypeRequest>,
) -> Result<ApiResponse<Vec<String>>, ApiError> {
    let name = body.name.trim();
    if name.is_empty() {
        return Err(ApiError::BadRequest("name is required".into()));
    }
    state.store.put_balance_entry_type(name)?;
    tracing::info!(admin_id = %admin.admin_id, entry_type = name, "Balance entry type registered");
    Ok(ApiResponse::created(
        "Balance entry type registered",
        state.store.list_balance_entry_types()?,
    ))
}

/// Recent request logs, newest first.
pub async fn list_request_logs(
    State(state): State<Arc<AppState>>,
    _admin: AdminAuth,
    Query(query): Query<ListQuery>,
) -> Result<ApiResponse<Vec<RequestLog>>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_REQUEST_LOG_LIMIT);
    let logs = state.store.list_request_logs(limit)?;
    Ok(ApiResponse::ok("Request logs", logs))
}
