//! The request gateway.
//!
//! Wraps every route and runs, in order:
//!
//! 1. decrypt the body when `X-Encrypted: 1` (failures fall through as plaintext)
//! 2. resolve a bearer session and extend it
//! 3. validate `X-Api-Key` and the client's IP allowlist (exempt prefixes skip this)
//! 4. verify `X-Signature` when present
//! 5. rate limit (every path, exempt or not)
//! 6. run the handler
//! 7. persist a [`RequestLog`], whatever the outcome
//! 8. encrypt JSON responses when the request was encrypted

mod context;

pub use context::{bearer_token, client_ip, is_exempt, RequestContext, EXEMPT_PREFIXES};

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::{to_bytes, Body, Bytes};
use axum::extract::{ConnectInfo, MatchedPath, Request, State};
use axum::http::{header, HeaderMap, HeaderValue};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Duration, Utc};

use wallet_core::{
    truncate_body, ApiClient, RateLimitDecision, RateLimitSubject, RequestId, RequestLog,
};
use wallet_store::StoreError;

use crate::crypto::{
    decrypt_base64, encrypt_to_base64, private_key_from_pem, public_key_from_pem,
    verify_pss_signature, CryptoError,
};
use crate::error::{ApiError, ErrorKind};
use crate::ratelimit::rate_limit_headers;
use crate::state::AppState;

const API_KEY_HEADER: &str = "x-api-key";
const SIGNATURE_HEADER: &str = "x-signature";
const ENCRYPTED_HEADER: &str = "x-encrypted";

/// Route template of the handler that answered.
#[derive(Debug, Clone)]
pub struct RouteName(pub String);

/// Copy the matched route template onto the response for request logging.
///
/// Installed with `route_layer`, where the template is known.
pub async fn tag_route(request: Request, next: Next) -> Response {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string());
    let mut response = next.run(request).await;
    if let Some(route) = route {
        response.extensions_mut().insert(RouteName(route));
    }
    response
}

/// What the request log needs from the request line.
struct Audit {
    method: String,
    path: String,
    user_agent: Option<String>,
    started_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
enum PayloadError {
    #[error("no active system key")]
    NoSystemKey,

    #[error("body is not UTF-8")]
    Encoding,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// The gateway middleware.
pub async fn request_gateway(
    State(state): State<Arc<AppState>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    request: Request,
    next: Next,
) -> Response {
    let started_at = Utc::now();
    let (mut parts, body) = request.into_parts();

    let peer = peer.map(|ConnectInfo(addr)| addr);
    let mut ctx = RequestContext {
        request_id: RequestId::generate(),
        api_client: None,
        user: None,
        ip: client_ip(&parts.headers, peer, &state.config.trusted_proxies),
        encrypted: parts
            .headers
            .get(ENCRYPTED_HEADER)
            .is_some_and(|v| v.as_bytes() == b"1"),
    };
    let audit = Audit {
        method: parts.method.to_string(),
        path: parts.uri.path().to_string(),
        user_agent: parts
            .headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        started_at,
    };

    let body = match to_bytes(body, state.config.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(e) => {
            let response =
                ApiError::BadRequest(format!("unreadable request body: {e}")).into_response();
            return finish(&state, &ctx, &audit, &Bytes::new(), response).await;
        }
    };
    let body = if ctx.encrypted {
        let plaintext = decrypt_body(&state, body);
        parts
            .headers
            .insert(header::CONTENT_LENGTH, HeaderValue::from(plaintext.len()));
        plaintext
    } else {
        body
    };

    let response = match admit(&state, &parts.headers, &audit, &body, &mut ctx) {
        Ok(decision) => {
            let mut request = Request::from_parts(parts, Body::from(body.clone()));
            request.extensions_mut().insert(ctx.clone());
            let mut response = next.run(request).await;
            for (name, value) in rate_limit_headers(&decision) {
                response.headers_mut().insert(name, value);
            }
            response
        }
        Err(err) => err.into_response(),
    };

    finish(&state, &ctx, &audit, &body, response).await
}

/// Steps 2 to 5. Returns the rate-limit decision to report on the response.
fn admit(
    state: &AppState,
    headers: &HeaderMap,
    audit: &Audit,
    body: &[u8],
    ctx: &mut RequestContext,
) -> Result<RateLimitDecision, ApiError> {
    if let Some(token) = bearer_token(headers) {
        ctx.user = resolve_session(state, token, audit.started_at);
    }

    if !is_exempt(&audit.path) {
        ctx.api_client = Some(validate_api_client(state, headers, &ctx.ip)?);
    }

    if let Some(signature) = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok()) {
        verify_signature(ctx.api_client.as_ref(), body, signature, &ctx.ip)?;
    }

    let client_id = ctx.api_client.as_ref().map(|client| client.id.to_string());
    let subject = RateLimitSubject {
        api_client: client_id.as_deref(),
        user: ctx.user.as_deref(),
        ip: &ctx.ip,
        endpoint: &audit.path,
        method: &audit.method,
    };
    let decision = state.rate_limiter.check(&subject, audit.started_at)?;
    if decision.blocked {
        return Err(ApiError::RateLimited(decision));
    }
    Ok(decision)
}

/// The user of an active session, extending it.
fn resolve_session(state: &AppState, token: &str, now: DateTime<Utc>) -> Option<String> {
    let mut session = match state.store.get_session(token) {
        Ok(Some(session)) if session.is_valid(now) => session,
        Ok(_) => return None,
        Err(e) => {
            tracing::error!(error = %e, "Failed to load session");
            return None;
        }
    };

    session.extend(now, Duration::minutes(state.config.session_extension_minutes));
    if let Err(e) = state.store.put_session(&session) {
        tracing::error!(error = %e, user_id = %session.user_id, "Failed to extend session");
    }
    Some(session.user_id)
}

fn validate_api_client(
    state: &AppState,
    headers: &HeaderMap,
    ip: &str,
) -> Result<ApiClient, ApiError> {
    let api_key = headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|key| !key.is_empty())
        .ok_or(ApiError::MissingApiKey)?;

    let Some(client) = state
        .store
        .get_api_client_by_key(api_key)?
        .filter(|client| client.active)
    else {
        tracing::warn!(ip, "Invalid API key attempted");
        return Err(ApiError::InvalidApiKey);
    };

    if !client.allows_ip(ip) {
        tracing::warn!(ip, client = %client.name, "IP not allowed for API client");
        return Err(ApiError::IpNotAllowed);
    }
    Ok(client)
}

fn verify_signature(
    client: Option<&ApiClient>,
    body: &[u8],
    signature: &str,
    ip: &str,
) -> Result<(), ApiError> {
    let client = client.ok_or(ApiError::ClientContextMissing)?;
    let Some(pem) = client.public_key_pem.as_deref() else {
        tracing::warn!(client = %client.name, "No public key configured for API client");
        return Err(ApiError::KeyNotConfigured(
            "Client public key not configured".into(),
        ));
    };

    let result = public_key_from_pem(pem)
        .and_then(|key| verify_pss_signature(&key, body, signature));
    match result {
        Ok(()) => Ok(()),
        Err(CryptoError::InvalidSignature) => {
            tracing::warn!(client = %client.name, ip, "Invalid request signature");
            Err(ApiError::InvalidSignature)
        }
        Err(e) => {
            tracing::error!(client = %client.name, error = %e, "Signature verification error");
            Err(ApiError::SignatureVerificationFailed)
        }
    }
}

// ============================================================================
// Payload encryption
// ============================================================================

fn decrypt_body(state: &AppState, body: Bytes) -> Bytes {
    if body.is_empty() {
        return body;
    }
    match try_decrypt(state, &body) {
        Ok(plaintext) => Bytes::from(plaintext),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to decrypt request body");
            body
        }
    }
}

fn try_decrypt(state: &AppState, body: &[u8]) -> Result<Vec<u8>, PayloadError> {
    let key = state
        .store
        .get_active_system_key()?
        .ok_or(PayloadError::NoSystemKey)?;
    let private = private_key_from_pem(&key.private_key_pem)?;
    let text = std::str::from_utf8(body).map_err(|_| PayloadError::Encoding)?;
    Ok(decrypt_base64(&private, text.trim().trim_matches('"'))?)
}

/// The response body as a JSON string holding base64 ciphertext.
fn try_encrypt(state: &AppState, body: &[u8]) -> Result<Vec<u8>, PayloadError> {
    let key = state
        .store
        .get_active_system_key()?
        .ok_or(PayloadError::NoSystemKey)?;
    let public = public_key_from_pem(&key.public_key_pem)?;
    let ciphertext = encrypt_to_base64(&public, body)?;
    Ok(serde_json::Value::String(ciphertext).to_string().into_bytes())
}

// ============================================================================
// Request log
// ============================================================================

/// Steps 7 and 8.
async fn finish(
    state: &AppState,
    ctx: &RequestContext,
    audit: &Audit,
    request_body: &Bytes,
    response: Response,
) -> Response {
    let (mut parts, body) = response.into_parts();
    let bytes = match to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to buffer response body");
            Bytes::new()
        }
    };

    let ended_at = Utc::now();
    let error_kind = parts.extensions.get::<ErrorKind>().map(|kind| kind.0);
    let exception_message = error_kind.and_then(|_| {
        serde_json::from_slice::<serde_json::Value>(&bytes)
            .ok()
            .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
    });

    let log = RequestLog {
        request_id: ctx.request_id,
        api_client: ctx.api_client.as_ref().map(|client| client.name.clone()),
        user: ctx.user.clone(),
        is_authenticated: ctx.is_authenticated(),
        ip_address: ctx.ip.clone(),
        user_agent: audit.user_agent.clone(),
        method: audit.method.clone(),
        path: audit.path.clone(),
        request_data: request_data(request_body),
        view_name: parts.extensions.get::<RouteName>().map(|r| r.0.clone()),
        exception_type: error_kind.map(str::to_string),
        exception_message,
        started_at: audit.started_at,
        ended_at,
        time_taken_ms: (ended_at - audit.started_at).num_milliseconds(),
        response_status: parts.status.as_u16(),
        response_data: truncate_body(&String::from_utf8_lossy(&bytes)),
    };
    if let Err(e) = state.store.put_request_log(&log) {
        tracing::error!(error = %e, request_id = %ctx.request_id, "Failed to save request log");
    }
    tracing::debug!(
        request_id = %ctx.request_id,
        method = %audit.method,
        path = %audit.path,
        status = log.response_status,
        time_taken_ms = log.time_taken_ms,
        "Request handled"
    );

    let is_json = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/json"));
    let bytes = if ctx.encrypted && is_json {
        match try_encrypt(state, &bytes) {
            Ok(encrypted) => {
                parts.headers.remove(header::CONTENT_LENGTH);
                Bytes::from(encrypted)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to encrypt response body");
                bytes
            }
        }
    } else {
        bytes
    };

    Response::from_parts(parts, Body::from(bytes))
}

/// The request body as JSON when it parses, otherwise as text.
fn request_data(body: &[u8]) -> serde_json::Value {
    if body.is_empty() {
        return serde_json::Value::Null;
    }
    serde_json::from_slice(body)
        .unwrap_or_else(|_| serde_json::Value::String(String::from_utf8_lossy(body).into_owned()))
}
