//! Router configuration.
//!
//! This module sets up the Axum router with all routes and middleware.

use std::sync::Arc;
use std::time::Duration;

use axum::middleware;
use axum::routing::{get, post, put};
use axum::Router;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::gateway::{request_gateway, tag_route};
use crate::handlers::{accounts, admin, callbacks, health, payments, topups, transactions};
use crate::state::AppState;

// ============================================================================
// Concurrency Limiting Constants
// ============================================================================

/// Maximum concurrent requests for workflow endpoints.
/// Each one holds an account lock while it runs.
const WORKFLOW_MAX_CONCURRENT_REQUESTS: usize = 100;

/// Maximum concurrent requests for general API endpoints.
const API_MAX_CONCURRENT_REQUESTS: usize = 50;

/// Create the service router with all routes and middleware.
///
/// Every route runs behind the request gateway.
///
/// # Routes
///
/// ## Public
/// - `GET /health` - Health check
///
/// ## Accounts (API key)
/// - `POST /v1/accounts` - Create the account of a funding target
/// - `GET /v1/accounts/:account_id` - Account with balances
/// - `POST /v1/accounts/:account_id/freeze` - Freeze
/// - `POST /v1/accounts/:account_id/unfreeze` - Unfreeze
/// - `GET /v1/accounts/:account_id/actions` - Action log, newest first
/// - `GET /v1/accounts/:account_id/transactions` - Transactions, newest first
/// - `GET /v1/accounts/:account_id/reconcile` - Replay the action log
///
/// ## Workflow (API key)
/// - `POST /v1/topups` - Initiate topup
/// - `POST /v1/topups/:reference/approve` - Approve topup
/// - `POST /v1/topups/:reference/reject` - Reject topup
/// - `POST /v1/payments` - Initiate payment
/// - `POST /v1/payments/:reference/approve` - Approve payment
/// - `POST /v1/payments/:reference/reject` - Reject payment
/// - `GET /v1/transactions/:reference` - Transaction with balance logs
///
/// ## Callbacks (HMAC signature)
/// - `POST /v1/callbacks/payments` - Payment provider result
///
/// ## Admin (admin key)
/// - `GET /v1/admin/health-report`
/// - `POST /v1/admin/api-clients`
/// - `POST /v1/admin/system-keys`
/// - `POST /v1/admin/rate-limit-rules`
/// - `PUT /v1/admin/rule-profiles`
/// - `POST /v1/admin/balance-entry-types`
/// - `GET /v1/admin/request-logs`
pub fn create_router(state: AppState) -> Router {
    // Extract config values before moving state
    let cors_origins = state.config.cors_origins.clone();
    let max_body_bytes = state.config.max_body_bytes;
    let request_timeout_seconds = state.config.request_timeout_seconds;

    // Build CORS layer
    let cors = build_cors_layer(&cors_origins);

    let state = Arc::new(state);

    // Workflow steps serialize per account, so they get a wider limit than
    // the rest of the API.
    let workflow_routes = Router::new()
        .route("/topups", post(topups::initiate_topup))
        .route("/topups/:reference/approve", post(topups::approve_topup))
        .route("/topups/:reference/reject", post(topups::reject_topup))
        .route("/payments", post(payments::initiate_payment))
        .route("/payments/:reference/approve", post(payments::approve_payment))
        .route("/payments/:reference/reject", post(payments::reject_payment))
        .layer(ConcurrencyLimitLayer::new(WORKFLOW_MAX_CONCURRENT_REQUESTS));

    let admin_routes = Router::new()
        .route("/health-report", get(admin::health_report))
        .route("/api-clients", post(admin::create_api_client))
        .route("/system-keys", post(admin::create_system_key))
        .route("/rate-limit-rules", post(admin::create_rate_limit_rule))
        .route("/rule-profiles", put(admin::put_rule_profile))
        .route("/balance-entry-types", post(admin::create_balance_entry_type))
        .route("/request-logs", get(admin::list_request_logs));

    let api_routes = Router::new()
        // Accounts
        .route("/accounts", post(accounts::create_account))
        .route("/accounts/:account_id", get(accounts::get_account))
        .route("/accounts/:account_id/freeze", post(accounts::freeze_account))
        .route("/accounts/:account_id/unfreeze", post(accounts::unfreeze_account))
        .route("/accounts/:account_id/actions", get(accounts::list_actions))
        .route("/accounts/:account_id/transactions", get(accounts::list_transactions))
        .route("/accounts/:account_id/reconcile", get(accounts::reconcile_account))
        // Transactions
        .route("/transactions/:reference", get(transactions::get_transaction))
        // Provider callbacks
        .route("/callbacks/payments", post(callbacks::payment_callback))
        // Admin
        .nest("/admin", admin_routes)
        .layer(ConcurrencyLimitLayer::new(API_MAX_CONCURRENT_REQUESTS))
        // Workflow routes (with their own concurrency limit)
        .merge(workflow_routes);

    Router::new()
        // Health (exempt from API-key validation)
        .route("/health", get(health::health))
        // API v1 routes
        .nest("/v1", api_routes)
        // Route template for request logs
        .route_layer(middleware::from_fn(tag_route))
        // Request gateway: keys, signatures, rate limits, payload encryption
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            request_gateway,
        ))
        // Global middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(
            request_timeout_seconds,
        )))
        .with_state(state)
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
