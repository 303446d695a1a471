//! Wallet HTTP API Service.
//!
//! This crate provides the HTTP API for the wallet ledger, including:
//!
//! - Account creation, freezing and reconciliation
//! - The topup and payment workflows (initiate, approve, reject)
//! - Payment provider submission, callbacks and status polling
//! - Admin management of API clients, keys, rate limits and rule profiles
//!
//! # Request gateway
//!
//! Every request passes the gateway middleware, which validates the
//! `X-Api-Key` header and IP allowlist, verifies `X-Signature`, applies the
//! stored rate-limit rules, decrypts and encrypts payloads when
//! `X-Encrypted: 1` is set, and writes a request log.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// Allow some pedantic lints that are noisy for Axum handler functions
#![allow(clippy::missing_errors_doc)] // Axum handlers all return Result
#![allow(clippy::unused_async)] // Handlers are async for the router even when they don't await

pub mod auth;
pub mod config;
pub mod crypto;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod notify;
pub mod payments;
pub mod ratelimit;
pub mod reconcile;
pub mod response;
pub mod routes;
pub mod state;

pub use config::ServiceConfig;
pub use engine::{EngineError, WalletEngine};
pub use error::ApiError;
pub use notify::{Notification, Notifier, TracingNotifier};
pub use payments::{GatewayResult, HttpPaymentGateway, PaymentGateway, PaymentSubmission};
pub use ratelimit::RateLimiter;
pub use reconcile::{reconcile_pending, spawn_reconciler};
pub use routes::create_router;
pub use state::AppState;
