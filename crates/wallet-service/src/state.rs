//! Application state.

use std::sync::Arc;

use wallet_core::RuleBook;
use wallet_store::{AccountStore, Store, StoreError};

use crate::config::ServiceConfig;
use crate::engine::WalletEngine;
use crate::notify::{Notifier, TracingNotifier};
use crate::payments::{HttpPaymentGateway, PaymentGateway};
use crate::ratelimit::RateLimiter;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// The storage backend.
    pub store: Arc<dyn Store>,

    /// Workflow engine over the locked account store.
    pub engine: Arc<WalletEngine>,

    /// Rate limiter used by the request gateway.
    pub rate_limiter: Arc<RateLimiter>,

    /// Payment provider for payouts (optional).
    pub payments: Option<Arc<dyn PaymentGateway>>,

    /// Service configuration.
    pub config: ServiceConfig,
}

impl AppState {
    /// Create a new application state.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, config: ServiceConfig) -> Self {
        Self::with_notifier(store, config, Arc::new(TracingNotifier))
    }

    /// Create a state whose engine sends notifications to `notifier`.
    #[must_use]
    pub fn with_notifier(
        store: Arc<dyn Store>,
        config: ServiceConfig,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let accounts = Arc::new(AccountStore::new(Arc::clone(&store)));
        let engine = Arc::new(WalletEngine::new(accounts, notifier));
        let rate_limiter = Arc::new(RateLimiter::new(Arc::clone(&store)));

        // Create the payment gateway client if configured
        let payments = config
            .payment_gateway_url
            .as_ref()
            .zip(config.payment_gateway_client_id.as_ref())
            .zip(config.payment_gateway_client_secret.as_ref())
            .and_then(|((url, id), secret)| {
                match HttpPaymentGateway::new(url, id, secret, config.payment_callback_url.clone())
                {
                    Ok(client) => {
                        tracing::info!(gateway_url = %url, "Payment gateway enabled");
                        Some(Arc::new(client) as Arc<dyn PaymentGateway>)
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to create payment gateway client");
                        None
                    }
                }
            });

        if payments.is_none() {
            tracing::warn!("Payment gateway not configured - payouts stay Pending until settled");
        }

        if config.admin_api_key.is_none() {
            tracing::warn!("Admin key not configured - admin routes are disabled");
        }

        Self {
            store,
            engine,
            rate_limiter,
            payments,
            config,
        }
    }

    /// Replace the payment gateway.
    #[must_use]
    pub fn with_payment_gateway(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.payments = Some(gateway);
        self
    }

    /// Store the standard rule profiles and balance entry types when no
    /// profile is configured yet. Returns whether anything was written.
    pub fn seed_rule_profiles(&self) -> Result<bool, StoreError> {
        if !self.store.list_rule_profiles()?.is_empty() {
            return Ok(false);
        }

        let standard = RuleBook::standard();
        for profile in standard.profiles() {
            self.store.put_rule_profile(profile)?;
        }
        for entry_type in standard.entry_types() {
            self.store.put_balance_entry_type(entry_type)?;
        }
        tracing::info!("Seeded standard rule profiles");
        Ok(true)
    }

    /// Check if a payment gateway is configured.
    #[must_use]
    pub fn has_payments(&self) -> bool {
        self.payments.is_some()
    }
}
