pub mod api;
pub mod billing;
pub mod config;
pub mod db;
pub mod docs;
pub mod error;
pub mod gateway;
pub mod models;
pub mod payment_event;
pub mod reconcile;
pub mod signature;
pub mod store;
pub mod tiers;

use std::sync::Arc;
use std::time::Duration;

use billing::EntitlementService;
use config::{Config, PayfastConfig};
use reconcile::Reconciler;
use store::EntitlementStore;

#[derive(Clone)]
pub struct AppState {
    /// Server-credential store used by the webhook and manual paths.
    pub store: Arc<dyn EntitlementStore>,
    /// Store reached with the caller's own credentials for self-service writes.
    pub self_store: Arc<dyn EntitlementStore>,
    pub reconciler: Reconciler,
    pub entitlements: EntitlementService,
    pub payfast: PayfastConfig,
    pub jwt_secret: String,
    pub public_base_url: String,
    pub http: reqwest::Client,
    pub store_timeout: Duration,
}

impl AppState {
    pub fn new(
        config: &Config,
        store: Arc<dyn EntitlementStore>,
        self_store: Arc<dyn EntitlementStore>,
    ) -> Self {
        Self {
            reconciler: Reconciler::new(config.store_timeout)
                .with_merchant_id(config.payfast.merchant_id.clone()),
            entitlements: EntitlementService::new(
                store.clone(),
                config.admins.clone(),
                config.store_timeout,
            ),
            store,
            self_store,
            payfast: config.payfast.clone(),
            jwt_secret: config.jwt_secret.clone(),
            public_base_url: config.public_base_url.clone(),
            http: reqwest::Client::new(),
            store_timeout: config.store_timeout,
        }
    }
}
