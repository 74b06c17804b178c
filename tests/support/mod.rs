#![allow(dead_code)]

use async_trait::async_trait;
use sqlx::PgPool;
use std::env;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};

use site_entitlements::api::auth::{issue_token, Identity};
use site_entitlements::config::{AdminAllowList, Config, PayfastConfig};
use site_entitlements::error::StoreError;
use site_entitlements::models::{EntitlementPatch, EntitlementRecord, NewTransaction, TransactionRecord};
use site_entitlements::signature::compute_signature;
use site_entitlements::store::{EntitlementStore, MemoryEntitlementStore};
use site_entitlements::AppState;

pub const MERCHANT_ID: &str = "10000100";
pub const MERCHANT_KEY: &str = "46f0cd694581a";
pub const PASSPHRASE: &str = "jt7NOE43FZPn";
pub const JWT_SECRET: &str = "test-jwt-secret";
pub const ADMIN_EMAIL: &str = "ops@example.com";

pub fn test_config(validate_url: Option<String>) -> Config {
    Config {
        database_url: None,
        client_database_url: None,
        bind_addr: "127.0.0.1".to_string(),
        port: 0,
        jwt_secret: JWT_SECRET.to_string(),
        public_base_url: "https://sites.example.com".to_string(),
        payfast: PayfastConfig {
            merchant_id: MERCHANT_ID.to_string(),
            merchant_key: MERCHANT_KEY.to_string(),
            passphrase: PASSPHRASE.to_string(),
            process_url: "https://sandbox.payfast.co.za/eng/process".to_string(),
            validate_url,
        },
        admins: AdminAllowList::parse(ADMIN_EMAIL),
        store_timeout: Duration::from_secs(2),
    }
}

/// State over a single in-memory store used for both write strategies.
pub fn memory_state(store: Arc<MemoryEntitlementStore>) -> AppState {
    AppState::new(&test_config(None), store.clone(), store)
}

pub fn bearer(uid: &str, email: Option<&str>) -> (String, String) {
    let identity = Identity {
        uid: uid.to_string(),
        email: email.map(str::to_string),
    };
    let token = issue_token(&identity, JWT_SECRET, chrono::Duration::hours(1)).expect("issue token");
    ("Authorization".to_string(), format!("Bearer {token}"))
}

/// A completed subscription notification for `uid`, in gateway field order.
pub fn complete_notification(uid: &str, tier: &str, payment_id: &str) -> Vec<(String, String)> {
    [
        ("m_payment_id", format!("{uid}-{tier}-1700000000000")),
        ("pf_payment_id", payment_id.to_string()),
        ("payment_status", "COMPLETE".to_string()),
        ("item_name", format!("{tier} plan")),
        ("item_description", String::new()),
        ("amount_gross", "199.00".to_string()),
        ("amount_fee", "-4.58".to_string()),
        ("amount_net", "194.42".to_string()),
        ("custom_str1", uid.to_string()),
        ("custom_str2", tier.to_string()),
        ("custom_str3", "subscription".to_string()),
        ("name_first", "Thandi".to_string()),
        ("name_last", "Nkosi".to_string()),
        ("email_address", "thandi@example.com".to_string()),
        ("merchant_id", MERCHANT_ID.to_string()),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

pub fn set_field(fields: &mut [(String, String)], name: &str, value: &str) {
    if let Some(field) = fields.iter_mut().find(|(k, _)| k == name) {
        field.1 = value.to_string();
    }
}

/// Appends a signature and form-encodes the fields.
pub fn signed_body(fields: &[(String, String)]) -> String {
    let signature = compute_signature(
        fields.iter().map(|(k, v)| (k.as_str(), v.as_str())),
        PASSPHRASE,
    );
    let mut all = fields.to_vec();
    all.push(("signature".to_string(), signature));
    serde_urlencoded::to_string(&all).expect("encode form")
}

/// Reads through to `inner` but refuses every write, like a role without grants.
pub struct ReadOnlyStore {
    pub inner: Arc<MemoryEntitlementStore>,
}

fn denied() -> StoreError {
    StoreError::PermissionDenied("permission denied for table entitlements".to_string())
}

#[async_trait]
impl EntitlementStore for ReadOnlyStore {
    async fn load(&self, user_id: &str) -> Result<Option<EntitlementRecord>, StoreError> {
        self.inner.load(user_id).await
    }

    async fn merge(&self, _user_id: &str, _patch: &EntitlementPatch) -> Result<(), StoreError> {
        Err(denied())
    }

    async fn append_transaction(&self, _tx: &NewTransaction) -> Result<bool, StoreError> {
        Err(denied())
    }

    async fn find_transaction(
        &self,
        gateway_payment_id: &str,
    ) -> Result<Option<TransactionRecord>, StoreError> {
        self.inner.find_transaction(gateway_payment_id).await
    }

    async fn list_transactions(&self, user_id: &str) -> Result<Vec<TransactionRecord>, StoreError> {
        self.inner.list_transactions(user_id).await
    }

    async fn can_write(&self) -> Result<bool, StoreError> {
        Ok(false)
    }
}

/// Server credentials that cannot write, with the caller's credentials writing to the
/// same records.
pub fn denied_server_state(shared: Arc<MemoryEntitlementStore>) -> AppState {
    let server = Arc::new(ReadOnlyStore {
        inner: shared.clone(),
    });
    AppState::new(&test_config(None), server, shared)
}

/// Persists every field except the tier, so the re-read after a write disagrees.
pub struct TierDroppingStore {
    pub inner: Arc<MemoryEntitlementStore>,
}

#[async_trait]
impl EntitlementStore for TierDroppingStore {
    async fn load(&self, user_id: &str) -> Result<Option<EntitlementRecord>, StoreError> {
        self.inner.load(user_id).await
    }

    async fn merge(&self, user_id: &str, patch: &EntitlementPatch) -> Result<(), StoreError> {
        let patch = EntitlementPatch {
            tier: None,
            ..patch.clone()
        };
        self.inner.merge(user_id, &patch).await
    }

    async fn append_transaction(&self, tx: &NewTransaction) -> Result<bool, StoreError> {
        self.inner.append_transaction(tx).await
    }

    async fn find_transaction(
        &self,
        gateway_payment_id: &str,
    ) -> Result<Option<TransactionRecord>, StoreError> {
        self.inner.find_transaction(gateway_payment_id).await
    }

    async fn list_transactions(&self, user_id: &str) -> Result<Vec<TransactionRecord>, StoreError> {
        self.inner.list_transactions(user_id).await
    }
}

pub fn tier_dropping_state(shared: Arc<MemoryEntitlementStore>) -> AppState {
    let store = Arc::new(TierDroppingStore {
        inner: shared.clone(),
    });
    AppState::new(&test_config(None), store.clone(), store)
}

static TEST_DB_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

/// Migrated pool with empty tables, held exclusively for the test's lifetime.
pub struct TestDb {
    pub pool: PgPool,
    _guard: MutexGuard<'static, ()>,
}

/// `None` (test skipped) when `TEST_DATABASE_URL` is unset.
pub async fn init_test_db() -> Option<TestDb> {
    dotenvy::dotenv().ok();
    let Ok(test_url) = env::var("TEST_DATABASE_URL") else {
        eprintln!("TEST_DATABASE_URL not set; skipping postgres test");
        return None;
    };

    let guard = TEST_DB_LOCK.get_or_init(|| Mutex::new(())).lock().await;
    let pool = PgPool::connect(&test_url).await.expect("connect test db");
    sqlx::migrate!().run(&pool).await.expect("migrations");
    sqlx::query("TRUNCATE transactions, entitlements RESTART IDENTITY")
        .execute(&pool)
        .await
        .expect("reset tables");

    Some(TestDb { pool, _guard: guard })
}
