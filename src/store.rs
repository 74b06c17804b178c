// src/store.rs

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::StoreError;
use crate::models::{EntitlementPatch, EntitlementRecord, NewTransaction, TransactionRecord};

/// Durable entitlement records plus the payment ledger, keyed by user id.
#[async_trait]
pub trait EntitlementStore: Send + Sync {
    async fn load(&self, user_id: &str) -> Result<Option<EntitlementRecord>, StoreError>;

    /// Merges `patch` onto the user's record, creating a free/active record first if
    /// none exists.
    async fn merge(&self, user_id: &str, patch: &EntitlementPatch) -> Result<(), StoreError>;

    /// Appends a ledger entry. Returns `false` when the gateway payment id is already
    /// recorded; the check is atomic with the insert.
    async fn append_transaction(&self, tx: &NewTransaction) -> Result<bool, StoreError>;

    async fn find_transaction(
        &self,
        gateway_payment_id: &str,
    ) -> Result<Option<TransactionRecord>, StoreError>;

    async fn list_transactions(&self, user_id: &str) -> Result<Vec<TransactionRecord>, StoreError>;

    /// Whether this store's identity may write entitlement records.
    async fn can_write(&self) -> Result<bool, StoreError> {
        Ok(true)
    }

    async fn load_or_create(&self, user_id: &str) -> Result<EntitlementRecord, StoreError> {
        if let Some(record) = self.load(user_id).await? {
            return Ok(record);
        }
        self.merge(user_id, &EntitlementPatch::touch(Utc::now())).await?;
        self.load(user_id)
            .await?
            .ok_or_else(|| StoreError::Backend(format!("record for {user_id} vanished after create")))
    }
}

/// Runs a store call under a deadline. Expiry is reported as `Unavailable`, which
/// callers treat as retryable.
pub async fn bounded<T, F>(limit: Duration, op: &str, fut: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Unavailable(format!(
            "{op} timed out after {}ms",
            limit.as_millis()
        ))),
    }
}

#[derive(Default)]
struct MemoryState {
    records: HashMap<String, EntitlementRecord>,
    ledger: Vec<TransactionRecord>,
}

/// In-process store for local runs and tests. Failures can be switched on to exercise
/// the permission and availability paths.
#[derive(Default)]
pub struct MemoryEntitlementStore {
    state: Mutex<MemoryState>,
    deny_writes: AtomicBool,
    unavailable: AtomicBool,
}

impl MemoryEntitlementStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_deny_writes(&self, deny: bool) {
        self.deny_writes.store(deny, Ordering::SeqCst);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store offline".to_string()));
        }
        Ok(())
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        self.check_available()?;
        if self.deny_writes.load(Ordering::SeqCst) {
            return Err(StoreError::PermissionDenied(
                "writes disabled for this identity".to_string(),
            ));
        }
        Ok(())
    }

    fn state(&self) -> Result<std::sync::MutexGuard<'_, MemoryState>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Backend("memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl EntitlementStore for MemoryEntitlementStore {
    async fn load(&self, user_id: &str) -> Result<Option<EntitlementRecord>, StoreError> {
        self.check_available()?;
        Ok(self.state()?.records.get(user_id).cloned())
    }

    async fn merge(&self, user_id: &str, patch: &EntitlementPatch) -> Result<(), StoreError> {
        self.check_writable()?;
        let mut state = self.state()?;
        state
            .records
            .entry(user_id.to_string())
            .or_insert_with(|| EntitlementRecord::new_default(user_id, patch.updated_at))
            .apply(patch);
        Ok(())
    }

    async fn append_transaction(&self, tx: &NewTransaction) -> Result<bool, StoreError> {
        self.check_writable()?;
        let mut state = self.state()?;
        if state
            .ledger
            .iter()
            .any(|t| t.gateway_payment_id == tx.gateway_payment_id)
        {
            return Ok(false);
        }
        let id = state.ledger.len() as i64 + 1;
        state.ledger.push(TransactionRecord::from_new(id, tx));
        Ok(true)
    }

    async fn find_transaction(
        &self,
        gateway_payment_id: &str,
    ) -> Result<Option<TransactionRecord>, StoreError> {
        self.check_available()?;
        Ok(self
            .state()?
            .ledger
            .iter()
            .find(|t| t.gateway_payment_id == gateway_payment_id)
            .cloned())
    }

    async fn list_transactions(&self, user_id: &str) -> Result<Vec<TransactionRecord>, StoreError> {
        self.check_available()?;
        let mut rows: Vec<TransactionRecord> = self
            .state()?
            .ledger
            .iter()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn can_write(&self) -> Result<bool, StoreError> {
        self.check_available()?;
        Ok(!self.deny_writes.load(Ordering::SeqCst))
    }
}

/// Which identity a reconciliation writes with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Server credentials; may write any user's record.
    Privileged,
    /// The caller's own credentials; may only write the caller's record.
    SelfScoped,
}

impl WriteMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteMode::Privileged => "privileged",
            WriteMode::SelfScoped => "self_scoped",
        }
    }
}

/// Write strategy handed to the reconciliation engine.
#[async_trait]
pub trait EntitlementWriter: Send + Sync {
    fn mode(&self) -> WriteMode;

    async fn load(&self, user_id: &str) -> Result<Option<EntitlementRecord>, StoreError>;

    async fn merge(&self, user_id: &str, patch: &EntitlementPatch) -> Result<(), StoreError>;

    async fn find_transaction(
        &self,
        gateway_payment_id: &str,
    ) -> Result<Option<TransactionRecord>, StoreError>;

    async fn append_transaction(&self, tx: &NewTransaction) -> Result<bool, StoreError>;
}

pub struct PrivilegedWriter {
    store: Arc<dyn EntitlementStore>,
}

impl PrivilegedWriter {
    pub fn new(store: Arc<dyn EntitlementStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl EntitlementWriter for PrivilegedWriter {
    fn mode(&self) -> WriteMode {
        WriteMode::Privileged
    }

    async fn load(&self, user_id: &str) -> Result<Option<EntitlementRecord>, StoreError> {
        self.store.load(user_id).await
    }

    async fn merge(&self, user_id: &str, patch: &EntitlementPatch) -> Result<(), StoreError> {
        self.store.merge(user_id, patch).await
    }

    async fn find_transaction(
        &self,
        gateway_payment_id: &str,
    ) -> Result<Option<TransactionRecord>, StoreError> {
        self.store.find_transaction(gateway_payment_id).await
    }

    async fn append_transaction(&self, tx: &NewTransaction) -> Result<bool, StoreError> {
        self.store.append_transaction(tx).await
    }
}

/// Writes through the caller's own identity, confined to the caller's record.
pub struct SelfWriter {
    uid: String,
    store: Arc<dyn EntitlementStore>,
}

impl SelfWriter {
    pub fn new(uid: impl Into<String>, store: Arc<dyn EntitlementStore>) -> Self {
        Self {
            uid: uid.into(),
            store,
        }
    }

    fn check_scope(&self, user_id: &str) -> Result<(), StoreError> {
        if user_id != self.uid {
            return Err(StoreError::PermissionDenied(format!(
                "identity {} may not write record {user_id}",
                self.uid
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl EntitlementWriter for SelfWriter {
    fn mode(&self) -> WriteMode {
        WriteMode::SelfScoped
    }

    async fn load(&self, user_id: &str) -> Result<Option<EntitlementRecord>, StoreError> {
        self.check_scope(user_id)?;
        self.store.load(user_id).await
    }

    async fn merge(&self, user_id: &str, patch: &EntitlementPatch) -> Result<(), StoreError> {
        self.check_scope(user_id)?;
        self.store.merge(user_id, patch).await
    }

    async fn find_transaction(
        &self,
        gateway_payment_id: &str,
    ) -> Result<Option<TransactionRecord>, StoreError> {
        self.store.find_transaction(gateway_payment_id).await
    }

    async fn append_transaction(&self, tx: &NewTransaction) -> Result<bool, StoreError> {
        self.check_scope(&tx.user_id)?;
        self.store.append_transaction(tx).await
    }
}
