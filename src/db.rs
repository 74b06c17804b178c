// src/db.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use crate::error::StoreError;
use crate::models::{EntitlementPatch, EntitlementRecord, NewTransaction, TransactionRecord};
use crate::store::EntitlementStore;

/// Postgres-backed store. The pool's role decides which writes are allowed.
#[derive(Clone)]
pub struct PgEntitlementStore {
    pool: PgPool,
}

impl PgEntitlementStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn parse_column<T: std::str::FromStr>(row: &PgRow, column: &str) -> Result<T, StoreError> {
    let raw: String = row.try_get(column)?;
    raw.parse()
        .map_err(|_| StoreError::Backend(format!("unexpected {column} value: {raw}")))
}

fn record_from_row(r: &PgRow) -> Result<EntitlementRecord, StoreError> {
    Ok(EntitlementRecord {
        user_id: r.try_get("user_id")?,
        tier: parse_column(r, "tier")?,
        status: parse_column(r, "status")?,
        payment_token: r.try_get("payment_token")?,
        created_at: r.try_get("created_at")?,
        updated_at: r.try_get("updated_at")?,
        trial_ends_at: r.try_get("trial_ends_at")?,
        next_billing_date: r.try_get("next_billing_date")?,
    })
}

fn transaction_from_row(r: &PgRow) -> Result<TransactionRecord, StoreError> {
    Ok(TransactionRecord {
        id: r.try_get("id")?,
        user_id: r.try_get("user_id")?,
        tier: parse_column(r, "tier")?,
        gateway_payment_id: r.try_get("gateway_payment_id")?,
        merchant_payment_id: r.try_get("merchant_payment_id")?,
        amount_gross: r.try_get("amount_gross")?,
        amount_fee: r.try_get("amount_fee")?,
        amount_net: r.try_get("amount_net")?,
        status: r.try_get("status")?,
        name_first: r.try_get("name_first")?,
        name_last: r.try_get("name_last")?,
        email_address: r.try_get("email_address")?,
        source: parse_column(r, "source")?,
        created_at: r.try_get::<DateTime<Utc>, _>("created_at")?,
    })
}

const TRANSACTION_COLUMNS: &str = r#"id, user_id, tier, gateway_payment_id, merchant_payment_id,
       amount_gross::text AS amount_gross, amount_fee::text AS amount_fee,
       amount_net::text AS amount_net, status, name_first, name_last,
       email_address, source, created_at"#;

#[async_trait]
impl EntitlementStore for PgEntitlementStore {
    async fn load(&self, user_id: &str) -> Result<Option<EntitlementRecord>, StoreError> {
        let row = sqlx::query(
            r#"SELECT user_id, tier, status, payment_token, created_at, updated_at,
                      trial_ends_at, next_billing_date
               FROM entitlements
               WHERE user_id = $1"#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn merge(&self, user_id: &str, patch: &EntitlementPatch) -> Result<(), StoreError> {
        sqlx::query(
            r#"INSERT INTO entitlements
                    (user_id, tier, status, payment_token, trial_ends_at, next_billing_date,
                     created_at, updated_at)
               VALUES ($1, COALESCE($2, 'free'), COALESCE($3, 'active'), $4, $5, $6, $7, $7)
               ON CONFLICT (user_id)
               DO UPDATE SET
                   tier = COALESCE($2, entitlements.tier),
                   status = COALESCE($3, entitlements.status),
                   payment_token = COALESCE($4, entitlements.payment_token),
                   trial_ends_at = COALESCE($5, entitlements.trial_ends_at),
                   next_billing_date = COALESCE($6, entitlements.next_billing_date),
                   updated_at = GREATEST($7, entitlements.created_at)"#,
        )
        .bind(user_id)
        .bind(patch.tier.map(|t| t.as_str()))
        .bind(patch.status.map(|s| s.as_str()))
        .bind(patch.payment_token.as_deref())
        .bind(patch.trial_ends_at)
        .bind(patch.next_billing_date)
        .bind(patch.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn append_transaction(&self, tx: &NewTransaction) -> Result<bool, StoreError> {
        let row = sqlx::query(
            r#"INSERT INTO transactions
                    (user_id, tier, gateway_payment_id, merchant_payment_id,
                     amount_gross, amount_fee, amount_net, status,
                     name_first, name_last, email_address, source, created_at)
               VALUES ($1, $2, $3, $4, $5::numeric, $6::numeric, $7::numeric, $8,
                       $9, $10, $11, $12, $13)
               ON CONFLICT (gateway_payment_id) DO NOTHING
               RETURNING id"#,
        )
        .bind(&tx.user_id)
        .bind(tx.tier.as_str())
        .bind(&tx.gateway_payment_id)
        .bind(tx.merchant_payment_id.as_deref())
        .bind(tx.amount_gross.as_deref())
        .bind(tx.amount_fee.as_deref())
        .bind(tx.amount_net.as_deref())
        .bind(&tx.status)
        .bind(tx.name_first.as_deref())
        .bind(tx.name_last.as_deref())
        .bind(tx.email_address.as_deref())
        .bind(tx.source.as_str())
        .bind(tx.created_at)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.is_some())
    }

    async fn find_transaction(
        &self,
        gateway_payment_id: &str,
    ) -> Result<Option<TransactionRecord>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE gateway_payment_id = $1"
        ))
        .bind(gateway_payment_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(transaction_from_row).transpose()
    }

    async fn list_transactions(&self, user_id: &str) -> Result<Vec<TransactionRecord>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE user_id = $1 ORDER BY created_at DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(transaction_from_row).collect()
    }

    async fn can_write(&self) -> Result<bool, StoreError> {
        let row = sqlx::query(
            r#"SELECT has_table_privilege(current_user, 'entitlements', 'INSERT')
                  AND has_table_privilege(current_user, 'entitlements', 'UPDATE') AS allowed"#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get("allowed")?)
    }
}
