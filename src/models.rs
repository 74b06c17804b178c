// src/models.rs

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;

use crate::tiers::{Tier, UnknownName};

/// Length of one paid billing period.
pub const BILLING_PERIOD_DAYS: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum EntitlementStatus {
    Active,
    Pending,
    Cancelled,
    Expired,
}

impl EntitlementStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntitlementStatus::Active => "active",
            EntitlementStatus::Pending => "pending",
            EntitlementStatus::Cancelled => "cancelled",
            EntitlementStatus::Expired => "expired",
        }
    }
}

impl fmt::Display for EntitlementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntitlementStatus {
    type Err = UnknownName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(EntitlementStatus::Active),
            "pending" => Ok(EntitlementStatus::Pending),
            "cancelled" => Ok(EntitlementStatus::Cancelled),
            "expired" => Ok(EntitlementStatus::Expired),
            _ => Err(UnknownName("status")),
        }
    }
}

/// Per-user entitlement. Timestamps serialize as epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EntitlementRecord {
    pub user_id: String,
    pub tier: Tier,
    pub status: EntitlementStatus,
    pub payment_token: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    #[schema(value_type = i64)]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    #[schema(value_type = i64)]
    pub updated_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds_option")]
    #[schema(value_type = Option<i64>)]
    pub trial_ends_at: Option<DateTime<Utc>>,
    #[serde(with = "chrono::serde::ts_milliseconds_option")]
    #[schema(value_type = Option<i64>)]
    pub next_billing_date: Option<DateTime<Utc>>,
}

impl EntitlementRecord {
    /// Record created on first observation of a user.
    pub fn new_default(user_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.to_string(),
            tier: Tier::Free,
            status: EntitlementStatus::Active,
            payment_token: None,
            created_at: now,
            updated_at: now,
            trial_ends_at: None,
            next_billing_date: None,
        }
    }

    /// Applies a merge patch: fields absent from the patch keep their value.
    pub fn apply(&mut self, patch: &EntitlementPatch) {
        if let Some(tier) = patch.tier {
            self.tier = tier;
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(token) = &patch.payment_token {
            self.payment_token = Some(token.clone());
        }
        if let Some(at) = patch.trial_ends_at {
            self.trial_ends_at = Some(at);
        }
        if let Some(at) = patch.next_billing_date {
            self.next_billing_date = Some(at);
        }
        self.updated_at = patch.updated_at.max(self.created_at);
    }

    /// Tier that gates features right now.
    ///
    /// A cancelled subscription keeps its tier until the paid period runs out.
    pub fn effective_tier(&self, now: DateTime<Utc>) -> Tier {
        match self.status {
            EntitlementStatus::Active => self.tier,
            EntitlementStatus::Cancelled => match self.next_billing_date {
                Some(end) if end > now => self.tier,
                _ => Tier::Free,
            },
            EntitlementStatus::Pending | EntitlementStatus::Expired => Tier::Free,
        }
    }

    /// True when the record already reflects this payment.
    pub fn reflects_payment(&self, tier: Tier, payment_id: &str) -> bool {
        self.tier == tier
            && self.status == EntitlementStatus::Active
            && self.payment_token.as_deref() == Some(payment_id)
    }
}

/// Field-level merge write. `None` means "leave as is".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitlementPatch {
    pub tier: Option<Tier>,
    pub status: Option<EntitlementStatus>,
    pub payment_token: Option<String>,
    pub trial_ends_at: Option<DateTime<Utc>>,
    pub next_billing_date: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl EntitlementPatch {
    pub fn touch(now: DateTime<Utc>) -> Self {
        Self {
            tier: None,
            status: None,
            payment_token: None,
            trial_ends_at: None,
            next_billing_date: None,
            updated_at: now,
        }
    }

    /// Patch written after a successful payment.
    pub fn activate(tier: Tier, payment_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            tier: Some(tier),
            status: Some(EntitlementStatus::Active),
            payment_token: Some(payment_id.to_string()),
            next_billing_date: Some(now + Duration::days(BILLING_PERIOD_DAYS)),
            ..Self::touch(now)
        }
    }
}

/// Where a ledger entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PaymentSource {
    Webhook,
    Manual,
    SelfService,
}

impl PaymentSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentSource::Webhook => "webhook",
            PaymentSource::Manual => "manual",
            PaymentSource::SelfService => "self_service",
        }
    }
}

impl FromStr for PaymentSource {
    type Err = UnknownName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "webhook" => Ok(PaymentSource::Webhook),
            "manual" => Ok(PaymentSource::Manual),
            "self_service" => Ok(PaymentSource::SelfService),
            _ => Err(UnknownName("payment source")),
        }
    }
}

/// Ledger entry, before the store assigns an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransaction {
    pub user_id: String,
    pub tier: Tier,
    pub gateway_payment_id: String,
    pub merchant_payment_id: Option<String>,
    pub amount_gross: Option<String>,
    pub amount_fee: Option<String>,
    pub amount_net: Option<String>,
    pub status: String,
    pub name_first: Option<String>,
    pub name_last: Option<String>,
    pub email_address: Option<String>,
    pub source: PaymentSource,
    pub created_at: DateTime<Utc>,
}

/// Append-only ledger entry. `gateway_payment_id` is unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    pub id: i64,
    pub user_id: String,
    pub tier: Tier,
    pub gateway_payment_id: String,
    pub merchant_payment_id: Option<String>,
    pub amount_gross: Option<String>,
    pub amount_fee: Option<String>,
    pub amount_net: Option<String>,
    pub status: String,
    pub name_first: Option<String>,
    pub name_last: Option<String>,
    pub email_address: Option<String>,
    pub source: PaymentSource,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    #[schema(value_type = i64)]
    pub created_at: DateTime<Utc>,
}

impl TransactionRecord {
    pub fn from_new(id: i64, tx: &NewTransaction) -> Self {
        Self {
            id,
            user_id: tx.user_id.clone(),
            tier: tx.tier,
            gateway_payment_id: tx.gateway_payment_id.clone(),
            merchant_payment_id: tx.merchant_payment_id.clone(),
            amount_gross: tx.amount_gross.clone(),
            amount_fee: tx.amount_fee.clone(),
            amount_net: tx.amount_net.clone(),
            status: tx.status.clone(),
            name_first: tx.name_first.clone(),
            name_last: tx.name_last.clone(),
            email_address: tx.email_address.clone(),
            source: tx.source,
            created_at: tx.created_at,
        }
    }
}
