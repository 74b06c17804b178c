// src/reconcile.rs

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::error::{EntitlementError, StoreError};
use crate::models::{EntitlementPatch, NewTransaction, PaymentSource};
use crate::payment_event::{PaymentEvent, PAYMENT_COMPLETE};
use crate::store::{bounded, EntitlementWriter, WriteMode};
use crate::tiers::{PaymentKind, Tier};

/// Outcome of one event against one record, as reported in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileState {
    Unchanged,
    Upgraded,
    Downgraded,
    RejectedInvalid,
    RejectedUnverified,
    /// Privileged write refused on a client-initiated path; the client owns the retry.
    PersistFailedFallbackApplied,
    PersistFailedFatal,
}

impl ReconcileState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileState::Unchanged => "unchanged",
            ReconcileState::Upgraded => "upgraded",
            ReconcileState::Downgraded => "downgraded",
            ReconcileState::RejectedInvalid => "rejected_invalid",
            ReconcileState::RejectedUnverified => "rejected_unverified",
            ReconcileState::PersistFailedFallbackApplied => "persist_failed_fallback_applied",
            ReconcileState::PersistFailedFatal => "persist_failed_fatal",
        }
    }

    /// Terminal state for a failed reconciliation arriving through `source`.
    pub fn for_error(err: &EntitlementError, source: PaymentSource) -> Self {
        match err {
            EntitlementError::MalformedPayload(_) | EntitlementError::InvalidCorrelation(_) => {
                ReconcileState::RejectedInvalid
            }
            EntitlementError::SignatureMismatch | EntitlementError::GatewayRejected(_) => {
                ReconcileState::RejectedUnverified
            }
            EntitlementError::StorePermissionDenied(_) if source == PaymentSource::Manual => {
                ReconcileState::PersistFailedFallbackApplied
            }
            _ => ReconcileState::PersistFailedFatal,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Unchanged,
    Upgraded,
    Downgraded,
}

impl Transition {
    fn between(from: Tier, to: Tier) -> Self {
        match to.rank().cmp(&from.rank()) {
            std::cmp::Ordering::Greater => Transition::Upgraded,
            std::cmp::Ordering::Less => Transition::Downgraded,
            std::cmp::Ordering::Equal => Transition::Unchanged,
        }
    }

    pub fn state(&self) -> ReconcileState {
        match self {
            Transition::Unchanged => ReconcileState::Unchanged,
            Transition::Upgraded => ReconcileState::Upgraded,
            Transition::Downgraded => ReconcileState::Downgraded,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerEffect {
    Appended,
    AlreadyRecorded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    pub user_id: String,
    pub payment_id: String,
    pub transition: Transition,
    pub previous_tier: Tier,
    pub tier: Tier,
    pub ledger: LedgerEffect,
    pub mode: WriteMode,
    /// False when the re-read after the write did not show the requested tier.
    pub verified: bool,
}

/// A successful, correlated subscription payment ready to be applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionPayment {
    pub user_id: String,
    pub tier: Tier,
    pub payment_id: String,
    pub merchant_payment_id: Option<String>,
    pub amount_gross: Option<String>,
    pub amount_fee: Option<String>,
    pub amount_net: Option<String>,
    pub status: String,
    pub name_first: Option<String>,
    pub name_last: Option<String>,
    pub email_address: Option<String>,
    pub source: PaymentSource,
}

fn paid_tier(value: Option<&str>) -> Result<Tier, EntitlementError> {
    let raw = value.ok_or_else(|| EntitlementError::InvalidCorrelation("missing tier".to_string()))?;
    match Tier::parse_strict(raw) {
        Some(tier) if tier.is_purchasable() => Ok(tier),
        Some(tier) => Err(EntitlementError::InvalidCorrelation(format!(
            "tier {tier} is not a paid tier"
        ))),
        None => Err(EntitlementError::InvalidCorrelation(format!("unknown tier {raw:?}"))),
    }
}

fn amount(field: &str, value: Option<&String>) -> Option<String> {
    let value = value?;
    if value.trim().parse::<f64>().is_ok() {
        Some(value.trim().to_string())
    } else {
        log::warn!("ignoring non-numeric {field}={value:?}");
        None
    }
}

impl SubscriptionPayment {
    /// Steps 1-3: success literal, payment kind, user id and tier.
    ///
    /// `Ok(None)` means the gateway reported a non-successful status.
    pub fn from_event(event: &PaymentEvent) -> Result<Option<Self>, EntitlementError> {
        if !event.is_complete() {
            return Ok(None);
        }

        match event.correlation_kind.as_deref().and_then(PaymentKind::parse_strict) {
            Some(PaymentKind::Subscription) => {}
            Some(other) => {
                return Err(EntitlementError::InvalidCorrelation(format!(
                    "payment kind {} is not a subscription",
                    other.as_str()
                )))
            }
            None => {
                return Err(EntitlementError::InvalidCorrelation(format!(
                    "unknown payment kind {:?}",
                    event.correlation_kind
                )))
            }
        }

        let user_id = event
            .correlation_user_id
            .clone()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| EntitlementError::InvalidCorrelation("missing user id".to_string()))?;

        let tier = paid_tier(event.correlation_tier.as_deref())?;

        let payment_id = event
            .payment_id
            .clone()
            .ok_or_else(|| EntitlementError::InvalidCorrelation("missing pf_payment_id".to_string()))?;

        Ok(Some(Self {
            user_id,
            tier,
            payment_id,
            merchant_payment_id: event.merchant_payment_id.clone(),
            amount_gross: amount("amount_gross", event.gross_amount.as_ref()),
            amount_fee: amount("amount_fee", event.fee_amount.as_ref()),
            amount_net: amount("amount_net", event.net_amount.as_ref()),
            status: PAYMENT_COMPLETE.to_string(),
            name_first: event.name_first.clone(),
            name_last: event.name_last.clone(),
            email_address: event.email_address.clone(),
            source: PaymentSource::Webhook,
        }))
    }

    /// Payment reported by a trusted client after the gateway redirect.
    pub fn from_client(
        user_id: &str,
        requested_tier: &str,
        payment_id: &str,
        email_address: Option<String>,
        source: PaymentSource,
    ) -> Result<Self, EntitlementError> {
        if user_id.trim().is_empty() {
            return Err(EntitlementError::InvalidCorrelation("missing user id".to_string()));
        }
        if payment_id.trim().is_empty() {
            return Err(EntitlementError::InvalidCorrelation("missing payment id".to_string()));
        }
        let tier = paid_tier(Some(requested_tier))?;

        Ok(Self {
            user_id: user_id.to_string(),
            tier,
            payment_id: payment_id.to_string(),
            merchant_payment_id: None,
            amount_gross: Some(tier.plan().price.to_string()),
            amount_fee: None,
            amount_net: None,
            status: PAYMENT_COMPLETE.to_string(),
            name_first: None,
            name_last: None,
            email_address,
            source,
        })
    }

    fn to_transaction(&self, now: DateTime<Utc>) -> NewTransaction {
        NewTransaction {
            user_id: self.user_id.clone(),
            tier: self.tier,
            gateway_payment_id: self.payment_id.clone(),
            merchant_payment_id: self.merchant_payment_id.clone(),
            amount_gross: self.amount_gross.clone(),
            amount_fee: self.amount_fee.clone(),
            amount_net: self.amount_net.clone(),
            status: self.status.clone(),
            name_first: self.name_first.clone(),
            name_last: self.name_last.clone(),
            email_address: self.email_address.clone(),
            source: self.source,
            created_at: now,
        }
    }
}

/// Applies verified payments to the entitlement store.
///
/// The same state machine runs for every write strategy; the caller picks the
/// strategy ([`crate::store::PrivilegedWriter`] or [`crate::store::SelfWriter`]).
#[derive(Debug, Clone)]
pub struct Reconciler {
    timeout: Duration,
    merchant_id: Option<String>,
}

impl Reconciler {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            merchant_id: None,
        }
    }

    /// Notifications addressed to another merchant are rejected.
    pub fn with_merchant_id(mut self, merchant_id: impl Into<String>) -> Self {
        self.merchant_id = Some(merchant_id.into());
        self
    }

    /// Full path for a verified gateway notification. `Ok(None)` when the payment
    /// was not successful and nothing was written.
    pub async fn reconcile_event(
        &self,
        event: &PaymentEvent,
        writer: &dyn EntitlementWriter,
    ) -> Result<Option<Reconciliation>, EntitlementError> {
        if let (Some(expected), Some(received)) = (&self.merchant_id, &event.merchant_id) {
            if expected != received {
                return Err(EntitlementError::InvalidCorrelation(format!(
                    "merchant_id {received} does not match this merchant"
                )));
            }
        }

        let Some(payment) = SubscriptionPayment::from_event(event)? else {
            log::info!(
                "payment not complete status={:?} user_id={:?} payment_id={:?}",
                event.status,
                event.correlation_user_id,
                event.payment_id
            );
            return Ok(None);
        };

        check_gross_amount(&payment);
        self.apply(&payment, writer).await.map(Some)
    }

    /// Steps 4-8: merge-write, verify, append to the ledger once per payment id.
    pub async fn apply(
        &self,
        payment: &SubscriptionPayment,
        writer: &dyn EntitlementWriter,
    ) -> Result<Reconciliation, EntitlementError> {
        let user_id = payment.user_id.as_str();
        let payment_id = payment.payment_id.as_str();

        let recorded = bounded(
            self.timeout,
            "find_transaction",
            writer.find_transaction(payment_id),
        )
        .await?;
        if let Some(tx) = &recorded {
            if tx.user_id != payment.user_id {
                return Err(EntitlementError::InvalidCorrelation(format!(
                    "payment {payment_id} already recorded for another user"
                )));
            }
        }

        let current = bounded(self.timeout, "load", writer.load(user_id)).await?;
        let previous_tier = current.as_ref().map(|r| r.tier).unwrap_or(Tier::Free);

        if recorded.is_some() {
            log::info!(
                "duplicate delivery ignored user_id={} payment_id={}",
                user_id,
                payment_id
            );
            return Ok(Reconciliation {
                user_id: user_id.to_string(),
                payment_id: payment_id.to_string(),
                transition: Transition::Unchanged,
                previous_tier,
                tier: previous_tier,
                ledger: LedgerEffect::AlreadyRecorded,
                mode: writer.mode(),
                verified: true,
            });
        }

        let now = Utc::now();
        let already_applied = current
            .as_ref()
            .is_some_and(|r| r.reflects_payment(payment.tier, payment_id));

        let verified = if already_applied {
            true
        } else {
            let patch = EntitlementPatch::activate(payment.tier, payment_id, now);
            if let Err(e) = bounded(self.timeout, "merge", writer.merge(user_id, &patch)).await {
                self.log_write_failure(&e, payment, writer.mode());
                return Err(e.into());
            }
            if writer.mode() == WriteMode::SelfScoped {
                log::warn!(
                    "fallback self-scoped write applied user_id={} payment_id={} tier={}",
                    user_id,
                    payment_id,
                    payment.tier
                );
            }
            self.verify_write(writer, payment).await
        };

        let appended = bounded(
            self.timeout,
            "append_transaction",
            writer.append_transaction(&payment.to_transaction(now)),
        )
        .await
        .inspect_err(|e| {
            log::error!(
                "ledger append failed user_id={} payment_id={}: {e}",
                user_id,
                payment_id
            )
        })?;

        let transition = Transition::between(previous_tier, payment.tier);
        log::info!(
            "reconciled user_id={} payment_id={} state={} {}->{} mode={}",
            user_id,
            payment_id,
            transition.state().as_str(),
            previous_tier,
            payment.tier,
            writer.mode().as_str()
        );

        Ok(Reconciliation {
            user_id: user_id.to_string(),
            payment_id: payment_id.to_string(),
            transition,
            previous_tier,
            tier: payment.tier,
            ledger: if appended {
                LedgerEffect::Appended
            } else {
                LedgerEffect::AlreadyRecorded
            },
            mode: writer.mode(),
            verified,
        })
    }

    /// Re-reads the record after a write. A mismatch is reported, never fatal.
    async fn verify_write(&self, writer: &dyn EntitlementWriter, payment: &SubscriptionPayment) -> bool {
        let persisted = match bounded(self.timeout, "load", writer.load(&payment.user_id)).await {
            Ok(record) => record.map(|r| r.tier),
            Err(e) => {
                log::warn!(
                    "could not re-read after write user_id={} payment_id={}: {e}",
                    payment.user_id,
                    payment.payment_id
                );
                return false;
            }
        };

        if persisted == Some(payment.tier) {
            return true;
        }

        let mismatch = EntitlementError::VerificationMismatchAfterWrite {
            requested: payment.tier,
            persisted,
        };
        log::warn!(
            "{mismatch} user_id={} payment_id={}",
            payment.user_id,
            payment.payment_id
        );
        false
    }

    fn log_write_failure(&self, err: &StoreError, payment: &SubscriptionPayment, mode: WriteMode) {
        match (err, payment.source) {
            (StoreError::PermissionDenied(_), PaymentSource::Manual) => log::warn!(
                "privileged write denied, client fallback required user_id={} payment_id={}: {err}",
                payment.user_id,
                payment.payment_id
            ),
            _ => log::error!(
                "entitlement write failed mode={} source={} user_id={} payment_id={}: {err}",
                mode.as_str(),
                payment.source.as_str(),
                payment.user_id,
                payment.payment_id
            ),
        }
    }
}

fn check_gross_amount(payment: &SubscriptionPayment) {
    let Some(gross) = payment.amount_gross.as_deref() else {
        return;
    };
    let (Ok(paid), Ok(price)) = (gross.parse::<f64>(), payment.tier.plan().price.parse::<f64>()) else {
        return;
    };
    if paid + 0.005 < price {
        log::warn!(
            "amount_gross {} below {} price {} user_id={} payment_id={}",
            gross,
            payment.tier,
            payment.tier.plan().price,
            payment.user_id,
            payment.payment_id
        );
    }
}
