// src/billing.rs

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use utoipa::ToSchema;

use crate::config::AdminAllowList;
use crate::store::{bounded, EntitlementStore};
use crate::tiers::{Feature, Tier};

/// Why a tier could not be confirmed from the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    NoRecord,
    StoreUnavailable,
    UnverifiedIdentity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TierSource {
    Stored,
    AdminOverride,
    Fallback,
}

/// A tier together with how it was decided, so "confirmed free" and
/// "unknown, assumed free" stay distinguishable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedTier {
    pub tier: Tier,
    pub source: TierSource,
    pub fallback_reason: Option<FallbackReason>,
}

impl ResolvedTier {
    pub fn confirmed(tier: Tier, source: TierSource) -> Self {
        Self {
            tier,
            source,
            fallback_reason: None,
        }
    }

    pub fn fallback(reason: FallbackReason) -> Self {
        Self {
            tier: Tier::Free,
            source: TierSource::Fallback,
            fallback_reason: Some(reason),
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.source == TierSource::Fallback
    }
}

/// Answers tier and feature questions for request handlers.
#[derive(Clone)]
pub struct EntitlementService {
    store: Arc<dyn EntitlementStore>,
    admins: AdminAllowList,
    timeout: Duration,
}

impl EntitlementService {
    pub fn new(store: Arc<dyn EntitlementStore>, admins: AdminAllowList, timeout: Duration) -> Self {
        Self {
            store,
            admins,
            timeout,
        }
    }

    pub fn is_admin(&self, email: Option<&str>) -> bool {
        email.is_some_and(|e| self.admins.contains(e))
    }

    /// Current tier. The operator allow-list is consulted before the store; a missing
    /// record or an unreachable store resolves to a flagged `free`.
    pub async fn get_tier(&self, user_id: &str, email: Option<&str>) -> ResolvedTier {
        if self.is_admin(email) {
            log::info!(
                "admin override activated user_id={} email={}",
                user_id,
                email.unwrap_or_default()
            );
            return ResolvedTier::confirmed(Tier::Admin, TierSource::AdminOverride);
        }

        match bounded(self.timeout, "load", self.store.load(user_id)).await {
            Ok(Some(record)) => {
                ResolvedTier::confirmed(record.effective_tier(Utc::now()), TierSource::Stored)
            }
            Ok(None) => ResolvedTier::fallback(FallbackReason::NoRecord),
            Err(e) => {
                log::warn!("tier lookup fell back to free user_id={}: {e}", user_id);
                ResolvedTier::fallback(FallbackReason::StoreUnavailable)
            }
        }
    }

    pub async fn has_at_least(&self, user_id: &str, email: Option<&str>, required: Tier) -> bool {
        self.get_tier(user_id, email).await.tier.includes(required)
    }

    /// Unknown feature names are denied.
    pub async fn can_access_feature(&self, user_id: &str, email: Option<&str>, feature: &str) -> bool {
        match feature.parse::<Feature>() {
            Ok(feature) => {
                self.has_at_least(user_id, email, feature.minimum_tier())
                    .await
            }
            Err(_) => {
                log::debug!("unknown feature {feature:?} denied user_id={user_id}");
                false
            }
        }
    }

    /// Features the tier unlocks, in table order.
    pub fn features_for(tier: Tier) -> Vec<Feature> {
        Feature::ALL
            .into_iter()
            .filter(|f| tier.includes(f.minimum_tier()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntitlementPatch, EntitlementStatus};
    use crate::store::MemoryEntitlementStore;
    use proptest::prelude::*;

    fn service(store: Arc<MemoryEntitlementStore>) -> EntitlementService {
        EntitlementService::new(
            store,
            AdminAllowList::parse("ops@example.com"),
            Duration::from_secs(1),
        )
    }

    async fn seed(store: &MemoryEntitlementStore, user: &str, tier: Tier) {
        store
            .merge(user, &EntitlementPatch::activate(tier, "pf-seed", Utc::now()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn missing_record_is_flagged_fallback() {
        let store = Arc::new(MemoryEntitlementStore::new());
        let resolved = service(store).get_tier("nobody", None).await;
        assert_eq!(resolved, ResolvedTier::fallback(FallbackReason::NoRecord));
        assert!(resolved.is_fallback());
    }

    #[tokio::test]
    async fn stored_free_is_confirmed_not_fallback() {
        let store = Arc::new(MemoryEntitlementStore::new());
        store.load_or_create("u1").await.unwrap();
        let resolved = service(store).get_tier("u1", None).await;
        assert_eq!(resolved.tier, Tier::Free);
        assert_eq!(resolved.source, TierSource::Stored);
    }

    #[tokio::test]
    async fn unreachable_store_falls_back_to_free() {
        let store = Arc::new(MemoryEntitlementStore::new());
        seed(&store, "u1", Tier::Premium).await;
        store.set_unavailable(true);
        let resolved = service(store).get_tier("u1", None).await;
        assert_eq!(resolved, ResolvedTier::fallback(FallbackReason::StoreUnavailable));
    }

    #[tokio::test]
    async fn admin_override_wins_over_store_and_outage() {
        let store = Arc::new(MemoryEntitlementStore::new());
        store.set_unavailable(true);
        let svc = service(store);
        let resolved = svc.get_tier("u9", Some("OPS@example.com")).await;
        assert_eq!(resolved.tier, Tier::Admin);
        assert_eq!(resolved.source, TierSource::AdminOverride);
        assert!(svc.can_access_feature("u9", Some("ops@example.com"), "template-admin").await);
    }

    #[tokio::test]
    async fn expired_record_resolves_to_free() {
        let store = Arc::new(MemoryEntitlementStore::new());
        seed(&store, "u1", Tier::Pro).await;
        let mut patch = EntitlementPatch::touch(Utc::now());
        patch.status = Some(EntitlementStatus::Expired);
        store.merge("u1", &patch).await.unwrap();

        assert_eq!(service(store).get_tier("u1", None).await.tier, Tier::Free);
    }

    #[tokio::test]
    async fn features_follow_the_table() {
        let store = Arc::new(MemoryEntitlementStore::new());
        seed(&store, "u1", Tier::Pro).await;
        let svc = service(store);
        assert!(svc.can_access_feature("u1", None, "custom-domain").await);
        assert!(svc.can_access_feature("u1", None, "site-analytics").await);
        assert!(!svc.can_access_feature("u1", None, "ecommerce-blocks").await);
        assert!(!svc.can_access_feature("u1", None, "nonexistent-feature").await);
    }

    #[test]
    fn features_for_is_monotonic_in_tier() {
        let mut previous = 0;
        for tier in Tier::ALL {
            let count = EntitlementService::features_for(tier).len();
            assert!(count >= previous);
            previous = count;
        }
        assert_eq!(previous, Feature::ALL.len());
    }

    fn arb_tier() -> impl Strategy<Value = Tier> {
        (1usize..5).prop_map(|i| Tier::ALL[i])
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn has_at_least_follows_rank(current in arb_tier(), required_index in 0usize..6) {
            let required = Tier::ALL[required_index];
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()
                .unwrap();

            let (reflexive, allowed, unknown) = runtime.block_on(async {
                let store = Arc::new(MemoryEntitlementStore::new());
                seed(&store, "u1", current).await;
                let svc = service(store);
                (
                    svc.has_at_least("u1", None, current).await,
                    svc.has_at_least("u1", None, required).await,
                    svc.can_access_feature("u1", None, "nonexistent-feature").await,
                )
            });

            prop_assert!(reflexive);
            prop_assert_eq!(allowed, current.rank() >= required.rank());
            prop_assert!(!unknown);
        }
    }
}
