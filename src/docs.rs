use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::api::catalog::list_tiers,
        crate::api::payments::create_payment,
        crate::api::subscriptions::manual_update,
        crate::api::subscriptions::self_update,
        crate::api::subscriptions::read_entitlement,
        crate::api::subscriptions::feature_access,
        crate::api::subscriptions::cancel_subscription,
        crate::api::subscriptions::list_transactions,
        crate::api::subscriptions::admin_set_entitlement,
        crate::api::webhooks_payfast::payfast_notify,
        crate::api::webhooks_payfast::payfast_notify_alias
    ),
    components(
        schemas(
            crate::tiers::Tier,
            crate::tiers::TierPlan,
            crate::tiers::Feature,
            crate::models::EntitlementStatus,
            crate::models::EntitlementRecord,
            crate::models::PaymentSource,
            crate::models::TransactionRecord,
            crate::billing::FallbackReason,
            crate::billing::TierSource,
            crate::billing::ResolvedTier,
            crate::api::payments::CreatePaymentRequest,
            crate::api::payments::CheckoutField,
            crate::api::payments::CheckoutForm,
            crate::api::subscriptions::SubscriptionUpdateRequest,
            crate::api::subscriptions::ReconcileResponse,
            crate::api::subscriptions::EntitlementResponse,
            crate::api::subscriptions::FeatureAccessResponse,
            crate::api::subscriptions::AdminEntitlementRequest
        )
    ),
    tags(
        (name = "payments", description = "Tier catalog and checkout"),
        (name = "subscriptions", description = "Entitlements, features and client-side reconciliation"),
        (name = "admin", description = "Operator overrides"),
        (name = "webhooks", description = "PayFast notifications")
    )
)]
pub struct ApiDoc;
