// src/api/subscriptions.rs

use actix_web::{get, post, web, HttpRequest, HttpResponse};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::{IntoParams, ToSchema};

use crate::api::auth::{bearer_identity, Identity};
use crate::billing::{EntitlementService, FallbackReason, ResolvedTier};
use crate::error::EntitlementError;
use crate::models::{EntitlementPatch, EntitlementRecord, EntitlementStatus, PaymentSource};
use crate::reconcile::{LedgerEffect, ReconcileState, Reconciliation, SubscriptionPayment};
use crate::store::{bounded, EntitlementWriter, PrivilegedWriter, SelfWriter};
use crate::tiers::{Feature, Tier};
use crate::AppState;

/// Header carrying a client-asserted user id when no verified token is available.
pub const CLAIMED_USER_HEADER: &str = "X-User-Id";

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionUpdateRequest {
    pub user_id: String,
    pub requested_tier: String,
    pub payment_id: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileResponse {
    pub ok: bool,
    pub state: String,
    pub user_id: String,
    pub payment_id: String,
    pub previous_tier: Tier,
    pub tier: Tier,
    pub already_recorded: bool,
    pub mode: String,
    pub verified: bool,
}

impl From<&Reconciliation> for ReconcileResponse {
    fn from(r: &Reconciliation) -> Self {
        Self {
            ok: true,
            state: r.transition.state().as_str().to_string(),
            user_id: r.user_id.clone(),
            payment_id: r.payment_id.clone(),
            previous_tier: r.previous_tier,
            tier: r.tier,
            already_recorded: r.ledger == LedgerEffect::AlreadyRecorded,
            mode: r.mode.as_str().to_string(),
            verified: r.verified,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EntitlementResponse {
    pub user_id: String,
    pub resolved: ResolvedTier,
    pub record: Option<EntitlementRecord>,
    pub features: Vec<Feature>,
    pub warning: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct FeatureAccessResponse {
    pub feature: String,
    pub allowed: bool,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AdminEntitlementRequest {
    pub user_id: String,
    pub tier: String,
    pub status: Option<EntitlementStatus>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct EntitlementQuery {
    /// Client-asserted user id, only used when the bearer token is missing or invalid.
    pub uid: Option<String>,
}

async fn run_reconciliation(
    state: &AppState,
    payment: SubscriptionPayment,
    writer: &dyn EntitlementWriter,
) -> Result<HttpResponse, EntitlementError> {
    match state.reconciler.apply(&payment, writer).await {
        Ok(outcome) => Ok(HttpResponse::Ok().json(ReconcileResponse::from(&outcome))),
        Err(e) => {
            let terminal = ReconcileState::for_error(&e, payment.source);
            log::warn!(
                "client reconciliation failed state={} user_id={} payment_id={} mode={} code={}: {e}",
                terminal.as_str(),
                payment.user_id,
                payment.payment_id,
                writer.mode().as_str(),
                e.code()
            );
            Err(e)
        }
    }
}

#[utoipa::path(
    post,
    path = "/api/subscription/manual-update",
    tag = "subscriptions",
    request_body = SubscriptionUpdateRequest,
    responses(
        (status = 200, description = "Payment reconciled", body = ReconcileResponse),
        (status = 400, description = "Invalid tier or payment id"),
        (status = 403, description = "Caller may not update this user"),
        (status = 409, description = "Server write not permitted (code admin_permissions_missing); retry through self-update"),
        (status = 503, description = "Store unavailable")
    )
)]
#[post("/subscription/manual-update")]
pub async fn manual_update(
    identity: web::ReqData<Identity>,
    payload: web::Json<SubscriptionUpdateRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, EntitlementError> {
    let identity = identity.into_inner();
    let payload = payload.into_inner();

    if identity.uid != payload.user_id && !state.entitlements.is_admin(identity.email.as_deref()) {
        return Err(EntitlementError::Forbidden(
            "user id does not match the signed-in user".to_string(),
        ));
    }

    let payment = SubscriptionPayment::from_client(
        &payload.user_id,
        &payload.requested_tier,
        &payload.payment_id,
        identity.email.clone(),
        PaymentSource::Manual,
    )?;
    let writer = PrivilegedWriter::new(state.store.clone());
    run_reconciliation(&state, payment, &writer).await
}

#[utoipa::path(
    post,
    path = "/api/subscription/self-update",
    tag = "subscriptions",
    request_body = SubscriptionUpdateRequest,
    responses(
        (status = 200, description = "Payment reconciled with the caller's own credentials", body = ReconcileResponse),
        (status = 400, description = "Invalid tier or payment id"),
        (status = 403, description = "Caller may only update their own record"),
        (status = 503, description = "Store unavailable")
    )
)]
#[post("/subscription/self-update")]
pub async fn self_update(
    identity: web::ReqData<Identity>,
    payload: web::Json<SubscriptionUpdateRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, EntitlementError> {
    let identity = identity.into_inner();
    let payload = payload.into_inner();

    if identity.uid != payload.user_id {
        return Err(EntitlementError::Forbidden(
            "self-update is limited to the signed-in user".to_string(),
        ));
    }

    let payment = SubscriptionPayment::from_client(
        &payload.user_id,
        &payload.requested_tier,
        &payload.payment_id,
        identity.email.clone(),
        PaymentSource::SelfService,
    )?;
    let writer = SelfWriter::new(identity.uid, state.self_store.clone());
    run_reconciliation(&state, payment, &writer).await
}

fn unverified_response(user_id: String) -> EntitlementResponse {
    EntitlementResponse {
        user_id,
        resolved: ResolvedTier::fallback(FallbackReason::UnverifiedIdentity),
        record: None,
        features: EntitlementService::features_for(Tier::Free),
        warning: Some("identity could not be verified; showing the free tier".to_string()),
    }
}

/// Reads (creating on first sight) the caller's entitlement.
///
/// Registered outside the JWT scope: an unverifiable caller that still names a user
/// gets a flagged free answer instead of an error.
#[utoipa::path(
    get,
    path = "/entitlement",
    tag = "subscriptions",
    params(EntitlementQuery),
    responses(
        (status = 200, description = "Current entitlement, possibly a flagged fallback", body = EntitlementResponse),
        (status = 401, description = "No verified identity and no claimed user id")
    )
)]
#[get("/entitlement")]
pub async fn read_entitlement(
    req: HttpRequest,
    query: web::Query<EntitlementQuery>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, EntitlementError> {
    let identity = match bearer_identity(req.headers(), &state.jwt_secret) {
        Ok(identity) => identity,
        Err(auth_err) => {
            let claimed = req
                .headers()
                .get(CLAIMED_USER_HEADER)
                .and_then(|h| h.to_str().ok())
                .map(str::to_string)
                .or_else(|| query.into_inner().uid)
                .filter(|uid| !uid.trim().is_empty());

            return match claimed {
                Some(uid) => {
                    log::warn!("entitlement read without verified identity user_id={uid}: {auth_err}");
                    Ok(HttpResponse::Ok().json(unverified_response(uid)))
                }
                None => Err(auth_err),
            };
        }
    };

    let (record, warning) = match bounded(
        state.store_timeout,
        "load_or_create",
        state.store.load_or_create(&identity.uid),
    )
    .await
    {
        Ok(record) => (Some(record), None),
        Err(e) => {
            log::warn!("entitlement record unavailable user_id={}: {e}", identity.uid);
            (None, Some(format!("entitlement record unavailable: {e}")))
        }
    };

    let resolved = state
        .entitlements
        .get_tier(&identity.uid, identity.email.as_deref())
        .await;
    let warning = warning.or_else(|| {
        resolved
            .is_fallback()
            .then(|| "tier could not be confirmed; showing the free tier".to_string())
    });

    Ok(HttpResponse::Ok().json(EntitlementResponse {
        user_id: identity.uid,
        resolved,
        record,
        features: EntitlementService::features_for(resolved.tier),
        warning,
    }))
}

#[utoipa::path(
    get,
    path = "/api/features/{name}",
    tag = "subscriptions",
    params(("name" = String, Path, description = "Feature name, e.g. custom-domain")),
    responses(
        (status = 200, description = "Whether the caller's tier unlocks the feature", body = FeatureAccessResponse)
    )
)]
#[get("/features/{name}")]
pub async fn feature_access(
    identity: web::ReqData<Identity>,
    name: web::Path<String>,
    state: web::Data<AppState>,
) -> HttpResponse {
    let feature = name.into_inner();
    let allowed = state
        .entitlements
        .can_access_feature(&identity.uid, identity.email.as_deref(), &feature)
        .await;

    HttpResponse::Ok().json(FeatureAccessResponse { feature, allowed })
}

#[utoipa::path(
    post,
    path = "/api/subscription/cancel",
    tag = "subscriptions",
    responses(
        (status = 200, description = "Subscription cancelled; tier kept until the period ends", body = EntitlementRecord),
        (status = 400, description = "No active paid subscription"),
        (status = 503, description = "Store unavailable")
    )
)]
#[post("/subscription/cancel")]
pub async fn cancel_subscription(
    identity: web::ReqData<Identity>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, EntitlementError> {
    let uid = identity.uid.as_str();
    let current = bounded(state.store_timeout, "load", state.store.load(uid)).await?;

    let Some(record) = current.filter(|r| {
        r.tier != Tier::Free
            && matches!(r.status, EntitlementStatus::Active | EntitlementStatus::Cancelled)
    }) else {
        return Ok(HttpResponse::BadRequest().json(json!({
            "error": "no paid subscription to cancel",
            "code": "no_subscription"
        })));
    };
    if record.status == EntitlementStatus::Cancelled {
        return Ok(HttpResponse::Ok().json(record));
    }

    let mut patch = EntitlementPatch::touch(Utc::now());
    patch.status = Some(EntitlementStatus::Cancelled);
    bounded(state.store_timeout, "merge", state.store.merge(uid, &patch)).await?;

    let updated = bounded(state.store_timeout, "load", state.store.load(uid))
        .await?
        .ok_or_else(|| EntitlementError::Store(format!("record for {uid} missing after cancel")))?;
    log::info!(
        "subscription cancelled user_id={} tier={} until={:?}",
        uid,
        updated.tier,
        updated.next_billing_date
    );

    Ok(HttpResponse::Ok().json(updated))
}

#[utoipa::path(
    get,
    path = "/api/transactions",
    tag = "subscriptions",
    responses(
        (status = 200, description = "Caller's payment ledger, newest first", body = [crate::models::TransactionRecord]),
        (status = 503, description = "Store unavailable")
    )
)]
#[get("/transactions")]
pub async fn list_transactions(
    identity: web::ReqData<Identity>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, EntitlementError> {
    let txs = bounded(
        state.store_timeout,
        "list_transactions",
        state.store.list_transactions(&identity.uid),
    )
    .await?;

    Ok(HttpResponse::Ok().json(txs))
}

/// Operator override. Writes the record directly; no ledger entry.
#[utoipa::path(
    post,
    path = "/api/admin/entitlements",
    tag = "admin",
    request_body = AdminEntitlementRequest,
    responses(
        (status = 200, description = "Record after the override", body = EntitlementRecord),
        (status = 400, description = "Unknown tier"),
        (status = 403, description = "Caller is not an operator"),
        (status = 409, description = "Server write not permitted")
    )
)]
#[post("/admin/entitlements")]
pub async fn admin_set_entitlement(
    identity: web::ReqData<Identity>,
    payload: web::Json<AdminEntitlementRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, EntitlementError> {
    if !state.entitlements.is_admin(identity.email.as_deref()) {
        return Err(EntitlementError::Forbidden("operator access required".to_string()));
    }

    let payload = payload.into_inner();
    if payload.user_id.trim().is_empty() {
        return Err(EntitlementError::InvalidCorrelation("missing user id".to_string()));
    }
    let tier = Tier::parse_strict(&payload.tier).ok_or_else(|| {
        EntitlementError::InvalidCorrelation(format!("unknown tier {:?}", payload.tier))
    })?;

    let mut patch = EntitlementPatch::touch(Utc::now());
    patch.tier = Some(tier);
    patch.status = Some(payload.status.unwrap_or(EntitlementStatus::Active));
    bounded(
        state.store_timeout,
        "merge",
        state.store.merge(&payload.user_id, &patch),
    )
    .await?;

    let record = bounded(state.store_timeout, "load", state.store.load(&payload.user_id))
        .await?
        .ok_or_else(|| {
            EntitlementError::Store(format!("record for {} missing after override", payload.user_id))
        })?;
    log::info!(
        "admin override user_id={} tier={} status={} by={}",
        record.user_id,
        record.tier,
        record.status,
        identity.email.as_deref().unwrap_or_default()
    );

    Ok(HttpResponse::Ok().json(record))
}
