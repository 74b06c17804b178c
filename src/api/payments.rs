// src/api/payments.rs

use actix_web::{post, web, HttpResponse};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::api::auth::Identity;
use crate::error::EntitlementError;
use crate::signature::{compute_signature, SIGNATURE_FIELD};
use crate::tiers::{PaymentKind, Tier};
use crate::AppState;

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreatePaymentRequest {
    /// Paid tier to subscribe to.
    pub tier: String,
    pub name_first: Option<String>,
    pub name_last: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CheckoutField {
    pub name: String,
    pub value: String,
}

/// Fields the browser posts to the gateway's process URL, in signing order.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutForm {
    pub process_url: String,
    pub merchant_payment_id: String,
    pub tier: Tier,
    pub amount: String,
    pub fields: Vec<CheckoutField>,
}

/// Builds the signed checkout form. The correlation fields (`custom_str1..3`) come
/// back unchanged on the notification.
pub fn build_checkout(
    state: &AppState,
    identity: &Identity,
    tier: Tier,
    name_first: Option<&str>,
    name_last: Option<&str>,
) -> CheckoutForm {
    let plan = tier.plan();
    let merchant_payment_id = format!(
        "{}-{}-{}",
        identity.uid,
        tier.as_str(),
        Utc::now().timestamp_millis()
    );
    let base = state.public_base_url.as_str();

    let mut pairs: Vec<(String, String)> = vec![
        ("merchant_id".into(), state.payfast.merchant_id.clone()),
        ("merchant_key".into(), state.payfast.merchant_key.clone()),
        ("return_url".into(), format!("{base}/billing/success?tier={}", tier.as_str())),
        ("cancel_url".into(), format!("{base}/billing/cancel")),
        ("notify_url".into(), format!("{base}/webhook/payfast")),
    ];
    if let Some(v) = name_first.filter(|v| !v.trim().is_empty()) {
        pairs.push(("name_first".into(), v.trim().to_string()));
    }
    if let Some(v) = name_last.filter(|v| !v.trim().is_empty()) {
        pairs.push(("name_last".into(), v.trim().to_string()));
    }
    if let Some(v) = identity.email.as_deref() {
        pairs.push(("email_address".into(), v.to_string()));
    }
    pairs.extend([
        ("m_payment_id".into(), merchant_payment_id.clone()),
        ("amount".into(), plan.price.to_string()),
        ("item_name".into(), format!("{} plan", plan.name)),
        ("item_description".into(), plan.description.to_string()),
        ("custom_str1".into(), identity.uid.clone()),
        ("custom_str2".into(), tier.as_str().to_string()),
        ("custom_str3".into(), PaymentKind::Subscription.as_str().to_string()),
    ]);

    let signature = compute_signature(
        pairs.iter().map(|(n, v)| (n.as_str(), v.as_str())),
        &state.payfast.passphrase,
    );
    pairs.push((SIGNATURE_FIELD.to_string(), signature));

    CheckoutForm {
        process_url: state.payfast.process_url.clone(),
        merchant_payment_id,
        tier,
        amount: plan.price.to_string(),
        fields: pairs
            .into_iter()
            .map(|(name, value)| CheckoutField { name, value })
            .collect(),
    }
}

#[utoipa::path(
    post,
    path = "/api/create-payment",
    tag = "payments",
    request_body = CreatePaymentRequest,
    responses(
        (status = 200, description = "Signed checkout form", body = CheckoutForm),
        (status = 400, description = "Tier is not purchasable")
    )
)]
#[post("/create-payment")]
pub async fn create_payment(
    identity: web::ReqData<Identity>,
    payload: web::Json<CreatePaymentRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, EntitlementError> {
    let tier = Tier::parse_strict(&payload.tier)
        .filter(Tier::is_purchasable)
        .ok_or_else(|| {
            EntitlementError::InvalidCorrelation(format!("tier {:?} is not purchasable", payload.tier))
        })?;

    let form = build_checkout(
        &state,
        &identity,
        tier,
        payload.name_first.as_deref(),
        payload.name_last.as_deref(),
    );
    log::info!(
        "payfast checkout created user_id={} tier={} m_payment_id={}",
        identity.uid,
        tier,
        form.merchant_payment_id
    );

    Ok(HttpResponse::Ok().json(form))
}
