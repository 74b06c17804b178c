// src/api/webhooks_payfast.rs

use actix_web::{post, web, HttpResponse};

use crate::error::EntitlementError;
use crate::gateway::confirm_with_gateway;
use crate::models::PaymentSource;
use crate::payment_event::{parse_notification, PaymentEvent};
use crate::reconcile::ReconcileState;
use crate::signature::verify_event;
use crate::store::PrivilegedWriter;
use crate::AppState;

/// Body PayFast expects on an accepted notification.
const ACK: &str = "SUCCESS";

fn ack() -> HttpResponse {
    HttpResponse::Ok().content_type("text/plain").body(ACK)
}

fn reject(err: &EntitlementError, event: Option<&PaymentEvent>) -> HttpResponse {
    let state = ReconcileState::for_error(err, PaymentSource::Webhook);
    let (user_id, payment_id) = event
        .map(|e| (e.correlation_user_id.as_deref(), e.payment_id.as_deref()))
        .unwrap_or((None, None));

    match err {
        // Verified but unusable: acknowledge so the gateway stops redelivering.
        EntitlementError::InvalidCorrelation(_) => {
            log::warn!(
                "payfast notification ignored state={} user_id={:?} payment_id={:?}: {err}",
                state.as_str(),
                user_id,
                payment_id
            );
            ack()
        }
        EntitlementError::MalformedPayload(_)
        | EntitlementError::SignatureMismatch
        | EntitlementError::GatewayRejected(_) => {
            log::warn!(
                "payfast notification rejected state={} user_id={:?} payment_id={:?}: {err}",
                state.as_str(),
                user_id,
                payment_id
            );
            HttpResponse::BadRequest()
                .content_type("text/plain")
                .body(err.code())
        }
        EntitlementError::StoreUnavailable(_) | EntitlementError::GatewayUnavailable(_) => {
            log::error!(
                "payfast notification deferred state={} user_id={:?} payment_id={:?}: {err}",
                state.as_str(),
                user_id,
                payment_id
            );
            HttpResponse::ServiceUnavailable()
                .content_type("text/plain")
                .body(err.code())
        }
        _ => {
            log::error!(
                "payfast notification failed state={} user_id={:?} payment_id={:?}: {err}",
                state.as_str(),
                user_id,
                payment_id
            );
            HttpResponse::InternalServerError()
                .content_type("text/plain")
                .body(err.code())
        }
    }
}

async fn handle_payfast_notification(body: web::Bytes, state: web::Data<AppState>) -> HttpResponse {
    let event = match parse_notification(&body) {
        Ok(event) => event,
        Err(e) => return reject(&e, None),
    };

    if let Err(e) = verify_event(&event, &state.payfast.passphrase) {
        return reject(&e, Some(&event));
    }

    if let Some(validate_url) = state.payfast.validate_url.as_deref() {
        if let Err(e) =
            confirm_with_gateway(&state.http, validate_url, &event, state.store_timeout).await
        {
            return reject(&e, Some(&event));
        }
    }

    let writer = PrivilegedWriter::new(state.store.clone());
    match state.reconciler.reconcile_event(&event, &writer).await {
        Ok(Some(outcome)) => {
            log::info!(
                "payfast notification applied user_id={} payment_id={} state={} verified={}",
                outcome.user_id,
                outcome.payment_id,
                outcome.transition.state().as_str(),
                outcome.verified
            );
            ack()
        }
        Ok(None) => ack(),
        Err(e) => reject(&e, Some(&event)),
    }
}

#[utoipa::path(
    post,
    path = "/webhook/payfast",
    tag = "webhooks",
    request_body(content = String, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "Notification accepted (SUCCESS)"),
        (status = 400, description = "Malformed payload or failed verification"),
        (status = 500, description = "Write failed; gateway should redeliver"),
        (status = 503, description = "Store or gateway unavailable; gateway should redeliver")
    )
)]
#[post("/webhook/payfast")]
pub async fn payfast_notify(body: web::Bytes, state: web::Data<AppState>) -> HttpResponse {
    handle_payfast_notification(body, state).await
}

#[utoipa::path(
    post,
    path = "/api/payfast/notify",
    tag = "webhooks",
    request_body(content = String, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "Notification accepted (SUCCESS)"),
        (status = 400, description = "Malformed payload or failed verification"),
        (status = 500, description = "Write failed; gateway should redeliver"),
        (status = 503, description = "Store or gateway unavailable; gateway should redeliver")
    )
)]
#[post("/api/payfast/notify")]
pub async fn payfast_notify_alias(body: web::Bytes, state: web::Data<AppState>) -> HttpResponse {
    handle_payfast_notification(body, state).await
}
