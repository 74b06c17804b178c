// src/gateway.rs
//
// Server-to-server confirmation of a notification: the received parameter string is
// posted back to the gateway, which answers `VALID` or `INVALID`.

use std::time::Duration;

use crate::error::EntitlementError;
use crate::payment_event::PaymentEvent;

const VALID: &str = "VALID";

pub async fn confirm_with_gateway(
    client: &reqwest::Client,
    validate_url: &str,
    event: &PaymentEvent,
    timeout: Duration,
) -> Result<(), EntitlementError> {
    let resp = client
        .post(validate_url)
        .header("Content-Type", "application/x-www-form-urlencoded")
        .timeout(timeout)
        .body(event.raw_fields.to_body())
        .send()
        .await
        .map_err(|e| EntitlementError::GatewayUnavailable(e.to_string()))?;

    let status = resp.status();
    let body = resp
        .text()
        .await
        .map_err(|e| EntitlementError::GatewayUnavailable(e.to_string()))?;

    if status.is_server_error() {
        return Err(EntitlementError::GatewayUnavailable(format!(
            "validate status={status}"
        )));
    }

    if status.is_success() && body.trim() == VALID {
        Ok(())
    } else {
        Err(EntitlementError::GatewayRejected(format!(
            "status={status} body={}",
            body.trim()
        )))
    }
}
