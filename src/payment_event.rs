// src/payment_event.rs
//
// Decodes PayFast ITN (instant transaction notification) bodies.

use crate::error::EntitlementError;

/// Literal `payment_status` for a settled payment.
pub const PAYMENT_COMPLETE: &str = "COMPLETE";

/// Ordered form fields exactly as received. Values are never trimmed here.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FormFields(Vec<(String, String)>);

impl FormFields {
    pub fn new(pairs: Vec<(String, String)>) -> Self {
        Self(pairs)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Re-encodes the fields as a form body, preserving order.
    pub fn to_body(&self) -> String {
        serde_urlencoded::to_string(&self.0).unwrap_or_default()
    }
}

/// Normalised view of one notification. Lives for a single request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentEvent {
    pub payment_id: Option<String>,
    pub merchant_payment_id: Option<String>,
    pub merchant_id: Option<String>,
    pub status: Option<String>,
    pub gross_amount: Option<String>,
    pub fee_amount: Option<String>,
    pub net_amount: Option<String>,
    pub name_first: Option<String>,
    pub name_last: Option<String>,
    pub email_address: Option<String>,
    pub correlation_user_id: Option<String>,
    pub correlation_tier: Option<String>,
    pub correlation_kind: Option<String>,
    pub signature: Option<String>,
    pub raw_fields: FormFields,
}

impl PaymentEvent {
    pub fn is_complete(&self) -> bool {
        self.status.as_deref() == Some(PAYMENT_COMPLETE)
    }

    pub fn from_fields(raw_fields: FormFields) -> Self {
        // Empty strings are how the gateway sends "not set".
        let field = |name: &str| {
            raw_fields
                .get(name)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        Self {
            payment_id: field("pf_payment_id"),
            merchant_payment_id: field("m_payment_id"),
            merchant_id: field("merchant_id"),
            status: field("payment_status"),
            gross_amount: field("amount_gross"),
            fee_amount: field("amount_fee"),
            net_amount: field("amount_net"),
            name_first: field("name_first"),
            name_last: field("name_last"),
            email_address: field("email_address"),
            correlation_user_id: field("custom_str1"),
            correlation_tier: field("custom_str2"),
            correlation_kind: field("custom_str3"),
            signature: field("signature"),
            raw_fields,
        }
    }
}

/// Parses a form-encoded notification body.
///
/// Fails on empty bodies, invalid UTF-8, segments without `=`, and repeated field names.
pub fn parse_notification(body: &[u8]) -> Result<PaymentEvent, EntitlementError> {
    let text = std::str::from_utf8(body)
        .map_err(|e| EntitlementError::MalformedPayload(format!("body is not utf-8: {e}")))?;

    if text.trim().is_empty() {
        return Err(EntitlementError::MalformedPayload("empty body".to_string()));
    }

    if let Some(segment) = text
        .split('&')
        .find(|segment| !segment.is_empty() && !segment.contains('='))
    {
        return Err(EntitlementError::MalformedPayload(format!(
            "segment without value: {segment}"
        )));
    }

    let pairs: Vec<(String, String)> = serde_urlencoded::from_bytes(body)
        .map_err(|e| EntitlementError::MalformedPayload(e.to_string()))?;

    if pairs.is_empty() {
        return Err(EntitlementError::MalformedPayload("no fields".to_string()));
    }

    for (i, (name, _)) in pairs.iter().enumerate() {
        if name.is_empty() {
            return Err(EntitlementError::MalformedPayload("empty field name".to_string()));
        }
        if pairs[..i].iter().any(|(seen, _)| seen == name) {
            return Err(EntitlementError::MalformedPayload(format!(
                "duplicate field: {name}"
            )));
        }
    }

    Ok(PaymentEvent::from_fields(FormFields::new(pairs)))
}
