// src/signature.rs
//
// PayFast signature: MD5 over `name=urlencode(trim(value))` pairs in the order the
// fields were sent, followed by the passphrase. The encoding mirrors
// `encodeURIComponent` with `%20` replaced by `+`, which is what the gateway signs.

use md5::{Digest, Md5};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

use crate::error::EntitlementError;
use crate::payment_event::PaymentEvent;

pub const SIGNATURE_FIELD: &str = "signature";

const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

pub fn url_encode(value: &str) -> String {
    utf8_percent_encode(value, URI_COMPONENT)
        .to_string()
        .replace("%20", "+")
}

/// Builds the exact byte string the gateway hashes.
pub fn param_string<'a, I>(fields: I, passphrase: &str) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut parts: Vec<String> = fields
        .into_iter()
        .filter(|(name, value)| *name != SIGNATURE_FIELD && !value.is_empty())
        .map(|(name, value)| format!("{name}={}", url_encode(value.trim())))
        .collect();
    parts.push(format!("passphrase={}", url_encode(passphrase.trim())));
    parts.join("&")
}

/// Lowercase hex MD5 of the parameter string.
pub fn compute_signature<'a, I>(fields: I, passphrase: &str) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let digest = Md5::digest(param_string(fields, passphrase).as_bytes());
    hex::encode(digest)
}

/// Checks the signature attached to a notification. Always enforced.
pub fn verify_event(event: &PaymentEvent, passphrase: &str) -> Result<(), EntitlementError> {
    let received = event
        .raw_fields
        .get(SIGNATURE_FIELD)
        .ok_or(EntitlementError::SignatureMismatch)?;

    let expected = compute_signature(event.raw_fields.iter(), passphrase);
    if expected.as_bytes() == received.as_bytes() {
        Ok(())
    } else {
        Err(EntitlementError::SignatureMismatch)
    }
}
