// src/error.rs

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;

use crate::tiers::Tier;

/// Failures of the entitlement store, classified so callers can pick a path.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The writer's identity lacks privilege for the operation.
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    /// Timeout or transport failure. Retryable.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store error: {0}")]
    Backend(String),
}

/// SQLSTATE for insufficient_privilege.
const PG_INSUFFICIENT_PRIVILEGE: &str = "42501";

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Database(db)
                if db.code().as_deref() == Some(PG_INSUFFICIENT_PRIVILEGE) =>
            {
                StoreError::PermissionDenied(db.message().to_string())
            }
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::WorkerCrashed => StoreError::Unavailable(e.to_string()),
            _ => StoreError::Backend(e.to_string()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EntitlementError {
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
    #[error("signature mismatch")]
    SignatureMismatch,
    #[error("gateway rejected notification: {0}")]
    GatewayRejected(String),
    #[error("gateway unavailable: {0}")]
    GatewayUnavailable(String),
    #[error("invalid correlation: {0}")]
    InvalidCorrelation(String),
    #[error("store permission denied: {0}")]
    StorePermissionDenied(String),
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("store error: {0}")]
    Store(String),
    #[error("persisted tier {persisted:?} does not match requested {requested}")]
    VerificationMismatchAfterWrite {
        requested: Tier,
        persisted: Option<Tier>,
    },
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
}

impl From<StoreError> for EntitlementError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::PermissionDenied(m) => EntitlementError::StorePermissionDenied(m),
            StoreError::Unavailable(m) => EntitlementError::StoreUnavailable(m),
            StoreError::Backend(m) => EntitlementError::Store(m),
        }
    }
}

impl EntitlementError {
    /// Machine-readable code returned to clients.
    pub fn code(&self) -> &'static str {
        match self {
            EntitlementError::MalformedPayload(_) => "malformed_payload",
            EntitlementError::SignatureMismatch => "signature_mismatch",
            EntitlementError::GatewayRejected(_) => "gateway_rejected",
            EntitlementError::GatewayUnavailable(_) => "gateway_unavailable",
            EntitlementError::InvalidCorrelation(_) => "invalid_correlation",
            EntitlementError::StorePermissionDenied(_) => "admin_permissions_missing",
            EntitlementError::StoreUnavailable(_) => "store_unavailable",
            EntitlementError::Store(_) => "store_error",
            EntitlementError::VerificationMismatchAfterWrite { .. } => "verification_mismatch",
            EntitlementError::Unauthorized(_) => "unauthorized",
            EntitlementError::Forbidden(_) => "forbidden",
        }
    }

    /// Whether a sender should retry the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EntitlementError::StoreUnavailable(_)
                | EntitlementError::GatewayUnavailable(_)
                | EntitlementError::StorePermissionDenied(_)
                | EntitlementError::Store(_)
        )
    }
}

impl ResponseError for EntitlementError {
    fn status_code(&self) -> StatusCode {
        match self {
            EntitlementError::MalformedPayload(_) | EntitlementError::InvalidCorrelation(_) => {
                StatusCode::BAD_REQUEST
            }
            EntitlementError::SignatureMismatch | EntitlementError::GatewayRejected(_) => {
                StatusCode::BAD_REQUEST
            }
            EntitlementError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            EntitlementError::Forbidden(_) => StatusCode::FORBIDDEN,
            // The manual path hands this back to a client that owns a fallback write.
            EntitlementError::StorePermissionDenied(_) => StatusCode::CONFLICT,
            EntitlementError::StoreUnavailable(_) | EntitlementError::GatewayUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            EntitlementError::Store(_) | EntitlementError::VerificationMismatchAfterWrite { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        let message = match self {
            // Backend details stay in the logs.
            EntitlementError::Store(_) => "internal error".to_string(),
            other => other.to_string(),
        };
        HttpResponse::build(self.status_code()).json(json!({
            "error": message,
            "code": self.code(),
            "retryable": self.is_retryable(),
        }))
    }
}
