// src/api/auth.rs

use actix_web::body::MessageBody;
use actix_web::dev::{Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::http::header::{HeaderMap, AUTHORIZATION};
use actix_web::{web, Error, HttpMessage};
use chrono::{Duration, Utc};
use futures_util::future::{ready, LocalBoxFuture, Ready};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::task::{Context, Poll};

use crate::error::EntitlementError;
use crate::AppState;

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    email: Option<String>,
    exp: usize,
}

/// Verified caller identity, placed in request extensions by [`JwtMiddleware`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub uid: String,
    pub email: Option<String>,
}

pub fn issue_token(identity: &Identity, secret: &str, ttl: Duration) -> Result<String, jsonwebtoken::errors::Error> {
    let expiration = (Utc::now() + ttl).timestamp().max(0) as usize;

    let claims = Claims {
        sub: identity.uid.clone(),
        email: identity.email.clone(),
        exp: expiration,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_ref()),
    )
}

pub fn verify_token(token: &str, secret: &str) -> Result<Identity, EntitlementError> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_ref()),
        &Validation::default(),
    )
    .map_err(|e| EntitlementError::Unauthorized(format!("invalid token: {e}")))?;

    if data.claims.sub.trim().is_empty() {
        return Err(EntitlementError::Unauthorized("token has no subject".to_string()));
    }

    Ok(Identity {
        uid: data.claims.sub,
        email: data.claims.email,
    })
}

/// Reads and verifies `Authorization: Bearer <jwt>`.
pub fn bearer_identity(headers: &HeaderMap, secret: &str) -> Result<Identity, EntitlementError> {
    let token = headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or_else(|| {
            EntitlementError::Unauthorized("missing or invalid Authorization header".to_string())
        })?;

    verify_token(token.trim(), secret)
}

/// Middleware that:
/// - takes `Authorization: Bearer <jwt>`
/// - validates the JWT with the secret from `AppState`
/// - puts the [`Identity`] into `req.extensions_mut()`
pub struct JwtMiddleware;

impl<S, B> Transform<S, ServiceRequest> for JwtMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = JwtMiddlewareInner<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(JwtMiddlewareInner { service }))
    }
}

pub struct JwtMiddlewareInner<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for JwtMiddlewareInner<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(cx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let verified = match req.app_data::<web::Data<AppState>>() {
            Some(state) => bearer_identity(req.headers(), &state.jwt_secret),
            None => {
                return Box::pin(async move {
                    Err(actix_web::error::ErrorInternalServerError("app state not configured"))
                })
            }
        };

        match verified {
            Ok(identity) => {
                req.extensions_mut().insert(identity);
                let fut = self.service.call(req);
                Box::pin(async move { fut.await })
            }
            Err(e) => Box::pin(async move { Err(e.into()) }),
        }
    }
}
