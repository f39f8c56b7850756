//! # Authentication
//!
//! Operator bearer authentication for the management routes, and the shared
//! secret check used by the ERP webhook. Both compare tokens in constant time.

use std::sync::Arc;

use axum::{
    extract::{FromRef, FromRequestParts, Request, State},
    http::{HeaderMap, header::AUTHORIZATION, request::Parts},
    middleware::Next,
    response::Response,
};
use subtle::ConstantTimeEq;

use crate::config::AppConfig;
use crate::error::{ApiError, unauthorized, unauthorized_with_trace_id};
use crate::server::AppState;
use crate::telemetry::TraceContext;

/// Marker type for authenticated operator requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperatorAuth;

impl FromRef<AppState> for Arc<AppConfig> {
    fn from_ref(app_state: &AppState) -> Self {
        Arc::clone(&app_state.config)
    }
}

/// Authentication middleware that validates operator bearer tokens
pub async fn auth_middleware(
    State(config): State<Arc<AppConfig>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let trace_id = request
        .extensions()
        .get::<TraceContext>()
        .map(|ctx| ctx.trace_id.clone());

    let token = extract_bearer_token(request.headers(), trace_id)?;
    if !matches_any(token, &config.operator_tokens) {
        return Err(unauthorized(Some("Invalid bearer token")));
    }

    tracing::debug!("Authenticated operator request");
    request.extensions_mut().insert(OperatorAuth);

    Ok(next.run(request).await)
}

/// Checks the webhook's `Authorization: Bearer <secret>` header.
///
/// A missing secret in configuration rejects every delivery rather than
/// accepting unauthenticated ones.
pub fn verify_webhook_secret(config: &AppConfig, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(secret) = config.webhook_secret.as_deref().filter(|s| !s.is_empty()) else {
        tracing::warn!("Webhook delivery rejected: no webhook secret configured");
        return Err(unauthorized(Some("Webhook authentication is not configured")));
    };

    let token = extract_bearer_token(headers, None)?;
    if bool::from(token.as_bytes().ct_eq(secret.as_bytes())) {
        Ok(())
    } else {
        Err(unauthorized(Some("Invalid webhook secret")))
    }
}

fn matches_any(token: &str, candidates: &[String]) -> bool {
    // Every candidate is compared so timing does not reveal which one matched.
    candidates.iter().fold(false, |found, configured| {
        let equal: bool = token.as_bytes().ct_eq(configured.as_bytes()).into();
        found | equal
    })
}

fn extract_bearer_token(headers: &HeaderMap, trace_id: Option<String>) -> Result<&str, ApiError> {
    let reject = |message: &str| match trace_id.clone() {
        Some(trace_id) => unauthorized_with_trace_id(Some(message), trace_id),
        None => unauthorized(Some(message)),
    };

    let header = headers
        .get(AUTHORIZATION)
        .ok_or_else(|| reject("Missing Authorization header"))?
        .to_str()
        .map_err(|_| reject("Invalid Authorization header"))?;

    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| reject("Authorization header must use Bearer scheme"))
}

impl<S> FromRequestParts<S> for OperatorAuth
where
    Arc<AppConfig>: FromRef<S>,
    S: Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<OperatorAuth>()
            .copied()
            .ok_or_else(|| unauthorized(Some("Operator authentication required")))
    }
}
