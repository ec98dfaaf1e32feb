use axum::{
    body::Body,
    extract::State,
    http::{header, Request},
    middleware::Next,
    response::Response,
};

use crate::error::AppError;

use super::AppState;

/// Key presented by the caller: `X-API-Key`, else `Authorization: Bearer`.
fn presented_key(req: &Request<Body>) -> Option<&str> {
    let headers = req.headers();
    headers
        .get("X-API-Key")
        .or_else(|| headers.get(header::AUTHORIZATION))
        .and_then(|v| v.to_str().ok())
        .map(|v| v.strip_prefix("Bearer ").unwrap_or(v).trim())
        .filter(|v| !v.is_empty())
}

/// Guards `/api/v1`. Open when `api.key` is unset.
pub async fn api_key_auth(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let Some(expected) = state.settings.api.key.as_deref() else {
        return Ok(next.run(req).await);
    };

    match presented_key(&req) {
        Some(key) if key == expected => Ok(next.run(req).await),
        Some(_) => {
            tracing::warn!(path = %req.uri().path(), "Rejected request with wrong API key");
            Err(AppError::Unauthorized("invalid API key".to_string()))
        }
        None => Err(AppError::Unauthorized("missing API key".to_string())),
    }
}
