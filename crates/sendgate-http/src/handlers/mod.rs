//! Request handlers.
//!
//! Every handler except `/health` checks the API key first; the send and
//! history handlers then resolve the tenant from `X-Client-Id`. Send
//! bodies may be JSON or multipart form data (see [`crate::extract`]).

use actix_web::{http::header, HttpRequest};

use sendgate_core::domain::TenantId;

use crate::{errors::ApiError, router::AppState};

pub mod history;
pub mod send;
pub mod stats;

pub const CLIENT_ID_HEADER: &str = "X-Client-Id";

/// No-op when no API key is configured.
pub(crate) fn authorize(req: &HttpRequest, state: &AppState) -> Result<(), ApiError> {
    let Some(expected) = state.cfg.api_key.as_deref() else {
        return Ok(());
    };
    let presented = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);

    match presented {
        Some(key) if key == expected => Ok(()),
        _ => {
            tracing::warn!(path = req.path(), "rejected request with missing or invalid api key");
            Err(ApiError::Unauthorized)
        }
    }
}

pub(crate) fn tenant_id(req: &HttpRequest) -> Result<TenantId, ApiError> {
    let raw = req
        .headers()
        .get(CLIENT_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::BadRequest(format!("{CLIENT_ID_HEADER} header is required")))?;
    TenantId::parse(raw).map_err(|e| ApiError::BadRequest(e.to_string()))
}
