use actix_web::{web, HttpRequest, HttpResponse};
use serde_json::json;

use crate::{dto::StatsResponse, errors::ApiError, handlers::authorize, router::AppState};

pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Local::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Process-wide usage; the windows are shared by every tenant.
pub async fn rate_limit_stats(req: HttpRequest, state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    authorize(&req, &state)?;
    Ok(HttpResponse::Ok().json(StatsResponse {
        success: true,
        rate_limit_stats: state.governance.tracker.snapshot(),
    }))
}
