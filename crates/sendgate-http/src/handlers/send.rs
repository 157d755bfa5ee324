use actix_web::{http::StatusCode, web, HttpRequest, HttpResponse};

use sendgate_core::{
    domain::{Destination, MessageContent, SendMode},
    governance::{BulkReport, SendError, SendResult},
};

use crate::{
    dto::{ResultEntry, SendBulkRequest, SendMessageRequest, SendResponse, SendToLabelRequest},
    errors::ApiError,
    extract::SendBody,
    handlers::{authorize, tenant_id},
    router::{AppState, Tenant},
};

fn status_for(err: &SendError) -> StatusCode {
    match err {
        SendError::Validation(_) => StatusCode::BAD_REQUEST,
        SendError::AdmissionDenied { .. } => StatusCode::TOO_MANY_REQUESTS,
        SendError::PolicyBlocked => StatusCode::FORBIDDEN,
        SendError::PermanentProvider { .. } | SendError::RetriesExhausted { .. } => StatusCode::BAD_GATEWAY,
    }
}

async fn record(tenant: &Tenant, result: &SendResult, content: &MessageContent) {
    let (true, Some(receipt)) = (result.success, result.receipt.as_ref()) else {
        return;
    };
    if let Ok(dest) = Destination::parse(&result.destination) {
        tenant.recorder.record_outgoing(&dest, content, receipt).await;
    }
}

pub async fn send_message(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: SendBody<SendMessageRequest>,
) -> Result<HttpResponse, ApiError> {
    authorize(&req, &state)?;
    let tenant = state.tenant(&tenant_id(&req)?).await?;
    let (phone, content) = body.into_inner().into_parts()?;

    let result = tenant
        .orchestrator
        .send(&phone, &content, SendMode::Single)
        .await;
    record(&tenant, &result, &content).await;

    let status = result.error.as_ref().map(status_for).unwrap_or(StatusCode::OK);
    let entry = ResultEntry::from(&result);
    let response = SendResponse {
        success: result.success,
        message: result.success.then(|| entry.message.clone()),
        error: result.error_message(),
        results: vec![entry],
        rate_limit_stats: tenant.orchestrator.rate_limit_stats(),
    };
    Ok(HttpResponse::build(status).json(response))
}

pub async fn send_bulk_message(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: SendBody<SendBulkRequest>,
) -> Result<HttpResponse, ApiError> {
    authorize(&req, &state)?;
    let tenant = state.tenant(&tenant_id(&req)?).await?;
    let (phones, content) = body.into_inner().into_parts()?;

    let report = tenant.orchestrator.send_bulk(&phones, &content).await?;
    Ok(bulk_response(&tenant, report, phones.len(), &content).await)
}

/// Send to every chat the tenant has tagged with a label.
///
/// Content is checked before the chats are listed; the chats then go
/// through the same governed bulk path as `/send-bulk-message`.
pub async fn send_bulk_to_label(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: SendBody<SendToLabelRequest>,
) -> Result<HttpResponse, ApiError> {
    authorize(&req, &state)?;
    let tenant = state.tenant(&tenant_id(&req)?).await?;
    let (label, content) = body.into_inner().into_parts()?;

    let chats = tenant
        .orchestrator
        .capability()
        .chats_with_label(&label)
        .await?;
    if chats.is_empty() {
        return Err(ApiError::NotFound(
            "No chats found with the specified label".to_string(),
        ));
    }
    tracing::info!(tenant = %tenant.id, label = %label, chats = chats.len(), "sending to label");

    let destinations: Vec<String> = chats.into_iter().map(|c| c.0).collect();
    let report = tenant.orchestrator.send_bulk(&destinations, &content).await?;
    Ok(bulk_response(&tenant, report, destinations.len(), &content).await)
}

async fn bulk_response(
    tenant: &Tenant,
    report: BulkReport,
    requested: usize,
    content: &MessageContent,
) -> HttpResponse {
    for result in &report.results {
        record(tenant, result, content).await;
    }

    tracing::info!(
        tenant = %tenant.id,
        requested,
        succeeded = report.succeeded(),
        failed = report.failed(),
        halted = report.halted,
        "bulk send finished"
    );

    let error = report
        .denial()
        .and_then(SendResult::error_message)
        .map(|reason| {
            if report.halted {
                format!(
                    "{reason}. Stopped after {} of {requested} destinations.",
                    report.results.len()
                )
            } else {
                reason
            }
        });

    let response = SendResponse {
        success: report.failed() == 0,
        message: Some(format!(
            "Sent {} of {requested} messages",
            report.succeeded()
        )),
        error,
        results: report.results.iter().map(ResultEntry::from).collect(),
        rate_limit_stats: report.stats,
    };
    HttpResponse::Ok().json(response)
}
