use actix_web::{web, HttpRequest, HttpResponse};
use chrono::Local;
use serde_json::json;

use sendgate_core::{
    domain::Destination,
    history::{Direction, StoredMessage},
};

use crate::{
    dto::SaveMessageRequest,
    errors::ApiError,
    handlers::{authorize, tenant_id},
    router::AppState,
};

/// Record a message reported by the session client (usually incoming).
///
/// History is kept per tenant, so `X-Client-Id` is required here as well.
pub async fn save_message(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<SaveMessageRequest>,
) -> Result<HttpResponse, ApiError> {
    authorize(&req, &state)?;
    let tenant = state.tenant(&tenant_id(&req)?).await?;
    let body = body.into_inner();

    let phone = body
        .phone_number
        .as_deref()
        .filter(|p| !p.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("phoneNumber required".to_string()))?;
    let contact = Destination::parse(phone).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let message = StoredMessage {
        direction: body.direction.unwrap_or(Direction::Incoming),
        body: body.message,
        mime_type: body.mime_type,
        has_media: body.media.is_some_and(|m| !m.is_empty()),
        timestamp: body.message_timestamp.unwrap_or_else(Local::now),
        ack: body.ack,
        provider_id: None,
        fingerprint: None,
    };

    let outcome = tenant.recorder.save(&contact, message).await?;
    tracing::debug!(tenant = %tenant.id, contact = %contact, new_chat = outcome.is_new_chat(), "message saved");

    Ok(HttpResponse::Ok().json(json!({ "success": true })))
}

#[cfg(test)]
mod tests {
    use actix_web::{test, web, App};
    use serde_json::{json, Value};

    use sendgate_core::{domain::Destination, history::Direction};

    use crate::{
        handlers::test_support::{fast_config, state},
        router::configure,
    };

    #[actix_web::test]
    async fn saves_incoming_message_into_tenant_history() {
        let (st, _) = state(fast_config());
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(st.clone()))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/save-message")
            .insert_header(("X-Client-Id", "2010000000"))
            .set_json(json!({
                "phoneNumber": "201061261991",
                "message": "is this still available?",
                "messageTimestamp": "2026-03-10T11:58:00+00:00"
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 200);
        let v: Value = test::read_body_json(resp).await;
        assert_eq!(v["success"], true);

        let tenant = st
            .tenant(&sendgate_core::domain::TenantId::parse("2010000000").unwrap())
            .await
            .unwrap();
        let chat = tenant
            .recorder
            .history()
            .chat(&Destination::parse("+201061261991").unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(chat.last_message, "is this still available?");
        assert_eq!(chat.messages[0].direction, Direction::Incoming);
    }

    #[actix_web::test]
    async fn rejects_missing_or_bad_phone() {
        let (st, _) = state(fast_config());
        let app = test::init_service(App::new().app_data(web::Data::new(st)).configure(configure)).await;

        for body in [json!({ "message": "x" }), json!({ "phoneNumber": "12", "message": "x" })] {
            let req = test::TestRequest::post()
                .uri("/save-message")
                .insert_header(("X-Client-Id", "2010000000"))
                .set_json(body)
                .to_request();
            assert_eq!(test::call_service(&app, req).await.status(), 400);
        }
    }
}
