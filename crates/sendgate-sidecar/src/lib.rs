//! Chat-session sidecar adapter.
//!
//! The sidecar owns the messaging sessions (one per tenant) and exposes a
//! small HTTP API; this crate implements the core's `SendCapability` port
//! against it.

use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

use sendgate_core::{
    domain::{ChatId, MessageContent, TenantId},
    errors::Error,
    messaging::{port::SendCapability, types::SendReceipt},
    Result,
};

/// Longest provider error body kept in an error message.
const MAX_ERROR_BODY: usize = 200;

#[derive(Clone, Debug)]
pub struct SidecarClient {
    base_url: String,
    http: reqwest::Client,
}

impl SidecarClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("sidecar http client: {e}")))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Capability bound to one tenant's session.
    pub fn for_tenant(&self, tenant: TenantId) -> TenantSidecar {
        TenantSidecar {
            client: self.clone(),
            tenant,
        }
    }
}

#[derive(Clone, Debug)]
pub struct TenantSidecar {
    client: SidecarClient,
    tenant: TenantId,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MediaBody<'a> {
    data: String,
    mime_type: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    file_name: Option<&'a str>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SendBody<'a> {
    chat_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    caption: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    media: Option<MediaBody<'a>>,
}

impl<'a> SendBody<'a> {
    fn new(chat_id: &'a ChatId, content: &'a MessageContent) -> Self {
        let body = content.body();
        match &content.media {
            Some(m) => Self {
                chat_id: &chat_id.0,
                text: None,
                caption: body,
                media: Some(MediaBody {
                    data: STANDARD.encode(&m.data),
                    mime_type: &m.mime_type,
                    file_name: m.file_name.as_deref(),
                }),
            },
            None => Self {
                chat_id: &chat_id.0,
                text: body,
                caption: None,
                media: None,
            },
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LabelBody<'a> {
    chat_id: &'a str,
    label_ids: [&'a str; 1],
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct SendResponse {
    #[serde(default)]
    id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LabelChatsResponse {
    #[serde(default)]
    chat_ids: Vec<String>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: String,
}

impl TenantSidecar {
    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/clients/{}/{path}",
            self.client.base_url,
            self.tenant.as_str()
        )
    }

    /// `labels/<label>/chats`, with the label percent-encoded.
    fn label_chats_url(&self, label: &str) -> Result<reqwest::Url> {
        let mut url = reqwest::Url::parse(&self.url("labels"))
            .map_err(|e| Error::Config(format!("invalid sidecar url: {e}")))?;
        url.path_segments_mut()
            .map_err(|()| Error::Config(format!("sidecar url cannot be a base: {}", self.client.base_url)))?
            .push(label)
            .push("chats");
        Ok(url)
    }

    async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<reqwest::Response> {
        let req = self.client.http.post(self.url(path)).json(body);
        self.execute(req).await
    }

    async fn execute(&self, req: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let resp = req
            .send()
            .await
            .map_err(|e| Error::External(format!("sidecar request error: {e}")))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let text = resp.text().await.unwrap_or_default();
        let detail = serde_json::from_str::<ErrorResponse>(&text)
            .map(|e| e.error)
            .unwrap_or(text);
        Err(Error::Provider(format!(
            "{status} {}",
            detail.chars().take(MAX_ERROR_BODY).collect::<String>()
        )))
    }
}

#[async_trait]
impl SendCapability for TenantSidecar {
    async fn send(&self, chat_id: &ChatId, content: &MessageContent) -> Result<SendReceipt> {
        let resp = self.post("messages", &SendBody::new(chat_id, content)).await?;

        // An empty or non-JSON success body still counts as delivered.
        let parsed: SendResponse = resp.json().await.unwrap_or_default();
        tracing::debug!(tenant = %self.tenant, chat_id = %chat_id, id = ?parsed.id, "sidecar accepted message");
        Ok(SendReceipt {
            message_id: parsed.id,
        })
    }

    async fn assign_label(&self, chat_id: &ChatId, label: &str) -> Result<()> {
        self.post(
            "labels",
            &LabelBody {
                chat_id: &chat_id.0,
                label_ids: [label],
            },
        )
        .await?;
        Ok(())
    }

    async fn chats_with_label(&self, label: &str) -> Result<Vec<ChatId>> {
        let url = self.label_chats_url(label)?;
        let resp = self.execute(self.client.http.get(url)).await?;
        let parsed: LabelChatsResponse = resp
            .json()
            .await
            .map_err(|e| Error::External(format!("sidecar label chats: {e}")))?;
        tracing::debug!(tenant = %self.tenant, label, chats = parsed.chat_ids.len(), "sidecar listed label chats");
        Ok(parsed.chat_ids.into_iter().map(ChatId).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sendgate_core::domain::{Destination, MediaAttachment};
    use serde_json::json;
    use wiremock::{
        matchers::{body_json, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    async fn sidecar(server: &MockServer) -> TenantSidecar {
        SidecarClient::new(format!("{}/", server.uri()), Duration::from_secs(5))
            .unwrap()
            .for_tenant(TenantId::parse("2010612619").unwrap())
    }

    fn chat() -> ChatId {
        Destination::parse("+201061261991").unwrap().chat_id()
    }

    #[tokio::test]
    async fn sends_text_and_returns_message_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/clients/2010612619/messages"))
            .and(body_json(json!({ "chatId": "201061261991@c.us", "text": "hello" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "ABC123" })))
            .expect(1)
            .mount(&server)
            .await;

        let receipt = sidecar(&server)
            .await
            .send(&chat(), &MessageContent::text("hello"))
            .await
            .unwrap();
        assert_eq!(receipt.message_id.as_deref(), Some("ABC123"));
    }

    #[tokio::test]
    async fn media_is_base64_with_text_as_caption() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/clients/2010612619/messages"))
            .and(body_json(json!({
                "chatId": "201061261991@c.us",
                "caption": "look",
                "media": { "data": "AQID", "mimeType": "image/png", "fileName": "a.png" }
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let content = MessageContent {
            text: Some("look".to_string()),
            media: Some(MediaAttachment {
                data: vec![1, 2, 3],
                mime_type: "image/png".to_string(),
                file_name: Some("a.png".to_string()),
            }),
        };
        let receipt = sidecar(&server).await.send(&chat(), &content).await.unwrap();
        assert_eq!(receipt.message_id, None);
    }

    #[tokio::test]
    async fn non_success_becomes_provider_error_with_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/clients/2010612619/messages"))
            .respond_with(
                ResponseTemplate::new(429).set_body_json(json!({ "error": "rate limit reached" })),
            )
            .mount(&server)
            .await;

        let err = sidecar(&server)
            .await
            .send(&chat(), &MessageContent::text("hello"))
            .await
            .unwrap_err();
        match err {
            Error::Provider(msg) => {
                assert!(msg.starts_with("429"), "{msg}");
                assert!(msg.contains("rate limit reached"), "{msg}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn plain_text_error_body_is_kept() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("No LID for user"))
            .mount(&server)
            .await;

        let err = sidecar(&server)
            .await
            .send(&chat(), &MessageContent::text("hello"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("No LID for user"));
    }

    #[tokio::test]
    async fn assigns_label() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/clients/2010612619/labels"))
            .and(body_json(json!({ "chatId": "201061261991@c.us", "labelIds": ["7"] })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        sidecar(&server).await.assign_label(&chat(), "7").await.unwrap();
    }

    #[tokio::test]
    async fn lists_chats_with_label() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/clients/2010612619/labels/7/chats"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "chatIds": ["201061261991@c.us", "201000000002@c.us"]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let chats = sidecar(&server).await.chats_with_label("7").await.unwrap();
        assert_eq!(
            chats,
            vec![
                ChatId("201061261991@c.us".to_string()),
                ChatId("201000000002@c.us".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn label_is_percent_encoded_and_errors_surface() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/clients/2010612619/labels/vip%20clients/chats"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({ "error": "label not found" })))
            .expect(1)
            .mount(&server)
            .await;

        let err = sidecar(&server)
            .await
            .chats_with_label("vip clients")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Provider(ref msg) if msg.starts_with("404") && msg.contains("label not found")));
    }
}
