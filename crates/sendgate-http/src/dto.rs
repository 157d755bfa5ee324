//! Request and response bodies.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use sendgate_core::{
    domain::{MediaAttachment, MessageContent},
    governance::{
        rate_window::{RateLimitStats, WindowLimits},
        SendResult,
    },
    history::Direction,
};

use crate::{
    errors::ApiError,
    extract::{FormData, FromForm},
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaDto {
    /// Base64-encoded file contents.
    pub data: String,
    pub mime_type: String,
    #[serde(default)]
    pub file_name: Option<String>,
}

impl MediaDto {
    pub fn decode(self) -> Result<MediaAttachment, ApiError> {
        let data = STANDARD
            .decode(self.data.trim())
            .map_err(|e| ApiError::BadRequest(format!("media data is not valid base64: {e}")))?;
        Ok(MediaAttachment {
            data,
            mime_type: self.mime_type,
            file_name: self.file_name,
        })
    }
}

/// An uploaded file wins over inline media.
fn content(
    message: Option<String>,
    media: Option<MediaDto>,
    upload: Option<MediaAttachment>,
) -> Result<MessageContent, ApiError> {
    let media = match upload {
        Some(file) => Some(file),
        None => media.map(MediaDto::decode).transpose()?,
    };
    Ok(MessageContent { text: message, media })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub media: Option<MediaDto>,
    #[serde(skip)]
    pub upload: Option<MediaAttachment>,
}

impl SendMessageRequest {
    pub fn into_parts(self) -> Result<(String, MessageContent), ApiError> {
        let phone = self
            .phone_number
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| ApiError::BadRequest("Phone number is required".to_string()))?;
        Ok((phone, content(self.message, self.media, self.upload)?))
    }
}

impl FromForm for SendMessageRequest {
    fn from_form(form: FormData) -> Result<Self, ApiError> {
        Ok(Self {
            phone_number: form.text("phoneNumber"),
            message: form.text("message"),
            media: None,
            upload: form.file,
        })
    }
}

/// `"a, b"` or `["a", "b"]`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum PhoneNumbers {
    List(Vec<String>),
    Csv(String),
}

impl PhoneNumbers {
    /// Repeated form fields are a list; a single one may be comma separated.
    fn from_form(form: &FormData) -> Option<Self> {
        let mut values: Vec<String> = form.values("phoneNumbers").map(str::to_string).collect();
        match values.len() {
            0 => None,
            1 => values.pop().map(PhoneNumbers::Csv),
            _ => Some(PhoneNumbers::List(values)),
        }
    }

    pub fn into_vec(self) -> Vec<String> {
        let raw = match self {
            PhoneNumbers::List(v) => v,
            PhoneNumbers::Csv(s) => s.split(',').map(str::to_string).collect(),
        };
        raw.into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendBulkRequest {
    #[serde(default)]
    pub phone_numbers: Option<PhoneNumbers>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub media: Option<MediaDto>,
    #[serde(skip)]
    pub upload: Option<MediaAttachment>,
}

impl SendBulkRequest {
    pub fn into_parts(self) -> Result<(Vec<String>, MessageContent), ApiError> {
        let phones = self.phone_numbers.map(PhoneNumbers::into_vec).unwrap_or_default();
        Ok((phones, content(self.message, self.media, self.upload)?))
    }
}

impl FromForm for SendBulkRequest {
    fn from_form(form: FormData) -> Result<Self, ApiError> {
        Ok(Self {
            phone_numbers: PhoneNumbers::from_form(&form),
            message: form.text("message"),
            media: None,
            upload: form.file,
        })
    }
}

/// Label ids are strings on the wire, though some clients send numbers.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum LabelId {
    Text(String),
    Number(u64),
}

impl LabelId {
    fn into_string(self) -> String {
        match self {
            LabelId::Text(s) => s.trim().to_string(),
            LabelId::Number(n) => n.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendToLabelRequest {
    #[serde(default)]
    pub label_id: Option<LabelId>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub media: Option<MediaDto>,
    #[serde(skip)]
    pub upload: Option<MediaAttachment>,
}

impl SendToLabelRequest {
    /// Content is checked here, before any chats are looked up.
    pub fn into_parts(self) -> Result<(String, MessageContent), ApiError> {
        let label = self
            .label_id
            .map(LabelId::into_string)
            .filter(|l| !l.is_empty())
            .ok_or_else(|| ApiError::BadRequest("Label ID is required".to_string()))?;
        let content = content(self.message, self.media, self.upload)?;
        content
            .validate()
            .map_err(|e| ApiError::BadRequest(e.to_string()))?;
        Ok((label, content))
    }
}

impl FromForm for SendToLabelRequest {
    fn from_form(form: FormData) -> Result<Self, ApiError> {
        Ok(Self {
            label_id: form.text("labelId").map(LabelId::Text),
            message: form.text("message"),
            media: None,
            upload: form.file,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveMessageRequest {
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    /// Base64 media, stored only as a presence flag.
    #[serde(default)]
    pub media: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub message_timestamp: Option<DateTime<Local>>,
    #[serde(default)]
    pub direction: Option<Direction>,
    #[serde(default)]
    pub ack: Option<u8>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Success,
    Warning,
    Error,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultEntry {
    pub destination: String,
    pub status: EntryStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit_info: Option<WindowLimits>,
}

impl From<&SendResult> for ResultEntry {
    fn from(r: &SendResult) -> Self {
        let (status, message) = match (&r.error, &r.warning) {
            (Some(e), _) => (EntryStatus::Error, e.to_string()),
            (None, Some(w)) => (EntryStatus::Warning, w.clone()),
            (None, None) => (EntryStatus::Success, "Message sent successfully".to_string()),
        };
        Self {
            destination: r.destination.clone(),
            status,
            message,
            code: r.error.as_ref().map(|e| e.code()),
            message_id: r.receipt.as_ref().and_then(|rc| rc.message_id.clone()),
            attempts: r.attempts,
            rate_limit_info: r.rate_limit_info,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub results: Vec<ResultEntry>,
    pub rate_limit_stats: RateLimitStats,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub success: bool,
    pub rate_limit_stats: RateLimitStats,
}
