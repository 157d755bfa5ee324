//! Send request bodies, accepted either as JSON or as multipart form data.
//!
//! Form uploads carry the media as a `file` part; JSON carries it inline
//! as base64. Both end up in the same request DTO.

use std::collections::HashMap;

use actix_multipart::{Field, Multipart};
use actix_web::{dev::Payload, http::header, web, FromRequest, HttpRequest};
use futures_util::{future::LocalBoxFuture, StreamExt};
use serde::de::DeserializeOwned;

use sendgate_core::domain::MediaAttachment;

use crate::{errors::ApiError, router::MAX_BODY_BYTES};

const FILE_FIELD: &str = "file";
const DEFAULT_UPLOAD_MIME: &str = "application/octet-stream";

/// Text fields plus the optional uploaded file of a multipart body.
#[derive(Debug, Default)]
pub struct FormData {
    fields: HashMap<String, Vec<String>>,
    pub file: Option<MediaAttachment>,
}

impl FormData {
    pub async fn read(mut payload: Multipart) -> Result<Self, ApiError> {
        let mut form = FormData::default();
        let mut budget = MAX_BODY_BYTES;

        while let Some(item) = payload.next().await {
            let mut field =
                item.map_err(|e| ApiError::BadRequest(format!("Invalid multipart data: {e}")))?;
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };

            if name == FILE_FIELD {
                let file_name = field
                    .content_disposition()
                    .and_then(|cd| cd.get_filename())
                    .map(str::to_string);
                let mime_type = field
                    .content_type()
                    .map(|m| m.essence_str().to_string())
                    .unwrap_or_else(|| DEFAULT_UPLOAD_MIME.to_string());
                let data = read_field(&mut field, &mut budget).await?;
                if !data.is_empty() {
                    form.file = Some(MediaAttachment {
                        data,
                        mime_type,
                        file_name,
                    });
                }
            } else {
                let data = read_field(&mut field, &mut budget).await?;
                let value = String::from_utf8(data)
                    .map_err(|_| ApiError::BadRequest(format!("Field {name} is not valid UTF-8")))?;
                form.fields.entry(name).or_default().push(value);
            }
        }

        Ok(form)
    }

    /// Last non-blank value of a text field.
    pub fn text(&self, name: &str) -> Option<String> {
        self.values(name)
            .rev()
            .find(|v| !v.trim().is_empty())
            .map(str::to_string)
    }

    pub fn values(&self, name: &str) -> impl DoubleEndedIterator<Item = &str> {
        self.fields
            .get(name)
            .into_iter()
            .flatten()
            .map(String::as_str)
    }
}

async fn read_field(field: &mut Field, budget: &mut usize) -> Result<Vec<u8>, ApiError> {
    let mut data = Vec::new();
    while let Some(chunk) = field.next().await {
        let bytes =
            chunk.map_err(|e| ApiError::BadRequest(format!("Error reading multipart field: {e}")))?;
        *budget = budget
            .checked_sub(bytes.len())
            .ok_or_else(|| ApiError::BadRequest("Multipart body is too large".to_string()))?;
        data.extend_from_slice(&bytes);
    }
    Ok(data)
}

/// Builds a request DTO from form fields.
pub trait FromForm: Sized {
    fn from_form(form: FormData) -> Result<Self, ApiError>;
}

/// Extractor for a send request body in either encoding.
///
/// `multipart/form-data` goes through [`FromForm`]; anything else is
/// parsed as JSON under the app's `JsonConfig`.
#[derive(Debug)]
pub struct SendBody<T>(pub T);

impl<T> SendBody<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

fn is_multipart(req: &HttpRequest) -> bool {
    req.headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.trim_start().to_ascii_lowercase().starts_with("multipart/form-data"))
}

impl<T> FromRequest for SendBody<T>
where
    T: DeserializeOwned + FromForm + 'static,
{
    type Error = actix_web::Error;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, payload: &mut Payload) -> Self::Future {
        if is_multipart(req) {
            let multipart = Multipart::new(req.headers(), payload.take());
            Box::pin(async move {
                let form = FormData::read(multipart).await?;
                Ok(SendBody(T::from_form(form)?))
            })
        } else {
            let json = web::Json::<T>::from_request(req, payload);
            Box::pin(async move { Ok(SendBody(json.await?.into_inner())) })
        }
    }
}
