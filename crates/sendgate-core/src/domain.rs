use std::fmt;

use serde::Serialize;
use sha2::{Digest, Sha256};

const MIN_DESTINATION_DIGITS: usize = 8;
const MAX_DESTINATION_DIGITS: usize = 15;
const MIN_TENANT_DIGITS: usize = 10;

/// Input rejected before any governance state is touched.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Invalid phone number format: {0}")]
    InvalidDestination(String),

    #[error("At least one of message or media is required")]
    MissingContent,

    #[error("Invalid client id: {0}. Must be numeric with at least 10 digits")]
    InvalidTenant(String),
}

/// Canonical international-format phone identifier (`+<digits>`).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Destination(String);

impl Destination {
    /// Normalize user input into a destination.
    ///
    /// Accepts `+201061261991`, `201061261991`, `201061261991@c.us` and the
    /// usual visual separators (spaces, dashes, dots, parentheses).
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let invalid = || ValidationError::InvalidDestination(raw.trim().to_string());

        let trimmed = raw.trim();
        let without_suffix = trimmed.split('@').next().unwrap_or_default();
        let without_plus = without_suffix
            .strip_prefix('+')
            .unwrap_or(without_suffix);

        let digits: String = without_plus
            .chars()
            .filter(|c| !matches!(c, ' ' | '-' | '.' | '(' | ')'))
            .collect();

        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }
        if digits.starts_with('0') {
            return Err(invalid());
        }
        if !(MIN_DESTINATION_DIGITS..=MAX_DESTINATION_DIGITS).contains(&digits.len()) {
            return Err(invalid());
        }

        Ok(Self(format!("+{digits}")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn digits(&self) -> &str {
        self.0.trim_start_matches('+')
    }

    /// Provider chat id for a one-to-one chat.
    pub fn chat_id(&self) -> ChatId {
        ChatId(format!("{}@c.us", self.digits()))
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Provider-side chat identifier (`<digits>@c.us`).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ChatId(pub String);

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Sending account: the phone number of a registered chat-session client.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let digits: String = raw
            .trim()
            .chars()
            .filter(|c| !matches!(c, '+' | ' '))
            .collect();

        if digits.len() < MIN_TENANT_DIGITS || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(ValidationError::InvalidTenant(raw.trim().to_string()));
        }
        Ok(Self(digits))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Binary media sent alongside (or instead of) a text body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MediaAttachment {
    pub data: Vec<u8>,
    pub mime_type: String,
    pub file_name: Option<String>,
}

/// What gets sent. At least one of `text` or `media` must be present.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MessageContent {
    pub text: Option<String>,
    pub media: Option<MediaAttachment>,
}

impl MessageContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            media: None,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let has_text = self.text.as_deref().is_some_and(|t| !t.trim().is_empty());
        if has_text || self.media.is_some() {
            Ok(())
        } else {
            Err(ValidationError::MissingContent)
        }
    }

    /// Text body, or `None` when it is absent or blank.
    pub fn body(&self) -> Option<&str> {
        self.text.as_deref().filter(|t| !t.trim().is_empty())
    }

    /// Stable hash of destination + text, used to spot duplicate sends in history.
    pub fn fingerprint(&self, destination: &Destination) -> String {
        let mut h = Sha256::new();
        h.update(destination.as_str().as_bytes());
        h.update(self.body().unwrap_or_default().as_bytes());
        let digest = h.finalize();

        use std::fmt::Write;
        let mut out = String::with_capacity(64);
        for b in digest.iter() {
            let _ = write!(&mut out, "{b:02x}");
        }
        out
    }
}

/// Whether a send is a standalone message or one member of a bulk batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SendMode {
    Single,
    Bulk,
}

impl SendMode {
    pub fn is_bulk(self) -> bool {
        matches!(self, SendMode::Bulk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destination_accepts_common_shapes() {
        for raw in [
            "+201061261991",
            "201061261991",
            "201061261991@c.us",
            " +20 106-126-1991 ",
            "(20) 1061261991",
        ] {
            let d = Destination::parse(raw).unwrap();
            assert_eq!(d.as_str(), "+201061261991", "input: {raw}");
        }
    }

    #[test]
    fn destination_rejects_malformed_input() {
        for raw in ["", "+", "abc", "+20abc1061", "1234", "0201061261991", "+1234567890123456"] {
            let err = Destination::parse(raw).unwrap_err();
            assert!(matches!(err, ValidationError::InvalidDestination(_)), "input: {raw}");
        }
    }

    #[test]
    fn destination_chat_id_drops_plus() {
        let d = Destination::parse("+201061261991").unwrap();
        assert_eq!(d.chat_id().0, "201061261991@c.us");
    }

    #[test]
    fn tenant_requires_ten_digits() {
        assert_eq!(TenantId::parse("+20 1061261991").unwrap().as_str(), "201061261991");
        assert!(TenantId::parse("12345").is_err());
        assert!(TenantId::parse("12345abcde").is_err());
    }

    #[test]
    fn content_validation_requires_text_or_media() {
        assert_eq!(
            MessageContent::default().validate(),
            Err(ValidationError::MissingContent)
        );
        assert_eq!(
            MessageContent::text("   ").validate(),
            Err(ValidationError::MissingContent)
        );
        assert!(MessageContent::text("hi").validate().is_ok());

        let media_only = MessageContent {
            text: None,
            media: Some(MediaAttachment {
                data: vec![1, 2, 3],
                mime_type: "image/png".to_string(),
                file_name: None,
            }),
        };
        assert!(media_only.validate().is_ok());
    }

    #[test]
    fn fingerprint_depends_on_destination_and_text() {
        let a = Destination::parse("+201061261991").unwrap();
        let b = Destination::parse("+201061261992").unwrap();
        let c = MessageContent::text("hello");

        assert_eq!(c.fingerprint(&a), c.fingerprint(&a));
        assert_ne!(c.fingerprint(&a), c.fingerprint(&b));
        assert_ne!(c.fingerprint(&a), MessageContent::text("bye").fingerprint(&a));
        assert_eq!(c.fingerprint(&a).len(), 64);
    }
}
