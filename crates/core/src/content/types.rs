//! Content types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const TEXT_PLAIN: &str = "text/plain";

#[derive(Debug, Error)]
pub enum ContentError {
    #[error("content not found: {0}")]
    NotFound(String),

    /// Content has neither text nor url.
    #[error("invalid content: {0}")]
    Invalid(String),

    #[error("database error: {0}")]
    Database(String),
}

/// A unit of input or output data owned by one organization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Content {
    pub id: String,
    pub orgname: String,
    pub title: String,
    pub mime_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview_image: Option<String>,
    /// Work item that produced this content, for stage outputs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub work_item_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Content {
    /// Number of characters of inline text, zero for URL content.
    pub fn text_len(&self) -> usize {
        self.text.as_deref().map(|t| t.chars().count()).unwrap_or(0)
    }

    pub fn has_text(&self) -> bool {
        self.text.as_deref().is_some_and(|t| !t.trim().is_empty())
    }
}

/// Request to create a content row.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateContentRequest {
    pub orgname: String,
    pub title: String,
    pub mime_type: String,
    pub text: Option<String>,
    pub url: Option<String>,
}

impl CreateContentRequest {
    /// Inline text content.
    pub fn text(
        orgname: impl Into<String>,
        title: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            orgname: orgname.into(),
            title: title.into(),
            mime_type: TEXT_PLAIN.to_string(),
            text: Some(text.into()),
            url: None,
        }
    }

    /// Content stored elsewhere and referenced by URL.
    pub fn url(
        orgname: impl Into<String>,
        title: impl Into<String>,
        url: impl Into<String>,
        mime_type: impl Into<String>,
    ) -> Self {
        Self {
            orgname: orgname.into(),
            title: title.into(),
            mime_type: mime_type.into(),
            text: None,
            url: Some(url.into()),
        }
    }

    pub(crate) fn validate(&self) -> Result<(), ContentError> {
        if self.text.is_none() && self.url.is_none() {
            return Err(ContentError::Invalid(
                "content needs either text or a url".to_string(),
            ));
        }
        Ok(())
    }
}

/// Best-effort mime type from a URL's file extension.
pub fn mime_type_for_url(url: &str) -> &'static str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let extension = path
        .rsplit('/')
        .next()
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase());

    match extension.as_deref() {
        Some("pdf") => "application/pdf",
        Some("txt") | Some("md") => TEXT_PLAIN,
        Some("html") | Some("htm") => "text/html",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("mp3") => "audio/mpeg",
        Some("wav") => "audio/wav",
        Some("docx") => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        _ => "application/octet-stream",
    }
}
