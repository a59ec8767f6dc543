//! HTTP client for the document text extraction service.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use super::config::ExtractorConfig;
use super::traits::{ExtractedDocument, ExtractedPage, TextExtractor};
use super::ProviderError;

/// Minimum characters per extracted chunk requested from the service.
const MIN_CHUNK_SIZE: u32 = 200;

/// Extraction service client.
///
/// Calls `GET {url}/extract?url=<document>&min_chunk_size=200`.
pub struct HttpTextExtractor {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpTextExtractor {
    pub fn new(config: &ExtractorConfig) -> Self {
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            timeout,
        }
    }

    fn request_url(&self, document_url: &str) -> String {
        format!(
            "{}/extract?url={}&min_chunk_size={}",
            self.base_url,
            urlencoding::encode(document_url),
            MIN_CHUNK_SIZE
        )
    }

    async fn fetch_preview(&self, url: &str) -> Option<Vec<u8>> {
        let response = match self.client.get(url).send().await {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                warn!(url, status = r.status().as_u16(), "Preview download failed");
                return None;
            }
            Err(e) => {
                warn!(url, error = %e, "Preview download failed");
                return None;
            }
        };
        response.bytes().await.ok().map(|b| b.to_vec())
    }
}

#[derive(Debug, Deserialize)]
struct ExtractResponse {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    mime_type: Option<String>,
    #[serde(default)]
    text_content: Vec<ExtractedPage>,
    #[serde(default)]
    total_tokens: Option<u64>,
    #[serde(default)]
    preview_url: Option<String>,
}

#[async_trait]
impl TextExtractor for HttpTextExtractor {
    async fn extract(&self, url: &str) -> Result<ExtractedDocument, ProviderError> {
        let response = self
            .client
            .get(self.request_url(url))
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(e, self.timeout))?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api { status, message });
        }

        let body: ExtractResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        let total_tokens = body
            .total_tokens
            .unwrap_or_else(|| body.text_content.iter().map(|p| p.tokens).sum());
        debug!(url, pages = body.text_content.len(), total_tokens, "Extracted document");

        let preview = match body.preview_url.as_deref() {
            Some(preview_url) => self.fetch_preview(preview_url).await,
            None => None,
        };

        Ok(ExtractedDocument {
            title: body.title,
            mime_type: body.mime_type,
            pages: body.text_content,
            total_tokens,
            preview,
        })
    }
}
