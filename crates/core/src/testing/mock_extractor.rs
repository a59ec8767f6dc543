//! Mock text extraction service.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::faults::{fault_controls, Faults};
use crate::providers::{ExtractedDocument, ExtractedPage, ProviderError, TextExtractor};

/// PNG signature, enough for a preview placeholder.
pub const MOCK_PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// Mock implementation of [`TextExtractor`].
///
/// Unknown URLs extract to a two-page document whose text mentions the URL,
/// with a preview image.
#[derive(Debug, Default)]
pub struct MockExtractor {
    documents: RwLock<HashMap<String, ExtractedDocument>>,
    faults: Faults,
}

impl MockExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return `document` when `url` is extracted.
    pub async fn set_document(&self, url: &str, document: ExtractedDocument) {
        self.documents
            .write()
            .await
            .insert(url.to_string(), document);
    }

    /// The document produced for a URL with no configured response.
    pub fn default_document(url: &str) -> ExtractedDocument {
        let pages: Vec<ExtractedPage> = (1..=2)
            .map(|page| {
                let text = format!(
                    "Page {} of the document at {}. It covers quarterly results and plans.",
                    page, url
                );
                ExtractedPage {
                    page,
                    tokens: (text.len() as u64).div_ceil(4),
                    text,
                }
            })
            .collect();
        let total_tokens = pages.iter().map(|p| p.tokens).sum();

        ExtractedDocument {
            title: Some("Quarterly Report".to_string()),
            mime_type: Some("application/pdf".to_string()),
            pages,
            total_tokens,
            preview: Some(MOCK_PNG.to_vec()),
        }
    }
}

fault_controls!(MockExtractor);

#[async_trait]
impl TextExtractor for MockExtractor {
    async fn extract(&self, url: &str) -> Result<ExtractedDocument, ProviderError> {
        self.faults.on_call().await?;
        let configured = self.documents.read().await.get(url).cloned();
        Ok(configured.unwrap_or_else(|| Self::default_document(url)))
    }
}
