//! Placeholder client for collaborators missing from the configuration.

use async_trait::async_trait;

use super::traits::{
    CompletionProvider, CompletionRequest, CompletionResponse, EmbeddingBatch, EmbeddingProvider,
    ExtractedDocument, ImageGenerator, SpeechSynthesizer, TextExtractor,
};
use super::ProviderError;

/// Fails every call with [`ProviderError::NotConfigured`].
pub struct UnconfiguredProvider {
    name: &'static str,
}

impl UnconfiguredProvider {
    pub fn new(name: &'static str) -> Self {
        Self { name }
    }
}

#[async_trait]
impl TextExtractor for UnconfiguredProvider {
    async fn extract(&self, _url: &str) -> Result<ExtractedDocument, ProviderError> {
        Err(ProviderError::NotConfigured(self.name))
    }
}

#[async_trait]
impl EmbeddingProvider for UnconfiguredProvider {
    async fn embed(&self, _texts: &[String]) -> Result<EmbeddingBatch, ProviderError> {
        Err(ProviderError::NotConfigured(self.name))
    }
}

#[async_trait]
impl CompletionProvider for UnconfiguredProvider {
    async fn complete(
        &self,
        _request: CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        Err(ProviderError::NotConfigured(self.name))
    }
}

#[async_trait]
impl SpeechSynthesizer for UnconfiguredProvider {
    async fn synthesize(&self, _text: &str) -> Result<Vec<u8>, ProviderError> {
        Err(ProviderError::NotConfigured(self.name))
    }
}

#[async_trait]
impl ImageGenerator for UnconfiguredProvider {
    async fn generate(&self, _prompt: &str) -> Result<Vec<u8>, ProviderError> {
        Err(ProviderError::NotConfigured(self.name))
    }
}
