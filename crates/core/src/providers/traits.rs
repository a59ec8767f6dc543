//! Collaborator interfaces used by stage handlers.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::ProviderError;

/// One page or chunk of extracted text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedPage {
    pub page: u32,
    pub text: String,
    pub tokens: u64,
}

/// Result of a text extraction call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedDocument {
    pub title: Option<String>,
    pub mime_type: Option<String>,
    pub pages: Vec<ExtractedPage>,
    pub total_tokens: u64,
    /// Rendered preview image (PNG), when the service produced one.
    pub preview: Option<Vec<u8>>,
}

impl ExtractedDocument {
    /// All page text joined with newlines.
    pub fn text(&self) -> String {
        self.pages
            .iter()
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Trait for document text extraction services.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract(&self, url: &str) -> Result<ExtractedDocument, ProviderError>;
}

/// Embeddings for a batch of texts, in input order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmbeddingBatch {
    pub vectors: Vec<Vec<f32>>,
    pub tokens_used: u64,
}

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<EmbeddingBatch, ProviderError>;
}

/// Token usage statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Request for a completion.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    /// System prompt (instructions for the model)
    pub system: Option<String>,
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            system: None,
            prompt: prompt.into(),
            max_tokens: 1024,
            temperature: 0.0,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

/// Response from a completion.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionResponse {
    pub text: String,
    pub usage: TokenUsage,
    pub model: String,
}

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, request: CompletionRequest)
        -> Result<CompletionResponse, ProviderError>;
}

/// Trait for text-to-speech synthesis. Returns MPEG audio.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, ProviderError>;
}

/// Trait for image generation. Returns PNG bytes.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<Vec<u8>, ProviderError>;
}

/// Trait for object storage backends.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Store `bytes` under `key`, overwriting any previous object, and return
    /// its public URL.
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, ProviderError>;
}

/// A text chunk with its embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorRecord {
    pub orgname: String,
    pub content_id: String,
    pub chunk_index: u32,
    pub text: String,
    pub embedding: Vec<f32>,
}

/// Trait for vector storage. Records are keyed by `(content_id, chunk_index)`.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or replace records; returns how many were written.
    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<usize, ProviderError>;

    async fn count_for(&self, content_id: &str) -> Result<usize, ProviderError>;
}
