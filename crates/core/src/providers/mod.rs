//! External collaborators used by stage handlers.
//!
//! Each collaborator sits behind a trait so handlers can be exercised with
//! the mocks in [`crate::testing`]. Real clients:
//!
//! - [`OpenAiClient`]: embeddings, completions, speech and images over an
//!   OpenAI-compatible HTTP API
//! - [`HttpTextExtractor`]: document text extraction service
//! - [`FsObjectStorage`]: local filesystem object storage
//! - [`SqliteVectorIndex`]: embedding storage keyed by content chunk

mod config;
mod error;
mod extractor;
mod fs_storage;
mod openai;
mod sqlite_vectors;
mod traits;
mod unconfigured;

use std::sync::Arc;

pub use config::{ExtractorConfig, OpenAiConfig, ProvidersConfig, StorageConfig};
pub use error::ProviderError;
pub use extractor::HttpTextExtractor;
pub use fs_storage::FsObjectStorage;
pub use openai::OpenAiClient;
pub use sqlite_vectors::SqliteVectorIndex;
pub use traits::{
    CompletionProvider, CompletionRequest, CompletionResponse, EmbeddingBatch, EmbeddingProvider,
    ExtractedDocument, ExtractedPage, ImageGenerator, ObjectStorage, SpeechSynthesizer,
    TextExtractor, TokenUsage, VectorIndex, VectorRecord,
};
pub use unconfigured::UnconfiguredProvider;

/// The full set of collaborators handed to stage handlers.
#[derive(Clone)]
pub struct Providers {
    pub extractor: Arc<dyn TextExtractor>,
    pub embeddings: Arc<dyn EmbeddingProvider>,
    pub completions: Arc<dyn CompletionProvider>,
    pub speech: Arc<dyn SpeechSynthesizer>,
    pub images: Arc<dyn ImageGenerator>,
    pub storage: Arc<dyn ObjectStorage>,
    pub vectors: Arc<dyn VectorIndex>,
}

impl Providers {
    /// Build real clients from configuration. Missing sections resolve to
    /// [`UnconfiguredProvider`].
    pub fn from_config(config: &ProvidersConfig, vectors: Arc<dyn VectorIndex>) -> Self {
        let extractor: Arc<dyn TextExtractor> = match &config.extractor {
            Some(c) => Arc::new(HttpTextExtractor::new(c)),
            None => Arc::new(UnconfiguredProvider::new("extractor")),
        };

        let storage: Arc<dyn ObjectStorage> = Arc::new(FsObjectStorage::new(&config.storage));

        match &config.openai {
            Some(c) => {
                let openai = Arc::new(OpenAiClient::new(c.clone()));
                Self {
                    extractor,
                    embeddings: openai.clone(),
                    completions: openai.clone(),
                    speech: openai.clone(),
                    images: openai,
                    storage,
                    vectors,
                }
            }
            None => {
                let missing = Arc::new(UnconfiguredProvider::new("openai"));
                Self {
                    extractor,
                    embeddings: missing.clone(),
                    completions: missing.clone(),
                    speech: missing.clone(),
                    images: missing,
                    storage,
                    vectors,
                }
            }
        }
    }
}
