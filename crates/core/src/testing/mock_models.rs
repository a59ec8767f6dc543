//! Mock model providers: embeddings, completions, speech and images.

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::faults::{fault_controls, Faults};
use super::mock_extractor::MOCK_PNG;
use crate::providers::{
    CompletionProvider, CompletionRequest, CompletionResponse, EmbeddingBatch, EmbeddingProvider,
    ImageGenerator, ProviderError, SpeechSynthesizer, TokenUsage,
};

/// Dimension of the vectors produced by [`MockEmbeddings`].
pub const MOCK_EMBEDDING_DIM: usize = 8;

fn mock_tokens(text: &str) -> u64 {
    (text.chars().count() as u64).div_ceil(4).max(1)
}

/// Mock implementation of [`EmbeddingProvider`].
///
/// Vectors are derived from the text bytes so equal text embeds equally.
#[derive(Debug, Default)]
pub struct MockEmbeddings {
    batches: RwLock<Vec<Vec<String>>>,
    faults: Faults,
}

impl MockEmbeddings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every batch that was embedded successfully, in call order.
    pub async fn batches(&self) -> Vec<Vec<String>> {
        self.batches.read().await.clone()
    }

    fn vector_for(text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; MOCK_EMBEDDING_DIM];
        for (i, byte) in text.bytes().enumerate() {
            vector[i % MOCK_EMBEDDING_DIM] += byte as f32 / 255.0;
        }
        vector
    }
}

fault_controls!(MockEmbeddings);

#[async_trait]
impl EmbeddingProvider for MockEmbeddings {
    async fn embed(&self, texts: &[String]) -> Result<EmbeddingBatch, ProviderError> {
        self.faults.on_call().await?;
        self.batches.write().await.push(texts.to_vec());

        Ok(EmbeddingBatch {
            vectors: texts.iter().map(|t| Self::vector_for(t)).collect(),
            tokens_used: texts.iter().map(|t| mock_tokens(t)).sum(),
        })
    }
}

/// Mock implementation of [`CompletionProvider`].
#[derive(Debug)]
pub struct MockCompletions {
    response: RwLock<String>,
    prompts: RwLock<Vec<String>>,
    faults: Faults,
}

impl Default for MockCompletions {
    fn default() -> Self {
        Self {
            response: RwLock::new("A short summary of the content.".to_string()),
            prompts: RwLock::new(Vec::new()),
            faults: Faults::default(),
        }
    }
}

impl MockCompletions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Text returned by later completions.
    pub async fn set_response(&self, text: impl Into<String>) {
        *self.response.write().await = text.into();
    }

    /// Prompts of the completions served so far.
    pub async fn prompts(&self) -> Vec<String> {
        self.prompts.read().await.clone()
    }
}

fault_controls!(MockCompletions);

#[async_trait]
impl CompletionProvider for MockCompletions {
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        self.faults.on_call().await?;
        let text = self.response.read().await.clone();
        let usage = TokenUsage {
            input_tokens: mock_tokens(&request.prompt),
            output_tokens: mock_tokens(&text),
        };
        self.prompts.write().await.push(request.prompt);

        Ok(CompletionResponse {
            text,
            usage,
            model: "mock-model".to_string(),
        })
    }
}

/// Mock implementation of [`SpeechSynthesizer`]. Returns a fake MP3 frame.
#[derive(Debug, Default)]
pub struct MockSpeech {
    faults: Faults,
}

impl MockSpeech {
    pub fn new() -> Self {
        Self::default()
    }
}

fault_controls!(MockSpeech);

#[async_trait]
impl SpeechSynthesizer for MockSpeech {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, ProviderError> {
        self.faults.on_call().await?;
        let mut audio = b"ID3".to_vec();
        audio.extend_from_slice(&(text.len() as u32).to_be_bytes());
        Ok(audio)
    }
}

/// Mock implementation of [`ImageGenerator`]. Returns a PNG signature.
#[derive(Debug, Default)]
pub struct MockImages {
    faults: Faults,
}

impl MockImages {
    pub fn new() -> Self {
        Self::default()
    }
}

fault_controls!(MockImages);

#[async_trait]
impl ImageGenerator for MockImages {
    async fn generate(&self, _prompt: &str) -> Result<Vec<u8>, ProviderError> {
        self.faults.on_call().await?;
        Ok(MOCK_PNG.to_vec())
    }
}
