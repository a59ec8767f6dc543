//! Typed mapping from stage to handler, concurrency and queue.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use super::handlers::{
    CreateEmbeddingsHandler, ExtractTextHandler, IngestDocumentHandler, SummarizeHandler,
    TextToImageHandler, TextToSpeechHandler,
};
use super::{StageContext, StageError, StageKind, StageOutput};
use crate::pool::PoolConfig;
use crate::providers::Providers;

/// A stage implementation.
///
/// Handlers may be re-run for the same work item after a crash or lease
/// expiry, so their side effects must be keyed (see
/// [`StageContext::create_output`] and [`CreditMeter`](super::CreditMeter)).
#[async_trait]
pub trait StageHandler: Send + Sync {
    fn stage(&self) -> StageKind;

    async fn run(&self, ctx: &StageContext) -> Result<StageOutput, StageError>;
}

#[derive(Debug, Error, PartialEq)]
pub enum RegistryError {
    #[error("stage {0} registered twice")]
    Duplicate(StageKind),

    #[error("stage {0} has no registered handler")]
    Unregistered(StageKind),

    #[error("stage {0} needs a concurrency of at least 1")]
    ZeroConcurrency(StageKind),
}

/// Handler, concurrency limit and queue for one stage.
#[derive(Clone)]
pub struct StageRegistration {
    pub stage: StageKind,
    pub handler: Arc<dyn StageHandler>,
    pub concurrency: usize,
    pub queue: String,
}

#[derive(Clone, Default)]
pub struct StageRegistry {
    stages: HashMap<StageKind, StageRegistration>,
}

impl StageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in handler for every stage kind.
    pub fn standard(providers: &Providers, pools: &PoolConfig) -> Result<Self, RegistryError> {
        let handlers: Vec<Arc<dyn StageHandler>> = vec![
            Arc::new(ExtractTextHandler::new(providers.extractor.clone())),
            Arc::new(CreateEmbeddingsHandler::new(
                providers.embeddings.clone(),
                providers.vectors.clone(),
            )),
            Arc::new(SummarizeHandler::new(providers.completions.clone())),
            Arc::new(TextToImageHandler::new(
                providers.images.clone(),
                providers.storage.clone(),
            )),
            Arc::new(TextToSpeechHandler::new(
                providers.speech.clone(),
                providers.storage.clone(),
            )),
            Arc::new(IngestDocumentHandler::new(providers.clone())),
        ];

        let mut registry = Self::new();
        for handler in handlers {
            let concurrency = pools.concurrency_for(handler.stage());
            registry.register(handler, concurrency)?;
        }
        Ok(registry)
    }

    /// Register `handler` for its stage with `concurrency` executors.
    pub fn register(
        &mut self,
        handler: Arc<dyn StageHandler>,
        concurrency: usize,
    ) -> Result<&mut Self, RegistryError> {
        let stage = handler.stage();
        if concurrency == 0 {
            return Err(RegistryError::ZeroConcurrency(stage));
        }
        if self.stages.contains_key(&stage) {
            return Err(RegistryError::Duplicate(stage));
        }
        self.stages.insert(
            stage,
            StageRegistration {
                stage,
                handler,
                concurrency,
                queue: stage.queue_name(),
            },
        );
        Ok(self)
    }

    pub fn get(&self, stage: StageKind) -> Option<&StageRegistration> {
        self.stages.get(&stage)
    }

    pub fn require(&self, stage: StageKind) -> Result<&StageRegistration, RegistryError> {
        self.get(stage).ok_or(RegistryError::Unregistered(stage))
    }

    /// Registrations in catalog order.
    pub fn registrations(&self) -> Vec<&StageRegistration> {
        StageKind::ALL
            .iter()
            .filter_map(|stage| self.stages.get(stage))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Check every stage in `required` has a handler.
    pub fn validate<I>(&self, required: I) -> Result<(), RegistryError>
    where
        I: IntoIterator<Item = StageKind>,
    {
        for stage in required {
            self.require(stage)?;
        }
        Ok(())
    }
}
