//! Stage identifiers, handler outputs and stage errors.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::retry::Retryable;

/// A transformation step with its own queue and worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StageKind {
    ExtractText,
    CreateEmbeddings,
    Summarize,
    TextToImage,
    TextToSpeech,
    IngestDocument,
}

impl StageKind {
    /// Every stage kind, in catalog order.
    pub const ALL: [StageKind; 6] = [
        StageKind::ExtractText,
        StageKind::CreateEmbeddings,
        StageKind::Summarize,
        StageKind::TextToImage,
        StageKind::TextToSpeech,
        StageKind::IngestDocument,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::ExtractText => "extract-text",
            StageKind::CreateEmbeddings => "create-embeddings",
            StageKind::Summarize => "summarize",
            StageKind::TextToImage => "text-to-image",
            StageKind::TextToSpeech => "text-to-speech",
            StageKind::IngestDocument => "ingest-document",
        }
    }

    /// Concurrency used when the configuration does not override it.
    ///
    /// Media synthesis is rate limited upstream, so those pools are narrower.
    pub fn default_concurrency(&self) -> usize {
        match self {
            StageKind::TextToImage | StageKind::TextToSpeech => 8,
            _ => 32,
        }
    }

    /// Name of the dispatch queue feeding this stage.
    pub fn queue_name(&self) -> String {
        format!("stage:{}", self.as_str())
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StageKind::ALL
            .iter()
            .find(|kind| kind.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown stage: {}", s))
    }
}

/// What a handler reports back after a successful run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageOutput {
    /// Content ids produced, in order.
    pub outputs: Vec<String>,
    /// Tokens consumed across all provider calls.
    pub tokens_used: u64,
    /// Inputs of the next stage when they differ from `outputs`, e.g. a mix
    /// of produced and passed-through content.
    pub next_inputs: Option<Vec<String>>,
}

impl StageOutput {
    pub fn new(outputs: Vec<String>) -> Self {
        Self {
            outputs,
            tokens_used: 0,
            next_inputs: None,
        }
    }

    pub fn with_next_inputs(mut self, next_inputs: Vec<String>) -> Self {
        self.next_inputs = Some(next_inputs);
        self
    }

    pub fn with_tokens(mut self, tokens_used: u64) -> Self {
        self.tokens_used = tokens_used;
        self
    }
}

/// Failure of a stage handler.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StageError {
    /// Collaborator failure that survived the retry policy.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Failure that retrying cannot fix (malformed content, rejected input).
    #[error("{0}")]
    Permanent(String),

    /// The run was cancelled before this stage could proceed.
    #[error("cancelled")]
    Cancelled,
}

impl StageError {
    pub fn permanent(message: impl Into<String>) -> Self {
        StageError::Permanent(message.into())
    }

    /// Label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            StageError::Transient(_) => "transient",
            StageError::Permanent(_) => "permanent",
            StageError::Cancelled => "cancelled",
        }
    }
}

impl Retryable for StageError {
    fn is_retryable(&self) -> bool {
        matches!(self, StageError::Transient(_))
    }
}

impl From<crate::providers::ProviderError> for StageError {
    fn from(err: crate::providers::ProviderError) -> Self {
        if err.is_retryable() {
            StageError::Transient(err.to_string())
        } else {
            StageError::Permanent(err.to_string())
        }
    }
}

impl From<crate::content::ContentError> for StageError {
    fn from(err: crate::content::ContentError) -> Self {
        StageError::Transient(err.to_string())
    }
}

impl From<crate::credits::CreditError> for StageError {
    fn from(err: crate::credits::CreditError) -> Self {
        match err {
            crate::credits::CreditError::Database(msg) => StageError::Transient(msg),
            other => StageError::Permanent(other.to_string()),
        }
    }
}

impl From<crate::work::WorkItemError> for StageError {
    fn from(err: crate::work::WorkItemError) -> Self {
        StageError::Transient(err.to_string())
    }
}
