//! Testing utilities and mock implementations.
//!
//! Every external collaborator has an in-memory mock with call counting and
//! fault injection, so stage handlers and whole runs can be exercised
//! without network access.
//!
//! # Example
//!
//! ```rust,ignore
//! use conveyor_core::testing::fixtures::{mock_providers, StageHarness};
//!
//! let mocks = mock_providers();
//! mocks.embeddings.fail_times(2).await;
//!
//! let harness = StageHarness::new();
//! let ctx = harness.context(StageKind::CreateEmbeddings, vec![harness.text_input("hi")]);
//! CreateEmbeddingsHandler::new(mocks.embeddings.clone(), mocks.vectors.clone())
//!     .run(&ctx)
//!     .await?;
//!
//! assert_eq!(mocks.embeddings.call_count().await, 3);
//! ```

mod faults;
mod mock_extractor;
mod mock_models;
mod mock_storage;
mod recording_publisher;

pub mod fixtures;

pub use mock_extractor::{MockExtractor, MOCK_PNG};
pub use mock_models::{
    MockCompletions, MockEmbeddings, MockImages, MockSpeech, MOCK_EMBEDDING_DIM,
};
pub use mock_storage::{MockStorage, MockVectorIndex, StoredObject};
pub use recording_publisher::RecordingPublisher;
