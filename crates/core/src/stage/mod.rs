//! Stages: the typed catalog, handler registry and execution context.

mod chunk;
mod context;
pub mod handlers;
mod registry;
mod types;

pub use chunk::{
    chunk_text, estimate_tokens, first_tokens, CHUNK_TOKENS, EMBEDDING_BATCH_SIZE,
    SUMMARY_INPUT_TOKENS,
};
pub use context::{CreditMeter, Metering, ProgressReporter, StageContext, StageServices};
pub use registry::{RegistryError, StageHandler, StageRegistration, StageRegistry};
pub use types::{StageError, StageKind, StageOutput};
