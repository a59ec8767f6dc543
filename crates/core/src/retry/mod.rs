//! Bounded exponential backoff with jitter for individual collaborator calls.

mod policy;

pub use policy::{with_retry, RetryConfig, RetryPolicy, Retryable};
