//! Built-in stage handlers.

mod document;
mod embed;
mod extract;
mod image;
mod speech;
mod summarize;

pub use document::IngestDocumentHandler;
pub use embed::CreateEmbeddingsHandler;
pub use extract::ExtractTextHandler;
pub use image::TextToImageHandler;
pub use speech::TextToSpeechHandler;
pub use summarize::SummarizeHandler;

use super::{StageContext, StageError};
use crate::content::Content;

/// Inline text of an input, or a permanent failure naming the stage.
fn require_text<'a>(ctx: &StageContext, input: &'a Content) -> Result<&'a str, StageError> {
    match input.text.as_deref() {
        Some(text) if !text.trim().is_empty() => Ok(text),
        _ => Err(StageError::Permanent(format!(
            "{} needs text input, content {} has none",
            ctx.stage, input.id
        ))),
    }
}

/// Fraction of the stage done after `done` of `total` inputs.
fn fraction(done: usize, total: usize) -> f64 {
    if total == 0 {
        1.0
    } else {
        done as f64 / total as f64
    }
}
