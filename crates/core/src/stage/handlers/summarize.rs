use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use super::{fraction, require_text};
use crate::content::{Content, CreateContentRequest};
use crate::providers::{CompletionProvider, CompletionRequest};
use crate::stage::{
    first_tokens, StageContext, StageError, StageHandler, StageKind, StageOutput,
    SUMMARY_INPUT_TOKENS,
};

const SUMMARY_PROMPT: &str = "Write a very short one to two sentence summary describing what \
this document is, based on a part of its content. It could be a book, a legal document, a \
textbook, a newspaper, a bank statement, or another document like this.";

/// Summarizes each text input into a new content.
pub struct SummarizeHandler {
    completions: Arc<dyn CompletionProvider>,
}

impl SummarizeHandler {
    pub fn new(completions: Arc<dyn CompletionProvider>) -> Self {
        Self { completions }
    }
}

/// Summarize the leading part of `text`, store it as the output keyed on
/// `source`, and settle the tokens used.
pub(crate) async fn summarize_into_output(
    ctx: &StageContext,
    completions: &dyn CompletionProvider,
    source: &Content,
    text: &str,
) -> Result<Content, StageError> {
    let excerpt = first_tokens([text], SUMMARY_INPUT_TOKENS, ctx.metering.chars_per_token);
    let request = CompletionRequest::new(format!("Content:\n{}\n\n---\n\nSummary:", excerpt))
        .with_system(SUMMARY_PROMPT)
        .with_max_tokens(80)
        .with_temperature(0.3);

    let response = ctx
        .retry("summarize", || completions.complete(request.clone()))
        .await?;

    let output = ctx.create_output(
        &format!("summary:{}", source.id),
        CreateContentRequest::text(
            ctx.orgname(),
            format!("Summary - {}", source.title),
            response.text,
        ),
    )?;
    ctx.credits
        .charge_tokens(&format!("summary:{}", source.id), response.usage.total())?;

    info!(
        work_item_id = %ctx.work_item_id(),
        content_id = %source.id,
        tokens = response.usage.total(),
        "Summarized content"
    );
    Ok(output)
}

#[async_trait]
impl StageHandler for SummarizeHandler {
    fn stage(&self) -> StageKind {
        StageKind::Summarize
    }

    async fn run(&self, ctx: &StageContext) -> Result<StageOutput, StageError> {
        let total = ctx.inputs.len();
        let mut outputs = Vec::with_capacity(total);

        for (i, input) in ctx.inputs.iter().enumerate() {
            let text = require_text(ctx, input)?;
            let output = summarize_into_output(ctx, self.completions.as_ref(), input, text).await?;
            outputs.push(output.id);
            ctx.progress.set(fraction(i + 1, total))?;
        }

        Ok(StageOutput::new(outputs))
    }
}
