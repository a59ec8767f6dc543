use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use super::fraction;
use crate::content::CreateContentRequest;
use crate::providers::TextExtractor;
use crate::stage::{StageContext, StageError, StageHandler, StageKind, StageOutput};

/// Turns URL inputs into text content. Text inputs pass through.
pub struct ExtractTextHandler {
    extractor: Arc<dyn TextExtractor>,
}

impl ExtractTextHandler {
    pub fn new(extractor: Arc<dyn TextExtractor>) -> Self {
        Self { extractor }
    }
}

#[async_trait]
impl StageHandler for ExtractTextHandler {
    fn stage(&self) -> StageKind {
        StageKind::ExtractText
    }

    async fn run(&self, ctx: &StageContext) -> Result<StageOutput, StageError> {
        let total = ctx.inputs.len();
        let mut outputs = Vec::with_capacity(total);
        let mut next_inputs = Vec::with_capacity(total);

        for (i, input) in ctx.inputs.iter().enumerate() {
            if input.has_text() {
                next_inputs.push(input.id.clone());
            } else if let Some(url) = input.url.as_deref() {
                let document = ctx
                    .retry("extract-text", || self.extractor.extract(url))
                    .await?;
                let text = document.text();
                if text.trim().is_empty() {
                    return Err(StageError::Permanent(format!(
                        "no text could be extracted from {}",
                        url
                    )));
                }

                let title = document
                    .title
                    .filter(|t| !t.contains("http"))
                    .unwrap_or_else(|| input.title.clone());
                let output = ctx.create_output(
                    &format!("extract:{}", input.id),
                    CreateContentRequest::text(ctx.orgname(), title, text),
                )?;
                info!(
                    work_item_id = %ctx.work_item_id(),
                    content_id = %input.id,
                    pages = document.pages.len(),
                    "Extracted text"
                );
                next_inputs.push(output.id.clone());
                outputs.push(output.id);
            } else {
                return Err(StageError::Permanent(format!(
                    "content {} has neither text nor url",
                    input.id
                )));
            }

            ctx.progress.set(fraction(i + 1, total))?;
        }

        Ok(StageOutput::new(outputs).with_next_inputs(next_inputs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ProviderError;
    use crate::testing::fixtures::{mock_providers, StageHarness};

    #[tokio::test]
    async fn test_url_input_becomes_text_content() {
        let harness = StageHarness::new();
        let mocks = mock_providers();
        let handler = ExtractTextHandler::new(mocks.extractor.clone());

        let input = harness.url_input("https://example.com/report.pdf");
        let ctx = harness.context(StageKind::ExtractText, vec![input]);
        let output = handler.run(&ctx).await.unwrap();

        assert_eq!(output.outputs.len(), 1);
        let content = harness.content(&output.outputs[0]);
        assert!(content.text.unwrap().contains("https://example.com/report.pdf"));
        assert_eq!(mocks.extractor.call_count().await, 1);
        assert!(harness.progress(&ctx) > 0.9);
    }

    #[tokio::test]
    async fn test_text_input_passes_through() {
        let harness = StageHarness::new();
        let mocks = mock_providers();
        let handler = ExtractTextHandler::new(mocks.extractor.clone());

        let input = harness.text_input("already text");
        let input_id = input.id.clone();
        let ctx = harness.context(StageKind::ExtractText, vec![input]);
        let output = handler.run(&ctx).await.unwrap();

        assert!(output.outputs.is_empty());
        assert_eq!(output.next_inputs, Some(vec![input_id]));
        assert_eq!(mocks.extractor.call_count().await, 0);
    }

    #[tokio::test]
    async fn test_mixed_inputs_keep_order_for_next_stage() {
        let harness = StageHarness::new();
        let mocks = mock_providers();
        let handler = ExtractTextHandler::new(mocks.extractor.clone());

        let text = harness.text_input("already text");
        let text_id = text.id.clone();
        let url = harness.url_input("https://example.com/b.pdf");
        let ctx = harness.context(StageKind::ExtractText, vec![text, url]);
        let output = handler.run(&ctx).await.unwrap();

        assert_eq!(output.outputs.len(), 1);
        assert_eq!(
            output.next_inputs,
            Some(vec![text_id, output.outputs[0].clone()])
        );
    }

    #[tokio::test]
    async fn test_redelivery_reuses_extracted_output() {
        let harness = StageHarness::new();
        let mocks = mock_providers();
        let handler = ExtractTextHandler::new(mocks.extractor.clone());

        let input = harness.url_input("https://example.com/a.pdf");
        let ctx = harness.context(StageKind::ExtractText, vec![input]);
        let first = handler.run(&ctx).await.unwrap();
        let second = handler.run(&ctx).await.unwrap();

        assert_eq!(first.outputs, second.outputs);
    }

    #[tokio::test]
    async fn test_client_error_is_permanent() {
        let harness = StageHarness::new();
        let mocks = mock_providers();
        mocks
            .extractor
            .set_next_error(ProviderError::Api {
                status: 422,
                message: "unsupported format".into(),
            })
            .await;
        let handler = ExtractTextHandler::new(mocks.extractor.clone());

        let ctx = harness.context(
            StageKind::ExtractText,
            vec![harness.url_input("https://example.com/x.bin")],
        );
        let err = handler.run(&ctx).await.unwrap_err();

        assert!(matches!(err, StageError::Permanent(_)));
        assert_eq!(mocks.extractor.call_count().await, 1);
    }
}
