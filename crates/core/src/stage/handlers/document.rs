//! Document ingestion: extract, embed, settle, then fan out.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::info;

use super::embed::embed_chunks;
use super::summarize::summarize_into_output;
use crate::content::Content;
use crate::providers::{
    ExtractedDocument, ExtractedPage, ObjectStorage, Providers, VectorIndex, VectorRecord,
};
use crate::stage::{
    chunk_text, estimate_tokens, StageContext, StageError, StageHandler, StageKind, StageOutput,
    CHUNK_TOKENS,
};

/// Ingests a document: text extraction, embeddings, then preview upload,
/// vector upsert and summary concurrently.
///
/// The stage fails as soon as one of the three final sub-tasks fails. The
/// upload and upsert run as detached tasks and finish regardless; every write
/// is keyed, so a redelivery overwrites rather than duplicates.
pub struct IngestDocumentHandler {
    providers: Providers,
}

impl IngestDocumentHandler {
    pub fn new(providers: Providers) -> Self {
        Self { providers }
    }

    async fn load(&self, ctx: &StageContext, input: &Content) -> Result<ExtractedDocument, StageError> {
        if let Some(url) = input.url.as_deref().filter(|_| !input.has_text()) {
            let extractor = &self.providers.extractor;
            return Ok(ctx.retry("extract-text", || extractor.extract(url)).await?);
        }

        let text = input.text.as_deref().unwrap_or_default();
        let pages: Vec<ExtractedPage> = chunk_text(text, CHUNK_TOKENS, ctx.metering.chars_per_token)
            .into_iter()
            .enumerate()
            .map(|(i, chunk)| ExtractedPage {
                page: i as u32 + 1,
                tokens: estimate_tokens(&chunk, ctx.metering.chars_per_token),
                text: chunk,
            })
            .collect();
        let total_tokens = pages.iter().map(|p| p.tokens).sum();
        Ok(ExtractedDocument {
            title: None,
            mime_type: None,
            pages,
            total_tokens,
            preview: None,
        })
    }

    async fn ingest(
        &self,
        ctx: &StageContext,
        input: &Content,
        base: f64,
        span: f64,
    ) -> Result<Content, StageError> {
        let mut document = self.load(ctx, input).await?;
        if document.pages.is_empty() {
            return Err(StageError::Permanent(format!(
                "no text found in content {}",
                input.id
            )));
        }
        ctx.progress.set(base + 0.25 * span)?;
        info!(
            work_item_id = %ctx.work_item_id(),
            content_id = %input.id,
            pages = document.pages.len(),
            tokens = document.total_tokens,
            "Loaded document"
        );

        ctx.credits.check_tokens(document.total_tokens)?;

        let chunks: Vec<String> = document.pages.iter().map(|p| p.text.clone()).collect();
        let (records, tokens) = embed_chunks(
            ctx,
            self.providers.embeddings.as_ref(),
            &input.id,
            &chunks,
            |_| Ok(()),
        )
        .await?;
        ctx.progress.set(base + 0.5 * span)?;

        ctx.credits
            .charge_tokens(&format!("embeddings:{}", input.id), tokens)?;
        ctx.progress.set(base + 0.6 * span)?;

        // Upload and upsert are detached; a failed summary does not stop them.
        let step = 0.1 * span;
        let preview = tokio::spawn(upload_preview(
            Arc::clone(&self.providers.storage),
            ctx.clone(),
            input.id.clone(),
            document.preview.take(),
        ));
        let vectors = tokio::spawn(upsert_vectors(
            Arc::clone(&self.providers.vectors),
            ctx.clone(),
            records,
        ));

        let (_, _, summary) = tokio::try_join!(
            settle(preview, ctx, step),
            settle(vectors, ctx, step),
            self.summarize(ctx, input, &document, step),
        )?;
        Ok(summary)
    }

    async fn summarize(
        &self,
        ctx: &StageContext,
        input: &Content,
        document: &ExtractedDocument,
        step: f64,
    ) -> Result<Content, StageError> {
        let text = document.text();
        let summary =
            summarize_into_output(ctx, self.providers.completions.as_ref(), input, &text).await?;
        ctx.progress.add(step)?;
        Ok(summary)
    }
}

/// Wait for a detached sub-task and count its share of progress.
async fn settle(
    task: JoinHandle<Result<(), StageError>>,
    ctx: &StageContext,
    step: f64,
) -> Result<(), StageError> {
    task.await
        .map_err(|e| StageError::Permanent(format!("sub-task aborted: {}", e)))??;
    ctx.progress.add(step)?;
    Ok(())
}

async fn upload_preview(
    storage: Arc<dyn ObjectStorage>,
    ctx: StageContext,
    content_id: String,
    preview: Option<Vec<u8>>,
) -> Result<(), StageError> {
    let Some(bytes) = preview else {
        return Ok(());
    };

    let key = format!("{}/contents/{}-preview.png", ctx.orgname(), content_id);
    let url = ctx
        .retry("storage-upload", || {
            storage.put(&key, bytes.clone(), "image/png")
        })
        .await?;
    ctx.set_preview(&content_id, &url)
}

async fn upsert_vectors(
    vectors: Arc<dyn VectorIndex>,
    ctx: StageContext,
    records: Vec<VectorRecord>,
) -> Result<(), StageError> {
    ctx.retry("upsert-vectors", || vectors.upsert(records.clone()))
        .await?;
    Ok(())
}

#[async_trait]
impl StageHandler for IngestDocumentHandler {
    fn stage(&self) -> StageKind {
        StageKind::IngestDocument
    }

    async fn run(&self, ctx: &StageContext) -> Result<StageOutput, StageError> {
        let total = ctx.inputs.len().max(1) as f64;
        let span = 1.0 / total;
        let mut outputs = Vec::with_capacity(ctx.inputs.len());

        for (i, input) in ctx.inputs.iter().enumerate() {
            let summary = self.ingest(ctx, input, i as f64 * span, span).await?;
            outputs.push(summary.id);
        }

        Ok(StageOutput::new(outputs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credits::Plan;
    use crate::providers::ProviderError;
    use crate::testing::fixtures::{mock_providers, StageHarness};
    use std::time::{Duration, Instant};

    #[tokio::test]
    async fn test_ingest_url_document() {
        let harness = StageHarness::new();
        let mocks = mock_providers();
        let handler = IngestDocumentHandler::new(mocks.providers());

        let input = harness.url_input("https://example.com/handbook.pdf");
        let input_id = input.id.clone();
        let ctx = harness.context(StageKind::IngestDocument, vec![input]);

        let output = handler.run(&ctx).await.unwrap();

        assert_eq!(output.outputs.len(), 1);
        let summary = harness.content(&output.outputs[0]);
        assert!(summary.title.starts_with("Summary - "));
        // Preview uploaded and linked to the source
        let source = harness.content(&input_id);
        assert!(source.preview_image.unwrap().contains("-preview.png"));
        assert!(mocks.vectors.count_for(&input_id).await.unwrap() > 0);
        // 0.6 + 3 * 0.1, capped below completion
        assert!((harness.progress(&ctx) - 0.9).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_failed_summary_keeps_sibling_side_effects() {
        let harness = StageHarness::new();
        let mocks = mock_providers();
        mocks
            .completions
            .set_next_error(ProviderError::Api {
                status: 400,
                message: "content policy".into(),
            })
            .await;
        let handler = IngestDocumentHandler::new(mocks.providers());

        let input = harness.url_input("https://example.com/handbook.pdf");
        let input_id = input.id.clone();
        let ctx = harness.context(StageKind::IngestDocument, vec![input]);

        let err = handler.run(&ctx).await.unwrap_err();
        assert!(matches!(err, StageError::Permanent(_)));

        // The preview upload committed before or while the summary failed
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(mocks.storage.object_count().await, 1);
        assert!(harness.content(&input_id).preview_image.is_some());
    }

    #[tokio::test]
    async fn test_failed_summary_does_not_wait_for_slow_upsert() {
        let harness = StageHarness::new();
        let mocks = mock_providers();
        mocks.vectors.set_delay(Duration::from_millis(1_500)).await;
        mocks
            .completions
            .set_next_error(ProviderError::Api {
                status: 400,
                message: "bad".into(),
            })
            .await;
        let handler = IngestDocumentHandler::new(mocks.providers());

        let input = harness.text_input("a memo that will not summarize");
        let input_id = input.id.clone();
        let ctx = harness.context(StageKind::IngestDocument, vec![input]);

        let started = Instant::now();
        let err = handler.run(&ctx).await.unwrap_err();
        assert!(matches!(err, StageError::Permanent(_)));
        assert!(started.elapsed() < Duration::from_millis(1_000));
        assert_eq!(mocks.vectors.count_for(&input_id).await.unwrap(), 0);

        // The detached upsert still lands.
        tokio::time::sleep(Duration::from_millis(2_000)).await;
        assert!(mocks.vectors.count_for(&input_id).await.unwrap() > 0);
    }

    #[tokio::test]
    async fn test_insufficient_credits_after_extraction() {
        let harness = StageHarness::new();
        harness.set_balance(Plan::Standard, 1);
        let mocks = mock_providers();
        let handler = IngestDocumentHandler::new(mocks.providers());

        let ctx = harness.context(
            StageKind::IngestDocument,
            vec![harness.text_input(&"lorem ipsum ".repeat(2_000))],
        );
        let err = handler.run(&ctx).await.unwrap_err();

        assert!(matches!(err, StageError::Permanent(ref m) if m.contains("not enough credits")));
        assert_eq!(mocks.embeddings.call_count().await, 0);
    }

    #[tokio::test]
    async fn test_embedding_retry_then_success() {
        let harness = StageHarness::new();
        let mocks = mock_providers();
        mocks.embeddings.fail_times(2).await;
        let handler = IngestDocumentHandler::new(mocks.providers());

        let ctx = harness.context(
            StageKind::IngestDocument,
            vec![harness.text_input("a short memo about quarterly numbers")],
        );
        handler.run(&ctx).await.unwrap();

        assert_eq!(mocks.embeddings.call_count().await, 3);
    }
}
