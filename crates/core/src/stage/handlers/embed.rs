use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use super::require_text;
use crate::providers::{EmbeddingProvider, VectorIndex, VectorRecord};
use crate::stage::{
    chunk_text, StageContext, StageError, StageHandler, StageKind, StageOutput, CHUNK_TOKENS,
    EMBEDDING_BATCH_SIZE,
};

/// Embeds text inputs chunk by chunk and stores the vectors.
///
/// Produces no content, so a following pipeline stage receives the same
/// inputs.
pub struct CreateEmbeddingsHandler {
    embeddings: Arc<dyn EmbeddingProvider>,
    vectors: Arc<dyn VectorIndex>,
}

impl CreateEmbeddingsHandler {
    pub fn new(embeddings: Arc<dyn EmbeddingProvider>, vectors: Arc<dyn VectorIndex>) -> Self {
        Self {
            embeddings,
            vectors,
        }
    }
}

/// Embed `chunks` in batches, each batch under its own retry. Returns the
/// records in chunk order and the tokens consumed.
///
/// `on_batch` is called with the fraction of batches done.
pub(crate) async fn embed_chunks(
    ctx: &StageContext,
    embeddings: &dyn EmbeddingProvider,
    content_id: &str,
    chunks: &[String],
    mut on_batch: impl FnMut(f64) -> Result<(), StageError>,
) -> Result<(Vec<VectorRecord>, u64), StageError> {
    let mut records = Vec::with_capacity(chunks.len());
    let mut tokens = 0u64;
    let batches: Vec<&[String]> = chunks.chunks(EMBEDDING_BATCH_SIZE).collect();
    let total = batches.len();

    for (batch_index, batch) in batches.into_iter().enumerate() {
        let embedded = ctx
            .retry("create-embeddings", || embeddings.embed(batch))
            .await?;
        if embedded.vectors.len() != batch.len() {
            return Err(StageError::Permanent(format!(
                "embedding provider returned {} vectors for {} chunks",
                embedded.vectors.len(),
                batch.len()
            )));
        }
        tokens += embedded.tokens_used;

        let offset = batch_index * EMBEDDING_BATCH_SIZE;
        for (i, (text, embedding)) in batch.iter().zip(embedded.vectors).enumerate() {
            records.push(VectorRecord {
                orgname: ctx.orgname().to_string(),
                content_id: content_id.to_string(),
                chunk_index: (offset + i) as u32,
                text: text.clone(),
                embedding,
            });
        }
        on_batch((batch_index + 1) as f64 / total as f64)?;
    }

    Ok((records, tokens))
}

#[async_trait]
impl StageHandler for CreateEmbeddingsHandler {
    fn stage(&self) -> StageKind {
        StageKind::CreateEmbeddings
    }

    async fn run(&self, ctx: &StageContext) -> Result<StageOutput, StageError> {
        let total = ctx.inputs.len().max(1) as f64;
        let mut tokens = 0u64;

        for (i, input) in ctx.inputs.iter().enumerate() {
            let text = require_text(ctx, input)?;
            let chunks = chunk_text(text, CHUNK_TOKENS, ctx.metering.chars_per_token);

            let (records, used) =
                embed_chunks(ctx, self.embeddings.as_ref(), &input.id, &chunks, |done| {
                    ctx.progress.set((i as f64 + done * 0.9) / total).map(|_| ())
                })
                .await?;

            let written = ctx
                .retry("upsert-vectors", || self.vectors.upsert(records.clone()))
                .await?;
            info!(
                work_item_id = %ctx.work_item_id(),
                content_id = %input.id,
                chunks = written,
                tokens = used,
                "Embedded content"
            );

            ctx.credits
                .charge_tokens(&format!("embeddings:{}", input.id), used)?;
            tokens += used;
            ctx.progress.set((i + 1) as f64 / total)?;
        }

        Ok(StageOutput::default().with_tokens(tokens))
    }
}
