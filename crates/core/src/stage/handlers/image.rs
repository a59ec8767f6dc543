use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use super::{fraction, require_text};
use crate::content::CreateContentRequest;
use crate::providers::{ImageGenerator, ObjectStorage};
use crate::stage::{first_tokens, StageContext, StageError, StageHandler, StageKind, StageOutput};

/// Prompt budget for image generation, in tokens.
const IMAGE_PROMPT_TOKENS: u64 = 250;

/// Generates one image per text input.
pub struct TextToImageHandler {
    images: Arc<dyn ImageGenerator>,
    storage: Arc<dyn ObjectStorage>,
}

impl TextToImageHandler {
    pub fn new(images: Arc<dyn ImageGenerator>, storage: Arc<dyn ObjectStorage>) -> Self {
        Self { images, storage }
    }
}

#[async_trait]
impl StageHandler for TextToImageHandler {
    fn stage(&self) -> StageKind {
        StageKind::TextToImage
    }

    async fn run(&self, ctx: &StageContext) -> Result<StageOutput, StageError> {
        let total = ctx.inputs.len();
        let mut outputs = Vec::with_capacity(total);

        for (i, input) in ctx.inputs.iter().enumerate() {
            let text = require_text(ctx, input)?;
            let prompt = first_tokens([text], IMAGE_PROMPT_TOKENS, ctx.metering.chars_per_token);

            let image = ctx
                .retry("text-to-image", || self.images.generate(&prompt))
                .await?;

            let key = format!(
                "{}/runs/{}/{}-image.png",
                ctx.orgname(),
                ctx.work_item_id(),
                input.id
            );
            let url = ctx
                .retry("storage-upload", || {
                    self.storage.put(&key, image.clone(), "image/png")
                })
                .await?;

            let output = ctx.create_output(
                &format!("image:{}", input.id),
                CreateContentRequest::url(
                    ctx.orgname(),
                    format!("Image - {}", input.title),
                    url.clone(),
                    "image/png",
                ),
            )?;
            ctx.set_preview(&output.id, &url)?;
            ctx.credits
                .charge_credits(&format!("image:{}", input.id), ctx.metering.image_credits)?;

            info!(work_item_id = %ctx.work_item_id(), content_id = %output.id, "Generated image");
            outputs.push(output.id);
            ctx.progress.set(fraction(i + 1, total))?;
        }

        Ok(StageOutput::new(outputs))
    }
}
