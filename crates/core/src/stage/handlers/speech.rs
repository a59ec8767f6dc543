use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use super::{fraction, require_text};
use crate::content::CreateContentRequest;
use crate::providers::{ObjectStorage, SpeechSynthesizer};
use crate::stage::{
    estimate_tokens, first_tokens, StageContext, StageError, StageHandler, StageKind, StageOutput,
};

/// Longest input accepted by speech synthesis, in tokens.
const SPEECH_INPUT_TOKENS: u64 = 1000;

/// Synthesizes speech for each text input.
pub struct TextToSpeechHandler {
    speech: Arc<dyn SpeechSynthesizer>,
    storage: Arc<dyn ObjectStorage>,
}

impl TextToSpeechHandler {
    pub fn new(speech: Arc<dyn SpeechSynthesizer>, storage: Arc<dyn ObjectStorage>) -> Self {
        Self { speech, storage }
    }
}

#[async_trait]
impl StageHandler for TextToSpeechHandler {
    fn stage(&self) -> StageKind {
        StageKind::TextToSpeech
    }

    async fn run(&self, ctx: &StageContext) -> Result<StageOutput, StageError> {
        let total = ctx.inputs.len();
        let mut outputs = Vec::with_capacity(total);

        for (i, input) in ctx.inputs.iter().enumerate() {
            let text = require_text(ctx, input)?;
            let script = first_tokens([text], SPEECH_INPUT_TOKENS, ctx.metering.chars_per_token);

            let audio = ctx
                .retry("text-to-speech", || self.speech.synthesize(&script))
                .await?;

            let key = format!(
                "{}/runs/{}/{}-speech.mp3",
                ctx.orgname(),
                ctx.work_item_id(),
                input.id
            );
            let url = ctx
                .retry("storage-upload", || {
                    self.storage.put(&key, audio.clone(), "audio/mpeg")
                })
                .await?;

            let output = ctx.create_output(
                &format!("speech:{}", input.id),
                CreateContentRequest::url(
                    ctx.orgname(),
                    format!("Speech - {}", input.title),
                    url,
                    "audio/mpeg",
                ),
            )?;
            let tokens = estimate_tokens(&script, ctx.metering.chars_per_token);
            ctx.credits
                .charge_tokens(&format!("speech:{}", input.id), tokens)?;

            info!(work_item_id = %ctx.work_item_id(), content_id = %output.id, "Synthesized speech");
            outputs.push(output.id);
            ctx.progress.set(fraction(i + 1, total))?;
        }

        Ok(StageOutput::new(outputs))
    }
}
