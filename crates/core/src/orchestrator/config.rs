//! Orchestrator configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the run orchestrator (`[orchestrator]` section).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrchestratorConfig {
    /// Start the worker pools with the server.
    /// When disabled, runs are admitted and queued but never executed.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Tokens billed per credit.
    #[serde(default = "default_tokens_per_credit")]
    pub tokens_per_credit: u64,

    /// Characters per token used for admission estimates.
    #[serde(default = "default_chars_per_token")]
    pub chars_per_token: u64,

    /// Flat credits charged per generated image.
    #[serde(default = "default_image_credits")]
    pub image_credits: i64,

    /// Capacity of the publisher channel. Events beyond it are dropped.
    #[serde(default = "default_publisher_buffer")]
    pub publisher_buffer: usize,
}

fn default_enabled() -> bool {
    true
}

fn default_tokens_per_credit() -> u64 {
    50
}

fn default_chars_per_token() -> u64 {
    4
}

fn default_image_credits() -> i64 {
    10
}

fn default_publisher_buffer() -> usize {
    1000
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            tokens_per_credit: default_tokens_per_credit(),
            chars_per_token: default_chars_per_token(),
            image_credits: default_image_credits(),
            publisher_buffer: default_publisher_buffer(),
        }
    }
}

impl OrchestratorConfig {
    /// Admission estimate for `chars` characters of known input text.
    ///
    /// Never below one credit, so an empty balance always rejects.
    pub fn estimate_credits(&self, chars: usize) -> i64 {
        let tokens = (chars as u64).div_ceil(self.chars_per_token.max(1));
        let credits = tokens.div_ceil(self.tokens_per_credit.max(1));
        credits.max(1) as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = OrchestratorConfig::default();
        assert!(config.enabled);
        assert_eq!(config.tokens_per_credit, 50);
        assert_eq!(config.chars_per_token, 4);
        assert_eq!(config.image_credits, 10);
        assert_eq!(config.publisher_buffer, 1000);
    }

    #[test]
    fn test_deserialize_minimal() {
        let toml = r#"
            enabled = false
        "#;
        let config: OrchestratorConfig = toml::from_str(toml).unwrap();
        assert!(!config.enabled);
        assert_eq!(config.tokens_per_credit, 50);
    }

    #[test]
    fn test_estimate_credits() {
        let config = OrchestratorConfig::default();
        // "hello world": 11 chars -> 3 tokens -> 1 credit
        assert_eq!(config.estimate_credits(11), 1);
        assert_eq!(config.estimate_credits(0), 1);
        // 200 tokens -> 4 credits, 201 tokens -> 5 credits
        assert_eq!(config.estimate_credits(800), 4);
        assert_eq!(config.estimate_credits(804), 5);
    }
}
