//! Provider configuration (`[providers]` section).

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// External collaborator settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvidersConfig {
    /// OpenAI-compatible API. Embedding, completion, speech and image stages
    /// fail permanently while this is absent.
    #[serde(default)]
    pub openai: Option<OpenAiConfig>,

    /// Text extraction service used for URL inputs.
    #[serde(default)]
    pub extractor: Option<ExtractorConfig>,

    #[serde(default)]
    pub storage: StorageConfig,
}

/// OpenAI-compatible API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    pub api_key: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_completion_model")]
    pub completion_model: String,
    #[serde(default = "default_speech_model")]
    pub speech_model: String,
    #[serde(default = "default_voice")]
    pub voice: String,
    #[serde(default = "default_image_model")]
    pub image_model: String,
    #[serde(default = "default_openai_timeout")]
    pub timeout_secs: u64,
}

fn default_api_base() -> String {
    "https://api.openai.com".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_completion_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_speech_model() -> String {
    "tts-1".to_string()
}

fn default_voice() -> String {
    "alloy".to_string()
}

fn default_image_model() -> String {
    "dall-e-3".to_string()
}

fn default_openai_timeout() -> u64 {
    60
}

/// Text extraction service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractorConfig {
    /// Base URL (e.g., "http://localhost:5000")
    pub url: String,
    #[serde(default = "default_extractor_timeout")]
    pub timeout_secs: u64,
}

fn default_extractor_timeout() -> u64 {
    120
}

/// Object storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory objects are written under.
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
    /// Prefix of the URLs handed out for stored objects.
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
            public_base_url: default_public_base_url(),
        }
    }
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("./objects")
}

fn default_public_base_url() -> String {
    "http://localhost:8080/objects".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_providers() {
        let config = ProvidersConfig::default();
        assert!(config.openai.is_none());
        assert!(config.extractor.is_none());
        assert_eq!(config.storage.root, PathBuf::from("./objects"));
    }

    #[test]
    fn test_deserialize_openai_minimal() {
        let toml = r#"
            [openai]
            api_key = "sk-test"

            [extractor]
            url = "http://localhost:5000"
        "#;
        let config: ProvidersConfig = toml::from_str(toml).unwrap();
        let openai = config.openai.unwrap();
        assert_eq!(openai.api_key, "sk-test");
        assert_eq!(openai.api_base, "https://api.openai.com");
        assert_eq!(openai.embedding_model, "text-embedding-3-small");
        assert_eq!(openai.timeout_secs, 60);
        assert_eq!(config.extractor.unwrap().timeout_secs, 120);
    }
}
