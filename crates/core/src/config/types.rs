use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

use crate::credits::Plan;
use crate::orchestrator::OrchestratorConfig;
use crate::pool::PoolConfig;
use crate::providers::ProvidersConfig;
use crate::retry::RetryConfig;
use crate::stage::StageKind;

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub pools: PoolConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    /// Tools available to tool runs and pipelines.
    #[serde(default = "default_tools")]
    pub tools: Vec<ToolConfig>,
    #[serde(default)]
    pub pipelines: Vec<PipelineConfig>,
    /// Organizations created at startup when absent.
    #[serde(default)]
    pub organizations: Vec<OrganizationSeed>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            pools: PoolConfig::default(),
            retry: RetryConfig::default(),
            providers: ProvidersConfig::default(),
            tools: default_tools(),
            pipelines: Vec::new(),
            organizations: Vec::new(),
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    8080
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("conveyor.db")
}

/// A tool: a named entry point bound to one stage.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ToolConfig {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub stage: StageKind,
}

/// One tool per stage, with the stage name as tool id.
fn default_tools() -> Vec<ToolConfig> {
    StageKind::ALL
        .iter()
        .map(|stage| ToolConfig {
            id: stage.as_str().to_string(),
            name: None,
            stage: *stage,
        })
        .collect()
}

/// A pipeline: an ordered list of tool ids run as one work item.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PipelineConfig {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub tools: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct OrganizationSeed {
    pub orgname: String,
    #[serde(default = "default_plan")]
    pub plan: Plan,
    #[serde(default)]
    pub credits: i64,
}

fn default_plan() -> Plan {
    Plan::Standard
}

/// Sanitized config for API responses (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub orchestrator: OrchestratorConfig,
    pub pools: PoolConfig,
    pub retry: RetryConfig,
    pub providers: SanitizedProvidersConfig,
    pub tools: Vec<ToolConfig>,
    pub pipelines: Vec<PipelineConfig>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SanitizedProvidersConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub openai: Option<SanitizedOpenAiConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extractor_url: Option<String>,
    pub storage_public_base_url: String,
}

/// Sanitized OpenAI config (API key hidden)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedOpenAiConfig {
    pub api_base: String,
    pub api_key_configured: bool,
    pub embedding_model: String,
    pub completion_model: String,
    pub speech_model: String,
    pub image_model: String,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            server: config.server.clone(),
            database: config.database.clone(),
            orchestrator: config.orchestrator.clone(),
            pools: config.pools.clone(),
            retry: config.retry.clone(),
            providers: SanitizedProvidersConfig {
                openai: config
                    .providers
                    .openai
                    .as_ref()
                    .map(|o| SanitizedOpenAiConfig {
                        api_base: o.api_base.clone(),
                        api_key_configured: !o.api_key.is_empty(),
                        embedding_model: o.embedding_model.clone(),
                        completion_model: o.completion_model.clone(),
                        speech_model: o.speech_model.clone(),
                        image_model: o.image_model.clone(),
                    }),
                extractor_url: config.providers.extractor.as_ref().map(|e| e.url.clone()),
                storage_public_base_url: config.providers.storage.public_base_url.clone(),
            },
            tools: config.tools.clone(),
            pipelines: config.pipelines.clone(),
        }
    }
}
