use std::collections::HashSet;

use super::{types::Config, ConfigError};

/// Validate configuration
/// Currently validates:
/// - Server port is not 0
/// - Retry delay bounds are ordered
/// - Pool timings and credit ratios are positive
/// - Tool ids are unique
/// - Pipelines are non-empty and only reference known tools
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(invalid("server.port cannot be 0"));
    }

    if config.retry.min_delay_ms > config.retry.max_delay_ms {
        return Err(invalid("retry.min_delay_ms cannot exceed retry.max_delay_ms"));
    }

    if config.pools.lease_ttl_ms == 0 {
        return Err(invalid("pools.lease_ttl_ms must be positive"));
    }
    if config.pools.poll_interval_ms == 0 {
        return Err(invalid("pools.poll_interval_ms must be positive"));
    }

    if config.orchestrator.tokens_per_credit == 0 {
        return Err(invalid("orchestrator.tokens_per_credit must be positive"));
    }
    if config.orchestrator.chars_per_token == 0 {
        return Err(invalid("orchestrator.chars_per_token must be positive"));
    }

    let mut tool_ids = HashSet::new();
    for tool in &config.tools {
        if !tool_ids.insert(tool.id.as_str()) {
            return Err(invalid(&format!("duplicate tool id: {}", tool.id)));
        }
    }

    let mut pipeline_ids = HashSet::new();
    for pipeline in &config.pipelines {
        if !pipeline_ids.insert(pipeline.id.as_str()) {
            return Err(invalid(&format!("duplicate pipeline id: {}", pipeline.id)));
        }
        if pipeline.tools.is_empty() {
            return Err(invalid(&format!("pipeline {} has no tools", pipeline.id)));
        }
        if let Some(unknown) = pipeline
            .tools
            .iter()
            .find(|t| !tool_ids.contains(t.as_str()))
        {
            return Err(invalid(&format!(
                "pipeline {} references unknown tool {}",
                pipeline.id, unknown
            )));
        }
    }

    Ok(())
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::ValidationError(message.to_string())
}
