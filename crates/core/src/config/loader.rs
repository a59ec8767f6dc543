use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use std::path::Path;

use super::{types::Config, ConfigError};

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "CONVEYOR_";

/// Process settings that share the prefix but are not configuration keys.
const RESERVED_ENV_KEYS: &[&str] = &["config", "log_format"];

fn env_overrides() -> Env {
    Env::prefixed(ENV_PREFIX)
        .split("__")
        .ignore(RESERVED_ENV_KEYS)
}

/// Load configuration from a TOML file, then apply environment overrides.
///
/// Nested keys use a double underscore, e.g. `CONVEYOR_SERVER__PORT=9000` or
/// `CONVEYOR_POOLS__LEASE_TTL_MS=60000`.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound(path.display().to_string()));
    }

    Figment::new()
        .merge(Toml::file(path))
        .merge(env_overrides())
        .extract()
        .map_err(|e| ConfigError::ParseError(e.to_string()))
}

/// Load configuration from a TOML string without environment overrides.
pub fn load_config_from_str(toml_str: &str) -> Result<Config, ConfigError> {
    Figment::from(Toml::string(toml_str))
        .extract()
        .map_err(|e| ConfigError::ParseError(e.to_string()))
}
