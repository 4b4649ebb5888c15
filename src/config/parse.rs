use super::types::Config;
use super::{expand_env_vars, expand_tilde, unexpanded_env_vars};
use std::net::SocketAddr;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation failed:\n{}", .0.join("\n"))]
    ValidationList(Vec<String>),

    #[error("validation failed: {0}")]
    Validation(String),
}

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let yaml_string = std::fs::read_to_string(path).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to read config file '{}': {}", path.display(), e),
        ))
    })?;

    parse_config(&yaml_string).map_err(|e| match e {
        ConfigError::YamlParse(inner) => ConfigError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("in file '{}': {}", path.display(), inner),
        )),
        other => other,
    })
}

/// Parses and validates a YAML config document.
pub fn parse_config(yaml: &str) -> Result<Config, ConfigError> {
    let yaml = expand_env_vars(yaml);
    check_unexpanded_vars(&yaml)?;

    let mut config: Config = serde_yaml::from_str(&yaml)?;
    config.logs_path = expand_tilde(&config.logs_path);
    config.status_path = expand_tilde(&config.status_path);
    config.tail.program = expand_tilde(&config.tail.program);

    validate_config(&config)?;
    Ok(config)
}

fn check_unexpanded_vars(yaml: &str) -> Result<(), ConfigError> {
    let vars = unexpanded_env_vars(yaml);
    if vars.is_empty() {
        return Ok(());
    }

    Err(ConfigError::Validation(format!(
        "environment variables are not set: {}\n\
         \n\
         To fix this, either:\n\
         1. Set the environment variables (e.g., export {}=/var/log/services)\n\
         2. Replace the variables in the config file with actual values",
        vars.join(", "),
        vars[0]
    )))
}

/// Checks every field and reports all problems at once.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    if config.listen.parse::<SocketAddr>().is_err() {
        errors.push(format!(
            "listen: '{}' is not a valid socket address (expected e.g. 0.0.0.0:8080)",
            config.listen
        ));
    }
    if config.logs_path.as_os_str().is_empty() {
        errors.push("logs_path: must not be empty".to_string());
    }
    if config.status_path.as_os_str().is_empty() {
        errors.push("status_path: must not be empty".to_string());
    }
    if config.status_update_interval.is_zero() {
        errors.push("status_update_interval: must be positive".to_string());
    }
    if config.skip_batches_on_mismatch <= 1 {
        errors.push(format!(
            "skip_batches_on_mismatch: must be greater than 1, got {}",
            config.skip_batches_on_mismatch
        ));
    }
    if config.listing.max_retries == 0 {
        errors.push("listing.max_retries: must be at least 1".to_string());
    }
    if config.tail.program.as_os_str().is_empty() {
        errors.push("tail.program: must not be empty".to_string());
    }
    if config.tail.rotation_check_interval.is_zero() {
        errors.push("tail.rotation_check_interval: must be positive".to_string());
    }
    if config.tail.max_reresolve == 0 {
        errors.push("tail.max_reresolve: must be at least 1".to_string());
    }
    if config.tail.retention.is_zero() {
        errors.push("tail.retention: must be positive".to_string());
    }
    if config.tail.max_terminated == 0 {
        errors.push("tail.max_terminated: must be at least 1".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationList(errors))
    }
}
