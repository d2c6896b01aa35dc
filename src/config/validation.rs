use crate::config::types::{
    ClientConfig, ConcurrencyConfig, Config, LevelConfig, ProjectConfig, ProxyEntry, StepEntry,
};
use crate::url::normalize_url;
use crate::ConfigError;

/// Validates the entire configuration
///
/// Step names are checked later, against the step registry the run is built
/// with; here they only need to be non-empty.
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_project_config(&config.project)?;
    validate_concurrency_config(&config.concurrency)?;
    validate_proxies(&config.proxies)?;
    validate_client_config(&config.client)?;
    validate_pipeline(&config.pipeline)?;
    Ok(())
}

/// Validates project identification and seeds
fn validate_project_config(config: &ProjectConfig) -> Result<(), ConfigError> {
    if config.name.is_empty() {
        return Err(ConfigError::Validation(
            "project name cannot be empty".to_string(),
        ));
    }

    if !config
        .name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ConfigError::Validation(format!(
            "project name must contain only alphanumeric characters, hyphens and underscores, got '{}'",
            config.name
        )));
    }

    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }

    for seed in &config.seeds {
        normalize_url(seed)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid seed URL '{}': {}", seed, e)))?;
    }

    Ok(())
}

/// Validates admission control settings
fn validate_concurrency_config(config: &ConcurrencyConfig) -> Result<(), ConfigError> {
    if config.check_interval_floor_ms < 10 {
        return Err(ConfigError::Validation(format!(
            "check_interval_floor_ms must be >= 10ms, got {}ms",
            config.check_interval_floor_ms
        )));
    }

    if config.buffer_min_capacity < 1 {
        return Err(ConfigError::Validation(
            "buffer_min_capacity must be >= 1".to_string(),
        ));
    }

    let levels = [
        ("project", &config.project),
        ("proxy", &config.proxy),
        ("domain", &config.domain),
        ("session", &config.session),
    ];
    for (name, level) in levels {
        if let Some(level) = level {
            validate_level(name, level)?;
        }
    }

    Ok(())
}

fn validate_level(name: &str, level: &LevelConfig) -> Result<(), ConfigError> {
    if level.max_requests == Some(0) {
        return Err(ConfigError::Validation(format!(
            "{} max_requests must be >= 1, got 0",
            name
        )));
    }
    Ok(())
}

/// Validates proxy pool entries
fn validate_proxies(proxies: &[ProxyEntry]) -> Result<(), ConfigError> {
    for (i, proxy) in proxies.iter().enumerate() {
        if proxy.host.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "proxy #{} has an empty host",
                i + 1
            )));
        }
        if proxy.port == 0 {
            return Err(ConfigError::Validation(format!(
                "proxy {} has port 0",
                proxy.host
            )));
        }
    }

    for (i, proxy) in proxies.iter().enumerate() {
        if proxies[..i].contains(proxy) {
            return Err(ConfigError::Validation(format!(
                "proxy {}:{} is listed twice",
                proxy.host, proxy.port
            )));
        }
    }

    Ok(())
}

/// Validates HTTP client settings
fn validate_client_config(config: &ClientConfig) -> Result<(), ConfigError> {
    if config.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user_agent cannot be empty".to_string(),
        ));
    }

    if config.timeout_ms < 100 {
        return Err(ConfigError::Validation(format!(
            "timeout_ms must be >= 100ms, got {}ms",
            config.timeout_ms
        )));
    }

    Ok(())
}

fn validate_pipeline(steps: &[StepEntry]) -> Result<(), ConfigError> {
    if steps.is_empty() {
        return Err(ConfigError::Validation(
            "pipeline must contain at least one step".to_string(),
        ));
    }

    if let Some(step) = steps.iter().find(|s| s.name.trim().is_empty()) {
        return Err(ConfigError::Validation(format!(
            "pipeline step names cannot be empty (options: {:?})",
            step.options
        )));
    }

    Ok(())
}
