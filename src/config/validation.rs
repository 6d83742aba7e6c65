use super::{AppConfig, ConfigError};

/// Validate the full application config, returning an error if any rule is violated.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] when any configuration invariant is violated.
pub fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    validate_server_config(config)?;
    validate_upstream(config)?;
    validate_tools(config)?;
    validate_log_level(config)?;
    Ok(())
}

fn validation_err(msg: impl Into<String>) -> ConfigError {
    ConfigError::Validation(msg.into())
}

fn validate_server_config(config: &AppConfig) -> Result<(), ConfigError> {
    let server = &config.server;
    if server.http_pool_max_idle_per_host == 0 {
        return Err(validation_err(
            "server.http_pool_max_idle_per_host must be greater than 0",
        ));
    }
    if server.timeout == 0 {
        return Err(validation_err("server.timeout must be greater than 0"));
    }
    if let Some(worker_threads) = server.runtime_worker_threads {
        if worker_threads == 0 {
            return Err(validation_err(
                "server.runtime_worker_threads must be greater than 0 when set",
            ));
        }
    }
    Ok(())
}

fn validate_upstream(config: &AppConfig) -> Result<(), ConfigError> {
    let upstream = &config.upstream;
    validate_http_url("upstream.base_url", &upstream.base_url)?;
    if upstream.api_key.trim().is_empty() {
        return Err(validation_err(format!(
            "upstream.api_key cannot be empty (set it in the config file or via {})",
            super::API_KEY_ENV
        )));
    }
    if upstream.model.trim().is_empty() {
        return Err(validation_err("upstream.model cannot be empty"));
    }
    Ok(())
}

fn validate_tools(config: &AppConfig) -> Result<(), ConfigError> {
    validate_http_url("tools.weather_base_url", &config.tools.weather_base_url)
}

fn validate_http_url(field_name: &str, value: &str) -> Result<(), ConfigError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(validation_err(format!("{field_name} cannot be empty")));
    }
    let parsed = url::Url::parse(value)
        .map_err(|err| validation_err(format!("{field_name} is not a valid URL: {err}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(validation_err(format!(
            "{field_name} must start with http:// or https://"
        )));
    }
    Ok(())
}

fn validate_log_level(config: &AppConfig) -> Result<(), ConfigError> {
    let valid_levels = ["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL", "DISABLED"];
    if !valid_levels.contains(&config.features.log_level.to_uppercase().as_str()) {
        return Err(validation_err(format!(
            "log_level must be one of {valid_levels:?}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UpstreamConfig;

    fn make_valid_config() -> AppConfig {
        AppConfig {
            upstream: UpstreamConfig {
                api_key: "sk-test".to_string(),
                ..UpstreamConfig::default()
            },
            ..AppConfig::default()
        }
    }

    fn assert_invalid(config: &AppConfig, needle: &str) {
        match validate_config(config) {
            Err(ConfigError::Validation(msg)) => {
                assert!(msg.contains(needle), "unexpected message: {msg}");
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(validate_config(&make_valid_config()).is_ok());
    }

    #[test]
    fn test_invalid_base_url() {
        let mut config = make_valid_config();
        config.upstream.base_url = "ftp://example.com".to_string();
        assert_invalid(&config, "upstream.base_url");
    }

    #[test]
    fn test_empty_api_key() {
        let mut config = make_valid_config();
        config.upstream.api_key = "  ".to_string();
        assert_invalid(&config, "api_key");
    }

    #[test]
    fn test_empty_model() {
        let mut config = make_valid_config();
        config.upstream.model = String::new();
        assert_invalid(&config, "upstream.model");
    }

    #[test]
    fn test_invalid_weather_url() {
        let mut config = make_valid_config();
        config.tools.weather_base_url = "not a url".to_string();
        assert_invalid(&config, "tools.weather_base_url");
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = make_valid_config();
        config.features.log_level = "VERBOSE".to_string();
        assert_invalid(&config, "log_level");
    }

    #[test]
    fn test_log_level_is_case_insensitive() {
        let mut config = make_valid_config();
        config.features.log_level = "warning".to_string();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_invalid_pool_max_idle_per_host() {
        let mut config = make_valid_config();
        config.server.http_pool_max_idle_per_host = 0;
        assert_invalid(&config, "http_pool_max_idle_per_host");
    }

    #[test]
    fn test_invalid_runtime_worker_threads() {
        let mut config = make_valid_config();
        config.server.runtime_worker_threads = Some(0);
        assert_invalid(&config, "runtime_worker_threads");
    }
}
