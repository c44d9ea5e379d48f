use super::{types::Config, ConfigError};

/// Validate configuration
/// Currently validates:
/// - Queue concurrency is not 0
/// - Bulk stream chunk size is not 0
/// - Remote API base URL is set
/// - Poll intervals are not 0
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.queue.max_concurrent_downloads == 0 {
        return Err(ConfigError::ValidationError(
            "queue.max_concurrent_downloads cannot be 0".to_string(),
        ));
    }

    if config.remote.chunk_size == 0 {
        return Err(ConfigError::ValidationError(
            "remote.chunk_size cannot be 0".to_string(),
        ));
    }

    if config.remote.api_base_url.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "remote.api_base_url cannot be empty".to_string(),
        ));
    }

    if config.queue.dispatch_poll_ms == 0 || config.jobs.poll_interval_ms == 0 {
        return Err(ConfigError::ValidationError(
            "poll intervals cannot be 0".to_string(),
        ));
    }

    if config.bulk.image_workers == 0 {
        return Err(ConfigError::ValidationError(
            "bulk.image_workers cannot be 0".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_default_config() {
        assert!(validate_config(&Config::default()).is_ok());
    }

    #[test]
    fn test_validate_zero_concurrency_fails() {
        let mut config = Config::default();
        config.queue.max_concurrent_downloads = 0;
        let result = validate_config(&config);
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_validate_empty_base_url_fails() {
        let mut config = Config::default();
        config.remote.api_base_url = "  ".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_zero_chunk_size_fails() {
        let mut config = Config::default();
        config.remote.chunk_size = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_zero_poll_interval_fails() {
        let mut config = Config::default();
        config.jobs.poll_interval_ms = 0;
        assert!(validate_config(&config).is_err());
    }
}
