use super::{types::Config, ConfigError};

fn invalid(message: impl Into<String>) -> Result<(), ConfigError> {
    Err(ConfigError::ValidationError(message.into()))
}

/// Validate configuration.
///
/// Rejects settings that would make the matcher, the snatch policy or the
/// post-processor behave nonsensically rather than failing loudly.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return invalid("server.port cannot be 0");
    }

    let matching = &config.matching;
    for (name, value) in [
        ("snatch_threshold", matching.snatch_threshold),
        ("confirm_threshold", matching.confirm_threshold),
        ("missing_author_penalty", matching.missing_author_penalty),
    ] {
        if value > 100 {
            return invalid(format!("matching.{} must be within 0..=100", name));
        }
    }
    if matching.snatch_threshold > matching.confirm_threshold {
        return invalid("matching.snatch_threshold cannot exceed matching.confirm_threshold");
    }
    if u16::from(matching.title_weight) + u16::from(matching.author_weight) != 100 {
        return invalid("matching.title_weight and matching.author_weight must sum to 100");
    }

    let snatch = &config.snatch;
    if snatch.max_size > 0 && snatch.min_size > snatch.max_size {
        return invalid("snatch.min_size cannot exceed snatch.max_size");
    }
    if snatch.max_snatch_attempts == 0 {
        return invalid("snatch.max_snatch_attempts must be at least 1");
    }

    for (idx, provider) in config.providers.iter().enumerate() {
        if provider.name.trim().is_empty() {
            return invalid(format!("providers[{}].name cannot be empty", idx));
        }
        if provider.url.trim().is_empty() {
            return invalid(format!("providers[{}].url cannot be empty", idx));
        }
    }

    for (name, template) in config.library.templates() {
        if template.trim().is_empty() {
            return invalid(format!("library.{} cannot be empty", name));
        }
    }

    let scheduler = &config.scheduler;
    if scheduler.max_process_retries == 0 {
        return invalid("scheduler.max_process_retries must be at least 1");
    }
    if scheduler.max_concurrent_searches == 0 || scheduler.max_parallel_reconciles == 0 {
        return invalid("scheduler concurrency limits must be at least 1");
    }

    Ok(())
}
