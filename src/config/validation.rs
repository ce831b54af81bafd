use crate::config::types::{
    Config, ExtractorConfig, HarvestConfig, OutputConfig, OutputFormat, PaginationEntry,
    ProbeConfig, RetryConfig, TargetConfig, UserAgentConfig,
};
use crate::ConfigError;
use scraper::Selector;
use std::collections::HashSet;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_target_config(&config.target)?;
    validate_harvest_config(&config.harvest)?;
    validate_retry_config(&config.retry)?;
    validate_pagination(&config.pagination)?;
    validate_extractors(&config.extractors)?;
    validate_probe_config(&config.probe)?;
    validate_output_config(&config.output)?;
    validate_user_agent_config(&config.user_agent)?;
    Ok(())
}

/// Validates the listing target
fn validate_target_config(config: &TargetConfig) -> Result<(), ConfigError> {
    let expanded = crate::url::expand_listing_url(&config.listing_url, &config.search_terms);
    let url = Url::parse(&expanded).map_err(|e| {
        ConfigError::InvalidUrl(format!("Invalid listing-url '{}': {}", expanded, e))
    })?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::InvalidUrl(format!(
            "listing-url must use http or https, got '{}'",
            url.scheme()
        )));
    }

    if config.listing_url.contains("{query}") && config.search_terms.trim().is_empty() {
        return Err(ConfigError::Validation(
            "search-terms cannot be empty when listing-url contains {query}".to_string(),
        ));
    }

    validate_selector("target.ready-selector", &config.ready_selector)?;
    Ok(())
}

/// Validates harvest loop configuration
fn validate_harvest_config(config: &HarvestConfig) -> Result<(), ConfigError> {
    if config.pool_size < 1 || config.pool_size > 32 {
        return Err(ConfigError::Validation(format!(
            "pool-size must be between 1 and 32, got {}",
            config.pool_size
        )));
    }

    if config.max_pages < 1 {
        return Err(ConfigError::Validation(format!(
            "max-pages must be >= 1, got {}",
            config.max_pages
        )));
    }

    if config.item_limit == Some(0) {
        return Err(ConfigError::Validation(
            "item-limit must be >= 1 when set".to_string(),
        ));
    }

    for (name, value) in [
        ("item-timeout-ms", config.item_timeout_ms),
        ("page-load-timeout-ms", config.page_load_timeout_ms),
        ("close-timeout-ms", config.close_timeout_ms),
    ] {
        if value == 0 {
            return Err(ConfigError::Validation(format!("{} must be > 0", name)));
        }
    }

    Ok(())
}

/// Validates the retry policy bounds
fn validate_retry_config(config: &RetryConfig) -> Result<(), ConfigError> {
    crate::crawler::RetryPolicy::from_config(config).map(|_| ())
}

/// Validates pagination strategies
fn validate_pagination(strategies: &[PaginationEntry]) -> Result<(), ConfigError> {
    if strategies.is_empty() {
        return Err(ConfigError::Validation(
            "at least one [[pagination]] strategy is required".to_string(),
        ));
    }

    let mut names = HashSet::new();
    for strategy in strategies {
        if !names.insert(strategy.name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "Duplicate pagination strategy name '{}'",
                strategy.name
            )));
        }

        validate_selector(&format!("pagination '{}'", strategy.name), &strategy.selector)?;

        if strategy.timeout_ms == 0 {
            return Err(ConfigError::Validation(format!(
                "pagination '{}' timeout-ms must be > 0",
                strategy.name
            )));
        }
    }

    Ok(())
}

/// Validates extraction strategies
fn validate_extractors(extractors: &[ExtractorConfig]) -> Result<(), ConfigError> {
    if extractors.is_empty() {
        return Err(ConfigError::Validation(
            "at least one [[extractor]] is required".to_string(),
        ));
    }

    let mut names = HashSet::new();
    for extractor in extractors {
        if !names.insert(extractor.name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "Duplicate extractor name '{}'",
                extractor.name
            )));
        }

        let context = format!("extractor '{}'", extractor.name);
        validate_selector(&context, &extractor.item_selector)?;
        validate_selector(&context, &extractor.identity.selector)?;

        if let Some(ready) = &extractor.detail_ready_selector {
            validate_selector(&context, ready)?;
        }

        let mut field_names = HashSet::new();
        for field in &extractor.fields {
            validate_selector(&context, &field.selector)?;
            if !field_names.insert(field.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "{} defines field '{}' twice",
                    context, field.name
                )));
            }
        }
        for detail in &extractor.details {
            validate_selector(&context, &detail.selector)?;
            if !field_names.insert(detail.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "{} defines field '{}' twice",
                    context, detail.name
                )));
            }
        }
    }

    Ok(())
}

/// Validates probe configuration
fn validate_probe_config(config: &ProbeConfig) -> Result<(), ConfigError> {
    if config.sample_size < 1 {
        return Err(ConfigError::Validation(
            "probe sample-size must be >= 1".to_string(),
        ));
    }

    if !(0.0..=1.0).contains(&config.min_success_rate) {
        return Err(ConfigError::Validation(format!(
            "probe min-success-rate must be between 0.0 and 1.0, got {}",
            config.min_success_rate
        )));
    }

    Ok(())
}

/// Validates output configuration
fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.path.as_os_str().is_empty() {
        return Err(ConfigError::Validation("output path cannot be empty".to_string()));
    }

    if config.checkpoint_path.as_os_str().is_empty() {
        return Err(ConfigError::Validation(
            "checkpoint-path cannot be empty".to_string(),
        ));
    }

    if config.columns.is_empty() {
        return Err(ConfigError::Validation(
            "output columns cannot be empty".to_string(),
        ));
    }

    let mut columns = HashSet::new();
    for column in &config.columns {
        if column == "identity" {
            return Err(ConfigError::Validation(
                "'identity' is always the first column and cannot be listed".to_string(),
            ));
        }
        if !columns.insert(column.as_str()) {
            return Err(ConfigError::Validation(format!(
                "Duplicate output column '{}'",
                column
            )));
        }
    }

    if let Some(delimiter) = &config.delimiter {
        if config.format == OutputFormat::Sqlite {
            return Err(ConfigError::Validation(
                "delimiter is not used with the sqlite format".to_string(),
            ));
        }
        if delimiter.len() != 1 || delimiter == "\"" || delimiter == "\n" {
            return Err(ConfigError::Validation(format!(
                "delimiter must be a single ASCII character other than quote or newline, got '{}'",
                delimiter
            )));
        }
    }

    Ok(())
}

/// Validates user agent configuration
fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    // Validate crawler name: non-empty, alphanumeric + hyphens only
    if config.crawler_name.is_empty() {
        return Err(ConfigError::Validation(
            "crawler-name cannot be empty".to_string(),
        ));
    }

    if !config
        .crawler_name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "crawler-name must contain only alphanumeric characters and hyphens, got '{}'",
            config.crawler_name
        )));
    }

    Url::parse(&config.contact_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid contact-url: {}", e)))?;

    validate_email(&config.contact_email)?;

    Ok(())
}

/// Checks that a CSS selector parses
fn validate_selector(context: &str, css: &str) -> Result<(), ConfigError> {
    Selector::parse(css)
        .map(|_| ())
        .map_err(|_| {
            ConfigError::Validation(format!("{}: invalid CSS selector '{}'", context, css))
        })
}

/// Basic email validation
fn validate_email(email: &str) -> Result<(), ConfigError> {
    if email.is_empty() {
        return Err(ConfigError::Validation(
            "contact-email cannot be empty".to_string(),
        ));
    }

    // Basic email format check: must contain @ and have text on both sides
    let parts: Vec<&str> = email.split('@').collect();
    if parts.len() != 2 {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    }

    let local = parts[0];
    let domain = parts[1];

    if local.is_empty() || domain.is_empty() || !domain.contains('.') {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    }

    Ok(())
}
