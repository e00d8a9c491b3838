//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (ports, TTLs, retry multipliers, liveness windows)
//! - Detect duplicate queue declarations
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: AppConfig → Result<(), Vec<ValidationError>>

use std::collections::HashSet;

use thiserror::Error;

use crate::config::schema::AppConfig;
use crate::resilience::RetryPolicy;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

pub fn validate_config(config: &AppConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.app.name.trim().is_empty() {
        errors.push(ValidationError::new("app.name", "must not be empty"));
    }

    let broker = &config.broker;
    if broker.host.trim().is_empty() {
        errors.push(ValidationError::new("broker.host", "must not be empty"));
    }
    if broker.port == 0 {
        errors.push(ValidationError::new("broker.port", "must be non-zero"));
    }
    if broker.default_message_ttl_ms == 0 {
        errors.push(ValidationError::new("broker.default_message_ttl_ms", "must be non-zero"));
    }
    if broker.buffer_capacity == 0 {
        errors.push(ValidationError::new("broker.buffer_capacity", "must be non-zero"));
    }
    if broker.dead_letter.exchange.is_empty() || broker.dead_letter.queue.is_empty() {
        errors.push(ValidationError::new("broker.dead_letter", "exchange and queue names are required"));
    }

    let mut seen = HashSet::new();
    for (i, queue) in broker.queues.iter().enumerate() {
        if queue.name.is_empty() {
            errors.push(ValidationError::new(format!("broker.queues[{}].name", i), "must not be empty"));
        }
        if queue.message_ttl_ms == 0 {
            errors.push(ValidationError::new(format!("broker.queues[{}].message_ttl_ms", i), "must be non-zero"));
        }
        if !seen.insert(queue.name.as_str()) {
            errors.push(ValidationError::new(
                format!("broker.queues[{}].name", i),
                format!("duplicate queue '{}'", queue.name),
            ));
        }
    }

    check_retry("broker.connect_retry", &broker.connect_retry, &mut errors);
    check_retry("broker.reconnect_retry", &broker.reconnect_retry, &mut errors);

    let docstore = &config.docstore;
    if docstore.host.trim().is_empty() {
        errors.push(ValidationError::new("docstore.host", "must not be empty"));
    }
    if docstore.port == 0 {
        errors.push(ValidationError::new("docstore.port", "must be non-zero"));
    }
    if docstore.database.is_empty() {
        errors.push(ValidationError::new("docstore.database", "must not be empty"));
    }
    check_retry("docstore.connect_retry", &docstore.connect_retry, &mut errors);

    if config.liveness.default_max_reconnect_ms == 0 {
        errors.push(ValidationError::new("liveness.default_max_reconnect_ms", "must be non-zero"));
    }
    for (app, deps) in &config.liveness.apps {
        for (dep, limit) in deps {
            if limit.max_reconnect_ms == 0 {
                errors.push(ValidationError::new(
                    format!("liveness.apps.{}.{}.max_reconnect_ms", app, dep),
                    "must be non-zero",
                ));
            }
        }
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<std::net::SocketAddr>().is_err()
    {
        errors.push(ValidationError::new("observability.metrics_address", "not a socket address"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_retry(field: &str, policy: &RetryPolicy, errors: &mut Vec<ValidationError>) {
    if !policy.multiplier.is_finite() || policy.multiplier < 1.0 {
        errors.push(ValidationError::new(format!("{}.multiplier", field), "must be >= 1.0"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::QueueConfig;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&AppConfig::default()).is_ok());
    }

    #[test]
    fn test_collects_every_error() {
        let mut config = AppConfig::default();
        config.broker.port = 0;
        config.broker.connect_retry.multiplier = 0.5;
        config.docstore.host = String::new();
        config.broker.queues = vec![
            QueueConfig { name: "a".into(), message_ttl_ms: 1 },
            QueueConfig { name: "a".into(), message_ttl_ms: 0 },
        ];

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"broker.port"));
        assert!(fields.contains(&"broker.connect_retry.multiplier"));
        assert!(fields.contains(&"docstore.host"));
        assert!(fields.contains(&"broker.queues[1].message_ttl_ms"));
        assert!(errors.iter().any(|e| e.message.contains("duplicate queue 'a'")));
    }
}
