//! Configuration loading from disk and the process environment.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::AppConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {key}: {message}")]
    Env { key: String, message: String },

    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors.iter().map(|e| e.to_string()).collect::<Vec<_>>().join(", ")
}

/// Load a TOML file, apply environment overrides, validate.
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let config: AppConfig = toml::from_str(&content)?;
    finish(config)
}

/// Defaults plus environment overrides, validated.
pub fn from_env() -> Result<AppConfig, ConfigError> {
    finish(AppConfig::default())
}

fn finish(mut config: AppConfig) -> Result<AppConfig, ConfigError> {
    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    if config.app.namespace_by_environment {
        config.broker.namespace(config.app.environment);
    }
    Ok(config)
}

/// Overlay values found through `lookup` (normally the process environment).
pub fn apply_env_overrides<F>(config: &mut AppConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(env) = lookup("APP_ENV") {
        config.app.environment = env.parse().map_err(|message| ConfigError::Env {
            key: "APP_ENV".to_string(),
            message,
        })?;
    }
    if let Some(name) = lookup("APP_NAME") {
        config.app.name = name;
    }

    let broker = &mut config.broker;
    override_string(&lookup, "BROKER_HOST", &mut broker.host);
    override_string(&lookup, "BROKER_USER", &mut broker.user);
    override_string(&lookup, "BROKER_PASSWORD", &mut broker.password);
    override_string(&lookup, "BROKER_VHOST", &mut broker.vhost);
    override_port(&lookup, "BROKER_PORT", &mut broker.port)?;
    if let Some(queue_type) = lookup("BROKER_QUEUE_TYPE") {
        broker.queue_type = Some(queue_type).filter(|q| !q.is_empty());
    }

    let docstore = &mut config.docstore;
    override_string(&lookup, "DOCSTORE_HOST", &mut docstore.host);
    override_string(&lookup, "DOCSTORE_USER", &mut docstore.user);
    override_string(&lookup, "DOCSTORE_PASSWORD", &mut docstore.password);
    override_string(&lookup, "DOCSTORE_DATABASE", &mut docstore.database);
    override_port(&lookup, "DOCSTORE_PORT", &mut docstore.port)?;

    Ok(())
}

fn override_string<F: Fn(&str) -> Option<String>>(lookup: &F, key: &str, target: &mut String) {
    if let Some(value) = lookup(key) {
        *target = value;
    }
}

fn override_port<F: Fn(&str) -> Option<String>>(lookup: &F, key: &str, target: &mut u16) -> Result<(), ConfigError> {
    if let Some(value) = lookup(key) {
        *target = value.parse().map_err(|e: std::num::ParseIntError| ConfigError::Env {
            key: key.to_string(),
            message: e.to_string(),
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::Environment;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_env_overrides() {
        let mut config = AppConfig::default();
        apply_env_overrides(
            &mut config,
            env(&[
                ("APP_ENV", "dev"),
                ("BROKER_HOST", "rabbit.internal"),
                ("BROKER_PORT", "5671"),
                ("BROKER_QUEUE_TYPE", ""),
                ("DOCSTORE_DATABASE", "orders"),
            ]),
        )
        .unwrap();

        assert_eq!(config.app.environment, Environment::Dev);
        assert_eq!(config.broker.host, "rabbit.internal");
        assert_eq!(config.broker.port, 5671);
        assert_eq!(config.broker.queue_type, None);
        assert_eq!(config.docstore.database, "orders");
    }

    #[test]
    fn test_bad_env_values_are_rejected() {
        let mut config = AppConfig::default();
        let err = apply_env_overrides(&mut config, env(&[("BROKER_PORT", "not-a-port")])).unwrap_err();
        assert!(err.to_string().contains("BROKER_PORT"));

        let err = apply_env_overrides(&mut config, env(&[("APP_ENV", "staging")])).unwrap_err();
        assert!(err.to_string().contains("invalid environment"));
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_config(Path::new("does-not-exist.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
