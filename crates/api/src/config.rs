//! Runtime configuration, read once from the environment at startup.

use std::net::SocketAddr;

use thiserror::Error;

use iequip_infra::query::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
use iequip_observability::LogFormat;

pub const BIND_ADDR_VAR: &str = "IEQUIP_BIND_ADDR";
pub const AUDIT_CONDITIONS_VAR: &str = "IEQUIP_AUDIT_CONDITIONS";
pub const DEFAULT_PAGE_SIZE_VAR: &str = "IEQUIP_DEFAULT_PAGE_SIZE";
pub const MAX_PAGE_SIZE_VAR: &str = "IEQUIP_MAX_PAGE_SIZE";
pub const LOG_FORMAT_VAR: &str = "IEQUIP_LOG_FORMAT";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}: invalid value '{value}' ({reason})")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    fn invalid(var: &'static str, value: &str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            var,
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    pub bind_addr: SocketAddr,
    pub audit_conditions: bool,
    pub default_page_size: usize,
    pub max_page_size: usize,
    pub log_format: LogFormat,
    /// Variables that were not set, in lookup order.
    pub defaulted: Vec<&'static str>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            audit_conditions: true,
            default_page_size: DEFAULT_PAGE_SIZE,
            max_page_size: MAX_PAGE_SIZE,
            log_format: LogFormat::Json,
            defaulted: vec![
                BIND_ADDR_VAR,
                AUDIT_CONDITIONS_VAR,
                DEFAULT_PAGE_SIZE_VAR,
                MAX_PAGE_SIZE_VAR,
                LOG_FORMAT_VAR,
            ],
        }
    }
}

impl ApiConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut defaulted = Vec::new();
        let mut lookup = |var: &'static str| {
            let value = lookup(var);
            if value.is_none() {
                defaulted.push(var);
            }
            value
        };

        let bind_addr = match lookup(BIND_ADDR_VAR) {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|e| ConfigError::invalid(BIND_ADDR_VAR, &raw, format!("{e}")))?,
            None => ApiConfig::default().bind_addr,
        };

        let audit_conditions = match lookup(AUDIT_CONDITIONS_VAR) {
            Some(raw) => parse_bool(AUDIT_CONDITIONS_VAR, &raw)?,
            None => true,
        };

        let default_page_size = match lookup(DEFAULT_PAGE_SIZE_VAR) {
            Some(raw) => parse_positive(DEFAULT_PAGE_SIZE_VAR, &raw)?,
            None => DEFAULT_PAGE_SIZE,
        };
        let max_page_size = match lookup(MAX_PAGE_SIZE_VAR) {
            Some(raw) => parse_positive(MAX_PAGE_SIZE_VAR, &raw)?,
            None => MAX_PAGE_SIZE,
        };
        if default_page_size > max_page_size {
            return Err(ConfigError::invalid(
                DEFAULT_PAGE_SIZE_VAR,
                &default_page_size.to_string(),
                format!("exceeds {MAX_PAGE_SIZE_VAR} ({max_page_size})"),
            ));
        }

        let log_format = match lookup(LOG_FORMAT_VAR) {
            Some(raw) => raw
                .parse()
                .map_err(|e: String| ConfigError::invalid(LOG_FORMAT_VAR, &raw, e))?,
            None => LogFormat::default(),
        };

        Ok(Self {
            bind_addr,
            audit_conditions,
            default_page_size,
            max_page_size,
            log_format,
            defaulted,
        })
    }

    /// Report every variable that fell back to its default. Called once the
    /// subscriber is installed.
    pub fn log_defaults(&self) {
        for var in &self.defaulted {
            tracing::info!(var = *var, "not set; using default");
        }
    }
}

fn parse_bool(var: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::invalid(var, raw, "expected true or false")),
    }
}

fn parse_positive(var: &'static str, raw: &str) -> Result<usize, ConfigError> {
    match raw.trim().parse::<usize>() {
        Ok(0) => Err(ConfigError::invalid(var, raw, "must be at least 1")),
        Ok(n) => Ok(n),
        Err(e) => Err(ConfigError::invalid(var, raw, e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = ApiConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, ApiConfig::default());
        assert_eq!(config.bind_addr.to_string(), "0.0.0.0:8080");
        assert_eq!(config.defaulted.len(), 5);
    }

    #[test]
    fn every_variable_is_honoured() {
        let config = ApiConfig::from_lookup(lookup(&[
            (BIND_ADDR_VAR, "127.0.0.1:9000"),
            (AUDIT_CONDITIONS_VAR, "false"),
            (DEFAULT_PAGE_SIZE_VAR, "10"),
            (MAX_PAGE_SIZE_VAR, "50"),
            (LOG_FORMAT_VAR, "pretty"),
        ]))
        .unwrap();

        assert_eq!(config.bind_addr.port(), 9000);
        assert!(!config.audit_conditions);
        assert_eq!(config.default_page_size, 10);
        assert_eq!(config.max_page_size, 50);
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert!(config.defaulted.is_empty());
    }

    #[test]
    fn unset_variables_are_reported_as_defaulted() {
        let config = ApiConfig::from_lookup(lookup(&[
            (BIND_ADDR_VAR, "127.0.0.1:9000"),
            (LOG_FORMAT_VAR, "pretty"),
        ]))
        .unwrap();

        assert_eq!(
            config.defaulted,
            vec![AUDIT_CONDITIONS_VAR, DEFAULT_PAGE_SIZE_VAR, MAX_PAGE_SIZE_VAR]
        );
        assert!(config.audit_conditions);
        assert_eq!(config.max_page_size, MAX_PAGE_SIZE);
    }

    #[test]
    fn malformed_values_name_the_variable() {
        let err = ApiConfig::from_lookup(lookup(&[(MAX_PAGE_SIZE_VAR, "lots")])).unwrap_err();
        assert!(err.to_string().starts_with(MAX_PAGE_SIZE_VAR));

        let err = ApiConfig::from_lookup(lookup(&[(AUDIT_CONDITIONS_VAR, "maybe")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: AUDIT_CONDITIONS_VAR, .. }));

        assert!(ApiConfig::from_lookup(lookup(&[(BIND_ADDR_VAR, "localhost")])).is_err());
        assert!(ApiConfig::from_lookup(lookup(&[(DEFAULT_PAGE_SIZE_VAR, "0")])).is_err());
    }

    #[test]
    fn default_page_size_cannot_exceed_the_maximum() {
        let err = ApiConfig::from_lookup(lookup(&[
            (DEFAULT_PAGE_SIZE_VAR, "100"),
            (MAX_PAGE_SIZE_VAR, "20"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: DEFAULT_PAGE_SIZE_VAR, .. }));
    }
}
