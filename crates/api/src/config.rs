//! Service configuration, read from the environment.
//!
//! `main` loads an optional `.env` file first (`dotenvy`), so every key below
//! can also be set there.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use axum::http::HeaderValue;

use bulkimport_observability::LogFormat;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: '{value}'")]
    Invalid { key: &'static str, value: String },
    #[error("{0} must be set when USE_PERSISTENT_STORES=true")]
    Missing(&'static str),
}

/// Allowed CORS origins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorsOrigins {
    Any,
    List(Vec<HeaderValue>),
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    /// Postgres stores instead of in-memory ones.
    pub use_persistent_stores: bool,
    pub database_url: Option<String>,
    /// Where uploaded CSV files are written.
    pub upload_folder: PathBuf,
    /// Request body limit in bytes.
    pub max_content_length: usize,
    pub cors_origins: CorsOrigins,
    pub max_concurrent_imports: usize,
    pub webhook_timeout: Duration,
    pub webhook_test_timeout: Duration,
    pub webhook_max_attempts: u32,
    /// Wait after the first failed delivery; doubles on each retry.
    pub webhook_retry_delay: Duration,
    pub log_format: LogFormat,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 5000)),
            use_persistent_stores: false,
            database_url: None,
            upload_folder: PathBuf::from("storage/uploads"),
            max_content_length: 1024 * 1024 * 1024,
            cors_origins: CorsOrigins::Any,
            max_concurrent_imports: 4,
            webhook_timeout: Duration::from_secs(5),
            webhook_test_timeout: Duration::from_secs(10),
            webhook_max_attempts: 3,
            webhook_retry_delay: Duration::from_millis(500),
            log_format: LogFormat::Json,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from any key lookup; unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let use_persistent_stores = match get("USE_PERSISTENT_STORES") {
            Some(v) => parse_bool("USE_PERSISTENT_STORES", &v)?,
            None => defaults.use_persistent_stores,
        };
        let database_url = get("DATABASE_URL");
        if use_persistent_stores && database_url.is_none() {
            return Err(ConfigError::Missing("DATABASE_URL"));
        }

        let max_concurrent_imports: usize =
            parse_or("MAX_CONCURRENT_IMPORTS", get("MAX_CONCURRENT_IMPORTS"), defaults.max_concurrent_imports)?;
        if max_concurrent_imports == 0 {
            return Err(ConfigError::Invalid {
                key: "MAX_CONCURRENT_IMPORTS",
                value: "0".to_string(),
            });
        }

        Ok(Self {
            bind_addr: parse_or("BIND_ADDR", get("BIND_ADDR"), defaults.bind_addr)?,
            use_persistent_stores,
            database_url,
            upload_folder: get("UPLOAD_FOLDER").map(PathBuf::from).unwrap_or(defaults.upload_folder),
            max_content_length: parse_or("MAX_CONTENT_LENGTH", get("MAX_CONTENT_LENGTH"), defaults.max_content_length)?,
            cors_origins: match get("CORS_ORIGINS") {
                Some(v) => parse_cors_origins(&v)?,
                None => defaults.cors_origins,
            },
            max_concurrent_imports,
            webhook_timeout: Duration::from_secs(parse_or(
                "WEBHOOK_TIMEOUT_SECS",
                get("WEBHOOK_TIMEOUT_SECS"),
                defaults.webhook_timeout.as_secs(),
            )?),
            webhook_test_timeout: Duration::from_secs(parse_or(
                "WEBHOOK_TEST_TIMEOUT_SECS",
                get("WEBHOOK_TEST_TIMEOUT_SECS"),
                defaults.webhook_test_timeout.as_secs(),
            )?),
            webhook_max_attempts: parse_or("WEBHOOK_MAX_ATTEMPTS", get("WEBHOOK_MAX_ATTEMPTS"), defaults.webhook_max_attempts)?
                .max(1),
            webhook_retry_delay: Duration::from_millis(parse_or(
                "WEBHOOK_RETRY_DELAY_MS",
                get("WEBHOOK_RETRY_DELAY_MS"),
                u64::try_from(defaults.webhook_retry_delay.as_millis()).unwrap_or(u64::MAX),
            )?),
            log_format: match get("LOG_FORMAT") {
                Some(v) => v.parse().map_err(|_| ConfigError::Invalid { key: "LOG_FORMAT", value: v })?,
                None => defaults.log_format,
            },
        })
    }
}

fn parse_or<T: FromStr>(key: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError> {
    match raw {
        Some(value) => value.parse().map_err(|_| ConfigError::Invalid { key, value }),
        None => Ok(default),
    }
}

fn parse_bool(key: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            key,
            value: raw.to_string(),
        }),
    }
}

fn parse_cors_origins(raw: &str) -> Result<CorsOrigins, ConfigError> {
    let origins: Vec<&str> = raw.split(',').map(str::trim).filter(|s| !s.is_empty()).collect();
    if origins.is_empty() || origins.contains(&"*") {
        return Ok(CorsOrigins::Any);
    }
    origins
        .into_iter()
        .map(|origin| {
            HeaderValue::from_str(origin).map_err(|_| ConfigError::Invalid {
                key: "CORS_ORIGINS",
                value: origin.to_string(),
            })
        })
        .collect::<Result<Vec<_>, _>>()
        .map(CorsOrigins::List)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let env: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        AppConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg.bind_addr.port(), 5000);
        assert!(!cfg.use_persistent_stores);
        assert_eq!(cfg.upload_folder, PathBuf::from("storage/uploads"));
        assert_eq!(cfg.max_content_length, 1_073_741_824);
        assert_eq!(cfg.cors_origins, CorsOrigins::Any);
        assert_eq!(cfg.webhook_timeout, Duration::from_secs(5));
        assert_eq!(cfg.webhook_test_timeout, Duration::from_secs(10));
        assert_eq!(cfg.webhook_retry_delay, Duration::from_millis(500));
        assert_eq!(cfg.log_format, LogFormat::Json);
    }

    #[test]
    fn persistent_stores_need_a_database_url() {
        assert_eq!(
            config(&[("USE_PERSISTENT_STORES", "true")]).unwrap_err(),
            ConfigError::Missing("DATABASE_URL")
        );
        let cfg = config(&[("USE_PERSISTENT_STORES", "true"), ("DATABASE_URL", "postgres://x/y")]).unwrap();
        assert!(cfg.use_persistent_stores);
    }

    #[test]
    fn malformed_values_name_the_key() {
        let err = config(&[("MAX_CONCURRENT_IMPORTS", "many")]).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                key: "MAX_CONCURRENT_IMPORTS",
                value: "many".to_string()
            }
        );
        assert!(config(&[("BIND_ADDR", "localhost")]).is_err());
        assert!(config(&[("LOG_FORMAT", "xml")]).is_err());
    }

    #[test]
    fn webhook_retry_settings_are_read() {
        let cfg = config(&[("WEBHOOK_MAX_ATTEMPTS", "5"), ("WEBHOOK_RETRY_DELAY_MS", "250")]).unwrap();
        assert_eq!(cfg.webhook_max_attempts, 5);
        assert_eq!(cfg.webhook_retry_delay, Duration::from_millis(250));
        assert_eq!(config(&[("WEBHOOK_MAX_ATTEMPTS", "0")]).unwrap().webhook_max_attempts, 1);
        assert!(config(&[("WEBHOOK_RETRY_DELAY_MS", "soon")]).is_err());
    }

    #[test]
    fn cors_origin_list_is_parsed() {
        let cfg = config(&[("CORS_ORIGINS", "http://localhost:3000, https://admin.example.com")]).unwrap();
        match cfg.cors_origins {
            CorsOrigins::List(list) => assert_eq!(list.len(), 2),
            CorsOrigins::Any => panic!("expected an explicit origin list"),
        }
        assert_eq!(config(&[("CORS_ORIGINS", "*")]).unwrap().cors_origins, CorsOrigins::Any);
    }
}
