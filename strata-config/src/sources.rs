use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use strata_model::RateLimitSpec;

/// Raw configuration as defined in a TOML file.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct FileConfig {
    #[serde(default)]
    pub database: FileDatabaseConfig,
    #[serde(default)]
    pub api: FileApiConfig,
    #[serde(default)]
    pub rate_limits: FileRateLimitConfig,
    #[serde(default)]
    pub tasks: FileTaskConfig,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileDatabaseConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_connections: Option<u32>,
    /// Human-readable duration, e.g. `30s`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acquire_timeout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_path: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileApiConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_timeout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_page_size: Option<usize>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileRateLimitConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_max_concurrent: Option<usize>,
    #[serde(default)]
    pub endpoints: Vec<RateLimitSpec>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileTaskConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_concurrency: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_delay: Option<String>,
    /// `YYYY-MM-DD` or `YYYYMMDD`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_start_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_create_tables: Option<bool>,
}

/// Environment-derived configuration values.
#[derive(Debug, Default, Clone)]
pub struct EnvConfig {
    pub config_path: Option<PathBuf>,
    pub database_url: Option<String>,
    pub database_url_file: Option<PathBuf>,
    pub database_host: Option<String>,
    pub database_port: Option<u16>,
    pub database_user: Option<String>,
    pub database_name: Option<String>,
    pub database_password: Option<String>,
    pub database_password_file: Option<PathBuf>,
    pub database_max_connections: Option<u32>,
    pub database_min_connections: Option<u32>,
    pub api_base_url: Option<String>,
    pub api_token: Option<String>,
    pub api_token_file: Option<PathBuf>,
    pub api_page_size: Option<usize>,
    pub rate_limit_default: Option<usize>,
    /// Raw `endpoint=limit,endpoint=limit` list.
    pub rate_limits_inline: Option<String>,
    pub task_concurrency: Option<usize>,
    pub task_max_concurrency: Option<usize>,
    pub task_max_retries: Option<u32>,
    pub task_retry_delay: Option<String>,
    pub task_default_start_date: Option<String>,
    pub task_auto_create_tables: Option<bool>,
}

impl EnvConfig {
    pub fn gather() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the environment layer from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let parse = |key: &str| lookup(key).and_then(|s| s.trim().parse().ok());
        let path = |key: &str| lookup(key).map(PathBuf::from);

        Self {
            config_path: path("STRATA_CONFIG"),
            database_url: lookup("DATABASE_URL"),
            database_url_file: path("DATABASE_URL_FILE"),
            database_host: lookup("DATABASE_HOST"),
            database_port: lookup("DATABASE_PORT")
                .and_then(|s| s.trim().parse().ok()),
            database_user: lookup("DATABASE_USER"),
            database_name: lookup("DATABASE_NAME"),
            database_password: lookup("DATABASE_PASSWORD"),
            database_password_file: path("DATABASE_PASSWORD_FILE"),
            database_max_connections: lookup("DB_MAX_CONNECTIONS")
                .and_then(|s| s.trim().parse().ok()),
            database_min_connections: lookup("DB_MIN_CONNECTIONS")
                .and_then(|s| s.trim().parse().ok()),
            api_base_url: lookup("STRATA_API_URL"),
            api_token: lookup("STRATA_API_TOKEN"),
            api_token_file: path("STRATA_API_TOKEN_FILE"),
            api_page_size: parse("STRATA_PAGE_SIZE"),
            rate_limit_default: parse("STRATA_RATE_LIMIT_DEFAULT"),
            rate_limits_inline: lookup("STRATA_RATE_LIMITS")
                .filter(|raw| !raw.trim().is_empty()),
            task_concurrency: parse("STRATA_CONCURRENCY"),
            task_max_concurrency: parse("STRATA_MAX_CONCURRENCY"),
            task_max_retries: lookup("STRATA_MAX_RETRIES")
                .and_then(|s| s.trim().parse().ok()),
            task_retry_delay: lookup("STRATA_RETRY_DELAY"),
            task_default_start_date: lookup("STRATA_DEFAULT_START_DATE"),
            task_auto_create_tables: lookup("STRATA_AUTO_CREATE_TABLES")
                .and_then(|raw| parse_bool(&raw)),
        }
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parses `daily=2, income=1` into specs. Malformed entries are reported
/// by name so the loader can surface them.
pub fn parse_inline_rate_limits(
    raw: &str,
) -> Result<Vec<RateLimitSpec>, String> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            let (name, limit) = part
                .split_once('=')
                .ok_or_else(|| part.to_string())?;
            let limit = limit
                .trim()
                .parse::<usize>()
                .map_err(|_| part.to_string())?;
            Ok(RateLimitSpec::new(name.trim(), limit))
        })
        .collect()
}
