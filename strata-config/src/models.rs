use std::path::PathBuf;
use std::time::Duration;

use chrono::NaiveDate;
use strata_model::RateLimitSpec;

pub const DEFAULT_API_BASE_URL: &str = "http://api.tushare.pro";
pub const DEFAULT_PAGE_SIZE: usize = 5000;
pub const DEFAULT_ENDPOINT_CONCURRENCY: usize = 5;
pub const DEFAULT_TASK_CONCURRENCY: usize = 5;
pub const DEFAULT_MAX_CONCURRENCY: usize = 20;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Fully resolved configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub api: ApiConfig,
    pub rate_limits: RateLimitConfig,
    pub tasks: TaskDefaults,
    pub metadata: ConfigMetadata,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    /// Applied to every pooled connection when set.
    pub search_path: Option<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(30),
            search_path: None,
        }
    }
}

#[derive(Clone)]
pub struct ApiConfig {
    pub base_url: String,
    pub token: Option<String>,
    pub request_timeout: Duration,
    pub default_page_size: usize,
}

impl std::fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiConfig")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("request_timeout", &self.request_timeout)
            .field("default_page_size", &self.default_page_size)
            .finish()
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_BASE_URL.to_string(),
            token: None,
            request_timeout: Duration::from_secs(60),
            default_page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// Per-endpoint concurrency ceilings.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub default_max_concurrent: usize,
    pub endpoints: Vec<RateLimitSpec>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            default_max_concurrent: DEFAULT_ENDPOINT_CONCURRENCY,
            endpoints: Vec::new(),
        }
    }
}

/// Defaults applied to task invocations that leave a knob unset.
#[derive(Debug, Clone)]
pub struct TaskDefaults {
    pub default_concurrency: usize,
    /// Upper bound on workers per task regardless of what a caller asks for.
    pub max_concurrency: usize,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub default_start_date: Option<NaiveDate>,
    pub auto_create_tables: bool,
}

impl Default for TaskDefaults {
    fn default() -> Self {
        Self {
            default_concurrency: DEFAULT_TASK_CONCURRENCY,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
            default_start_date: None,
            auto_create_tables: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConfigMetadata {
    pub config_path: Option<PathBuf>,
    pub env_file_loaded: bool,
}
