use chrono::NaiveDate;
use once_cell::sync::Lazy;
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;
use url::Url;

use super::{
    models::{
        ApiConfig, Config, ConfigMetadata, DatabaseConfig, RateLimitConfig,
        TaskDefaults,
    },
    sources::{EnvConfig, FileConfig, FileDatabaseConfig, parse_inline_rate_limits},
    validation::{self, ConfigGuardRailError, ConfigWarnings},
};

static DEFAULT_CONFIG_LOCATIONS: Lazy<Vec<PathBuf>> = Lazy::new(|| {
    vec![
        PathBuf::from("strata.toml"),
        PathBuf::from("config/strata.toml"),
    ]
});

#[derive(Debug, Default, Clone)]
pub struct ConfigLoaderOptions {
    pub config_path: Option<PathBuf>,
    pub env_file: Option<PathBuf>,
    /// Do not read any `.env` file.
    pub skip_env_file: bool,
}

#[derive(Debug, Default)]
pub struct ConfigLoader {
    options: ConfigLoaderOptions,
}

/// Resolved configuration plus non-fatal findings.
#[derive(Debug)]
pub struct ConfigLoad {
    pub config: Config,
    pub warnings: ConfigWarnings,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: ConfigLoaderOptions) -> Self {
        Self { options }
    }

    pub fn with_config_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    pub fn with_env_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.env_file = Some(path.into());
        self
    }

    pub fn without_env_file(mut self) -> Self {
        self.options.skip_env_file = true;
        self
    }

    pub fn load(&self) -> Result<ConfigLoad, ConfigLoadError> {
        let env_file_loaded = self.load_env_file()?;
        self.compose(EnvConfig::gather(), env_file_loaded)
    }

    /// Loads using an explicit environment layer instead of the process
    /// environment. No `.env` file is read.
    pub fn load_with_env(
        &self,
        env: EnvConfig,
    ) -> Result<ConfigLoad, ConfigLoadError> {
        self.compose(env, false)
    }

    fn load_env_file(&self) -> Result<bool, ConfigLoadError> {
        if self.options.skip_env_file {
            return Ok(false);
        }
        let loaded = match &self.options.env_file {
            Some(path) => dotenvy::from_path(path).map(|_| true),
            None => dotenvy::dotenv().map(|_| true),
        };
        loaded.or_else(|err| match err {
            dotenvy::Error::Io(_) => Ok(false),
            _ => Err(err.into()),
        })
    }

    fn compose(
        &self,
        env: EnvConfig,
        env_file_loaded: bool,
    ) -> Result<ConfigLoad, ConfigLoadError> {
        let (file_config, config_path) = self.load_file_config(&env)?;
        tracing::debug!(
            config_path = ?config_path,
            env_file_loaded,
            "composing configuration"
        );
        let mut warnings = ConfigWarnings::default();
        if config_path.is_none() {
            warnings.push_with_hint(
                "No strata.toml detected; falling back to environment variables",
                "Create strata.toml or point STRATA_CONFIG at one",
            );
        }

        let FileConfig {
            database: file_database,
            api: file_api,
            rate_limits: file_rate_limits,
            tasks: file_tasks,
        } = file_config.unwrap_or_default();

        let defaults = DatabaseConfig::default();
        let database = DatabaseConfig {
            url: self.resolve_database_url(&env, &file_database)?,
            max_connections: env
                .database_max_connections
                .or(file_database.max_connections)
                .unwrap_or(defaults.max_connections),
            min_connections: env
                .database_min_connections
                .or(file_database.min_connections)
                .unwrap_or(defaults.min_connections),
            acquire_timeout: parse_duration_opt(
                "database.acquire_timeout",
                file_database.acquire_timeout.as_deref(),
            )?
            .unwrap_or(defaults.acquire_timeout),
            search_path: file_database.search_path.clone(),
        };

        let defaults = ApiConfig::default();
        let token = match env.api_token.clone().filter(|t| !t.trim().is_empty())
        {
            Some(token) => Some(token),
            None => {
                let file = env.api_token_file.as_ref().or(file_api.token_file.as_ref());
                match file {
                    Some(path) => Self::read_secret_file(path)?,
                    None => file_api.token.clone(),
                }
            }
        };
        let api = ApiConfig {
            base_url: env
                .api_base_url
                .clone()
                .or(file_api.base_url.clone())
                .unwrap_or(defaults.base_url),
            token,
            request_timeout: parse_duration_opt(
                "api.request_timeout",
                file_api.request_timeout.as_deref(),
            )?
            .unwrap_or(defaults.request_timeout),
            default_page_size: env
                .api_page_size
                .or(file_api.default_page_size)
                .unwrap_or(defaults.default_page_size),
        };

        let mut endpoints = file_rate_limits.endpoints.clone();
        if let Some(raw) = env.rate_limits_inline.as_deref() {
            let from_env = parse_inline_rate_limits(raw)
                .map_err(|entry| ConfigLoadError::RateLimitEntry { entry })?;
            for spec in from_env {
                endpoints.retain(|s| s.endpoint_name != spec.endpoint_name);
                endpoints.push(spec);
            }
        }
        let rate_limits = RateLimitConfig {
            default_max_concurrent: env
                .rate_limit_default
                .or(file_rate_limits.default_max_concurrent)
                .unwrap_or(RateLimitConfig::default().default_max_concurrent),
            endpoints,
        };

        let defaults = TaskDefaults::default();
        let start_raw = env
            .task_default_start_date
            .clone()
            .or(file_tasks.default_start_date.clone());
        let tasks = TaskDefaults {
            default_concurrency: env
                .task_concurrency
                .or(file_tasks.default_concurrency)
                .unwrap_or(defaults.default_concurrency),
            max_concurrency: env
                .task_max_concurrency
                .or(file_tasks.max_concurrency)
                .unwrap_or(defaults.max_concurrency),
            max_retries: env
                .task_max_retries
                .or(file_tasks.max_retries)
                .unwrap_or(defaults.max_retries),
            retry_delay: parse_duration_opt(
                "tasks.retry_delay",
                env.task_retry_delay.as_deref().or(file_tasks.retry_delay.as_deref()),
            )?
            .unwrap_or(defaults.retry_delay),
            default_start_date: start_raw
                .as_deref()
                .map(parse_date)
                .transpose()?,
            auto_create_tables: env
                .task_auto_create_tables
                .or(file_tasks.auto_create_tables)
                .unwrap_or(defaults.auto_create_tables),
        };

        let config = Config {
            database,
            api,
            rate_limits,
            tasks,
            metadata: ConfigMetadata {
                config_path,
                env_file_loaded,
            },
        };

        warnings.extend(validation::apply_guard_rails(&config)?);
        Ok(ConfigLoad { config, warnings })
    }

    fn load_file_config(
        &self,
        env: &EnvConfig,
    ) -> Result<(Option<FileConfig>, Option<PathBuf>), ConfigLoadError> {
        let explicit = self
            .options
            .config_path
            .clone()
            .or_else(|| env.config_path.clone());

        let path = match explicit {
            Some(path) if !path.exists() => {
                return Err(ConfigLoadError::MissingConfig { path });
            }
            Some(path) => path,
            None => match DEFAULT_CONFIG_LOCATIONS
                .iter()
                .find(|candidate| candidate.exists())
            {
                Some(found) => found.clone(),
                None => return Ok((None, None)),
            },
        };

        let contents =
            fs::read_to_string(&path).map_err(|err| ConfigLoadError::Io {
                path: path.clone(),
                source: err,
            })?;
        let file_config: FileConfig =
            toml::from_str(&contents).map_err(|err| ConfigLoadError::Parse {
                path: path.clone(),
                source: err,
            })?;
        Ok((Some(file_config), Some(path)))
    }

    fn resolve_database_url(
        &self,
        env: &EnvConfig,
        file_database: &FileDatabaseConfig,
    ) -> Result<Option<String>, ConfigLoadError> {
        if let Some(url) = env
            .database_url
            .clone()
            .filter(|value| !value.trim().is_empty())
        {
            return Ok(Some(url));
        }

        if let Some(path) = env.database_url_file.as_ref() {
            if let Some(url) = Self::read_secret_file(path)? {
                return Ok(Some(url));
            }
        }

        if let Some(ref stored_url) = file_database.url {
            let trimmed = stored_url.trim();
            if trimmed.is_empty() {
                return Ok(None);
            }
            let mut parsed = Url::parse(trimmed).map_err(|source| {
                ConfigLoadError::InvalidDatabaseUrl { source }
            })?;
            if parsed.password().is_none() {
                if let Some(password) =
                    self.resolve_database_password(env, file_database)?
                {
                    parsed.set_password(Some(&password)).map_err(|_| {
                        ConfigLoadError::InvalidDatabasePassword
                    })?;
                }
            }
            return Ok(Some(parsed.to_string()));
        }

        let host = env.database_host.clone().filter(|v| !v.trim().is_empty());
        let user = env.database_user.clone().filter(|v| !v.trim().is_empty());
        let name = env.database_name.clone().filter(|v| !v.trim().is_empty());

        if let (Some(host), Some(user), Some(name)) = (host, user, name) {
            let port = env.database_port.unwrap_or(5432);
            let mut url =
                Url::parse(&format!("postgresql://{host}:{port}/{name}"))
                    .map_err(|source| ConfigLoadError::InvalidDatabaseUrl {
                        source,
                    })?;
            url.set_username(&user).map_err(|_| {
                ConfigLoadError::InvalidDatabaseUsername {
                    username: user.clone(),
                }
            })?;
            if let Some(password) =
                self.resolve_database_password(env, file_database)?
            {
                url.set_password(Some(&password))
                    .map_err(|_| ConfigLoadError::InvalidDatabasePassword)?;
            }
            return Ok(Some(url.to_string()));
        }

        Ok(None)
    }

    fn resolve_database_password(
        &self,
        env: &EnvConfig,
        file_database: &FileDatabaseConfig,
    ) -> Result<Option<String>, ConfigLoadError> {
        if let Some(password) = env
            .database_password
            .clone()
            .filter(|value| !value.trim().is_empty())
        {
            return Ok(Some(password));
        }

        for path in [
            env.database_password_file.as_ref(),
            file_database.password_file.as_ref(),
        ]
        .into_iter()
        .flatten()
        {
            if let Some(secret) = Self::read_secret_file(path)? {
                return Ok(Some(secret));
            }
        }

        Ok(None)
    }

    fn read_secret_file(
        path: &Path,
    ) -> Result<Option<String>, ConfigLoadError> {
        let contents = fs::read_to_string(path).map_err(|source| {
            ConfigLoadError::SecretFileIo {
                path: path.to_path_buf(),
                source,
            }
        })?;
        let trimmed = contents.trim();
        if trimmed.is_empty() {
            Ok(None)
        } else {
            Ok(Some(trimmed.to_string()))
        }
    }
}

fn parse_duration_opt(
    field: &'static str,
    raw: Option<&str>,
) -> Result<Option<Duration>, ConfigLoadError> {
    raw.map(|value| {
        humantime::parse_duration(value.trim()).map_err(|source| {
            ConfigLoadError::InvalidDuration {
                field,
                value: value.to_string(),
                source,
            }
        })
    })
    .transpose()
}

fn parse_date(raw: &str) -> Result<NaiveDate, ConfigLoadError> {
    let trimmed = raw.trim();
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(trimmed, "%Y%m%d"))
        .map_err(|_| ConfigLoadError::InvalidDate {
            value: trimmed.to_string(),
        })
}

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("configuration file missing: {path}")]
    MissingConfig { path: PathBuf },
    #[error("failed to read configuration {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid database URL")]
    InvalidDatabaseUrl {
        #[source]
        source: url::ParseError,
    },
    #[error("invalid database username '{username}'")]
    InvalidDatabaseUsername { username: String },
    #[error("failed to encode database password into URL")]
    InvalidDatabasePassword,
    #[error("failed to read secret file {path}")]
    SecretFileIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid duration for {field}: '{value}'")]
    InvalidDuration {
        field: &'static str,
        value: String,
        #[source]
        source: humantime::DurationError,
    },
    #[error("invalid date '{value}' (expected YYYY-MM-DD or YYYYMMDD)")]
    InvalidDate { value: String },
    #[error("malformed rate limit entry '{entry}' (expected endpoint=limit)")]
    RateLimitEntry { entry: String },
    #[error(transparent)]
    GuardRail(#[from] ConfigGuardRailError),
    #[error(transparent)]
    EnvFile(#[from] dotenvy::Error),
}
