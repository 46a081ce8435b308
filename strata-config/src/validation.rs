use thiserror::Error;

use super::models::Config;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigGuardRailError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },
    #[error(
        "database min_connections ({min}) exceeds max_connections ({max})"
    )]
    PoolBounds { min: u32, max: u32 },
    #[error("rate limit for endpoint '{endpoint}' must allow at least one call")]
    ZeroEndpointLimit { endpoint: String },
    #[error("invalid API base URL '{url}'")]
    InvalidApiUrl { url: String },
}

#[derive(Debug, Clone)]
pub struct ConfigWarning {
    pub message: String,
    pub hint: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct ConfigWarnings {
    pub items: Vec<ConfigWarning>,
}

impl ConfigWarnings {
    pub fn push<S: Into<String>>(&mut self, message: S) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: None,
        });
    }

    pub fn push_with_hint<S: Into<String>, H: Into<String>>(
        &mut self,
        message: S,
        hint: H,
    ) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: Some(hint.into()),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn extend(&mut self, other: ConfigWarnings) {
        self.items.extend(other.items);
    }
}

pub fn apply_guard_rails(
    config: &Config,
) -> Result<ConfigWarnings, ConfigGuardRailError> {
    let mut warnings = ConfigWarnings::default();

    let zero_checks: [(&'static str, usize); 4] = [
        ("tasks.max_concurrency", config.tasks.max_concurrency),
        ("tasks.default_concurrency", config.tasks.default_concurrency),
        ("api.default_page_size", config.api.default_page_size),
        (
            "rate_limits.default_max_concurrent",
            config.rate_limits.default_max_concurrent,
        ),
    ];
    for (field, value) in zero_checks {
        if value == 0 {
            return Err(ConfigGuardRailError::Zero { field });
        }
    }

    if config.database.max_connections == 0 {
        return Err(ConfigGuardRailError::Zero {
            field: "database.max_connections",
        });
    }
    if config.database.min_connections > config.database.max_connections {
        return Err(ConfigGuardRailError::PoolBounds {
            min: config.database.min_connections,
            max: config.database.max_connections,
        });
    }

    if let Some(spec) = config
        .rate_limits
        .endpoints
        .iter()
        .find(|spec| spec.max_concurrent == 0)
    {
        return Err(ConfigGuardRailError::ZeroEndpointLimit {
            endpoint: spec.endpoint_name.clone(),
        });
    }

    if url::Url::parse(&config.api.base_url).is_err() {
        return Err(ConfigGuardRailError::InvalidApiUrl {
            url: config.api.base_url.clone(),
        });
    }

    if config.tasks.default_concurrency > config.tasks.max_concurrency {
        warnings.push_with_hint(
            format!(
                "default concurrency {} exceeds the ceiling {}; tasks will run with {}",
                config.tasks.default_concurrency,
                config.tasks.max_concurrency,
                config.tasks.max_concurrency
            ),
            "Lower STRATA_CONCURRENCY or raise STRATA_MAX_CONCURRENCY",
        );
    }

    if config.api.token.is_none() {
        warnings.push_with_hint(
            "API token not configured; upstream calls will be rejected",
            "Set STRATA_API_TOKEN or api.token_file in strata.toml",
        );
    }

    if config.database.url.is_none() {
        warnings.push_with_hint(
            "DATABASE_URL not configured",
            "Set DATABASE_URL or DATABASE_HOST/USER/NAME",
        );
    }

    if config.tasks.default_start_date.is_none() {
        warnings.push_with_hint(
            "No default start date; first loads of empty tables will need an explicit --start",
            "Set STRATA_DEFAULT_START_DATE or tasks.default_start_date",
        );
    }

    Ok(warnings)
}
