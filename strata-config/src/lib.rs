//! Configuration loading for strata.
//!
//! Values are layered, highest precedence first: process environment,
//! `.env` file, TOML file, built-in defaults. See [`ConfigLoader`].
#![allow(missing_docs)]

pub mod loader;
pub mod models;
pub mod sources;
pub mod validation;

pub use loader::{ConfigLoad, ConfigLoadError, ConfigLoader, ConfigLoaderOptions};
pub use models::{
    ApiConfig, Config, ConfigMetadata, DatabaseConfig, RateLimitConfig,
    TaskDefaults,
};
pub use sources::{EnvConfig, FileConfig};
pub use validation::{ConfigGuardRailError, ConfigWarning, ConfigWarnings};
