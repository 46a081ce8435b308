//! Core data model definitions shared across strata crates.
#![allow(missing_docs)]

pub use ::chrono;
pub use ::rust_decimal;

pub mod batch;
pub mod error;
pub mod rate_limit;
pub mod record_set;
pub mod schema;
pub mod task;
pub mod value;

// Intentionally curated re-exports for downstream consumers.
pub use batch::BatchDescriptor;
pub use error::{ModelError, Result as ModelResult};
pub use rate_limit::RateLimitSpec;
pub use record_set::{RecordSet, Row};
pub use schema::{ColumnDef, ColumnType, IndexSpec, TableSchema};
pub use task::{BatchFailure, BatchOutcome, TaskResult, TaskStatus};
pub use value::Value;
