//! # Strata Core
//!
//! Ingestion backbone for time-series financial data: a rate-limited
//! paginated API client, a calendar-aware batch planner, a task
//! orchestrator with bounded concurrency and cooperative cancellation, and
//! a staging-table bulk upsert store on Postgres.
//!
//! ## Architecture
//!
//! - [`rate_limit`]: process-wide per-endpoint concurrency gates
//! - [`api`]: wire transport and the paginating [`ApiClient`]
//! - [`calendar`] and [`planner`]: trading-day oracle and batch splitting
//! - [`dataset`] and [`pipeline`]: data-driven dataset definitions and the
//!   transform/validate stage
//! - [`orchestrator`]: [`TaskOrchestrator`] and its source/sink ports
//! - [`database`]: pool lifecycle, blocking adapter, DDL and upsert
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use strata_config::ConfigLoader;
//! use strata_core::{
//!     ApiClient, BatchPlanner, BulkUpsertStore, ConnectionManager, DatasetSpec,
//!     HttpTransport, PoolSettings, StoreCalendar, TaskOrchestrator, TaskRequest,
//! };
//!
//! async fn ingest() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConfigLoader::new().load()?.config;
//!     let connections = ConnectionManager::new(PoolSettings::from_config(&config.database)?);
//!     let client = ApiClient::with_global_limiter(Arc::new(HttpTransport::from_config(&config.api)?));
//!     let orchestrator = TaskOrchestrator::new(
//!         Arc::new(client),
//!         Arc::new(BulkUpsertStore::new(connections.clone())),
//!         BatchPlanner::new(Arc::new(StoreCalendar::new(connections))),
//!         config.tasks.clone(),
//!     );
//!     let dataset = Arc::new(DatasetSpec::from_path("datasets/daily.toml".as_ref())?);
//!     let result = orchestrator.run(dataset, TaskRequest::new()).await?;
//!     println!("{}: {}", result.status, result.message);
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(missing_docs)]

/// Upstream API transport and paginating client
pub mod api;

/// Trading calendar oracle
pub mod calendar;

/// Postgres connection management, DDL and bulk upsert
pub mod database;

/// Data-driven dataset definitions
pub mod dataset;

/// Error types and the crate result alias
pub mod error;

/// Task orchestration
pub mod orchestrator;

/// Transform and validate stage applied to each fetched batch
pub mod pipeline;

/// Date range to batch splitting
pub mod planner;

/// Per-endpoint concurrency gates
pub mod rate_limit;

pub use api::{ApiClient, ApiTransport, HttpTransport, Params};
pub use calendar::{StoreCalendar, TradingCalendar, WeekdayCalendar};
pub use database::{
    BlockingConnectionManager, BulkUpsertStore, ConnectionManager, PoolSettings,
    PoolStats, UpsertOptions,
};
pub use dataset::{DatasetSpec, Validator, ValueTransform};
pub use error::{Result, StrataError};
pub use orchestrator::{RecordSink, RecordSource, TaskOrchestrator, TaskRequest};
pub use planner::{BatchPlanner, SplitStrategy};
pub use rate_limit::{RatePermit, RateLimiterRegistry};

pub use strata_model::{
    BatchDescriptor, BatchFailure, BatchOutcome, ColumnDef, ColumnType, IndexSpec,
    RecordSet, TableSchema, TaskResult, TaskStatus, Value,
};
