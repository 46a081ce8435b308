use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, bail};
use strata_config::{Config, ConfigLoad};
use strata_core::{
    ApiClient, BatchPlanner, BulkUpsertStore, ConnectionManager, DatasetSpec,
    HttpTransport, PoolSettings, RateLimiterRegistry, StoreCalendar, TaskOrchestrator,
    TaskRequest, TaskStatus, TradingCalendar, WeekdayCalendar,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cli::{CalendarSource, DatasetArgs, RunArgs};

fn load_dataset(path: &Path) -> anyhow::Result<DatasetSpec> {
    DatasetSpec::from_path(path)
        .with_context(|| format!("failed to load dataset {}", path.display()))
}

fn connections(config: &Config) -> anyhow::Result<ConnectionManager> {
    let settings = PoolSettings::from_config(&config.database)
        .context("database is not configured")?;
    Ok(ConnectionManager::shared(settings))
}

/// Applies configured endpoint ceilings to the process-wide registry.
fn configure_rate_limits(config: &Config) -> Arc<RateLimiterRegistry> {
    let registry = RateLimiterRegistry::global();
    registry.configure_default(config.rate_limits.default_max_concurrent);
    for spec in &config.rate_limits.endpoints {
        registry.configure(&spec.endpoint_name, spec.max_concurrent);
    }
    registry
}

pub async fn run(load: ConfigLoad, args: RunArgs) -> anyhow::Result<ExitCode> {
    let config = load.config;
    let dataset = Arc::new(load_dataset(&args.dataset.dataset)?);

    let transport = HttpTransport::from_config(&config.api)
        .context("failed to build API transport")?;
    let client = ApiClient::new(Arc::new(transport), configure_rate_limits(&config));

    let connections = connections(&config)?;
    connections
        .connect()
        .await
        .context("failed to connect to PostgreSQL")?;
    let store =
        BulkUpsertStore::new(connections.clone()).with_skip_unchanged(args.skip_unchanged);

    let calendar: Arc<dyn TradingCalendar> = match args.calendar {
        CalendarSource::Store => Arc::new(StoreCalendar::new(connections.clone())),
        CalendarSource::Weekday => Arc::new(WeekdayCalendar::new()),
    };

    let orchestrator = TaskOrchestrator::new(
        Arc::new(client),
        Arc::new(store),
        BatchPlanner::new(calendar),
        config.tasks.clone(),
    )
    .with_default_page_size(config.api.default_page_size);

    let stop = CancellationToken::new();
    let signal_stop = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; finishing running batches");
            signal_stop.cancel();
        }
    });

    let mut request = TaskRequest::new()
        .with_stop(stop)
        .with_progress(|label, percent| {
            info!(target: "stratactl", batch = label, progress = percent, "progress");
        });
    request.start = args.start;
    request.end = args.end;
    request.force_full_reload = args.full_reload;
    request.filters = args.filters.into_iter().collect();
    request.concurrency_limit = args.concurrency;
    request.page_size = args.page_size;
    request.max_retries = args.max_retries;
    request.retry_delay = args.retry_delay;

    let result = orchestrator
        .run(dataset, request)
        .await
        .context("task aborted")?;
    connections.close().await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!(
            "{}: {} rows, {} failed batches ({})",
            result.status, result.rows_affected, result.failed_batches, result.message
        );
    }

    Ok(match result.status {
        TaskStatus::Failed => ExitCode::FAILURE,
        TaskStatus::Cancelled => ExitCode::from(130),
        _ => ExitCode::SUCCESS,
    })
}

pub async fn create_table(load: ConfigLoad, args: DatasetArgs) -> anyhow::Result<ExitCode> {
    let dataset = load_dataset(&args.dataset)?;
    let connections = connections(&load.config)?;
    BulkUpsertStore::new(connections.clone())
        .create_table(&dataset.table)
        .await
        .with_context(|| format!("failed to create table {}", dataset.table.name))?;
    connections.close().await;
    println!("table {} is ready", dataset.table.name);
    Ok(ExitCode::SUCCESS)
}

pub async fn latest(load: ConfigLoad, args: DatasetArgs) -> anyhow::Result<ExitCode> {
    let dataset = load_dataset(&args.dataset)?;
    let Some(column) = dataset.date_column() else {
        bail!("dataset {} has no date column", dataset.name);
    };
    let connections = connections(&load.config)?;
    let latest = BulkUpsertStore::new(connections.clone())
        .latest_date(&dataset.table.name, column)
        .await
        .context("failed to query latest date")?;
    connections.close().await;
    match latest {
        Some(date) => println!("{date}"),
        None => println!("{} has no rows", dataset.table.name),
    }
    Ok(ExitCode::SUCCESS)
}

pub fn config_check(load: ConfigLoad) -> anyhow::Result<ExitCode> {
    let ConfigLoad { config, warnings } = load;
    match &config.metadata.config_path {
        Some(path) => println!("config file: {}", path.display()),
        None => println!("config file: none"),
    }
    println!(
        "database: {}",
        if config.database.url.is_some() { "configured" } else { "not configured" }
    );
    println!("api: {}", config.api.base_url);
    println!(
        "tasks: concurrency {} (max {}), {} retries every {}",
        config.tasks.default_concurrency,
        config.tasks.max_concurrency,
        config.tasks.max_retries,
        humantime::format_duration(config.tasks.retry_delay)
    );
    for warning in &warnings.items {
        match &warning.hint {
            Some(hint) => println!("warning: {} ({hint})", warning.message),
            None => println!("warning: {}", warning.message),
        }
    }
    println!("configuration ok");
    Ok(ExitCode::SUCCESS)
}
