use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{Local, NaiveDate};
use strata_config::TaskDefaults;
use strata_config::models::DEFAULT_PAGE_SIZE;
use strata_model::{BatchDescriptor, BatchFailure, BatchOutcome, TaskResult, TaskStatus};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::ports::{RecordSink, RecordSource};
use super::request::{ProgressFn, TaskRequest};
use super::retry::RetryPolicy;
use crate::dataset::DatasetSpec;
use crate::error::{Result, StrataError};
use crate::pipeline::{self, StageReport};
use crate::planner::BatchPlanner;

/// Runs one dataset task end to end: resolve the date range, plan batches,
/// and drive them through fetch, transform, validate and persist on a
/// bounded worker pool.
///
/// Batch-level failures are folded into the returned [`TaskResult`]. Only
/// configuration errors surface as `Err`.
pub struct TaskOrchestrator {
    source: Arc<dyn RecordSource>,
    sink: Arc<dyn RecordSink>,
    planner: BatchPlanner,
    defaults: TaskDefaults,
    default_page_size: usize,
    today: Option<NaiveDate>,
}

impl fmt::Debug for TaskOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskOrchestrator")
            .field("planner", &self.planner)
            .field("defaults", &self.defaults)
            .field("default_page_size", &self.default_page_size)
            .field("today", &self.today)
            .finish_non_exhaustive()
    }
}

impl TaskOrchestrator {
    pub fn new(
        source: Arc<dyn RecordSource>,
        sink: Arc<dyn RecordSink>,
        planner: BatchPlanner,
        defaults: TaskDefaults,
    ) -> Self {
        Self {
            source,
            sink,
            planner,
            defaults,
            default_page_size: DEFAULT_PAGE_SIZE,
            today: None,
        }
    }

    pub fn with_default_page_size(mut self, page_size: usize) -> Self {
        self.default_page_size = page_size.max(1);
        self
    }

    /// Pins "today" for range resolution instead of reading the clock.
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    pub fn defaults(&self) -> &TaskDefaults {
        &self.defaults
    }

    fn today(&self) -> NaiveDate {
        self.today.unwrap_or_else(|| Local::now().date_naive())
    }

    /// Worker count: the requested limit, else the configured default,
    /// never above the configured ceiling and never below one.
    pub fn worker_count(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.defaults.default_concurrency)
            .min(self.defaults.max_concurrency)
            .max(1)
    }

    pub async fn run(
        &self,
        dataset: Arc<DatasetSpec>,
        request: TaskRequest,
    ) -> Result<TaskResult> {
        dataset.validate()?;
        if dataset.table.primary_keys.is_empty() {
            return Err(StrataError::Configuration(format!(
                "dataset {} declares no primary key",
                dataset.name
            )));
        }

        tracing::info!(
            target: "strata::task",
            dataset = %dataset.name,
            endpoint = %dataset.endpoint,
            ?request,
            "task starting"
        );

        if self.defaults.auto_create_tables
            && let Err(err) = self.sink.ensure_table(&dataset.table).await
        {
            return settle(&dataset, "table creation failed", err);
        }

        let (start, end) = match self.resolve_range(&dataset, &request).await {
            Ok(Some(range)) => range,
            Ok(None) => {
                let result = TaskResult::up_to_date(format!(
                    "{} is up to date",
                    dataset.table.name
                ));
                log_result(&dataset, &result);
                return Ok(result);
            }
            Err(err) => return settle(&dataset, "range resolution failed", err),
        };

        let batches = match self
            .planner
            .plan(start, end, &request.filters, &dataset.split)
            .await
        {
            Ok(batches) => batches,
            Err(err) => return settle(&dataset, "batch planning failed", err),
        };

        if batches.is_empty() {
            let result = TaskResult::no_data(format!(
                "no trading days between {start} and {end}"
            ));
            log_result(&dataset, &result);
            return Ok(result);
        }

        tracing::info!(
            target: "strata::task",
            dataset = %dataset.name,
            %start,
            %end,
            batches = batches.len(),
            "planned batches"
        );
        if let Some(progress) = &request.progress {
            progress(&dataset.name, "0.0%");
        }

        let outcomes = self.dispatch(dataset.clone(), &request, batches).await;
        let result = TaskResult::from_outcomes(&outcomes);
        log_result(&dataset, &result);
        Ok(result)
    }

    /// `None` means there is nothing left to load.
    async fn resolve_range(
        &self,
        dataset: &DatasetSpec,
        request: &TaskRequest,
    ) -> Result<Option<(NaiveDate, NaiveDate)>> {
        let end = request.end.unwrap_or_else(|| self.today());

        let start = match request.start {
            Some(start) => start,
            None if request.force_full_reload => self.default_start(dataset)?,
            None => {
                let stored = match dataset.date_column() {
                    Some(column) => {
                        self.sink.latest_date(&dataset.table.name, column).await?
                    }
                    None => None,
                };
                match stored {
                    Some(latest) => {
                        tracing::debug!(
                            target: "strata::task",
                            dataset = %dataset.name,
                            %latest,
                            "resuming after latest stored date"
                        );
                        match latest.succ_opt() {
                            Some(next) => next,
                            None => return Ok(None),
                        }
                    }
                    None => self.default_start(dataset)?,
                }
            }
        };

        if start > end {
            return Ok(None);
        }
        Ok(Some((start, end)))
    }

    fn default_start(&self, dataset: &DatasetSpec) -> Result<NaiveDate> {
        self.defaults.default_start_date.ok_or_else(|| {
            StrataError::Configuration(format!(
                "dataset {} has no stored rows and no default start date is configured",
                dataset.name
            ))
        })
    }

    async fn dispatch(
        &self,
        dataset: Arc<DatasetSpec>,
        request: &TaskRequest,
        batches: Vec<BatchDescriptor>,
    ) -> Vec<BatchOutcome> {
        let total = batches.len();
        let workers = self.worker_count(request.concurrency_limit);
        let context = Arc::new(BatchContext {
            source: self.source.clone(),
            sink: self.sink.clone(),
            page_size: request
                .page_size
                .or(dataset.page_size)
                .unwrap_or(self.default_page_size)
                .max(1),
            retry: RetryPolicy {
                max_retries: request.max_retries.unwrap_or(self.defaults.max_retries),
                delay: request.retry_delay.unwrap_or(self.defaults.retry_delay),
            },
            dataset,
            stop: request.stop.clone(),
            progress: request.progress.clone(),
            completed: AtomicUsize::new(0),
            total,
        });

        tracing::debug!(
            target: "strata::task",
            dataset = %context.dataset.name,
            workers,
            page_size = context.page_size,
            max_retries = context.retry.max_retries,
            "dispatching batches"
        );

        let pool = Arc::new(Semaphore::new(workers));
        let mut running = JoinSet::new();
        let mut outcomes = Vec::with_capacity(total);

        for (index, batch) in batches.into_iter().enumerate() {
            let permit = tokio::select! {
                biased;
                () = context.stop.cancelled() => None,
                permit = pool.clone().acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                let skipped = total - index;
                tracing::info!(
                    target: "strata::task",
                    dataset = %context.dataset.name,
                    skipped,
                    "stop requested; not dispatching remaining batches"
                );
                outcomes.extend(std::iter::repeat_n(BatchOutcome::Cancelled, skipped));
                break;
            };
            let context = context.clone();
            running.spawn(async move {
                let outcome = run_batch(&context, index, &batch).await;
                drop(permit);
                context.report(&batch);
                outcome
            });
        }

        while let Some(joined) = running.join_next().await {
            outcomes.push(joined.unwrap_or_else(|err| {
                tracing::error!(
                    target: "strata::task",
                    dataset = %context.dataset.name,
                    error = %err,
                    "batch worker aborted"
                );
                BatchOutcome::Failed(BatchFailure::Internal)
            }));
        }
        outcomes
    }
}

/// State shared by every worker of one task run.
struct BatchContext {
    source: Arc<dyn RecordSource>,
    sink: Arc<dyn RecordSink>,
    dataset: Arc<DatasetSpec>,
    page_size: usize,
    retry: RetryPolicy,
    stop: CancellationToken,
    progress: Option<ProgressFn>,
    completed: AtomicUsize,
    total: usize,
}

impl BatchContext {
    fn report(&self, batch: &BatchDescriptor) {
        let done = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(progress) = &self.progress {
            let percent = done as f64 * 100.0 / self.total as f64;
            progress(&batch.label(), &format!("{percent:.1}%"));
        }
    }
}

async fn run_batch(
    context: &BatchContext,
    index: usize,
    batch: &BatchDescriptor,
) -> BatchOutcome {
    let dataset = &context.dataset;
    let label = batch.label();

    if context.stop.is_cancelled() {
        tracing::debug!(
            target: "strata::task",
            dataset = %dataset.name,
            batch = index,
            "stop requested before batch start"
        );
        return BatchOutcome::Cancelled;
    }

    let params = dataset.batch_params(batch);
    let fetched = context
        .retry
        .run("fetch", &label, |attempt| {
            tracing::debug!(
                target: "strata::fetch",
                dataset = %dataset.name,
                endpoint = %dataset.endpoint,
                batch = index,
                start = %batch.start,
                end = %batch.end,
                attempt,
                "fetching"
            );
            context.source.fetch(
                &dataset.endpoint,
                &params,
                &dataset.fields,
                context.page_size,
            )
        })
        .await;
    let records = match fetched {
        Ok(records) => records,
        Err(_) => return BatchOutcome::Failed(BatchFailure::Fetch),
    };
    if records.is_empty() {
        tracing::debug!(
            target: "strata::fetch",
            dataset = %dataset.name,
            batch = index,
            "no rows returned"
        );
        return BatchOutcome::Completed { rows: 0 };
    }
    let fetched_rows = records.len();

    let mut report = StageReport::default();
    let prepared = pipeline::transform(dataset, records, &mut report)
        .and_then(|records| pipeline::validate(dataset, records, &mut report))
        .and_then(|mut records| {
            let keys = dataset.table.primary_key_refs();
            if keys.iter().all(|k| records.has_column(k)) {
                let duplicates = records.dedupe_by(&keys)?;
                if duplicates > 0 {
                    tracing::debug!(
                        target: "strata::task",
                        dataset = %dataset.name,
                        batch = index,
                        duplicates,
                        "collapsed duplicate keys"
                    );
                }
            }
            Ok(records)
        });
    let records = match prepared {
        Ok(records) => records,
        Err(err) => {
            tracing::error!(
                target: "strata::task",
                dataset = %dataset.name,
                batch = index,
                error = %err,
                "transform failed"
            );
            return BatchOutcome::Failed(BatchFailure::Transform);
        }
    };
    if report != StageReport::default() {
        tracing::info!(
            target: "strata::task",
            dataset = %dataset.name,
            batch = index,
            invalid_dates = report.invalid_dates,
            nulled_cells = report.nulled_cells,
            failed_validation = report.failed_validation,
            "rows adjusted during preparation"
        );
    }
    if records.is_empty() {
        return BatchOutcome::Completed { rows: 0 };
    }

    let persisted = context
        .retry
        .run("persist", &label, |attempt| {
            tracing::debug!(
                target: "strata::persist",
                dataset = %dataset.name,
                table = %dataset.table.name,
                batch = index,
                rows = records.len(),
                attempt,
                "persisting"
            );
            context.sink.persist(&dataset.table, records.clone())
        })
        .await;
    match persisted {
        Ok(rows) => {
            tracing::info!(
                target: "strata::persist",
                dataset = %dataset.name,
                batch = index,
                start = %batch.start,
                end = %batch.end,
                fetched = fetched_rows,
                rows,
                "batch persisted"
            );
            BatchOutcome::Completed { rows }
        }
        Err(_) => BatchOutcome::Failed(BatchFailure::Persist),
    }
}

/// Configuration errors propagate; anything else ends the task as failed.
fn settle(dataset: &DatasetSpec, context: &str, err: StrataError) -> Result<TaskResult> {
    if matches!(err, StrataError::Configuration(_)) {
        tracing::error!(
            target: "strata::task",
            dataset = %dataset.name,
            error = %err,
            "{context}"
        );
        return Err(err);
    }
    let result = TaskResult::new(TaskStatus::Failed, 0, 0, format!("{context}: {err}"));
    log_result(dataset, &result);
    Ok(result)
}

fn log_result(dataset: &DatasetSpec, result: &TaskResult) {
    if result.status.is_ok() {
        tracing::info!(
            target: "strata::task",
            dataset = %dataset.name,
            status = %result.status,
            rows = result.rows_affected,
            failed_batches = result.failed_batches,
            "{}",
            result.message
        );
    } else {
        tracing::warn!(
            target: "strata::task",
            dataset = %dataset.name,
            status = %result.status,
            rows = result.rows_affected,
            failed_batches = result.failed_batches,
            "{}",
            result.message
        );
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    use async_trait::async_trait;
    use strata_model::{ColumnDef, ColumnType, RecordSet, TableSchema, Value};

    use super::*;
    use crate::api::Params;
    use crate::calendar::WeekdayCalendar;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn dataset() -> Arc<DatasetSpec> {
        let table = TableSchema::new(
            "daily",
            vec![
                ColumnDef::new("ts_code", ColumnType::Varchar(16)),
                ColumnDef::new("trade_date", ColumnType::Date),
                ColumnDef::new("close", ColumnType::Double),
            ],
        )
        .with_primary_keys(["ts_code", "trade_date"])
        .with_date_column("trade_date");
        Arc::new(
            DatasetSpec::new("daily", "daily", table)
                .with_fields(["ts_code", "trade_date", "close"]),
        )
    }

    /// Returns one row per requested day, or fails on chosen dates.
    #[derive(Default)]
    struct StubSource {
        calls: AtomicU32,
        fail_on: Vec<String>,
        empty: bool,
    }

    #[async_trait]
    impl RecordSource for StubSource {
        async fn fetch(
            &self,
            _endpoint: &str,
            params: &Params,
            fields: &[String],
            _page_size: usize,
        ) -> Result<RecordSet> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let start = params
                .get("start_date")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            if self.fail_on.contains(&start) {
                return Err(StrataError::api(500, "upstream down"));
            }
            let mut set = RecordSet::new(fields.iter().cloned())?;
            if !self.empty {
                set.push_row(vec![
                    Value::from("000001.SZ"),
                    Value::from(start.as_str()),
                    Value::Float(10.5),
                ])?;
                // duplicate key collapses before persist
                set.push_row(vec![
                    Value::from("000001.SZ"),
                    Value::from(start.as_str()),
                    Value::Float(10.6),
                ])?;
            }
            Ok(set)
        }
    }

    #[derive(Default)]
    struct StubSink {
        latest: Option<NaiveDate>,
        fail_persist: bool,
        ensured: AtomicU32,
        persist_calls: AtomicU32,
        persisted: Mutex<Vec<RecordSet>>,
    }

    #[async_trait]
    impl RecordSink for StubSink {
        async fn ensure_table(&self, _schema: &TableSchema) -> Result<()> {
            self.ensured.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn latest_date(
            &self,
            _table: &str,
            _date_column: &str,
        ) -> Result<Option<NaiveDate>> {
            Ok(self.latest)
        }

        async fn persist(&self, _schema: &TableSchema, records: RecordSet) -> Result<u64> {
            self.persist_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_persist {
                return Err(StrataError::Store(sqlx::Error::PoolTimedOut));
            }
            let rows = records.len() as u64;
            self.persisted.lock().unwrap().push(records);
            Ok(rows)
        }
    }

    fn defaults() -> TaskDefaults {
        TaskDefaults {
            default_concurrency: 2,
            max_concurrency: 4,
            max_retries: 2,
            retry_delay: Duration::ZERO,
            default_start_date: Some(d(2024, 1, 1)),
            auto_create_tables: true,
        }
    }

    fn orchestrator(
        source: Arc<StubSource>,
        sink: Arc<StubSink>,
        defaults: TaskDefaults,
    ) -> TaskOrchestrator {
        TaskOrchestrator::new(
            source,
            sink,
            BatchPlanner::new(Arc::new(WeekdayCalendar::new())),
            defaults,
        )
        .with_today(d(2024, 1, 12))
    }

    #[tokio::test]
    async fn explicit_range_persists_every_batch() {
        let source = Arc::new(StubSource::default());
        let sink = Arc::new(StubSink::default());
        let result = orchestrator(source.clone(), sink.clone(), defaults())
            .run(
                dataset(),
                TaskRequest::new().with_range(d(2024, 1, 8), d(2024, 1, 12)),
            )
            .await
            .unwrap();

        assert_eq!(result.status, TaskStatus::Success);
        assert_eq!(result.rows_affected, 5);
        assert_eq!(source.calls.load(Ordering::SeqCst), 5);
        assert_eq!(sink.ensured.load(Ordering::SeqCst), 1);

        let persisted = sink.persisted.lock().unwrap();
        assert!(persisted.iter().all(|set| set.len() == 1));
        assert!(
            persisted
                .iter()
                .all(|set| set.get(0, "close") == Some(&Value::Float(10.6)))
        );
    }

    #[tokio::test]
    async fn stored_latest_equal_to_end_is_up_to_date() {
        let source = Arc::new(StubSource::default());
        let sink = Arc::new(StubSink {
            latest: Some(d(2024, 1, 10)),
            ..StubSink::default()
        });
        let result = orchestrator(source.clone(), sink, defaults())
            .run(dataset(), TaskRequest::new().with_end(d(2024, 1, 10)))
            .await
            .unwrap();
        assert_eq!(result.status, TaskStatus::UpToDate);
        assert_eq!(result.rows_affected, 0);
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn incremental_run_resumes_after_latest() {
        let source = Arc::new(StubSource::default());
        let sink = Arc::new(StubSink {
            latest: Some(d(2024, 1, 10)),
            ..StubSink::default()
        });
        let result = orchestrator(source.clone(), sink, defaults())
            .run(dataset(), TaskRequest::new())
            .await
            .unwrap();
        // 2024-01-11 and 2024-01-12
        assert_eq!(result.rows_affected, 2);
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn full_reload_ignores_stored_latest() {
        let source = Arc::new(StubSource::default());
        let sink = Arc::new(StubSink {
            latest: Some(d(2024, 1, 10)),
            ..StubSink::default()
        });
        let result = orchestrator(source.clone(), sink, defaults())
            .run(dataset(), TaskRequest::new().full_reload())
            .await
            .unwrap();
        // ten weekdays from 2024-01-01 to 2024-01-12
        assert_eq!(result.rows_affected, 10);
    }

    #[tokio::test]
    async fn empty_table_without_default_start_is_configuration_error() {
        let source = Arc::new(StubSource::default());
        let sink = Arc::new(StubSink::default());
        let mut defaults = defaults();
        defaults.default_start_date = None;
        let err = orchestrator(source.clone(), sink, defaults)
            .run(dataset(), TaskRequest::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StrataError::Configuration(_)));
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn fetch_exhaustion_yields_partial_success() {
        let source = Arc::new(StubSource {
            fail_on: vec!["20240109".to_string()],
            ..StubSource::default()
        });
        let sink = Arc::new(StubSink::default());
        let result = orchestrator(source.clone(), sink, defaults())
            .run(
                dataset(),
                TaskRequest::new().with_range(d(2024, 1, 8), d(2024, 1, 10)),
            )
            .await
            .unwrap();
        assert_eq!(result.status, TaskStatus::PartialSuccess);
        assert_eq!(result.rows_affected, 2);
        assert_eq!(result.failed_batches, 1);
        // two good batches plus max_retries + 1 attempts for the bad one
        assert_eq!(source.calls.load(Ordering::SeqCst), 2 + 3);
    }

    #[tokio::test]
    async fn persist_exhaustion_fails_task() {
        let source = Arc::new(StubSource::default());
        let sink = Arc::new(StubSink {
            fail_persist: true,
            ..StubSink::default()
        });
        let result = orchestrator(source, sink.clone(), defaults())
            .run(
                dataset(),
                TaskRequest::new()
                    .with_range(d(2024, 1, 8), d(2024, 1, 9))
                    .with_retries(1, Duration::ZERO),
            )
            .await
            .unwrap();
        assert_eq!(result.status, TaskStatus::Failed);
        assert_eq!(result.failed_batches, 2);
        assert_eq!(sink.persist_calls.load(Ordering::SeqCst), 2 * 2);
    }

    #[tokio::test]
    async fn empty_upstream_is_no_data() {
        let source = Arc::new(StubSource {
            empty: true,
            ..StubSource::default()
        });
        let sink = Arc::new(StubSink::default());
        let result = orchestrator(source, sink.clone(), defaults())
            .run(
                dataset(),
                TaskRequest::new().with_range(d(2024, 1, 8), d(2024, 1, 9)),
            )
            .await
            .unwrap();
        assert_eq!(result.status, TaskStatus::NoData);
        assert_eq!(sink.persist_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn weekend_only_range_is_no_data() {
        let source = Arc::new(StubSource::default());
        let sink = Arc::new(StubSink::default());
        let result = orchestrator(source.clone(), sink, defaults())
            .run(
                dataset(),
                TaskRequest::new().with_range(d(2024, 1, 6), d(2024, 1, 7)),
            )
            .await
            .unwrap();
        assert_eq!(result.status, TaskStatus::NoData);
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn stop_before_dispatch_cancels_every_batch() {
        let source = Arc::new(StubSource::default());
        let sink = Arc::new(StubSink::default());
        let stop = CancellationToken::new();
        stop.cancel();
        let result = orchestrator(source.clone(), sink, defaults())
            .run(
                dataset(),
                TaskRequest::new()
                    .with_range(d(2024, 1, 8), d(2024, 1, 12))
                    .with_stop(stop),
            )
            .await
            .unwrap();
        assert_eq!(result.status, TaskStatus::Cancelled);
        assert_eq!(result.failed_batches, 5);
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn stop_mid_run_keeps_completed_rows() {
        let source = Arc::new(StubSource::default());
        let sink = Arc::new(StubSink::default());
        let stop = CancellationToken::new();
        let trigger = stop.clone();
        let result = orchestrator(source, sink, defaults())
            .run(
                dataset(),
                TaskRequest::new()
                    .with_range(d(2024, 1, 8), d(2024, 1, 12))
                    .with_concurrency(1)
                    .with_stop(stop)
                    .with_progress(move |_, percent| {
                        if percent == "20.0%" {
                            trigger.cancel();
                        }
                    }),
            )
            .await
            .unwrap();
        assert_eq!(result.status, TaskStatus::Cancelled);
        assert!(result.rows_affected >= 1);
        assert!(result.rows_affected < 5);
    }

    #[tokio::test]
    async fn progress_starts_at_zero_and_ends_at_hundred() {
        let source = Arc::new(StubSource::default());
        let sink = Arc::new(StubSink::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = seen.clone();
        orchestrator(source, sink, defaults())
            .run(
                dataset(),
                TaskRequest::new()
                    .with_range(d(2024, 1, 8), d(2024, 1, 9))
                    .with_progress(move |label, percent| {
                        sink_seen
                            .lock()
                            .unwrap()
                            .push((label.to_string(), percent.to_string()));
                    }),
            )
            .await
            .unwrap();
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0], ("daily".to_string(), "0.0%".to_string()));
        let percents: Vec<_> = seen[1..].iter().map(|(_, p)| p.as_str()).collect();
        assert!(percents.contains(&"50.0%"));
        assert!(percents.contains(&"100.0%"));
    }

    #[tokio::test]
    async fn filters_reach_every_batch() {
        let source = Arc::new(StubSource::default());
        let sink = Arc::new(StubSink::default());
        let ds = Arc::new(
            (*dataset())
                .clone()
                .with_split(crate::planner::SplitStrategy::TradingDays {
                    market_window: 1,
                    entity_window: 3,
                    entity_param: Some("ts_code".into()),
                }),
        );
        let result = orchestrator(source.clone(), sink, defaults())
            .run(
                ds,
                TaskRequest::new()
                    .with_range(d(2024, 1, 8), d(2024, 1, 12))
                    .with_filter("ts_code", "000001.SZ"),
            )
            .await
            .unwrap();
        // windows of three trading days: 8..10 and 11..12
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
        assert_eq!(result.rows_affected, 2);
    }

    #[test]
    fn worker_count_is_clamped() {
        let o = orchestrator(
            Arc::new(StubSource::default()),
            Arc::new(StubSink::default()),
            defaults(),
        );
        assert_eq!(o.worker_count(None), 2);
        assert_eq!(o.worker_count(Some(16)), 4);
        assert_eq!(o.worker_count(Some(0)), 1);
    }

    #[tokio::test]
    async fn missing_primary_key_is_configuration_error() {
        let mut spec = (*dataset()).clone();
        spec.table.primary_keys.clear();
        let err = orchestrator(
            Arc::new(StubSource::default()),
            Arc::new(StubSink::default()),
            defaults(),
        )
        .run(Arc::new(spec), TaskRequest::new())
        .await
        .unwrap_err();
        assert!(matches!(err, StrataError::Configuration(_)));
    }
}
