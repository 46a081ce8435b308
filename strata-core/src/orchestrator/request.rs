use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use tokio_util::sync::CancellationToken;

/// Receives `(label, percent)` pairs such as `("2024-01-02", "12.5%")`.
pub type ProgressFn = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Parameters for one task run. Unset knobs fall back to the
/// orchestrator's [`TaskDefaults`](strata_config::TaskDefaults).
#[derive(Clone, Default)]
pub struct TaskRequest {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    /// Non-date filters copied into every batch.
    pub filters: BTreeMap<String, String>,
    pub force_full_reload: bool,
    pub concurrency_limit: Option<usize>,
    pub page_size: Option<usize>,
    pub max_retries: Option<u32>,
    pub retry_delay: Option<Duration>,
    pub stop: CancellationToken,
    pub progress: Option<ProgressFn>,
}

impl fmt::Debug for TaskRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRequest")
            .field("start", &self.start)
            .field("end", &self.end)
            .field("filters", &self.filters)
            .field("force_full_reload", &self.force_full_reload)
            .field("concurrency_limit", &self.concurrency_limit)
            .field("page_size", &self.page_size)
            .field("max_retries", &self.max_retries)
            .field("retry_delay", &self.retry_delay)
            .field("stop_cancelled", &self.stop.is_cancelled())
            .field("has_progress", &self.progress.is_some())
            .finish()
    }
}

impl TaskRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_start(mut self, start: NaiveDate) -> Self {
        self.start = Some(start);
        self
    }

    pub fn with_end(mut self, end: NaiveDate) -> Self {
        self.end = Some(end);
        self
    }

    pub fn with_range(self, start: NaiveDate, end: NaiveDate) -> Self {
        self.with_start(start).with_end(end)
    }

    pub fn with_filter(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.filters.insert(key.into(), value.into());
        self
    }

    pub fn full_reload(mut self) -> Self {
        self.force_full_reload = true;
        self
    }

    pub fn with_concurrency(mut self, limit: usize) -> Self {
        self.concurrency_limit = Some(limit);
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size);
        self
    }

    pub fn with_retries(mut self, max_retries: u32, delay: Duration) -> Self {
        self.max_retries = Some(max_retries);
        self.retry_delay = Some(delay);
        self
    }

    /// Shares `stop` with the caller; cancelling it stops new batches.
    pub fn with_stop(mut self, stop: CancellationToken) -> Self {
        self.stop = stop;
        self
    }

    pub fn with_progress<F>(mut self, progress: F) -> Self
    where
        F: Fn(&str, &str) + Send + Sync + 'static,
    {
        self.progress = Some(Arc::new(progress));
        self
    }
}
