use async_trait::async_trait;
use chrono::NaiveDate;
use strata_model::{RecordSet, TableSchema};

use crate::api::{ApiClient, Params};
use crate::error::Result;

/// Where batch rows come from.
#[async_trait]
pub trait RecordSource: Send + Sync {
    async fn fetch(
        &self,
        endpoint: &str,
        params: &Params,
        fields: &[String],
        page_size: usize,
    ) -> Result<RecordSet>;
}

/// Where batch rows go.
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Idempotently creates the table described by `schema`.
    async fn ensure_table(&self, schema: &TableSchema) -> Result<()>;

    /// Latest stored value of `date_column`; `None` when nothing is stored.
    async fn latest_date(
        &self,
        table: &str,
        date_column: &str,
    ) -> Result<Option<NaiveDate>>;

    /// Merges `records` keyed by the schema's primary key and returns the
    /// number of rows written.
    async fn persist(&self, schema: &TableSchema, records: RecordSet) -> Result<u64>;
}

#[async_trait]
impl RecordSource for ApiClient {
    async fn fetch(
        &self,
        endpoint: &str,
        params: &Params,
        fields: &[String],
        page_size: usize,
    ) -> Result<RecordSet> {
        ApiClient::fetch(self, endpoint, params, fields, page_size).await
    }
}
