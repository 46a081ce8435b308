use std::fmt;
use std::sync::Arc;

use strata_model::{RecordSet, Row, Value};

use super::transport::{ApiRequest, ApiTransport, FetchPage, Params};
use crate::error::Result;
use crate::rate_limit::RateLimiterRegistry;

const OFFSET_PARAM: &str = "offset";
const LIMIT_PARAM: &str = "limit";

/// Paginated fetch against one logical endpoint, gated by the rate limiter
/// registry for the whole page sequence.
#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn ApiTransport>,
    limiter: Arc<RateLimiterRegistry>,
}

impl fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiClient")
            .field("limiter", &self.limiter)
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    pub fn new(
        transport: Arc<dyn ApiTransport>,
        limiter: Arc<RateLimiterRegistry>,
    ) -> Self {
        Self { transport, limiter }
    }

    /// Client sharing the process-wide rate limiter registry.
    pub fn with_global_limiter(transport: Arc<dyn ApiTransport>) -> Self {
        Self::new(transport, RateLimiterRegistry::global())
    }

    pub fn limiter(&self) -> &Arc<RateLimiterRegistry> {
        &self.limiter
    }

    /// Fetches every page for `params` and assembles them into one set.
    ///
    /// Columns follow `fields` when given, else the first page's field
    /// names. A caller-supplied `limit` overrides `page_size` and a
    /// caller-supplied `offset` is the starting point. Paging stops on a
    /// short or empty page.
    pub async fn fetch(
        &self,
        endpoint: &str,
        params: &Params,
        fields: &[String],
        page_size: usize,
    ) -> Result<RecordSet> {
        let _permit = self.limiter.acquire(endpoint).await?;

        let page_size = params
            .get(LIMIT_PARAM)
            .and_then(json_usize)
            .unwrap_or(page_size)
            .max(1);
        let start_offset =
            params.get(OFFSET_PARAM).and_then(json_usize).unwrap_or(0);

        let mut columns: Option<Vec<String>> =
            (!fields.is_empty()).then(|| fields.to_vec());
        let mut rows: Vec<Row> = Vec::new();
        let mut pages = 0usize;

        loop {
            let mut page_params = params.clone();
            page_params
                .insert(LIMIT_PARAM.to_string(), page_size.into());
            page_params.insert(
                OFFSET_PARAM.to_string(),
                (start_offset + rows.len()).into(),
            );

            let page = self
                .transport
                .call(ApiRequest {
                    api_name: endpoint.to_string(),
                    token: String::new(),
                    params: page_params,
                    fields: fields.join(","),
                })
                .await?;
            pages += 1;

            let received = page.rows.len();
            tracing::trace!(
                target: "strata::fetch",
                endpoint,
                page = pages,
                rows = received,
                has_more = page.has_more,
                "received page"
            );
            if received == 0 {
                if columns.is_none() && !page.field_names.is_empty() {
                    columns = Some(page.field_names);
                }
                break;
            }

            let target = columns.get_or_insert_with(|| page.field_names.clone());
            rows.extend(align_page(target, page));

            if received < page_size {
                break;
            }
        }

        tracing::debug!(
            target: "strata::fetch",
            endpoint,
            pages,
            rows = rows.len(),
            "fetch complete"
        );

        let set = RecordSet::from_rows(columns.unwrap_or_default(), rows)?;
        Ok(set)
    }
}

/// Reorders a page's cells into `columns` order by field name. Fields the
/// page lacks become null; a page without field names is taken
/// positionally.
fn align_page(columns: &[String], page: FetchPage) -> Vec<Row> {
    let FetchPage {
        field_names,
        rows,
        ..
    } = page;

    if field_names.is_empty() || field_names == columns {
        return rows
            .into_iter()
            .map(|mut row| {
                row.resize(columns.len(), Value::Null);
                row
            })
            .collect();
    }

    let mapping: Vec<Option<usize>> = columns
        .iter()
        .map(|c| field_names.iter().position(|f| f == c))
        .collect();
    rows.into_iter()
        .map(|mut row| {
            mapping
                .iter()
                .map(|idx| {
                    idx.and_then(|i| row.get_mut(i).map(std::mem::take))
                        .unwrap_or(Value::Null)
                })
                .collect()
        })
        .collect()
}

fn json_usize(value: &serde_json::Value) -> Option<usize> {
    match value {
        serde_json::Value::Number(n) => {
            n.as_u64().and_then(|v| usize::try_from(v).ok())
        }
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
