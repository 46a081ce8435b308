use std::fmt;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use strata_model::{RecordSet, TableSchema};
use uuid::Uuid;

use super::connection::ConnectionManager;
use super::ddl::create_table_statements;
use super::sql::{bare_name, copy_text_payload, quote_ident, quote_qualified, quoted_list};
use crate::error::{Result, StrataError};
use crate::orchestrator::RecordSink;

const MAX_IDENT_LEN: usize = 63;
const UNDEFINED_TABLE: &str = "42P01";

/// Per-call knobs for [`BulkUpsertStore::upsert`].
#[derive(Debug, Clone, Default)]
pub struct UpsertOptions {
    /// Columns rewritten on conflict. Defaults to every non-key column.
    pub update_columns: Option<Vec<String>>,
    /// Column stamped with the current time when a conflicting row changes.
    pub timestamp_column: Option<String>,
    /// Remove staged rows identical to the stored row before merging.
    pub skip_unchanged: bool,
}

impl UpsertOptions {
    pub fn with_timestamp(mut self, column: impl Into<String>) -> Self {
        self.timestamp_column = Some(column.into());
        self
    }

    pub fn with_update_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.update_columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }
}

/// Loads record sets through a transaction-scoped staging table and merges
/// them into the target with `INSERT ... ON CONFLICT`.
#[derive(Clone)]
pub struct BulkUpsertStore {
    connections: ConnectionManager,
    skip_unchanged: bool,
}

impl fmt::Debug for BulkUpsertStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BulkUpsertStore")
            .field("connections", &self.connections)
            .field("skip_unchanged", &self.skip_unchanged)
            .finish()
    }
}

impl BulkUpsertStore {
    pub fn new(connections: ConnectionManager) -> Self {
        Self {
            connections,
            skip_unchanged: false,
        }
    }

    /// Applies [`UpsertOptions::skip_unchanged`] to every persist issued
    /// through the [`RecordSink`] impl.
    pub fn with_skip_unchanged(mut self, enabled: bool) -> Self {
        self.skip_unchanged = enabled;
        self
    }

    pub fn connections(&self) -> &ConnectionManager {
        &self.connections
    }

    /// Merges `records` into `table` and returns the number of rows loaded
    /// into staging.
    ///
    /// Rows with a null in any conflict column are dropped first and
    /// duplicate keys collapse to their last occurrence.
    pub async fn upsert(
        &self,
        table: &str,
        mut records: RecordSet,
        conflict_columns: &[&str],
        options: &UpsertOptions,
    ) -> Result<u64> {
        if conflict_columns.is_empty() {
            return Err(StrataError::Configuration(format!(
                "upsert into {table} needs at least one conflict column"
            )));
        }

        let null_keys = records.drop_null_keys(conflict_columns)?;
        if null_keys > 0 {
            tracing::info!(
                target: "strata::store",
                table,
                removed = null_keys,
                "dropped rows with null conflict keys"
            );
        }
        let duplicates = records.dedupe_by(conflict_columns)?;
        if duplicates > 0 {
            tracing::debug!(
                target: "strata::store",
                table,
                removed = duplicates,
                "collapsed duplicate conflict keys"
            );
        }
        if records.is_empty() {
            return Ok(0);
        }

        let plan = MergePlan::new(table, records.columns(), conflict_columns, options);
        let staging = staging_table_name(table);
        let payload = copy_text_payload(records.rows());

        let mut tx = self.connections.begin().await?;
        sqlx::query(&format!(
            "CREATE TEMP TABLE {} (LIKE {} INCLUDING DEFAULTS) ON COMMIT DROP",
            quote_ident(&staging),
            quote_qualified(table)
        ))
        .execute(&mut *tx)
        .await?;

        let mut copy = tx
            .copy_in_raw(&format!(
                "COPY {} ({}) FROM STDIN WITH (FORMAT text)",
                quote_ident(&staging),
                quoted_list(records.columns())
            ))
            .await?;
        copy.send(payload).await?;
        let loaded = copy.finish().await?;

        if options.skip_unchanged || self.skip_unchanged {
            if let Some(sql) = plan.prune_unchanged_sql(&staging) {
                let pruned = sqlx::query(&sql).execute(&mut *tx).await?;
                tracing::debug!(
                    target: "strata::store",
                    table,
                    pruned = pruned.rows_affected(),
                    "skipped unchanged staged rows"
                );
            }
        }

        let merged = sqlx::query(&plan.merge_sql(&staging))
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::debug!(
            target: "strata::store",
            table,
            loaded,
            merged = merged.rows_affected(),
            "upsert committed"
        );
        Ok(loaded)
    }

    /// Creates the table, primary key, indexes and comments if absent, all
    /// inside one transaction.
    pub async fn create_table(&self, schema: &TableSchema) -> Result<()> {
        schema.validate()?;
        let mut tx = self.connections.begin().await?;
        for statement in create_table_statements(schema) {
            sqlx::query(&statement).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        tracing::debug!(target: "strata::store", table = %schema.name, "ensured table");
        Ok(())
    }

    /// Latest stored date in `column`, or `None` for an empty or missing
    /// table.
    pub async fn latest_date(
        &self,
        table: &str,
        column: &str,
    ) -> Result<Option<NaiveDate>> {
        let sql = format!(
            "SELECT MAX({})::date FROM {}",
            quote_ident(column),
            quote_qualified(table)
        );
        match self.connections.fetch_scalar::<NaiveDate>(&sql, &[]).await {
            Err(StrataError::Store(err)) if is_undefined_table(&err) => Ok(None),
            other => other,
        }
    }
}

fn is_undefined_table(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|e| e.code())
        .is_some_and(|code| code == UNDEFINED_TABLE)
}

#[async_trait]
impl RecordSink for BulkUpsertStore {
    async fn ensure_table(&self, schema: &TableSchema) -> Result<()> {
        self.create_table(schema).await
    }

    async fn latest_date(
        &self,
        table: &str,
        date_column: &str,
    ) -> Result<Option<NaiveDate>> {
        BulkUpsertStore::latest_date(self, table, date_column).await
    }

    async fn persist(&self, schema: &TableSchema, records: RecordSet) -> Result<u64> {
        let keys = schema.primary_key_refs();
        let options = UpsertOptions {
            update_columns: None,
            timestamp_column: schema.timestamp_column().map(str::to_string),
            skip_unchanged: self.skip_unchanged,
        };
        self.upsert(&schema.name, records, &keys, &options).await
    }
}

/// `tmp_<table>_<millis>_<id>`, clipped to Postgres' identifier limit.
fn staging_table_name(table: &str) -> String {
    let suffix = format!(
        "_{}_{}",
        Utc::now().timestamp_millis(),
        &Uuid::new_v4().simple().to_string()[..8]
    );
    let budget = MAX_IDENT_LEN - "tmp_".len() - suffix.len();
    let base: String = bare_name(table)
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .take(budget)
        .collect();
    format!("tmp_{base}{suffix}")
}

/// SQL for one merge, derived from the staged columns.
#[derive(Debug)]
struct MergePlan {
    target: String,
    insert_columns: Vec<String>,
    conflict_columns: Vec<String>,
    update_columns: Vec<String>,
    timestamp_column: Option<String>,
}

impl MergePlan {
    fn new(
        table: &str,
        columns: &[String],
        conflict_columns: &[&str],
        options: &UpsertOptions,
    ) -> Self {
        let timestamp_column = options
            .timestamp_column
            .clone()
            .filter(|ts| !conflict_columns.contains(&ts.as_str()));
        let is_ts = |c: &str| timestamp_column.as_deref() == Some(c);

        let update_columns: Vec<String> = match &options.update_columns {
            Some(explicit) => explicit
                .iter()
                .filter(|c| !conflict_columns.contains(&c.as_str()) && !is_ts(c))
                .cloned()
                .collect(),
            None => columns
                .iter()
                .filter(|c| !conflict_columns.contains(&c.as_str()) && !is_ts(c))
                .cloned()
                .collect(),
        };

        Self {
            target: table.to_string(),
            insert_columns: columns.to_vec(),
            conflict_columns: conflict_columns.iter().map(|c| c.to_string()).collect(),
            update_columns,
            timestamp_column,
        }
    }

    fn changed_predicate(&self, left: &str, right: &str) -> Option<String> {
        if self.update_columns.is_empty() {
            return None;
        }
        Some(
            self.update_columns
                .iter()
                .map(|c| {
                    let c = quote_ident(c);
                    format!("{left}.{c} IS DISTINCT FROM {right}.{c}")
                })
                .collect::<Vec<_>>()
                .join(" OR "),
        )
    }

    fn merge_sql(&self, staging: &str) -> String {
        let columns = quoted_list(&self.insert_columns);
        let mut sql = format!(
            "INSERT INTO {} AS t ({columns}) SELECT {columns} FROM {} ON CONFLICT ({}) ",
            quote_qualified(&self.target),
            quote_ident(staging),
            quoted_list(&self.conflict_columns),
        );

        let mut assignments: Vec<String> = self
            .update_columns
            .iter()
            .map(|c| {
                let c = quote_ident(c);
                format!("{c} = EXCLUDED.{c}")
            })
            .collect();

        if let Some(ts) = &self.timestamp_column {
            let ts = quote_ident(ts);
            let expr = match self.changed_predicate("t", "EXCLUDED") {
                Some(changed) => format!(
                    "{ts} = CASE WHEN ({changed}) THEN CURRENT_TIMESTAMP ELSE t.{ts} END"
                ),
                None => format!("{ts} = CURRENT_TIMESTAMP"),
            };
            assignments.push(expr);
        }

        if assignments.is_empty() {
            sql.push_str("DO NOTHING");
        } else {
            sql.push_str("DO UPDATE SET ");
            sql.push_str(&assignments.join(", "));
        }
        sql
    }

    /// Deletes staged rows whose stored counterpart already matches.
    fn prune_unchanged_sql(&self, staging: &str) -> Option<String> {
        let changed = self.changed_predicate("t", "s")?;
        let join = self
            .conflict_columns
            .iter()
            .map(|c| {
                let c = quote_ident(c);
                format!("t.{c} = s.{c}")
            })
            .collect::<Vec<_>>()
            .join(" AND ");
        Some(format!(
            "DELETE FROM {} AS s USING {} AS t WHERE {join} AND NOT ({changed})",
            quote_ident(staging),
            quote_qualified(&self.target),
        ))
    }
}
