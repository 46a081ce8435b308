use std::collections::HashMap;

use chrono::{NaiveDate, NaiveDateTime};
use strata_model::{ColumnType, RecordSet, Value};

use crate::dataset::{DatasetSpec, RowView};
use crate::error::Result;

/// Row counts removed by [`transform`] and [`validate`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageReport {
    pub invalid_dates: usize,
    pub nulled_cells: usize,
    pub failed_validation: usize,
}

/// Renames, projects, parses, transforms and sorts a fetched set.
///
/// Cells that fail to parse or transform become null. Rows whose primary
/// date column fails to parse are dropped.
pub fn transform(
    spec: &DatasetSpec,
    mut records: RecordSet,
    report: &mut StageReport,
) -> Result<RecordSet> {
    if !spec.column_map.is_empty() {
        let map: HashMap<String, String> = spec
            .column_map
            .iter()
            .filter(|(from, _)| records.has_column(from))
            .map(|(from, to)| (from.clone(), to.clone()))
            .collect();
        records.rename_columns(&map)?;
    }

    let mut keep: Vec<&str> = Vec::with_capacity(spec.table.columns.len() + 1);
    for name in spec
        .table
        .columns
        .iter()
        .map(|c| c.name.as_str())
        .chain(spec.table.timestamp_column())
    {
        if records.has_column(name) && !keep.contains(&name) {
            keep.push(name);
        }
    }
    let dropped: Vec<String> = records
        .columns()
        .iter()
        .filter(|c| !keep.contains(&c.as_str()))
        .cloned()
        .collect();
    if !dropped.is_empty() {
        tracing::trace!(
            target: "strata::task",
            dataset = %spec.name,
            ?dropped,
            "ignoring unmapped fields"
        );
    }
    records.project(&keep);

    for column in &spec.table.columns {
        if !column.column_type.is_temporal() || !records.has_column(&column.name) {
            continue;
        }
        let format = spec.date_format_for(&column.name);
        let date_only = column.column_type == ColumnType::Date;
        let mut failed = 0usize;
        records.map_column(&column.name, |cell| {
            let parsed = parse_temporal(cell, format, date_only);
            if parsed.is_none() {
                failed += 1;
            }
            parsed.unwrap_or(Value::Null)
        })?;
        if failed == 0 {
            continue;
        }
        if spec.date_column() == Some(column.name.as_str()) {
            let dropped = records.drop_null_keys(&[column.name.as_str()])?;
            report.invalid_dates += dropped;
            tracing::debug!(
                target: "strata::task",
                dataset = %spec.name,
                column = %column.name,
                dropped,
                "dropped rows with unparseable primary date"
            );
        } else {
            report.nulled_cells += failed;
        }
    }

    for (column, transforms) in &spec.transforms {
        if !records.has_column(column) {
            continue;
        }
        let mut failed = 0usize;
        records.map_column(column, |cell| {
            transforms
                .iter()
                .try_fold(cell, |value, t| t.apply(value))
                .unwrap_or_else(|_| {
                    failed += 1;
                    Value::Null
                })
        })?;
        report.nulled_cells += failed;
    }

    for (column, hook) in &spec.hooks.transforms {
        if !records.has_column(column) {
            continue;
        }
        let mut failed = 0usize;
        records.map_column(column, |cell| {
            hook(cell).unwrap_or_else(|_| {
                failed += 1;
                Value::Null
            })
        })?;
        report.nulled_cells += failed;
    }

    let mut order: Vec<&str> = Vec::new();
    if let Some(date) = spec.date_column().filter(|d| records.has_column(d)) {
        order.push(date);
    }
    for key in &spec.table.primary_keys {
        if records.has_column(key) && !order.contains(&key.as_str()) {
            order.push(key);
        }
    }
    if !order.is_empty() {
        records.sort_by_columns(&order)?;
    }

    Ok(records)
}

/// Drops rows failing any declared or registered validator.
pub fn validate(
    spec: &DatasetSpec,
    mut records: RecordSet,
    report: &mut StageReport,
) -> Result<RecordSet> {
    if records.is_empty() {
        return Ok(records);
    }

    let mut keep = vec![true; records.len()];

    let validators: Vec<_> = spec
        .validators
        .iter()
        .filter(|v| {
            let missing: Vec<&str> = v
                .columns()
                .into_iter()
                .filter(|c| !records.has_column(c))
                .collect();
            if !missing.is_empty() {
                tracing::warn!(
                    target: "strata::task",
                    dataset = %spec.name,
                    ?missing,
                    "skipping validator on absent columns"
                );
            }
            missing.is_empty()
        })
        .collect();

    for (row, flag) in records.rows().iter().zip(keep.iter_mut()) {
        let view = RowView::new(records.columns(), row);
        *flag = validators.iter().all(|v| v.check(&view))
            && spec.hooks.row_validators.iter().all(|(_, p)| p(&view));
    }

    for (name, validator) in &spec.hooks.set_validators {
        let mask = validator(&records);
        if mask.len() != keep.len() {
            tracing::warn!(
                target: "strata::task",
                dataset = %spec.name,
                validator = %name,
                "set validator returned a mask of the wrong length; ignored"
            );
            continue;
        }
        for (flag, ok) in keep.iter_mut().zip(mask) {
            *flag &= ok;
        }
    }

    let removed = records.retain_mask(&keep)?;
    report.failed_validation += removed;
    if removed > 0 {
        tracing::debug!(
            target: "strata::task",
            dataset = %spec.name,
            removed,
            "rows failed validation"
        );
    }
    Ok(records)
}

/// Parses one cell into a date or timestamp. `None` when unparseable;
/// nulls and blank text map to `Some(Null)`.
fn parse_temporal(cell: Value, format: &str, date_only: bool) -> Option<Value> {
    match cell {
        Value::Null => Some(Value::Null),
        Value::Date(d) if date_only => Some(Value::Date(d)),
        Value::Date(d) => Some(Value::Timestamp(d.and_time(chrono::NaiveTime::MIN))),
        Value::Timestamp(ts) if date_only => Some(Value::Date(ts.date())),
        Value::Timestamp(ts) => Some(Value::Timestamp(ts)),
        Value::Int(i) => parse_temporal(Value::Text(i.to_string()), format, date_only),
        Value::Text(raw) => {
            let raw = raw.trim();
            if raw.is_empty() {
                return Some(Value::Null);
            }
            if date_only {
                parse_date(raw, format).map(Value::Date)
            } else {
                parse_timestamp(raw, format).map(Value::Timestamp)
            }
        }
        _ => None,
    }
}

fn parse_date(raw: &str, format: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw, format)
        .or_else(|_| NaiveDate::parse_from_str(raw, "%Y-%m-%d"))
        .or_else(|_| NaiveDate::parse_from_str(raw, "%Y%m%d"))
        .ok()
}

fn parse_timestamp(raw: &str, format: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, format)
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S"))
        .ok()
        .or_else(|| {
            parse_date(raw, crate::dataset::DEFAULT_DATE_FORMAT)
                .map(|d| d.and_time(chrono::NaiveTime::MIN))
        })
}
