//! Data-driven dataset definitions.
//!
//! A [`DatasetSpec`] carries everything the orchestrator needs to ingest
//! one upstream endpoint into one table: request shape, column mapping,
//! transforms, validators and the batch strategy. Specs deserialize from
//! TOML; code-only hooks (closures) are attached afterwards.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use serde::{Deserialize, Serialize};
use strata_model::{BatchDescriptor, RecordSet, TableSchema, Value};

use crate::api::Params;
use crate::error::{Result, StrataError};
use crate::planner::SplitStrategy;

pub const DEFAULT_DATE_FORMAT: &str = "%Y%m%d";
pub const DEFAULT_TIMESTAMP_FORMAT: &str = "%Y%m%d %H:%M:%S";

pub type TransformFn =
    Arc<dyn Fn(Value) -> std::result::Result<Value, String> + Send + Sync>;
pub type RowPredicate = Arc<dyn Fn(&RowView<'_>) -> bool + Send + Sync>;
/// Returns one keep/drop flag per row.
pub type SetValidator = Arc<dyn Fn(&RecordSet) -> Vec<bool> + Send + Sync>;

/// Read-only view of one row with lookup by column name.
#[derive(Debug, Clone, Copy)]
pub struct RowView<'a> {
    columns: &'a [String],
    values: &'a [Value],
}

impl<'a> RowView<'a> {
    pub fn new(columns: &'a [String], values: &'a [Value]) -> Self {
        Self { columns, values }
    }

    pub fn get(&self, column: &str) -> Option<&'a Value> {
        let idx = self.columns.iter().position(|c| c == column)?;
        self.values.get(idx)
    }

    pub fn values(&self) -> &'a [Value] {
        self.values
    }
}

/// Built-in per-cell transform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ValueTransform {
    Trim,
    Uppercase,
    Lowercase,
    /// Multiplies numeric cells, e.g. to convert units.
    Scale { factor: f64 },
    ToInteger,
    ToDecimal,
    EmptyAsNull,
}

impl ValueTransform {
    /// Applies the transform; nulls pass through untouched.
    pub fn apply(&self, value: Value) -> std::result::Result<Value, String> {
        if value.is_null() {
            return Ok(value);
        }
        match self {
            ValueTransform::Trim => Ok(map_text(value, |s| s.trim().to_string())),
            ValueTransform::Uppercase => Ok(map_text(value, |s| s.to_uppercase())),
            ValueTransform::Lowercase => Ok(map_text(value, |s| s.to_lowercase())),
            ValueTransform::EmptyAsNull => Ok(match value {
                Value::Text(s) if s.trim().is_empty() => Value::Null,
                other => other,
            }),
            ValueTransform::Scale { factor } => match value {
                Value::Decimal(d) => {
                    let f = Decimal::from_f64(*factor).ok_or_else(|| {
                        format!("scale factor {factor} is not representable")
                    })?;
                    d.checked_mul(f)
                        .map(Value::Decimal)
                        .ok_or_else(|| format!("scaling {d} by {factor} overflows"))
                }
                other => match other.as_f64() {
                    Some(v) if (v * factor).is_finite() => Ok(Value::Float(v * factor)),
                    Some(v) => Err(format!("scaling {v} by {factor} overflows")),
                    None => Err(format!("cannot scale non-numeric {other:?}")),
                },
            },
            ValueTransform::ToInteger => value
                .as_i64()
                .map(Value::Int)
                .ok_or_else(|| format!("not an integer: {value}")),
            ValueTransform::ToDecimal => value
                .as_decimal()
                .map(Value::Decimal)
                .ok_or_else(|| format!("not a decimal: {value}")),
        }
    }
}

fn map_text(value: Value, f: impl FnOnce(&str) -> String) -> Value {
    match value {
        Value::Text(s) => Value::Text(f(&s)),
        other => other,
    }
}

/// Built-in row validator. Rows failing any validator are dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "check", rename_all = "snake_case")]
pub enum Validator {
    NotNull { columns: Vec<String> },
    /// Nulls pass; pair with `not_null` to reject them.
    NonNegative { column: String },
    Range {
        column: String,
        #[serde(default)]
        min: Option<f64>,
        #[serde(default)]
        max: Option<f64>,
    },
    OneOf { column: String, values: Vec<String> },
}

impl Validator {
    pub fn columns(&self) -> Vec<&str> {
        match self {
            Validator::NotNull { columns } => {
                columns.iter().map(String::as_str).collect()
            }
            Validator::NonNegative { column }
            | Validator::Range { column, .. }
            | Validator::OneOf { column, .. } => vec![column.as_str()],
        }
    }

    pub fn check(&self, row: &RowView<'_>) -> bool {
        let cell = |c: &str| row.get(c).unwrap_or(&Value::Null);
        match self {
            Validator::NotNull { columns } => {
                columns.iter().all(|c| !cell(c).is_null())
            }
            Validator::NonNegative { column } => match cell(column) {
                Value::Null => true,
                v => v.as_f64().is_some_and(|x| x >= 0.0),
            },
            Validator::Range { column, min, max } => match cell(column) {
                Value::Null => true,
                v => v.as_f64().is_some_and(|x| {
                    min.is_none_or(|lo| x >= lo) && max.is_none_or(|hi| x <= hi)
                }),
            },
            Validator::OneOf { column, values } => match cell(column) {
                Value::Null => true,
                v => {
                    let rendered = v.to_string();
                    values.iter().any(|allowed| *allowed == rendered)
                }
            },
        }
    }
}

/// Closures registered in code next to the declarative parts of a spec.
#[derive(Clone, Default)]
pub struct DatasetHooks {
    pub transforms: Vec<(String, TransformFn)>,
    pub row_validators: Vec<(String, RowPredicate)>,
    pub set_validators: Vec<(String, SetValidator)>,
}

impl fmt::Debug for DatasetHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn names<T>(hooks: &[(String, T)]) -> Vec<&str> {
            hooks.iter().map(|(n, _)| n.as_str()).collect()
        }
        f.debug_struct("DatasetHooks")
            .field("transforms", &names(&self.transforms))
            .field("row_validators", &names(&self.row_validators))
            .field("set_validators", &names(&self.set_validators))
            .finish()
    }
}

/// Everything needed to ingest one endpoint into one table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetSpec {
    pub name: String,
    pub endpoint: String,
    /// Upstream field names requested, in column order. Empty requests
    /// every field.
    #[serde(default)]
    pub fields: Vec<String>,
    /// Fixed parameters sent with every call.
    #[serde(default)]
    pub params: Params,
    #[serde(default)]
    pub page_size: Option<usize>,
    pub table: TableSchema,
    /// Upstream field name to column name.
    #[serde(default)]
    pub column_map: BTreeMap<String, String>,
    /// Column to chrono format for temporal columns.
    #[serde(default)]
    pub date_formats: BTreeMap<String, String>,
    #[serde(default)]
    pub transforms: BTreeMap<String, Vec<ValueTransform>>,
    #[serde(default)]
    pub validators: Vec<Validator>,
    #[serde(default)]
    pub split: SplitStrategy,
    #[serde(default = "default_start_param")]
    pub start_param: String,
    #[serde(default = "default_end_param")]
    pub end_param: String,
    /// Used instead of the start/end pair for single-day batches.
    #[serde(default)]
    pub single_date_param: Option<String>,
    #[serde(default = "default_date_format")]
    pub date_param_format: String,
    #[serde(skip)]
    pub hooks: DatasetHooks,
}

fn default_start_param() -> String {
    "start_date".to_string()
}

fn default_end_param() -> String {
    "end_date".to_string()
}

fn default_date_format() -> String {
    DEFAULT_DATE_FORMAT.to_string()
}

impl DatasetSpec {
    pub fn new(
        name: impl Into<String>,
        endpoint: impl Into<String>,
        table: TableSchema,
    ) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            fields: Vec::new(),
            params: Params::new(),
            page_size: None,
            table,
            column_map: BTreeMap::new(),
            date_formats: BTreeMap::new(),
            transforms: BTreeMap::new(),
            validators: Vec::new(),
            split: SplitStrategy::default(),
            start_param: default_start_param(),
            end_param: default_end_param(),
            single_date_param: None,
            date_param_format: default_date_format(),
            hooks: DatasetHooks::default(),
        }
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let spec: DatasetSpec = toml::from_str(raw).map_err(|e| {
            StrataError::Configuration(format!("invalid dataset definition: {e}"))
        })?;
        spec.validate()?;
        Ok(spec)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            StrataError::Configuration(format!(
                "cannot read dataset {}: {e}",
                path.display()
            ))
        })?;
        Self::from_toml_str(&raw)
    }

    /// Structural checks that must pass before any batch runs.
    pub fn validate(&self) -> Result<()> {
        if self.endpoint.trim().is_empty() {
            return Err(StrataError::Configuration(format!(
                "dataset {} has no endpoint",
                self.name
            )));
        }
        self.table.validate().map_err(|e| {
            StrataError::Configuration(format!("dataset {}: {e}", self.name))
        })?;
        Ok(())
    }

    pub fn with_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_split(mut self, split: SplitStrategy) -> Self {
        self.split = split;
        self
    }

    pub fn with_column_mapping(
        mut self,
        field: impl Into<String>,
        column: impl Into<String>,
    ) -> Self {
        self.column_map.insert(field.into(), column.into());
        self
    }

    pub fn with_value_transform(
        mut self,
        column: impl Into<String>,
        transform: ValueTransform,
    ) -> Self {
        self.transforms.entry(column.into()).or_default().push(transform);
        self
    }

    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validators.push(validator);
        self
    }

    /// Registers a transform closure for one column. Runs after the
    /// built-in transforms for that column.
    pub fn with_transform<F>(mut self, column: impl Into<String>, f: F) -> Self
    where
        F: Fn(Value) -> std::result::Result<Value, String> + Send + Sync + 'static,
    {
        self.hooks.transforms.push((column.into(), Arc::new(f)));
        self
    }

    pub fn with_row_validator<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&RowView<'_>) -> bool + Send + Sync + 'static,
    {
        self.hooks.row_validators.push((name.into(), Arc::new(f)));
        self
    }

    pub fn with_set_validator<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&RecordSet) -> Vec<bool> + Send + Sync + 'static,
    {
        self.hooks.set_validators.push((name.into(), Arc::new(f)));
        self
    }

    pub fn date_column(&self) -> Option<&str> {
        self.table.date_column.as_deref()
    }

    /// Format used to parse `column`, falling back per column type.
    pub fn date_format_for(&self, column: &str) -> &str {
        if let Some(fmt) = self.date_formats.get(column) {
            return fmt;
        }
        match self.table.column(column).map(|c| &c.column_type) {
            Some(ty) if ty.is_temporal() && *ty != strata_model::ColumnType::Date => {
                DEFAULT_TIMESTAMP_FORMAT
            }
            _ => DEFAULT_DATE_FORMAT,
        }
    }

    pub fn format_param_date(&self, date: NaiveDate) -> String {
        date.format(&self.date_param_format).to_string()
    }

    /// Request parameters for one batch: fixed params, then the batch's
    /// filters, then its dates.
    pub fn batch_params(&self, batch: &BatchDescriptor) -> Params {
        let mut params = self.params.clone();
        for (key, value) in &batch.filters {
            params.insert(key.clone(), value.clone().into());
        }
        match &self.single_date_param {
            Some(single) if batch.is_single_day() => {
                params.insert(single.clone(), self.format_param_date(batch.start).into());
            }
            _ => {
                params.insert(
                    self.start_param.clone(),
                    self.format_param_date(batch.start).into(),
                );
                params.insert(
                    self.end_param.clone(),
                    self.format_param_date(batch.end).into(),
                );
            }
        }
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_model::ColumnType;

    const DAILY: &str = r#"
name = "daily"
endpoint = "daily"
fields = ["ts_code", "trade_date", "close", "vol"]
single_date_param = "trade_date"

[params]
adj = "qfq"

[table]
name = "market.daily"
primary_keys = ["ts_code", "trade_date"]
date_column = "trade_date"
columns = [
  { name = "ts_code", type = "varchar(16)" },
  { name = "trade_date", type = "date" },
  { name = "close", type = "numeric(15,4)" },
  { name = "volume", type = "bigint", comment = "shares" },
]

[column_map]
vol = "volume"

[transforms]
volume = [{ op = "scale", factor = 100.0 }, { op = "to_integer" }]

[[validators]]
check = "not_null"
columns = ["close"]

[[validators]]
check = "range"
column = "close"
min = 0.0

[split]
kind = "trading_days"
market_window = 1
entity_window = 240
entity_param = "ts_code"
"#;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn parses_full_definition() {
        let spec = DatasetSpec::from_toml_str(DAILY).unwrap();
        assert_eq!(spec.table.columns[1].column_type, ColumnType::Date);
        assert_eq!(spec.column_map["vol"], "volume");
        assert_eq!(spec.transforms["volume"].len(), 2);
        assert_eq!(spec.validators.len(), 2);
        assert_eq!(spec.start_param, "start_date");
        assert!(spec.table.auto_timestamp_column);
    }

    #[test]
    fn rejects_undeclared_primary_key() {
        let broken = DAILY.replace(
            r#"primary_keys = ["ts_code", "trade_date"]"#,
            r#"primary_keys = ["ts_code", "ann_date"]"#,
        );
        assert!(matches!(
            DatasetSpec::from_toml_str(&broken),
            Err(StrataError::Configuration(_))
        ));
    }

    #[test]
    fn batch_params_pick_single_day_key() {
        let spec = DatasetSpec::from_toml_str(DAILY).unwrap();
        let mut filters = BTreeMap::new();
        filters.insert("ts_code".to_string(), "000001.SZ".to_string());

        let single = spec.batch_params(&BatchDescriptor::new(
            d(2024, 1, 2),
            d(2024, 1, 2),
            filters.clone(),
        ));
        assert_eq!(single["trade_date"], "20240102");
        assert_eq!(single["adj"], "qfq");
        assert_eq!(single["ts_code"], "000001.SZ");
        assert!(!single.contains_key("start_date"));

        let range = spec.batch_params(&BatchDescriptor::new(
            d(2024, 1, 2),
            d(2024, 1, 31),
            filters,
        ));
        assert_eq!(range["start_date"], "20240102");
        assert_eq!(range["end_date"], "20240131");
    }

    #[test]
    fn transforms_degrade_to_errors_not_panics() {
        assert_eq!(
            ValueTransform::Scale { factor: 0.5 }.apply(Value::Int(3)),
            Ok(Value::Float(1.5))
        );
        assert_eq!(
            ValueTransform::ToInteger.apply(Value::from(" 42 ")),
            Ok(Value::Int(42))
        );
        assert!(ValueTransform::ToInteger.apply(Value::from("n/a")).is_err());
        assert_eq!(
            ValueTransform::EmptyAsNull.apply(Value::from("  ")),
            Ok(Value::Null)
        );
        assert_eq!(ValueTransform::Trim.apply(Value::Null), Ok(Value::Null));
    }

    #[test]
    fn overflowing_numbers_are_errors() {
        let scale = ValueTransform::Scale { factor: 100.0 };
        assert!(scale.apply(Value::Decimal(Decimal::MAX)).is_err());
        assert!(scale.apply(Value::Float(f64::MAX)).is_err());
        assert_eq!(
            scale.apply(Value::Decimal(Decimal::new(125, 2))),
            Ok(Value::Decimal(Decimal::new(125, 0)))
        );
        assert!(ValueTransform::ToInteger.apply(Value::Float(1e30)).is_err());
        assert!(ValueTransform::ToInteger.apply(Value::Float(-1e30)).is_err());
    }

    #[test]
    fn validators_check_rows() {
        let columns = vec!["close".to_string(), "exchange".to_string()];
        let ok = vec![Value::Float(1.0), Value::from("SSE")];
        let bad = vec![Value::Float(-1.0), Value::from("NYSE")];
        let range = Validator::Range {
            column: "close".into(),
            min: Some(0.0),
            max: None,
        };
        let one_of = Validator::OneOf {
            column: "exchange".into(),
            values: vec!["SSE".into(), "SZSE".into()],
        };
        assert!(range.check(&RowView::new(&columns, &ok)));
        assert!(!range.check(&RowView::new(&columns, &bad)));
        assert!(one_of.check(&RowView::new(&columns, &ok)));
        assert!(!one_of.check(&RowView::new(&columns, &bad)));
    }
}
