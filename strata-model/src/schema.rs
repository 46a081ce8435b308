use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};

/// Default name of the column stamped on insert and on changed updates.
pub const DEFAULT_TIMESTAMP_COLUMN: &str = "update_time";

/// SQL column type as declared by a dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(try_from = "String", into = "String")
)]
pub enum ColumnType {
    Text,
    Varchar(u32),
    SmallInt,
    Integer,
    BigInt,
    Numeric { precision: u32, scale: u32 },
    Real,
    Double,
    Boolean,
    Date,
    Timestamp,
    TimestampTz,
}

impl ColumnType {
    pub fn is_temporal(&self) -> bool {
        matches!(
            self,
            ColumnType::Date | ColumnType::Timestamp | ColumnType::TimestampTz
        )
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            ColumnType::SmallInt | ColumnType::Integer | ColumnType::BigInt
        )
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Text => f.write_str("TEXT"),
            ColumnType::Varchar(n) => write!(f, "VARCHAR({n})"),
            ColumnType::SmallInt => f.write_str("SMALLINT"),
            ColumnType::Integer => f.write_str("INTEGER"),
            ColumnType::BigInt => f.write_str("BIGINT"),
            ColumnType::Numeric { precision, scale } => {
                write!(f, "NUMERIC({precision},{scale})")
            }
            ColumnType::Real => f.write_str("REAL"),
            ColumnType::Double => f.write_str("DOUBLE PRECISION"),
            ColumnType::Boolean => f.write_str("BOOLEAN"),
            ColumnType::Date => f.write_str("DATE"),
            ColumnType::Timestamp => f.write_str("TIMESTAMP"),
            ColumnType::TimestampTz => f.write_str("TIMESTAMPTZ"),
        }
    }
}

impl FromStr for ColumnType {
    type Err = ModelError;

    fn from_str(raw: &str) -> Result<Self> {
        let normalized = raw.trim().to_ascii_lowercase();
        let (head, args) = match normalized.split_once('(') {
            Some((head, rest)) => {
                let args = rest.strip_suffix(')').ok_or_else(|| {
                    ModelError::InvalidSchema(format!("unbalanced type: {raw}"))
                })?;
                (head.trim().to_string(), Some(args.to_string()))
            }
            None => (normalized.clone(), None),
        };
        let parse_u32 = |s: &str| {
            s.trim().parse::<u32>().map_err(|_| {
                ModelError::InvalidSchema(format!("bad type argument in {raw}"))
            })
        };

        let ty = match (head.as_str(), args) {
            ("text", None) => ColumnType::Text,
            ("varchar" | "character varying", Some(n)) => {
                ColumnType::Varchar(parse_u32(&n)?)
            }
            ("smallint" | "int2", None) => ColumnType::SmallInt,
            ("integer" | "int" | "int4", None) => ColumnType::Integer,
            ("bigint" | "int8", None) => ColumnType::BigInt,
            ("numeric" | "decimal", None) => ColumnType::Numeric {
                precision: 20,
                scale: 4,
            },
            ("numeric" | "decimal", Some(args)) => {
                let (p, s) = args.split_once(',').unwrap_or((args.as_str(), "0"));
                ColumnType::Numeric {
                    precision: parse_u32(p)?,
                    scale: parse_u32(s)?,
                }
            }
            ("real" | "float4", None) => ColumnType::Real,
            ("double precision" | "double" | "float8" | "float", None) => {
                ColumnType::Double
            }
            ("boolean" | "bool", None) => ColumnType::Boolean,
            ("date", None) => ColumnType::Date,
            ("timestamp", None) => ColumnType::Timestamp,
            ("timestamptz" | "timestamp with time zone", None) => {
                ColumnType::TimestampTz
            }
            _ => {
                return Err(ModelError::InvalidSchema(format!(
                    "unsupported column type: {raw}"
                )));
            }
        };
        Ok(ty)
    }
}

impl TryFrom<String> for ColumnType {
    type Error = ModelError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<ColumnType> for String {
    fn from(value: ColumnType) -> Self {
        value.to_string()
    }
}

/// A single column of a target table.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ColumnDef {
    pub name: String,
    #[cfg_attr(feature = "serde", serde(rename = "type"))]
    pub column_type: ColumnType,
    /// Extra column constraints appended verbatim, e.g. `NOT NULL`.
    #[cfg_attr(feature = "serde", serde(default))]
    pub constraints: Option<String>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub comment: Option<String>,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            constraints: None,
            comment: None,
        }
    }

    pub fn with_constraints(mut self, constraints: impl Into<String>) -> Self {
        self.constraints = Some(constraints.into());
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct IndexSpec {
    /// Generated from table and column names when absent.
    #[cfg_attr(feature = "serde", serde(default))]
    pub name: Option<String>,
    pub columns: Vec<String>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub unique: bool,
}

impl IndexSpec {
    pub fn resolved_name(&self, table: &str) -> String {
        self.name.clone().unwrap_or_else(|| {
            let bare = table.rsplit('.').next().unwrap_or(table);
            format!("idx_{}_{}", bare, self.columns.join("_"))
        })
    }
}

/// Shape of a target table, supplied per dataset. Read-only to the core.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TableSchema {
    /// Optionally schema-qualified, e.g. `market.daily`.
    pub name: String,
    pub columns: Vec<ColumnDef>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub primary_keys: Vec<String>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub date_column: Option<String>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub indexes: Vec<IndexSpec>,
    #[cfg_attr(feature = "serde", serde(default = "default_true"))]
    pub auto_timestamp_column: bool,
    #[cfg_attr(
        feature = "serde",
        serde(default = "default_timestamp_column")
    )]
    pub timestamp_column_name: String,
}

#[cfg(feature = "serde")]
fn default_true() -> bool {
    true
}

#[cfg(feature = "serde")]
fn default_timestamp_column() -> String {
    DEFAULT_TIMESTAMP_COLUMN.to_string()
}

impl TableSchema {
    pub fn new(name: impl Into<String>, columns: Vec<ColumnDef>) -> Self {
        Self {
            name: name.into(),
            columns,
            primary_keys: Vec::new(),
            date_column: None,
            indexes: Vec::new(),
            auto_timestamp_column: true,
            timestamp_column_name: DEFAULT_TIMESTAMP_COLUMN.to_string(),
        }
    }

    pub fn with_primary_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_date_column(mut self, column: impl Into<String>) -> Self {
        self.date_column = Some(column.into());
        self
    }

    pub fn with_index(mut self, index: IndexSpec) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn without_timestamp(mut self) -> Self {
        self.auto_timestamp_column = false;
        self
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// The timestamp column maintained by the store, if enabled.
    pub fn timestamp_column(&self) -> Option<&str> {
        self.auto_timestamp_column
            .then_some(self.timestamp_column_name.as_str())
    }

    pub fn primary_key_refs(&self) -> Vec<&str> {
        self.primary_keys.iter().map(String::as_str).collect()
    }

    /// Checks internal consistency: unique column names and every key,
    /// date and index column declared.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(ModelError::InvalidSchema("table name is empty".into()));
        }
        if self.columns.is_empty() {
            return Err(ModelError::InvalidSchema(format!(
                "table {} declares no columns",
                self.name
            )));
        }
        let mut seen = HashSet::new();
        for col in &self.columns {
            if !seen.insert(col.name.as_str()) {
                return Err(ModelError::DuplicateColumn(col.name.clone()));
            }
        }
        let referenced = self
            .primary_keys
            .iter()
            .chain(self.date_column.iter())
            .chain(self.indexes.iter().flat_map(|i| i.columns.iter()));
        for name in referenced {
            let is_timestamp = self.timestamp_column() == Some(name.as_str());
            if !seen.contains(name.as_str()) && !is_timestamp {
                return Err(ModelError::UnknownColumn(name.clone()));
            }
        }
        Ok(())
    }
}
