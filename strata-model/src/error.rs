use std::fmt::{self, Display};

/// Errors produced by model constructors and invariant checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// Two columns in one record set or schema share a name.
    DuplicateColumn(String),
    /// A referenced column does not exist.
    UnknownColumn(String),
    /// A row's width does not match the column count.
    RowWidth { expected: usize, actual: usize },
    /// A schema or type declaration is malformed.
    InvalidSchema(String),
}

impl Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::DuplicateColumn(name) => {
                write!(f, "duplicate column: {name}")
            }
            ModelError::UnknownColumn(name) => {
                write!(f, "unknown column: {name}")
            }
            ModelError::RowWidth { expected, actual } => write!(
                f,
                "row has {actual} values but the record set has {expected} columns"
            ),
            ModelError::InvalidSchema(msg) => {
                write!(f, "invalid schema: {msg}")
            }
        }
    }
}

impl std::error::Error for ModelError {}

pub type Result<T> = std::result::Result<T, ModelError>;
