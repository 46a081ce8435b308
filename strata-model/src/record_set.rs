use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use crate::error::{ModelError, Result};
use crate::value::{Value, float_to_i64};

pub type Row = Vec<Value>;

/// Table of named columns held row-major.
///
/// Column names are unique and every row is exactly as wide as the column
/// list; all mutators preserve both invariants.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordSet {
    columns: Vec<String>,
    rows: Vec<Row>,
}

impl RecordSet {
    pub fn new<I, S>(columns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        ensure_unique(&columns)?;
        Ok(Self {
            columns,
            rows: Vec::new(),
        })
    }

    pub fn from_rows<I, S>(columns: I, rows: Vec<Row>) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut set = Self::new(columns)?;
        set.rows.reserve(rows.len());
        for row in rows {
            set.push_row(row)?;
        }
        Ok(set)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    fn require_index(&self, name: &str) -> Result<usize> {
        self.column_index(name)
            .ok_or_else(|| ModelError::UnknownColumn(name.to_string()))
    }

    pub fn get(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.column_index(column)?;
        self.rows.get(row).and_then(|r| r.get(idx))
    }

    pub fn push_row(&mut self, row: Row) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(ModelError::RowWidth {
                expected: self.columns.len(),
                actual: row.len(),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    /// Appends another set's rows, aligning them by column name.
    ///
    /// An empty set with no columns adopts the other set's shape.
    pub fn append(&mut self, other: RecordSet) -> Result<()> {
        if self.columns.is_empty() && self.rows.is_empty() {
            *self = other;
            return Ok(());
        }
        if other.columns.is_empty() && other.rows.is_empty() {
            return Ok(());
        }
        if other.columns == self.columns {
            self.rows.extend(other.rows);
            return Ok(());
        }
        if other.columns.len() != self.columns.len() {
            return Err(ModelError::RowWidth {
                expected: self.columns.len(),
                actual: other.columns.len(),
            });
        }
        let mapping = self
            .columns
            .iter()
            .map(|name| other.require_index(name))
            .collect::<Result<Vec<_>>>()?;
        for mut row in other.rows {
            let aligned = mapping
                .iter()
                .map(|&idx| std::mem::take(&mut row[idx]))
                .collect();
            self.rows.push(aligned);
        }
        Ok(())
    }

    /// Renames columns; names absent from `map` are kept.
    pub fn rename_columns(&mut self, map: &HashMap<String, String>) -> Result<()> {
        let renamed: Vec<String> = self
            .columns
            .iter()
            .map(|c| map.get(c).cloned().unwrap_or_else(|| c.clone()))
            .collect();
        ensure_unique(&renamed)?;
        self.columns = renamed;
        Ok(())
    }

    pub fn add_column(&mut self, name: impl Into<String>, fill: Value) -> Result<()> {
        let name = name.into();
        if self.has_column(&name) {
            return Err(ModelError::DuplicateColumn(name));
        }
        self.columns.push(name);
        for row in &mut self.rows {
            row.push(fill.clone());
        }
        Ok(())
    }

    /// Replaces every cell of `column` with `f(cell)`.
    pub fn map_column<F>(&mut self, column: &str, mut f: F) -> Result<()>
    where
        F: FnMut(Value) -> Value,
    {
        let idx = self.require_index(column)?;
        for row in &mut self.rows {
            let cell = std::mem::take(&mut row[idx]);
            row[idx] = f(cell);
        }
        Ok(())
    }

    pub fn column_values(&self, column: &str) -> Result<impl Iterator<Item = &Value>> {
        let idx = self.require_index(column)?;
        Ok(self.rows.iter().map(move |r| &r[idx]))
    }

    /// Keeps rows for which `keep` returns true; returns the removed count.
    pub fn retain_rows<F>(&mut self, mut keep: F) -> usize
    where
        F: FnMut(&[Value]) -> bool,
    {
        let before = self.rows.len();
        self.rows.retain(|row| keep(row));
        before - self.rows.len()
    }

    /// Keeps rows whose mask entry is true; returns the removed count.
    pub fn retain_mask(&mut self, mask: &[bool]) -> Result<usize> {
        if mask.len() != self.rows.len() {
            return Err(ModelError::RowWidth {
                expected: self.rows.len(),
                actual: mask.len(),
            });
        }
        let mut it = mask.iter();
        Ok(self.retain_rows(|_| *it.next().unwrap_or(&false)))
    }

    /// Reduces the set to the listed columns, in the listed order. Listed
    /// names that are absent are skipped, as are repeats.
    pub fn project(&mut self, keep: &[&str]) {
        let mut indices: Vec<usize> = Vec::with_capacity(keep.len());
        for index in keep.iter().filter_map(|name| self.column_index(name)) {
            if !indices.contains(&index) {
                indices.push(index);
            }
        }
        if indices.len() == self.columns.len()
            && indices.iter().enumerate().all(|(i, &j)| i == j)
        {
            return;
        }
        self.columns = indices.iter().map(|&i| self.columns[i].clone()).collect();
        for row in &mut self.rows {
            let projected = indices
                .iter()
                .map(|&i| std::mem::take(&mut row[i]))
                .collect();
            *row = projected;
        }
    }

    /// Stable sort by the listed columns, ascending.
    pub fn sort_by_columns(&mut self, columns: &[&str]) -> Result<()> {
        let indices = columns
            .iter()
            .map(|c| self.require_index(c))
            .collect::<Result<Vec<_>>>()?;
        self.rows.sort_by(|a, b| {
            indices
                .iter()
                .map(|&i| a[i].sort_cmp(&b[i]))
                .find(|o| *o != Ordering::Equal)
                .unwrap_or(Ordering::Equal)
        });
        Ok(())
    }

    /// Drops rows with a null in any of `keys`; returns the removed count.
    pub fn drop_null_keys(&mut self, keys: &[&str]) -> Result<usize> {
        let indices = keys
            .iter()
            .map(|c| self.require_index(c))
            .collect::<Result<Vec<_>>>()?;
        Ok(self.retain_rows(|row| indices.iter().all(|&i| !row[i].is_null())))
    }

    /// Removes duplicate key tuples keeping the last occurrence of each.
    /// Surviving rows keep their relative order. Returns the removed count.
    pub fn dedupe_by(&mut self, keys: &[&str]) -> Result<usize> {
        let indices = keys
            .iter()
            .map(|c| self.require_index(c))
            .collect::<Result<Vec<_>>>()?;
        let mut seen = HashSet::with_capacity(self.rows.len());
        let mut keep = vec![false; self.rows.len()];
        for (pos, row) in self.rows.iter().enumerate().rev() {
            let key: Vec<String> =
                indices.iter().map(|&i| key_part(&row[i])).collect();
            keep[pos] = seen.insert(key);
        }
        self.retain_mask(&keep)
    }
}

fn key_part(value: &Value) -> String {
    match value {
        Value::Null => "\u{0}".to_string(),
        Value::Float(f) => match float_to_i64(*f) {
            Some(i) => i.to_string(),
            None => f.to_string(),
        },
        other => other.to_string(),
    }
}

fn ensure_unique(columns: &[String]) -> Result<()> {
    let mut seen = HashSet::with_capacity(columns.len());
    for c in columns {
        if !seen.insert(c.as_str()) {
            return Err(ModelError::DuplicateColumn(c.clone()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quotes() -> RecordSet {
        RecordSet::from_rows(
            ["ts_code", "trade_date", "close"],
            vec![
                vec!["B".into(), "20240103".into(), Value::Float(2.0)],
                vec!["A".into(), "20240102".into(), Value::Float(1.0)],
                vec!["B".into(), "20240103".into(), Value::Float(2.5)],
                vec![Value::Null, "20240104".into(), Value::Float(3.0)],
            ],
        )
        .unwrap()
    }

    #[test]
    fn rejects_duplicate_columns() {
        let err = RecordSet::new(["a", "b", "a"]).unwrap_err();
        assert_eq!(err, ModelError::DuplicateColumn("a".into()));
    }

    #[test]
    fn rejects_ragged_rows() {
        let mut set = RecordSet::new(["a", "b"]).unwrap();
        let err = set.push_row(vec![Value::Int(1)]).unwrap_err();
        assert!(matches!(err, ModelError::RowWidth { expected: 2, actual: 1 }));
    }

    #[test]
    fn dedupe_keeps_last_occurrence() {
        let mut set = quotes();
        let removed = set.dedupe_by(&["ts_code", "trade_date"]).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(set.len(), 3);
        let closes: Vec<_> = set.column_values("close").unwrap().cloned().collect();
        assert_eq!(
            closes,
            vec![Value::Float(1.0), Value::Float(2.5), Value::Float(3.0)]
        );
    }

    #[test]
    fn drop_null_keys_counts_removed_rows() {
        let mut set = quotes();
        assert_eq!(set.drop_null_keys(&["ts_code"]).unwrap(), 1);
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn append_aligns_by_name() {
        let mut left = RecordSet::from_rows(
            ["a", "b"],
            vec![vec![Value::Int(1), Value::Int(2)]],
        )
        .unwrap();
        let right = RecordSet::from_rows(
            ["b", "a"],
            vec![vec![Value::Int(20), Value::Int(10)]],
        )
        .unwrap();
        left.append(right).unwrap();
        assert_eq!(left.rows()[1], vec![Value::Int(10), Value::Int(20)]);
    }

    #[test]
    fn append_into_empty_adopts_shape() {
        let mut acc = RecordSet::default();
        acc.append(quotes()).unwrap();
        assert_eq!(acc.columns(), quotes().columns());
        assert_eq!(acc.len(), 4);
    }

    #[test]
    fn rename_then_project_and_sort() {
        let mut set = quotes();
        let map = HashMap::from([("close".to_string(), "close_px".to_string())]);
        set.rename_columns(&map).unwrap();
        set.project(&["trade_date", "ts_code", "close_px", "missing"]);
        assert_eq!(set.columns(), ["trade_date", "ts_code", "close_px"]);
        set.sort_by_columns(&["trade_date", "ts_code"]).unwrap();
        assert_eq!(set.get(0, "ts_code"), Some(&Value::from("A")));
    }

    #[test]
    fn project_ignores_repeated_names() {
        let mut set = quotes();
        set.project(&["ts_code", "close", "ts_code", "close"]);
        assert_eq!(set.columns(), ["ts_code", "close"]);
        assert_eq!(set.get(0, "ts_code"), Some(&Value::from("B")));
        assert_eq!(set.get(0, "close"), Some(&Value::Float(2.0)));
    }

    #[test]
    fn huge_float_keys_stay_distinct() {
        let mut set = RecordSet::from_rows(
            ["k", "v"],
            vec![
                vec![Value::Float(1e30), Value::Int(1)],
                vec![Value::Float(2e30), Value::Int(2)],
                vec![Value::Float(3.0), Value::Int(3)],
                vec![Value::Int(3), Value::Int(4)],
            ],
        )
        .unwrap();
        assert_eq!(set.dedupe_by(&["k"]).unwrap(), 1);
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn rename_to_existing_name_is_rejected() {
        let mut set = quotes();
        let map = HashMap::from([("close".to_string(), "ts_code".to_string())]);
        assert!(set.rename_columns(&map).is_err());
        assert_eq!(set.columns()[2], "close");
    }
}
