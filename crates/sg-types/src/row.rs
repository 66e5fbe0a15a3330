use std::collections::VecDeque;
use std::sync::Arc;

use crate::value::{FromValue, Value};
use crate::SgError;

/// One buffered result set: column names plus row values in column order.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultSet {
    columns: Arc<[String]>,
    rows: Vec<Vec<Value>>,
}

impl ResultSet {
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ResultSet {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    /// Append a row. Short rows are padded with `Null`, long rows truncated
    /// to the column count.
    pub fn with_row(mut self, mut values: Vec<Value>) -> Self {
        values.resize(self.columns.len(), Value::Null);
        self.rows.push(values);
        self
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Borrowed view of a single row.
#[derive(Debug, Clone, Copy)]
pub struct Row<'a> {
    columns: &'a [String],
    values: &'a [Value],
}

impl<'a> Row<'a> {
    /// Column lookup; exact match first, then ASCII case-insensitive.
    pub fn ordinal(&self, column: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c == column)
            .or_else(|| self.columns.iter().position(|c| c.eq_ignore_ascii_case(column)))
    }

    pub fn get(&self, column: &str) -> Option<&'a Value> {
        self.ordinal(column).map(|i| &self.values[i])
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.ordinal(column).is_some()
    }

    pub fn get_as<T: FromValue>(&self, column: &str) -> Result<T, SgError> {
        let value = self
            .get(column)
            .ok_or_else(|| SgError::Mapping(format!("column '{column}' not in result set")))?;
        T::from_value(value).ok_or_else(|| {
            SgError::Mapping(format!(
                "column '{column}' holds a {} value that does not convert to {}",
                value.type_name(),
                std::any::type_name::<T>()
            ))
        })
    }

    pub fn columns(&self) -> &'a [String] {
        self.columns
    }

    pub fn values(&self) -> &'a [Value] {
        self.values
    }
}

/// Forward-only reader over one or more buffered result sets.
///
/// Rows of the current set are consumed with [`Reader::next_row`];
/// [`Reader::next_result`] discards the remainder and advances to the
/// following set.
#[derive(Debug, Clone, Default)]
pub struct Reader {
    sets: VecDeque<ResultSet>,
    cursor: usize,
}

impl Reader {
    pub fn new(sets: Vec<ResultSet>) -> Self {
        Reader { sets: sets.into(), cursor: 0 }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn next_row(&mut self) -> Option<Row<'_>> {
        let index = self.cursor;
        if !self.has_rows() {
            return None;
        }
        self.cursor += 1;
        let set = self.sets.front()?;
        Some(Row { columns: &set.columns, values: &set.rows[index] })
    }

    /// Advance to the next result set. Returns `false` when none remain.
    pub fn next_result(&mut self) -> bool {
        if self.sets.pop_front().is_none() {
            return false;
        }
        self.cursor = 0;
        !self.sets.is_empty()
    }

    /// `true` while the current result set has rows left.
    pub fn has_rows(&self) -> bool {
        self.sets.front().map(|s| self.cursor < s.rows.len()).unwrap_or(false)
    }
}

/// Compile-time mapping from a result row to a model.
pub trait FromRow: Sized {
    fn from_row(row: &Row<'_>) -> Result<Self, SgError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_sets() -> Reader {
        Reader::new(vec![
            ResultSet::new(["Id", "Name"])
                .with_row(vec![Value::I32(1), Value::from("a")])
                .with_row(vec![Value::I32(2)]),
            ResultSet::new(["Total"]).with_row(vec![Value::I64(9)]),
        ])
    }

    #[test]
    fn reads_rows_then_advances_sets() {
        let mut reader = two_sets();
        assert_eq!(reader.next_row().unwrap().get_as::<i32>("Id").unwrap(), 1);
        let second = reader.next_row().unwrap();
        assert_eq!(second.get("Name"), Some(&Value::Null));
        assert!(reader.next_row().is_none());

        assert!(reader.next_result());
        assert_eq!(reader.next_row().unwrap().get_as::<i64>("total").unwrap(), 9);
        assert!(!reader.next_result());
        assert!(reader.next_row().is_none());
    }

    #[test]
    fn missing_column_is_a_mapping_error() {
        let mut reader = two_sets();
        let row = reader.next_row().unwrap();
        assert!(matches!(row.get_as::<i32>("Nope"), Err(SgError::Mapping(_))));
        assert!(matches!(row.get_as::<String>("Id"), Err(SgError::Mapping(_))));
    }
}
