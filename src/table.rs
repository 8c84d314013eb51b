use chrono::NaiveDate;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

use crate::error::{PipelineError, Result};

/// A single typed cell of a [`RecordSet`]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Str(String),
    Int(i64),
    Float(f64),
    Date(NaiveDate),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Numeric view of the cell. Strings are not coerced.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) if !f.is_nan() => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Value::Date(d) => Some(*d),
            _ => None,
        }
    }

    pub fn from_f64(value: Option<f64>) -> Self {
        match value {
            Some(v) if !v.is_nan() => Value::Float(v),
            _ => Value::Null,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Str(_) => "string",
            Value::Int(_) => "integer",
            Value::Float(_) => "float",
            Value::Date(_) => "date",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Str(s) => write!(f, "{s}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
        }
    }
}

/// Hashable projection of a [`Value`], used for grouping and key uniqueness.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum KeyPart {
    Null,
    Str(String),
    Int(i64),
    Float(u64),
    Date(NaiveDate),
}

impl From<&Value> for KeyPart {
    fn from(v: &Value) -> Self {
        match v {
            Value::Null => KeyPart::Null,
            Value::Str(s) => KeyPart::Str(s.clone()),
            Value::Int(i) => KeyPart::Int(*i),
            Value::Float(f) if f.is_nan() => KeyPart::Null,
            Value::Float(f) => KeyPart::Float(f.to_bits()),
            Value::Date(d) => KeyPart::Date(*d),
        }
    }
}

/// Borrowed view of one row: a mapping from column name to cell.
#[derive(Debug, Clone, Copy)]
pub struct Row<'a> {
    columns: &'a [String],
    values: &'a [Value],
}

impl<'a> Row<'a> {
    pub fn get(&self, column: &str) -> Option<&'a Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|idx| &self.values[idx])
    }

    pub fn values(&self) -> &'a [Value] {
        self.values
    }

    pub fn f64(&self, column: &str) -> Option<f64> {
        self.get(column).and_then(Value::as_f64)
    }

    pub fn str(&self, column: &str) -> Option<&'a str> {
        self.get(column).and_then(Value::as_str)
    }

    pub fn date(&self, column: &str) -> Option<NaiveDate> {
        self.get(column).and_then(Value::as_date)
    }
}

/// Ordered columns plus rows of typed cells.
///
/// Every row has exactly one cell per declared column. Operations never mutate
/// in place; they return a new record set.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct RecordSet {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl RecordSet {
    pub fn new<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> Self {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    pub fn from_rows<S: Into<String>>(
        columns: impl IntoIterator<Item = S>,
        rows: Vec<Vec<Value>>,
    ) -> Result<Self> {
        let mut set = Self::new(columns);
        for row in rows {
            set.push_row(row)?;
        }
        Ok(set)
    }

    /// Append a row while building a record set. Fails when the width does not
    /// match the declared columns.
    pub fn push_row(&mut self, row: Vec<Value>) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(PipelineError::Schema(format!(
                "row has {} cells but {} columns are declared",
                row.len(),
                self.columns.len()
            )));
        }
        self.rows.push(row);
        Ok(())
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

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    pub fn column_index(&self, name: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| PipelineError::missing_column(name))
    }

    pub fn rows(&self) -> impl Iterator<Item = Row<'_>> + '_ {
        self.rows.iter().map(move |values| Row {
            columns: &self.columns,
            values,
        })
    }

    pub fn row(&self, idx: usize) -> Option<Row<'_>> {
        self.rows.get(idx).map(|values| Row {
            columns: &self.columns,
            values,
        })
    }

    pub fn column(&self, name: &str) -> Result<impl Iterator<Item = &Value> + '_> {
        let idx = self.column_index(name)?;
        Ok(self.rows.iter().map(move |r| &r[idx]))
    }

    /// Same columns, no rows.
    pub fn empty_like(&self) -> Self {
        Self {
            columns: self.columns.clone(),
            rows: Vec::new(),
        }
    }

    pub fn select(&self, columns: &[&str]) -> Result<Self> {
        let indices = columns
            .iter()
            .map(|c| self.column_index(c))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows: self
                .rows
                .iter()
                .map(|r| indices.iter().map(|&i| r[i].clone()).collect())
                .collect(),
        })
    }

    pub fn filter<F>(&self, predicate: F) -> Self
    where
        F: Fn(&Row<'_>) -> bool,
    {
        let rows = self
            .rows
            .iter()
            .filter(|values| {
                predicate(&Row {
                    columns: &self.columns,
                    values,
                })
            })
            .cloned()
            .collect();
        Self {
            columns: self.columns.clone(),
            rows,
        }
    }

    /// Keep the rows at the given positions, in the given order.
    pub fn take(&self, positions: &[usize]) -> Self {
        Self {
            columns: self.columns.clone(),
            rows: positions
                .iter()
                .filter_map(|&i| self.rows.get(i).cloned())
                .collect(),
        }
    }

    /// Partition rows by the values of `keys`. Groups come back in the order in
    /// which each key first appears; rows inside a group keep source order.
    pub fn group_by(&self, keys: &[&str]) -> Result<Vec<(Vec<Value>, RecordSet)>> {
        let indices = keys
            .iter()
            .map(|k| self.column_index(k))
            .collect::<Result<Vec<_>>>()?;

        let mut slots: HashMap<Vec<KeyPart>, usize> = HashMap::new();
        let mut groups: Vec<(Vec<Value>, RecordSet)> = Vec::new();
        for row in &self.rows {
            let key: Vec<Value> = indices.iter().map(|&i| row[i].clone()).collect();
            let hashed: Vec<KeyPart> = key.iter().map(KeyPart::from).collect();
            let slot = *slots.entry(hashed).or_insert_with(|| {
                groups.push((key, self.empty_like()));
                groups.len() - 1
            });
            groups[slot].1.rows.push(row.clone());
        }
        Ok(groups)
    }

    /// For every row, whether an earlier row already carried the same key.
    pub fn duplicated(&self, keys: &[&str]) -> Result<Vec<bool>> {
        let indices = keys
            .iter()
            .map(|k| self.column_index(k))
            .collect::<Result<Vec<_>>>()?;
        let mut seen = std::collections::HashSet::new();
        Ok(self
            .rows
            .iter()
            .map(|row| {
                let key: Vec<KeyPart> = indices.iter().map(|&i| KeyPart::from(&row[i])).collect();
                !seen.insert(key)
            })
            .collect())
    }

    /// Keep only the last occurrence of each key; survivors keep source order.
    pub fn dedup_keep_last(&self, keys: &[&str]) -> Result<Self> {
        let indices = keys
            .iter()
            .map(|k| self.column_index(k))
            .collect::<Result<Vec<_>>>()?;
        let mut last: HashMap<Vec<KeyPart>, usize> = HashMap::new();
        for (pos, row) in self.rows.iter().enumerate() {
            let key: Vec<KeyPart> = indices.iter().map(|&i| KeyPart::from(&row[i])).collect();
            last.insert(key, pos);
        }
        let mut keep: Vec<usize> = last.into_values().collect();
        keep.sort_unstable();
        Ok(self.take(&keep))
    }

    /// Stable ascending sort on a date column. Null dates sort last.
    pub fn sorted_by_date(&self, column: &str) -> Result<Self> {
        let idx = self.column_index(column)?;
        let mut rows = self.rows.clone();
        rows.sort_by_key(|r| match r[idx].as_date() {
            Some(d) => (false, Some(d)),
            None => (true, None),
        });
        Ok(Self {
            columns: self.columns.clone(),
            rows,
        })
    }
}
