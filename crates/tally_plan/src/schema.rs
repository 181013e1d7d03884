//! Dataset schema types.
//!
//! The schema is the only thing the validator ever looks at. It is derived
//! from the dataset profile and never from the rows themselves.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Inferred column data type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ColumnDtype {
    /// 64-bit signed integer
    Integer,
    /// 64-bit floating point
    Float,
    /// true/false, yes/no
    Boolean,
    /// Calendar date without time
    Date,
    /// Date and time, interpreted as UTC
    DateTime,
    /// UTF-8 text (fallback)
    #[default]
    Text,
}

impl ColumnDtype {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnDtype::Integer => "integer",
            ColumnDtype::Float => "float",
            ColumnDtype::Boolean => "boolean",
            ColumnDtype::Date => "date",
            ColumnDtype::DateTime => "datetime",
            ColumnDtype::Text => "text",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, ColumnDtype::Integer | ColumnDtype::Float)
    }

    pub fn is_temporal(&self) -> bool {
        matches!(self, ColumnDtype::Date | ColumnDtype::DateTime)
    }
}

impl fmt::Display for ColumnDtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ColumnDtype {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "integer" | "int" | "int64" => Ok(ColumnDtype::Integer),
            "float" | "float64" | "double" => Ok(ColumnDtype::Float),
            "boolean" | "bool" => Ok(ColumnDtype::Boolean),
            "date" => Ok(ColumnDtype::Date),
            "datetime" | "timestamp" => Ok(ColumnDtype::DateTime),
            "text" | "string" => Ok(ColumnDtype::Text),
            _ => Err(format!("Invalid column dtype: '{}'", s)),
        }
    }
}

/// One column of a dataset schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub dtype: ColumnDtype,
    #[serde(default)]
    pub is_date: bool,
    #[serde(default)]
    pub is_id: bool,
}

impl ColumnSchema {
    pub fn new(name: impl Into<String>, dtype: ColumnDtype) -> Self {
        Self {
            name: name.into(),
            dtype,
            is_date: dtype.is_temporal(),
            is_id: false,
        }
    }

    /// Mark the column as date-like even though its dtype may be text.
    pub fn date_like(mut self) -> Self {
        self.is_date = true;
        self
    }

    pub fn id_like(mut self) -> Self {
        self.is_id = true;
        self
    }

    /// True when values in this column can be read as timestamps.
    pub fn is_time_column(&self) -> bool {
        self.is_date || self.dtype.is_temporal()
    }
}

/// Ordered column list of a dataset.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DatasetSchema {
    pub columns: Vec<ColumnSchema>,
}

impl DatasetSchema {
    pub fn new(columns: Vec<ColumnSchema>) -> Self {
        Self { columns }
    }

    /// Look a column up by exact name, returning its position.
    pub fn column(&self, name: &str) -> Option<(usize, &ColumnSchema)> {
        self.columns
            .iter()
            .enumerate()
            .find(|(_, col)| col.name == name)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dtype_roundtrip_str() {
        for dtype in [
            ColumnDtype::Integer,
            ColumnDtype::Float,
            ColumnDtype::Boolean,
            ColumnDtype::Date,
            ColumnDtype::DateTime,
            ColumnDtype::Text,
        ] {
            assert_eq!(dtype.as_str().parse::<ColumnDtype>().unwrap(), dtype);
        }
        assert!("decimal".parse::<ColumnDtype>().is_err());
    }

    #[test]
    fn test_lookup_returns_index() {
        let schema = DatasetSchema::new(vec![
            ColumnSchema::new("id", ColumnDtype::Integer).id_like(),
            ColumnSchema::new("revenue", ColumnDtype::Float),
        ]);
        let (idx, col) = schema.column("revenue").unwrap();
        assert_eq!(idx, 1);
        assert_eq!(col.dtype, ColumnDtype::Float);
        assert!(schema.column("Revenue").is_none());
    }

    #[test]
    fn test_text_column_can_be_date_like() {
        let col = ColumnSchema::new("order_date", ColumnDtype::Text).date_like();
        assert!(col.is_time_column());
        assert!(!ColumnSchema::new("region", ColumnDtype::Text).is_time_column());
    }
}
