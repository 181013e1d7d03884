//! Read-only dataset seam.

use crate::cell::CellValue;
use crate::schema::DatasetSchema;

/// A tabular dataset the interpreter can read.
///
/// Implementations must return rows whose length matches the schema. Cells
/// beyond the end of a short row are treated as null.
pub trait DatasetSource {
    fn schema(&self) -> &DatasetSchema;
    fn rows(&self) -> &[Vec<CellValue>];
}

/// In-memory dataset.
#[derive(Debug, Clone, Default)]
pub struct Table {
    schema: DatasetSchema,
    rows: Vec<Vec<CellValue>>,
}

impl Table {
    pub fn new(schema: DatasetSchema, rows: Vec<Vec<CellValue>>) -> Self {
        Self { schema, rows }
    }

    /// Build a table from raw text rows, parsing each cell against its column dtype.
    /// Short rows are padded with nulls and extra cells are dropped.
    pub fn from_text_rows<R, S>(schema: DatasetSchema, rows: R) -> Self
    where
        R: IntoIterator,
        R::Item: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let width = schema.len();
        let parsed = rows
            .into_iter()
            .map(|raw| {
                let mut row: Vec<CellValue> = raw
                    .into_iter()
                    .zip(schema.columns.iter())
                    .map(|(cell, col)| CellValue::parse(cell.as_ref(), col.dtype))
                    .collect();
                row.resize(width, CellValue::Null);
                row
            })
            .collect();
        Self {
            schema,
            rows: parsed,
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

impl DatasetSource for Table {
    fn schema(&self) -> &DatasetSchema {
        &self.schema
    }

    fn rows(&self) -> &[Vec<CellValue>] {
        &self.rows
    }
}
