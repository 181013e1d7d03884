//! Dataset profile produced by the profiling stage.

use serde::{Deserialize, Serialize};
use tally_plan::{ColumnDtype, ColumnSchema, DatasetSchema};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnProfile {
    pub name: String,
    pub dtype: ColumnDtype,
    pub null_count: usize,
    pub null_pct: f64,
    pub unique_count: usize,
    #[serde(default)]
    pub sample_values: Vec<String>,
    #[serde(default)]
    pub is_date: bool,
    #[serde(default)]
    pub is_id: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mean: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetProfile {
    pub row_count: usize,
    pub column_count: usize,
    pub columns: Vec<ColumnProfile>,
    #[serde(default)]
    pub potential_join_keys: Vec<String>,
    #[serde(default)]
    pub date_columns: Vec<String>,
}

impl DatasetProfile {
    /// Schema handed to the plan validator.
    pub fn schema(&self) -> DatasetSchema {
        DatasetSchema::new(
            self.columns
                .iter()
                .map(|col| ColumnSchema {
                    name: col.name.clone(),
                    dtype: col.dtype,
                    is_date: col.is_date,
                    is_id: col.is_id,
                })
                .collect(),
        )
    }

    pub fn column(&self, name: &str) -> Option<&ColumnProfile> {
        self.columns.iter().find(|c| c.name == name)
    }
}
