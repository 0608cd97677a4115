//! # Experiment inputs
//!
//! Defines the validated data contracts for psychometric fits: a light-weight
//! named-column table handed over by ingestion collaborators, plus typed
//! trial-level and aggregated point-level records.
//!
//! # Examples
//!
//! ```
//! use psychometric_models::{DataTable, TrialData};
//!
//! let table = DataTable::new()
//!     .with_column("Intensity", vec![0.0, 1.0, 2.0])
//!     .with_column("Result", vec![0.0, 1.0, 1.0])
//!     .with_column("Block", vec![0.0, 0.0, 0.0]);
//!
//! let trials = TrialData::from_table(&table).unwrap();
//! assert_eq!(trials.len(), 3);
//! ```
//!
//! ```
//! use psychometric_models::{DataTable, TrialData};
//!
//! let table = DataTable::new()
//!     .with_column("Intensity", vec![0.0, 1.0])
//!     .with_column("Result", vec![0.0, 1.0]);
//!
//! let err = TrialData::from_table(&table).unwrap_err();
//! assert!(err.to_string().contains("Block"));
//! ```

use num_traits::ToPrimitive;
use thiserror::Error;

/// Trial-table intensity column name.
pub const COLUMN_INTENSITY: &str = "Intensity";
/// Trial-table binary outcome column name.
pub const COLUMN_RESULT: &str = "Result";
/// Block label column name, required by every schema.
pub const COLUMN_BLOCK: &str = "Block";
/// Points-table hit count column name.
pub const COLUMN_HITS: &str = "Hits";
/// Points-table trial count column name.
pub const COLUMN_N_TRIALS: &str = "n trials";

/// Errors returned when validating experiment inputs.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum InputError {
    #[error("missing required column: {column}")]
    MissingColumn { column: &'static str },
    #[error("column {column} has {found} rows, expected {expected}")]
    ColumnLengthMismatch {
        column: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("input contains no rows")]
    Empty,
    #[error("intensity contains a non-finite value at row {row}")]
    NonFiniteIntensity { row: usize },
    #[error("result values must be 0 or 1, found {value} at row {row}")]
    InvalidResult { row: usize, value: f64 },
    #[error("block labels must be integer-valued, found {value} at row {row}")]
    NonIntegerBlock { row: usize, value: f64 },
    #[error("{column} values must be non-negative integers, found {value} at row {row}")]
    InvalidCount {
        column: &'static str,
        row: usize,
        value: f64,
    },
    #[error("hits ({hits}) exceed trial count ({n_trials}) at row {row}")]
    HitsExceedTrials {
        row: usize,
        hits: u64,
        n_trials: u64,
    },
    #[error("trial count must be positive at row {row}")]
    ZeroTrialCount { row: usize },
}

/// Named-column table produced by out-of-scope ingestion collaborators.
///
/// Column order is preserved; lookup is by exact name.
#[derive(Debug, Clone, Default)]
pub struct DataTable {
    columns: Vec<(String, Vec<f64>)>,
}

impl DataTable {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            columns: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_column(mut self, name: impl Into<String>, values: Vec<f64>) -> Self {
        self.columns.push((name.into(), values));
        self
    }

    #[must_use]
    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.columns
            .iter()
            .find(|(column, _)| column == name)
            .map(|(_, values)| values.as_slice())
    }

    #[must_use]
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|(column, _)| column == name)
    }

    /// Row count of the first column; zero for an empty table.
    #[must_use]
    pub fn n_rows(&self) -> usize {
        self.columns.first().map_or(0, |(_, values)| values.len())
    }

    fn required_column(
        &self,
        name: &'static str,
        expected_rows: usize,
    ) -> Result<&[f64], InputError> {
        let values = self
            .column(name)
            .ok_or(InputError::MissingColumn { column: name })?;
        if values.len() != expected_rows {
            return Err(InputError::ColumnLengthMismatch {
                column: name,
                expected: expected_rows,
                found: values.len(),
            });
        }
        Ok(values)
    }
}

/// Trial-level observations: one row per presented stimulus.
#[derive(Debug, Clone)]
pub struct TrialData {
    pub intensity: Vec<f64>,
    pub result: Vec<u8>,
    pub block: Vec<i64>,
}

impl TrialData {
    #[must_use]
    pub const fn new(intensity: Vec<f64>, result: Vec<u8>, block: Vec<i64>) -> Self {
        Self {
            intensity,
            result,
            block,
        }
    }

    /// Build validated trial records from a named-column table.
    ///
    /// Requires columns `Intensity`, `Result`, and `Block`.
    ///
    /// # Errors
    ///
    /// Returns `InputError` when a required column is absent or any value is
    /// malformed.
    pub fn from_table(table: &DataTable) -> Result<Self, InputError> {
        let rows = table.n_rows();
        let intensity = table.required_column(COLUMN_INTENSITY, rows)?;
        let result = table.required_column(COLUMN_RESULT, rows)?;
        let block = table.required_column(COLUMN_BLOCK, rows)?;

        let result = result
            .iter()
            .enumerate()
            .map(|(row, &value)| {
                if value == 0.0 {
                    Ok(0)
                } else if value == 1.0 {
                    Ok(1)
                } else {
                    Err(InputError::InvalidResult { row, value })
                }
            })
            .collect::<Result<Vec<u8>, InputError>>()?;
        let block = integer_labels(block)?;

        let trials = Self::new(intensity.to_vec(), result, block);
        trials.validate()?;
        Ok(trials)
    }

    /// Validate lengths and values.
    ///
    /// # Errors
    ///
    /// Returns `InputError` if the records are malformed.
    pub fn validate(&self) -> Result<(), InputError> {
        if self.intensity.is_empty() {
            return Err(InputError::Empty);
        }
        check_length(COLUMN_RESULT, self.intensity.len(), self.result.len())?;
        check_length(COLUMN_BLOCK, self.intensity.len(), self.block.len())?;
        for (row, &value) in self.intensity.iter().enumerate() {
            if !value.is_finite() {
                return Err(InputError::NonFiniteIntensity { row });
            }
        }
        for (row, &value) in self.result.iter().enumerate() {
            if value > 1 {
                return Err(InputError::InvalidResult {
                    row,
                    value: f64::from(value),
                });
            }
        }
        Ok(())
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.intensity.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.intensity.is_empty()
    }

    /// Aggregate trials into per-(block, intensity) hit counts.
    ///
    /// Expects validated records; rows with equal block and bitwise-equal
    /// intensity collapse into one point.
    #[must_use]
    pub fn to_points(&self) -> PointData {
        let mut order: Vec<usize> = (0..self.len()).collect();
        order.sort_by(|&a, &b| {
            self.block[a]
                .cmp(&self.block[b])
                .then(self.intensity[a].total_cmp(&self.intensity[b]))
        });

        let mut intensity = Vec::new();
        let mut hits = Vec::new();
        let mut n_trials = Vec::new();
        let mut block = Vec::new();
        for &row in &order {
            let same_point = block.last() == Some(&self.block[row])
                && intensity
                    .last()
                    .is_some_and(|last: &f64| last.total_cmp(&self.intensity[row]).is_eq());
            if same_point {
                let last = hits.len() - 1;
                hits[last] += u64::from(self.result[row]);
                n_trials[last] += 1;
            } else {
                intensity.push(self.intensity[row]);
                hits.push(u64::from(self.result[row]));
                n_trials.push(1);
                block.push(self.block[row]);
            }
        }

        PointData::new(intensity, hits, n_trials, block)
    }
}

/// Aggregated observations: one row per (block, intensity) pair.
#[derive(Debug, Clone)]
pub struct PointData {
    pub intensity: Vec<f64>,
    pub hits: Vec<u64>,
    pub n_trials: Vec<u64>,
    pub block: Vec<i64>,
}

impl PointData {
    #[must_use]
    pub const fn new(
        intensity: Vec<f64>,
        hits: Vec<u64>,
        n_trials: Vec<u64>,
        block: Vec<i64>,
    ) -> Self {
        Self {
            intensity,
            hits,
            n_trials,
            block,
        }
    }

    /// Build validated point records from a named-column table.
    ///
    /// Requires columns `Intensity`, `Hits`, `n trials`, and `Block`.
    ///
    /// # Errors
    ///
    /// Returns `InputError` when a required column is absent or any value is
    /// malformed.
    pub fn from_table(table: &DataTable) -> Result<Self, InputError> {
        let rows = table.n_rows();
        let intensity = table.required_column(COLUMN_INTENSITY, rows)?;
        let hits = table.required_column(COLUMN_HITS, rows)?;
        let n_trials = table.required_column(COLUMN_N_TRIALS, rows)?;
        let block = table.required_column(COLUMN_BLOCK, rows)?;

        let hits = count_values(COLUMN_HITS, hits)?;
        let n_trials = count_values(COLUMN_N_TRIALS, n_trials)?;
        let block = integer_labels(block)?;

        let points = Self::new(intensity.to_vec(), hits, n_trials, block);
        points.validate()?;
        Ok(points)
    }

    /// Validate lengths and values.
    ///
    /// # Errors
    ///
    /// Returns `InputError` if the records are malformed.
    pub fn validate(&self) -> Result<(), InputError> {
        if self.intensity.is_empty() {
            return Err(InputError::Empty);
        }
        check_length(COLUMN_HITS, self.intensity.len(), self.hits.len())?;
        check_length(COLUMN_N_TRIALS, self.intensity.len(), self.n_trials.len())?;
        check_length(COLUMN_BLOCK, self.intensity.len(), self.block.len())?;
        for (row, &value) in self.intensity.iter().enumerate() {
            if !value.is_finite() {
                return Err(InputError::NonFiniteIntensity { row });
            }
        }
        for row in 0..self.len() {
            if self.n_trials[row] == 0 {
                return Err(InputError::ZeroTrialCount { row });
            }
            if self.hits[row] > self.n_trials[row] {
                return Err(InputError::HitsExceedTrials {
                    row,
                    hits: self.hits[row],
                    n_trials: self.n_trials[row],
                });
            }
        }
        Ok(())
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.intensity.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.intensity.is_empty()
    }
}

fn check_length(column: &'static str, expected: usize, found: usize) -> Result<(), InputError> {
    if expected == found {
        Ok(())
    } else {
        Err(InputError::ColumnLengthMismatch {
            column,
            expected,
            found,
        })
    }
}

fn integer_labels(values: &[f64]) -> Result<Vec<i64>, InputError> {
    values
        .iter()
        .enumerate()
        .map(|(row, &value)| {
            if value.is_finite() && value.fract() == 0.0 {
                value
                    .to_i64()
                    .ok_or(InputError::NonIntegerBlock { row, value })
            } else {
                Err(InputError::NonIntegerBlock { row, value })
            }
        })
        .collect()
}

fn count_values(column: &'static str, values: &[f64]) -> Result<Vec<u64>, InputError> {
    values
        .iter()
        .enumerate()
        .map(|(row, &value)| {
            if value.is_finite() && value.fract() == 0.0 {
                value
                    .to_u64()
                    .ok_or(InputError::InvalidCount { column, row, value })
            } else {
                Err(InputError::InvalidCount { column, row, value })
            }
        })
        .collect()
}
