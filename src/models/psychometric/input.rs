//! Observation preparation shared by the trial and point samplers.
//!
//! Raw block labels are re-indexed densely in ascending label order, and
//! intensities are standardized once so both sampler front ends see the
//! same design.

use std::collections::BTreeSet;

use crate::input::{PointData, TrialData};
use crate::preprocess::Standardizer;

fn u64_to_f64(value: u64) -> f64 {
    f64::from(u32::try_from(value).unwrap_or(u32::MAX))
}

/// Sorted unique labels plus the dense per-row assignment.
fn dense_block_index(raw: &[i64]) -> (Vec<i64>, Vec<usize>) {
    let unique: BTreeSet<i64> = raw.iter().copied().collect();
    let labels: Vec<i64> = unique.into_iter().collect();
    let assignment = raw
        .iter()
        .map(|label| labels.partition_point(|known| known < label))
        .collect();
    (labels, assignment)
}

/// Trial-level design ready for the sampler. Expects validated records.
#[derive(Debug, Clone)]
pub(crate) struct PreparedTrials {
    /// Standardized intensities.
    pub x: Vec<f64>,
    /// Responses as 0.0 / 1.0.
    pub response: Vec<f64>,
    /// Dense block index per trial.
    pub block: Vec<usize>,
    /// Raw labels in ascending order; position is the dense index.
    pub block_labels: Vec<i64>,
    pub standardizer: Standardizer,
}

impl PreparedTrials {
    pub fn from_trials(trials: &TrialData) -> Self {
        let standardizer = Standardizer::fit(&trials.intensity);
        let (block_labels, block) = dense_block_index(&trials.block);
        Self {
            x: standardizer.standardize_all(&trials.intensity),
            response: trials.result.iter().map(|&r| f64::from(r)).collect(),
            block,
            block_labels,
            standardizer,
        }
    }

    pub fn n_blocks(&self) -> usize {
        self.block_labels.len()
    }
}

/// Aggregated design ready for the sampler. Expects validated records.
#[derive(Debug, Clone)]
pub(crate) struct PreparedPoints {
    /// Standardized intensities.
    pub x: Vec<f64>,
    pub hits: Vec<f64>,
    pub n_trials: Vec<f64>,
    /// Dense block index per point.
    pub block: Vec<usize>,
    /// Raw labels in ascending order; position is the dense index.
    pub block_labels: Vec<i64>,
    pub standardizer: Standardizer,
}

impl PreparedPoints {
    pub fn from_points(points: &PointData) -> Self {
        let standardizer = Standardizer::fit(&points.intensity);
        let (block_labels, block) = dense_block_index(&points.block);
        Self {
            x: standardizer.standardize_all(&points.intensity),
            hits: points.hits.iter().map(|&h| u64_to_f64(h)).collect(),
            n_trials: points.n_trials.iter().map(|&n| u64_to_f64(n)).collect(),
            block,
            block_labels,
            standardizer,
        }
    }

    pub fn n_blocks(&self) -> usize {
        self.block_labels.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn block_index_sorts_labels_ascending() {
        let (labels, assignment) = dense_block_index(&[5, 2, 2, 7]);
        assert_eq!(labels, vec![2, 5, 7]);
        assert_eq!(assignment, vec![1, 0, 0, 2]);
    }

    #[test]
    fn prepared_trials_standardize_intensity() {
        let trials = TrialData::new(
            vec![0.0, 1.0, 2.0, 0.0, 1.0, 2.0],
            vec![0, 0, 1, 0, 1, 1],
            vec![1, 1, 1, 0, 0, 0],
        );
        let prepared = PreparedTrials::from_trials(&trials);

        assert_eq!(prepared.n_blocks(), 2);
        assert_eq!(prepared.block_labels, vec![0, 1]);
        assert_eq!(prepared.block, vec![1, 1, 1, 0, 0, 0]);
        assert_eq!(prepared.response, vec![0.0, 0.0, 1.0, 0.0, 1.0, 1.0]);

        let mean: f64 = prepared.x.iter().sum::<f64>() / 6.0;
        assert_relative_eq!(mean, 0.0, epsilon = 1.0e-12);
        assert_relative_eq!(prepared.standardizer.mean, 1.0);
    }

    #[test]
    fn prepared_points_carry_counts_as_floats() {
        let points = PointData::new(vec![0.5, 1.5], vec![3, 9], vec![10, 10], vec![4, 4]);
        let prepared = PreparedPoints::from_points(&points);

        assert_eq!(prepared.n_blocks(), 1);
        assert_eq!(prepared.block, vec![0, 0]);
        assert_eq!(prepared.hits, vec![3.0, 9.0]);
        assert_eq!(prepared.n_trials, vec![10.0, 10.0]);
    }
}
