//! Fitting entry points: NUTS chains over the hierarchical model.

use rand::Rng;

use super::input::{PreparedPoints, PreparedTrials};
use super::model::{PointsModel, TrialsModel};
use super::posterior::{ChainDraws, FitArtifact};
use super::types::{FitOptions, PsychometricError};
use crate::inference::{InferenceError, LogDensity, NutsChain, NutsOptions, sample_chain};
use crate::input::{DataTable, PointData, TrialData};
use crate::preprocess::Standardizer;

/// Fit the hierarchical model to trial-level observations.
///
/// Blocks are inferred from the `block` labels; chains run in parallel on
/// scoped threads and the call blocks until every chain finishes.
///
/// # Errors
///
/// Returns `PsychometricError` if options or data are invalid, a chain
/// panics, or sampling fails to produce draws.
pub fn fit_trials(
    trials: &TrialData,
    options: FitOptions,
) -> Result<FitArtifact, PsychometricError> {
    options.validate()?;
    trials.validate()?;

    let model = TrialsModel::new(PreparedTrials::from_trials(trials));
    let raw_chains = sample_chains(&model, options)?;
    Ok(assemble_artifact(
        raw_chains,
        model.data().n_blocks(),
        false,
        model.data().block_labels.clone(),
        model.data().standardizer,
        options.max_treedepth,
    ))
}

/// Fit the hierarchical model to aggregated (block, intensity) counts.
///
/// Uses the beta-binomial observation model with a shared `kappa_obs`
/// overdispersion parameter.
///
/// # Errors
///
/// Returns `PsychometricError` if options or data are invalid, a chain
/// panics, or sampling fails to produce draws.
pub fn fit_points(
    points: &PointData,
    options: FitOptions,
) -> Result<FitArtifact, PsychometricError> {
    options.validate()?;
    points.validate()?;

    let model = PointsModel::new(PreparedPoints::from_points(points));
    let raw_chains = sample_chains(&model, options)?;
    Ok(assemble_artifact(
        raw_chains,
        model.data().n_blocks(),
        true,
        model.data().block_labels.clone(),
        model.data().standardizer,
        options.max_treedepth,
    ))
}

/// Fit trial-level observations from a named-column table.
///
/// Requires columns `Intensity`, `Result`, and `Block`.
///
/// # Errors
///
/// Returns `PsychometricError` if the table is malformed or fitting fails.
pub fn fit_trials_table(
    table: &DataTable,
    options: FitOptions,
) -> Result<FitArtifact, PsychometricError> {
    let trials = TrialData::from_table(table)?;
    fit_trials(&trials, options)
}

/// Fit aggregated counts from a named-column table.
///
/// Requires columns `Intensity`, `Hits`, `n trials`, and `Block`.
///
/// # Errors
///
/// Returns `PsychometricError` if the table is malformed or fitting fails.
pub fn fit_points_table(
    table: &DataTable,
    options: FitOptions,
) -> Result<FitArtifact, PsychometricError> {
    let points = PointData::from_table(table)?;
    fit_points(&points, options)
}

/// Run every configured chain and collect the raw draws in chain order.
fn sample_chains<M>(model: &M, options: FitOptions) -> Result<Vec<NutsChain>, PsychometricError>
where
    M: LogDensity + Sync,
{
    let nuts = NutsOptions {
        max_treedepth: options.max_treedepth,
        target_accept: options.target_accept,
        ..NutsOptions::default()
    };
    let base_seed = options
        .random_seed
        .unwrap_or_else(|| rand::rng().random::<u64>());

    if options.chains == 1 {
        let chain = sample_chain(model, options.tune, options.draws, base_seed, nuts)?;
        return Ok(vec![chain]);
    }

    let mut chain_results = (0..options.chains)
        .map(|_| None)
        .collect::<Vec<Option<Result<NutsChain, InferenceError>>>>();

    std::thread::scope(|scope| -> Result<(), PsychometricError> {
        let mut handles = Vec::with_capacity(options.chains);
        for chain_index in 0..options.chains {
            let seed = chain_seed(base_seed, chain_index, options.seed_stride);
            handles.push((
                chain_index,
                scope.spawn(move || sample_chain(model, options.tune, options.draws, seed, nuts)),
            ));
        }

        for (chain_index, handle) in handles {
            let result = handle
                .join()
                .map_err(|_| PsychometricError::ChainPanicked)?;
            chain_results[chain_index] = Some(result);
        }

        Ok(())
    })?;

    let mut chains = Vec::with_capacity(options.chains);
    for chain_result in &mut chain_results {
        let chain = chain_result
            .take()
            .ok_or(PsychometricError::ChainPanicked)??;
        chains.push(chain);
    }
    Ok(chains)
}

fn chain_seed(base: u64, chain_index: usize, stride: u64) -> u64 {
    let index = u64::try_from(chain_index).unwrap_or(u64::MAX);
    base.wrapping_add(index.saturating_mul(stride))
}

fn assemble_artifact(
    raw_chains: Vec<NutsChain>,
    n_blocks: usize,
    has_kappa_obs: bool,
    block_labels: Vec<i64>,
    standardizer: Standardizer,
    max_treedepth: usize,
) -> FitArtifact {
    let chains = raw_chains
        .into_iter()
        .map(|chain| ChainDraws::from_nuts(chain, n_blocks, has_kappa_obs))
        .collect();
    FitArtifact {
        chains,
        block_labels,
        x_mean: standardizer.mean,
        x_std: standardizer.std,
        max_treedepth,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_block_trials() -> TrialData {
        TrialData::new(
            vec![0.0, 1.0, 2.0, 0.0, 1.0, 2.0],
            vec![0, 0, 1, 0, 1, 1],
            vec![0, 0, 0, 1, 1, 1],
        )
    }

    fn quick_options(chains: usize, seed: u64) -> FitOptions {
        FitOptions {
            draws: 40,
            tune: 40,
            chains,
            random_seed: Some(seed),
            ..FitOptions::default()
        }
    }

    #[test]
    fn fit_trials_produces_finite_draws_per_block() {
        let artifact =
            fit_trials(&two_block_trials(), quick_options(1, 42)).expect("fit should succeed");

        assert_eq!(artifact.n_chains(), 1);
        assert_eq!(artifact.n_draws(), 40);
        assert_eq!(artifact.block_labels, vec![0, 1]);
        for draw in artifact.pooled_draws() {
            assert_eq!(draw.threshold.len(), 2);
            assert!(draw.threshold.iter().all(|t| t.is_finite()));
            assert!(draw.slope.iter().all(|s| s.is_finite() && *s > 0.0));
            assert!(draw.gamma.iter().all(|g| (0.0..1.0).contains(g)));
            assert!(draw.kappa_obs.is_none());
        }
    }

    #[test]
    fn fit_is_reproducible_for_a_fixed_seed() {
        let first = fit_trials(&two_block_trials(), quick_options(1, 7)).expect("first fit");
        let second = fit_trials(&two_block_trials(), quick_options(1, 7)).expect("second fit");

        let a = &first.chains[0].draws;
        let b = &second.chains[0].draws;
        assert_eq!(a.len(), b.len());
        for (left, right) in a.iter().zip(b) {
            assert_eq!(left.mu_intercept.to_bits(), right.mu_intercept.to_bits());
            assert_eq!(left.threshold[0].to_bits(), right.threshold[0].to_bits());
        }
    }

    #[test]
    fn chains_start_from_strided_seeds() {
        let artifact =
            fit_trials(&two_block_trials(), quick_options(2, 11)).expect("fit should succeed");

        assert_eq!(artifact.n_chains(), 2);
        let first = &artifact.chains[0].draws[0];
        let second = &artifact.chains[1].draws[0];
        assert_ne!(first.mu_intercept.to_bits(), second.mu_intercept.to_bits());
    }

    #[test]
    fn fit_points_carries_observation_concentration() {
        let points = two_block_trials().to_points();
        let artifact = fit_points(&points, quick_options(1, 3)).expect("fit should succeed");

        assert_eq!(artifact.n_blocks(), 2);
        for draw in artifact.pooled_draws() {
            let kappa = draw.kappa_obs.unwrap_or(f64::NAN);
            assert!(kappa.is_finite() && kappa > 0.0);
        }
    }

    #[test]
    fn fit_trials_table_requires_block_column() {
        let table = DataTable::new()
            .with_column("Intensity", vec![0.0, 1.0])
            .with_column("Result", vec![0.0, 1.0]);

        let err = fit_trials_table(&table, quick_options(1, 1)).expect_err("should fail");
        assert!(err.to_string().contains("Block"));
    }

    #[test]
    fn rejects_invalid_options_before_sampling() {
        let options = FitOptions {
            draws: 0,
            ..FitOptions::default()
        };
        assert!(matches!(
            fit_trials(&two_block_trials(), options),
            Err(PsychometricError::InvalidDraws)
        ));
    }
}
