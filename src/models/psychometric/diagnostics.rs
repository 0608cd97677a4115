//! Chain convergence and mixing diagnostics.

use super::model::SHARED_HYPER_NAMES;
use super::posterior::{ChainDraws, FitArtifact, PsychometricDraw};
use super::types::PsychometricError;

/// Lag-`k` autocorrelation for a scalar chain.
#[must_use]
pub fn autocorrelation(series: &[f64], lag: usize) -> f64 {
    if series.is_empty() || lag >= series.len() {
        return 0.0;
    }

    let mean = series.iter().sum::<f64>() / usize_to_f64(series.len());
    let centered: Vec<f64> = series.iter().map(|value| value - mean).collect();
    let denominator: f64 = centered.iter().map(|c| c * c).sum();
    if denominator <= 0.0 {
        return 0.0;
    }

    let numerator: f64 = centered
        .iter()
        .zip(centered.iter().skip(lag))
        .map(|(a, b)| a * b)
        .sum();
    numerator / denominator
}

/// Heuristic effective sample size using positive autocorrelation truncation.
#[must_use]
pub fn effective_sample_size(series: &[f64]) -> f64 {
    let n = series.len();
    if n < 2 {
        return usize_to_f64(n);
    }

    let mut rho_sum = 0.0;
    for lag in 1..n {
        let rho = autocorrelation(series, lag);
        if rho <= 0.0 {
            break;
        }
        rho_sum += rho;
    }

    (usize_to_f64(n) / 2.0f64.mul_add(rho_sum, 1.0)).clamp(1.0, usize_to_f64(n))
}

/// Convergence and mixing figures for one monitored scalar.
#[derive(Debug, Clone)]
pub struct ParameterConvergence {
    pub name: String,
    pub split_rhat: f64,
    /// Effective sample size summed over chains.
    pub ess: f64,
}

/// Multi-chain convergence report.
///
/// Rank statistics are computed on each chain truncated to the common even
/// draw count; the sampler-health counters cover every kept draw.
#[derive(Debug, Clone)]
pub struct ConvergenceSummary {
    pub chain_count: usize,
    pub draws_per_chain_used: usize,
    /// Shared hyperparameters plus each block's threshold.
    pub parameters: Vec<ParameterConvergence>,
    pub max_split_rhat: Option<f64>,
    pub min_ess: Option<f64>,
    pub total_divergences: usize,
    pub divergences_per_chain: Vec<usize>,
    pub mean_accept_prob: f64,
    /// Transitions that ran into the doubling-depth cap.
    pub max_treedepth_hits: usize,
}

const HYPER_EXTRACTORS: [fn(&PsychometricDraw) -> f64; SHARED_HYPER_NAMES.len()] = [
    |draw| draw.mu_intercept,
    |draw| draw.sigma_intercept,
    |draw| draw.mu_slope,
    |draw| draw.sigma_slope,
    |draw| draw.mu_gamma,
    |draw| draw.kappa_gamma,
    |draw| draw.mu_lambda,
    |draw| draw.kappa_lambda,
];

/// Summarize split-R-hat and effective sample sizes across chains.
///
/// Monitors every shared hyperparameter and each block's threshold.
///
/// # Errors
///
/// Returns `PsychometricError` with fewer than two chains or fewer than
/// four common draws per chain after even truncation.
pub fn summarize_convergence(
    artifact: &FitArtifact,
) -> Result<ConvergenceSummary, PsychometricError> {
    let chain_count = artifact.n_chains();
    if chain_count < 2 {
        return Err(PsychometricError::InvalidChainCount {
            min: 2,
            found: chain_count,
        });
    }

    let min_draws = artifact.chains.iter().map(ChainDraws::len).min().unwrap_or(0);
    let draws_per_chain_used = min_draws - (min_draws % 2);
    if draws_per_chain_used < 4 {
        return Err(PsychometricError::InsufficientChainDraws {
            minimum: 4,
            found: draws_per_chain_used,
        });
    }

    let mut parameters = Vec::new();
    for (name, series) in monitored_series(artifact, draws_per_chain_used) {
        let split_rhat = split_rhat_scalar(&split_halves(&series));
        let ess = series
            .iter()
            .map(|chain| effective_sample_size(chain))
            .sum();
        parameters.push(ParameterConvergence {
            name,
            split_rhat,
            ess,
        });
    }

    let max_split_rhat = parameters
        .iter()
        .map(|p| p.split_rhat)
        .max_by(f64::total_cmp);
    let min_ess = parameters.iter().map(|p| p.ess).min_by(f64::total_cmp);

    let divergences_per_chain: Vec<usize> = artifact
        .chains
        .iter()
        .map(|chain| chain.divergences.iter().filter(|&&flag| flag).count())
        .collect();
    let total_divergences = divergences_per_chain.iter().sum();

    let accept_probs: Vec<f64> = artifact
        .chains
        .iter()
        .flat_map(|chain| chain.accept_probs.iter().copied())
        .collect();
    let mean_accept_prob = accept_probs.iter().sum::<f64>() / usize_to_f64(accept_probs.len());

    let max_treedepth_hits = artifact
        .chains
        .iter()
        .flat_map(|chain| chain.tree_depths.iter())
        .filter(|&&depth| depth >= artifact.max_treedepth)
        .count();

    Ok(ConvergenceSummary {
        chain_count,
        draws_per_chain_used,
        parameters,
        max_split_rhat,
        min_ess,
        total_divergences,
        divergences_per_chain,
        mean_accept_prob,
        max_treedepth_hits,
    })
}

/// Per-chain series of every monitored scalar, truncated to `used` draws.
fn monitored_series(artifact: &FitArtifact, used: usize) -> Vec<(String, Vec<Vec<f64>>)> {
    let series_for = |extract: &dyn Fn(&PsychometricDraw) -> f64| -> Vec<Vec<f64>> {
        artifact
            .chains
            .iter()
            .map(|chain| chain.draws.iter().take(used).map(extract).collect())
            .collect()
    };

    let mut monitors: Vec<(String, Vec<Vec<f64>>)> = SHARED_HYPER_NAMES
        .iter()
        .zip(HYPER_EXTRACTORS)
        .map(|(name, extract)| ((*name).to_string(), series_for(&extract)))
        .collect();

    let has_kappa_obs = artifact
        .pooled_draws()
        .next()
        .is_some_and(|draw| draw.kappa_obs.is_some());
    if has_kappa_obs {
        monitors.push((
            "kappa_obs".to_string(),
            series_for(&|draw: &PsychometricDraw| draw.kappa_obs.unwrap_or(f64::NAN)),
        ));
    }

    for (b, label) in artifact.block_labels.iter().enumerate() {
        monitors.push((
            format!("threshold[{label}]"),
            series_for(&|draw: &PsychometricDraw| draw.threshold[b]),
        ));
    }
    monitors
}

fn split_halves(chains: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let mut halves = Vec::with_capacity(chains.len() * 2);
    for chain in chains {
        let half = chain.len() / 2;
        halves.push(chain[..half].to_vec());
        halves.push(chain[half..half * 2].to_vec());
    }
    halves
}

/// Split-R-hat over pre-split half chains, floored at one.
///
/// Degenerate inputs (zero within-chain variance, non-finite moments) report
/// exactly one rather than failing.
fn split_rhat_scalar(chains: &[Vec<f64>]) -> f64 {
    let m = chains.len();
    let n = chains.first().map_or(0, Vec::len);
    if m < 2 || n < 2 {
        return 1.0;
    }

    let chain_means: Vec<f64> = chains
        .iter()
        .map(|chain| chain.iter().sum::<f64>() / usize_to_f64(n))
        .collect();
    let within = chains
        .iter()
        .zip(&chain_means)
        .map(|(chain, mean)| sample_variance(chain, *mean))
        .sum::<f64>()
        / usize_to_f64(m);

    let mean_of_means = chain_means.iter().sum::<f64>() / usize_to_f64(m);
    let between = usize_to_f64(n)
        * chain_means
            .iter()
            .map(|mean| {
                let centered = *mean - mean_of_means;
                centered * centered
            })
            .sum::<f64>()
        / usize_to_f64(m - 1);

    if !(within.is_finite() && within > 0.0 && between.is_finite()) {
        return 1.0;
    }

    let n_f64 = usize_to_f64(n);
    let var_plus = ((n_f64 - 1.0) / n_f64).mul_add(within, between / n_f64);
    if !var_plus.is_finite() || var_plus <= 0.0 {
        return 1.0;
    }

    (var_plus / within).sqrt().max(1.0)
}

fn sample_variance(values: &[f64], mean: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    values
        .iter()
        .map(|value| {
            let centered = *value - mean;
            centered * centered
        })
        .sum::<f64>()
        / usize_to_f64(values.len() - 1)
}

fn usize_to_f64(value: usize) -> f64 {
    f64::from(u32::try_from(value).unwrap_or(u32::MAX))
}
