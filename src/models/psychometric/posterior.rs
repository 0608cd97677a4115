//! Posterior storage, extraction, and summaries.
//!
//! Draws are stored in the standardized intensity space the sampler works
//! in; summaries that describe block-level curves are mapped back to the
//! original intensity units through the artifact's standardization record.

use num_traits::ToPrimitive;

use super::curve::{PsychometricParams, threshold_from_curve};
use super::model::{
    IDX_KAPPA_OBS, N_SHARED_HYPERS, PointsModel, SharedHypers, unpack_blocks,
};
use super::types::PsychometricError;
use crate::inference::NutsChain;

/// One posterior draw over the full hierarchy, in standardized units.
///
/// Per-block vectors are ordered by ascending block label; `threshold` is
/// the standardized intensity where the response curve crosses one half.
#[derive(Debug, Clone)]
pub struct PsychometricDraw {
    pub mu_intercept: f64,
    pub sigma_intercept: f64,
    pub mu_slope: f64,
    pub sigma_slope: f64,
    pub mu_gamma: f64,
    pub kappa_gamma: f64,
    pub mu_lambda: f64,
    pub kappa_lambda: f64,
    /// Observation concentration; present only for aggregated fits.
    pub kappa_obs: Option<f64>,
    pub intercept: Vec<f64>,
    pub slope: Vec<f64>,
    pub gamma: Vec<f64>,
    pub lambda: Vec<f64>,
    pub threshold: Vec<f64>,
}

/// Kept draws and sampler statistics from one chain.
#[derive(Debug, Clone)]
pub struct ChainDraws {
    pub draws: Vec<PsychometricDraw>,
    pub divergences: Vec<bool>,
    pub tree_depths: Vec<usize>,
    pub accept_probs: Vec<f64>,
    pub step_size: f64,
}

impl ChainDraws {
    /// Convert a raw sampler chain into typed draws.
    #[must_use]
    pub(crate) fn from_nuts(chain: NutsChain, n_blocks: usize, has_kappa_obs: bool) -> Self {
        let draws = chain
            .draws
            .iter()
            .map(|theta| draw_from_theta(theta, n_blocks, has_kappa_obs))
            .collect();
        Self {
            draws,
            divergences: chain.divergences,
            tree_depths: chain.tree_depths,
            accept_probs: chain.accept_probs,
            step_size: chain.step_size,
        }
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.draws.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.draws.is_empty()
    }
}

/// Everything a finished fit hands back for post-processing.
#[derive(Debug, Clone)]
pub struct FitArtifact {
    pub chains: Vec<ChainDraws>,
    /// Raw block labels in ascending order; position is the dense index.
    pub block_labels: Vec<i64>,
    /// Mean of the raw intensities used for standardization.
    pub x_mean: f64,
    /// Standard deviation of the raw intensities used for standardization.
    pub x_std: f64,
    /// Tree-depth cap the chains ran with.
    pub max_treedepth: usize,
}

impl FitArtifact {
    #[must_use]
    pub fn n_blocks(&self) -> usize {
        self.block_labels.len()
    }

    #[must_use]
    pub fn n_chains(&self) -> usize {
        self.chains.len()
    }

    /// Total kept draws across chains.
    #[must_use]
    pub fn n_draws(&self) -> usize {
        self.chains.iter().map(ChainDraws::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.n_draws() == 0
    }

    /// Iterate draws from all chains in chain order.
    pub fn pooled_draws(&self) -> impl Iterator<Item = &PsychometricDraw> {
        self.chains.iter().flat_map(|chain| chain.draws.iter())
    }

    fn pooled_scalar(&self, extract: impl Fn(&PsychometricDraw) -> f64) -> Vec<f64> {
        self.pooled_draws().map(extract).collect()
    }

    /// Standardized intensity mapped back to original units.
    #[must_use]
    pub fn unstandardize_x(&self, z: f64) -> f64 {
        z.mul_add(self.x_std, self.x_mean)
    }

    /// Standardized regression pair mapped back to original units.
    #[must_use]
    pub fn unstandardize_coefficients(&self, intercept_std: f64, slope_std: f64) -> (f64, f64) {
        let slope = slope_std / self.x_std;
        let intercept = intercept_std - slope_std * self.x_mean / self.x_std;
        (intercept, slope)
    }
}

pub(crate) fn draw_from_theta(
    theta: &[f64],
    n_blocks: usize,
    has_kappa_obs: bool,
) -> PsychometricDraw {
    let hypers = SharedHypers::unpack(theta);
    let first_block = if has_kappa_obs {
        PointsModel::N_HYPERS
    } else {
        N_SHARED_HYPERS
    };
    let blocks = unpack_blocks(theta, &hypers, first_block, n_blocks);

    let mut intercept = Vec::with_capacity(n_blocks);
    let mut slope = Vec::with_capacity(n_blocks);
    let mut gamma = Vec::with_capacity(n_blocks);
    let mut lambda = Vec::with_capacity(n_blocks);
    let mut threshold = Vec::with_capacity(n_blocks);
    for block in &blocks {
        intercept.push(block.intercept);
        slope.push(block.slope);
        gamma.push(block.guess);
        lambda.push(block.lapse);
        threshold.push(threshold_from_curve(
            block.intercept,
            block.slope,
            block.guess,
            block.lapse,
        ));
    }

    PsychometricDraw {
        mu_intercept: hypers.mu_intercept,
        sigma_intercept: hypers.sigma_intercept,
        mu_slope: hypers.mu_slope,
        sigma_slope: hypers.sigma_slope,
        mu_gamma: hypers.mu_guess,
        kappa_gamma: hypers.kappa_guess,
        mu_lambda: hypers.mu_lapse,
        kappa_lambda: hypers.kappa_lapse,
        kappa_obs: has_kappa_obs.then(|| theta[IDX_KAPPA_OBS]),
        intercept,
        slope,
        gamma,
        lambda,
        threshold,
    }
}

/// Posterior-mean point estimates for the full hierarchy.
///
/// Hyperparameter means are in standardized intensity units; the per-block
/// vectors are in original units.
#[derive(Debug, Clone, Default)]
pub struct FitSummary {
    pub mu_intercept: f64,
    pub sigma_intercept: f64,
    pub mu_slope: f64,
    pub sigma_slope: f64,
    pub mu_gamma: f64,
    pub kappa_gamma: f64,
    pub mu_lambda: f64,
    pub kappa_lambda: f64,
    /// Observation concentration mean; present only for aggregated fits.
    pub kappa_obs: Option<f64>,
    /// Raw block labels in ascending order; position indexes the vectors.
    pub block_labels: Vec<i64>,
    /// Posterior mean intensity where the response curve crosses one half.
    pub threshold: Vec<f64>,
    /// Posterior mean intercept of the linear predictor.
    pub intercept: Vec<f64>,
    /// Posterior mean slope per unit of raw intensity.
    pub slope: Vec<f64>,
    pub guess_rate: Vec<f64>,
    pub lapse_rate: Vec<f64>,
    /// Pooled draw count behind the means.
    pub n_draws: usize,
}

impl FitSummary {
    #[must_use]
    pub fn n_blocks(&self) -> usize {
        self.block_labels.len()
    }

    /// Posterior-mean curve parameters for one block, ready for
    /// [`psychometric`](super::curve::psychometric).
    ///
    /// The curve midpoint is `-intercept / slope`, which differs from
    /// `threshold` whenever the asymptote rates are nonzero.
    ///
    /// # Errors
    ///
    /// Returns `PsychometricError::BlockIndexOutOfRange` for an unknown
    /// block index.
    pub fn curve_params(&self, block: usize) -> Result<PsychometricParams, PsychometricError> {
        if block >= self.n_blocks() {
            return Err(PsychometricError::BlockIndexOutOfRange {
                index: block,
                n_blocks: self.n_blocks(),
            });
        }
        PsychometricParams::new(
            -self.intercept[block] / self.slope[block],
            self.slope[block],
            self.guess_rate[block],
            self.lapse_rate[block],
        )
    }
}

/// Pooled posterior means for every hyperparameter and block.
#[must_use]
pub fn summarize_fit(artifact: &FitArtifact) -> FitSummary {
    let n_draws = artifact.n_draws();
    if n_draws == 0 {
        return FitSummary::default();
    }

    let has_kappa_obs = artifact
        .pooled_draws()
        .next()
        .is_some_and(|draw| draw.kappa_obs.is_some());

    let n_blocks = artifact.n_blocks();
    let mut threshold = Vec::with_capacity(n_blocks);
    let mut intercept = Vec::with_capacity(n_blocks);
    let mut slope = Vec::with_capacity(n_blocks);
    let mut guess_rate = Vec::with_capacity(n_blocks);
    let mut lapse_rate = Vec::with_capacity(n_blocks);

    for b in 0..n_blocks {
        let threshold_orig: Vec<f64> = artifact
            .pooled_draws()
            .map(|draw| artifact.unstandardize_x(draw.threshold[b]))
            .collect();
        let coefficients: Vec<(f64, f64)> = artifact
            .pooled_draws()
            .map(|draw| artifact.unstandardize_coefficients(draw.intercept[b], draw.slope[b]))
            .collect();

        threshold.push(mean(&threshold_orig));
        intercept.push(mean(&coefficients.iter().map(|c| c.0).collect::<Vec<f64>>()));
        slope.push(mean(&coefficients.iter().map(|c| c.1).collect::<Vec<f64>>()));
        guess_rate.push(mean(&artifact.pooled_scalar(|draw| draw.gamma[b])));
        lapse_rate.push(mean(&artifact.pooled_scalar(|draw| draw.lambda[b])));
    }

    FitSummary {
        mu_intercept: mean(&artifact.pooled_scalar(|draw| draw.mu_intercept)),
        sigma_intercept: mean(&artifact.pooled_scalar(|draw| draw.sigma_intercept)),
        mu_slope: mean(&artifact.pooled_scalar(|draw| draw.mu_slope)),
        sigma_slope: mean(&artifact.pooled_scalar(|draw| draw.sigma_slope)),
        mu_gamma: mean(&artifact.pooled_scalar(|draw| draw.mu_gamma)),
        kappa_gamma: mean(&artifact.pooled_scalar(|draw| draw.kappa_gamma)),
        mu_lambda: mean(&artifact.pooled_scalar(|draw| draw.mu_lambda)),
        kappa_lambda: mean(&artifact.pooled_scalar(|draw| draw.kappa_lambda)),
        kappa_obs: has_kappa_obs.then(|| {
            mean(&artifact.pooled_scalar(|draw| draw.kappa_obs.unwrap_or(f64::NAN)))
        }),
        block_labels: artifact.block_labels.clone(),
        threshold,
        intercept,
        slope,
        guess_rate,
        lapse_rate,
        n_draws,
    }
}

/// Scalar posterior summary statistics.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParameterSummary {
    pub mean: f64,
    pub std_dev: f64,
    pub q025: f64,
    pub q50: f64,
    pub q975: f64,
}

/// Posterior summaries for the full hierarchy.
///
/// Hyperparameters describe the standardized-intensity hierarchy and are
/// reported in that space; per-block `threshold`, `intercept`, and `slope`
/// are in original intensity units.
#[derive(Debug, Clone, Default)]
pub struct PosteriorSummary {
    pub mu_intercept: ParameterSummary,
    pub sigma_intercept: ParameterSummary,
    pub mu_slope: ParameterSummary,
    pub sigma_slope: ParameterSummary,
    pub mu_gamma: ParameterSummary,
    pub kappa_gamma: ParameterSummary,
    pub mu_lambda: ParameterSummary,
    pub kappa_lambda: ParameterSummary,
    pub kappa_obs: Option<ParameterSummary>,
    pub block_labels: Vec<i64>,
    pub threshold: Vec<ParameterSummary>,
    pub intercept: Vec<ParameterSummary>,
    pub slope: Vec<ParameterSummary>,
    pub gamma: Vec<ParameterSummary>,
    pub lambda: Vec<ParameterSummary>,
    pub draw_count: usize,
}

/// Compute posterior summaries for all stored parameters.
#[must_use]
pub fn summarize_posterior(artifact: &FitArtifact) -> PosteriorSummary {
    let draw_count = artifact.n_draws();
    if draw_count == 0 {
        return PosteriorSummary::default();
    }

    let has_kappa_obs = artifact
        .pooled_draws()
        .next()
        .is_some_and(|draw| draw.kappa_obs.is_some());
    let kappa_obs = has_kappa_obs.then(|| {
        summarize_scalar(&artifact.pooled_scalar(|draw| draw.kappa_obs.unwrap_or(f64::NAN)))
    });

    let n_blocks = artifact.n_blocks();
    let mut threshold = Vec::with_capacity(n_blocks);
    let mut intercept = Vec::with_capacity(n_blocks);
    let mut slope = Vec::with_capacity(n_blocks);
    let mut gamma = Vec::with_capacity(n_blocks);
    let mut lambda = Vec::with_capacity(n_blocks);
    for b in 0..n_blocks {
        let threshold_orig: Vec<f64> = artifact
            .pooled_draws()
            .map(|draw| artifact.unstandardize_x(draw.threshold[b]))
            .collect();
        let coefficients: Vec<(f64, f64)> = artifact
            .pooled_draws()
            .map(|draw| artifact.unstandardize_coefficients(draw.intercept[b], draw.slope[b]))
            .collect();
        threshold.push(summarize_scalar(&threshold_orig));
        intercept.push(summarize_scalar(
            &coefficients.iter().map(|c| c.0).collect::<Vec<f64>>(),
        ));
        slope.push(summarize_scalar(
            &coefficients.iter().map(|c| c.1).collect::<Vec<f64>>(),
        ));
        gamma.push(summarize_scalar(&artifact.pooled_scalar(|draw| draw.gamma[b])));
        lambda.push(summarize_scalar(&artifact.pooled_scalar(|draw| draw.lambda[b])));
    }

    PosteriorSummary {
        mu_intercept: summarize_scalar(&artifact.pooled_scalar(|draw| draw.mu_intercept)),
        sigma_intercept: summarize_scalar(&artifact.pooled_scalar(|draw| draw.sigma_intercept)),
        mu_slope: summarize_scalar(&artifact.pooled_scalar(|draw| draw.mu_slope)),
        sigma_slope: summarize_scalar(&artifact.pooled_scalar(|draw| draw.sigma_slope)),
        mu_gamma: summarize_scalar(&artifact.pooled_scalar(|draw| draw.mu_gamma)),
        kappa_gamma: summarize_scalar(&artifact.pooled_scalar(|draw| draw.kappa_gamma)),
        mu_lambda: summarize_scalar(&artifact.pooled_scalar(|draw| draw.mu_lambda)),
        kappa_lambda: summarize_scalar(&artifact.pooled_scalar(|draw| draw.kappa_lambda)),
        kappa_obs,
        block_labels: artifact.block_labels.clone(),
        threshold,
        intercept,
        slope,
        gamma,
        lambda,
        draw_count,
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / usize_to_f64(values.len())
}

#[must_use]
pub(crate) fn summarize_scalar(values: &[f64]) -> ParameterSummary {
    if values.is_empty() {
        return ParameterSummary::default();
    }

    let n = usize_to_f64(values.len());
    let mean = values.iter().sum::<f64>() / n;
    let variance = values
        .iter()
        .map(|value| {
            let centered = value - mean;
            centered * centered
        })
        .sum::<f64>()
        / n.max(1.0);

    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    ParameterSummary {
        mean,
        std_dev: variance.sqrt(),
        q025: percentile(&sorted, 0.025),
        q50: percentile(&sorted, 0.5),
        q975: percentile(&sorted, 0.975),
    }
}

#[must_use]
pub(crate) fn percentile(sorted_values: &[f64], probability: f64) -> f64 {
    if sorted_values.is_empty() {
        return f64::NAN;
    }

    let clamped = probability.clamp(0.0, 1.0);
    let last = sorted_values.len() - 1;
    let position = clamped * usize_to_f64(last);
    let lower = position.floor().to_usize().unwrap_or(0);
    let upper = position.ceil().to_usize().unwrap_or(last);

    if lower == upper {
        sorted_values[lower]
    } else {
        let weight = position - usize_to_f64(lower);
        (1.0 - weight).mul_add(sorted_values[lower], weight * sorted_values[upper])
    }
}

fn usize_to_f64(value: usize) -> f64 {
    f64::from(u32::try_from(value).unwrap_or(u32::MAX))
}
