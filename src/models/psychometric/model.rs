//! Hierarchical target densities for the trial and point samplers.
//!
//! Constrained parameter vector layout, shared hyperparameters first:
//!
//! | index | parameter         | support  |
//! |-------|-------------------|----------|
//! | 0     | `mu_intercept`    | (-inf, inf) |
//! | 1     | `sigma_intercept` | (0, inf) |
//! | 2     | `mu_slope`        | (0, inf) |
//! | 3     | `sigma_slope`     | (0, inf) |
//! | 4     | `mu_gamma`        | (0, 1)   |
//! | 5     | `kappa_gamma`     | (0, inf) |
//! | 6     | `mu_lambda`       | (0, 1)   |
//! | 7     | `kappa_lambda`    | (0, inf) |
//!
//! The aggregated variant appends `kappa_obs` on (0, inf) at index 8. After
//! the hyperparameters come four entries per block, raw intercept and raw
//! slope and the two asymptote rates, in ascending block-label order.
//!
//! Intercepts are non-centered, `intercept = mu + sigma * raw`; slopes are
//! scaled half-normal draws, `slope = sqrt(mu^2 + sigma^2) * raw`, so every
//! block slope stays strictly positive.

use super::init;
use super::input::{PreparedPoints, PreparedTrials};
use super::likelihood::{
    bernoulli_nll, bernoulli_nll_grad_probability, beta_binomial_nll,
    beta_binomial_nll_grad_concentration, beta_binomial_nll_grad_probability, logistic_stable,
};
use super::priors::{
    CONCENTRATION_PRIOR_RATE, CONCENTRATION_PRIOR_SHAPE, LOCATION_PRIOR_SCALE, RATE_PRIOR_ALPHA,
    RATE_PRIOR_BETA, beta_mean_concentration_nll, beta_mean_concentration_nll_grad_concentration,
    beta_mean_concentration_nll_grad_mean, beta_nll, beta_nll_grad, gamma_nll, gamma_nll_grad,
    half_normal_nll, half_normal_nll_grad, normal_nll, normal_nll_grad,
};
use crate::inference::LogDensity;

pub(crate) const IDX_MU_INTERCEPT: usize = 0;
pub(crate) const IDX_SIGMA_INTERCEPT: usize = 1;
pub(crate) const IDX_MU_SLOPE: usize = 2;
pub(crate) const IDX_SIGMA_SLOPE: usize = 3;
pub(crate) const IDX_MU_GUESS: usize = 4;
pub(crate) const IDX_KAPPA_GUESS: usize = 5;
pub(crate) const IDX_MU_LAPSE: usize = 6;
pub(crate) const IDX_KAPPA_LAPSE: usize = 7;
pub(crate) const IDX_KAPPA_OBS: usize = 8;

pub(crate) const N_SHARED_HYPERS: usize = 8;
pub(crate) const BLOCK_STRIDE: usize = 4;

pub(crate) const OFFSET_INTERCEPT_RAW: usize = 0;
pub(crate) const OFFSET_SLOPE_RAW: usize = 1;
pub(crate) const OFFSET_GUESS: usize = 2;
pub(crate) const OFFSET_LAPSE: usize = 3;

/// Reported names of the shared hyperparameters, in index order.
pub(crate) const SHARED_HYPER_NAMES: [&str; N_SHARED_HYPERS] = [
    "mu_intercept",
    "sigma_intercept",
    "mu_slope",
    "sigma_slope",
    "mu_gamma",
    "kappa_gamma",
    "mu_lambda",
    "kappa_lambda",
];

pub(crate) const fn block_base(first_block: usize, block: usize) -> usize {
    first_block + BLOCK_STRIDE * block
}

/// Shared hyperparameters unpacked from the front of the vector.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SharedHypers {
    pub mu_intercept: f64,
    pub sigma_intercept: f64,
    pub mu_slope: f64,
    pub sigma_slope: f64,
    pub mu_guess: f64,
    pub kappa_guess: f64,
    pub mu_lapse: f64,
    pub kappa_lapse: f64,
}

impl SharedHypers {
    pub fn unpack(theta: &[f64]) -> Self {
        Self {
            mu_intercept: theta[IDX_MU_INTERCEPT],
            sigma_intercept: theta[IDX_SIGMA_INTERCEPT],
            mu_slope: theta[IDX_MU_SLOPE],
            sigma_slope: theta[IDX_SIGMA_SLOPE],
            mu_guess: theta[IDX_MU_GUESS],
            kappa_guess: theta[IDX_KAPPA_GUESS],
            mu_lapse: theta[IDX_MU_LAPSE],
            kappa_lapse: theta[IDX_KAPPA_LAPSE],
        }
    }

    /// Scale of the half-normal block-slope distribution.
    pub fn slope_scale(&self) -> f64 {
        self.mu_slope.hypot(self.sigma_slope)
    }

    fn prior_nll(&self) -> f64 {
        normal_nll(self.mu_intercept, 0.0, LOCATION_PRIOR_SCALE)
            + half_normal_nll(self.sigma_intercept, LOCATION_PRIOR_SCALE)
            + half_normal_nll(self.mu_slope, LOCATION_PRIOR_SCALE)
            + half_normal_nll(self.sigma_slope, LOCATION_PRIOR_SCALE)
            + beta_nll(self.mu_guess, RATE_PRIOR_ALPHA, RATE_PRIOR_BETA)
            + gamma_nll(self.kappa_guess, CONCENTRATION_PRIOR_SHAPE, CONCENTRATION_PRIOR_RATE)
            + beta_nll(self.mu_lapse, RATE_PRIOR_ALPHA, RATE_PRIOR_BETA)
            + gamma_nll(self.kappa_lapse, CONCENTRATION_PRIOR_SHAPE, CONCENTRATION_PRIOR_RATE)
    }

    fn add_prior_grad(&self, grad: &mut [f64]) {
        grad[IDX_MU_INTERCEPT] += normal_nll_grad(self.mu_intercept, 0.0, LOCATION_PRIOR_SCALE);
        grad[IDX_SIGMA_INTERCEPT] += half_normal_nll_grad(self.sigma_intercept, LOCATION_PRIOR_SCALE);
        grad[IDX_MU_SLOPE] += half_normal_nll_grad(self.mu_slope, LOCATION_PRIOR_SCALE);
        grad[IDX_SIGMA_SLOPE] += half_normal_nll_grad(self.sigma_slope, LOCATION_PRIOR_SCALE);
        grad[IDX_MU_GUESS] += beta_nll_grad(self.mu_guess, RATE_PRIOR_ALPHA, RATE_PRIOR_BETA);
        grad[IDX_KAPPA_GUESS] +=
            gamma_nll_grad(self.kappa_guess, CONCENTRATION_PRIOR_SHAPE, CONCENTRATION_PRIOR_RATE);
        grad[IDX_MU_LAPSE] += beta_nll_grad(self.mu_lapse, RATE_PRIOR_ALPHA, RATE_PRIOR_BETA);
        grad[IDX_KAPPA_LAPSE] +=
            gamma_nll_grad(self.kappa_lapse, CONCENTRATION_PRIOR_SHAPE, CONCENTRATION_PRIOR_RATE);
    }
}

/// One block's sampled values plus the implied curve coefficients.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BlockState {
    pub intercept_raw: f64,
    pub slope_raw: f64,
    pub guess: f64,
    pub lapse: f64,
    pub intercept: f64,
    pub slope: f64,
}

impl BlockState {
    fn prior_nll(&self, hypers: &SharedHypers) -> f64 {
        normal_nll(self.intercept_raw, 0.0, 1.0)
            + half_normal_nll(self.slope_raw, 1.0)
            + beta_mean_concentration_nll(self.guess, hypers.mu_guess, hypers.kappa_guess)
            + beta_mean_concentration_nll(self.lapse, hypers.mu_lapse, hypers.kappa_lapse)
    }
}

pub(crate) fn unpack_blocks(
    theta: &[f64],
    hypers: &SharedHypers,
    first_block: usize,
    n_blocks: usize,
) -> Vec<BlockState> {
    let scale = hypers.slope_scale();
    (0..n_blocks)
        .map(|b| {
            let base = block_base(first_block, b);
            let intercept_raw = theta[base + OFFSET_INTERCEPT_RAW];
            let slope_raw = theta[base + OFFSET_SLOPE_RAW];
            BlockState {
                intercept_raw,
                slope_raw,
                guess: theta[base + OFFSET_GUESS],
                lapse: theta[base + OFFSET_LAPSE],
                intercept: hypers.sigma_intercept.mul_add(intercept_raw, hypers.mu_intercept),
                slope: scale * slope_raw,
            }
        })
        .collect()
}

/// Response probability and the logistic value it passed through.
fn response_probability(block: &BlockState, x: f64) -> (f64, f64) {
    let s = logistic_stable(block.slope.mul_add(x, block.intercept));
    let p = (1.0 - block.guess - block.lapse).mul_add(s, block.guess);
    (s, p)
}

fn hierarchy_nll(hypers: &SharedHypers, blocks: &[BlockState]) -> f64 {
    let mut total = hypers.prior_nll();
    for block in blocks {
        total += block.prior_nll(hypers);
    }
    total
}

fn add_block_prior_grad(
    blocks: &[BlockState],
    hypers: &SharedHypers,
    first_block: usize,
    grad: &mut [f64],
) {
    for (b, block) in blocks.iter().enumerate() {
        let base = block_base(first_block, b);
        grad[base + OFFSET_INTERCEPT_RAW] += normal_nll_grad(block.intercept_raw, 0.0, 1.0);
        grad[base + OFFSET_SLOPE_RAW] += half_normal_nll_grad(block.slope_raw, 1.0);

        grad[base + OFFSET_GUESS] += beta_nll_grad(
            block.guess,
            hypers.mu_guess * hypers.kappa_guess,
            (1.0 - hypers.mu_guess) * hypers.kappa_guess,
        );
        grad[IDX_MU_GUESS] +=
            beta_mean_concentration_nll_grad_mean(block.guess, hypers.mu_guess, hypers.kappa_guess);
        grad[IDX_KAPPA_GUESS] += beta_mean_concentration_nll_grad_concentration(
            block.guess,
            hypers.mu_guess,
            hypers.kappa_guess,
        );

        grad[base + OFFSET_LAPSE] += beta_nll_grad(
            block.lapse,
            hypers.mu_lapse * hypers.kappa_lapse,
            (1.0 - hypers.mu_lapse) * hypers.kappa_lapse,
        );
        grad[IDX_MU_LAPSE] +=
            beta_mean_concentration_nll_grad_mean(block.lapse, hypers.mu_lapse, hypers.kappa_lapse);
        grad[IDX_KAPPA_LAPSE] += beta_mean_concentration_nll_grad_concentration(
            block.lapse,
            hypers.mu_lapse,
            hypers.kappa_lapse,
        );
    }
}

/// Push accumulated linear-predictor sensitivities through the non-centered
/// intercept and scaled-slope reparameterizations.
fn add_linear_chain_grad(
    blocks: &[BlockState],
    hypers: &SharedHypers,
    first_block: usize,
    d_intercept: &[f64],
    d_slope: &[f64],
    grad: &mut [f64],
) {
    let scale = hypers.slope_scale();
    for (b, block) in blocks.iter().enumerate() {
        let base = block_base(first_block, b);
        grad[IDX_MU_INTERCEPT] += d_intercept[b];
        grad[IDX_SIGMA_INTERCEPT] += d_intercept[b] * block.intercept_raw;
        grad[base + OFFSET_INTERCEPT_RAW] += d_intercept[b] * hypers.sigma_intercept;

        grad[base + OFFSET_SLOPE_RAW] += d_slope[b] * scale;
        grad[IDX_MU_SLOPE] += d_slope[b] * block.slope_raw * hypers.mu_slope / scale;
        grad[IDX_SIGMA_SLOPE] += d_slope[b] * block.slope_raw * hypers.sigma_slope / scale;
    }
}

fn hyper_bounds() -> Vec<(f64, f64)> {
    vec![
        (f64::NEG_INFINITY, f64::INFINITY),
        (0.0, f64::INFINITY),
        (0.0, f64::INFINITY),
        (0.0, f64::INFINITY),
        (0.0, 1.0),
        (0.0, f64::INFINITY),
        (0.0, 1.0),
        (0.0, f64::INFINITY),
    ]
}

fn push_block_bounds(bounds: &mut Vec<(f64, f64)>, n_blocks: usize) {
    for _ in 0..n_blocks {
        bounds.push((f64::NEG_INFINITY, f64::INFINITY));
        bounds.push((0.0, f64::INFINITY));
        bounds.push((0.0, 1.0));
        bounds.push((0.0, 1.0));
    }
}

fn push_block_names(names: &mut Vec<String>, block_labels: &[i64]) {
    for &label in block_labels {
        names.push(format!("intercept_raw[{label}]"));
        names.push(format!("slope_raw[{label}]"));
        names.push(format!("gamma[{label}]"));
        names.push(format!("lambda[{label}]"));
    }
}

/// Joint posterior over trial-level Bernoulli observations.
#[derive(Debug, Clone)]
pub(crate) struct TrialsModel {
    data: PreparedTrials,
    initial: Vec<f64>,
}

impl TrialsModel {
    pub fn new(data: PreparedTrials) -> Self {
        let initial = init::trials_initial_position(&data);
        Self { data, initial }
    }

    pub fn data(&self) -> &PreparedTrials {
        &self.data
    }
}

impl LogDensity for TrialsModel {
    fn dim(&self) -> usize {
        N_SHARED_HYPERS + BLOCK_STRIDE * self.data.n_blocks()
    }

    fn parameter_names(&self) -> Vec<String> {
        let mut names: Vec<String> =
            SHARED_HYPER_NAMES.iter().map(|name| (*name).to_string()).collect();
        push_block_names(&mut names, &self.data.block_labels);
        names
    }

    fn bounds(&self) -> Vec<(f64, f64)> {
        let mut bounds = hyper_bounds();
        push_block_bounds(&mut bounds, self.data.n_blocks());
        bounds
    }

    fn initial_position(&self) -> Vec<f64> {
        self.initial.clone()
    }

    fn nll(&self, theta: &[f64]) -> f64 {
        let hypers = SharedHypers::unpack(theta);
        let blocks = unpack_blocks(theta, &hypers, N_SHARED_HYPERS, self.data.n_blocks());
        let mut total = hierarchy_nll(&hypers, &blocks);
        for i in 0..self.data.x.len() {
            let (_, p) = response_probability(&blocks[self.data.block[i]], self.data.x[i]);
            total += bernoulli_nll(p, self.data.response[i]);
        }
        total
    }

    fn grad_nll(&self, theta: &[f64]) -> Vec<f64> {
        let n_blocks = self.data.n_blocks();
        let hypers = SharedHypers::unpack(theta);
        let blocks = unpack_blocks(theta, &hypers, N_SHARED_HYPERS, n_blocks);

        let mut grad = vec![0.0; theta.len()];
        hypers.add_prior_grad(&mut grad);
        add_block_prior_grad(&blocks, &hypers, N_SHARED_HYPERS, &mut grad);

        let mut d_intercept = vec![0.0; n_blocks];
        let mut d_slope = vec![0.0; n_blocks];
        for i in 0..self.data.x.len() {
            let b = self.data.block[i];
            let block = &blocks[b];
            let (s, p) = response_probability(block, self.data.x[i]);
            let d_p = bernoulli_nll_grad_probability(p, self.data.response[i]);

            let d_eta = d_p * (1.0 - block.guess - block.lapse) * s * (1.0 - s);
            d_intercept[b] += d_eta;
            d_slope[b] += d_eta * self.data.x[i];

            let base = block_base(N_SHARED_HYPERS, b);
            grad[base + OFFSET_GUESS] += d_p * (1.0 - s);
            grad[base + OFFSET_LAPSE] -= d_p * s;
        }
        add_linear_chain_grad(&blocks, &hypers, N_SHARED_HYPERS, &d_intercept, &d_slope, &mut grad);
        grad
    }
}

/// Joint posterior over aggregated beta-binomial observations.
#[derive(Debug, Clone)]
pub(crate) struct PointsModel {
    data: PreparedPoints,
    initial: Vec<f64>,
}

impl PointsModel {
    /// Hyperparameter count including the observation concentration.
    pub const N_HYPERS: usize = N_SHARED_HYPERS + 1;

    pub fn new(data: PreparedPoints) -> Self {
        let initial = init::points_initial_position(&data);
        Self { data, initial }
    }

    pub fn data(&self) -> &PreparedPoints {
        &self.data
    }
}

impl LogDensity for PointsModel {
    fn dim(&self) -> usize {
        Self::N_HYPERS + BLOCK_STRIDE * self.data.n_blocks()
    }

    fn parameter_names(&self) -> Vec<String> {
        let mut names: Vec<String> =
            SHARED_HYPER_NAMES.iter().map(|name| (*name).to_string()).collect();
        names.push("kappa_obs".to_string());
        push_block_names(&mut names, &self.data.block_labels);
        names
    }

    fn bounds(&self) -> Vec<(f64, f64)> {
        let mut bounds = hyper_bounds();
        bounds.push((0.0, f64::INFINITY));
        push_block_bounds(&mut bounds, self.data.n_blocks());
        bounds
    }

    fn initial_position(&self) -> Vec<f64> {
        self.initial.clone()
    }

    fn nll(&self, theta: &[f64]) -> f64 {
        let hypers = SharedHypers::unpack(theta);
        let kappa_obs = theta[IDX_KAPPA_OBS];
        let blocks = unpack_blocks(theta, &hypers, Self::N_HYPERS, self.data.n_blocks());

        let mut total = hierarchy_nll(&hypers, &blocks)
            + gamma_nll(kappa_obs, CONCENTRATION_PRIOR_SHAPE, CONCENTRATION_PRIOR_RATE);
        for i in 0..self.data.x.len() {
            let (_, p) = response_probability(&blocks[self.data.block[i]], self.data.x[i]);
            total += beta_binomial_nll(p, kappa_obs, self.data.hits[i], self.data.n_trials[i]);
        }
        total
    }

    fn grad_nll(&self, theta: &[f64]) -> Vec<f64> {
        let n_blocks = self.data.n_blocks();
        let hypers = SharedHypers::unpack(theta);
        let kappa_obs = theta[IDX_KAPPA_OBS];
        let blocks = unpack_blocks(theta, &hypers, Self::N_HYPERS, n_blocks);

        let mut grad = vec![0.0; theta.len()];
        hypers.add_prior_grad(&mut grad);
        grad[IDX_KAPPA_OBS] +=
            gamma_nll_grad(kappa_obs, CONCENTRATION_PRIOR_SHAPE, CONCENTRATION_PRIOR_RATE);
        add_block_prior_grad(&blocks, &hypers, Self::N_HYPERS, &mut grad);

        let mut d_intercept = vec![0.0; n_blocks];
        let mut d_slope = vec![0.0; n_blocks];
        for i in 0..self.data.x.len() {
            let b = self.data.block[i];
            let block = &blocks[b];
            let (s, p) = response_probability(block, self.data.x[i]);
            let hits = self.data.hits[i];
            let n_trials = self.data.n_trials[i];
            let d_p = beta_binomial_nll_grad_probability(p, kappa_obs, hits, n_trials);

            let d_eta = d_p * (1.0 - block.guess - block.lapse) * s * (1.0 - s);
            d_intercept[b] += d_eta;
            d_slope[b] += d_eta * self.data.x[i];

            let base = block_base(Self::N_HYPERS, b);
            grad[base + OFFSET_GUESS] += d_p * (1.0 - s);
            grad[base + OFFSET_LAPSE] -= d_p * s;
            grad[IDX_KAPPA_OBS] +=
                beta_binomial_nll_grad_concentration(p, kappa_obs, hits, n_trials);
        }
        add_linear_chain_grad(&blocks, &hypers, Self::N_HYPERS, &d_intercept, &d_slope, &mut grad);
        grad
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::{PointData, TrialData};
    use approx::assert_relative_eq;

    fn demo_trials() -> PreparedTrials {
        let trials = TrialData::new(
            vec![0.0, 1.0, 2.0, 3.0, 0.0, 1.0, 2.0, 3.0],
            vec![0, 0, 1, 1, 0, 1, 1, 1],
            vec![0, 0, 0, 0, 1, 1, 1, 1],
        );
        PreparedTrials::from_trials(&trials)
    }

    fn demo_points() -> PreparedPoints {
        let points = PointData::new(
            vec![0.0, 1.0, 2.0, 0.0, 1.0, 2.0],
            vec![1, 5, 9, 2, 6, 10],
            vec![10, 10, 10, 10, 10, 10],
            vec![3, 3, 3, 8, 8, 8],
        );
        PreparedPoints::from_points(&points)
    }

    fn trials_theta() -> Vec<f64> {
        vec![
            0.3, 0.8, 1.2, 0.5, 0.06, 15.0, 0.04, 18.0, // hypers
            0.4, 0.9, 0.05, 0.03, // block 0
            -0.7, 1.3, 0.08, 0.06, // block 1
        ]
    }

    fn points_theta() -> Vec<f64> {
        vec![
            0.3, 0.8, 1.2, 0.5, 0.06, 15.0, 0.04, 18.0, 25.0, // hypers with kappa_obs
            0.4, 0.9, 0.05, 0.03, // block 3
            -0.7, 1.3, 0.08, 0.06, // block 8
        ]
    }

    fn finite_difference_gradient<M: LogDensity>(model: &M, theta: &[f64]) -> Vec<f64> {
        let h = 1.0e-6;
        (0..theta.len())
            .map(|k| {
                let mut plus = theta.to_vec();
                let mut minus = theta.to_vec();
                plus[k] += h;
                minus[k] -= h;
                (model.nll(&plus) - model.nll(&minus)) / (2.0 * h)
            })
            .collect()
    }

    #[test]
    fn trials_model_shapes_are_consistent() {
        let model = TrialsModel::new(demo_trials());
        assert_eq!(model.dim(), 16);
        assert_eq!(model.parameter_names().len(), model.dim());
        assert_eq!(model.bounds().len(), model.dim());
        assert_eq!(model.initial_position().len(), model.dim());
        assert_eq!(model.parameter_names()[0], "mu_intercept");
        assert_eq!(model.parameter_names()[8], "intercept_raw[0]");
    }

    #[test]
    fn points_model_inserts_observation_concentration() {
        let model = PointsModel::new(demo_points());
        assert_eq!(model.dim(), 17);
        assert_eq!(model.parameter_names()[IDX_KAPPA_OBS], "kappa_obs");
        assert_eq!(model.parameter_names()[9], "intercept_raw[3]");
        assert_eq!(model.bounds()[IDX_KAPPA_OBS], (0.0, f64::INFINITY));
    }

    #[test]
    fn trials_nll_is_finite_at_initial_position() {
        let model = TrialsModel::new(demo_trials());
        let theta = model.initial_position();
        assert!(model.nll(&theta).is_finite());
        assert!(model.grad_nll(&theta).iter().all(|g| g.is_finite()));
    }

    #[test]
    fn points_nll_is_finite_at_initial_position() {
        let model = PointsModel::new(demo_points());
        let theta = model.initial_position();
        assert!(model.nll(&theta).is_finite());
        assert!(model.grad_nll(&theta).iter().all(|g| g.is_finite()));
    }

    #[test]
    fn trials_gradient_matches_finite_differences() {
        let model = TrialsModel::new(demo_trials());
        let theta = trials_theta();
        let analytic = model.grad_nll(&theta);
        let numeric = finite_difference_gradient(&model, &theta);
        for (a, n) in analytic.iter().zip(&numeric) {
            assert_relative_eq!(*a, *n, max_relative = 1.0e-4, epsilon = 1.0e-6);
        }
    }

    #[test]
    fn points_gradient_matches_finite_differences() {
        let model = PointsModel::new(demo_points());
        let theta = points_theta();
        let analytic = model.grad_nll(&theta);
        let numeric = finite_difference_gradient(&model, &theta);
        for (a, n) in analytic.iter().zip(&numeric) {
            assert_relative_eq!(*a, *n, max_relative = 1.0e-4, epsilon = 1.0e-6);
        }
    }

    #[test]
    fn unpacked_slopes_stay_positive() {
        let theta = trials_theta();
        let hypers = SharedHypers::unpack(&theta);
        let blocks = unpack_blocks(&theta, &hypers, N_SHARED_HYPERS, 2);
        for block in &blocks {
            assert!(block.slope > 0.0);
        }
        assert_relative_eq!(
            blocks[0].intercept,
            0.8f64.mul_add(0.4, 0.3),
            epsilon = 1.0e-12
        );
    }
}
