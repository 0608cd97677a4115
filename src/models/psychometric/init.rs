//! Data-driven starting values for the samplers.
//!
//! Each block gets a short ridge-penalized IRLS logistic fit on the
//! standardized intensities. Hyperparameters start at the moments those
//! fits imply; asymptote rates and concentrations start at their prior
//! means.

use faer::Mat;

use super::curve::logit;
use super::input::{PreparedPoints, PreparedTrials};
use super::likelihood::logistic_stable;
use crate::utils::solve_ridge_system;

const IRLS_MAX_ITERS: usize = 25;
const IRLS_TOLERANCE: f64 = 1.0e-6;
const IRLS_RIDGE: f64 = 1.0e-6;
const MIN_CURVATURE: f64 = 1.0e-6;
const INTERCEPT_LIMIT: f64 = 5.0;
const SLOPE_MIN: f64 = 0.05;
const SLOPE_MAX: f64 = 10.0;
const RAW_SLOPE_FLOOR: f64 = 1.0e-3;
const RATE_INITIAL: f64 = 0.05;
const CONCENTRATION_INITIAL: f64 = 20.0;
const SPREAD_FLOOR: f64 = 0.25;

fn usize_to_f64(value: usize) -> f64 {
    f64::from(u32::try_from(value).unwrap_or(u32::MAX))
}

#[derive(Debug, Clone, Copy)]
struct BlockEstimate {
    intercept: f64,
    slope: f64,
}

/// Weighted IRLS fit of `share ~ logistic(intercept + slope * x)`.
///
/// Under complete separation the iterate drifts instead of converging; the
/// last finite iterate is still returned and the caller clamps it. `None`
/// only signals a numerically unusable path.
fn logistic_irls(x: &[f64], share: &[f64], weight: &[f64]) -> Option<BlockEstimate> {
    let mut intercept = 0.0_f64;
    let mut slope = 0.0_f64;

    for _ in 0..IRLS_MAX_ITERS {
        let mut a00 = IRLS_RIDGE;
        let mut a01 = 0.0_f64;
        let mut a11 = IRLS_RIDGE;
        let mut b0 = 0.0_f64;
        let mut b1 = 0.0_f64;
        for i in 0..x.len() {
            let eta = slope.mul_add(x[i], intercept);
            let p = logistic_stable(eta);
            let curvature = (p * (1.0 - p)).max(MIN_CURVATURE);
            let w = weight[i] * curvature;
            let z = eta + (share[i] - p) / curvature;
            a00 += w;
            a01 += w * x[i];
            a11 += w * x[i] * x[i];
            b0 += w * z;
            b1 += w * x[i] * z;
        }

        let information = Mat::from_fn(2, 2, |row, col| match (row, col) {
            (0, 0) => a00,
            (1, 1) => a11,
            _ => a01,
        });
        let moment = Mat::from_fn(2, 1, |row, _| if row == 0 { b0 } else { b1 });
        let solution = solve_ridge_system(&information, &moment)?;

        let next_intercept = solution[(0, 0)];
        let next_slope = solution[(1, 0)];
        if !(next_intercept.is_finite() && next_slope.is_finite()) {
            return None;
        }
        let delta = (next_intercept - intercept)
            .abs()
            .max((next_slope - slope).abs());
        intercept = next_intercept;
        slope = next_slope;
        if delta < IRLS_TOLERANCE {
            break;
        }
    }

    Some(BlockEstimate { intercept, slope })
}

/// Intercept from the pooled hit share, flat slope.
fn moment_estimate(share: &[f64], weight: &[f64]) -> BlockEstimate {
    let total: f64 = weight.iter().sum();
    let hits: f64 = share.iter().zip(weight).map(|(s, w)| s * w).sum();
    let rate = if total > 0.0 {
        (hits / total).clamp(0.05, 0.95)
    } else {
        0.5
    };
    BlockEstimate {
        intercept: logit(rate),
        slope: 1.0,
    }
}

const fn clamp_estimate(estimate: BlockEstimate) -> BlockEstimate {
    BlockEstimate {
        intercept: estimate.intercept.clamp(-INTERCEPT_LIMIT, INTERCEPT_LIMIT),
        slope: estimate.slope.clamp(SLOPE_MIN, SLOPE_MAX),
    }
}

fn block_estimates(
    x: &[f64],
    share: &[f64],
    weight: &[f64],
    block: &[usize],
    n_blocks: usize,
) -> Vec<BlockEstimate> {
    (0..n_blocks)
        .map(|b| {
            let rows: Vec<usize> = (0..block.len()).filter(|&i| block[i] == b).collect();
            let bx: Vec<f64> = rows.iter().map(|&i| x[i]).collect();
            let bshare: Vec<f64> = rows.iter().map(|&i| share[i]).collect();
            let bweight: Vec<f64> = rows.iter().map(|&i| weight[i]).collect();
            let estimate = logistic_irls(&bx, &bshare, &bweight)
                .unwrap_or_else(|| moment_estimate(&bshare, &bweight));
            clamp_estimate(estimate)
        })
        .collect()
}

fn mean_and_spread(values: &[f64]) -> (f64, f64) {
    let n = usize_to_f64(values.len());
    let mean = values.iter().sum::<f64>() / n;
    let variance = values
        .iter()
        .map(|value| {
            let diff = value - mean;
            diff * diff
        })
        .sum::<f64>()
        / n;
    (mean, variance.sqrt())
}

fn assemble(estimates: &[BlockEstimate], with_observation_concentration: bool) -> Vec<f64> {
    let intercepts: Vec<f64> = estimates.iter().map(|e| e.intercept).collect();
    let slopes: Vec<f64> = estimates.iter().map(|e| e.slope).collect();
    let (mu_intercept, intercept_spread) = mean_and_spread(&intercepts);
    let (slope_mean, slope_spread) = mean_and_spread(&slopes);

    let sigma_intercept = intercept_spread.max(SPREAD_FLOOR);
    let mu_slope = slope_mean.max(SLOPE_MIN);
    let sigma_slope = slope_spread.max(SPREAD_FLOOR);
    let slope_scale = mu_slope.hypot(sigma_slope);

    let mut theta = vec![
        mu_intercept,
        sigma_intercept,
        mu_slope,
        sigma_slope,
        RATE_INITIAL,
        CONCENTRATION_INITIAL,
        RATE_INITIAL,
        CONCENTRATION_INITIAL,
    ];
    if with_observation_concentration {
        theta.push(CONCENTRATION_INITIAL);
    }
    for estimate in estimates {
        theta.push((estimate.intercept - mu_intercept) / sigma_intercept);
        theta.push((estimate.slope / slope_scale).max(RAW_SLOPE_FLOOR));
        theta.push(RATE_INITIAL);
        theta.push(RATE_INITIAL);
    }
    theta
}

pub(crate) fn trials_initial_position(data: &PreparedTrials) -> Vec<f64> {
    let weight = vec![1.0; data.x.len()];
    let estimates = block_estimates(
        &data.x,
        &data.response,
        &weight,
        &data.block,
        data.n_blocks(),
    );
    assemble(&estimates, false)
}

pub(crate) fn points_initial_position(data: &PreparedPoints) -> Vec<f64> {
    let share: Vec<f64> = data
        .hits
        .iter()
        .zip(&data.n_trials)
        .map(|(hits, n)| hits / n)
        .collect();
    let estimates = block_estimates(
        &data.x,
        &share,
        &data.n_trials,
        &data.block,
        data.n_blocks(),
    );
    assemble(&estimates, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::TrialData;
    use crate::models::psychometric::input::PreparedTrials as Prepared;
    use approx::assert_relative_eq;

    #[test]
    fn irls_recovers_exact_logistic_shares() {
        let x: Vec<f64> = (-10..=10).map(|i| f64::from(i) / 4.0).collect();
        let share: Vec<f64> = x
            .iter()
            .map(|&v| logistic_stable(2.0f64.mul_add(v, -1.0)))
            .collect();
        let weight = vec![50.0; x.len()];

        let estimate = logistic_irls(&x, &share, &weight).expect("fit should run");
        assert_relative_eq!(estimate.intercept, -1.0, epsilon = 1.0e-2);
        assert_relative_eq!(estimate.slope, 2.0, epsilon = 1.0e-2);
    }

    #[test]
    fn separated_responses_stay_within_clamps() {
        let x = vec![-1.0, -0.5, 0.5, 1.0];
        let share = vec![0.0, 0.0, 1.0, 1.0];
        let weight = vec![1.0; 4];

        let estimate = clamp_estimate(
            logistic_irls(&x, &share, &weight).unwrap_or_else(|| moment_estimate(&share, &weight)),
        );
        assert!(estimate.intercept.abs() <= INTERCEPT_LIMIT);
        assert!(estimate.slope >= SLOPE_MIN && estimate.slope <= SLOPE_MAX);
    }

    #[test]
    fn moment_estimate_matches_pooled_rate() {
        let estimate = moment_estimate(&[1.0, 1.0, 0.0, 0.0], &[1.0; 4]);
        assert_relative_eq!(estimate.intercept, 0.0, epsilon = 1.0e-12);
        assert_relative_eq!(estimate.slope, 1.0);
    }

    #[test]
    fn single_block_spreads_are_floored() {
        let trials = TrialData::new(
            vec![0.0, 1.0, 2.0, 3.0],
            vec![0, 0, 1, 1],
            vec![7, 7, 7, 7],
        );
        let theta = trials_initial_position(&Prepared::from_trials(&trials));

        assert_eq!(theta.len(), 12);
        assert!(theta.iter().all(|v| v.is_finite()));
        assert!(theta[1] >= SPREAD_FLOOR);
        assert!(theta[3] >= SPREAD_FLOOR);
        assert!(theta[9] > 0.0);
        assert_relative_eq!(theta[10], RATE_INITIAL);
        assert_relative_eq!(theta[11], RATE_INITIAL);
    }

    #[test]
    fn points_layout_includes_observation_concentration() {
        let estimates = vec![
            BlockEstimate {
                intercept: -0.5,
                slope: 1.5,
            },
            BlockEstimate {
                intercept: 0.5,
                slope: 2.5,
            },
        ];
        let theta = assemble(&estimates, true);
        assert_eq!(theta.len(), 9 + 8);
        assert_relative_eq!(theta[8], CONCENTRATION_INITIAL);
    }
}
