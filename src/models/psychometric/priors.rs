//! Hierarchical prior terms in negative-log form, with their derivatives.

use statrs::function::gamma::{digamma, ln_gamma};

/// Scale of the `Normal(0, 2.5)` and half-normal priors on location-level
/// hyperparameters.
pub const LOCATION_PRIOR_SCALE: f64 = 2.5;
/// First shape of the `Beta(1, 19)` prior on guess and lapse means.
pub const RATE_PRIOR_ALPHA: f64 = 1.0;
/// Second shape of the `Beta(1, 19)` prior on guess and lapse means.
pub const RATE_PRIOR_BETA: f64 = 19.0;
/// Shape of the `Gamma(2, rate 0.1)` prior on concentrations.
pub const CONCENTRATION_PRIOR_SHAPE: f64 = 2.0;
/// Rate of the `Gamma(2, rate 0.1)` prior on concentrations.
pub const CONCENTRATION_PRIOR_RATE: f64 = 0.1;

/// Negative log-density of `Normal(mean, scale)`.
#[must_use]
pub fn normal_nll(value: f64, mean: f64, scale: f64) -> f64 {
    let z = (value - mean) / scale;
    0.5 * z.mul_add(z, std::f64::consts::TAU.ln()) + scale.ln()
}

/// Derivative of [`normal_nll`] in the value.
#[must_use]
pub fn normal_nll_grad(value: f64, mean: f64, scale: f64) -> f64 {
    (value - mean) / (scale * scale)
}

/// Negative log-density of a half-normal distribution on `[0, inf)`.
#[must_use]
pub fn half_normal_nll(value: f64, scale: f64) -> f64 {
    if value < 0.0 {
        return f64::INFINITY;
    }
    let z = value / scale;
    0.5 * z.mul_add(z, (std::f64::consts::PI / 2.0).ln()) + scale.ln()
}

/// Derivative of [`half_normal_nll`] in the value.
#[must_use]
pub fn half_normal_nll_grad(value: f64, scale: f64) -> f64 {
    value / (scale * scale)
}

/// Negative log-density of `Beta(alpha, beta)`.
#[must_use]
pub fn beta_nll(value: f64, alpha: f64, beta: f64) -> f64 {
    if !(0.0..=1.0).contains(&value) {
        return f64::INFINITY;
    }
    (1.0 - alpha).mul_add(value.ln(), (1.0 - beta) * (-value).ln_1p()) + ln_gamma(alpha)
        + ln_gamma(beta)
        - ln_gamma(alpha + beta)
}

/// Derivative of [`beta_nll`] in the value.
#[must_use]
pub fn beta_nll_grad(value: f64, alpha: f64, beta: f64) -> f64 {
    (1.0 - alpha) / value - (1.0 - beta) / (1.0 - value)
}

/// Negative log-density of `Gamma(shape, rate)`.
#[must_use]
pub fn gamma_nll(value: f64, shape: f64, rate: f64) -> f64 {
    if value <= 0.0 {
        return f64::INFINITY;
    }
    rate.mul_add(value, -(shape - 1.0) * value.ln()) + ln_gamma(shape) - shape * rate.ln()
}

/// Derivative of [`gamma_nll`] in the value.
#[must_use]
pub fn gamma_nll_grad(value: f64, shape: f64, rate: f64) -> f64 {
    rate - (shape - 1.0) / value
}

/// Negative log-density of a beta distribution parameterized by mean and
/// concentration, so `alpha = mean * concentration` and
/// `beta = (1 - mean) * concentration`.
#[must_use]
pub fn beta_mean_concentration_nll(value: f64, mean: f64, concentration: f64) -> f64 {
    beta_nll(value, mean * concentration, (1.0 - mean) * concentration)
}

/// Derivative of [`beta_mean_concentration_nll`] in the mean.
#[must_use]
pub fn beta_mean_concentration_nll_grad_mean(value: f64, mean: f64, concentration: f64) -> f64 {
    let alpha = mean * concentration;
    let beta = (1.0 - mean) * concentration;
    concentration * ((-value).ln_1p() - value.ln() + digamma(alpha) - digamma(beta))
}

/// Derivative of [`beta_mean_concentration_nll`] in the concentration.
#[must_use]
pub fn beta_mean_concentration_nll_grad_concentration(
    value: f64,
    mean: f64,
    concentration: f64,
) -> f64 {
    let alpha = mean * concentration;
    let beta = (1.0 - mean) * concentration;
    mean.mul_add(digamma(alpha) - value.ln(), (1.0 - mean) * (digamma(beta) - (-value).ln_1p()))
        - digamma(concentration)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn central_difference(f: impl Fn(f64) -> f64, at: f64) -> f64 {
        let h = 1.0e-6;
        (f(at + h) - f(at - h)) / (2.0 * h)
    }

    #[test]
    fn normal_gradient_matches_finite_difference() {
        let numeric = central_difference(|v| normal_nll(v, 0.4, 2.5), 1.3);
        assert_relative_eq!(normal_nll_grad(1.3, 0.4, 2.5), numeric, max_relative = 1.0e-6);
    }

    #[test]
    fn half_normal_gradient_matches_finite_difference() {
        let numeric = central_difference(|v| half_normal_nll(v, 2.5), 0.9);
        assert_relative_eq!(half_normal_nll_grad(0.9, 2.5), numeric, max_relative = 1.0e-6);
    }

    #[test]
    fn half_normal_rejects_negative_values() {
        assert!(!half_normal_nll(-0.1, 1.0).is_finite());
    }

    #[test]
    fn beta_one_nineteen_reduces_to_single_log_term() {
        // With alpha = 1 the value-dependent part collapses to
        // -(beta - 1) * ln(1 - v).
        let constant = ln_gamma(RATE_PRIOR_ALPHA) + ln_gamma(RATE_PRIOR_BETA)
            - ln_gamma(RATE_PRIOR_ALPHA + RATE_PRIOR_BETA);
        for v in [0.01_f64, 0.05, 0.2] {
            let expected = (RATE_PRIOR_BETA - 1.0).mul_add(-(-v).ln_1p(), constant);
            assert_relative_eq!(
                beta_nll(v, RATE_PRIOR_ALPHA, RATE_PRIOR_BETA),
                expected,
                epsilon = 1.0e-10
            );
        }
    }

    #[test]
    fn beta_gradient_matches_finite_difference() {
        let numeric = central_difference(|v| beta_nll(v, 1.0, 19.0), 0.07);
        assert_relative_eq!(beta_nll_grad(0.07, 1.0, 19.0), numeric, max_relative = 1.0e-6);
    }

    #[test]
    fn gamma_gradient_matches_finite_difference() {
        let numeric = central_difference(
            |v| gamma_nll(v, CONCENTRATION_PRIOR_SHAPE, CONCENTRATION_PRIOR_RATE),
            14.0,
        );
        assert_relative_eq!(
            gamma_nll_grad(14.0, CONCENTRATION_PRIOR_SHAPE, CONCENTRATION_PRIOR_RATE),
            numeric,
            max_relative = 1.0e-6
        );
    }

    #[test]
    fn mean_concentration_form_agrees_with_shape_form() {
        let (v, m, kappa) = (0.12, 0.06, 22.0);
        assert_relative_eq!(
            beta_mean_concentration_nll(v, m, kappa),
            beta_nll(v, m * kappa, (1.0 - m) * kappa),
            epsilon = 1.0e-12
        );
    }

    #[test]
    fn mean_concentration_gradients_match_finite_differences() {
        let (v, m, kappa) = (0.12, 0.06, 22.0);

        let numeric_mean = central_difference(|x| beta_mean_concentration_nll(v, x, kappa), m);
        assert_relative_eq!(
            beta_mean_concentration_nll_grad_mean(v, m, kappa),
            numeric_mean,
            max_relative = 1.0e-5
        );

        let numeric_kappa = central_difference(|x| beta_mean_concentration_nll(v, m, x), kappa);
        assert_relative_eq!(
            beta_mean_concentration_nll_grad_concentration(v, m, kappa),
            numeric_kappa,
            max_relative = 1.0e-5
        );
    }
}
