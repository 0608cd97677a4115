//! Observation likelihoods and numerical-stability helpers.

use statrs::function::gamma::{digamma, ln_gamma};

const EPS_PROBABILITY: f64 = 1.0e-12;

/// Stable logistic transform.
#[must_use]
pub fn logistic_stable(value: f64) -> f64 {
    if value >= 0.0 {
        let z = (-value).exp();
        1.0 / (1.0 + z)
    } else {
        let z = value.exp();
        z / (1.0 + z)
    }
}

/// Bound probability away from exact 0 and 1.
#[must_use]
pub fn clamp_probability(probability: f64) -> f64 {
    probability.clamp(EPS_PROBABILITY, 1.0 - EPS_PROBABILITY)
}

/// Stable `log(1 - p)` with clipping.
#[must_use]
pub fn log_one_minus_probability(probability: f64) -> f64 {
    let p = clamp_probability(probability);
    (-p).ln_1p()
}

/// True when the probability sits inside the clipped band rather than in a
/// flattened tail.
#[must_use]
pub fn probability_in_band(probability: f64) -> bool {
    (EPS_PROBABILITY..=1.0 - EPS_PROBABILITY).contains(&probability)
}

/// Bernoulli negative log-likelihood of one binary response.
#[must_use]
pub fn bernoulli_nll(probability: f64, response: f64) -> f64 {
    let p = clamp_probability(probability);
    -response.mul_add(p.ln(), (1.0 - response) * (-p).ln_1p())
}

/// Derivative of [`bernoulli_nll`] in the probability.
///
/// Zero in the clipped tails, where the likelihood is flat.
#[must_use]
pub fn bernoulli_nll_grad_probability(probability: f64, response: f64) -> f64 {
    if !probability_in_band(probability) {
        return 0.0;
    }
    (probability - response) / (probability * (1.0 - probability))
}

/// Beta-binomial negative log-likelihood of `hits` successes out of `trials`,
/// parameterized by mean probability and concentration.
#[must_use]
pub fn beta_binomial_nll(probability: f64, concentration: f64, hits: f64, trials: f64) -> f64 {
    let p = clamp_probability(probability);
    let alpha = p * concentration;
    let beta = (1.0 - p) * concentration;
    let ln_choose = ln_gamma(trials + 1.0) - ln_gamma(hits + 1.0) - ln_gamma(trials - hits + 1.0);
    -(ln_choose + ln_gamma(hits + alpha) + ln_gamma(trials - hits + beta)
        + ln_gamma(concentration)
        - ln_gamma(trials + concentration)
        - ln_gamma(alpha)
        - ln_gamma(beta))
}

/// Derivative of [`beta_binomial_nll`] in the mean probability.
///
/// Zero in the clipped tails, where the likelihood is flat.
#[must_use]
pub fn beta_binomial_nll_grad_probability(
    probability: f64,
    concentration: f64,
    hits: f64,
    trials: f64,
) -> f64 {
    if !probability_in_band(probability) {
        return 0.0;
    }
    let alpha = probability * concentration;
    let beta = (1.0 - probability) * concentration;
    concentration
        * (digamma(alpha) - digamma(hits + alpha) + digamma(trials - hits + beta) - digamma(beta))
}

/// Derivative of [`beta_binomial_nll`] in the concentration.
#[must_use]
pub fn beta_binomial_nll_grad_concentration(
    probability: f64,
    concentration: f64,
    hits: f64,
    trials: f64,
) -> f64 {
    let p = clamp_probability(probability);
    let alpha = p * concentration;
    let beta = (1.0 - p) * concentration;
    p * (digamma(alpha) - digamma(hits + alpha))
        + (1.0 - p) * (digamma(beta) - digamma(trials - hits + beta))
        + digamma(trials + concentration)
        - digamma(concentration)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn logistic_is_bounded() {
        let low = logistic_stable(-1_000.0);
        let high = logistic_stable(1_000.0);
        assert!(low >= 0.0);
        assert!(high <= 1.0);
    }

    #[test]
    fn bernoulli_matches_hand_values() {
        assert_relative_eq!(bernoulli_nll(0.7, 1.0), -0.7f64.ln(), epsilon = 1.0e-12);
        assert_relative_eq!(bernoulli_nll(0.7, 0.0), -0.3f64.ln(), epsilon = 1.0e-12);
    }

    #[test]
    fn bernoulli_gradient_matches_finite_difference() {
        let h = 1.0e-6;
        for (p, y) in [(0.31, 1.0), (0.86, 0.0)] {
            let numeric = (bernoulli_nll(p + h, y) - bernoulli_nll(p - h, y)) / (2.0 * h);
            let analytic = bernoulli_nll_grad_probability(p, y);
            assert_relative_eq!(analytic, numeric, max_relative = 1.0e-6);
        }
    }

    #[test]
    fn bernoulli_gradient_is_flat_in_clipped_tails() {
        assert_eq!(bernoulli_nll_grad_probability(1.0e-15, 1.0), 0.0);
        assert_eq!(bernoulli_nll_grad_probability(1.0 - 1.0e-15, 0.0), 0.0);
    }

    #[test]
    fn beta_binomial_approaches_binomial_at_large_concentration() {
        let p: f64 = 0.62;
        let hits = 7.0;
        let trials = 10.0;
        let binomial = -(ln_gamma(trials + 1.0) - ln_gamma(hits + 1.0)
            - ln_gamma(trials - hits + 1.0)
            + hits * p.ln()
            + (trials - hits) * (1.0 - p).ln());
        let concentrated = beta_binomial_nll(p, 1.0e8, hits, trials);
        assert_relative_eq!(concentrated, binomial, max_relative = 1.0e-5);
    }

    #[test]
    fn beta_binomial_is_symmetric_under_relabeling() {
        let direct = beta_binomial_nll(0.3, 12.0, 4.0, 9.0);
        let flipped = beta_binomial_nll(0.7, 12.0, 5.0, 9.0);
        assert_relative_eq!(direct, flipped, epsilon = 1.0e-10);
    }

    #[test]
    fn beta_binomial_gradients_match_finite_differences() {
        let h = 1.0e-6;
        let (p, kappa, hits, trials) = (0.44, 18.0, 11.0, 25.0);

        let numeric_p =
            (beta_binomial_nll(p + h, kappa, hits, trials) - beta_binomial_nll(p - h, kappa, hits, trials))
                / (2.0 * h);
        assert_relative_eq!(
            beta_binomial_nll_grad_probability(p, kappa, hits, trials),
            numeric_p,
            max_relative = 1.0e-5
        );

        let numeric_kappa =
            (beta_binomial_nll(p, kappa + h, hits, trials) - beta_binomial_nll(p, kappa - h, hits, trials))
                / (2.0 * h);
        assert_relative_eq!(
            beta_binomial_nll_grad_concentration(p, kappa, hits, trials),
            numeric_kappa,
            max_relative = 1.0e-5
        );
    }
}
