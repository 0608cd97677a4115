//! Psychometric curve evaluation and threshold inversion.

use super::likelihood::logistic_stable;
use super::types::PsychometricError;

const TARGET_P_LOW: f64 = 0.001;
const TARGET_P_HIGH: f64 = 0.999;

/// Curve parameters in location/scale form.
///
/// `threshold` is the intensity at the sigmoid midpoint, `slope` the
/// steepness there; `guess_rate` lifts the lower asymptote and `lapse_rate`
/// pulls the upper asymptote below one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PsychometricParams {
    pub threshold: f64,
    pub slope: f64,
    pub guess_rate: f64,
    pub lapse_rate: f64,
}

impl PsychometricParams {
    /// # Errors
    ///
    /// Returns `PsychometricError` if any value is non-finite or a rate
    /// falls outside `[0, 1]`.
    pub fn new(
        threshold: f64,
        slope: f64,
        guess_rate: f64,
        lapse_rate: f64,
    ) -> Result<Self, PsychometricError> {
        let all_finite = threshold.is_finite()
            && slope.is_finite()
            && guess_rate.is_finite()
            && lapse_rate.is_finite();
        let rates_in_range = (0.0..=1.0).contains(&guess_rate) && (0.0..=1.0).contains(&lapse_rate);
        if !(all_finite && rates_in_range) {
            return Err(PsychometricError::InvalidCurveParameters);
        }
        Ok(Self {
            threshold,
            slope,
            guess_rate,
            lapse_rate,
        })
    }
}

/// Response probability at intensity `x`.
#[must_use]
pub fn psychometric(x: f64, params: &PsychometricParams) -> f64 {
    let s = logistic_stable(params.slope * (x - params.threshold));
    (1.0 - params.guess_rate - params.lapse_rate).mul_add(s, params.guess_rate)
}

/// Log-odds of a probability strictly inside `(0, 1)`.
#[must_use]
pub fn logit(probability: f64) -> f64 {
    probability.ln() - (-probability).ln_1p()
}

/// Intensity at which the response curve crosses one half, in the same
/// (standardized) units as `intercept` and `slope`.
///
/// The crossing probability `(0.5 - guess) / (1 - guess - lapse)` is clamped
/// to `[0.001, 0.999]` before inversion, so the result stays finite even
/// where `guess + lapse` pushes one half outside the asymptotes. In that
/// degenerate regime the value is not statistically meaningful.
#[must_use]
pub fn threshold_from_curve(
    intercept: f64,
    slope: f64,
    guess_rate: f64,
    lapse_rate: f64,
) -> f64 {
    let target_p = (0.5 - guess_rate) / (1.0 - guess_rate - lapse_rate);
    (logit(target_p.clamp(TARGET_P_LOW, TARGET_P_HIGH)) - intercept) / slope
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn params_reject_out_of_range_rates() {
        assert!(PsychometricParams::new(0.0, 1.0, -0.1, 0.0).is_err());
        assert!(PsychometricParams::new(0.0, 1.0, 0.0, 1.2).is_err());
        assert!(PsychometricParams::new(f64::NAN, 1.0, 0.0, 0.0).is_err());
        assert!(PsychometricParams::new(0.0, 1.0, 0.05, 0.02).is_ok());
    }

    #[test]
    fn curve_is_bounded_by_asymptotes() {
        let params = PsychometricParams::new(1.0, 2.0, 0.1, 0.05).unwrap();
        for x in [-50.0, -1.0, 1.0, 3.0, 50.0] {
            let p = psychometric(x, &params);
            assert!(p >= params.guess_rate - 1.0e-12);
            assert!(p <= 1.0 - params.lapse_rate + 1.0e-12);
        }
    }

    #[test]
    fn curve_passes_through_midpoint() {
        let params = PsychometricParams::new(0.7, 3.0, 0.0, 0.0).unwrap();
        assert_relative_eq!(psychometric(0.7, &params), 0.5, epsilon = 1.0e-12);
    }

    #[test]
    fn curve_is_increasing_for_positive_slope() {
        let params = PsychometricParams::new(0.0, 1.5, 0.02, 0.01).unwrap();
        let xs = [-3.0, -1.0, 0.0, 1.0, 3.0];
        for pair in xs.windows(2) {
            assert!(psychometric(pair[0], &params) < psychometric(pair[1], &params));
        }
    }

    #[test]
    fn threshold_inverts_plain_logistic() {
        let intercept = -1.4;
        let slope = 2.0;
        let threshold = threshold_from_curve(intercept, slope, 0.0, 0.0);
        assert_relative_eq!(threshold, -intercept / slope, epsilon = 1.0e-12);

        let p_at_threshold = logistic_stable(slope.mul_add(threshold, intercept));
        assert_relative_eq!(p_at_threshold, 0.5, epsilon = 1.0e-12);
    }

    #[test]
    fn threshold_shifts_with_guess_rate() {
        // A positive guess rate moves the 0.5 crossing below the sigmoid
        // midpoint for an increasing curve.
        let plain = threshold_from_curve(0.0, 1.0, 0.0, 0.0);
        let guessy = threshold_from_curve(0.0, 1.0, 0.2, 0.0);
        assert!(guessy < plain);
    }

    #[test]
    fn threshold_is_finite_in_degenerate_regime() {
        let threshold = threshold_from_curve(0.3, 1.0, 0.6, 0.5);
        assert!(threshold.is_finite());
    }

    #[test]
    fn logit_round_trips_logistic() {
        for p in [0.001, 0.2, 0.5, 0.93, 0.999] {
            assert_relative_eq!(logistic_stable(logit(p)), p, epsilon = 1.0e-12);
        }
    }
}
