//! Stimulus standardization and dataset diagnostics.
//!
//! The sampler works on zero-mean/unit-variance intensities; reported
//! intercepts, slopes, and thresholds are mapped back to original units
//! through the exact inverse transforms defined here.

fn usize_to_f64(value: usize) -> f64 {
    f64::from(u32::try_from(value).unwrap_or(u32::MAX))
}

/// Affine intensity transform fitted on the raw stimulus values.
///
/// Uses population statistics (no sample correction). A zero-variance input
/// degrades to an unscaled shift so downstream divisions stay finite.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Standardizer {
    pub mean: f64,
    pub std: f64,
}

impl Standardizer {
    #[must_use]
    pub fn fit(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self { mean: 0.0, std: 1.0 };
        }
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
        let std = variance.sqrt();
        let std = if std > 0.0 && std.is_finite() {
            std
        } else {
            1.0
        };
        Self { mean, std }
    }

    #[must_use]
    pub fn standardize(&self, x: f64) -> f64 {
        (x - self.mean) / self.std
    }

    #[must_use]
    pub fn unstandardize(&self, z: f64) -> f64 {
        z.mul_add(self.std, self.mean)
    }

    #[must_use]
    pub fn standardize_all(&self, values: &[f64]) -> Vec<f64> {
        values.iter().map(|&x| self.standardize(x)).collect()
    }

    /// Map standardized regression coefficients back to original units.
    ///
    /// Returns `(intercept, slope)` such that `intercept + slope * x` equals
    /// `intercept_std + slope_std * standardize(x)` for every `x`.
    #[must_use]
    pub fn unstandardize_coefficients(&self, intercept_std: f64, slope_std: f64) -> (f64, f64) {
        let slope = slope_std / self.std;
        let intercept = intercept_std - slope_std * self.mean / self.std;
        (intercept, slope)
    }
}

/// Whether the intensities span more than `tolerance` between min and max.
#[must_use]
pub fn intensity_has_variation(values: &[f64], tolerance: f64) -> bool {
    if values.len() < 2 {
        return false;
    }
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for &value in values {
        min = min.min(value);
        max = max.max(value);
    }
    (max - min).abs() > tolerance.abs()
}

/// Response balance counts for a trial dataset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResponseDiagnostics {
    pub n_trials: usize,
    pub n_hits: usize,
    pub n_misses: usize,
    pub hit_share: f64,
}

#[must_use]
pub fn response_diagnostics(results: &[u8]) -> ResponseDiagnostics {
    let n_trials = results.len();
    let n_hits = results.iter().filter(|&&r| r == 1).count();
    let n_misses = n_trials - n_hits;
    let hit_share = if n_trials > 0 {
        usize_to_f64(n_hits) / usize_to_f64(n_trials)
    } else {
        0.0
    };
    ResponseDiagnostics {
        n_trials,
        n_hits,
        n_misses,
        hit_share,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn standardize_round_trips_original_values() {
        let values = vec![0.5, 1.0, 2.0, 4.5, -3.0];
        let standardizer = Standardizer::fit(&values);
        for &x in &values {
            assert_relative_eq!(
                standardizer.unstandardize(standardizer.standardize(x)),
                x,
                epsilon = 1e-12
            );
        }
    }

    #[test]
    fn fit_uses_population_statistics() {
        let standardizer = Standardizer::fit(&[1.0, 3.0]);
        assert_relative_eq!(standardizer.mean, 2.0);
        assert_relative_eq!(standardizer.std, 1.0);
    }

    #[test]
    fn zero_variance_falls_back_to_unit_scale() {
        let standardizer = Standardizer::fit(&[2.0, 2.0, 2.0]);
        assert_relative_eq!(standardizer.mean, 2.0);
        assert_relative_eq!(standardizer.std, 1.0);
        assert_relative_eq!(standardizer.standardize(2.0), 0.0);
        assert_relative_eq!(standardizer.standardize(5.0), 3.0);
    }

    #[test]
    fn coefficient_transform_preserves_linear_predictor() {
        let values = vec![0.0, 1.0, 2.0, 3.0, 10.0];
        let standardizer = Standardizer::fit(&values);
        let (intercept_std, slope_std) = (0.4, 1.7);
        let (intercept, slope) = standardizer.unstandardize_coefficients(intercept_std, slope_std);
        for &x in &values {
            assert_relative_eq!(
                slope_std.mul_add(standardizer.standardize(x), intercept_std),
                slope.mul_add(x, intercept),
                epsilon = 1e-10
            );
        }
    }

    #[test]
    fn intensity_has_variation_requires_spread() {
        assert!(intensity_has_variation(&[0.0, 1.0], 1e-12));
        assert!(!intensity_has_variation(&[1.0, 1.0, 1.0], 1e-12));
        assert!(!intensity_has_variation(&[1.0], 1e-12));
    }

    #[test]
    fn response_diagnostics_counts_hits_and_misses() {
        let diag = response_diagnostics(&[0, 1, 1, 0, 1]);
        assert_eq!(diag.n_trials, 5);
        assert_eq!(diag.n_hits, 3);
        assert_eq!(diag.n_misses, 2);
        assert_relative_eq!(diag.hit_share, 0.6);
    }
}
