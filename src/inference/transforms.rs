//! Bijective reparameterizations between constrained and unconstrained space.
//!
//! Hamiltonian dynamics run over `z` in `R^n`; each model parameter is mapped
//! back to its open support interval through one of these transforms. The
//! log-Jacobian terms keep the sampled density equal to the model density on
//! the constrained side.

/// Scalar transform from unconstrained `z` to one constrained parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Bijector {
    /// Support `(-inf, inf)`: `theta = z`.
    Unbounded,
    /// Support `(lower, inf)`: `theta = lower + exp(z)`.
    LowerBounded { lower: f64 },
    /// Support `(-inf, upper)`: `theta = upper - exp(z)`.
    UpperBounded { upper: f64 },
    /// Support `(lower, lower + width)`: `theta = lower + width * sigmoid(z)`.
    Bounded { lower: f64, width: f64 },
}

impl Bijector {
    /// Select the transform matching an open support interval.
    #[must_use]
    pub fn from_bounds(lower: f64, upper: f64) -> Self {
        match (lower.is_finite(), upper.is_finite()) {
            (false, false) => Self::Unbounded,
            (true, false) => Self::LowerBounded { lower },
            (false, true) => Self::UpperBounded { upper },
            (true, true) => Self::Bounded {
                lower,
                width: upper - lower,
            },
        }
    }

    /// Map unconstrained `z` to the constrained parameter.
    #[must_use]
    pub fn forward(self, z: f64) -> f64 {
        match self {
            Self::Unbounded => z,
            Self::LowerBounded { lower } => lower + z.exp(),
            Self::UpperBounded { upper } => upper - z.exp(),
            Self::Bounded { lower, width } => width.mul_add(sigmoid(z), lower),
        }
    }

    /// Map a constrained parameter back to unconstrained space.
    ///
    /// Values on or outside the support boundary are nudged inside before
    /// inverting, so initialization from clamped estimates stays finite.
    #[must_use]
    pub fn inverse(self, theta: f64) -> f64 {
        match self {
            Self::Unbounded => theta,
            Self::LowerBounded { lower } => (theta - lower).max(f64::MIN_POSITIVE).ln(),
            Self::UpperBounded { upper } => (upper - theta).max(f64::MIN_POSITIVE).ln(),
            Self::Bounded { lower, width } => {
                let p = ((theta - lower) / width).clamp(1.0e-12, 1.0 - 1.0e-12);
                p.ln() - (-p).ln_1p()
            }
        }
    }

    /// Signed derivative `d theta / d z`.
    #[must_use]
    pub fn jacobian(self, z: f64) -> f64 {
        match self {
            Self::Unbounded => 1.0,
            Self::LowerBounded { .. } => z.exp(),
            Self::UpperBounded { .. } => -z.exp(),
            Self::Bounded { width, .. } => {
                let s = sigmoid(z);
                width * s * (1.0 - s)
            }
        }
    }

    /// `ln |d theta / d z|`.
    #[must_use]
    pub fn log_jacobian(self, z: f64) -> f64 {
        match self {
            Self::Unbounded => 0.0,
            Self::LowerBounded { .. } | Self::UpperBounded { .. } => z,
            Self::Bounded { width, .. } => width.ln() + log_sigmoid(z) + log_sigmoid(-z),
        }
    }

    /// Derivative of [`Bijector::log_jacobian`] with respect to `z`.
    #[must_use]
    pub fn grad_log_jacobian(self, z: f64) -> f64 {
        match self {
            Self::Unbounded => 0.0,
            Self::LowerBounded { .. } | Self::UpperBounded { .. } => 1.0,
            Self::Bounded { .. } => 2.0f64.mul_add(-sigmoid(z), 1.0),
        }
    }
}

/// Per-parameter transform for a whole parameter vector.
#[derive(Debug, Clone)]
pub struct ParameterTransform {
    bijectors: Vec<Bijector>,
}

impl ParameterTransform {
    /// Build from per-parameter open support intervals.
    #[must_use]
    pub fn from_bounds(bounds: &[(f64, f64)]) -> Self {
        Self {
            bijectors: bounds
                .iter()
                .map(|&(lower, upper)| Bijector::from_bounds(lower, upper))
                .collect(),
        }
    }

    #[must_use]
    pub fn dim(&self) -> usize {
        self.bijectors.len()
    }

    /// Map an unconstrained vector to constrained space.
    #[must_use]
    pub fn forward(&self, z: &[f64]) -> Vec<f64> {
        self.bijectors
            .iter()
            .zip(z)
            .map(|(b, &zi)| b.forward(zi))
            .collect()
    }

    /// Map a constrained vector to unconstrained space.
    #[must_use]
    pub fn inverse(&self, theta: &[f64]) -> Vec<f64> {
        self.bijectors
            .iter()
            .zip(theta)
            .map(|(b, &ti)| b.inverse(ti))
            .collect()
    }

    /// Sum of per-parameter `ln |d theta_i / d z_i|`.
    #[must_use]
    pub fn log_jacobian(&self, z: &[f64]) -> f64 {
        self.bijectors
            .iter()
            .zip(z)
            .map(|(b, &zi)| b.log_jacobian(zi))
            .sum()
    }

    /// Signed diagonal of the Jacobian `d theta / d z`.
    #[must_use]
    pub fn jacobian_diag(&self, z: &[f64]) -> Vec<f64> {
        self.bijectors
            .iter()
            .zip(z)
            .map(|(b, &zi)| b.jacobian(zi))
            .collect()
    }

    /// Gradient of [`ParameterTransform::log_jacobian`].
    #[must_use]
    pub fn grad_log_jacobian(&self, z: &[f64]) -> Vec<f64> {
        self.bijectors
            .iter()
            .zip(z)
            .map(|(b, &zi)| b.grad_log_jacobian(zi))
            .collect()
    }
}

fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

fn log_sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        -(-z).exp().ln_1p()
    } else {
        z - z.exp().ln_1p()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn finite_difference(f: impl Fn(f64) -> f64, z: f64) -> f64 {
        let h = 1.0e-6;
        (f(z + h) - f(z - h)) / (2.0 * h)
    }

    #[test]
    fn from_bounds_selects_matching_variant() {
        assert_eq!(
            Bijector::from_bounds(f64::NEG_INFINITY, f64::INFINITY),
            Bijector::Unbounded
        );
        assert_eq!(
            Bijector::from_bounds(0.0, f64::INFINITY),
            Bijector::LowerBounded { lower: 0.0 }
        );
        assert_eq!(
            Bijector::from_bounds(f64::NEG_INFINITY, 3.0),
            Bijector::UpperBounded { upper: 3.0 }
        );
        assert_eq!(
            Bijector::from_bounds(0.0, 1.0),
            Bijector::Bounded {
                lower: 0.0,
                width: 1.0
            }
        );
    }

    #[test]
    fn forward_inverse_round_trips() {
        let cases = [
            (Bijector::Unbounded, -1.7),
            (Bijector::LowerBounded { lower: 0.0 }, 0.8),
            (Bijector::UpperBounded { upper: 2.0 }, -0.4),
            (
                Bijector::Bounded {
                    lower: 0.0,
                    width: 1.0,
                },
                1.3,
            ),
        ];
        for (bijector, z) in cases {
            let theta = bijector.forward(z);
            assert_relative_eq!(bijector.inverse(theta), z, epsilon = 1.0e-9);
        }
    }

    #[test]
    fn forward_lands_inside_support() {
        let bijector = Bijector::Bounded {
            lower: 0.0,
            width: 1.0,
        };
        for z in [-30.0, -1.0, 0.0, 1.0, 30.0] {
            let theta = bijector.forward(z);
            assert!(theta > 0.0 && theta < 1.0, "theta out of support: {theta}");
        }
    }

    #[test]
    fn jacobian_matches_finite_differences() {
        let bijectors = [
            Bijector::Unbounded,
            Bijector::LowerBounded { lower: 0.5 },
            Bijector::UpperBounded { upper: 0.5 },
            Bijector::Bounded {
                lower: -1.0,
                width: 3.0,
            },
        ];
        for bijector in bijectors {
            for z in [-1.2, 0.0, 0.7] {
                let expected = finite_difference(|x| bijector.forward(x), z);
                assert_relative_eq!(bijector.jacobian(z), expected, epsilon = 1.0e-5);
            }
        }
    }

    #[test]
    fn grad_log_jacobian_matches_finite_differences() {
        let bijectors = [
            Bijector::LowerBounded { lower: 0.0 },
            Bijector::Bounded {
                lower: 0.0,
                width: 1.0,
            },
        ];
        for bijector in bijectors {
            for z in [-0.9, 0.2, 1.5] {
                let expected = finite_difference(|x| bijector.log_jacobian(x), z);
                assert_relative_eq!(bijector.grad_log_jacobian(z), expected, epsilon = 1.0e-5);
            }
        }
    }

    #[test]
    fn vector_transform_sums_log_jacobians() {
        let transform = ParameterTransform::from_bounds(&[
            (f64::NEG_INFINITY, f64::INFINITY),
            (0.0, f64::INFINITY),
            (0.0, 1.0),
        ]);
        let z = [0.3, -0.6, 1.1];

        let theta = transform.forward(&z);
        assert_eq!(theta.len(), 3);
        assert!(theta[1] > 0.0);
        assert!(theta[2] > 0.0 && theta[2] < 1.0);

        let expected: f64 = transform
            .jacobian_diag(&z)
            .iter()
            .map(|j| j.abs().ln())
            .sum();
        assert_relative_eq!(transform.log_jacobian(&z), expected, epsilon = 1.0e-10);

        let back = transform.inverse(&theta);
        for (original, recovered) in z.iter().zip(&back) {
            assert_relative_eq!(original, recovered, epsilon = 1.0e-9);
        }
    }
}
