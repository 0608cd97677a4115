//! # Inference engine
//!
//! A self-contained No-U-Turn sampler (NUTS) over differentiable targets.
//!
//! Models implement [`LogDensity`] in their natural constrained space; the
//! engine maps every parameter through a bijective transform
//! ([`transforms`]), runs Hamiltonian dynamics in unconstrained space
//! ([`nuts`]), and tunes step size and diagonal mass matrix during warmup
//! ([`adapt`]).

pub mod adapt;
pub mod nuts;
pub mod transforms;

pub use adapt::{DualAveraging, WarmupSchedule, WelfordVariance};
pub use nuts::{NutsChain, sample_chain};
pub use transforms::{Bijector, ParameterTransform};

use thiserror::Error;

/// Errors for NUTS configuration and chain initialization.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum InferenceError {
    #[error("model must expose at least one parameter")]
    EmptyModel,
    #[error("maximum tree depth must be positive")]
    InvalidTreeDepth,
    #[error("target acceptance rate must lie strictly between 0 and 1")]
    InvalidTargetAccept,
    #[error("initial jitter must be finite and non-negative")]
    InvalidInitJitter,
    #[error("log density is not finite at the initial point")]
    NonFiniteInitialDensity,
}

/// Differentiable negative log density over a constrained parameter vector.
///
/// Implementations report open support intervals per parameter via
/// [`LogDensity::bounds`]; the sampler picks a matching bijector for each
/// one, so `nll` and `grad_nll` are only ever called with in-support values.
/// Off-support or overflowing evaluations should return `f64::INFINITY`
/// rather than panic; the sampler treats non-finite energies as divergent.
pub trait LogDensity {
    /// Number of parameters.
    fn dim(&self) -> usize;

    /// Parameter names in positional order, `dim()` entries.
    fn parameter_names(&self) -> Vec<String>;

    /// Open support interval for each parameter.
    fn bounds(&self) -> Vec<(f64, f64)>;

    /// Starting point in constrained space.
    fn initial_position(&self) -> Vec<f64>;

    /// Negative log density up to an additive constant.
    fn nll(&self, theta: &[f64]) -> f64;

    /// Gradient of [`LogDensity::nll`] with respect to `theta`.
    fn grad_nll(&self, theta: &[f64]) -> Vec<f64>;
}

/// Tuning knobs for a single NUTS chain.
#[derive(Debug, Clone, Copy)]
pub struct NutsOptions {
    /// Maximum doubling depth per transition.
    pub max_treedepth: usize,
    /// Average acceptance rate the step size adapts towards.
    pub target_accept: f64,
    /// Standard deviation of the jitter applied to the unconstrained start
    /// point, so parallel chains do not begin in the same state.
    pub init_jitter: f64,
}

impl Default for NutsOptions {
    fn default() -> Self {
        Self {
            max_treedepth: 10,
            target_accept: 0.9,
            init_jitter: 0.1,
        }
    }
}

impl NutsOptions {
    /// # Errors
    ///
    /// Returns `InferenceError` if any knob is out of range.
    pub const fn validate(self) -> Result<(), InferenceError> {
        if self.max_treedepth == 0 {
            return Err(InferenceError::InvalidTreeDepth);
        }
        if !(self.target_accept > 0.0 && self.target_accept < 1.0) {
            return Err(InferenceError::InvalidTargetAccept);
        }
        if !(self.init_jitter.is_finite() && self.init_jitter >= 0.0) {
            return Err(InferenceError::InvalidInitJitter);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_are_valid() {
        assert_eq!(NutsOptions::default().validate(), Ok(()));
    }

    #[test]
    fn options_validation_rejects_zero_depth() {
        let options = NutsOptions {
            max_treedepth: 0,
            ..NutsOptions::default()
        };
        assert_eq!(options.validate(), Err(InferenceError::InvalidTreeDepth));
    }

    #[test]
    fn options_validation_rejects_degenerate_accept_rate() {
        for target_accept in [0.0, 1.0, -0.2, f64::NAN] {
            let options = NutsOptions {
                target_accept,
                ..NutsOptions::default()
            };
            assert_eq!(
                options.validate(),
                Err(InferenceError::InvalidTargetAccept)
            );
        }
    }
}
