//! Core public types for the psychometric module.

use crate::inference::InferenceError;
use crate::input::InputError;
use thiserror::Error;

/// Errors returned by psychometric configuration, validation, and fitting.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PsychometricError {
    #[error(transparent)]
    InvalidInput(#[from] InputError),
    #[error(transparent)]
    Inference(#[from] InferenceError),
    #[error("draw count must be positive")]
    InvalidDraws,
    #[error("fitting requires at least {min} chains; found {found}")]
    InvalidChainCount { min: usize, found: usize },
    #[error("target acceptance rate must lie strictly between 0 and 1")]
    InvalidTargetAccept,
    #[error("maximum tree depth must be positive")]
    InvalidTreeDepth,
    #[error("multi-chain seed stride must be positive")]
    InvalidSeedStride,
    #[error("each chain must retain at least {minimum} draws; found {found}")]
    InsufficientChainDraws { minimum: usize, found: usize },
    #[error("block index {index} out of range for {n_blocks} blocks")]
    BlockIndexOutOfRange { index: usize, n_blocks: usize },
    #[error("credible mass must lie strictly between 0 and 1")]
    InvalidCredibleMass,
    #[error("posterior draws are required")]
    EmptyPosterior,
    #[error("curve parameters must be finite with rates in [0, 1]")]
    InvalidCurveParameters,
    #[error("sampler thread panicked")]
    ChainPanicked,
}

/// Sampler configuration for psychometric fitting.
#[derive(Debug, Clone, Copy)]
pub struct FitOptions {
    /// Post-warmup draws kept per chain.
    pub draws: usize,
    /// Warmup iterations used for adaptation and discarded from reporting.
    pub tune: usize,
    /// Number of independent chains.
    ///
    /// A single chain is permitted; convergence summaries then become
    /// unavailable.
    pub chains: usize,
    /// Average acceptance rate the step size adapts towards.
    pub target_accept: f64,
    /// Maximum NUTS doubling depth per transition.
    pub max_treedepth: usize,
    /// Base RNG seed; `None` draws one from the OS and the fit is not
    /// reproducible.
    pub random_seed: Option<u64>,
    /// Seed increment between adjacent chains.
    ///
    /// Chain `c` samples with `base_seed.wrapping_add(c * seed_stride)`.
    pub seed_stride: u64,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            draws: 1_000,
            tune: 1_000,
            chains: 4,
            target_accept: 0.9,
            max_treedepth: 10,
            random_seed: None,
            seed_stride: 10_000,
        }
    }
}

impl FitOptions {
    /// # Errors
    ///
    /// Returns `PsychometricError` if options are internally inconsistent.
    pub const fn validate(self) -> Result<(), PsychometricError> {
        if self.draws == 0 {
            return Err(PsychometricError::InvalidDraws);
        }
        if self.chains == 0 {
            return Err(PsychometricError::InvalidChainCount { min: 1, found: 0 });
        }
        if !(self.target_accept > 0.0 && self.target_accept < 1.0) {
            return Err(PsychometricError::InvalidTargetAccept);
        }
        if self.max_treedepth == 0 {
            return Err(PsychometricError::InvalidTreeDepth);
        }
        if self.seed_stride == 0 {
            return Err(PsychometricError::InvalidSeedStride);
        }
        Ok(())
    }
}
