//! Hierarchical Bayesian psychometric-function fitting.
//!
//! Blocks of a detection or discrimination experiment share partially pooled
//! sigmoid, guess, and lapse parameters. Fitting runs the in-crate No-U-Turn
//! Sampler over a non-centered parameterization and returns posterior draws
//! for summaries, credible bands, convergence diagnostics, and rendered
//! report tables.

pub mod band;
pub mod curve;
pub mod diagnostics;
pub mod likelihood;
pub mod posterior;
pub mod priors;
pub mod report;
pub mod sampler;
pub mod types;

mod init;
mod input;
mod model;

pub use band::{CredibleBand, curve_credible_band};
pub use curve::{PsychometricParams, logit, psychometric, threshold_from_curve};
pub use diagnostics::{
    ConvergenceSummary, ParameterConvergence, autocorrelation, effective_sample_size,
    summarize_convergence,
};
pub use posterior::{
    ChainDraws, FitArtifact, FitSummary, ParameterSummary, PosteriorSummary, PsychometricDraw,
    summarize_fit, summarize_posterior,
};
pub use report::{FitTables, render_fit_tables};
pub use sampler::{fit_points, fit_points_table, fit_trials, fit_trials_table};
pub use types::{FitOptions, PsychometricError};
