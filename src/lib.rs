#![forbid(unsafe_code)]

//! # `psychometric_models`
//!
//! Hierarchical Bayesian fitting for psychometric functions over blocked
//! detection and discrimination experiments: trial-level Bernoulli and
//! aggregated beta-binomial observation models, a non-centered partial
//! pooling hierarchy, and an in-crate No-U-Turn Sampler with posterior
//! summaries, credible bands, convergence diagnostics, and rendered report
//! tables.
//!
//! The crate was initially developed for auditory detection studies, but the
//! API is intentionally domain-agnostic: any binary-outcome intensity sweep
//! grouped into measurement blocks fits the same workflow.

pub mod inference;
pub mod input;
pub mod models;
pub mod preprocess;
pub mod utils;

pub use inference::{InferenceError, LogDensity, NutsOptions};
pub use input::{DataTable, InputError, PointData, TrialData};
pub use preprocess::{
    ResponseDiagnostics, Standardizer, intensity_has_variation, response_diagnostics,
};

pub use models::psychometric::{
    ChainDraws, ConvergenceSummary, CredibleBand, FitArtifact, FitOptions, FitSummary, FitTables,
    ParameterConvergence, ParameterSummary, PosteriorSummary, PsychometricDraw, PsychometricError,
    PsychometricParams, autocorrelation, curve_credible_band, effective_sample_size, fit_points,
    fit_points_table, fit_trials, fit_trials_table, logit, psychometric, render_fit_tables,
    summarize_convergence, summarize_fit, summarize_posterior, threshold_from_curve,
};
