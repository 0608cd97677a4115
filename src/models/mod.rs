//! # Models
//!
//! Model implementations for blocked binary-response psychophysics data.
//! Currently a single hierarchy: the partially pooled psychometric function.

pub mod psychometric;
