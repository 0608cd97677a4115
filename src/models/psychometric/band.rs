//! Pointwise credible bands around a block's fitted curve.

use super::likelihood::logistic_stable;
use super::posterior::{FitArtifact, percentile};
use super::types::PsychometricError;

/// Central credible band evaluated at a set of query intensities.
#[derive(Debug, Clone)]
pub struct CredibleBand {
    /// Query intensities in original units, as passed in.
    pub intensity: Vec<f64>,
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
    pub credible_mass: f64,
}

/// Pointwise central credible band of the response curve for one block.
///
/// Every pooled draw's curve is evaluated at each query intensity; the band
/// edges are the `(1 - mass) / 2` and `(1 + mass) / 2` quantiles of those
/// values.
///
/// # Errors
///
/// Returns `PsychometricError` when the credible mass is not strictly
/// between 0 and 1, the block index is unknown, or the artifact holds no
/// draws.
pub fn curve_credible_band(
    artifact: &FitArtifact,
    intensities: &[f64],
    block: usize,
    credible_mass: f64,
) -> Result<CredibleBand, PsychometricError> {
    if !(credible_mass > 0.0 && credible_mass < 1.0) {
        return Err(PsychometricError::InvalidCredibleMass);
    }
    if block >= artifact.n_blocks() {
        return Err(PsychometricError::BlockIndexOutOfRange {
            index: block,
            n_blocks: artifact.n_blocks(),
        });
    }
    if artifact.is_empty() {
        return Err(PsychometricError::EmptyPosterior);
    }

    let tail = 0.5 * (1.0 - credible_mass);
    let mut lower = Vec::with_capacity(intensities.len());
    let mut upper = Vec::with_capacity(intensities.len());
    for &x in intensities {
        let z = (x - artifact.x_mean) / artifact.x_std;
        let mut values: Vec<f64> = artifact
            .pooled_draws()
            .map(|draw| {
                let s = logistic_stable(draw.slope[block].mul_add(z, draw.intercept[block]));
                (1.0 - draw.gamma[block] - draw.lambda[block]).mul_add(s, draw.gamma[block])
            })
            .collect();
        values.sort_by(f64::total_cmp);
        lower.push(percentile(&values, tail));
        upper.push(percentile(&values, 1.0 - tail));
    }

    Ok(CredibleBand {
        intensity: intensities.to_vec(),
        lower,
        upper,
        credible_mass,
    })
}
