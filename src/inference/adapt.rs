//! Warmup adaptation: step size by dual averaging, diagonal mass matrix by
//! windowed variance estimation.
//!
//! The schedule follows Stan's warmup layout: an initial fast window tuning
//! only the step size, a sequence of doubling slow windows that each end by
//! re-estimating the mass matrix, and a terminal fast window that settles the
//! step size against the final mass matrix.

/// Dual-averaging controller for the leapfrog step size (Nesterov 2009,
/// Hoffman & Gelman 2014).
#[derive(Debug, Clone)]
pub struct DualAveraging {
    target_accept: f64,
    log_step: f64,
    log_step_avg: f64,
    h_bar: f64,
    mu: f64,
    updates: usize,
}

const SHRINKAGE: f64 = 0.05;
const ITERATION_OFFSET: f64 = 10.0;
const AVERAGING_DECAY: f64 = 0.75;

impl DualAveraging {
    /// Start adapting towards `target_accept` from `init_step`.
    ///
    /// The smoothed estimate starts at `init_step` as well, so the frozen
    /// value is defined even when no updates ever land.
    #[must_use]
    pub fn new(target_accept: f64, init_step: f64) -> Self {
        let log_step = init_step.ln();
        Self {
            target_accept,
            log_step,
            log_step_avg: log_step,
            h_bar: 0.0,
            mu: (10.0 * init_step).ln(),
            updates: 0,
        }
    }

    /// Fold in the acceptance statistic of one transition.
    pub fn update(&mut self, accept_prob: f64) {
        self.updates += 1;
        let m = usize_to_f64(self.updates);

        let w = 1.0 / (m + ITERATION_OFFSET);
        self.h_bar = (1.0 - w).mul_add(self.h_bar, w * (self.target_accept - accept_prob));

        self.log_step = self.mu - m.sqrt() / SHRINKAGE * self.h_bar;
        let eta = m.powf(-AVERAGING_DECAY);
        self.log_step_avg = eta.mul_add(self.log_step, (1.0 - eta) * self.log_step_avg);
    }

    /// Step size to use while still adapting.
    #[must_use]
    pub fn current_step_size(&self) -> f64 {
        self.log_step.exp()
    }

    /// Smoothed step size to freeze after warmup.
    #[must_use]
    pub fn adapted_step_size(&self) -> f64 {
        self.log_step_avg.exp()
    }

    /// Restart adaptation for a new window, keeping `init_step` as the seed.
    pub fn restart(&mut self, init_step: f64) {
        *self = Self::new(self.target_accept, init_step);
    }
}

/// Online variance estimator for the diagonal mass matrix.
#[derive(Debug, Clone)]
pub struct WelfordVariance {
    mean: Vec<f64>,
    m2: Vec<f64>,
    count: usize,
}

impl WelfordVariance {
    #[must_use]
    pub fn new(dim: usize) -> Self {
        Self {
            mean: vec![0.0; dim],
            m2: vec![0.0; dim],
            count: 0,
        }
    }

    /// Fold in one draw.
    pub fn update(&mut self, sample: &[f64]) {
        self.count += 1;
        let n = usize_to_f64(self.count);
        for (i, &value) in sample.iter().enumerate() {
            let delta = value - self.mean[i];
            self.mean[i] += delta / n;
            let delta2 = value - self.mean[i];
            self.m2[i] = delta.mul_add(delta2, self.m2[i]);
        }
    }

    /// Sample variance per dimension, floored away from zero.
    ///
    /// With fewer than two draws the estimate is undefined and the identity
    /// scale `1.0` is returned instead.
    #[must_use]
    pub fn variance(&self) -> Vec<f64> {
        if self.count < 2 {
            return vec![1.0; self.mean.len()];
        }
        let denom = usize_to_f64(self.count) - 1.0;
        self.m2.iter().map(|&m| (m / denom).max(1.0e-10)).collect()
    }

    pub fn reset(&mut self) {
        self.mean.fill(0.0);
        self.m2.fill(0.0);
        self.count = 0;
    }
}

/// Windowed warmup combining step-size and mass-matrix adaptation.
#[derive(Debug, Clone)]
pub struct WarmupSchedule {
    step_size: DualAveraging,
    variance: WelfordVariance,
    windows: Vec<(usize, usize)>,
    current_window: usize,
}

impl WarmupSchedule {
    #[must_use]
    pub fn new(dim: usize, n_warmup: usize, target_accept: f64, init_step: f64) -> Self {
        Self {
            step_size: DualAveraging::new(target_accept, init_step),
            variance: WelfordVariance::new(dim),
            windows: compute_windows(n_warmup),
            current_window: 0,
        }
    }

    /// Fold in one warmup transition.
    ///
    /// Returns the re-estimated inverse mass diagonal when a slow window
    /// closes at `iter`, otherwise `None`. The caller should swap in the new
    /// mass matrix before the next transition.
    pub fn update(&mut self, iter: usize, position: &[f64], accept_prob: f64) -> Option<Vec<f64>> {
        self.step_size.update(accept_prob);

        let Some(&(_, end)) = self.windows.get(self.current_window) else {
            return None;
        };

        // Only the interior slow windows feed the mass matrix estimate.
        let in_slow_window =
            self.current_window > 0 && self.current_window < self.windows.len() - 1;
        if in_slow_window {
            self.variance.update(position);
        }

        let mut new_inv_mass = None;
        if iter + 1 >= end {
            if in_slow_window {
                new_inv_mass = Some(self.variance.variance());
                self.variance.reset();
            }
            let step = self.step_size.adapted_step_size();
            self.step_size.restart(step);
            self.current_window += 1;
        }
        new_inv_mass
    }

    #[must_use]
    pub fn current_step_size(&self) -> f64 {
        self.step_size.current_step_size()
    }

    #[must_use]
    pub fn adapted_step_size(&self) -> f64 {
        self.step_size.adapted_step_size()
    }
}

/// Stan-style warmup windows as `(start, end)` iteration spans.
///
/// Warmups shorter than 50 iterations collapse to a single step-size-only
/// window with no mass matrix updates.
fn compute_windows(n_warmup: usize) -> Vec<(usize, usize)> {
    if n_warmup < 50 {
        return vec![(0, n_warmup)];
    }

    let init_buffer = 75.min(n_warmup / 5);
    let term_buffer = 50.min(n_warmup / 5);
    let slow_end = n_warmup - term_buffer;

    let mut windows = vec![(0, init_buffer)];
    let mut start = init_buffer;
    let mut size = 25;
    while start + size < slow_end {
        windows.push((start, start + size));
        start += size;
        size *= 2;
    }
    windows.push((start, slow_end));
    windows.push((slow_end, n_warmup));
    windows
}

fn usize_to_f64(value: usize) -> f64 {
    f64::from(u32::try_from(value).unwrap_or(u32::MAX))
}
