//! No-U-Turn sampler with multinomial trajectory selection.
//!
//! Each transition rejuvenates the momentum, then doubles a leapfrog
//! trajectory in random directions until it turns back on itself or the depth
//! cap is hit. The next state is drawn among trajectory states with
//! probability proportional to `exp(-energy_error)` (Betancourt 2017).
//! Warmup adapts the step size and diagonal mass matrix through
//! [`WarmupSchedule`].

use std::f64::consts::TAU;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::adapt::WarmupSchedule;
use super::transforms::ParameterTransform;
use super::{InferenceError, LogDensity, NutsOptions};

/// Energy error above which a trajectory leg is declared divergent.
const DIVERGENCE_THRESHOLD: f64 = 1000.0;

/// Draws and diagnostics from a single chain.
#[derive(Debug, Clone)]
pub struct NutsChain {
    /// Constrained-space draws, one parameter vector per kept iteration.
    pub draws: Vec<Vec<f64>>,
    /// Divergence flag per kept iteration.
    pub divergences: Vec<bool>,
    /// Number of completed doublings per kept iteration.
    pub tree_depths: Vec<usize>,
    /// Mean leapfrog acceptance statistic per kept iteration.
    pub accept_probs: Vec<f64>,
    /// Hamiltonian at the start of each kept trajectory.
    pub energies: Vec<f64>,
    /// Step size frozen at the end of warmup.
    pub step_size: f64,
    /// Inverse mass diagonal frozen at the end of warmup.
    pub inv_mass: Vec<f64>,
}

/// Model negative log density reparameterized to unconstrained space.
///
/// The potential is `U(z) = nll(theta(z)) - ln |J(z)|`, so sampling `z` and
/// mapping forward yields draws from the constrained-space density.
struct UnconstrainedTarget<'a, M: LogDensity + ?Sized> {
    model: &'a M,
    transform: ParameterTransform,
}

impl<M: LogDensity + ?Sized> UnconstrainedTarget<'_, M> {
    fn potential(&self, z: &[f64]) -> f64 {
        let theta = self.transform.forward(z);
        self.model.nll(&theta) - self.transform.log_jacobian(z)
    }

    fn gradient(&self, z: &[f64]) -> Vec<f64> {
        let theta = self.transform.forward(z);
        let grad_theta = self.model.grad_nll(&theta);
        let jacobian = self.transform.jacobian_diag(z);
        let grad_log_jacobian = self.transform.grad_log_jacobian(z);
        grad_theta
            .iter()
            .zip(&jacobian)
            .zip(&grad_log_jacobian)
            .map(|((&g, &j), &dj)| g.mul_add(j, -dj))
            .collect()
    }
}

/// Point in phase space with cached potential and gradient.
#[derive(Debug, Clone)]
struct PhaseState {
    position: Vec<f64>,
    momentum: Vec<f64>,
    potential: f64,
    gradient: Vec<f64>,
}

impl PhaseState {
    fn hamiltonian(&self, inv_mass: &[f64]) -> f64 {
        let kinetic: f64 = self
            .momentum
            .iter()
            .zip(inv_mass)
            .map(|(&p, &m)| 0.5 * m * p * p)
            .sum();
        self.potential + kinetic
    }
}

/// One leapfrog step of size `direction * step_size`.
fn leapfrog<M: LogDensity + ?Sized>(
    target: &UnconstrainedTarget<'_, M>,
    state: &PhaseState,
    step_size: f64,
    direction: f64,
    inv_mass: &[f64],
) -> PhaseState {
    let eps = direction * step_size;
    let half = 0.5 * eps;

    let mut momentum: Vec<f64> = state
        .momentum
        .iter()
        .zip(&state.gradient)
        .map(|(&p, &g)| half.mul_add(-g, p))
        .collect();
    let position: Vec<f64> = state
        .position
        .iter()
        .zip(&momentum)
        .zip(inv_mass)
        .map(|((&q, &p), &m)| (eps * m).mul_add(p, q))
        .collect();
    let gradient = target.gradient(&position);
    for (p, &g) in momentum.iter_mut().zip(&gradient) {
        *p = half.mul_add(-g, *p);
    }
    let potential = target.potential(&position);

    PhaseState {
        position,
        momentum,
        potential,
        gradient,
    }
}

/// No-U-turn criterion over the span between two trajectory ends.
fn is_turning(left: &PhaseState, right: &PhaseState, inv_mass: &[f64]) -> bool {
    let mut dot_left = 0.0;
    let mut dot_right = 0.0;
    for i in 0..inv_mass.len() {
        let dq = (right.position[i] - left.position[i]) * inv_mass[i];
        dot_left = dq.mul_add(left.momentum[i], dot_left);
        dot_right = dq.mul_add(right.momentum[i], dot_right);
    }
    dot_left < 0.0 || dot_right < 0.0
}

fn log_sum_exp(a: f64, b: f64) -> f64 {
    let max = a.max(b);
    if max == f64::NEG_INFINITY {
        f64::NEG_INFINITY
    } else {
        max + ((a - max).exp() + (b - max).exp()).ln()
    }
}

/// Contiguous stretch of a trajectory with its multinomial bookkeeping.
struct Trajectory {
    left: PhaseState,
    right: PhaseState,
    proposal: PhaseState,
    log_sum_weight: f64,
    n_leapfrog: usize,
    sum_accept: f64,
    divergent: bool,
    turning: bool,
}

/// Extend by one leapfrog step away from `from`.
fn build_leaf<M: LogDensity + ?Sized>(
    target: &UnconstrainedTarget<'_, M>,
    from: &PhaseState,
    direction: f64,
    h0: f64,
    step_size: f64,
    inv_mass: &[f64],
) -> Trajectory {
    let next = leapfrog(target, from, step_size, direction, inv_mass);
    let energy_error = next.hamiltonian(inv_mass) - h0;
    let divergent = !energy_error.is_finite() || energy_error > DIVERGENCE_THRESHOLD;

    let log_weight = if divergent {
        f64::NEG_INFINITY
    } else {
        -energy_error
    };
    let accept = if energy_error.is_finite() {
        (-energy_error).exp().min(1.0)
    } else {
        0.0
    };

    Trajectory {
        left: next.clone(),
        right: next.clone(),
        proposal: next,
        log_sum_weight: log_weight,
        n_leapfrog: 1,
        sum_accept: accept,
        divergent,
        turning: false,
    }
}

/// Recursively build a balanced subtree of `2^depth` leapfrog steps.
#[allow(clippy::too_many_arguments)]
fn build_tree<M: LogDensity + ?Sized>(
    target: &UnconstrainedTarget<'_, M>,
    from: &PhaseState,
    depth: usize,
    direction: f64,
    h0: f64,
    step_size: f64,
    inv_mass: &[f64],
    rng: &mut StdRng,
) -> Trajectory {
    if depth == 0 {
        return build_leaf(target, from, direction, h0, step_size, inv_mass);
    }

    let mut inner = build_tree(
        target,
        from,
        depth - 1,
        direction,
        h0,
        step_size,
        inv_mass,
        rng,
    );
    if inner.divergent || inner.turning {
        return inner;
    }

    let edge = if direction > 0.0 {
        inner.right.clone()
    } else {
        inner.left.clone()
    };
    let outer = build_tree(
        target,
        &edge,
        depth - 1,
        direction,
        h0,
        step_size,
        inv_mass,
        rng,
    );

    inner.n_leapfrog += outer.n_leapfrog;
    inner.sum_accept += outer.sum_accept;
    inner.divergent = inner.divergent || outer.divergent;
    inner.turning = inner.turning || outer.turning;

    // A broken second half invalidates the whole subtree; the caller rejects
    // it, so its states must not enter the proposal pool.
    if !(outer.divergent || outer.turning) {
        let merged = log_sum_exp(inner.log_sum_weight, outer.log_sum_weight);
        if rng.random::<f64>() < (outer.log_sum_weight - merged).exp() {
            inner.proposal = outer.proposal;
        }
        inner.log_sum_weight = merged;
    }

    if direction > 0.0 {
        inner.right = outer.right;
    } else {
        inner.left = outer.left;
    }
    if !inner.turning {
        inner.turning = is_turning(&inner.left, &inner.right, inv_mass);
    }
    inner
}

/// Outcome of one NUTS transition.
struct Transition {
    state: PhaseState,
    depth: usize,
    divergent: bool,
    accept_prob: f64,
    energy: f64,
}

fn transition<M: LogDensity + ?Sized>(
    target: &UnconstrainedTarget<'_, M>,
    current: &PhaseState,
    max_treedepth: usize,
    step_size: f64,
    inv_mass: &[f64],
    rng: &mut StdRng,
) -> Transition {
    let mut state = current.clone();
    for (p, &m) in state.momentum.iter_mut().zip(inv_mass) {
        *p = sample_standard_normal(rng) / m.sqrt();
    }
    let h0 = state.hamiltonian(inv_mass);

    let mut trajectory = Trajectory {
        left: state.clone(),
        right: state.clone(),
        proposal: state,
        log_sum_weight: 0.0,
        n_leapfrog: 0,
        sum_accept: 0.0,
        divergent: false,
        turning: false,
    };

    let mut depth = 0;
    while depth < max_treedepth {
        let direction: f64 = if rng.random::<bool>() { 1.0 } else { -1.0 };
        let edge = if direction > 0.0 {
            trajectory.right.clone()
        } else {
            trajectory.left.clone()
        };
        let subtree = build_tree(
            target, &edge, depth, direction, h0, step_size, inv_mass, rng,
        );

        trajectory.n_leapfrog += subtree.n_leapfrog;
        trajectory.sum_accept += subtree.sum_accept;

        if subtree.divergent || subtree.turning {
            trajectory.divergent = trajectory.divergent || subtree.divergent;
            trajectory.turning = trajectory.turning || subtree.turning;
            break;
        }

        let merged = log_sum_exp(trajectory.log_sum_weight, subtree.log_sum_weight);
        if rng.random::<f64>() < (subtree.log_sum_weight - merged).exp() {
            trajectory.proposal = subtree.proposal.clone();
        }
        trajectory.log_sum_weight = merged;
        if direction > 0.0 {
            trajectory.right = subtree.right;
        } else {
            trajectory.left = subtree.left;
        }

        depth += 1;
        if is_turning(&trajectory.left, &trajectory.right, inv_mass) {
            break;
        }
    }

    let accept_prob = trajectory.sum_accept / usize_to_f64(trajectory.n_leapfrog.max(1));
    Transition {
        state: trajectory.proposal,
        depth,
        divergent: trajectory.divergent,
        accept_prob,
        energy: h0,
    }
}

/// Step-size search by doubling or halving until the one-step acceptance
/// probability crosses one half (Hoffman & Gelman 2014, algorithm 4).
fn find_reasonable_step_size<M: LogDensity + ?Sized>(
    target: &UnconstrainedTarget<'_, M>,
    state: &PhaseState,
    inv_mass: &[f64],
) -> f64 {
    let mut probe = state.clone();
    probe.momentum.fill(1.0);
    let h0 = probe.hamiltonian(inv_mass);

    let accept_after_step = |step: f64| -> Option<f64> {
        let next = leapfrog(target, &probe, step, 1.0, inv_mass);
        let accept = (h0 - next.hamiltonian(inv_mass)).exp();
        if accept.is_finite() {
            Some(accept.min(1.0))
        } else {
            None
        }
    };

    let mut step = 0.1;
    let first = match accept_after_step(step) {
        Some(accept) => accept,
        None => {
            step = 1.0e-3;
            match accept_after_step(step) {
                Some(accept) => accept,
                None => return 1.0e-3,
            }
        }
    };

    let grow = first > 0.5;
    for _ in 0..50 {
        let next_step = if grow { step * 2.0 } else { step * 0.5 };
        if !(1.0e-10..=1.0e3).contains(&next_step) {
            break;
        }
        match accept_after_step(next_step) {
            Some(accept) => {
                step = next_step;
                if grow == (accept < 0.5) {
                    break;
                }
            }
            None => break,
        }
    }

    step.clamp(1.0e-8, 1.0e3)
}

/// Run one NUTS chain: warmup with adaptation, then `n_draws` kept draws.
///
/// Draws are returned in constrained space. The chain is deterministic given
/// `seed`.
///
/// # Errors
///
/// Returns `InferenceError` if `options` is invalid, the model has no
/// parameters, or the density is not finite at the initial point.
pub fn sample_chain<M: LogDensity + ?Sized>(
    model: &M,
    n_warmup: usize,
    n_draws: usize,
    seed: u64,
    options: NutsOptions,
) -> Result<NutsChain, InferenceError> {
    options.validate()?;
    let dim = model.dim();
    if dim == 0 {
        return Err(InferenceError::EmptyModel);
    }

    let target = UnconstrainedTarget {
        model,
        transform: ParameterTransform::from_bounds(&model.bounds()),
    };
    let mut rng = StdRng::seed_from_u64(seed);

    let mut position = target.transform.inverse(&model.initial_position());
    if options.init_jitter > 0.0 {
        for z in &mut position {
            *z = options
                .init_jitter
                .mul_add(sample_standard_normal(&mut rng), *z);
        }
    }

    let potential = target.potential(&position);
    if !potential.is_finite() {
        return Err(InferenceError::NonFiniteInitialDensity);
    }
    let gradient = target.gradient(&position);
    let mut state = PhaseState {
        position,
        momentum: vec![0.0; dim],
        potential,
        gradient,
    };

    let mut inv_mass = vec![1.0; dim];
    let init_step = find_reasonable_step_size(&target, &state, &inv_mass);
    let mut schedule = WarmupSchedule::new(dim, n_warmup, options.target_accept, init_step);

    for iter in 0..n_warmup {
        let step_size = schedule.current_step_size();
        let draw = transition(
            &target,
            &state,
            options.max_treedepth,
            step_size,
            &inv_mass,
            &mut rng,
        );
        state = draw.state;
        if let Some(new_inv_mass) = schedule.update(iter, &state.position, draw.accept_prob) {
            inv_mass = new_inv_mass;
        }
    }

    let step_size = if n_warmup > 0 {
        schedule.adapted_step_size()
    } else {
        init_step
    };

    let mut draws = Vec::with_capacity(n_draws);
    let mut divergences = Vec::with_capacity(n_draws);
    let mut tree_depths = Vec::with_capacity(n_draws);
    let mut accept_probs = Vec::with_capacity(n_draws);
    let mut energies = Vec::with_capacity(n_draws);

    for _ in 0..n_draws {
        let draw = transition(
            &target,
            &state,
            options.max_treedepth,
            step_size,
            &inv_mass,
            &mut rng,
        );
        state = draw.state;

        draws.push(target.transform.forward(&state.position));
        divergences.push(draw.divergent);
        tree_depths.push(draw.depth);
        accept_probs.push(draw.accept_prob);
        energies.push(draw.energy);
    }

    Ok(NutsChain {
        draws,
        divergences,
        tree_depths,
        accept_probs,
        energies,
        step_size,
        inv_mass,
    })
}

fn sample_standard_normal<R: Rng>(rng: &mut R) -> f64 {
    let u1: f64 = rng.random::<f64>().max(1.0e-12);
    let u2: f64 = rng.random();
    (-2.0 * u1.ln()).sqrt() * (TAU * u2).cos()
}

fn usize_to_f64(value: usize) -> f64 {
    f64::from(u32::try_from(value).unwrap_or(u32::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StandardGaussian {
        dim: usize,
    }

    impl LogDensity for StandardGaussian {
        fn dim(&self) -> usize {
            self.dim
        }

        fn parameter_names(&self) -> Vec<String> {
            (0..self.dim).map(|i| format!("z[{i}]")).collect()
        }

        fn bounds(&self) -> Vec<(f64, f64)> {
            vec![(f64::NEG_INFINITY, f64::INFINITY); self.dim]
        }

        fn initial_position(&self) -> Vec<f64> {
            vec![0.5; self.dim]
        }

        fn nll(&self, theta: &[f64]) -> f64 {
            theta.iter().map(|&x| 0.5 * x * x).sum()
        }

        fn grad_nll(&self, theta: &[f64]) -> Vec<f64> {
            theta.to_vec()
        }
    }

    /// Half-normal target, so sampling runs through the exp transform.
    struct HalfGaussian;

    impl LogDensity for HalfGaussian {
        fn dim(&self) -> usize {
            1
        }

        fn parameter_names(&self) -> Vec<String> {
            vec!["scale".to_string()]
        }

        fn bounds(&self) -> Vec<(f64, f64)> {
            vec![(0.0, f64::INFINITY)]
        }

        fn initial_position(&self) -> Vec<f64> {
            vec![1.0]
        }

        fn nll(&self, theta: &[f64]) -> f64 {
            0.5 * theta[0] * theta[0]
        }

        fn grad_nll(&self, theta: &[f64]) -> Vec<f64> {
            vec![theta[0]]
        }
    }

    #[test]
    fn chain_has_requested_shape() {
        let model = StandardGaussian { dim: 3 };
        let chain = sample_chain(&model, 100, 50, 42, NutsOptions::default()).unwrap();

        assert_eq!(chain.draws.len(), 50);
        assert_eq!(chain.divergences.len(), 50);
        assert_eq!(chain.tree_depths.len(), 50);
        assert_eq!(chain.accept_probs.len(), 50);
        assert_eq!(chain.energies.len(), 50);
        for draw in &chain.draws {
            assert_eq!(draw.len(), 3);
            assert!(draw.iter().all(|v| v.is_finite()));
        }
        assert!(chain.step_size.is_finite() && chain.step_size > 0.0);
    }

    #[test]
    fn chain_is_deterministic_for_a_seed() {
        let model = StandardGaussian { dim: 2 };
        let first = sample_chain(&model, 60, 40, 7, NutsOptions::default()).unwrap();
        let second = sample_chain(&model, 60, 40, 7, NutsOptions::default()).unwrap();
        assert_eq!(first.draws, second.draws);
        assert_eq!(first.energies, second.energies);
    }

    #[test]
    fn gaussian_moments_are_recovered() {
        let model = StandardGaussian { dim: 2 };
        let chain = sample_chain(&model, 300, 500, 42, NutsOptions::default()).unwrap();

        for i in 0..2 {
            let mean: f64 =
                chain.draws.iter().map(|d| d[i]).sum::<f64>() / usize_to_f64(chain.draws.len());
            assert!(mean.abs() < 0.3, "posterior mean too far from zero: {mean}");
        }
        let n_divergent = chain.divergences.iter().filter(|&&d| d).count();
        assert!(n_divergent < 50, "too many divergences: {n_divergent}");
    }

    #[test]
    fn bounded_target_stays_in_support() {
        let chain = sample_chain(&HalfGaussian, 300, 500, 11, NutsOptions::default()).unwrap();

        assert!(chain.draws.iter().all(|d| d[0] > 0.0));
        let mean: f64 =
            chain.draws.iter().map(|d| d[0]).sum::<f64>() / usize_to_f64(chain.draws.len());
        // Half-normal mean is sqrt(2/pi), roughly 0.80.
        assert!((mean - 0.798).abs() < 0.2, "half-normal mean off: {mean}");
    }

    #[test]
    fn zero_dimensional_model_is_rejected() {
        let model = StandardGaussian { dim: 0 };
        let error = sample_chain(&model, 10, 10, 1, NutsOptions::default()).unwrap_err();
        assert_eq!(error, InferenceError::EmptyModel);
    }

    #[test]
    fn invalid_options_are_rejected() {
        let model = StandardGaussian { dim: 1 };
        let options = NutsOptions {
            target_accept: 1.5,
            ..NutsOptions::default()
        };
        let error = sample_chain(&model, 10, 10, 1, options).unwrap_err();
        assert_eq!(error, InferenceError::InvalidTargetAccept);
    }
}
