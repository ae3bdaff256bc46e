//! Low-level fitting routines.
//!
//! Given observed `(t_i, q_i)` and a `FitConfiguration`, minimize the sum of
//! squared residuals between observations and the decline model over the
//! free parameters, subject to box bounds. Fixed parameters are baked into
//! the objective as constants; only free parameters are exposed to the
//! optimizer.
//!
//! Three interchangeable methods share that contract:
//!
//! - `CurveFit`: damped Gauss–Newton (Levenberg–Marquardt) with a
//!   forward-difference Jacobian and bound projection. Fast; raises on
//!   divergence.
//! - `MonteCarlo`: bounded uniform sampling plus a shrinking Gaussian
//!   refinement stage around the incumbent.
//! - `DifferentialEvolution`: rand/1/bin population search over the box.
//!
//! Failure (non-convergence, non-finite objective everywhere) is signalled
//! as an `OptimizationDivergence` error; the fitter never silently
//! substitutes defaults.
//!
//! The stochastic methods are seeded deterministically by hashing the
//! inputs, so repeated runs over the same data reproduce the same fit.

use std::hash::{Hash, Hasher};

use nalgebra::{DMatrix, DVector};
use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::Normal;
use rayon::prelude::*;

use crate::domain::FitMethod;
use crate::error::CoreError;
use crate::fit::config::FitConfiguration;
use crate::models::predict_rates;

const LM_MAX_ITER: usize = 100;
const LM_LAMBDA_INIT: f64 = 1e-3;
const LM_LAMBDA_UP: f64 = 4.0;
const LM_LAMBDA_DOWN: f64 = 3.0;

/// Bounded SSE objective with fixed parameters substituted.
struct Objective<'a> {
    t: &'a [f64],
    q: &'a [f64],
    config: &'a FitConfiguration,
}

impl Objective<'_> {
    /// Sum of squared residuals; infinite for candidates that violate the
    /// physical parameter envelope or produce non-finite rates.
    fn sse(&self, free: &[f64]) -> f64 {
        let params = match self.config.assemble(free) {
            Ok(p) => p,
            Err(_) => return f64::INFINITY,
        };
        let pred = predict_rates(&params, self.t);
        let mut sse = 0.0;
        for (&obs, &fit) in self.q.iter().zip(pred.iter()) {
            if !fit.is_finite() {
                return f64::INFINITY;
            }
            let r = obs - fit;
            sse += r * r;
        }
        if sse.is_finite() { sse } else { f64::INFINITY }
    }

    /// Residual vector (observed - predicted), or `None` on a non-finite
    /// candidate.
    fn residuals(&self, free: &[f64]) -> Option<DVector<f64>> {
        let params = self.config.assemble(free).ok()?;
        let pred = predict_rates(&params, self.t);
        if pred.iter().any(|v| !v.is_finite()) {
            return None;
        }
        Some(DVector::from_iterator(
            self.q.len(),
            self.q.iter().zip(pred.iter()).map(|(&obs, &fit)| obs - fit),
        ))
    }
}

/// Fit the free parameters of `config` to observed data.
///
/// Returns the optimized free values in canonical order (`Qi, Dei, Def, b`
/// restricted to the free set). `trials` is the sampling/generation budget
/// for the stochastic methods and is ignored by `CurveFit`.
pub fn perform_curve_fit(
    t: &[f64],
    q: &[f64],
    config: &FitConfiguration,
    method: FitMethod,
    trials: usize,
) -> Result<Vec<f64>, CoreError> {
    if t.len() != q.len() {
        return Err(CoreError::configuration(format!(
            "time/rate length mismatch: {} vs {}",
            t.len(),
            q.len()
        )));
    }
    if t.len() < config.free_len() {
        return Err(CoreError::data_insufficiency(format!(
            "{} points cannot constrain {} free parameters",
            t.len(),
            config.free_len()
        )));
    }

    let objective = Objective { t, q, config };
    match method {
        FitMethod::CurveFit => levenberg_marquardt(&objective, config),
        FitMethod::MonteCarlo => monte_carlo(&objective, config, trials, fit_seed(t, q, 1)),
        FitMethod::DifferentialEvolution => {
            differential_evolution(&objective, config, trials, fit_seed(t, q, 2))
        }
    }
}

/// Deterministic seed derived from the data, so stochastic fits are
/// reproducible without threading an RNG through the pipeline.
fn fit_seed(t: &[f64], q: &[f64], method_tag: u64) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    method_tag.hash(&mut hasher);
    for &v in t {
        v.to_bits().hash(&mut hasher);
    }
    for &v in q {
        v.to_bits().hash(&mut hasher);
    }
    hasher.finish()
}

fn clamp_to_bounds(free: &mut [f64], bounds: &[(f64, f64)]) {
    for (v, &(low, high)) in free.iter_mut().zip(bounds.iter()) {
        *v = v.clamp(low, high);
    }
}

// ---------------------------------------------------------------------------
// Deterministic least squares
// ---------------------------------------------------------------------------

fn levenberg_marquardt(
    objective: &Objective<'_>,
    config: &FitConfiguration,
) -> Result<Vec<f64>, CoreError> {
    let bounds = config.bounds();
    let mut theta = config.initial_guess();
    clamp_to_bounds(&mut theta, &bounds);

    let mut sse = objective.sse(&theta);
    if !sse.is_finite() {
        return Err(CoreError::divergence(
            "objective is non-finite at the initial guess",
        ));
    }

    let n = objective.t.len();
    let p = theta.len();
    let mut lambda = LM_LAMBDA_INIT;

    for _ in 0..LM_MAX_ITER {
        let Some(residuals) = objective.residuals(&theta) else {
            return Err(CoreError::divergence("model became non-finite mid-fit"));
        };

        // Forward-difference Jacobian of the model w.r.t. the free
        // parameters, respecting bounds when stepping.
        let mut jacobian = DMatrix::<f64>::zeros(n, p);
        for j in 0..p {
            let step = 1e-6_f64.max(theta[j].abs() * 1e-6);
            let mut perturbed = theta.clone();
            let (low, high) = bounds[j];
            let signed = if theta[j] + step <= high { step } else { -step };
            perturbed[j] = (theta[j] + signed).clamp(low, high);
            let actual = perturbed[j] - theta[j];
            if actual == 0.0 {
                continue;
            }
            let Some(shifted) = objective.residuals(&perturbed) else {
                return Err(CoreError::divergence("model became non-finite mid-fit"));
            };
            for i in 0..n {
                // residual = obs - model, so d(model)/dθ = -d(residual)/dθ.
                jacobian[(i, j)] = -(shifted[i] - residuals[i]) / actual;
            }
        }

        let jt = jacobian.transpose();
        let gram = &jt * &jacobian;
        let gradient = &jt * &residuals;

        // Inner damping loop: grow lambda until a step improves the SSE.
        let mut improved = false;
        for _ in 0..8 {
            let mut damped = gram.clone();
            for d in 0..p {
                damped[(d, d)] += lambda * (gram[(d, d)].max(1e-12));
            }
            let Some(delta) = solve_normal_equations(&damped, &gradient) else {
                lambda *= LM_LAMBDA_UP;
                continue;
            };

            let mut candidate = theta.clone();
            for j in 0..p {
                candidate[j] += delta[j];
            }
            clamp_to_bounds(&mut candidate, &bounds);

            let candidate_sse = objective.sse(&candidate);
            if candidate_sse < sse {
                let converged = (sse - candidate_sse) <= 1e-12 * (1.0 + sse);
                theta = candidate;
                sse = candidate_sse;
                lambda = (lambda / LM_LAMBDA_DOWN).max(1e-12);
                improved = true;
                if converged {
                    return finish(theta, sse);
                }
                break;
            }
            lambda *= LM_LAMBDA_UP;
        }

        if !improved {
            // No damping level produced progress; treat the current point as
            // the solution if it is finite, which it is by construction.
            return finish(theta, sse);
        }
    }

    finish(theta, sse)
}

fn finish(theta: Vec<f64>, sse: f64) -> Result<Vec<f64>, CoreError> {
    if sse.is_finite() && theta.iter().all(|v| v.is_finite()) {
        Ok(theta)
    } else {
        Err(CoreError::divergence("least-squares fit did not converge"))
    }
}

/// Solve the damped normal equations via SVD, tolerating near-singular
/// systems with progressively looser tolerances.
fn solve_normal_equations(a: &DMatrix<f64>, b: &DVector<f64>) -> Option<DVector<f64>> {
    let svd = a.clone().svd(true, true);
    for &tol in &[1e-12, 1e-9, 1e-6] {
        if let Ok(x) = svd.solve(b, tol) {
            if x.iter().all(|v| v.is_finite()) {
                return Some(x);
            }
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Stochastic sampling
// ---------------------------------------------------------------------------

/// Number of Gaussian refinement rounds after the uniform sweep.
const MC_REFINE_ROUNDS: usize = 3;

fn monte_carlo(
    objective: &Objective<'_>,
    config: &FitConfiguration,
    trials: usize,
    seed: u64,
) -> Result<Vec<f64>, CoreError> {
    let bounds = config.bounds();
    let trials = trials.max(64);
    let mut rng = StdRng::seed_from_u64(seed);

    // Stage 1: uniform sweep of the box, including the configured guess.
    let mut candidates: Vec<Vec<f64>> = Vec::with_capacity(trials);
    candidates.push(config.initial_guess());
    for _ in 1..trials {
        candidates.push(
            bounds
                .iter()
                .map(|&(low, high)| rng.gen_range(low..=high))
                .collect(),
        );
    }

    let mut best = best_candidate(objective, candidates);

    // Stage 2: shrink a Gaussian around the incumbent, concentrating the
    // remaining draws near the mode instead of re-sweeping the box.
    let mut scales: Vec<f64> = bounds.iter().map(|&(low, high)| (high - low) / 10.0).collect();
    for _ in 0..MC_REFINE_ROUNDS {
        let Some((center, _)) = best.clone() else { break };
        let round: Vec<Vec<f64>> = (0..trials / 4 + 1)
            .map(|_| {
                center
                    .iter()
                    .zip(scales.iter())
                    .zip(bounds.iter())
                    .map(|((&c, &s), &(low, high))| {
                        let draw = if s > 0.0 {
                            Normal::new(c, s).map(|d| d.sample(&mut rng)).unwrap_or(c)
                        } else {
                            c
                        };
                        draw.clamp(low, high)
                    })
                    .collect()
            })
            .collect();

        if let Some((theta, sse)) = best_candidate(objective, round) {
            if best.as_ref().is_none_or(|(_, b)| sse < *b) {
                best = Some((theta, sse));
            }
        }
        for s in &mut scales {
            *s *= 0.5;
        }
    }

    match best {
        Some((theta, _)) => Ok(theta),
        None => Err(CoreError::divergence(
            "no finite-objective candidate found in monte carlo sweep",
        )),
    }
}

/// Evaluate candidates in parallel and keep the lowest finite SSE.
fn best_candidate(
    objective: &Objective<'_>,
    candidates: Vec<Vec<f64>>,
) -> Option<(Vec<f64>, f64)> {
    candidates
        .into_par_iter()
        .map(|theta| {
            let sse = objective.sse(&theta);
            (theta, sse)
        })
        .filter(|(_, sse)| sse.is_finite())
        .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
}

// ---------------------------------------------------------------------------
// Differential evolution
// ---------------------------------------------------------------------------

const DE_WEIGHT: f64 = 0.8;
const DE_CROSSOVER: f64 = 0.9;

fn differential_evolution(
    objective: &Objective<'_>,
    config: &FitConfiguration,
    trials: usize,
    seed: u64,
) -> Result<Vec<f64>, CoreError> {
    let bounds = config.bounds();
    let dim = bounds.len();
    let pop_size = (15 * dim).max(30);
    let generations = (trials / pop_size).max(20);
    let mut rng = StdRng::seed_from_u64(seed);

    // Seed the population with the configured guess plus uniform draws.
    let mut population: Vec<Vec<f64>> = Vec::with_capacity(pop_size);
    population.push(config.initial_guess());
    for _ in 1..pop_size {
        population.push(
            bounds
                .iter()
                .map(|&(low, high)| rng.gen_range(low..=high))
                .collect(),
        );
    }
    let mut fitness: Vec<f64> = population.par_iter().map(|m| objective.sse(m)).collect();

    for _ in 0..generations {
        // Build all trial vectors first (sequential RNG), evaluate in
        // parallel, then select.
        let trials_gen: Vec<Vec<f64>> = (0..pop_size)
            .map(|i| {
                let (a, b, c) = distinct_indices(&mut rng, pop_size, i);
                let j_rand = rng.gen_range(0..dim);
                (0..dim)
                    .map(|j| {
                        let v = if rng.r#gen::<f64>() < DE_CROSSOVER || j == j_rand {
                            population[a][j] + DE_WEIGHT * (population[b][j] - population[c][j])
                        } else {
                            population[i][j]
                        };
                        let (low, high) = bounds[j];
                        v.clamp(low, high)
                    })
                    .collect()
            })
            .collect();

        let trial_fitness: Vec<f64> = trials_gen.par_iter().map(|m| objective.sse(m)).collect();
        for i in 0..pop_size {
            if trial_fitness[i] <= fitness[i] {
                population[i] = trials_gen[i].clone();
                fitness[i] = trial_fitness[i];
            }
        }
    }

    let mut best_idx = None;
    for (i, &f) in fitness.iter().enumerate() {
        if f.is_finite() && best_idx.map(|j: usize| f < fitness[j]).unwrap_or(true) {
            best_idx = Some(i);
        }
    }
    match best_idx {
        Some(i) => Ok(population[i].clone()),
        None => Err(CoreError::divergence(
            "differential evolution found no finite-objective member",
        )),
    }
}

/// Three distinct population indices, all different from `exclude`.
fn distinct_indices(rng: &mut StdRng, pop_size: usize, exclude: usize) -> (usize, usize, usize) {
    let mut pick = |taken: &[usize]| loop {
        let idx = rng.gen_range(0..pop_size);
        if idx != exclude && !taken.contains(&idx) {
            return idx;
        }
    };
    let a = pick(&[]);
    let b = pick(&[a]);
    let c = pick(&[a, b]);
    (a, b, c)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DeclineParameters;
    use crate::fit::config::ParamSetting;

    /// Synthetic noise-free series from known parameters.
    fn synthetic(qi: f64, dei: f64, def_: f64, b: f64, months: usize) -> (Vec<f64>, Vec<f64>) {
        let t: Vec<f64> = (0..months).map(|i| i as f64).collect();
        let p = DeclineParameters::new(qi, dei, def_, b).unwrap();
        let q = predict_rates(&p, &t);
        (t, q)
    }

    fn dei_b_config(qi: f64, def_: f64) -> FitConfiguration {
        FitConfiguration::new(
            ParamSetting::Fixed(qi),
            ParamSetting::Free {
                low: def_,
                high: 0.98,
                guess: 0.15,
            },
            ParamSetting::Fixed(def_),
            ParamSetting::Free {
                low: 0.3,
                high: 1.6,
                guess: 0.8,
            },
        )
        .unwrap()
    }

    #[test]
    fn curve_fit_recovers_known_parameters() {
        let (t, q) = synthetic(500.0, 0.40, 0.06, 0.9, 48);
        let config = dei_b_config(500.0, 0.06);
        let fitted = perform_curve_fit(&t, &q, &config, FitMethod::CurveFit, 0).unwrap();
        assert!((fitted[0] - 0.40).abs() / 0.40 < 0.01, "Dei={}", fitted[0]);
        assert!((fitted[1] - 0.9).abs() / 0.9 < 0.01, "b={}", fitted[1]);
    }

    #[test]
    fn differential_evolution_recovers_known_parameters() {
        let (t, q) = synthetic(500.0, 0.40, 0.06, 0.9, 48);
        let config = dei_b_config(500.0, 0.06);
        let fitted =
            perform_curve_fit(&t, &q, &config, FitMethod::DifferentialEvolution, 4000).unwrap();
        assert!((fitted[0] - 0.40).abs() / 0.40 < 0.05, "Dei={}", fitted[0]);
        assert!((fitted[1] - 0.9).abs() / 0.9 < 0.05, "b={}", fitted[1]);
    }

    #[test]
    fn monte_carlo_lands_near_known_parameters() {
        let (t, q) = synthetic(500.0, 0.40, 0.06, 0.9, 48);
        let config = dei_b_config(500.0, 0.06);
        let fitted = perform_curve_fit(&t, &q, &config, FitMethod::MonteCarlo, 4000).unwrap();
        // Sampling is coarser than gradient descent; accept a wider band.
        assert!((fitted[0] - 0.40).abs() < 0.08, "Dei={}", fitted[0]);
        assert!((fitted[1] - 0.9).abs() < 0.25, "b={}", fitted[1]);
    }

    #[test]
    fn single_free_parameter_fit() {
        let (t, q) = synthetic(400.0, 0.30, 0.06, 0.9, 6);
        let config = FitConfiguration::new(
            ParamSetting::Fixed(400.0),
            ParamSetting::Free {
                low: 0.06,
                high: 0.98,
                guess: 0.15,
            },
            ParamSetting::Fixed(0.06),
            ParamSetting::Fixed(0.9),
        )
        .unwrap();
        let fitted = perform_curve_fit(&t, &q, &config, FitMethod::CurveFit, 0).unwrap();
        assert!((fitted[0] - 0.30).abs() < 0.01, "Dei={}", fitted[0]);
    }

    #[test]
    fn stochastic_fits_are_reproducible() {
        let (t, q) = synthetic(500.0, 0.35, 0.06, 1.0, 36);
        let config = dei_b_config(500.0, 0.06);
        let a = perform_curve_fit(&t, &q, &config, FitMethod::MonteCarlo, 1000).unwrap();
        let b = perform_curve_fit(&t, &q, &config, FitMethod::MonteCarlo, 1000).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn too_few_points_is_data_insufficiency() {
        let config = dei_b_config(500.0, 0.06);
        let err = perform_curve_fit(&[0.0], &[500.0], &config, FitMethod::CurveFit, 0).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::DataInsufficiency);
    }
}
