//! Generic Levenberg-Marquardt minimizer.
//!
//! The engine owns the parameter vector and all working buffers; concrete
//! problems only supply residuals (and, optionally, an analytic Jacobian)
//! through [`LeastSquaresProblem`]. Damping interpolates between Gauss-Newton
//! and gradient descent; rank-deficient normal equations are handled by
//! pruning unconstrained parameters, never by failing the run.

use anyhow::{bail, ensure, Result};
use gridcal_core::{linsys, Real};
use log::{debug, trace};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A nonlinear least-squares problem with a fixed residual/parameter layout.
///
/// `residuals` receives a mutable reference so problems can maintain scratch
/// state (e.g. the camera fit re-interpolates grid cells per evaluation).
pub trait LeastSquaresProblem {
    /// `(residual count, parameter count)`; fixed for the lifetime of a run.
    fn dimensions(&self) -> (usize, usize);

    /// Fill the error vector at `params`; `out` has `residual count` entries.
    fn residuals(&mut self, params: &DVector<Real>, out: &mut DVector<Real>) -> Result<()>;

    /// Fill the Jacobian at `params` (`residual count` × `parameter count`).
    ///
    /// Only called when the engine was built with [`Derivatives::Analytic`].
    fn jacobian(&mut self, params: &DVector<Real>, out: &mut DMatrix<Real>) -> Result<()> {
        let _ = (params, out);
        bail!("problem does not provide an analytic jacobian");
    }
}

/// Damping policy applied to the normal-equation diagonal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Damping {
    /// Scale the diagonal by `1 + λ`, seeded at `λ = 1e-3`.
    #[default]
    Multiplicative,
    /// Add `λ · trace(JᵗJ)/n` to the diagonal; the trace ratio is frozen
    /// from the initial Jacobian.
    Additive,
    /// No damping (plain Gauss-Newton).
    None,
}

/// Derivative provider, chosen once at construction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Derivatives {
    /// Use the problem's [`LeastSquaresProblem::jacobian`].
    Analytic,
    /// Central finite differences with the given relative step.
    Numeric { step: Real },
}

impl Default for Derivatives {
    fn default() -> Self {
        Derivatives::Numeric { step: 1e-6 }
    }
}

/// Cooperative cancellation flag, checked between iterations.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request termination; the current iteration still completes.
    pub fn terminate(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::Relaxed);
    }
}

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolveOptions {
    pub damping: Damping,
    pub derivatives: Derivatives,
    /// Iteration budget.
    pub max_iterations: usize,
    /// Stop once the (weighted) squared residual reaches this value.
    pub residual_target: Real,
    /// A trial within this relative slack of the running minimum still
    /// counts as an improvement for the damping update.
    pub acceptance_slack: Real,
}

impl Default for SolveOptions {
    fn default() -> Self {
        Self {
            damping: Damping::Multiplicative,
            derivatives: Derivatives::default(),
            max_iterations: 100,
            residual_target: 0.0,
            acceptance_slack: 0.01,
        }
    }
}

/// Outcome of a minimization run. Always best-effort: callers judge
/// convergence by comparing `residual` against their own target.
#[derive(Debug, Clone)]
pub struct FitReport {
    /// Lowest-residual parameter snapshot seen during the run.
    pub best: DVector<Real>,
    /// Weighted squared residual of `best`.
    pub residual: Real,
    /// Weighted squared residual of the initial estimate.
    pub initial_residual: Real,
    /// Iterations performed.
    pub iterations: usize,
    /// Steps that were kept.
    pub accepted: usize,
    /// Steps that were rolled back.
    pub rejected: usize,
    /// Final damping factor.
    pub damping: Real,
    /// Whether the run was cancelled cooperatively.
    pub cancelled: bool,
}

const LAMBDA_SEED: Real = 1e-3;
const LAMBDA_MIN: Real = 1e-12;
const LAMBDA_MAX: Real = 1e12;

/// Levenberg-Marquardt minimizer with reusable buffers.
pub struct LevenbergMarquardt {
    opts: SolveOptions,
    weights: Option<DVector<Real>>,
    cancel: CancelFlag,
}

impl LevenbergMarquardt {
    pub fn new(opts: SolveOptions) -> Self {
        Self {
            opts,
            weights: None,
            cancel: CancelFlag::new(),
        }
    }

    /// Inverse-variance weights, one per residual row.
    pub fn with_weights(mut self, weights: DVector<Real>) -> Self {
        self.weights = Some(weights);
        self
    }

    /// Share an external cancellation flag.
    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Run the minimization from `initial`.
    pub fn minimize<P: LeastSquaresProblem>(
        &self,
        problem: &mut P,
        initial: &DVector<Real>,
    ) -> Result<FitReport> {
        let (m, n) = problem.dimensions();
        ensure!(m > 0 && n > 0, "empty problem: {} residuals, {} params", m, n);
        ensure!(
            initial.len() == n,
            "initial estimate has {} entries, problem expects {}",
            initial.len(),
            n
        );
        if let Some(w) = &self.weights {
            ensure!(
                w.len() == m,
                "weight vector has {} entries, problem has {} residuals",
                w.len(),
                m
            );
        }

        // All buffers are sized once and reused across iterations.
        let mut residual = DVector::<Real>::zeros(m);
        let mut trial_residual = DVector::<Real>::zeros(m);
        let mut jacobian = DMatrix::<Real>::zeros(m, n);
        let mut jtj = DMatrix::<Real>::zeros(n, n);
        let mut rhs = DVector::<Real>::zeros(n);
        let mut delta = DVector::<Real>::zeros(n);
        let mut scratch = NumericDiffScratch::new(m, n);

        let mut params = initial.clone();
        problem.residuals(&params, &mut residual)?;
        let initial_residual = self.weighted_squared_norm(&residual);

        let mut best = params.clone();
        let mut best_residual = initial_residual;

        let mut lambda = match self.opts.damping {
            Damping::None => 0.0,
            _ => LAMBDA_SEED,
        };
        let mut additive_trace: Option<Real> = None;

        let mut accepted = 0;
        let mut rejected = 0;
        let mut iterations = 0;
        let mut cancelled = false;

        for iter in 0..self.opts.max_iterations {
            if self.cancel.is_set() {
                cancelled = true;
                break;
            }
            if best_residual <= self.opts.residual_target {
                break;
            }
            iterations = iter + 1;

            match self.opts.derivatives {
                Derivatives::Analytic => problem.jacobian(&params, &mut jacobian)?,
                Derivatives::Numeric { step } => {
                    scratch.jacobian(problem, &params, step, &mut jacobian)?
                }
            }

            self.normal_equations(&jacobian, &residual, &mut jtj, &mut rhs);

            // Parameters the current data cannot constrain: structurally zero
            // Jacobian columns leave a zero on the (undamped) diagonal.
            let active: Vec<usize> = (0..n).filter(|&j| jtj[(j, j)] > 0.0).collect();

            if self.opts.damping == Damping::Additive && additive_trace.is_none() {
                additive_trace = Some(jtj.trace() / n as Real);
            }
            match self.opts.damping {
                Damping::Multiplicative => {
                    for j in 0..n {
                        jtj[(j, j)] *= 1.0 + lambda;
                    }
                }
                Damping::Additive => {
                    let tau = additive_trace.unwrap_or(0.0);
                    for j in 0..n {
                        jtj[(j, j)] += lambda * tau;
                    }
                }
                Damping::None => {}
            }

            delta.fill(0.0);
            if !active.is_empty() {
                let reduced = self.solve_reduced(&jtj, &rhs, &active)?;
                for (slot, &j) in active.iter().enumerate() {
                    delta[j] = reduced[slot];
                }
            }

            let trial_params = &params + &delta;
            problem.residuals(&trial_params, &mut trial_residual)?;
            let trial = self.weighted_squared_norm(&trial_residual);

            let reference = best_residual;
            if trial < best_residual {
                best.copy_from(&trial_params);
                best_residual = trial;
            }

            // A marginal step (within the slack) still counts as improvement;
            // anything worse is rolled back before the damping update.
            if trial.is_finite() && trial <= reference * (1.0 + self.opts.acceptance_slack) {
                params = trial_params;
                residual.copy_from(&trial_residual);
                accepted += 1;
                if self.opts.damping != Damping::None {
                    lambda = (lambda / 10.0).max(LAMBDA_MIN);
                }
            } else {
                rejected += 1;
                if self.opts.damping != Damping::None {
                    lambda = (lambda * 10.0).min(LAMBDA_MAX);
                }
            }

            trace!(
                "lm iter {}: trial {:.6e}, best {:.6e}, lambda {:.3e}",
                iter,
                trial,
                best_residual,
                lambda
            );
        }

        debug!(
            "lm finished: residual {:.6e} -> {:.6e} in {} iterations ({} accepted, {} rejected)",
            initial_residual, best_residual, iterations, accepted, rejected
        );

        Ok(FitReport {
            best,
            residual: best_residual,
            initial_residual,
            iterations,
            accepted,
            rejected,
            damping: lambda,
            cancelled,
        })
    }

    fn weighted_squared_norm(&self, e: &DVector<Real>) -> Real {
        match &self.weights {
            Some(w) => e.iter().zip(w.iter()).map(|(e, w)| w * e * e).sum(),
            None => e.iter().map(|e| e * e).sum(),
        }
    }

    /// Form `JᵗWJ` and `JᵗWe` (weights default to 1).
    fn normal_equations(
        &self,
        jacobian: &DMatrix<Real>,
        residual: &DVector<Real>,
        jtj: &mut DMatrix<Real>,
        rhs: &mut DVector<Real>,
    ) {
        let (m, n) = jacobian.shape();
        jtj.fill(0.0);
        rhs.fill(0.0);
        for i in 0..m {
            let w = self.weights.as_ref().map_or(1.0, |w| w[i]);
            let e = residual[i];
            for j in 0..n {
                let jij = jacobian[(i, j)];
                if jij == 0.0 {
                    continue;
                }
                // Right-hand side of the update system is -JᵗWe.
                rhs[j] -= w * jij * e;
                for k in j..n {
                    jtj[(j, k)] += w * jij * jacobian[(i, k)];
                }
            }
        }
        // Mirror the upper triangle.
        for j in 0..n {
            for k in (j + 1)..n {
                jtj[(k, j)] = jtj[(j, k)];
            }
        }
    }

    fn solve_reduced(
        &self,
        jtj: &DMatrix<Real>,
        rhs: &DVector<Real>,
        active: &[usize],
    ) -> Result<DVector<Real>> {
        let k = active.len();
        let mut a = DMatrix::<Real>::zeros(k, k);
        let mut b = DVector::<Real>::zeros(k);
        for (bi, &j) in active.iter().enumerate() {
            b[bi] = rhs[j];
            for (bj, &l) in active.iter().enumerate() {
                a[(bi, bj)] = jtj[(j, l)];
            }
        }
        Ok(linsys::solve_dense(&a, &b)?)
    }
}

/// Reusable buffers for central-difference Jacobians.
struct NumericDiffScratch {
    x: DVector<Real>,
    plus: DVector<Real>,
    minus: DVector<Real>,
}

impl NumericDiffScratch {
    fn new(m: usize, n: usize) -> Self {
        Self {
            x: DVector::zeros(n),
            plus: DVector::zeros(m),
            minus: DVector::zeros(m),
        }
    }

    fn jacobian<P: LeastSquaresProblem>(
        &mut self,
        problem: &mut P,
        params: &DVector<Real>,
        step: Real,
        out: &mut DMatrix<Real>,
    ) -> Result<()> {
        let n = params.len();
        self.x.copy_from(params);
        for j in 0..n {
            let h = step * (1.0 + params[j].abs());
            self.x[j] = params[j] + h;
            problem.residuals(&self.x, &mut self.plus)?;
            self.x[j] = params[j] - h;
            problem.residuals(&self.x, &mut self.minus)?;
            self.x[j] = params[j];

            let inv = 1.0 / (2.0 * h);
            for i in 0..out.nrows() {
                out[(i, j)] = (self.plus[i] - self.minus[i]) * inv;
            }
        }
        Ok(())
    }
}
