//! Gauss-Newton outer loop.
//!
//! Each outer iteration freezes the model Jacobian, forms the linearized
//! data residual `res = data - A S(x) + A J x`, estimates step sizes for the
//! resulting stacked operator and hands the convex subproblem to the
//! primal-dual solver. Between iterations the regularization scale decays
//! and the proximal tether tightens, following the classic IRGN schedule.
//! Running out of outer iterations is a reported status, not an error.

use std::sync::atomic::AtomicBool;
use std::time::Instant;

use crate::error::{ReconError, Result};
use crate::field::{Field, Kspace};
use crate::models::{Jacobian, SignalModel};
use crate::operators::{GradientOp, ImagingOperator, LinearizedOperator, SymGradOp};
use crate::solver::norm::estimate_step_sizes;
use crate::solver::pd::{tgv_solve, tv_solve, InnerParams, PdState};
use crate::solver::{Regularization, SolverConfig};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TerminationReason {
    /// Relative change in the estimate (or in the objective) fell below
    /// `tol`.
    Converged,
    /// The outer iteration budget ran out. A status, not a failure.
    IterationLimit,
    /// Cancellation was requested; the partial estimate is discarded unless
    /// `return_partial_on_cancel` is set.
    Cancelled,
}

/// Per-outer-iteration progress record.
#[derive(Clone, Debug)]
pub struct OuterReport {
    pub outer: usize,
    pub inner_iterations: usize,
    pub step_norm: f32,
    pub gap: f64,
    pub data_fidelity: f64,
    pub regularization: f64,
    pub objective: f64,
    pub rel_change: f64,
    /// The inner solver exited early because the gap stopped moving.
    pub stagnated: bool,
}

/// Final parameter maps in physical units, with the solve history. A
/// cancelled run discards its partial estimate (`maps` is `None`) unless
/// `return_partial_on_cancel` is set.
pub struct ReconResult {
    pub maps: Option<Field>,
    pub history: Vec<OuterReport>,
    pub reason: TerminationReason,
}

pub struct IrgnSolver<'a, M: SignalModel> {
    model: &'a M,
    imaging: &'a ImagingOperator,
    config: SolverConfig,
}

impl<'a, M: SignalModel> IrgnSolver<'a, M> {
    pub fn new(model: &'a M, imaging: &'a ImagingOperator, config: SolverConfig) -> Result<Self> {
        if model.scans() != imaging.scans() {
            return Err(ReconError::Configuration(format!(
                "model produces {} scans, imaging operator samples {}",
                model.scans(),
                imaging.scans()
            )));
        }
        if model.constraints().len() != model.unknowns() {
            return Err(ReconError::Configuration(format!(
                "model reports {} constraints for {} unknowns",
                model.constraints().len(),
                model.unknowns()
            )));
        }
        if config.lambd <= 0.0 || config.delta <= 0.0 || config.gamma <= 0.0 {
            return Err(ReconError::Configuration(
                "lambd, delta and gamma must be positive".into(),
            ));
        }
        Ok(Self {
            model,
            imaging,
            config,
        })
    }

    /// Run the reconstruction. `guess` overrides the model's starting
    /// estimate; `cancel` is polled between inner iterations.
    pub fn solve(
        &self,
        data: &Kspace,
        guess: Option<&Field>,
        cancel: &AtomicBool,
    ) -> Result<ReconResult> {
        data.check_shape(self.imaging.kspace_shape(), "measured data")?;

        let cfg = &self.config;
        let unknowns = self.model.unknowns();
        let scans = self.model.scans();
        let (ny, nx) = (self.imaging.ny(), self.imaging.nx());
        let constraints = self.model.constraints();

        let grad = GradientOp::new(unknowns, ny, nx, cfg.vsx, cfg.vsy);
        let sym = SymGradOp::new(unknowns, ny, nx, cfg.vsx, cfg.vsy);
        let (base_a1, base_a0, is_tgv) = match cfg.regularization {
            Regularization::Tgv { alpha1, alpha0 } => (alpha1, alpha0, true),
            Regularization::Tv { alpha } => (alpha, 0.0, false),
        };

        let mut state = PdState::new(unknowns, ny, nx, self.imaging.kspace_shape());
        match guess {
            Some(g) => {
                g.check_shape(state.x.shape(), "initial guess")?;
                state.x.copy_from(g);
            }
            None => state.x = self.model.initial_guess(),
        }

        let mut sig = Field::zeros(scans, ny, nx);
        let mut jac = Jacobian::zeros(scans, unknowns, ny, nx);
        let mut scratch = Field::zeros(scans, ny, nx);
        let mut modeled = Kspace::zeros(self.imaging.kspace_shape());
        let mut res = Kspace::zeros(self.imaging.kspace_shape());
        let mut xk = Field::zeros(unknowns, ny, nx);
        let mut grad_buf = Field::zeros(2 * unknowns, ny, nx);
        let mut sym_buf = Field::zeros(3 * unknowns, ny, nx);

        let mut gamma = cfg.gamma;
        let gamma_floor = cfg.gamma * cfg.gamma_min_ratio;
        let mut delta = cfg.delta;
        let mut inner = cfg.start_inner;

        let (obj_init, _, _) = self.objective(
            &state, &grad, &sym, data, &mut sig, &mut modeled, &mut grad_buf, &mut sym_buf,
            gamma * base_a1, gamma * base_a0, is_tgv,
        )?;
        let mut obj_old = obj_init;
        log::info!("initial objective {:.6e}", obj_init);

        let mut history = Vec::with_capacity(cfg.max_outer);
        let mut reason = TerminationReason::IterationLimit;

        for outer in 0..cfg.max_outer {
            let started = Instant::now();
            self.model.jacobian(&state.x, &mut jac)?;
            self.model.evaluate(&state.x, &mut sig)?;
            self.imaging.forward(&sig, &mut modeled)?;
            let lin = LinearizedOperator::new(self.imaging, &jac)?;

            // res = data - A S(x) + A J x, so the subproblem's data term is
            // centered on the current expansion point.
            lin.forward(&state.x, &mut scratch, &mut res)?;
            for ((r, d), m) in res
                .data_mut()
                .iter_mut()
                .zip(data.data().iter())
                .zip(modeled.data().iter())
            {
                *r += d - m;
            }

            let steps = estimate_step_sizes(
                &lin,
                &grad,
                if is_tgv { Some(&sym) } else { None },
                cfg.norm_max_iters,
                cfg.norm_tol,
                cfg.norm_seed.wrapping_add(outer as u64),
            )?;

            if !cfg.warm_start_duals {
                state.reset_duals();
            }
            xk.copy_from(&state.x);

            let pars = InnerParams {
                tau: steps.tau,
                sigma: steps.sigma,
                alpha1: gamma * base_a1,
                alpha0: gamma * base_a0,
                lambd: cfg.lambd,
                delta,
                tol: cfg.tol,
                stag: cfg.stag,
            };
            let outcome = if is_tgv {
                tgv_solve(
                    &mut state, &lin, &grad, &sym, &res, &xk, &constraints, pars, inner, cancel,
                )?
            } else {
                tv_solve(
                    &mut state, &lin, &grad, &res, &xk, &constraints, pars, inner, cancel,
                )?
            };
            if outcome.stagnated {
                log::warn!("outer {}: inner solver stagnated, gap {:.3e}", outer, outcome.gap);
            }

            let (objective, data_fidelity, regularization) = self.objective(
                &state, &grad, &sym, data, &mut sig, &mut modeled, &mut grad_buf, &mut sym_buf,
                pars.alpha1, pars.alpha0, is_tgv,
            )?;
            let dx: f64 = state
                .x
                .data()
                .iter()
                .zip(xk.data().iter())
                .map(|(a, b)| (a - b).norm_sqr() as f64)
                .sum();
            let rel_change = (dx / state.x.norm_sq().max(f64::MIN_POSITIVE)).sqrt();

            log::info!(
                "outer {}: {} inner iters in {:.2?}, L = {:.3e}, objective {:.6e} (data {:.3e}, reg {:.3e}), dx {:.3e}",
                outer,
                outcome.iterations,
                started.elapsed(),
                steps.norm,
                objective,
                data_fidelity,
                regularization,
                rel_change
            );
            history.push(OuterReport {
                outer,
                inner_iterations: outcome.iterations,
                step_norm: steps.norm,
                gap: outcome.gap,
                data_fidelity,
                regularization,
                objective,
                rel_change,
                stagnated: outcome.stagnated,
            });

            if outcome.cancelled {
                reason = TerminationReason::Cancelled;
                break;
            }
            if rel_change < cfg.tol as f64 {
                reason = TerminationReason::Converged;
                break;
            }
            // Secondary exit: the estimate still moves but the objective no
            // longer improves.
            if outer > 0 && (obj_old - objective).abs() / obj_init.max(f64::MIN_POSITIVE) < cfg.tol as f64 {
                reason = TerminationReason::Converged;
                break;
            }
            obj_old = objective;

            gamma = (gamma * cfg.gamma_dec).max(gamma_floor);
            delta = (delta * cfg.delta_inc).min(cfg.delta_max);
            inner = (inner * 2).min(cfg.max_inner);
        }

        let maps = if reason == TerminationReason::Cancelled && !cfg.return_partial_on_cancel {
            None
        } else {
            let mut maps = Field::zeros(unknowns, ny, nx);
            maps.copy_from(&state.x);
            self.model.rescale(&mut maps);
            Some(maps)
        };
        Ok(ReconResult {
            maps,
            history,
            reason,
        })
    }

    /// Nonlinear objective at the current estimate.
    #[allow(clippy::too_many_arguments)]
    fn objective(
        &self,
        state: &PdState,
        grad: &GradientOp,
        sym: &SymGradOp,
        data: &Kspace,
        sig: &mut Field,
        modeled: &mut Kspace,
        grad_buf: &mut Field,
        sym_buf: &mut Field,
        alpha1: f32,
        alpha0: f32,
        is_tgv: bool,
    ) -> Result<(f64, f64, f64)> {
        self.model.evaluate(&state.x, sig)?;
        self.imaging.forward(sig, modeled)?;
        let data_fidelity: f64 = modeled
            .data()
            .iter()
            .zip(data.data().iter())
            .map(|(m, d)| (m - d).norm_sqr() as f64)
            .sum::<f64>()
            * 0.5
            * self.config.lambd as f64;

        grad.forward(&state.x, grad_buf)?;
        if is_tgv {
            for (g, v) in grad_buf.data_mut().iter_mut().zip(state.v.data().iter()) {
                *g -= *v;
            }
        }
        let mut regularization =
            alpha1 as f64 * crate::solver::pd::pointwise_l2_sum(grad_buf, 2);
        if is_tgv {
            sym.forward(&state.v, sym_buf)?;
            regularization += alpha0 as f64 * crate::solver::pd::pointwise_l2_sum(sym_buf, 3);
        }

        Ok((data_fidelity + regularization, data_fidelity, regularization))
    }
}
