//! Primal-dual solver for the linearized subproblems.
//!
//! Each Gauss-Newton step minimizes
//!
//! `lambd/2 ||A x - res||^2 + R(x, v) + 1/(2 delta) ||x - xk||^2`
//!
//! with `R` either TGV (first-order dual `z1`, symmetrized dual `z2`) or TV.
//! The iteration updates the duals at the extrapolated primal point,
//! projects them onto their norm balls, then takes a proximal primal step
//! tethered to the expansion point `xk`. Convergence is monitored through
//! the primal-dual gap every 50 iterations.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::Result;
use crate::field::{Field, Kspace};
use crate::models::Constraint;
use crate::operators::{GradientOp, LinearizedOperator, SymGradOp};

const CHECK_EVERY: usize = 50;

/// Primal and dual variables, kept across outer iterations when warm
/// starting.
pub struct PdState {
    pub x: Field,
    pub v: Field,
    pub r: Kspace,
    pub z1: Field,
    pub z2: Field,
}

impl PdState {
    pub fn new(unknowns: usize, ny: usize, nx: usize, kshape: crate::field::KspaceShape) -> Self {
        Self {
            x: Field::zeros(unknowns, ny, nx),
            v: Field::zeros(2 * unknowns, ny, nx),
            r: Kspace::zeros(kshape),
            z1: Field::zeros(2 * unknowns, ny, nx),
            z2: Field::zeros(3 * unknowns, ny, nx),
        }
    }

    /// Zero the dual variables (and the TGV balancing field).
    pub fn reset_duals(&mut self) {
        self.v.fill_zero();
        self.r.fill_zero();
        self.z1.fill_zero();
        self.z2.fill_zero();
    }
}

/// Per-subproblem weights; `alpha1`/`alpha0` already include the outer
/// regularization scale.
#[derive(Clone, Copy, Debug)]
pub struct InnerParams {
    pub tau: f32,
    pub sigma: f32,
    pub alpha1: f32,
    pub alpha0: f32,
    pub lambd: f32,
    pub delta: f32,
    pub tol: f32,
    pub stag: f32,
}

/// Why the inner loop stopped, plus the last gap it saw.
pub struct InnerOutcome {
    pub iterations: usize,
    pub gap: f64,
    pub stagnated: bool,
    pub cancelled: bool,
}

/// Scratch buffers reused across inner iterations.
struct PdWorkspace {
    x_new: Field,
    x_bar: Field,
    v_new: Field,
    v_bar: Field,
    grad_bar: Field,
    sym_bar: Field,
    ax: Kspace,
    kyk1: Field,
    kyk1_tmp: Field,
    kyk2: Field,
    img_scratch: Field,
}

impl PdWorkspace {
    fn new(state: &PdState, scans: usize) -> Self {
        let (u, ny, nx) = (state.x.channels(), state.x.ny(), state.x.nx());
        Self {
            x_new: Field::zeros(u, ny, nx),
            x_bar: Field::zeros(u, ny, nx),
            v_new: Field::zeros(2 * u, ny, nx),
            v_bar: Field::zeros(2 * u, ny, nx),
            grad_bar: Field::zeros(2 * u, ny, nx),
            sym_bar: Field::zeros(3 * u, ny, nx),
            ax: Kspace::zeros(state.r.shape()),
            kyk1: Field::zeros(u, ny, nx),
            kyk1_tmp: Field::zeros(u, ny, nx),
            kyk2: Field::zeros(2 * u, ny, nx),
            img_scratch: Field::zeros(scans, ny, nx),
        }
    }
}

/// Project each per-unknown 2-vector onto the ball of radius `alpha`.
fn project_ball2(z: &mut Field, alpha: f32) {
    let n = z.ny() * z.nx();
    let unknowns = z.channels() / 2;
    let data = z.data_mut();
    for u in 0..unknowns {
        let (a, b) = (2 * u * n, (2 * u + 1) * n);
        for i in 0..n {
            let mag = (data[a + i].norm_sqr() + data[b + i].norm_sqr()).sqrt();
            if mag > alpha {
                let s = alpha / mag;
                data[a + i] *= s;
                data[b + i] *= s;
            }
        }
    }
}

/// Project each per-unknown symmetric tensor (stored components) onto the
/// ball of radius `alpha`.
fn project_ball3(z: &mut Field, alpha: f32) {
    let n = z.ny() * z.nx();
    let unknowns = z.channels() / 3;
    let data = z.data_mut();
    for u in 0..unknowns {
        let (a, b, c) = (3 * u * n, (3 * u + 1) * n, (3 * u + 2) * n);
        for i in 0..n {
            let mag = (data[a + i].norm_sqr() + data[b + i].norm_sqr() + data[c + i].norm_sqr())
                .sqrt();
            if mag > alpha {
                let s = alpha / mag;
                data[a + i] *= s;
                data[b + i] *= s;
                data[c + i] *= s;
            }
        }
    }
}

pub(crate) fn pointwise_l2_sum(z: &Field, comps: usize) -> f64 {
    let n = z.ny() * z.nx();
    let unknowns = z.channels() / comps;
    let data = z.data();
    let mut total = 0.0f64;
    for u in 0..unknowns {
        for i in 0..n {
            let mut sq = 0.0f64;
            for c in 0..comps {
                sq += data[(comps * u + c) * n + i].norm_sqr() as f64;
            }
            total += sq.sqrt();
        }
    }
    total
}

fn diff_norm_sq(a: &Field, b: &Field) -> f64 {
    a.data()
        .iter()
        .zip(b.data().iter())
        .map(|(x, y)| (x - y).norm_sqr() as f64)
        .sum()
}

/// TGV-regularized subproblem.
#[allow(clippy::too_many_arguments)]
pub fn tgv_solve(
    state: &mut PdState,
    lin: &LinearizedOperator,
    grad: &GradientOp,
    sym: &SymGradOp,
    res: &Kspace,
    xk: &Field,
    constraints: &[Constraint],
    pars: InnerParams,
    iters: usize,
    cancel: &AtomicBool,
) -> Result<InnerOutcome> {
    let mut ws = PdWorkspace::new(state, lin.output_shape().scans);
    ws.x_bar.copy_from(&state.x);
    ws.v_bar.copy_from(&state.v);

    let n = state.x.ny() * state.x.nx();
    let tether = pars.tau / pars.delta;
    let mut gap_init = 0.0f64;
    let mut gap_old = 0.0f64;
    let mut stagnated = false;
    let mut done = 0;

    for i in 0..iters {
        // Dual ascent at the extrapolated point.
        lin.forward(&ws.x_bar, &mut ws.img_scratch, &mut ws.ax)?;
        for ((r, a), d) in state
            .r
            .data_mut()
            .iter_mut()
            .zip(ws.ax.data().iter())
            .zip(res.data().iter())
        {
            *r = (*r + (a - d) * pars.sigma) / (1.0 + pars.sigma / pars.lambd);
        }

        grad.forward(&ws.x_bar, &mut ws.grad_bar)?;
        for ((z, g), vb) in state
            .z1
            .data_mut()
            .iter_mut()
            .zip(ws.grad_bar.data().iter())
            .zip(ws.v_bar.data().iter())
        {
            *z += (g - vb) * pars.sigma;
        }
        project_ball2(&mut state.z1, pars.alpha1);

        sym.forward(&ws.v_bar, &mut ws.sym_bar)?;
        for (z, e) in state.z2.data_mut().iter_mut().zip(ws.sym_bar.data().iter()) {
            *z += e * pars.sigma;
        }
        project_ball3(&mut state.z2, pars.alpha0);

        // K^H applied to the updated duals.
        lin.adjoint(&state.r, &mut ws.img_scratch, &mut ws.kyk1)?;
        grad.adjoint(&state.z1, &mut ws.kyk1_tmp)?;
        for (k, t) in ws.kyk1.data_mut().iter_mut().zip(ws.kyk1_tmp.data().iter()) {
            *k += *t;
        }
        sym.adjoint(&state.z2, &mut ws.kyk2)?;
        for (k, z) in ws.kyk2.data_mut().iter_mut().zip(state.z1.data().iter()) {
            *k -= *z;
        }

        // Proximal primal step with box constraints.
        for u in 0..state.x.channels() {
            let con = constraints[u];
            for idx in 0..n {
                let i = u * n + idx;
                let prox = (state.x.data()[i] - ws.kyk1.data()[i] * pars.tau
                    + xk.data()[i] * tether)
                    / (1.0 + tether);
                ws.x_new.data_mut()[i] = con.apply(prox);
            }
        }
        for ((vn, v), k) in ws
            .v_new
            .data_mut()
            .iter_mut()
            .zip(state.v.data().iter())
            .zip(ws.kyk2.data().iter())
        {
            *vn = v - k * pars.tau;
        }

        // Extrapolate, then advance.
        for ((b, new), old) in ws
            .x_bar
            .data_mut()
            .iter_mut()
            .zip(ws.x_new.data().iter())
            .zip(state.x.data().iter())
        {
            *b = new * 2.0 - old;
        }
        for ((b, new), old) in ws
            .v_bar
            .data_mut()
            .iter_mut()
            .zip(ws.v_new.data().iter())
            .zip(state.v.data().iter())
        {
            *b = new * 2.0 - old;
        }
        state.x.copy_from(&ws.x_new);
        state.v.copy_from(&ws.v_new);
        done = i + 1;

        if cancel.load(Ordering::Relaxed) {
            return Ok(InnerOutcome {
                iterations: done,
                gap: gap_old,
                stagnated: false,
                cancelled: true,
            });
        }

        if done % CHECK_EVERY == 0 || done == iters {
            lin.forward(&state.x, &mut ws.img_scratch, &mut ws.ax)?;
            grad.forward(&state.x, &mut ws.grad_bar)?;
            for (g, v) in ws.grad_bar.data_mut().iter_mut().zip(state.v.data().iter()) {
                *g -= *v;
            }
            sym.forward(&state.v, &mut ws.sym_bar)?;

            let data_term: f64 = ws
                .ax
                .data()
                .iter()
                .zip(res.data().iter())
                .map(|(a, d)| (a - d).norm_sqr() as f64)
                .sum();
            let primal = 0.5 * pars.lambd as f64 * data_term
                + pars.alpha1 as f64 * pointwise_l2_sum(&ws.grad_bar, 2)
                + pars.alpha0 as f64 * pointwise_l2_sum(&ws.sym_bar, 3)
                + diff_norm_sq(&state.x, xk) / (2.0 * pars.delta as f64);

            let dual = -0.5 * pars.delta as f64 * ws.kyk1.norm_sq()
                - xk.dot(&ws.kyk1).re
                - state.r.norm_sq() / (2.0 * pars.lambd as f64)
                - state.r.dot(res).re;
            let gap = (primal - dual).abs();
            log::debug!(
                "inner {}: primal {:.6e}, dual {:.6e}, gap {:.3e}",
                done,
                primal,
                dual,
                gap
            );

            if gap_init == 0.0 {
                gap_init = gap.max(f64::MIN_POSITIVE);
            } else {
                if gap / gap_init < pars.tol as f64 {
                    return Ok(InnerOutcome {
                        iterations: done,
                        gap,
                        stagnated: false,
                        cancelled: false,
                    });
                }
                if (gap_old - gap).abs() < pars.lambd as f64 * pars.stag as f64 {
                    stagnated = true;
                    gap_old = gap;
                    break;
                }
            }
            gap_old = gap;
        }
    }

    Ok(InnerOutcome {
        iterations: done,
        gap: gap_old,
        stagnated,
        cancelled: false,
    })
}

/// TV-regularized subproblem; the balancing field `v` and its dual stay
/// zero.
#[allow(clippy::too_many_arguments)]
pub fn tv_solve(
    state: &mut PdState,
    lin: &LinearizedOperator,
    grad: &GradientOp,
    res: &Kspace,
    xk: &Field,
    constraints: &[Constraint],
    pars: InnerParams,
    iters: usize,
    cancel: &AtomicBool,
) -> Result<InnerOutcome> {
    let mut ws = PdWorkspace::new(state, lin.output_shape().scans);
    ws.x_bar.copy_from(&state.x);

    let n = state.x.ny() * state.x.nx();
    let tether = pars.tau / pars.delta;
    let mut gap_init = 0.0f64;
    let mut gap_old = 0.0f64;
    let mut stagnated = false;
    let mut done = 0;

    for i in 0..iters {
        lin.forward(&ws.x_bar, &mut ws.img_scratch, &mut ws.ax)?;
        for ((r, a), d) in state
            .r
            .data_mut()
            .iter_mut()
            .zip(ws.ax.data().iter())
            .zip(res.data().iter())
        {
            *r = (*r + (a - d) * pars.sigma) / (1.0 + pars.sigma / pars.lambd);
        }

        grad.forward(&ws.x_bar, &mut ws.grad_bar)?;
        for (z, g) in state.z1.data_mut().iter_mut().zip(ws.grad_bar.data().iter()) {
            *z += g * pars.sigma;
        }
        project_ball2(&mut state.z1, pars.alpha1);

        lin.adjoint(&state.r, &mut ws.img_scratch, &mut ws.kyk1)?;
        grad.adjoint(&state.z1, &mut ws.kyk1_tmp)?;
        for (k, t) in ws.kyk1.data_mut().iter_mut().zip(ws.kyk1_tmp.data().iter()) {
            *k += *t;
        }

        for u in 0..state.x.channels() {
            let con = constraints[u];
            for idx in 0..n {
                let i = u * n + idx;
                let prox = (state.x.data()[i] - ws.kyk1.data()[i] * pars.tau
                    + xk.data()[i] * tether)
                    / (1.0 + tether);
                ws.x_new.data_mut()[i] = con.apply(prox);
            }
        }

        for ((b, new), old) in ws
            .x_bar
            .data_mut()
            .iter_mut()
            .zip(ws.x_new.data().iter())
            .zip(state.x.data().iter())
        {
            *b = new * 2.0 - old;
        }
        state.x.copy_from(&ws.x_new);
        done = i + 1;

        if cancel.load(Ordering::Relaxed) {
            return Ok(InnerOutcome {
                iterations: done,
                gap: gap_old,
                stagnated: false,
                cancelled: true,
            });
        }

        if done % CHECK_EVERY == 0 || done == iters {
            lin.forward(&state.x, &mut ws.img_scratch, &mut ws.ax)?;
            grad.forward(&state.x, &mut ws.grad_bar)?;

            let data_term: f64 = ws
                .ax
                .data()
                .iter()
                .zip(res.data().iter())
                .map(|(a, d)| (a - d).norm_sqr() as f64)
                .sum();
            let primal = 0.5 * pars.lambd as f64 * data_term
                + pars.alpha1 as f64 * pointwise_l2_sum(&ws.grad_bar, 2)
                + diff_norm_sq(&state.x, xk) / (2.0 * pars.delta as f64);

            let dual = -0.5 * pars.delta as f64 * ws.kyk1.norm_sq()
                - xk.dot(&ws.kyk1).re
                - state.r.norm_sq() / (2.0 * pars.lambd as f64)
                - state.r.dot(res).re;
            let gap = (primal - dual).abs();
            log::debug!(
                "inner {}: primal {:.6e}, dual {:.6e}, gap {:.3e}",
                done,
                primal,
                dual,
                gap
            );

            if gap_init == 0.0 {
                gap_init = gap.max(f64::MIN_POSITIVE);
            } else {
                if gap / gap_init < pars.tol as f64 {
                    return Ok(InnerOutcome {
                        iterations: done,
                        gap,
                        stagnated: false,
                        cancelled: false,
                    });
                }
                if (gap_old - gap).abs() < pars.lambd as f64 * pars.stag as f64 {
                    stagnated = true;
                    gap_old = gap;
                    break;
                }
            }
            gap_old = gap;
        }
    }

    Ok(InnerOutcome {
        iterations: done,
        gap: gap_old,
        stagnated,
        cancelled: false,
    })
}
