//! Step-size selection by power iteration.
//!
//! The primal-dual method is stable when `tau * sigma * L^2 <= 1` with `L`
//! the norm of the stacked forward operator `K(x, v) = (A x, grad x - v,
//! E v)`. `L` changes with every linearization, so it is re-estimated at the
//! start of each outer iteration instead of relying on a fixed analytic
//! bound.

use num_complex::Complex32;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{ReconError, Result};
use crate::field::{Field, Kspace};
use crate::operators::{GradientOp, LinearizedOperator, SymGradOp};

/// Matched primal/dual step sizes with the operator norm they came from.
#[derive(Clone, Copy, Debug)]
pub struct StepSizes {
    pub tau: f32,
    pub sigma: f32,
    pub norm: f32,
}

/// Estimate the norm of the stacked operator and derive safe step sizes.
/// Pass `sym` as `None` for the first-order (TV) stack `K(x) = (A x,
/// grad x)`.
pub fn estimate_step_sizes(
    lin: &LinearizedOperator,
    grad: &GradientOp,
    sym: Option<&SymGradOp>,
    max_iters: usize,
    tol: f32,
    seed: u64,
) -> Result<StepSizes> {
    let x_shape = lin.input_shape();
    let v_shape = grad.output_shape();
    let mut scratch = Field::zeros(
        lin.output_shape().scans,
        grad.input_shape().ny,
        grad.input_shape().nx,
    );

    let mut rng = StdRng::seed_from_u64(seed);
    let mut x = Field::zeros(x_shape.channels, x_shape.ny, x_shape.nx);
    let mut v = Field::zeros(v_shape.channels, v_shape.ny, v_shape.nx);
    for val in x.data_mut() {
        *val = Complex32::new(rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0));
    }
    if sym.is_some() {
        for val in v.data_mut() {
            *val = Complex32::new(rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0));
        }
    }

    let mut y_data = Kspace::zeros(lin.output_shape());
    let mut y_grad = Field::zeros(v_shape.channels, v_shape.ny, v_shape.nx);
    let mut y_sym = sym.map(|s| {
        let sh = s.output_shape();
        Field::zeros(sh.channels, sh.ny, sh.nx)
    });
    let mut x_next = Field::zeros(x_shape.channels, x_shape.ny, x_shape.nx);
    let mut x_tmp = Field::zeros(x_shape.channels, x_shape.ny, x_shape.nx);
    let mut v_next = Field::zeros(v_shape.channels, v_shape.ny, v_shape.nx);

    let mut norm_est = 0.0f32;
    let mut last_change = f32::INFINITY;
    for it in 0..max_iters {
        // K applied to the current direction.
        lin.forward(&x, &mut scratch, &mut y_data)?;
        grad.forward(&x, &mut y_grad)?;
        if sym.is_some() {
            for (g, vi) in y_grad.data_mut().iter_mut().zip(v.data().iter()) {
                *g -= *vi;
            }
        }
        if let (Some(s), Some(ys)) = (sym, y_sym.as_mut()) {
            s.forward(&v, ys)?;
        }

        // K^H K back onto (x, v).
        lin.adjoint(&y_data, &mut scratch, &mut x_next)?;
        grad.adjoint(&y_grad, &mut x_tmp)?;
        for (a, b) in x_next.data_mut().iter_mut().zip(x_tmp.data().iter()) {
            *a += *b;
        }
        if let (Some(s), Some(ys)) = (sym, y_sym.as_ref()) {
            s.adjoint(ys, &mut v_next)?;
            for (vn, g) in v_next.data_mut().iter_mut().zip(y_grad.data().iter()) {
                *vn -= *g;
            }
        }

        let sq = x_next.norm_sq() + if sym.is_some() { v_next.norm_sq() } else { 0.0 };
        let denom = x.norm_sq() + if sym.is_some() { v.norm_sq() } else { 0.0 };
        if denom <= f64::EPSILON || !sq.is_finite() {
            return Err(ReconError::NormEstimation {
                iterations: it,
                last_change: f32::INFINITY,
            });
        }
        let new_est = (sq / denom).sqrt().sqrt() as f32;
        last_change = if norm_est > 0.0 {
            (new_est - norm_est).abs() / norm_est
        } else {
            f32::INFINITY
        };
        norm_est = new_est;

        // Normalize and continue from K^H K of the previous direction.
        let scale = (1.0 / sq.sqrt()) as f32;
        x.copy_from(&x_next);
        for val in x.data_mut() {
            *val *= scale;
        }
        if sym.is_some() {
            v.copy_from(&v_next);
            for val in v.data_mut() {
                *val *= scale;
            }
        }

        if last_change < tol {
            let l = norm_est.max(f32::MIN_POSITIVE);
            let step = 1.0 / (l * 1.01);
            return Ok(StepSizes {
                tau: step,
                sigma: step,
                norm: l,
            });
        }
    }

    Err(ReconError::NormEstimation {
        iterations: max_iters,
        last_change,
    })
}
