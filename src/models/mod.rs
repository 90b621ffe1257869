//! Nonlinear signal models.
//!
//! A [`SignalModel`] maps a stack of unknown parameter maps (one channel per
//! unknown, in scaled units) to the stack of echo/scan images the imaging
//! operator consumes, and provides the Jacobian of that mapping evaluated at
//! the current estimate. Models report per-unknown box constraints that the
//! solver enforces after every primal update.

pub mod expdecay;

use num_complex::Complex32;

use crate::error::{ReconError, Result};
use crate::field::Field;

pub use expdecay::MonoExpModel;

/// Box constraint for one unknown, applied in scaled units.
#[derive(Clone, Copy, Debug)]
pub struct Constraint {
    pub min: f32,
    pub max: f32,
    /// Clamp the imaginary part to zero before applying the bounds.
    pub real: bool,
}

impl Constraint {
    pub fn new(min: f32, max: f32, real: bool) -> Self {
        Self { min, max, real }
    }

    /// No-op constraint.
    pub fn free() -> Self {
        Self {
            min: f32::NEG_INFINITY,
            max: f32::INFINITY,
            real: false,
        }
    }

    pub fn apply(&self, v: Complex32) -> Complex32 {
        if self.real {
            Complex32::new(v.re.clamp(self.min, self.max), 0.0)
        } else if v.norm() > self.max {
            v * (self.max / v.norm())
        } else if self.min > 0.0 && v.norm() < self.min {
            let n = v.norm();
            if n > 0.0 {
                v * (self.min / n)
            } else {
                Complex32::new(self.min, 0.0)
            }
        } else {
            v
        }
    }
}

/// Jacobian of a signal model at a fixed expansion point. Derivatives are
/// stored per (scan, unknown) plane in Fortran order, matching [`Field`].
pub struct Jacobian {
    scans: usize,
    unknowns: usize,
    ny: usize,
    nx: usize,
    data: Vec<Complex32>,
}

impl Jacobian {
    pub fn zeros(scans: usize, unknowns: usize, ny: usize, nx: usize) -> Self {
        Self {
            scans,
            unknowns,
            ny,
            nx,
            data: vec![Complex32::new(0.0, 0.0); scans * unknowns * ny * nx],
        }
    }

    pub fn scans(&self) -> usize {
        self.scans
    }

    pub fn unknowns(&self) -> usize {
        self.unknowns
    }

    pub fn ny(&self) -> usize {
        self.ny
    }

    pub fn nx(&self) -> usize {
        self.nx
    }

    /// Derivative of scan `s` with respect to unknown `u`.
    pub fn plane(&self, s: usize, u: usize) -> &[Complex32] {
        let n = self.ny * self.nx;
        let start = (s * self.unknowns + u) * n;
        &self.data[start..start + n]
    }

    pub fn plane_mut(&mut self, s: usize, u: usize) -> &mut [Complex32] {
        let n = self.ny * self.nx;
        let start = (s * self.unknowns + u) * n;
        &mut self.data[start..start + n]
    }

    pub fn data(&self) -> &[Complex32] {
        &self.data
    }
}

/// Nonlinear forward model for a family of contrast-weighted acquisitions.
pub trait SignalModel {
    /// Number of unknown parameter maps.
    fn unknowns(&self) -> usize;

    /// Number of modeled scans/echoes.
    fn scans(&self) -> usize;

    /// Evaluate the model at `x` (channels = unknowns) into `out`
    /// (channels = scans). Fails with [`ReconError::ModelEvaluation`] if any
    /// output sample is non-finite.
    fn evaluate(&self, x: &Field, out: &mut Field) -> Result<()>;

    /// Fill `jac` with the partial derivatives at `x`. Fails with
    /// [`ReconError::ModelEvaluation`] if any derivative is non-finite.
    fn jacobian(&self, x: &Field, jac: &mut Jacobian) -> Result<()>;

    /// Per-unknown box constraints, in scaled units.
    fn constraints(&self) -> Vec<Constraint>;

    /// Starting estimate in scaled units.
    fn initial_guess(&self) -> Field;

    /// Per-unknown scale factors; multiply a scaled estimate by these to get
    /// physical units.
    fn scale(&self) -> Vec<f32>;

    /// Convert a converged estimate back to physical units in place.
    fn rescale(&self, x: &mut Field) {
        let n = x.ny() * x.nx();
        for (u, &s) in self.scale().iter().enumerate() {
            debug_assert!(u < x.channels());
            for v in &mut x.data_mut()[u * n..(u + 1) * n] {
                *v *= s;
            }
        }
    }
}

/// Reject non-finite model output, reporting where it came from.
pub fn ensure_finite(data: &[Complex32], plane: usize, n: usize, context: &'static str) -> Result<()> {
    for (i, v) in data.iter().enumerate() {
        if !v.re.is_finite() || !v.im.is_finite() {
            return Err(ReconError::ModelEvaluation {
                context,
                channel: plane + i / n,
                voxel: i % n,
                value: format!("{}", v),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_real_constraint_clamps() {
        let c = Constraint::new(0.0, 2.0, true);
        let v = c.apply(Complex32::new(3.0, 1.5));
        assert_eq!(v, Complex32::new(2.0, 0.0));
        let v = c.apply(Complex32::new(-1.0, 0.2));
        assert_eq!(v, Complex32::new(0.0, 0.0));
    }

    #[test]
    fn test_complex_constraint_scales_magnitude() {
        let c = Constraint::new(0.0, 1.0, false);
        let v = c.apply(Complex32::new(3.0, 4.0));
        assert!((v.norm() - 1.0).abs() < 1e-6);
        // Direction is preserved.
        assert!((v.re / v.im - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_ensure_finite_reports_location() {
        let mut data = vec![Complex32::new(1.0, 0.0); 8];
        data[5] = Complex32::new(f32::NAN, 0.0);
        let err = ensure_finite(&data, 2, 4, "test").unwrap_err();
        match err {
            ReconError::ModelEvaluation { channel, voxel, .. } => {
                assert_eq!(channel, 3);
                assert_eq!(voxel, 1);
            }
            other => panic!("unexpected error: {}", other),
        }
    }
}
