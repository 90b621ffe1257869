//! Linearization of the composed model + imaging operator.
//!
//! Each Gauss-Newton step solves a convex problem in the update direction of
//! the parameter maps; the data term of that problem uses `A * J`, the
//! imaging operator composed with the model Jacobian frozen at the current
//! expansion point. This wrapper applies that composition and its adjoint
//! without materializing the product.

use num_complex::Complex32;

use crate::error::Result;
use crate::field::{Field, Kspace, KspaceShape, Shape};
use crate::models::Jacobian;
use crate::operators::imaging::ImagingOperator;

pub struct LinearizedOperator<'a> {
    imaging: &'a ImagingOperator,
    jac: &'a Jacobian,
}

impl<'a> LinearizedOperator<'a> {
    pub fn new(imaging: &'a ImagingOperator, jac: &'a Jacobian) -> Result<Self> {
        let img_shape = imaging.image_shape();
        if jac.scans() != img_shape.channels
            || jac.ny() != img_shape.ny
            || jac.nx() != img_shape.nx
        {
            return Err(crate::error::ReconError::Configuration(format!(
                "Jacobian covers {} scans on a {}x{} grid, imaging operator expects {}",
                jac.scans(),
                jac.ny(),
                jac.nx(),
                img_shape
            )));
        }
        Ok(Self { imaging, jac })
    }

    pub fn input_shape(&self) -> Shape {
        Shape::new(self.jac.unknowns(), self.jac.ny(), self.jac.nx())
    }

    pub fn output_shape(&self) -> KspaceShape {
        self.imaging.kspace_shape()
    }

    /// `A (J x)`: chain the frozen derivatives, then sample k-space.
    /// `scratch` must have the imaging operator's image shape.
    pub fn forward(&self, x: &Field, scratch: &mut Field, out: &mut Kspace) -> Result<()> {
        x.check_shape(self.input_shape(), "linearized forward input")?;
        scratch.check_shape(self.imaging.image_shape(), "linearized forward scratch")?;

        let n = self.jac.ny() * self.jac.nx();
        for s in 0..self.jac.scans() {
            let plane = scratch.plane_mut(s);
            for v in plane.iter_mut() {
                *v = Complex32::new(0.0, 0.0);
            }
            for u in 0..self.jac.unknowns() {
                let d = self.jac.plane(s, u);
                let xs = &x.data()[u * n..(u + 1) * n];
                for i in 0..n {
                    plane[i] += d[i] * xs[i];
                }
            }
        }
        self.imaging.forward(scratch, out)
    }

    /// `J^H (A^H y)`: regrid to scan images, then collapse onto the unknowns
    /// with the conjugate derivatives.
    pub fn adjoint(&self, y: &Kspace, scratch: &mut Field, out: &mut Field) -> Result<()> {
        out.check_shape(self.input_shape(), "linearized adjoint output")?;
        scratch.check_shape(self.imaging.image_shape(), "linearized adjoint scratch")?;

        self.imaging.adjoint(y, scratch)?;

        let n = self.jac.ny() * self.jac.nx();
        out.fill_zero();
        for s in 0..self.jac.scans() {
            let plane = scratch.plane(s);
            for u in 0..self.jac.unknowns() {
                let d = self.jac.plane(s, u);
                let xs = &mut out.data_mut()[u * n..(u + 1) * n];
                for i in 0..n {
                    xs[i] += d[i].conj() * plane[i];
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operators::imaging::Sampling;

    fn filled_field(channels: usize, ny: usize, nx: usize, seed: f32) -> Field {
        let mut f = Field::zeros(channels, ny, nx);
        for (i, v) in f.data_mut().iter_mut().enumerate() {
            *v = Complex32::new((i as f32 * seed).sin(), (i as f32 * seed * 1.9).cos());
        }
        f
    }

    #[test]
    fn test_adjoint_identity() {
        let (ny, nx, scans, coils, unknowns) = (6, 6, 3, 2, 2);
        let sens = filled_field(coils, ny, nx, 0.21);
        let op = ImagingOperator::new(
            sens,
            scans,
            Sampling::Cartesian {
                mask: vec![1.0; scans * ny * nx],
            },
        )
        .unwrap();

        let mut jac = Jacobian::zeros(scans, unknowns, ny, nx);
        for s in 0..scans {
            for u in 0..unknowns {
                for (i, v) in jac.plane_mut(s, u).iter_mut().enumerate() {
                    *v = Complex32::new(
                        ((s + u) as f32 + i as f32 * 0.03).cos(),
                        (i as f32 * 0.07).sin(),
                    );
                }
            }
        }
        let lin = LinearizedOperator::new(&op, &jac).unwrap();

        let x = filled_field(unknowns, ny, nx, 0.15);
        let mut y = Kspace::zeros(op.kspace_shape());
        for (i, v) in y.data_mut().iter_mut().enumerate() {
            *v = Complex32::new((i as f32 * 0.09).sin(), (i as f32 * 0.27).cos());
        }

        let mut scratch = Field::zeros(scans, ny, nx);
        let mut ax = Kspace::zeros(op.kspace_shape());
        lin.forward(&x, &mut scratch, &mut ax).unwrap();
        let mut aty = Field::zeros(unknowns, ny, nx);
        lin.adjoint(&y, &mut scratch, &mut aty).unwrap();

        let lhs = ax.dot(&y);
        let rhs = x.dot(&aty);
        let rel = (lhs - rhs).norm() / (lhs.norm() + rhs.norm()).max(1e-12);
        assert!(rel < 1e-5, "adjoint identity violated: {} vs {}", lhs, rhs);
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let sens = filled_field(2, 4, 4, 0.3);
        let op = ImagingOperator::new(
            sens,
            2,
            Sampling::Cartesian {
                mask: vec![1.0; 2 * 16],
            },
        )
        .unwrap();
        let jac = Jacobian::zeros(3, 2, 4, 4);
        assert!(LinearizedOperator::new(&op, &jac).is_err());
    }
}
