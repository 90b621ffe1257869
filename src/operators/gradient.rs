//! Finite-difference gradient operator.
//!
//! Forward differences along x and y with a zero derivative at the trailing
//! edge (Neumann boundary); the adjoint is the negative backward divergence,
//! treating the dual's trailing entry along each axis as zero. That pair is
//! an exact transpose, so `<forward(x), y> == <x, adjoint(y)>` holds to
//! rounding error for arbitrary fields.

use num_complex::Complex32;

use crate::error::Result;
use crate::field::{idx2d, Field, Shape};

/// Gradient of a multi-channel field. Each input channel produces two output
/// channels, `2u` (d/dx) and `2u + 1` (d/dy).
pub struct GradientOp {
    channels: usize,
    ny: usize,
    nx: usize,
    hx: f32,
    hy: f32,
}

impl GradientOp {
    /// `vsx`/`vsy` are the voxel spacings; derivatives are scaled by their
    /// reciprocals.
    pub fn new(channels: usize, ny: usize, nx: usize, vsx: f32, vsy: f32) -> Self {
        Self {
            channels,
            ny,
            nx,
            hx: 1.0 / vsx,
            hy: 1.0 / vsy,
        }
    }

    pub fn input_shape(&self) -> Shape {
        Shape::new(self.channels, self.ny, self.nx)
    }

    pub fn output_shape(&self) -> Shape {
        Shape::new(2 * self.channels, self.ny, self.nx)
    }

    /// Forward differences, one derivative pair per input channel.
    pub fn forward(&self, x: &Field, out: &mut Field) -> Result<()> {
        x.check_shape(self.input_shape(), "gradient forward input")?;
        out.check_shape(self.output_shape(), "gradient forward output")?;

        let (nx, ny) = (self.nx, self.ny);
        for u in 0..self.channels {
            let n = nx * ny;
            let src = u * n;
            let dx = 2 * u * n;
            let dy = (2 * u + 1) * n;
            let data = x.data();
            let o = out.data_mut();
            for y in 0..ny {
                for xi in 0..nx {
                    let idx = idx2d(xi, y, nx);
                    let v = data[src + idx];
                    o[dx + idx] = if xi + 1 < nx {
                        (data[src + idx + 1] - v) * self.hx
                    } else {
                        Complex32::new(0.0, 0.0)
                    };
                    o[dy + idx] = if y + 1 < ny {
                        (data[src + idx + nx] - v) * self.hy
                    } else {
                        Complex32::new(0.0, 0.0)
                    };
                }
            }
        }
        Ok(())
    }

    /// Negative backward divergence; exact transpose of [`GradientOp::forward`].
    pub fn adjoint(&self, y: &Field, out: &mut Field) -> Result<()> {
        y.check_shape(self.output_shape(), "gradient adjoint input")?;
        out.check_shape(self.input_shape(), "gradient adjoint output")?;

        let (nx, ny) = (self.nx, self.ny);
        let n = nx * ny;
        let zero = Complex32::new(0.0, 0.0);
        for u in 0..self.channels {
            let dx = 2 * u * n;
            let dy = (2 * u + 1) * n;
            let dst = u * n;
            let data = y.data();
            let o = out.data_mut();
            for yi in 0..ny {
                for xi in 0..nx {
                    let idx = idx2d(xi, yi, nx);
                    // The forward operator never writes the trailing entry,
                    // so its transpose ignores it.
                    let gx = if xi + 1 < nx { data[dx + idx] } else { zero };
                    let gx_m = if xi > 0 { data[dx + idx - 1] } else { zero };
                    let gy = if yi + 1 < ny { data[dy + idx] } else { zero };
                    let gy_m = if yi > 0 { data[dy + idx - nx] } else { zero };
                    o[dst + idx] = -((gx - gx_m) * self.hx + (gy - gy_m) * self.hy);
                }
            }
        }
        Ok(())
    }
}
