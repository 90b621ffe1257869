//! Symmetrized finite-difference gradient operator.
//!
//! Maps a per-unknown 2-vector field `v = (vx, vy)` to the symmetric tensor
//! `E(v)` with components `xx = dx vx`, `yy = dy vy` and
//! `xy = 0.5 (dy vx + dx vy)`. The off-diagonal component is stored once;
//! norms and projections downstream are taken over the stored components so
//! the forward/adjoint pair below is an exact transpose under the plain
//! inner product. Differences use the same trailing-edge Neumann convention
//! as the gradient operator.
//!
//! Channel layout: input `2u` (vx), `2u + 1` (vy); output `3u` (xx),
//! `3u + 1` (yy), `3u + 2` (xy).

use num_complex::Complex32;

use crate::error::Result;
use crate::field::{idx2d, Field, Shape};

pub struct SymGradOp {
    unknowns: usize,
    ny: usize,
    nx: usize,
    hx: f32,
    hy: f32,
}

impl SymGradOp {
    pub fn new(unknowns: usize, ny: usize, nx: usize, vsx: f32, vsy: f32) -> Self {
        Self {
            unknowns,
            ny,
            nx,
            hx: 1.0 / vsx,
            hy: 1.0 / vsy,
        }
    }

    pub fn input_shape(&self) -> Shape {
        Shape::new(2 * self.unknowns, self.ny, self.nx)
    }

    pub fn output_shape(&self) -> Shape {
        Shape::new(3 * self.unknowns, self.ny, self.nx)
    }

    pub fn forward(&self, v: &Field, out: &mut Field) -> Result<()> {
        v.check_shape(self.input_shape(), "symmetrized gradient forward input")?;
        out.check_shape(self.output_shape(), "symmetrized gradient forward output")?;

        let (nx, ny) = (self.nx, self.ny);
        let n = nx * ny;
        let zero = Complex32::new(0.0, 0.0);
        for u in 0..self.unknowns {
            let vx = 2 * u * n;
            let vy = (2 * u + 1) * n;
            let xx = 3 * u * n;
            let yy = (3 * u + 1) * n;
            let xy = (3 * u + 2) * n;
            let data = v.data();
            let o = out.data_mut();
            for yi in 0..ny {
                for xi in 0..nx {
                    let idx = idx2d(xi, yi, nx);
                    let dvx_dx = if xi + 1 < nx {
                        (data[vx + idx + 1] - data[vx + idx]) * self.hx
                    } else {
                        zero
                    };
                    let dvy_dx = if xi + 1 < nx {
                        (data[vy + idx + 1] - data[vy + idx]) * self.hx
                    } else {
                        zero
                    };
                    let dvx_dy = if yi + 1 < ny {
                        (data[vx + idx + nx] - data[vx + idx]) * self.hy
                    } else {
                        zero
                    };
                    let dvy_dy = if yi + 1 < ny {
                        (data[vy + idx + nx] - data[vy + idx]) * self.hy
                    } else {
                        zero
                    };
                    o[xx + idx] = dvx_dx;
                    o[yy + idx] = dvy_dy;
                    o[xy + idx] = (dvx_dy + dvy_dx) * 0.5;
                }
            }
        }
        Ok(())
    }

    /// Symmetrized divergence (with the adjoint's negative sign); exact
    /// transpose of [`SymGradOp::forward`].
    pub fn adjoint(&self, q: &Field, out: &mut Field) -> Result<()> {
        q.check_shape(self.output_shape(), "symmetrized gradient adjoint input")?;
        out.check_shape(self.input_shape(), "symmetrized gradient adjoint output")?;

        let (nx, ny) = (self.nx, self.ny);
        let n = nx * ny;
        let zero = Complex32::new(0.0, 0.0);
        for u in 0..self.unknowns {
            let xx = 3 * u * n;
            let yy = (3 * u + 1) * n;
            let xy = (3 * u + 2) * n;
            let vx = 2 * u * n;
            let vy = (2 * u + 1) * n;
            let data = q.data();
            let o = out.data_mut();
            for yi in 0..ny {
                for xi in 0..nx {
                    let idx = idx2d(xi, yi, nx);

                    let at_x = xi + 1 < nx;
                    let at_y = yi + 1 < ny;

                    let xx_c = if at_x { data[xx + idx] } else { zero };
                    let xx_m = if xi > 0 { data[xx + idx - 1] } else { zero };
                    let yy_c = if at_y { data[yy + idx] } else { zero };
                    let yy_m = if yi > 0 { data[yy + idx - nx] } else { zero };

                    // xy feeds both components, halved as in the forward.
                    let xy_cx = if at_x { data[xy + idx] } else { zero };
                    let xy_mx = if xi > 0 { data[xy + idx - 1] } else { zero };
                    let xy_cy = if at_y { data[xy + idx] } else { zero };
                    let xy_my = if yi > 0 { data[xy + idx - nx] } else { zero };

                    o[vx + idx] = -((xx_c - xx_m) * self.hx + (xy_cy - xy_my) * (0.5 * self.hy));
                    o[vy + idx] = -((yy_c - yy_m) * self.hy + (xy_cx - xy_mx) * (0.5 * self.hx));
                }
            }
        }
        Ok(())
    }
}
