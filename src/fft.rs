//! 2-D FFT built on rustfft.
//!
//! Plans are created once and cached; both directions are scaled by
//! `1/sqrt(n)` so forward and inverse are unitary and exact adjoints of each
//! other. Methods take `&self` (plans are thread-safe) so coil loops can run
//! in parallel; per-call scratch is allocated locally.

use std::sync::Arc;

use num_complex::Complex32;
use rustfft::{Fft, FftDirection, FftPlanner};

use crate::field::idx2d;

/// Cached unitary 2-D FFT plans for a fixed grid size.
pub struct FftPlan2d {
    ny: usize,
    nx: usize,
    fwd_x: Arc<dyn Fft<f32>>,
    fwd_y: Arc<dyn Fft<f32>>,
    inv_x: Arc<dyn Fft<f32>>,
    inv_y: Arc<dyn Fft<f32>>,
}

impl FftPlan2d {
    pub fn new(ny: usize, nx: usize) -> Self {
        let mut planner = FftPlanner::<f32>::new();
        Self {
            ny,
            nx,
            fwd_x: planner.plan_fft(nx, FftDirection::Forward),
            fwd_y: planner.plan_fft(ny, FftDirection::Forward),
            inv_x: planner.plan_fft(nx, FftDirection::Inverse),
            inv_y: planner.plan_fft(ny, FftDirection::Inverse),
        }
    }

    pub fn ny(&self) -> usize {
        self.ny
    }

    pub fn nx(&self) -> usize {
        self.nx
    }

    /// In-place forward 2-D FFT, unitary scaling.
    pub fn forward(&self, data: &mut [Complex32]) {
        debug_assert_eq!(data.len(), self.nx * self.ny);
        self.transform(data, &self.fwd_x, &self.fwd_y);
    }

    /// In-place inverse 2-D FFT, unitary scaling. Exact adjoint of
    /// [`FftPlan2d::forward`].
    pub fn inverse(&self, data: &mut [Complex32]) {
        debug_assert_eq!(data.len(), self.nx * self.ny);
        self.transform(data, &self.inv_x, &self.inv_y);
    }

    fn transform(
        &self,
        data: &mut [Complex32],
        plan_x: &Arc<dyn Fft<f32>>,
        plan_y: &Arc<dyn Fft<f32>>,
    ) {
        let (nx, ny) = (self.nx, self.ny);

        // Rows are contiguous in Fortran order; transform along x first.
        let scratch_len = plan_x
            .get_inplace_scratch_len()
            .max(plan_y.get_inplace_scratch_len());
        let mut scratch = vec![Complex32::new(0.0, 0.0); scratch_len];
        for y in 0..ny {
            let start = idx2d(0, y, nx);
            plan_x.process_with_scratch(&mut data[start..start + nx], &mut scratch);
        }

        // Gather/scatter columns for the y-axis transform.
        let mut column = vec![Complex32::new(0.0, 0.0); ny];
        for x in 0..nx {
            for y in 0..ny {
                column[y] = data[idx2d(x, y, nx)];
            }
            plan_y.process_with_scratch(&mut column, &mut scratch);
            for y in 0..ny {
                data[idx2d(x, y, nx)] = column[y];
            }
        }

        let scale = 1.0 / ((nx * ny) as f32).sqrt();
        for v in data.iter_mut() {
            *v *= scale;
        }
    }
}

/// Swap quadrants so the DC sample moves between index 0 and the grid
/// center. Both dimensions must be even, which makes the shift its own
/// inverse (and its own adjoint).
pub fn fftshift2(data: &mut [Complex32], ny: usize, nx: usize) {
    debug_assert!(nx % 2 == 0 && ny % 2 == 0);
    let (hx, hy) = (nx / 2, ny / 2);
    for y in 0..hy {
        for x in 0..nx {
            let xs = (x + hx) % nx;
            let a = idx2d(x, y, nx);
            let b = idx2d(xs, y + hy, nx);
            data.swap(a, b);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_inverse_roundtrip() {
        let (ny, nx) = (4, 6);
        let plan = FftPlan2d::new(ny, nx);
        let original: Vec<Complex32> = (0..nx * ny)
            .map(|i| Complex32::new(i as f32, (i % 3) as f32))
            .collect();
        let mut data = original.clone();

        plan.forward(&mut data);
        plan.inverse(&mut data);

        for (o, r) in original.iter().zip(data.iter()) {
            assert!((o - r).norm() < 1e-4, "roundtrip mismatch: {} vs {}", o, r);
        }
    }

    #[test]
    fn test_unitary_energy() {
        let (ny, nx) = (8, 8);
        let plan = FftPlan2d::new(ny, nx);
        let mut data: Vec<Complex32> = (0..nx * ny)
            .map(|i| Complex32::new((i as f32 * 0.37).sin(), (i as f32 * 0.11).cos()))
            .collect();
        let before: f32 = data.iter().map(|c| c.norm_sqr()).sum();
        plan.forward(&mut data);
        let after: f32 = data.iter().map(|c| c.norm_sqr()).sum();
        approx::assert_relative_eq!(before, after, max_relative = 1e-5);
    }

    #[test]
    fn test_fftshift_involution() {
        let (ny, nx) = (4, 4);
        let original: Vec<Complex32> =
            (0..nx * ny).map(|i| Complex32::new(i as f32, 0.0)).collect();
        let mut data = original.clone();
        fftshift2(&mut data, ny, nx);
        assert_ne!(data[0], original[0]);
        fftshift2(&mut data, ny, nx);
        assert_eq!(data, original);
    }
}
