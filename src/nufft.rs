//! Gridding non-uniform Fourier transform.
//!
//! Kaiser-Bessel interpolation on a two-fold oversampled grid: the image is
//! deapodized, zero-padded, transformed with the unitary FFT and interpolated
//! onto the trajectory; the adjoint runs the exact transpose of every step
//! (scatter with the same kernel weights, inverse unitary FFT, crop,
//! deapodize), so the pair satisfies the adjoint identity to rounding error.
//!
//! The interpolation table and deapodization weights are precomputed at
//! construction and immutable afterwards.

use num_complex::Complex32;

use crate::error::{ReconError, Result};
use crate::fft::{fftshift2, FftPlan2d};
use crate::field::idx2d;

/// Grid oversampling factor.
const OVERSAMPLING: usize = 2;
/// Interpolation kernel width in oversampled grid units.
const KERNEL_WIDTH: usize = 4;
/// Kernel lookup table resolution.
const TABLE_LEN: usize = 512;

/// Kaiser-Bessel gridding NUFFT for one trajectory.
pub struct KbNufft {
    ny: usize,
    nx: usize,
    gy: usize,
    gx: usize,
    table: Vec<f32>,
    deapo: Vec<f32>,
    plan: FftPlan2d,
    traj: Vec<[f32; 2]>,
}

impl KbNufft {
    /// Build the transform for an `ny x nx` image and k-space coordinates in
    /// cycles per pixel, each component in `[-0.5, 0.5]`.
    pub fn new(ny: usize, nx: usize, traj: Vec<[f32; 2]>) -> Result<Self> {
        if ny == 0 || nx == 0 {
            return Err(ReconError::Configuration(format!(
                "non-uniform transform needs a non-empty grid, got {}x{}",
                ny, nx
            )));
        }
        if traj.is_empty() {
            return Err(ReconError::Configuration(
                "non-uniform transform needs at least one trajectory point".into(),
            ));
        }
        for (i, k) in traj.iter().enumerate() {
            if !(k[0].is_finite() && k[1].is_finite()) || k[0].abs() > 0.5 || k[1].abs() > 0.5 {
                return Err(ReconError::Configuration(format!(
                    "trajectory point {} out of range [-0.5, 0.5]: ({}, {})",
                    i, k[0], k[1]
                )));
            }
        }

        let gy = OVERSAMPLING * ny;
        let gx = OVERSAMPLING * nx;

        // Beatty's beta for this width/oversampling pair.
        let w = KERNEL_WIDTH as f64;
        let os = OVERSAMPLING as f64;
        let beta = std::f64::consts::PI * ((w * w) / (os * os) * (os - 0.5) * (os - 0.5) - 0.8).sqrt();

        let radius = w / 2.0;
        let i0_beta = bessel_i0(beta);
        let table: Vec<f32> = (0..TABLE_LEN)
            .map(|t| {
                let d = t as f64 / (TABLE_LEN - 1) as f64 * radius;
                let arg = 1.0 - (d / radius) * (d / radius);
                (bessel_i0(beta * arg.max(0.0).sqrt()) / i0_beta) as f32
            })
            .collect();

        let mut deapo = vec![0.0f32; ny * nx];
        let c0 = sinc_kb(-(beta * beta));
        for y in 0..ny {
            let ry = y as f64 - (ny / 2) as f64;
            let cy = sinc_kb(sq(std::f64::consts::PI * w * ry / gy as f64) - beta * beta) / c0;
            for x in 0..nx {
                let rx = x as f64 - (nx / 2) as f64;
                let cx = sinc_kb(sq(std::f64::consts::PI * w * rx / gx as f64) - beta * beta) / c0;
                deapo[idx2d(x, y, nx)] = (1.0 / (cx * cy).max(1e-3)) as f32;
            }
        }

        Ok(Self {
            ny,
            nx,
            gy,
            gx,
            table,
            deapo,
            plan: FftPlan2d::new(gy, gx),
            traj,
        })
    }

    /// Number of k-space samples per application.
    pub fn samples(&self) -> usize {
        self.traj.len()
    }

    pub fn image_len(&self) -> usize {
        self.ny * self.nx
    }

    fn kernel(&self, d: f32) -> f32 {
        let radius = KERNEL_WIDTH as f32 / 2.0;
        if d >= radius {
            return 0.0;
        }
        let f = d / radius * (TABLE_LEN - 1) as f32;
        let i = f as usize;
        let frac = f - i as f32;
        if i + 1 < TABLE_LEN {
            self.table[i] * (1.0 - frac) + self.table[i + 1] * frac
        } else {
            self.table[TABLE_LEN - 1]
        }
    }

    /// Image to trajectory samples.
    pub fn forward(&self, img: &[Complex32], out: &mut [Complex32]) {
        debug_assert_eq!(img.len(), self.ny * self.nx);
        debug_assert_eq!(out.len(), self.traj.len());

        let (gx, gy) = (self.gx, self.gy);
        let (ox, oy) = ((gx - self.nx) / 2, (gy - self.ny) / 2);

        let mut grid = vec![Complex32::new(0.0, 0.0); gx * gy];
        for y in 0..self.ny {
            for x in 0..self.nx {
                let src = idx2d(x, y, self.nx);
                grid[idx2d(x + ox, y + oy, gx)] = img[src] * self.deapo[src];
            }
        }

        fftshift2(&mut grid, gy, gx);
        self.plan.forward(&mut grid);
        fftshift2(&mut grid, gy, gx);

        let radius = KERNEL_WIDTH as f32 / 2.0;
        for (s, k) in self.traj.iter().enumerate() {
            let cu = k[0] * gx as f32 + (gx / 2) as f32;
            let cv = k[1] * gy as f32 + (gy / 2) as f32;
            let u0 = (cu - radius).ceil() as i64;
            let v0 = (cv - radius).ceil() as i64;

            let mut acc = Complex32::new(0.0, 0.0);
            for dv in 0..KERNEL_WIDTH as i64 {
                let v = v0 + dv;
                let wv = self.kernel((cv - v as f32).abs());
                if wv == 0.0 {
                    continue;
                }
                let vi = v.rem_euclid(gy as i64) as usize;
                for du in 0..KERNEL_WIDTH as i64 {
                    let u = u0 + du;
                    let wu = self.kernel((cu - u as f32).abs());
                    if wu == 0.0 {
                        continue;
                    }
                    let ui = u.rem_euclid(gx as i64) as usize;
                    acc += grid[idx2d(ui, vi, gx)] * (wu * wv);
                }
            }
            out[s] = acc;
        }
    }

    /// Trajectory samples to image; exact transpose of [`KbNufft::forward`].
    pub fn adjoint(&self, samples: &[Complex32], out: &mut [Complex32]) {
        debug_assert_eq!(samples.len(), self.traj.len());
        debug_assert_eq!(out.len(), self.ny * self.nx);

        let (gx, gy) = (self.gx, self.gy);
        let (ox, oy) = ((gx - self.nx) / 2, (gy - self.ny) / 2);
        let radius = KERNEL_WIDTH as f32 / 2.0;

        let mut grid = vec![Complex32::new(0.0, 0.0); gx * gy];
        for (s, k) in self.traj.iter().enumerate() {
            let cu = k[0] * gx as f32 + (gx / 2) as f32;
            let cv = k[1] * gy as f32 + (gy / 2) as f32;
            let u0 = (cu - radius).ceil() as i64;
            let v0 = (cv - radius).ceil() as i64;

            for dv in 0..KERNEL_WIDTH as i64 {
                let v = v0 + dv;
                let wv = self.kernel((cv - v as f32).abs());
                if wv == 0.0 {
                    continue;
                }
                let vi = v.rem_euclid(gy as i64) as usize;
                for du in 0..KERNEL_WIDTH as i64 {
                    let u = u0 + du;
                    let wu = self.kernel((cu - u as f32).abs());
                    if wu == 0.0 {
                        continue;
                    }
                    let ui = u.rem_euclid(gx as i64) as usize;
                    grid[idx2d(ui, vi, gx)] += samples[s] * (wu * wv);
                }
            }
        }

        fftshift2(&mut grid, gy, gx);
        self.plan.inverse(&mut grid);
        fftshift2(&mut grid, gy, gx);

        for y in 0..self.ny {
            for x in 0..self.nx {
                let dst = idx2d(x, y, self.nx);
                out[dst] = grid[idx2d(x + ox, y + oy, gx)] * self.deapo[dst];
            }
        }
    }
}

fn sq(x: f64) -> f64 {
    x * x
}

/// `sin(sqrt(t))/sqrt(t)` continued through `t <= 0` as `sinh(sqrt(-t))/sqrt(-t)`,
/// the closed-form Fourier transform of the Kaiser-Bessel window.
fn sinc_kb(t: f64) -> f64 {
    if t > 1e-12 {
        let s = t.sqrt();
        s.sin() / s
    } else if t < -1e-12 {
        let s = (-t).sqrt();
        s.sinh() / s
    } else {
        1.0
    }
}

/// Modified Bessel function of the first kind, order zero (power series).
fn bessel_i0(x: f64) -> f64 {
    let half = x / 2.0;
    let mut term = 1.0;
    let mut sum = 1.0;
    for k in 1..64 {
        term *= (half / k as f64) * (half / k as f64);
        sum += term;
        if term < sum * 1e-14 {
            break;
        }
    }
    sum
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bessel_i0_reference() {
        // Abramowitz & Stegun table values.
        assert!((bessel_i0(0.0) - 1.0).abs() < 1e-12);
        assert!((bessel_i0(1.0) - 1.2660658).abs() < 1e-6);
        assert!((bessel_i0(2.0) - 2.2795853).abs() < 1e-6);
    }

    #[test]
    fn test_trajectory_validation() {
        assert!(KbNufft::new(8, 8, vec![[0.7, 0.0]]).is_err());
        assert!(KbNufft::new(8, 8, vec![]).is_err());
        assert!(KbNufft::new(8, 8, vec![[0.25, -0.5]]).is_ok());
    }

    #[test]
    fn test_constant_image_concentrates_at_dc() {
        let (ny, nx) = (16, 16);
        let nufft = KbNufft::new(ny, nx, vec![[0.0, 0.0], [0.4, 0.3]]).unwrap();
        let img = vec![Complex32::new(1.0, 0.0); ny * nx];
        let mut out = vec![Complex32::new(0.0, 0.0); 2];
        nufft.forward(&img, &mut out);
        assert!(
            out[0].norm() > 50.0 * out[1].norm(),
            "DC sample {} not dominant over high frequency {}",
            out[0].norm(),
            out[1].norm()
        );
    }

    #[test]
    fn test_adjoint_identity() {
        let (ny, nx) = (12, 10);
        let traj: Vec<[f32; 2]> = (0..40)
            .map(|i| {
                let a = i as f32 * 0.37;
                [0.45 * (a.sin() * 0.9), 0.45 * ((a * 1.7).cos() * 0.9)]
            })
            .collect();
        let nufft = KbNufft::new(ny, nx, traj).unwrap();

        let x: Vec<Complex32> = (0..ny * nx)
            .map(|i| Complex32::new((i as f32 * 0.13).sin(), (i as f32 * 0.29).cos()))
            .collect();
        let y: Vec<Complex32> = (0..nufft.samples())
            .map(|i| Complex32::new((i as f32 * 0.41).cos(), (i as f32 * 0.23).sin()))
            .collect();

        let mut fx = vec![Complex32::new(0.0, 0.0); nufft.samples()];
        nufft.forward(&x, &mut fx);
        let mut ahy = vec![Complex32::new(0.0, 0.0); ny * nx];
        nufft.adjoint(&y, &mut ahy);

        let lhs: num_complex::Complex64 = fx
            .iter()
            .zip(y.iter())
            .map(|(a, b)| {
                let p = a.conj() * b;
                num_complex::Complex64::new(p.re as f64, p.im as f64)
            })
            .sum();
        let rhs: num_complex::Complex64 = x
            .iter()
            .zip(ahy.iter())
            .map(|(a, b)| {
                let p = a.conj() * b;
                num_complex::Complex64::new(p.re as f64, p.im as f64)
            })
            .sum();

        let rel = (lhs - rhs).norm() / (lhs.norm() + rhs.norm()).max(1e-12);
        assert!(rel < 1e-4, "adjoint identity violated: {} vs {}", lhs, rhs);
    }
}
