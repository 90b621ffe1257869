//! Linear data operator: coil sensitivities plus the sampled Fourier
//! transform.
//!
//! `forward` multiplies each scan image by every coil sensitivity and pushes
//! it through the sampling transform; `adjoint` regrids/zero-fills, inverse
//! transforms, multiplies by the conjugate sensitivity and sums over coils.
//! Both sampling variants keep their precomputed state (FFT plans,
//! interpolation tables) immutable after construction, so applications are
//! data-parallel over (scan, coil) blocks.

use num_complex::Complex32;
use rayon::prelude::*;

use crate::error::{ReconError, Result};
use crate::fft::FftPlan2d;
use crate::field::{Field, Kspace, KspaceShape, Shape};
use crate::nufft::KbNufft;

/// How k-space is sampled, per scan.
pub enum Sampling {
    /// Uniform grid with a per-scan binary (or density-weighted) mask of
    /// length `scans * ny * nx`.
    Cartesian { mask: Vec<f32> },
    /// One trajectory per scan, coordinates in cycles per pixel in
    /// `[-0.5, 0.5]`. All trajectories must have the same length.
    NonUniform { trajectories: Vec<Vec<[f32; 2]>> },
}

enum Transform {
    Cartesian { mask: Vec<f32>, plan: FftPlan2d },
    NonUniform { nuffts: Vec<KbNufft> },
}

/// Forward/adjoint imaging operator for one reconstruction run.
pub struct ImagingOperator {
    coils: Field,
    scans: usize,
    ny: usize,
    nx: usize,
    samples: usize,
    transform: Transform,
}

impl ImagingOperator {
    pub fn new(coils: Field, scans: usize, sampling: Sampling) -> Result<Self> {
        let (ny, nx) = (coils.ny(), coils.nx());
        if coils.channels() == 0 || scans == 0 {
            return Err(ReconError::Configuration(
                "imaging operator needs at least one coil and one scan".into(),
            ));
        }
        if ny == 0 || nx == 0 {
            return Err(ReconError::Configuration(format!(
                "imaging operator needs a non-empty grid, got {}x{}",
                ny, nx
            )));
        }

        let (samples, transform) = match sampling {
            Sampling::Cartesian { mask } => {
                let expected = scans * ny * nx;
                if mask.len() != expected {
                    return Err(ReconError::Configuration(format!(
                        "sampling mask length {} does not match {} scans on a {}x{} grid (expected {})",
                        mask.len(),
                        scans,
                        ny,
                        nx,
                        expected
                    )));
                }
                (
                    ny * nx,
                    Transform::Cartesian {
                        mask,
                        plan: FftPlan2d::new(ny, nx),
                    },
                )
            }
            Sampling::NonUniform { trajectories } => {
                if trajectories.len() != scans {
                    return Err(ReconError::Configuration(format!(
                        "{} trajectories supplied for {} scans",
                        trajectories.len(),
                        scans
                    )));
                }
                let samples = trajectories[0].len();
                if trajectories.iter().any(|t| t.len() != samples) {
                    return Err(ReconError::Configuration(
                        "all scan trajectories must have the same length".into(),
                    ));
                }
                let nuffts = trajectories
                    .into_iter()
                    .map(|t| KbNufft::new(ny, nx, t))
                    .collect::<Result<Vec<_>>>()?;
                (samples, Transform::NonUniform { nuffts })
            }
        };

        Ok(Self {
            coils,
            scans,
            ny,
            nx,
            samples,
            transform,
        })
    }

    pub fn coils(&self) -> &Field {
        &self.coils
    }

    pub fn scans(&self) -> usize {
        self.scans
    }

    pub fn ny(&self) -> usize {
        self.ny
    }

    pub fn nx(&self) -> usize {
        self.nx
    }

    /// Shape of the per-scan image stack this operator consumes.
    pub fn image_shape(&self) -> Shape {
        Shape::new(self.scans, self.ny, self.nx)
    }

    pub fn kspace_shape(&self) -> KspaceShape {
        KspaceShape::new(self.scans, self.coils.channels(), self.samples)
    }

    /// Per-scan images to k-space samples.
    pub fn forward(&self, img: &Field, out: &mut Kspace) -> Result<()> {
        img.check_shape(self.image_shape(), "imaging forward input")?;
        out.check_shape(self.kspace_shape(), "imaging forward output")?;

        let coils = self.coils.channels();
        let n = self.ny * self.nx;
        out.data_mut()
            .par_chunks_mut(self.samples)
            .enumerate()
            .for_each(|(block, out_block)| {
                let (s, c) = (block / coils, block % coils);
                let sens = self.coils.plane(c);
                let image = img.plane(s);

                let mut weighted = vec![Complex32::new(0.0, 0.0); n];
                for i in 0..n {
                    weighted[i] = sens[i] * image[i];
                }

                match &self.transform {
                    Transform::Cartesian { mask, plan } => {
                        plan.forward(&mut weighted);
                        let m = &mask[s * n..(s + 1) * n];
                        for i in 0..n {
                            out_block[i] = weighted[i] * m[i];
                        }
                    }
                    Transform::NonUniform { nuffts } => {
                        nuffts[s].forward(&weighted, out_block);
                    }
                }
            });
        Ok(())
    }

    /// K-space samples to per-scan images; exact adjoint of
    /// [`ImagingOperator::forward`].
    pub fn adjoint(&self, ksp: &Kspace, out: &mut Field) -> Result<()> {
        ksp.check_shape(self.kspace_shape(), "imaging adjoint input")?;
        out.check_shape(self.image_shape(), "imaging adjoint output")?;

        let coils = self.coils.channels();
        let n = self.ny * self.nx;
        out.data_mut()
            .par_chunks_mut(n)
            .enumerate()
            .for_each(|(s, out_plane)| {
                for v in out_plane.iter_mut() {
                    *v = Complex32::new(0.0, 0.0);
                }
                let mut buf = vec![Complex32::new(0.0, 0.0); n];
                for c in 0..coils {
                    let block = ksp.block(s, c);
                    match &self.transform {
                        Transform::Cartesian { mask, plan } => {
                            let m = &mask[s * n..(s + 1) * n];
                            for i in 0..n {
                                buf[i] = block[i] * m[i];
                            }
                            plan.inverse(&mut buf);
                        }
                        Transform::NonUniform { nuffts } => {
                            nuffts[s].adjoint(block, &mut buf);
                        }
                    }
                    let sens = self.coils.plane(c);
                    for i in 0..n {
                        out_plane[i] += sens[i].conj() * buf[i];
                    }
                }
            });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::idx2d;

    fn smooth_coils(coils: usize, ny: usize, nx: usize) -> Field {
        // Smooth phased maps normalized so the squared sum is 1 everywhere.
        let mut field = Field::zeros(coils, ny, nx);
        let mut norm = vec![0.0f32; ny * nx];
        for c in 0..coils {
            for y in 0..ny {
                for x in 0..nx {
                    let phase = 0.3 * (c as f32 + 1.0) * (x as f32 / nx as f32);
                    let amp = 1.0 + 0.5 * ((x + y + c) as f32 / (nx + ny) as f32);
                    let v = Complex32::from_polar(amp, phase);
                    field.plane_mut(c)[idx2d(x, y, nx)] = v;
                    norm[idx2d(x, y, nx)] += v.norm_sqr();
                }
            }
        }
        for c in 0..coils {
            for (v, &ns) in field.plane_mut(c).iter_mut().zip(norm.iter()) {
                *v /= ns.sqrt();
            }
        }
        field
    }

    fn random_field(channels: usize, ny: usize, nx: usize, seed: f32) -> Field {
        let mut f = Field::zeros(channels, ny, nx);
        for (i, v) in f.data_mut().iter_mut().enumerate() {
            *v = Complex32::new((i as f32 * seed).sin(), (i as f32 * seed * 2.3).cos());
        }
        f
    }

    #[test]
    fn test_mismatched_mask_rejected() {
        let coils = smooth_coils(2, 8, 8);
        let err = ImagingOperator::new(coils, 3, Sampling::Cartesian { mask: vec![1.0; 64] });
        assert!(matches!(err, Err(ReconError::Configuration(_))));
    }

    #[test]
    fn test_empty_grid_rejected() {
        let coils = Field::zeros(1, 0, 8);
        let err = ImagingOperator::new(coils, 1, Sampling::Cartesian { mask: vec![] });
        assert!(matches!(err, Err(ReconError::Configuration(_))));
    }

    #[test]
    fn test_fully_sampled_roundtrip_is_identity() {
        let (ny, nx, nc, ns) = (8, 8, 3, 2);
        let coils = smooth_coils(nc, ny, nx);
        let op = ImagingOperator::new(
            coils,
            ns,
            Sampling::Cartesian {
                mask: vec![1.0; ns * ny * nx],
            },
        )
        .unwrap();

        let x = random_field(ns, ny, nx, 0.17);
        let mut k = Kspace::zeros(op.kspace_shape());
        op.forward(&x, &mut k).unwrap();
        let mut back = Field::zeros(ns, ny, nx);
        op.adjoint(&k, &mut back).unwrap();

        // Unitary FFT and SSOS-normalized coils make A^H A the identity.
        for (a, b) in x.data().iter().zip(back.data().iter()) {
            assert!((a - b).norm() < 1e-4, "roundtrip mismatch: {} vs {}", a, b);
        }
    }

    #[test]
    fn test_undersampling_does_not_amplify_energy() {
        let (ny, nx, nc, ns) = (8, 8, 2, 1);
        let coils = smooth_coils(nc, ny, nx);
        let mut mask = vec![0.0f32; ny * nx];
        for (i, m) in mask.iter_mut().enumerate() {
            if i % 4 == 0 {
                *m = 1.0;
            }
        }
        let op = ImagingOperator::new(coils, ns, Sampling::Cartesian { mask }).unwrap();

        let x = random_field(ns, ny, nx, 0.29);
        let mut k = Kspace::zeros(op.kspace_shape());
        op.forward(&x, &mut k).unwrap();
        let mut back = Field::zeros(ns, ny, nx);
        op.adjoint(&k, &mut back).unwrap();

        assert!(back.norm_sq() <= x.norm_sq() * (1.0 + 1e-4));
    }

    #[test]
    fn test_adjoint_identity_cartesian() {
        let (ny, nx, nc, ns) = (6, 8, 2, 3);
        let coils = smooth_coils(nc, ny, nx);
        let mut mask = vec![1.0f32; ns * ny * nx];
        for (i, m) in mask.iter_mut().enumerate() {
            if i % 3 == 1 {
                *m = 0.0;
            }
        }
        let op = ImagingOperator::new(coils, ns, Sampling::Cartesian { mask }).unwrap();

        let x = random_field(ns, ny, nx, 0.11);
        let y = {
            let mut k = Kspace::zeros(op.kspace_shape());
            for (i, v) in k.data_mut().iter_mut().enumerate() {
                *v = Complex32::new((i as f32 * 0.07).cos(), (i as f32 * 0.19).sin());
            }
            k
        };

        let mut ax = Kspace::zeros(op.kspace_shape());
        op.forward(&x, &mut ax).unwrap();
        let mut aty = Field::zeros(ns, ny, nx);
        op.adjoint(&y, &mut aty).unwrap();

        let lhs = ax.dot(&y);
        let rhs = x.dot(&aty);
        let rel = (lhs - rhs).norm() / (lhs.norm() + rhs.norm()).max(1e-12);
        assert!(rel < 1e-5, "adjoint identity violated: {} vs {}", lhs, rhs);
    }

    #[test]
    fn test_adjoint_identity_nonuniform() {
        let (ny, nx, nc, ns) = (8, 8, 2, 2);
        let coils = smooth_coils(nc, ny, nx);
        let trajectories: Vec<Vec<[f32; 2]>> = (0..ns)
            .map(|s| {
                (0..30)
                    .map(|i| {
                        let a = (i + s * 30) as f32 * 0.41;
                        [0.4 * a.sin(), 0.4 * (a * 1.3).cos()]
                    })
                    .collect()
            })
            .collect();
        let op = ImagingOperator::new(coils, ns, Sampling::NonUniform { trajectories }).unwrap();

        let x = random_field(ns, ny, nx, 0.13);
        let mut y = Kspace::zeros(op.kspace_shape());
        for (i, v) in y.data_mut().iter_mut().enumerate() {
            *v = Complex32::new((i as f32 * 0.23).sin(), (i as f32 * 0.31).cos());
        }

        let mut ax = Kspace::zeros(op.kspace_shape());
        op.forward(&x, &mut ax).unwrap();
        let mut aty = Field::zeros(ns, ny, nx);
        op.adjoint(&y, &mut aty).unwrap();

        let lhs = ax.dot(&y);
        let rhs = x.dot(&aty);
        let rel = (lhs - rhs).norm() / (lhs.norm() + rhs.norm()).max(1e-12);
        assert!(rel < 1e-4, "adjoint identity violated: {} vs {}", lhs, rhs);
    }
}
