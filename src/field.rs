//! Array containers for images, parameter maps and k-space data.
//!
//! Data is stored flat in Fortran order, `index = x + y*nx + channel*nx*ny`,
//! matching the layout the operator kernels iterate in. Shapes are fixed at
//! construction and every operator checks them on entry.

use num_complex::Complex32;

use crate::error::{ReconError, Result};

/// Shape of a [`Field`]: channel count and spatial extent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Shape {
    pub channels: usize,
    pub ny: usize,
    pub nx: usize,
}

impl Shape {
    pub fn new(channels: usize, ny: usize, nx: usize) -> Self {
        Self { channels, ny, nx }
    }

    /// Voxels per channel plane.
    pub fn plane_len(&self) -> usize {
        self.ny * self.nx
    }

    pub fn len(&self) -> usize {
        self.channels * self.ny * self.nx
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Display for Shape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "(channels={}, ny={}, nx={})", self.channels, self.ny, self.nx)
    }
}

/// A multi-channel complex-valued 2-D field (image, parameter map or
/// derivative field).
#[derive(Clone, Debug)]
pub struct Field {
    shape: Shape,
    data: Vec<Complex32>,
}

impl Field {
    pub fn zeros(channels: usize, ny: usize, nx: usize) -> Self {
        let shape = Shape::new(channels, ny, nx);
        Self {
            data: vec![Complex32::new(0.0, 0.0); shape.len()],
            shape,
        }
    }

    pub fn from_data(shape: Shape, data: Vec<Complex32>) -> Result<Self> {
        if data.len() != shape.len() {
            return Err(ReconError::Configuration(format!(
                "field data length {} does not match shape {}",
                data.len(),
                shape
            )));
        }
        Ok(Self { shape, data })
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn channels(&self) -> usize {
        self.shape.channels
    }

    pub fn ny(&self) -> usize {
        self.shape.ny
    }

    pub fn nx(&self) -> usize {
        self.shape.nx
    }

    /// One channel plane, `ny * nx` voxels.
    pub fn plane(&self, channel: usize) -> &[Complex32] {
        let n = self.shape.plane_len();
        &self.data[channel * n..(channel + 1) * n]
    }

    pub fn plane_mut(&mut self, channel: usize) -> &mut [Complex32] {
        let n = self.shape.plane_len();
        &mut self.data[channel * n..(channel + 1) * n]
    }

    pub fn data(&self) -> &[Complex32] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [Complex32] {
        &mut self.data
    }

    pub fn fill_zero(&mut self) {
        self.data.fill(Complex32::new(0.0, 0.0));
    }

    pub fn copy_from(&mut self, other: &Field) {
        debug_assert_eq!(self.shape, other.shape);
        self.data.copy_from_slice(&other.data);
    }

    /// Fails with `ShapeMismatch` unless this field has the expected shape.
    pub fn check_shape(&self, expected: Shape, context: &'static str) -> Result<()> {
        if self.shape != expected {
            return Err(ReconError::ShapeMismatch {
                context,
                expected: expected.to_string(),
                got: self.shape.to_string(),
            });
        }
        Ok(())
    }

    /// Conjugated inner product `<self, other> = sum conj(a_i) * b_i`,
    /// accumulated in f64 so adjoint identities can be tested tightly.
    pub fn dot(&self, other: &Field) -> num_complex::Complex64 {
        debug_assert_eq!(self.shape, other.shape);
        let mut re = 0.0f64;
        let mut im = 0.0f64;
        for (a, b) in self.data.iter().zip(other.data.iter()) {
            let p = a.conj() * b;
            re += p.re as f64;
            im += p.im as f64;
        }
        num_complex::Complex64::new(re, im)
    }

    pub fn norm_sq(&self) -> f64 {
        self.data.iter().map(|c| c.norm_sqr() as f64).sum()
    }

    /// First non-finite entry, as (channel, voxel, value), if any.
    pub fn first_non_finite(&self) -> Option<(usize, usize, Complex32)> {
        let n = self.shape.plane_len();
        for (i, &v) in self.data.iter().enumerate() {
            if !(v.re.is_finite() && v.im.is_finite()) {
                return Some((i / n, i % n, v));
            }
        }
        None
    }
}

/// Shape of a [`Kspace`] container: per-scan, per-coil sample blocks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KspaceShape {
    pub scans: usize,
    pub coils: usize,
    /// Samples per (scan, coil) block: the full grid for Cartesian sampling,
    /// the trajectory length for non-uniform sampling.
    pub samples: usize,
}

impl KspaceShape {
    pub fn new(scans: usize, coils: usize, samples: usize) -> Self {
        Self { scans, coils, samples }
    }

    pub fn len(&self) -> usize {
        self.scans * self.coils * self.samples
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Display for KspaceShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "(scans={}, coils={}, samples={})",
            self.scans, self.coils, self.samples
        )
    }
}

/// Raw or synthetic k-space samples, one block per (scan, coil) pair.
#[derive(Clone, Debug)]
pub struct Kspace {
    shape: KspaceShape,
    data: Vec<Complex32>,
}

impl Kspace {
    pub fn zeros(shape: KspaceShape) -> Self {
        Self {
            data: vec![Complex32::new(0.0, 0.0); shape.len()],
            shape,
        }
    }

    pub fn from_data(shape: KspaceShape, data: Vec<Complex32>) -> Result<Self> {
        if data.len() != shape.len() {
            return Err(ReconError::Configuration(format!(
                "k-space data length {} does not match shape {}",
                data.len(),
                shape
            )));
        }
        Ok(Self { shape, data })
    }

    pub fn shape(&self) -> KspaceShape {
        self.shape
    }

    pub fn block(&self, scan: usize, coil: usize) -> &[Complex32] {
        let n = self.shape.samples;
        let start = (scan * self.shape.coils + coil) * n;
        &self.data[start..start + n]
    }

    pub fn block_mut(&mut self, scan: usize, coil: usize) -> &mut [Complex32] {
        let n = self.shape.samples;
        let start = (scan * self.shape.coils + coil) * n;
        &mut self.data[start..start + n]
    }

    pub fn data(&self) -> &[Complex32] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [Complex32] {
        &mut self.data
    }

    pub fn fill_zero(&mut self) {
        self.data.fill(Complex32::new(0.0, 0.0));
    }

    pub fn check_shape(&self, expected: KspaceShape, context: &'static str) -> Result<()> {
        if self.shape != expected {
            return Err(ReconError::ShapeMismatch {
                context,
                expected: expected.to_string(),
                got: self.shape.to_string(),
            });
        }
        Ok(())
    }

    pub fn dot(&self, other: &Kspace) -> num_complex::Complex64 {
        debug_assert_eq!(self.shape, other.shape);
        let mut re = 0.0f64;
        let mut im = 0.0f64;
        for (a, b) in self.data.iter().zip(other.data.iter()) {
            let p = a.conj() * b;
            re += p.re as f64;
            im += p.im as f64;
        }
        num_complex::Complex64::new(re, im)
    }

    pub fn norm_sq(&self) -> f64 {
        self.data.iter().map(|c| c.norm_sqr() as f64).sum()
    }
}

/// Index into a channel plane stored in Fortran order, `x + y*nx`.
#[inline(always)]
pub fn idx2d(x: usize, y: usize, nx: usize) -> usize {
    x + y * nx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plane_layout() {
        let mut f = Field::zeros(2, 3, 4);
        f.plane_mut(1)[idx2d(2, 1, 4)] = Complex32::new(5.0, 0.0);
        assert_eq!(f.data()[3 * 4 + 6].re, 5.0);
    }

    #[test]
    fn test_shape_check() {
        let f = Field::zeros(1, 4, 4);
        assert!(f.check_shape(Shape::new(1, 4, 4), "test").is_ok());
        let err = f.check_shape(Shape::new(2, 4, 4), "test").unwrap_err();
        assert!(matches!(err, ReconError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_non_finite_detection() {
        let mut f = Field::zeros(2, 2, 2);
        assert!(f.first_non_finite().is_none());
        f.plane_mut(1)[3] = Complex32::new(f32::NAN, 0.0);
        let (ch, voxel, _) = f.first_non_finite().unwrap();
        assert_eq!((ch, voxel), (1, 3));
    }
}
