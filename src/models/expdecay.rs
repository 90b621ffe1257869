//! Mono-exponential decay model for multi-echo relaxometry.
//!
//! Signal at echo time `TE_j` is `S_j = M0 * exp(-TE_j * R2)`. Unknown 0 is
//! the complex proton density `M0`, unknown 1 the real decay rate `R2`. Both
//! unknowns carry a scale factor so the solver sees values of comparable
//! magnitude; `evaluate`/`jacobian` fold the scales in, and `rescale`
//! removes them from the final estimate.

use num_complex::Complex32;

use crate::error::{ReconError, Result};
use crate::field::Field;
use crate::models::{ensure_finite, Constraint, Jacobian, SignalModel};

pub struct MonoExpModel {
    echo_times: Vec<f32>,
    ny: usize,
    nx: usize,
    m0_scale: f32,
    r2_scale: f32,
}

impl MonoExpModel {
    pub fn new(echo_times: Vec<f32>, ny: usize, nx: usize) -> Result<Self> {
        if echo_times.is_empty() {
            return Err(ReconError::Configuration(
                "mono-exponential model needs at least one echo time".into(),
            ));
        }
        if echo_times.iter().any(|t| !t.is_finite() || *t < 0.0) {
            return Err(ReconError::Configuration(
                "echo times must be finite and non-negative".into(),
            ));
        }
        Ok(Self {
            echo_times,
            ny,
            nx,
            m0_scale: 1.0,
            r2_scale: 1.0,
        })
    }

    pub fn with_scales(mut self, m0_scale: f32, r2_scale: f32) -> Self {
        self.m0_scale = m0_scale;
        self.r2_scale = r2_scale;
        self
    }

    /// Flat-magnitude starting estimate: unit M0 and a decay rate placing
    /// one time constant at the middle echo.
    pub fn default_guess(&self) -> Field {
        let mut x = Field::zeros(2, self.ny, self.nx);
        let n = self.ny * self.nx;
        let mid = self.echo_times[self.echo_times.len() / 2].max(1e-3);
        let r2 = 1.0 / mid / self.r2_scale;
        for v in &mut x.data_mut()[..n] {
            *v = Complex32::new(1.0 / self.m0_scale, 0.0);
        }
        for v in &mut x.data_mut()[n..] {
            *v = Complex32::new(r2, 0.0);
        }
        x
    }
}

impl SignalModel for MonoExpModel {
    fn unknowns(&self) -> usize {
        2
    }

    fn scans(&self) -> usize {
        self.echo_times.len()
    }

    fn evaluate(&self, x: &Field, out: &mut Field) -> Result<()> {
        x.check_shape(
            crate::field::Shape::new(2, self.ny, self.nx),
            "model evaluation input",
        )?;
        out.check_shape(
            crate::field::Shape::new(self.scans(), self.ny, self.nx),
            "model evaluation output",
        )?;

        let n = self.ny * self.nx;
        for (j, &te) in self.echo_times.iter().enumerate() {
            for i in 0..n {
                let m0 = x.plane(0)[i] * self.m0_scale;
                let r2 = x.plane(1)[i].re * self.r2_scale;
                out.plane_mut(j)[i] = m0 * (-te * r2).exp();
            }
            ensure_finite(out.plane(j), j, n, "mono-exponential signal")?;
        }
        Ok(())
    }

    fn jacobian(&self, x: &Field, jac: &mut Jacobian) -> Result<()> {
        x.check_shape(
            crate::field::Shape::new(2, self.ny, self.nx),
            "model Jacobian input",
        )?;

        let n = self.ny * self.nx;
        for (j, &te) in self.echo_times.iter().enumerate() {
            for i in 0..n {
                let m0 = x.plane(0)[i] * self.m0_scale;
                let r2 = x.plane(1)[i].re * self.r2_scale;
                let decay = (-te * r2).exp();
                jac.plane_mut(j, 0)[i] = Complex32::new(self.m0_scale * decay, 0.0);
                jac.plane_mut(j, 1)[i] = m0 * (-te * self.r2_scale * decay);
            }
            ensure_finite(jac.plane(j, 0), 2 * j, n, "mono-exponential derivative")?;
            ensure_finite(jac.plane(j, 1), 2 * j + 1, n, "mono-exponential derivative")?;
        }
        Ok(())
    }

    fn initial_guess(&self) -> Field {
        self.default_guess()
    }

    fn constraints(&self) -> Vec<Constraint> {
        vec![
            Constraint::free(),
            // Decay rates stay real and non-negative, capped well above any
            // physiological R2.
            Constraint::new(0.0, 1e3 / self.r2_scale, true),
        ]
    }

    fn scale(&self) -> Vec<f32> {
        vec![self.m0_scale, self.r2_scale]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::idx2d;

    #[test]
    fn test_signal_matches_closed_form() {
        let model = MonoExpModel::new(vec![0.0, 0.01, 0.02], 2, 2).unwrap();
        let mut x = Field::zeros(2, 2, 2);
        x.plane_mut(0)[idx2d(1, 0, 2)] = Complex32::new(2.0, 1.0);
        x.plane_mut(1)[idx2d(1, 0, 2)] = Complex32::new(50.0, 0.0);

        let mut s = Field::zeros(3, 2, 2);
        model.evaluate(&x, &mut s).unwrap();

        let i = idx2d(1, 0, 2);
        assert!((s.plane(0)[i] - Complex32::new(2.0, 1.0)).norm() < 1e-5);
        let expect = Complex32::new(2.0, 1.0) * (-0.01f32 * 50.0).exp();
        assert!((s.plane(1)[i] - expect).norm() < 1e-5);
    }

    #[test]
    fn test_jacobian_matches_finite_differences() {
        let model = MonoExpModel::new(vec![0.005, 0.015], 1, 1).unwrap();
        let mut x = Field::zeros(2, 1, 1);
        x.plane_mut(0)[0] = Complex32::new(1.5, -0.3);
        x.plane_mut(1)[0] = Complex32::new(40.0, 0.0);

        let mut jac = Jacobian::zeros(2, 2, 1, 1);
        model.jacobian(&x, &mut jac).unwrap();

        let eps = 1e-3f32;
        let mut s0 = Field::zeros(2, 1, 1);
        model.evaluate(&x, &mut s0).unwrap();

        // Perturb R2 and compare against the analytic derivative.
        let mut xp = Field::zeros(2, 1, 1);
        xp.copy_from(&x);
        xp.plane_mut(1)[0] += Complex32::new(eps, 0.0);
        let mut sp = Field::zeros(2, 1, 1);
        model.evaluate(&xp, &mut sp).unwrap();

        for j in 0..2 {
            let fd = (sp.plane(j)[0] - s0.plane(j)[0]) / eps;
            let an = jac.plane(j, 1)[0];
            assert!(
                (fd - an).norm() < 1e-2 * an.norm().max(1e-3),
                "echo {}: finite difference {} vs analytic {}",
                j,
                fd,
                an
            );
        }
    }

    #[test]
    fn test_scaled_rescale_roundtrip() {
        let model = MonoExpModel::new(vec![0.01], 1, 1)
            .unwrap()
            .with_scales(100.0, 20.0);
        let mut x = Field::zeros(2, 1, 1);
        x.plane_mut(0)[0] = Complex32::new(0.02, 0.0);
        x.plane_mut(1)[0] = Complex32::new(2.5, 0.0);
        model.rescale(&mut x);
        approx::assert_relative_eq!(x.plane(0)[0].re, 2.0, epsilon = 1e-5);
        approx::assert_relative_eq!(x.plane(1)[0].re, 50.0, epsilon = 1e-4);
    }

    #[test]
    fn test_rejects_empty_echoes() {
        assert!(MonoExpModel::new(vec![], 4, 4).is_err());
    }
}
