//! Gauss-Newton reconstruction solver.
//!
//! The outer loop linearizes the signal model and shrinks the regularization
//! while tightening the proximal tether; each linearized subproblem is
//! solved with a primal-dual first-order method whose step sizes come from a
//! power-iteration estimate of the stacked operator norm.

pub mod irgn;
pub mod norm;
pub mod pd;

use serde::{Deserialize, Serialize};

pub use irgn::{IrgnSolver, OuterReport, ReconResult, TerminationReason};
pub use norm::StepSizes;

/// Regularization functional for the linearized subproblems.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Regularization {
    /// Second-order total generalized variation; `alpha1` weights the
    /// first-order term, `alpha0` the symmetrized-gradient term.
    Tgv { alpha1: f32, alpha0: f32 },
    /// Plain total variation.
    Tv { alpha: f32 },
}

impl Default for Regularization {
    fn default() -> Self {
        Regularization::Tgv {
            alpha1: 1.0,
            alpha0: 2.0,
        }
    }
}

/// Tuning knobs for the outer and inner iterations. All fields have
/// defaults that work for normalized data; override via serde or struct
/// update syntax.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    pub regularization: Regularization,
    /// Data fidelity weight.
    pub lambd: f32,
    /// Overall regularization scale, decayed every outer iteration.
    pub gamma: f32,
    pub gamma_dec: f32,
    /// Floor for the decayed scale, as a fraction of the initial `gamma`.
    pub gamma_min_ratio: f32,
    /// Proximal tether weight, grown every outer iteration.
    pub delta: f32,
    pub delta_inc: f32,
    pub delta_max: f32,
    pub max_outer: usize,
    /// Inner iterations for the first subproblem; doubled each outer
    /// iteration up to `max_inner`.
    pub start_inner: usize,
    pub max_inner: usize,
    /// Outer convergence threshold on the relative estimate change (with
    /// relative objective decrease as a secondary exit), and relative gap
    /// threshold for inner termination.
    pub tol: f32,
    /// Inner stagnation threshold on the gap change, relative to `lambd`.
    pub stag: f32,
    pub norm_max_iters: usize,
    pub norm_tol: f32,
    /// Keep dual variables across outer iterations instead of zeroing them.
    pub warm_start_duals: bool,
    /// Return the partial estimate of a cancelled run instead of discarding
    /// it.
    pub return_partial_on_cancel: bool,
    /// Voxel spacing entering the finite-difference stencils.
    pub vsx: f32,
    pub vsy: f32,
    /// Seed for the power-iteration start vector.
    pub norm_seed: u64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            regularization: Regularization::default(),
            lambd: 1e2,
            gamma: 1.0,
            gamma_dec: 0.5,
            gamma_min_ratio: 0.1,
            delta: 10.0,
            delta_inc: 2.0,
            delta_max: 1e4,
            max_outer: 8,
            start_inner: 100,
            max_inner: 1000,
            tol: 5e-3,
            stag: 1e-8,
            norm_max_iters: 50,
            norm_tol: 1e-3,
            warm_start_duals: false,
            return_partial_on_cancel: false,
            vsx: 1.0,
            vsy: 1.0,
            norm_seed: 42,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_roundtrips_through_json() {
        let cfg = SolverConfig {
            lambd: 50.0,
            max_outer: 4,
            regularization: Regularization::Tv { alpha: 0.02 },
            ..SolverConfig::default()
        };
        let text = serde_json::to_string(&cfg).unwrap();
        let back: SolverConfig = serde_json::from_str(&text).unwrap();
        assert_eq!(back.lambd, 50.0);
        assert_eq!(back.max_outer, 4);
        assert!(matches!(back.regularization, Regularization::Tv { alpha } if alpha == 0.02));
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let cfg: SolverConfig = serde_json::from_str(r#"{"lambd": 10.0}"#).unwrap();
        assert_eq!(cfg.lambd, 10.0);
        assert_eq!(cfg.max_outer, SolverConfig::default().max_outer);
        assert!(matches!(cfg.regularization, Regularization::Tgv { .. }));
    }
}
