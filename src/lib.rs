//! Model-based reconstruction of quantitative MRI parameter maps.
//!
//! Instead of reconstructing one image per contrast and fitting a signal
//! model voxel by voxel, the solver here estimates the parameter maps
//! directly from multi-coil k-space: a Gauss-Newton outer loop linearizes
//! the signal model, and a primal-dual inner loop solves each linearized
//! subproblem with TGV or TV regularization. Cartesian and non-uniform
//! (gridded Kaiser-Bessel) sampling are both supported.
//!
//! Typical usage: build an [`operators::ImagingOperator`] from coil
//! sensitivities and a sampling description, pick a [`models::SignalModel`],
//! then run [`solver::IrgnSolver::solve`] on the measured data.

pub mod error;
pub mod fft;
pub mod field;
pub mod models;
pub mod nufft;
pub mod operators;
pub mod solver;

pub use error::{ReconError, Result};
pub use field::{Field, Kspace, KspaceShape, Shape};
pub use models::{MonoExpModel, SignalModel};
pub use operators::{ImagingOperator, Sampling};
pub use solver::{IrgnSolver, ReconResult, Regularization, SolverConfig, TerminationReason};
