//! Forward/adjoint operator pairs used by the reconstruction.

pub mod gradient;
pub mod imaging;
pub mod linearized;
pub mod symgrad;

pub use gradient::GradientOp;
pub use imaging::{ImagingOperator, Sampling};
pub use linearized::LinearizedOperator;
pub use symgrad::SymGradOp;
