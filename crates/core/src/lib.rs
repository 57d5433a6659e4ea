//! WarpFlow core library
//!
//! Dense variational optical flow between two greyscale images, computed
//! with a coarse-to-fine warping pyramid and a pointwise SOR solve of the
//! Euler–Lagrange equations of a Horn–Schunck-style energy. Two solver
//! variants (constant-weight linear and flow-driven robust) run on either a
//! host baseline or, with the default `gpu` feature, a wgpu compute
//! backend executing the same mathematics.
//!
//! The collaborators around the numerical engine are PGM and Middlebury
//! `.flo` file I/O, a colour-wheel flow visualiser, and an endpoint-error
//! metric.

pub mod color;
pub mod error;
pub mod image;
pub mod io;
pub mod metrics;
pub mod pyramid;
pub mod registration;
pub mod resample;
pub mod solver;

// Re-export main types
pub use error::FlowError;
pub use image::Image;
pub use metrics::{endpoint_error, ErrorStats};
pub use solver::{create_flow_engine, CpuFlowEngine, FlowEngine, FlowField, FlowParams, SolverKind};

#[cfg(feature = "gpu")]
pub use solver::{GpuContext, GpuFlowEngine, GpuInitResult};
