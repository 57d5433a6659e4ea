//! Variational flow solvers
//!
//! The core abstraction is the [`FlowEngine`] trait with a host
//! implementation and, behind the default-on `gpu` feature, a wgpu compute
//! implementation of the same mathematics.
//!
//! # Backend selection
//!
//! [`create_flow_engine`] picks the best available backend:
//! 1. try the GPU (if the `gpu` feature is enabled, an adapter exists, and
//!    its limits fit the working set);
//! 2. fall back to the CPU (always available).
//!
//! Both backends run the identical coarse-to-fine schedule from
//! [`crate::pyramid`] and implement the same two solver variants, selected
//! by [`SolverKind`].

mod cpu;
mod linear;
mod robust;

#[cfg(feature = "gpu")]
mod context;
#[cfg(feature = "gpu")]
mod gpu;

pub use cpu::CpuFlowEngine;
pub use linear::MotionTensor;

#[cfg(feature = "gpu")]
pub use context::{GpuContext, GpuInitResult};
#[cfg(feature = "gpu")]
pub use gpu::GpuFlowEngine;

use crate::error::FlowError;
use crate::image::Image;
use serde::{Deserialize, Serialize};
use tracing::info;

#[cfg(feature = "gpu")]
use tracing::warn;

/// Solver variant run at every pyramid level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolverKind {
    /// Classical linear SOR solve of the Horn–Schunck system with a
    /// constant smoothness weight
    Linear,
    /// Flow-driven robust solve with per-pixel diffusion weight ψ and data
    /// weight ξ, refreshed by an outer iteration around frozen-weight inner
    /// sweeps
    FlowDriven,
}

/// Configuration of the warping pyramid and the per-level solver
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FlowParams {
    /// Upper bound on pyramid depth
    pub warp_levels: u32,
    /// Per-level size factor, in (0, 1)
    pub warp_scale: f32,
    /// SOR sweeps per level (outer iterations for the robust variant)
    pub solver_iterations: u32,
    /// Frozen-weight sweeps per outer iteration (robust variant only)
    pub inner_iterations: u32,
    /// Smoothness weight α
    pub alpha: f32,
    /// Relaxation factor ω; 1.0 is the plain two-buffer Jacobi sweep
    pub omega: f32,
    /// ε_s floor under the smoothness weight ψ
    pub e_smooth: f32,
    /// ε_d floor under the data weight ξ
    pub e_data: f32,
}

impl Default for FlowParams {
    fn default() -> Self {
        Self {
            warp_levels: 15,
            warp_scale: 0.9,
            solver_iterations: 30,
            inner_iterations: 10,
            alpha: 4.0,
            omega: 1.0,
            e_smooth: 1e-3,
            e_data: 1e-3,
        }
    }
}

/// Dense displacement field mapping image 1 onto image 2
///
/// Both components share one actual size; values are in full-resolution
/// pixel units (u horizontal, v vertical).
#[derive(Debug, Clone)]
pub struct FlowField {
    /// Horizontal displacement per pixel
    pub u: Image,
    /// Vertical displacement per pixel
    pub v: Image,
}

impl FlowField {
    /// Actual size shared by both components
    #[must_use]
    pub fn dimensions(&self) -> (usize, usize) {
        (self.u.actual_width(), self.u.actual_height())
    }
}

/// Backend-agnostic interface of the warping-pyramid flow computation
pub trait FlowEngine {
    /// Compute dense flow from `img1` to `img2`
    ///
    /// The images must share one logical size. The returned field is at
    /// full resolution.
    ///
    /// # Errors
    ///
    /// The GPU backend reports device failures; the host backend is
    /// infallible apart from programmer-error assertions.
    fn compute_flow(&mut self, img1: &Image, img2: &Image) -> Result<FlowField, FlowError>;

    /// `true` when the per-level solve runs on a compute device
    fn is_gpu_accelerated(&self) -> bool;
}

/// Create a flow engine with automatic backend selection
///
/// Tries the GPU first and falls back to the CPU when no adapter exists,
/// device creation fails, or the working set for a `width × height` run
/// would not fit the device limits.
#[must_use]
pub fn create_flow_engine(
    kind: SolverKind,
    params: FlowParams,
    width: usize,
    height: usize,
) -> Box<dyn FlowEngine> {
    #[cfg(feature = "gpu")]
    {
        match GpuContext::new() {
            GpuInitResult::Success(context) => {
                if context.can_allocate(width, height) {
                    info!(
                        "using GPU backend: {} ({}x{} images)",
                        context.adapter_name(),
                        width,
                        height
                    );
                    return Box::new(GpuFlowEngine::new(context, kind, params));
                }
                warn!(
                    "GPU working set for {}x{} exceeds device limits, falling back to CPU",
                    width, height
                );
            }
            GpuInitResult::NoGpuFound => {
                info!("no GPU adapter found, using CPU backend");
            }
            GpuInitResult::InitFailed {
                adapter_name,
                error,
            } => {
                warn!(
                    "GPU '{}' found but failed to initialize: {}. Falling back to CPU.",
                    adapter_name, error
                );
            }
        }
    }

    #[cfg(not(feature = "gpu"))]
    {
        let _ = (width, height);
        info!("GPU feature disabled, using CPU backend");
    }

    Box::new(CpuFlowEngine::new(kind, params))
}
