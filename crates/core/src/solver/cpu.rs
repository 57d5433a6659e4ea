//! CPU flow engine
//!
//! Host implementation of the warping pyramid. Per level, in this strict
//! order: resample both images (a plain copy at level 0), resample the
//! accumulated flow in place, warp the second image backward, fill the
//! boundary halos, solve the increment from a zero start, and accumulate.
//! All scratch buffers are allocated once at full capacity and only shrink
//! their actual size per level, so the loop body never reallocates.
//!
//! The per-level solve is single-threaded; the data-parallel formulation of
//! the sweeps lives in the GPU backend.

use super::linear::{sweep_linear, MotionTensor};
use super::robust::{sweep_robust, DiffusionWeights, FlowDerivatives};
use super::{FlowEngine, FlowField, FlowParams, SolverKind};
use crate::error::FlowError;
use crate::image::Image;
use crate::pyramid::PyramidSchedule;
use crate::registration::backward_register;
use crate::resample::resample_area;
use tracing::{debug, info};

/// Host backend of the warping-pyramid flow computation
pub struct CpuFlowEngine {
    kind: SolverKind,
    params: FlowParams,
    // per-level arrays, reused across levels and runs
    tensor: MotionTensor,
    derivs: FlowDerivatives,
    weights: DiffusionWeights,
}

impl CpuFlowEngine {
    #[must_use]
    pub fn new(kind: SolverKind, params: FlowParams) -> Self {
        Self {
            kind,
            params,
            tensor: MotionTensor::new(),
            derivs: FlowDerivatives::new(),
            weights: DiffusionWeights::new(),
        }
    }

    /// Solve one increment at the current level
    ///
    /// `img1` and `img2_warped` must have filled halos; `(du, dv)` and the
    /// ping-pong pair `(du_back, dv_back)` must be zeroed at the level size.
    #[allow(clippy::too_many_arguments)]
    fn solve_level(
        &mut self,
        img1: &Image,
        img2_warped: &Image,
        u: &Image,
        v: &Image,
        du: &mut Image,
        dv: &mut Image,
        du_back: &mut Image,
        dv_back: &mut Image,
        hx: f32,
        hy: f32,
    ) {
        let p = &self.params;
        match self.kind {
            SolverKind::Linear => {
                self.tensor.compute(img1, img2_warped, hx, hy);
                for _ in 0..p.solver_iterations {
                    sweep_linear(
                        &self.tensor,
                        u,
                        v,
                        du,
                        dv,
                        du_back,
                        dv_back,
                        p.alpha,
                        p.omega,
                        hx,
                        hy,
                    );
                    du.swap_data(du_back);
                    dv.swap_data(dv_back);
                }
            }
            SolverKind::FlowDriven => {
                self.derivs.compute(img1, img2_warped, hx, hy);
                self.weights
                    .reset(img1.actual_width(), img1.actual_height());
                for _ in 0..p.solver_iterations {
                    // weights are frozen through the inner sweeps and lag
                    // the increment by one inner-loop depth
                    self.weights.compute(
                        &self.derivs,
                        u,
                        v,
                        du,
                        dv,
                        hx,
                        hy,
                        p.e_smooth,
                        p.e_data,
                    );
                    for _ in 0..p.inner_iterations {
                        sweep_robust(
                            &self.derivs,
                            &self.weights,
                            u,
                            v,
                            du,
                            dv,
                            du_back,
                            dv_back,
                            p.alpha,
                            p.omega,
                            hx,
                            hy,
                        );
                        du.swap_data(du_back);
                        dv.swap_data(dv_back);
                    }
                }
            }
        }
    }
}

impl FlowEngine for CpuFlowEngine {
    fn compute_flow(&mut self, img1: &Image, img2: &Image) -> Result<FlowField, FlowError> {
        assert!(
            img1.actual_width() == img2.actual_width()
                && img1.actual_height() == img2.actual_height(),
            "source images must share one size"
        );
        let width = img1.actual_width();
        let height = img1.actual_height();

        let mut img1_res = Image::with_halo(width, height, 1, 1);
        let mut img2_res = Image::with_halo(width, height, 1, 1);
        let mut img2_warped = Image::with_halo(width, height, 1, 1);

        let mut du = Image::with_halo(width, height, 1, 1);
        let mut dv = Image::with_halo(width, height, 1, 1);
        let mut du_back = Image::with_halo(width, height, 1, 1);
        let mut dv_back = Image::with_halo(width, height, 1, 1);

        let mut u = Image::with_halo(width, height, 1, 1);
        let mut v = Image::with_halo(width, height, 1, 1);

        let schedule =
            PyramidSchedule::new(width, height, self.params.warp_levels, self.params.warp_scale);

        for level in schedule {
            info!(
                "solve level {} ({}x{})",
                level.index, level.width, level.height
            );
            let start = std::time::Instant::now();

            if level.index == 0 {
                img1_res.copy_from(img1);
                img2_res.copy_from(img2);
            } else {
                resample_area(img1, &mut img1_res, level.width, level.height);
                resample_area(img2, &mut img2_res, level.width, level.height);
            }

            // resample the accumulated flow to this level, via the increment
            // buffers as scratch
            resample_area(&u, &mut du, level.width, level.height);
            resample_area(&v, &mut dv, level.width, level.height);
            u.copy_from(&du);
            v.copy_from(&dv);

            backward_register(
                &img1_res,
                &img2_res,
                &mut img2_warped,
                &u,
                &v,
                level.hx,
                level.hy,
            );

            img1_res.fill_boundaries();
            img2_warped.fill_boundaries();

            du.set_actual_size(level.width, level.height);
            dv.set_actual_size(level.width, level.height);
            du_back.set_actual_size(level.width, level.height);
            dv_back.set_actual_size(level.width, level.height);
            du.zero();
            dv.zero();
            du_back.zero();
            dv_back.zero();

            self.solve_level(
                &img1_res,
                &img2_warped,
                &u,
                &v,
                &mut du,
                &mut dv,
                &mut du_back,
                &mut dv_back,
                level.hx,
                level.hy,
            );

            u.add_assign(&du);
            v.add_assign(&dv);

            debug!(
                "level {} solved in {:.1} ms",
                level.index,
                start.elapsed().as_secs_f64() * 1e3
            );
        }

        Ok(FlowField { u, v })
    }

    fn is_gpu_accelerated(&self) -> bool {
        false
    }
}
