//! Flow-driven robust solver kernel (host)
//!
//! Variant of the linear solve where the constant smoothness weight gives
//! way to a per-pixel diffusion weight ψ derived from the gradient of the
//! total flow, and the data term is damped by a per-pixel weight ξ derived
//! from the warped brightness residual. An outer iteration refreshes
//! (ψ, ξ) from the current `(u+du, v+dv)`; the inner iterations sweep with
//! those weights frozen, so the weights lag the increment by one inner-loop
//! depth.

use crate::image::Image;

/// Averaged image derivatives of one pyramid level
///
/// Unlike the linear variant's motion tensor, the robust sweep needs the
/// raw `(fx, fy, ft)` triple: ξ is built from the linearised residual
/// `ft + fx·du + fy·dv`. The tensor entries are formed on the fly. Arrays
/// are row-major without halo and keep their capacity across levels.
#[derive(Debug, Default)]
pub struct FlowDerivatives {
    pub(crate) fx: Vec<f32>,
    pub(crate) fy: Vec<f32>,
    pub(crate) ft: Vec<f32>,
    width: usize,
    height: usize,
}

impl FlowDerivatives {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn dimensions(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    /// Recompute derivatives for the current level; halos must be filled
    pub fn compute(&mut self, img1: &Image, img2_warped: &Image, hx: f32, hy: f32) {
        let width = img1.actual_width();
        let height = img1.actual_height();
        assert!(
            img2_warped.actual_width() == width && img2_warped.actual_height() == height,
            "derivatives require matching image sizes"
        );

        self.width = width;
        self.height = height;
        let len = width * height;
        self.fx.resize(len, 0.0);
        self.fy.resize(len, 0.0);
        self.ft.resize(len, 0.0);

        for y in 0..height as i32 {
            for x in 0..width as i32 {
                let idx = y as usize * width + x as usize;
                self.fx[idx] = (img1.at(x + 1, y) - img1.at(x - 1, y) + img2_warped.at(x + 1, y)
                    - img2_warped.at(x - 1, y))
                    / (4.0 * hx);
                self.fy[idx] = (img1.at(x, y + 1) - img1.at(x, y - 1) + img2_warped.at(x, y + 1)
                    - img2_warped.at(x, y - 1))
                    / (4.0 * hy);
                self.ft[idx] = img2_warped.at(x, y) - img1.at(x, y);
            }
        }
    }
}

/// Per-pixel diffusion weight ψ and data weight ξ
///
/// Both are reciprocal square roots with an ε floor, so they stay finite
/// and strictly positive. Start-of-run state is all zeros; the first outer
/// iteration overwrites every entry before any sweep reads them.
#[derive(Debug, Default)]
pub struct DiffusionWeights {
    pub(crate) psi: Vec<f32>,
    pub(crate) xi: Vec<f32>,
    width: usize,
    height: usize,
}

impl DiffusionWeights {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resize for the current level and reset to the zero start state
    pub fn reset(&mut self, width: usize, height: usize) {
        self.width = width;
        self.height = height;
        self.psi.clear();
        self.psi.resize(width * height, 0.0);
        self.xi.clear();
        self.xi.resize(width * height, 0.0);
    }

    /// Refresh (ψ, ξ) from the current total flow `(u+du, v+dv)`
    ///
    /// Gradients use centred differences with spacing `(hx, hy)`; the even
    /// boundary reflection makes the normal derivative vanish at the
    /// border, so border contributions are zero.
    #[allow(clippy::too_many_arguments)]
    pub fn compute(
        &mut self,
        derivs: &FlowDerivatives,
        u: &Image,
        v: &Image,
        du: &Image,
        dv: &Image,
        hx: f32,
        hy: f32,
        e_smooth: f32,
        e_data: f32,
    ) {
        let (width, height) = (self.width, self.height);
        debug_assert_eq!(derivs.dimensions(), (width, height));

        let total_u = |x: i32, y: i32| u.at(x, y) + du.at(x, y);
        let total_v = |x: i32, y: i32| v.at(x, y) + dv.at(x, y);

        for y in 0..height as i32 {
            for x in 0..width as i32 {
                let idx = y as usize * width + x as usize;

                let interior_x = x > 0 && (x as usize) < width - 1;
                let interior_y = y > 0 && (y as usize) < height - 1;

                let ux = if interior_x {
                    (total_u(x + 1, y) - total_u(x - 1, y)) / (2.0 * hx)
                } else {
                    0.0
                };
                let uy = if interior_y {
                    (total_u(x, y + 1) - total_u(x, y - 1)) / (2.0 * hy)
                } else {
                    0.0
                };
                let vx = if interior_x {
                    (total_v(x + 1, y) - total_v(x - 1, y)) / (2.0 * hx)
                } else {
                    0.0
                };
                let vy = if interior_y {
                    (total_v(x, y + 1) - total_v(x, y - 1)) / (2.0 * hy)
                } else {
                    0.0
                };

                self.psi[idx] =
                    1.0 / (ux * ux + uy * uy + vx * vx + vy * vy + e_smooth * e_smooth).sqrt();

                let residual =
                    derivs.ft[idx] + derivs.fx[idx] * du.at(x, y) + derivs.fy[idx] * dv.at(x, y);
                self.xi[idx] = 1.0 / (residual * residual + e_data * e_data).sqrt();
            }
        }
    }
}

/// Face-centred coupling weight between two ψ samples
#[inline]
fn face_weight(a: f32, b: f32) -> f32 {
    2.0 * a * b / (a + b)
}

/// One frozen-weight SOR sweep of the robust system
///
/// Same two-buffer discipline as the linear sweep; neighbour weights are
/// harmonic face averages of ψ scaled by `α/h²`, the data terms are scaled
/// by ξ at the pixel, and the denominators become `ξ·J11 + Σw` and
/// `ξ·J22 + Σw`.
#[allow(clippy::too_many_arguments)]
pub fn sweep_robust(
    derivs: &FlowDerivatives,
    weights: &DiffusionWeights,
    u: &Image,
    v: &Image,
    du: &Image,
    dv: &Image,
    du_out: &mut Image,
    dv_out: &mut Image,
    alpha: f32,
    omega: f32,
    hx: f32,
    hy: f32,
) {
    let (width, height) = derivs.dimensions();
    let hx_2 = alpha / (hx * hx);
    let hy_2 = alpha / (hy * hy);

    for y in 0..height as i32 {
        for x in 0..width as i32 {
            let idx = y as usize * width + x as usize;
            let psi = weights.psi[idx];

            let xp = if (x as usize) < width - 1 {
                hx_2 * face_weight(psi, weights.psi[idx + 1])
            } else {
                0.0
            };
            let xm = if x > 0 {
                hx_2 * face_weight(psi, weights.psi[idx - 1])
            } else {
                0.0
            };
            let yp = if (y as usize) < height - 1 {
                hy_2 * face_weight(psi, weights.psi[idx + width])
            } else {
                0.0
            };
            let ym = if y > 0 {
                hy_2 * face_weight(psi, weights.psi[idx - width])
            } else {
                0.0
            };
            let sum = xp + xm + yp + ym;

            let xi = weights.xi[idx];
            let fx = derivs.fx[idx];
            let fy = derivs.fy[idx];
            let ft = derivs.ft[idx];
            let j11 = fx * fx;
            let j22 = fy * fy;
            let j12 = fx * fy;
            let j13 = fx * ft;
            let j23 = fy * ft;

            *du_out.at_mut(x, y) = (1.0 - omega) * du.at(x, y)
                + omega
                    * (xi * (-j13 - j12 * dv.at(x, y))
                        + yp * (u.at(x, y + 1) - u.at(x, y))
                        + ym * (u.at(x, y - 1) - u.at(x, y))
                        + xp * (u.at(x + 1, y) - u.at(x, y))
                        + xm * (u.at(x - 1, y) - u.at(x, y))
                        + yp * du.at(x, y + 1)
                        + ym * du.at(x, y - 1)
                        + xp * du.at(x + 1, y)
                        + xm * du.at(x - 1, y))
                    / (xi * j11 + sum);

            *dv_out.at_mut(x, y) = (1.0 - omega) * dv.at(x, y)
                + omega
                    * (xi * (-j23 - j12 * du.at(x, y))
                        + yp * (v.at(x, y + 1) - v.at(x, y))
                        + ym * (v.at(x, y - 1) - v.at(x, y))
                        + xp * (v.at(x + 1, y) - v.at(x, y))
                        + xm * (v.at(x - 1, y) - v.at(x, y))
                        + yp * dv.at(x, y + 1)
                        + ym * dv.at(x, y - 1)
                        + xp * dv.at(x + 1, y)
                        + xm * dv.at(x - 1, y))
                    / (xi * j22 + sum);
        }
    }
}
