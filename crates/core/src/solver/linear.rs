//! Linear SOR solver kernel (host)
//!
//! One pyramid level of the classical variant: the motion tensor is
//! precomputed from the first and the warped second image, then a fixed
//! number of data-parallel SOR sweeps relax the increment `(du, dv)`.
//!
//! The sweep is Jacobi-style over two buffers: all reads of a sweep touch
//! the current buffer, all writes the next one, and the buffers swap at the
//! sweep boundary. In-place Gauss–Seidel would change the numerics and is
//! deliberately not what this implements.

use crate::image::Image;

/// Per-pixel motion tensor of one pyramid level
///
/// Built from averaged spatial derivatives of both images and their
/// temporal difference. The arrays are plain row-major `width × height`
/// (no halo) and keep their capacity across levels, so one allocation
/// serves a whole pyramid run.
#[derive(Debug, Default)]
pub struct MotionTensor {
    pub(crate) j11: Vec<f32>,
    pub(crate) j22: Vec<f32>,
    pub(crate) j12: Vec<f32>,
    pub(crate) j13: Vec<f32>,
    pub(crate) j23: Vec<f32>,
    width: usize,
    height: usize,
}

impl MotionTensor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn dimensions(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    /// Recompute the tensor for the current level
    ///
    /// Both images must have their boundary halo filled: the derivative
    /// stencil reads one pixel outside the actual region.
    pub fn compute(&mut self, img1: &Image, img2_warped: &Image, hx: f32, hy: f32) {
        let width = img1.actual_width();
        let height = img1.actual_height();
        assert!(
            img2_warped.actual_width() == width && img2_warped.actual_height() == height,
            "motion tensor requires matching image sizes"
        );

        self.width = width;
        self.height = height;
        let len = width * height;
        self.j11.resize(len, 0.0);
        self.j22.resize(len, 0.0);
        self.j12.resize(len, 0.0);
        self.j13.resize(len, 0.0);
        self.j23.resize(len, 0.0);

        for y in 0..height as i32 {
            for x in 0..width as i32 {
                let fx = (img1.at(x + 1, y) - img1.at(x - 1, y) + img2_warped.at(x + 1, y)
                    - img2_warped.at(x - 1, y))
                    / (4.0 * hx);
                let fy = (img1.at(x, y + 1) - img1.at(x, y - 1) + img2_warped.at(x, y + 1)
                    - img2_warped.at(x, y - 1))
                    / (4.0 * hy);
                let ft = img2_warped.at(x, y) - img1.at(x, y);

                let idx = y as usize * width + x as usize;
                self.j11[idx] = fx * fx;
                self.j22[idx] = fy * fy;
                self.j12[idx] = fx * fy;
                self.j13[idx] = fx * ft;
                self.j23[idx] = fy * ft;
            }
        }
    }
}

/// One data-parallel SOR sweep of the linear system
///
/// Reads `(du, dv)` and the accumulated flow `(u, v)`, writes the relaxed
/// increment into `(du_out, dv_out)`. Neighbour weights are `α/h²` gated by
/// Neumann border predicates; the cross-coupling term reads the *current*
/// buffer, which is what keeps the update order-free.
#[allow(clippy::too_many_arguments)]
pub fn sweep_linear(
    tensor: &MotionTensor,
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
    let (width, height) = tensor.dimensions();
    let hx_2 = alpha / (hx * hx);
    let hy_2 = alpha / (hy * hy);

    for y in 0..height as i32 {
        for x in 0..width as i32 {
            let xp = if (x as usize) < width - 1 { hx_2 } else { 0.0 };
            let xm = if x > 0 { hx_2 } else { 0.0 };
            let yp = if (y as usize) < height - 1 { hy_2 } else { 0.0 };
            let ym = if y > 0 { hy_2 } else { 0.0 };
            let sum = xp + xm + yp + ym;

            let idx = y as usize * width + x as usize;

            *du_out.at_mut(x, y) = (1.0 - omega) * du.at(x, y)
                + omega
                    * (-tensor.j13[idx] - tensor.j12[idx] * dv.at(x, y)
                        + yp * (u.at(x, y + 1) - u.at(x, y))
                        + ym * (u.at(x, y - 1) - u.at(x, y))
                        + xp * (u.at(x + 1, y) - u.at(x, y))
                        + xm * (u.at(x - 1, y) - u.at(x, y))
                        + yp * du.at(x, y + 1)
                        + ym * du.at(x, y - 1)
                        + xp * du.at(x + 1, y)
                        + xm * du.at(x - 1, y))
                    / (tensor.j11[idx] + sum);

            *dv_out.at_mut(x, y) = (1.0 - omega) * dv.at(x, y)
                + omega
                    * (-tensor.j23[idx] - tensor.j12[idx] * du.at(x, y)
                        + yp * (v.at(x, y + 1) - v.at(x, y))
                        + ym * (v.at(x, y - 1) - v.at(x, y))
                        + xp * (v.at(x + 1, y) - v.at(x, y))
                        + xm * (v.at(x - 1, y) - v.at(x, y))
                        + yp * dv.at(x, y + 1)
                        + ym * dv.at(x, y - 1)
                        + xp * dv.at(x + 1, y)
                        + xm * dv.at(x - 1, y))
                    / (tensor.j22[idx] + sum);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn zeroed(w: usize, h: usize) -> Image {
        let mut img = Image::with_halo(w, h, 1, 1);
        img.set_actual_size(w, h);
        img
    }

    fn tensor_for(w: usize, h: usize) -> MotionTensor {
        let mut t = MotionTensor::new();
        t.j11.resize(w * h, 0.0);
        t.j22.resize(w * h, 0.0);
        t.j12.resize(w * h, 0.0);
        t.j13.resize(w * h, 0.0);
        t.j23.resize(w * h, 0.0);
        t.width = w;
        t.height = h;
        t
    }

    #[test]
    fn identical_images_give_zero_tensor_rhs() {
        let mut img = Image::with_halo(8, 8, 1, 1);
        for y in 0..8 {
            for x in 0..8 {
                *img.at_mut(x, y) = (x * x + 3 * y) as f32;
            }
        }
        img.fill_boundaries();
        let mut tensor = MotionTensor::new();
        tensor.compute(&img, &img.clone(), 1.0, 1.0);
        assert!(tensor.j13.iter().all(|&v| v == 0.0));
        assert!(tensor.j23.iter().all(|&v| v == 0.0));
        // spatial terms do not vanish for a non-constant image
        assert!(tensor.j11.iter().any(|&v| v != 0.0));
    }

    #[test]
    fn zero_increment_is_a_fixed_point_without_data_term() {
        // I1 == I2_warped and a zero accumulated flow: one sweep must leave
        // the increment at exactly zero
        let (w, h) = (8, 8);
        let tensor = tensor_for(w, h);
        let u = zeroed(w, h);
        let v = zeroed(w, h);
        let du = zeroed(w, h);
        let dv = zeroed(w, h);
        let mut du_out = zeroed(w, h);
        let mut dv_out = zeroed(w, h);
        sweep_linear(&tensor, &u, &v, &du, &dv, &mut du_out, &mut dv_out, 4.0, 1.9, 1.0, 1.0);
        for y in 0..h as i32 {
            for x in 0..w as i32 {
                assert_eq!(du_out.at(x, y), 0.0);
                assert_eq!(dv_out.at(x, y), 0.0);
            }
        }
    }

    #[test]
    fn sweep_is_linear_in_the_right_hand_side() {
        // with stencil weights and the diagonal held fixed, doubling
        // (-J13, -J23) must double the increment produced from a zero state
        let (w, h) = (6, 6);
        let mut tensor = tensor_for(w, h);
        for idx in 0..w * h {
            tensor.j11[idx] = 2.0 + (idx % 3) as f32;
            tensor.j22[idx] = 1.0 + (idx % 5) as f32;
            tensor.j13[idx] = 0.3 * idx as f32 - 4.0;
            tensor.j23[idx] = -0.2 * idx as f32 + 1.0;
        }
        let u = zeroed(w, h);
        let v = zeroed(w, h);
        let du = zeroed(w, h);
        let dv = zeroed(w, h);

        let mut du_once = zeroed(w, h);
        let mut dv_once = zeroed(w, h);
        sweep_linear(&tensor, &u, &v, &du, &dv, &mut du_once, &mut dv_once, 4.0, 1.3, 1.0, 1.0);

        for idx in 0..w * h {
            tensor.j13[idx] *= 2.0;
            tensor.j23[idx] *= 2.0;
        }
        let mut du_twice = zeroed(w, h);
        let mut dv_twice = zeroed(w, h);
        sweep_linear(&tensor, &u, &v, &du, &dv, &mut du_twice, &mut dv_twice, 4.0, 1.3, 1.0, 1.0);

        for y in 0..h as i32 {
            for x in 0..w as i32 {
                assert_relative_eq!(du_twice.at(x, y), 2.0 * du_once.at(x, y), max_relative = 1e-6);
                assert_relative_eq!(dv_twice.at(x, y), 2.0 * dv_once.at(x, y), max_relative = 1e-6);
            }
        }
    }

    #[test]
    fn border_weights_drop_the_missing_neighbour() {
        // a single-pixel data term at the corner: the corner update only
        // sees two neighbour weights
        let (w, h) = (4, 4);
        let mut tensor = tensor_for(w, h);
        tensor.j13[0] = -1.0; // rhs = +1 at (0, 0)
        let u = zeroed(w, h);
        let v = zeroed(w, h);
        let du = zeroed(w, h);
        let dv = zeroed(w, h);
        let mut du_out = zeroed(w, h);
        let mut dv_out = zeroed(w, h);
        let (alpha, hx, hy) = (2.0, 1.0, 1.0);
        sweep_linear(&tensor, &u, &v, &du, &dv, &mut du_out, &mut dv_out, alpha, 1.0, hx, hy);
        // corner: sum = xp + yp = 2 * alpha
        assert_relative_eq!(du_out.at(0, 0), 1.0 / (2.0 * alpha), max_relative = 1e-6);
        // interior pixel with zero rhs stays zero
        assert_eq!(du_out.at(1, 1), 0.0);
    }
}
