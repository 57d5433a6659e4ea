//! Backward image registration
//!
//! Warps the second image toward the first by sampling it at flow-displaced
//! positions. Displacements are stored in full-resolution pixel units, so at
//! a pyramid level with grid spacing `(hx, hy)` they are divided back into
//! level units before the lookup.

use crate::image::Image;

/// Warp `src2` backward by the flow `(u, v)` into `dst`
///
/// For every pixel of the destination (sized to `src2`'s actual region) the
/// sub-pixel source position is `(x + u/hx, y + v/hy)`. Positions outside the
/// domain of `src2` fall back to the first image, i.e. the warp trusts zero
/// flow wherever the field points out of frame. In-domain positions are
/// bilinearly interpolated; the cell index uses `floor`, so negative
/// sub-pixel offsets round toward negative infinity.
pub fn backward_register(src1: &Image, src2: &Image, dst: &mut Image, u: &Image, v: &Image, hx: f32, hy: f32) {
    let width = src2.actual_width();
    let height = src2.actual_height();
    let hx_1 = 1.0 / hx;
    let hy_1 = 1.0 / hy;

    dst.set_actual_size(width, height);

    for y in 0..height as i32 {
        for x in 0..width as i32 {
            let xx_fp = x as f32 + u.sample(x, y) * hx_1;
            let yy_fp = y as f32 + v.sample(x, y) * hy_1;

            if xx_fp < 0.0
                || yy_fp < 0.0
                || xx_fp > (width - 1) as f32
                || yy_fp > (height - 1) as f32
            {
                *dst.at_mut(x, y) = src1.sample(x, y);
            } else {
                let xx = xx_fp.floor() as i32;
                let yy = yy_fp.floor() as i32;
                let dx = xx_fp - xx as f32;
                let dy = yy_fp - yy as f32;

                *dst.at_mut(x, y) = (1.0 - dy) * (1.0 - dx) * src2.sample(xx, yy)
                    + (1.0 - dy) * dx * src2.sample(xx + 1, yy)
                    + dy * (1.0 - dx) * src2.sample(xx, yy + 1)
                    + dy * dx * src2.sample(xx + 1, yy + 1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ramp_image(w: usize, h: usize, f: impl Fn(i32, i32) -> f32) -> Image {
        let mut img = Image::with_halo(w, h, 1, 1);
        for y in 0..h as i32 {
            for x in 0..w as i32 {
                *img.at_mut(x, y) = f(x, y);
            }
        }
        img
    }

    #[test]
    fn zero_flow_reproduces_second_image() {
        let src1 = ramp_image(8, 8, |x, y| (x * 10 + y) as f32);
        let src2 = ramp_image(8, 8, |x, y| (x + y * 3) as f32);
        let u = Image::with_halo(8, 8, 1, 1);
        let v = Image::with_halo(8, 8, 1, 1);
        let mut dst = Image::with_halo(8, 8, 1, 1);
        backward_register(&src1, &src2, &mut dst, &u, &v, 1.0, 1.0);
        for y in 0..8 {
            for x in 0..8 {
                assert_eq!(dst.at(x, y), src2.at(x, y));
            }
        }
    }

    #[test]
    fn out_of_domain_targets_fall_back_to_first_image() {
        let src1 = ramp_image(8, 8, |_, _| 50.0);
        let src2 = ramp_image(8, 8, |_, _| 99.0);
        // flow pushes every lookup beyond the right edge
        let u = ramp_image(8, 8, |_, _| 100.0);
        let v = Image::with_halo(8, 8, 1, 1);
        let mut dst = Image::with_halo(8, 8, 1, 1);
        backward_register(&src1, &src2, &mut dst, &u, &v, 1.0, 1.0);
        for y in 0..8 {
            for x in 0..8 {
                assert_eq!(dst.at(x, y), 50.0);
            }
        }
    }

    #[test]
    fn bilinear_lookup_is_exact_on_affine_images() {
        let (a, b, c) = (2.0f32, -1.5f32, 7.0f32);
        let src1 = ramp_image(16, 16, |_, _| 0.0);
        let src2 = ramp_image(16, 16, |x, y| a * x as f32 + b * y as f32 + c);
        let u = ramp_image(16, 16, |_, _| 1.25);
        let v = ramp_image(16, 16, |_, _| 0.75);
        let (hx, hy) = (0.5, 1.5);
        let mut dst = Image::with_halo(16, 16, 1, 1);
        backward_register(&src1, &src2, &mut dst, &u, &v, hx, hy);
        for y in 0..13 {
            for x in 0..12 {
                let expected = a * (x as f32 + 1.25 / hx) + b * (y as f32 + 0.75 / hy) + c;
                assert_relative_eq!(dst.at(x, y), expected, max_relative = 1e-5);
            }
        }
    }

    #[test]
    fn negative_offsets_round_toward_negative_infinity() {
        let src1 = ramp_image(8, 8, |_, _| 0.0);
        let src2 = ramp_image(8, 8, |x, _| x as f32);
        let u = ramp_image(8, 8, |_, _| -0.5);
        let v = Image::with_halo(8, 8, 1, 1);
        let mut dst = Image::with_halo(8, 8, 1, 1);
        backward_register(&src1, &src2, &mut dst, &u, &v, 1.0, 1.0);
        // x = 2 samples at 1.5: floor 1, weights (0.5, 0.5) -> 1.5
        assert_relative_eq!(dst.at(2, 0), 1.5, max_relative = 1e-6);
        // x = 0 samples at -0.5: out of domain, falls back to src1
        assert_eq!(dst.at(0, 0), 0.0);
    }
}
