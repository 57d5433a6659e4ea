//! Conservative area-based resampling
//!
//! The pyramid treats images as piecewise-constant functions on the unit
//! interval and resamples by integrating source cells over destination
//! cells, so the integral (up to the `m/n` cell-width factor) is preserved.
//! This keeps coarse levels consistent with the fine image in a way plain
//! bilinear scaling does not.
//!
//! Two exact fast paths short-circuit the general overlap walk: doubling
//! duplicates every sample and halving averages adjacent pairs.

use crate::image::Image;

/// Resample a 1-D signal of length `u.len()` onto `v.len()` cells
///
/// General path: walk the destination cells left to right, accruing the
/// fractional source cell at either end and whole source cells in between,
/// then normalise by the cell-width ratio `hu/hv`.
pub fn resample_1d(u: &[f32], v: &mut [f32]) {
    let n = u.len();
    let m = v.len();
    debug_assert!(n > 0 && m > 0);

    // matching sizes copy through; the overlap walk would only reproduce
    // the input up to rounding
    if m == n {
        v.copy_from_slice(u);
        return;
    }
    // fast interpolation for outputs of exactly doubled size
    if m == 2 * n {
        for i in 0..n {
            v[2 * i] = u[i];
            v[2 * i + 1] = u[i];
        }
        return;
    }
    // fast restriction for inputs of exactly doubled size
    if n == 2 * m {
        for i in 0..m {
            v[i] = 0.5 * (u[2 * i] + u[2 * i + 1]);
        }
        return;
    }

    resample_1d_general(u, v);
}

/// General overlap-integration path, also used directly by the fast-path
/// equivalence tests
pub(crate) fn resample_1d_general(u: &[f32], v: &mut [f32]) {
    let n = u.len();
    let m = v.len();
    let hu = 1.0 / n as f32;
    let hv = 1.0 / m as f32;
    let fac = hu / hv;

    // rounding in the interval walk may step one cell past the end; the
    // source then continues with its edge value
    let at = |k: usize| u[k.min(n - 1)];

    let mut uleft = 0.0f32;
    let mut vleft = 0.0f32;
    let mut k = 0usize;

    for vi in v.iter_mut() {
        let mut uright = uleft + hu;
        let vright = vleft + hv;

        if uright > vright {
            // since uleft <= vleft, destination cell lies inside source cell k
            *vi = at(k);
        } else {
            // fraction of source cell k at the left end
            let mut acc = (uright - vleft) * n as f32 * at(k);
            k += 1;
            uright += hu;

            // whole source cells in the middle
            while uright <= vright {
                acc += at(k);
                k += 1;
                uright += hu;
            }

            // fraction of source cell k at the right end, then normalise
            acc += (1.0 - (uright - vright) * n as f32) * at(k);
            *vi = acc * fac;
        }

        uleft = uright - hu;
        vleft = vright;
        // invariant: uleft <= vleft
    }
}

/// Resample every row of `src` in the x-direction into `dst`
///
/// Reads `src.actual_width()` samples per row, writes `dst.actual_width()`;
/// row count is taken from the source.
fn resample_rows(src: &Image, dst: &mut Image, scratch_u: &mut Vec<f32>, scratch_v: &mut Vec<f32>) {
    let n = src.actual_width();
    let m = dst.actual_width();
    scratch_u.resize(n, 0.0);
    scratch_v.resize(m, 0.0);

    for y in 0..src.actual_height() as i32 {
        for (x, s) in scratch_u.iter_mut().enumerate() {
            *s = src.at(x as i32, y);
        }
        resample_1d(scratch_u, scratch_v);
        for (x, s) in scratch_v.iter().enumerate() {
            *dst.at_mut(x as i32, y) = *s;
        }
    }
}

/// Resample every column of `src` in the y-direction into `dst`
fn resample_cols(src: &Image, dst: &mut Image, scratch_u: &mut Vec<f32>, scratch_v: &mut Vec<f32>) {
    let n = src.actual_height();
    let m = dst.actual_height();
    scratch_u.resize(n, 0.0);
    scratch_v.resize(m, 0.0);

    for x in 0..src.actual_width() as i32 {
        for (y, s) in scratch_u.iter_mut().enumerate() {
            *s = src.at(x, y as i32);
        }
        resample_1d(scratch_u, scratch_v);
        for (y, s) in scratch_v.iter().enumerate() {
            *dst.at_mut(x, y as i32) = *s;
        }
    }
}

/// Area-resample `src` to `dst_width × dst_height` into a preallocated
/// destination
///
/// Separable composition of the 1-D primitive. The pass order keeps the
/// intermediate image no larger than either endpoint: x-first when the
/// height grows, y-first when it shrinks. The destination's actual size is
/// set to the requested size so the buffer can be reused across pyramid
/// levels.
///
/// # Panics
///
/// Panics if the destination's logical capacity is smaller than the
/// requested size.
pub fn resample_area(src: &Image, dst: &mut Image, dst_width: usize, dst_height: usize) {
    assert!(
        dst.width() >= dst_width && dst.height() >= dst_height,
        "resample destination capacity too small"
    );
    dst.set_actual_size(dst_width, dst_height);

    let mut scratch_u = Vec::new();
    let mut scratch_v = Vec::new();

    if dst_height >= src.actual_height() {
        // interpolation: x pass first
        let mut tmp = Image::new(dst_width, src.actual_height());
        resample_rows(src, &mut tmp, &mut scratch_u, &mut scratch_v);
        resample_cols(&tmp, dst, &mut scratch_u, &mut scratch_v);
    } else {
        // restriction: y pass first
        let mut tmp = Image::new(src.actual_width(), dst_height);
        resample_cols(src, &mut tmp, &mut scratch_u, &mut scratch_v);
        resample_rows(&tmp, dst, &mut scratch_u, &mut scratch_v);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn identity_when_sizes_match() {
        let u = [3.0, 1.0, 4.0, 1.0, 5.0, 9.0, 2.0];
        let mut v = [0.0; 7];
        resample_1d(&u, &mut v);
        assert_eq!(u, v);
    }

    #[test]
    fn doubling_duplicates_samples() {
        let u = [1.0, 2.0, 3.0];
        let mut v = [0.0; 6];
        resample_1d(&u, &mut v);
        assert_eq!(v, [1.0, 1.0, 2.0, 2.0, 3.0, 3.0]);
    }

    #[test]
    fn halving_averages_pairs() {
        let u = [1.0, 3.0, 5.0, 7.0];
        let mut v = [0.0; 2];
        resample_1d(&u, &mut v);
        assert_eq!(v, [2.0, 6.0]);
    }

    #[test]
    fn fast_paths_match_general_path() {
        // dyadic sizes keep the interval arithmetic exact, so the fast paths
        // must agree bit for bit with the overlap walk
        let u = [1.0, 2.0, 4.0, 8.0];
        let mut fast = [0.0f32; 8];
        let mut general = [0.0f32; 8];
        resample_1d(&u, &mut fast);
        resample_1d_general(&u, &mut general);
        assert_eq!(fast, general);

        let w = [1.0, 2.0, 4.0, 8.0, 16.0, 32.0, 64.0, 128.0];
        let mut fast_down = [0.0f32; 4];
        let mut general_down = [0.0f32; 4];
        resample_1d(&w, &mut fast_down);
        resample_1d_general(&w, &mut general_down);
        assert_eq!(fast_down, general_down);
    }

    #[test]
    fn mass_is_conserved_up_to_cell_ratio() {
        let u: Vec<f32> = (0..13).map(|i| (i as f32 * 0.7).sin() + 2.0).collect();
        let mut v = vec![0.0f32; 5];
        resample_1d(&u, &mut v);
        let sum_u: f32 = u.iter().sum();
        let sum_v: f32 = v.iter().sum();
        assert_relative_eq!(sum_v, sum_u * 5.0 / 13.0, max_relative = 1e-5);

        let mut w = vec![0.0f32; 29];
        resample_1d(&u, &mut w);
        let sum_w: f32 = w.iter().sum();
        assert_relative_eq!(sum_w, sum_u * 29.0 / 13.0, max_relative = 1e-5);
    }

    #[test]
    fn constant_image_stays_constant() {
        let mut src = Image::new(100, 100);
        for y in 0..100 {
            for x in 0..100 {
                *src.at_mut(x, y) = 137.0;
            }
        }
        let mut dst = Image::new(100, 100);
        resample_area(&src, &mut dst, 37, 63);
        assert_eq!(dst.actual_width(), 37);
        assert_eq!(dst.actual_height(), 63);
        for y in 0..63 {
            for x in 0..37 {
                assert_relative_eq!(dst.at(x, y), 137.0, max_relative = 1e-5);
            }
        }
    }

    #[test]
    fn destination_shape_follows_request() {
        let src = Image::with_halo(64, 64, 1, 1);
        let mut dst = Image::with_halo(64, 64, 1, 1);
        resample_area(&src, &mut dst, 13, 40);
        assert_eq!(dst.actual_width(), 13);
        assert_eq!(dst.actual_height(), 40);
        // enlarging vertically from the shrunken state reuses the same buffer
        let mut small = Image::with_halo(64, 64, 1, 1);
        small.set_actual_size(13, 40);
        resample_area(&small, &mut dst, 20, 60);
        assert_eq!(dst.actual_width(), 20);
        assert_eq!(dst.actual_height(), 60);
    }

    #[test]
    #[should_panic(expected = "capacity too small")]
    fn destination_capacity_is_checked() {
        let src = Image::new(64, 64);
        let mut dst = Image::new(32, 32);
        resample_area(&src, &mut dst, 48, 48);
    }
}
