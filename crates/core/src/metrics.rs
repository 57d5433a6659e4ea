//! Endpoint-error statistics against a ground-truth flow
//!
//! Ground-truth pixels that are NaN or beyond 10⁶ mark unknown flow: they
//! write zero into the difference image and are excluded from the counts.

use crate::image::Image;

/// Magnitude past which a ground-truth value marks unknown flow
const UNKNOWN_FLOW: f32 = 1.0e6;

/// Aggregate endpoint-error measures over the valid ground-truth pixels
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ErrorStats {
    /// Mean endpoint error (0 when no pixel is valid)
    pub mean: f32,
    /// Largest endpoint error
    pub max: f32,
    /// Sum of endpoint errors
    pub sum: f32,
    /// Number of valid ground-truth pixels
    pub count: usize,
}

/// Per-pixel endpoint error `√((u−u*)² + (v−v*)²)` with summary statistics
///
/// The difference image receives the per-pixel error (zero where the ground
/// truth is unknown) and is resized to the flow's actual size.
///
/// # Panics
///
/// Panics if the flow and ground-truth actual sizes differ, or the
/// difference image lacks capacity.
pub fn endpoint_error(
    u: &Image,
    v: &Image,
    u_gt: &Image,
    v_gt: &Image,
    difference: &mut Image,
) -> ErrorStats {
    assert!(
        u.actual_width() == u_gt.actual_width() && u.actual_height() == u_gt.actual_height(),
        "flow and ground truth must share one size"
    );
    let width = u.actual_width();
    let height = u.actual_height();
    difference.set_actual_size(width, height);

    let mut stats = ErrorStats::default();
    for y in 0..height as i32 {
        for x in 0..width as i32 {
            let gt_u = u_gt.at(x, y);
            let gt_v = v_gt.at(x, y);
            let unknown = gt_u.abs() > UNKNOWN_FLOW
                || gt_v.abs() > UNKNOWN_FLOW
                || gt_u.is_nan()
                || gt_v.is_nan();
            if unknown {
                *difference.at_mut(x, y) = 0.0;
                continue;
            }

            let du = u.at(x, y) - gt_u;
            let dv = v.at(x, y) - gt_v;
            let error = (du * du + dv * dv).sqrt();
            *difference.at_mut(x, y) = error;

            stats.sum += error;
            stats.max = stats.max.max(error);
            stats.count += 1;
        }
    }
    if stats.count > 0 {
        stats.mean = stats.sum / stats.count as f32;
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn image_from_fn(w: usize, h: usize, f: impl Fn(i32, i32) -> f32) -> Image {
        let mut img = Image::new(w, h);
        for y in 0..h as i32 {
            for x in 0..w as i32 {
                *img.at_mut(x, y) = f(x, y);
            }
        }
        img
    }

    #[test]
    fn identical_fields_give_zero_error_and_full_count() {
        let u = image_from_fn(6, 4, |x, y| (x - y) as f32);
        let v = image_from_fn(6, 4, |x, y| (x + y) as f32);
        let mut diff = Image::new(6, 4);
        let stats = endpoint_error(&u, &v, &u.clone(), &v.clone(), &mut diff);
        assert_eq!(stats.mean, 0.0);
        assert_eq!(stats.max, 0.0);
        assert_eq!(stats.sum, 0.0);
        assert_eq!(stats.count, 24);
    }

    #[test]
    fn error_is_the_euclidean_distance() {
        let u = image_from_fn(2, 1, |_, _| 3.0);
        let v = image_from_fn(2, 1, |_, _| 4.0);
        let u_gt = Image::new(2, 1);
        let v_gt = Image::new(2, 1);
        let mut diff = Image::new(2, 1);
        let stats = endpoint_error(&u, &v, &u_gt, &v_gt, &mut diff);
        assert_relative_eq!(stats.max, 5.0);
        assert_relative_eq!(stats.mean, 5.0);
        assert_relative_eq!(diff.at(1, 0), 5.0);
    }

    #[test]
    fn unknown_ground_truth_is_excluded() {
        let u = image_from_fn(3, 1, |_, _| 1.0);
        let v = image_from_fn(3, 1, |_, _| 0.0);
        let mut u_gt = Image::new(3, 1);
        let mut v_gt = Image::new(3, 1);
        *u_gt.at_mut(0, 0) = f32::NAN;
        *v_gt.at_mut(1, 0) = 2.0e6;
        let mut diff = Image::new(3, 1);
        let stats = endpoint_error(&u, &v, &u_gt, &v_gt, &mut diff);
        assert_eq!(stats.count, 1);
        assert_eq!(diff.at(0, 0), 0.0);
        assert_eq!(diff.at(1, 0), 0.0);
        assert_relative_eq!(stats.mean, 1.0);
    }

    #[test]
    fn empty_valid_set_reports_zero_mean() {
        let u = Image::new(2, 2);
        let v = Image::new(2, 2);
        let u_gt = image_from_fn(2, 2, |_, _| f32::INFINITY);
        let v_gt = Image::new(2, 2);
        let mut diff = Image::new(2, 2);
        let stats = endpoint_error(&u, &v, &u_gt, &v_gt, &mut diff);
        assert_eq!(stats.count, 0);
        assert_eq!(stats.mean, 0.0);
    }
}
