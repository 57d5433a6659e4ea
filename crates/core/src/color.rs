//! Flow visualisation colour wheel
//!
//! Maps a displacement to a colour: the phase of `(u, v)`, halved and
//! wrapped to `[0, π]`, selects a hue by piecewise-linear interpolation
//! between six anchor colours, and the magnitude (cut at 1) scales the
//! brightness. Unknown flow (NaN or magnitudes beyond 10⁶) renders black.

use crate::image::Image;

/// Magnitude past which a flow value is treated as unknown
const UNKNOWN_FLOW: f32 = 1.0e6;

/// Hue anchors: segment start angle as a fraction of π, segment span, and
/// the RGB endpoints interpolated across it
const SEGMENTS: [(f32, f32, [f32; 3], [f32; 3]); 6] = [
    (0.0, 0.125, [255.0, 0.0, 0.0], [255.0, 0.0, 255.0]),
    (0.125, 0.125, [255.0, 0.0, 255.0], [64.0, 64.0, 255.0]),
    (0.25, 0.125, [64.0, 64.0, 255.0], [0.0, 255.0, 255.0]),
    (0.375, 0.125, [0.0, 255.0, 255.0], [0.0, 255.0, 0.0]),
    (0.5, 0.25, [0.0, 255.0, 0.0], [255.0, 255.0, 0.0]),
    (0.75, 0.25, [255.0, 255.0, 0.0], [255.0, 0.0, 0.0]),
];

/// Map one displacement to an RGB triple
#[must_use]
pub fn flow_to_rgb(u: f32, v: f32) -> [u8; 3] {
    let (u, v) = if u.abs() > UNKNOWN_FLOW || v.abs() > UNKNOWN_FLOW || u.is_nan() || v.is_nan() {
        (0.0, 0.0)
    } else {
        (u, v)
    };

    let amp = (u * u + v * v).sqrt().min(1.0);

    // phase in [0, 2π), then halved onto the wheel's [0, π]
    let mut phi = v.atan2(u);
    if phi < 0.0 {
        phi += 2.0 * std::f32::consts::PI;
    }
    phi *= 0.5;

    let mut rgb = [0u8; 3];
    for (index, (start, span, from, to)) in SEGMENTS.iter().enumerate() {
        let lo = start * std::f32::consts::PI;
        let hi = (start + span) * std::f32::consts::PI;
        let inside = if index == SEGMENTS.len() - 1 {
            phi >= lo && phi <= hi
        } else {
            phi >= lo && phi < hi
        };
        if inside {
            let beta = (phi - lo) / (hi - lo);
            let alpha = 1.0 - beta;
            for c in 0..3 {
                let value = (amp * (alpha * from[c] + beta * to[c])).floor();
                rgb[c] = value.clamp(0.0, 255.0) as u8;
            }
            break;
        }
    }
    rgb
}

/// Render a flow field into packed RGB bytes
///
/// Flow values are divided by `flow_scale` before mapping, so `flow_scale`
/// is the displacement that saturates the wheel.
///
/// # Panics
///
/// Panics if the two components disagree on their actual size.
#[must_use]
pub fn render_flow(u: &Image, v: &Image, flow_scale: f32) -> Vec<u8> {
    assert!(
        u.actual_width() == v.actual_width() && u.actual_height() == v.actual_height(),
        "flow components must share one size"
    );
    let width = u.actual_width();
    let height = u.actual_height();
    let factor = 1.0 / flow_scale;

    let mut rgb = Vec::with_capacity(width * height * 3);
    for y in 0..height as i32 {
        for x in 0..width as i32 {
            rgb.extend_from_slice(&flow_to_rgb(u.at(x, y) * factor, v.at(x, y) * factor));
        }
    }
    rgb
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_flow_is_black() {
        assert_eq!(flow_to_rgb(0.0, 0.0), [0, 0, 0]);
    }

    #[test]
    fn unknown_flow_is_black() {
        assert_eq!(flow_to_rgb(f32::NAN, 0.3), [0, 0, 0]);
        assert_eq!(flow_to_rgb(0.3, f32::NAN), [0, 0, 0]);
        assert_eq!(flow_to_rgb(2.0e6, 0.0), [0, 0, 0]);
        assert_eq!(flow_to_rgb(0.0, -2.0e6), [0, 0, 0]);
    }

    #[test]
    fn saturated_rightward_flow_is_red() {
        // (u, v) = (1, 0): phase 0, full magnitude
        assert_eq!(flow_to_rgb(1.0, 0.0), [255, 0, 0]);
    }

    #[test]
    fn saturated_upward_flow_is_teal() {
        // phase pi/2 halved to pi/4: anchor between blue and teal
        assert_eq!(flow_to_rgb(0.0, 1.0), [64, 64, 255]);
    }

    #[test]
    fn leftward_flow_lands_between_green_and_yellow() {
        // phase pi halved to pi/2: pure green anchor
        assert_eq!(flow_to_rgb(-1.0, 0.0), [0, 255, 0]);
    }

    #[test]
    fn magnitude_scales_brightness() {
        let dim = flow_to_rgb(0.5, 0.0);
        assert_eq!(dim, [127, 0, 0]);
    }

    #[test]
    fn overlong_flow_saturates() {
        assert_eq!(flow_to_rgb(10.0, 0.0), [255, 0, 0]);
    }

    #[test]
    fn render_covers_every_pixel() {
        let mut u = Image::new(4, 3);
        let v = Image::new(4, 3);
        *u.at_mut(0, 0) = 2.0;
        let rgb = render_flow(&u, &v, 2.0);
        assert_eq!(rgb.len(), 4 * 3 * 3);
        // (1, 0) after scaling: saturated red
        assert_eq!(&rgb[0..3], &[255, 0, 0]);
        // zero elsewhere: black
        assert_eq!(&rgb[3..6], &[0, 0, 0]);
    }
}
