//! End-to-end pyramid scenarios
//!
//! Drives the full engine the way the CLI does: synthetic image pairs in,
//! dense flow out, checked against the known displacement. The translation
//! pair uses a steep ramp so the data term dominates the relaxation at
//! every level, which keeps the over-relaxed sweep well-conditioned.

use warpflow_core::io::{read_flo, write_flo};
use warpflow_core::metrics::endpoint_error;
use warpflow_core::solver::{CpuFlowEngine, FlowEngine, FlowParams, SolverKind};
use warpflow_core::Image;

/// I1 is a steep horizontal ramp; I2 is I1 translated by +2 pixels in x,
/// zero outside the frame
fn translation_pair(size: usize, shift: i32) -> (Image, Image) {
    let mut img1 = Image::new(size, size);
    let mut img2 = Image::new(size, size);
    for y in 0..size as i32 {
        for x in 0..size as i32 {
            *img1.at_mut(x, y) = 20.0 * x as f32;
            *img2.at_mut(x, y) = if x >= shift {
                20.0 * (x - shift) as f32
            } else {
                0.0
            };
        }
    }
    (img1, img2)
}

fn interior_means(flow: &warpflow_core::FlowField, margin: i32) -> (f32, f32) {
    let (width, height) = flow.dimensions();
    let mut sum_u = 0.0;
    let mut sum_abs_v = 0.0;
    let mut count = 0usize;
    for y in margin..height as i32 - margin {
        for x in margin..width as i32 - margin {
            sum_u += flow.u.at(x, y);
            sum_abs_v += flow.v.at(x, y).abs();
            count += 1;
        }
    }
    (sum_u / count as f32, sum_abs_v / count as f32)
}

#[test]
fn linear_solver_recovers_a_two_pixel_translation() {
    let (img1, img2) = translation_pair(64, 2);
    let params = FlowParams {
        warp_levels: 4,
        warp_scale: 0.5,
        solver_iterations: 40,
        alpha: 4.0,
        omega: 1.9,
        ..FlowParams::default()
    };
    let mut engine = CpuFlowEngine::new(SolverKind::Linear, params);
    let flow = engine.compute_flow(&img1, &img2).unwrap();

    let (mean_u, mean_abs_v) = interior_means(&flow, 4);
    assert!(
        (1.9..=2.1).contains(&mean_u),
        "mean u {mean_u} outside [1.9, 2.1]"
    );
    assert!(mean_abs_v < 0.1, "mean |v| {mean_abs_v} too large");
}

#[test]
fn robust_solver_recovers_a_two_pixel_translation() {
    let (img1, img2) = translation_pair(64, 2);
    let params = FlowParams {
        warp_levels: 4,
        warp_scale: 0.5,
        solver_iterations: 30,
        inner_iterations: 10,
        alpha: 4.0,
        omega: 1.0,
        ..FlowParams::default()
    };
    let mut engine = CpuFlowEngine::new(SolverKind::FlowDriven, params);
    let flow = engine.compute_flow(&img1, &img2).unwrap();

    let (mean_u, mean_abs_v) = interior_means(&flow, 4);
    assert!(
        (1.8..=2.2).contains(&mean_u),
        "mean u {mean_u} outside [1.8, 2.2]"
    );
    assert!(mean_abs_v < 0.1, "mean |v| {mean_abs_v} too large");
}

#[test]
fn identical_images_produce_exactly_zero_flow() {
    let mut img = Image::new(48, 40);
    for y in 0..40 {
        for x in 0..48 {
            *img.at_mut(x, y) = ((x * 13 + y * 7) % 29) as f32;
        }
    }
    let params = FlowParams {
        warp_levels: 15,
        warp_scale: 0.9,
        solver_iterations: 10,
        ..FlowParams::default()
    };
    for kind in [SolverKind::Linear, SolverKind::FlowDriven] {
        let mut engine = CpuFlowEngine::new(kind, params);
        let flow = engine.compute_flow(&img, &img.clone()).unwrap();
        for y in 0..40 {
            for x in 0..48 {
                assert_eq!(flow.u.at(x, y), 0.0);
                assert_eq!(flow.v.at(x, y), 0.0);
            }
        }
    }
}

#[test]
fn computed_flow_survives_a_flo_roundtrip_bit_exactly() {
    let (img1, img2) = translation_pair(32, 1);
    let params = FlowParams {
        warp_levels: 3,
        warp_scale: 0.5,
        solver_iterations: 15,
        ..FlowParams::default()
    };
    let mut engine = CpuFlowEngine::new(SolverKind::Linear, params);
    let flow = engine.compute_flow(&img1, &img2).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("computed.flo");
    write_flo(&flow.u, &flow.v, &path).unwrap();
    let back = read_flo(&path).unwrap();

    assert_eq!(back.dimensions(), flow.dimensions());
    for y in 0..32 {
        for x in 0..32 {
            assert_eq!(flow.u.at(x, y).to_bits(), back.u.at(x, y).to_bits());
            assert_eq!(flow.v.at(x, y).to_bits(), back.v.at(x, y).to_bits());
        }
    }
}

#[test]
fn endpoint_error_against_itself_is_zero_over_all_valid_pixels() {
    let (img1, img2) = translation_pair(32, 1);
    let mut engine = CpuFlowEngine::new(
        SolverKind::Linear,
        FlowParams {
            warp_levels: 3,
            warp_scale: 0.5,
            solver_iterations: 10,
            ..FlowParams::default()
        },
    );
    let flow = engine.compute_flow(&img1, &img2).unwrap();

    let mut difference = Image::new(32, 32);
    let stats = endpoint_error(&flow.u, &flow.v, &flow.u.clone(), &flow.v.clone(), &mut difference);
    assert_eq!(stats.mean, 0.0);
    assert_eq!(stats.max, 0.0);
    assert_eq!(stats.count, 32 * 32);
}

#[test]
fn auto_selected_backend_computes_a_valid_field() {
    let (img1, img2) = translation_pair(32, 1);
    let params = FlowParams {
        warp_levels: 3,
        warp_scale: 0.5,
        solver_iterations: 10,
        ..FlowParams::default()
    };
    let mut engine = warpflow_core::create_flow_engine(SolverKind::Linear, params, 32, 32);
    let flow = engine.compute_flow(&img1, &img2).unwrap();
    assert_eq!(flow.dimensions(), (32, 32));
    for y in 0..32 {
        for x in 0..32 {
            assert!(flow.u.at(x, y).is_finite());
            assert!(flow.v.at(x, y).is_finite());
        }
    }
}
