//! WarpFlow command-line driver
//!
//! Loads two greyscale PGM images and an optional Middlebury ground-truth
//! flow, runs the selected solver variants on the selected backends, and
//! reports per-solver wall time plus endpoint-error statistics. Each run's
//! flow is written as a colour-wheel visualisation. A failing backend skips
//! its variants; everything else still runs, and the process exits non-zero
//! at the end.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Instant;
use tracing_subscriber::EnvFilter;
use warpflow_core::color::render_flow;
use warpflow_core::io::{read_flo, read_pgm, write_ppm};
use warpflow_core::metrics::{endpoint_error, ErrorStats};
use warpflow_core::solver::{CpuFlowEngine, FlowEngine, FlowField, FlowParams, SolverKind};
use warpflow_core::Image;

#[cfg(feature = "gpu")]
use warpflow_core::solver::{GpuContext, GpuFlowEngine, GpuInitResult};

/// Solver variants to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum VariantFilter {
    /// Both solver variants
    All,
    /// Linear SOR solver only
    Linear,
    /// Flow-driven robust solver only
    Robust,
}

/// Backends to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum BackendFilter {
    /// CPU baseline and GPU where available
    All,
    /// CPU baseline only
    Cpu,
    /// GPU only
    Gpu,
}

#[derive(Parser, Debug)]
#[command(name = "warpflow")]
#[command(about = "Dense variational optical flow with a warping pyramid", long_about = None)]
struct Args {
    /// First input image (binary 8-bit PGM)
    image1: PathBuf,

    /// Second input image (binary 8-bit PGM)
    image2: PathBuf,

    /// Middlebury .flo ground truth for endpoint-error statistics
    #[arg(short, long)]
    ground_truth: Option<PathBuf>,

    /// Directory for flow visualisations
    #[arg(short, long, default_value = "output")]
    output_dir: PathBuf,

    /// Solver variants to run
    #[arg(long, value_enum, default_value_t = VariantFilter::All)]
    solver: VariantFilter,

    /// Backends to run
    #[arg(long, value_enum, default_value_t = BackendFilter::All)]
    backend: BackendFilter,

    /// Upper bound on pyramid depth
    #[arg(long, default_value_t = 15)]
    warp_levels: u32,

    /// Per-level size factor, in (0, 1)
    #[arg(long, default_value_t = 0.9)]
    warp_scale: f32,

    /// SOR sweeps per level (outer iterations for the robust solver)
    #[arg(long, default_value_t = 30)]
    solver_iterations: u32,

    /// Frozen-weight inner sweeps of the robust solver
    #[arg(long, default_value_t = 10)]
    inner_iterations: u32,

    /// Smoothness weight
    #[arg(long, default_value_t = 4.0)]
    alpha: f32,

    /// SOR relaxation factor (1.0 = Jacobi-style)
    #[arg(long, default_value_t = 1.0)]
    omega: f32,

    /// Epsilon floor of the smoothness weight (robust solver)
    #[arg(long, default_value_t = 1e-3)]
    e_smooth: f32,

    /// Epsilon floor of the data weight (robust solver)
    #[arg(long, default_value_t = 1e-3)]
    e_data: f32,
}

impl Args {
    fn flow_params(&self) -> FlowParams {
        FlowParams {
            warp_levels: self.warp_levels,
            warp_scale: self.warp_scale,
            solver_iterations: self.solver_iterations,
            inner_iterations: self.inner_iterations,
            alpha: self.alpha,
            omega: self.omega,
            e_smooth: self.e_smooth,
            e_data: self.e_data,
        }
    }

    fn wants_variant(&self, kind: SolverKind) -> bool {
        match self.solver {
            VariantFilter::All => true,
            VariantFilter::Linear => kind == SolverKind::Linear,
            VariantFilter::Robust => kind == SolverKind::FlowDriven,
        }
    }
}

/// One finished solver run
struct RunResult {
    label: &'static str,
    seconds: f64,
    stats: Option<ErrorStats>,
}

struct GroundTruth {
    u: Image,
    v: Image,
    difference: Image,
}

/// Run one engine, report, visualise; returns None on dispatch failure
fn run_solver(
    engine: &mut dyn FlowEngine,
    label: &'static str,
    img1: &Image,
    img2: &Image,
    ground_truth: &mut Option<GroundTruth>,
    flow_scale: f32,
    output_dir: &std::path::Path,
) -> Option<RunResult> {
    println!();
    println!("--- {label} ---");

    let start = Instant::now();
    let flow: FlowField = match engine.compute_flow(img1, img2) {
        Ok(flow) => flow,
        Err(error) => {
            eprintln!("{label}: {error}");
            return None;
        }
    };
    let seconds = start.elapsed().as_secs_f64();
    println!("time: {seconds:.3} s");

    let stats = ground_truth.as_mut().map(|gt| {
        let stats = endpoint_error(&flow.u, &flow.v, &gt.u, &gt.v, &mut gt.difference);
        println!("mean error: {:.4}  max error: {:.4}", stats.mean, stats.max);
        stats
    });

    let rgb = render_flow(&flow.u, &flow.v, flow_scale);
    let path = output_dir.join(format!("flow_{}.pgm", label.replace(' ', "_")));
    if let Err(error) = write_ppm(
        flow.u.actual_width(),
        flow.u.actual_height(),
        &rgb,
        &path,
    ) {
        eprintln!("{label}: failed to write visualisation: {error}");
    }

    Some(RunResult {
        label,
        seconds,
        stats,
    })
}

fn print_comparison(results: &[RunResult]) {
    if results.is_empty() {
        return;
    }
    println!();
    println!("*************** METHODS COMPARISON ***************");
    println!();
    println!("{:<16}{:>10}{:>12}{:>12}{:>10}", "Method", "Time", "Mean err", "Max err", "Speed-up");
    let baseline = results[0].seconds;
    for result in results {
        let (mean, max) = result
            .stats
            .map_or((f32::NAN, f32::NAN), |s| (s.mean, s.max));
        println!(
            "{:<16}{:>10.3}{:>12.4}{:>12.4}{:>10.2}",
            result.label,
            result.seconds,
            mean,
            max,
            baseline / result.seconds
        );
    }
    println!();
    println!("*************** ****************** ***************");
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let params = args.flow_params();
    anyhow::ensure!(
        params.warp_scale > 0.0 && params.warp_scale < 1.0,
        "warp scale must lie in (0, 1)"
    );

    let img1 = read_pgm(&args.image1)
        .with_context(|| format!("loading {}", args.image1.display()))?;
    let img2 = read_pgm(&args.image2)
        .with_context(|| format!("loading {}", args.image2.display()))?;
    anyhow::ensure!(
        img1.actual_width() == img2.actual_width()
            && img1.actual_height() == img2.actual_height(),
        "input images must share one size ({}x{} vs {}x{})",
        img1.actual_width(),
        img1.actual_height(),
        img2.actual_width(),
        img2.actual_height()
    );
    println!(
        "source image size: ({}x{})",
        img1.actual_width(),
        img1.actual_height()
    );

    let mut ground_truth = match &args.ground_truth {
        Some(path) => {
            let gt = read_flo(path).with_context(|| format!("loading {}", path.display()))?;
            anyhow::ensure!(
                gt.dimensions() == (img1.actual_width(), img1.actual_height()),
                "ground truth size {:?} does not match the images",
                gt.dimensions()
            );
            let difference = Image::new(img1.actual_width(), img1.actual_height());
            Some(GroundTruth {
                u: gt.u,
                v: gt.v,
                difference,
            })
        }
        None => None,
    };

    std::fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("creating {}", args.output_dir.display()))?;

    // the wheel saturates at roughly one level's worth of displacement
    let flow_scale = 2.0 * params.warp_scale;

    if let Some(gt) = &ground_truth {
        let rgb = render_flow(&gt.u, &gt.v, flow_scale);
        write_ppm(
            gt.u.actual_width(),
            gt.u.actual_height(),
            &rgb,
            args.output_dir.join("flow_gt.pgm"),
        )?;
    }

    let kinds: Vec<SolverKind> = [SolverKind::Linear, SolverKind::FlowDriven]
        .into_iter()
        .filter(|&k| args.wants_variant(k))
        .collect();

    let mut results = Vec::new();
    let mut had_failure = false;

    if args.backend != BackendFilter::Gpu {
        for &kind in &kinds {
            let label = match kind {
                SolverKind::Linear => "cpu linear",
                SolverKind::FlowDriven => "cpu robust",
            };
            let mut engine = CpuFlowEngine::new(kind, params);
            match run_solver(
                &mut engine,
                label,
                &img1,
                &img2,
                &mut ground_truth,
                flow_scale,
                &args.output_dir,
            ) {
                Some(result) => results.push(result),
                None => had_failure = true,
            }
        }
    }

    #[cfg(feature = "gpu")]
    if args.backend != BackendFilter::Cpu {
        for &kind in &kinds {
            let label = match kind {
                SolverKind::Linear => "gpu linear",
                SolverKind::FlowDriven => "gpu robust",
            };
            match GpuContext::new() {
                GpuInitResult::Success(context) => {
                    let mut engine = GpuFlowEngine::new(context, kind, params);
                    match run_solver(
                        &mut engine,
                        label,
                        &img1,
                        &img2,
                        &mut ground_truth,
                        flow_scale,
                        &args.output_dir,
                    ) {
                        Some(result) => results.push(result),
                        None => had_failure = true,
                    }
                }
                GpuInitResult::NoGpuFound => {
                    eprintln!("{label}: no GPU adapter found, skipping");
                    if args.backend == BackendFilter::Gpu {
                        had_failure = true;
                    }
                }
                GpuInitResult::InitFailed {
                    adapter_name,
                    error,
                } => {
                    eprintln!("{label}: GPU '{adapter_name}' failed to initialize: {error}");
                    had_failure = true;
                }
            }
        }
    }

    #[cfg(not(feature = "gpu"))]
    if args.backend == BackendFilter::Gpu {
        eprintln!("GPU backend requested but this build has the gpu feature disabled");
        had_failure = true;
    }

    print_comparison(&results);

    if had_failure {
        std::process::exit(1);
    }
    Ok(())
}
