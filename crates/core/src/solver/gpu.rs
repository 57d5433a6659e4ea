//! GPU flow engine
//!
//! Device-resident implementation of the warping pyramid using wgpu compute
//! pipelines over storage buffers. Both source images are uploaded once per
//! run; every per-level step (area resampling, boundary reflection,
//! backward warping, the SOR sweeps, the increment accumulation) is a
//! kernel dispatch, and the accumulated flow never leaves the device until
//! the final readback.
//!
//! # Shader files
//!
//! Compute kernels live in `shaders/`:
//! - `zero.wgsl`, `add.wgsl`: whole-buffer utilities
//! - `reflect.wgsl`: mirrored halo fill (row and column passes)
//! - `resample.wgsl`: conservative area resampling (x and y passes)
//! - `warp.wgsl`: backward registration
//! - `solver.wgsl`: linear SOR sweep
//! - `robust.wgsl`: psi/xi weight refresh and the robust sweep
//!
//! # Ordering
//!
//! Every dispatch is its own queue submission; wgpu's submission order is
//! the barrier equivalent between the per-level phases. Ping-pong between
//! sweeps swaps buffer handles on the host and rebinds, never copies.
//! All buffers share the padded host layout (one-pixel halo, pitch rounded
//! to 32), so host images upload and read back as flat memcpys.

use super::context::GpuContext;
use super::{FlowEngine, FlowField, FlowParams, SolverKind};
use crate::error::FlowError;
use crate::image::Image;
use crate::pyramid::PyramidSchedule;
use bytemuck::{Pod, Zeroable};
use tracing::{debug, info};
use wgpu::util::DeviceExt;

/// 2-D tile edge; must match `@workgroup_size` in the 2-D kernels
const WORKGROUP_2D: u32 = 16;
/// 1-D workgroup width; must match `@workgroup_size` in the 1-D kernels
const WORKGROUP_1D: u32 = 64;

/// Whole-buffer kernel parameters (must match WGSL struct layout)
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct LenParams {
    len: u32,
    _pad: [u32; 3],
}

/// Halo-reflection parameters (must match WGSL struct layout)
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct ReflectParams {
    width: u32,
    height: u32,
    pitch: u32,
    _pad: u32,
}

/// Warp kernel parameters (must match WGSL struct layout)
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct GridParams {
    width: u32,
    height: u32,
    pitch: u32,
    _pad0: u32,
    hx: f32,
    hy: f32,
    _pad1: f32,
    _pad2: f32,
}

/// Resample pass parameters (must match WGSL struct layout)
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct ResampleParams {
    src_n: u32,
    dst_m: u32,
    lines: u32,
    pitch: u32,
}

/// Linear solver parameters (must match WGSL struct layout)
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct SolveParams {
    width: u32,
    height: u32,
    pitch: u32,
    _pad: u32,
    hx: f32,
    hy: f32,
    alpha: f32,
    omega: f32,
}

/// Robust solver parameters (must match WGSL struct layout)
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct RobustParams {
    width: u32,
    height: u32,
    pitch: u32,
    _pad: u32,
    hx: f32,
    hy: f32,
    alpha: f32,
    omega: f32,
    e_smooth: f32,
    e_data: f32,
    _pad1: f32,
    _pad2: f32,
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn uniform_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn make_pipeline(
    device: &wgpu::Device,
    module: &wgpu::ShaderModule,
    layout: &wgpu::BindGroupLayout,
    entry_point: &str,
) -> wgpu::ComputePipeline {
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(entry_point),
        bind_group_layouts: &[layout],
        push_constant_ranges: &[],
    });
    device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(entry_point),
        layout: Some(&pipeline_layout),
        module,
        entry_point,
        compilation_options: wgpu::PipelineCompilationOptions::default(),
        cache: None,
    })
}

/// Compute pipelines and their bind group layouts, built once per engine
struct Pipelines {
    zero: wgpu::ComputePipeline,
    zero_layout: wgpu::BindGroupLayout,
    add: wgpu::ComputePipeline,
    add_layout: wgpu::BindGroupLayout,
    reflect_rows: wgpu::ComputePipeline,
    reflect_cols: wgpu::ComputePipeline,
    reflect_layout: wgpu::BindGroupLayout,
    resample_x: wgpu::ComputePipeline,
    resample_y: wgpu::ComputePipeline,
    resample_layout: wgpu::BindGroupLayout,
    warp: wgpu::ComputePipeline,
    warp_layout: wgpu::BindGroupLayout,
    solve_linear: wgpu::ComputePipeline,
    solve_layout: wgpu::BindGroupLayout,
    compute_weights: wgpu::ComputePipeline,
    solve_robust: wgpu::ComputePipeline,
    robust_layout: wgpu::BindGroupLayout,
}

impl Pipelines {
    fn new(device: &wgpu::Device) -> Self {
        let zero_module = device.create_shader_module(wgpu::include_wgsl!("shaders/zero.wgsl"));
        let add_module = device.create_shader_module(wgpu::include_wgsl!("shaders/add.wgsl"));
        let reflect_module =
            device.create_shader_module(wgpu::include_wgsl!("shaders/reflect.wgsl"));
        let resample_module =
            device.create_shader_module(wgpu::include_wgsl!("shaders/resample.wgsl"));
        let warp_module = device.create_shader_module(wgpu::include_wgsl!("shaders/warp.wgsl"));
        let solver_module = device.create_shader_module(wgpu::include_wgsl!("shaders/solver.wgsl"));
        let robust_module = device.create_shader_module(wgpu::include_wgsl!("shaders/robust.wgsl"));

        let zero_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("zero layout"),
            entries: &[storage_entry(0, false), uniform_entry(1)],
        });
        let add_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("add layout"),
            entries: &[storage_entry(0, false), storage_entry(1, true), uniform_entry(2)],
        });
        let reflect_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("reflect layout"),
            entries: &[storage_entry(0, false), uniform_entry(1)],
        });
        let resample_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("resample layout"),
            entries: &[storage_entry(0, true), storage_entry(1, false), uniform_entry(2)],
        });
        let warp_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("warp layout"),
            entries: &[
                storage_entry(0, true),
                storage_entry(1, true),
                storage_entry(2, true),
                storage_entry(3, true),
                storage_entry(4, false),
                uniform_entry(5),
            ],
        });
        let solve_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("linear solver layout"),
            entries: &[
                storage_entry(0, true),
                storage_entry(1, true),
                storage_entry(2, true),
                storage_entry(3, true),
                storage_entry(4, true),
                storage_entry(5, true),
                storage_entry(6, false),
                storage_entry(7, false),
                uniform_entry(8),
            ],
        });
        let robust_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("robust solver layout"),
            entries: &[
                storage_entry(0, true),
                storage_entry(1, true),
                storage_entry(2, true),
                storage_entry(3, true),
                storage_entry(4, true),
                storage_entry(5, true),
                storage_entry(6, false),
                storage_entry(7, false),
                storage_entry(8, false),
                storage_entry(9, false),
                uniform_entry(10),
            ],
        });

        Self {
            zero: make_pipeline(device, &zero_module, &zero_layout, "zero_fill"),
            add: make_pipeline(device, &add_module, &add_layout, "add_assign"),
            reflect_rows: make_pipeline(device, &reflect_module, &reflect_layout, "reflect_rows"),
            reflect_cols: make_pipeline(device, &reflect_module, &reflect_layout, "reflect_cols"),
            resample_x: make_pipeline(device, &resample_module, &resample_layout, "resample_x"),
            resample_y: make_pipeline(device, &resample_module, &resample_layout, "resample_y"),
            warp: make_pipeline(device, &warp_module, &warp_layout, "warp"),
            solve_linear: make_pipeline(device, &solver_module, &solve_layout, "solve_linear"),
            compute_weights: make_pipeline(device, &robust_module, &robust_layout, "compute_weights"),
            solve_robust: make_pipeline(device, &robust_module, &robust_layout, "solve_robust"),
            zero_layout,
            add_layout,
            reflect_layout,
            resample_layout,
            warp_layout,
            solve_layout,
            robust_layout,
        }
    }
}

/// Device-side working set of one run; all buffers share the padded host
/// layout and full-resolution capacity
struct DeviceBuffers {
    src_img1: wgpu::Buffer,
    src_img2: wgpu::Buffer,
    img1: wgpu::Buffer,
    img2: wgpu::Buffer,
    img2_warped: wgpu::Buffer,
    u: wgpu::Buffer,
    v: wgpu::Buffer,
    du: wgpu::Buffer,
    dv: wgpu::Buffer,
    du_back: wgpu::Buffer,
    dv_back: wgpu::Buffer,
    psi: wgpu::Buffer,
    xi: wgpu::Buffer,
    staging_u: wgpu::Buffer,
    staging_v: wgpu::Buffer,
    // uniform buffers, rewritten per dispatch phase
    len_params: wgpu::Buffer,
    reflect_params: wgpu::Buffer,
    grid_params: wgpu::Buffer,
    resample_params: wgpu::Buffer,
    solve_params: wgpu::Buffer,
    robust_params: wgpu::Buffer,
    bytes: u64,
    len: u32,
    pitch: u32,
}

impl DeviceBuffers {
    fn new(device: &wgpu::Device, staged1: &Image, staged2: &Image) -> Self {
        let bytes = (staged1.data().len() * std::mem::size_of::<f32>()) as u64;
        let storage = wgpu::BufferUsages::STORAGE
            | wgpu::BufferUsages::COPY_SRC
            | wgpu::BufferUsages::COPY_DST;

        let make = |label: &str| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size: bytes,
                usage: storage,
                mapped_at_creation: false,
            })
        };
        let make_staging = |label: &str| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size: bytes,
                usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        };
        let make_uniform = |label: &str, size: u64| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        };

        Self {
            src_img1: device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("source image 1"),
                contents: bytemuck::cast_slice(staged1.data()),
                usage: storage,
            }),
            src_img2: device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("source image 2"),
                contents: bytemuck::cast_slice(staged2.data()),
                usage: storage,
            }),
            img1: make("image 1 (level)"),
            img2: make("image 2 (level)"),
            img2_warped: make("image 2 warped"),
            u: make("flow u"),
            v: make("flow v"),
            du: make("increment du"),
            dv: make("increment dv"),
            du_back: make("increment du (back)"),
            dv_back: make("increment dv (back)"),
            psi: make("diffusion weight psi"),
            xi: make("data weight xi"),
            staging_u: make_staging("flow u staging"),
            staging_v: make_staging("flow v staging"),
            len_params: make_uniform("len params", std::mem::size_of::<LenParams>() as u64),
            reflect_params: make_uniform(
                "reflect params",
                std::mem::size_of::<ReflectParams>() as u64,
            ),
            grid_params: make_uniform("grid params", std::mem::size_of::<GridParams>() as u64),
            resample_params: make_uniform(
                "resample params",
                std::mem::size_of::<ResampleParams>() as u64,
            ),
            solve_params: make_uniform("solve params", std::mem::size_of::<SolveParams>() as u64),
            robust_params: make_uniform(
                "robust params",
                std::mem::size_of::<RobustParams>() as u64,
            ),
            bytes,
            len: (bytes / std::mem::size_of::<f32>() as u64) as u32,
            pitch: staged1.pitch() as u32,
        }
    }
}

/// GPU backend of the warping-pyramid flow computation
pub struct GpuFlowEngine {
    device: wgpu::Device,
    queue: wgpu::Queue,
    kind: SolverKind,
    params: FlowParams,
    pipelines: Pipelines,
}

impl GpuFlowEngine {
    /// Create an engine on an initialized context
    #[must_use]
    pub fn new(context: GpuContext, kind: SolverKind, params: FlowParams) -> Self {
        let (device, queue) = context.into_device_queue();
        let pipelines = Pipelines::new(&device);
        Self {
            device,
            queue,
            kind,
            params,
            pipelines,
        }
    }

    fn submit_1d(&self, pipeline: &wgpu::ComputePipeline, bind_group: &wgpu::BindGroup, count: u32, label: &str) {
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(label),
                timestamp_writes: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, bind_group, &[]);
            pass.dispatch_workgroups(count.div_ceil(WORKGROUP_1D), 1, 1);
        }
        self.queue.submit(std::iter::once(encoder.finish()));
    }

    fn submit_2d(&self, pipeline: &wgpu::ComputePipeline, bind_group: &wgpu::BindGroup, width: u32, height: u32, label: &str) {
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(label),
                timestamp_writes: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, bind_group, &[]);
            pass.dispatch_workgroups(
                width.div_ceil(WORKGROUP_2D),
                height.div_ceil(WORKGROUP_2D),
                1,
            );
        }
        self.queue.submit(std::iter::once(encoder.finish()));
    }

    fn zero_buffer(&self, bufs: &DeviceBuffers, target: &wgpu::Buffer) {
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("zero bind group"),
            layout: &self.pipelines.zero_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: target.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: bufs.len_params.as_entire_binding(),
                },
            ],
        });
        self.submit_1d(&self.pipelines.zero, &bind_group, bufs.len, "zero");
    }

    fn add_into(&self, bufs: &DeviceBuffers, dst: &wgpu::Buffer, src: &wgpu::Buffer) {
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("add bind group"),
            layout: &self.pipelines.add_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: dst.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: src.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: bufs.len_params.as_entire_binding(),
                },
            ],
        });
        self.submit_1d(&self.pipelines.add, &bind_group, bufs.len, "add");
    }

    /// Reflect the one-pixel halo of `target`; `reflect_params` must hold
    /// the current level size
    fn reflect_boundaries(&self, bufs: &DeviceBuffers, target: &wgpu::Buffer, width: u32, height: u32) {
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("reflect bind group"),
            layout: &self.pipelines.reflect_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: target.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: bufs.reflect_params.as_entire_binding(),
                },
            ],
        });
        self.submit_1d(&self.pipelines.reflect_rows, &bind_group, width, "reflect rows");
        self.submit_1d(&self.pipelines.reflect_cols, &bind_group, height, "reflect cols");
    }

    #[allow(clippy::too_many_arguments)]
    fn resample_pass(
        &self,
        bufs: &DeviceBuffers,
        pipeline: &wgpu::ComputePipeline,
        src: &wgpu::Buffer,
        dst: &wgpu::Buffer,
        src_n: u32,
        dst_m: u32,
        lines: u32,
        label: &str,
    ) {
        self.queue.write_buffer(
            &bufs.resample_params,
            0,
            bytemuck::bytes_of(&ResampleParams {
                src_n,
                dst_m,
                lines,
                pitch: bufs.pitch,
            }),
        );
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout: &self.pipelines.resample_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: src.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: dst.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: bufs.resample_params.as_entire_binding(),
                },
            ],
        });
        self.submit_1d(pipeline, &bind_group, lines, label);
    }

    /// Separable device resample from `src_w × src_h` to `dst_w × dst_h`,
    /// scratching through `tmp`; pass order keeps the intermediate small
    #[allow(clippy::too_many_arguments)]
    fn resample_device(
        &self,
        bufs: &DeviceBuffers,
        src: &wgpu::Buffer,
        dst: &wgpu::Buffer,
        tmp: &wgpu::Buffer,
        src_w: u32,
        src_h: u32,
        dst_w: u32,
        dst_h: u32,
    ) {
        if dst_h >= src_h {
            // interpolation: x pass first
            self.resample_pass(bufs, &self.pipelines.resample_x, src, tmp, src_w, dst_w, src_h, "resample x");
            self.resample_pass(bufs, &self.pipelines.resample_y, tmp, dst, src_h, dst_h, dst_w, "resample y");
        } else {
            // restriction: y pass first
            self.resample_pass(bufs, &self.pipelines.resample_y, src, tmp, src_h, dst_h, src_w, "resample y");
            self.resample_pass(bufs, &self.pipelines.resample_x, tmp, dst, src_w, dst_w, dst_h, "resample x");
        }
    }

    fn warp(&self, bufs: &DeviceBuffers, width: u32, height: u32) {
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("warp bind group"),
            layout: &self.pipelines.warp_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: bufs.img1.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: bufs.img2.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: bufs.u.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: bufs.v.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: bufs.img2_warped.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 5,
                    resource: bufs.grid_params.as_entire_binding(),
                },
            ],
        });
        self.submit_2d(&self.pipelines.warp, &bind_group, width, height, "warp");
    }

    /// Bind group for one linear sweep with the current ping-pong roles
    fn linear_bind_group(&self, bufs: &DeviceBuffers) -> wgpu::BindGroup {
        self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("linear solve bind group"),
            layout: &self.pipelines.solve_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: bufs.img1.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: bufs.img2_warped.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: bufs.u.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: bufs.v.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: bufs.du.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 5,
                    resource: bufs.dv.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 6,
                    resource: bufs.du_back.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 7,
                    resource: bufs.dv_back.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 8,
                    resource: bufs.solve_params.as_entire_binding(),
                },
            ],
        })
    }

    /// Bind group shared by the weight refresh and the robust sweep
    fn robust_bind_group(&self, bufs: &DeviceBuffers) -> wgpu::BindGroup {
        self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("robust solve bind group"),
            layout: &self.pipelines.robust_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: bufs.img1.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: bufs.img2_warped.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: bufs.u.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: bufs.v.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: bufs.du.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 5,
                    resource: bufs.dv.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 6,
                    resource: bufs.psi.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 7,
                    resource: bufs.xi.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 8,
                    resource: bufs.du_back.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 9,
                    resource: bufs.dv_back.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 10,
                    resource: bufs.robust_params.as_entire_binding(),
                },
            ],
        })
    }

    fn copy_whole(&self, src: &wgpu::Buffer, dst: &wgpu::Buffer, bytes: u64) {
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("buffer copy"),
            });
        encoder.copy_buffer_to_buffer(src, 0, dst, 0, bytes);
        self.queue.submit(std::iter::once(encoder.finish()));
    }

    fn read_back(
        &self,
        src: &wgpu::Buffer,
        staging: &wgpu::Buffer,
        bytes: u64,
        width: usize,
        height: usize,
    ) -> Result<Image, FlowError> {
        self.copy_whole(src, staging, bytes);

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        let _ = self.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|_| FlowError::GpuDispatch("readback callback dropped".into()))?
            .map_err(|e| FlowError::GpuDispatch(format!("buffer map failed: {e}")))?;

        let mut img = Image::with_halo(width, height, 1, 1);
        {
            let data = slice.get_mapped_range();
            img.data_mut().copy_from_slice(bytemuck::cast_slice(&data));
        }
        staging.unmap();
        Ok(img)
    }

    fn run(&mut self, img1: &Image, img2: &Image) -> Result<FlowField, FlowError> {
        let width = img1.actual_width();
        let height = img1.actual_height();

        // stage sources into the padded device layout
        let mut staged1 = Image::with_halo(width, height, 1, 1);
        staged1.copy_from(img1);
        let mut staged2 = Image::with_halo(width, height, 1, 1);
        staged2.copy_from(img2);

        let mut bufs = DeviceBuffers::new(&self.device, &staged1, &staged2);
        self.queue.write_buffer(
            &bufs.len_params,
            0,
            bytemuck::bytes_of(&LenParams {
                len: bufs.len,
                _pad: [0; 3],
            }),
        );

        let p = self.params;
        let mut prev_size: Option<(u32, u32)> = None;

        let schedule = PyramidSchedule::new(width, height, p.warp_levels, p.warp_scale);
        for level in schedule {
            info!(
                "solve level {} ({}x{})",
                level.index, level.width, level.height
            );
            let (lw, lh) = (level.width as u32, level.height as u32);

            // image resampling; full resolution is a plain copy
            if level.index == 0 {
                self.copy_whole(&bufs.src_img1, &bufs.img1, bufs.bytes);
                self.copy_whole(&bufs.src_img2, &bufs.img2, bufs.bytes);
            } else {
                self.resample_device(
                    &bufs,
                    &bufs.src_img1,
                    &bufs.img1,
                    &bufs.img2_warped,
                    width as u32,
                    height as u32,
                    lw,
                    lh,
                );
                self.resample_device(
                    &bufs,
                    &bufs.src_img2,
                    &bufs.img2,
                    &bufs.img2_warped,
                    width as u32,
                    height as u32,
                    lw,
                    lh,
                );
            }

            // displacement field resampling; the first processed level
            // starts from zero flow
            match prev_size {
                None => {
                    self.zero_buffer(&bufs, &bufs.u);
                    self.zero_buffer(&bufs, &bufs.v);
                }
                Some((pw, ph)) => {
                    self.resample_device(&bufs, &bufs.u, &bufs.du, &bufs.img2_warped, pw, ph, lw, lh);
                    std::mem::swap(&mut bufs.u, &mut bufs.du);
                    self.resample_device(&bufs, &bufs.v, &bufs.dv, &bufs.img2_warped, pw, ph, lw, lh);
                    std::mem::swap(&mut bufs.v, &mut bufs.dv);
                }
            }

            self.queue.write_buffer(
                &bufs.reflect_params,
                0,
                bytemuck::bytes_of(&ReflectParams {
                    width: lw,
                    height: lh,
                    pitch: bufs.pitch,
                    _pad: 0,
                }),
            );
            self.queue.write_buffer(
                &bufs.grid_params,
                0,
                bytemuck::bytes_of(&GridParams {
                    width: lw,
                    height: lh,
                    pitch: bufs.pitch,
                    _pad0: 0,
                    hx: level.hx,
                    hy: level.hy,
                    _pad1: 0.0,
                    _pad2: 0.0,
                }),
            );

            // warp samples img2 bounds-checked, so its halo stays untouched
            self.warp(&bufs, lw, lh);

            // the solver stencil reads the halo of both its images
            self.reflect_boundaries(&bufs, &bufs.img1, lw, lh);
            self.reflect_boundaries(&bufs, &bufs.img2_warped, lw, lh);

            // per-level solve from a zero increment
            self.zero_buffer(&bufs, &bufs.du);
            self.zero_buffer(&bufs, &bufs.dv);
            self.zero_buffer(&bufs, &bufs.du_back);
            self.zero_buffer(&bufs, &bufs.dv_back);

            match self.kind {
                SolverKind::Linear => {
                    self.queue.write_buffer(
                        &bufs.solve_params,
                        0,
                        bytemuck::bytes_of(&SolveParams {
                            width: lw,
                            height: lh,
                            pitch: bufs.pitch,
                            _pad: 0,
                            hx: level.hx,
                            hy: level.hy,
                            alpha: p.alpha,
                            omega: p.omega,
                        }),
                    );
                    for _ in 0..p.solver_iterations {
                        let bind_group = self.linear_bind_group(&bufs);
                        self.submit_2d(
                            &self.pipelines.solve_linear,
                            &bind_group,
                            lw,
                            lh,
                            "linear sweep",
                        );
                        std::mem::swap(&mut bufs.du, &mut bufs.du_back);
                        std::mem::swap(&mut bufs.dv, &mut bufs.dv_back);
                    }
                }
                SolverKind::FlowDriven => {
                    self.queue.write_buffer(
                        &bufs.robust_params,
                        0,
                        bytemuck::bytes_of(&RobustParams {
                            width: lw,
                            height: lh,
                            pitch: bufs.pitch,
                            _pad: 0,
                            hx: level.hx,
                            hy: level.hy,
                            alpha: p.alpha,
                            omega: p.omega,
                            e_smooth: p.e_smooth,
                            e_data: p.e_data,
                            _pad1: 0.0,
                            _pad2: 0.0,
                        }),
                    );
                    for _ in 0..p.solver_iterations {
                        // refresh (psi, xi) from the current increment, then
                        // sweep with the weights frozen
                        let weights_group = self.robust_bind_group(&bufs);
                        self.submit_2d(
                            &self.pipelines.compute_weights,
                            &weights_group,
                            lw,
                            lh,
                            "weight refresh",
                        );
                        for _ in 0..p.inner_iterations {
                            let bind_group = self.robust_bind_group(&bufs);
                            self.submit_2d(
                                &self.pipelines.solve_robust,
                                &bind_group,
                                lw,
                                lh,
                                "robust sweep",
                            );
                            std::mem::swap(&mut bufs.du, &mut bufs.du_back);
                            std::mem::swap(&mut bufs.dv, &mut bufs.dv_back);
                        }
                    }
                }
            }

            // accumulate the increment into the running flow
            self.add_into(&bufs, &bufs.u, &bufs.du);
            self.add_into(&bufs, &bufs.v, &bufs.dv);

            // level boundary: drain the queue before the sizes change
            let _ = self.device.poll(wgpu::Maintain::Wait);
            prev_size = Some((lw, lh));

            debug!("level {} submitted and drained", level.index);
        }

        let u = self.read_back(&bufs.u, &bufs.staging_u, bufs.bytes, width, height)?;
        let v = self.read_back(&bufs.v, &bufs.staging_v, bufs.bytes, width, height)?;
        Ok(FlowField { u, v })
    }
}

impl FlowEngine for GpuFlowEngine {
    fn compute_flow(&mut self, img1: &Image, img2: &Image) -> Result<FlowField, FlowError> {
        assert!(
            img1.actual_width() == img2.actual_width()
                && img1.actual_height() == img2.actual_height(),
            "source images must share one size"
        );

        // surface validation failures as dispatch errors instead of panics
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let result = self.run(img1, img2);
        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(FlowError::GpuDispatch(error.to_string()));
        }
        result
    }

    fn is_gpu_accelerated(&self) -> bool {
        true
    }
}
