//! GPU context and initialization
//!
//! Device and queue setup for the compute backend, with error handling that
//! distinguishes "no GPU found" (expected on some systems, silent CPU
//! fallback) from "GPU found but failed to initialize" (potential driver
//! issue worth a warning).

use tracing::{debug, info};

/// Result of a GPU initialization attempt
#[derive(Debug)]
pub enum GpuInitResult {
    /// GPU initialized successfully
    Success(GpuContext),
    /// No compatible adapter found (silent fallback to CPU)
    NoGpuFound,
    /// Adapter found but device creation failed (log a warning, fall back)
    InitFailed {
        /// Name of the adapter that failed
        adapter_name: String,
        /// Backend error message
        error: String,
    },
}

/// GPU context managing device and queue
///
/// Wraps the wgpu device and queue along with adapter information, plus
/// helpers for workgroup sizing and working-set fit checks.
#[derive(Debug)]
pub struct GpuContext {
    device: wgpu::Device,
    queue: wgpu::Queue,
    adapter_info: wgpu::AdapterInfo,
}

impl GpuContext {
    /// Initialize a GPU context for headless compute
    #[allow(clippy::new_ret_no_self)]
    #[must_use]
    pub fn new() -> GpuInitResult {
        info!("attempting to initialize GPU context");

        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = if let Some(a) =
            pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })) {
            debug!("found GPU adapter: {}", a.get_info().name);
            a
        } else {
            debug!("no GPU adapter found");
            return GpuInitResult::NoGpuFound;
        };

        let adapter_info = adapter.get_info();
        let adapter_name = adapter_info.name.clone();

        match pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("WarpFlow GPU"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                memory_hints: wgpu::MemoryHints::Performance,
            },
            None,
        )) {
            Ok((device, queue)) => {
                info!("GPU context initialized: {}", adapter_name);
                GpuInitResult::Success(Self {
                    device,
                    queue,
                    adapter_info,
                })
            }
            Err(e) => {
                debug!("failed to create GPU device: {}", e);
                GpuInitResult::InitFailed {
                    adapter_name,
                    error: e.to_string(),
                }
            }
        }
    }

    /// Adapter name for logging
    #[must_use]
    pub fn adapter_name(&self) -> &str {
        &self.adapter_info.name
    }

    /// Check whether the engine's working set for `width × height` images
    /// fits this device
    ///
    /// The device-resident pipeline keeps 11 pitched float rasters plus two
    /// staging buffers alive at once; every buffer shares the padded host
    /// layout.
    #[must_use]
    pub fn can_allocate(&self, width: usize, height: usize) -> bool {
        let pitch = (width + 2).div_ceil(32) * 32;
        let buffer_bytes = (pitch * (height + 2) * std::mem::size_of::<f32>()) as u64;
        let estimated = 13 * buffer_bytes;

        let limits = self.device.limits();
        buffer_bytes <= limits.max_storage_buffer_binding_size as u64
            && estimated < limits.max_buffer_size / 2
    }

    /// Split the context into its raw device and queue
    #[must_use]
    pub fn into_device_queue(self) -> (wgpu::Device, wgpu::Queue) {
        (self.device, self.queue)
    }

    /// Reference to the wgpu device
    #[must_use]
    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    /// Reference to the wgpu queue
    #[must_use]
    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }
}
