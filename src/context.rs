//! GPU context initialization.
//!
//! This module provides a thin wrapper around wgpu's instance, adapter,
//! device and queue objects.  The `new_blocking` constructor hides the
//! asynchronous nature of requesting an adapter and device by using the
//! [`pollster`] crate.

use log::info;
use wgpu::{Adapter, Device, Instance, Queue};

use crate::error::{Error, Result};

/// A GPU context encapsulates all state needed to submit compute work.
///
/// The context holds on to the `Instance`, `Adapter`, `Device` and
/// `Queue`.  Creating a context picks the default high performance
/// adapter.  Software rasterisers and adapters without compute shader
/// support are refused: both kernels assume a real GPU work-group model.
pub struct GpuContext {
    /// Kept alive for the lifetime of the adapter.
    pub instance: Instance,
    /// The physical device selected for computation.
    pub adapter: Adapter,
    /// Logical device used to create resources and command encoders.
    pub device: Device,
    /// Command submission queue used to send recorded command buffers
    /// to the GPU.
    pub queue: Queue,
}

impl GpuContext {
    /// Create a new GPU context synchronously.
    ///
    /// This function will block the current thread while waiting for
    /// the asynchronous adapter and device requests to finish.
    pub fn new_blocking() -> Result<Self> {
        let instance = Instance::new(&wgpu::InstanceDescriptor::default());
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .map_err(|e| Error::BackendUnavailable(format!("unable to find a GPU adapter: {e}")))?;

        let adapter_info = adapter.get_info();
        if adapter_info.device_type == wgpu::DeviceType::Cpu {
            return Err(Error::BackendUnavailable(format!(
                "adapter `{}` is a CPU implementation, a GPU is required",
                adapter_info.name
            )));
        }
        // Downlevel devices may not support compute on all backends;
        // abort early if unsupported.
        let capabilities = adapter.get_downlevel_capabilities();
        if !capabilities.flags.contains(wgpu::DownlevelFlags::COMPUTE_SHADERS) {
            return Err(Error::BackendUnavailable(format!(
                "adapter `{}` does not support compute shaders",
                adapter_info.name
            )));
        }

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("tiled_kernels_device"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::downlevel_defaults(),
            memory_hints: wgpu::MemoryHints::MemoryUsage,
            trace: wgpu::Trace::Off,
        }))
        .map_err(|e| Error::BackendUnavailable(format!("failed to create GPU device: {e}")))?;

        info!(
            "using adapter `{}` ({:?}, {:?})",
            adapter_info.name, adapter_info.backend, adapter_info.device_type
        );

        Ok(Self {
            instance,
            adapter,
            device,
            queue,
        })
    }

    pub fn adapter_name(&self) -> String {
        self.adapter.get_info().name
    }
}
