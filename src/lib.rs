//! Tiled 2D convolution and hierarchical prefix sum on the GPU using
//! [wgpu](https://github.com/gfx-rs/wgpu).
//!
//! Both primitives are built around a fixed work-group size: inputs are
//! padded with zeros up to whole blocks, the kernels run over the padded
//! grid, and results are truncated back to the logical extent.  The scan
//! composes block-local Hillis–Steele scans into a global prefix sum
//! through a precomputed schedule of up-sweep and merge passes (see
//! [`plan`]).
//!
//! The API is synchronous and blocking: every transfer and every kernel
//! launch completes before the host moves on.  Kernels run on any
//! [`ComputeBackend`]; [`WgpuBackend`] targets a real GPU and
//! [`EmulatorBackend`] replays the same kernels work-group by work-group
//! for deterministic checking.

pub mod app;
pub mod backend;
pub mod buffer;
pub mod config;
pub mod context;
pub mod error;
pub mod io;
pub mod kernels;
pub mod matrix;
pub mod orchestrator;
pub mod padding;
pub mod plan;
pub mod reference;

// Re-export the most common types at the crate root so that users can
// simply `use wgpu_tiled_kernels::*;`.
pub use backend::{BackendKind, ComputeBackend, EmulatorBackend, WgpuBackend};
pub use buffer::GpuBuffer;
pub use config::Config;
pub use context::GpuContext;
pub use error::{DeviceStatus, Error, Result};
pub use kernels::KernelSource;
pub use matrix::Matrix;
pub use orchestrator::HostOrchestrator;
pub use plan::ScanPlan;
