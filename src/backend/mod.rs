//! Compute backends.
//!
//! [`ComputeBackend`] is the narrow surface the host orchestration needs
//! from a device: compile a program, allocate and move buffers, launch a
//! kernel and wait for it.  Every transfer is blocking.  Launches return a
//! completion handle that the caller must wait on before issuing a
//! dependent pass.
//!
//! Two implementations ship with the crate:
//!
//! * [`WgpuBackend`] drives a real GPU through wgpu.
//! * [`EmulatorBackend`] executes the kernels' lane-level Rust bodies
//!   with the same work-group geometry.  It exists to check kernels and
//!   host sequencing deterministically and is only ever selected
//!   explicitly.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{DeviceStatus, Error, Result};
use crate::kernels::{ConvolutionParams, KernelKind, KernelSource, ScanParams};

pub mod emulator;
pub mod gpu;

pub use self::emulator::EmulatorBackend;
pub use self::gpu::WgpuBackend;

/// Which device a run uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Wgpu,
    Emulator,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Wgpu => f.write_str("wgpu"),
            BackendKind::Emulator => f.write_str("emulator"),
        }
    }
}

/// Buffer access as seen from the kernels.  The host may always read and
/// write a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferAccess {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl BufferAccess {
    pub fn kernel_reads(self) -> bool {
        matches!(self, BufferAccess::ReadOnly | BufferAccess::ReadWrite)
    }

    pub fn kernel_writes(self) -> bool {
        matches!(self, BufferAccess::WriteOnly | BufferAccess::ReadWrite)
    }
}

/// What a backend reports about its device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub name: String,
    pub backend: BackendKind,
    pub max_groups_per_dimension: u32,
    pub max_invocations_per_group: u32,
}

/// Launch geometry: a global extent that is an exact multiple of the
/// local (work-group) extent in both dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dispatch {
    pub global: [u32; 2],
    pub local: [u32; 2],
}

impl Dispatch {
    /// `groups` one-dimensional work-groups of `block` lanes.  Grids wider
    /// than `max_per_dim` are folded into a second dimension; the kernels
    /// linearise the work-group id, and surplus groups find nothing in
    /// range.
    pub fn linear(groups: usize, block: u32, max_per_dim: u32) -> Result<Self> {
        let (x, y) = split_workgroups(groups, max_per_dim as usize);
        if y > max_per_dim as usize {
            return Err(Error::device(
                DeviceStatus::InvalidGlobalWorkSize,
                format!("{groups} work-groups exceed the device grid"),
            ));
        }
        let global_x = (x as u64) * block as u64;
        let global_x = u32::try_from(global_x).map_err(|_| {
            Error::device(
                DeviceStatus::InvalidGlobalWorkSize,
                format!("global extent {global_x} does not fit in u32"),
            )
        })?;
        Ok(Self {
            global: [global_x, y as u32],
            local: [block, 1],
        })
    }

    /// `groups_x × groups_y` square tiles of `block × block` lanes.
    pub fn tiles(groups_x: usize, groups_y: usize, block: u32, max_per_dim: u32) -> Result<Self> {
        let limit = max_per_dim as usize;
        if groups_x > limit || groups_y > limit {
            return Err(Error::device(
                DeviceStatus::InvalidWorkGroupSize,
                format!("{groups_x}x{groups_y} tiles exceed the per-dimension limit {limit}"),
            ));
        }
        Ok(Self {
            global: [groups_x as u32 * block, groups_y as u32 * block],
            local: [block, block],
        })
    }

    /// Work-group grid, checking that the global extent divides evenly.
    pub fn groups(&self) -> Result<[u32; 2]> {
        if self.local.contains(&0)
            || self.global[0] % self.local[0] != 0
            || self.global[1] % self.local[1] != 0
        {
            return Err(Error::device(
                DeviceStatus::InvalidGlobalWorkSize,
                format!(
                    "global extent {:?} is not a multiple of local extent {:?}",
                    self.global, self.local
                ),
            ));
        }
        Ok([self.global[0] / self.local[0], self.global[1] / self.local[1]])
    }
}

/// Calculate an (x, y) workgroup grid that covers `total_groups`
/// workgroups without exceeding the per-dimension limit.
fn split_workgroups(total_groups: usize, limit: usize) -> (usize, usize) {
    if total_groups <= limit {
        (total_groups, 1)
    } else {
        (limit, total_groups.div_ceil(limit))
    }
}

/// A kernel invocation with its arguments in binding order.
pub enum KernelCall<'a, B> {
    BlockScan {
        values: &'a B,
        params: ScanParams,
    },
    LevelMerge {
        values: &'a B,
        params: ScanParams,
    },
    TiledConvolution {
        input: &'a B,
        mask: &'a B,
        output: &'a B,
        params: ConvolutionParams,
    },
}

impl<B> KernelCall<'_, B> {
    pub fn kind(&self) -> KernelKind {
        match self {
            KernelCall::BlockScan { .. } => KernelKind::BlockScan,
            KernelCall::LevelMerge { .. } => KernelKind::LevelMerge,
            KernelCall::TiledConvolution { .. } => KernelKind::TiledConvolution,
        }
    }

    /// Check every argument against the access the kernel needs.
    pub fn check_access(&self, access: impl Fn(&B) -> BufferAccess) -> Result<()> {
        let needs = |buffer: &B, read: bool, write: bool, name: &str| {
            let granted = access(buffer);
            if (read && !granted.kernel_reads()) || (write && !granted.kernel_writes()) {
                return Err(Error::device(
                    DeviceStatus::InvalidKernelArgs,
                    format!("`{}` argument `{name}` has access {granted:?}", self.kind()),
                ));
            }
            Ok(())
        };
        match self {
            KernelCall::BlockScan { values, .. } | KernelCall::LevelMerge { values, .. } => {
                needs(*values, true, true, "values")
            }
            KernelCall::TiledConvolution {
                input,
                mask,
                output,
                ..
            } => {
                needs(*input, true, false, "input")?;
                needs(*mask, true, false, "mask")?;
                needs(*output, false, true, "output")
            }
        }
    }
}

/// A compute device as seen by the host.
pub trait ComputeBackend {
    type Buffer;
    type Program;
    type Completion;

    fn info(&self) -> &DeviceInfo;

    /// Build a program.  Fails with [`Error::Compile`] carrying the
    /// backend's diagnostics.
    fn compile(&self, source: &KernelSource) -> Result<Self::Program>;

    /// Allocate a zero-initialised buffer of `len` floats.
    fn allocate(&self, len: usize, access: BufferAccess) -> Result<Self::Buffer>;

    /// Blocking host → device copy of exactly the buffer's length.
    fn write(&self, buffer: &Self::Buffer, data: &[f32]) -> Result<()>;

    /// Blocking device → host copy of the whole buffer.
    fn read(&self, buffer: &Self::Buffer) -> Result<Vec<f32>>;

    /// Issue a kernel.  The returned handle must be waited on before any
    /// pass that depends on this one.
    fn launch(
        &self,
        program: &Self::Program,
        call: KernelCall<'_, Self::Buffer>,
        dispatch: Dispatch,
    ) -> Result<Self::Completion>;

    /// Block until the launch behind `completion` has retired.
    fn wait(&self, completion: Self::Completion) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_grids_stay_one_dimensional() {
        let d = Dispatch::linear(10, 4, 65_535).unwrap();
        assert_eq!(d.global, [40, 1]);
        assert_eq!(d.groups().unwrap(), [10, 1]);
    }

    #[test]
    fn wide_grids_fold_into_two_dimensions() {
        let d = Dispatch::linear(100_000, 4, 65_535).unwrap();
        assert_eq!(d.groups().unwrap(), [65_535, 2]);
    }

    #[test]
    fn uneven_extents_are_rejected() {
        let d = Dispatch {
            global: [10, 1],
            local: [4, 1],
        };
        assert!(matches!(
            d.groups(),
            Err(Error::Device {
                status: DeviceStatus::InvalidGlobalWorkSize,
                ..
            })
        ));
    }

    #[test]
    fn oversized_tile_grids_are_rejected() {
        assert!(Dispatch::tiles(70_000, 1, 16, 65_535).is_err());
        assert_eq!(
            Dispatch::tiles(3, 2, 16, 65_535).unwrap().global,
            [48, 32]
        );
    }
}
