//! Deterministic work-group emulator.
//!
//! Programs are validated exactly like on the GPU, then launches run the
//! lane-level bodies from [`crate::kernels`] over every work-group of the
//! dispatch grid.  The queue is in order and launches execute eagerly, so
//! a completion handle is only a ticket that `wait` checks off.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, trace};
use parking_lot::RwLock;

use super::{BackendKind, BufferAccess, ComputeBackend, DeviceInfo, Dispatch, KernelCall};
use crate::error::{DeviceStatus, Error, Result};
use crate::kernels::{convolution, scan, KernelKind, KernelSource};

/// Same grid limit as wgpu's downlevel defaults.
const MAX_GROUPS_PER_DIMENSION: u32 = 65_535;
const MAX_INVOCATIONS_PER_GROUP: u32 = 256;

#[derive(Clone)]
pub struct EmulatedBuffer {
    id: u64,
    access: BufferAccess,
    cells: Arc<RwLock<Vec<f32>>>,
}

impl EmulatedBuffer {
    pub fn len(&self) -> usize {
        self.cells.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct EmulatedProgram {
    label: String,
    block: u32,
    kernels: Vec<KernelKind>,
}

#[derive(Debug)]
pub struct EmulatedCompletion {
    ticket: u64,
}

pub struct EmulatorBackend {
    info: DeviceInfo,
    next_id: AtomicU64,
    outstanding: RwLock<HashSet<u64>>,
}

impl Default for EmulatorBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl EmulatorBackend {
    pub fn new() -> Self {
        Self {
            info: DeviceInfo {
                name: "work-group emulator".into(),
                backend: BackendKind::Emulator,
                max_groups_per_dimension: MAX_GROUPS_PER_DIMENSION,
                max_invocations_per_group: MAX_INVOCATIONS_PER_GROUP,
            },
            next_id: AtomicU64::new(1),
            outstanding: RwLock::new(HashSet::new()),
        }
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Launches issued but not yet waited on.
    pub fn pending(&self) -> usize {
        self.outstanding.read().len()
    }

    fn run(
        &self,
        program: &EmulatedProgram,
        call: &KernelCall<'_, EmulatedBuffer>,
        groups: [u32; 2],
    ) -> Result<()> {
        let block = program.block as usize;
        let total = groups[0] as usize * groups[1] as usize;
        match call {
            KernelCall::BlockScan { values, params } => {
                let mut cells = values.cells.write();
                check_len(&cells, params.len as usize, "values")?;
                for group in 0..total {
                    scan::block_scan_group(&mut cells, params, group, block);
                }
            }
            KernelCall::LevelMerge { values, params } => {
                let mut cells = values.cells.write();
                check_len(&cells, params.len as usize, "values")?;
                for group in 0..total {
                    scan::level_merge_group(&mut cells, params, group, block);
                }
            }
            KernelCall::TiledConvolution {
                input,
                mask,
                output,
                params,
            } => {
                if output.id == input.id || output.id == mask.id {
                    return Err(Error::device(
                        DeviceStatus::InvalidKernelArgs,
                        "convolution output aliases one of its inputs",
                    ));
                }
                let input = input.cells.read();
                let mask = mask.cells.read();
                let mut output = output.cells.write();
                let side = params.side as usize;
                let m = params.mask_size as usize;
                check_len(&input, side * side, "input")?;
                check_len(&mask, m * m, "mask")?;
                check_len(&output, side * side, "output")?;
                for gy in 0..groups[1] as usize {
                    for gx in 0..groups[0] as usize {
                        let tile = (gx, gy);
                        convolution::convolution_group(&input, &mask, &mut output, params, tile, block);
                    }
                }
            }
        }
        Ok(())
    }
}

fn check_len(cells: &[f32], needed: usize, name: &str) -> Result<()> {
    if cells.len() < needed {
        return Err(Error::device(
            DeviceStatus::InvalidBuffer,
            format!("`{name}` holds {} values, kernel addresses {needed}", cells.len()),
        ));
    }
    Ok(())
}

impl ComputeBackend for EmulatorBackend {
    type Buffer = EmulatedBuffer;
    type Program = EmulatedProgram;
    type Completion = EmulatedCompletion;

    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn compile(&self, source: &KernelSource) -> Result<EmulatedProgram> {
        let kernels = source.validate()?;
        debug!("compiled `{}` for block {}: {kernels:?}", source.label(), source.block());
        Ok(EmulatedProgram {
            label: source.label().to_string(),
            block: source.block(),
            kernels,
        })
    }

    fn allocate(&self, len: usize, access: BufferAccess) -> Result<EmulatedBuffer> {
        if len == 0 {
            return Err(Error::device(DeviceStatus::InvalidValue, "zero-sized buffer"));
        }
        let id = self.next_id();
        trace!("allocate buffer #{id}: {len} floats, {access:?}");
        Ok(EmulatedBuffer {
            id,
            access,
            cells: Arc::new(RwLock::new(vec![0.0; len])),
        })
    }

    fn write(&self, buffer: &EmulatedBuffer, data: &[f32]) -> Result<()> {
        let mut cells = buffer.cells.write();
        if cells.len() != data.len() {
            return Err(Error::device(
                DeviceStatus::InvalidValue,
                format!("write of {} values into a buffer of {}", data.len(), cells.len()),
            ));
        }
        trace!("write buffer #{}: {} floats", buffer.id, data.len());
        cells.copy_from_slice(data);
        Ok(())
    }

    fn read(&self, buffer: &EmulatedBuffer) -> Result<Vec<f32>> {
        trace!("read buffer #{}", buffer.id);
        Ok(buffer.cells.read().clone())
    }

    fn launch(
        &self,
        program: &EmulatedProgram,
        call: KernelCall<'_, EmulatedBuffer>,
        dispatch: Dispatch,
    ) -> Result<EmulatedCompletion> {
        let kind = call.kind();
        if !program.kernels.contains(&kind) {
            return Err(Error::device(
                DeviceStatus::InvalidKernelName,
                format!("program `{}` has no kernel `{kind}`", program.label),
            ));
        }
        let shape = kind.group_shape(program.block);
        if dispatch.local != shape {
            return Err(Error::device(
                DeviceStatus::InvalidWorkGroupSize,
                format!("`{kind}` runs {shape:?} work-groups, got {:?}", dispatch.local),
            ));
        }
        if shape[0] * shape[1] > self.info.max_invocations_per_group {
            return Err(Error::device(
                DeviceStatus::InvalidWorkGroupSize,
                format!("{shape:?} exceeds {} invocations", self.info.max_invocations_per_group),
            ));
        }
        let groups = dispatch.groups()?;
        if groups.iter().any(|&g| g > self.info.max_groups_per_dimension) {
            return Err(Error::device(
                DeviceStatus::InvalidGlobalWorkSize,
                format!("work-group grid {groups:?} exceeds the device limit"),
            ));
        }
        call.check_access(|b| b.access)?;

        debug!("launch `{kind}` over {groups:?} groups");
        self.run(program, &call, groups)?;

        let ticket = self.next_id();
        self.outstanding.write().insert(ticket);
        Ok(EmulatedCompletion { ticket })
    }

    fn wait(&self, completion: EmulatedCompletion) -> Result<()> {
        if !self.outstanding.write().remove(&completion.ticket) {
            return Err(Error::device(
                DeviceStatus::InvalidValue,
                format!("unknown completion ticket {}", completion.ticket),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::{ConvolutionParams, ScanParams};

    #[test]
    fn one_block_scan_runs_to_completion() {
        let device = EmulatorBackend::new();
        let program = device.compile(&KernelSource::scan(4)).unwrap();
        let values = device.allocate(4, BufferAccess::ReadWrite).unwrap();
        device.write(&values, &[1.0, 1.0, 1.0, 1.0]).unwrap();

        let done = device
            .launch(
                &program,
                KernelCall::BlockScan {
                    values: &values,
                    params: ScanParams::new(1, 4),
                },
                Dispatch::linear(1, 4, MAX_GROUPS_PER_DIMENSION).unwrap(),
            )
            .unwrap();
        assert_eq!(device.pending(), 1);
        device.wait(done).unwrap();
        assert_eq!(device.pending(), 0);
        assert_eq!(device.read(&values).unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn kernels_missing_from_the_program_are_rejected() {
        let device = EmulatorBackend::new();
        let program = device.compile(&KernelSource::convolution(4)).unwrap();
        let values = device.allocate(4, BufferAccess::ReadWrite).unwrap();
        let err = device
            .launch(
                &program,
                KernelCall::BlockScan {
                    values: &values,
                    params: ScanParams::new(1, 4),
                },
                Dispatch::linear(1, 4, MAX_GROUPS_PER_DIMENSION).unwrap(),
            )
            .err()
            .unwrap();
        assert_eq!(err.code(), DeviceStatus::InvalidKernelName.code());
    }

    #[test]
    fn mismatched_group_shapes_are_rejected() {
        let device = EmulatorBackend::new();
        let program = device.compile(&KernelSource::scan(4)).unwrap();
        let values = device.allocate(8, BufferAccess::ReadWrite).unwrap();
        let err = device
            .launch(
                &program,
                KernelCall::BlockScan {
                    values: &values,
                    params: ScanParams::new(1, 8),
                },
                Dispatch::linear(1, 8, MAX_GROUPS_PER_DIMENSION).unwrap(),
            )
            .err()
            .unwrap();
        assert_eq!(err.code(), DeviceStatus::InvalidWorkGroupSize.code());
    }

    #[test]
    fn read_only_outputs_are_rejected() {
        let device = EmulatorBackend::new();
        let program = device.compile(&KernelSource::convolution(2)).unwrap();
        let input = device.allocate(4, BufferAccess::ReadOnly).unwrap();
        let mask = device.allocate(1, BufferAccess::ReadOnly).unwrap();
        let output = device.allocate(4, BufferAccess::ReadOnly).unwrap();
        let err = device
            .launch(
                &program,
                KernelCall::TiledConvolution {
                    input: &input,
                    mask: &mask,
                    output: &output,
                    params: ConvolutionParams::new(1, 2),
                },
                Dispatch::tiles(1, 1, 2, MAX_GROUPS_PER_DIMENSION).unwrap(),
            )
            .err()
            .unwrap();
        assert_eq!(err.code(), DeviceStatus::InvalidKernelArgs.code());
    }

    #[test]
    fn writes_must_cover_the_whole_buffer() {
        let device = EmulatorBackend::new();
        let buffer = device.allocate(4, BufferAccess::ReadWrite).unwrap();
        assert!(device.write(&buffer, &[1.0, 2.0]).is_err());
        assert!(device.allocate(0, BufferAccess::ReadWrite).is_err());
    }

    #[test]
    fn completions_are_single_use() {
        let device = EmulatorBackend::new();
        assert!(device.wait(EmulatedCompletion { ticket: 999 }).is_err());
    }
}
