//! Host-side sequencing of the device kernels.
//!
//! [`HostOrchestrator`] owns nothing numeric: it pads inputs, moves them
//! to the device, issues the kernels in dependency order and truncates
//! what comes back.  Every launch is waited on before the next one is
//! issued, so at most one pass holds write access to a buffer at any
//! time and correctness reduces to the order of the schedule.

use log::{debug, info};

use crate::backend::{BufferAccess, ComputeBackend, Dispatch, KernelCall};
use crate::error::{Error, Result};
use crate::kernels::{ConvolutionParams, KernelSource, ScanParams};
use crate::matrix::Matrix;
use crate::padding::{pad_array, pad_matrix, padded_extent, truncate_matrix};
use crate::plan::{Phase, ScanPlan};

/// Padded extents are indexed with `u32` on the device; keep a factor of
/// two of headroom for the strided index arithmetic of surplus lanes.
const MAX_DEVICE_LEN: usize = (u32::MAX / 2) as usize;

pub struct HostOrchestrator<'a, B: ComputeBackend> {
    backend: &'a B,
}

impl<'a, B: ComputeBackend> HostOrchestrator<'a, B> {
    pub fn new(backend: &'a B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &'a B {
        self.backend
    }

    /// Inclusive prefix sum of `input` using the program in `source`.
    pub fn scan(&self, source: &KernelSource, input: &[f32]) -> Result<Vec<f32>> {
        let block = check_block(source.block())?;
        self.check_group(block, "scan blocks")?;
        let plan = ScanPlan::new(input.len(), block);
        if plan.passes().is_empty() {
            // Nothing to combine: zero or one element.
            return Ok(input.to_vec());
        }
        if plan.padded_len() > MAX_DEVICE_LEN {
            return Err(Error::input(format!(
                "array of {} elements is too large for the device",
                input.len()
            )));
        }
        info!(
            "scan: {} elements padded to {} (block {block}, {} tiers)",
            input.len(),
            plan.padded_len(),
            plan.depth()
        );

        let program = self.backend.compile(source)?;
        let values = self.backend.allocate(plan.padded_len(), BufferAccess::ReadWrite)?;
        self.backend.write(&values, &pad_array(input, block))?;

        RecursiveScanOrchestrator::new(self.backend, &program).run(&values, &plan)?;

        let mut output = self.backend.read(&values)?;
        output.truncate(input.len());
        Ok(output)
    }

    /// Zero-padded convolution of the square `input` with the square `mask`.
    pub fn convolve(&self, source: &KernelSource, input: &Matrix, mask: &Matrix) -> Result<Matrix> {
        let block = check_block(source.block())?;
        if !input.is_square() || !mask.is_square() {
            return Err(Error::input("convolution needs a square matrix and a square mask"));
        }
        let (n, m) = (input.rows(), mask.rows());
        if n == 0 || m == 0 {
            return Err(Error::input("matrix and mask must not be empty"));
        }
        if m > n {
            return Err(Error::input(format!("mask side {m} exceeds matrix side {n}")));
        }
        let side = padded_extent(n, block);
        if side.checked_mul(side).map_or(true, |cells| cells > MAX_DEVICE_LEN) {
            return Err(Error::input(format!("{n}x{n} matrix is too large for the device")));
        }
        self.check_group(block * block, &format!("{block}x{block} tiles"))?;
        info!("convolve: {n}x{n} padded to {side}x{side} with a {m}x{m} mask (block {block})");

        let program = self.backend.compile(source)?;
        let padded = pad_matrix(input, block);
        let d_input = self.backend.allocate(side * side, BufferAccess::ReadOnly)?;
        let d_mask = self.backend.allocate(m * m, BufferAccess::ReadOnly)?;
        let d_output = self.backend.allocate(side * side, BufferAccess::WriteOnly)?;
        self.backend.write(&d_input, padded.as_slice())?;
        self.backend.write(&d_mask, mask.as_slice())?;

        let groups = side / block;
        let dispatch = Dispatch::tiles(
            groups,
            groups,
            source.block(),
            self.backend.info().max_groups_per_dimension,
        )?;
        let call = KernelCall::TiledConvolution {
            input: &d_input,
            mask: &d_mask,
            output: &d_output,
            params: ConvolutionParams::new(m as u32, side as u32),
        };
        submit(self.backend, &program, call, dispatch)?;

        let output = Matrix::from_parts(side, side, self.backend.read(&d_output)?);
        Ok(truncate_matrix(&output, n, n))
    }

    fn check_group(&self, invocations: usize, what: &str) -> Result<()> {
        let limit = self.backend.info().max_invocations_per_group;
        if invocations > limit as usize {
            return Err(Error::Config(format!(
                "{what} of {invocations} lanes exceed the device's {limit} invocations per work-group"
            )));
        }
        Ok(())
    }
}

/// Walks a [`ScanPlan`] over a device buffer: every up-sweep pass, then
/// every merge pass, one launch at a time.
pub struct RecursiveScanOrchestrator<'a, B: ComputeBackend> {
    backend: &'a B,
    program: &'a B::Program,
}

impl<'a, B: ComputeBackend> RecursiveScanOrchestrator<'a, B> {
    pub fn new(backend: &'a B, program: &'a B::Program) -> Self {
        Self { backend, program }
    }

    pub fn run(&self, values: &B::Buffer, plan: &ScanPlan) -> Result<()> {
        let block = plan.block() as u32;
        let len = plan.padded_len() as u32;
        let max_groups = self.backend.info().max_groups_per_dimension;
        for pass in plan.passes() {
            let level = u32::try_from(pass.level)
                .map_err(|_| Error::input(format!("scan level {} overflows u32", pass.level)))?;
            let params = ScanParams::new(level, len);
            let call = match pass.phase {
                Phase::UpSweep => KernelCall::BlockScan { values, params },
                Phase::Merge => KernelCall::LevelMerge { values, params },
            };
            let dispatch = Dispatch::linear(plan.groups_for(pass.level), block, max_groups)?;
            debug!("{:?} pass at level {level}: {:?}", pass.phase, dispatch.global);
            submit(self.backend, self.program, call, dispatch)?;
        }
        Ok(())
    }
}

/// Launch and block until the pass has retired.
fn submit<B: ComputeBackend>(
    backend: &B,
    program: &B::Program,
    call: KernelCall<'_, B::Buffer>,
    dispatch: Dispatch,
) -> Result<()> {
    let completion = backend.launch(program, call, dispatch)?;
    backend.wait(completion)
}

fn check_block(block: u32) -> Result<usize> {
    if block < 2 || !block.is_power_of_two() {
        return Err(Error::Config(format!(
            "block size must be a power of two of at least 2, got {block}"
        )));
    }
    Ok(block as usize)
}
