//! Typed interface to the device kernels.
//!
//! The WGSL bodies live next to this file and are compiled for a fixed
//! block size: the host prepends `const BLOCK: u32 = <b>u;` before
//! handing the text to a backend.  Each kernel has a fixed binding
//! order, documented on [`KernelKind`], and a `#[repr(C)]` parameter
//! block uploaded as a uniform.
//!
//! The sibling modules also carry a lane-level Rust body for every
//! kernel.  The emulated device runs those, one work-group at a time,
//! with the same barrier phases as the WGSL.

use std::fmt;
use std::path::Path;

use bytemuck::{Pod, Zeroable};

use crate::error::{Error, Result};

pub mod convolution;
pub mod scan;

const SCAN_WGSL: &str = include_str!("scan.wgsl");
const CONVOLUTION_WGSL: &str = include_str!("convolution.wgsl");

/// The kernels a program can expose.
///
/// Binding order:
///
/// * `BlockScan`, `LevelMerge`: `0` values (read/write), `1` [`ScanParams`].
/// * `TiledConvolution`: `0` input (read), `1` mask (read), `2` output
///   (write), `3` [`ConvolutionParams`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KernelKind {
    BlockScan,
    LevelMerge,
    TiledConvolution,
}

impl KernelKind {
    pub const ALL: [KernelKind; 3] = [
        KernelKind::BlockScan,
        KernelKind::LevelMerge,
        KernelKind::TiledConvolution,
    ];

    pub fn entry_point(self) -> &'static str {
        match self {
            KernelKind::BlockScan => "block_scan",
            KernelKind::LevelMerge => "level_merge",
            KernelKind::TiledConvolution => "tiled_convolution",
        }
    }

    pub fn from_entry_point(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.entry_point() == name)
    }

    /// Work-group shape for a program compiled with `block`.
    pub fn group_shape(self, block: u32) -> [u32; 2] {
        match self {
            KernelKind::BlockScan | KernelKind::LevelMerge => [block, 1],
            KernelKind::TiledConvolution => [block, block],
        }
    }
}

impl fmt::Display for KernelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.entry_point())
    }
}

/// Uniform block of `block_scan` and `level_merge`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct ScanParams {
    /// Stride multiplier of the tier being processed.
    pub level: u32,
    /// Padded array length.
    pub len: u32,
    _pad: [u32; 2],
}

impl ScanParams {
    pub fn new(level: u32, len: u32) -> Self {
        Self {
            level,
            len,
            _pad: [0; 2],
        }
    }
}

/// Uniform block of `tiled_convolution`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct ConvolutionParams {
    pub mask_size: u32,
    /// Padded side of the square input and output.
    pub side: u32,
    _pad: [u32; 2],
}

impl ConvolutionParams {
    pub fn new(mask_size: u32, side: u32) -> Self {
        Self {
            mask_size,
            side,
            _pad: [0; 2],
        }
    }
}

/// Kernel program text plus the block size it is compiled for.
#[derive(Debug, Clone)]
pub struct KernelSource {
    label: String,
    block: u32,
    text: String,
}

impl KernelSource {
    /// Built-in scan program (`block_scan` and `level_merge`).
    pub fn scan(block: u32) -> Self {
        Self::from_body("scan", block, SCAN_WGSL)
    }

    /// Built-in convolution program (`tiled_convolution`).
    pub fn convolution(block: u32) -> Self {
        Self::from_body("convolution", block, CONVOLUTION_WGSL)
    }

    /// Wrap an arbitrary WGSL body.  `BLOCK` is declared in front of it.
    pub fn from_body(label: impl Into<String>, block: u32, body: &str) -> Self {
        Self {
            label: label.into(),
            block,
            text: format!("const BLOCK: u32 = {block}u;\n\n{body}"),
        }
    }

    /// Load a WGSL body from disk, replacing a built-in program.
    pub fn from_file(label: impl Into<String>, block: u32, path: &Path) -> Result<Self> {
        let body = std::fs::read_to_string(path)?;
        log::debug!("loaded kernel source from {}", path.display());
        Ok(Self::from_body(label, block, &body))
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn block(&self) -> u32 {
        self.block
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Parse and validate the program and list the kernels it exposes.
    ///
    /// Both backends run this before building anything, so a broken
    /// program fails the same way everywhere with the front-end's
    /// rendered diagnostics as the compile log.
    pub fn validate(&self) -> Result<Vec<KernelKind>> {
        let module = naga::front::wgsl::parse_str(&self.text).map_err(|e| Error::Compile {
            kernel: self.label.clone(),
            log: e.emit_to_string(&self.text),
        })?;
        let mut validator = naga::valid::Validator::new(
            naga::valid::ValidationFlags::all(),
            naga::valid::Capabilities::default(),
        );
        validator.validate(&module).map_err(|e| Error::Compile {
            kernel: self.label.clone(),
            log: e.emit_to_string(&self.text),
        })?;

        let kernels: Vec<KernelKind> = module
            .entry_points
            .iter()
            .filter(|ep| ep.stage == naga::ShaderStage::Compute)
            .filter_map(|ep| KernelKind::from_entry_point(&ep.name))
            .collect();
        if kernels.is_empty() {
            return Err(Error::Compile {
                kernel: self.label.clone(),
                log: "program declares no known compute entry point".into(),
            });
        }
        Ok(kernels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_programs_validate() {
        assert_eq!(
            KernelSource::scan(4).validate().unwrap(),
            vec![KernelKind::BlockScan, KernelKind::LevelMerge]
        );
        assert_eq!(
            KernelSource::convolution(16).validate().unwrap(),
            vec![KernelKind::TiledConvolution]
        );
    }

    #[test]
    fn block_size_is_declared_up_front() {
        let src = KernelSource::scan(8);
        assert!(src.text().starts_with("const BLOCK: u32 = 8u;"));
        assert_eq!(src.block(), 8);
    }

    #[test]
    fn broken_programs_report_diagnostics() {
        let src = KernelSource::from_body("scan", 4, "fn block_scan( {");
        match src.validate() {
            Err(Error::Compile { kernel, log }) => {
                assert_eq!(kernel, "scan");
                assert!(!log.trim().is_empty());
            }
            other => panic!("expected a compile error, got {other:?}"),
        }
    }

    #[test]
    fn programs_without_known_kernels_are_rejected() {
        let src = KernelSource::from_body(
            "scan",
            4,
            "@compute @workgroup_size(BLOCK) fn something_else() {}",
        );
        assert!(matches!(src.validate(), Err(Error::Compile { .. })));
    }

    #[test]
    fn params_match_the_uniform_layout() {
        assert_eq!(std::mem::size_of::<ScanParams>(), 16);
        assert_eq!(std::mem::size_of::<ConvolutionParams>(), 16);
        assert_eq!(
            bytemuck::cast_slice::<ScanParams, u32>(&[ScanParams::new(4, 68)]),
            &[4, 68, 0, 0]
        );
    }
}
