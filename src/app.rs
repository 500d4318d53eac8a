//! File-to-file jobs run by the binary.
//!
//! A job reads its input file, runs the primitive on the configured
//! device and only then writes the output file.  Any failure along the
//! way leaves no output behind.

use std::fs;
use std::path::Path;

use log::info;

use crate::backend::{BackendKind, ComputeBackend, EmulatorBackend, WgpuBackend};
use crate::config::Config;
use crate::error::{DeviceStatus, Error, Result};
use crate::io::{format_array, format_matrix, parse_convolution_input, parse_scan_input};
use crate::orchestrator::HostOrchestrator;
use crate::reference;

/// Tolerance of `--verify` and of the tests: three decimals relative.
pub const VERIFY_TOLERANCE: f32 = 1e-3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Job {
    Scan,
    Convolve,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Compare the device result against the naive reference.
    pub verify: bool,
}

/// Run `job` on the device named in `config`.
pub fn run(job: Job, config: &Config, options: RunOptions) -> Result<()> {
    match config.backend {
        BackendKind::Wgpu => run_on(&WgpuBackend::discover()?, job, config, options),
        BackendKind::Emulator => run_on(&EmulatorBackend::new(), job, config, options),
    }
}

pub fn run_on<B: ComputeBackend>(
    backend: &B,
    job: Job,
    config: &Config,
    options: RunOptions,
) -> Result<()> {
    let input = &config.files.input;
    let text = fs::read_to_string(input)?;
    info!(
        "{job:?} on `{}`: {} -> {}",
        backend.info().name,
        input.display(),
        config.files.output.display()
    );
    let result = match job {
        Job::Scan => scan_text(backend, config, &text, options),
        Job::Convolve => convolve_text(backend, config, &text, options),
    }
    .map_err(|e| e.in_file(input))?;
    write_output(&config.files.output, &result)
}

/// Scan the values in `text` and return the formatted result.
pub fn scan_text<B: ComputeBackend>(
    backend: &B,
    config: &Config,
    text: &str,
    options: RunOptions,
) -> Result<String> {
    let values = parse_scan_input(text)?;
    let source = config.scan_source()?;
    let output = HostOrchestrator::new(backend).scan(&source, &values)?;
    if options.verify {
        check(&output, &reference::inclusive_scan(&values))?;
    }
    Ok(format_array(&output))
}

/// Convolve the matrix in `text` with its mask and return the formatted result.
pub fn convolve_text<B: ComputeBackend>(
    backend: &B,
    config: &Config,
    text: &str,
    options: RunOptions,
) -> Result<String> {
    let parsed = parse_convolution_input(text)?;
    let source = config.convolution_source()?;
    let output = HostOrchestrator::new(backend).convolve(&source, &parsed.matrix, &parsed.mask)?;
    if options.verify {
        let expected = reference::convolve(&parsed.matrix, &parsed.mask);
        check(output.as_slice(), expected.as_slice())?;
    }
    Ok(format_matrix(&output))
}

fn check(actual: &[f32], expected: &[f32]) -> Result<()> {
    match reference::first_mismatch(actual, expected, VERIFY_TOLERANCE) {
        None => {
            info!("verified {} values against the reference", actual.len());
            Ok(())
        }
        Some(i) => Err(Error::device(
            DeviceStatus::VerificationFailed,
            format!(
                "value {i} is {} but the reference gives {}",
                actual.get(i).copied().unwrap_or(f32::NAN),
                expected.get(i).copied().unwrap_or(f32::NAN)
            ),
        )),
    }
}

fn write_output(path: &Path, text: &str) -> Result<()> {
    fs::write(path, text)?;
    info!("wrote {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emulated() -> Config {
        Config {
            backend: BackendKind::Emulator,
            ..Config::default()
        }
    }

    #[test]
    fn scan_text_formats_the_prefix_sums() {
        let options = RunOptions { verify: true };
        let out = scan_text(&EmulatorBackend::new(), &emulated(), "5\n1 2 3 4 5\n", options).unwrap();
        assert_eq!(out, "1.000 3.000 6.000 10.000 15.000\n");
    }

    #[test]
    fn convolve_text_formats_rows() {
        let out = convolve_text(
            &EmulatorBackend::new(),
            &emulated(),
            "2 1\n1 2\n3 4\n2\n",
            RunOptions { verify: true },
        )
        .unwrap();
        assert_eq!(out, "2.000 4.000\n6.000 8.000\n");
    }

    #[test]
    fn verification_flags_disagreement() {
        assert!(check(&[1.0, 2.0], &[1.0, 2.0]).is_ok());
        let err = check(&[1.0, 2.5], &[1.0, 2.0]).unwrap_err();
        assert_eq!(err.code(), DeviceStatus::VerificationFailed.code());
    }
}
