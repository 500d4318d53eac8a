//! The same primitives on a real adapter.
//!
//! These need a GPU and are ignored by default; run them with
//! `cargo test -- --ignored`.

use wgpu_tiled_kernels::backend::{BufferAccess, ComputeBackend};
use wgpu_tiled_kernels::reference::{self, first_mismatch};
use wgpu_tiled_kernels::{Error, HostOrchestrator, KernelSource, Matrix, WgpuBackend};

fn device() -> WgpuBackend {
    WgpuBackend::discover().expect("no usable GPU adapter")
}

#[test]
#[ignore = "requires a GPU adapter"]
fn buffers_round_trip() {
    let device = device();
    let data: Vec<f32> = (0..1000).map(|v| v as f32 * 0.5).collect();
    let buffer = device.allocate(data.len(), BufferAccess::ReadWrite).unwrap();
    device.write(&buffer, &data).unwrap();
    assert_eq!(device.read(&buffer).unwrap(), data);
}

#[test]
#[ignore = "requires a GPU adapter"]
fn scan_matches_the_reference() {
    let device = device();
    let orchestrator = HostOrchestrator::new(&device);
    for (n, block) in [(5, 4), (65, 4), (300, 4), (5000, 16), (70_000, 256)] {
        let input: Vec<f32> = (0..n).map(|i| ((i * 7) % 5) as f32 - 2.0).collect();
        let out = orchestrator.scan(&KernelSource::scan(block), &input).unwrap();
        // Integer-valued input: exact on any device.
        assert_eq!(out, reference::inclusive_scan(&input), "n = {n}, block = {block}");
    }
}

#[test]
#[ignore = "requires a GPU adapter"]
fn convolution_matches_the_reference() {
    let device = device();
    let orchestrator = HostOrchestrator::new(&device);
    let n = 45;
    let a = Matrix::square(n, (0..n * n).map(|v| (v % 9) as f32 * 0.25).collect()).unwrap();
    for m in [1, 3, 4, 7] {
        let k = Matrix::square(m, (0..m * m).map(|v| 1.0 / (v + 1) as f32).collect()).unwrap();
        let out = orchestrator.convolve(&KernelSource::convolution(16), &a, &k).unwrap();
        let expected = reference::convolve(&a, &k);
        assert_eq!(first_mismatch(out.as_slice(), expected.as_slice(), 1e-3), None, "m = {m}");
    }
}

#[test]
#[ignore = "requires a GPU adapter"]
fn invalid_source_reports_a_compile_log() {
    let device = device();
    let source = KernelSource::from_body("broken", 4, "fn block_scan( {");
    match device.compile(&source) {
        Err(Error::Compile { log, .. }) => assert!(!log.is_empty()),
        other => panic!("expected a compile error, got {:?}", other.err()),
    }
}
