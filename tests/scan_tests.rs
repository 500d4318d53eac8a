//! Hierarchical scan on the work-group emulator.

use proptest::prelude::*;

use wgpu_tiled_kernels::reference::{first_mismatch, inclusive_scan};
use wgpu_tiled_kernels::{EmulatorBackend, HostOrchestrator, KernelSource};

fn scan(input: &[f32], block: u32) -> Vec<f32> {
    let device = EmulatorBackend::new();
    HostOrchestrator::new(&device)
        .scan(&KernelSource::scan(block), input)
        .expect("scan failed")
}

fn ones(n: usize) -> Vec<f32> {
    vec![1.0; n]
}

fn counting(n: usize) -> Vec<f32> {
    (1..=n).map(|v| v as f32).collect()
}

#[test]
fn four_ones_in_one_block() {
    assert_eq!(scan(&[1.0, 1.0, 1.0, 1.0], 4), vec![1.0, 2.0, 3.0, 4.0]);
}

#[test]
fn five_values_cross_into_a_partial_block() {
    assert_eq!(scan(&[1.0, 2.0, 3.0, 4.0, 5.0], 4), vec![1.0, 3.0, 6.0, 10.0, 15.0]);
}

#[test]
fn single_element_is_its_own_sum() {
    assert_eq!(scan(&[42.0], 4), vec![42.0]);
}

#[test]
fn every_length_through_four_tiers_is_exact() {
    // All-ones sums are exact in f32 at these sizes, so compare exactly.
    for n in 1..=300 {
        let out = scan(&ones(n), 4);
        let expected: Vec<f32> = (1..=n).map(|v| v as f32).collect();
        assert_eq!(out, expected, "n = {n}");
    }
}

#[test]
fn three_tier_boundaries() {
    // b³, b³ + 1 and b⁴ - 1 for b = 4.
    for n in [64, 65, 255] {
        let input = counting(n);
        assert_eq!(scan(&input, 4), inclusive_scan(&input), "n = {n}");
    }
}

#[test]
fn deep_hierarchy_with_wide_blocks() {
    // Three tiers of 16: 16³ = 4096 and a little beyond.
    for n in [4096, 4097, 5000] {
        let out = scan(&ones(n), 16);
        assert_eq!(out[n - 1], n as f32, "n = {n}");
        assert_eq!(out[4095], 4096.0);
        assert_eq!(out[16], 17.0);
    }
}

#[test]
fn result_does_not_depend_on_block_size() {
    let input: Vec<f32> = (0..777).map(|i| ((i * 37) % 11) as f32 - 5.0).collect();
    let expected = scan(&input, 2);
    for block in [4, 8, 16, 32, 64, 128, 256] {
        assert_eq!(scan(&input, block), expected, "block = {block}");
    }
}

#[test]
fn negative_and_fractional_values() {
    let input = [0.5, -1.25, 3.0, -0.25, 2.0, 0.125];
    assert_eq!(scan(&input, 2), inclusive_scan(&input));
}

proptest! {
    #[test]
    fn matches_the_sequential_scan(
        input in proptest::collection::vec(-100.0f32..100.0, 1..2000),
        shift in 1u32..7,
    ) {
        let out = scan(&input, 1 << shift);
        let expected = inclusive_scan(&input);
        // Partial sums are grouped differently, so allow rounding relative
        // to the total magnitude of the input.
        let scale: f32 = input.iter().map(|v| v.abs()).sum::<f32>().max(1.0);
        for (i, (a, b)) in out.iter().zip(&expected).enumerate() {
            prop_assert!((a - b).abs() <= 2e-4 * scale, "index {}: {} vs {}", i, a, b);
        }
    }

    #[test]
    fn integer_valued_inputs_are_exact(
        input in proptest::collection::vec(-50i32..50, 1..3000),
        shift in 1u32..6,
    ) {
        let input: Vec<f32> = input.into_iter().map(|v| v as f32).collect();
        let out = scan(&input, 1 << shift);
        prop_assert_eq!(first_mismatch(&out, &inclusive_scan(&input), 0.0), None);
    }
}
