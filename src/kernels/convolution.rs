//! Lane-level body of `tiled_convolution`.

use super::ConvolutionParams;

/// Compute the `block × block` output tile at work-group `(group_x,
/// group_y)`.  Each lane accumulates its mask window in row-major
/// `(dr, dc)` order; coordinates outside the `side × side` input read as
/// zero and are skipped.
pub fn convolution_group(
    input: &[f32],
    mask: &[f32],
    output: &mut [f32],
    params: &ConvolutionParams,
    group: (usize, usize),
    block: usize,
) {
    let side = params.side as usize;
    let m = params.mask_size as usize;
    let radius = m / 2;
    for ty in 0..block {
        for tx in 0..block {
            let row = group.1 * block + ty;
            let col = group.0 * block + tx;
            if row >= side || col >= side {
                continue;
            }
            let mut acc = 0.0f32;
            for dr in 0..m {
                let Some(r) = (row + dr).checked_sub(radius).filter(|&r| r < side) else {
                    continue;
                };
                for dc in 0..m {
                    let Some(c) = (col + dc).checked_sub(radius).filter(|&c| c < side) else {
                        continue;
                    };
                    acc += input[r * side + c] * mask[dr * m + dc];
                }
            }
            output[row * side + col] = acc;
        }
    }
}
