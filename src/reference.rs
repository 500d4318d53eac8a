//! Naive unblocked implementations of both primitives.
//!
//! These are the oracles the device results are checked against, both
//! in tests and by the `--verify` option of the binary.

use crate::matrix::Matrix;

/// Sequential inclusive prefix sum.
pub fn inclusive_scan(input: &[f32]) -> Vec<f32> {
    input
        .iter()
        .scan(0.0f32, |acc, &x| {
            *acc += x;
            Some(*acc)
        })
        .collect()
}

/// Direct O(N²M²) convolution with zero padding at the borders.  The
/// mask window is traversed in row-major `(dr, dc)` order.
pub fn convolve(input: &Matrix, mask: &Matrix) -> Matrix {
    let n = input.rows();
    let m = mask.rows();
    let radius = (m / 2) as isize;
    let mut out = Matrix::zeros(n, n);
    for r in 0..n {
        for c in 0..n {
            let mut acc = 0.0f32;
            for dr in 0..m {
                let rr = r as isize + dr as isize - radius;
                if rr < 0 || rr >= n as isize {
                    continue;
                }
                for dc in 0..m {
                    let cc = c as isize + dc as isize - radius;
                    if cc < 0 || cc >= n as isize {
                        continue;
                    }
                    acc += input.get(rr as usize, cc as usize) * mask.get(dr, dc);
                }
            }
            out.row_mut(r)[c] = acc;
        }
    }
    out
}

/// Whether `a` and `b` agree to within `tol`, relative to the larger
/// magnitude once it exceeds 1.
pub fn approx_eq(a: f32, b: f32, tol: f32) -> bool {
    (a - b).abs() <= tol * a.abs().max(b.abs()).max(1.0)
}

/// First index at which the two slices disagree beyond `tol`.
pub fn first_mismatch(actual: &[f32], expected: &[f32], tol: f32) -> Option<usize> {
    if actual.len() != expected.len() {
        return Some(actual.len().min(expected.len()));
    }
    actual
        .iter()
        .zip(expected)
        .position(|(&a, &b)| !approx_eq(a, b, tol))
}
