//! Padding of logical extents up to whole blocks.
//!
//! Every kernel dispatch geometry is an exact multiple of the block
//! size.  Inputs are therefore extended with zero-valued ghost cells
//! before upload and the results are truncated back to the logical
//! extent after readback.  A ghost cell never contributes to an output
//! that corresponds to an original index.

use crate::matrix::Matrix;

/// Round `n` up to the next multiple of `block`.
///
/// `block` must be positive.  The result satisfies `padded >= n`,
/// `padded % block == 0` and `padded == n` when `n` is already aligned.
pub fn padded_extent(n: usize, block: usize) -> usize {
    debug_assert!(block > 0, "block size must be positive");
    n.div_ceil(block) * block
}

/// Copy `values` into a zero-filled vector of the padded length.
pub fn pad_array(values: &[f32], block: usize) -> Vec<f32> {
    let mut padded = vec![0.0f32; padded_extent(values.len(), block)];
    padded[..values.len()].copy_from_slice(values);
    padded
}

/// Copy `matrix` into the top-left corner of a zero-filled matrix whose
/// rows and columns are both padded to `block`.
pub fn pad_matrix(matrix: &Matrix, block: usize) -> Matrix {
    let rows = padded_extent(matrix.rows(), block);
    let cols = padded_extent(matrix.cols(), block);
    let mut padded = Matrix::zeros(rows, cols);
    for r in 0..matrix.rows() {
        padded.row_mut(r)[..matrix.cols()].copy_from_slice(matrix.row(r));
    }
    padded
}

/// Keep the `rows × cols` top-left region of a padded matrix.
pub fn truncate_matrix(padded: &Matrix, rows: usize, cols: usize) -> Matrix {
    let mut data = Vec::with_capacity(rows * cols);
    for r in 0..rows {
        data.extend_from_slice(&padded.row(r)[..cols]);
    }
    Matrix::from_parts(rows, cols, data)
}
