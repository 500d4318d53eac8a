//! Text formats for inputs and results.
//!
//! Inputs are whitespace-separated tokens:
//!
//! * convolution: `N M`, then `N·N` matrix values, then `M·M` mask values;
//! * scan: `n`, then `n` values.
//!
//! Token counts are checked against the declared dimensions before any
//! value is used, so a short or overlong file is an
//! [`Error::InputFormat`] rather than a partially read input.  Results
//! are written in fixed point with three decimals.

use std::fmt::Write as _;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::matrix::Matrix;

/// A parsed convolution input.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvolutionInput {
    pub matrix: Matrix,
    pub mask: Matrix,
}

pub fn parse_convolution_input(text: &str) -> Result<ConvolutionInput> {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    if tokens.len() < 2 {
        return Err(Error::input("expected the matrix side and mask side"));
    }
    let n: usize = parse_token(tokens[0], "matrix side")?;
    let m: usize = parse_token(tokens[1], "mask side")?;
    if n == 0 || m == 0 {
        return Err(Error::input("matrix and mask sides must be positive"));
    }
    let matrix_len = checked_square(n)?;
    let mask_len = checked_square(m)?;
    let total = matrix_len
        .checked_add(mask_len)
        .ok_or_else(|| Error::input(format!("sides {n} and {m} are too large")))?;
    expect_count(tokens.len() - 2, total)?;

    let values = parse_values(&tokens[2..])?;
    let (matrix, mask) = values.split_at(matrix_len);
    Ok(ConvolutionInput {
        matrix: Matrix::square(n, matrix.to_vec())?,
        mask: Matrix::square(m, mask.to_vec())?,
    })
}

pub fn parse_scan_input(text: &str) -> Result<Vec<f32>> {
    let mut tokens = text.split_whitespace();
    let Some(first) = tokens.next() else {
        return Err(Error::input("expected the array length"));
    };
    let n: usize = parse_token(first, "array length")?;
    let rest: Vec<&str> = tokens.collect();
    expect_count(rest.len(), n)?;
    parse_values(&rest)
}

/// One matrix row per line, values separated by single spaces.
pub fn format_matrix(matrix: &Matrix) -> String {
    let mut out = String::new();
    for r in 0..matrix.rows() {
        push_row(&mut out, matrix.row(r));
    }
    out
}

/// All values on a single line.
pub fn format_array(values: &[f32]) -> String {
    let mut out = String::new();
    push_row(&mut out, values);
    out
}

fn push_row(out: &mut String, values: &[f32]) {
    for (i, v) in values.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        // Writing into a String cannot fail.
        let _ = write!(out, "{v:.3}");
    }
    out.push('\n');
}

fn parse_token<T: FromStr>(token: &str, what: &str) -> Result<T> {
    token
        .parse()
        .map_err(|_| Error::input(format!("invalid {what} `{token}`")))
}

fn parse_values(tokens: &[&str]) -> Result<Vec<f32>> {
    tokens
        .iter()
        .map(|t| {
            let v: f32 = parse_token(t, "value")?;
            if !v.is_finite() {
                return Err(Error::input(format!("non-finite value `{t}`")));
            }
            Ok(v)
        })
        .collect()
}

fn checked_square(side: usize) -> Result<usize> {
    side.checked_mul(side)
        .ok_or_else(|| Error::input(format!("side {side} is too large")))
}

fn expect_count(found: usize, expected: usize) -> Result<()> {
    if found != expected {
        return Err(Error::input(format!("expected {expected} values, found {found}")));
    }
    Ok(())
}
