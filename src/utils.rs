use anyhow::{Context, Result, bail};
use std::{fmt::Debug, ops::RangeBounds};

pub fn check_num<T, R>(num: T, range: R) -> Result<()>
where
    T: PartialOrd + Debug,
    R: RangeBounds<T> + Debug,
{
    if !range.contains(&num) {
        bail!("number must be in the range {range:?}, but is {num:?}");
    }
    Ok(())
}

/// Check a vector's length and, for probability or count vectors, its entries.
pub fn check_vec(vec: &[f64], exp_len: usize, kind: VecKind) -> Result<()> {
    let len = vec.len();
    if len != exp_len {
        bail!("vector length must be {exp_len}, but is {len}");
    }

    if kind == VecKind::Plain {
        return Ok(());
    }
    if vec.iter().any(|&ele| !ele.is_finite() || ele < 0.0) {
        bail!("vector must have only finite non-negative elements");
    }
    let sum: f64 = vec.iter().sum();
    match kind {
        VecKind::Prob => {
            let tol = crate::engine::ROW_SUM_TOL;
            if (sum - 1.0).abs() > tol {
                bail!("vector must sum to 1.0 (tolerance: {tol}), but sums to {sum}");
            }
        }
        VecKind::Counts => {
            if sum <= 0.0 {
                bail!("vector must have at least one positive count");
            }
        }
        VecKind::Plain | VecKind::NonNegative => {}
    }

    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VecKind {
    Plain,
    NonNegative,
    Prob,
    Counts,
}

pub fn check_mat(mat: &[Vec<f64>], exp_dim: (usize, usize), row_kind: VecKind) -> Result<()> {
    let (exp_n_rows, exp_n_cols) = exp_dim;
    let n_rows = mat.len();
    if n_rows != exp_n_rows {
        bail!("matrix must have {exp_n_rows} rows, but has {n_rows}");
    }
    for (i_row, row) in mat.iter().enumerate() {
        check_vec(row, exp_n_cols, row_kind).with_context(|| format!("invalid row {i_row}"))?;
    }
    Ok(())
}
