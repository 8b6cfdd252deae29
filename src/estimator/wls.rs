//! Closed-form weighted least squares: β = (XᵀWX)⁻¹XᵀWy.
//!
//! The normal-equations matrix is solved via Cholesky decomposition when
//! `XᵀWX` is positive definite, the same approach the pack's other
//! Kalman/WLS implementations use for inverting symmetric positive-definite
//! systems (see `adskalman`'s `update()`). A singular or indefinite normal
//! equations matrix is common during warm-up, when the sliding window is
//! still full of a fresh filter's identical seed values (e.g. an all-zero
//! design column) and so is rank-deficient rather than ill-posed; for that
//! case we fall back to the minimum-norm solution via SVD pseudo-inverse,
//! matching the reference implementation's `statsmodels` WLS solve, which
//! defaults to a `pinv`-based fit and never raises on rank deficiency.
//! [`FilterError::NumericalFailure`] is reserved for the pseudo-inverse
//! itself failing or producing a non-finite prediction.

use nalgebra::{DMatrix, DVector};

use crate::error::FilterError;

/// Fits `y ~ X` with per-row weights `w` and evaluates the fit at `x_last`,
/// the final row of `X`. `x` has `rows` rows and `cols` columns, row-major.
pub fn fit_and_predict_last(
    x_rows: &[Vec<f64>],
    y: &[f64],
    w: &[f64],
) -> Result<f64, FilterError> {
    let n = x_rows.len();
    debug_assert_eq!(n, y.len());
    debug_assert_eq!(n, w.len());
    let cols = x_rows.first().map(|r| r.len()).unwrap_or(0);

    let x = DMatrix::from_fn(n, cols, |r, c| x_rows[r][c]);
    let y = DVector::from_row_slice(y);
    let w = DVector::from_row_slice(w);

    // XtW = Xᵀ·diag(w), computed column-scaled to avoid materializing W.
    let xt = x.transpose();
    let xtw = DMatrix::from_fn(cols, n, |r, c| xt[(r, c)] * w[c]);
    let xtwx = &xtw * &x;
    let xtwy = &xtw * &y;

    let beta = match nalgebra::linalg::Cholesky::new(xtwx.clone()) {
        Some(chol) => chol.solve(&xtwy),
        None => {
            let svd = nalgebra::linalg::SVD::new(xtwx.clone(), true, true);
            let pinv = svd.pseudo_inverse(1e-12).map_err(|err| {
                FilterError::NumericalFailure(format!(
                    "WLS normal-equations matrix has no pseudo-inverse ({err}): {xtwx}"
                ))
            })?;
            pinv * &xtwy
        }
    };

    let x_last = x.row(n - 1);
    let mut prediction = 0.0;
    for c in 0..cols {
        prediction += x_last[c] * beta[c];
    }

    if !prediction.is_finite() {
        return Err(FilterError::NumericalFailure(
            "WLS prediction produced a non-finite value".to_string(),
        ));
    }
    Ok(prediction)
}
