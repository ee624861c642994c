//! Damped least squares step computation.
//!
//! One step solves `dq = J^T (J J^T + lambda^2 I)^-1 e` on the task-space
//! system. The m x m inversion is done with Gauss-Jordan elimination and
//! partial pivoting so a rank-deficient system is detected by its pivot
//! magnitude instead of surfacing as a silently exploding step.

use nalgebra::{DMatrix, DVector};

/// Pivot magnitude below which the damped system is treated as singular.
pub(crate) const PIVOT_EPS: f64 = 1e-12;

/// Computes one damped least squares update, or `None` when the damped
/// normal matrix is singular at the pivot threshold.
pub(crate) fn dls_step(
    jacobian: &DMatrix<f64>,
    error: &DVector<f64>,
    damping: f64,
) -> Option<DVector<f64>> {
    let m = jacobian.nrows();
    let mut damped = jacobian * jacobian.transpose();
    for i in 0..m {
        damped[(i, i)] += damping * damping;
    }
    let inverse = gauss_jordan_invert(damped)?;
    Some(jacobian.transpose() * (inverse * error))
}

/// Inverts a square matrix by Gauss-Jordan elimination with partial
/// pivoting. Returns `None` when the best available pivot in some column
/// falls below [`PIVOT_EPS`].
fn gauss_jordan_invert(mut a: DMatrix<f64>) -> Option<DMatrix<f64>> {
    let m = a.nrows();
    debug_assert_eq!(m, a.ncols());
    let mut inverse = DMatrix::identity(m, m);

    for col in 0..m {
        let mut pivot_row = col;
        let mut pivot_mag = a[(col, col)].abs();
        for row in (col + 1)..m {
            let mag = a[(row, col)].abs();
            if mag > pivot_mag {
                pivot_row = row;
                pivot_mag = mag;
            }
        }
        if pivot_mag < PIVOT_EPS {
            return None;
        }
        if pivot_row != col {
            a.swap_rows(col, pivot_row);
            inverse.swap_rows(col, pivot_row);
        }

        let pivot = a[(col, col)];
        for c in 0..m {
            a[(col, c)] /= pivot;
            inverse[(col, c)] /= pivot;
        }
        for row in 0..m {
            if row == col {
                continue;
            }
            let factor = a[(row, col)];
            if factor == 0.0 {
                continue;
            }
            for c in 0..m {
                a[(row, c)] -= factor * a[(col, c)];
                inverse[(row, c)] -= factor * inverse[(col, c)];
            }
        }
    }
    Some(inverse)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
