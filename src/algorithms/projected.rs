//! The projected (small, dense) eigenproblem.
//!
//! After a factorization of length `nv`, the leading `nv × nv` block of `H` is
//! reduced to sorted real Schur form. The locked leading block `[0, nconv)` is
//! already triangular from previous restarts and is left alone: only the
//! trailing active block is reduced, and the coupling columns above it are
//! updated with the same transformation.

use super::dense;
use crate::{config::Which, error::ArnoldiError};
use faer::{Accum, Mat, MatMut, MatRef, Par, linalg::matmul::matmul, prelude::*};
use num_complex::Complex64;
use std::cmp::Ordering;

/// The ordering used to sort Schur blocks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SortCriterion {
    /// Extremal eigenvalues according to [`Which`].
    Which(Which),
    /// Eigenvalues closest to a target come first (harmonic extraction).
    Target(f64),
}

impl SortCriterion {
    pub fn compare(&self, a: Complex64, b: Complex64) -> Ordering {
        match *self {
            SortCriterion::Which(which) => which.compare(a, b),
            SortCriterion::Target(tau) => (a - tau).norm().total_cmp(&(b - tau).norm()),
        }
    }
}

/// Reduces `h[0..nv, 0..nv]` to sorted quasi-triangular Schur form in place.
///
/// `q` (at least `nv × nv`) is reset to the identity and receives the
/// accumulated orthogonal transformation, so that on return
/// `H_old = Q S Q^T` on the leading block. Columns `< nconv` are already final
/// and are neither reduced nor reordered. Returns the eigenvalues of the whole
/// block, pair members adjacent (`+im` first).
pub fn schur_sorted(
    mut h: MatMut<'_, f64>,
    mut q: MatMut<'_, f64>,
    nconv: usize,
    nv: usize,
    criterion: SortCriterion,
) -> Result<Vec<Complex64>, ArnoldiError> {
    q.fill(0.0);
    for i in 0..nv {
        q[(i, i)] = 1.0;
    }

    if nconv < nv {
        let (z, t) = dense::real_schur(h.rb().get(nconv..nv, nconv..nv))?;
        h.rb_mut().get_mut(nconv..nv, nconv..nv).copy_from(t.as_ref());
        if nconv > 0 {
            let coupling = h.rb().get(0..nconv, nconv..nv).to_owned();
            matmul(
                h.rb_mut().get_mut(0..nconv, nconv..nv),
                Accum::Replace,
                coupling.as_ref(),
                z.as_ref(),
                1.0,
                Par::Seq,
            );
            h.rb_mut().get_mut(nconv..nv, 0..nconv).fill(0.0);
        }
        q.rb_mut().get_mut(nconv..nv, nconv..nv).copy_from(z.as_ref());

        dense::reorder(
            h.rb_mut().get_mut(0..nv, 0..nv),
            q.rb_mut().get_mut(0..nv, 0..nv),
            nconv,
            nv,
            |a, b| criterion.compare(a, b),
        );
    }

    Ok(dense::eigenvalues(h.rb().get(0..nv, 0..nv), nv))
}

/// Applies the harmonic translation `H <- H + β g e_m^T` with
/// `(H - τI)^T g = β e_m`, returning `g`.
///
/// The eigenvalues of the translated matrix are the harmonic Ritz values with
/// respect to `τ`.
pub fn translate_harmonic(
    mut h: MatMut<'_, f64>,
    nv: usize,
    beta: f64,
    target: f64,
) -> Result<Vec<f64>, ArnoldiError> {
    let shifted_transpose = Mat::from_fn(nv, nv, |i, j| {
        h[(j, i)] - if i == j { target } else { 0.0 }
    });
    let mut rhs = vec![0.0; nv];
    rhs[nv - 1] = beta;
    let g = dense::solve(shifted_transpose.as_ref(), &rhs)?;
    for (i, gi) in g.iter().enumerate() {
        h[(i, nv - 1)] += beta * gi;
    }
    Ok(g)
}

/// Copies the `(nv + 1) × nv` extended Hessenberg matrix: the leading block of
/// `h` with `β` appended on the subdiagonal of the last column.
pub fn extended_hessenberg(h: MatRef<'_, f64>, nv: usize, beta: f64) -> Mat<f64> {
    let mut extended = Mat::zeros(nv + 1, nv);
    extended.as_mut().get_mut(0..nv, ..).copy_from(h.get(0..nv, 0..nv));
    extended[(nv, nv - 1)] = beta;
    extended
}
