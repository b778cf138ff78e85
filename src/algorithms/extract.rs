//! Mapping projected vectors back to the Krylov basis.
//!
//! Ritz extraction takes the sorted Schur vectors as they are. Refined
//! extraction first replaces each one by the vector minimizing
//! `‖(H̄ - λ I) z‖` over unit `z`, where `H̄` is the `(nv + 1) × nv` extended
//! Hessenberg matrix; the minimum is the smallest singular value and becomes
//! the residual estimate.

use super::dense;
use crate::{error::ArnoldiError, orthogonalization::subtract_combination};
use faer::{Accum, Mat, MatMut, MatRef, Par, Scale, linalg::matmul::matmul, prelude::*};
use num_complex::Complex64;

/// Replaces the columns `[s, e)` of `q` by refined vectors and their estimates.
///
/// Each new column is re-orthonormalized against the columns of `q` before it,
/// so that the updated basis stays orthonormal. Indices belonging to a complex
/// pair keep their estimates, and so does any index whose refined vector falls
/// into the span of the columns before it. Such columns are filled with the
/// first of the original Schur vectors `k..nv` that is independent of that span.
pub fn refine(
    extended: MatRef<'_, f64>,
    mut q: MatMut<'_, f64>,
    eigenvalues: &[Complex64],
    errest: &mut [f64],
    s: usize,
    e: usize,
) -> Result<(), ArnoldiError> {
    let nv = extended.ncols();
    let schur = q.rb().get(0..nv, 0..nv).to_owned();
    for k in s..e {
        let refined = if eigenvalues[k].im == 0.0 {
            let mut shifted = extended.to_owned();
            for i in 0..nv {
                shifted[(i, i)] -= eigenvalues[k].re;
            }
            let (sigma, v) = dense::smallest_singular_triplet(shifted.as_ref())?;
            errest[k] = sigma;
            Some(Mat::from_fn(nv, 1, |i, _| v[i]))
        } else {
            None
        };

        let candidates = refined
            .into_iter()
            .chain((k..nv).map(|j| schur.as_ref().get(.., j..j + 1).to_owned()));
        let mut best: Option<(f64, Mat<f64>)> = None;
        for mut z in candidates {
            let norm = orthogonalize_against(z.as_mut(), q.rb().get(0..nv, 0..k));
            if best.as_ref().is_none_or(|(b, _)| norm > *b) {
                best = Some((norm, z));
            }
            if norm > 0.5 {
                break;
            }
        }
        if let Some((norm, z)) = best.filter(|(norm, _)| *norm > 0.0) {
            let z = &z * Scale(1.0 / norm);
            q.rb_mut().get_mut(0..nv, k..k + 1).copy_from(z.as_ref());
        }
    }
    Ok(())
}

/// Two classical Gram–Schmidt passes of `z` against the orthonormal columns of
/// `basis`. Returns the norm that is left.
fn orthogonalize_against(mut z: MatMut<'_, f64>, basis: MatRef<'_, f64>) -> f64 {
    for _ in 0..2 {
        let c = basis.transpose() * z.rb();
        let coefficients: Vec<f64> = (0..basis.ncols()).map(|i| c[(i, 0)]).collect();
        subtract_combination(z.rb_mut(), basis, &coefficients);
    }
    z.rb().norm_l2()
}

/// `V[:, s..e] = V[:, 0..nv] Q[:, s..e]`. Columns outside `[s, e)` are not
/// touched, in particular the locked prefix.
pub fn update_basis(mut v: MatMut<'_, f64>, q: MatRef<'_, f64>, nv: usize, s: usize, e: usize) {
    if s >= e {
        return;
    }
    let mut updated = Mat::<f64>::zeros(v.nrows(), e - s);
    matmul(
        updated.as_mut(),
        Accum::Replace,
        v.rb().get(.., 0..nv),
        q.get(0..nv, s..e),
        1.0,
        Par::Seq,
    );
    v.rb_mut().get_mut(.., s..e).copy_from(updated.as_ref());
}
