//! Dense kernels on small projected matrices.
//!
//! Real Schur reduction, SVD and LU come from `nalgebra`. On top of them this
//! module maintains the *standard* quasi-triangular form the rest of the solver
//! relies on:
//!
//! - every entry below the first subdiagonal is exactly zero;
//! - a nonzero subdiagonal entry marks a 2×2 block, and every 2×2 block carries
//!   a complex-conjugate eigenvalue pair. Blocks with real eigenvalues are split
//!   by a Givens rotation.
//!
//! Reordering moves whole blocks with adjacent swaps (Bai–Demmel): the swap is
//! obtained from the solution of a tiny Sylvester equation followed by an
//! orthogonal factorization, and is accumulated into the Schur vectors.

use crate::error::{ArnoldiError, ArnoldiErrorKind};
use faer::{Accum, Mat, MatMut, MatRef, Par, linalg::matmul::matmul, prelude::*};
use nalgebra::{
    DMatrix, DVector,
    linalg::{FullPivLU, LU, QR, SVD, Schur},
};
use num_complex::Complex64;
use std::cmp::Ordering;

/// Iteration cap per row handed to the iterative `nalgebra` kernels.
const ITERATIONS_PER_ROW: usize = 1000;

pub(crate) fn to_nalgebra(m: MatRef<'_, f64>) -> DMatrix<f64> {
    DMatrix::from_fn(m.nrows(), m.ncols(), |i, j| m[(i, j)])
}

pub(crate) fn from_nalgebra(m: &DMatrix<f64>) -> Mat<f64> {
    Mat::from_fn(m.nrows(), m.ncols(), |i, j| m[(i, j)])
}

/// Computes `a = Z T Z^T` with `T` in standard quasi-triangular form.
///
/// Returns `(Z, T)`.
pub fn real_schur(a: MatRef<'_, f64>) -> Result<(Mat<f64>, Mat<f64>), ArnoldiError> {
    let n = a.nrows();
    if n <= 1 {
        return Ok((Mat::identity(n, n), a.to_owned()));
    }
    let schur = Schur::try_new(to_nalgebra(a), f64::EPSILON, ITERATIONS_PER_ROW * n).ok_or_else(
        || ArnoldiErrorKind::LinearAlgebra {
            routine: "real Schur reduction",
            detail: format!("QR iteration did not converge on a {n}x{n} matrix"),
        },
    )?;
    let (z, t) = schur.unpack();
    let mut z = from_nalgebra(&z);
    let mut t = from_nalgebra(&t);
    standardize(t.as_mut(), z.as_mut(), 0, n);
    Ok((z, t))
}

/// Brings the diagonal range `[start, end)` of a quasi-triangular `t` into
/// standard form, accumulating the rotations into `z`.
pub fn standardize(mut t: MatMut<'_, f64>, mut z: MatMut<'_, f64>, start: usize, end: usize) {
    for j in start..end {
        for i in (j + 2).max(start)..end {
            t[(i, j)] = 0.0;
        }
    }
    for i in start..end.saturating_sub(1) {
        let (a, d) = (t[(i, i)], t[(i + 1, i + 1)]);
        if t[(i + 1, i)].abs() <= f64::EPSILON * (a.abs() + d.abs()) {
            t[(i + 1, i)] = 0.0;
        }
    }

    let mut i = start;
    while i < end {
        if i + 1 == end || t[(i + 1, i)] == 0.0 {
            i += 1;
            continue;
        }
        let (a, b, c, d) = (t[(i, i)], t[(i, i + 1)], t[(i + 1, i)], t[(i + 1, i + 1)]);
        let p = 0.5 * (a - d);
        let disc = p * p + b * c;
        if disc >= 0.0 {
            // Real pair: rotate an eigenvector onto e_i.
            let lambda = 0.5 * (a + d) + p.signum() * disc.sqrt();
            let (x0, x1) = (lambda - d, c);
            let r = x0.hypot(x1);
            rotate(t.rb_mut(), z.rb_mut(), i, x0 / r, x1 / r);
            t[(i + 1, i)] = 0.0;
            i += 1;
        } else {
            i += 2;
        }
    }
}

/// Applies `t <- G^T t G`, `z <- z G` with `G = [[c, -s], [s, c]]` acting on
/// indices `i` and `i + 1`.
fn rotate(mut t: MatMut<'_, f64>, mut z: MatMut<'_, f64>, i: usize, c: f64, s: f64) {
    for col in 0..t.ncols() {
        let (u, v) = (t[(i, col)], t[(i + 1, col)]);
        t[(i, col)] = c * u + s * v;
        t[(i + 1, col)] = -s * u + c * v;
    }
    for row in 0..t.nrows() {
        let (u, v) = (t[(row, i)], t[(row, i + 1)]);
        t[(row, i)] = c * u + s * v;
        t[(row, i + 1)] = -s * u + c * v;
    }
    for row in 0..z.nrows() {
        let (u, v) = (z[(row, i)], z[(row, i + 1)]);
        z[(row, i)] = c * u + s * v;
        z[(row, i + 1)] = -s * u + c * v;
    }
}

/// Size (1 or 2) of the diagonal block starting at `i`, not looking past `end`.
#[inline]
pub fn block_size(t: MatRef<'_, f64>, i: usize, end: usize) -> usize {
    if i + 1 < end && t[(i + 1, i)] != 0.0 { 2 } else { 1 }
}

/// Eigenvalue of the block starting at `i`; for a pair, the member with
/// positive imaginary part.
pub fn block_eigenvalue(t: MatRef<'_, f64>, i: usize, size: usize) -> Complex64 {
    if size == 1 {
        return Complex64::new(t[(i, i)], 0.0);
    }
    let (a, b, c, d) = (t[(i, i)], t[(i, i + 1)], t[(i + 1, i)], t[(i + 1, i + 1)]);
    let p = 0.5 * (a - d);
    let disc = p * p + b * c;
    Complex64::new(0.5 * (a + d), (-disc).max(0.0).sqrt())
}

/// All eigenvalues of the leading `end × end` block, pair members in the
/// order `+im`, `-im`.
pub fn eigenvalues(t: MatRef<'_, f64>, end: usize) -> Vec<Complex64> {
    let mut values = Vec::with_capacity(end);
    let mut i = 0;
    while i < end {
        let size = block_size(t, i, end);
        let lambda = block_eigenvalue(t, i, size);
        values.push(lambda);
        if size == 2 {
            values.push(lambda.conj());
        }
        i += size;
    }
    values
}

/// Swaps the adjacent diagonal blocks of sizes `n1` (at `p`) and `n2` (at
/// `p + n1`), so that the second block ends up first.
pub fn swap_blocks(mut t: MatMut<'_, f64>, mut z: MatMut<'_, f64>, p: usize, n1: usize, n2: usize) {
    let m = n1 + n2;
    let q = n1 * n2;

    // A11 X - X A22 = A12 as a Kronecker system in vec(X).
    let mut system = DMatrix::<f64>::zeros(q, q);
    let mut rhs = DVector::<f64>::zeros(q);
    for j in 0..n2 {
        for i in 0..n1 {
            let row = i + j * n1;
            rhs[row] = t[(p + i, p + n1 + j)];
            for k in 0..n1 {
                system[(row, k + j * n1)] += t[(p + i, p + k)];
            }
            for l in 0..n2 {
                system[(row, i + l * n1)] -= t[(p + n1 + l, p + n1 + j)];
            }
        }
    }
    solve_guarded(system, &mut rhs);

    // The first n2 columns of Q span [X; -I], an invariant subspace for A22.
    let mut w = DMatrix::<f64>::zeros(m, m);
    for j in 0..n2 {
        for i in 0..n1 {
            w[(i, j)] = rhs[i + j * n1];
        }
        w[(n1 + j, j)] = -1.0;
    }
    for j in 0..n1 {
        w[(j, n2 + j)] = 1.0;
    }
    let q = from_nalgebra(&QR::new(w).q());

    let rows = t.rb().get(p..p + m, ..).to_owned();
    matmul(t.rb_mut().get_mut(p..p + m, ..), Accum::Replace, q.transpose(), rows.as_ref(), 1.0, Par::Seq);
    let cols = t.rb().get(.., p..p + m).to_owned();
    matmul(t.rb_mut().get_mut(.., p..p + m), Accum::Replace, cols.as_ref(), q.as_ref(), 1.0, Par::Seq);
    let zcols = z.rb().get(.., p..p + m).to_owned();
    matmul(z.rb_mut().get_mut(.., p..p + m), Accum::Replace, zcols.as_ref(), q.as_ref(), 1.0, Par::Seq);

    for j in 0..n2 {
        for i in n2..m {
            t[(p + i, p + j)] = 0.0;
        }
    }
}

/// Solves `a x = rhs` in place with a full-pivoting LU. Pivots of `U` below
/// `ε` times the largest entry of the system are raised to that size, so nearly
/// singular systems (close eigenvalues) still yield a bounded solution.
fn solve_guarded(a: DMatrix<f64>, rhs: &mut DVector<f64>) {
    let scale = a.amax().max(rhs.amax());
    let smin = (f64::EPSILON * scale).max(f64::MIN_POSITIVE);
    let lu = FullPivLU::new(a);
    let mut u = lu.u();
    for i in 0..u.nrows() {
        let pivot = u[(i, i)];
        if pivot.abs() < smin {
            u[(i, i)] = if pivot < 0.0 { -smin } else { smin };
        }
    }
    lu.p().permute_rows(rhs);
    let _ = lu.l().solve_lower_triangular_with_diag_mut(rhs, 1.0);
    let _ = u.solve_upper_triangular_mut(rhs);
    lu.q().inv_permute_rows(rhs);
}

/// Reorders the blocks of `t` in `[start, end)` so that, under `cmp`, preferred
/// eigenvalues come first. Leading columns before `start` are left untouched.
///
/// This is a selection sort: the best remaining block is bubbled up to the
/// current position by adjacent swaps. Ties keep their relative order.
pub fn reorder<F>(mut t: MatMut<'_, f64>, mut z: MatMut<'_, f64>, start: usize, end: usize, cmp: F)
where
    F: Fn(Complex64, Complex64) -> Ordering,
{
    let mut pos = start;
    while pos < end {
        let mut best = pos;
        let mut best_size = block_size(t.rb(), pos, end);
        let mut best_value = block_eigenvalue(t.rb(), pos, best_size);
        let mut i = pos + best_size;
        while i < end {
            let size = block_size(t.rb(), i, end);
            let value = block_eigenvalue(t.rb(), i, size);
            if cmp(value, best_value) == Ordering::Less {
                best = i;
                best_size = size;
                best_value = value;
            }
            i += size;
        }

        let mut here = best;
        while here > pos {
            let mut prev = pos;
            loop {
                let size = block_size(t.rb(), prev, end);
                if prev + size == here {
                    break;
                }
                prev += size;
            }
            let prev_size = here - prev;
            swap_blocks(t.rb_mut(), z.rb_mut(), prev, prev_size, best_size);
            here = prev;
        }
        pos += best_size;
    }
}

/// Unit 2-norm eigenvector of the quasi-triangular `t` for the eigenvalue at
/// index `i` (the `-im` member of a pair yields the conjugate vector).
///
/// Solved by back-substitution over the leading diagonal blocks; entries past
/// the eigenvalue's block are zero.
pub fn eigenvector(t: MatRef<'_, f64>, i: usize) -> Vec<Complex64> {
    let n = t.nrows();
    let mut starts = Vec::new();
    let mut r = 0;
    while r < n {
        starts.push(r);
        r += block_size(t, r, n);
    }
    let block = starts.iter().rposition(|&s| s <= i).unwrap_or(0);
    let start = starts[block];
    let size = block_size(t, start, n);
    let end = start + size;

    let lambda = block_eigenvalue(t, start, size);
    let conjugate = size == 2 && i == start + 1;

    let mut x = vec![Complex64::new(0.0, 0.0); n];
    if size == 1 {
        x[start] = Complex64::new(1.0, 0.0);
    } else {
        let (a, b, c, d) = (
            t[(start, start)],
            t[(start, start + 1)],
            t[(start + 1, start)],
            t[(start + 1, start + 1)],
        );
        if b.abs() >= c.abs() {
            x[start] = Complex64::new(b, 0.0);
            x[start + 1] = lambda - a;
        } else {
            x[start] = lambda - d;
            x[start + 1] = Complex64::new(c, 0.0);
        }
    }

    let tnorm = (0..end)
        .flat_map(|j| (0..end).map(move |k| (j, k)))
        .fold(0.0_f64, |acc, (j, k)| acc.max(t[(j, k)].abs()));
    let smin = (f64::EPSILON * tnorm).max(f64::MIN_POSITIVE);
    let guard = |z: Complex64| if z.norm() < smin { Complex64::new(smin, 0.0) } else { z };

    for &r in starts[..block].iter().rev() {
        let rsize = block_size(t, r, n);
        let residual = |row: usize, x: &[Complex64]| -> Complex64 {
            -(r + rsize..end).fold(Complex64::new(0.0, 0.0), |acc, j| acc + x[j] * t[(row, j)])
        };
        if rsize == 1 {
            let rhs = residual(r, &x);
            x[r] = rhs / guard(t[(r, r)] - lambda);
        } else {
            let rhs1 = residual(r, &x);
            let rhs2 = residual(r + 1, &x);
            let m11 = t[(r, r)] - lambda;
            let m12 = Complex64::new(t[(r, r + 1)], 0.0);
            let m21 = Complex64::new(t[(r + 1, r)], 0.0);
            let m22 = t[(r + 1, r + 1)] - lambda;
            let det = guard(m11 * m22 - m12 * m21);
            x[r] = (m22 * rhs1 - m12 * rhs2) / det;
            x[r + 1] = (m11 * rhs2 - m21 * rhs1) / det;
        }
    }

    let norm = x.iter().map(|v| v.norm_sqr()).sum::<f64>().sqrt();
    for v in x.iter_mut() {
        *v /= norm;
        if conjugate {
            *v = v.conj();
        }
    }
    x
}

/// Smallest singular value of `a` (rows ≥ columns) and its right singular
/// vector.
pub fn smallest_singular_triplet(a: MatRef<'_, f64>) -> Result<(f64, Vec<f64>), ArnoldiError> {
    let n = a.ncols();
    let svd = SVD::try_new(to_nalgebra(a), false, true, f64::EPSILON, ITERATIONS_PER_ROW * n.max(1))
        .ok_or_else(|| ArnoldiErrorKind::LinearAlgebra {
            routine: "singular value decomposition",
            detail: format!("bidiagonal QR did not converge on a {}x{n} matrix", a.nrows()),
        })?;
    let v_t = svd.v_t.as_ref().ok_or_else(|| ArnoldiErrorKind::LinearAlgebra {
        routine: "singular value decomposition",
        detail: "right singular vectors were not computed".to_string(),
    })?;
    let (index, sigma) = svd
        .singular_values
        .iter()
        .copied()
        .enumerate()
        .min_by(|x, y| x.1.total_cmp(&y.1))
        .ok_or_else(|| ArnoldiErrorKind::LinearAlgebra {
            routine: "singular value decomposition",
            detail: "empty matrix".to_string(),
        })?;
    Ok((sigma, (0..n).map(|j| v_t[(index, j)]).collect()))
}

/// Solves the square system `a x = b` by LU with partial pivoting.
pub fn solve(a: MatRef<'_, f64>, b: &[f64]) -> Result<Vec<f64>, ArnoldiError> {
    let n = a.nrows();
    let lu = LU::new(to_nalgebra(a));
    let x = lu
        .solve(&DVector::from_column_slice(b))
        .ok_or_else(|| ArnoldiErrorKind::LinearAlgebra {
            routine: "LU solve",
            detail: format!("the {n}x{n} matrix is singular"),
        })?;
    Ok(x.iter().copied().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use faer::mat;

    fn reconstruct(z: &Mat<f64>, t: &Mat<f64>) -> Mat<f64> {
        let zt = z.as_ref() * t.as_ref();
        zt.as_ref() * z.as_ref().transpose()
    }

    fn assert_orthogonal(z: &Mat<f64>) {
        let n = z.ncols();
        let err = &(z.as_ref().transpose() * z.as_ref()) - &Mat::<f64>::identity(n, n);
        assert!(err.norm_l2() < 1e-12, "loss of orthogonality {}", err.norm_l2());
    }

    fn assert_standard_form(t: &Mat<f64>) {
        let n = t.nrows();
        for j in 0..n {
            for i in j + 2..n {
                assert_eq!(t[(i, j)], 0.0);
            }
        }
        let mut i = 0;
        while i < n {
            let size = block_size(t.as_ref(), i, n);
            if size == 2 {
                assert!(block_eigenvalue(t.as_ref(), i, 2).im > 0.0);
                assert!(i + 2 >= n || t[(i + 2, i + 1)] == 0.0);
            }
            i += size;
        }
    }

    fn rotation_matrix() -> Mat<f64> {
        // Eigenvalues 3, 1 ± 2i and -4.
        mat![
            [3.0, 1.0, 0.5, 0.2],
            [0.0, 1.0, 2.0, 0.3],
            [0.0, -2.0, 1.0, 0.7],
            [0.0, 0.0, 0.0, -4.0],
        ]
    }

    #[test]
    fn test_real_schur_standard_form() {
        let a = mat![
            [4.0, 1.0, -2.0, 2.0],
            [1.0, 2.0, 0.0, 1.0],
            [-2.0, 0.0, 3.0, -2.0],
            [2.0, 1.0, -2.0, -1.0],
        ];
        let (z, t) = real_schur(a.as_ref()).unwrap();
        assert_orthogonal(&z);
        assert_standard_form(&t);
        assert!((&reconstruct(&z, &t) - &a).norm_l2() < 1e-12);
    }

    #[test]
    fn test_complex_pair_detected() {
        let a = rotation_matrix();
        let (z, t) = real_schur(a.as_ref()).unwrap();
        assert_standard_form(&t);
        let values = eigenvalues(t.as_ref(), 4);
        let pairs = values.iter().filter(|v| v.im.abs() > 1e-10).count();
        assert_eq!(pairs, 2);
        assert!(values.iter().any(|v| (v - Complex64::new(1.0, 2.0)).norm() < 1e-10));
        assert!((&reconstruct(&z, &t) - &a).norm_l2() < 1e-12);
    }

    #[test]
    fn test_standardize_splits_real_block() {
        // A 2x2 block with eigenvalues 3 and 1.
        let mut t = mat![[2.0, 1.0], [1.0, 2.0]];
        let mut z = Mat::<f64>::identity(2, 2);
        let original = t.clone();
        standardize(t.as_mut(), z.as_mut(), 0, 2);
        assert_eq!(t[(1, 0)], 0.0);
        assert_orthogonal(&z);
        assert!((&reconstruct(&z, &t) - &original).norm_l2() < 1e-14);
        let mut diag = [t[(0, 0)], t[(1, 1)]];
        diag.sort_by(f64::total_cmp);
        assert!((diag[0] - 1.0).abs() < 1e-14 && (diag[1] - 3.0).abs() < 1e-14);
    }

    #[test]
    fn test_swap_blocks_all_sizes() {
        let a = rotation_matrix();
        for (p, n1, n2) in [(0, 1, 2), (1, 2, 1)] {
            let mut t = a.clone();
            let mut z = Mat::<f64>::identity(4, 4);
            let before = eigenvalues(t.as_ref(), 4);
            swap_blocks(t.as_mut(), z.as_mut(), p, n1, n2);
            assert_orthogonal(&z);
            assert!((&reconstruct(&z, &t) - &a).norm_l2() < 1e-12);
            assert_standard_form(&t);
            let moved = block_eigenvalue(t.as_ref(), p, n2);
            assert!((moved - before[p + n1]).norm() < 1e-10);
        }
    }

    #[test]
    fn test_swap_blocks_with_equal_eigenvalues() {
        // A11 - A22 = 0: the Sylvester system is singular.
        let a = mat![[2.0, 1.0], [0.0, 2.0]];
        let mut t = a.clone();
        let mut z = Mat::<f64>::identity(2, 2);
        swap_blocks(t.as_mut(), z.as_mut(), 0, 1, 1);
        assert!(t.as_ref().norm_l2().is_finite());
        assert_orthogonal(&z);
        assert!((&reconstruct(&z, &t) - &a).norm_l2() < 1e-12);
        assert_eq!(t[(1, 0)], 0.0);
        assert!((t[(0, 0)] - 2.0).abs() < 1e-12 && (t[(1, 1)] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_guarded_solve_matches_lu() {
        let a = mat![[0.0, 2.0, 1.0], [1.0, 1.0, 0.0], [3.0, 0.0, 4.0]];
        let b = [1.0, 2.0, 3.0];
        let mut x = DVector::from_column_slice(&b);
        solve_guarded(to_nalgebra(a.as_ref()), &mut x);
        let expected = solve(a.as_ref(), &b).unwrap();
        for (xi, ei) in x.iter().zip(&expected) {
            assert!((xi - ei).abs() < 1e-14);
        }
    }

    #[test]
    fn test_reorder_by_magnitude() {
        let a = rotation_matrix();
        let mut t = a.clone();
        let mut z = Mat::<f64>::identity(4, 4);
        reorder(t.as_mut(), z.as_mut(), 0, 4, |x, y| y.norm().total_cmp(&x.norm()));
        let values = eigenvalues(t.as_ref(), 4);
        assert!((values[0].re + 4.0).abs() < 1e-10);
        assert!((values[1].re - 3.0).abs() < 1e-10);
        assert!((values[2] - Complex64::new(1.0, 2.0)).norm() < 1e-10);
        assert!((values[3] - Complex64::new(1.0, -2.0)).norm() < 1e-10);
        assert!((&reconstruct(&z, &t) - &a).norm_l2() < 1e-12);
    }

    #[test]
    fn test_reorder_keeps_leading_block() {
        let a = mat![
            [1.0, 0.3, 0.1, 0.4],
            [0.0, 2.0, 0.2, 0.5],
            [0.0, 0.0, 3.0, 0.6],
            [0.0, 0.0, 0.0, 4.0],
        ];
        let mut t = a.clone();
        let mut z = Mat::<f64>::identity(4, 4);
        reorder(t.as_mut(), z.as_mut(), 2, 4, |x, y| y.re.total_cmp(&x.re));
        assert_eq!(t[(0, 0)], 1.0);
        assert_eq!(t[(1, 1)], 2.0);
        assert_eq!(z[(0, 0)], 1.0);
        assert_eq!(z[(1, 1)], 1.0);
        assert!((t[(2, 2)] - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_eigenvector_back_substitution() {
        let t = rotation_matrix();
        let values = eigenvalues(t.as_ref(), 4);
        for i in 0..4 {
            let x = eigenvector(t.as_ref(), i);
            let norm: f64 = x.iter().map(|v| v.norm_sqr()).sum::<f64>().sqrt();
            assert!((norm - 1.0).abs() < 1e-12);
            for row in 0..4 {
                let tx: Complex64 = (0..4).map(|j| x[j] * t[(row, j)]).sum();
                assert!((tx - values[i] * x[row]).norm() < 1e-10, "row {row} of pair {i}");
            }
        }
    }

    #[test]
    fn test_smallest_singular_triplet() {
        let a = mat![[3.0, 0.0], [0.0, 0.5], [0.0, 0.0]];
        let (sigma, v) = smallest_singular_triplet(a.as_ref()).unwrap();
        assert!((sigma - 0.5).abs() < 1e-14);
        assert!(v[0].abs() < 1e-14 && (v[1].abs() - 1.0).abs() < 1e-14);
    }

    #[test]
    fn test_solve_and_singular_failure() {
        let a = mat![[2.0, 1.0], [1.0, 3.0]];
        let x = solve(a.as_ref(), &[3.0, 5.0]).unwrap();
        assert!((x[0] - 0.8).abs() < 1e-14 && (x[1] - 1.4).abs() < 1e-14);

        let singular = mat![[1.0, 2.0], [2.0, 4.0]];
        let err = solve(singular.as_ref(), &[1.0, 1.0]).unwrap_err();
        assert!(matches!(err.kind(), ArnoldiErrorKind::LinearAlgebra { .. }));
    }
}
