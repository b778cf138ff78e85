//! Residual norm estimates from the projected problem.
//!
//! For a Ritz pair `(λ, V y)` of the factorization `A V - V H = f e_m^T`, the
//! residual is `f e_m^T y`, so its norm is `β |y_m|`. Only the last component
//! of each eigenvector of `H` is needed, and no operator is applied.

use super::dense;
use faer::MatRef;
use num_complex::Complex64;

/// Fills `errest[nconv..nv]` with relative residual estimates.
///
/// `s` is the sorted Schur form of `H` and `q` its Schur vectors, so the
/// eigenvectors of `H` are `q x` with `x` the eigenvectors of `s`. Estimates are
/// relative to `|λ|` when `|λ| > 1`. Both members of a complex pair receive the
/// same estimate.
pub fn estimate_residuals(
    s: MatRef<'_, f64>,
    q: MatRef<'_, f64>,
    beta: f64,
    nconv: usize,
    nv: usize,
    eigenvalues: &[Complex64],
    errest: &mut [f64],
) {
    let s = s.get(0..nv, 0..nv);
    let mut i = nconv;
    while i < nv {
        let x = dense::eigenvector(s, i);
        let y_last: Complex64 = (0..nv).map(|j| x[j] * q[(nv - 1, j)]).sum();
        let mut estimate = beta * y_last.norm();
        let magnitude = eigenvalues[i].norm();
        if magnitude > 1.0 {
            estimate /= magnitude;
        }

        errest[i] = estimate;
        if eigenvalues[i].im != 0.0 && i + 1 < nv {
            errest[i + 1] = estimate;
            i += 2;
        } else {
            i += 1;
        }
    }
}

/// Scales the estimates in `[nconv, nv)` by `sqrt(1 + ‖g‖²)`, the distortion
/// introduced by the harmonic translation vector `g`.
pub fn correct_harmonic(errest: &mut [f64], g: &[f64], nconv: usize, nv: usize) {
    let factor = (1.0 + g.iter().map(|v| v * v).sum::<f64>()).sqrt();
    for e in &mut errest[nconv..nv] {
        *e *= factor;
    }
}
