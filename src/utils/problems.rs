//! Test operators with known spectra.
//!
//! All operators are assembled as `faer` sparse column-major matrices from
//! triplets, which is how the experiment binaries feed large problems to the
//! solver without dense storage.

use crate::error::{ArnoldiError, ArnoldiErrorKind};
use faer::{
    Mat,
    sparse::{SparseColMat, Triplet},
};
use rand::{Rng, SeedableRng, rngs::StdRng};

fn from_triplets(
    n: usize,
    triplets: &[Triplet<usize, usize, f64>],
) -> Result<SparseColMat<usize, f64>, ArnoldiError> {
    SparseColMat::try_new_from_triplets(n, n, triplets).map_err(|e| {
        ArnoldiErrorKind::InputError(format!("failed to assemble sparse operator: {e:?}")).into()
    })
}

/// A sparse diagonal operator whose eigenvalues are `spectrum`, in order.
pub fn diagonal(spectrum: &[f64]) -> Result<SparseColMat<usize, f64>, ArnoldiError> {
    let triplets: Vec<_> = spectrum
        .iter()
        .enumerate()
        .map(|(i, &val)| Triplet { row: i, col: i, val })
        .collect();
    from_triplets(spectrum.len(), &triplets)
}

/// `n` eigenvalues evenly spaced over `[lo, hi]`.
pub fn linear_spectrum(n: usize, lo: f64, hi: f64) -> Vec<f64> {
    let step = (hi - lo) / (n.max(2) - 1) as f64;
    (0..n).map(|i| lo + step * i as f64).collect()
}

/// The 1-D Laplacian `tridiag(-1, 2, -1)` of order `n`.
///
/// Its eigenvalues are `2 - 2 cos(kπ / (n + 1))` for `k = 1..=n`, see
/// [`laplacian_1d_eigenvalues`].
pub fn laplacian_1d(n: usize) -> Result<SparseColMat<usize, f64>, ArnoldiError> {
    let mut triplets = Vec::with_capacity(3 * n);
    for i in 0..n {
        if i > 0 {
            triplets.push(Triplet {
                row: i,
                col: i - 1,
                val: -1.0,
            });
        }
        triplets.push(Triplet {
            row: i,
            col: i,
            val: 2.0,
        });
        if i + 1 < n {
            triplets.push(Triplet {
                row: i,
                col: i + 1,
                val: -1.0,
            });
        }
    }
    from_triplets(n, &triplets)
}

/// Exact eigenvalues of [`laplacian_1d`], largest first.
pub fn laplacian_1d_eigenvalues(n: usize) -> Vec<f64> {
    let h = std::f64::consts::PI / (n + 1) as f64;
    (1..=n).rev().map(|k| 2.0 - 2.0 * (k as f64 * h).cos()).collect()
}

/// A lower-bidiagonal, non-symmetric operator with diagonal `spectrum` and a
/// constant `coupling` below the diagonal. Its eigenvalues are the diagonal
/// entries, but its eigenvectors are not orthogonal.
pub fn bidiagonal(spectrum: &[f64], coupling: f64) -> Result<SparseColMat<usize, f64>, ArnoldiError> {
    let n = spectrum.len();
    let mut triplets = Vec::with_capacity(2 * n);
    for (i, &val) in spectrum.iter().enumerate() {
        triplets.push(Triplet { row: i, col: i, val });
        if i + 1 < n {
            triplets.push(Triplet {
                row: i + 1,
                col: i,
                val: coupling,
            });
        }
    }
    from_triplets(n, &triplets)
}

/// A reproducible `n × 1` vector with entries uniform in `[-1, 1)`.
pub fn random_vector(n: usize, seed: u64) -> Mat<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    Mat::from_fn(n, 1, |_, _| rng.random_range(-1.0..1.0))
}
