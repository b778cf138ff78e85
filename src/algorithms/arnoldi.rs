//! Arnoldi factorizations.
//!
//! Given an orthonormal prefix `V[:, 0..k]`, the factorizer extends the basis
//! to `m` columns and fills the matching columns of the upper Hessenberg `H`
//! so that
//!
//! ```text
//! Op V[:, 0..m] - V[:, 0..m] H[0..m, 0..m] = f e_m^T,    V^T f = 0,
//! ```
//!
//! with `β = ‖f‖`. Three strategies are available:
//!
//! - **Basic**: apply, then a synchronous Gram–Schmidt against the whole basis.
//!   At least two global reductions per step.
//! - **Delayed**: the operator is applied to the unnormalized residual `p_j` of
//!   the previous step. Its reorthogonalization coefficients `V^T p_j` and its
//!   squared norm travel in the same reduction as the new Gram–Schmidt
//!   coefficients, so each step costs one reduction. The norm of the corrected
//!   vector follows from `‖p_j‖² - ‖V^T p_j‖²`, and the coefficients of the new
//!   column are rewritten for the corrected `v_j` through the relation of the
//!   columns before it, so the relation holds exactly for the final basis. A
//!   cross product between consecutive columns truncates the factorization if
//!   orthogonality is lost anyway.
//! - **Delayed, no refinement**: only normalization is postponed. The overlap
//!   `V^T p_j` is still reduced alongside, and a residual that leans on the
//!   basis by more than [`ORTHOGONALITY_LOSS_LIMIT`] ends the factorization.
//!
//! Every new vector first has the deflation space projected out. The residual
//! `f` is returned unnormalized.

use crate::{
    collective::ReductionGroup,
    config::{FactorizationStrategy, OperatorSide},
    error::ArnoldiError,
    matrix::LinearOperator,
    orthogonalization::{
        LINEAR_DEPENDENCE_RATIO, ORTHOGONALITY_LOSS_LIMIT, Orthogonalizer, scale_in_place,
        subtract_combination,
    },
};
use faer::{Mat, MatMut, MatRef, prelude::*};

/// Largest admissible `|v_{j-1}^T v_{j-2}|` between consecutive columns built by
/// the delayed factorization.
///
/// Two unit vectors that are orthogonal in exact arithmetic still carry an
/// inner product of a few `ε √n` after the rounding of the Gram–Schmidt sums.
/// A bare machine epsilon would flag that ordinary rounding and truncate
/// nearly every factorization, so the bound leaves room for it while staying
/// far below a genuine loss of orthogonality.
pub const DELAYED_ORTHOGONALITY_THRESHOLD: f64 = 1024.0 * f64::EPSILON;

/// The result of extending a factorization.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Factorization {
    /// Achieved length `M ≤ m`.
    pub length: usize,
    /// `‖f‖`.
    pub beta: f64,
    /// The Krylov space could not be extended to the requested length.
    pub breakdown: bool,
}

/// Extends Arnoldi factorizations of one operator.
pub struct ArnoldiFactorizer<'a, O: LinearOperator<f64> + ?Sized> {
    operator: &'a O,
    deflation: MatRef<'a, f64>,
    side: OperatorSide,
    strategy: FactorizationStrategy,
}

impl<'a, O: LinearOperator<f64> + ?Sized> ArnoldiFactorizer<'a, O> {
    /// `deflation` holds orthonormal columns (possibly none) that are projected
    /// out of every new vector.
    pub fn new(
        operator: &'a O,
        deflation: MatRef<'a, f64>,
        side: OperatorSide,
        strategy: FactorizationStrategy,
    ) -> Self {
        Self {
            operator,
            deflation,
            side,
            strategy,
        }
    }

    pub fn strategy(&self) -> FactorizationStrategy {
        self.strategy
    }

    fn apply(&self, x: MatRef<'_, f64>) -> Mat<f64> {
        match self.side {
            OperatorSide::Normal => self.operator.apply(x),
            OperatorSide::Transpose => self.operator.apply_transpose(x),
        }
    }

    /// Extends the factorization from `k` to `m` columns.
    ///
    /// `v` is `n × ncv` with orthonormal columns `0..=k` (column `k` is the
    /// start vector), `h` is `ncv × ncv` and `f` is `n × 1`. Columns `0..k`
    /// of `v` and `h` are read but never written.
    pub fn factorize<G: ReductionGroup>(
        &self,
        ortho: &mut Orthogonalizer<G>,
        v: MatMut<'_, f64>,
        h: MatMut<'_, f64>,
        f: MatMut<'_, f64>,
        k: usize,
        m: usize,
    ) -> Result<Factorization, ArnoldiError> {
        debug_assert!(k < m && m <= v.ncols());
        match self.strategy {
            FactorizationStrategy::Basic => self.basic(ortho, v, h, f, k, m),
            FactorizationStrategy::Delayed => self.delayed(ortho, v, h, f, k, m),
            FactorizationStrategy::DelayedNoRefine => self.delayed_no_refine(ortho, v, h, f, k, m),
        }
    }

    fn basic<G: ReductionGroup>(
        &self,
        ortho: &mut Orthogonalizer<G>,
        mut v: MatMut<'_, f64>,
        mut h: MatMut<'_, f64>,
        mut f: MatMut<'_, f64>,
        k: usize,
        m: usize,
    ) -> Result<Factorization, ArnoldiError> {
        for j in k..m - 1 {
            let mut w = self.apply(v.rb().get(.., j..j + 1));
            ortho.project_out(w.as_mut(), self.deflation)?;
            let result = ortho.orthogonalize(w.as_mut(), v.rb().get(.., 0..j + 1))?;
            write_column(h.rb_mut(), j, &result.coefficients, Some(result.norm));
            if result.breakdown {
                f.copy_from(w.as_ref());
                return Ok(Factorization {
                    length: j + 1,
                    beta: result.norm,
                    breakdown: true,
                });
            }
            scale_in_place(w.as_mut(), 1.0 / result.norm);
            v.rb_mut().get_mut(.., j + 1..j + 2).copy_from(w.as_ref());
        }

        let mut w = self.apply(v.rb().get(.., m - 1..m));
        ortho.project_out(w.as_mut(), self.deflation)?;
        let result = ortho.orthogonalize(w.as_mut(), v.rb().get(.., 0..m))?;
        write_column(h.rb_mut(), m - 1, &result.coefficients, None);
        f.copy_from(w.as_ref());
        Ok(Factorization {
            length: m,
            beta: result.norm,
            breakdown: false,
        })
    }

    fn delayed<G: ReductionGroup>(
        &self,
        ortho: &mut Orthogonalizer<G>,
        mut v: MatMut<'_, f64>,
        mut h: MatMut<'_, f64>,
        mut f: MatMut<'_, f64>,
        k: usize,
        m: usize,
    ) -> Result<Factorization, ArnoldiError> {
        // `‖Op v_{j-1}‖`, the reference for the linear dependence test of `p_j`.
        let mut scale = 0.0;

        for j in k..m {
            // Column j holds the normalized start vector (j = k) or the raw
            // residual `p_j` of the previous step.
            let w = self.apply(v.rb().get(.., j..j + 1));
            f.copy_from(w.as_ref());
            ortho.project_out(f.rb_mut(), self.deflation)?;

            // All reductions of this step share one synchronization.
            let p = v.rb().get(.., j..j + 1);
            let coefficients_req = ortho.issue_inner_products(f.rb(), v.rb().get(.., 0..j + 1));
            let norm_req = ortho.issue_norm(f.rb());
            let pending = (j > k).then(|| {
                (
                    ortho.issue_inner_products(p, v.rb().get(.., 0..j)),
                    ortho.issue_inner_product(p, p),
                )
            });
            let cross_req = (j > k + 1).then(|| {
                ortho.issue_inner_product(v.rb().get(.., j - 1..j), v.rb().get(.., j - 2..j - 1))
            });

            let coefficients = ortho.complete_inner_products(coefficients_req)?;
            let w_norm = ortho.complete_norm(norm_req)?;
            let pending = match pending {
                Some((lhh, dot)) => Some((
                    ortho.complete_inner_products(lhh)?,
                    ortho.complete_inner_product(dot)?,
                )),
                None => None,
            };
            if let Some(cross_req) = cross_req {
                let cross = ortho.complete_inner_product(cross_req)?;
                if !(cross.abs() <= DELAYED_ORTHOGONALITY_THRESHOLD) {
                    // Keep the factorization up to column j - 1, whose
                    // residual is known exactly.
                    let beta = h[(j - 1, j - 2)];
                    f.copy_from(v.rb().get(.., j - 1..j));
                    scale_in_place(f.rb_mut(), beta);
                    return Ok(Factorization {
                        length: j - 1,
                        beta,
                        breakdown: true,
                    });
                }
            }

            let column = match pending {
                None => {
                    subtract_combination(f.rb_mut(), v.rb().get(.., 0..j + 1), &coefficients);
                    scale = w_norm;
                    coefficients
                }
                Some((lhh, dot)) => {
                    let squared = dot - lhh.iter().map(|c| c * c).sum::<f64>();
                    if !(squared > 0.5 * dot && squared.sqrt() > LINEAR_DEPENDENCE_RATIO * scale) {
                        // `p_j` is (numerically) in the span of the basis, or too
                        // close to it for the norm to be trusted.
                        f.copy_from(v.rb().get(.., j..j + 1));
                        subtract_combination(f.rb_mut(), v.rb().get(.., 0..j), &lhh);
                        for (i, c) in lhh.iter().enumerate() {
                            h[(i, j - 1)] += c;
                        }
                        let beta = ortho.norm(f.rb())?;
                        return Ok(Factorization {
                            length: j,
                            beta,
                            breakdown: true,
                        });
                    }
                    let norm = squared.sqrt();

                    // `H[0..j, 0..j] lhh` before column j - 1 is corrected.
                    let through: Vec<f64> = (0..j)
                        .map(|i| (0..j).map(|l| h[(i, l)] * lhh[l]).sum())
                        .collect();
                    for (i, c) in lhh.iter().enumerate() {
                        h[(i, j - 1)] += c;
                    }
                    h[(j, j - 1)] = norm;

                    let mut vj = v.rb().get(.., j..j + 1).to_owned();
                    subtract_combination(vj.as_mut(), v.rb().get(.., 0..j), &lhh);
                    scale_in_place(vj.as_mut(), 1.0 / norm);
                    v.rb_mut().get_mut(.., j..j + 1).copy_from(vj.as_ref());

                    // `v_j^T Op p_j`, without another reduction.
                    let gamma = (coefficients[j]
                        - lhh.iter().zip(&coefficients).map(|(a, b)| a * b).sum::<f64>())
                        / norm;
                    let last = lhh[j - 1];
                    subtract_combination(f.rb_mut(), v.rb().get(.., 0..j), &coefficients[..j]);
                    subtract_combination(f.rb_mut(), v.rb().get(.., j..j + 1), &[gamma]);
                    scale_in_place(f.rb_mut(), 1.0 / norm);

                    scale = w_norm / norm;
                    (0..j)
                        .map(|i| (coefficients[i] - through[i] - last * lhh[i]) / norm)
                        .chain(std::iter::once(gamma / norm - last))
                        .collect()
                }
            };
            write_column(h.rb_mut(), j, &column, None);

            if j + 1 < m {
                v.rb_mut().get_mut(.., j + 1..j + 2).copy_from(f.rb());
            }
        }

        let lhh = ortho.inner_products(f.rb(), v.rb().get(.., 0..m))?;
        subtract_combination(f.rb_mut(), v.rb().get(.., 0..m), &lhh);
        for (i, c) in lhh.iter().enumerate() {
            h[(i, m - 1)] += c;
        }
        let beta = ortho.norm(f.rb())?;
        Ok(Factorization {
            length: m,
            beta,
            breakdown: false,
        })
    }

    fn delayed_no_refine<G: ReductionGroup>(
        &self,
        ortho: &mut Orthogonalizer<G>,
        mut v: MatMut<'_, f64>,
        mut h: MatMut<'_, f64>,
        mut f: MatMut<'_, f64>,
        k: usize,
        m: usize,
    ) -> Result<Factorization, ArnoldiError> {
        for j in k..m {
            let w = self.apply(v.rb().get(.., j..j + 1));
            f.copy_from(w.as_ref());
            ortho.project_out(f.rb_mut(), self.deflation)?;

            let p = v.rb().get(.., j..j + 1);
            let coefficients_req = ortho.issue_inner_products(f.rb(), v.rb().get(.., 0..j + 1));
            let pending = (j > k).then(|| {
                (
                    ortho.issue_inner_products(p, v.rb().get(.., 0..j)),
                    ortho.issue_inner_product(p, p),
                )
            });
            let mut coefficients = ortho.complete_inner_products(coefficients_req)?;
            let pending = match pending {
                Some((overlap, dot)) => Some((
                    ortho.complete_inner_products(overlap)?,
                    ortho.complete_inner_product(dot)?,
                )),
                None => None,
            };

            if let Some((overlap, dot)) = pending {
                let norm = dot.max(0.0).sqrt();
                let overlap = overlap.iter().map(|c| c * c).sum::<f64>().sqrt();
                if !(norm > 0.0 && norm.is_finite()) || !(overlap <= ORTHOGONALITY_LOSS_LIMIT * norm) {
                    f.copy_from(v.rb().get(.., j..j + 1));
                    return Ok(Factorization {
                        length: j,
                        beta: norm,
                        breakdown: true,
                    });
                }
                scale_in_place(v.rb_mut().get_mut(.., j..j + 1), 1.0 / norm);
                h[(j, j - 1)] = norm;
                for c in &mut coefficients[..j] {
                    *c /= norm;
                }
                coefficients[j] /= dot;
                scale_in_place(f.rb_mut(), 1.0 / norm);
            }

            subtract_combination(f.rb_mut(), v.rb().get(.., 0..j + 1), &coefficients);
            write_column(h.rb_mut(), j, &coefficients, None);

            if j + 1 < m {
                v.rb_mut().get_mut(.., j + 1..j + 2).copy_from(f.rb());
            }
        }

        let beta = ortho.norm(f.rb())?;
        Ok(Factorization {
            length: m,
            beta,
            breakdown: false,
        })
    }
}

/// Overwrites column `j` of `h`: the coefficients, then the subdiagonal entry
/// if given, then zeros.
fn write_column(mut h: MatMut<'_, f64>, j: usize, coefficients: &[f64], subdiagonal: Option<f64>) {
    let mut row = 0;
    for &c in coefficients {
        h[(row, j)] = c;
        row += 1;
    }
    if let Some(s) = subdiagonal {
        h[(row, j)] = s;
        row += 1;
    }
    for i in row..h.nrows() {
        h[(i, j)] = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orthogonalization::Refinement;

    fn test_operator(n: usize) -> Mat<f64> {
        Mat::from_fn(n, n, |i, j| {
            if i == j {
                (i + 1) as f64
            } else {
                ((i * 7 + j * 3) % 11) as f64 / 11.0 - 0.5
            }
        })
    }

    fn start_basis(n: usize, ncv: usize) -> Mat<f64> {
        let mut v = Mat::<f64>::zeros(n, ncv);
        for i in 0..n {
            v[(i, 0)] = 1.0 + (i % 3) as f64;
        }
        let norm = v.as_ref().get(.., 0..1).norm_l2();
        for i in 0..n {
            v[(i, 0)] /= norm;
        }
        v
    }

    fn relation_residual(a: &Mat<f64>, v: &Mat<f64>, h: &Mat<f64>, f: &Mat<f64>, m: usize) -> f64 {
        let vm = v.as_ref().get(.., 0..m);
        let mut r = &(a.as_ref() * vm) - &(vm * h.as_ref().get(0..m, 0..m));
        for i in 0..r.nrows() {
            r[(i, m - 1)] -= f[(i, 0)];
        }
        r.norm_l2()
    }

    fn orthogonality_loss(v: &Mat<f64>, m: usize) -> f64 {
        let vm = v.as_ref().get(.., 0..m);
        (&(vm.transpose() * vm) - &Mat::<f64>::identity(m, m)).norm_l2()
    }

    fn run(strategy: FactorizationStrategy, refinement: Refinement) -> (Mat<f64>, Mat<f64>, Mat<f64>, Mat<f64>, Factorization, usize) {
        let (n, m) = (40, 12);
        let a = test_operator(n);
        let mut v = start_basis(n, m);
        let mut h = Mat::<f64>::zeros(m, m);
        let mut f = Mat::<f64>::zeros(n, 1);
        let mut ortho = Orthogonalizer::local(refinement);
        let empty = Mat::<f64>::zeros(n, 0);
        let factorizer = ArnoldiFactorizer::new(&a, empty.as_ref(), OperatorSide::Normal, strategy);
        let fact = factorizer.factorize(&mut ortho, v.as_mut(), h.as_mut(), f.as_mut(), 0, m).unwrap();
        (a, v, h, f, fact, ortho.synchronizations())
    }

    #[test]
    fn test_basic_relation_and_orthogonality() {
        let (a, v, h, f, fact, _) = run(FactorizationStrategy::Basic, Refinement::IfNeeded);
        assert_eq!(fact.length, 12);
        assert!(!fact.breakdown);
        assert!(relation_residual(&a, &v, &h, &f, 12) < 1e-12 * a.norm_l2());
        assert!(orthogonality_loss(&v, 12) < 1e-13);
        assert!((f.norm_l2() - fact.beta).abs() < 1e-12);
        let vtf = v.transpose() * f.as_ref();
        assert!(vtf.norm_l2() < 1e-12 * fact.beta.max(1.0));
        // Upper Hessenberg.
        for j in 0..12 {
            for i in j + 2..12 {
                assert_eq!(h[(i, j)], 0.0);
            }
        }
    }

    #[test]
    fn test_delayed_relation_and_orthogonality() {
        let (a, v, h, f, fact, _) = run(FactorizationStrategy::Delayed, Refinement::IfNeeded);
        assert_eq!(fact.length, 12);
        assert!(!fact.breakdown);
        assert!(relation_residual(&a, &v, &h, &f, 12) < 1e-12 * a.norm_l2());
        assert!(orthogonality_loss(&v, 12) < 1e-12);
        assert!((f.norm_l2() - fact.beta).abs() < 1e-12);
        let vtf = v.transpose() * f.as_ref();
        assert!(vtf.norm_l2() < 1e-12 * fact.beta.max(1.0));
    }

    #[test]
    fn test_delayed_near_invariant_start_keeps_relation() {
        // The start vector is an eigenvector up to 1e-8, so the first residual
        // is tiny and its delayed normalization is where the relation for the
        // final basis can be lost.
        let (n, m) = (40, 12);
        let a = Mat::<f64>::from_fn(n, n, |i, j| if i == j { (i + 1) as f64 } else { 0.0 });
        let mut v = Mat::<f64>::zeros(n, m);
        for i in 0..n {
            v[(i, 0)] = 1e-8 * (((i * 37) % 17) as f64 / 17.0 - 0.5);
        }
        v[(n - 1, 0)] = 1.0;
        let norm = v.as_ref().get(.., 0..1).norm_l2();
        for i in 0..n {
            v[(i, 0)] /= norm;
        }
        let mut h = Mat::<f64>::zeros(m, m);
        let mut f = Mat::<f64>::zeros(n, 1);
        let mut ortho = Orthogonalizer::local(Refinement::IfNeeded);
        let empty = Mat::<f64>::zeros(n, 0);
        let factorizer =
            ArnoldiFactorizer::new(&a, empty.as_ref(), OperatorSide::Normal, FactorizationStrategy::Delayed);
        let fact = factorizer
            .factorize(&mut ortho, v.as_mut(), h.as_mut(), f.as_mut(), 0, m)
            .unwrap();
        assert_eq!(fact.length, m);
        assert!(!fact.breakdown);
        assert!(relation_residual(&a, &v, &h, &f, m) < 1e-12 * a.norm_l2());
        assert!(orthogonality_loss(&v, m) < 1e-12);
    }

    #[test]
    fn test_delayed_no_refine_relation() {
        let (a, v, h, f, fact, _) = run(FactorizationStrategy::DelayedNoRefine, Refinement::Never);
        assert_eq!(fact.length, 12);
        assert!(relation_residual(&a, &v, &h, &f, 12) < 1e-8 * a.norm_l2());
        assert!(orthogonality_loss(&v, 12) < 1e-8);
    }

    #[test]
    fn test_delayed_needs_fewer_synchronizations() {
        let (.., basic) = run(FactorizationStrategy::Basic, Refinement::IfNeeded);
        let (.., delayed) = run(FactorizationStrategy::Delayed, Refinement::IfNeeded);
        let (.., no_refine) = run(FactorizationStrategy::DelayedNoRefine, Refinement::Never);
        // One per step, plus the final reorthogonalization and norm of the
        // residual.
        assert_eq!(delayed, 12 + 2);
        assert_eq!(no_refine, 12 + 1);
        assert!(basic >= 2 * 12);
    }

    #[test]
    fn test_basic_breakdown_on_invariant_subspace() {
        let n = 10;
        let a = Mat::<f64>::from_fn(n, n, |i, j| if i == j { (i + 1) as f64 } else { 0.0 });
        let mut v = Mat::<f64>::zeros(n, 6);
        let s = std::f64::consts::FRAC_1_SQRT_2;
        v[(0, 0)] = s;
        v[(1, 0)] = s;
        let mut h = Mat::<f64>::zeros(6, 6);
        let mut f = Mat::<f64>::zeros(n, 1);
        let mut ortho = Orthogonalizer::local(Refinement::IfNeeded);
        let empty = Mat::<f64>::zeros(n, 0);
        let factorizer =
            ArnoldiFactorizer::new(&a, empty.as_ref(), OperatorSide::Normal, FactorizationStrategy::Basic);
        let fact = factorizer.factorize(&mut ortho, v.as_mut(), h.as_mut(), f.as_mut(), 0, 6).unwrap();
        assert!(fact.breakdown);
        assert_eq!(fact.length, 2);
        assert!(fact.beta < 1e-12);
        assert!(relation_residual(&a, &v, &h, &f, 2) < 1e-13);
    }

    #[test]
    fn test_extension_keeps_locked_columns() {
        let (n, m) = (40, 12);
        let a = test_operator(n);
        let mut v = start_basis(n, m);
        let mut h = Mat::<f64>::zeros(m, m);
        let mut f = Mat::<f64>::zeros(n, 1);
        let mut ortho = Orthogonalizer::local(Refinement::IfNeeded);
        let empty = Mat::<f64>::zeros(n, 0);
        let factorizer =
            ArnoldiFactorizer::new(&a, empty.as_ref(), OperatorSide::Normal, FactorizationStrategy::Basic);
        factorizer.factorize(&mut ortho, v.as_mut(), h.as_mut(), f.as_mut(), 0, 5).unwrap();
        let prefix = v.as_ref().get(.., 0..3).to_owned();
        let h_prefix = h.as_ref().get(.., 0..3).to_owned();

        // Continue from k = 3 as if the first three columns were locked.
        let fact = factorizer.factorize(&mut ortho, v.as_mut(), h.as_mut(), f.as_mut(), 3, m).unwrap();
        assert_eq!(fact.length, m);
        assert_eq!(v.as_ref().get(.., 0..3).to_owned(), prefix);
        assert_eq!(h.as_ref().get(.., 0..3).to_owned(), h_prefix);
        assert!(orthogonality_loss(&v, m) < 1e-13);
    }

    #[test]
    fn test_deflation_space_is_projected_out() {
        let n = 30;
        let a = test_operator(n);
        let mut deflation = Mat::<f64>::zeros(n, 1);
        deflation[(n - 1, 0)] = 1.0;
        let mut v = start_basis(n, 8);
        v[(n - 1, 0)] = 0.0;
        let norm = v.as_ref().get(.., 0..1).norm_l2();
        for i in 0..n {
            v[(i, 0)] /= norm;
        }
        let mut h = Mat::<f64>::zeros(8, 8);
        let mut f = Mat::<f64>::zeros(n, 1);
        let mut ortho = Orthogonalizer::local(Refinement::IfNeeded);
        let factorizer =
            ArnoldiFactorizer::new(&a, deflation.as_ref(), OperatorSide::Normal, FactorizationStrategy::Delayed);
        factorizer.factorize(&mut ortho, v.as_mut(), h.as_mut(), f.as_mut(), 0, 8).unwrap();
        for j in 0..8 {
            assert!(v[(n - 1, j)].abs() < 1e-14);
        }
        assert!(f[(n - 1, 0)].abs() < 1e-14);
    }

    /// A locked prefix whose second column leans towards the first by
    /// `overlap`, with the matching Galerkin block in `H`, followed by the
    /// start vector of `start_basis` restricted to the other coordinates.
    fn skewed_prefix(a: &Mat<f64>, m: usize, overlap: f64) -> (Mat<f64>, Mat<f64>) {
        let n = a.nrows();
        let mut v = Mat::<f64>::zeros(n, m);
        v[(0, 0)] = 1.0;
        let s = (1.0 + overlap * overlap).sqrt();
        v[(0, 1)] = overlap / s;
        v[(1, 1)] = 1.0 / s;
        for i in 2..n {
            v[(i, 2)] = 1.0 + (i % 3) as f64;
        }
        let norm = v.as_ref().get(.., 2..3).norm_l2();
        for i in 2..n {
            v[(i, 2)] /= norm;
        }
        let locked = v.as_ref().get(.., 0..2);
        let galerkin = locked.transpose() * (a.as_ref() * locked);
        let mut h = Mat::<f64>::zeros(m, m);
        h.as_mut().get_mut(0..2, 0..2).copy_from(galerkin.as_ref());
        (v, h)
    }

    #[test]
    fn test_delayed_cross_check_truncates() {
        let (n, m, k) = (40, 12, 2);
        let a = test_operator(n);
        let (mut v, mut h) = skewed_prefix(&a, m, 1e-2);
        let mut f = Mat::<f64>::zeros(n, 1);
        let mut ortho = Orthogonalizer::local(Refinement::IfNeeded);
        let empty = Mat::<f64>::zeros(n, 0);
        let factorizer =
            ArnoldiFactorizer::new(&a, empty.as_ref(), OperatorSide::Normal, FactorizationStrategy::Delayed);
        let fact = factorizer
            .factorize(&mut ortho, v.as_mut(), h.as_mut(), f.as_mut(), k, m)
            .unwrap();

        // Columns 3 and 2 are orthogonal, columns 4 and 3 are not: the
        // factorization is cut back to column 3.
        assert!(fact.breakdown);
        assert_eq!(fact.length, 4);
        let len = fact.length;
        assert_eq!(fact.beta, h[(len, len - 1)]);
        for i in 0..n {
            assert_eq!(f[(i, 0)], fact.beta * v[(i, len)]);
        }

        // The relation holds for the columns built here, up to the skew that
        // the locked prefix feeds into their coefficients.
        let built = v.as_ref().get(.., k..len);
        let mut r = &(a.as_ref() * built) - &(v.as_ref().get(.., 0..len) * h.as_ref().get(0..len, k..len));
        for i in 0..n {
            r[(i, len - k - 1)] -= f[(i, 0)];
        }
        assert!(r.norm_l2() < 1e-2);
    }

    #[test]
    fn test_single_pass_strategies_stop_on_lost_orthogonality() {
        let (n, m, k) = (40, 12, 2);
        let a = test_operator(n);
        let empty = Mat::<f64>::zeros(n, 0);
        for (strategy, refinement) in [
            (FactorizationStrategy::Basic, Refinement::Never),
            (FactorizationStrategy::DelayedNoRefine, Refinement::Never),
        ] {
            let (mut v, mut h) = skewed_prefix(&a, m, 1e-2);
            let mut f = Mat::<f64>::zeros(n, 1);
            let mut ortho = Orthogonalizer::local(refinement);
            let factorizer = ArnoldiFactorizer::new(&a, empty.as_ref(), OperatorSide::Normal, strategy);
            let fact = factorizer
                .factorize(&mut ortho, v.as_mut(), h.as_mut(), f.as_mut(), k, m)
                .unwrap();
            assert!(fact.breakdown, "{strategy:?} did not notice the skewed basis");
            assert!(fact.length > k && fact.length < m);

            // Without the skew the same start runs to full length.
            let (mut v, mut h) = skewed_prefix(&a, m, 0.0);
            let fact = factorizer
                .factorize(&mut ortho, v.as_mut(), h.as_mut(), f.as_mut(), k, m)
                .unwrap();
            assert!(!fact.breakdown);
            assert_eq!(fact.length, m);
        }
    }
}
