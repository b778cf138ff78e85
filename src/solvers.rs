//! This module provides the high-level eigensolver: an explicitly restarted
//! Arnoldi method with locking.
//!
//! An [`ArnoldiSolver`] is a session object. It is built from an operator and
//! an [`ArnoldiConfig`], optionally given an initial vector, a deflation space
//! and a monitor, and then driven to a terminal state by
//! [`ArnoldiSolver::solve`]. Every restart iteration
//!
//! 1. extends the Arnoldi factorization from the locked prefix to `nv` columns,
//! 2. translates the projected matrix for harmonic extraction,
//! 3. reduces it to sorted real Schur form,
//! 4. estimates residual norms from the Schur form alone,
//! 5. locks the leading converged pairs and rotates the basis,
//!
//! until enough pairs are locked, the iteration cap is hit, or the Krylov space
//! cannot be extended any further. Afterwards only the locked pairs are
//! visible through the accessors.

use crate::{
    algorithms::{
        arnoldi::ArnoldiFactorizer,
        dense, extract,
        projected::{self, SortCriterion},
        residuals,
    },
    collective::{LocalGroup, ReductionGroup},
    config::{ArnoldiConfig, Dimensions, FactorizationStrategy, OperatorSide},
    error::{ArnoldiError, ArnoldiErrorKind},
    matrix::LinearOperator,
    orthogonalization::{Orthogonalizer, scale_in_place},
    report::{EigenpairReport, IterationSnapshot, Summary},
};
use faer::{Mat, MatRef};
use log::{debug, info, warn};
use num_complex::Complex64;
use rand::{Rng, SeedableRng, rngs::StdRng};
use serde::{Deserialize, Serialize};

/// The state of a solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConvergedReason {
    /// Not yet terminated.
    Iterating,
    /// `nev` eigenpairs are locked.
    ConvergedTolerance,
    /// The iteration cap was reached first.
    DivergedIterations,
    /// The Krylov space broke down and no new start vector could be generated.
    DivergedBreakdown,
}

impl ConvergedReason {
    pub fn is_terminal(self) -> bool {
        self != ConvergedReason::Iterating
    }

    pub fn is_converged(self) -> bool {
        self == ConvergedReason::ConvergedTolerance
    }
}

type Monitor<'a> = Box<dyn FnMut(&IterationSnapshot<'_>) + 'a>;

/// Explicitly restarted Arnoldi eigensolver for a real operator.
///
/// # Type Parameters
///
/// *   `O`: The operator. Only its action (and, for
///     [`OperatorSide::Transpose`], the action of its transpose) is used.
/// *   `G`: The process group over which inner products are reduced.
///
/// # Example
///
/// ```
/// use arnoldi_project::{ArnoldiConfig, ArnoldiSolver, ConvergedReason};
/// use faer::Mat;
///
/// let a = Mat::<f64>::from_fn(50, 50, |i, j| if i == j { (i + 1) as f64 } else { 0.0 });
/// let config = ArnoldiConfig::new(2).with_ncv(12);
/// let mut solver = ArnoldiSolver::new(&a, config).unwrap();
/// assert_eq!(solver.solve().unwrap(), ConvergedReason::ConvergedTolerance);
/// assert!((solver.eigenvalue(0).unwrap().re - 50.0).abs() < 1e-6);
/// ```
pub struct ArnoldiSolver<'a, O: LinearOperator<f64> + ?Sized, G: ReductionGroup = LocalGroup> {
    operator: &'a O,
    config: ArnoldiConfig,
    dims: Dimensions,
    strategy: FactorizationStrategy,
    criterion: SortCriterion,
    deflation: Mat<f64>,
    ortho: Orthogonalizer<G>,
    rng: StdRng,

    v: Mat<f64>,
    h: Mat<f64>,
    q: Mat<f64>,
    f: Mat<f64>,
    eigr: Vec<f64>,
    eigi: Vec<f64>,
    errest: Vec<f64>,

    nconv: usize,
    iterations: usize,
    reason: ConvergedReason,
    initial: Option<Mat<f64>>,
    started: bool,
    monitor: Option<Monitor<'a>>,
}

impl<'a, O: LinearOperator<f64> + ?Sized> ArnoldiSolver<'a, O, LocalGroup> {
    /// Sets up a single-process solver.
    ///
    /// Fails with a configuration error if the operator is not square or the
    /// configuration is inconsistent with its dimension.
    pub fn new(operator: &'a O, config: ArnoldiConfig) -> Result<Self, ArnoldiError> {
        Self::with_group(operator, config, LocalGroup)
    }
}

impl<'a, O: LinearOperator<f64> + ?Sized, G: ReductionGroup> ArnoldiSolver<'a, O, G> {
    /// Sets up a solver whose reductions run over `group`.
    pub fn with_group(operator: &'a O, config: ArnoldiConfig, group: G) -> Result<Self, ArnoldiError> {
        if operator.nrows() != operator.ncols() {
            return Err(ArnoldiErrorKind::Configuration(format!(
                "the operator must be square, got {}x{}",
                operator.nrows(),
                operator.ncols()
            ))
            .into());
        }
        let n = operator.nrows();
        let dims = config.resolve(n)?;
        let strategy = config.strategy();
        let criterion = match config.target {
            Some(target) if config.extraction.is_harmonic() => SortCriterion::Target(target),
            _ => SortCriterion::Which(config.which),
        };
        let ncv = dims.ncv;

        info!(
            "Arnoldi setup: n = {}, nev = {}, ncv = {}, mpd = {}, max_it = {}, {} factorization, {:?} extraction",
            n, dims.nev, ncv, dims.mpd, dims.max_it, strategy, config.extraction
        );

        Ok(Self {
            operator,
            dims,
            strategy,
            criterion,
            deflation: Mat::zeros(n, 0),
            ortho: Orthogonalizer::new(config.refinement, group),
            rng: StdRng::seed_from_u64(config.seed),
            config,
            v: Mat::zeros(n, ncv),
            h: Mat::zeros(ncv, ncv),
            q: Mat::zeros(ncv, ncv),
            f: Mat::zeros(n, 1),
            eigr: vec![0.0; ncv],
            eigi: vec![0.0; ncv],
            errest: vec![0.0; ncv],
            nconv: 0,
            iterations: 0,
            reason: ConvergedReason::Iterating,
            initial: None,
            started: false,
            monitor: None,
        })
    }

    /// Uses `x` as the first Krylov vector instead of a random one.
    pub fn with_initial_vector(mut self, x: MatRef<'_, f64>) -> Result<Self, ArnoldiError> {
        if x.nrows() != self.dims.n {
            return Err(ArnoldiErrorKind::DimensionMismatch {
                what: "initial vector",
                expected: self.dims.n,
                actual: x.nrows(),
            }
            .into());
        }
        if x.ncols() != 1 {
            return Err(ArnoldiErrorKind::InputError(format!(
                "the initial vector must have a single column, got {}",
                x.ncols()
            ))
            .into());
        }
        self.initial = Some(x.to_owned());
        Ok(self)
    }

    /// Restricts the search to the orthogonal complement of the columns of
    /// `space`. The columns are orthonormalized here; they must be linearly
    /// independent.
    pub fn with_deflation_space(mut self, space: MatRef<'_, f64>) -> Result<Self, ArnoldiError> {
        if space.nrows() != self.dims.n {
            return Err(ArnoldiErrorKind::DimensionMismatch {
                what: "deflation space",
                expected: self.dims.n,
                actual: space.nrows(),
            }
            .into());
        }
        let mut deflation = space.to_owned();
        self.ortho.orthonormalize_columns(deflation.as_mut())?;
        self.deflation = deflation;
        Ok(self)
    }

    /// Installs a callback invoked after every restart iteration.
    pub fn with_monitor<F>(mut self, monitor: F) -> Self
    where
        F: FnMut(&IterationSnapshot<'_>) + 'a,
    {
        self.monitor = Some(Box::new(monitor));
        self
    }

    /// Writes a normalized start vector into basis slot `slot`, orthogonal to
    /// the deflation space and to every column before it.
    fn start_vector(&mut self, slot: usize) -> Result<(), ArnoldiError> {
        let n = self.dims.n;
        let initial = if slot == 0 { self.initial.take() } else { None };
        let mut x = match initial {
            Some(x) => x,
            None => Mat::from_fn(n, 1, |_, _| self.rng.random_range(-1.0..1.0)),
        };

        self.ortho.project_out(x.as_mut(), self.deflation.as_ref())?;
        let result = self
            .ortho
            .orthogonalize(x.as_mut(), self.v.as_ref().get(.., 0..slot))?;
        if result.breakdown {
            return Err(ArnoldiErrorKind::Breakdown {
                index: slot,
                norm: result.norm,
            }
            .into());
        }
        scale_in_place(x.as_mut(), 1.0 / result.norm);
        self.v.as_mut().get_mut(.., slot..slot + 1).copy_from(x.as_ref());
        Ok(())
    }

    /// Restores the restart vector in `slot` to a unit vector orthogonal to the
    /// columns before it, so that rounding from single-pass factorizations does
    /// not accumulate across restarts. Returns `false` if it has (numerically)
    /// fallen into their span.
    fn renormalize_restart_vector(&mut self, slot: usize) -> Result<bool, ArnoldiError> {
        let mut x = self.v.as_ref().get(.., slot..slot + 1).to_owned();
        let result = self
            .ortho
            .orthogonalize(x.as_mut(), self.v.as_ref().get(.., 0..slot))?;
        if result.breakdown {
            return Ok(false);
        }
        scale_in_place(x.as_mut(), 1.0 / result.norm);
        self.v.as_mut().get_mut(.., slot..slot + 1).copy_from(x.as_ref());
        Ok(true)
    }

    /// Regenerates the start vector at `slot`, moving to
    /// [`ConvergedReason::DivergedBreakdown`] if that is impossible.
    fn restart_from(&mut self, slot: usize) -> Result<(), ArnoldiError> {
        match self.start_vector(slot) {
            Ok(()) => Ok(()),
            Err(err) if matches!(err.kind(), ArnoldiErrorKind::Breakdown { .. }) => {
                warn!("Unable to generate more start vectors: {err}");
                self.reason = ConvergedReason::DivergedBreakdown;
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Runs restart iterations until a terminal state is reached.
    ///
    /// Hitting the iteration cap and an unrecoverable breakdown are reported
    /// through the returned [`ConvergedReason`]; the pairs locked so far remain
    /// available. Errors are reserved for failures of the dense kernels and
    /// for a first start vector that vanishes.
    pub fn solve(&mut self) -> Result<ConvergedReason, ArnoldiError> {
        if self.reason.is_terminal() {
            return Ok(self.reason);
        }
        if !self.started {
            self.start_vector(0)?;
            self.started = true;
        }

        let Dimensions {
            nev,
            ncv,
            mpd,
            max_it,
            ..
        } = self.dims;
        let tol = self.config.tol;
        let extraction = self.config.extraction;

        while self.reason == ConvergedReason::Iterating {
            self.iterations += 1;
            let k = self.nconv;

            let factorizer = ArnoldiFactorizer::new(
                self.operator,
                self.deflation.as_ref(),
                self.config.side,
                self.strategy,
            );
            let fact = factorizer.factorize(
                &mut self.ortho,
                self.v.as_mut(),
                self.h.as_mut(),
                self.f.as_mut(),
                k,
                (k + mpd).min(ncv),
            )?;
            let nv = fact.length;
            let beta = fact.beta;

            let extended = extraction
                .is_refined()
                .then(|| projected::extended_hessenberg(self.h.as_ref(), nv, beta));
            let translation = match self.config.target {
                Some(target) if extraction.is_harmonic() => Some(projected::translate_harmonic(
                    self.h.as_mut(),
                    nv,
                    beta,
                    target,
                )?),
                _ => None,
            };

            let values =
                projected::schur_sorted(self.h.as_mut(), self.q.as_mut(), k, nv, self.criterion)?;
            for (i, value) in values.iter().enumerate().take(nv).skip(k) {
                self.eigr[i] = value.re;
                self.eigi[i] = value.im;
            }
            residuals::estimate_residuals(
                self.h.as_ref(),
                self.q.as_ref(),
                beta,
                k,
                nv,
                &values,
                &mut self.errest,
            );
            if let Some(g) = &translation {
                residuals::correct_harmonic(&mut self.errest, g, k, nv);
            }

            // Lock a strict prefix of converged pairs.
            let mut kk = k;
            while kk < nv && self.errest[kk] < tol {
                kk += 1;
            }

            // The extra column is the restart vector.
            let end = (kk + 1).min(nv);
            if let Some(extended) = &extended {
                extract::refine(
                    extended.as_ref(),
                    self.q.as_mut().get_mut(0..nv, 0..nv),
                    &values,
                    &mut self.errest,
                    k,
                    end,
                )?;
            }
            extract::update_basis(self.v.as_mut(), self.q.as_ref(), nv, k, end);
            self.nconv = kk;

            debug!(
                "Arnoldi iteration {}: nv = {}, nconv = {}, beta = {:e}",
                self.iterations, nv, kk, beta
            );
            if let Some(monitor) = self.monitor.as_mut() {
                monitor(&IterationSnapshot {
                    iteration: self.iterations,
                    nconv: kk,
                    nv,
                    eigr: &self.eigr[..nv],
                    eigi: &self.eigi[..nv],
                    errest: &self.errest[..nv],
                });
            }

            if fact.breakdown {
                if kk < ncv {
                    warn!(
                        "Breakdown in Arnoldi factorization (iteration {}, norm {:e})",
                        self.iterations, beta
                    );
                    self.restart_from(kk)?;
                }
            } else if kk == nv && nv < ncv && kk < nev {
                // Every pair in range locked, so no Ritz vector was left to
                // restart with.
                warn!("All {kk} Ritz pairs locked, restarting with a new vector");
                self.restart_from(kk)?;
            } else if kk < nv && kk < nev && !self.renormalize_restart_vector(kk)? {
                warn!("Restart vector is no longer independent of the locked basis, restarting with a new vector");
                self.restart_from(kk)?;
            }

            if self.iterations >= max_it {
                self.reason = ConvergedReason::DivergedIterations;
            }
            if self.nconv >= nev {
                self.reason = ConvergedReason::ConvergedTolerance;
            }
        }

        info!(
            "Arnoldi finished after {} iterations ({:?}): {} of {} eigenpairs converged",
            self.iterations, self.reason, self.nconv, nev
        );
        Ok(self.reason)
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// Number of locked eigenpairs. May exceed the requested count.
    pub fn converged(&self) -> usize {
        self.nconv
    }

    pub fn reason(&self) -> ConvergedReason {
        self.reason
    }

    pub fn dimensions(&self) -> Dimensions {
        self.dims
    }

    pub fn strategy(&self) -> FactorizationStrategy {
        self.strategy
    }

    pub fn config(&self) -> &ArnoldiConfig {
        &self.config
    }

    /// Number of global synchronizations performed so far.
    pub fn synchronizations(&self) -> usize {
        self.ortho.synchronizations()
    }

    fn check_index(&self, i: usize) -> Result<(), ArnoldiError> {
        if i >= self.nconv {
            return Err(ArnoldiErrorKind::InputError(format!(
                "eigenpair index {i} out of range, only {} converged",
                self.nconv
            ))
            .into());
        }
        Ok(())
    }

    pub fn eigenvalue(&self, i: usize) -> Result<Complex64, ArnoldiError> {
        self.check_index(i)?;
        Ok(Complex64::new(self.eigr[i], self.eigi[i]))
    }

    /// All converged eigenvalues, in locking order.
    pub fn eigenvalues(&self) -> Vec<Complex64> {
        (0..self.nconv)
            .map(|i| Complex64::new(self.eigr[i], self.eigi[i]))
            .collect()
    }

    /// The residual estimate that locked pair `i`.
    pub fn error_estimate(&self, i: usize) -> Result<f64, ArnoldiError> {
        self.check_index(i)?;
        Ok(self.errest[i])
    }

    /// The locked basis, an orthonormal basis of the converged invariant
    /// subspace.
    pub fn schur_vectors(&self) -> MatRef<'_, f64> {
        self.v.as_ref().get(.., 0..self.nconv)
    }

    /// Eigenvector `i` as `(real part, imaginary part)`, with unit norm.
    ///
    /// The imaginary part is zero for a real eigenvalue. The two members of a
    /// complex pair return conjugate vectors.
    pub fn eigenvector(&self, i: usize) -> Result<(Mat<f64>, Mat<f64>), ArnoldiError> {
        self.check_index(i)?;
        let nconv = self.nconv;
        let x = dense::eigenvector(self.h.as_ref().get(0..nconv, 0..nconv), i);
        let xr = Mat::from_fn(nconv, 1, |j, _| x[j].re);
        let xi = Mat::from_fn(nconv, 1, |j, _| x[j].im);
        let basis = self.schur_vectors();
        Ok((basis * xr.as_ref(), basis * xi.as_ref()))
    }

    fn apply(&self, x: MatRef<'_, f64>) -> Mat<f64> {
        match self.config.side {
            OperatorSide::Normal => self.operator.apply(x),
            OperatorSide::Transpose => self.operator.apply_transpose(x),
        }
    }

    /// The true relative residual `‖A x - λ x‖ / ‖λ x‖` of pair `i`, or
    /// `‖A x‖ / ‖x‖` when `λ = 0`. Costs two operator applications.
    pub fn relative_error(&mut self, i: usize) -> Result<f64, ArnoldiError> {
        let lambda = self.eigenvalue(i)?;
        let (xr, xi) = self.eigenvector(i)?;
        let axr = self.apply(xr.as_ref());
        let axi = self.apply(xi.as_ref());

        // (A - λ)(xr + i xi), split into real and imaginary parts.
        let n = self.dims.n;
        let rr = Mat::from_fn(n, 1, |r, _| {
            axr[(r, 0)] - lambda.re * xr[(r, 0)] + lambda.im * xi[(r, 0)]
        });
        let ri = Mat::from_fn(n, 1, |r, _| {
            axi[(r, 0)] - lambda.re * xi[(r, 0)] - lambda.im * xr[(r, 0)]
        });

        let residual = self.ortho.norm(rr.as_ref())?.hypot(self.ortho.norm(ri.as_ref())?);
        let xnorm = self.ortho.norm(xr.as_ref())?.hypot(self.ortho.norm(xi.as_ref())?);
        let magnitude = lambda.norm();
        let scale = if magnitude > 0.0 { magnitude * xnorm } else { xnorm };
        Ok(residual / scale)
    }

    /// Condenses the current results, including the true relative error of
    /// every converged pair.
    pub fn summary(&mut self) -> Result<Summary, ArnoldiError> {
        let mut eigenpairs = Vec::with_capacity(self.nconv);
        for i in 0..self.nconv {
            let lambda = self.eigenvalue(i)?;
            eigenpairs.push(EigenpairReport {
                re: lambda.re,
                im: lambda.im,
                relative_error: self.relative_error(i)?,
            });
        }
        Ok(Summary {
            iterations: self.iterations,
            strategy: self.strategy,
            extraction: self.config.extraction,
            reason: self.reason,
            nev: self.dims.nev,
            tol: self.config.tol,
            max_it: self.dims.max_it,
            eigenpairs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Which;
    use faer::mat;

    fn diagonal(values: &[f64]) -> Mat<f64> {
        let n = values.len();
        Mat::from_fn(n, n, |i, j| if i == j { values[i] } else { 0.0 })
    }

    #[test]
    fn test_rejects_non_square_operator() {
        let a = Mat::<f64>::zeros(4, 3);
        let err = ArnoldiSolver::new(&a, ArnoldiConfig::new(1)).err().unwrap();
        assert!(matches!(err.kind(), ArnoldiErrorKind::Configuration(_)));
    }

    #[test]
    fn test_rejects_mismatched_initial_vector() {
        let a = diagonal(&[1.0, 2.0, 3.0, 4.0]);
        let x = Mat::<f64>::zeros(3, 1);
        let err = ArnoldiSolver::new(&a, ArnoldiConfig::new(1).with_ncv(3))
            .unwrap()
            .with_initial_vector(x.as_ref())
            .err()
            .unwrap();
        assert_eq!(
            err.kind(),
            &ArnoldiErrorKind::DimensionMismatch {
                what: "initial vector",
                expected: 4,
                actual: 3
            }
        );
    }

    #[test]
    fn test_rejects_dependent_deflation_space() {
        let a = diagonal(&[1.0, 2.0, 3.0, 4.0]);
        let space = mat![[1.0, 2.0], [0.0, 0.0], [1.0, 2.0], [0.0, 0.0]];
        let result = ArnoldiSolver::new(&a, ArnoldiConfig::new(1).with_ncv(2))
            .unwrap()
            .with_deflation_space(space.as_ref());
        assert!(matches!(
            result.err().unwrap().kind(),
            ArnoldiErrorKind::InputError(_)
        ));
    }

    #[test]
    fn test_accessors_hide_unconverged_slots() {
        let a = diagonal(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let solver = ArnoldiSolver::new(&a, ArnoldiConfig::new(2).with_ncv(4)).unwrap();
        assert_eq!(solver.converged(), 0);
        assert!(solver.eigenvalue(0).is_err());
        assert!(solver.error_estimate(0).is_err());
        assert_eq!(solver.schur_vectors().ncols(), 0);
        assert_eq!(solver.reason(), ConvergedReason::Iterating);
    }

    #[test]
    fn test_invariant_start_vector_converges_in_one_iteration() {
        // The start vector is an eigenvector: the factorization breaks down at
        // length one, the pair locks, and a fresh vector continues the search.
        let a = diagonal(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
        let mut x = Mat::<f64>::zeros(8, 1);
        x[(7, 0)] = 1.0;
        let mut solver = ArnoldiSolver::new(&a, ArnoldiConfig::new(1).with_ncv(4))
            .unwrap()
            .with_initial_vector(x.as_ref())
            .unwrap();
        assert_eq!(solver.solve().unwrap(), ConvergedReason::ConvergedTolerance);
        assert_eq!(solver.iterations(), 1);
        assert!((solver.eigenvalue(0).unwrap().re - 8.0).abs() < 1e-14);
    }

    #[test]
    fn test_complex_pair_eigenvector() {
        // Rotation block with eigenvalues 1 ± 3i, far from the rest.
        let mut a = diagonal(&[0.0, 0.0, 0.1, 0.2, 0.3, 0.4]);
        a[(0, 0)] = 1.0;
        a[(1, 1)] = 1.0;
        a[(0, 1)] = 3.0;
        a[(1, 0)] = -3.0;
        let config = ArnoldiConfig::new(2)
            .with_ncv(6)
            .with_which(Which::LargestMagnitude);
        let mut solver = ArnoldiSolver::new(&a, config).unwrap();
        assert_eq!(solver.solve().unwrap(), ConvergedReason::ConvergedTolerance);

        let lambda = solver.eigenvalue(0).unwrap();
        assert!((lambda.re - 1.0).abs() < 1e-10);
        assert!((lambda.im.abs() - 3.0).abs() < 1e-10);
        assert_eq!(solver.eigenvalue(1).unwrap(), lambda.conj());
        assert!(solver.relative_error(0).unwrap() < 1e-10);
        assert!(solver.relative_error(1).unwrap() < 1e-10);
    }

    #[test]
    fn test_solve_is_idempotent_after_termination() {
        let a = diagonal(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0]);
        let mut solver = ArnoldiSolver::new(&a, ArnoldiConfig::new(1).with_ncv(5)).unwrap();
        let reason = solver.solve().unwrap();
        let iterations = solver.iterations();
        assert_eq!(solver.solve().unwrap(), reason);
        assert_eq!(solver.iterations(), iterations);
    }

    #[test]
    fn test_iteration_cap() {
        let values: Vec<f64> = (1..=200).map(|i| 1.0 + 1e-3 * i as f64).collect();
        let a = diagonal(&values);
        let config = ArnoldiConfig::new(4).with_ncv(8).with_max_it(2).with_tol(1e-14);
        let mut solver = ArnoldiSolver::new(&a, config).unwrap();
        assert_eq!(solver.solve().unwrap(), ConvergedReason::DivergedIterations);
        assert_eq!(solver.iterations(), 2);
        assert!(solver.converged() < 4);
    }
}
