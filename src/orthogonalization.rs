//! Gram–Schmidt orthogonalization with configurable refinement.
//!
//! The [`Orthogonalizer`] owns the [`ReductionContext`] through which every inner
//! product and norm is globally reduced, and offers two families of operations:
//!
//! - synchronous ones ([`Orthogonalizer::orthogonalize`],
//!   [`Orthogonalizer::project_out`], [`Orthogonalizer::norm`]), each finishing
//!   its own reductions before returning;
//! - split ones (`issue_*` / `complete_*`) that let a caller keep several
//!   reductions in flight and pay for a single synchronization, which the
//!   delayed Arnoldi factorizations rely on.
//!
//! Classical Gram–Schmidt is used throughout because all coefficients of a pass
//! can be reduced together. Its loss of orthogonality is repaired by a second
//! pass, applied always, never, or only when the DGKS criterion
//! `‖v'‖ < η‖v‖` with `η = 1/√2` detects strong cancellation. Without a second
//! pass nothing repairs a basis that has drifted from orthonormality, so the
//! single-pass mode measures the leftover overlap instead and reports it as a
//! breakdown once it exceeds [`ORTHOGONALITY_LOSS_LIMIT`].

use crate::{
    collective::{LocalGroup, ReductionContext, ReductionGroup, Request},
    error::{ArnoldiError, ArnoldiErrorKind},
};
use faer::{Accum, Mat, MatMut, MatRef, Par, linalg::matmul::matmul, prelude::*};
use serde::{Deserialize, Serialize};

/// When to apply a second classical Gram–Schmidt pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Refinement {
    /// Single pass. Cheapest, weakest orthogonality.
    Never,
    /// Second pass only when the DGKS criterion detects cancellation.
    #[default]
    IfNeeded,
    /// Always two passes.
    Always,
}

/// DGKS threshold for [`Refinement::IfNeeded`].
const DGKS_ETA: f64 = std::f64::consts::FRAC_1_SQRT_2;

/// Relative norm reduction below which a vector is declared linearly dependent
/// on the basis it was orthogonalized against.
pub const LINEAR_DEPENDENCE_RATIO: f64 = 1e-12;

/// Largest `‖V^T v'‖ / ‖v'‖` accepted after a single Gram–Schmidt pass. Beyond
/// it the basis can no longer be treated as orthonormal.
pub const ORTHOGONALITY_LOSS_LIMIT: f64 = 1e-4;

/// The outcome of orthogonalizing a vector against a basis.
#[derive(Debug, Clone, PartialEq)]
pub struct Orthogonalization {
    /// Projection coefficients `V^T v`, accumulated over all passes.
    pub coefficients: Vec<f64>,
    /// Norm of the orthogonalized vector.
    pub norm: f64,
    /// The vector was (numerically) in the span of the basis.
    pub breakdown: bool,
}

/// Gram–Schmidt orthogonalizer bound to a process group.
#[derive(Debug)]
pub struct Orthogonalizer<G: ReductionGroup = LocalGroup> {
    refinement: Refinement,
    reductions: ReductionContext<G>,
}

impl Orthogonalizer<LocalGroup> {
    /// A single-process orthogonalizer.
    pub fn local(refinement: Refinement) -> Self {
        Self::new(refinement, LocalGroup)
    }
}

impl<G: ReductionGroup> Orthogonalizer<G> {
    pub fn new(refinement: Refinement, group: G) -> Self {
        Self {
            refinement,
            reductions: ReductionContext::new(group),
        }
    }

    pub fn refinement(&self) -> Refinement {
        self.refinement
    }

    /// Number of global synchronizations issued so far.
    pub fn synchronizations(&self) -> usize {
        self.reductions.synchronizations()
    }

    /// Starts the reduction of `basis^T x`.
    pub fn issue_inner_products(&mut self, x: MatRef<'_, f64>, basis: MatRef<'_, f64>) -> Request {
        let local = local_inner_products(x, basis);
        self.reductions.issue(&local)
    }

    /// Starts the reduction of `x^T y`.
    pub fn issue_inner_product(&mut self, x: MatRef<'_, f64>, y: MatRef<'_, f64>) -> Request {
        let local = local_inner_products(x, y);
        self.reductions.issue(&local)
    }

    /// Starts the reduction of `‖x‖`.
    pub fn issue_norm(&mut self, x: MatRef<'_, f64>) -> Request {
        let local = x.norm_l2();
        self.reductions.issue(&[local * local])
    }

    pub fn complete_inner_products(&mut self, request: Request) -> Result<Vec<f64>, ArnoldiError> {
        self.reductions.complete(request)
    }

    pub fn complete_inner_product(&mut self, request: Request) -> Result<f64, ArnoldiError> {
        Ok(self.reductions.complete(request)?.first().copied().unwrap_or(0.0))
    }

    pub fn complete_norm(&mut self, request: Request) -> Result<f64, ArnoldiError> {
        let squared = self.complete_inner_product(request)?;
        Ok(squared.max(0.0).sqrt())
    }

    /// Synchronous `basis^T x`.
    pub fn inner_products(
        &mut self,
        x: MatRef<'_, f64>,
        basis: MatRef<'_, f64>,
    ) -> Result<Vec<f64>, ArnoldiError> {
        let request = self.issue_inner_products(x, basis);
        self.complete_inner_products(request)
    }

    /// Synchronous `‖x‖`.
    pub fn norm(&mut self, x: MatRef<'_, f64>) -> Result<f64, ArnoldiError> {
        let request = self.issue_norm(x);
        self.complete_norm(request)
    }

    /// Orthogonalizes `x` in place against the columns of `basis`, which must be
    /// orthonormal.
    ///
    /// With [`Refinement::Never`] the result also reports a breakdown when the
    /// orthogonalized vector keeps a relative overlap with `basis` above
    /// [`ORTHOGONALITY_LOSS_LIMIT`].
    pub fn orthogonalize(
        &mut self,
        mut x: MatMut<'_, f64>,
        basis: MatRef<'_, f64>,
    ) -> Result<Orthogonalization, ArnoldiError> {
        if basis.ncols() == 0 {
            let norm = self.norm(x.rb())?;
            return Ok(Orthogonalization {
                coefficients: Vec::new(),
                norm,
                breakdown: !(norm > 0.0),
            });
        }

        // First pass; the original norm rides along in the same reduction.
        let dots = self.issue_inner_products(x.rb(), basis);
        let original = self.issue_norm(x.rb());
        let mut coefficients = self.complete_inner_products(dots)?;
        let original_norm = self.complete_norm(original)?;
        subtract_combination(x.rb_mut(), basis, &coefficients);

        if self.refinement == Refinement::Never {
            // The leftover overlap travels with the norm.
            let overlap = self.issue_inner_products(x.rb(), basis);
            let norm = self.issue_norm(x.rb());
            let overlap = self.complete_inner_products(overlap)?;
            let norm = self.complete_norm(norm)?;
            let overlap = overlap.iter().map(|c| c * c).sum::<f64>().sqrt();
            return Ok(Orthogonalization {
                coefficients,
                norm,
                breakdown: !(norm > LINEAR_DEPENDENCE_RATIO * original_norm)
                    || !(overlap <= ORTHOGONALITY_LOSS_LIMIT * norm),
            });
        }

        let mut norm = self.norm(x.rb())?;
        if self.refinement == Refinement::Always || norm < DGKS_ETA * original_norm {
            let correction = self.inner_products(x.rb(), basis)?;
            subtract_combination(x.rb_mut(), basis, &correction);
            for (c, d) in coefficients.iter_mut().zip(&correction) {
                *c += d;
            }
            norm = self.norm(x.rb())?;
        }

        Ok(Orthogonalization {
            coefficients,
            norm,
            breakdown: !(norm > LINEAR_DEPENDENCE_RATIO * original_norm),
        })
    }

    /// Removes the components of `x` along an orthonormal `space` (e.g. a
    /// deflation space). Does nothing, and costs no synchronization, if the
    /// space is empty.
    pub fn project_out(&mut self, x: MatMut<'_, f64>, space: MatRef<'_, f64>) -> Result<(), ArnoldiError> {
        if space.ncols() > 0 {
            self.orthogonalize(x, space)?;
        }
        Ok(())
    }

    /// Orthonormalizes the columns of `m` in place, left to right.
    pub fn orthonormalize_columns(&mut self, mut m: MatMut<'_, f64>) -> Result<(), ArnoldiError> {
        for j in 0..m.ncols() {
            let mut column = m.rb().get(.., j..j + 1).to_owned();
            let result = self.orthogonalize(column.as_mut(), m.rb().get(.., 0..j))?;
            if result.breakdown {
                return Err(ArnoldiErrorKind::InputError(format!(
                    "column {j} is linearly dependent on the preceding columns"
                ))
                .into());
            }
            scale_in_place(column.as_mut(), 1.0 / result.norm);
            m.rb_mut().get_mut(.., j..j + 1).copy_from(column.as_ref());
        }
        Ok(())
    }
}

/// Local partial sums of `basis^T x`.
fn local_inner_products(x: MatRef<'_, f64>, basis: MatRef<'_, f64>) -> Vec<f64> {
    if basis.ncols() == 0 {
        return Vec::new();
    }
    let dots = basis.transpose() * x;
    (0..dots.nrows()).map(|i| dots[(i, 0)]).collect()
}

/// `x -= basis * coefficients`.
pub(crate) fn subtract_combination(x: MatMut<'_, f64>, basis: MatRef<'_, f64>, coefficients: &[f64]) {
    if coefficients.is_empty() {
        return;
    }
    let c = Mat::from_fn(coefficients.len(), 1, |i, _| coefficients[i]);
    matmul(x, Accum::Add, basis, c.as_ref(), -1.0, Par::Seq);
}

/// `x *= alpha`.
pub(crate) fn scale_in_place(mut x: MatMut<'_, f64>, alpha: f64) {
    for j in 0..x.ncols() {
        for i in 0..x.nrows() {
            x[(i, j)] *= alpha;
        }
    }
}
