//! This module defines the core abstraction for linear operators.
//!
//! The Arnoldi process never reads matrix entries. It only needs the action of
//! the operator on a vector, `w = A v`, and (for left eigenvectors) the action of
//! its transpose, `w = A^T v`. Algorithms in this crate are therefore written
//! against the [`LinearOperator`] trait, so that dense matrices, sparse matrices
//! and implicit operators (e.g. a shift-and-invert spectral transformation
//! supplied by the caller) are all handled by the same code.
//!
//! Implementations are provided for `faer`'s dense types (`Mat`, `MatRef`,
//! `MatMut`) and for sparse column-major matrices, the latter through `faer`'s
//! own matrix-free `LinOp`/`BiLinOp` interface.

use faer::{
    Mat, MatMut, MatRef, Par,
    dyn_stack::{MemBuffer, MemStack},
    matrix_free,
    prelude::Reborrow,
    sparse::{SparseColMat, SparseColMatRef},
    traits::ComplexField,
};

/// Represents a linear operator that can be applied to a vector (or a matrix).
///
/// # Type Parameters
///
/// *   `T`: The scalar type. The eigensolver itself works in `f64`, but the trait
///     is generic so that the same operator types can be reused elsewhere.
///
/// # Example
///
/// ```
/// use faer::mat;
/// use arnoldi_project::matrix::LinearOperator;
///
/// let a = mat![[1.0, 2.0], [0.0, 3.0]];
/// let v = mat![[1.0], [1.0]];
/// assert_eq!(a.apply(v.as_ref()), mat![[3.0], [3.0]]);
/// assert_eq!(a.apply_transpose(v.as_ref()), mat![[1.0], [5.0]]);
/// ```
pub trait LinearOperator<T: ComplexField> {
    /// Returns the number of rows of the operator.
    fn nrows(&self) -> usize;

    /// Returns the number of columns of the operator.
    fn ncols(&self) -> usize;

    /// Applies the operator to `rhs`, returning `A * rhs`.
    ///
    /// # Panics
    ///
    /// Implementations may panic if `rhs.nrows() != self.ncols()`.
    fn apply(&self, rhs: MatRef<'_, T>) -> Mat<T>;

    /// Applies the transposed operator to `rhs`, returning `A^T * rhs`.
    ///
    /// # Panics
    ///
    /// Implementations may panic if `rhs.nrows() != self.nrows()`.
    fn apply_transpose(&self, rhs: MatRef<'_, T>) -> Mat<T>;
}

impl<'a, T: ComplexField> LinearOperator<T> for MatRef<'a, T> {
    #[inline]
    fn nrows(&self) -> usize {
        self.nrows()
    }

    #[inline]
    fn ncols(&self) -> usize {
        self.ncols()
    }

    #[inline]
    fn apply(&self, rhs: MatRef<'_, T>) -> Mat<T> {
        assert_eq!(
            self.ncols(),
            rhs.nrows(),
            "Dimension mismatch: operator columns ({}) do not match vector rows ({}).",
            self.ncols(),
            rhs.nrows(),
        );
        self * rhs
    }

    #[inline]
    fn apply_transpose(&self, rhs: MatRef<'_, T>) -> Mat<T> {
        assert_eq!(
            self.nrows(),
            rhs.nrows(),
            "Dimension mismatch: operator rows ({}) do not match vector rows ({}).",
            self.nrows(),
            rhs.nrows(),
        );
        self.transpose() * rhs
    }
}

impl<'a, T: ComplexField> LinearOperator<T> for MatMut<'a, T> {
    #[inline]
    fn nrows(&self) -> usize {
        self.rb().nrows()
    }

    #[inline]
    fn ncols(&self) -> usize {
        self.rb().ncols()
    }

    #[inline]
    fn apply(&self, rhs: MatRef<'_, T>) -> Mat<T> {
        self.rb().apply(rhs)
    }

    #[inline]
    fn apply_transpose(&self, rhs: MatRef<'_, T>) -> Mat<T> {
        self.rb().apply_transpose(rhs)
    }
}

impl<T: ComplexField> LinearOperator<T> for Mat<T> {
    #[inline]
    fn nrows(&self) -> usize {
        self.as_ref().nrows()
    }

    #[inline]
    fn ncols(&self) -> usize {
        self.as_ref().ncols()
    }

    #[inline]
    fn apply(&self, rhs: MatRef<'_, T>) -> Mat<T> {
        self.as_ref().apply(rhs)
    }

    #[inline]
    fn apply_transpose(&self, rhs: MatRef<'_, T>) -> Mat<T> {
        self.as_ref().apply_transpose(rhs)
    }
}

/// Sparse operators are applied through `faer`'s matrix-free interface, with a
/// scratch buffer sized by the operator itself.
///
/// The numeric sparse types only reach `nrows`/`ncols` through `Deref` to their
/// symbolic structure, so the dimensions are read from `symbolic()` explicitly.
impl<'a> LinearOperator<f64> for SparseColMatRef<'a, usize, f64> {
    #[inline]
    fn nrows(&self) -> usize {
        self.symbolic().nrows()
    }

    #[inline]
    fn ncols(&self) -> usize {
        self.symbolic().ncols()
    }

    fn apply(&self, rhs: MatRef<'_, f64>) -> Mat<f64> {
        let mut out = Mat::zeros(self.nrows(), rhs.ncols());
        let mut mem = MemBuffer::new(<Self as matrix_free::LinOp<f64>>::apply_scratch(
            self,
            rhs.ncols(),
            Par::Seq,
        ));
        <Self as matrix_free::LinOp<f64>>::apply(
            self,
            out.as_mut(),
            rhs,
            Par::Seq,
            MemStack::new(&mut mem),
        );
        out
    }

    fn apply_transpose(&self, rhs: MatRef<'_, f64>) -> Mat<f64> {
        let mut out = Mat::zeros(self.ncols(), rhs.ncols());
        let mut mem = MemBuffer::new(
            <Self as matrix_free::BiLinOp<f64>>::transpose_apply_scratch(self, rhs.ncols(), Par::Seq),
        );
        <Self as matrix_free::BiLinOp<f64>>::transpose_apply(
            self,
            out.as_mut(),
            rhs,
            Par::Seq,
            MemStack::new(&mut mem),
        );
        out
    }
}

impl LinearOperator<f64> for SparseColMat<usize, f64> {
    #[inline]
    fn nrows(&self) -> usize {
        self.symbolic().nrows()
    }

    #[inline]
    fn ncols(&self) -> usize {
        self.symbolic().ncols()
    }

    #[inline]
    fn apply(&self, rhs: MatRef<'_, f64>) -> Mat<f64> {
        LinearOperator::apply(&self.as_ref(), rhs)
    }

    #[inline]
    fn apply_transpose(&self, rhs: MatRef<'_, f64>) -> Mat<f64> {
        LinearOperator::apply_transpose(&self.as_ref(), rhs)
    }
}
