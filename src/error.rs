//! This module defines the custom error types for the library.
//!
//! Every failure the restarted Arnoldi solver can report is collected in a single
//! enum, [`ArnoldiErrorKind`], wrapped by the public [`ArnoldiError`] type.
//!
//! Only genuinely fatal conditions are errors. Running out of iterations or an
//! unrecoverable Krylov breakdown inside the restart loop are *terminal states*
//! reported through [`crate::solvers::ConvergedReason`], not errors: the caller
//! still receives the eigenpairs locked so far.
use thiserror::Error;

/// Represents all possible errors that can occur while setting up or running
/// the Arnoldi eigensolver.
#[derive(Error, Debug)]
#[error(transparent)]
pub struct ArnoldiError(#[from] ArnoldiErrorKind);

impl ArnoldiError {
    /// Returns the kind of failure, for callers that need to branch on it.
    pub fn kind(&self) -> &ArnoldiErrorKind {
        &self.0
    }
}

/// The distinct kinds of errors.
#[derive(Error, Debug, PartialEq)]
pub enum ArnoldiErrorKind {
    /// The solver parameters are inconsistent (e.g. `ncv < nev`). Detected at
    /// setup, before any operator application.
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// No vector orthogonal to the locked basis and the deflation space could
    /// be generated for the given basis slot.
    #[error(
        "Arnoldi breakdown at basis index {index}: the generated vector has norm {norm:e} after orthogonalization."
    )]
    Breakdown { index: usize, norm: f64 },

    /// A dense kernel (Schur reduction, SVD, small linear solve) failed.
    #[error("Dense linear algebra failure in {routine}: {detail}")]
    LinearAlgebra {
        routine: &'static str,
        detail: String,
    },

    /// The dimensions of the operator and a supplied vector or basis are incompatible.
    #[error(
        "Dimension mismatch for {what}: expected {expected} rows but found {actual}."
    )]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Indicates that an invalid input parameter was provided to a function.
    #[error("Invalid input parameter: {0}")]
    InputError(String),
}

// Manually implement PartialEq for the public error type.
impl PartialEq for ArnoldiError {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}
