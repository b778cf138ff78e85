//! Explicitly restarted Arnoldi eigensolver for large, matrix-free operators.
//!
//! This crate computes a few eigenpairs of a real, possibly non-symmetric,
//! linear operator `A` of large dimension. Only the action `v -> A v` (and
//! optionally `v -> A^T v`) is required, through the
//! [`matrix::LinearOperator`] trait, so dense `faer` matrices, sparse matrices
//! and implicit operators are all handled alike.
//!
//! ## Method
//!
//! Each restart iteration builds an Arnoldi factorization
//! `A V_m = V_m H_m + f e_m^T`, reduces the small Hessenberg matrix `H_m` to
//! sorted real Schur form, estimates every residual from `‖f‖` and the last
//! row of the Schur vectors, locks the leading converged pairs and restarts
//! from the first unconverged Ritz vector. Locked columns are never touched
//! again.
//!
//! **Factorizations** ([`algorithms::arnoldi`]): the *basic* variant
//! orthogonalizes every new vector synchronously. The *delayed* variants
//! postpone normalization (and reorthogonalization) by one step so that all
//! inner products of a step are reduced together, which matters when they are
//! global reductions over many processes ([`collective`]).
//!
//! **Extraction** ([`config::Extraction`]): plain Ritz vectors, harmonic Ritz
//! vectors for eigenvalues close to an interior target, and refined vectors
//! that minimize the residual over the Krylov space.
//!
//! ## Example Usage
//!
//! The largest eigenvalues of the 1-D Laplacian are known in closed form.
//!
//! ```rust
//! use arnoldi_project::{ArnoldiConfig, ArnoldiSolver, ConvergedReason};
//! use arnoldi_project::utils::problems::{laplacian_1d, laplacian_1d_eigenvalues};
//!
//! let n = 30;
//! let a = laplacian_1d(n).unwrap();
//! let config = ArnoldiConfig::new(3).with_ncv(20).with_delayed(true);
//!
//! let mut solver = ArnoldiSolver::new(&a, config).unwrap();
//! let reason = solver.solve().unwrap();
//! assert_eq!(reason, ConvergedReason::ConvergedTolerance);
//!
//! let exact = laplacian_1d_eigenvalues(n);
//! for i in 0..3 {
//!     let lambda = solver.eigenvalue(i).unwrap();
//!     assert!((lambda.re - exact[i]).abs() < 1e-6);
//!     assert_eq!(lambda.im, 0.0);
//! }
//! println!("{}", solver.summary().unwrap());
//! ```

pub mod algorithms;
pub mod collective;
pub mod config;
pub mod error;
pub mod matrix;
pub mod orthogonalization;
pub mod report;
pub mod solvers;
pub mod utils;

// Re-export the main API for convenient access.
pub use config::{ArnoldiConfig, Extraction, FactorizationStrategy, OperatorSide, ProblemType, Which};
pub use error::{ArnoldiError, ArnoldiErrorKind};
pub use orthogonalization::Refinement;
pub use report::{IterationSnapshot, Summary};
pub use solvers::{ArnoldiSolver, ConvergedReason};
