//! The numerical building blocks of the restarted Arnoldi method.
//!
//! - [`arnoldi`]: basic and pipelined Arnoldi factorizations.
//! - [`projected`]: sorted Schur form of the projected Hessenberg matrix and
//!   the harmonic translation.
//! - [`residuals`]: residual estimates without explicit residual vectors.
//! - [`extract`]: Ritz and refined vector extraction into the Krylov basis.
//! - [`dense`]: the small dense kernels the above are built on.

pub mod arnoldi;
pub mod dense;
pub mod extract;
pub mod projected;
pub mod residuals;
