//! Progress and result reporting.
//!
//! The solver hands an [`IterationSnapshot`] to the user's monitor after every
//! restart, and condenses a finished run into a [`Summary`] whose `Display`
//! implementation prints the familiar convergence table.

use crate::{
    config::{Extraction, FactorizationStrategy},
    solvers::ConvergedReason,
};
use num_complex::Complex64;
use serde::Serialize;
use std::fmt;

/// The solver state at the end of one restart iteration.
///
/// The slices have length `nv`. Entries below `nconv` are locked and will not
/// change again.
#[derive(Debug, Clone, Copy)]
pub struct IterationSnapshot<'a> {
    pub iteration: usize,
    pub nconv: usize,
    pub nv: usize,
    pub eigr: &'a [f64],
    pub eigi: &'a [f64],
    pub errest: &'a [f64],
}

impl IterationSnapshot<'_> {
    pub fn eigenvalue(&self, i: usize) -> Complex64 {
        Complex64::new(self.eigr[i], self.eigi[i])
    }
}

/// One converged eigenpair as reported in the summary table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EigenpairReport {
    pub re: f64,
    pub im: f64,
    /// `‖A x - λ x‖ / ‖λ x‖`, computed with the operator.
    pub relative_error: f64,
}

/// The outcome of a solve.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub iterations: usize,
    pub strategy: FactorizationStrategy,
    pub extraction: Extraction,
    pub reason: ConvergedReason,
    pub nev: usize,
    pub tol: f64,
    pub max_it: usize,
    pub eigenpairs: Vec<EigenpairReport>,
}

impl Summary {
    pub fn converged(&self) -> usize {
        self.eigenpairs.len()
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, " Number of iterations of the method: {}", self.iterations)?;
        writeln!(
            f,
            " Solution method: arnoldi ({}, {:?} extraction)",
            self.strategy, self.extraction
        )?;
        writeln!(f)?;
        writeln!(f, " Number of requested eigenvalues: {}", self.nev)?;
        writeln!(
            f,
            " Stopping condition: tol={:.4e}, maxit={}",
            self.tol, self.max_it
        )?;
        writeln!(f, " Number of converged eigenpairs: {}", self.converged())?;
        writeln!(f, " Terminal state: {:?}", self.reason)?;
        if self.eigenpairs.is_empty() {
            return Ok(());
        }

        writeln!(f)?;
        writeln!(f, "           k          ||Ax-kx||/||kx||")?;
        writeln!(f, "   ----------------- ------------------")?;
        for pair in &self.eigenpairs {
            if pair.im != 0.0 {
                writeln!(
                    f,
                    " {:9.6}{:+9.6} j {:12.4e}",
                    pair.re, pair.im, pair.relative_error
                )?;
            } else {
                writeln!(f, "   {:12.6}       {:12.4e}", pair.re, pair.relative_error)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(eigenpairs: Vec<EigenpairReport>) -> Summary {
        Summary {
            iterations: 7,
            strategy: FactorizationStrategy::Delayed,
            extraction: Extraction::Ritz,
            reason: ConvergedReason::ConvergedTolerance,
            nev: 2,
            tol: 1e-8,
            max_it: 100,
            eigenpairs,
        }
    }

    #[test]
    fn test_summary_header() {
        let text = summary(Vec::new()).to_string();
        assert!(text.contains(" Number of iterations of the method: 7"));
        assert!(text.contains("arnoldi (delayed reorthogonalization, Ritz extraction)"));
        assert!(text.contains("tol=1.0000e-8, maxit=100"));
        assert!(text.contains(" Number of converged eigenpairs: 0"));
        // No table without converged pairs.
        assert!(!text.contains("||Ax-kx||"));
    }

    #[test]
    fn test_summary_rows() {
        let text = summary(vec![
            EigenpairReport {
                re: 3.5,
                im: 0.0,
                relative_error: 1e-10,
            },
            EigenpairReport {
                re: 1.0,
                im: -2.0,
                relative_error: 2e-9,
            },
        ])
        .to_string();
        assert!(text.contains("3.500000"));
        assert!(text.contains("1.000000-2.000000 j"));
        assert!(text.contains("1.0000e-10"));
    }

    #[test]
    fn test_snapshot_eigenvalue() {
        let (eigr, eigi, errest) = ([1.0, 2.0], [0.5, -0.5], [0.0, 0.0]);
        let snapshot = IterationSnapshot {
            iteration: 1,
            nconv: 0,
            nv: 2,
            eigr: &eigr,
            eigi: &eigi,
            errest: &errest,
        };
        assert_eq!(snapshot.eigenvalue(1), Complex64::new(2.0, -0.5));
    }
}
