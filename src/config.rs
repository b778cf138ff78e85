//! Solver configuration and its resolution into concrete dimensions.
//!
//! [`ArnoldiConfig`] mirrors the knobs a user can set. Some of them (`ncv`,
//! `mpd`, `max_it`) are optional and only get a value once the operator
//! dimension is known, in [`ArnoldiConfig::resolve`].

use crate::{
    error::{ArnoldiError, ArnoldiErrorKind},
    orthogonalization::Refinement,
};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Which part of the spectrum is wanted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Which {
    #[default]
    LargestMagnitude,
    SmallestMagnitude,
    LargestReal,
    SmallestReal,
    LargestImaginary,
    SmallestImaginary,
}

impl Which {
    /// Orders two eigenvalues so that the preferred one compares as `Less`.
    pub fn compare(self, a: Complex64, b: Complex64) -> Ordering {
        let key = |z: Complex64| match self {
            Which::LargestMagnitude => -z.norm(),
            Which::SmallestMagnitude => z.norm(),
            Which::LargestReal => -z.re,
            Which::SmallestReal => z.re,
            Which::LargestImaginary => -z.im.abs(),
            Which::SmallestImaginary => z.im.abs(),
        };
        key(a).total_cmp(&key(b))
    }

    fn is_imaginary(self) -> bool {
        matches!(self, Which::LargestImaginary | Which::SmallestImaginary)
    }
}

/// How approximate eigenvectors are extracted from the Krylov subspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Extraction {
    #[default]
    Ritz,
    Harmonic,
    Refined,
    RefinedHarmonic,
}

impl Extraction {
    pub fn is_harmonic(self) -> bool {
        matches!(self, Extraction::Harmonic | Extraction::RefinedHarmonic)
    }

    pub fn is_refined(self) -> bool {
        matches!(self, Extraction::Refined | Extraction::RefinedHarmonic)
    }
}

/// Structural knowledge about the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ProblemType {
    #[default]
    NonHermitian,
    /// The operator is symmetric, so every eigenvalue is real.
    Hermitian,
}

/// Whether the Krylov space is built from `A` or from `A^T`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum OperatorSide {
    #[default]
    Normal,
    Transpose,
}

/// The Arnoldi factorization variant, derived from the configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FactorizationStrategy {
    /// One synchronous orthogonalization per step.
    Basic,
    /// Pipelined normalization and reorthogonalization.
    Delayed,
    /// Pipelined normalization only.
    DelayedNoRefine,
}

impl std::fmt::Display for FactorizationStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FactorizationStrategy::Basic => "basic",
            FactorizationStrategy::Delayed => "delayed reorthogonalization",
            FactorizationStrategy::DelayedNoRefine => "delayed normalization",
        };
        f.write_str(name)
    }
}

/// User-facing solver parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArnoldiConfig {
    /// Number of eigenpairs requested.
    pub nev: usize,
    /// Maximum dimension of the Krylov subspace.
    pub ncv: Option<usize>,
    /// Maximum number of new columns per restart.
    pub mpd: Option<usize>,
    pub tol: f64,
    pub max_it: Option<usize>,
    pub which: Which,
    pub extraction: Extraction,
    pub target: Option<f64>,
    /// Use one of the pipelined factorizations.
    pub delayed: bool,
    pub refinement: Refinement,
    pub problem_type: ProblemType,
    pub side: OperatorSide,
    /// Seed for generated start vectors.
    pub seed: u64,
}

impl Default for ArnoldiConfig {
    fn default() -> Self {
        Self {
            nev: 1,
            ncv: None,
            mpd: None,
            tol: 1e-8,
            max_it: None,
            which: Which::default(),
            extraction: Extraction::default(),
            target: None,
            delayed: false,
            refinement: Refinement::default(),
            problem_type: ProblemType::default(),
            side: OperatorSide::default(),
            seed: 42,
        }
    }
}

impl ArnoldiConfig {
    pub fn new(nev: usize) -> Self {
        Self {
            nev,
            ..Self::default()
        }
    }

    pub fn with_ncv(mut self, ncv: usize) -> Self {
        self.ncv = Some(ncv);
        self
    }

    pub fn with_mpd(mut self, mpd: usize) -> Self {
        self.mpd = Some(mpd);
        self
    }

    pub fn with_tol(mut self, tol: f64) -> Self {
        self.tol = tol;
        self
    }

    pub fn with_max_it(mut self, max_it: usize) -> Self {
        self.max_it = Some(max_it);
        self
    }

    pub fn with_which(mut self, which: Which) -> Self {
        self.which = which;
        self
    }

    pub fn with_extraction(mut self, extraction: Extraction) -> Self {
        self.extraction = extraction;
        self
    }

    pub fn with_target(mut self, target: f64) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_delayed(mut self, delayed: bool) -> Self {
        self.delayed = delayed;
        self
    }

    pub fn with_refinement(mut self, refinement: Refinement) -> Self {
        self.refinement = refinement;
        self
    }

    pub fn with_problem_type(mut self, problem_type: ProblemType) -> Self {
        self.problem_type = problem_type;
        self
    }

    pub fn with_side(mut self, side: OperatorSide) -> Self {
        self.side = side;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// The factorization chosen by the `delayed` and `refinement` settings.
    pub fn strategy(&self) -> FactorizationStrategy {
        match (self.delayed, self.refinement) {
            (false, _) => FactorizationStrategy::Basic,
            (true, Refinement::Never) => FactorizationStrategy::DelayedNoRefine,
            (true, _) => FactorizationStrategy::Delayed,
        }
    }

    /// Validates the configuration against an operator of dimension `n` and
    /// fills in every defaulted quantity.
    pub fn resolve(&self, n: usize) -> Result<Dimensions, ArnoldiError> {
        let fail = |msg: String| -> Result<Dimensions, ArnoldiError> {
            Err(ArnoldiErrorKind::Configuration(msg).into())
        };

        if self.nev == 0 {
            return fail("nev must be positive".to_string());
        }
        if self.nev > n {
            return fail(format!(
                "nev ({}) exceeds the operator dimension ({n})",
                self.nev
            ));
        }
        if !(self.tol.is_finite() && self.tol > 0.0) {
            return fail(format!("the tolerance must be positive, got {}", self.tol));
        }
        if self.problem_type == ProblemType::Hermitian && self.which.is_imaginary() {
            return fail(format!(
                "{:?} is meaningless for a Hermitian problem, whose eigenvalues are real",
                self.which
            ));
        }
        if self.extraction.is_harmonic() && self.target.is_none() {
            return fail(format!("{:?} extraction requires a target", self.extraction));
        }
        if self.side == OperatorSide::Transpose && self.strategy() != FactorizationStrategy::Basic {
            return fail("the transposed operator is only supported by the basic factorization".to_string());
        }

        let nev = self.nev;
        let (ncv, mpd) = match (self.ncv, self.mpd) {
            (Some(ncv), mpd) => {
                if ncv < nev {
                    return fail(format!("ncv ({ncv}) must be at least nev ({nev})"));
                }
                if ncv > n {
                    return fail(format!(
                        "ncv ({ncv}) exceeds the operator dimension ({n})"
                    ));
                }
                (ncv, mpd.unwrap_or(ncv))
            }
            (None, Some(mpd)) => ((nev + mpd).min(n), mpd),
            (None, None) if nev < 500 => {
                let ncv = (2 * nev).max(nev + 15).min(n);
                (ncv, ncv)
            }
            (None, None) => ((nev + 500).min(n), 500),
        };
        if mpd == 0 {
            return fail("mpd must be positive".to_string());
        }
        if ncv > nev + mpd {
            return fail(format!(
                "ncv ({ncv}) is larger than nev + mpd ({})",
                nev + mpd
            ));
        }

        let max_it = self.max_it.unwrap_or_else(|| 100.max(2 * n / ncv));
        if max_it == 0 {
            return fail("max_it must be positive".to_string());
        }

        Ok(Dimensions {
            n,
            nev,
            ncv,
            mpd,
            max_it,
        })
    }
}

/// Quantities fixed at setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Operator dimension.
    pub n: usize,
    pub nev: usize,
    pub ncv: usize,
    pub mpd: usize,
    pub max_it: usize,
}
