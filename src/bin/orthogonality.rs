//! Experiment Runner for Orthogonality Analysis.
//!
//! This executable compares the Arnoldi factorization strategies on the same
//! operator and start vector. For each basis length it records the loss of
//! orthogonality of the generated basis, the residual of the Arnoldi relation
//! and the number of global synchronizations the strategy needed, which is the
//! quantity the pipelined strategies are designed to reduce.

use anyhow::Result;
use arnoldi_project::{
    FactorizationStrategy, OperatorSide, Refinement,
    algorithms::arnoldi::ArnoldiFactorizer,
    matrix::LinearOperator,
    orthogonalization::Orthogonalizer,
    utils::problems,
};
use clap::{Parser, ValueEnum};
use faer::{Mat, MatRef, Scale, prelude::*, sparse::SparseColMat};
use serde::Serialize;
use std::path::PathBuf;

/// Defines the spectral properties of the test operator.
#[derive(ValueEnum, Clone, Debug, Copy)]
enum ProblemScenario {
    /// Symmetric, eigenvalues evenly spread over [1, n].
    Normal,
    /// Lower bidiagonal with the same spectrum: strongly non-normal, which
    /// stresses the orthogonalization.
    NonNormal,
}

/// Command-line arguments for the orthogonality analysis runner.
#[derive(Parser, Debug)]
#[clap(
    name = "orthogonality-runner",
    about = "Measures basis orthogonality and synchronization counts of the Arnoldi factorizations."
)]
struct OrthoArgs {
    /// The spectral scenario for the test problem.
    #[clap(long, value_enum)]
    scenario: ProblemScenario,
    /// Dimension of the test matrix.
    #[clap(long, default_value_t = 1000)]
    n: usize,
    /// Minimum factorization length to test.
    #[clap(long, default_value_t = 10)]
    m_min: usize,
    /// Maximum factorization length to test.
    #[clap(long, default_value_t = 200)]
    m_max: usize,
    /// Step size for iterating the length.
    #[clap(long, default_value_t = 10)]
    m_step: usize,
    /// Path to the output CSV file where results will be written.
    #[clap(long, value_name = "PATH")]
    output: PathBuf,
}

/// Represents a single row of data in the output CSV file.
#[derive(Debug, Serialize)]
struct OrthogonalityResult {
    /// The factorization strategy.
    strategy: String,
    /// The requested length.
    m: usize,
    /// The achieved length, smaller than `m` after a breakdown.
    length: usize,
    /// Orthogonality loss ||I - V^T V||_F.
    ortho_loss: f64,
    /// ||A V - V H - f e_m^T||_F / ||A||_F.
    relation_residual: f64,
    /// Global reductions performed.
    synchronizations: usize,
    breakdown: bool,
}

fn create_problem(n: usize, scenario: ProblemScenario) -> Result<SparseColMat<usize, f64>> {
    let spectrum = problems::linear_spectrum(n, 1.0, n as f64);
    let a = match scenario {
        ProblemScenario::Normal => problems::diagonal(&spectrum)?,
        ProblemScenario::NonNormal => problems::bidiagonal(&spectrum, 0.5 * n as f64)?,
    };
    Ok(a)
}

fn relation_residual(
    a: &SparseColMat<usize, f64>,
    v: MatRef<'_, f64>,
    h: MatRef<'_, f64>,
    f: MatRef<'_, f64>,
) -> f64 {
    let m = v.ncols();
    let av = a.apply(v);
    let vh = v * h;
    let mut r = &av - &vh;
    for i in 0..r.nrows() {
        r[(i, m - 1)] -= f[(i, 0)];
    }
    let a_norm = a.as_ref().val().iter().map(|x| x * x).sum::<f64>().sqrt();
    r.norm_l2() / a_norm
}

fn main() -> Result<()> {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .try_init()?;
    let args = OrthoArgs::parse();
    log::info!(
        "Starting orthogonality analysis for scenario: {:?}, n = {}",
        args.scenario,
        args.n
    );

    let a = create_problem(args.n, args.scenario)?;
    let start = problems::random_vector(args.n, 42);
    let start = &start * Scale(1.0 / start.norm_l2());
    let empty = Mat::<f64>::zeros(args.n, 0);

    let strategies = [
        (FactorizationStrategy::Basic, Refinement::IfNeeded),
        (FactorizationStrategy::Delayed, Refinement::IfNeeded),
        (FactorizationStrategy::DelayedNoRefine, Refinement::Never),
    ];

    let mut writer = csv::Writer::from_path(&args.output)?;
    for m in (args.m_min..=args.m_max.min(args.n)).step_by(args.m_step.max(1)) {
        if m == 0 {
            continue;
        }
        log::info!("Running for m = {}...", m);
        for (strategy, refinement) in strategies {
            let mut v = Mat::<f64>::zeros(args.n, m);
            v.as_mut().get_mut(.., 0..1).copy_from(start.as_ref());
            let mut h = Mat::<f64>::zeros(m, m);
            let mut f = Mat::<f64>::zeros(args.n, 1);
            let mut ortho = Orthogonalizer::local(refinement);

            let factorizer =
                ArnoldiFactorizer::new(&a, empty.as_ref(), OperatorSide::Normal, strategy);
            let fact = factorizer.factorize(&mut ortho, v.as_mut(), h.as_mut(), f.as_mut(), 0, m)?;
            let length = fact.length;

            let vm = v.as_ref().get(.., 0..length);
            let identity = Mat::<f64>::identity(length, length);
            let ortho_loss = (&identity - vm.transpose() * vm).norm_l2();
            let relation_residual = relation_residual(
                &a,
                vm,
                h.as_ref().get(0..length, 0..length),
                f.as_ref(),
            );

            writer.serialize(OrthogonalityResult {
                strategy: strategy.to_string(),
                m,
                length,
                ortho_loss,
                relation_residual,
                synchronizations: ortho.synchronizations(),
                breakdown: fact.breakdown,
            })?;
        }
    }

    writer.flush()?;
    log::info!(
        "Orthogonality analysis complete. Results saved to {:?}.",
        &args.output
    );
    Ok(())
}
