//! Command-line Eigensolver Runner.
//!
//! This executable solves one of the built-in test problems with any
//! combination of factorization strategy, extraction and selection criterion,
//! prints the convergence summary and, on request, writes the per-iteration
//! history recorded by the monitor to a CSV file.

use anyhow::{Context, Result, ensure};
use arnoldi_project::{
    ArnoldiConfig, ArnoldiSolver, Extraction, OperatorSide, ProblemType, Refinement, Which,
    utils::problems,
};
use clap::{Parser, ValueEnum};
use faer::sparse::SparseColMat;
use serde::Serialize;
use std::path::PathBuf;

/// The test operators available from the command line.
#[derive(ValueEnum, Clone, Debug, Copy)]
enum Problem {
    /// Diagonal matrix with eigenvalues 1, 2, ..., n.
    Diagonal,
    /// The 1-D Laplacian tridiag(-1, 2, -1).
    Laplacian,
    /// Non-normal lower bidiagonal matrix with eigenvalues 1, 2, ..., n.
    Bidiagonal,
}

#[derive(ValueEnum, Clone, Debug, Copy)]
enum WhichArg {
    LargestMagnitude,
    SmallestMagnitude,
    LargestReal,
    SmallestReal,
    LargestImaginary,
    SmallestImaginary,
}

impl From<WhichArg> for Which {
    fn from(arg: WhichArg) -> Self {
        match arg {
            WhichArg::LargestMagnitude => Which::LargestMagnitude,
            WhichArg::SmallestMagnitude => Which::SmallestMagnitude,
            WhichArg::LargestReal => Which::LargestReal,
            WhichArg::SmallestReal => Which::SmallestReal,
            WhichArg::LargestImaginary => Which::LargestImaginary,
            WhichArg::SmallestImaginary => Which::SmallestImaginary,
        }
    }
}

#[derive(ValueEnum, Clone, Debug, Copy)]
enum ExtractionArg {
    Ritz,
    Harmonic,
    Refined,
    RefinedHarmonic,
}

impl From<ExtractionArg> for Extraction {
    fn from(arg: ExtractionArg) -> Self {
        match arg {
            ExtractionArg::Ritz => Extraction::Ritz,
            ExtractionArg::Harmonic => Extraction::Harmonic,
            ExtractionArg::Refined => Extraction::Refined,
            ExtractionArg::RefinedHarmonic => Extraction::RefinedHarmonic,
        }
    }
}

#[derive(ValueEnum, Clone, Debug, Copy)]
enum RefinementArg {
    Never,
    IfNeeded,
    Always,
}

impl From<RefinementArg> for Refinement {
    fn from(arg: RefinementArg) -> Self {
        match arg {
            RefinementArg::Never => Refinement::Never,
            RefinementArg::IfNeeded => Refinement::IfNeeded,
            RefinementArg::Always => Refinement::Always,
        }
    }
}

/// Command-line arguments for the eigensolver runner.
#[derive(Parser, Debug)]
#[clap(
    name = "eigensolve",
    about = "Computes eigenpairs of a test operator with the restarted Arnoldi method."
)]
struct SolveArgs {
    /// The test operator.
    #[clap(long, value_enum, default_value_t = Problem::Laplacian)]
    problem: Problem,
    /// Dimension of the operator.
    #[clap(long, default_value_t = 30)]
    n: usize,
    /// Number of eigenpairs to compute.
    #[clap(long, default_value_t = 1)]
    nev: usize,
    /// Maximum dimension of the Krylov subspace.
    #[clap(long)]
    ncv: Option<usize>,
    /// Maximum number of new basis vectors per restart.
    #[clap(long)]
    mpd: Option<usize>,
    /// Convergence tolerance on the relative residual estimate.
    #[clap(long, default_value_t = 1e-8)]
    tol: f64,
    /// Maximum number of restarts.
    #[clap(long)]
    max_it: Option<usize>,
    #[clap(long, value_enum, default_value_t = WhichArg::LargestMagnitude)]
    which: WhichArg,
    #[clap(long, value_enum, default_value_t = ExtractionArg::Ritz)]
    extraction: ExtractionArg,
    /// Target for harmonic extraction.
    #[clap(long, allow_hyphen_values = true)]
    target: Option<f64>,
    /// Use the pipelined factorization.
    #[clap(long)]
    delayed: bool,
    #[clap(long, value_enum, default_value_t = RefinementArg::IfNeeded)]
    refinement: RefinementArg,
    /// Compute left eigenvectors (iterate with the transpose).
    #[clap(long)]
    transpose: bool,
    /// Seed for the start vectors.
    #[clap(long, default_value_t = 42)]
    seed: u64,
    /// Optional CSV file receiving the per-iteration history.
    #[clap(long, value_name = "PATH")]
    history: Option<PathBuf>,
}

/// One row of the history CSV: a single Ritz value at a single iteration.
#[derive(Debug, Serialize)]
struct HistoryRecord {
    iteration: usize,
    index: usize,
    nconv: usize,
    nv: usize,
    re: f64,
    im: f64,
    error_estimate: f64,
}

fn build_problem(args: &SolveArgs) -> Result<SparseColMat<usize, f64>> {
    let spectrum = problems::linear_spectrum(args.n, 1.0, args.n as f64);
    let operator = match args.problem {
        Problem::Diagonal => problems::diagonal(&spectrum)?,
        Problem::Laplacian => problems::laplacian_1d(args.n)?,
        Problem::Bidiagonal => problems::bidiagonal(&spectrum, 1.0)?,
    };
    Ok(operator)
}

fn main() -> Result<()> {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .try_init()?;
    let args = SolveArgs::parse();
    ensure!(args.n > 0, "the operator dimension must be positive");
    log::info!(
        "Solving the {:?} problem of dimension {} for {} eigenpairs",
        args.problem,
        args.n,
        args.nev
    );

    let a = build_problem(&args)?;
    let mut config = ArnoldiConfig::new(args.nev)
        .with_tol(args.tol)
        .with_which(args.which.into())
        .with_extraction(args.extraction.into())
        .with_delayed(args.delayed)
        .with_refinement(args.refinement.into())
        .with_seed(args.seed);
    config.ncv = args.ncv;
    config.mpd = args.mpd;
    config.max_it = args.max_it;
    config.target = args.target;
    if matches!(args.problem, Problem::Diagonal | Problem::Laplacian) {
        config = config.with_problem_type(ProblemType::Hermitian);
    }
    if args.transpose {
        config = config.with_side(OperatorSide::Transpose);
    }

    let mut history = Vec::new();
    let mut solver = ArnoldiSolver::new(&a, config)
        .context("invalid solver configuration")?
        .with_monitor(|snapshot| {
            for index in 0..snapshot.nv {
                history.push(HistoryRecord {
                    iteration: snapshot.iteration,
                    index,
                    nconv: snapshot.nconv,
                    nv: snapshot.nv,
                    re: snapshot.eigr[index],
                    im: snapshot.eigi[index],
                    error_estimate: snapshot.errest[index],
                });
            }
        });
    solver.solve()?;
    let summary = solver.summary()?;
    drop(solver);

    println!("{summary}");

    if let Some(path) = &args.history {
        let mut writer = csv::Writer::from_path(path)?;
        for record in &history {
            writer.serialize(record)?;
        }
        writer.flush()?;
        log::info!(
            "Wrote {} history rows to {:?}.",
            history.len(),
            path
        );
    }
    Ok(())
}
