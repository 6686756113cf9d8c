//! `node-ranker` — reads line-delimited JSON samples and estimate
//! requests from standard input, feeds them to the ranking engine, and
//! writes line-delimited estimate responses to standard output.

use std::fs::OpenOptions;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use node_ranker::driver::process_line;
use node_ranker::{Estimator, EstimatorError, OlsRegression};
use tracing::info;

/// Online node-ranking estimator for a workflow scheduler.
#[derive(Parser, Debug)]
#[command(name = "node-ranker", about = "Online node-ranking estimator")]
struct Cli {
    /// Seed for the regression primitive's internal randomness, if any.
    /// The shipped ordinary-least-squares primitive is deterministic and
    /// ignores this, but the flag is accepted so a stochastic primitive
    /// can be swapped in later without changing the CLI surface.
    seed: Option<i64>,

    /// Append every raw input line to this file as an audit trail.
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,

    /// Increase log verbosity (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) {
    let default_filter = match verbose {
        0 => "info,node_ranker=info",
        1 => "info,node_ranker=debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Some(seed) = cli.seed {
        info!(seed, "seed accepted (ignored by the deterministic OLS primitive)");
    }

    let mut log_file = cli
        .log_file
        .as_ref()
        .map(|path| {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| EstimatorError::AuditLog {
                    path: path.clone(),
                    source,
                })
        })
        .transpose()?;

    let mut estimator = Estimator::new(Box::new(OlsRegression));

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = line.context("failed reading from stdin")?;

        if let Some(file) = log_file.as_mut() {
            writeln!(file, "{line}").ok();
        }

        if let Some(response) = process_line(&mut estimator, &line) {
            writeln!(stdout, "{response}").context("failed writing to stdout")?;
            stdout.flush().context("failed flushing stdout")?;
        }
    }

    Ok(())
}
