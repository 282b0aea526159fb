//! Training demo binary: deterministic multi-root WebDataset sampling
//! feeding a toy classifier.

use std::path::PathBuf;
use std::process;

use anyhow::{ensure, Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::FmtSubscriber;

use data_pipeline::{discover_by_root, CancelToken};
use trainer::config::{Config, Overrides};
use trainer::train::{run, RunConfig};

#[derive(Debug, Parser)]
#[command(name = "trainer", about = "Round-robin multi-root WebDataset training demo")]
struct Args {
    /// Path to the YAML config.
    #[arg(long, default_value = "configs/demo.yaml")]
    config: PathBuf,

    /// Override training root A.
    #[arg(long)]
    train_root_a: Option<PathBuf>,

    /// Override training root B.
    #[arg(long)]
    train_root_b: Option<PathBuf>,

    /// Number of training steps.
    #[arg(long)]
    steps: Option<usize>,

    /// Batch size.
    #[arg(long)]
    batch_size: Option<usize>,

    /// Number of data loader workers.
    #[arg(long)]
    num_workers: Option<usize>,

    /// PRNG seed.
    #[arg(long)]
    seed: Option<u64>,

    /// Log every N steps.
    #[arg(long)]
    log_every: Option<usize>,
}

fn main() {
    let subscriber = FmtSubscriber::builder().with_target(false).finish();
    tracing::subscriber::set_global_default(subscriber).expect("set tracing subscriber");

    if let Err(err) = run_cli(Args::parse()) {
        error!("{err:#}");
        process::exit(1);
    }
}

fn run_cli(args: Args) -> Result<()> {
    let mut config = Config::load(&args.config)?;
    config.apply_overrides(&Overrides {
        train_root_a: args.train_root_a,
        train_root_b: args.train_root_b,
        steps: args.steps,
        batch_size: args.batch_size,
        num_workers: args.num_workers,
        seed: args.seed,
        log_every: args.log_every,
    });
    config.validate()?;

    let token = CancelToken::new();
    let handler_token = token.clone();
    ctrlc::set_handler(move || handler_token.cancel()).context("install signal handler")?;

    let roots = discover_by_root(
        &[config.train_root_a.clone(), config.train_root_b.clone()],
        &token,
    )?;
    for (root, shards) in &roots {
        ensure!(!shards.is_empty(), "no shards discovered under {root}");
        info!(root = %root, shards = shards.len(), "discovered dataset root");
    }

    run(
        RunConfig {
            roots,
            steps: config.steps,
            batch_size: config.batch_size,
            num_workers: config.num_workers,
            log_every: config.log_every,
            seed: config.seed,
        },
        token,
    )
}
