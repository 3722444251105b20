//! Cascade training CLI.
//!
//! With no mode flag this runs the full default schedule; `--init-only`
//! writes an empty cascade with the requested geometry, `--one-stage`
//! appends a single stage to an existing (or freshly created) cascade.

use anyhow::Result;
use clap::Parser;
use pico::app::{self, TrainConfig};
use pico::logger;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "pico-train", version, about)]
struct Args {
    /// Packed training data file
    data_file: PathBuf,

    /// Cascade output file
    output_file: PathBuf,

    /// Row scale factor of the detection window
    #[arg(long = "sr", default_value_t = 1.0)]
    sr: f32,

    /// Column scale factor of the detection window
    #[arg(long = "sc", default_value_t = 1.0)]
    sc: f32,

    /// Tree depth
    #[arg(long, default_value_t = 5)]
    depth: u32,

    /// Stage true-positive target (used with --one-stage)
    #[arg(long, default_value_t = 0.0)]
    tpr: f32,

    /// Stage false-positive target (used with --one-stage)
    #[arg(long, default_value_t = 0.0)]
    fpr: f32,

    /// Stage tree budget (used with --one-stage)
    #[arg(long, default_value_t = 0)]
    ntrees: usize,

    /// Write an empty cascade with the given geometry and exit
    #[arg(long, conflicts_with = "one_stage")]
    init_only: bool,

    /// Run a single stage against the cascade in the output file
    #[arg(long)]
    one_stage: bool,

    /// PRNG seed (defaults to the clock)
    #[arg(long)]
    seed: Option<u32>,

    /// Mining worker threads (defaults to available parallelism)
    #[arg(long)]
    workers: Option<usize>,
}

impl Args {
    fn into_config(self) -> TrainConfig {
        TrainConfig {
            data: self.data_file,
            output: self.output_file,
            sr: self.sr,
            sc: self.sc,
            depth: self.depth,
            tpr: self.tpr,
            fpr: self.fpr,
            ntrees: self.ntrees,
            seed: self.seed,
            workers: self.workers,
        }
    }
}

fn main() -> Result<()> {
    logger::init("info");
    let args = Args::parse();

    if args.init_only {
        app::run_init(&args.into_config())
    } else if args.one_stage {
        app::run_one_stage(&args.into_config())
    } else {
        app::run_training(&args.into_config())
    }
}
