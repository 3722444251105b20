//! Detection CLI: multi-scale scan of one image with a trained cascade,
//! clustered detections to JSON and (optionally) an annotated PNG.

use anyhow::Result;
use clap::Parser;
use pico::app::{self, DetectConfig};
use pico::logger;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "pico-scan", version, about)]
struct Args {
    /// Cascade file
    cascade: PathBuf,

    /// Input image (any format the image crate decodes)
    image: PathBuf,

    /// Smallest window size scanned
    #[arg(long)]
    min_size: Option<f32>,

    /// Largest window size scanned
    #[arg(long)]
    max_size: Option<f32>,

    /// Geometric growth factor between scales
    #[arg(long)]
    scale_factor: Option<f32>,

    /// Stride as a fraction of the window size
    #[arg(long)]
    stride_factor: Option<f32>,

    /// Drop clusters below this accumulated confidence
    #[arg(long)]
    min_confidence: Option<f32>,

    /// JSON output path (defaults next to the image)
    #[arg(long)]
    output_json: Option<PathBuf>,

    /// Write a PNG with the detections outlined
    #[arg(long)]
    output_png: Option<PathBuf>,
}

fn main() -> Result<()> {
    logger::init("info");
    let args = Args::parse();

    app::run_detection(&DetectConfig {
        cascade: args.cascade,
        image: args.image,
        min_size: args.min_size,
        max_size: args.max_size,
        scale_factor: args.scale_factor,
        stride_factor: args.stride_factor,
        min_confidence: args.min_confidence,
        output_json: args.output_json,
        output_png: args.output_png,
    })
}
