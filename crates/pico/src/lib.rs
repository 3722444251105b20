//! Training pipeline for pixel-comparison decision-tree cascades.
//!
//! # Overview
//!
//! The crate turns a pool of annotated grayscale images into a cascade of
//! boosted regression trees:
//!
//! - [`dataset`] – decodes the packed training stream into images,
//!   background indices, and object windows.
//! - [`rng`] – the deterministic multiply-with-carry PRNG the whole run
//!   draws from.
//! - [`grow`] – grows one depth-limited tree per boosting round.
//! - [`stage`] – the boosting loop with stage-threshold calibration.
//! - [`sampler`] – refreshes positives and mines hard negatives against
//!   the current cascade.
//! - [`trainer`] – sequences stages and persists the cascade after each.
//! - [`image`], [`app`], [`logger`] – `GrayImage` adapters and the glue
//!   the CLI tools build on.
//!
//! The runtime half (tree evaluation, cascade model and file format,
//! multi-scale scanning, clustering) lives in `pico-core` and is
//! re-exported here for convenience.

pub mod app;
pub mod dataset;
pub mod grow;
pub mod image;
pub mod logger;
pub mod rng;
pub mod sampler;
pub mod stage;
pub mod trainer;

pub use pico_core::{
    cluster_detections, scan_windows, Cascade, Detection, ImageView, ScanParams, Tree,
    SENTINEL_THRESHOLD,
};

pub use crate::dataset::{ObjectWindow, TrainingSet};
pub use crate::rng::MwcRng;
pub use crate::sampler::SampleStats;
pub use crate::stage::{SampleSet, StageOutcome, StageParams, TrainError};
pub use crate::trainer::{Trainer, CONTINUATION_STAGE, DEFAULT_SCHEDULE, TARGET_FPR};
