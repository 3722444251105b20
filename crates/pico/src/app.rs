//! Shared application-level helpers for the CLI tools.
//!
//! These functions wire file I/O (training pack, cascade file, image
//! decode, JSON/PNG output) around the library APIs so the binaries stay
//! thin. Configs are serde structs, loadable from JSON and overridable by
//! command-line flags.

use crate::dataset::TrainingSet;
use crate::image::detect_objects_image;
use crate::stage::StageParams;
use crate::trainer::Trainer;
use anyhow::{Context, Result};
use image::{GrayImage, ImageReader, Luma};
use pico_core::{Cascade, Detection, ScanParams};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

/// Everything a training run needs.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TrainConfig {
    /// Packed training data file.
    pub data: PathBuf,
    /// Cascade output file.
    pub output: PathBuf,
    /// Row scale factor of the detection window.
    pub sr: f32,
    /// Column scale factor of the detection window.
    pub sc: f32,
    /// Tree depth.
    pub depth: u32,
    /// Single-stage true-positive target.
    pub tpr: f32,
    /// Single-stage false-positive target.
    pub fpr: f32,
    /// Single-stage tree budget.
    pub ntrees: usize,
    /// PRNG seed; `None` derives one from the clock.
    pub seed: Option<u32>,
    /// Mining worker count; `None` or 0 uses available parallelism.
    pub workers: Option<usize>,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            data: PathBuf::new(),
            output: PathBuf::new(),
            sr: 1.0,
            sc: 1.0,
            depth: 5,
            tpr: 0.0,
            fpr: 0.0,
            ntrees: 0,
            seed: None,
            workers: None,
        }
    }
}

impl TrainConfig {
    fn seed(&self) -> u32 {
        self.seed.unwrap_or_else(clock_seed)
    }

    fn workers(&self) -> usize {
        self.workers.unwrap_or(0)
    }
}

fn clock_seed() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(1)
}

/// Write an empty cascade with the configured geometry.
pub fn run_init(cfg: &TrainConfig) -> Result<()> {
    let cascade = Cascade::new(cfg.sr, cfg.sc, cfg.depth);
    cascade
        .save(&cfg.output)
        .with_context(|| format!("writing cascade {}", cfg.output.display()))?;
    info!(
        sr = cfg.sr,
        sc = cfg.sc,
        depth = cfg.depth,
        "initialized empty cascade"
    );
    Ok(())
}

/// Load (or create) the cascade, load the data, run one stage, save.
pub fn run_one_stage(cfg: &TrainConfig) -> Result<()> {
    let cascade = match Cascade::load(&cfg.output) {
        Ok(cascade) => cascade,
        Err(e) => {
            warn!(
                error = %e,
                path = %cfg.output.display(),
                "cannot load a cascade, creating a new one"
            );
            let cascade = Cascade::new(cfg.sr, cfg.sc, cfg.depth);
            cascade
                .save(&cfg.output)
                .with_context(|| format!("writing cascade {}", cfg.output.display()))?;
            cascade
        }
    };

    let pool = load_pool(&cfg.data)?;
    let mut trainer = Trainer::new(pool, cascade, cfg.seed(), cfg.workers());
    let params = StageParams {
        min_tpr: cfg.tpr,
        max_fpr: cfg.fpr,
        max_trees: cfg.ntrees,
    };
    trainer.sample_stage();
    trainer.learn_stage(&params)?;
    trainer
        .cascade()
        .save(&cfg.output)
        .with_context(|| format!("writing cascade {}", cfg.output.display()))?;
    Ok(())
}

/// Full default schedule with persistence after every stage.
pub fn run_training(cfg: &TrainConfig) -> Result<()> {
    let pool = load_pool(&cfg.data)?;
    let cascade = Cascade::new(cfg.sr, cfg.sc, cfg.depth);
    let output = cfg.output.clone();
    let mut trainer = Trainer::new(pool, cascade, cfg.seed(), cfg.workers());
    trainer.run_default_schedule(move |cascade| cascade.save(&output))?;
    Ok(())
}

fn load_pool(path: &Path) -> Result<TrainingSet> {
    let pool = TrainingSet::load(path)
        .with_context(|| format!("loading training data {}", path.display()))?;
    info!(
        images = pool.nimages(),
        background = pool.background().len(),
        objects = pool.objects().len(),
        "training data loaded"
    );
    Ok(pool)
}

/// Detection-tool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DetectConfig {
    /// Cascade file.
    pub cascade: PathBuf,
    /// Input image.
    pub image: PathBuf,
    pub min_size: Option<f32>,
    pub max_size: Option<f32>,
    pub scale_factor: Option<f32>,
    pub stride_factor: Option<f32>,
    /// Clusters below this confidence are dropped.
    pub min_confidence: Option<f32>,
    pub output_json: Option<PathBuf>,
    pub output_png: Option<PathBuf>,
}

#[derive(Serialize)]
pub struct DetectionOut {
    pub r: f32,
    pub c: f32,
    pub s: f32,
    pub q: f32,
}

#[derive(Serialize)]
pub struct DetectionDump {
    pub image: String,
    pub width: u32,
    pub height: u32,
    pub ntrees: usize,
    pub detections: Vec<DetectionOut>,
}

/// Run a cascade over one image; write a JSON dump and, when requested, a
/// PNG with the clustered windows outlined.
pub fn run_detection(cfg: &DetectConfig) -> Result<()> {
    let cascade = Cascade::load(&cfg.cascade)
        .with_context(|| format!("loading cascade {}", cfg.cascade.display()))?;
    let img = ImageReader::open(&cfg.image)
        .with_context(|| format!("opening image {}", cfg.image.display()))?
        .decode()
        .with_context(|| format!("decoding image {}", cfg.image.display()))?
        .to_luma8();

    let mut params = ScanParams::default();
    if let Some(v) = cfg.min_size {
        params.min_size = v;
    }
    if let Some(v) = cfg.max_size {
        params.max_size = v;
    }
    if let Some(v) = cfg.scale_factor {
        params.scale_factor = v;
    }
    if let Some(v) = cfg.stride_factor {
        params.stride_factor = v;
    }
    let mut clusters = detect_objects_image(&img, &cascade, &params);
    if let Some(min_confidence) = cfg.min_confidence {
        clusters.retain(|d| d.q >= min_confidence);
    }
    info!(detections = clusters.len(), "scan finished");

    let json_out = cfg
        .output_json
        .clone()
        .unwrap_or_else(|| cfg.image.with_extension("detections.json"));
    let dump = DetectionDump {
        image: cfg.image.to_string_lossy().into_owned(),
        width: img.width(),
        height: img.height(),
        ntrees: cascade.ntrees(),
        detections: clusters
            .iter()
            .map(|d| DetectionOut {
                r: d.r,
                c: d.c,
                s: d.s,
                q: d.q,
            })
            .collect(),
    };
    write_json(&json_out, &dump)?;

    if let Some(png_out) = &cfg.output_png {
        let mut vis = img.clone();
        for d in &clusters {
            draw_window(&mut vis, d);
        }
        vis.save(png_out)
            .with_context(|| format!("writing {}", png_out.display()))?;
    }

    Ok(())
}

/// Outline a detection window with a 1-px white square.
fn draw_window(vis: &mut GrayImage, d: &Detection) {
    let half = d.s / 2.0;
    let r0 = (d.r - half).round() as i64;
    let c0 = (d.c - half).round() as i64;
    let r1 = (d.r + half).round() as i64;
    let c1 = (d.c + half).round() as i64;
    let h = vis.height() as i64;
    let w = vis.width() as i64;

    let mut put = |r: i64, c: i64| {
        if r >= 0 && c >= 0 && r < h && c < w {
            vis.put_pixel(c as u32, r as u32, Luma([255u8]));
        }
    };
    for c in c0..=c1 {
        put(r0, c);
        put(r1, c);
    }
    for r in r0..=r1 {
        put(r, c0);
        put(r, c1);
    }
}

fn write_json(path: &Path, value: &impl Serialize) -> Result<()> {
    let mut file =
        File::create(path).with_context(|| format!("creating {}", path.display()))?;
    serde_json::to_writer_pretty(&mut file, value)?;
    file.write_all(b"\n")?;
    Ok(())
}

/// Load any of the config structs from a JSON file.
pub fn load_config<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path).with_context(|| format!("opening config {}", path.display()))?;
    let cfg = serde_json::from_reader(file)
        .with_context(|| format!("parsing config {}", path.display()))?;
    Ok(cfg)
}
