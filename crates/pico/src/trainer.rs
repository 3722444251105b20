//! Training driver: owns the pool, the cascade, and the PRNG streams, and
//! sequences sampling and stage learning.
//!
//! The default schedule mints four stages with escalating true-positive
//! targets, then keeps appending 64-tree stages until the sampled
//! false-positive estimate drops below the global target. The cascade is
//! persisted after every stage so an interrupted run keeps its progress.

use crate::dataset::TrainingSet;
use crate::rng::MwcRng;
use crate::sampler::{sample_stage_set, SampleStats};
use crate::stage::{learn_stage, SampleSet, StageOutcome, StageParams, TrainError};
use pico_core::Cascade;
use std::io;
use std::thread;
use tracing::info;

/// Fixed opening stages of the default schedule.
pub const DEFAULT_SCHEDULE: [StageParams; 4] = [
    StageParams { min_tpr: 0.980, max_fpr: 0.5, max_trees: 4 },
    StageParams { min_tpr: 0.985, max_fpr: 0.5, max_trees: 8 },
    StageParams { min_tpr: 0.990, max_fpr: 0.5, max_trees: 16 },
    StageParams { min_tpr: 0.995, max_fpr: 0.5, max_trees: 32 },
];

/// Stage repeated until the false-positive estimate reaches the target.
pub const CONTINUATION_STAGE: StageParams = StageParams {
    min_tpr: 0.9975,
    max_fpr: 0.5,
    max_trees: 64,
};

/// Sampling FPR estimate at which the default schedule stops.
pub const TARGET_FPR: f32 = 1e-6;

/// Training context: every buffer of the run lives here for its duration.
pub struct Trainer {
    pool: TrainingSet,
    cascade: Cascade,
    set: SampleSet,
    rng: MwcRng,
    worker_rngs: Vec<MwcRng>,
}

impl Trainer {
    /// Build a trainer around a loaded pool and a (possibly empty) cascade.
    ///
    /// `workers` sizes the mining team; pass 0 to use the machine's
    /// available parallelism. Worker streams are derived from the seed once
    /// and persist across stages.
    pub fn new(pool: TrainingSet, cascade: Cascade, seed: u32, workers: usize) -> Self {
        let workers = if workers > 0 {
            workers
        } else {
            thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
        };
        let mut rng = MwcRng::new(seed);
        let worker_rngs = (0..workers).map(|_| rng.spawn_stream()).collect();
        Self {
            pool,
            cascade,
            set: SampleSet::new(),
            rng,
            worker_rngs,
        }
    }

    pub fn cascade(&self) -> &Cascade {
        &self.cascade
    }

    pub fn pool(&self) -> &TrainingSet {
        &self.pool
    }

    /// Refresh the stage samples against the current cascade.
    pub fn sample_stage(&mut self) -> SampleStats {
        sample_stage_set(&mut self.set, &self.pool, &self.cascade, &mut self.worker_rngs)
    }

    /// Run one boosting stage over the current samples.
    pub fn learn_stage(&mut self, params: &StageParams) -> Result<StageOutcome, TrainError> {
        let views = self.pool.views();
        learn_stage(&mut self.cascade, &views, &mut self.set, params, &mut self.rng)
    }

    /// Sample, learn one stage, and hand the cascade to `persist`.
    pub fn run_stage(
        &mut self,
        params: &StageParams,
        persist: &mut dyn FnMut(&Cascade) -> io::Result<()>,
    ) -> Result<StageOutcome, TrainError> {
        self.sample_stage();
        let outcome = self.learn_stage(params)?;
        persist(&self.cascade)?;
        Ok(outcome)
    }

    /// The full default schedule, persisting after every stage.
    pub fn run_default_schedule(
        &mut self,
        mut persist: impl FnMut(&Cascade) -> io::Result<()>,
    ) -> Result<(), TrainError> {
        // persist the starting point first so the output file exists even
        // if the first stage fails
        persist(&self.cascade)?;

        for (i, params) in DEFAULT_SCHEDULE.iter().enumerate() {
            info!(stage = i + 1, min_tpr = params.min_tpr, "learning stage");
            self.run_stage(params, &mut persist)?;
        }

        loop {
            let stats = self.sample_stage();
            if stats.fpr_estimate <= TARGET_FPR {
                break;
            }
            info!(
                fpr_estimate = stats.fpr_estimate,
                min_tpr = CONTINUATION_STAGE.min_tpr,
                "learning continuation stage"
            );
            self.learn_stage(&CONTINUATION_STAGE)?;
            persist(&self.cascade)?;
        }

        info!("target false-positive rate reached");
        Ok(())
    }
}
