//! Stage sample refresh: surviving positives and mined hard negatives.
//!
//! Positives are the annotated object windows that still pass the current
//! cascade; rejected ones drop out of training for good. Negatives are
//! false positives mined from the background pool by a team of workers,
//! each with its own persistent PRNG stream, until they match the positive
//! count. The ratio of accepted negatives to total draws estimates the
//! cascade's false-positive rate.

use crate::dataset::TrainingSet;
use crate::rng::MwcRng;
use crate::stage::SampleSet;
use pico_core::{Cascade, ImageView};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::Instant;
use tracing::{debug, info};

/// Estimates reported by a sampling pass.
#[derive(Clone, Copy, Debug)]
pub struct SampleStats {
    /// Fraction of annotated objects still accepted by the cascade.
    pub tpr_estimate: f32,
    /// Accepted negatives over total mining draws.
    pub fpr_estimate: f32,
    /// Total mining draws across all workers.
    pub draws: u64,
}

struct MinedNegative {
    r: i32,
    c: i32,
    s: i32,
    image: usize,
    o: f32,
}

/// Rebuild `set` against the current cascade.
///
/// Worker streams in `worker_rngs` advance and persist across calls, so a
/// training run is reproducible for a fixed seed and worker count (up to
/// the append interleaving of simultaneous workers).
pub fn sample_stage_set(
    set: &mut SampleSet,
    pool: &TrainingSet,
    cascade: &Cascade,
    worker_rngs: &mut [MwcRng],
) -> SampleStats {
    let started = Instant::now();
    let views = pool.views();

    set.clear();
    for obj in pool.objects() {
        if let Some(o) = cascade.classify_window(obj.r, obj.c, obj.s, &views[obj.image]) {
            set.push(obj.r, obj.c, obj.s, obj.image, 1.0, o);
        }
    }
    let npositives = set.npositives();

    let mut draws = 1u64;
    if npositives > 0 && !pool.background().is_empty() {
        let (negatives, ndraws) = mine_negatives(pool, &views, cascade, npositives, worker_rngs);
        draws = ndraws;
        for neg in negatives {
            set.push(neg.r, neg.c, neg.s, neg.image, -1.0, neg.o);
        }
    }

    let tpr_estimate = if pool.objects().is_empty() {
        0.0
    } else {
        npositives as f32 / pool.objects().len() as f32
    };
    let fpr_estimate = if draws > 0 {
        (set.nnegatives() as f64 / draws as f64) as f32
    } else {
        0.0
    };

    info!(
        elapsed_s = started.elapsed().as_secs_f32(),
        positives = npositives,
        negatives = set.nnegatives(),
        draws,
        tpr_estimate,
        fpr_estimate,
        "sampling finished"
    );

    SampleStats {
        tpr_estimate,
        fpr_estimate,
        draws,
    }
}

/// Mine false positives until `quota` of them are collected.
///
/// Shared state is one mutex-guarded accumulator plus an atomic stop flag;
/// draws are counted only while the flag is clear, matching the FPR
/// estimate's denominator.
fn mine_negatives(
    pool: &TrainingSet,
    views: &[ImageView<'_>],
    cascade: &Cascade,
    quota: usize,
    worker_rngs: &mut [MwcRng],
) -> (Vec<MinedNegative>, u64) {
    let found = Mutex::new(Vec::with_capacity(quota));
    let stop = AtomicBool::new(false);
    let ndraws = AtomicU64::new(0);

    thread::scope(|scope| {
        for rng in worker_rngs.iter_mut() {
            let found = &found;
            let stop = &stop;
            let ndraws = &ndraws;
            scope.spawn(move || {
                mine_worker(pool, views, cascade, quota, rng, found, stop, ndraws)
            });
        }
    });

    debug!(mined = found.lock().unwrap().len(), "mining workers joined");
    (found.into_inner().unwrap(), ndraws.load(Ordering::Relaxed))
}

#[allow(clippy::too_many_arguments)]
fn mine_worker(
    pool: &TrainingSet,
    views: &[ImageView<'_>],
    cascade: &Cascade,
    quota: usize,
    rng: &mut MwcRng,
    found: &Mutex<Vec<MinedNegative>>,
    stop: &AtomicBool,
    ndraws: &AtomicU64,
) {
    let background = pool.background();
    let objects = pool.objects();

    while !stop.load(Ordering::Acquire) {
        // a random background window sized like a random annotated object;
        // coordinates range over the full grid, border windows included
        let image = background[rng.below(background.len())];
        let view = &views[image];
        let r = rng.below(view.nrows()) as i32;
        let c = rng.below(view.ncols()) as i32;
        let s = objects[rng.below(objects.len())].s;

        if let Some(o) = cascade.classify_window(r, c, s, view) {
            let mut found = found.lock().unwrap();
            if found.len() < quota {
                found.push(MinedNegative { r, c, s, image, o });
            } else {
                stop.store(true, Ordering::Release);
            }
        }

        if !stop.load(Ordering::Acquire) {
            ndraws.fetch_add(1, Ordering::Relaxed);
        }
    }
}
