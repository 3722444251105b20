//! Greedy growth of depth-limited regression trees with randomized
//! pixel-pair tests.
//!
//! Each internal node draws a fixed number of candidate test codes from the
//! global PRNG, scores every candidate's weighted-MSE split loss (a
//! parallel-for over the candidates), keeps the best, and partitions its
//! sample subset in place before recursing. The resulting tree is always
//! perfect: degenerate subsets emit zero codes and propagate unchanged.

use crate::rng::MwcRng;
use pico_core::tree::{bintest, Tree};
use pico_core::ImageView;
use rayon::prelude::*;

/// Number of candidate test codes scored at every internal node.
pub const NRANDS: usize = 1024;

/// Borrowed parallel arrays describing the training samples of one stage.
///
/// `iinds[i]` indexes `images`; `srs`/`scs` are the precomputed window
/// half-extents; `ws` are the boosting weights (normalized to sum 1 before
/// every tree).
#[derive(Clone, Copy)]
pub struct TrainSamples<'a> {
    pub images: &'a [ImageView<'a>],
    pub tvals: &'a [f32],
    pub rs: &'a [i32],
    pub cs: &'a [i32],
    pub srs: &'a [i32],
    pub scs: &'a [i32],
    pub iinds: &'a [usize],
    pub ws: &'a [f64],
}

impl TrainSamples<'_> {
    #[inline]
    fn test(&self, tcode: i32, i: usize) -> bool {
        bintest(
            tcode,
            self.rs[i],
            self.cs[i],
            self.srs[i],
            self.scs[i],
            &self.images[self.iinds[i]],
        ) == 1
    }
}

/// Weighted-MSE loss of splitting `inds` with `tcode`.
///
/// Per side k: `wmse_k = sum(w*t^2) - sum(w*t)^2 / sum(w)`, zero for an
/// empty side so a degenerate split scores exactly the unsplit impurity
/// and never beats an informative candidate. The total is normalized by
/// the subset weight.
fn split_error(samples: &TrainSamples<'_>, tcode: i32, inds: &[usize]) -> f32 {
    let mut wsum0 = 0.0f64;
    let mut wsum1 = 0.0f64;
    let mut wtval0 = 0.0f64;
    let mut wtval1 = 0.0f64;
    let mut wtvalsqr0 = 0.0f64;
    let mut wtvalsqr1 = 0.0f64;

    for &i in inds {
        let w = samples.ws[i];
        let t = samples.tvals[i] as f64;
        if samples.test(tcode, i) {
            wsum1 += w;
            wtval1 += w * t;
            wtvalsqr1 += w * t * t;
        } else {
            wsum0 += w;
            wtval0 += w * t;
            wtvalsqr0 += w * t * t;
        }
    }

    let wmse0 = if wsum0 > 0.0 {
        wtvalsqr0 - wtval0 * wtval0 / wsum0
    } else {
        0.0
    };
    let wmse1 = if wsum1 > 0.0 {
        wtvalsqr1 - wtval1 * wtval1 / wsum1
    } else {
        0.0
    };

    ((wmse0 + wmse1) / (wsum0 + wsum1)) as f32
}

/// Partition `inds` in place so samples whose test evaluates to 0 form the
/// prefix. Returns the prefix length. Order within a side is unspecified.
fn partition(samples: &TrainSamples<'_>, tcode: i32, inds: &mut [usize]) -> usize {
    if inds.is_empty() {
        return 0;
    }
    let mut i = 0usize;
    let mut j = inds.len() - 1;
    loop {
        while !samples.test(tcode, inds[i]) {
            if i == j {
                break;
            }
            i += 1;
        }
        while samples.test(tcode, inds[j]) {
            if i == j {
                break;
            }
            j -= 1;
        }
        if i == j {
            break;
        }
        inds.swap(i, j);
    }
    inds.iter().filter(|&&k| !samples.test(tcode, k)).count()
}

/// Grow one depth-`depth` tree over the samples selected by `inds`.
///
/// `inds` is reordered in place during growth. Candidate codes are drawn
/// from `rng` serially (one shared sequence); only their scoring runs in
/// parallel, so the grown tree depends on the PRNG state alone.
pub fn grow_tree(
    samples: &TrainSamples<'_>,
    depth: u32,
    inds: &mut [usize],
    rng: &mut MwcRng,
) -> Tree {
    let nleaves = 1usize << depth;
    let mut codes = vec![0i32; nleaves - 1];
    let mut preds = vec![0.0f32; nleaves];
    grow_subtree(samples, &mut codes, &mut preds, 0, 0, depth, inds, rng);
    Tree::new(codes, preds)
}

#[allow(clippy::too_many_arguments)]
fn grow_subtree(
    samples: &TrainSamples<'_>,
    codes: &mut [i32],
    preds: &mut [f32],
    node: usize,
    d: u32,
    maxd: u32,
    inds: &mut [usize],
    rng: &mut MwcRng,
) {
    if d == maxd {
        // leaf: weighted mean of the targets, zero on zero subset weight
        let leaf = node - (preds.len() - 1);
        let mut acc = 0.0f64;
        let mut wsum = 0.0f64;
        for &i in inds.iter() {
            acc += samples.ws[i] * samples.tvals[i] as f64;
            wsum += samples.ws[i];
        }
        preds[leaf] = if wsum == 0.0 { 0.0 } else { (acc / wsum) as f32 };
        return;
    }

    if inds.len() <= 1 {
        // too small to split; a zero code keeps the perfect shape and both
        // children inherit the subset unchanged
        codes[node] = 0;
        grow_subtree(samples, codes, preds, 2 * node + 1, d + 1, maxd, inds, rng);
        grow_subtree(samples, codes, preds, 2 * node + 2, d + 1, maxd, inds, rng);
        return;
    }

    let candidates: Vec<i32> = (0..NRANDS).map(|_| rng.next_u32() as i32).collect();
    let subset: &[usize] = &*inds;
    let errors: Vec<f32> = candidates
        .par_iter()
        .map(|&tcode| split_error(samples, tcode, subset))
        .collect();

    // serial argmin; ties keep the earliest candidate
    let mut best = 0usize;
    for i in 1..errors.len() {
        if errors[i] < errors[best] {
            best = i;
        }
    }
    codes[node] = candidates[best];

    let n0 = partition(samples, codes[node], inds);
    let (left, right) = inds.split_at_mut(n0);
    grow_subtree(samples, codes, preds, 2 * node + 1, d + 1, maxd, left, rng);
    grow_subtree(samples, codes, preds, 2 * node + 2, d + 1, maxd, right, rng);
}
