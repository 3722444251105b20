//! Multi-scale sliding-window scanning and overlap-based clustering.
//!
//! The scanner walks a geometric ladder of window sizes over the image and
//! hands each candidate window to an injected classifier: any callable that
//! maps a window `(r, c, s)` to `Some(confidence)` for survivors. Raw
//! detections from all scales are then agglomerated by connected components
//! of the overlap graph.

use crate::ImageView;
#[cfg(feature = "tracing")]
use tracing::instrument;

/// A detection window: center `(r, c)`, nominal size `s`, confidence `q`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Detection {
    pub r: f32,
    pub c: f32,
    pub s: f32,
    pub q: f32,
}

/// Parameters for the multi-scale window scan.
#[derive(Clone, Debug)]
pub struct ScanParams {
    /// Smallest window size evaluated.
    pub min_size: f32,
    /// Scanning stops once the ladder exceeds this size.
    pub max_size: f32,
    /// Geometric growth factor between consecutive scales.
    pub scale_factor: f32,
    /// Window stride as a fraction of the current size (floored at 1 px).
    pub stride_factor: f32,
    /// Hard cap on recorded raw detections.
    pub max_detections: usize,
}

impl Default for ScanParams {
    fn default() -> Self {
        Self {
            min_size: 100.0,
            max_size: 1000.0,
            scale_factor: 1.1,
            stride_factor: 0.1,
            max_detections: 2048,
        }
    }
}

/// Two detections are clustered together when their overlap exceeds this.
const OVERLAP_THRESHOLD: f32 = 0.3;

/// Scan every scale of the ladder across the image.
///
/// Only windows fully inside the image (with a half-size margin) are
/// evaluated; the classifier receives the window center and size truncated
/// to integers. Recording stops at `max_detections` survivors.
pub fn scan_windows<F>(img: &ImageView<'_>, params: &ScanParams, mut classify: F) -> Vec<Detection>
where
    F: FnMut(i32, i32, i32) -> Option<f32>,
{
    let nrows = img.nrows() as f32;
    let ncols = img.ncols() as f32;

    let mut detections = Vec::new();
    let mut s = params.min_size;
    while s <= params.max_size {
        let step = (params.stride_factor * s).max(1.0);
        let margin = s / 2.0 + 1.0;

        let mut r = margin;
        while r <= nrows - margin {
            let mut c = margin;
            while c <= ncols - margin {
                if detections.len() >= params.max_detections {
                    return detections;
                }
                if let Some(q) = classify(r as i32, c as i32, s as i32) {
                    detections.push(Detection { r, c, s, q });
                }
                c += step;
            }
            r += step;
        }

        s *= params.scale_factor;
    }
    detections
}

/// Overlap measure between two square windows: intersection area over
/// `s1^2 + s2^2 - intersection`. The union term intentionally uses the full
/// squared sizes rather than the window areas; persisted models are scored
/// against exactly this quantity.
#[inline]
pub fn overlap(a: &Detection, b: &Detection) -> f32 {
    let overr = ((a.r + a.s / 2.0).min(b.r + b.s / 2.0) - (a.r - a.s / 2.0).max(b.r - b.s / 2.0))
        .max(0.0);
    let overc = ((a.c + a.s / 2.0).min(b.c + b.s / 2.0) - (a.c - a.s / 2.0).max(b.c - b.s / 2.0))
        .max(0.0);
    let inter = overr * overc;
    inter / (a.s * a.s + b.s * b.s - inter)
}

/// Label detections with 1-based connected-component ids over the overlap
/// graph. Returns the labels and the component count.
fn connected_components(detections: &[Detection]) -> (Vec<u32>, usize) {
    let mut labels = vec![0u32; detections.len()];
    let mut ncomponents = 0usize;
    let mut stack = Vec::new();

    for i in 0..detections.len() {
        if labels[i] != 0 {
            continue;
        }
        ncomponents += 1;
        let id = ncomponents as u32;
        labels[i] = id;
        stack.push(i);
        // depth-first flood over overlapping neighbors
        while let Some(k) = stack.pop() {
            for j in 0..detections.len() {
                if labels[j] == 0 && overlap(&detections[k], &detections[j]) > OVERLAP_THRESHOLD {
                    labels[j] = id;
                    stack.push(j);
                }
            }
        }
    }

    (labels, ncomponents)
}

/// Collapse each connected component of overlapping detections into a
/// single one: arithmetic-mean window, summed confidence.
#[cfg_attr(feature = "tracing", instrument(level = "debug", skip(detections)))]
pub fn cluster_detections(detections: &[Detection]) -> Vec<Detection> {
    let (labels, ncomponents) = connected_components(detections);

    let mut out = Vec::with_capacity(ncomponents);
    for id in 1..=ncomponents as u32 {
        let mut r = 0.0f32;
        let mut c = 0.0f32;
        let mut s = 0.0f32;
        let mut q = 0.0f32;
        let mut count = 0usize;
        for (det, &label) in detections.iter().zip(&labels) {
            if label != id {
                continue;
            }
            r += det.r;
            c += det.c;
            s += det.s;
            q += det.q;
            count += 1;
        }
        let count = count as f32;
        out.push(Detection {
            r: r / count,
            c: c / count,
            s: s / count,
            q,
        });
    }
    out
}
