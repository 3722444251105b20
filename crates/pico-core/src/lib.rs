//! Core primitives for pixel-comparison decision-tree cascades.
//!
//! # Overview
//!
//! This crate exposes the runtime half of the detector:
//!
//! - [`tree`] – the 32-bit pixel-pair binary test and depth-limited
//!   regression trees evaluated over it.
//! - [`cascade`] – an ordered sequence of trees with per-tree exit
//!   thresholds on the running output sum, plus its binary file format.
//! - [`detect`] – multi-scale sliding-window scanning and overlap-based
//!   clustering of raw detections.
//!
//! Everything operates on borrowed 8-bit grayscale buffers through
//! [`ImageView`]; decoding, training, and I/O conveniences live in higher
//! crates.
//!
//! # Features
//!
//! - `tracing` – instruments the clustering entry points with spans. The
//!   numerical results do not depend on this feature.

pub mod cascade;
pub mod detect;
pub mod tree;

pub use cascade::{Cascade, SENTINEL_THRESHOLD};
pub use detect::{cluster_detections, scan_windows, Detection, ScanParams};
pub use tree::Tree;

/// Borrowed view of an 8-bit grayscale image in row-major layout with an
/// explicit row stride (`ldim >= ncols`).
#[derive(Clone, Copy, Debug)]
pub struct ImageView<'a> {
    pixels: &'a [u8],
    nrows: usize,
    ncols: usize,
    ldim: usize,
}

impl<'a> ImageView<'a> {
    /// View over a tightly packed buffer (stride equals the width).
    pub fn new(pixels: &'a [u8], nrows: usize, ncols: usize) -> Self {
        Self::with_stride(pixels, nrows, ncols, ncols)
    }

    /// View with an explicit row stride. Panics if the buffer cannot hold
    /// `nrows` rows of `ncols` pixels at that stride.
    pub fn with_stride(pixels: &'a [u8], nrows: usize, ncols: usize, ldim: usize) -> Self {
        assert!(nrows > 0 && ncols > 0, "empty image");
        assert!(ldim >= ncols, "row stride shorter than a row");
        assert!(
            pixels.len() >= (nrows - 1) * ldim + ncols,
            "pixel buffer too short for {nrows}x{ncols} (ldim {ldim})"
        );
        Self {
            pixels,
            nrows,
            ncols,
            ldim,
        }
    }

    #[inline]
    pub fn nrows(&self) -> usize {
        self.nrows
    }

    #[inline]
    pub fn ncols(&self) -> usize {
        self.ncols
    }

    #[inline]
    pub fn ldim(&self) -> usize {
        self.ldim
    }

    /// Intensity at an integer coordinate. No bounds checks beyond the
    /// slice's own; callers clamp coordinates first.
    #[inline(always)]
    pub fn at(&self, r: usize, c: usize) -> u8 {
        self.pixels[r * self.ldim + c]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn view_respects_stride() {
        let pixels = [1u8, 2, 0, 3, 4, 0];
        let view = ImageView::with_stride(&pixels, 2, 2, 3);
        assert_eq!(view.at(0, 1), 2);
        assert_eq!(view.at(1, 0), 3);
        assert_eq!(view.at(1, 1), 4);
    }

    #[test]
    #[should_panic(expected = "too short")]
    fn view_rejects_short_buffer() {
        let pixels = [0u8; 5];
        let _ = ImageView::new(&pixels, 2, 3);
    }
}
