//! Pixel-pair binary tests and the depth-limited regression trees built on
//! them.
//!
//! A test code packs four signed 8-bit offsets `(dr1, dc1, dr2, dc2)` into
//! 32 bits (little-endian byte order). Applied at a window center `(r, c)`
//! with half-extents `(sr, sc)` it compares the intensities at two probe
//! points; a tree routes a window through one such test per level.

use crate::ImageView;

/// Evaluate a binary test code at `(r, c)` with half-extents `(sr, sc)`.
///
/// Probe coordinates are `(256*r + dr*sr) / 256` (truncating division) and
/// are clamped independently per axis into the image bounds, so windows
/// straddling the border are well defined. Returns 1 iff the first probe's
/// intensity is `<=` the second's; equal intensities take the 1 branch.
#[inline(always)]
pub fn bintest(tcode: i32, r: i32, c: i32, sr: i32, sc: i32, img: &ImageView<'_>) -> i32 {
    let p = tcode.to_le_bytes();
    let dr1 = p[0] as i8 as i32;
    let dc1 = p[1] as i8 as i32;
    let dr2 = p[2] as i8 as i32;
    let dc2 = p[3] as i8 as i32;

    let rmax = img.nrows() as i32 - 1;
    let cmax = img.ncols() as i32 - 1;

    let r1 = ((256 * r + dr1 * sr) / 256).clamp(0, rmax);
    let c1 = ((256 * c + dc1 * sc) / 256).clamp(0, cmax);
    let r2 = ((256 * r + dr2 * sr) / 256).clamp(0, rmax);
    let c2 = ((256 * c + dc2 * sc) / 256).clamp(0, cmax);

    (img.at(r1 as usize, c1 as usize) <= img.at(r2 as usize, c2 as usize)) as i32
}

/// Pack four signed 8-bit offsets into a test code.
#[inline]
pub fn pack_test(dr1: i8, dc1: i8, dr2: i8, dc2: i8) -> i32 {
    i32::from_le_bytes([dr1 as u8, dc1 as u8, dr2 as u8, dc2 as u8])
}

/// A perfect binary regression tree of fixed depth `d`: `2^d - 1` internal
/// test codes stored breadth-first (root at index 0) and `2^d` leaf outputs
/// in a parallel table.
#[derive(Clone, Debug, PartialEq)]
pub struct Tree {
    codes: Vec<i32>,
    preds: Vec<f32>,
}

impl Tree {
    /// Build a tree from its flat arrays. Panics unless the arrays describe
    /// a perfect tree (`preds.len()` a power of two, one fewer code).
    pub fn new(codes: Vec<i32>, preds: Vec<f32>) -> Self {
        assert!(preds.len().is_power_of_two(), "leaf count not a power of two");
        assert_eq!(
            codes.len(),
            preds.len() - 1,
            "internal node count does not match leaf count"
        );
        Self { codes, preds }
    }

    #[inline]
    pub fn depth(&self) -> u32 {
        self.preds.len().trailing_zeros()
    }

    #[inline]
    pub fn codes(&self) -> &[i32] {
        &self.codes
    }

    #[inline]
    pub fn preds(&self) -> &[f32] {
        &self.preds
    }

    /// Route a window down the tree and return the leaf output.
    ///
    /// The walk is 1-based: starting at 1, each level doubles the index and
    /// adds the test bit; after `depth` levels the leaf ordinal is
    /// `idx - 2^depth`.
    #[inline]
    pub fn output(&self, r: i32, c: i32, sr: i32, sc: i32, img: &ImageView<'_>) -> f32 {
        let nleaves = self.preds.len();
        let mut idx = 1usize;
        while idx < nleaves {
            idx = 2 * idx + bintest(self.codes[idx - 1], r, c, sr, sc, img) as usize;
        }
        self.preds[idx - nleaves]
    }
}
