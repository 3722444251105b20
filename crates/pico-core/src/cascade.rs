//! The cascade model and its length-prefixed binary file format.
//!
//! A cascade couples a window geometry (independent row and column scale
//! factors applied to the nominal window size) with an ordered sequence of
//! regression trees. Each tree carries an exit threshold on the running
//! output sum; classification short-circuits as soon as the sum falls to or
//! below a threshold. Trees appended mid-stage hold [`SENTINEL_THRESHOLD`]
//! so only the last tree of a finished stage can reject.
//!
//! File layout (little-endian, bit-exact across save/load):
//!
//! ```text
//! f32 tsr ; f32 tsc ; i32 tdepth ; i32 ntrees
//! per tree: i32[2^tdepth - 1] codes ; f32[2^tdepth] leaves ; f32 threshold
//! ```

use crate::tree::Tree;
use crate::ImageView;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Threshold that never rejects: running sums stay far above it.
pub const SENTINEL_THRESHOLD: f32 = -1337.0;

/// Caps accepted when reading a cascade file.
const MAX_DEPTH: u32 = 20;
const MAX_TREES: usize = 4096;

/// An ordered sequence of regression trees with per-tree exit thresholds.
#[derive(Clone, Debug, PartialEq)]
pub struct Cascade {
    tsr: f32,
    tsc: f32,
    depth: u32,
    trees: Vec<Tree>,
    thresholds: Vec<f32>,
}

impl Cascade {
    /// An empty cascade with the given window geometry and tree depth.
    pub fn new(tsr: f32, tsc: f32, depth: u32) -> Self {
        assert!(depth <= MAX_DEPTH, "tree depth {depth} out of range");
        Self {
            tsr,
            tsc,
            depth,
            trees: Vec::new(),
            thresholds: Vec::new(),
        }
    }

    #[inline]
    pub fn tsr(&self) -> f32 {
        self.tsr
    }

    #[inline]
    pub fn tsc(&self) -> f32 {
        self.tsc
    }

    #[inline]
    pub fn depth(&self) -> u32 {
        self.depth
    }

    #[inline]
    pub fn ntrees(&self) -> usize {
        self.trees.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.trees.is_empty()
    }

    pub fn trees(&self) -> &[Tree] {
        &self.trees
    }

    pub fn thresholds(&self) -> &[f32] {
        &self.thresholds
    }

    /// Window half-extents for a nominal size `s` under this geometry
    /// (truncating, like the rest of the integer window arithmetic).
    #[inline]
    pub fn window_extents(&self, s: i32) -> (i32, i32) {
        ((self.tsr * s as f32) as i32, (self.tsc * s as f32) as i32)
    }

    /// Append a tree with the given exit threshold.
    pub fn push_tree(&mut self, tree: Tree, threshold: f32) {
        assert_eq!(tree.depth(), self.depth, "tree depth mismatch");
        self.trees.push(tree);
        self.thresholds.push(threshold);
    }

    /// Replace the last tree's threshold. No-op on an empty cascade.
    pub fn set_last_threshold(&mut self, threshold: f32) {
        if let Some(last) = self.thresholds.last_mut() {
            *last = threshold;
        }
    }

    /// Run the cascade over one window.
    ///
    /// Returns the accumulated output when every threshold is cleared and
    /// `None` as soon as the running sum drops to or below one. An empty
    /// cascade accepts everything with output 0.
    pub fn classify_window(&self, r: i32, c: i32, s: i32, img: &ImageView<'_>) -> Option<f32> {
        let (sr, sc) = self.window_extents(s);
        let mut o = 0.0f32;
        for (tree, &threshold) in self.trees.iter().zip(&self.thresholds) {
            o += tree.output(r, c, sr, sc, img);
            if o <= threshold {
                return None;
            }
        }
        Some(o)
    }

    /// Serialize in the binary file layout.
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_f32::<LittleEndian>(self.tsr)?;
        w.write_f32::<LittleEndian>(self.tsc)?;
        w.write_i32::<LittleEndian>(self.depth as i32)?;
        w.write_i32::<LittleEndian>(self.trees.len() as i32)?;
        for (tree, &threshold) in self.trees.iter().zip(&self.thresholds) {
            for &code in tree.codes() {
                w.write_i32::<LittleEndian>(code)?;
            }
            for &pred in tree.preds() {
                w.write_f32::<LittleEndian>(pred)?;
            }
            w.write_f32::<LittleEndian>(threshold)?;
        }
        Ok(())
    }

    /// Deserialize from the binary file layout, validating the header
    /// bounds before allocating.
    pub fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        let tsr = r.read_f32::<LittleEndian>()?;
        let tsc = r.read_f32::<LittleEndian>()?;
        let depth = r.read_i32::<LittleEndian>()?;
        let ntrees = r.read_i32::<LittleEndian>()?;

        if depth < 0 || depth as u32 > MAX_DEPTH {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("tree depth {depth} out of range"),
            ));
        }
        if ntrees < 0 || ntrees as usize > MAX_TREES {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("tree count {ntrees} out of range"),
            ));
        }

        let depth = depth as u32;
        let nleaves = 1usize << depth;
        let mut cascade = Cascade::new(tsr, tsc, depth);
        for _ in 0..ntrees {
            let mut codes = vec![0i32; nleaves - 1];
            r.read_i32_into::<LittleEndian>(&mut codes)?;
            let mut preds = vec![0.0f32; nleaves];
            r.read_f32_into::<LittleEndian>(&mut preds)?;
            let threshold = r.read_f32::<LittleEndian>()?;
            cascade.push_tree(Tree::new(codes, preds), threshold);
        }
        Ok(cascade)
    }

    pub fn save(&self, path: &Path) -> io::Result<()> {
        let mut w = BufWriter::new(File::create(path)?);
        self.write_to(&mut w)?;
        w.flush()
    }

    pub fn load(path: &Path) -> io::Result<Self> {
        let mut r = BufReader::new(File::open(path)?);
        Self::read_from(&mut r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::pack_test;

    fn sample_cascade() -> Cascade {
        let mut cascade = Cascade::new(1.0, 0.75, 2);
        cascade.push_tree(
            Tree::new(vec![pack_test(1, 2, 3, 4), 0, -1], vec![0.1, -0.2, 0.3, -0.4]),
            SENTINEL_THRESHOLD,
        );
        cascade.push_tree(
            Tree::new(vec![5, 6, 7], vec![-1.0, 1.0, 0.5, -0.5]),
            0.25,
        );
        cascade
    }

    #[test]
    fn empty_cascade_serializes_to_header_only() {
        let cascade = Cascade::new(1.0, 1.0, 3);
        let mut buf = Vec::new();
        cascade.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), 16);
        assert_eq!(&buf[0..4], &1.0f32.to_le_bytes());
        assert_eq!(&buf[4..8], &1.0f32.to_le_bytes());
        assert_eq!(&buf[8..12], &3i32.to_le_bytes());
        assert_eq!(&buf[12..16], &0i32.to_le_bytes());
    }

    #[test]
    fn roundtrip_is_byte_identical() {
        let cascade = sample_cascade();
        let mut bytes = Vec::new();
        cascade.write_to(&mut bytes).unwrap();

        let restored = Cascade::read_from(&mut bytes.as_slice()).unwrap();
        assert_eq!(restored, cascade);

        let mut again = Vec::new();
        restored.write_to(&mut again).unwrap();
        assert_eq!(again, bytes);
    }

    #[test]
    fn read_rejects_bad_header() {
        let mut bytes = Vec::new();
        Cascade::new(1.0, 1.0, 5).write_to(&mut bytes).unwrap();
        bytes[8..12].copy_from_slice(&99i32.to_le_bytes());
        let err = Cascade::read_from(&mut bytes.as_slice()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn empty_cascade_accepts_everything() {
        let cascade = Cascade::new(1.0, 1.0, 5);
        let pixels = vec![0u8; 16];
        let img = ImageView::new(&pixels, 4, 4);
        assert_eq!(cascade.classify_window(2, 2, 2, &img), Some(0.0));
    }

    #[test]
    fn single_tree_survival_and_confidence() {
        // one depth-1 tree whose test always takes the 1 branch (code zero
        // compares a pixel with itself) and whose leaves are [-0.5, +0.5]
        let mut cascade = Cascade::new(1.0, 1.0, 1);
        cascade.push_tree(Tree::new(vec![0], vec![-0.5, 0.5]), SENTINEL_THRESHOLD);

        let pixels = vec![128u8; 100];
        let img = ImageView::new(&pixels, 10, 10);
        assert_eq!(cascade.classify_window(5, 5, 4, &img), Some(0.5));
    }

    #[test]
    fn running_sum_rejects_at_threshold() {
        let mut cascade = Cascade::new(1.0, 1.0, 1);
        cascade.push_tree(Tree::new(vec![0], vec![0.0, 0.5]), 0.5);
        let pixels = vec![0u8; 16];
        let img = ImageView::new(&pixels, 4, 4);
        // o == threshold rejects (strict > required to pass)
        assert_eq!(cascade.classify_window(1, 1, 1, &img), None);
    }

    #[test]
    fn set_last_threshold_replaces_sentinel() {
        let mut cascade = sample_cascade();
        cascade.set_last_threshold(-0.75);
        assert_eq!(*cascade.thresholds().last().unwrap(), -0.75);
    }

    #[test]
    fn window_extents_truncate() {
        let cascade = Cascade::new(0.9, 1.1, 1);
        assert_eq!(cascade.window_extents(10), (9, 11));
        assert_eq!(cascade.window_extents(3), (2, 3));
    }
}
