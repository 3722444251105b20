//! Loader for the packed grayscale training stream.
//!
//! The stream is a sequence of records, each an image followed by its
//! annotations:
//!
//! ```text
//! i32 nrows ; i32 ncols ; u8[nrows*ncols] pixels (row-major)
//! i32 n_objects ; n_objects x (i32 r ; i32 c ; i32 s)
//! ```
//!
//! `n_objects == 0` marks a background image. Decoding stops at end of
//! stream; a truncated trailing record is dropped whole, as are records
//! whose declared dimensions or counts are implausible.

use byteorder::{LittleEndian, ReadBytesExt};
use pico_core::ImageView;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

/// Upper bound on pixels per image accepted from the stream.
const MAX_IMAGE_PIXELS: i64 = 1 << 28;
/// Upper bound on annotations per image accepted from the stream.
const MAX_OBJECTS_PER_IMAGE: i32 = 1 << 20;

/// One annotated object window: integer center `(r, c)`, nominal size `s`,
/// and the index of the owning image in the pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ObjectWindow {
    pub r: i32,
    pub c: i32,
    pub s: i32,
    pub image: usize,
}

/// An owned grayscale image in tightly packed row-major layout.
#[derive(Clone, Debug)]
pub struct GrayBuffer {
    nrows: usize,
    ncols: usize,
    pixels: Vec<u8>,
}

impl GrayBuffer {
    pub fn new(nrows: usize, ncols: usize, pixels: Vec<u8>) -> Self {
        assert_eq!(pixels.len(), nrows * ncols);
        Self {
            nrows,
            ncols,
            pixels,
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
    pub fn view(&self) -> ImageView<'_> {
        ImageView::new(&self.pixels, self.nrows, self.ncols)
    }
}

/// The training pool: every decoded image plus the background/object
/// partition of the annotations. Lives for the whole run; the sampler and
/// stage learner borrow views into it.
#[derive(Debug, Default)]
pub struct TrainingSet {
    images: Vec<GrayBuffer>,
    background: Vec<usize>,
    objects: Vec<ObjectWindow>,
}

impl TrainingSet {
    pub fn load(path: &Path) -> io::Result<Self> {
        let mut reader = BufReader::new(File::open(path)?);
        Self::read_from(&mut reader)
    }

    /// Decode records until end of stream.
    pub fn read_from<R: Read>(reader: &mut R) -> io::Result<Self> {
        let mut set = TrainingSet::default();
        while let Some(record) = read_record(reader)? {
            let index = set.images.len();
            set.images.push(record.image);
            if record.windows.is_empty() {
                set.background.push(index);
            } else {
                for (r, c, s) in record.windows {
                    set.objects.push(ObjectWindow {
                        r,
                        c,
                        s,
                        image: index,
                    });
                }
            }
        }
        Ok(set)
    }

    pub fn images(&self) -> &[GrayBuffer] {
        &self.images
    }

    /// Indices of images with no annotations.
    pub fn background(&self) -> &[usize] {
        &self.background
    }

    pub fn objects(&self) -> &[ObjectWindow] {
        &self.objects
    }

    pub fn nimages(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// Borrowed views of every image, indexable by `ObjectWindow::image`.
    pub fn views(&self) -> Vec<ImageView<'_>> {
        self.images.iter().map(|img| img.view()).collect()
    }
}

struct Record {
    image: GrayBuffer,
    windows: Vec<(i32, i32, i32)>,
}

/// Read one full record; `Ok(None)` on clean end of stream or a truncated /
/// implausible trailing record. Only I/O failures other than EOF propagate.
fn read_record<R: Read>(reader: &mut R) -> io::Result<Option<Record>> {
    let nrows = match read_i32_or_eof(reader)? {
        Some(v) => v,
        None => return Ok(None),
    };
    let ncols = match read_i32_or_eof(reader)? {
        Some(v) => v,
        None => return Ok(None),
    };
    if nrows <= 0 || ncols <= 0 || nrows as i64 * ncols as i64 > MAX_IMAGE_PIXELS {
        return Ok(None);
    }

    let npixels = nrows as usize * ncols as usize;
    let mut pixels = vec![0u8; npixels];
    if read_exact_or_eof(reader, &mut pixels)?.is_none() {
        return Ok(None);
    }

    let nobjects = match read_i32_or_eof(reader)? {
        Some(v) => v,
        None => return Ok(None),
    };
    if !(0..=MAX_OBJECTS_PER_IMAGE).contains(&nobjects) {
        return Ok(None);
    }

    let mut windows = Vec::with_capacity(nobjects as usize);
    for _ in 0..nobjects {
        let r = match read_i32_or_eof(reader)? {
            Some(v) => v,
            None => return Ok(None),
        };
        let c = match read_i32_or_eof(reader)? {
            Some(v) => v,
            None => return Ok(None),
        };
        let s = match read_i32_or_eof(reader)? {
            Some(v) => v,
            None => return Ok(None),
        };
        windows.push((r, c, s));
    }

    Ok(Some(Record {
        image: GrayBuffer::new(nrows as usize, ncols as usize, pixels),
        windows,
    }))
}

fn read_i32_or_eof<R: Read>(reader: &mut R) -> io::Result<Option<i32>> {
    match reader.read_i32::<LittleEndian>() {
        Ok(v) => Ok(Some(v)),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(e),
    }
}

fn read_exact_or_eof<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<Option<()>> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(Some(())),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn push_i32(buf: &mut Vec<u8>, v: i32) {
        buf.extend_from_slice(&v.to_le_bytes());
    }

    fn push_image(buf: &mut Vec<u8>, nrows: i32, ncols: i32, fill: u8, windows: &[(i32, i32, i32)]) {
        push_i32(buf, nrows);
        push_i32(buf, ncols);
        buf.extend(std::iter::repeat(fill).take((nrows * ncols) as usize));
        push_i32(buf, windows.len() as i32);
        for &(r, c, s) in windows {
            push_i32(buf, r);
            push_i32(buf, c);
            push_i32(buf, s);
        }
    }

    #[test]
    fn empty_stream_is_an_empty_set() {
        let set = TrainingSet::read_from(&mut Cursor::new(Vec::new())).unwrap();
        assert!(set.is_empty());
        assert!(set.background().is_empty());
        assert!(set.objects().is_empty());
    }

    #[test]
    fn partitions_background_and_objects() {
        let mut buf = Vec::new();
        push_image(&mut buf, 4, 6, 10, &[]);
        push_image(&mut buf, 8, 8, 20, &[(4, 4, 6), (2, 3, 4)]);
        push_image(&mut buf, 3, 3, 30, &[]);

        let set = TrainingSet::read_from(&mut Cursor::new(buf)).unwrap();
        assert_eq!(set.nimages(), 3);
        assert_eq!(set.background(), &[0, 2]);
        assert_eq!(
            set.objects(),
            &[
                ObjectWindow { r: 4, c: 4, s: 6, image: 1 },
                ObjectWindow { r: 2, c: 3, s: 4, image: 1 },
            ]
        );
        assert_eq!(set.images()[0].nrows(), 4);
        assert_eq!(set.images()[0].ncols(), 6);
        assert_eq!(set.images()[1].view().at(0, 0), 20);
    }

    #[test]
    fn truncated_trailing_record_is_dropped() {
        let mut buf = Vec::new();
        push_image(&mut buf, 4, 4, 1, &[]);
        // second record: header promises more pixels than the stream holds
        push_i32(&mut buf, 10);
        push_i32(&mut buf, 10);
        buf.extend_from_slice(&[0u8; 17]);

        let set = TrainingSet::read_from(&mut Cursor::new(buf)).unwrap();
        assert_eq!(set.nimages(), 1);
        assert_eq!(set.background(), &[0]);
    }

    #[test]
    fn truncated_annotation_list_drops_the_record() {
        let mut buf = Vec::new();
        push_i32(&mut buf, 2);
        push_i32(&mut buf, 2);
        buf.extend_from_slice(&[0u8; 4]);
        push_i32(&mut buf, 2); // promises two windows
        push_i32(&mut buf, 1); // but only half of one arrives
        let set = TrainingSet::read_from(&mut Cursor::new(buf)).unwrap();
        assert_eq!(set.nimages(), 0);
    }

    #[test]
    fn implausible_dimensions_end_the_stream() {
        let mut buf = Vec::new();
        push_image(&mut buf, 2, 2, 5, &[]);
        push_i32(&mut buf, -3);
        push_i32(&mut buf, 100);
        buf.extend_from_slice(&[0u8; 64]);

        let set = TrainingSet::read_from(&mut Cursor::new(buf)).unwrap();
        assert_eq!(set.nimages(), 1);
    }
}
