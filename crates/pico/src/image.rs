//! `image::GrayImage` adapters over the slice-based core.
//!
//! The core works on borrowed buffers; these wrappers are for consumers
//! that already hold decoded `GrayImage`s.

use image::GrayImage;
use pico_core::{cluster_detections, scan_windows, Cascade, Detection, ImageView, ScanParams};

/// Borrow a `GrayImage` as a core [`ImageView`].
#[inline]
pub fn view(img: &GrayImage) -> ImageView<'_> {
    ImageView::new(
        img.as_raw(),
        img.height() as usize,
        img.width() as usize,
    )
}

/// Scan a `GrayImage` with a cascade and return the raw detections.
pub fn find_objects_image(
    img: &GrayImage,
    cascade: &Cascade,
    params: &ScanParams,
) -> Vec<Detection> {
    let view = view(img);
    scan_windows(&view, params, |r, c, s| {
        cascade.classify_window(r, c, s, &view)
    })
}

/// Scan and cluster in one call.
pub fn detect_objects_image(
    img: &GrayImage,
    cascade: &Cascade,
    params: &ScanParams,
) -> Vec<Detection> {
    cluster_detections(&find_objects_image(img, cascade, params))
}
