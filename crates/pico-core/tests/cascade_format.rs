use pico_core::tree::pack_test;
use pico_core::{Cascade, ImageView, Tree, SENTINEL_THRESHOLD};

/// Decode the raw file layout by hand so the test does not share code with
/// the implementation under test.
fn decode_header(bytes: &[u8]) -> (f32, f32, i32, i32) {
    let tsr = f32::from_le_bytes(bytes[0..4].try_into().unwrap());
    let tsc = f32::from_le_bytes(bytes[4..8].try_into().unwrap());
    let depth = i32::from_le_bytes(bytes[8..12].try_into().unwrap());
    let ntrees = i32::from_le_bytes(bytes[12..16].try_into().unwrap());
    (tsr, tsc, depth, ntrees)
}

#[test]
fn header_matches_the_wire_layout() {
    let cascade = Cascade::new(0.8, 1.25, 4);
    let mut bytes = Vec::new();
    cascade.write_to(&mut bytes).unwrap();

    assert_eq!(bytes.len(), 16);
    let (tsr, tsc, depth, ntrees) = decode_header(&bytes);
    assert_eq!(tsr, 0.8);
    assert_eq!(tsc, 1.25);
    assert_eq!(depth, 4);
    assert_eq!(ntrees, 0);
}

#[test]
fn tree_records_are_length_prefixed_blocks() {
    let mut cascade = Cascade::new(1.0, 1.0, 2);
    cascade.push_tree(
        Tree::new(
            vec![pack_test(1, 2, 3, 4), pack_test(-1, -2, -3, -4), 7],
            vec![0.5, -0.5, 0.25, -0.25],
        ),
        SENTINEL_THRESHOLD,
    );
    let mut bytes = Vec::new();
    cascade.write_to(&mut bytes).unwrap();

    // header + 3 codes + 4 leaves + threshold
    assert_eq!(bytes.len(), 16 + 4 * (3 + 4 + 1));

    let codes_at = 16;
    let code0 = i32::from_le_bytes(bytes[codes_at..codes_at + 4].try_into().unwrap());
    assert_eq!(code0, pack_test(1, 2, 3, 4));

    let threshold_at = bytes.len() - 4;
    let threshold = f32::from_le_bytes(bytes[threshold_at..].try_into().unwrap());
    assert_eq!(threshold, SENTINEL_THRESHOLD);
}

#[test]
fn roundtrip_preserves_bytes_and_behavior() {
    let mut cascade = Cascade::new(1.0, 1.0, 3);
    for i in 0..4i32 {
        let codes: Vec<i32> = (0..7).map(|j| i * 31 + j * 17 - 50).collect();
        let preds: Vec<f32> = (0..8).map(|j| (i + j) as f32 * 0.125 - 0.5).collect();
        let threshold = if i == 3 { -0.5 } else { SENTINEL_THRESHOLD };
        cascade.push_tree(Tree::new(codes, preds), threshold);
    }

    let mut bytes = Vec::new();
    cascade.write_to(&mut bytes).unwrap();
    let restored = Cascade::read_from(&mut bytes.as_slice()).unwrap();

    let mut again = Vec::new();
    restored.write_to(&mut again).unwrap();
    assert_eq!(bytes, again, "serialization must be byte-stable");

    // identical behavior on a handful of windows
    let pixels: Vec<u8> = (0..64u32 * 64).map(|i| (i * 37 % 251) as u8).collect();
    let img = ImageView::new(&pixels, 64, 64);
    for (r, c, s) in [(10, 10, 8), (32, 32, 20), (50, 12, 16)] {
        assert_eq!(
            cascade.classify_window(r, c, s, &img),
            restored.classify_window(r, c, s, &img)
        );
    }
}

#[test]
fn truncated_file_is_an_error() {
    let mut cascade = Cascade::new(1.0, 1.0, 2);
    cascade.push_tree(Tree::new(vec![0; 3], vec![0.0; 4]), -1.0);
    let mut bytes = Vec::new();
    cascade.write_to(&mut bytes).unwrap();
    bytes.truncate(bytes.len() - 5);
    assert!(Cascade::read_from(&mut bytes.as_slice()).is_err());
}
