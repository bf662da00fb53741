use kiln_ir::HyperRectangle;
use smallvec::smallvec;
use test_case::test_case;

use crate::legalize::dense_strides;
use crate::{Error, LegalizedTile, legalize, minimize_rectangle};

fn rect(offset: &[usize], dims: &[usize]) -> HyperRectangle {
    HyperRectangle::new(offset.iter().copied(), dims.iter().copied()).unwrap()
}

#[test_case(&[32, 8], &[8, 0], &[8, 8], 8, true, 64, &[64], &[1]; "full_rows_merge")]
#[test_case(&[32, 8], &[0, 4], &[8, 4], 16, true, 8, &[8, 8], &[16, 1]; "partial_columns_int16")]
#[test_case(&[32, 8], &[0, 3], &[8, 1], 8, true, 3, &[8, 1], &[8, 1]; "single_column")]
#[test_case(&[4, 4], &[2, 3], &[1, 1], 8, true, 11, &[1], &[1]; "single_element")]
#[test_case(&[4, 1, 8], &[1, 0, 0], &[2, 1, 8], 8, true, 8, &[16], &[1]; "unit_middle_dimension")]
#[test_case(&[16], &[0], &[16], 4, true, 0, &[16], &[1]; "sub_byte_rounds_up")]
#[test_case(&[32, 8], &[1, 0], &[8, 4], 8, false, 8, &[32], &[1]; "outer_levels_flatten")]
#[test_case(&[32, 8], &[1, 0], &[8, 4], 32, false, 32, &[128], &[1]; "outer_levels_flatten_int32")]
#[allow(clippy::too_many_arguments)]
fn test_legalize_geometry(
    ext: &[usize],
    offset: &[usize],
    dims: &[usize],
    bits: usize,
    innermost: bool,
    expected_offset: usize,
    expected_shape: &[usize],
    expected_strides: &[usize],
) {
    let tiles = legalize("x", &[rect(offset, dims)], ext, bits, innermost).unwrap();
    assert_eq!(tiles.len(), 1);
    let tile = &tiles[0];
    assert_eq!(tile.offset, expected_offset);
    assert_eq!(tile.shape.as_slice(), expected_shape);
    assert_eq!(tile.ext_strides.as_slice(), expected_strides);
    assert_eq!(tile.loc_strides, dense_strides(expected_shape));
}

#[test]
fn test_minimize_keeps_element_granularity() {
    let tile = minimize_rectangle(&rect(&[0, 4], &[8, 4]), &[32, 8]);
    assert_eq!(
        tile,
        LegalizedTile { offset: 4, shape: smallvec![8, 4], ext_strides: smallvec![8, 1], loc_strides: smallvec![4, 1] }
    );
    assert_eq!(tile.rank(), 2);
    assert_eq!(tile.bytes(), 32);
}

#[test]
fn test_dense_strides() {
    assert_eq!(dense_strides(&[2, 3, 4]).as_slice(), &[12, 4, 1]);
    assert_eq!(dense_strides(&[5]).as_slice(), &[1]);
    assert!(dense_strides(&[]).is_empty());
}

#[test]
fn test_uniform_batch_shares_layout() {
    let rects = [rect(&[0, 0], &[8, 4]), rect(&[8, 4], &[8, 4]), rect(&[16, 0], &[4, 4])];
    let tiles = legalize("x", &rects, &[32, 8], 8, true).unwrap();
    assert_eq!(tiles.iter().map(|t| t.offset).collect::<Vec<_>>(), [0, 68, 128]);
    assert!(tiles.iter().all(|t| t.ext_strides.as_slice() == [8, 1]));
    assert_eq!(tiles[2].shape.as_slice(), &[4, 4]);
}

#[test]
fn test_layout_mismatch_is_rejected() {
    let rects = [rect(&[0, 0], &[8, 4]), rect(&[8, 0], &[8, 8])];
    let result = legalize("x", &rects, &[32, 8], 8, true);
    assert_eq!(
        result,
        Err(Error::LayoutMismatch { tensor: "x".into(), tile: 1, expected: vec![8, 1], actual: vec![1] })
    );
}

#[test]
fn test_flattened_batch_never_mismatches() {
    let rects = [rect(&[0, 0], &[8, 4]), rect(&[8, 0], &[8, 8])];
    let tiles = legalize("x", &rects, &[32, 8], 8, false).unwrap();
    assert_eq!(tiles[0].shape.as_slice(), &[32]);
    assert_eq!(tiles[1].shape.as_slice(), &[64]);
}

#[test]
fn test_rectangle_rank_must_match_tensor() {
    let result = legalize("x", &[rect(&[0], &[8])], &[32, 8], 8, true);
    assert_eq!(result, Err(Error::RectangleRank { tensor: "x".into(), rank: 1, expected: 2 }));
}
