use std::collections::BTreeSet;

use kiln_ir::HyperRectangle;
use proptest::prelude::*;

use crate::legalize::dense_strides;
use crate::{LegalizedTile, legalize, minimize_rectangle};

/// A tensor shape and a rectangle inside it.
fn shape_and_rect() -> impl Strategy<Value = (Vec<usize>, HyperRectangle)> {
    prop::collection::vec(1usize..=6, 1..=4).prop_flat_map(|shape| {
        let dims: Vec<_> = shape.iter().map(|&d| (0..d).prop_flat_map(move |o| (Just(o), 1..=d - o))).collect();
        (Just(shape), dims).prop_map(|(shape, dims)| {
            let (offset, extent): (Vec<_>, Vec<_>) = dims.into_iter().unzip();
            (shape, HyperRectangle::new(offset, extent).unwrap())
        })
    })
}

/// A tensor shape and a batch of equally sized rectangles inside it.
fn shape_and_batch() -> impl Strategy<Value = (Vec<usize>, Vec<HyperRectangle>)> {
    prop::collection::vec(1usize..=6, 1..=4)
        .prop_flat_map(|shape| {
            let extents: Vec<_> = shape.iter().map(|&d| 1..=d).collect();
            (Just(shape), extents)
        })
        .prop_flat_map(|(shape, extents)| {
            let offset: Vec<_> = shape.iter().zip(&extents).map(|(&d, &e)| 0..=d - e).collect();
            let rects = prop::collection::vec(offset, 1..5).prop_map(move |offsets| {
                offsets.into_iter().map(|o| HyperRectangle::new(o, extents.clone()).unwrap()).collect::<Vec<_>>()
            });
            (Just(shape), rects)
        })
}

fn addresses(offset: usize, shape: &[usize], strides: &[usize]) -> Vec<usize> {
    shape.iter().zip(strides).fold(vec![offset], |acc, (&n, &s)| {
        acc.into_iter().flat_map(|a| (0..n).map(move |j| a + j * s)).collect()
    })
}

proptest! {
    #[test]
    fn legalization_conserves_bytes(
        (shape, rects) in shape_and_batch(),
        bits in prop::sample::select(vec![4usize, 8, 16, 32]),
        innermost in any::<bool>(),
    ) {
        let tiles = legalize("x", &rects, &shape, bits, innermost).unwrap();
        prop_assert_eq!(tiles.len(), rects.len());

        let elements: usize = rects.iter().map(HyperRectangle::num_elements).sum();
        prop_assert_eq!(tiles.iter().map(LegalizedTile::bytes).sum::<usize>(), elements * bits.div_ceil(8));
        for tile in &tiles {
            prop_assert_eq!(&tile.ext_strides, &tiles[0].ext_strides);
            prop_assert_eq!(tile.ext_strides.last().copied(), Some(1));
            prop_assert_eq!(&tile.loc_strides, &dense_strides(&tile.shape));
        }
    }

    #[test]
    fn minimization_covers_the_same_elements((shape, rect) in shape_and_rect()) {
        let strides = dense_strides(&shape);
        let base = rect.offset.iter().zip(&strides).map(|(o, s)| o * s).sum();
        let expected: BTreeSet<_> = addresses(base, &rect.dims, &strides).into_iter().collect();

        let tile = minimize_rectangle(&rect, &shape);
        let covered = addresses(tile.offset, &tile.shape, &tile.ext_strides);
        prop_assert_eq!(covered.len(), expected.len());
        prop_assert_eq!(covered.into_iter().collect::<BTreeSet<_>>(), expected);
        prop_assert!(tile.rank() <= rect.rank().max(1) + 1);
    }
}
