//! Rectangle legalization.
//!
//! Tiles come out of the solver as element-indexed rectangles over the full
//! external tensor. Engines want byte-granular descriptors of minimal rank with
//! a contiguous innermost dimension.

use itertools::Itertools;
use kiln_ir::{Dims, HyperRectangle};
use smallvec::smallvec;
use snafu::ensure;

use crate::error::*;

/// One transfer descriptor, outermost dimension first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegalizedTile {
    /// Offset from the external tensor's base.
    pub offset: usize,
    pub shape: Dims,
    pub ext_strides: Dims,
    /// Dense strides of the staged tile.
    pub loc_strides: Dims,
}

impl LegalizedTile {
    fn new(offset: usize, shape: Dims, ext_strides: Dims) -> Self {
        let loc_strides = dense_strides(&shape);
        Self { offset, shape, ext_strides, loc_strides }
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Size of the transfer, in the unit of the descriptor.
    pub fn bytes(&self) -> usize {
        self.shape.iter().product()
    }

    /// Convert an element-granular descriptor to bytes. The innermost dimension
    /// stays the contiguous run; outer strides scale with the element size.
    fn to_bytes(&self, elem_bytes: usize) -> Self {
        let mut shape = self.shape.clone();
        if let Some(inner) = shape.last_mut() {
            *inner *= elem_bytes;
        }
        let last = self.ext_strides.len().saturating_sub(1);
        let ext_strides =
            self.ext_strides.iter().enumerate().map(|(k, &s)| if k == last { s } else { s * elem_bytes }).collect();
        Self::new(self.offset * elem_bytes, shape, ext_strides)
    }
}

/// Row-major strides of a dense tensor.
pub fn dense_strides(shape: &[usize]) -> Dims {
    let mut strides: Dims = smallvec![1; shape.len()];
    for k in (0..shape.len().saturating_sub(1)).rev() {
        strides[k] = strides[k + 1] * shape[k + 1];
    }
    strides
}

/// Minimize a rectangle against the shape of the tensor it is cut from.
///
/// Unit dimensions are dropped and dimensions that are contiguous with their
/// inner neighbour are merged into it. The innermost remaining dimension always
/// has stride 1; a strided innermost run gets a trailing unit dimension. The
/// result is element-granular.
pub fn minimize_rectangle(rect: &HyperRectangle, ext_shape: &[usize]) -> LegalizedTile {
    let strides = dense_strides(ext_shape);
    let offset = rect.offset.iter().zip(&strides).map(|(o, s)| o * s).sum();

    let mut dims: Vec<(usize, usize)> = Vec::with_capacity(rect.rank());
    for (&extent, &stride) in rect.dims.iter().zip(&strides).rev().filter(|(extent, _)| **extent > 1) {
        if let Some((inner_extent, inner_stride)) = dims.last_mut()
            && stride == *inner_extent * *inner_stride
        {
            *inner_extent *= extent;
        } else {
            dims.push((extent, stride));
        }
    }
    dims.reverse();

    if dims.last().is_none_or(|&(_, stride)| stride != 1) {
        dims.push((1, 1));
    }

    let (shape, ext_strides): (Dims, Dims) = dims.into_iter().unzip();
    LegalizedTile::new(offset, shape, ext_strides)
}

/// Flatten a rectangle into one contiguous run.
fn flatten_rectangle(rect: &HyperRectangle, ext_shape: &[usize]) -> LegalizedTile {
    let strides = dense_strides(ext_shape);
    let offset = rect.offset.iter().zip(&strides).map(|(o, s)| o * s).sum();
    LegalizedTile::new(offset, smallvec![rect.num_elements()], smallvec![1])
}

/// Legalize one tensor's tiles into byte-granular transfer descriptors.
///
/// Next to the compute engines (`innermost`) tiles keep their minimized
/// geometry and must all share the same external layout. Between outer levels
/// every tile becomes a flat byte run.
pub fn legalize(
    tensor: &str,
    rects: &[HyperRectangle],
    ext_shape: &[usize],
    elem_bits: usize,
    innermost: bool,
) -> Result<Vec<LegalizedTile>> {
    let elem_bytes = elem_bits.div_ceil(8);
    for rect in rects {
        ensure!(
            rect.rank() == ext_shape.len(),
            RectangleRankSnafu { tensor, rank: rect.rank(), expected: ext_shape.len() }
        );
    }

    let tiles = rects
        .iter()
        .map(|rect| match innermost {
            true => minimize_rectangle(rect, ext_shape),
            false => flatten_rectangle(rect, ext_shape),
        })
        .map(|tile| tile.to_bytes(elem_bytes))
        .collect_vec();

    if let Some(first) = tiles.first() {
        for (tile, legalized) in tiles.iter().enumerate() {
            ensure!(
                legalized.ext_strides == first.ext_strides,
                LayoutMismatchSnafu {
                    tensor,
                    tile,
                    expected: first.ext_strides.to_vec(),
                    actual: legalized.ext_strides.to_vec(),
                }
            );
        }
    }

    tracing::trace!(tensor, tiles = tiles.len(), innermost, elem_bytes, "legalized tiles");
    Ok(tiles)
}
