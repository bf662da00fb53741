//! Tile schedules produced by the tiling solver.

use std::collections::BTreeMap;

use snafu::ensure;

use crate::buffer::Dims;
use crate::error::*;
use crate::memory::NodeMemoryConstraint;

/// One hyper-rectangular tile: offset and extent per dimension, in elements.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HyperRectangle {
    pub offset: Dims,
    pub dims: Dims,
}

impl HyperRectangle {
    pub fn new(offset: impl IntoIterator<Item = usize>, dims: impl IntoIterator<Item = usize>) -> Result<Self> {
        let offset: Dims = offset.into_iter().collect();
        let dims: Dims = dims.into_iter().collect();
        ensure!(
            offset.len() == dims.len(),
            RankMismatchSnafu { what: "rectangle offset", expected: dims.len(), actual: offset.len() }
        );
        Ok(Self { offset, dims })
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn num_elements(&self) -> usize {
        self.dims.iter().product()
    }
}

/// Per-tile steps of one operator. Step `i` maps each tensor to its rectangle in tile `i`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TilingSchedule {
    pub input_loads: Vec<BTreeMap<String, HyperRectangle>>,
    pub output_stores: Vec<BTreeMap<String, HyperRectangle>>,
}

impl TilingSchedule {
    pub fn new(
        input_loads: Vec<BTreeMap<String, HyperRectangle>>,
        output_stores: Vec<BTreeMap<String, HyperRectangle>>,
    ) -> Result<Self> {
        let schedule = Self { input_loads, output_stores };
        schedule.validate()?;
        Ok(schedule)
    }

    pub fn num_tiles(&self) -> usize {
        self.input_loads.len().max(self.output_stores.len())
    }

    /// Every step names the same tensors and each tensor keeps one rank.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.input_loads.is_empty()
                || self.output_stores.is_empty()
                || self.input_loads.len() == self.output_stores.len(),
            InvalidScheduleSnafu {
                reason: format!(
                    "{} load steps but {} store steps",
                    self.input_loads.len(),
                    self.output_stores.len()
                ),
            }
        );
        for steps in [&self.input_loads, &self.output_stores] {
            let Some(first) = steps.first() else { continue };
            for step in steps {
                ensure!(
                    step.keys().eq(first.keys()),
                    InvalidScheduleSnafu { reason: "steps name different tensors".to_string() }
                );
                for (tensor, rect) in step {
                    let expected = first[tensor].rank();
                    ensure!(
                        rect.rank() == expected,
                        RankMismatchSnafu { what: format!("tile of {tensor}"), expected, actual: rect.rank() }
                    );
                }
            }
        }
        Ok(())
    }

    /// Rectangles of every loaded tensor, in tile order.
    pub fn inputs(&self) -> BTreeMap<String, Vec<HyperRectangle>> {
        Self::per_tensor(&self.input_loads)
    }

    /// Rectangles of every stored tensor, in tile order.
    pub fn outputs(&self) -> BTreeMap<String, Vec<HyperRectangle>> {
        Self::per_tensor(&self.output_stores)
    }

    fn per_tensor(steps: &[BTreeMap<String, HyperRectangle>]) -> BTreeMap<String, Vec<HyperRectangle>> {
        let mut tensors: BTreeMap<String, Vec<HyperRectangle>> = BTreeMap::new();
        for step in steps {
            for (tensor, rect) in step {
                tensors.entry(tensor.clone()).or_default().push(rect.clone());
            }
        }
        tensors
    }
}

/// Everything the tiling solver decided for one operator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperatorTiling {
    pub schedule: TilingSchedule,
    pub constraint: NodeMemoryConstraint,
    /// Kernel parameters whose value changes per tile (e.g. the tile's row count).
    pub replacements: BTreeMap<String, Vec<i64>>,
}

impl OperatorTiling {
    pub fn new(schedule: TilingSchedule, constraint: NodeMemoryConstraint) -> Self {
        Self { schedule, constraint, replacements: BTreeMap::new() }
    }

    pub fn with_replacement(mut self, var: impl Into<String>, values: Vec<i64>) -> Result<Self> {
        let var = var.into();
        let num_tiles = self.schedule.num_tiles();
        ensure!(
            values.len() == num_tiles,
            InvalidScheduleSnafu { reason: format!("{var} has {} values for {num_tiles} tiles", values.len()) }
        );
        self.replacements.insert(var, values);
        Ok(self)
    }
}
