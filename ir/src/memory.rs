//! Memory hierarchy and the solver's placement decisions.

use std::collections::BTreeMap;
use std::ops::Range;

use snafu::ensure;

use crate::buffer::Dims;
use crate::error::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryLevel {
    pub name: String,
    /// Capacity in bytes.
    pub size: usize,
    /// Levels this one can transfer to directly.
    pub neighbours: Vec<String>,
}

impl MemoryLevel {
    pub fn new<I, S>(name: impl Into<String>, size: usize, neighbours: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { name: name.into(), size, neighbours: neighbours.into_iter().map(Into::into).collect() }
    }
}

/// Memory levels ordered from the outermost (largest, slowest) to the innermost.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryHierarchy {
    levels: Vec<MemoryLevel>,
    default_level: String,
}

impl MemoryHierarchy {
    pub fn new(levels: Vec<MemoryLevel>, default_level: impl Into<String>) -> Result<Self> {
        let default_level = default_level.into();
        let known = |name: &str| levels.iter().any(|l| l.name == name);
        ensure!(known(&default_level), UnknownMemoryLevelSnafu { level: default_level.clone() });
        for level in &levels {
            for neighbour in &level.neighbours {
                ensure!(known(neighbour), UnknownMemoryLevelSnafu { level: neighbour.clone() });
            }
        }
        Ok(Self { levels, default_level })
    }

    /// Chain of levels, outermost first, each adjacent to the ones before and after it.
    ///
    /// The outermost level is the default.
    pub fn linear(chain: &[(&str, usize)]) -> Self {
        let levels = chain
            .iter()
            .enumerate()
            .map(|(idx, &(name, size))| {
                let neighbours = [idx.checked_sub(1), Some(idx + 1)]
                    .into_iter()
                    .flatten()
                    .filter_map(|n| chain.get(n))
                    .map(|&(neighbour, _)| neighbour);
                MemoryLevel::new(name, size, neighbours)
            })
            .collect();
        let default_level = chain.first().map(|&(name, _)| name).unwrap_or_default().to_string();
        Self { levels, default_level }
    }

    pub fn default_level(&self) -> &str {
        &self.default_level
    }

    pub fn level(&self, name: &str) -> Result<&MemoryLevel> {
        self.levels.iter().find(|l| l.name == name).ok_or_else(|| UnknownMemoryLevelSnafu { level: name }.build())
    }

    pub fn levels(&self) -> &[MemoryLevel] {
        &self.levels
    }

    pub fn is_adjacent(&self, a: &str, b: &str) -> bool {
        let linked = |from: &str, to: &str| self.level(from).is_ok_and(|l| l.neighbours.iter().any(|n| n == to));
        linked(a, b) || linked(b, a)
    }

    /// The level closest to the compute engines.
    pub fn innermost(&self) -> Option<&MemoryLevel> {
        self.levels.last()
    }

    pub fn is_innermost(&self, name: &str) -> bool {
        self.innermost().is_some_and(|l| l.name == name)
    }
}

/// Placement of one tensor in one memory level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryConstraint {
    pub level: String,
    /// Byte addresses inside the level's arena.
    pub address: Range<usize>,
    /// Shape of one staged tile.
    pub shape: Dims,
    /// Number of staging slices (1 or 2).
    pub multi_buffer: usize,
}

impl MemoryConstraint {
    pub fn new(
        tensor: &str,
        level: impl Into<String>,
        address: Range<usize>,
        shape: impl IntoIterator<Item = usize>,
        multi_buffer: usize,
    ) -> Result<Self> {
        let level = level.into();
        let invalid = |reason: String| InvalidMemoryConstraintSnafu { tensor, level: level.clone(), reason };
        ensure!(
            matches!(multi_buffer, 1 | 2),
            invalid(format!("multi-buffer coefficient {multi_buffer} not in {{1, 2}}"))
        );
        ensure!(address.start <= address.end, invalid(format!("empty address range {address:?}")));
        let size = address.end - address.start;
        ensure!(size % multi_buffer == 0, invalid(format!("region of {size} bytes not divisible by {multi_buffer}")));
        Ok(Self { level, address, shape: shape.into_iter().collect(), multi_buffer })
    }

    pub fn size(&self) -> usize {
        self.address.end - self.address.start
    }

    /// Size of one staging slice.
    pub fn slice_size(&self) -> usize {
        self.size() / self.multi_buffer
    }

    /// Byte offset of staging slice `index` inside the level's arena.
    pub fn slice_offset(&self, index: usize) -> usize {
        self.address.start + index * self.slice_size()
    }

    /// Reject a tile that does not fit into one staging slice.
    pub fn check_tile(&self, tensor: &str, tile_bytes: usize) -> Result<()> {
        ensure!(
            tile_bytes <= self.slice_size(),
            InvalidMemoryConstraintSnafu {
                tensor,
                level: self.level.clone(),
                reason: format!("tile of {tile_bytes} bytes exceeds slice of {} bytes", self.slice_size()),
            }
        );
        Ok(())
    }
}

/// Placements of one tensor, keyed by memory level.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TensorMemoryConstraint {
    pub levels: BTreeMap<String, MemoryConstraint>,
}

impl TensorMemoryConstraint {
    pub fn with(mut self, constraint: MemoryConstraint) -> Self {
        self.levels.insert(constraint.level.clone(), constraint);
        self
    }

    pub fn at(&self, level: &str) -> Option<&MemoryConstraint> {
        self.levels.get(level)
    }
}

/// Placements of every tensor an operator touches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeMemoryConstraint {
    pub tensors: BTreeMap<String, TensorMemoryConstraint>,
}

impl NodeMemoryConstraint {
    pub fn with(mut self, tensor: impl Into<String>, constraint: MemoryConstraint) -> Self {
        self.tensors.entry(tensor.into()).or_default().levels.insert(constraint.level.clone(), constraint);
        self
    }

    pub fn get(&self, tensor: &str, level: &str) -> Result<&MemoryConstraint> {
        self.tensors.get(tensor).and_then(|t| t.at(level)).ok_or_else(|| {
            InvalidMemoryConstraintSnafu { tensor, level, reason: "no placement for this level".to_string() }.build()
        })
    }
}
