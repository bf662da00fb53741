//! Tiling pass configuration.

use bon::bon;
use kiln_ir::MemoryHierarchy;

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TilingConfig {
    /// Level the tiled tensors live in.
    pub external_level: String,
    /// Level tiles are staged in.
    pub local_level: String,
    pub hierarchy: MemoryHierarchy,
    /// Name of the generated tile loop counter.
    pub tile_index: String,
}

/// `L3 -> L2 -> L1`, with L1 next to the compute engines.
fn default_hierarchy() -> MemoryHierarchy {
    MemoryHierarchy::linear(&[("L3", 1 << 24), ("L2", 1 << 19), ("L1", 1 << 16)])
}

impl Default for TilingConfig {
    fn default() -> Self {
        Self {
            external_level: "L2".into(),
            local_level: "L1".into(),
            hierarchy: default_hierarchy(),
            tile_index: "TILING_I".into(),
        }
    }
}

#[bon]
impl TilingConfig {
    #[builder]
    pub fn builder(
        #[builder(into, default = "L2".to_owned())] external_level: String,
        #[builder(into, default = "L1".to_owned())] local_level: String,
        #[builder(default = default_hierarchy())] hierarchy: MemoryHierarchy,
        #[builder(into, default = "TILING_I".to_owned())] tile_index: String,
    ) -> Self {
        Self { external_level, local_level, hierarchy, tile_index }
    }

    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// * `KILN_TILE_INDEX` - Name of the tile loop counter (default: `TILING_I`)
    pub fn from_env() -> Self {
        let tile_index = std::env::var("KILN_TILE_INDEX").unwrap_or_else(|_| "TILING_I".into());
        Self { tile_index, ..Default::default() }
    }

    /// Whether transfers keep their geometry.
    ///
    /// Only tiles moved into the innermost level straight from an adjacent one
    /// do; transfers between outer levels are flattened to byte runs.
    pub fn keeps_geometry(&self) -> Result<bool> {
        self.hierarchy.level(&self.external_level)?;
        self.hierarchy.level(&self.local_level)?;
        Ok(self.hierarchy.is_innermost(&self.local_level)
            && self.hierarchy.is_adjacent(&self.external_level, &self.local_level))
    }
}
