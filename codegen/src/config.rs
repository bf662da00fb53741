//! Deployment configuration.

use bon::bon;
use kiln_bind::ResolverConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployConfig {
    /// Prefix of every generated identifier. `None` leaves names unprefixed.
    pub unit_name: Option<String>,
    pub resolver: ResolverConfig,
    /// Name of the counter of generated tile loops.
    pub tile_index_var: String,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self { unit_name: None, resolver: ResolverConfig::default(), tile_index_var: "TILING_I".into() }
    }
}

#[bon]
impl DeployConfig {
    #[builder]
    pub fn builder(
        #[builder(into)] unit_name: Option<String>,
        #[builder(default)] resolver: ResolverConfig,
        #[builder(into, default = "TILING_I".to_owned())] tile_index_var: String,
    ) -> Self {
        Self { unit_name, resolver, tile_index_var }
    }

    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// * `KILN_UNIT_NAME` - Identifier prefix of the compilation unit (default: none)
    /// * `KILN_TILE_INDEX` - Name of the tile loop counter (default: `TILING_I`)
    ///
    /// Resolver settings are read by [`ResolverConfig::from_env`].
    pub fn from_env() -> Self {
        let unit_name = std::env::var("KILN_UNIT_NAME").ok().filter(|name| !name.is_empty());
        let tile_index_var = std::env::var("KILN_TILE_INDEX").unwrap_or_else(|_| "TILING_I".into());
        Self { unit_name, resolver: ResolverConfig::from_env(), tile_index_var }
    }
}
