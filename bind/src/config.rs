//! Resolver configuration.

use bon::bon;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverConfig {
    /// Abort the search after this many steps. `None` searches exhaustively.
    pub max_steps: Option<usize>,
    /// Tensor layout handed to the parsers.
    pub channels_first: bool,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self { max_steps: None, channels_first: true }
    }
}

#[bon]
impl ResolverConfig {
    #[builder]
    pub fn builder(max_steps: Option<usize>, #[builder(default = true)] channels_first: bool) -> Self {
        Self { max_steps, channels_first }
    }

    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// * `KILN_MAX_RESOLVE_STEPS` - Step limit for the backtracking search (default: unlimited)
    /// * `KILN_CHANNELS_LAST` - Use channels-last layout if set
    pub fn from_env() -> Self {
        let max_steps = std::env::var("KILN_MAX_RESOLVE_STEPS").ok().and_then(|s| s.parse().ok());
        let channels_first = std::env::var("KILN_CHANNELS_LAST").is_err();
        Self { max_steps, channels_first }
    }
}
