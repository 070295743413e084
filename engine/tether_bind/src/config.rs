//! Engine configuration.

use url::Url;

/// Nested construction batches deeper than this are refused.
pub const DEFAULT_MAX_CREATION_DEPTH: usize = 10;

#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Base for relative urls when no context in the chain has one.
    pub base_url: Option<Url>,
    pub max_creation_depth: usize,
    /// Guard slots reserved up front.
    pub guard_pool_capacity: usize,
    /// Emit diagnostic lines for dependencies that cannot be observed.
    pub report_non_notifiable: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            base_url: None,
            max_creation_depth: DEFAULT_MAX_CREATION_DEPTH,
            guard_pool_capacity: 0,
            report_non_notifiable: true,
        }
    }
}
