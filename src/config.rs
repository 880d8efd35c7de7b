//! Runtime configuration.
//!
//! A plain struct with a sane `Default`, constructed programmatically by the
//! embedding application. No TOML/YAML/other config-file parsing dependency
//! is introduced here.
//!
//! # Example
//!
//! ```rust
//! use agentmesh_core::RuntimeConfig;
//!
//! let config = RuntimeConfig::default();
//! assert_eq!(config.max_live_output_bytes, 10_000);
//! ```

use crate::model::ModelTier;
use std::collections::HashMap;

/// Construction-time configuration consumed by the pool and the orchestrator.
///
/// See the crate documentation for the meaning of each field; defaults match
/// the values the core falls back to when a field is left unset.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Cap, in bytes, of each agent's `liveOutput` tail buffer.
    pub max_live_output_bytes: usize,
    /// Capacity `N` of the event coordinator's ring buffer.
    pub event_buffer_size: usize,
    /// Tier used when the analyzer returns `ModelTier::Auto`.
    pub default_tier: ModelTier,
    /// Soft-to-hard cancellation grace window.
    pub interrupt_grace_ms: u64,
    /// Maximum number of concurrently spawned agents; `None` is unlimited.
    pub max_concurrent_agents: Option<usize>,
    /// Human-readable id prefix per tier.
    pub agent_name_prefixes: HashMap<ModelTier, String>,
    /// Deterministic id seed for tests; `None` uses process entropy.
    pub session_id_seed: Option<u64>,
}

fn default_prefixes() -> HashMap<ModelTier, String> {
    let mut m = HashMap::new();
    m.insert(ModelTier::Fast, "haiku".to_string());
    m.insert(ModelTier::SmartMid, "sonnet".to_string());
    m.insert(ModelTier::SmartHigh, "opus".to_string());
    m
}

impl Default for RuntimeConfig {
    /// Defaults taken directly from the recognized configuration table.
    ///
    /// # Example
    ///
    /// ```rust
    /// use agentmesh_core::RuntimeConfig;
    /// use agentmesh_core::ModelTier;
    ///
    /// let config = RuntimeConfig::default();
    /// assert_eq!(config.default_tier, ModelTier::Fast);
    /// assert!(config.max_concurrent_agents.is_none());
    /// ```
    fn default() -> Self {
        Self {
            max_live_output_bytes: 10_000,
            event_buffer_size: 1_000,
            default_tier: ModelTier::Fast,
            interrupt_grace_ms: 5_000,
            max_concurrent_agents: None,
            agent_name_prefixes: default_prefixes(),
            session_id_seed: None,
        }
    }
}

impl RuntimeConfig {
    /// Prefix to use for a freshly spawned agent of the given tier.
    pub fn prefix_for(&self, tier: ModelTier) -> &str {
        self.agent_name_prefixes
            .get(&tier)
            .map(|s| s.as_str())
            .unwrap_or("agent")
    }
}
