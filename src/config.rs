use serde::{Deserialize, Serialize};

use crate::error::HydrateError;

/// Engine-wide knobs shared by every request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum nesting below the root query (root = 0). A nested fetch beyond it is rejected
    /// before it issues any statement.
    pub max_depth: usize,
    /// Concurrent statements allowed per request. `None` uses half the executor's pool size.
    pub relation_concurrency: Option<usize>,
    /// Page size used when the caller does not pass one.
    pub default_limit: u32,
    /// Larger requested page sizes are clamped to this.
    pub max_limit: u32,
    /// Per-request deadline applied by `RequestContext::new` when set.
    pub request_timeout_ms: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_depth: 3,
            relation_concurrency: None,
            default_limit: 20,
            max_limit: 200,
            request_timeout_ms: None,
        }
    }
}

impl EngineConfig {
    /// Parse a JSON document; missing keys take their defaults.
    ///
    /// # Errors
    /// Returns `HydrateError::ConfigError` when the document is malformed or fails validation.
    pub fn from_json(json: &str) -> Result<Self, HydrateError> {
        let config: EngineConfig = serde_json::from_str(json)
            .map_err(|e| HydrateError::ConfigError(format!("engine config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    /// Returns `HydrateError::ConfigError` for zero limits or concurrency.
    pub fn validate(&self) -> Result<(), HydrateError> {
        if self.default_limit == 0 || self.max_limit == 0 {
            return Err(HydrateError::ConfigError(
                "default_limit and max_limit must be positive".into(),
            ));
        }
        if self.default_limit > self.max_limit {
            return Err(HydrateError::ConfigError(format!(
                "default_limit {} exceeds max_limit {}",
                self.default_limit, self.max_limit
            )));
        }
        if self.relation_concurrency == Some(0) {
            return Err(HydrateError::ConfigError(
                "relation_concurrency must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Statement permits for one request given the executor's pool size. Never below one, even
    /// for a config that skipped [`validate`](Self::validate).
    #[must_use]
    pub fn permits_for(&self, pool_size: u32) -> usize {
        self.relation_concurrency
            .unwrap_or(pool_size as usize / 2)
            .max(1)
    }
}
