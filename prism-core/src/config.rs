//! Store configuration.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// How [`Store::drop_member`](crate::Store::drop_member) treats a member that
/// is still referenced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reclaim {
    /// Defer reclamation until the last subscriber or root goes away.
    #[default]
    Lenient,

    /// Refuse with [`StoreError::CellInUse`](crate::StoreError::CellInUse).
    Strict,
}

/// Tunables for a [`Store`](crate::Store).
///
/// Every field has a default, so a partial JSON document is enough:
///
/// ```rust
/// use prism_core::{Reclaim, StoreConfig};
///
/// let config = StoreConfig::from_json(r#"{ "reclaim": "strict" }"#).unwrap();
/// assert_eq!(config.reclaim, Reclaim::Strict);
/// assert!(config.collect_on_release);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Default reclamation mode.
    pub reclaim: Reclaim,

    /// Reclaim a family member as soon as its last subscriber or root is
    /// released.
    pub collect_on_release: bool,

    /// Upper bound on follow-up passes when subscriptions write during a
    /// flush.
    pub max_flush_passes: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            reclaim: Reclaim::Lenient,
            collect_on_release: true,
            max_flush_passes: 64,
        }
    }
}

impl StoreConfig {
    /// Parse a configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
