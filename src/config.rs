//! Work tree configuration
//!
//! All per-tree parameters are injected through [`WorkTreeConfig`] rather
//! than read from process-global state, so several trees can coexist in one
//! process without interfering.

use crate::error::Error;
use crate::logging::LoggingConfig;
use crate::time::ReplicaId;
use serde::{Deserialize, Serialize};

/// Configuration for one [`crate::worktree::WorkTree`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkTreeConfig {
    /// Identity of this replica. Must be positive.
    pub replica_id: ReplicaId,

    /// Include tombstoned entries in projections by default.
    #[serde(default)]
    pub show_deleted: bool,

    /// Upper bound on carry-over passes during `reset`. The fixed-point loop
    /// exits early when a pass makes no progress; this bound guards against
    /// external text fetches that keep exposing newly unsaved paths.
    #[serde(default = "default_max_reset_passes")]
    pub max_reset_passes: usize,

    /// Logging configuration, applied when the embedder calls
    /// [`crate::logging::init_logging`].
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_max_reset_passes() -> usize {
    16
}

impl WorkTreeConfig {
    pub fn new(replica_id: ReplicaId) -> Self {
        Self {
            replica_id,
            show_deleted: false,
            max_reset_passes: default_max_reset_passes(),
            logging: LoggingConfig::default(),
        }
    }

    /// Validate invariants that cannot be expressed in the type.
    pub fn validate(&self) -> Result<(), Error> {
        if self.replica_id == 0 {
            return Err(Error::InvalidArgument(
                "replica id must be positive (0 is reserved for baselines)".to_string(),
            ));
        }
        if self.max_reset_passes == 0 {
            return Err(Error::InvalidArgument(
                "max_reset_passes must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = WorkTreeConfig::new(1);
        assert!(config.validate().is_ok());
        assert_eq!(config.max_reset_passes, 16);
        assert!(!config.show_deleted);
    }

    #[test]
    fn test_zero_replica_id_is_rejected() {
        let config = WorkTreeConfig::new(0);
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_config_round_trips_through_json() {
        let config = WorkTreeConfig::new(7);
        let json = serde_json::to_string(&config).unwrap();
        let parsed: WorkTreeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.replica_id, 7);
    }
}
