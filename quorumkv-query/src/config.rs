use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tuning for a single `ScanDirector` invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Floor/ceiling for `scanBatchBackoff`, the rouse retry schedule shared
    /// in spirit with the Proposer's ballot backoff (same `Backoff` type).
    pub rouse_backoff_floor: Duration,
    pub rouse_backoff_ceiling: Duration,

    /// Rouses fired with no advance in between before the scan fails the
    /// consumer with a timeout.
    pub max_rouses: u32,

    /// Cells requested per deputy page. A deputy reply at this size implies
    /// more may remain; fewer implies the deputy's local range is exhausted.
    pub window: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            rouse_backoff_floor: Duration::from_millis(200),
            rouse_backoff_ceiling: Duration::from_secs(60),
            max_rouses: 7,
            window: 256,
        }
    }
}
