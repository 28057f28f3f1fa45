use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tuning for a single Acceptor instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceptorConfig {
    /// How long `Deliberating` waits for a proposal before initiating its own.
    pub deliberating_timeout: Duration,
    /// How long a `Closed` acceptor lingers before it is eligible for eviction.
    pub closed_lifetime: Duration,
}

impl Default for AcceptorConfig {
    fn default() -> Self {
        Self {
            deliberating_timeout: Duration::from_secs(5),
            closed_lifetime: Duration::from_secs(2),
        }
    }
}

/// Tuning for a single Proposer instance, including its retry backoff.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposerConfig {
    pub backoff_floor: Duration,
    pub backoff_ceiling: Duration,
    pub max_retries: u32,
    pub closed_lifetime: Duration,
}

impl Default for ProposerConfig {
    fn default() -> Self {
        Self {
            backoff_floor: Duration::from_millis(200),
            backoff_ceiling: Duration::from_secs(60),
            max_retries: 7,
            closed_lifetime: Duration::from_secs(2),
        }
    }
}
