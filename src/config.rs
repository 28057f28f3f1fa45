//! Root configuration for the demo binary: one `QuorumKvConfig` composed of
//! each crate's own config struct, loaded from `config.json` with
//! defaults-and-save-on-first-run semantics, the same pattern the teacher
//! crate uses for its own settings file.

use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use quorumkv_consensus::{AcceptorConfig, ProposerConfig};
use quorumkv_core::NodeConfig;
use quorumkv_query::ScanConfig;

const CONFIG_PATH: &str = "config.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuorumKvConfig {
    pub node: NodeConfig,
    pub acceptor: AcceptorConfig,
    pub proposer: ProposerConfig,
    pub scan: ScanConfig,
}

impl Default for QuorumKvConfig {
    fn default() -> Self {
        Self {
            node: NodeConfig::default(),
            acceptor: AcceptorConfig::default(),
            proposer: ProposerConfig::default(),
            scan: ScanConfig::default(),
        }
    }
}

impl QuorumKvConfig {
    /// Loads `config.json` from the current directory, or writes out the
    /// default configuration and returns it if no file exists yet.
    pub async fn load() -> Result<Self> {
        match tokio::fs::read_to_string(CONFIG_PATH).await {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(_) => {
                let config = Self::default();
                config.save().await?;
                Ok(config)
            }
        }
    }

    pub async fn save(&self) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(Path::new(CONFIG_PATH), content).await?;
        Ok(())
    }
}
