//! Runtime configuration
//!
//! Settings load from an optional JSON file and are then overridden by CLI
//! flags. Everything has a default so an empty file (or none) is valid.

use crate::errors::Result;
use crate::substrate::{netns::NetnsSubstrate, sim::SimSubstrate, Substrate};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Which substrate materializes topologies
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Linux network namespaces (needs CAP_NET_ADMIN or sudo)
    #[default]
    Netns,
    /// In-memory emulation
    Sim,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Seconds to wait for the single echo reply
    pub wait_secs: u64,
}

impl ProbeConfig {
    /// Probes always send exactly one packet.
    pub const COUNT: u32 = 1;

    pub fn wait(&self) -> Duration {
        Duration::from_secs(self.wait_secs)
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self { wait_secs: 1 }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabConfig {
    pub backend: Backend,
    /// Prefix every `ip`/`tc`/`sysctl` invocation with `sudo -n`
    pub use_sudo: bool,
    /// Prepended to node ids to form namespace names
    pub namespace_prefix: String,
    pub probe: ProbeConfig,
    /// Result file; overrides the scenario's own output path
    pub output: Option<PathBuf>,
}

impl Default for LabConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            use_sudo: false,
            namespace_prefix: "nl-".to_string(),
            probe: ProbeConfig::default(),
            output: None,
        }
    }
}

impl LabConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = tokio::fs::read_to_string(path).await?;
        Self::from_json(&json)
    }

    /// Build the substrate this configuration selects.
    pub fn substrate(&self) -> Arc<dyn Substrate> {
        match self.backend {
            Backend::Netns => Arc::new(NetnsSubstrate::from_config(self)),
            Backend::Sim => Arc::new(SimSubstrate::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LabConfig::default();
        assert_eq!(config.backend, Backend::Netns);
        assert_eq!(config.probe.wait(), Duration::from_secs(1));
        assert_eq!(ProbeConfig::COUNT, 1);
        assert!(config.output.is_none());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = LabConfig::from_json(r#"{ "backend": "sim", "probe": { "wait_secs": 3 } }"#)
            .unwrap();
        assert_eq!(config.backend, Backend::Sim);
        assert_eq!(config.probe.wait_secs, 3);
        assert_eq!(config.namespace_prefix, "nl-");
        assert!(!config.use_sudo);
    }

    #[test]
    fn test_empty_object() {
        assert_eq!(LabConfig::from_json("{}").unwrap(), LabConfig::default());
    }

    #[test]
    fn test_rejects_unknown_backend() {
        assert!(LabConfig::from_json(r#"{ "backend": "docker" }"#).is_err());
    }
}
