//! Lab scenarios
//!
//! A [`Scenario`] is a complete, serializable description of one lab run:
//! the nodes and links to declare, the routing entries to apply, the probes
//! to send and where to write their results. Scenarios come from JSON files,
//! from [`ScenarioBuilder`], or from the built-in [`Presets`].

pub mod builder;
pub mod presets;

pub use builder::ScenarioBuilder;
pub use presets::Presets;

use crate::errors::Result;
use crate::link::{Endpoint, LinkFabric, Shaping};
use crate::node::{FailMode, NodeId, NodeRegistry, Role};
use crate::probe::ProbeSpec;
use crate::routing::Route;
use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub id: NodeId,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<IpNetwork>,
    /// Switches only; secure when omitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fail_mode: Option<FailMode>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LinkSpec {
    pub a: Endpoint,
    pub b: Endpoint,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shaping: Option<Shaping>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub nodes: Vec<NodeSpec>,
    #[serde(default)]
    pub links: Vec<LinkSpec>,
    /// Applied in order after materialization
    #[serde(default)]
    pub routes: Vec<Route>,
    #[serde(default)]
    pub probes: Vec<ProbeSpec>,
    /// Where results go unless the configuration says otherwise
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
}

impl Scenario {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = tokio::fs::read_to_string(path).await?;
        Self::from_json(&json)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Look up a built-in scenario by name.
    pub fn preset(name: &str) -> Result<Option<Self>> {
        Ok(Presets::all()?.into_iter().find(|s| s.name == name))
    }

    /// Declare every node and link, validating names and references.
    pub fn declare(&self) -> Result<(NodeRegistry, LinkFabric)> {
        let mut registry = NodeRegistry::new();
        for node in &self.nodes {
            registry.declare(node.id.clone(), node.role, node.address)?;
            if let Some(mode) = node.fail_mode {
                registry.set_fail_mode(node.id.as_str(), mode)?;
            }
        }

        let mut fabric = LinkFabric::new();
        for link in &self.links {
            fabric.declare(&registry, link.a.clone(), link.b.clone(), link.shaping.clone())?;
        }

        Ok((registry, fabric))
    }

    /// Result file name used when neither the scenario nor the
    /// configuration names one.
    pub fn default_output(&self) -> PathBuf {
        PathBuf::from(format!("{}-results.txt", self.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::LabError;

    #[test]
    fn test_minimal_json() {
        let scenario = Scenario::from_json(
            r#"{
                "name": "pair",
                "nodes": [
                    { "id": "h1", "role": "host", "address": "10.0.0.1/24" },
                    { "id": "h2", "role": "host", "address": "10.0.0.2/24" }
                ],
                "links": [ { "a": { "node": "h1" }, "b": { "node": "h2", "interface": "h2-lan" } } ],
                "probes": [ { "source": "h1", "destination": "10.0.0.2" } ]
            }"#,
        )
        .unwrap();

        assert!(scenario.routes.is_empty());
        assert_eq!(scenario.output, None);
        assert_eq!(scenario.default_output(), PathBuf::from("pair-results.txt"));

        let (registry, fabric) = scenario.declare().unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(fabric.primary_interface("h2"), Some("h2-lan"));
    }

    #[test]
    fn test_declare_rejects_duplicates() {
        let scenario = Scenario::from_json(
            r#"{ "name": "dup", "nodes": [
                { "id": "h1", "role": "host" },
                { "id": "h1", "role": "router" }
            ] }"#,
        )
        .unwrap();
        assert!(matches!(scenario.declare(), Err(LabError::DuplicateNode(_))));
    }

    #[test]
    fn test_fail_mode_on_host_rejected() {
        let scenario = Scenario::from_json(
            r#"{ "name": "bad", "nodes": [
                { "id": "h1", "role": "host", "fail_mode": "standalone" }
            ] }"#,
        )
        .unwrap();
        assert!(matches!(scenario.declare(), Err(LabError::NotASwitch(_))));
    }

    #[test]
    fn test_json_roundtrip_of_preset() {
        let routed = Presets::routed().unwrap();
        let back = Scenario::from_json(&routed.to_json().unwrap()).unwrap();
        assert_eq!(back, routed);
    }

    #[test]
    fn test_preset_lookup() {
        assert!(Scenario::preset("switched").unwrap().is_some());
        assert!(Scenario::preset("nope").unwrap().is_none());
    }
}
