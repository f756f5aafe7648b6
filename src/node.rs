//! Node registry
//!
//! Hosts, routers and switches are declared here before anything touches a
//! substrate. The registry is pure bookkeeping; iteration follows declaration
//! order, which is also the order stacks are created in.

use crate::errors::{LabError, Result};
use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;

/// Unique node identifier (`h1`, `r2`, `s1`, ...)
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for NodeId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Host,
    Router,
    Switch,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Host => "host",
            Self::Router => "router",
            Self::Switch => "switch",
        };
        f.write_str(name)
    }
}

/// How a switch behaves without a controller.
///
/// `Secure` forwards nothing between ports; `Standalone` learns and floods
/// like an ordinary Ethernet bridge.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailMode {
    #[default]
    Secure,
    Standalone,
}

impl fmt::Display for FailMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Secure => f.write_str("secure"),
            Self::Standalone => f.write_str("standalone"),
        }
    }
}

/// A declared node
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub role: Role,
    /// Primary address; ignored for switches
    pub address: Option<IpNetwork>,
    /// Only set for switches
    pub fail_mode: Option<FailMode>,
}

impl Node {
    /// Routers get IP forwarding switched on for their whole lifetime.
    pub fn forwards(&self) -> bool {
        self.role == Role::Router
    }

    pub fn is_switch(&self) -> bool {
        self.role == Role::Switch
    }
}

#[derive(Clone, Debug, Default)]
pub struct NodeRegistry {
    nodes: Vec<Node>,
    index: HashMap<NodeId, usize>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a node. Fails if the id is already taken.
    pub fn declare(
        &mut self,
        id: impl Into<NodeId>,
        role: Role,
        address: Option<IpNetwork>,
    ) -> Result<&Node> {
        let id = id.into();
        if self.index.contains_key(&id) {
            return Err(LabError::DuplicateNode(id));
        }

        let fail_mode = (role == Role::Switch).then(FailMode::default);
        let position = self.nodes.len();
        self.index.insert(id.clone(), position);
        self.nodes.push(Node {
            id,
            role,
            address,
            fail_mode,
        });
        Ok(&self.nodes[position])
    }

    pub fn add_host(&mut self, id: impl Into<NodeId>, address: IpNetwork) -> Result<&Node> {
        self.declare(id, Role::Host, Some(address))
    }

    pub fn add_router(&mut self, id: impl Into<NodeId>, address: IpNetwork) -> Result<&Node> {
        self.declare(id, Role::Router, Some(address))
    }

    pub fn add_switch(&mut self, id: impl Into<NodeId>) -> Result<&Node> {
        self.declare(id, Role::Switch, None)
    }

    pub fn get(&self, id: &str) -> Result<&Node> {
        self.index
            .get(id)
            .map(|&i| &self.nodes[i])
            .ok_or_else(|| LabError::UnknownNode(NodeId::from(id)))
    }

    /// Change the fail mode a switch starts with.
    pub fn set_fail_mode(&mut self, id: &str, mode: FailMode) -> Result<()> {
        let position = *self
            .index
            .get(id)
            .ok_or_else(|| LabError::UnknownNode(NodeId::from(id)))?;
        let node = &mut self.nodes[position];
        if !node.is_switch() {
            return Err(LabError::NotASwitch(node.id.clone()));
        }
        node.fail_mode = Some(mode);
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
