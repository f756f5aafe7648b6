//! Emulation substrate boundary
//!
//! The engine never touches kernel state directly. Every change goes through
//! a typed call on [`Substrate`] carrying the [`StackHandle`] of the node it
//! affects, so one node's configuration cannot leak into another's.
//!
//! - [`netns`]: Linux network namespaces driven through `ip`/`sysctl`/`ping`
//! - [`qdisc`]: `tc` argument construction for link shaping
//! - [`sim`]: deterministic in-memory emulation

pub mod netns;
pub mod qdisc;
pub mod sim;

use crate::config::ProbeConfig;
use crate::errors::SubstrateError;
use crate::link::Shaping;
use crate::node::{FailMode, NodeId, Role};
use crate::routing::Destination;
use async_trait::async_trait;
use ipnetwork::IpNetwork;
use std::fmt;
use std::net::IpAddr;

/// Capability for one node's isolated network stack
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct StackHandle {
    node: NodeId,
    role: Role,
    name: String,
}

impl StackHandle {
    pub fn new(node: NodeId, role: Role, name: impl Into<String>) -> Self {
        Self {
            node,
            role,
            name: name.into(),
        }
    }

    pub fn node(&self) -> &NodeId {
        &self.node
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Backend-specific name (the namespace name for netns)
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// One end of a virtual link, owned by a stack
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct IfaceHandle {
    stack: StackHandle,
    name: String,
}

impl IfaceHandle {
    pub fn new(stack: StackHandle, name: impl Into<String>) -> Self {
        Self {
            stack,
            name: name.into(),
        }
    }

    pub fn stack(&self) -> &StackHandle {
        &self.stack
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// A static route as handed to the substrate
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouteRequest {
    pub destination: Destination,
    pub via: IpAddr,
    pub interface: Option<String>,
}

impl fmt::Display for RouteRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} via {}", self.destination, self.via)?;
        if let Some(dev) = &self.interface {
            write!(f, " dev {dev}")?;
        }
        Ok(())
    }
}

#[async_trait]
pub trait Substrate: Send + Sync {
    /// Instantiate an isolated network stack for `node`.
    async fn create_stack(&self, node: &NodeId, role: Role) -> Result<StackHandle, SubstrateError>;

    /// Tear a stack down together with every interface it owns.
    async fn destroy_stack(&self, stack: &StackHandle) -> Result<(), SubstrateError>;

    /// Create a connected interface pair, `name_a` in `a` and `name_b` in `b`.
    async fn create_link_pair(
        &self,
        a: &StackHandle,
        name_a: &str,
        b: &StackHandle,
        name_b: &str,
        shaping: Option<&Shaping>,
    ) -> Result<(IfaceHandle, IfaceHandle), SubstrateError>;

    async fn assign_address(
        &self,
        iface: &IfaceHandle,
        address: IpNetwork,
    ) -> Result<(), SubstrateError>;

    async fn set_forwarding(&self, stack: &StackHandle, enabled: bool)
        -> Result<(), SubstrateError>;

    async fn add_route(
        &self,
        stack: &StackHandle,
        route: &RouteRequest,
    ) -> Result<(), SubstrateError>;

    /// Only meaningful for switch stacks.
    async fn set_fail_mode(&self, stack: &StackHandle, mode: FailMode)
        -> Result<(), SubstrateError>;

    /// Send one echo request and return whatever the probe printed.
    ///
    /// An unanswered probe is not an error; only failing to run it is.
    async fn probe(
        &self,
        stack: &StackHandle,
        destination: &str,
        config: &ProbeConfig,
    ) -> Result<String, SubstrateError>;
}
