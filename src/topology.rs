//! Topology builder
//!
//! Turns a [`NodeRegistry`] and [`LinkFabric`] into a [`LiveTopology`]: every
//! node gets a stack, every link an interface pair, every addressed host or
//! router its primary address. A live topology tracks which [`Phase`] it is
//! in so routing, probing and teardown happen in the right order.

use crate::errors::{LabError, MaterializationTarget, Result, SubstrateError};
use crate::link::LinkFabric;
use crate::node::{FailMode, Node, NodeId, NodeRegistry, Role};
use crate::substrate::{IfaceHandle, RouteRequest, StackHandle, Substrate};
use ipnetwork::IpNetwork;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Materialized,
    Routed,
    Probing,
    Stopped,
}

impl Phase {
    pub fn allows_routing(self) -> bool {
        matches!(self, Self::Materialized | Self::Routed)
    }

    pub fn allows_probing(self) -> bool {
        matches!(self, Self::Materialized | Self::Routed | Self::Probing)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Materialized => "materialized",
            Self::Routed => "routed",
            Self::Probing => "probing",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// A materialized interface and the addresses configured on it
#[derive(Clone, Debug)]
pub struct LiveInterface {
    pub(crate) handle: IfaceHandle,
    pub(crate) addresses: Vec<IpNetwork>,
}

impl LiveInterface {
    pub fn handle(&self) -> &IfaceHandle {
        &self.handle
    }

    pub fn name(&self) -> &str {
        self.handle.name()
    }

    pub fn addresses(&self) -> &[IpNetwork] {
        &self.addresses
    }
}

#[derive(Clone, Debug)]
pub struct LiveNode {
    pub(crate) node: Node,
    pub(crate) stack: StackHandle,
    pub(crate) interfaces: Vec<LiveInterface>,
    pub(crate) forwarding: bool,
    pub(crate) routes: Vec<RouteRequest>,
    pub(crate) fail_mode: Option<FailMode>,
}

impl LiveNode {
    fn new(node: &Node, stack: StackHandle) -> Self {
        Self {
            node: node.clone(),
            stack,
            interfaces: Vec::new(),
            forwarding: false,
            routes: Vec::new(),
            fail_mode: None,
        }
    }

    pub fn id(&self) -> &NodeId {
        &self.node.id
    }

    pub fn role(&self) -> Role {
        self.node.role
    }

    pub fn stack(&self) -> &StackHandle {
        &self.stack
    }

    pub fn interfaces(&self) -> &[LiveInterface] {
        &self.interfaces
    }

    pub fn interface(&self, name: &str) -> Option<&LiveInterface> {
        self.interfaces.iter().find(|i| i.name() == name)
    }

    pub(crate) fn interface_mut(&mut self, name: &str) -> Option<&mut LiveInterface> {
        self.interfaces.iter_mut().find(|i| i.name() == name)
    }

    /// Every address on every interface, in assignment order per interface.
    pub fn addresses(&self) -> impl Iterator<Item = &IpNetwork> {
        self.interfaces.iter().flat_map(|i| i.addresses.iter())
    }

    pub fn forwarding(&self) -> bool {
        self.forwarding
    }

    pub fn routes(&self) -> &[RouteRequest] {
        &self.routes
    }

    pub fn fail_mode(&self) -> Option<FailMode> {
        self.fail_mode
    }
}

pub struct LiveTopology {
    substrate: Arc<dyn Substrate>,
    nodes: Vec<LiveNode>,
    index: HashMap<NodeId, usize>,
    phase: Phase,
}

impl fmt::Debug for LiveTopology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveTopology")
            .field("nodes", &self.nodes)
            .field("phase", &self.phase)
            .finish_non_exhaustive()
    }
}

impl LiveTopology {
    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn substrate(&self) -> &Arc<dyn Substrate> {
        &self.substrate
    }

    pub fn node(&self, id: &str) -> Result<&LiveNode> {
        self.index
            .get(id)
            .map(|&i| &self.nodes[i])
            .ok_or_else(|| LabError::UnknownNode(NodeId::from(id)))
    }

    pub(crate) fn node_mut(&mut self, id: &str) -> Result<&mut LiveNode> {
        match self.index.get(id) {
            Some(&i) => Ok(&mut self.nodes[i]),
            None => Err(LabError::UnknownNode(NodeId::from(id))),
        }
    }

    /// Nodes in creation order
    pub fn nodes(&self) -> impl Iterator<Item = &LiveNode> {
        self.nodes.iter()
    }

    pub(crate) fn require(&self, operation: &'static str, allowed: fn(Phase) -> bool) -> Result<()> {
        if allowed(self.phase) {
            Ok(())
        } else {
            Err(LabError::OutOfPhase {
                operation,
                phase: self.phase,
            })
        }
    }

    pub(crate) fn advance(&mut self, phase: Phase) {
        if self.phase != phase {
            debug!(from = %self.phase, to = %phase, "phase change");
            self.phase = phase;
        }
    }

    fn push(&mut self, node: LiveNode) -> &mut LiveNode {
        let position = self.nodes.len();
        self.index.insert(node.id().clone(), position);
        self.nodes.push(node);
        &mut self.nodes[position]
    }

    async fn build(
        &mut self,
        registry: &NodeRegistry,
        fabric: &LinkFabric,
    ) -> std::result::Result<(), (MaterializationTarget, SubstrateError)> {
        let substrate = Arc::clone(&self.substrate);

        info!("*** Creating nodes");
        for node in registry.iter() {
            let target = || MaterializationTarget::Node(node.id.clone());
            let stack = substrate
                .create_stack(&node.id, node.role)
                .await
                .map_err(|e| (target(), e))?;
            let live = self.push(LiveNode::new(node, stack));

            if node.forwards() {
                substrate
                    .set_forwarding(&live.stack, true)
                    .await
                    .map_err(|e| (target(), e))?;
                live.forwarding = true;
            }
            if node.is_switch() {
                let mode = node.fail_mode.unwrap_or_default();
                substrate
                    .set_fail_mode(&live.stack, mode)
                    .await
                    .map_err(|e| (target(), e))?;
                live.fail_mode = Some(mode);
            }
        }

        info!("*** Adding links");
        for (index, link) in fabric.iter().enumerate() {
            let target = || MaterializationTarget::Link {
                index,
                a: link.a.node.clone(),
                b: link.b.node.clone(),
            };
            let stack_a = self.stack_of(&link.a.node).map_err(|e| (target(), e))?;
            let stack_b = self.stack_of(&link.b.node).map_err(|e| (target(), e))?;

            let (iface_a, iface_b) = substrate
                .create_link_pair(
                    &stack_a,
                    &link.a.interface,
                    &stack_b,
                    &link.b.interface,
                    link.shaping.as_ref(),
                )
                .await
                .map_err(|e| (target(), e))?;

            for iface in [iface_a, iface_b] {
                let owner = iface.stack().node().clone();
                if let Ok(node) = self.node_mut(owner.as_str()) {
                    node.interfaces.push(LiveInterface {
                        handle: iface,
                        addresses: Vec::new(),
                    });
                }
            }
        }

        info!("*** Configuring hosts");
        for node in registry.iter().filter(|n| !n.is_switch()) {
            let (Some(address), Some(primary)) = (node.address, fabric.primary_interface(node.id.as_str()))
            else {
                debug!(node = %node.id, "no primary address to assign");
                continue;
            };
            let target = || MaterializationTarget::Address {
                node: node.id.clone(),
                interface: primary.to_string(),
            };

            let live = self
                .node_mut(node.id.as_str())
                .map_err(|_| (target(), SubstrateError::UnknownStack(node.id.to_string())))?;
            let iface = live.interface_mut(primary).ok_or_else(|| {
                (
                    target(),
                    SubstrateError::UnknownInterface {
                        stack: node.id.to_string(),
                        interface: primary.to_string(),
                    },
                )
            })?;
            substrate
                .assign_address(&iface.handle, address)
                .await
                .map_err(|e| (target(), e))?;
            iface.addresses.push(address);
        }

        Ok(())
    }

    fn stack_of(&self, node: &NodeId) -> std::result::Result<StackHandle, SubstrateError> {
        self.node(node.as_str())
            .map(|n| n.stack.clone())
            .map_err(|_| SubstrateError::UnknownStack(node.to_string()))
    }

    /// Disable forwarding and destroy stacks in reverse creation order,
    /// logging rather than failing on errors.
    async fn teardown(&mut self) {
        let substrate = Arc::clone(&self.substrate);
        for node in self.nodes.iter_mut().rev() {
            if node.forwarding {
                match substrate.set_forwarding(&node.stack, false).await {
                    Ok(()) => node.forwarding = false,
                    Err(e) => warn!(node = %node.id(), error = %e, "failed to disable forwarding"),
                }
            }
            if let Err(e) = substrate.destroy_stack(&node.stack).await {
                warn!(node = %node.id(), error = %e, "failed to destroy stack");
            }
        }
    }

    /// Tear the topology down. Calling this again is a no-op.
    pub async fn stop(&mut self) {
        if self.phase == Phase::Stopped {
            debug!("topology already stopped");
            return;
        }
        info!("*** Stopping network");
        self.teardown().await;
        self.phase = Phase::Stopped;
        info!("Network stopped");
    }
}

impl Drop for LiveTopology {
    fn drop(&mut self) {
        if self.phase != Phase::Stopped {
            warn!(
                nodes = self.nodes.len(),
                phase = %self.phase,
                "live topology dropped without stop(); its stacks are left behind"
            );
        }
    }
}

/// Materialize declared nodes and links on `substrate`.
///
/// Stacks are created in declaration order, routers get forwarding before
/// any link is attached, links follow in declaration order and primary
/// addresses come last. On failure everything created so far is torn down
/// and the error names the node, link or address that failed.
pub async fn materialize(
    substrate: Arc<dyn Substrate>,
    registry: &NodeRegistry,
    fabric: &LinkFabric,
) -> Result<LiveTopology> {
    let mut live = LiveTopology {
        substrate,
        nodes: Vec::with_capacity(registry.len()),
        index: HashMap::with_capacity(registry.len()),
        phase: Phase::Materialized,
    };

    if let Err((target, source)) = live.build(registry, fabric).await {
        warn!(%target, error = %source, "materialization failed, tearing down");
        live.teardown().await;
        live.phase = Phase::Stopped;
        return Err(LabError::Materialization { target, source });
    }

    info!(
        nodes = registry.len(),
        links = fabric.len(),
        "topology materialized"
    );
    Ok(live)
}
