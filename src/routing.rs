//! Routing configurator
//!
//! Applies secondary addresses and static routes to an already
//! materialized topology, strictly in the order given. A static route is
//! only accepted when its next hop sits inside a subnet configured on one
//! of the node's live interfaces.

use crate::errors::{LabError, Result};
use crate::node::{FailMode, NodeId};
use crate::substrate::RouteRequest;
use crate::topology::{LiveTopology, Phase};
use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Route destination: `default` or a network in CIDR form
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Destination {
    Default,
    Network(IpNetwork),
}

impl Destination {
    /// Prefix length used for longest-prefix matching
    pub fn prefix(&self) -> u8 {
        match self {
            Self::Default => 0,
            Self::Network(net) => net.prefix(),
        }
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        match self {
            Self::Default => true,
            Self::Network(net) => net.contains(ip),
        }
    }
}

impl FromStr for Destination {
    type Err = LabError;

    fn from_str(s: &str) -> Result<Self> {
        if s.eq_ignore_ascii_case("default") {
            return Ok(Self::Default);
        }
        let invalid = |reason: String| LabError::InvalidAddress {
            value: s.to_string(),
            reason,
        };
        let net: IpNetwork = s.parse().map_err(|e| invalid(format!("{e}")))?;
        // Keep the network address only: 10.0.2.7/24 means 10.0.2.0/24
        let net = IpNetwork::new(net.network(), net.prefix()).map_err(|e| invalid(format!("{e}")))?;
        Ok(Self::Network(net))
    }
}

impl TryFrom<String> for Destination {
    type Error = LabError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<Destination> for String {
    fn from(destination: Destination) -> Self {
        destination.to_string()
    }
}

impl From<IpNetwork> for Destination {
    fn from(net: IpNetwork) -> Self {
        match IpNetwork::new(net.network(), net.prefix()) {
            Ok(normalized) => Self::Network(normalized),
            Err(_) => Self::Network(net),
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => f.write_str("default"),
            Self::Network(net) => write!(f, "{}/{}", net.network(), net.prefix()),
        }
    }
}

/// One routing-table entry to apply
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Route {
    /// Extra address on an existing interface
    Address {
        node: NodeId,
        interface: String,
        address: IpNetwork,
    },
    Static {
        node: NodeId,
        destination: Destination,
        via: IpAddr,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        interface: Option<String>,
    },
}

impl Route {
    pub fn address(node: impl Into<NodeId>, interface: impl Into<String>, address: IpNetwork) -> Self {
        Self::Address {
            node: node.into(),
            interface: interface.into(),
            address,
        }
    }

    pub fn default_via(node: impl Into<NodeId>, via: IpAddr) -> Self {
        Self::Static {
            node: node.into(),
            destination: Destination::Default,
            via,
            interface: None,
        }
    }

    pub fn network(node: impl Into<NodeId>, destination: IpNetwork, via: IpAddr) -> Self {
        Self::Static {
            node: node.into(),
            destination: destination.into(),
            via,
            interface: None,
        }
    }

    /// Pin a static route to an egress interface. No effect on address entries.
    pub fn with_interface(mut self, dev: impl Into<String>) -> Self {
        if let Self::Static { interface, .. } = &mut self {
            *interface = Some(dev.into());
        }
        self
    }

    pub fn node(&self) -> &NodeId {
        match self {
            Self::Address { node, .. } | Self::Static { node, .. } => node,
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Address {
                node,
                interface,
                address,
            } => write!(f, "{node}: addr {address} dev {interface}"),
            Self::Static {
                node,
                destination,
                via,
                interface,
            } => {
                write!(f, "{node}: route {destination} via {via}")?;
                if let Some(dev) = interface {
                    write!(f, " dev {dev}")?;
                }
                Ok(())
            }
        }
    }
}

#[derive(Debug)]
pub struct RouteFailure {
    /// Position of the entry in the applied list
    pub index: usize,
    pub route: Route,
    pub error: LabError,
}

#[derive(Debug, Default)]
pub struct RoutingReport {
    pub applied: usize,
    pub failures: Vec<RouteFailure>,
}

impl RoutingReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

fn route_error(node: &NodeId, reason: impl Into<String>) -> LabError {
    LabError::RouteApplication {
        node: node.clone(),
        reason: reason.into(),
    }
}

/// Apply `routes` in order. Individual failures are collected, not fatal.
pub async fn apply_routes(live: &mut LiveTopology, routes: &[Route]) -> Result<RoutingReport> {
    live.require("routing", Phase::allows_routing)?;
    info!("*** Configuring routes");

    let mut report = RoutingReport::default();
    for (index, route) in routes.iter().enumerate() {
        match apply_route(live, route).await {
            Ok(()) => report.applied += 1,
            Err(error) => {
                warn!(index, %route, %error, "route not applied");
                report.failures.push(RouteFailure {
                    index,
                    route: route.clone(),
                    error,
                });
            }
        }
    }

    live.advance(Phase::Routed);
    info!(
        applied = report.applied,
        failed = report.failures.len(),
        "routing complete"
    );
    Ok(report)
}

/// Apply a single entry.
pub async fn apply_route(live: &mut LiveTopology, route: &Route) -> Result<()> {
    live.require("routing", Phase::allows_routing)?;
    let substrate = Arc::clone(live.substrate());

    match route {
        Route::Address {
            node,
            interface,
            address,
        } => {
            let live_node = live.node_mut(node.as_str())?;
            let iface = live_node
                .interface_mut(interface)
                .ok_or_else(|| route_error(node, format!("interface '{interface}' is not materialized")))?;
            substrate
                .assign_address(&iface.handle, *address)
                .await
                .map_err(|e| route_error(node, e.to_string()))?;
            iface.addresses.push(*address);
        }
        Route::Static {
            node,
            destination,
            via,
            interface,
        } => {
            let live_node = live.node_mut(node.as_str())?;
            if let Some(dev) = interface {
                if live_node.interface(dev).is_none() {
                    return Err(route_error(node, format!("interface '{dev}' is not materialized")));
                }
            }

            let on_link = live_node
                .interfaces
                .iter()
                .filter(|i| interface.as_deref().map_or(true, |dev| dev == i.name()))
                .flat_map(|i| i.addresses.iter())
                .any(|addr| addr.contains(*via));
            if !on_link {
                return Err(route_error(
                    node,
                    format!("next hop {via} is not on any materialized link"),
                ));
            }

            let request = RouteRequest {
                destination: *destination,
                via: *via,
                interface: interface.clone(),
            };
            substrate
                .add_route(&live_node.stack, &request)
                .await
                .map_err(|e| route_error(node, e.to_string()))?;
            live_node.routes.push(request);
        }
    }

    debug!(%route, "applied");
    Ok(())
}

/// Switch a live switch between secure and standalone operation.
pub async fn set_fail_mode(live: &mut LiveTopology, switch: &str, mode: FailMode) -> Result<()> {
    live.require("fail mode change", Phase::allows_routing)?;
    let substrate = Arc::clone(live.substrate());

    let node = live.node_mut(switch)?;
    if !node.node.is_switch() {
        return Err(LabError::NotASwitch(node.id().clone()));
    }
    substrate
        .set_fail_mode(&node.stack, mode)
        .await
        .map_err(|e| route_error(node.id(), e.to_string()))?;
    node.fail_mode = Some(mode);
    info!(switch, %mode, "fail mode set");
    Ok(())
}
