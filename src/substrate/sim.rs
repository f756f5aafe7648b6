//! In-memory emulation substrate
//!
//! Models just enough of a Linux stack to answer reachability questions
//! deterministically: veth peers, interface addresses, connected and static
//! routes, IP forwarding, and switches that flood between ports only in
//! standalone mode. Links whose shaping drops every packet behave as down.
//!
//! Every call is appended to a journal so tests can assert on ordering, and
//! failures can be injected per node or per interface name.

use super::{IfaceHandle, RouteRequest, StackHandle, Substrate};
use crate::config::ProbeConfig;
use crate::errors::SubstrateError;
use crate::link::Shaping;
use crate::node::{FailMode, NodeId, Role};
use async_trait::async_trait;
use ipnetwork::IpNetwork;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::net::IpAddr;
use tracing::debug;

/// Forwarding steps before a packet is considered looping
const MAX_HOPS: usize = 32;
const DEFAULT_TTL: u8 = 64;

/// Something the substrate was asked to do
#[derive(Clone, Debug, PartialEq)]
pub enum SimEvent {
    StackCreated {
        node: NodeId,
        role: Role,
    },
    StackDestroyed {
        node: NodeId,
    },
    LinkCreated {
        a: NodeId,
        interface_a: String,
        b: NodeId,
        interface_b: String,
        shaping: Option<Shaping>,
    },
    AddressAssigned {
        node: NodeId,
        interface: String,
        address: IpNetwork,
    },
    Forwarding {
        node: NodeId,
        enabled: bool,
    },
    RouteAdded {
        node: NodeId,
        route: RouteRequest,
    },
    FailMode {
        node: NodeId,
        mode: FailMode,
    },
    Probe {
        node: NodeId,
        destination: String,
        success: bool,
    },
}

type IfaceKey = (String, String);

#[derive(Debug)]
struct SimStack {
    node: NodeId,
    role: Role,
    forwarding: bool,
    fail_mode: FailMode,
    interfaces: Vec<String>,
    routes: Vec<RouteRequest>,
}

#[derive(Debug)]
struct SimIface {
    peer: IfaceKey,
    shaping: Option<Shaping>,
    addresses: Vec<IpNetwork>,
}

impl SimIface {
    fn is_down(&self) -> bool {
        self.shaping.as_ref().is_some_and(Shaping::drops_all)
    }
}

#[derive(Debug, Default)]
struct SimState {
    stacks: HashMap<String, SimStack>,
    interfaces: HashMap<IfaceKey, SimIface>,
    journal: Vec<SimEvent>,
    fail_stacks: HashSet<NodeId>,
    fail_links: HashSet<String>,
    fail_addresses: HashSet<String>,
}

/// Why a packet did not arrive
enum Undelivered {
    /// The sender has no route at all
    NoRoute,
    /// The sender could not resolve the next hop on the link
    NeighborUnreachable,
    /// Lost somewhere past the sender
    Dropped,
}

impl SimState {
    fn stack(&self, name: &str) -> Result<&SimStack, SubstrateError> {
        self.stacks
            .get(name)
            .ok_or_else(|| SubstrateError::UnknownStack(name.to_string()))
    }

    fn stack_mut(&mut self, name: &str) -> Result<&mut SimStack, SubstrateError> {
        self.stacks
            .get_mut(name)
            .ok_or_else(|| SubstrateError::UnknownStack(name.to_string()))
    }

    fn addresses_of<'a>(
        &'a self,
        stack: &'a str,
    ) -> impl Iterator<Item = (&'a str, &'a IpNetwork)> + 'a {
        self.stacks
            .get(stack)
            .into_iter()
            .flat_map(|s| s.interfaces.iter())
            .filter_map(move |iface| {
                self.interfaces
                    .get(&(stack.to_string(), iface.clone()))
                    .map(|i| (iface.as_str(), i))
            })
            .flat_map(|(name, iface)| iface.addresses.iter().map(move |a| (name, a)))
    }

    fn owns(&self, stack: &str, ip: IpAddr) -> bool {
        self.addresses_of(stack).any(|(_, addr)| addr.ip() == ip)
    }

    /// Longest-prefix match over connected subnets and static routes.
    /// Connected routes win ties. Returns the egress interface and the
    /// address to resolve on that link.
    fn lookup(&self, stack: &str, destination: IpAddr) -> Option<(String, IpAddr)> {
        let mut best: Option<(u8, bool, String, IpAddr)> = None;
        let mut consider = |prefix: u8, connected: bool, iface: &str, next_hop: IpAddr| {
            let better = match &best {
                None => true,
                Some((p, c, _, _)) => prefix > *p || (prefix == *p && connected && !*c),
            };
            if better {
                best = Some((prefix, connected, iface.to_string(), next_hop));
            }
        };

        for (iface, addr) in self.addresses_of(stack) {
            if addr.contains(destination) {
                consider(addr.prefix(), true, iface, destination);
            }
        }

        if let Some(s) = self.stacks.get(stack) {
            for route in &s.routes {
                if !route.destination.contains(destination) {
                    continue;
                }
                let egress = match &route.interface {
                    Some(dev) => Some(dev.clone()),
                    None => self
                        .addresses_of(stack)
                        .find(|(_, addr)| addr.contains(route.via))
                        .map(|(iface, _)| iface.to_string()),
                };
                if let Some(egress) = egress {
                    consider(route.destination.prefix(), false, &egress, route.via);
                }
            }
        }

        best.map(|(_, _, iface, next_hop)| (iface, next_hop))
    }

    /// Walk the L2 segment behind `(stack, iface)` looking for the stack
    /// that answers for `target`.
    fn resolve_neighbor(&self, stack: &str, iface: &str, target: IpAddr) -> Option<String> {
        let start = self.interfaces.get(&(stack.to_string(), iface.to_string()))?;
        if start.is_down() {
            return None;
        }

        let mut visited: HashSet<IfaceKey> = HashSet::new();
        let mut queue: VecDeque<IfaceKey> = VecDeque::from([start.peer.clone()]);

        while let Some(key) = queue.pop_front() {
            if !visited.insert(key.clone()) {
                continue;
            }
            let Some(node) = self.stacks.get(&key.0) else {
                continue;
            };

            if node.role == Role::Switch {
                if node.fail_mode != FailMode::Standalone {
                    continue;
                }
                for port in node.interfaces.iter().filter(|p| **p != key.1) {
                    if let Some(out) = self.interfaces.get(&(key.0.clone(), port.clone())) {
                        if !out.is_down() {
                            queue.push_back(out.peer.clone());
                        }
                    }
                }
            } else if self.owns(&key.0, target) {
                return Some(key.0);
            }
        }
        None
    }

    /// Carry a packet from `source` towards `destination`. On arrival,
    /// returns the receiving stack and how many routers forwarded it.
    fn deliver(&self, source: &str, destination: IpAddr) -> Result<(String, u8), Undelivered> {
        let mut current = source.to_string();
        let mut forwarded = 0u8;

        for _ in 0..MAX_HOPS {
            if self.owns(&current, destination) {
                return Ok((current, forwarded));
            }
            let at_source = current == source;
            if !at_source && !self.stacks.get(&current).is_some_and(|s| s.forwarding) {
                return Err(Undelivered::Dropped);
            }

            let (egress, next_hop) = match self.lookup(&current, destination) {
                Some(found) => found,
                None if at_source => return Err(Undelivered::NoRoute),
                None => return Err(Undelivered::Dropped),
            };

            let neighbor = match self.resolve_neighbor(&current, &egress, next_hop) {
                Some(n) => n,
                None if at_source => return Err(Undelivered::NeighborUnreachable),
                None => return Err(Undelivered::Dropped),
            };

            if !at_source {
                forwarded = forwarded.saturating_add(1);
            }
            current = neighbor;
        }
        Err(Undelivered::Dropped)
    }

    /// Source address the stack would put on a packet to `destination`.
    fn source_address(&self, stack: &str, destination: IpAddr) -> Option<IpAddr> {
        if self.owns(stack, destination) {
            return Some(destination);
        }
        let (egress, next_hop) = self.lookup(stack, destination)?;
        let on_egress: Vec<&IpNetwork> = self
            .addresses_of(stack)
            .filter(|(iface, _)| *iface == egress)
            .map(|(_, addr)| addr)
            .collect();
        on_egress
            .iter()
            .find(|addr| addr.contains(next_hop))
            .or_else(|| on_egress.first())
            .map(|addr| addr.ip())
    }

    fn ping(&self, stack: &str, destination: &str) -> (String, bool) {
        let Ok(target) = destination.parse::<IpAddr>() else {
            return (
                format!("ping: {destination}: Name or service not known\n"),
                false,
            );
        };

        let header = format!("PING {target} ({target}) 56(84) bytes of data.\n");
        let lost = |extra: &str, errors: bool| {
            let errors = if errors { "+1 errors, " } else { "" };
            format!(
                "{header}{extra}\n--- {target} ping statistics ---\n\
                 1 packets transmitted, 0 received, {errors}100% packet loss, time 0ms\n\n"
            )
        };

        let request = self.deliver(stack, target);
        let reached = match request {
            Ok((reached, _)) => reached,
            Err(Undelivered::NoRoute) => {
                return ("ping: connect: Network is unreachable\n".to_string(), false)
            }
            Err(Undelivered::NeighborUnreachable) => {
                let from = self
                    .source_address(stack, target)
                    .map(|ip| ip.to_string())
                    .unwrap_or_else(|| stack.to_string());
                let line = format!("From {from} icmp_seq=1 Destination Host Unreachable\n");
                return (lost(&line, true), false);
            }
            Err(Undelivered::Dropped) => return (lost("", false), false),
        };

        let Some(reply_to) = self.source_address(stack, target) else {
            return (lost("", false), false);
        };
        match self.deliver(&reached, reply_to) {
            Ok((back, forwarded)) if back == stack => {
                let ttl = DEFAULT_TTL.saturating_sub(forwarded);
                let output = format!(
                    "{header}64 bytes from {target}: icmp_seq=1 ttl={ttl} time=0.050 ms\n\n\
                     --- {target} ping statistics ---\n\
                     1 packets transmitted, 1 received, 0% packet loss, time 0ms\n\
                     rtt min/avg/max/mdev = 0.050/0.050/0.050/0.000 ms\n"
                );
                (output, true)
            }
            _ => (lost("", false), false),
        }
    }
}

/// Deterministic in-memory substrate
#[derive(Debug, Default)]
pub struct SimSubstrate {
    state: Mutex<SimState>,
}

impl SimSubstrate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `create_stack` fail for `node`.
    pub fn fail_stack_creation(&self, node: impl Into<NodeId>) {
        self.state.lock().fail_stacks.insert(node.into());
    }

    /// Make `create_link_pair` fail when either end is named `interface`.
    pub fn fail_link_creation(&self, interface: impl Into<String>) {
        self.state.lock().fail_links.insert(interface.into());
    }

    /// Make `assign_address` fail on interfaces named `interface`.
    pub fn fail_address_assignment(&self, interface: impl Into<String>) {
        self.state.lock().fail_addresses.insert(interface.into());
    }

    pub fn journal(&self) -> Vec<SimEvent> {
        self.state.lock().journal.clone()
    }

    /// Forwarding flag of a live stack; `None` once it is gone.
    pub fn forwarding(&self, node: &str) -> Option<bool> {
        self.state.lock().stacks.get(node).map(|s| s.forwarding)
    }

    pub fn stack_exists(&self, node: &str) -> bool {
        self.state.lock().stacks.contains_key(node)
    }

    pub fn stack_count(&self) -> usize {
        self.state.lock().stacks.len()
    }

    pub fn interfaces(&self, node: &str) -> Vec<String> {
        self.state
            .lock()
            .stacks
            .get(node)
            .map(|s| s.interfaces.clone())
            .unwrap_or_default()
    }

    pub fn addresses(&self, node: &str) -> Vec<IpNetwork> {
        let state = self.state.lock();
        let addresses = state.addresses_of(node).map(|(_, addr)| *addr).collect();
        addresses
    }

    pub fn routes(&self, node: &str) -> Vec<RouteRequest> {
        self.state
            .lock()
            .stacks
            .get(node)
            .map(|s| s.routes.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Substrate for SimSubstrate {
    async fn create_stack(&self, node: &NodeId, role: Role) -> Result<StackHandle, SubstrateError> {
        let mut state = self.state.lock();
        if state.fail_stacks.contains(node) {
            return Err(SubstrateError::Injected(format!("create stack '{node}'")));
        }
        let name = node.to_string();
        if state.stacks.contains_key(&name) {
            return Err(SubstrateError::CommandFailed {
                command: format!("create stack {name}"),
                stderr: "File exists".to_string(),
            });
        }

        state.stacks.insert(
            name.clone(),
            SimStack {
                node: node.clone(),
                role,
                forwarding: false,
                fail_mode: FailMode::default(),
                interfaces: Vec::new(),
                routes: Vec::new(),
            },
        );
        state.journal.push(SimEvent::StackCreated {
            node: node.clone(),
            role,
        });
        debug!(node = %node, %role, "sim: created stack");
        Ok(StackHandle::new(node.clone(), role, name))
    }

    async fn destroy_stack(&self, stack: &StackHandle) -> Result<(), SubstrateError> {
        let mut state = self.state.lock();
        let removed = state
            .stacks
            .remove(stack.name())
            .ok_or_else(|| SubstrateError::UnknownStack(stack.name().to_string()))?;

        // Deleting one end of a veth pair deletes its peer too
        for iface in &removed.interfaces {
            let key = (stack.name().to_string(), iface.clone());
            if let Some(gone) = state.interfaces.remove(&key) {
                state.interfaces.remove(&gone.peer);
                if let Some(peer_stack) = state.stacks.get_mut(&gone.peer.0) {
                    peer_stack.interfaces.retain(|name| *name != gone.peer.1);
                }
            }
        }

        state.journal.push(SimEvent::StackDestroyed {
            node: removed.node,
        });
        debug!(stack = stack.name(), "sim: destroyed stack");
        Ok(())
    }

    async fn create_link_pair(
        &self,
        a: &StackHandle,
        name_a: &str,
        b: &StackHandle,
        name_b: &str,
        shaping: Option<&Shaping>,
    ) -> Result<(IfaceHandle, IfaceHandle), SubstrateError> {
        let mut state = self.state.lock();
        if state.fail_links.contains(name_a) || state.fail_links.contains(name_b) {
            return Err(SubstrateError::Injected(format!(
                "create link {name_a} <-> {name_b}"
            )));
        }

        let key_a = (a.name().to_string(), name_a.to_string());
        let key_b = (b.name().to_string(), name_b.to_string());
        for (handle, key) in [(a, &key_a), (b, &key_b)] {
            state.stack(handle.name())?;
            if state.interfaces.contains_key(key) || key_a == key_b {
                return Err(SubstrateError::CommandFailed {
                    command: format!("create link {name_a} <-> {name_b}"),
                    stderr: format!("RTNETLINK answers: File exists ({})", key.1),
                });
            }
        }

        let shaping = shaping.cloned();
        state.interfaces.insert(
            key_a.clone(),
            SimIface {
                peer: key_b.clone(),
                shaping: shaping.clone(),
                addresses: Vec::new(),
            },
        );
        state.interfaces.insert(
            key_b.clone(),
            SimIface {
                peer: key_a,
                shaping: shaping.clone(),
                addresses: Vec::new(),
            },
        );
        state.stack_mut(a.name())?.interfaces.push(name_a.to_string());
        state.stack_mut(b.name())?.interfaces.push(name_b.to_string());

        state.journal.push(SimEvent::LinkCreated {
            a: a.node().clone(),
            interface_a: name_a.to_string(),
            b: b.node().clone(),
            interface_b: name_b.to_string(),
            shaping,
        });
        debug!("sim: linked {}:{} <-> {}:{}", a.name(), name_a, b.name(), name_b);
        Ok((
            IfaceHandle::new(a.clone(), name_a),
            IfaceHandle::new(b.clone(), name_b),
        ))
    }

    async fn assign_address(
        &self,
        iface: &IfaceHandle,
        address: IpNetwork,
    ) -> Result<(), SubstrateError> {
        let mut state = self.state.lock();
        if state.fail_addresses.contains(iface.name()) {
            return Err(SubstrateError::Injected(format!(
                "add {address} to {}",
                iface.name()
            )));
        }
        let stack = iface.stack().name().to_string();
        state.stack(&stack)?;

        let entry = state
            .interfaces
            .get_mut(&(stack.clone(), iface.name().to_string()))
            .ok_or_else(|| SubstrateError::UnknownInterface {
                stack: stack.clone(),
                interface: iface.name().to_string(),
            })?;
        if entry.addresses.contains(&address) {
            return Err(SubstrateError::CommandFailed {
                command: format!("addr add {address} dev {}", iface.name()),
                stderr: "RTNETLINK answers: File exists".to_string(),
            });
        }
        entry.addresses.push(address);

        state.journal.push(SimEvent::AddressAssigned {
            node: iface.stack().node().clone(),
            interface: iface.name().to_string(),
            address,
        });
        Ok(())
    }

    async fn set_forwarding(&self, stack: &StackHandle, enabled: bool) -> Result<(), SubstrateError> {
        let mut state = self.state.lock();
        state.stack_mut(stack.name())?.forwarding = enabled;
        state.journal.push(SimEvent::Forwarding {
            node: stack.node().clone(),
            enabled,
        });
        Ok(())
    }

    async fn add_route(&self, stack: &StackHandle, route: &RouteRequest) -> Result<(), SubstrateError> {
        let mut state = self.state.lock();
        state.stack(stack.name())?;

        if let Some(dev) = &route.interface {
            if !state
                .interfaces
                .contains_key(&(stack.name().to_string(), dev.clone()))
            {
                return Err(SubstrateError::UnknownInterface {
                    stack: stack.name().to_string(),
                    interface: dev.clone(),
                });
            }
        }

        let gateway_reachable = state
            .addresses_of(stack.name())
            .filter(|(iface, _)| route.interface.as_deref().map_or(true, |dev| dev == *iface))
            .any(|(_, addr)| addr.contains(route.via));
        if !gateway_reachable {
            return Err(SubstrateError::CommandFailed {
                command: format!("route add {route}"),
                stderr: "Error: Nexthop has invalid gateway.".to_string(),
            });
        }

        state.stack_mut(stack.name())?.routes.push(route.clone());
        state.journal.push(SimEvent::RouteAdded {
            node: stack.node().clone(),
            route: route.clone(),
        });
        Ok(())
    }

    async fn set_fail_mode(&self, stack: &StackHandle, mode: FailMode) -> Result<(), SubstrateError> {
        let mut state = self.state.lock();
        let entry = state.stack_mut(stack.name())?;
        if entry.role != Role::Switch {
            return Err(SubstrateError::Unsupported(format!(
                "fail mode on {} stack '{}'",
                entry.role,
                stack.name()
            )));
        }
        entry.fail_mode = mode;
        state.journal.push(SimEvent::FailMode {
            node: stack.node().clone(),
            mode,
        });
        Ok(())
    }

    async fn probe(
        &self,
        stack: &StackHandle,
        destination: &str,
        _config: &ProbeConfig,
    ) -> Result<String, SubstrateError> {
        let mut state = self.state.lock();
        state.stack(stack.name())?;

        let (output, success) = state.ping(stack.name(), destination);
        state.journal.push(SimEvent::Probe {
            node: stack.node().clone(),
            destination: destination.to_string(),
            success,
        });
        debug!(stack = stack.name(), destination, success, "sim: probe");
        Ok(output)
    }
}
