//! Fluent construction of [`Scenario`]s
//!
//! Addresses are given as strings. The first one that fails to parse is
//! remembered and reported by [`ScenarioBuilder::build`].

use super::{LinkSpec, NodeSpec, Scenario};
use crate::errors::{LabError, Result};
use crate::link::{Endpoint, Shaping};
use crate::node::{FailMode, NodeId, Role};
use crate::probe::ProbeSpec;
use crate::routing::{Destination, Route};
use ipnetwork::IpNetwork;
use std::net::IpAddr;
use std::path::PathBuf;
use std::str::FromStr;

pub struct ScenarioBuilder {
    scenario: Scenario,
    error: Option<LabError>,
}

impl ScenarioBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            scenario: Scenario {
                name: name.into(),
                description: String::new(),
                nodes: Vec::new(),
                links: Vec::new(),
                routes: Vec::new(),
                probes: Vec::new(),
                output: None,
            },
            error: None,
        }
    }

    fn parse<T>(&mut self, value: &str) -> Option<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match value.parse() {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                self.error.get_or_insert(LabError::InvalidAddress {
                    value: value.to_string(),
                    reason: e.to_string(),
                });
                None
            }
        }
    }

    pub fn description(mut self, desc: impl Into<String>) -> Self {
        self.scenario.description = desc.into();
        self
    }

    fn node(mut self, id: impl Into<NodeId>, role: Role, address: Option<&str>) -> Self {
        let address = address.and_then(|a| self.parse::<IpNetwork>(a));
        self.scenario.nodes.push(NodeSpec {
            id: id.into(),
            role,
            address,
            fail_mode: None,
        });
        self
    }

    pub fn host(self, id: impl Into<NodeId>, address: &str) -> Self {
        self.node(id, Role::Host, Some(address))
    }

    pub fn router(self, id: impl Into<NodeId>, address: &str) -> Self {
        self.node(id, Role::Router, Some(address))
    }

    pub fn switch(self, id: impl Into<NodeId>) -> Self {
        self.node(id, Role::Switch, None)
    }

    pub fn switch_with_mode(mut self, id: impl Into<NodeId>, mode: FailMode) -> Self {
        self.scenario.nodes.push(NodeSpec {
            id: id.into(),
            role: Role::Switch,
            address: None,
            fail_mode: Some(mode),
        });
        self
    }

    pub fn link(mut self, a: impl Into<Endpoint>, b: impl Into<Endpoint>) -> Self {
        self.scenario.links.push(LinkSpec {
            a: a.into(),
            b: b.into(),
            shaping: None,
        });
        self
    }

    pub fn shaped_link(mut self, a: impl Into<Endpoint>, b: impl Into<Endpoint>, shaping: Shaping) -> Self {
        self.scenario.links.push(LinkSpec {
            a: a.into(),
            b: b.into(),
            shaping: Some(shaping),
        });
        self
    }

    /// Secondary address on a node's interface
    pub fn address(mut self, node: impl Into<NodeId>, interface: impl Into<String>, address: &str) -> Self {
        if let Some(address) = self.parse::<IpNetwork>(address) {
            self.scenario
                .routes
                .push(Route::address(node, interface, address));
        }
        self
    }

    pub fn default_route(mut self, node: impl Into<NodeId>, via: &str) -> Self {
        if let Some(via) = self.parse::<IpAddr>(via) {
            self.scenario.routes.push(Route::default_via(node, via));
        }
        self
    }

    /// Static route to `destination` (CIDR or `default`) through `via`
    pub fn route(mut self, node: impl Into<NodeId>, destination: &str, via: &str) -> Self {
        let destination = self.parse::<Destination>(destination);
        let via = self.parse::<IpAddr>(via);
        if let (Some(destination), Some(via)) = (destination, via) {
            self.scenario.routes.push(Route::Static {
                node: node.into(),
                destination,
                via,
                interface: None,
            });
        }
        self
    }

    pub fn add_route(mut self, route: Route) -> Self {
        self.scenario.routes.push(route);
        self
    }

    pub fn probe(mut self, source: impl Into<NodeId>, destination: impl Into<String>) -> Self {
        self.scenario.probes.push(ProbeSpec::new(source, destination));
        self
    }

    pub fn output(mut self, path: impl Into<PathBuf>) -> Self {
        self.scenario.output = Some(path.into());
        self
    }

    /// Finish the scenario, checking that it declares cleanly.
    pub fn build(self) -> Result<Scenario> {
        if let Some(error) = self.error {
            return Err(error);
        }
        self.scenario.declare()?;
        Ok(self.scenario)
    }
}
