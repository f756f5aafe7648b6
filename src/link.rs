//! Link fabric: declared point-to-point links between node endpoints
//!
//! Interface names are resolved at declaration time. An omitted name becomes
//! `<node>-eth<N>` with the lowest `N` not already taken on that node.

use crate::errors::{LabError, Result};
use crate::node::{NodeId, NodeRegistry};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// One side of a link as declared
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub node: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<String>,
}

impl Endpoint {
    pub fn new(node: impl Into<NodeId>) -> Self {
        Self {
            node: node.into(),
            interface: None,
        }
    }

    pub fn named(node: impl Into<NodeId>, interface: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            interface: Some(interface.into()),
        }
    }
}

impl From<&str> for Endpoint {
    fn from(node: &str) -> Self {
        Self::new(node)
    }
}

/// Traffic shaping applied to both ends of a link
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Shaping {
    pub bandwidth_mbit: Option<f64>,
    pub delay_ms: Option<u32>,
    pub jitter_ms: Option<u32>,
    pub loss_percent: Option<f32>,
}

impl Shaping {
    pub fn is_empty(&self) -> bool {
        self.bandwidth_mbit.is_none()
            && self.delay_ms.is_none()
            && self.jitter_ms.is_none()
            && self.loss_percent.is_none()
    }

    /// A link that drops everything is treated as down.
    pub fn drops_all(&self) -> bool {
        self.loss_percent.is_some_and(|loss| loss >= 100.0)
    }
}

impl fmt::Display for Shaping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(bw) = self.bandwidth_mbit {
            parts.push(format!("{bw}Mbit"));
        }
        if let Some(delay) = self.delay_ms {
            parts.push(format!("{delay}ms delay"));
        }
        if let Some(jitter) = self.jitter_ms {
            parts.push(format!("{jitter}ms jitter"));
        }
        if let Some(loss) = self.loss_percent {
            parts.push(format!("{loss}% loss"));
        }
        if parts.is_empty() {
            f.write_str("unshaped")
        } else {
            f.write_str(&parts.join(", "))
        }
    }
}

/// Endpoint with its interface name resolved
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BoundEndpoint {
    pub node: NodeId,
    pub interface: String,
}

impl fmt::Display for BoundEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.node, self.interface)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Link {
    pub a: BoundEndpoint,
    pub b: BoundEndpoint,
    pub shaping: Option<Shaping>,
}

#[derive(Clone, Debug, Default)]
pub struct LinkFabric {
    links: Vec<Link>,
    taken: HashMap<NodeId, BTreeSet<String>>,
}

impl LinkFabric {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a link between two declared nodes.
    pub fn declare(
        &mut self,
        registry: &NodeRegistry,
        a: impl Into<Endpoint>,
        b: impl Into<Endpoint>,
        shaping: Option<Shaping>,
    ) -> Result<&Link> {
        let a = a.into();
        let b = b.into();
        registry.get(a.node.as_str())?;
        registry.get(b.node.as_str())?;

        // Resolve both names before recording anything so a failure leaves
        // the fabric untouched.
        let name_a = self.resolve(&a, None)?;
        let name_b = self.resolve(&b, Some((&a.node, name_a.as_str())))?;

        self.taken
            .entry(a.node.clone())
            .or_default()
            .insert(name_a.clone());
        self.taken
            .entry(b.node.clone())
            .or_default()
            .insert(name_b.clone());

        let shaping = shaping.filter(|s| !s.is_empty());
        self.links.push(Link {
            a: BoundEndpoint {
                node: a.node,
                interface: name_a,
            },
            b: BoundEndpoint {
                node: b.node,
                interface: name_b,
            },
            shaping,
        });
        Ok(&self.links[self.links.len() - 1])
    }

    fn resolve(&self, endpoint: &Endpoint, pending: Option<(&NodeId, &str)>) -> Result<String> {
        let taken = self.taken.get(&endpoint.node);
        let is_taken = |name: &str| {
            taken.is_some_and(|set| set.contains(name))
                || pending.is_some_and(|(node, pending)| *node == endpoint.node && pending == name)
        };

        match &endpoint.interface {
            Some(name) => {
                if !is_valid_interface_name(name) {
                    return Err(LabError::InvalidInterfaceName(name.clone()));
                }
                if is_taken(name) {
                    return Err(LabError::DuplicateInterface {
                        node: endpoint.node.clone(),
                        interface: name.clone(),
                    });
                }
                Ok(name.clone())
            }
            None => {
                let name = (0..)
                    .map(|n| format!("{}-eth{}", endpoint.node, n))
                    .find(|candidate| !is_taken(candidate))
                    .unwrap_or_default();
                if !is_valid_interface_name(&name) {
                    return Err(LabError::InvalidInterfaceName(name));
                }
                Ok(name)
            }
        }
    }

    /// The interface a node's primary address lands on: its end of the
    /// first declared link touching it.
    pub fn primary_interface(&self, node: &str) -> Option<&str> {
        self.links.iter().find_map(|link| {
            if link.a.node.as_str() == node {
                Some(link.a.interface.as_str())
            } else if link.b.node.as_str() == node {
                Some(link.b.interface.as_str())
            } else {
                None
            }
        })
    }

    /// All interface names on a node, in declaration order.
    pub fn interfaces_of(&self, node: &str) -> Vec<&str> {
        let mut names = Vec::new();
        for link in &self.links {
            for end in [&link.a, &link.b] {
                if end.node.as_str() == node {
                    names.push(end.interface.as_str());
                }
            }
        }
        names
    }

    pub fn iter(&self) -> impl Iterator<Item = &Link> {
        self.links.iter()
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}

/// Validate interface name according to Linux rules
pub fn is_valid_interface_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 15
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        && !name.starts_with('-')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Role;
    use std::collections::HashSet;

    fn registry(ids: &[&str]) -> NodeRegistry {
        let mut registry = NodeRegistry::new();
        for id in ids {
            registry.declare(*id, Role::Host, None).unwrap();
        }
        registry
    }

    #[test]
    fn test_interface_name_validation() {
        assert!(is_valid_interface_name("eth0"));
        assert!(is_valid_interface_name("r1-eth2"));
        assert!(is_valid_interface_name("test_123"));

        assert!(!is_valid_interface_name(""));
        assert!(!is_valid_interface_name("this-name-is-way-too-long"));
        assert!(!is_valid_interface_name("-invalid"));
        assert!(!is_valid_interface_name("invalid@name"));
    }

    #[test]
    fn test_auto_names_take_first_free_index() {
        let registry = registry(&["h1", "r1", "r2"]);
        let mut fabric = LinkFabric::new();

        fabric
            .declare(&registry, "h1", Endpoint::named("r1", "r1-eth0"), None)
            .unwrap();
        fabric
            .declare(&registry, Endpoint::named("r1", "r1-eth2"), "r2", None)
            .unwrap();
        let link = fabric.declare(&registry, "r1", "r2", None).unwrap();

        // eth0 and eth2 are taken, so the auto name fills the gap
        assert_eq!(link.a.interface, "r1-eth1");
        assert_eq!(link.b.interface, "r2-eth1");
        assert_eq!(fabric.interfaces_of("r1"), vec!["r1-eth0", "r1-eth2", "r1-eth1"]);
    }

    #[test]
    fn test_auto_names_unique_per_node() {
        let registry = registry(&["a", "b", "c"]);
        let mut fabric = LinkFabric::new();
        for (x, y) in [("a", "b"), ("b", "c"), ("a", "c"), ("a", "b"), ("c", "a")] {
            fabric.declare(&registry, x, y, None).unwrap();
        }

        for node in ["a", "b", "c"] {
            let names = fabric.interfaces_of(node);
            let unique: HashSet<&str> = names.iter().copied().collect();
            assert_eq!(names.len(), unique.len(), "duplicate names on {node}: {names:?}");
        }
    }

    #[test]
    fn test_duplicate_interface_leaves_fabric_untouched() {
        let registry = registry(&["s1", "h1", "h2"]);
        let mut fabric = LinkFabric::new();
        fabric
            .declare(&registry, "h1", Endpoint::named("s1", "s1-eth1"), None)
            .unwrap();

        let err = fabric
            .declare(&registry, "h2", Endpoint::named("s1", "s1-eth1"), None)
            .unwrap_err();
        assert!(matches!(
            err,
            LabError::DuplicateInterface { ref node, ref interface }
                if node.as_str() == "s1" && interface == "s1-eth1"
        ));
        assert_eq!(fabric.len(), 1);
        assert_eq!(fabric.interfaces_of("h2"), Vec::<&str>::new());
    }

    #[test]
    fn test_unknown_endpoint() {
        let registry = registry(&["h1"]);
        let mut fabric = LinkFabric::new();
        assert!(matches!(
            fabric.declare(&registry, "h1", "ghost", None),
            Err(LabError::UnknownNode(_))
        ));
        assert!(fabric.is_empty());
    }

    #[test]
    fn test_invalid_interface_name() {
        let registry = registry(&["h1", "h2"]);
        let mut fabric = LinkFabric::new();
        assert!(matches!(
            fabric.declare(&registry, Endpoint::named("h1", "bad name"), "h2", None),
            Err(LabError::InvalidInterfaceName(_))
        ));
    }

    #[test]
    fn test_self_link_gets_distinct_names() {
        let registry = registry(&["r1"]);
        let mut fabric = LinkFabric::new();
        let link = fabric.declare(&registry, "r1", "r1", None).unwrap();
        assert_eq!(link.a.interface, "r1-eth0");
        assert_eq!(link.b.interface, "r1-eth1");
    }

    #[test]
    fn test_primary_interface_is_first_link() {
        let registry = registry(&["h1", "r1", "r2"]);
        let mut fabric = LinkFabric::new();
        fabric.declare(&registry, "h1", "r1", None).unwrap();
        fabric.declare(&registry, "r1", "r2", None).unwrap();

        assert_eq!(fabric.primary_interface("r1"), Some("r1-eth0"));
        assert_eq!(fabric.primary_interface("r2"), Some("r2-eth0"));
        assert_eq!(fabric.primary_interface("h9"), None);
    }

    #[test]
    fn test_empty_shaping_is_dropped() {
        let registry = registry(&["h1", "h2"]);
        let mut fabric = LinkFabric::new();
        let link = fabric
            .declare(&registry, "h1", "h2", Some(Shaping::default()))
            .unwrap();
        assert!(link.shaping.is_none());
    }
}
