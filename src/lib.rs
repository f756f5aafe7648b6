//! Namespace-backed network lab
//!
//! Declare hosts, routers and switches, wire them together with (optionally
//! shaped) point-to-point links, materialize the topology on a substrate,
//! configure addresses and static routes, then run single-packet
//! reachability probes and write their output to a result file.
//!
//! Two substrates are provided: Linux network namespaces driven through
//! `ip`/`tc`/`sysctl`/`ping`, and a deterministic in-memory emulation used
//! by the test suite and the `--backend sim` CLI mode.

pub mod config;
pub mod errors;
pub mod lab;
pub mod link;
pub mod node;
pub mod probe;
pub mod routing;
pub mod scenario;
pub mod sink;
pub mod substrate;
pub mod test_util;
pub mod topology;

// Re-export commonly used types
pub use config::{Backend, LabConfig, ProbeConfig};
pub use errors::{LabError, MaterializationTarget, Result, SubstrateError};
pub use lab::{Lab, LabReport};
pub use link::{Endpoint, LinkFabric, Shaping};
pub use node::{FailMode, NodeId, NodeRegistry, Role};
pub use probe::{run_campaign, run_probe, ProbeResult, ProbeSpec};
pub use routing::{apply_route, apply_routes, set_fail_mode, Destination, Route, RoutingReport};
pub use scenario::{Presets, Scenario, ScenarioBuilder};
pub use sink::{persist, render};
pub use substrate::{netns::NetnsSubstrate, sim::SimSubstrate, Substrate};
pub use topology::{materialize, LiveTopology, Phase};
