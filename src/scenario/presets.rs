//! Built-in lab scenarios

use super::{Scenario, ScenarioBuilder};
use crate::errors::Result;
use crate::link::Endpoint;
use crate::node::FailMode;

pub struct Presets;

impl Presets {
    pub const NAMES: &'static [&'static str] = &["routed", "switched"];

    /// Two routers joining three host subnets.
    ///
    /// ```text
    /// h1 --- r1 --- r2 --- h3
    ///        |
    ///        h2
    /// ```
    pub fn routed() -> Result<Scenario> {
        ScenarioBuilder::new("routed")
            .description("Three hosts on separate subnets joined by two static routers")
            .router("r1", "10.0.0.3/24")
            .router("r2", "10.0.1.2/24")
            .host("h1", "10.0.0.1/24")
            .host("h2", "10.0.3.2/24")
            .host("h3", "10.0.2.2/24")
            .link("h1", Endpoint::named("r1", "r1-eth0"))
            .link(Endpoint::named("r1", "r1-eth1"), Endpoint::named("r2", "r2-eth0"))
            .link(Endpoint::named("r2", "r2-eth1"), "h3")
            .link(Endpoint::named("r1", "r1-eth2"), "h2")
            // Router interfaces
            .address("r1", "r1-eth1", "10.0.1.1/24")
            .address("r1", "r1-eth2", "10.0.3.4/24")
            .address("r2", "r2-eth1", "10.0.2.1/24")
            // Hosts have a single gateway each
            .default_route("h1", "10.0.0.3")
            .default_route("h2", "10.0.3.4")
            .default_route("h3", "10.0.2.1")
            .route("r1", "10.0.2.0/24", "10.0.1.2")
            .route("r2", "10.0.0.0/24", "10.0.1.1")
            .route("r2", "10.0.3.0/24", "10.0.1.1")
            .probe("h1", "10.0.2.2")
            .probe("h2", "10.0.2.2")
            .probe("h3", "10.0.0.1")
            .probe("h3", "10.0.3.2")
            .output("result1.txt")
            .build()
    }

    /// Three hosts on one subnet behind two chained switches.
    ///
    /// ```text
    /// h1 --+
    ///      s1 --- s2 --- h3
    /// h2 --+
    /// ```
    pub fn switched() -> Result<Scenario> {
        ScenarioBuilder::new("switched")
            .description("One flat subnet across two standalone switches")
            .host("h1", "10.0.0.1/24")
            .host("h2", "10.0.0.2/24")
            .host("h3", "10.0.0.3/24")
            .switch_with_mode("s1", FailMode::Standalone)
            .switch_with_mode("s2", FailMode::Standalone)
            .link("h1", Endpoint::named("s1", "s1-eth1"))
            .link("h2", Endpoint::named("s1", "s1-eth2"))
            .link(Endpoint::named("s1", "s1-eth3"), Endpoint::named("s2", "s2-eth1"))
            .link("h3", Endpoint::named("s2", "s2-eth2"))
            .probe("h1", "10.0.0.3")
            .probe("h2", "10.0.0.3")
            .output("result2.txt")
            .build()
    }

    pub fn all() -> Result<Vec<Scenario>> {
        Ok(vec![Self::routed()?, Self::switched()?])
    }
}
