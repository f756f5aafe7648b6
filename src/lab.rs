//! End-to-end lab runs
//!
//! [`Lab`] drives one scenario through every phase: declare, materialize,
//! route, probe, persist, stop. The topology is stopped even when a later
//! phase fails.

use crate::config::LabConfig;
use crate::errors::Result;
use crate::probe::{run_campaign, ProbeResult};
use crate::routing::{apply_routes, RoutingReport};
use crate::scenario::Scenario;
use crate::sink::persist;
use crate::substrate::Substrate;
use crate::topology::{materialize, LiveTopology};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Outcome of a completed run
#[derive(Debug)]
pub struct LabReport {
    pub routing: RoutingReport,
    pub results: Vec<ProbeResult>,
    /// Where the result artifact was written
    pub output: PathBuf,
}

impl LabReport {
    pub fn passed(&self) -> usize {
        self.results.iter().filter(|r| r.success()).count()
    }

    pub fn all_passed(&self) -> bool {
        self.passed() == self.results.len()
    }
}

pub struct Lab {
    config: LabConfig,
    substrate: Arc<dyn Substrate>,
}

impl Lab {
    /// Lab on the substrate `config` selects.
    pub fn new(config: LabConfig) -> Self {
        let substrate = config.substrate();
        Self { config, substrate }
    }

    pub fn with_substrate(config: LabConfig, substrate: Arc<dyn Substrate>) -> Self {
        Self { config, substrate }
    }

    pub fn config(&self) -> &LabConfig {
        &self.config
    }

    /// Result path: configuration override, then the scenario's own, then
    /// a name derived from the scenario.
    pub fn output_path(&self, scenario: &Scenario) -> PathBuf {
        self.config
            .output
            .clone()
            .or_else(|| scenario.output.clone())
            .unwrap_or_else(|| scenario.default_output())
    }

    pub async fn run(&self, scenario: &Scenario) -> Result<LabReport> {
        info!("Running scenario '{}'", scenario.name);
        let (registry, fabric) = scenario.declare()?;

        info!("*** Starting network");
        let mut live = materialize(Arc::clone(&self.substrate), &registry, &fabric).await?;

        let outcome = self.exercise(&mut live, scenario).await;
        live.stop().await;

        let report = outcome?;
        info!(
            "Scenario '{}' finished: {}/{} probes succeeded",
            scenario.name,
            report.passed(),
            report.results.len()
        );
        Ok(report)
    }

    async fn exercise(&self, live: &mut LiveTopology, scenario: &Scenario) -> Result<LabReport> {
        let routing = apply_routes(live, &scenario.routes).await?;
        let results = run_campaign(live, &scenario.probes, &self.config.probe).await?;

        let output = self.output_path(scenario);
        persist(&results, &output).await?;
        info!("*** Results saved to {}", output.display());

        Ok(LabReport {
            routing,
            results,
            output,
        })
    }
}
