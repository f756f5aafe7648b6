//! CLI command implementations
//!
//! Kept out of main.rs so they can be unit tested.

use anyhow::{bail, Context, Result};
use netlab::test_util::{privileges, Privileges};
use netlab::{Backend, Lab, LabConfig, Presets, Scenario};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Flags on `run` that override the configuration file
#[derive(Debug, Default)]
pub struct RunOverrides {
    pub output: Option<PathBuf>,
    pub backend: Option<Backend>,
    pub sudo: bool,
    pub wait: Option<u64>,
}

impl RunOverrides {
    pub fn apply(self, mut config: LabConfig) -> LabConfig {
        if let Some(output) = self.output {
            config.output = Some(output);
        }
        if let Some(backend) = self.backend {
            config.backend = backend;
        }
        if self.sudo {
            config.use_sudo = true;
        }
        if let Some(wait) = self.wait {
            config.probe.wait_secs = wait;
        }
        config
    }
}

pub async fn load_config(path: Option<&Path>) -> Result<LabConfig> {
    match path {
        Some(path) => LabConfig::from_file(path)
            .await
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Ok(LabConfig::default()),
    }
}

/// Resolve a preset name or a JSON scenario file.
pub async fn resolve_scenario(name: &str) -> Result<Scenario> {
    if let Some(preset) = Scenario::preset(name)? {
        return Ok(preset);
    }

    let path = Path::new(name);
    if path.exists() {
        return Scenario::from_file(path)
            .await
            .with_context(|| format!("Failed to load scenario from {}", path.display()));
    }

    bail!(
        "Unknown scenario: {}. Available presets: {}",
        name,
        Presets::NAMES.join(", ")
    )
}

/// Implementation of the 'run' command
pub async fn cmd_run(config: LabConfig, scenario: &str, overrides: RunOverrides) -> Result<()> {
    let config = overrides.apply(config);
    let scenario = resolve_scenario(scenario).await?;

    if config.backend == Backend::Netns {
        if let Err(e) = namespace_access(privileges(), &config) {
            warn!("Namespace creation will probably fail: {e}");
        }
    }

    info!("Running scenario: {} ({:?} backend)", scenario.name, config.backend);
    let lab = Lab::new(config);
    let report = lab
        .run(&scenario)
        .await
        .with_context(|| format!("Scenario '{}' failed", scenario.name))?;

    println!("Scenario: {}", scenario.name);
    println!(
        "Routes: {} applied, {} failed",
        report.routing.applied,
        report.routing.failures.len()
    );
    for failure in &report.routing.failures {
        println!("  #{} {}: {}", failure.index, failure.route, failure.error);
    }

    println!("Probes:");
    for result in &report.results {
        let status = if result.success() { "ok" } else { "FAILED" };
        println!("  {} → {}: {}", result.source(), result.destination(), status);
    }
    println!(
        "{}/{} probes succeeded",
        report.passed(),
        report.results.len()
    );
    println!("Results written to {}", report.output.display());

    Ok(())
}

/// Implementation of the 'list' command
pub fn cmd_list() -> Result<()> {
    println!("Available scenarios:");
    println!();
    println!("Built-in presets:");
    for scenario in Presets::all()? {
        let output = scenario
            .output
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| scenario.default_output().display().to_string());
        println!(
            "  {:<10} {} ({} nodes, {} links, {} probes -> {})",
            scenario.name,
            scenario.description,
            scenario.nodes.len(),
            scenario.links.len(),
            scenario.probes.len(),
            output
        );
    }
    println!();
    println!("Any JSON scenario file path is accepted as well.");
    Ok(())
}

/// Implementation of the 'show' command
pub async fn cmd_show(scenario: &str) -> Result<()> {
    let scenario = resolve_scenario(scenario).await?;
    println!("{}", scenario.to_json()?);
    Ok(())
}

/// Describe namespace access under `config`, failing when the netns
/// backend cannot work as configured.
pub fn namespace_access(access: Privileges, config: &LabConfig) -> Result<&'static str> {
    match access {
        Privileges::Root => Ok("available (root)"),
        Privileges::Sudo if config.use_sudo => Ok("available (passwordless sudo)"),
        _ if config.backend == Backend::Sim => Ok("not needed (sim backend selected)"),
        Privileges::Sudo => bail!(
            "Network namespaces need sudo: pass --sudo or set \"use_sudo\": true in the config"
        ),
        Privileges::Missing => bail!(
            "Network namespaces unavailable: run as root or configure passwordless sudo for ip"
        ),
    }
}

/// Implementation of the 'check' command
pub fn cmd_check(config: &LabConfig) -> Result<()> {
    let status = namespace_access(privileges(), config)?;
    println!("Network namespaces: {status}");
    Ok(())
}
