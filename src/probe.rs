//! Reachability harness

use crate::config::ProbeConfig;
use crate::errors::{LabError, Result};
use crate::node::NodeId;
use crate::topology::{LiveTopology, Phase};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// "Ping `destination` from `source`"
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeSpec {
    pub source: NodeId,
    /// Free text; not required to be a declared address or even an IP
    pub destination: String,
}

impl ProbeSpec {
    pub fn new(source: impl Into<NodeId>, destination: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ProbeResult {
    source: NodeId,
    destination: String,
    output: String,
    success: bool,
}

impl ProbeResult {
    /// Record captured output for `spec`; success is derived from it.
    pub fn new(spec: &ProbeSpec, output: String) -> Self {
        let success = probe_succeeded(&output);
        Self {
            source: spec.source.clone(),
            destination: spec.destination.clone(),
            output,
            success,
        }
    }

    pub fn source(&self) -> &NodeId {
        &self.source
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Probe output exactly as captured
    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn success(&self) -> bool {
        self.success
    }
}

/// Packet loss percentage reported in probe output, if any.
pub fn packet_loss(output: &str) -> Option<f32> {
    let end = output.find("% packet loss")?;
    output[..end]
        .rsplit(|c: char| c.is_whitespace() || c == ',')
        .next()?
        .parse()
        .ok()
}

/// A probe succeeded iff it reported packet loss below 100%.
pub fn probe_succeeded(output: &str) -> bool {
    packet_loss(output).is_some_and(|loss| loss < 100.0)
}

/// Send one probe. An unanswered or unrunnable probe is a failed result,
/// not an error; only an unknown source node or a stopped topology is.
pub async fn run_probe(
    live: &LiveTopology,
    spec: &ProbeSpec,
    config: &ProbeConfig,
) -> Result<ProbeResult> {
    live.require("probing", Phase::allows_probing)?;
    let node = live.node(spec.source.as_str())?;

    let output = match live
        .substrate()
        .probe(node.stack(), &spec.destination, config)
        .await
    {
        Ok(output) => output,
        Err(e) => {
            warn!(source = %spec.source, destination = %spec.destination, error = %e, "probe could not run");
            e.to_string()
        }
    };

    let result = ProbeResult::new(spec, output);
    info!(
        "{} -> {}: {}",
        result.source,
        result.destination,
        if result.success { "ok" } else { "FAILED" }
    );
    Ok(result)
}

/// Run every probe in order, one result per spec.
pub async fn run_campaign(
    live: &mut LiveTopology,
    specs: &[ProbeSpec],
    config: &ProbeConfig,
) -> Result<Vec<ProbeResult>> {
    live.require("probing", Phase::allows_probing)?;
    live.advance(Phase::Probing);
    info!("*** Running {} reachability probes", specs.len());

    let mut results = Vec::with_capacity(specs.len());
    for spec in specs {
        let result = match run_probe(live, spec, config).await {
            Ok(result) => result,
            Err(e @ LabError::UnknownNode(_)) => {
                warn!(source = %spec.source, "probe source is not part of the topology");
                ProbeResult::new(spec, e.to_string())
            }
            Err(e) => return Err(e),
        };
        results.push(result);
    }

    let passed = results.iter().filter(|r| r.success).count();
    info!("Probes: {}/{} succeeded", passed, results.len());
    Ok(results)
}
