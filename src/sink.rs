//! Result artifact

use crate::errors::Result;
use crate::probe::ProbeResult;
use std::fmt::Write as _;
use std::path::Path;
use tracing::info;

/// Render results as `==== <src> → <dst> ====` blocks, in order.
pub fn render(results: &[ProbeResult]) -> String {
    let mut out = String::new();
    for result in results {
        let _ = writeln!(
            out,
            "==== {} → {} ====\n{}",
            result.source(),
            result.destination(),
            result.output()
        );
    }
    out
}

/// Write the artifact, replacing whatever `destination` held before.
pub async fn persist(results: &[ProbeResult], destination: impl AsRef<Path>) -> Result<()> {
    let destination = destination.as_ref();
    tokio::fs::write(destination, render(results)).await?;
    info!("Wrote {} results to {}", results.len(), destination.display());
    Ok(())
}
