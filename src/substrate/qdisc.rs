//! Qdisc construction for shaped links
//!
//! Produces the `tc` argument lists that install a link's [`Shaping`] on one
//! interface. Running them is the backend's job.

use crate::link::Shaping;

/// Token bucket defaults when a bandwidth cap is set
const TBF_BURST_BYTES: u32 = 32 * 1024;
const TBF_LATENCY_MS: u32 = 50;

fn has_netem_params(shaping: &Shaping) -> bool {
    shaping.delay_ms.is_some() || shaping.jitter_ms.is_some() || shaping.loss_percent.is_some()
}

fn netem_args(shaping: &Shaping) -> Vec<String> {
    let mut args = vec!["netem".to_string()];

    // Jitter alone still needs a base delay for netem to accept it
    if shaping.delay_ms.is_some() || shaping.jitter_ms.is_some() {
        args.push("delay".into());
        args.push(format!("{}ms", shaping.delay_ms.unwrap_or(0)));
        if let Some(jitter) = shaping.jitter_ms.filter(|&j| j > 0) {
            args.push(format!("{jitter}ms"));
        }
    }

    if let Some(loss) = shaping.loss_percent {
        args.push("loss".into());
        args.push(format!("{loss}%"));
    }

    args
}

fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

/// `tc` invocations (arguments after `tc`) installing `shaping` on `interface`.
///
/// With a bandwidth cap, TBF is the root qdisc and netem hangs below it as
/// `10:`; otherwise netem is the root. Empty shaping yields no commands.
pub fn shaping_commands(interface: &str, shaping: &Shaping) -> Vec<Vec<String>> {
    let mut commands = Vec::new();

    match shaping.bandwidth_mbit {
        Some(mbit) => {
            let rate_kbit = ((mbit * 1000.0).round() as u64).max(1);
            let mut tbf = strings(&["qdisc", "add", "dev", interface, "root", "handle", "1:", "tbf"]);
            tbf.extend([
                "rate".to_string(),
                format!("{rate_kbit}kbit"),
                "burst".to_string(),
                format!("{TBF_BURST_BYTES}b"),
                "latency".to_string(),
                format!("{TBF_LATENCY_MS}ms"),
            ]);
            commands.push(tbf);

            if has_netem_params(shaping) {
                let mut netem =
                    strings(&["qdisc", "add", "dev", interface, "parent", "1:1", "handle", "10:"]);
                netem.extend(netem_args(shaping));
                commands.push(netem);
            }
        }
        None if has_netem_params(shaping) => {
            let mut netem = strings(&["qdisc", "add", "dev", interface, "root", "handle", "10:"]);
            netem.extend(netem_args(shaping));
            commands.push(netem);
        }
        None => {}
    }

    commands
}

/// Remove whatever root qdisc `interface` carries.
pub fn clear_command(interface: &str) -> Vec<String> {
    strings(&["qdisc", "del", "dev", interface, "root"])
}
