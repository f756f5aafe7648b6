//! Linux network namespace backend
//!
//! Each node becomes a namespace named `<prefix><node>`. Links are veth
//! pairs created with both ends already inside their namespaces, so nothing
//! is left behind in the root namespace. Switches carry a `br0` bridge that
//! enslaves every port; the bridge is up only in standalone mode.

use super::{qdisc, IfaceHandle, RouteRequest, StackHandle, Substrate};
use crate::config::{LabConfig, ProbeConfig};
use crate::errors::SubstrateError;
use crate::link::Shaping;
use crate::node::{FailMode, NodeId, Role};
use async_trait::async_trait;
use ipnetwork::IpNetwork;
use std::process::Output;
use tokio::process::Command;
use tracing::{debug, info, warn};

const BRIDGE: &str = "br0";

pub struct NetnsSubstrate {
    prefix: String,
    use_sudo: bool,
}

impl NetnsSubstrate {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            use_sudo: false,
        }
    }

    pub fn with_sudo(mut self, use_sudo: bool) -> Self {
        self.use_sudo = use_sudo;
        self
    }

    pub fn from_config(config: &LabConfig) -> Self {
        Self::new(config.namespace_prefix.clone()).with_sudo(config.use_sudo)
    }

    pub fn namespace_name(&self, node: &NodeId) -> String {
        format!("{}{}", self.prefix, node)
    }

    /// Run `program args`, returning raw output.
    async fn run(&self, program: &str, args: &[&str]) -> Result<Output, SubstrateError> {
        let mut command = if self.use_sudo {
            let mut c = Command::new("sudo");
            c.arg("-n").arg(program);
            c
        } else {
            Command::new(program)
        };
        debug!("Running: {} {}", program, args.join(" "));
        Ok(command.args(args).output().await?)
    }

    /// Run `program args`, failing with stderr if it exits non-zero.
    async fn run_checked(&self, program: &str, args: &[&str]) -> Result<Output, SubstrateError> {
        let output = self.run(program, args).await?;
        if !output.status.success() {
            return Err(SubstrateError::CommandFailed {
                command: format!("{} {}", program, args.join(" ")),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output)
    }

    /// Run `ip -n <ns> args`, failing if it exits non-zero.
    async fn ip_in(&self, ns: &str, args: &[&str]) -> Result<Output, SubstrateError> {
        let mut full = vec!["-n", ns];
        full.extend_from_slice(args);
        self.run_checked("ip", &full).await
    }

    /// Run `ip netns exec <ns> program args`, returning raw output.
    async fn exec_in(&self, ns: &str, program: &str, args: &[&str]) -> Result<Output, SubstrateError> {
        let mut full = vec!["netns", "exec", ns, program];
        full.extend_from_slice(args);
        self.run("ip", &full).await
    }

    async fn exec_in_checked(
        &self,
        ns: &str,
        program: &str,
        args: &[&str],
    ) -> Result<Output, SubstrateError> {
        let output = self.exec_in(ns, program, args).await?;
        if !output.status.success() {
            return Err(SubstrateError::CommandFailed {
                command: format!("ip netns exec {} {} {}", ns, program, args.join(" ")),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output)
    }

    /// Bring one freshly created link end up, attach it to the bridge on
    /// switches and install shaping.
    async fn configure_end(
        &self,
        stack: &StackHandle,
        iface: &str,
        shaping: Option<&Shaping>,
    ) -> Result<(), SubstrateError> {
        let ns = stack.name();
        if stack.role() == Role::Switch {
            self.ip_in(ns, &["link", "set", "dev", iface, "master", BRIDGE])
                .await?;
        }
        self.ip_in(ns, &["link", "set", "dev", iface, "up"]).await?;

        if let Some(shaping) = shaping {
            let clear = qdisc::clear_command(iface);
            let clear: Vec<&str> = clear.iter().map(String::as_str).collect();
            let _ = self.exec_in(ns, "tc", &clear).await;
            for args in qdisc::shaping_commands(iface, shaping) {
                let args: Vec<&str> = args.iter().map(String::as_str).collect();
                self.exec_in_checked(ns, "tc", &args).await?;
            }
            debug!(ns, iface, %shaping, "applied shaping");
        }
        Ok(())
    }
}

/// `ping` arguments for one probe. The destination always follows `--` so
/// it is never read as an option.
fn ping_args(destination: &str, config: &ProbeConfig) -> Vec<String> {
    let wait = config.wait().as_secs().max(1);
    vec![
        "-c".to_string(),
        ProbeConfig::COUNT.to_string(),
        "-W".to_string(),
        wait.to_string(),
        "--".to_string(),
        destination.to_string(),
    ]
}

#[async_trait]
impl Substrate for NetnsSubstrate {
    async fn create_stack(&self, node: &NodeId, role: Role) -> Result<StackHandle, SubstrateError> {
        let ns = self.namespace_name(node);

        // Fails with "File exists" if the name is already taken
        self.run_checked("ip", &["netns", "add", &ns]).await?;
        self.ip_in(&ns, &["link", "set", "dev", "lo", "up"]).await?;

        if role == Role::Switch {
            self.ip_in(&ns, &["link", "add", "name", BRIDGE, "type", "bridge"])
                .await?;
        }

        info!(node = %node, ns = %ns, %role, "created namespace");
        Ok(StackHandle::new(node.clone(), role, ns))
    }

    async fn destroy_stack(&self, stack: &StackHandle) -> Result<(), SubstrateError> {
        let output = self.run("ip", &["netns", "del", stack.name()]).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("No such file") {
                debug!(ns = stack.name(), "namespace already gone");
                return Ok(());
            }
            return Err(SubstrateError::CommandFailed {
                command: format!("ip netns del {}", stack.name()),
                stderr: stderr.trim().to_string(),
            });
        }
        debug!(ns = stack.name(), "deleted namespace");
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
        self.run_checked(
            "ip",
            &[
                "link", "add", name_a, "netns", a.name(), "type", "veth", "peer", "name", name_b,
                "netns", b.name(),
            ],
        )
        .await?;

        self.configure_end(a, name_a, shaping).await?;
        self.configure_end(b, name_b, shaping).await?;

        info!("Created veth pair: {}:{} <-> {}:{}", a.name(), name_a, b.name(), name_b);
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
        let cidr = address.to_string();
        let ns = iface.stack().name();
        match self
            .ip_in(ns, &["addr", "add", &cidr, "dev", iface.name()])
            .await
        {
            Err(SubstrateError::CommandFailed { stderr, .. })
                if stderr.contains("Cannot find device") =>
            {
                Err(SubstrateError::UnknownInterface {
                    stack: ns.to_string(),
                    interface: iface.name().to_string(),
                })
            }
            Err(e) => Err(e),
            Ok(_) => {
                debug!(ns, iface = iface.name(), %address, "assigned address");
                Ok(())
            }
        }
    }

    async fn set_forwarding(&self, stack: &StackHandle, enabled: bool) -> Result<(), SubstrateError> {
        let setting = format!("net.ipv4.ip_forward={}", u8::from(enabled));
        self.exec_in_checked(stack.name(), "sysctl", &["-w", &setting])
            .await?;
        debug!(ns = stack.name(), enabled, "ip forwarding");
        Ok(())
    }

    async fn add_route(&self, stack: &StackHandle, route: &RouteRequest) -> Result<(), SubstrateError> {
        let destination = route.destination.to_string();
        let via = route.via.to_string();
        let mut args = vec!["route", "add", destination.as_str(), "via", via.as_str()];
        if let Some(dev) = &route.interface {
            args.extend(["dev", dev.as_str()]);
        }

        match self.ip_in(stack.name(), &args).await {
            Err(SubstrateError::CommandFailed { stderr, .. })
                if stderr.contains("Cannot find device") =>
            {
                Err(SubstrateError::UnknownInterface {
                    stack: stack.name().to_string(),
                    interface: route.interface.clone().unwrap_or_default(),
                })
            }
            Err(e) => Err(e),
            Ok(_) => {
                debug!(ns = stack.name(), %route, "added route");
                Ok(())
            }
        }
    }

    async fn set_fail_mode(&self, stack: &StackHandle, mode: FailMode) -> Result<(), SubstrateError> {
        if stack.role() != Role::Switch {
            return Err(SubstrateError::Unsupported(format!(
                "fail mode on {} stack '{}'",
                stack.role(),
                stack.name()
            )));
        }
        // A bridge that is down leaves all of its ports disabled
        let state = match mode {
            FailMode::Standalone => "up",
            FailMode::Secure => "down",
        };
        self.ip_in(stack.name(), &["link", "set", "dev", BRIDGE, state])
            .await?;
        debug!(ns = stack.name(), %mode, "switch fail mode");
        Ok(())
    }

    async fn probe(
        &self,
        stack: &StackHandle,
        destination: &str,
        config: &ProbeConfig,
    ) -> Result<String, SubstrateError> {
        let args = ping_args(destination, config);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = self.exec_in(stack.name(), "ping", &args).await?;

        if !output.status.success() {
            warn!(ns = stack.name(), destination, "probe got no reply");
        }

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(text)
    }
}
