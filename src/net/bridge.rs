// Bridge device management: creating, configuring, and deleting the OS
// bridge devices that registry records describe. Supports plain Linux
// bridges and Open vSwitch bridges behind the same operations; the flavor
// is chosen at creation time and persisted with the record.

use crate::error::Result;
use crate::net::ipam::Cidr;
use crate::utils::command::Executor;
use crate::utils::console::ConsoleLogger;

/// Bridge implementation flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BridgeKind {
    #[default]
    Linux,
    Ovs,
}

impl BridgeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BridgeKind::Linux => "linux",
            BridgeKind::Ovs => "ovs",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "ovs" => BridgeKind::Ovs,
            _ => BridgeKind::Linux,
        }
    }
}

pub struct BridgeDevice;

impl BridgeDevice {
    /// Create the bridge device, assign the block's gateway address to it,
    /// and bring it up in promiscuous mode. When an upstream gateway
    /// interface is given, also install NAT masquerading and enable IP
    /// forwarding so containers can reach the outside network.
    pub fn create(
        exec: &dyn Executor,
        kind: BridgeKind,
        name: &str,
        cidr: &Cidr,
        gateway_iface: Option<&str>,
    ) -> Result<()> {
        ConsoleLogger::debug(&format!("creating {} bridge device {}", kind.as_str(), name));
        match kind {
            BridgeKind::Linux => {
                exec.run_checked(&["ip", "link", "add", "name", name, "type", "bridge"])?;
            }
            BridgeKind::Ovs => {
                exec.run_checked(&["ovs-vsctl", "add-br", name])?;
            }
        }

        let gateway = format!("{}/{}", cidr.gateway(), cidr.prefix_len());
        exec.run_checked(&["ip", "addr", "add", &gateway, "dev", name])?;
        exec.run_checked(&["ip", "link", "set", name, "promisc", "on"])?;
        exec.run_checked(&["ip", "link", "set", name, "up"])?;

        if let Some(iface) = gateway_iface {
            exec.run_checked(&[
                "iptables",
                "-t",
                "nat",
                "-A",
                "POSTROUTING",
                "-o",
                iface,
                "-j",
                "MASQUERADE",
            ])?;
            exec.run_checked(&["sysctl", "-w", "net.ipv4.ip_forward=1"])?;
        }
        Ok(())
    }

    /// Remove the bridge device. Bringing it down first matches the
    /// kernel's expectations for bridges with attached ports.
    pub fn delete(exec: &dyn Executor, kind: BridgeKind, name: &str) -> Result<()> {
        exec.run_quietly(&["ip", "link", "set", name, "promisc", "off"]);
        exec.run_quietly(&["ip", "link", "set", name, "down"]);
        match kind {
            BridgeKind::Linux => exec.run_checked(&["ip", "link", "del", name])?,
            BridgeKind::Ovs => exec.run_checked(&["ovs-vsctl", "del-br", name])?,
        };
        Ok(())
    }

    pub fn exists(exec: &dyn Executor, name: &str) -> bool {
        exec.run(&["ip", "link", "show", name])
            .map(|r| r.success)
            .unwrap_or(false)
    }

    /// Attach an interface to the bridge and bring it up.
    pub fn attach(exec: &dyn Executor, kind: BridgeKind, bridge: &str, intf: &str) -> Result<()> {
        match kind {
            BridgeKind::Linux => {
                exec.run_checked(&["ip", "link", "set", intf, "master", bridge])?;
            }
            BridgeKind::Ovs => {
                exec.run_checked(&["ovs-vsctl", "add-port", bridge, intf])?;
            }
        }
        exec.run_checked(&["ip", "link", "set", intf, "up"])?;
        Ok(())
    }

    pub fn detach(exec: &dyn Executor, kind: BridgeKind, bridge: &str, intf: &str) -> Result<()> {
        match kind {
            BridgeKind::Linux => {
                exec.run_checked(&["ip", "link", "set", intf, "nomaster"])?;
            }
            BridgeKind::Ovs => {
                exec.run_checked(&["ovs-vsctl", "del-port", bridge, intf])?;
            }
        }
        Ok(())
    }

    pub fn set_up(exec: &dyn Executor, name: &str) -> Result<()> {
        exec.run_checked(&["ip", "link", "set", name, "up"])?;
        Ok(())
    }

    pub fn set_down(exec: &dyn Executor, name: &str) -> Result<()> {
        exec.run_checked(&["ip", "link", "set", name, "down"])?;
        Ok(())
    }
}
