// Nodes of a materialized network: hosts backed by named network
// namespaces, switches backed by registry bridges. Port and interface
// bookkeeping lives here; the flavor-specific behavior is a closed set of
// variants chosen at construction, not a type hierarchy.

use crate::error::{Error, Result};
use crate::net::bridge::{BridgeDevice, BridgeKind};
use crate::net::intf::{Intf, InterfaceRef, IntfStatus};
use crate::net::ipam::Cidr;
use crate::registry::BridgeRegistry;
use crate::utils::command::Executor;
use crate::utils::console::ConsoleLogger;
use std::collections::{BTreeMap, HashMap};

/// Switch implementation flavor, mapped onto the bridge device layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchFlavor {
    LinuxBridge,
    Ovs,
}

impl SwitchFlavor {
    fn bridge_kind(&self) -> BridgeKind {
        match self {
            SwitchFlavor::LinuxBridge => BridgeKind::Linux,
            SwitchFlavor::Ovs => BridgeKind::Ovs,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Host,
    Switch(SwitchFlavor),
}

/// Hosts number ports from 0; switches reserve port 0 and start at 1.
const HOST_PORT_BASE: u16 = 0;
const SWITCH_PORT_BASE: u16 = 1;

pub struct Node {
    pub name: String,
    pub kind: NodeKind,
    /// Subnet backing a switch's bridge; set when the switch is created.
    pub cidr: Option<Cidr>,
    intfs: BTreeMap<u16, Intf>,
    ports_by_name: HashMap<String, u16>,
}

impl Node {
    pub fn host(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: NodeKind::Host,
            cidr: None,
            intfs: BTreeMap::new(),
            ports_by_name: HashMap::new(),
        }
    }

    pub fn switch(name: &str, flavor: SwitchFlavor) -> Self {
        Self {
            name: name.to_string(),
            kind: NodeKind::Switch(flavor),
            cidr: None,
            intfs: BTreeMap::new(),
            ports_by_name: HashMap::new(),
        }
    }

    pub fn is_switch(&self) -> bool {
        matches!(self.kind, NodeKind::Switch(_))
    }

    pub fn port_base(&self) -> u16 {
        match self.kind {
            NodeKind::Host => HOST_PORT_BASE,
            NodeKind::Switch(_) => SWITCH_PORT_BASE,
        }
    }

    /// Next port to allocate: one past the highest assigned port, or the
    /// kind's port base for a node with no interfaces. Ports are never
    /// reused within a session.
    pub fn new_port(&self) -> u16 {
        match self.intfs.keys().next_back() {
            Some(max) => max + 1,
            None => self.port_base(),
        }
    }

    /// Record an interface under `port` (allocated when omitted). For a
    /// host the interface is moved into the host's namespace first.
    pub fn add_intf(
        &mut self,
        exec: &dyn Executor,
        mut intf: Intf,
        port: Option<u16>,
    ) -> Result<u16> {
        let port = port.unwrap_or_else(|| self.new_port());
        if self.intfs.contains_key(&port) {
            return Err(Error::Validation(format!(
                "port {} on node {} is already assigned",
                port, self.name
            )));
        }
        if self.kind == NodeKind::Host && intf.netns.is_none() && intf.name != "lo" {
            intf.move_to_netns(exec, &self.name)?;
        }
        ConsoleLogger::debug(&format!(
            "added intf {} (port {}) to node {}",
            intf.name, port, self.name
        ));
        self.ports_by_name.insert(intf.name.clone(), port);
        self.intfs.insert(port, intf);
        Ok(port)
    }

    /// Interface with the lowest port number. A node without interfaces
    /// is a warning, not an error.
    pub fn default_intf(&self) -> Option<&Intf> {
        let intf = self.intfs.values().next();
        if intf.is_none() {
            ConsoleLogger::warning(&format!("node {} has no interfaces", self.name));
        }
        intf
    }

    /// Uniform interface resolution: by name, by port, or the default.
    pub fn intf(&self, r: &InterfaceRef) -> Option<&Intf> {
        match r {
            InterfaceRef::ByName(name) => self
                .ports_by_name
                .get(name)
                .and_then(|port| self.intfs.get(port)),
            InterfaceRef::ByPort(port) => self.intfs.get(port),
            InterfaceRef::Default => self.default_intf(),
        }
    }

    fn intf_mut(&mut self, r: &InterfaceRef) -> Option<&mut Intf> {
        let port = match r {
            InterfaceRef::ByName(name) => *self.ports_by_name.get(name)?,
            InterfaceRef::ByPort(port) => *port,
            InterfaceRef::Default => *self.intfs.keys().next()?,
        };
        self.intfs.get_mut(&port)
    }

    #[allow(dead_code)]
    pub fn port_of(&self, name: &str) -> Option<u16> {
        self.ports_by_name.get(name).copied()
    }

    /// Interface names sorted by port number.
    pub fn intf_names(&self) -> Vec<&str> {
        self.intfs.values().map(|i| i.name.as_str()).collect()
    }

    pub fn intf_count(&self) -> usize {
        self.intfs.len()
    }

    pub fn remove_intf(&mut self, name: &str) {
        if let Some(port) = self.ports_by_name.remove(name) {
            self.intfs.remove(&port);
        }
    }

    /// Set the IP address of one of our interfaces.
    pub fn set_ip(
        &mut self,
        exec: &dyn Executor,
        r: &InterfaceRef,
        addr: std::net::Ipv4Addr,
        prefix_len: u8,
    ) -> Result<()> {
        match self.intf_mut(r) {
            Some(intf) => intf.set_ip(exec, addr, prefix_len),
            None => Err(Error::NotFound {
                kind: "interface",
                name: format!("{:?} on {}", r, self.name),
            }),
        }
    }

    #[allow(dead_code)]
    pub fn set_mac(&mut self, exec: &dyn Executor, r: &InterfaceRef, mac: &str) -> Result<()> {
        match self.intf_mut(r) {
            Some(intf) => intf.set_mac(exec, mac),
            None => Err(Error::NotFound {
                kind: "interface",
                name: format!("{:?} on {}", r, self.name),
            }),
        }
    }

    /// Delete owned interfaces. With `check_name` only interfaces whose
    /// name contains the node's own name are touched, protecting
    /// root-namespace hardware interfaces that ended up enumerated here.
    pub fn delete_intfs(&mut self, exec: &dyn Executor, check_name: bool) -> Result<()> {
        let doomed: Vec<String> = self
            .intfs
            .values()
            .filter(|i| !check_name || i.name.contains(&self.name))
            .map(|i| i.name.clone())
            .collect();
        for name in doomed {
            if let Some(port) = self.ports_by_name.get(&name).copied() {
                if let Some(intf) = self.intfs.get(&port) {
                    intf.delete(exec)?;
                }
                self.ports_by_name.remove(&name);
                self.intfs.remove(&port);
            }
        }
        Ok(())
    }

    // Materialization: create/start/stop/destroy per node kind.

    /// Create the node's OS resources. Hosts get a named network
    /// namespace with loopback up; switches get a registry bridge backed
    /// by a free CIDR block (or `self.cidr` when preset).
    pub fn create(&mut self, exec: &dyn Executor, registry: &BridgeRegistry) -> Result<()> {
        match self.kind {
            NodeKind::Host => {
                exec.run_quietly(&["ip", "netns", "del", &self.name]);
                exec.run_checked(&["ip", "netns", "add", &self.name])?;
                let mut lo = Intf::loopback();
                lo.netns = Some(self.name.clone());
                lo.set_up(exec)?;
                Ok(())
            }
            NodeKind::Switch(flavor) => {
                let cidr = match self.cidr {
                    Some(cidr) => cidr,
                    None => registry.free_block(254)?,
                };
                registry.add_bridge_kind(&self.name, &cidr, None, flavor.bridge_kind())?;
                self.cidr = Some(cidr);
                Ok(())
            }
        }
    }

    /// Start forwarding: bring a switch's bridge up. Hosts have nothing
    /// to start here.
    pub fn start(&self, exec: &dyn Executor) -> Result<()> {
        if self.is_switch() {
            BridgeDevice::set_up(exec, &self.name)?;
        }
        Ok(())
    }

    pub fn stop(&self, exec: &dyn Executor) -> Result<()> {
        if self.is_switch() {
            BridgeDevice::set_down(exec, &self.name)?;
        }
        Ok(())
    }

    /// Tear the node's OS resources down. Host namespaces take their
    /// interfaces with them; switch bridges go through the registry so
    /// refcounts are honored.
    pub fn destroy(&self, exec: &dyn Executor, registry: &BridgeRegistry) -> Result<()> {
        match self.kind {
            NodeKind::Host => {
                exec.run_checked(&["ip", "netns", "del", &self.name])?;
                Ok(())
            }
            NodeKind::Switch(_) => registry.delete_bridge(&self.name, false),
        }
    }

    /// Connect a data port: attach an interface to a switch's bridge.
    pub fn attach(&self, exec: &dyn Executor, intf_name: &str) -> Result<()> {
        match self.kind {
            NodeKind::Switch(flavor) => {
                BridgeDevice::attach(exec, flavor.bridge_kind(), &self.name, intf_name)
            }
            NodeKind::Host => Err(Error::Validation(format!(
                "cannot attach {} to host {}: hosts have no data ports",
                intf_name, self.name
            ))),
        }
    }

    /// Disconnect a data port.
    #[allow(dead_code)]
    pub fn detach(&self, exec: &dyn Executor, intf_name: &str) -> Result<()> {
        match self.kind {
            NodeKind::Switch(flavor) => {
                BridgeDevice::detach(exec, flavor.bridge_kind(), &self.name, intf_name)
            }
            NodeKind::Host => Err(Error::Validation(format!(
                "cannot detach {} from host {}: hosts have no data ports",
                intf_name, self.name
            ))),
        }
    }

    /// Set a host's default route through the switch gateway.
    pub fn set_default_route(&self, exec: &dyn Executor, gateway: std::net::Ipv4Addr) -> Result<()> {
        let gw = gateway.to_string();
        exec.run_checked(&[
            "ip", "netns", "exec", &self.name, "ip", "route", "replace", "default", "via", &gw,
        ])?;
        Ok(())
    }

    /// Whether the node's backing OS resource is present.
    pub fn device_present(&self, exec: &dyn Executor) -> bool {
        match self.kind {
            NodeKind::Host => exec
                .run(&["ip", "netns", "exec", &self.name, "true"])
                .map(|r| r.success)
                .unwrap_or(false),
            NodeKind::Switch(_) => BridgeDevice::exists(exec, &self.name),
        }
    }

    /// Per-interface observed status, in port order.
    #[allow(dead_code)]
    pub fn intf_statuses(&self, exec: &dyn Executor) -> Vec<(String, IntfStatus)> {
        self.intfs
            .values()
            .map(|i| (i.name.clone(), i.status(exec)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::command::testing::ScriptedExecutor;

    #[test]
    fn host_ports_start_at_zero_and_increase_monotonically() {
        let exec = ScriptedExecutor::new();
        let mut host = Node::host("h1");
        assert_eq!(host.new_port(), 0);
        for i in 0..4 {
            let mut intf = Intf::new(&format!("h1-eth{}", i));
            intf.netns = Some("h1".to_string());
            let port = host.add_intf(&exec, intf, None).unwrap();
            assert_eq!(port, i);
        }
        assert_eq!(host.new_port(), 4);
    }

    #[test]
    fn switch_ports_start_at_one() {
        let exec = ScriptedExecutor::new();
        let mut switch = Node::switch("s1", SwitchFlavor::LinuxBridge);
        assert_eq!(switch.new_port(), 1);
        let port = switch.add_intf(&exec, Intf::new("s1-eth1"), None).unwrap();
        assert_eq!(port, 1);
        assert_eq!(switch.new_port(), 2);
    }

    #[test]
    fn explicit_port_is_honored_and_collisions_rejected() {
        let exec = ScriptedExecutor::new();
        let mut switch = Node::switch("s1", SwitchFlavor::LinuxBridge);
        switch
            .add_intf(&exec, Intf::new("s1-eth5"), Some(5))
            .unwrap();
        assert_eq!(switch.new_port(), 6);
        let err = switch.add_intf(&exec, Intf::new("s1-eth5b"), Some(5));
        assert!(matches!(err, Err(Error::Validation(_))));
    }

    #[test]
    fn interface_resolution_by_name_port_and_default() {
        let exec = ScriptedExecutor::new();
        let mut switch = Node::switch("s1", SwitchFlavor::LinuxBridge);
        switch.add_intf(&exec, Intf::new("s1-eth1"), None).unwrap();
        switch.add_intf(&exec, Intf::new("s1-eth2"), None).unwrap();

        let by_name = switch
            .intf(&InterfaceRef::ByName("s1-eth2".to_string()))
            .unwrap();
        assert_eq!(by_name.name, "s1-eth2");
        let by_port = switch.intf(&InterfaceRef::ByPort(1)).unwrap();
        assert_eq!(by_port.name, "s1-eth1");
        // Default resolves to the lowest port.
        let default = switch.intf(&InterfaceRef::Default).unwrap();
        assert_eq!(default.name, "s1-eth1");
    }

    #[test]
    fn host_intfs_are_moved_into_the_namespace() {
        let exec = ScriptedExecutor::new();
        let calls = exec.call_log();
        let mut host = Node::host("h1");
        host.add_intf(&exec, Intf::new("h1-eth0"), None).unwrap();
        assert_eq!(calls.borrow()[0], "ip link set h1-eth0 netns h1");
    }

    #[test]
    fn delete_intfs_guards_foreign_names() {
        let exec = ScriptedExecutor::new();
        let calls = exec.call_log();
        let mut switch = Node::switch("s1", SwitchFlavor::LinuxBridge);
        switch.add_intf(&exec, Intf::new("s1-eth1"), None).unwrap();
        switch.add_intf(&exec, Intf::new("eth0"), None).unwrap();

        switch.delete_intfs(&exec, true).unwrap();
        let log = calls.borrow();
        assert!(log.iter().any(|c| c == "ip link del s1-eth1"));
        assert!(!log.iter().any(|c| c == "ip link del eth0"));
        assert_eq!(switch.intf_count(), 1);
    }

    #[test]
    fn host_create_sets_up_namespace_with_loopback() {
        let dir = tempfile::tempdir().unwrap();
        let session =
            crate::session::Session::for_tests(dir.path(), Box::new(ScriptedExecutor::new()));
        let registry = BridgeRegistry::new(&session);

        let exec = ScriptedExecutor::new();
        let calls = exec.call_log();
        let mut host = Node::host("h1");
        host.create(&exec, &registry).unwrap();

        let log = calls.borrow();
        assert!(log.iter().any(|c| c == "ip netns add h1"));
        assert!(log.iter().any(|c| c == "ip netns exec h1 ip link set lo up"));
    }
}
