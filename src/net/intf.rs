// Interface objects and veth pair creation.
//
// An Intf describes one end of a veth pair (or a loopback). The OS-level
// interface must exist before an Intf configures itself; pair creation is
// a separate step so both ends can be created atomically first.

use crate::error::{Error, Result};
use crate::utils::command::Executor;
use std::fmt;
use std::net::Ipv4Addr;

/// How callers may refer to one of a node's interfaces. Configuration
/// methods accept any of the three forms and resolve them uniformly.
#[derive(Debug, Clone)]
pub enum InterfaceRef {
    ByName(String),
    #[allow(dead_code)]
    ByPort(u16),
    Default,
}

/// Observed state of an interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntfStatus {
    Ok,
    Missing,
}

impl fmt::Display for IntfStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntfStatus::Ok => write!(f, "OK"),
            IntfStatus::Missing => write!(f, "MISSING"),
        }
    }
}

/// One network interface owned by a node.
#[derive(Debug, Clone)]
pub struct Intf {
    pub name: String,
    pub mac: Option<String>,
    pub ip: Option<Ipv4Addr>,
    pub prefix_len: Option<u8>,
    /// Named network namespace the interface lives in, if any. Commands
    /// against the interface are wrapped with `ip netns exec` when set.
    pub netns: Option<String>,
}

impl Intf {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            mac: None,
            ip: None,
            prefix_len: None,
            netns: None,
        }
    }

    /// The loopback interface. Its address is known without querying the
    /// OS, which saves a command per node.
    pub fn loopback() -> Self {
        Self {
            name: "lo".to_string(),
            mac: None,
            ip: Some(Ipv4Addr::LOCALHOST),
            prefix_len: Some(8),
            netns: None,
        }
    }

    fn wrap<'a>(&'a self, argv: &[&'a str]) -> Vec<&'a str> {
        match &self.netns {
            Some(ns) => {
                let mut wrapped = vec!["ip", "netns", "exec", ns.as_str()];
                wrapped.extend_from_slice(argv);
                wrapped
            }
            None => argv.to_vec(),
        }
    }

    /// Assign an IP address and bring the interface up. Assumes the
    /// OS-level interface already exists.
    pub fn set_ip(&mut self, exec: &dyn Executor, addr: Ipv4Addr, prefix_len: u8) -> Result<()> {
        let cidr = format!("{}/{}", addr, prefix_len);
        let argv = self.wrap(&["ip", "addr", "add", cidr.as_str(), "dev", self.name.as_str()]);
        exec.run_checked(&argv)?;
        self.ip = Some(addr);
        self.prefix_len = Some(prefix_len);
        self.set_up(exec)
    }

    /// Set the MAC address. The interface has to be down while the
    /// hardware address changes.
    pub fn set_mac(&mut self, exec: &dyn Executor, mac: &str) -> Result<()> {
        let down = self.wrap(&["ip", "link", "set", self.name.as_str(), "down"]);
        exec.run_checked(&down)?;
        let addr = self.wrap(&["ip", "link", "set", self.name.as_str(), "address", mac]);
        exec.run_checked(&addr)?;
        self.mac = Some(mac.to_string());
        self.set_up(exec)
    }

    pub fn set_up(&self, exec: &dyn Executor) -> Result<()> {
        let argv = self.wrap(&["ip", "link", "set", self.name.as_str(), "up"]);
        exec.run_checked(&argv)?;
        Ok(())
    }

    #[allow(dead_code)]
    pub fn is_up(&self, exec: &dyn Executor) -> bool {
        let argv = self.wrap(&["ip", "link", "show", self.name.as_str()]);
        exec.run(&argv)
            .map(|r| r.success && r.stdout.contains("UP"))
            .unwrap_or(false)
    }

    pub fn status(&self, exec: &dyn Executor) -> IntfStatus {
        let argv = self.wrap(&["ip", "link", "show", self.name.as_str()]);
        match exec.run(&argv) {
            Ok(r) if r.success => IntfStatus::Ok,
            _ => IntfStatus::Missing,
        }
    }

    /// Move the interface into a named network namespace and remember the
    /// namespace for later configuration commands.
    pub fn move_to_netns(&mut self, exec: &dyn Executor, netns: &str) -> Result<()> {
        exec.run_checked(&["ip", "link", "set", self.name.as_str(), "netns", netns])?;
        self.netns = Some(netns.to_string());
        Ok(())
    }

    pub fn delete(&self, exec: &dyn Executor) -> Result<()> {
        let argv = self.wrap(&["ip", "link", "del", self.name.as_str()]);
        exec.run_checked(&argv)?;
        Ok(())
    }
}

impl fmt::Display for Intf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Create a veth pair joining `name1` and `name2`, optionally with fixed
/// MAC addresses, in a single atomic command.
///
/// With `delete_first`, any pre-existing interfaces with the target names
/// are removed first, making retries idempotent. Creation failure carries
/// the command output; this is where most topology-construction failures
/// surface (name collision, missing kernel module, permissions).
pub fn make_intf_pair(
    exec: &dyn Executor,
    name1: &str,
    name2: &str,
    mac1: Option<&str>,
    mac2: Option<&str>,
    delete_first: bool,
) -> Result<()> {
    if delete_first {
        exec.run_quietly(&["ip", "link", "del", name1]);
        exec.run_quietly(&["ip", "link", "del", name2]);
    }

    let mut argv = vec!["ip", "link", "add", "name", name1];
    if let Some(mac) = mac1 {
        argv.extend_from_slice(&["address", mac]);
    }
    argv.extend_from_slice(&["type", "veth", "peer", "name", name2]);
    if let Some(mac) = mac2 {
        argv.extend_from_slice(&["address", mac]);
    }

    let result = exec.run(&argv)?;
    if !result.success {
        return Err(Error::InterfacePairCreation {
            intf1: name1.to_string(),
            intf2: name2.to_string(),
            output: result.output(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::command::testing::{failed_result, ScriptedExecutor};

    #[test]
    fn loopback_needs_no_os_query() {
        let intf = Intf::loopback();
        assert_eq!(intf.ip, Some(Ipv4Addr::LOCALHOST));
        assert_eq!(intf.prefix_len, Some(8));
        assert_eq!(intf.name, "lo");
    }

    #[test]
    fn set_ip_adds_address_then_brings_up() {
        let exec = ScriptedExecutor::new();
        let calls = exec.call_log();
        let mut intf = Intf::new("h1-eth0");
        intf.set_ip(&exec, "10.0.3.2".parse().unwrap(), 24).unwrap();

        let log = calls.borrow();
        assert_eq!(log[0], "ip addr add 10.0.3.2/24 dev h1-eth0");
        assert_eq!(log[1], "ip link set h1-eth0 up");
    }

    #[test]
    fn namespaced_intf_wraps_commands() {
        let exec = ScriptedExecutor::new();
        let calls = exec.call_log();
        let mut intf = Intf::new("h1-eth0");
        intf.netns = Some("h1".to_string());
        intf.set_up(&exec).unwrap();
        assert_eq!(
            calls.borrow()[0],
            "ip netns exec h1 ip link set h1-eth0 up"
        );
    }

    #[test]
    fn pair_creation_is_one_atomic_command() {
        let exec = ScriptedExecutor::new();
        let calls = exec.call_log();
        make_intf_pair(
            &exec,
            "h1-eth0",
            "s1-eth1",
            Some("02:00:00:00:00:01"),
            None,
            false,
        )
        .unwrap();
        let log = calls.borrow();
        assert_eq!(log.len(), 1);
        assert_eq!(
            log[0],
            "ip link add name h1-eth0 address 02:00:00:00:00:01 type veth peer name s1-eth1"
        );
    }

    #[test]
    fn delete_first_makes_retries_idempotent() {
        let exec = ScriptedExecutor::new();
        let calls = exec.call_log();
        make_intf_pair(&exec, "a", "b", None, None, true).unwrap();
        make_intf_pair(&exec, "a", "b", None, None, true).unwrap();

        let log = calls.borrow();
        // Each call deletes both names before creating the pair once.
        assert_eq!(log.len(), 6);
        assert_eq!(log[0], "ip link del a");
        assert_eq!(log[1], "ip link del b");
        assert_eq!(log[2], "ip link add name a type veth peer name b");
        assert_eq!(log[3], "ip link del a");
    }

    #[test]
    fn creation_failure_carries_command_output() {
        let exec = ScriptedExecutor::new()
            .respond("type veth", failed_result("RTNETLINK answers: File exists"));
        let err = make_intf_pair(&exec, "a", "b", None, None, false);
        match err {
            Err(Error::InterfacePairCreation { output, .. }) => {
                assert!(output.contains("File exists"));
            }
            other => panic!("expected InterfacePairCreation, got {:?}", other),
        }
    }
}
