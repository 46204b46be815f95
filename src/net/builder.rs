// Network builder: walks a topology and materializes it as nodes and
// links, in dependency order (every node before any link that references
// it). Failures do not roll back what was already built; the build report
// records per-node and per-link outcomes so callers can tear down or
// retry deliberately. The built inventory is persisted as a manifest so a
// later invocation can destroy or inspect the network.

use crate::error::{Error, Result};
use crate::net::intf::{Intf, IntfStatus};
use crate::net::link::{Link, LinkOpts};
use crate::net::node::{Node, SwitchFlavor};
use crate::registry::BridgeRegistry;
use crate::session::Session;
use crate::topo::Topology;
use crate::utils::console::ConsoleLogger;
use crate::utils::filesystem::FileSystemUtils;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How link MAC addresses are chosen when not specified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacPolicy {
    /// Leave address assignment to the kernel.
    Kernel,
    /// Random locally-administered addresses.
    Random,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Created,
    Failed(String),
}

/// Which nodes and links of a build succeeded. A partial build is a
/// first-class result, not an error.
#[derive(Debug, Default)]
pub struct BuildReport {
    pub nodes: Vec<(String, Outcome)>,
    pub links: Vec<(String, Outcome)>,
}

impl BuildReport {
    pub fn complete(&self) -> bool {
        self.nodes
            .iter()
            .map(|(_, o)| o)
            .chain(self.links.iter().map(|(_, o)| o))
            .all(|o| *o == Outcome::Created)
    }

    pub fn failures(&self) -> Vec<(&str, &str)> {
        self.nodes
            .iter()
            .chain(self.links.iter())
            .filter_map(|(name, o)| match o {
                Outcome::Failed(reason) => Some((name.as_str(), reason.as_str())),
                Outcome::Created => None,
            })
            .collect()
    }
}

/// Observed-vs-expected state of a built network.
#[derive(Debug)]
pub struct NetworkStatus {
    pub nodes: Vec<(String, bool)>,
    pub links: Vec<(String, IntfStatus, IntfStatus)>,
}

#[derive(Debug, Serialize, Deserialize)]
struct NodeManifest {
    name: String,
    is_switch: bool,
    cidr: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct LinkManifest {
    node1: String,
    intf1: String,
    port1: u16,
    node2: String,
    intf2: String,
    port2: u16,
}

/// Persisted inventory of a built network.
#[derive(Debug, Serialize, Deserialize)]
struct NetworkManifest {
    name: String,
    nodes: Vec<NodeManifest>,
    links: Vec<LinkManifest>,
}

pub struct NetworkBuilder<'a> {
    session: &'a Session,
    name: String,
    mac_policy: MacPolicy,
    nodes: HashMap<String, Node>,
    node_order: Vec<String>,
    links: Vec<Link>,
}

impl<'a> NetworkBuilder<'a> {
    pub fn new(session: &'a Session, name: &str) -> Self {
        Self {
            session,
            name: name.to_string(),
            mac_policy: MacPolicy::Kernel,
            nodes: HashMap::new(),
            node_order: Vec::new(),
            links: Vec::new(),
        }
    }

    pub fn with_mac_policy(mut self, policy: MacPolicy) -> Self {
        self.mac_policy = policy;
        self
    }

    fn registry(&self) -> BridgeRegistry<'a> {
        BridgeRegistry::new(self.session)
    }

    pub fn node(&self, name: &str) -> Option<&Node> {
        self.nodes.get(name)
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    /// Materialize `topo`: every node first, then every link. Individual
    /// failures are recorded and the walk continues.
    pub fn build(&mut self, topo: &Topology) -> Result<BuildReport> {
        let registry = self.registry();
        let mut report = BuildReport::default();

        for name in topo.nodes() {
            let mut node = if topo.is_switch(name) {
                Node::switch(name, SwitchFlavor::LinuxBridge)
            } else {
                Node::host(name)
            };
            let outcome = match node.create(self.session.exec(), &registry) {
                Ok(()) => Outcome::Created,
                Err(e) => {
                    ConsoleLogger::error(&format!("failed to create node {}: {}", name, e));
                    Outcome::Failed(e.to_string())
                }
            };
            if outcome == Outcome::Created {
                self.node_order.push(name.clone());
                self.nodes.insert(name.clone(), node);
            }
            report.nodes.push((name.clone(), outcome));
        }

        for (src, dst) in topo.links() {
            let label = format!("{}<->{}", src, dst);
            let outcome = match self.add_link(src, dst) {
                Ok(()) => Outcome::Created,
                Err(e) => {
                    ConsoleLogger::error(&format!("failed to create link {}: {}", label, e));
                    Outcome::Failed(e.to_string())
                }
            };
            report.links.push((label, outcome));
        }

        self.save_manifest()?;
        Ok(report)
    }

    fn mac_for_link(&self) -> Option<String> {
        match self.mac_policy {
            MacPolicy::Kernel => None,
            MacPolicy::Random => {
                let mut rng = rand::thread_rng();
                // Locally administered, unicast.
                Some(format!(
                    "02:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
                    rng.gen::<u8>(),
                    rng.gen::<u8>(),
                    rng.gen::<u8>(),
                    rng.gen::<u8>(),
                    rng.gen::<u8>()
                ))
            }
        }
    }

    /// Create one link. A host side linked to a switch gets an address
    /// from the switch's block (recorded against the bridge) and a
    /// default route through the switch gateway; switch sides are
    /// attached to their bridge.
    fn add_link(&mut self, src: &str, dst: &str) -> Result<()> {
        if src == dst {
            return Err(Error::Validation(format!("cannot link {} to itself", src)));
        }
        if !self.nodes.contains_key(src) || !self.nodes.contains_key(dst) {
            return Err(Error::NotFound {
                kind: "node",
                name: if self.nodes.contains_key(src) {
                    dst.to_string()
                } else {
                    src.to_string()
                },
            });
        }

        let registry = self.registry();
        let src_is_switch = self.nodes[src].is_switch();
        let dst_is_switch = self.nodes[dst].is_switch();

        // Host-to-switch: allocate the host's address from the switch's
        // block before the link exists, in the same way containers do.
        let ip1 = if !src_is_switch && dst_is_switch {
            let cidr = self.nodes[dst].cidr.ok_or_else(|| Error::NotFound {
                kind: "bridge",
                name: dst.to_string(),
            })?;
            let addr = registry.attach_container(src, dst)?;
            Some((addr, cidr.prefix_len()))
        } else {
            None
        };

        let opts = LinkOpts {
            mac1: self.mac_for_link(),
            mac2: self.mac_for_link(),
            ip1,
            ..LinkOpts::default()
        };

        let mut node1 = self.nodes.remove(src).expect("checked above");
        let mut node2 = self.nodes.remove(dst).expect("checked above");
        let exec = self.session.exec();

        let created = (|| -> Result<Link> {
            let link = Link::create(exec, &mut node1, &mut node2, opts)?;
            if dst_is_switch {
                node2.attach(exec, &link.endpoint2.intf)?;
            }
            if src_is_switch {
                node1.attach(exec, &link.endpoint1.intf)?;
            }
            if ip1.is_some() {
                let gateway = node2.cidr.expect("switch cidr set").gateway();
                node1.set_default_route(exec, gateway)?;
            }
            Ok(link)
        })();

        self.nodes.insert(src.to_string(), node1);
        self.nodes.insert(dst.to_string(), node2);
        self.links.push(created?);
        Ok(())
    }

    /// Start nodes, switches first so forwarding is ready before hosts
    /// send traffic.
    pub fn start(&self) -> Result<()> {
        for name in self.ordered_switches_first() {
            self.nodes[&name].start(self.session.exec())?;
        }
        Ok(())
    }

    pub fn stop(&self) -> Result<()> {
        for name in self.ordered_switches_first() {
            self.nodes[&name].stop(self.session.exec())?;
        }
        Ok(())
    }

    fn ordered_switches_first(&self) -> Vec<String> {
        let (switches, hosts): (Vec<_>, Vec<_>) = self
            .node_order
            .iter()
            .cloned()
            .partition(|n| self.nodes[n].is_switch());
        switches.into_iter().chain(hosts).collect()
    }

    /// Tear the network down symmetrically: links, host address records,
    /// hosts, then switches. Errors are reported but do not stop the
    /// teardown.
    pub fn destroy(&mut self) -> Result<()> {
        let registry = self.registry();

        let links = std::mem::take(&mut self.links);
        for link in &links {
            let mut node1 = match self.nodes.remove(&link.endpoint1.node) {
                Some(n) => n,
                None => continue,
            };
            let mut node2 = match self.nodes.remove(&link.endpoint2.node) {
                Some(n) => n,
                None => {
                    self.nodes.insert(link.endpoint1.node.clone(), node1);
                    continue;
                }
            };
            if let Err(e) = link.delete(self.session.exec(), &mut node1, &mut node2) {
                ConsoleLogger::warning(&format!("failed to delete link {}: {}", link, e));
            }
            if !node1.is_switch() && node2.is_switch() {
                if let Err(e) = registry.release_container(&node1.name, &node2.name) {
                    ConsoleLogger::warning(&format!(
                        "failed to release {} from {}: {}",
                        node1.name, node2.name, e
                    ));
                }
            }
            self.nodes.insert(link.endpoint1.node.clone(), node1);
            self.nodes.insert(link.endpoint2.node.clone(), node2);
        }

        // Hosts go before switches so no namespace still references a
        // bridge when the bridge is deleted.
        let mut order = self.ordered_switches_first();
        order.reverse();
        for name in order {
            let node = &self.nodes[&name];
            if let Err(e) = node.destroy(self.session.exec(), &registry) {
                ConsoleLogger::warning(&format!("failed to destroy node {}: {}", name, e));
            }
        }
        self.nodes.clear();
        self.node_order.clear();

        FileSystemUtils::remove_path(self.manifest_path())?;
        Ok(())
    }

    /// Observed state of every node and link.
    pub fn status(&self) -> NetworkStatus {
        let exec = self.session.exec();
        let nodes = self
            .node_order
            .iter()
            .map(|n| (n.clone(), self.nodes[n].device_present(exec)))
            .collect();
        let links = self
            .links
            .iter()
            .map(|l| {
                let sides = (
                    self.nodes.get(&l.endpoint1.node),
                    self.nodes.get(&l.endpoint2.node),
                );
                match sides {
                    (Some(n1), Some(n2)) => {
                        let (a, b) = l.status(exec, n1, n2);
                        (l.to_string(), a, b)
                    }
                    _ => (l.to_string(), IntfStatus::Missing, IntfStatus::Missing),
                }
            })
            .collect();
        NetworkStatus { nodes, links }
    }

    fn manifest_path(&self) -> std::path::PathBuf {
        self.session.networks_root.join(format!("{}.json", self.name))
    }

    fn save_manifest(&self) -> Result<()> {
        FileSystemUtils::create_dir_all(&self.session.networks_root)?;
        let manifest = NetworkManifest {
            name: self.name.clone(),
            nodes: self
                .node_order
                .iter()
                .map(|n| {
                    let node = &self.nodes[n];
                    NodeManifest {
                        name: n.clone(),
                        is_switch: node.is_switch(),
                        cidr: node.cidr.map(|c| c.to_string()),
                    }
                })
                .collect(),
            links: self
                .links
                .iter()
                .map(|l| LinkManifest {
                    node1: l.endpoint1.node.clone(),
                    intf1: l.endpoint1.intf.clone(),
                    port1: l.endpoint1.port,
                    node2: l.endpoint2.node.clone(),
                    intf2: l.endpoint2.intf.clone(),
                    port2: l.endpoint2.port,
                })
                .collect(),
        };
        let json = serde_json::to_string_pretty(&manifest)
            .map_err(|e| Error::Validation(format!("manifest serialization failed: {}", e)))?;
        FileSystemUtils::write_file(self.manifest_path(), &json)?;
        Ok(())
    }

    /// Rebuild a builder from a persisted manifest, without issuing any
    /// commands; used to destroy or inspect a network from a later
    /// invocation.
    pub fn load(session: &'a Session, name: &str) -> Result<Self> {
        let path = session.networks_root.join(format!("{}.json", name));
        if !path.exists() {
            return Err(Error::NotFound {
                kind: "network",
                name: name.to_string(),
            });
        }
        let manifest: NetworkManifest =
            serde_json::from_str(&std::fs::read_to_string(&path)?)
                .map_err(|e| Error::Validation(format!("manifest parse failed: {}", e)))?;

        let mut builder = Self::new(session, name);
        for nm in &manifest.nodes {
            let mut node = if nm.is_switch {
                Node::switch(&nm.name, SwitchFlavor::LinuxBridge)
            } else {
                Node::host(&nm.name)
            };
            if let Some(cidr) = &nm.cidr {
                node.cidr = Some(cidr.parse()?);
            }
            builder.node_order.push(nm.name.clone());
            builder.nodes.insert(nm.name.clone(), node);
        }
        for lm in &manifest.links {
            for (node_name, intf_name, port) in [
                (&lm.node1, &lm.intf1, lm.port1),
                (&lm.node2, &lm.intf2, lm.port2),
            ] {
                if let Some(node) = builder.nodes.get_mut(node_name) {
                    let mut intf = Intf::new(intf_name);
                    if !node.is_switch() {
                        intf.netns = Some(node_name.clone());
                    }
                    node.add_intf(session.exec(), intf, Some(port))?;
                }
            }
            builder.links.push(Link {
                endpoint1: crate::net::link::Endpoint {
                    node: lm.node1.clone(),
                    intf: lm.intf1.clone(),
                    port: lm.port1,
                },
                endpoint2: crate::net::link::Endpoint {
                    node: lm.node2.clone(),
                    intf: lm.intf2.clone(),
                    port: lm.port2,
                },
            });
        }
        Ok(builder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::command::testing::{ok_with_stdout, ScriptedExecutor};

    fn session_with_exec(dir: &std::path::Path) -> Session {
        // ip -o addr show returns no host networks worth avoiding.
        let exec = ScriptedExecutor::new().respond("-o addr show", ok_with_stdout(""));
        Session::for_tests(dir, Box::new(exec))
    }

    #[test]
    fn single_switch_build_produces_expected_shape() {
        let dir = tempfile::tempdir().unwrap();
        let session = session_with_exec(dir.path());
        let topo = Topology::single_switch(3);
        let mut builder = NetworkBuilder::new(&session, "lab");

        let report = builder.build(&topo).unwrap();
        assert!(report.complete(), "failures: {:?}", report.failures());

        // One switch with three links, three hosts with one interface
        // each, named <host>-eth0.
        assert_eq!(builder.node("s1").unwrap().intf_count(), 3);
        for host in ["h1", "h2", "h3"] {
            let node = builder.node(host).unwrap();
            assert_eq!(node.intf_count(), 1);
            assert_eq!(node.intf_names(), vec![format!("{}-eth0", host)]);
        }
        assert_eq!(builder.links().len(), 3);

        let status = builder.status();
        for (link, a, b) in &status.links {
            assert_eq!(*a, IntfStatus::Ok, "{} side 1", link);
            assert_eq!(*b, IntfStatus::Ok, "{} side 2", link);
        }
    }

    #[test]
    fn hosts_get_distinct_addresses_from_the_switch_block() {
        let dir = tempfile::tempdir().unwrap();
        let session = session_with_exec(dir.path());
        let topo = Topology::single_switch(3);
        let mut builder = NetworkBuilder::new(&session, "lab");
        builder.build(&topo).unwrap();

        let registry = BridgeRegistry::new(&session);
        let record = registry.record("s1").unwrap();
        assert_eq!(record.refcount, 3);
        let mut addrs: Vec<_> = record.containers.iter().map(|(_, a)| *a).collect();
        addrs.sort();
        addrs.dedup();
        assert_eq!(addrs.len(), 3);
    }

    #[test]
    fn switch_ports_count_up_from_one() {
        let dir = tempfile::tempdir().unwrap();
        let session = session_with_exec(dir.path());
        let topo = Topology::single_switch(3);
        let mut builder = NetworkBuilder::new(&session, "lab");
        builder.build(&topo).unwrap();

        let s1 = builder.node("s1").unwrap();
        assert_eq!(s1.intf_names(), vec!["s1-eth1", "s1-eth2", "s1-eth3"]);
    }

    #[test]
    fn build_continues_past_a_failed_link() {
        let dir = tempfile::tempdir().unwrap();
        let exec = ScriptedExecutor::new()
            .respond("-o addr show", ok_with_stdout(""))
            .respond(
                "add name h2-eth0",
                crate::utils::command::testing::failed_result("File exists"),
            );
        let session = Session::for_tests(dir.path(), Box::new(exec));
        let topo = Topology::single_switch(3);
        let mut builder = NetworkBuilder::new(&session, "lab");

        let report = builder.build(&topo).unwrap();
        assert!(!report.complete());
        let failures = report.failures();
        assert_eq!(failures.len(), 1);
        assert!(failures[0].0.contains("h2"));
        // The other two links were still created.
        assert_eq!(builder.links().len(), 2);
    }

    #[test]
    fn destroy_releases_addresses_and_bridges() {
        let dir = tempfile::tempdir().unwrap();
        let session = session_with_exec(dir.path());
        let topo = Topology::single_switch(2);
        let mut builder = NetworkBuilder::new(&session, "lab");
        builder.build(&topo).unwrap();
        builder.destroy().unwrap();

        let registry = BridgeRegistry::new(&session);
        assert!(!registry.exists("s1"));
        assert!(!session.networks_root.join("lab.json").exists());
    }

    #[test]
    fn manifest_round_trips_through_load() {
        let dir = tempfile::tempdir().unwrap();
        let session = session_with_exec(dir.path());
        let topo = Topology::single_switch(2);
        let mut builder = NetworkBuilder::new(&session, "lab");
        builder.build(&topo).unwrap();

        let loaded = NetworkBuilder::load(&session, "lab").unwrap();
        assert_eq!(loaded.links().len(), 2);
        assert_eq!(loaded.node("s1").unwrap().intf_count(), 2);
        assert!(!loaded.node("h1").unwrap().is_switch());

        assert!(matches!(
            NetworkBuilder::load(&session, "nope"),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn start_brings_switches_up_before_hosts() {
        let dir = tempfile::tempdir().unwrap();
        let session = session_with_exec(dir.path());
        let topo = Topology::single_switch(2);
        let mut builder = NetworkBuilder::new(&session, "lab");
        builder.build(&topo).unwrap();
        builder.start().unwrap();
        builder.stop().unwrap();
    }
}
