// Handlers for the batch verbs: `net` (container networks over bridges)
// and `topo` (veth/switch networks built from a topology).
//
// A "connected" network puts every container on one shared bridge; a
// "star" network gives each container its own bridge. Validation of the
// whole naming scheme happens before anything is created.

use crate::container::ContainerLifecycle;
use crate::error::{Error, Result};
use crate::net::builder::NetworkBuilder;
use crate::net::intf::IntfStatus;
use crate::net::MacPolicy;
use crate::registry::BridgeRegistry;
use crate::session::Session;
use crate::topo::Topology;
use crate::utils::console::ConsoleLogger;
use crate::utils::validation::InputValidator;

/// Shape of a container network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetShape {
    Star,
    Connected,
}

fn container_name(prefix: &str, i: u32) -> String {
    format!("{}{}", prefix, i)
}

fn bridge_name(prefix: &str, shape: NetShape, i: u32) -> String {
    match shape {
        NetShape::Connected => format!("{}br", prefix),
        NetShape::Star => format!("{}{}br", prefix, i),
    }
}

/// Create a network of `size` containers under the naming scheme
/// `<prefix>0..<prefix>N-1`, attached per the shape.
pub fn create(
    session: &Session,
    prefix: &str,
    size: u32,
    shape: NetShape,
    gateway_iface: Option<&str>,
    script: bool,
) -> Result<()> {
    InputValidator::validate_name("network prefix", prefix)?;
    InputValidator::validate_network_size(size)?;

    // Fail-fast: reject the whole naming scheme before creating anything.
    let registry = BridgeRegistry::new(session);
    let lifecycle = ContainerLifecycle::new(session);
    for i in 0..size {
        let name = container_name(prefix, i);
        if lifecycle.exists(&name) {
            return Err(Error::NameConflict {
                kind: "container",
                name,
            });
        }
        let bridge = bridge_name(prefix, shape, i);
        if registry.exists(&bridge) {
            return Err(Error::NameConflict {
                kind: "bridge",
                name: bridge,
            });
        }
        InputValidator::validate_interface_name(&bridge)?;
    }

    match shape {
        NetShape::Connected => {
            let bridge = bridge_name(prefix, shape, 0);
            let block = registry.free_block(size)?;
            registry.add_bridge(&bridge, &block, gateway_iface)?;
            for i in 0..size {
                lifecycle.create(&container_name(prefix, i), &bridge, script)?;
            }
        }
        NetShape::Star => {
            for i in 0..size {
                let bridge = bridge_name(prefix, shape, i);
                let block = registry.free_block(size)?;
                registry.add_bridge(&bridge, &block, gateway_iface)?;
                lifecycle.create(&container_name(prefix, i), &bridge, script)?;
            }
        }
    }
    ConsoleLogger::success(&format!(
        "network {} created ({} containers, {:?})",
        prefix, size, shape
    ));
    Ok(())
}

/// Destroy the containers of a network, then their bridges.
pub fn destroy(session: &Session, prefix: &str, size: u32, shape: NetShape) -> Result<()> {
    let registry = BridgeRegistry::new(session);
    let lifecycle = ContainerLifecycle::new(session);
    for i in 0..size {
        let name = container_name(prefix, i);
        if let Err(e) = lifecycle.destroy(&name, false) {
            ConsoleLogger::warning(&format!("failed to destroy container {}: {}", name, e));
        }
        if shape == NetShape::Star {
            let bridge = bridge_name(prefix, shape, i);
            if let Err(e) = registry.delete_bridge(&bridge, false) {
                ConsoleLogger::warning(&format!("failed to delete bridge {}: {}", bridge, e));
            }
        }
    }
    if shape == NetShape::Connected {
        let bridge = bridge_name(prefix, shape, 0);
        registry.delete_bridge(&bridge, false)?;
    }
    ConsoleLogger::success(&format!("network {} destroyed", prefix));
    Ok(())
}

pub fn start(session: &Session, prefix: &str, size: u32) -> Result<()> {
    let lifecycle = ContainerLifecycle::new(session);
    for i in 0..size {
        lifecycle.start(&container_name(prefix, i), true)?;
    }
    Ok(())
}

pub fn stop(session: &Session, prefix: &str, size: u32) -> Result<()> {
    let lifecycle = ContainerLifecycle::new(session);
    for i in 0..size {
        lifecycle.stop(&container_name(prefix, i))?;
    }
    Ok(())
}

pub fn execute(session: &Session, prefix: &str, size: u32, command: &[String]) -> Result<()> {
    let lifecycle = ContainerLifecycle::new(session);
    for i in 0..size {
        let name = container_name(prefix, i);
        ConsoleLogger::progress(&format!("running in {}", name));
        let result = lifecycle.execute(&name, command)?;
        if !result.stdout.is_empty() {
            print!("{}", result.stdout);
        }
    }
    Ok(())
}

/// Shape of a veth/switch topology network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopoShape {
    Single { size: u32 },
    Tree { depth: u32, fanout: u32 },
}

/// Build a topology network of namespaces, switches, and veth links.
pub fn topo_create(session: &Session, name: &str, shape: TopoShape) -> Result<()> {
    InputValidator::validate_name("network", name)?;
    let mut topology = match shape {
        TopoShape::Single { size } => {
            InputValidator::validate_network_size(size)?;
            Topology::single_switch(size)
        }
        TopoShape::Tree { depth, fanout } => {
            if depth == 0 || fanout == 0 {
                return Err(Error::Validation(
                    "tree depth and fanout must be greater than zero".to_string(),
                ));
            }
            Topology::tree(depth, fanout)
        }
    };
    topology.assign_depth()?;

    let mut builder = NetworkBuilder::new(session, name).with_mac_policy(MacPolicy::Random);
    let report = builder.build(&topology)?;
    if report.complete() {
        ConsoleLogger::success(&format!(
            "network {} built: {} switches, {} hosts, {} links",
            name,
            topology.switches().len(),
            topology.hosts().len(),
            report.links.len()
        ));
    } else {
        ConsoleLogger::warning(&format!("network {} built partially:", name));
        for (what, reason) in report.failures() {
            ConsoleLogger::item(&format!("{}: {}", what, reason));
        }
    }
    builder.start()?;
    Ok(())
}

pub fn topo_destroy(session: &Session, name: &str) -> Result<()> {
    let mut builder = NetworkBuilder::load(session, name)?;
    builder.destroy()?;
    ConsoleLogger::success(&format!("network {} destroyed", name));
    Ok(())
}

/// Print observed-vs-expected state for a built topology network.
pub fn topo_status(session: &Session, name: &str) -> Result<()> {
    let builder = NetworkBuilder::load(session, name)?;
    let status = builder.status();
    for (node, present) in &status.nodes {
        ConsoleLogger::info(&format!(
            "node {}  {}",
            node,
            if *present { "present" } else { "missing" }
        ));
    }
    for (link, a, b) in &status.links {
        let ok = *a == IntfStatus::Ok && *b == IntfStatus::Ok;
        let line = format!("link {}  ({} {})", link, a, b);
        if ok {
            ConsoleLogger::info(&line);
        } else {
            ConsoleLogger::warning(&line);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::command::testing::{ok_with_stdout, ScriptedExecutor};
    use crate::utils::command::testing::failed_result;

    fn test_session(dir: &std::path::Path) -> Session {
        let exec = ScriptedExecutor::new()
            .respond("-o addr show", ok_with_stdout(""))
            .respond("mountpoint -q", failed_result(""));
        Session::for_tests(dir, Box::new(exec))
    }

    #[test]
    fn connected_network_shares_one_bridge() {
        let dir = tempfile::tempdir().unwrap();
        let session = test_session(dir.path());

        create(&session, "web", 3, NetShape::Connected, None, false).unwrap();

        let registry = BridgeRegistry::new(&session);
        assert_eq!(registry.list().unwrap(), vec!["webbr".to_string()]);
        assert_eq!(registry.refcount("webbr").unwrap(), 3);

        destroy(&session, "web", 3, NetShape::Connected).unwrap();
        assert!(!registry.exists("webbr"));
    }

    #[test]
    fn star_network_gets_a_bridge_per_container() {
        let dir = tempfile::tempdir().unwrap();
        let session = test_session(dir.path());

        create(&session, "web", 2, NetShape::Star, None, false).unwrap();

        let registry = BridgeRegistry::new(&session);
        let bridges = registry.list().unwrap();
        assert_eq!(bridges, vec!["web0br".to_string(), "web1br".to_string()]);
        // Blocks must be disjoint.
        let blocks = registry.existing_blocks().unwrap();
        assert!(!blocks[0].overlaps(&blocks[1]));
    }

    #[test]
    fn create_validates_the_whole_naming_scheme_first() {
        let dir = tempfile::tempdir().unwrap();
        let session = test_session(dir.path());
        // Occupy web1 so the batch create must fail before creating web0.
        BridgeRegistry::new(&session)
            .add_bridge("web1br", &"10.9.0.0/24".parse().unwrap(), None)
            .unwrap();

        let err = create(&session, "web", 2, NetShape::Star, None, false);
        assert!(matches!(err, Err(Error::NameConflict { .. })));
        assert!(!ContainerLifecycle::new(&session).exists("web0"));
        assert!(!BridgeRegistry::new(&session).exists("web0br"));
    }

    #[test]
    fn topo_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let session = test_session(dir.path());

        topo_create(&session, "lab", TopoShape::Single { size: 2 }).unwrap();
        assert!(session.networks_root.join("lab.json").exists());

        topo_status(&session, "lab").unwrap();
        topo_destroy(&session, "lab").unwrap();
        assert!(!session.networks_root.join("lab.json").exists());
    }
}
