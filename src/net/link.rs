// Links: veth pairs joining two nodes.
//
// Construction order matters: ports are allocated first, canonical names
// derived from them, then the OS-level pair is created, and only then are
// the Intf objects built and registered — an Intf configures a live
// interface, so the pair has to exist before either end does.

use crate::error::Result;
use crate::net::intf::{make_intf_pair, Intf, InterfaceRef, IntfStatus};
use crate::net::node::Node;
use crate::utils::command::Executor;
use std::fmt;
use std::net::Ipv4Addr;

/// One side of a link: which node, which interface, which port.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub node: String,
    pub intf: String,
    pub port: u16,
}

/// Optional overrides for link construction.
#[derive(Debug, Clone, Default)]
pub struct LinkOpts {
    pub port1: Option<u16>,
    pub port2: Option<u16>,
    pub intf_name1: Option<String>,
    pub intf_name2: Option<String>,
    pub mac1: Option<String>,
    pub mac2: Option<String>,
    /// Address for the first endpoint (typically the host side).
    pub ip1: Option<(Ipv4Addr, u8)>,
}

#[derive(Debug, Clone)]
pub struct Link {
    pub endpoint1: Endpoint,
    pub endpoint2: Endpoint,
}

impl Link {
    /// Canonical interface name for a node's numbered port.
    pub fn intf_name(node: &str, port: u16) -> String {
        format!("{}-eth{}", node, port)
    }

    /// Create a link between two nodes, allocating ports and names where
    /// not overridden.
    pub fn create(
        exec: &dyn Executor,
        node1: &mut Node,
        node2: &mut Node,
        opts: LinkOpts,
    ) -> Result<Link> {
        let port1 = opts.port1.unwrap_or_else(|| node1.new_port());
        let port2 = opts.port2.unwrap_or_else(|| node2.new_port());
        let name1 = opts
            .intf_name1
            .unwrap_or_else(|| Self::intf_name(&node1.name, port1));
        let name2 = opts
            .intf_name2
            .unwrap_or_else(|| Self::intf_name(&node2.name, port2));

        make_intf_pair(
            exec,
            &name1,
            &name2,
            opts.mac1.as_deref(),
            opts.mac2.as_deref(),
            true,
        )?;

        let mut intf1 = Intf::new(&name1);
        intf1.mac = opts.mac1.clone();
        node1.add_intf(exec, intf1, Some(port1))?;
        if let Some((addr, prefix_len)) = opts.ip1 {
            node1.set_ip(exec, &InterfaceRef::ByName(name1.clone()), addr, prefix_len)?;
        } else if let Some(intf) = node1.intf(&InterfaceRef::ByName(name1.clone())) {
            intf.set_up(exec)?;
        }

        let mut intf2 = Intf::new(&name2);
        intf2.mac = opts.mac2.clone();
        node2.add_intf(exec, intf2, Some(port2))?;
        if let Some(intf) = node2.intf(&InterfaceRef::ByName(name2.clone())) {
            intf.set_up(exec)?;
        }

        Ok(Link {
            endpoint1: Endpoint {
                node: node1.name.clone(),
                intf: name1,
                port: port1,
            },
            endpoint2: Endpoint {
                node: node2.name.clone(),
                intf: name2,
                port: port2,
            },
        })
    }

    /// Delete the link. Removing one end of a veth pair removes both;
    /// the second delete is redundant but harmless and kept for
    /// robustness against flavors where the ends are independent.
    pub fn delete(&self, exec: &dyn Executor, node1: &mut Node, node2: &mut Node) -> Result<()> {
        if let Some(intf) = node1.intf(&InterfaceRef::ByName(self.endpoint1.intf.clone())) {
            intf.delete(exec)?;
        }
        exec.run_quietly(&["ip", "link", "del", &self.endpoint2.intf]);
        node1.remove_intf(&self.endpoint1.intf);
        node2.remove_intf(&self.endpoint2.intf);
        Ok(())
    }

    /// Observed status of both sides.
    pub fn status(&self, exec: &dyn Executor, node1: &Node, node2: &Node) -> (IntfStatus, IntfStatus) {
        let side = |node: &Node, name: &str| match node.intf(&InterfaceRef::ByName(name.to_string()))
        {
            Some(intf) => intf.status(exec),
            None => IntfStatus::Missing,
        };
        (
            side(node1, &self.endpoint1.intf),
            side(node2, &self.endpoint2.intf),
        )
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}<->{}", self.endpoint1.intf, self.endpoint2.intf)
    }
}
