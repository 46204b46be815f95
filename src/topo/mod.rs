// Network topology shapes built on the generic graph: a single switch
// with k hosts, and a k-ary tree of switches with hosts at the leaves.

pub mod graph;

use crate::error::Result;
use graph::{Graph, NodeAttrs};

/// An immutable network shape. Built once by a generator; the only later
/// mutation is the depth-assignment pass.
#[derive(Debug)]
pub struct Topology {
    graph: Graph,
}

impl Topology {
    /// One switch `s1` with hosts `h1..hk`, each linked to the switch.
    pub fn single_switch(k: u32) -> Self {
        let mut graph = Graph::new();
        graph.add_node("s1", true);
        for i in 1..=k {
            let host = format!("h{}", i);
            graph.add_node(&host, false);
            graph.add_edge(&host, "s1");
        }
        Self { graph }
    }

    /// A tree of the given depth and fanout: switches `s1..sM` as internal
    /// nodes, hosts `h1..hN` at the leaves, numbered in pre-order.
    pub fn tree(depth: u32, fanout: u32) -> Self {
        let mut graph = Graph::new();
        let mut host_num = 1;
        let mut switch_num = 1;
        Self::add_tree(&mut graph, depth, fanout, &mut host_num, &mut switch_num);
        Self { graph }
    }

    /// Add a subtree and return its root node name so the caller can link
    /// it to its parent.
    fn add_tree(
        graph: &mut Graph,
        depth: u32,
        fanout: u32,
        host_num: &mut u32,
        switch_num: &mut u32,
    ) -> String {
        if depth > 0 {
            let node = format!("s{}", switch_num);
            *switch_num += 1;
            graph.add_node(&node, true);
            for _ in 0..fanout {
                let child = Self::add_tree(graph, depth - 1, fanout, host_num, switch_num);
                graph.add_edge(&child, &node);
            }
            node
        } else {
            let node = format!("h{}", host_num);
            *host_num += 1;
            graph.add_node(&node, false);
            node
        }
    }

    pub fn nodes(&self) -> &[String] {
        self.graph.nodes()
    }

    pub fn hosts(&self) -> Vec<&str> {
        self.graph
            .nodes()
            .iter()
            .filter(|n| !self.graph.is_switch(n))
            .map(String::as_str)
            .collect()
    }

    pub fn switches(&self) -> Vec<&str> {
        self.graph
            .nodes()
            .iter()
            .filter(|n| self.graph.is_switch(n))
            .map(String::as_str)
            .collect()
    }

    pub fn links(&self) -> &[(String, String)] {
        self.graph.edges()
    }

    /// Links joining a host to a switch.
    #[allow(dead_code)]
    pub fn host_switch_links(&self) -> Vec<(&str, &str)> {
        self.graph
            .edges()
            .iter()
            .filter(|(src, dst)| !self.graph.is_switch(src) && self.graph.is_switch(dst))
            .map(|(src, dst)| (src.as_str(), dst.as_str()))
            .collect()
    }

    /// Links joining two switches.
    #[allow(dead_code)]
    pub fn switch_links(&self) -> Vec<(&str, &str)> {
        self.graph
            .edges()
            .iter()
            .filter(|(src, dst)| self.graph.is_switch(src) && self.graph.is_switch(dst))
            .map(|(src, dst)| (src.as_str(), dst.as_str()))
            .collect()
    }

    pub fn is_switch(&self, name: &str) -> bool {
        self.graph.is_switch(name)
    }

    #[allow(dead_code)]
    pub fn node_info(&self, name: &str) -> Option<&NodeAttrs> {
        self.graph.node(name)
    }

    pub fn assign_depth(&mut self) -> Result<()> {
        self.graph.assign_depth()
    }
}
