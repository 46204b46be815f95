// Networking stack: address allocation, bridge devices, interfaces,
// links, nodes, and the topology builder that orchestrates them.

pub mod bridge;
pub mod builder;
pub mod intf;
pub mod ipam;
pub mod link;
pub mod node;

pub use bridge::{BridgeDevice, BridgeKind};
pub use builder::{BuildReport, MacPolicy, NetworkBuilder, Outcome};
pub use intf::{Intf, InterfaceRef, IntfStatus};
pub use ipam::Cidr;
pub use link::{Link, LinkOpts};
pub use node::{Node, NodeKind, SwitchFlavor};
