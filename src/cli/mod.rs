// CLI command handlers, one module per surface area.

pub mod bridge;
pub mod container;
pub mod net;
