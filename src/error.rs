// Error types shared across the networking, registry, and container layers.

/// Error taxonomy for all weft operations.
///
/// Validation failures are raised before any mutation happens; everything
/// else can surface mid-build, in which case partial state is left behind
/// and discoverable through the `status` queries.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("{kind} '{name}' already exists")]
    NameConflict { kind: &'static str, name: String },

    #[error("{kind} '{name}' not found")]
    NotFound { kind: &'static str, name: String },

    #[error("address space exhausted: no free {0} remaining")]
    AddressSpaceExhausted(&'static str),

    #[error("topology is not a tree: cycle detected at node '{0}'")]
    CycleDetected(String),

    #[error("failed to create interface pair ({intf1}, {intf2}): {output}")]
    InterfacePairCreation {
        intf1: String,
        intf2: String,
        output: String,
    },

    #[error("bridge '{bridge}' is in use by {count} container(s)", count = .containers.len())]
    BridgeInUse {
        bridge: String,
        containers: Vec<String>,
    },

    #[error("command '{cmd}' failed (exit code {code:?}): {stderr}")]
    CommandFailed {
        cmd: String,
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    #[error("command '{cmd}' timed out after {timeout_secs}s")]
    CommandTimeout { cmd: String, timeout_secs: u64 },

    #[error("timed out waiting for exclusive lock on {0}")]
    LockTimeout(String),

    #[error("invalid CIDR '{0}'")]
    InvalidCidr(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
