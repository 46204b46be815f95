// Session state shared by every component: persisted-state roots, lock and
// command timeouts, and the privileged command executor. Passed by
// reference so there are no process-wide singletons.

use crate::utils::command::{Executor, ShellExecutor};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_ROOT: &str = "/var/lib/weft";
const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 30;
const DEFAULT_LOCK_TIMEOUT_SECS: u64 = 5;

pub struct Session {
    executor: Box<dyn Executor>,
    pub bridges_root: PathBuf,
    pub containers_root: PathBuf,
    pub networks_root: PathBuf,
    pub lock_timeout: Duration,
}

impl Session {
    /// Build a session from environment variables, falling back to
    /// defaults.
    ///
    /// - `WEFT_ROOT`: state root (default /var/lib/weft)
    /// - `WEFT_BRIDGES_ROOT`, `WEFT_CONTAINERS_ROOT`, `WEFT_NETWORKS_ROOT`:
    ///   per-store overrides (default `<root>/{bridges,containers,networks}`)
    /// - `WEFT_COMMAND_TIMEOUT_SECS`: external command timeout (default 30)
    /// - `WEFT_LOCK_TIMEOUT_SECS`: registry lock timeout (default 5)
    pub fn from_env() -> Self {
        let root = PathBuf::from(env_or("WEFT_ROOT", DEFAULT_ROOT));
        let command_timeout =
            Duration::from_secs(env_parse("WEFT_COMMAND_TIMEOUT_SECS", DEFAULT_COMMAND_TIMEOUT_SECS));
        let lock_timeout =
            Duration::from_secs(env_parse("WEFT_LOCK_TIMEOUT_SECS", DEFAULT_LOCK_TIMEOUT_SECS));

        Self {
            executor: Box::new(ShellExecutor::new(command_timeout)),
            bridges_root: std::env::var("WEFT_BRIDGES_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| root.join("bridges")),
            containers_root: std::env::var("WEFT_CONTAINERS_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| root.join("containers")),
            networks_root: std::env::var("WEFT_NETWORKS_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| root.join("networks")),
            lock_timeout,
        }
    }

    pub fn exec(&self) -> &dyn Executor {
        self.executor.as_ref()
    }

    #[cfg(test)]
    pub fn for_tests(root: &std::path::Path, executor: Box<dyn Executor>) -> Self {
        Self {
            executor,
            bridges_root: root.join("bridges"),
            containers_root: root.join("containers"),
            networks_root: root.join("networks"),
            lock_timeout: Duration::from_secs(1),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
