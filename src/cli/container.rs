// Handlers for the per-container verbs: create, start, stop, destroy,
// execute, reset, status.

use crate::container::{ContainerLifecycle, ContainerState};
use crate::error::Result;
use crate::registry::BridgeRegistry;
use crate::session::Session;
use crate::utils::console::ConsoleLogger;

pub fn create(session: &Session, name: &str, bridge: &str, script: bool) -> Result<()> {
    ContainerLifecycle::new(session).create(name, bridge, script)
}

pub fn start(session: &Session, name: &str, daemon: bool) -> Result<()> {
    ContainerLifecycle::new(session).start(name, daemon)?;
    ConsoleLogger::success(&format!("container {} started", name));
    Ok(())
}

pub fn stop(session: &Session, name: &str) -> Result<()> {
    ContainerLifecycle::new(session).stop(name)?;
    ConsoleLogger::success(&format!("container {} stopped", name));
    Ok(())
}

pub fn destroy(session: &Session, name: &str, release_bridge: bool) -> Result<()> {
    ContainerLifecycle::new(session).destroy(name, release_bridge)
}

pub fn execute(session: &Session, name: &str, command: &[String]) -> Result<()> {
    let result = ContainerLifecycle::new(session).execute(name, command)?;
    if !result.stdout.is_empty() {
        print!("{}", result.stdout);
    }
    if !result.stderr.is_empty() {
        eprint!("{}", result.stderr);
    }
    Ok(())
}

pub fn reset(session: &Session) -> Result<()> {
    ContainerLifecycle::new(session).reset()?;
    ConsoleLogger::success("bridges and container mounts re-established");
    Ok(())
}

/// Print every container with its lifecycle state and bridge.
pub fn status(session: &Session) -> Result<()> {
    let lifecycle = ContainerLifecycle::new(session);
    let containers = lifecycle.list()?;
    if containers.is_empty() {
        ConsoleLogger::info("no containers recorded");
        return Ok(());
    }
    for name in containers {
        let state = match lifecycle.state(&name) {
            ContainerState::Undefined => "undefined",
            ContainerState::FilesystemReady => "filesystem-ready",
            ContainerState::Configured => "configured",
            ContainerState::Running => "running",
            ContainerState::Stopped => "stopped",
        };
        let bridge = lifecycle.bridge_of(&name).unwrap_or_else(|_| "-".to_string());
        let address = BridgeRegistry::new(session)
            .container_address(&name, &bridge)
            .ok()
            .flatten()
            .map(|a| a.to_string())
            .unwrap_or_else(|| "-".to_string());
        ConsoleLogger::info(&format!(
            "{}  state={}  bridge={}  ip={}",
            name, state, bridge, address
        ));
    }
    Ok(())
}
