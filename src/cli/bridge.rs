// Handlers for the `bridge` verb.

use crate::error::{Error, Result};
use crate::net::ipam::Cidr;
use crate::registry::{BridgeRegistry, BridgeState};
use crate::session::Session;
use crate::utils::console::ConsoleLogger;
use crate::utils::validation::InputValidator;

/// Add a bridge with a fixed CIDR block (or a freely allocated one when
/// no block is given) and an optional upstream gateway interface.
pub fn add(
    session: &Session,
    name: &str,
    cidr: Option<&str>,
    gateway_iface: Option<&str>,
) -> Result<()> {
    InputValidator::validate_name("bridge", name)?;
    InputValidator::validate_interface_name(name)?;
    if let Some(iface) = gateway_iface {
        let present = session
            .exec()
            .run(&["ip", "link", "show", iface])
            .map(|r| r.success)
            .unwrap_or(false);
        if !present {
            return Err(Error::Validation(format!(
                "host interface {} does not exist",
                iface
            )));
        }
    }

    let registry = BridgeRegistry::new(session);
    let block: Cidr = match cidr {
        Some(s) => s.parse()?,
        None => registry.free_block(254)?,
    };
    registry.add_bridge(name, &block, gateway_iface)?;
    ConsoleLogger::success(&format!("bridge {} created with block {}", name, block));
    Ok(())
}

/// Delete a bridge; `force` overrides the in-use guard.
pub fn delete(session: &Session, name: &str, force: bool) -> Result<()> {
    let registry = BridgeRegistry::new(session);
    if !registry.exists(name) {
        return Err(Error::NotFound {
            kind: "bridge",
            name: name.to_string(),
        });
    }
    registry.delete_bridge(name, force)?;
    ConsoleLogger::success(&format!("bridge {} deleted", name));
    Ok(())
}

/// Print every bridge record with its observed device state.
pub fn status(session: &Session) -> Result<()> {
    let registry = BridgeRegistry::new(session);
    let bridges = registry.list()?;
    if bridges.is_empty() {
        ConsoleLogger::info("no bridges recorded");
        return Ok(());
    }
    for name in bridges {
        let record = registry.record(&name)?;
        let status = registry.status(&name)?;
        let state = match status.state {
            BridgeState::Absent => "absent",
            BridgeState::Allocated => "allocated",
            BridgeState::InUse => "in-use",
        };
        ConsoleLogger::info(&format!(
            "{}  cidr={}  state={}  refcnt={}  device={}",
            record.name,
            record.cidr,
            state,
            status.refcount,
            if status.device_present { "present" } else { "missing" }
        ));
        for container in &status.containers {
            ConsoleLogger::item(container);
        }
    }
    Ok(())
}
