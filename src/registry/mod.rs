// Persisted, reference-counted bridge registry.
//
// One directory per bridge under the bridges root:
//
//   bridges/<name>/cidr                   CIDR string
//   bridges/<name>/iface                  upstream gateway interface (optional)
//   bridges/<name>/refcnt                 decimal reference count
//   bridges/<name>/containers/<cname>     allocated IP per container
//   bridges/<name>.lock                   sidecar lock file
//
// Every read-check-write of a bridge's record runs under an exclusive
// advisory lock on the sidecar file, held for the whole critical section,
// so concurrent container operations cannot double-allocate an address or
// corrupt the refcount.

pub mod lock;

use crate::error::{Error, Result};
use crate::net::bridge::{BridgeDevice, BridgeKind};
use crate::net::ipam::{self, Cidr};
use crate::session::Session;
use crate::utils::console::ConsoleLogger;
use crate::utils::filesystem::FileSystemUtils;
use lock::LockGuard;
use std::net::Ipv4Addr;
use std::path::PathBuf;

/// Lifecycle state of a bridge, derived from its persisted record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Absent,
    Allocated,
    InUse,
}

/// Snapshot of a bridge's persisted record.
#[derive(Debug, Clone)]
pub struct BridgeRecord {
    pub name: String,
    pub cidr: Cidr,
    pub kind: BridgeKind,
    pub gateway_iface: Option<String>,
    pub refcount: u32,
    pub containers: Vec<(String, Ipv4Addr)>,
}

/// Observed-vs-expected state for a bridge, for detecting half-built or
/// stale setups (e.g. after a host reboot).
#[derive(Debug, Clone)]
pub struct BridgeStatus {
    pub state: BridgeState,
    pub device_present: bool,
    pub refcount: u32,
    pub containers: Vec<String>,
}

pub struct BridgeRegistry<'a> {
    session: &'a Session,
}

impl<'a> BridgeRegistry<'a> {
    pub fn new(session: &'a Session) -> Self {
        Self { session }
    }

    fn dir(&self, name: &str) -> PathBuf {
        self.session.bridges_root.join(name)
    }

    fn lock_path(&self, name: &str) -> PathBuf {
        self.session.bridges_root.join(format!("{}.lock", name))
    }

    fn lock(&self, name: &str) -> Result<LockGuard> {
        FileSystemUtils::create_dir_all(&self.session.bridges_root)?;
        LockGuard::acquire(&self.lock_path(name), self.session.lock_timeout)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.dir(name).is_dir()
    }

    /// Names of all recorded bridges.
    pub fn list(&self) -> Result<Vec<String>> {
        Ok(FileSystemUtils::dir_entries(&self.session.bridges_root)?
            .into_iter()
            .filter(|n| !n.ends_with(".lock"))
            .collect())
    }

    /// Read a bridge's full record, failing with NotFound when absent.
    pub fn record(&self, name: &str) -> Result<BridgeRecord> {
        let dir = self.dir(name);
        if !dir.is_dir() {
            return Err(Error::NotFound {
                kind: "bridge",
                name: name.to_string(),
            });
        }
        let cidr: Cidr = FileSystemUtils::read_line(dir.join("cidr"))?.parse()?;
        let kind = if dir.join("kind").exists() {
            BridgeKind::parse(&FileSystemUtils::read_line(dir.join("kind"))?)
        } else {
            BridgeKind::Linux
        };
        let gateway_iface = if dir.join("iface").exists() {
            Some(FileSystemUtils::read_line(dir.join("iface"))?)
        } else {
            None
        };
        let refcount = self.read_refcount(name)?;
        let mut containers = Vec::new();
        for cname in FileSystemUtils::dir_entries(dir.join("containers"))? {
            let addr = FileSystemUtils::read_line(dir.join("containers").join(&cname))?
                .parse::<Ipv4Addr>()
                .map_err(|_| Error::InvalidCidr(format!("address record for {}", cname)))?;
            containers.push((cname, addr));
        }
        Ok(BridgeRecord {
            name: name.to_string(),
            cidr,
            kind,
            gateway_iface,
            refcount,
            containers,
        })
    }

    fn read_refcount(&self, name: &str) -> Result<u32> {
        let path = self.dir(name).join("refcnt");
        if !path.exists() {
            return Ok(0);
        }
        Ok(FileSystemUtils::read_line(&path)?.parse().unwrap_or(0))
    }

    fn write_refcount(&self, name: &str, count: u32) -> Result<()> {
        FileSystemUtils::write_line(self.dir(name).join("refcnt"), &count.to_string())
    }

    /// CIDR blocks of all recorded bridges.
    pub fn existing_blocks(&self) -> Result<Vec<Cidr>> {
        let mut blocks = Vec::new();
        for name in self.list()? {
            blocks.push(self.record(&name)?.cidr);
        }
        Ok(blocks)
    }

    /// Pick a free CIDR block for a new bridge, avoiding both recorded
    /// blocks and the host's own network configuration.
    pub fn free_block(&self, size: u32) -> Result<Cidr> {
        let existing = self.existing_blocks()?;
        let host = ipam::host_networks(self.session.exec())?;
        ipam::free_cidr_block(size, &existing, &host)
    }

    /// Create a Linux bridge device and persist its record with
    /// refcount 0.
    pub fn add_bridge(&self, name: &str, cidr: &Cidr, gateway_iface: Option<&str>) -> Result<()> {
        self.add_bridge_kind(name, cidr, gateway_iface, BridgeKind::Linux)
    }

    /// Create a bridge of the given flavor and persist its record.
    pub fn add_bridge_kind(
        &self,
        name: &str,
        cidr: &Cidr,
        gateway_iface: Option<&str>,
        kind: BridgeKind,
    ) -> Result<()> {
        let _guard = self.lock(name)?;
        if self.exists(name) {
            return Err(Error::NameConflict {
                kind: "bridge",
                name: name.to_string(),
            });
        }

        BridgeDevice::create(self.session.exec(), kind, name, cidr, gateway_iface)?;

        let dir = self.dir(name);
        FileSystemUtils::create_dir_all(dir.join("containers"))?;
        FileSystemUtils::write_line(dir.join("cidr"), &cidr.to_string())?;
        if kind != BridgeKind::Linux {
            FileSystemUtils::write_line(dir.join("kind"), kind.as_str())?;
        }
        if let Some(iface) = gateway_iface {
            FileSystemUtils::write_line(dir.join("iface"), iface)?;
        }
        self.write_refcount(name, 0)?;
        tracing::debug!(bridge = name, %cidr, "bridge record created");
        Ok(())
    }

    /// Delete the bridge device and its record. Refuses while containers
    /// still reference the bridge unless forced, in which case the
    /// remaining users are listed as a warning.
    pub fn delete_bridge(&self, name: &str, force: bool) -> Result<()> {
        let _guard = self.lock(name)?;
        let record = self.record(name)?;

        if record.refcount > 0 && !force {
            return Err(Error::BridgeInUse {
                bridge: name.to_string(),
                containers: record.containers.iter().map(|(n, _)| n.clone()).collect(),
            });
        }
        if record.refcount > 0 {
            ConsoleLogger::warning(&format!(
                "force-deleting bridge {} while still in use by:",
                name
            ));
            for (cname, _) in &record.containers {
                ConsoleLogger::item(cname);
            }
        }

        if BridgeDevice::exists(self.session.exec(), name) {
            BridgeDevice::delete(self.session.exec(), record.kind, name)?;
        }
        FileSystemUtils::remove_path(self.dir(name))?;
        FileSystemUtils::remove_path(self.lock_path(name))?;
        Ok(())
    }

    #[allow(dead_code)]
    pub fn inc_ref(&self, name: &str) -> Result<u32> {
        let _guard = self.lock(name)?;
        self.inc_ref_locked(name)
    }

    fn inc_ref_locked(&self, name: &str) -> Result<u32> {
        if !self.exists(name) {
            return Err(Error::NotFound {
                kind: "bridge",
                name: name.to_string(),
            });
        }
        let count = self.read_refcount(name)? + 1;
        self.write_refcount(name, count)?;
        Ok(count)
    }

    /// Decrement the refcount, clamped at zero.
    #[allow(dead_code)]
    pub fn dec_ref(&self, name: &str) -> Result<u32> {
        let _guard = self.lock(name)?;
        if !self.exists(name) {
            return Err(Error::NotFound {
                kind: "bridge",
                name: name.to_string(),
            });
        }
        let count = self.read_refcount(name)?.saturating_sub(1);
        self.write_refcount(name, count)?;
        Ok(count)
    }

    pub fn refcount(&self, name: &str) -> Result<u32> {
        if !self.exists(name) {
            return Err(Error::NotFound {
                kind: "bridge",
                name: name.to_string(),
            });
        }
        self.read_refcount(name)
    }

    /// Allocate a free address from the bridge's block for `container` and
    /// persist the assignment. Runs entirely under the bridge lock.
    #[allow(dead_code)]
    pub fn allocate_address(&self, container: &str, bridge: &str) -> Result<Ipv4Addr> {
        let _guard = self.lock(bridge)?;
        self.allocate_address_locked(container, bridge)
    }

    fn allocate_address_locked(&self, container: &str, bridge: &str) -> Result<Ipv4Addr> {
        let record = self.record(bridge)?;
        let allocated: Vec<Ipv4Addr> = record.containers.iter().map(|(_, a)| *a).collect();
        let addr = ipam::free_address(&record.cidr, &allocated)?;
        FileSystemUtils::write_line(
            self.dir(bridge).join("containers").join(container),
            &addr.to_string(),
        )?;
        Ok(addr)
    }

    /// Attach a container: allocate its address and increment the
    /// refcount inside one critical section, so two concurrent creates
    /// can neither share an address nor lose a count.
    pub fn attach_container(&self, container: &str, bridge: &str) -> Result<Ipv4Addr> {
        let _guard = self.lock(bridge)?;
        let addr = self.allocate_address_locked(container, bridge)?;
        self.inc_ref_locked(bridge)?;
        Ok(addr)
    }

    /// Detach a container: drop its address record and decrement the
    /// refcount in one critical section. Returns the remaining refcount.
    pub fn release_container(&self, container: &str, bridge: &str) -> Result<u32> {
        let _guard = self.lock(bridge)?;
        if !self.exists(bridge) {
            return Err(Error::NotFound {
                kind: "bridge",
                name: bridge.to_string(),
            });
        }
        FileSystemUtils::remove_path(self.dir(bridge).join("containers").join(container))?;
        let count = self.read_refcount(bridge)?.saturating_sub(1);
        self.write_refcount(bridge, count)?;
        Ok(count)
    }

    /// Address allocated to `container` on `bridge`, if any.
    pub fn container_address(&self, container: &str, bridge: &str) -> Result<Option<Ipv4Addr>> {
        let path = self.dir(bridge).join("containers").join(container);
        if !path.exists() {
            return Ok(None);
        }
        let addr = FileSystemUtils::read_line(&path)?
            .parse::<Ipv4Addr>()
            .map_err(|_| Error::InvalidCidr(format!("address record for {}", container)))?;
        Ok(Some(addr))
    }

    /// Recreate the OS device from the persisted record when it is
    /// missing (host reboot). Returns true when the device was recreated.
    pub fn ensure_device(&self, name: &str) -> Result<bool> {
        let _guard = self.lock(name)?;
        let record = self.record(name)?;
        if BridgeDevice::exists(self.session.exec(), name) {
            return Ok(false);
        }
        ConsoleLogger::progress(&format!(
            "bridge device {} missing, recreating from record",
            name
        ));
        BridgeDevice::create(
            self.session.exec(),
            record.kind,
            name,
            &record.cidr,
            record.gateway_iface.as_deref(),
        )?;
        Ok(true)
    }

    /// Observed-vs-expected state for one bridge.
    pub fn status(&self, name: &str) -> Result<BridgeStatus> {
        if !self.exists(name) {
            return Ok(BridgeStatus {
                state: BridgeState::Absent,
                device_present: BridgeDevice::exists(self.session.exec(), name),
                refcount: 0,
                containers: Vec::new(),
            });
        }
        let record = self.record(name)?;
        let state = if record.refcount > 0 {
            BridgeState::InUse
        } else {
            BridgeState::Allocated
        };
        Ok(BridgeStatus {
            state,
            device_present: BridgeDevice::exists(self.session.exec(), name),
            refcount: record.refcount,
            containers: record.containers.into_iter().map(|(n, _)| n).collect(),
        })
    }
}
