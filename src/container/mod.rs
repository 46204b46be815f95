// Container lifecycle: create, start, stop, destroy, execute, reset.
//
// A container's persisted record lives under the containers root:
//
//   containers/<name>/rootfs/    bind-mount based filesystem
//   containers/<name>/config     LXC configuration
//   containers/<name>/fstab      LXC fstab
//   containers/<name>/bridge     name of the registry bridge it uses
//
// The container runtime itself (lxc-*) is an external collaborator
// reached through the command executor.

pub mod templates;

use crate::error::{Error, Result};
use crate::registry::BridgeRegistry;
use crate::session::Session;
use crate::utils::command::CommandResult;
use crate::utils::console::ConsoleLogger;
use crate::utils::filesystem::FileSystemUtils;
use crate::utils::validation::InputValidator;
use std::path::PathBuf;

/// Host directories bind-mounted read-only into every container.
const BIND_MOUNTED_DIRS: &[&str] = &["/bin", "/sbin", "/lib", "/lib64", "/usr"];

/// Directories created empty in every container filesystem.
const INITIALLY_EMPTY_DIRS: &[&str] = &[
    "/proc",
    "/sys",
    "/dev/pts",
    "/etc/network",
    "/root",
    "/var/run",
    "/tmp",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Undefined,
    FilesystemReady,
    Configured,
    Running,
    Stopped,
}

pub struct ContainerLifecycle<'a> {
    session: &'a Session,
}

impl<'a> ContainerLifecycle<'a> {
    pub fn new(session: &'a Session) -> Self {
        Self { session }
    }

    fn registry(&self) -> BridgeRegistry<'a> {
        BridgeRegistry::new(self.session)
    }

    fn dir(&self, name: &str) -> PathBuf {
        self.session.containers_root.join(name)
    }

    fn rootfs(&self, name: &str) -> PathBuf {
        self.dir(name).join("rootfs")
    }

    pub fn exists(&self, name: &str) -> bool {
        self.dir(name).is_dir()
    }

    pub fn list(&self) -> Result<Vec<String>> {
        FileSystemUtils::dir_entries(&self.session.containers_root)
    }

    /// The bridge a container is attached to, from its back-reference
    /// record.
    pub fn bridge_of(&self, name: &str) -> Result<String> {
        let path = self.dir(name).join("bridge");
        if !path.exists() {
            return Err(Error::NotFound {
                kind: "container",
                name: name.to_string(),
            });
        }
        FileSystemUtils::read_line(&path)
    }

    /// Create a container attached to `bridge`: filesystem, LXC config,
    /// address allocation, and bridge refcount, in that order. The
    /// address allocation and refcount increment run in one locked
    /// critical section.
    pub fn create(&self, name: &str, bridge: &str, script: bool) -> Result<()> {
        InputValidator::validate_name("container", name)?;
        if self.exists(name) {
            return Err(Error::NameConflict {
                kind: "container",
                name: name.to_string(),
            });
        }
        let registry = self.registry();
        let record = registry.record(bridge)?;

        self.build_filesystem(name)?;

        let dir = self.dir(name);
        let rootfs = self.rootfs(name);
        FileSystemUtils::write_file(
            dir.join("config"),
            &templates::render_config(
                name,
                bridge,
                &rootfs.display().to_string(),
                &dir.join("fstab").display().to_string(),
            ),
        )?;
        FileSystemUtils::write_file(dir.join("fstab"), &templates::render_fstab())?;

        let address = registry.attach_container(name, bridge)?;
        FileSystemUtils::write_line(dir.join("bridge"), bridge)?;

        FileSystemUtils::write_file(
            rootfs.join("etc/network/interfaces"),
            &templates::render_interfaces(address, &record.cidr),
        )?;
        FileSystemUtils::write_file(rootfs.join("etc/hosts"), &templates::render_hosts(name))?;
        FileSystemUtils::write_line(rootfs.join("etc/hostname"), name)?;

        if script {
            let script_path = rootfs.join("run.sh");
            FileSystemUtils::write_file(&script_path, &templates::render_run_script())?;
            FileSystemUtils::make_executable(&script_path)?;
        }

        ConsoleLogger::success(&format!(
            "container {} created on bridge {} with address {}",
            name, bridge, address
        ));
        Ok(())
    }

    /// Build the container filesystem: read-only bind mounts of shared
    /// host directories, empty skeleton directories, device nodes, and a
    /// cleared root password.
    fn build_filesystem(&self, name: &str) -> Result<()> {
        let rootfs = self.rootfs(name);
        FileSystemUtils::create_dir_all(&rootfs)?;

        self.apply_bind_mounts(name)?;

        for dir in INITIALLY_EMPTY_DIRS {
            FileSystemUtils::create_dir_all(rootfs.join(&dir[1..]))?;
        }

        let exec = self.session.exec();
        let random = rootfs.join("dev/random").display().to_string();
        let urandom = rootfs.join("dev/urandom").display().to_string();
        exec.run_checked(&["mknod", &random, "c", "1", "8"])?;
        exec.run_checked(&["mknod", &urandom, "c", "1", "9"])?;

        let rootfs_str = rootfs.display().to_string();
        exec.run_quietly(&["chroot", &rootfs_str, "passwd", "-d", "root"]);
        Ok(())
    }

    /// Bind mount the shared host directories read-only, skipping
    /// anything already mounted so the operation is idempotent.
    fn apply_bind_mounts(&self, name: &str) -> Result<()> {
        let exec = self.session.exec();
        let rootfs = self.rootfs(name);
        for dir in BIND_MOUNTED_DIRS {
            let target = rootfs.join(&dir[1..]);
            FileSystemUtils::create_dir_all(&target)?;
            let target_str = target.display().to_string();
            let mounted = exec
                .run(&["mountpoint", "-q", &target_str])
                .map(|r| r.success)
                .unwrap_or(false);
            if mounted {
                continue;
            }
            exec.run_checked(&["mount", "--bind", dir, &target_str])?;
            exec.run_checked(&["mount", "-o", "remount,ro,bind", &target_str])?;
        }
        Ok(())
    }

    fn remove_bind_mounts(&self, name: &str) {
        let exec = self.session.exec();
        let rootfs = self.rootfs(name);
        for dir in BIND_MOUNTED_DIRS.iter().rev() {
            let target = rootfs.join(&dir[1..]).display().to_string();
            exec.run_quietly(&["umount", "-l", &target]);
        }
    }

    fn require_exists(&self, name: &str) -> Result<()> {
        if !self.exists(name) {
            return Err(Error::NotFound {
                kind: "container",
                name: name.to_string(),
            });
        }
        Ok(())
    }

    /// Start the container, re-establishing its bridge device and bind
    /// mounts first (both disappear across host reboots).
    pub fn start(&self, name: &str, daemon: bool) -> Result<()> {
        self.require_exists(name)?;
        let bridge = self.bridge_of(name)?;
        self.registry().ensure_device(&bridge)?;
        self.apply_bind_mounts(name)?;

        let config = self.dir(name).join("config").display().to_string();
        let mut argv = vec!["lxc-start", "-n", name, "-f", config.as_str()];
        if daemon {
            argv.push("-d");
        }
        self.session.exec().run_checked(&argv)?;
        Ok(())
    }

    /// Stop the container. Its address record stays allocated so a
    /// restart keeps the same slot; only destroy releases it.
    pub fn stop(&self, name: &str) -> Result<()> {
        self.require_exists(name)?;
        self.session
            .exec()
            .run_checked(&["lxc-stop", "-n", name, "--kill"])?;
        Ok(())
    }

    /// Destroy the container: stop it, release its address and bridge
    /// reference, remove bind mounts and the container tree. The bridge
    /// itself is only deleted when `release_bridge` is set and this was
    /// its last user.
    pub fn destroy(&self, name: &str, release_bridge: bool) -> Result<()> {
        self.require_exists(name)?;
        self.session
            .exec()
            .run_quietly(&["lxc-stop", "-n", name, "--kill"]);

        match self.bridge_of(name) {
            Ok(bridge) => {
                let registry = self.registry();
                match registry.release_container(name, &bridge) {
                    Ok(0) if release_bridge => {
                        registry.delete_bridge(&bridge, false)?;
                        ConsoleLogger::info(&format!("released unused bridge {}", bridge));
                    }
                    Ok(_) => {}
                    Err(e) => {
                        ConsoleLogger::warning(&format!(
                            "could not release {} from bridge {}: {}",
                            name, bridge, e
                        ));
                    }
                }
            }
            Err(_) => {
                ConsoleLogger::warning(&format!("container {} has no bridge record", name));
            }
        }

        self.remove_bind_mounts(name);
        FileSystemUtils::remove_path(self.dir(name))?;
        ConsoleLogger::success(&format!("container {} destroyed", name));
        Ok(())
    }

    /// Run a command inside the container via the container runtime,
    /// after making sure its network and filesystem are in place.
    pub fn execute(&self, name: &str, command: &[String]) -> Result<CommandResult> {
        self.require_exists(name)?;
        if command.is_empty() {
            return Err(Error::Validation(
                "specify a command to run in the container".to_string(),
            ));
        }
        let bridge = self.bridge_of(name)?;
        self.registry().ensure_device(&bridge)?;
        self.apply_bind_mounts(name)?;

        let config = self.dir(name).join("config").display().to_string();
        let mut argv = vec!["lxc-execute", "-n", name, "-f", config.as_str(), "--"];
        for part in command {
            argv.push(part);
        }
        self.session.exec().run_checked(&argv)
    }

    /// Re-establish bridges and bind mounts after a host reboot: every
    /// registry record whose device is missing is recreated, and every
    /// container gets its bind mounts re-applied. Container filesystems
    /// and address records are left untouched.
    pub fn reset(&self) -> Result<()> {
        let registry = self.registry();
        for bridge in registry.list()? {
            registry.ensure_device(&bridge)?;
        }
        for container in self.list()? {
            self.apply_bind_mounts(&container)?;
        }
        Ok(())
    }

    /// Current lifecycle state, derived from the persisted record and
    /// the container runtime.
    pub fn state(&self, name: &str) -> ContainerState {
        let dir = self.dir(name);
        if !dir.is_dir() {
            return ContainerState::Undefined;
        }
        if !dir.join("config").exists() {
            return ContainerState::FilesystemReady;
        }
        let running = self
            .session
            .exec()
            .run(&["lxc-info", "-n", name, "-s"])
            .map(|r| r.success && r.stdout.contains("RUNNING"))
            .unwrap_or(false);
        if running {
            ContainerState::Running
        } else if self.dir(name).join("bridge").exists() {
            ContainerState::Stopped
        } else {
            ContainerState::Configured
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::command::testing::{failed_result, ok_with_stdout, ScriptedExecutor};
    use std::net::Ipv4Addr;

    fn scripted() -> ScriptedExecutor {
        // mountpoint reports "not a mountpoint" so bind mounts are applied.
        ScriptedExecutor::new().respond("mountpoint -q", failed_result(""))
    }

    fn setup(dir: &std::path::Path, exec: ScriptedExecutor) -> Session {
        Session::for_tests(dir, Box::new(exec))
    }

    fn add_bridge(session: &Session, name: &str, cidr: &str) {
        BridgeRegistry::new(session)
            .add_bridge(name, &cidr.parse().unwrap(), None)
            .unwrap();
    }

    #[test]
    fn create_requires_an_existing_bridge() {
        let dir = tempfile::tempdir().unwrap();
        let session = setup(dir.path(), scripted());
        let lifecycle = ContainerLifecycle::new(&session);
        let err = lifecycle.create("web0", "nope", false);
        assert!(matches!(err, Err(Error::NotFound { kind: "bridge", .. })));
    }

    #[test]
    fn create_rejects_duplicate_names() {
        let dir = tempfile::tempdir().unwrap();
        let session = setup(dir.path(), scripted());
        add_bridge(&session, "labbr", "10.5.0.0/24");
        let lifecycle = ContainerLifecycle::new(&session);

        lifecycle.create("web0", "labbr", false).unwrap();
        let err = lifecycle.create("web0", "labbr", false);
        assert!(matches!(err, Err(Error::NameConflict { .. })));
    }

    #[test]
    fn create_builds_filesystem_and_records() {
        let dir = tempfile::tempdir().unwrap();
        let exec = scripted();
        let calls = exec.call_log();
        let session = setup(dir.path(), exec);
        add_bridge(&session, "labbr", "10.5.0.0/24");
        let lifecycle = ContainerLifecycle::new(&session);

        lifecycle.create("web0", "labbr", true).unwrap();

        let cdir = session.containers_root.join("web0");
        let config = std::fs::read_to_string(cdir.join("config")).unwrap();
        assert!(config.contains("lxc.network.link=labbr"));
        assert_eq!(
            FileSystemUtils::read_line(cdir.join("bridge")).unwrap(),
            "labbr"
        );
        let interfaces =
            std::fs::read_to_string(cdir.join("rootfs/etc/network/interfaces")).unwrap();
        assert!(interfaces.contains("address 10.5.0.2"));
        assert!(cdir.join("rootfs/run.sh").exists());

        {
            let log = calls.borrow();
            assert!(log.iter().any(|c| c.starts_with("mount --bind /bin")));
            assert!(log.iter().any(|c| c.starts_with("mount -o remount,ro,bind")));
            assert!(log.iter().any(|c| c.contains("mknod") && c.contains("c 1 8")));
        }

        // Address allocation incremented the bridge refcount.
        assert_eq!(BridgeRegistry::new(&session).refcount("labbr").unwrap(), 1);
        assert_eq!(lifecycle.state("web0"), ContainerState::Stopped);
    }

    #[test]
    fn two_containers_share_a_bridge_and_destroy_releases_one() {
        let dir = tempfile::tempdir().unwrap();
        let session = setup(dir.path(), scripted());
        add_bridge(&session, "labbr", "10.5.0.0/24");
        let lifecycle = ContainerLifecycle::new(&session);
        let registry = BridgeRegistry::new(&session);

        lifecycle.create("web0", "labbr", false).unwrap();
        lifecycle.create("web1", "labbr", false).unwrap();

        let a = registry.container_address("web0", "labbr").unwrap().unwrap();
        let b = registry.container_address("web1", "labbr").unwrap().unwrap();
        assert_ne!(a, b);
        assert_eq!(registry.refcount("labbr").unwrap(), 2);

        lifecycle.destroy("web0", false).unwrap();
        assert_eq!(registry.refcount("labbr").unwrap(), 1);
        assert!(registry.exists("labbr"));
        assert!(!lifecycle.exists("web0"));
    }

    #[test]
    fn stop_keeps_the_address_record() {
        let dir = tempfile::tempdir().unwrap();
        let session = setup(dir.path(), scripted());
        add_bridge(&session, "labbr", "10.5.0.0/24");
        let lifecycle = ContainerLifecycle::new(&session);
        let registry = BridgeRegistry::new(&session);

        lifecycle.create("web0", "labbr", false).unwrap();
        lifecycle.stop("web0").unwrap();
        assert_eq!(
            registry.container_address("web0", "labbr").unwrap(),
            Some(Ipv4Addr::new(10, 5, 0, 2))
        );
    }

    #[test]
    fn destroy_can_release_the_last_bridge_reference() {
        let dir = tempfile::tempdir().unwrap();
        let session = setup(dir.path(), scripted());
        add_bridge(&session, "labbr", "10.5.0.0/24");
        let lifecycle = ContainerLifecycle::new(&session);

        lifecycle.create("web0", "labbr", false).unwrap();
        lifecycle.destroy("web0", true).unwrap();
        assert!(!BridgeRegistry::new(&session).exists("labbr"));
    }

    #[test]
    fn reset_recreates_missing_bridge_devices() {
        let dir = tempfile::tempdir().unwrap();
        let exec = scripted().respond("ip link show labbr", failed_result("no device"));
        let calls = exec.call_log();
        let session = setup(dir.path(), exec);
        add_bridge(&session, "labbr", "10.5.0.0/24");
        let lifecycle = ContainerLifecycle::new(&session);
        lifecycle.create("web0", "labbr", false).unwrap();

        lifecycle.reset().unwrap();
        let log = calls.borrow();
        assert!(
            log.iter()
                .filter(|c| c.as_str() == "ip link add name labbr type bridge")
                .count()
                >= 2
        );
    }

    #[test]
    fn execute_runs_via_the_container_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let exec = scripted().respond("lxc-execute", ok_with_stdout("hi\n"));
        let calls = exec.call_log();
        let session = setup(dir.path(), exec);
        add_bridge(&session, "labbr", "10.5.0.0/24");
        let lifecycle = ContainerLifecycle::new(&session);
        lifecycle.create("web0", "labbr", false).unwrap();

        let result = lifecycle
            .execute("web0", &["echo".to_string(), "hi".to_string()])
            .unwrap();
        assert_eq!(result.stdout, "hi\n");
        assert!(calls
            .borrow()
            .iter()
            .any(|c| c.starts_with("lxc-execute -n web0") && c.ends_with("-- echo hi")));
    }
}
