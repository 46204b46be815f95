// File templates written into each container: LXC configuration, fstab,
// and the /etc network files that bypass DHCP inside the container.

use crate::net::ipam::Cidr;
use std::net::Ipv4Addr;

/// Base LXC configuration shared by every container. Container-specific
/// lines (network link, veth pair name, rootfs, utsname, fstab path) are
/// appended by `render_config`.
const LXC_CONFIG_BASE: &str = "\
lxc.network.type=veth
lxc.network.flags=up

lxc.devttydir=lxc
lxc.tty=4
lxc.pts=1024
lxc.cap.drop=sys_module mac_admin mac_override
lxc.pivotdir=lxc_putold

lxc.cgroup.devices.deny = a

# Allow any mknod (but not using the node)
lxc.cgroup.devices.allow = c *:* m
lxc.cgroup.devices.allow = b *:* m
# /dev/null and zero
lxc.cgroup.devices.allow = c 1:3 rwm
lxc.cgroup.devices.allow = c 1:5 rwm
# consoles
lxc.cgroup.devices.allow = c 5:1 rwm
lxc.cgroup.devices.allow = c 5:0 rwm
# /dev/{,u}random
lxc.cgroup.devices.allow = c 1:9 rwm
lxc.cgroup.devices.allow = c 1:8 rwm
lxc.cgroup.devices.allow = c 136:* rwm
lxc.cgroup.devices.allow = c 5:2 rwm
# rtc
lxc.cgroup.devices.allow = c 254:0 rwm
#fuse
lxc.cgroup.devices.allow = c 10:229 rwm
#tun
lxc.cgroup.devices.allow = c 10:200 rwm
#full
lxc.cgroup.devices.allow = c 1:7 rwm
#hpet
lxc.cgroup.devices.allow = c 10:228 rwm
#kvm
lxc.cgroup.devices.allow = c 10:232 rwm
lxc.arch=amd64
";

pub fn render_config(name: &str, bridge: &str, rootfs: &str, fstab: &str) -> String {
    format!(
        "{}lxc.network.link={}\nlxc.network.veth.pair={}veth\nlxc.rootfs={}\nlxc.utsname={}\nlxc.mount={}\n",
        LXC_CONFIG_BASE, bridge, name, rootfs, name, fstab
    )
}

pub fn render_fstab() -> String {
    "proc         proc         proc  nodev,noexec,nosuid 0 0\n\
     sysfs        sys          sysfs defaults 0 0\n"
        .to_string()
}

/// /etc/network/interfaces content pinning the container's address.
pub fn render_interfaces(address: Ipv4Addr, cidr: &Cidr) -> String {
    format!(
        "auto lo\n\
         iface lo inet loopback\n\
         \n\
         auto eth0\n\
         iface eth0 inet static\n\
         address {}\n\
         netmask {}\n\
         network {}\n\
         broadcast {}\n\
         gateway {}\n",
        address,
        cidr.netmask(),
        cidr.network(),
        cidr.broadcast(),
        cidr.gateway()
    )
}

pub fn render_hosts(name: &str) -> String {
    format!(
        "127.0.0.1   localhost\n\
         127.0.1.1   {}\n\
         \n\
         ::1     ip6-localhost ip6-loopback\n\
         fe00::0 ip6-localnet\n\
         ff00::0 ip6-mcastprefix\n\
         ff02::1 ip6-allnodes\n\
         ff02::2 ip6-allrouters\n",
        name
    )
}

/// Startup script installed with `--script`: keeps the container alive so
/// it can be entered later.
pub fn render_run_script() -> String {
    "#!/bin/sh\n# Keep container running.\ncat\n".to_string()
}
