// IPv4 address and CIDR block allocation.
//
// Both allocators are deterministic given their inputs: they scan from a
// fixed base and return the first non-conflicting candidate. Concurrency
// is handled by the registry's lock discipline, not here.

use crate::error::{Error, Result};
use crate::utils::command::Executor;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// Private supernet that all allocated blocks are carved from.
const ALLOCATION_SUPERNET: Cidr = Cidr {
    base: 0x0a00_0000, // 10.0.0.0
    prefix: 8,
};

/// An IPv4 network block: base address plus prefix length. The base is
/// always a network address (host bits zero).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cidr {
    base: u32,
    prefix: u8,
}

impl Cidr {
    /// Network containing `addr` at the given prefix length; host bits are
    /// masked off.
    pub fn network_of(addr: Ipv4Addr, prefix: u8) -> Result<Self> {
        if prefix > 32 {
            return Err(Error::InvalidCidr(format!("{}/{}", addr, prefix)));
        }
        Ok(Self {
            base: u32::from(addr) & prefix_mask(prefix),
            prefix,
        })
    }

    pub fn network(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.base)
    }

    pub fn broadcast(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.base | !prefix_mask(self.prefix))
    }

    /// Gateway convention: the second address in the block.
    pub fn gateway(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.base + 1)
    }

    pub fn netmask(&self) -> Ipv4Addr {
        Ipv4Addr::from(prefix_mask(self.prefix))
    }

    pub fn prefix_len(&self) -> u8 {
        self.prefix
    }

    /// Total number of addresses in the block.
    #[allow(dead_code)]
    pub fn size(&self) -> u64 {
        1u64 << (32 - self.prefix)
    }

    #[allow(dead_code)]
    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        (u32::from(addr) & prefix_mask(self.prefix)) == self.base
    }

    pub fn overlaps(&self, other: &Cidr) -> bool {
        let shorter = self.prefix.min(other.prefix);
        let mask = prefix_mask(shorter);
        (self.base & mask) == (other.base & mask)
    }

    /// The next same-sized subnet, or None on address-space overflow.
    pub fn next_subnet(&self) -> Option<Cidr> {
        let step = 1u32 << (32 - self.prefix);
        self.base.checked_add(step).map(|base| Cidr {
            base,
            prefix: self.prefix,
        })
    }

    /// Addresses that may be handed out to containers: everything except
    /// the network address, the gateway, and the broadcast address.
    pub fn assignable(&self) -> impl Iterator<Item = Ipv4Addr> {
        let first = self.base + 2;
        let last = self.base | !prefix_mask(self.prefix);
        (first..last).map(Ipv4Addr::from)
    }
}

impl FromStr for Cidr {
    type Err = Error;

    /// Strict parse: the address part must be the block's network base.
    fn from_str(s: &str) -> Result<Self> {
        let (addr_part, prefix_part) = s
            .split_once('/')
            .ok_or_else(|| Error::InvalidCidr(s.to_string()))?;
        let addr: Ipv4Addr = addr_part
            .parse()
            .map_err(|_| Error::InvalidCidr(s.to_string()))?;
        let prefix: u8 = prefix_part
            .parse()
            .map_err(|_| Error::InvalidCidr(s.to_string()))?;
        if prefix > 30 {
            return Err(Error::InvalidCidr(s.to_string()));
        }
        let cidr = Self::network_of(addr, prefix)?;
        if cidr.network() != addr {
            return Err(Error::InvalidCidr(format!(
                "{} (address must be the network base {})",
                s,
                cidr.network()
            )));
        }
        Ok(cidr)
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network(), self.prefix)
    }
}

fn prefix_mask(prefix: u8) -> u32 {
    if prefix == 0 {
        0
    } else {
        (!0u32) << (32 - prefix)
    }
}

/// Find a free CIDR block able to hold `size` containers.
///
/// Scans successive subnets under 10.0.0.0/8, /24-sized for small networks
/// and /16-sized above 254 hosts, skipping any candidate that overlaps an
/// already-recorded bridge block or a network visible in the host's own
/// interface configuration. The base subnet itself is never handed out.
pub fn free_cidr_block(size: u32, existing: &[Cidr], host_networks: &[Cidr]) -> Result<Cidr> {
    let prefix = if size <= 254 { 24 } else { 16 };
    let mut candidate = Cidr {
        base: ALLOCATION_SUPERNET.base,
        prefix,
    };

    loop {
        candidate = match candidate.next_subnet() {
            Some(next) if ALLOCATION_SUPERNET.overlaps(&next) => next,
            _ => return Err(Error::AddressSpaceExhausted("CIDR blocks")),
        };
        let conflict = existing
            .iter()
            .chain(host_networks.iter())
            .any(|c| c.overlaps(&candidate));
        if !conflict {
            return Ok(candidate);
        }
    }
}

/// First assignable address in `block` not present in `allocated`.
pub fn free_address(block: &Cidr, allocated: &[Ipv4Addr]) -> Result<Ipv4Addr> {
    block
        .assignable()
        .find(|addr| !allocated.contains(addr))
        .ok_or(Error::AddressSpaceExhausted("addresses"))
}

/// Networks currently configured on the host, read from `ip -o addr show`.
/// The loopback net is ignored; everything else must be avoided when
/// picking a new block.
pub fn host_networks(exec: &dyn Executor) -> Result<Vec<Cidr>> {
    let result = exec.run_checked(&["ip", "-o", "addr", "show"])?;
    let mut networks = Vec::new();
    for line in result.stdout.lines() {
        let mut fields = line.split_whitespace();
        while let Some(field) = fields.next() {
            if field == "inet" {
                if let Some(addr_str) = fields.next() {
                    if let Some((addr, prefix)) = addr_str.split_once('/') {
                        if let (Ok(addr), Ok(prefix)) =
                            (addr.parse::<Ipv4Addr>(), prefix.parse::<u8>())
                        {
                            if !addr.is_loopback() {
                                networks.push(Cidr::network_of(addr, prefix)?);
                            }
                        }
                    }
                }
                break;
            }
        }
    }
    Ok(networks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::command::testing::{ok_with_stdout, ScriptedExecutor};

    fn cidr(s: &str) -> Cidr {
        s.parse().unwrap()
    }

    #[test]
    fn parse_rejects_non_network_base() {
        assert!("10.0.3.0/24".parse::<Cidr>().is_ok());
        assert!("10.0.3.7/24".parse::<Cidr>().is_err());
        assert!("10.0.3.0".parse::<Cidr>().is_err());
        assert!("10.0.3.0/31".parse::<Cidr>().is_err());
    }

    #[test]
    fn block_addresses() {
        let block = cidr("10.0.3.0/24");
        assert_eq!(block.network(), "10.0.3.0".parse::<Ipv4Addr>().unwrap());
        assert_eq!(block.gateway(), "10.0.3.1".parse::<Ipv4Addr>().unwrap());
        assert_eq!(block.broadcast(), "10.0.3.255".parse::<Ipv4Addr>().unwrap());
        assert_eq!(block.netmask(), "255.255.255.0".parse::<Ipv4Addr>().unwrap());
        assert_eq!(block.size(), 256);
    }

    #[test]
    fn allocated_blocks_are_pairwise_disjoint() {
        let mut existing: Vec<Cidr> = vec![cidr("10.0.2.0/24"), cidr("10.0.4.0/24")];
        let host = vec![cidr("192.168.1.0/24")];
        for _ in 0..5 {
            let block = free_cidr_block(10, &existing, &host).unwrap();
            for prior in &existing {
                assert!(!block.overlaps(prior), "{} overlaps {}", block, prior);
            }
            existing.push(block);
        }
    }

    #[test]
    fn block_allocation_skips_host_networks() {
        let host = vec![cidr("10.0.1.0/24")];
        let block = free_cidr_block(10, &[], &host).unwrap();
        assert_eq!(block, cidr("10.0.2.0/24"));
    }

    #[test]
    fn large_networks_get_a_16() {
        let block = free_cidr_block(1000, &[], &[]).unwrap();
        assert_eq!(block.prefix_len(), 16);
        assert_eq!(block, cidr("10.1.0.0/16"));
    }

    #[test]
    fn address_allocation_round_trip() {
        let block = cidr("10.5.0.0/24");
        let mut allocated: Vec<Ipv4Addr> = Vec::new();
        for _ in 0..253 {
            let addr = free_address(&block, &allocated).unwrap();
            assert!(!allocated.contains(&addr));
            assert_ne!(addr, block.network());
            assert_ne!(addr, block.gateway());
            assert_ne!(addr, block.broadcast());
            allocated.push(addr);
        }
        // The block is now full.
        assert!(matches!(
            free_address(&block, &allocated),
            Err(Error::AddressSpaceExhausted(_))
        ));
    }

    #[test]
    fn first_address_is_dot_two() {
        let block = cidr("10.5.0.0/24");
        let addr = free_address(&block, &[]).unwrap();
        assert_eq!(addr, "10.5.0.2".parse::<Ipv4Addr>().unwrap());
    }

    #[test]
    fn host_networks_parsed_from_ip_output() {
        let stdout = "\
1: lo    inet 127.0.0.1/8 scope host lo\\       valid_lft forever
2: eth0    inet 192.168.1.5/24 brd 192.168.1.255 scope global eth0\\       valid_lft forever
3: weftbr0    inet 10.0.3.1/24 scope global weftbr0\\       valid_lft forever
";
        let exec = ScriptedExecutor::new().respond("addr show", ok_with_stdout(stdout));
        let nets = host_networks(&exec).unwrap();
        assert_eq!(nets, vec![cidr("192.168.1.0/24"), cidr("10.0.3.0/24")]);
    }
}
