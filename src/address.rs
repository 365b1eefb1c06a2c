//! Resolved transport addresses and the universal-address string form used
//! by the rendezvous protocols (RFC 5665).

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::str::FromStr;

/// The symbolic transport name carried alongside a universal address, per
/// spec GLOSSARY "Netid".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Netid {
    /// IPv4 TCP.
    Tcp,
    /// IPv4 UDP.
    Udp,
    /// IPv6 TCP.
    Tcp6,
    /// IPv6 UDP.
    Udp6,
    /// In-process loopback transport.
    Local,
}

impl Netid {
    /// The textual netid as carried on the wire (rpcbind `r_netid`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Netid::Tcp => "tcp",
            Netid::Udp => "udp",
            Netid::Tcp6 => "tcp6",
            Netid::Udp6 => "udp6",
            Netid::Local => "local",
        }
    }

    /// True if this netid carries a socket address (i.e. is not `local`).
    pub fn is_ip(&self) -> bool {
        !matches!(self, Netid::Local)
    }

    /// True if this netid is an IPv6 variant.
    pub fn is_v6(&self) -> bool {
        matches!(self, Netid::Tcp6 | Netid::Udp6)
    }
}

impl fmt::Display for Netid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Netid {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tcp" => Ok(Netid::Tcp),
            "udp" => Ok(Netid::Udp),
            "tcp6" => Ok(Netid::Tcp6),
            "udp6" => Ok(Netid::Udp6),
            "local" => Ok(Netid::Local),
            _ => Err(()),
        }
    }
}

/// A resolved `(host, service, netid)` tuple (spec §3 "Address").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressInfo {
    /// The socket address, for IP-based netids.
    pub socket: Option<SocketAddr>,
    /// The rendezvous-protocol netid.
    pub netid: Netid,
}

impl AddressInfo {
    /// Construct an `AddressInfo` for an IP-based netid.
    pub fn new(socket: SocketAddr, netid: Netid) -> Self {
        Self {
            socket: Some(socket),
            netid,
        }
    }

    /// Construct an `AddressInfo` for the loopback netid.
    pub fn local() -> Self {
        Self {
            socket: None,
            netid: Netid::Local,
        }
    }

    /// Render this address in RFC 5665 universal-address form:
    /// `a.b.c.d.porthi.portlo` for IPv4, or the colon-separated IPv6 form
    /// followed by `.porthi.portlo`.
    pub fn to_universal(&self) -> String {
        let Some(sock) = self.socket else {
            return String::new();
        };
        let port = sock.port();
        let porthi = (port >> 8) as u8;
        let portlo = (port & 0xff) as u8;
        match sock.ip() {
            IpAddr::V4(v4) => {
                let o = v4.octets();
                format!(
                    "{}.{}.{}.{}.{}.{}",
                    o[0], o[1], o[2], o[3], porthi, portlo
                )
            }
            IpAddr::V6(v6) => {
                format!("{}.{}.{}", v6, porthi, portlo)
            }
        }
    }

    /// Parse an RFC 5665 universal address string for the given `netid`.
    pub fn from_universal(s: &str, netid: Netid) -> Option<Self> {
        if !netid.is_ip() {
            return None;
        }
        if netid.is_v6() {
            // IPv6 universal addresses append ".porthi.portlo" after the
            // colon-form address.
            let (addr_part, rest) = s.rsplit_once('.')?;
            let (addr_part, hi_part) = addr_part.rsplit_once('.')?;
            let portlo: u16 = rest.parse().ok()?;
            let porthi: u16 = hi_part.parse().ok()?;
            let ip: Ipv6Addr = addr_part.parse().ok()?;
            let port = (porthi << 8) | portlo;
            Some(Self::new(SocketAddr::new(IpAddr::V6(ip), port), netid))
        } else {
            let parts: Vec<&str> = s.split('.').collect();
            if parts.len() != 6 {
                return None;
            }
            let nums: Option<Vec<u16>> = parts.iter().map(|p| p.parse().ok()).collect();
            let nums = nums?;
            if nums.iter().any(|&n| n > 255) {
                return None;
            }
            let ip = Ipv4Addr::new(nums[0] as u8, nums[1] as u8, nums[2] as u8, nums[3] as u8);
            let port = (nums[4] << 8) | nums[5];
            Some(Self::new(SocketAddr::new(IpAddr::V4(ip), port), netid))
        }
    }
}

impl fmt::Display for AddressInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.socket {
            Some(s) => write!(f, "{}/{}", s, self.netid),
            None => write!(f, "local"),
        }
    }
}

/// An `(address, prefix-length)` pair used by an accept/deny filter (spec §3
/// "Network").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Network {
    /// The network's base address.
    pub addr: IpAddr,
    /// The prefix length, in bits.
    pub prefix_len: u8,
}

impl Network {
    /// Construct a `Network` from a base address and prefix length.
    pub fn new(addr: IpAddr, prefix_len: u8) -> Self {
        Self { addr, prefix_len }
    }

    /// True if `candidate` falls within this network.
    pub fn contains(&self, candidate: &IpAddr) -> bool {
        match (self.addr, candidate) {
            (IpAddr::V4(base), IpAddr::V4(cand)) => {
                let mask = if self.prefix_len == 0 {
                    0
                } else {
                    u32::MAX << (32 - self.prefix_len.min(32))
                };
                (u32::from(base) & mask) == (u32::from(*cand) & mask)
            }
            (IpAddr::V6(base), IpAddr::V6(cand)) => {
                let mask = if self.prefix_len == 0 {
                    0u128
                } else {
                    u128::MAX << (128 - self.prefix_len.min(128))
                };
                (u128::from(base) & mask) == (u128::from(*cand) & mask)
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipv4_universal_address_round_trips() {
        let info = AddressInfo::new("10.1.2.3:2049".parse().unwrap(), Netid::Tcp);
        let universal = info.to_universal();
        assert_eq!(universal, "10.1.2.3.8.1");

        let back = AddressInfo::from_universal(&universal, Netid::Tcp).unwrap();
        assert_eq!(back, info);
    }

    #[test]
    fn ipv6_universal_address_round_trips() {
        let info = AddressInfo::new("[::1]:111".parse().unwrap(), Netid::Tcp6);
        let universal = info.to_universal();
        let back = AddressInfo::from_universal(&universal, Netid::Tcp6).unwrap();
        assert_eq!(back, info);
    }

    #[test]
    fn network_prefix_matching() {
        let net = Network::new("192.168.1.0".parse().unwrap(), 24);
        assert!(net.contains(&"192.168.1.42".parse().unwrap()));
        assert!(!net.contains(&"192.168.2.1".parse().unwrap()));
    }
}
