use std::cmp::Ordering;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use ipnet::IpNet;

use crate::error::{AclError, Result};

/// An IP network: base address plus prefix length.
///
/// The base address is kept exactly as written (host bits are not masked
/// off), so `10.1.2.3/8` renders back as `10.1.2.3/8`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subnet {
    network: IpNet,
}

impl Subnet {
    /// Create a subnet, failing if `prefix_len` exceeds the address width.
    pub fn new(address: IpAddr, prefix_len: u8) -> Result<Self> {
        let network = IpNet::new(address, prefix_len)
            .map_err(|_| AclError::InvalidCidr(format!("{}/{}", address, prefix_len)))?;
        Ok(Self { network })
    }

    /// A subnet covering exactly one address.
    pub fn host(address: IpAddr) -> Self {
        Self {
            network: IpNet::from(address),
        }
    }

    /// Lenient parse used by the rule parser.
    ///
    /// Accepts `<address>` or `<address>/<prefix>`. Only numeric literals are
    /// accepted; anything else (including out-of-range prefixes and extra
    /// `/` segments) yields `None`.
    pub fn parse(text: &str) -> Option<Self> {
        let (addr, prefix) = match text.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (text, None),
        };
        let address: IpAddr = addr.parse().ok()?;
        match prefix {
            Some(prefix) => {
                let prefix_len: u8 = prefix.parse().ok()?;
                Self::new(address, prefix_len).ok()
            }
            None => Some(Self::host(address)),
        }
    }

    pub fn address(&self) -> IpAddr {
        self.network.addr()
    }

    pub fn prefix_len(&self) -> u8 {
        self.network.prefix_len()
    }

    /// Width of the address in bits (32 or 128).
    pub fn address_bits(&self) -> u8 {
        self.network.max_prefix_len()
    }

    pub fn is_ipv4(&self) -> bool {
        matches!(self.network, IpNet::V4(_))
    }

    pub fn network(&self) -> IpNet {
        self.network
    }

    /// True if `candidate` is of the same family and shares the top
    /// `prefix_len` bits with this subnet's address.
    pub fn matches(&self, candidate: &IpAddr) -> bool {
        self.network.contains(candidate)
    }

    /// Same as [`Subnet::matches`] for a raw 4- or 16-byte address.
    pub fn matches_bytes(&self, candidate: &[u8]) -> bool {
        address_from_bytes(candidate).is_some_and(|ip| self.matches(&ip))
    }
}

/// Convert a raw network-order address into an `IpAddr`.
pub fn address_from_bytes(bytes: &[u8]) -> Option<IpAddr> {
    match bytes.len() {
        4 => {
            let octets: [u8; 4] = bytes.try_into().ok()?;
            Some(IpAddr::V4(Ipv4Addr::from(octets)))
        }
        16 => {
            let octets: [u8; 16] = bytes.try_into().ok()?;
            Some(IpAddr::V6(Ipv6Addr::from(octets)))
        }
        _ => None,
    }
}

impl Ord for Subnet {
    fn cmp(&self, other: &Self) -> Ordering {
        // IPv4 sorts before IPv6, then unsigned bytes, then prefix length
        let (a, b) = (self.address(), other.address());
        a.is_ipv6()
            .cmp(&b.is_ipv6())
            .then_with(|| a.cmp(&b))
            .then_with(|| self.prefix_len().cmp(&other.prefix_len()))
    }
}

impl PartialOrd for Subnet {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.prefix_len() == self.address_bits() {
            write!(f, "{}", self.address())
        } else {
            write!(f, "{}/{}", self.address(), self.prefix_len())
        }
    }
}

impl FromStr for Subnet {
    type Err = AclError;

    /// Strict parse: same grammar as [`Subnet::parse`], but reports failures.
    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s).ok_or_else(|| AclError::InvalidCidr(s.to_string()))
    }
}

impl From<IpAddr> for Subnet {
    fn from(address: IpAddr) -> Self {
        Self::host(address)
    }
}
