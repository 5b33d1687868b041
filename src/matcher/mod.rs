//! Compiled, read-only view of an ACL used to answer bypass queries.

mod hostname;
mod ip;

pub use hostname::HostnamePatterns;
pub use ip::SubnetSet;

use std::io::BufRead;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use tokio_util::sync::CancellationToken;

use crate::acl::Acl;
use crate::error::Result;
use crate::parser::parse_acl;
use crate::subnet::address_from_bytes;
use crate::types::{Destination, HostnameMatch, Route};

/// Bypass decision engine built from one ruleset.
///
/// Holds no interior mutability, so a single instance can be shared across
/// threads and queried concurrently.
#[derive(Debug, Clone)]
pub struct AclMatcher {
    bypass: bool,
    subnets: SubnetSet,
    bypass_hostnames: HostnamePatterns,
    proxy_hostnames: HostnamePatterns,
}

impl AclMatcher {
    /// Compile a ruleset with [`HostnameMatch::Search`] semantics.
    pub fn new(acl: &Acl) -> Result<Self> {
        Self::with_mode(acl, HostnameMatch::default())
    }

    /// Compile a ruleset with the given hostname matching mode.
    pub fn with_mode(acl: &Acl, mode: HostnameMatch) -> Result<Self> {
        Ok(Self {
            bypass: acl.bypass,
            subnets: SubnetSet::new(&acl.subnets),
            bypass_hostnames: HostnamePatterns::compile(&acl.bypass_hostnames, mode)?,
            proxy_hostnames: HostnamePatterns::compile(&acl.proxy_hostnames, mode)?,
        })
    }

    /// Parse and compile in a single pass, compiling patterns as they are
    /// read. Imports are not followed.
    pub fn from_reader<R: BufRead>(
        reader: R,
        default_bypass: bool,
        mode: HostnameMatch,
        token: &CancellationToken,
    ) -> Result<Self> {
        let mut bypass_hostnames = HostnamePatterns::new(mode);
        let mut proxy_hostnames = HostnamePatterns::new(mode);
        let outcome = parse_acl(
            reader,
            default_bypass,
            token,
            |h| bypass_hostnames.push(h),
            |h| proxy_hostnames.push(h),
        )?;
        Ok(Self {
            bypass: outcome.bypass,
            subnets: SubnetSet::new(&outcome.subnets),
            bypass_hostnames,
            proxy_hostnames,
        })
    }

    /// Default policy of the compiled ruleset.
    pub fn bypass(&self) -> bool {
        self.bypass
    }

    pub fn subnets(&self) -> &SubnetSet {
        &self.subnets
    }

    /// Override subnets flip the default policy.
    pub fn should_bypass_ipv4(&self, ip: Ipv4Addr) -> bool {
        self.bypass ^ self.subnets.contains_ipv4(&ip)
    }

    pub fn should_bypass_ipv6(&self, ip: Ipv6Addr) -> bool {
        self.bypass ^ self.subnets.contains_ipv6(&ip)
    }

    pub fn should_bypass_ip(&self, ip: IpAddr) -> bool {
        match ip {
            IpAddr::V4(v4) => self.should_bypass_ipv4(v4),
            IpAddr::V6(v6) => self.should_bypass_ipv6(v6),
        }
    }

    /// Raw network-order address; `None` unless it is 4 or 16 bytes long.
    pub fn should_bypass_bytes(&self, address: &[u8]) -> Option<bool> {
        address_from_bytes(address).map(|ip| self.should_bypass_ip(ip))
    }

    /// Hostname decision: `Some(true)` if a bypass pattern matches,
    /// `Some(false)` if a proxy pattern matches, `None` if neither does.
    /// Bypass patterns are always consulted first.
    pub fn should_bypass(&self, hostname: &str) -> Option<bool> {
        if self.bypass_hostnames.is_match(hostname) {
            Some(true)
        } else if self.proxy_hostnames.is_match(hostname) {
            Some(false)
        } else {
            None
        }
    }

    /// Route a destination, falling back to the default policy for
    /// hostnames no pattern covers.
    pub fn route(&self, destination: &Destination) -> Route {
        let bypass = match destination {
            Destination::Ip(ip) => self.should_bypass_ip(*ip),
            Destination::Hostname(name) => self.should_bypass(name).unwrap_or(self.bypass),
        };
        Route::from_bypass(bypass)
    }
}
