use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use ipnet::{Ipv4Net, Ipv6Net};

use crate::subnet::Subnet;

/// Override subnets partitioned by address family.
#[derive(Debug, Clone, Default)]
pub struct SubnetSet {
    ipv4: Vec<Ipv4Net>,
    ipv6: Vec<Ipv6Net>,
}

impl SubnetSet {
    pub fn new<'a>(subnets: impl IntoIterator<Item = &'a Subnet>) -> Self {
        let mut set = Self::default();
        for subnet in subnets {
            match subnet.network() {
                ipnet::IpNet::V4(net) => set.ipv4.push(net),
                ipnet::IpNet::V6(net) => set.ipv6.push(net),
            }
        }
        set
    }

    pub fn contains_ipv4(&self, ip: &Ipv4Addr) -> bool {
        self.ipv4.iter().any(|net| net.contains(ip))
    }

    pub fn contains_ipv6(&self, ip: &Ipv6Addr) -> bool {
        self.ipv6.iter().any(|net| net.contains(ip))
    }

    pub fn contains(&self, ip: &IpAddr) -> bool {
        match ip {
            IpAddr::V4(v4) => self.contains_ipv4(v4),
            IpAddr::V6(v6) => self.contains_ipv6(v6),
        }
    }

    pub fn ipv4_len(&self) -> usize {
        self.ipv4.len()
    }

    pub fn ipv6_len(&self) -> usize {
        self.ipv6.len()
    }
}
