use std::net::IpAddr;

/// Section header recognized in an ACL file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    /// `[outbound_block_list]`
    OutboundBlockList,
    /// `[bypass_list]` or legacy `[black_list]`
    BypassList,
    /// `[proxy_list]` or legacy `[white_list]`
    ProxyList,
    /// `[bypass_all]` or legacy `[reject_all]`
    BypassAll,
    /// `[proxy_all]` or legacy `[accept_all]`
    ProxyAll,
}

impl Section {
    /// Match a trimmed line against the header vocabulary (case-sensitive).
    pub fn from_header(line: &str) -> Option<Self> {
        match line {
            "[outbound_block_list]" => Some(Section::OutboundBlockList),
            "[black_list]" | "[bypass_list]" => Some(Section::BypassList),
            "[white_list]" | "[proxy_list]" => Some(Section::ProxyList),
            "[reject_all]" | "[bypass_all]" => Some(Section::BypassAll),
            "[accept_all]" | "[proxy_all]" => Some(Section::ProxyAll),
            _ => None,
        }
    }

    /// Canonical header text written by the serializer.
    pub fn header(&self) -> &'static str {
        match self {
            Section::OutboundBlockList => "[outbound_block_list]",
            Section::BypassList => "[bypass_list]",
            Section::ProxyList => "[proxy_list]",
            Section::BypassAll => "[bypass_all]",
            Section::ProxyAll => "[proxy_all]",
        }
    }
}

/// Where data lines currently go while parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sink {
    Dropped,
    Bypass,
    Proxy,
}

impl Sink {
    /// Sink in effect before the first list header.
    pub fn initial(default_bypass: bool) -> Self {
        if default_bypass {
            Sink::Proxy
        } else {
            Sink::Bypass
        }
    }
}

/// Routing decision for a destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    /// Connect directly
    Bypass,
    /// Send through the proxy
    Proxy,
}

impl Route {
    pub fn from_bypass(bypass: bool) -> Self {
        if bypass {
            Route::Bypass
        } else {
            Route::Proxy
        }
    }

    pub fn is_bypass(&self) -> bool {
        matches!(self, Route::Bypass)
    }
}

/// How hostname patterns are applied to a candidate name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HostnameMatch {
    /// Pattern may match anywhere; anchors inside the pattern decide.
    #[default]
    Search,
    /// Pattern must cover the whole candidate.
    Full,
}

/// Destination to classify: an address literal or a hostname.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    Ip(IpAddr),
    Hostname(String),
}

impl Destination {
    /// Classify a host string. Bracketed IPv6 literals are accepted.
    pub fn from_host(host: &str) -> Self {
        let trimmed = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        match trimmed.parse::<IpAddr>() {
            Ok(ip) => Destination::Ip(ip),
            Err(_) => Destination::Hostname(host.to_string()),
        }
    }
}
