//! Shadowsocks ACL - bypass/proxy decisions for a Shadowsocks client
//!
//! This library provides:
//! - Parsing of section-based ACL files (`[bypass_all]`, `[proxy_list]`, ...)
//! - Subnet matching for IPv4 and IPv6 destinations
//! - Regex hostname patterns for bypass and proxy lists
//! - Atomic hot swap of the compiled matcher
//! - `ss://` profile extraction from free text
//!
//! # Example
//!
//! ```rust
//! use ss_acl::{Acl, AclMatcher};
//!
//! let rules = "
//! [proxy_all]
//! [bypass_list]
//! 10.0.0.0/8
//! (?:^|\\.)chrome\\.com$
//! [proxy_list]
//! (?:^|\\.)about\\.google$
//! ";
//!
//! let acl: Acl = rules.parse().unwrap();
//! let matcher = AclMatcher::new(&acl).unwrap();
//!
//! assert!(matcher.should_bypass_ipv4("10.1.2.3".parse().unwrap()));
//! assert!(!matcher.should_bypass_ipv4("11.1.2.3".parse().unwrap()));
//! assert_eq!(matcher.should_bypass("www.chrome.com"), Some(true));
//! assert_eq!(matcher.should_bypass("about.google"), Some(false));
//! assert_eq!(matcher.should_bypass("example.com"), None);
//! ```
//!
//! # File Format
//!
//! | Line | Meaning |
//! |------|---------|
//! | `[bypass_all]` / `[reject_all]` | Default: connect directly |
//! | `[proxy_all]` / `[accept_all]` | Default: use the proxy |
//! | `[bypass_list]` / `[black_list]` | Following entries connect directly |
//! | `[proxy_list]` / `[white_list]` | Following entries use the proxy |
//! | `[outbound_block_list]` | Following entries are ignored |
//! | `1.2.3.0/24`, `2000::/8`, `1.2.3.4` | Subnet entry |
//! | anything else | Hostname regex |
//! | `# ...` | Comment; `#IMPORT_URL <url>` imports another list |

pub mod acl;
pub mod error;
pub mod fetch;
pub mod matcher;
pub mod parser;
pub mod profile;
pub mod router;
pub mod subnet;
pub mod types;

// Re-export commonly used items
pub use acl::Acl;
pub use error::{AclError, Result};
pub use fetch::{Fetcher, HttpFetcher, DEFAULT_FETCH_TIMEOUT};
pub use matcher::{AclMatcher, HostnamePatterns, SubnetSet};
pub use parser::{parse_acl, parse_acl_str, ParseOutcome};
pub use profile::Profile;
pub use router::{Router, RouterOptions, DEFAULT_IMPORT_DEPTH};
pub use subnet::Subnet;
pub use types::{Destination, HostnameMatch, Route, Section, Sink};

pub use tokio_util::sync::CancellationToken;
