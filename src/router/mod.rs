//! Router module.
//!
//! Owns the active [`AclMatcher`] and swaps in a new one when the rules
//! change. Readers never observe a half-built matcher: a replacement is fully
//! parsed and compiled before a single atomic store publishes it.

use std::fs::File;
use std::io::{BufRead, BufReader, Cursor};
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::acl::Acl;
use crate::error::{AclError, Result};
use crate::fetch::{Fetcher, HttpFetcher, DEFAULT_FETCH_TIMEOUT};
use crate::matcher::AclMatcher;
use crate::types::{Destination, HostnameMatch, Route};

/// Default depth for following `#IMPORT_URL` entries
pub const DEFAULT_IMPORT_DEPTH: usize = 0;

/// Router builder options.
#[derive(Debug, Clone)]
pub struct RouterOptions {
    /// How hostname patterns are applied
    pub hostname_match: HostnameMatch,
    /// Default policy seed for lines before any header
    pub default_bypass: bool,
    /// How many levels of `#IMPORT_URL` to follow (0 = none)
    pub import_depth: usize,
    /// Timeout for each imported list
    pub fetch_timeout: Duration,
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self {
            hostname_match: HostnameMatch::default(),
            default_bypass: false,
            import_depth: DEFAULT_IMPORT_DEPTH,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }
}

impl RouterOptions {
    /// Create new router options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set hostname matching mode.
    pub fn with_hostname_match(mut self, mode: HostnameMatch) -> Self {
        self.hostname_match = mode;
        self
    }

    /// Set the default policy seed.
    pub fn with_default_bypass(mut self, bypass: bool) -> Self {
        self.default_bypass = bypass;
        self
    }

    /// Set import depth.
    pub fn with_import_depth(mut self, depth: usize) -> Self {
        self.import_depth = depth;
        self
    }

    /// Set fetch timeout for imported lists.
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }
}

/// Routes destinations to bypass or proxy using the current ACL.
pub struct Router {
    matcher: ArcSwap<AclMatcher>,
    options: RouterOptions,
    fetcher: Arc<dyn Fetcher>,
}

impl Router {
    /// Create a router from an already parsed ruleset.
    pub fn new(acl: &Acl, options: RouterOptions) -> Result<Self> {
        let matcher = AclMatcher::with_mode(acl, options.hostname_match)?;
        let fetcher = Arc::new(HttpFetcher::new().with_timeout(options.fetch_timeout));
        Ok(Self {
            matcher: ArcSwap::from_pointee(matcher),
            options,
            fetcher,
        })
    }

    /// Create a router from ACL text.
    pub fn from_rules(rules: &str, options: RouterOptions) -> Result<Self> {
        let router = Self::new(&Acl::new(), options)?;
        router.reload_from_reader(Cursor::new(rules.as_bytes()), &CancellationToken::new())?;
        Ok(router)
    }

    /// Create a router from an ACL file.
    pub fn from_file(path: impl AsRef<Path>, options: RouterOptions) -> Result<Self> {
        let file = open(path.as_ref())?;
        let router = Self::new(&Acl::new(), options)?;
        router.reload_from_reader(BufReader::new(file), &CancellationToken::new())?;
        Ok(router)
    }

    /// Replace the fetcher used for `#IMPORT_URL` entries.
    pub fn with_fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn options(&self) -> &RouterOptions {
        &self.options
    }

    /// Snapshot of the active matcher. It stays valid after later reloads.
    pub fn matcher(&self) -> Arc<AclMatcher> {
        self.matcher.load_full()
    }

    /// Compile `acl` and publish it. On error the current matcher stays.
    pub fn reload(&self, acl: &Acl) -> Result<()> {
        let matcher = AclMatcher::with_mode(acl, self.options.hostname_match)?;
        self.publish(matcher);
        Ok(())
    }

    /// Parse, flatten, compile and publish rules read from `reader`.
    pub fn reload_from_reader<R: BufRead>(&self, reader: R, token: &CancellationToken) -> Result<()> {
        let acl = load_acl(reader, &self.options, self.fetcher.as_ref(), token)?;
        self.reload_checked(&acl, token)
    }

    /// Like [`Router::reload_from_reader`], with user rules placed ahead of
    /// the main list.
    pub fn reload_with_custom<R: BufRead>(
        &self,
        custom_rules: &str,
        reader: R,
        token: &CancellationToken,
    ) -> Result<()> {
        let mut custom = Acl::custom_rules(custom_rules)?;
        custom.flatten(self.options.import_depth, self.fetcher.as_ref(), token)?;
        let main = load_acl(reader, &self.options, self.fetcher.as_ref(), token)?;
        self.reload_checked(&Acl::merged(custom, main), token)
    }

    /// Parse and compile on tokio's blocking pool, then publish.
    #[cfg(feature = "async")]
    pub async fn reload_async(&self, rules: String, token: CancellationToken) -> Result<()> {
        let options = self.options.clone();
        let fetcher = self.fetcher.clone();
        let task_token = token.clone();
        let matcher = tokio::task::spawn_blocking(move || {
            let acl = load_acl(
                Cursor::new(rules.as_bytes()),
                &options,
                fetcher.as_ref(),
                &task_token,
            )?;
            AclMatcher::with_mode(&acl, options.hostname_match)
        })
        .await
        .map_err(|e| {
            if e.is_cancelled() {
                AclError::Cancelled
            } else {
                std::panic::resume_unwind(e.into_panic())
            }
        })??;
        if token.is_cancelled() {
            return Err(AclError::Cancelled);
        }
        self.publish(matcher);
        Ok(())
    }

    /// Route a host string: an IP literal or a hostname.
    pub fn route(&self, host: &str) -> Route {
        self.matcher.load().route(&Destination::from_host(host))
    }

    pub fn should_bypass_ip(&self, ip: IpAddr) -> bool {
        self.matcher.load().should_bypass_ip(ip)
    }

    /// Hostname decision without default fallback.
    pub fn should_bypass(&self, hostname: &str) -> Option<bool> {
        self.matcher.load().should_bypass(hostname)
    }

    fn reload_checked(&self, acl: &Acl, token: &CancellationToken) -> Result<()> {
        let matcher = AclMatcher::with_mode(acl, self.options.hostname_match)?;
        // A parse that finished just as cancellation fired is still discarded
        if token.is_cancelled() {
            return Err(AclError::Cancelled);
        }
        self.publish(matcher);
        Ok(())
    }

    fn publish(&self, matcher: AclMatcher) {
        debug!(
            bypass = matcher.bypass(),
            ipv4 = matcher.subnets().ipv4_len(),
            ipv6 = matcher.subnets().ipv6_len(),
            "publishing ACL matcher"
        );
        self.matcher.store(Arc::new(matcher));
    }
}

fn open(path: &Path) -> Result<File> {
    File::open(path).map_err(|e| {
        AclError::ParseError(format!("Failed to read ACL file '{}': {}", path.display(), e))
    })
}

fn load_acl<R: BufRead>(
    reader: R,
    options: &RouterOptions,
    fetcher: &dyn Fetcher,
    token: &CancellationToken,
) -> Result<Acl> {
    let mut acl = Acl::from_reader(reader, options.default_bypass, token)?;
    acl.flatten(options.import_depth, fetcher, token)?;
    Ok(acl)
}
