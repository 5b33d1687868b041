//! In-memory ACL ruleset.
//!
//! An [`Acl`] holds the default policy, the hostname patterns of both lists
//! and the subnets that override the default. It renders back to the
//! canonical rule-file text through `Display`.

use std::collections::HashSet;
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, Cursor};
use std::path::Path;
use std::str::FromStr;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::{AclError, Result};
use crate::fetch::Fetcher;
use crate::parser::parse_acl;
use crate::subnet::Subnet;
use crate::types::Section;

/// Route everything through the proxy
pub const ROUTE_ALL: &str = "all";
/// Bypass private/LAN addresses
pub const ROUTE_BYPASS_LAN: &str = "bypass-lan";
/// Bypass mainland China addresses
pub const ROUTE_BYPASS_CHN: &str = "bypass-china";
/// Bypass LAN and mainland China addresses
pub const ROUTE_BYPASS_LAN_CHN: &str = "bypass-lan-china";
/// Proxy only hosts on the GFW list
pub const ROUTE_GFWLIST: &str = "gfwlist";
/// Proxy everything except the China list
pub const ROUTE_CHINALIST: &str = "china-list";
/// User-maintained rules
pub const ROUTE_CUSTOM_RULES: &str = "custom-rules";

/// Parsed ACL ruleset
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Acl {
    /// Default policy: `true` bypasses everything not overridden
    pub bypass: bool,
    /// Hostname patterns that should connect directly
    pub bypass_hostnames: Vec<String>,
    /// Hostname patterns that should go through the proxy
    pub proxy_hostnames: Vec<String>,
    /// Subnets whose decision is the opposite of `bypass` (sorted)
    pub subnets: Vec<Subnet>,
    /// Imported lists not yet flattened (sorted)
    pub urls: Vec<String>,
}

impl Acl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a ruleset from a reader, polling `token` between lines.
    pub fn from_reader<R: BufRead>(
        reader: R,
        default_bypass: bool,
        token: &CancellationToken,
    ) -> Result<Self> {
        let mut bypass_hostnames = UniqueList::default();
        let mut proxy_hostnames = UniqueList::default();
        let outcome = parse_acl(
            reader,
            default_bypass,
            token,
            |h| {
                bypass_hostnames.push(h);
                Ok(())
            },
            |h| {
                proxy_hostnames.push(h);
                Ok(())
            },
        )?;

        Ok(Self {
            bypass: outcome.bypass,
            bypass_hostnames: bypass_hostnames.items,
            proxy_hostnames: proxy_hostnames.items,
            subnets: sorted_unique(outcome.subnets),
            urls: sorted_unique(outcome.urls),
        })
    }

    /// Parse a ruleset held in memory.
    pub fn parse(text: &str, default_bypass: bool) -> Result<Self> {
        Self::from_reader(
            Cursor::new(text.as_bytes()),
            default_bypass,
            &CancellationToken::new(),
        )
    }

    /// Parse a ruleset from a file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            AclError::ParseError(format!("Failed to read ACL file '{}': {}", path.display(), e))
        })?;
        Self::from_reader(BufReader::new(file), false, &CancellationToken::new())
    }

    /// Parse user-maintained rules.
    ///
    /// Custom rules are always bypass-mode; a custom file that switches to
    /// proxy-all keeps its hostnames but loses its subnets.
    pub fn custom_rules(text: &str) -> Result<Self> {
        let mut acl = Self::parse(text, true)?;
        if !acl.bypass {
            acl.bypass = true;
            acl.subnets.clear();
        }
        Ok(acl)
    }

    /// Text to store for user-maintained rules, or `None` if there is
    /// nothing worth keeping.
    pub fn custom_rules_to_string(&self) -> Option<String> {
        let no_subnets = !self.bypass || self.subnets.is_empty();
        if no_subnets
            && self.bypass_hostnames.is_empty()
            && self.proxy_hostnames.is_empty()
            && self.urls.is_empty()
        {
            None
        } else {
            Some(self.to_string())
        }
    }

    /// True if no entry overrides the default policy.
    pub fn is_empty(&self) -> bool {
        self.subnets.is_empty()
            && self.bypass_hostnames.is_empty()
            && self.proxy_hostnames.is_empty()
            && self.urls.is_empty()
    }

    /// Merge `other` into this ruleset, keeping this ruleset's mode.
    ///
    /// Hostnames are appended after the existing ones. Subnets are only
    /// merged when both rulesets share the same default policy, since the
    /// override set means the opposite thing otherwise.
    pub fn extend(&mut self, other: Acl) {
        append_unique(&mut self.bypass_hostnames, other.bypass_hostnames);
        append_unique(&mut self.proxy_hostnames, other.proxy_hostnames);
        if other.bypass == self.bypass {
            self.subnets.extend(other.subnets);
            self.subnets = sorted_unique(std::mem::take(&mut self.subnets));
        } else if !other.subnets.is_empty() {
            warn!(
                discarded = other.subnets.len(),
                "merged ACL has a conflicting mode, its subnets are discarded"
            );
        }
        self.urls.extend(other.urls);
        self.urls = sorted_unique(std::mem::take(&mut self.urls));
    }

    /// Place user rules ahead of a main list. The main list decides the mode.
    pub fn merged(custom: Acl, main: Acl) -> Acl {
        let mut acl = Acl {
            bypass: main.bypass,
            ..Acl::default()
        };
        acl.extend(custom);
        acl.extend(main);
        acl
    }

    /// Resolve `#IMPORT_URL` entries up to `depth` levels deep.
    ///
    /// Children are parsed with this ruleset's mode as their default. A
    /// child that fails to fetch or parse is skipped. `urls` is empty
    /// afterwards.
    pub fn flatten(
        &mut self,
        depth: usize,
        fetcher: &dyn Fetcher,
        token: &CancellationToken,
    ) -> Result<()> {
        let urls = std::mem::take(&mut self.urls);
        if depth == 0 {
            return Ok(());
        }
        for url in urls {
            if token.is_cancelled() {
                return Err(AclError::Cancelled);
            }
            let child = fetcher.fetch(&url).and_then(|text| {
                let mut child = Acl::from_reader(Cursor::new(text.as_bytes()), self.bypass, token)?;
                child.flatten(depth - 1, fetcher, token)?;
                Ok(child)
            });
            match child {
                Ok(child) => {
                    if child.bypass != self.bypass {
                        warn!(
                            url = url.as_str(),
                            "imported ACL has a conflicting mode set, this will probably not work as intended"
                        );
                    }
                    self.extend(child);
                }
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    warn!(url = url.as_str(), error = %e, "failed to import ACL");
                }
            }
        }
        Ok(())
    }

    /// Subnets that connect directly.
    pub fn bypass_subnets(&self) -> &[Subnet] {
        if self.bypass {
            &[]
        } else {
            &self.subnets
        }
    }

    /// Subnets that go through the proxy.
    pub fn proxy_subnets(&self) -> &[Subnet] {
        if self.bypass {
            &self.subnets
        } else {
            &[]
        }
    }
}

impl FromStr for Acl {
    type Err = AclError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s, false)
    }
}

impl fmt::Display for Acl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let default = if self.bypass {
            Section::BypassAll
        } else {
            Section::ProxyAll
        };
        writeln!(f, "{}", default.header())?;

        let subnets = self.subnets.iter().map(Subnet::to_string);
        let (bypass_list, proxy_list): (Vec<String>, Vec<String>) = if self.bypass {
            (
                self.bypass_hostnames.clone(),
                subnets.chain(self.proxy_hostnames.iter().cloned()).collect(),
            )
        } else {
            (
                subnets.chain(self.bypass_hostnames.iter().cloned()).collect(),
                self.proxy_hostnames.clone(),
            )
        };

        for (section, entries) in [
            (Section::BypassList, bypass_list),
            (Section::ProxyList, proxy_list),
        ] {
            if entries.is_empty() {
                continue;
            }
            writeln!(f, "{}", section.header())?;
            for entry in entries {
                writeln!(f, "{}", entry)?;
            }
        }

        for url in &self.urls {
            writeln!(f, "#IMPORT_URL <{}>", url)?;
        }
        Ok(())
    }
}

/// Insertion-ordered list that skips repeats.
#[derive(Default)]
struct UniqueList {
    items: Vec<String>,
    seen: HashSet<String>,
}

impl UniqueList {
    fn with_items(items: Vec<String>) -> Self {
        let seen = items.iter().cloned().collect();
        Self { items, seen }
    }

    fn push(&mut self, item: &str) {
        if !self.seen.contains(item) {
            self.seen.insert(item.to_string());
            self.items.push(item.to_string());
        }
    }
}

fn append_unique(list: &mut Vec<String>, items: Vec<String>) {
    if items.is_empty() {
        return;
    }
    let mut unique = UniqueList::with_items(std::mem::take(list));
    for item in &items {
        unique.push(item);
    }
    *list = unique.items;
}

fn sorted_unique<T: Ord>(mut list: Vec<T>) -> Vec<T> {
    list.sort();
    list.dedup();
    list
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    const BYPASS_BASE: &str = "[bypass_all]\n[proxy_list]\n";

    #[test]
    fn test_round_trip_bypass_all() {
        let text = "[bypass_all]\n[proxy_list]\n1.0.1.0/24\n2000::/8\n(?:^|\\.)4tern\\.com$\n";
        let acl: Acl = text.parse().unwrap();
        assert_eq!(acl.to_string(), text);
    }

    #[test]
    fn test_round_trip_proxy_all() {
        let text = "[proxy_all]\n[bypass_list]\n10.0.0.0/8\n10.3.0.0/16\n(?:^|\\.)chrome\\.com$\n[proxy_list]\n(?:^|\\.)about\\.google$\n";
        let acl: Acl = text.parse().unwrap();
        assert_eq!(acl.to_string(), text);
    }

    #[test]
    fn test_serialization_sorts_subnets() {
        let acl: Acl = "[proxy_all]\n[bypass_list]\n2000::/8\n10.3.0.0/16\n10.0.0.0/8\n"
            .parse()
            .unwrap();
        assert_eq!(
            acl.to_string(),
            "[proxy_all]\n[bypass_list]\n10.0.0.0/8\n10.3.0.0/16\n2000::/8\n"
        );
    }

    #[test]
    fn test_empty_bypass_base() {
        let acl: Acl = BYPASS_BASE.parse().unwrap();
        assert!(acl.bypass);
        assert!(acl.is_empty());
        assert_eq!(acl.to_string(), "[bypass_all]\n");
    }

    #[test]
    fn test_duplicates_are_collapsed() {
        let acl: Acl = "[bypass_list]\n10.0.0.0/8\n10.0.0.0/8\nfoo\nfoo\nbar\n".parse().unwrap();
        assert_eq!(acl.subnets.len(), 1);
        assert_eq!(acl.bypass_hostnames, ["foo", "bar"]);
    }

    #[test]
    fn test_large_list_deduplicates() {
        let mut text = String::from("[bypass_all]\n[proxy_list]\n");
        for i in 0..40_000 {
            text.push_str(&format!("(?:^|\\.)host{}\\.example$\n", i % 30_000));
        }
        for i in 0..1_000 {
            text.push_str(&format!("10.{}.{}.0/24\n", i / 256, i % 256));
        }
        text.push_str("10.0.0.0/24\n");

        let acl: Acl = text.parse().unwrap();
        assert_eq!(acl.proxy_hostnames.len(), 30_000);
        assert_eq!(acl.proxy_hostnames[0], "(?:^|\\.)host0\\.example$");
        assert_eq!(acl.proxy_hostnames[29_999], "(?:^|\\.)host29999\\.example$");
        assert_eq!(acl.subnets.len(), 1_000);
        assert!(acl.subnets.windows(2).all(|w| w[0] < w[1]));

        let mut merged = acl.clone();
        merged.extend(acl.clone());
        assert_eq!(merged, acl);
    }

    #[test]
    fn test_extend_appends_new_hostnames_in_order() {
        let mut acl: Acl = "[bypass_list]\nfoo\nbar\n".parse().unwrap();
        acl.extend("[bypass_list]\nbaz\nfoo\nqux\n".parse().unwrap());
        assert_eq!(acl.bypass_hostnames, ["foo", "bar", "baz", "qux"]);
    }

    #[test]
    fn test_hostnames_keep_file_order() {
        let acl: Acl = "[bypass_list]\nzzz\naaa\nmmm\n".parse().unwrap();
        assert_eq!(acl.bypass_hostnames, ["zzz", "aaa", "mmm"]);
    }

    #[test]
    fn test_import_urls_round_trip() {
        let text = "[proxy_all]\n#IMPORT_URL <https://b.example/list.acl>\n#IMPORT_URL <https://a.example/list.acl>\n";
        let acl: Acl = text.parse().unwrap();
        assert_eq!(
            acl.urls,
            ["https://a.example/list.acl", "https://b.example/list.acl"]
        );
        assert_eq!(
            acl.to_string(),
            "[proxy_all]\n#IMPORT_URL <https://a.example/list.acl>\n#IMPORT_URL <https://b.example/list.acl>\n"
        );
    }

    #[test]
    fn test_bypass_and_proxy_subnet_views() {
        let acl: Acl = "[bypass_all]\n[proxy_list]\n1.2.3.0/24\n".parse().unwrap();
        assert!(acl.bypass_subnets().is_empty());
        assert_eq!(acl.proxy_subnets().len(), 1);
    }

    #[test]
    fn test_custom_rules_forced_to_bypass() {
        let acl = Acl::custom_rules("[proxy_all]\n[bypass_list]\n10.0.0.0/8\nfoo\n").unwrap();
        assert!(acl.bypass);
        assert!(acl.subnets.is_empty());
        assert_eq!(acl.bypass_hostnames, ["foo"]);
    }

    #[test]
    fn test_custom_rules_default_is_bypass() {
        let acl = Acl::custom_rules("1.2.3.4\n(?:^|\\.)example\\.com$\n").unwrap();
        assert!(acl.bypass);
        assert_eq!(acl.subnets, [Subnet::parse("1.2.3.4").unwrap()]);
        assert_eq!(acl.proxy_hostnames, ["(?:^|\\.)example\\.com$"]);
    }

    #[test]
    fn test_custom_rules_to_string() {
        assert_eq!(Acl::custom_rules("").unwrap().custom_rules_to_string(), None);

        let acl = Acl::custom_rules("1.2.3.4\n").unwrap();
        assert_eq!(
            acl.custom_rules_to_string().as_deref(),
            Some("[bypass_all]\n[proxy_list]\n1.2.3.4\n")
        );

        let mut acl = Acl::custom_rules("1.2.3.4\n").unwrap();
        acl.bypass = false;
        assert_eq!(acl.custom_rules_to_string(), None);
    }

    #[test]
    fn test_merged_custom_first() {
        let custom = Acl::custom_rules("1.2.3.4\ncustom\\.example$\n").unwrap();
        let main: Acl = "[bypass_all]\n[proxy_list]\n5.6.7.0/24\nmain\\.example$\n"
            .parse()
            .unwrap();
        let merged = Acl::merged(custom, main);
        assert!(merged.bypass);
        assert_eq!(merged.proxy_hostnames, ["custom\\.example$", "main\\.example$"]);
        assert_eq!(merged.subnets.len(), 2);
    }

    #[test]
    fn test_merged_conflicting_mode_drops_custom_subnets() {
        let custom = Acl::custom_rules("1.2.3.4\n").unwrap();
        let main: Acl = "[proxy_all]\n[bypass_list]\n10.0.0.0/8\n".parse().unwrap();
        let merged = Acl::merged(custom, main);
        assert!(!merged.bypass);
        assert_eq!(merged.subnets, [Subnet::parse("10.0.0.0/8").unwrap()]);
    }

    fn fetcher_for(lists: HashMap<&'static str, &'static str>) -> impl Fetcher {
        move |url: &str| -> Result<String> {
            lists
                .get(url)
                .map(|s| s.to_string())
                .ok_or_else(|| AclError::FetchError(url.to_string()))
        }
    }

    #[test]
    fn test_flatten_imports() {
        let mut lists = HashMap::new();
        lists.insert("https://a/", "1.0.0.0/8\na\\.example$\n#IMPORT_URL <https://b/>\n");
        lists.insert("https://b/", "2.0.0.0/8\n");
        let fetcher = fetcher_for(lists);

        let mut acl: Acl = "[bypass_all]\n#IMPORT_URL <https://a/>\n".parse().unwrap();
        acl.flatten(2, &fetcher, &CancellationToken::new()).unwrap();
        assert!(acl.urls.is_empty());
        assert_eq!(acl.proxy_hostnames, ["a\\.example$"]);
        let rendered: Vec<String> = acl.subnets.iter().map(Subnet::to_string).collect();
        assert_eq!(rendered, ["1.0.0.0/8", "2.0.0.0/8"]);
    }

    #[test]
    fn test_flatten_respects_depth() {
        let mut lists = HashMap::new();
        lists.insert("https://a/", "1.0.0.0/8\n#IMPORT_URL <https://b/>\n");
        lists.insert("https://b/", "2.0.0.0/8\n");
        let fetcher = fetcher_for(lists);

        let mut acl: Acl = "[bypass_all]\n#IMPORT_URL <https://a/>\n".parse().unwrap();
        acl.flatten(1, &fetcher, &CancellationToken::new()).unwrap();
        assert_eq!(acl.subnets, [Subnet::parse("1.0.0.0/8").unwrap()]);

        let mut acl: Acl = "[bypass_all]\n#IMPORT_URL <https://a/>\n".parse().unwrap();
        acl.flatten(0, &fetcher, &CancellationToken::new()).unwrap();
        assert!(acl.subnets.is_empty());
        assert!(acl.urls.is_empty());
    }

    #[test]
    fn test_flatten_skips_failed_imports() {
        let fetcher = fetcher_for(HashMap::new());
        let mut acl: Acl = "[bypass_all]\n[proxy_list]\nkeep$\n#IMPORT_URL <https://missing/>\n"
            .parse()
            .unwrap();
        acl.flatten(3, &fetcher, &CancellationToken::new()).unwrap();
        assert_eq!(acl.proxy_hostnames, ["keep$"]);
    }

    #[test]
    fn test_flatten_conflicting_mode() {
        let mut lists = HashMap::new();
        lists.insert("https://a/", "[proxy_all]\n[bypass_list]\n10.0.0.0/8\nlan$\n");
        let fetcher = fetcher_for(lists);

        let mut acl: Acl = "[bypass_all]\n#IMPORT_URL <https://a/>\n".parse().unwrap();
        acl.flatten(1, &fetcher, &CancellationToken::new()).unwrap();
        assert!(acl.bypass);
        assert!(acl.subnets.is_empty());
        assert_eq!(acl.bypass_hostnames, ["lan$"]);
    }

    #[test]
    fn test_flatten_cancelled() {
        let token = CancellationToken::new();
        let calls = Mutex::new(0);
        let fetcher = |_: &str| -> Result<String> {
            *calls.lock().unwrap() += 1;
            token.cancel();
            Ok("1.0.0.0/8\n".to_string())
        };
        let mut acl: Acl =
            "[bypass_all]\n#IMPORT_URL <https://a/>\n#IMPORT_URL <https://b/>\n".parse().unwrap();
        let result = acl.flatten(1, &fetcher, &token);
        assert!(result.unwrap_err().is_cancelled());
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[test]
    fn test_from_file() {
        use std::io::Write;
        let dir = std::env::temp_dir().join("ss_acl_test_from_file");
        let _ = std::fs::create_dir_all(&dir);
        let path = dir.join("bypass-lan.acl");
        let mut f = File::create(&path).unwrap();
        writeln!(f, "[proxy_all]\n[bypass_list]\n192.168.0.0/16").unwrap();
        drop(f);

        let acl = Acl::from_file(&path).unwrap();
        assert!(!acl.bypass);
        assert_eq!(acl.subnets, [Subnet::parse("192.168.0.0/16").unwrap()]);

        let _ = std::fs::remove_file(&path);
        let _ = std::fs::remove_dir(&dir);
    }

    #[test]
    fn test_from_file_not_found() {
        assert!(Acl::from_file("/nonexistent/path/list.acl").is_err());
    }
}
