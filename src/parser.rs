use std::io::{BufRead, Cursor};

use once_cell::sync::Lazy;
use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{AclError, Result};
use crate::subnet::Subnet;
use crate::types::{Section, Sink};

/// Comment payload that imports another list: `#IMPORT_URL <https://...>`
static IMPORT_URL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^IMPORT_URL\s*<(.+)>\s*$").expect("IMPORT_URL_PATTERN: hardcoded regex is invalid")
});

/// Result of a single pass over an ACL file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParseOutcome {
    /// Final default policy: `true` means bypass everything not overridden.
    pub bypass: bool,
    /// Subnets whose decision differs from the default, in file order.
    pub subnets: Vec<Subnet>,
    /// Lists referenced through `#IMPORT_URL` comments, in file order.
    pub urls: Vec<String>,
}

/// Parse an ACL file line by line.
///
/// Hostname patterns are handed to `on_bypass_hostname` / `on_proxy_hostname`
/// as they are seen; subnets are collected and the list that overrides the
/// final default policy is returned. `token` is polled before every line and
/// the parse stops with [`AclError::Cancelled`] once it fires.
pub fn parse_acl<R, B, P>(
    mut reader: R,
    default_bypass: bool,
    token: &CancellationToken,
    mut on_bypass_hostname: B,
    mut on_proxy_hostname: P,
) -> Result<ParseOutcome>
where
    R: BufRead,
    B: FnMut(&str) -> Result<()>,
    P: FnMut(&str) -> Result<()>,
{
    let mut bypass = default_bypass;
    let mut sink = Sink::initial(default_bypass);
    let mut bypass_subnets = Vec::new();
    let mut proxy_subnets = Vec::new();
    let mut urls = Vec::new();
    let mut buf = Vec::new();
    let mut line_num = 0;

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        if token.is_cancelled() {
            return Err(AclError::Cancelled);
        }
        line_num += 1; // 1-based line numbers

        // Malformed UTF-8 becomes U+FFFD instead of failing the whole list
        let decoded = String::from_utf8_lossy(&buf);
        let line = decoded.strip_suffix('\n').unwrap_or(&decoded);
        let line = line.strip_suffix('\r').unwrap_or(line);

        // Everything after the first '#' is a comment
        let (data, comment) = match line.split_once('#') {
            Some((data, comment)) => (data, Some(comment)),
            None => (line, None),
        };
        if let Some(url) = comment.and_then(import_url) {
            urls.push(url);
        }

        let input = data.trim();
        if input.is_empty() {
            continue;
        }

        if input.starts_with('[') && input.ends_with(']') {
            match Section::from_header(input) {
                Some(Section::OutboundBlockList) => sink = Sink::Dropped,
                Some(Section::BypassList) => sink = Sink::Bypass,
                Some(Section::ProxyList) => sink = Sink::Proxy,
                Some(Section::BypassAll) => bypass = true,
                Some(Section::ProxyAll) => bypass = false,
                None => {
                    return Err(AclError::UnknownSection {
                        line: line_num,
                        header: input.to_string(),
                    })
                }
            }
            continue;
        }

        match sink {
            Sink::Dropped => {
                debug!(line = line_num, entry = input, "dropping outbound block entry");
            }
            Sink::Bypass => {
                classify(input, line_num, &mut bypass_subnets, &mut on_bypass_hostname)?
            }
            Sink::Proxy => classify(input, line_num, &mut proxy_subnets, &mut on_proxy_hostname)?,
        }
    }

    Ok(ParseOutcome {
        bypass,
        subnets: if bypass { proxy_subnets } else { bypass_subnets },
        urls,
    })
}

/// Parse ACL text held in memory.
pub fn parse_acl_str<B, P>(
    text: &str,
    default_bypass: bool,
    token: &CancellationToken,
    on_bypass_hostname: B,
    on_proxy_hostname: P,
) -> Result<ParseOutcome>
where
    B: FnMut(&str) -> Result<()>,
    P: FnMut(&str) -> Result<()>,
{
    parse_acl(
        Cursor::new(text.as_bytes()),
        default_bypass,
        token,
        on_bypass_hostname,
        on_proxy_hostname,
    )
}

/// Route a data line to the subnet list or, failing that, the hostname sink.
fn classify<F>(
    input: &str,
    line_num: usize,
    subnets: &mut Vec<Subnet>,
    on_hostname: &mut F,
) -> Result<()>
where
    F: FnMut(&str) -> Result<()>,
{
    match Subnet::parse(input) {
        Some(subnet) => subnets.push(subnet),
        None => {
            if looks_like_subnet(input) {
                warn!(
                    line = line_num,
                    entry = input,
                    "malformed subnet literal treated as hostname pattern"
                );
            }
            on_hostname(input)?;
        }
    }
    Ok(())
}

fn import_url(comment: &str) -> Option<String> {
    IMPORT_URL_PATTERN
        .captures(comment)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Address-shaped text: hex digits and `.:/-` only, with at
/// least one digit.
fn looks_like_subnet(input: &str) -> bool {
    input.bytes().any(|b| b.is_ascii_digit())
        && input
            .bytes()
            .all(|b| b.is_ascii_hexdigit() || matches!(b, b'.' | b':' | b'/' | b'-'))
}
