//! Shadowsocks server profiles.
//!
//! Profiles are recovered from `ss://` URIs found in arbitrary text, in
//! either the legacy form (`ss://base64(method:password@host:port)`) or the
//! SIP002 form (`ss://base64url(method:password)@host:port`), and from the
//! JSON layout used for server lists.

use std::fmt;

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, URL_SAFE_NO_PAD};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use once_cell::sync::Lazy;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;
use url::Url;

use crate::acl::ROUTE_ALL;
use crate::error::{AclError, Result};

/// `ss://` URI embedded in free text
static URI_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)ss://[-a-zA-Z0-9+&@#/%?=.~*'()_|!:,;\[\]]*[-a-zA-Z0-9+&@#/%=.~*'()_|\[\]]")
        .expect("URI_PATTERN: hardcoded regex is invalid")
});

static USER_INFO_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^(.+?):(.*)$").expect("USER_INFO_PATTERN: hardcoded regex is invalid")
});

static LEGACY_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^(.+?):(.*)@(.+?):(\d+?)$")
        .expect("LEGACY_PATTERN: hardcoded regex is invalid")
});

const LENIENT: GeneralPurposeConfig =
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent);
const STANDARD_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::STANDARD, LENIENT);
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::URL_SAFE, LENIENT);

/// Characters left unescaped in query values and fragments
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Default remote port
pub const DEFAULT_PORT: u16 = 8388;
/// Default cipher
pub const DEFAULT_METHOD: &str = "aes-256-cfb";
/// Default remote DNS server
pub const DEFAULT_REMOTE_DNS: &str = "dns.google";

/// A Shadowsocks server profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(rename = "server")]
    pub host: String,
    #[serde(rename = "server_port")]
    pub remote_port: u16,
    pub password: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_opts: Option<String>,
    /// Display name
    #[serde(rename = "remarks", default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// ACL id used for routing
    #[serde(default = "default_route")]
    pub route: String,
    #[serde(default = "default_remote_dns")]
    pub remote_dns: String,
    #[serde(default = "default_true")]
    pub ipv6: bool,
    #[serde(default)]
    pub udpdns: bool,
}

fn default_route() -> String {
    ROUTE_ALL.to_string()
}

fn default_remote_dns() -> String {
    DEFAULT_REMOTE_DNS.to_string()
}

fn default_true() -> bool {
    true
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            host: String::new(),
            remote_port: DEFAULT_PORT,
            password: String::new(),
            method: DEFAULT_METHOD.to_string(),
            plugin: None,
            plugin_opts: None,
            name: None,
            route: default_route(),
            remote_dns: default_remote_dns(),
            ipv6: true,
            udpdns: false,
        }
    }
}

impl Profile {
    /// Create a profile with the required connection fields.
    pub fn new(
        host: impl Into<String>,
        remote_port: u16,
        password: impl Into<String>,
        method: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            remote_port,
            password: password.into(),
            method: method.into(),
            ..Self::default()
        }
    }

    /// Host, port, password and method are all present.
    pub fn is_valid(&self) -> bool {
        !self.host.is_empty()
            && self.remote_port > 0
            && !self.password.is_empty()
            && !self.method.is_empty()
    }

    /// Extract every valid `ss://` profile from free text. Unusable URIs are
    /// logged and skipped.
    pub fn find_all(text: &str) -> Vec<Profile> {
        URI_PATTERN
            .find_iter(text)
            .filter_map(|m| match Self::from_uri(m.as_str()) {
                Ok(profile) => Some(profile),
                Err(e) => {
                    warn!(uri = m.as_str(), error = %e, "skipping ss:// URI");
                    None
                }
            })
            .collect()
    }

    /// Parse a single `ss://` URI in legacy or SIP002 form.
    pub fn from_uri(uri: &str) -> Result<Profile> {
        let url = Url::parse(uri)
            .map_err(|e| AclError::InvalidProfile(format!("Invalid URI {}: {}", uri, e)))?;
        if !url.scheme().eq_ignore_ascii_case("ss") {
            return Err(AclError::InvalidProfile(format!("Not an ss:// URI: {}", uri)));
        }

        let mut profile = if url.username().is_empty() && url.password().is_none() {
            Self::from_legacy(&url)?
        } else {
            Self::from_sip002(&url)?
        };

        if let Some((_, plugin)) = url.query_pairs().find(|(key, _)| key == "plugin") {
            let (id, opts) = match plugin.split_once(';') {
                Some((id, opts)) => (id.to_string(), Some(opts.to_string())),
                None => (plugin.to_string(), None),
            };
            if !id.is_empty() {
                profile.plugin = Some(id);
                profile.plugin_opts = opts.filter(|o| !o.is_empty());
            }
        }
        profile.name = url
            .fragment()
            .map(|f| percent_decode_str(f).decode_utf8_lossy().into_owned())
            .filter(|f| !f.is_empty());

        if !profile.is_valid() {
            return Err(AclError::InvalidProfile(format!("Incomplete profile: {}", uri)));
        }
        Ok(profile)
    }

    fn from_legacy(url: &Url) -> Result<Profile> {
        let encoded = url.host_str().unwrap_or_default();
        let decoded = decode_base64(encoded)?;
        let caps = LEGACY_PATTERN
            .captures(&decoded)
            .ok_or_else(|| AclError::InvalidProfile(format!("Unrecognized URI: {}", url)))?;
        let remote_port = caps[4]
            .parse()
            .map_err(|_| AclError::InvalidProfile(format!("Invalid port: {}", &caps[4])))?;
        Ok(Profile::new(
            strip_brackets(&caps[3]),
            remote_port,
            &caps[2],
            caps[1].to_lowercase(),
        ))
    }

    fn from_sip002(url: &Url) -> Result<Profile> {
        let user_info = percent_decode_str(url.username()).decode_utf8_lossy();
        let decoded = decode_base64(&user_info)?;
        let caps = USER_INFO_PATTERN
            .captures(&decoded)
            .ok_or_else(|| AclError::InvalidProfile(format!("Unknown user info: {}", url)))?;
        let host = url
            .host_str()
            .ok_or_else(|| AclError::InvalidProfile(format!("Missing host: {}", url)))?;
        let remote_port = url
            .port()
            .ok_or_else(|| AclError::InvalidProfile(format!("Missing port: {}", url)))?;
        Ok(Profile::new(strip_brackets(host), remote_port, &caps[2], &caps[1]))
    }

    /// `host:port`, with IPv6 hosts bracketed.
    pub fn formatted_address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.remote_port)
        } else {
            format!("{}:{}", self.host, self.remote_port)
        }
    }

    /// Display name, falling back to the address.
    pub fn formatted_name(&self) -> String {
        match &self.name {
            Some(name) if !name.is_empty() => name.clone(),
            _ => self.formatted_address(),
        }
    }

    /// Normalized SIP002 URI.
    pub fn to_uri(&self) -> String {
        let user_info = URL_SAFE_NO_PAD.encode(format!("{}:{}", self.method, self.password));
        let mut uri = format!("ss://{}@{}", user_info, self.formatted_address());
        if let Some(plugin) = self.plugin.as_deref().filter(|p| !p.is_empty()) {
            let value = match self.plugin_opts.as_deref().filter(|o| !o.is_empty()) {
                Some(opts) => format!("{};{}", plugin, opts),
                None => plugin.to_string(),
            };
            uri.push_str("/?plugin=");
            uri.extend(utf8_percent_encode(&value, COMPONENT));
        }
        if let Some(name) = self.name.as_deref().filter(|n| !n.is_empty()) {
            uri.push('#');
            uri.extend(utf8_percent_encode(name, COMPONENT));
        }
        uri
    }

    /// Deserialize one profile from a JSON object.
    pub fn from_json(json: &str) -> Result<Profile> {
        let profile: Profile = serde_json::from_str(json)?;
        if !profile.is_valid() {
            return Err(AclError::InvalidProfile(format!(
                "Incomplete profile: {}",
                profile.formatted_address()
            )));
        }
        Ok(profile)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Collect every valid profile from a JSON document, descending into
    /// nested objects and arrays. Objects that are not profiles are walked.
    pub fn parse_json(json: &str) -> Result<Vec<Profile>> {
        let value: Value = serde_json::from_str(json)?;
        let mut profiles = Vec::new();
        collect_json(&value, &mut profiles);
        Ok(profiles)
    }
}

fn collect_json(value: &Value, profiles: &mut Vec<Profile>) {
    match value {
        Value::Object(map) => match serde_json::from_value::<Profile>(value.clone()) {
            Ok(profile) if profile.is_valid() => profiles.push(profile),
            _ => {
                for child in map.values() {
                    collect_json(child, profiles);
                }
            }
        },
        Value::Array(items) => {
            for item in items {
                collect_json(item, profiles);
            }
        }
        // ignore other types
        _ => {}
    }
}

fn decode_base64(input: &str) -> Result<String> {
    let bytes = URL_SAFE_LENIENT
        .decode(input)
        .or_else(|_| STANDARD_LENIENT.decode(input))
        .map_err(|_| AclError::InvalidProfile(format!("Invalid base64: {}", input)))?;
    String::from_utf8(bytes)
        .map_err(|_| AclError::InvalidProfile(format!("Invalid UTF-8 in base64: {}", input)))
}

fn strip_brackets(host: &str) -> &str {
    host.strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host)
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_uri())
    }
}
