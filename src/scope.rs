//! Provides functions to parse the scan scope: a single IP, a CIDR block or a
//! root domain.
use std::fmt;
use std::net::{IpAddr, Ipv6Addr};
use std::str::FromStr;

use cidr_utils::cidr::IpCidr;

use crate::error::ConfigError;

/// Default upper bound on the number of addresses a range scope may span.
pub const DEFAULT_MAX_RANGE_ADDRESSES: u128 = 65_536;

const MAX_HOSTNAME_LEN: usize = 253;
const MAX_LABEL_LEN: usize = 63;

/// The target the user asked us to enumerate.
///
/// ```rust
/// # use reconprobe::scope::ScopeInput;
/// let scope: ScopeInput = "192.168.0.0/30".parse().unwrap();
/// assert_eq!(scope.lookup_count(), 4);
///
/// let scope: ScopeInput = "Example.COM".parse().unwrap();
/// assert_eq!(scope.to_string(), "example.com");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeInput {
    SingleIp(IpAddr),
    IpRange(IpCidr),
    RootDomain(String),
}

impl ScopeInput {
    /// Number of distinct lookups this scope expands to.
    pub fn lookup_count(&self) -> u128 {
        match self {
            Self::SingleIp(_) | Self::RootDomain(_) => 1,
            Self::IpRange(cidr) => cidr_size(cidr),
        }
    }

    /// Rejects ranges spanning more than `limit` addresses.
    pub fn ensure_within(&self, limit: u128) -> Result<(), ConfigError> {
        let addresses = self.lookup_count();
        if addresses > limit {
            return Err(ConfigError::RangeTooLarge {
                cidr: self.to_string(),
                addresses,
                limit,
            });
        }
        Ok(())
    }

    /// Every address covered by the scope, both ends of a range included.
    /// Empty for domain scopes.
    pub fn addresses(&self) -> Box<dyn Iterator<Item = IpAddr> + Send + '_> {
        match self {
            Self::SingleIp(ip) => Box::new(std::iter::once(*ip)),
            Self::IpRange(cidr) => Box::new(cidr.iter().map(|c| c.address())),
            Self::RootDomain(_) => Box::new(std::iter::empty()),
        }
    }
}

impl FromStr for ScopeInput {
    type Err = ConfigError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let target = strip_url_decoration(input.trim());
        if target.is_empty() {
            return Err(ConfigError::InvalidScope(input.to_owned()));
        }

        if target.contains('/') {
            return IpCidr::from_str(target)
                .map(Self::IpRange)
                .map_err(|e| ConfigError::InvalidCidr {
                    input: target.to_owned(),
                    reason: e.to_string(),
                });
        }

        match IpOrName::classify(target) {
            IpOrName::Ip(ip) => Ok(Self::SingleIp(ip)),
            IpOrName::Name => {
                let domain = normalize_domain(target)
                    .ok_or_else(|| ConfigError::InvalidDomain(target.to_owned()))?;
                Ok(Self::RootDomain(domain))
            }
            IpOrName::Neither => Err(ConfigError::InvalidScope(target.to_owned())),
        }
    }
}

impl fmt::Display for ScopeInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SingleIp(ip) => write!(f, "{ip}"),
            Self::IpRange(cidr) => write!(f, "{cidr}"),
            Self::RootDomain(domain) => f.write_str(domain),
        }
    }
}

fn cidr_size(cidr: &IpCidr) -> u128 {
    let bits: u32 = if cidr.is_ipv4() { 32 } else { 128 };
    let host_bits = bits - u32::from(cidr.network_length());
    1u128.checked_shl(host_bits).unwrap_or(u128::MAX)
}

/// Users paste URLs; keep only the authority part for domains.
fn strip_url_decoration(target: &str) -> &str {
    let target = target
        .strip_prefix("https://")
        .or_else(|| target.strip_prefix("http://"))
        .map_or(target, |rest| rest.split('/').next().unwrap_or(rest));
    target.strip_suffix('.').unwrap_or(target)
}

enum IpOrName {
    Ip(IpAddr),
    Name,
    Neither,
}

impl IpOrName {
    /// Dotted all-numeric strings that fail to parse as an address are
    /// rejected rather than treated as names.
    fn classify(target: &str) -> Self {
        if let Ok(ip) = target.parse::<IpAddr>() {
            return Self::Ip(ip);
        }
        if target.chars().all(|c| c.is_ascii_digit() || c == '.') || target.contains(':') {
            return Self::Neither;
        }
        Self::Name
    }
}

/// Validates a root domain: at least two labels, letters/digits/hyphens only,
/// and a non-numeric top-level label.
fn normalize_domain(raw: &str) -> Option<String> {
    let domain = raw.to_ascii_lowercase();
    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 || domain.len() > MAX_HOSTNAME_LEN {
        return None;
    }
    let valid = labels.iter().all(|label| valid_label(label, false))
        && labels
            .last()
            .is_some_and(|tld| !tld.chars().all(|c| c.is_ascii_digit()));
    valid.then_some(domain)
}

fn valid_label(label: &str, allow_underscore: bool) -> bool {
    !label.is_empty()
        && label.len() <= MAX_LABEL_LEN
        && !label.starts_with('-')
        && !label.ends_with('-')
        && label
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || (allow_underscore && c == '_'))
}

/// Normalises a discovered host name for use as a candidate key.
///
/// Lower-cases it, drops a trailing dot and a leading `*.` wildcard, keeps an
/// explicit `:port` suffix, and wraps IPv6 literals in brackets so the result
/// can be dropped straight into a URL. Returns `None` for anything that is
/// not a plausible host.
pub fn normalize_hostname(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if let Ok(ip) = raw.parse::<IpAddr>() {
        return Some(match ip {
            IpAddr::V4(v4) => v4.to_string(),
            IpAddr::V6(v6) => format!("[{v6}]"),
        });
    }
    if let Some(rest) = raw.strip_prefix('[') {
        let (addr, port) = rest.split_once(']')?;
        let v6 = addr.parse::<Ipv6Addr>().ok()?;
        let port = parse_port_suffix(port)?;
        return Some(format!("[{v6}]{port}"));
    }

    let (name, port) = match raw.rsplit_once(':') {
        Some((name, port)) => (name, parse_port_suffix(&format!(":{port}"))?),
        None => (raw, String::new()),
    };
    let name = name.strip_suffix('.').unwrap_or(name);
    let name = name.strip_prefix("*.").unwrap_or(name).to_ascii_lowercase();
    if name.is_empty() || name.len() > MAX_HOSTNAME_LEN {
        return None;
    }
    name.split('.')
        .all(|label| valid_label(label, true))
        .then(|| format!("{name}{port}"))
}

fn parse_port_suffix(suffix: &str) -> Option<String> {
    if suffix.is_empty() {
        return Some(String::new());
    }
    let port: u16 = suffix.strip_prefix(':')?.parse().ok()?;
    (port != 0).then(|| format!(":{port}"))
}
