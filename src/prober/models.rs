//! Result types produced by the prober.
use std::fmt;
use std::net::IpAddr;

use serde_derive::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an attempt did not get an HTTP response.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    DnsFailure,
    ConnectionRefused,
    Timeout,
    TlsFailure,
    /// Any other connection level failure, with the underlying message.
    Connection(String),
}

impl FailureReason {
    /// Stable short name used when counting failures.
    pub const fn label(&self) -> &'static str {
        match self {
            Self::DnsFailure => "dns",
            Self::ConnectionRefused => "refused",
            Self::Timeout => "timeout",
            Self::TlsFailure => "tls",
            Self::Connection(_) => "connection",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DnsFailure => f.write_str("DNS resolution failed"),
            Self::ConnectionRefused => f.write_str("connection refused"),
            Self::Timeout => f.write_str("timed out"),
            Self::TlsFailure => f.write_str("TLS handshake failed"),
            Self::Connection(msg) => write!(f, "connection failed: {msg}"),
        }
    }
}

/// Outcome of one (host, scheme, port) attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeResult {
    pub hostname: String,
    pub scheme: Scheme,
    /// Last URL that answered, or the URL we tried when nothing did.
    pub final_url: String,
    pub status_code: Option<u16>,
    pub alive: bool,
    pub failure_reason: Option<FailureReason>,
    pub redirects: usize,
    pub server: Option<String>,
    pub title: Option<String>,
}

impl ProbeResult {
    pub fn failed(hostname: &str, scheme: Scheme, url: &str, reason: FailureReason) -> Self {
        Self {
            hostname: hostname.to_owned(),
            scheme,
            final_url: url.to_owned(),
            status_code: None,
            alive: false,
            failure_reason: Some(reason),
            redirects: 0,
            server: None,
            title: None,
        }
    }
}

/// Every attempt made for one candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostOutcome {
    pub hostname: String,
    pub resolved: Option<IpAddr>,
    pub attempts: Vec<ProbeResult>,
}

impl HostOutcome {
    /// The attempt that found the host alive, if any.
    pub fn live(&self) -> Option<&ProbeResult> {
        self.attempts.iter().find(|a| a.alive)
    }

    /// Every attempt that got an answer, one per port at most.
    pub fn live_results(&self) -> impl Iterator<Item = &ProbeResult> + '_ {
        self.attempts.iter().filter(|a| a.alive)
    }

    /// Reason of the last failed attempt.
    pub fn last_failure(&self) -> Option<&FailureReason> {
        self.attempts.iter().rev().find_map(|a| a.failure_reason.as_ref())
    }

    pub fn is_internal(&self) -> bool {
        self.resolved.is_some_and(is_internal_ip)
    }
}

/// Private, loopback and link-local ranges: names in public DNS pointing at
/// these are worth a separate look.
pub fn is_internal_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_private() || v4.is_loopback() || v4.is_link_local(),
        IpAddr::V6(v6) => {
            let first = v6.segments()[0];
            v6.is_loopback() || (first & 0xfe00) == 0xfc00 || (first & 0xffc0) == 0xfe80
        }
    }
}
