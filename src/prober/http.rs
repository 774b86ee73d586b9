//! The reqwest backed [`HostProbe`].
use std::collections::HashSet;
use std::error::Error as StdError;
use std::io;

use async_trait::async_trait;
use hickory_resolver::TokioAsyncResolver;
use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::{HeaderMap, LOCATION, SERVER};
use reqwest::{redirect, Response};
use tokio::time;
use url::Url;

use super::models::{FailureReason, HostOutcome, ProbeResult, Scheme};
use super::resolve::{resolve_host, resolver_for, split_host_port};
use super::{HostProbe, ProbeConfig, DEFAULT_PORTS};
use crate::candidates::CandidateHost;
use crate::error::ConfigError;

/// Only this much of a body is read when looking for a title.
const TITLE_SCAN_LIMIT: usize = 64 * 1024;
const MAX_TITLE_CHARS: usize = 200;

static TITLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("static regex"));

/// Probes a host over HTTPS, falling back to plain HTTP, and follows
/// redirects by hand so loops and the hop limit stay under our control.
///
/// Hosts named with a `:port` are tried on that port only. Others are tried
/// on every configured port, see [`attempt_plan`].
pub struct HttpProbe {
    client: reqwest::Client,
    resolver: TokioAsyncResolver,
    config: ProbeConfig,
}

impl HttpProbe {
    pub async fn new(config: ProbeConfig) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .redirect(redirect::Policy::none())
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .user_agent(config.user_agent.clone())
            .connect_timeout(config.timeout)
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;
        let resolver = resolver_for(&config).await;

        Ok(Self {
            client,
            resolver,
            config,
        })
    }

    async fn attempt(&self, hostname: &str, scheme: Scheme, port: Option<u16>) -> ProbeResult {
        let start = match port {
            Some(port) => format!("{scheme}://{hostname}:{port}/"),
            None => format!("{scheme}://{hostname}/"),
        };
        let mut current = match Url::parse(&start) {
            Ok(url) => url,
            Err(e) => {
                let reason = FailureReason::Connection(format!("invalid URL: {e}"));
                return ProbeResult::failed(hostname, scheme, &start, reason);
            }
        };

        let mut response = match self.fetch(&current).await {
            Ok(response) => response,
            Err(reason) => {
                debug!("{current} failed: {reason}");
                return ProbeResult::failed(hostname, scheme, current.as_str(), reason);
            }
        };

        let mut visited = HashSet::from([current.to_string()]);
        let mut redirects = 0;
        while let Some(next) = redirect_target(&current, &response) {
            if redirects >= self.config.max_redirects {
                debug!("{hostname}: redirect limit reached at {current}");
                break;
            }
            if !visited.insert(next.to_string()) {
                debug!("{hostname}: redirect loop back to {next}");
                break;
            }
            match self.fetch(&next).await {
                Ok(r) => {
                    response = r;
                    current = next;
                    redirects += 1;
                }
                Err(reason) => {
                    debug!("{hostname}: redirect to {next} failed: {reason}");
                    break;
                }
            }
        }

        let status = response.status().as_u16();
        let server = server_banner(response.headers());
        let title = if self.config.fetch_title {
            self.read_title(response).await
        } else {
            None
        };

        ProbeResult {
            hostname: hostname.to_owned(),
            scheme,
            final_url: current.into(),
            status_code: Some(status),
            alive: true,
            failure_reason: None,
            redirects,
            server,
            title,
        }
    }

    async fn fetch(&self, url: &Url) -> Result<Response, FailureReason> {
        match time::timeout(self.config.timeout, self.client.get(url.clone()).send()).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => Err(classify(&e)),
            Err(_) => Err(FailureReason::Timeout),
        }
    }

    async fn read_title(&self, mut response: Response) -> Option<String> {
        let read = async {
            let mut body = Vec::new();
            while body.len() < TITLE_SCAN_LIMIT {
                match response.chunk().await {
                    Ok(Some(chunk)) => body.extend_from_slice(&chunk),
                    _ => break,
                }
            }
            body
        };
        let body = time::timeout(self.config.timeout, read).await.ok()?;
        extract_title(&String::from_utf8_lossy(&body))
    }
}

#[async_trait]
impl HostProbe for HttpProbe {
    async fn probe_host(&self, host: &CandidateHost) -> HostOutcome {
        let hostname = host.hostname.as_str();
        let resolved = time::timeout(self.config.timeout, resolve_host(hostname, &self.resolver))
            .await
            .ok()
            .flatten();

        let Some(ip) = resolved else {
            debug!("{hostname}: does not resolve");
            let url = format!("https://{hostname}/");
            return HostOutcome {
                hostname: hostname.to_owned(),
                resolved: None,
                attempts: vec![ProbeResult::failed(
                    hostname,
                    Scheme::Https,
                    &url,
                    FailureReason::DnsFailure,
                )],
            };
        };

        let mut attempts = Vec::new();
        for group in attempt_plan(hostname, &self.config.ports) {
            for (scheme, port) in group {
                let result = self.attempt(hostname, scheme, port).await;
                let alive = result.alive;
                attempts.push(result);
                if alive {
                    break;
                }
            }
        }

        HostOutcome {
            hostname: hostname.to_owned(),
            resolved: Some(ip),
            attempts,
        }
    }
}

/// The attempts made for one host, in groups. Within a group attempts stop
/// at the first answer; every group is tried.
///
/// A host with an explicit port gets HTTPS then HTTP on that port. Otherwise
/// 443 and 80 together form the usual HTTPS then HTTP pair on default ports,
/// and any other port is tried with HTTPS then HTTP.
fn attempt_plan(hostname: &str, ports: &[u16]) -> Vec<Vec<(Scheme, Option<u16>)>> {
    if split_host_port(hostname).1.is_some() {
        return vec![vec![(Scheme::Https, None), (Scheme::Http, None)]];
    }

    let ports = if ports.is_empty() { &DEFAULT_PORTS[..] } else { ports };
    let pair = ports.contains(&443) && ports.contains(&80);
    let mut seen = HashSet::new();
    let mut plan = Vec::new();
    for &port in ports {
        if !seen.insert(port) {
            continue;
        }
        let group = match port {
            443 if pair => vec![(Scheme::Https, None), (Scheme::Http, None)],
            80 if pair => continue,
            443 => vec![(Scheme::Https, None)],
            80 => vec![(Scheme::Http, None)],
            _ => vec![(Scheme::Https, Some(port)), (Scheme::Http, Some(port))],
        };
        plan.push(group);
    }
    plan
}

/// Where a 3xx response points, resolved against the current URL. Only
/// http(s) targets are followed.
fn redirect_target(current: &Url, response: &Response) -> Option<Url> {
    if !response.status().is_redirection() {
        return None;
    }
    let location = response.headers().get(LOCATION)?.to_str().ok()?;
    current
        .join(location.trim())
        .ok()
        .filter(|u| matches!(u.scheme(), "http" | "https"))
}

/// `Server` and `X-Powered-By`, joined when both are present.
fn server_banner(headers: &HeaderMap) -> Option<String> {
    let value = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };
    match (value(SERVER.as_str()), value("x-powered-by")) {
        (Some(server), Some(powered)) => Some(format!("{server} ({powered})")),
        (Some(one), None) | (None, Some(one)) => Some(one.to_owned()),
        (None, None) => None,
    }
}

pub fn extract_title(body: &str) -> Option<String> {
    let raw = TITLE.captures(body)?.get(1)?.as_str();
    let title = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if title.is_empty() {
        return None;
    }
    Some(title.chars().take(MAX_TITLE_CHARS).collect())
}

/// Maps a transport error to the reason we report. The error chain is
/// walked because reqwest wraps the interesting cause several levels deep.
fn classify(error: &reqwest::Error) -> FailureReason {
    if error.is_timeout() {
        return FailureReason::Timeout;
    }

    let mut tls = false;
    let mut source: Option<&(dyn StdError + 'static)> = error.source();
    while let Some(err) = source {
        if let Some(io_err) = err.downcast_ref::<io::Error>() {
            match io_err.kind() {
                io::ErrorKind::ConnectionRefused => return FailureReason::ConnectionRefused,
                io::ErrorKind::TimedOut => return FailureReason::Timeout,
                _ => {}
            }
        }

        let message = err.to_string().to_ascii_lowercase();
        if message.contains("connection refused") {
            return FailureReason::ConnectionRefused;
        }
        if message.contains("dns error") || message.contains("failed to lookup address") {
            return FailureReason::DnsFailure;
        }
        if ["tls", "certificate", "handshake", "corrupt message", "invalidcontenttype"]
            .iter()
            .any(|needle| message.contains(needle))
        {
            tls = true;
        }
        source = err.source();
    }

    if tls {
        FailureReason::TlsFailure
    } else {
        FailureReason::Connection(error.to_string())
    }
}
