//! Liveness probing of candidate hosts.
//!
//! Each candidate is tried over HTTPS first and over HTTP only when that
//! fails, on every configured web port. A fixed size pool keeps at most `concurrency` hosts in flight, and
//! a single collector folds the outcomes into a [`LiveHostReport`].
mod http;
mod models;
mod resolve;

pub use http::{extract_title, HttpProbe};
pub use models::{is_internal_ip, FailureReason, HostOutcome, ProbeResult, Scheme};
pub use resolve::{resolver_for, resolve_host, split_host_port};

use std::collections::{BTreeMap, HashSet};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use tokio::sync::{mpsc, Semaphore};
use url::Url;

use crate::candidates::{CandidateHost, CandidateList};
use crate::shutdown::Shutdown;

/// Ports tried on a host named without one: the usual HTTPS then HTTP pair.
pub const DEFAULT_PORTS: [u16; 2] = [443, 80];

/// Ports where web servers commonly listen.
pub const COMMON_WEB_PORTS: [u16; 8] = [80, 443, 8080, 8443, 8000, 3000, 8081, 8444];

/// Tunables for the prober.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Hosts probed at the same time.
    pub concurrency: usize,
    /// Applies to resolution, each request and the title read separately.
    pub timeout: Duration,
    pub max_redirects: usize,
    pub accept_invalid_certs: bool,
    pub fetch_title: bool,
    pub user_agent: String,
    /// DNS servers, as a comma separated list or a file with one per line.
    pub resolver: Option<String>,
    /// Ports probed on hosts that do not carry an explicit `:port`.
    pub ports: Vec<u16>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            concurrency: 20,
            timeout: Duration::from_millis(5000),
            max_redirects: 5,
            accept_invalid_certs: true,
            fetch_title: true,
            user_agent: concat!("Mozilla/5.0 (compatible; reconprobe/", env!("CARGO_PKG_VERSION"), ")")
                .to_owned(),
            resolver: None,
            ports: DEFAULT_PORTS.to_vec(),
        }
    }
}

/// Probes one host. Implementations never fail: every problem ends up as a
/// [`FailureReason`] inside the outcome.
#[async_trait]
pub trait HostProbe: Send + Sync + 'static {
    async fn probe_host(&self, host: &CandidateHost) -> HostOutcome;
}

/// A live host name that resolves into private address space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalHost {
    pub hostname: String,
    pub ip: IpAddr,
}

/// Result of probing a whole candidate list.
#[derive(Debug, Clone, Default)]
pub struct LiveHostReport {
    /// Live results, unique per [`dedup_key`], in completion order. A host
    /// answering on several ports contributes one result per port.
    pub live: Vec<ProbeResult>,
    /// Hosts where every attempt failed.
    pub dead: Vec<HostOutcome>,
    /// Hosts resolving into private address space, live or not.
    pub internal: Vec<InternalHost>,
    /// Hosts that finished probing.
    pub probed: usize,
    /// Live results dropped because an earlier one reached the same service.
    pub duplicates: usize,
    /// Candidates never started because the run was cancelled.
    pub skipped: usize,
}

impl LiveHostReport {
    pub fn failed(&self) -> usize {
        self.dead.len()
    }

    /// Dead hosts counted by the reason of their last attempt.
    pub fn failure_counts(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for reason in self.dead.iter().filter_map(HostOutcome::last_failure) {
            *counts.entry(reason.label()).or_insert(0) += 1;
        }
        counts
    }
}

/// `scheme://host[:port]/<first path segment>` of a final URL. Two live
/// results with the same key are the same service.
///
/// ```rust
/// # use reconprobe::prober::dedup_key;
/// assert_eq!(dedup_key("https://A.example.com:443/app/login?x=1"), "https://a.example.com/app");
/// assert_eq!(dedup_key("http://a.example.com:8080/"), "http://a.example.com:8080/");
/// ```
pub fn dedup_key(final_url: &str) -> String {
    match Url::parse(final_url) {
        Ok(url) => {
            let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
            let port = url.port().map(|p| format!(":{p}")).unwrap_or_default();
            let root = url
                .path_segments()
                .and_then(|mut segments| segments.next())
                .unwrap_or_default();
            format!("{}://{host}{port}/{root}", url.scheme())
        }
        Err(_) => final_url.to_ascii_lowercase(),
    }
}

/// Runs a [`HostProbe`] over a candidate list with bounded concurrency.
pub struct Prober<P = HttpProbe> {
    probe: Arc<P>,
    concurrency: usize,
    progress: bool,
}

impl Prober<HttpProbe> {
    /// A prober backed by [`HttpProbe`].
    pub async fn new(config: ProbeConfig) -> Result<Self, crate::error::ConfigError> {
        let concurrency = config.concurrency;
        Ok(Self::with_probe(HttpProbe::new(config).await?, concurrency))
    }
}

impl<P: HostProbe> Prober<P> {
    pub fn with_probe(probe: P, concurrency: usize) -> Self {
        Self {
            probe: Arc::new(probe),
            concurrency: concurrency.max(1),
            progress: false,
        }
    }

    /// Draw a progress bar on stderr while probing.
    #[must_use]
    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    pub const fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Probes every candidate and collects the live ones.
    ///
    /// Never more than `concurrency` probes run at once. Once `shutdown`
    /// fires no new probe is started; those already running finish under
    /// their own timeouts and are still reported.
    pub async fn probe(&self, candidates: CandidateList, shutdown: &Shutdown) -> LiveHostReport {
        let total = candidates.len();
        info!("Probing {total} hosts, {} at a time", self.concurrency);
        let progress = self.progress_bar(total);

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let (tx, mut rx) = mpsc::channel::<HostOutcome>(self.concurrency);

        let dispatcher = {
            let probe = Arc::clone(&self.probe);
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                let mut hosts = candidates.into_iter();
                while let Some(host) = hosts.next() {
                    let permit = tokio::select! {
                        biased;
                        () = shutdown.triggered() => None,
                        permit = Arc::clone(&semaphore).acquire_owned() => permit.ok(),
                    };
                    let Some(permit) = permit else {
                        return hosts.len() + 1;
                    };

                    let probe = Arc::clone(&probe);
                    let tx = tx.clone();
                    tokio::spawn(async move {
                        let outcome = probe.probe_host(&host).await;
                        drop(permit);
                        // The collector only goes away once every sender has.
                        let _ = tx.send(outcome).await;
                    });
                }
                0
            })
        };

        let mut report = LiveHostReport::default();
        let mut seen = HashSet::new();
        while let Some(outcome) = rx.recv().await {
            report.probed += 1;
            progress.inc(1);
            record(&mut report, &mut seen, outcome);
        }
        progress.finish_and_clear();

        report.skipped = dispatcher.await.unwrap_or_else(|e| {
            warn!("Probe dispatcher stopped abnormally: {e}");
            total - report.probed
        });
        if report.skipped > 0 {
            warn!("{} hosts were not probed before shutdown", report.skipped);
        }

        info!(
            "Probed {} hosts: {} live, {} dead, {} duplicates",
            report.probed,
            report.live.len(),
            report.failed(),
            report.duplicates
        );
        report
    }

    fn progress_bar(&self, total: usize) -> ProgressBar {
        if !self.progress {
            return ProgressBar::hidden();
        }
        let style = ProgressStyle::with_template(
            "{spinner} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} hosts",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar());
        ProgressBar::new(total as u64).with_style(style)
    }
}

fn record(report: &mut LiveHostReport, seen: &mut HashSet<String>, outcome: HostOutcome) {
    if let (true, Some(ip)) = (outcome.is_internal(), outcome.resolved) {
        report.internal.push(InternalHost {
            hostname: outcome.hostname.clone(),
            ip,
        });
    }

    if outcome.live().is_none() {
        debug!("{} is dead: {:?}", outcome.hostname, outcome.last_failure());
        report.dead.push(outcome);
        return;
    }

    for live in outcome.live_results() {
        if seen.insert(dedup_key(&live.final_url)) {
            debug!("{} is live at {}", outcome.hostname, live.final_url);
            report.live.push(live.clone());
        } else {
            debug!("{} duplicates a service already seen at {}", outcome.hostname, live.final_url);
            report.duplicates += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parameterized::parameterized;
    use std::net::Ipv4Addr;

    fn live(hostname: &str, url: &str) -> ProbeResult {
        ProbeResult {
            hostname: hostname.to_owned(),
            scheme: Scheme::Https,
            final_url: url.to_owned(),
            status_code: Some(200),
            alive: true,
            failure_reason: None,
            redirects: 0,
            server: None,
            title: None,
        }
    }

    #[parameterized(
        url = {
            "https://example.com/",
            "https://example.com",
            "https://example.com/app/login",
            "https://example.com:8443/app/",
            "http://example.com:80/x",
        },
        key = {
            "https://example.com/",
            "https://example.com/",
            "https://example.com/app",
            "https://example.com:8443/app",
            "http://example.com/x",
        }
    )]
    fn keys(url: &str, key: &str) {
        assert_eq!(dedup_key(url), key);
    }

    #[test]
    fn hosts_redirecting_to_the_same_service_are_reported_once() {
        let mut report = LiveHostReport::default();
        let mut seen = HashSet::new();
        for host in ["a.example.com", "b.example.com"] {
            record(
                &mut report,
                &mut seen,
                HostOutcome {
                    hostname: host.to_owned(),
                    resolved: Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))),
                    attempts: vec![live(host, "https://sso.example.com/login?next=x")],
                },
            );
        }

        assert_eq!(report.live.len(), 1);
        assert_eq!(report.live[0].hostname, "a.example.com");
        assert_eq!(report.duplicates, 1);
        assert_eq!(report.internal.len(), 2);
    }

    #[test]
    fn dead_hosts_in_private_space_are_still_listed() {
        let mut report = LiveHostReport::default();
        let mut seen = HashSet::new();
        let host = "vpn.example.com";
        record(
            &mut report,
            &mut seen,
            HostOutcome {
                hostname: host.to_owned(),
                resolved: Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5))),
                attempts: vec![ProbeResult::failed(
                    host,
                    Scheme::Http,
                    "http://vpn.example.com/",
                    FailureReason::Timeout,
                )],
            },
        );

        assert_eq!(report.failed(), 1);
        assert!(report.live.is_empty());
        assert_eq!(
            report.internal,
            [InternalHost {
                hostname: host.to_owned(),
                ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)),
            }]
        );
    }

    #[test]
    fn every_live_port_is_reported() {
        let mut report = LiveHostReport::default();
        let mut seen = HashSet::new();
        let host = "a.example.com";
        record(
            &mut report,
            &mut seen,
            HostOutcome {
                hostname: host.to_owned(),
                resolved: Some(IpAddr::V4(Ipv4Addr::new(93, 184, 216, 34))),
                attempts: vec![
                    live(host, "https://a.example.com/"),
                    ProbeResult::failed(host, Scheme::Https, "https://a.example.com:8080/", FailureReason::TlsFailure),
                    live(host, "http://a.example.com:8080/"),
                ],
            },
        );

        assert_eq!(report.live.len(), 2);
        assert_eq!(report.live[1].final_url, "http://a.example.com:8080/");
        assert!(report.internal.is_empty());
        assert_eq!(report.failed(), 0);
    }

    #[test]
    fn failures_are_counted_by_reason() {
        let mut report = LiveHostReport::default();
        let mut seen = HashSet::new();
        let reasons = [
            FailureReason::DnsFailure,
            FailureReason::DnsFailure,
            FailureReason::ConnectionRefused,
        ];
        for (i, reason) in reasons.into_iter().enumerate() {
            let host = format!("h{i}.example.com");
            record(
                &mut report,
                &mut seen,
                HostOutcome {
                    hostname: host.clone(),
                    resolved: None,
                    attempts: vec![ProbeResult::failed(&host, Scheme::Http, "http://x/", reason)],
                },
            );
        }

        assert_eq!(report.failed(), 3);
        assert!(report.live.is_empty());
        let counts = report.failure_counts();
        assert_eq!(counts.get("dns"), Some(&2));
        assert_eq!(counts.get("refused"), Some(&1));
    }
}
