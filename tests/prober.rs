use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reconprobe::candidates::{CandidateHost, CandidateList};
use reconprobe::prober::{
    FailureReason, HostOutcome, HostProbe, HttpProbe, ProbeConfig, ProbeResult, Prober, Scheme,
};
use reconprobe::shutdown::Shutdown;
use tokio::net::TcpListener;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config() -> ProbeConfig {
    ProbeConfig {
        timeout: Duration::from_secs(2),
        ..ProbeConfig::default()
    }
}

fn host_of(server: &MockServer) -> CandidateHost {
    let addr = server.address();
    CandidateHost::new(&format!("127.0.0.1:{}", addr.port()), None).unwrap()
}

/// A port nothing listens on.
async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

async fn redirect(server: &MockServer, from: &str, to: &str) {
    Mock::given(method("GET"))
        .and(path(from))
        .respond_with(ResponseTemplate::new(302).insert_header("Location", to))
        .mount(server)
        .await;
}

#[tokio::test]
async fn plain_http_host_is_found_after_https_fails() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Server", "wiremock")
                .set_body_string("<html><head><title>Welcome</title></head></html>"),
        )
        .mount(&server)
        .await;

    let probe = HttpProbe::new(config()).await.unwrap();
    let outcome = probe.probe_host(&host_of(&server)).await;

    assert_eq!(outcome.attempts.len(), 2);
    assert_eq!(outcome.attempts[0].scheme, Scheme::Https);
    assert!(!outcome.attempts[0].alive);
    assert!(outcome.attempts[0].failure_reason.is_some());

    let live = outcome.live().unwrap();
    assert_eq!(live.scheme, Scheme::Http);
    assert_eq!(live.status_code, Some(200));
    assert_eq!(live.final_url, format!("{}/", server.uri()));
    assert_eq!(live.server.as_deref(), Some("wiremock"));
    assert_eq!(live.title.as_deref(), Some("Welcome"));
}

#[tokio::test]
async fn any_status_counts_as_alive() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let probe = HttpProbe::new(config()).await.unwrap();
    let outcome = probe.probe_host(&host_of(&server)).await;

    assert_eq!(outcome.live().unwrap().status_code, Some(503));
}

#[tokio::test]
async fn configured_port_is_tried_on_a_bare_host() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<title>Dev</title>"))
        .mount(&server)
        .await;
    let port = server.address().port();

    let probe = HttpProbe::new(ProbeConfig {
        ports: vec![port],
        ..config()
    })
    .await
    .unwrap();
    let host = CandidateHost::new("127.0.0.1", None).unwrap();
    let outcome = probe.probe_host(&host).await;

    assert_eq!(outcome.attempts.len(), 2);
    assert_eq!(outcome.attempts[0].scheme, Scheme::Https);
    assert_eq!(outcome.attempts[0].final_url, format!("https://127.0.0.1:{port}/"));
    let live = outcome.live().unwrap();
    assert_eq!(live.final_url, format!("http://127.0.0.1:{port}/"));
    assert_eq!(live.title.as_deref(), Some("Dev"));
}

#[tokio::test]
async fn every_configured_port_is_tried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;
    let open = server.address().port();
    let closed = closed_port().await;

    let candidates: CandidateList = CandidateHost::new("127.0.0.1", None).into_iter().collect();
    let prober = Prober::new(ProbeConfig {
        ports: vec![closed, open],
        ..config()
    })
    .await
    .unwrap();
    let report = prober.probe(candidates, &Shutdown::new()).await;

    assert_eq!(report.probed, 1);
    assert_eq!(report.failed(), 0);
    assert_eq!(report.live.len(), 1);
    assert_eq!(report.live[0].final_url, format!("http://127.0.0.1:{open}/"));
    assert_eq!(report.live[0].status_code, Some(204));
    // 127.0.0.1 is loopback, so it is listed as internal.
    assert_eq!(report.internal.len(), 1);
}

#[tokio::test]
async fn redirect_chain_is_followed_to_the_end() {
    let server = MockServer::start().await;
    redirect(&server, "/", "/a").await;
    redirect(&server, "/a", &format!("{}/b/page", server.uri())).await;
    Mock::given(method("GET"))
        .and(path("/b/page"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<title>Landing</title>"))
        .mount(&server)
        .await;

    let probe = HttpProbe::new(config()).await.unwrap();
    let outcome = probe.probe_host(&host_of(&server)).await;

    let live = outcome.live().unwrap();
    assert_eq!(live.final_url, format!("{}/b/page", server.uri()));
    assert_eq!(live.redirects, 2);
    assert_eq!(live.status_code, Some(200));
    assert_eq!(live.title.as_deref(), Some("Landing"));
}

#[tokio::test]
async fn redirect_loop_stops_at_the_last_new_url() {
    let server = MockServer::start().await;
    redirect(&server, "/", "/loop").await;
    redirect(&server, "/loop", "/").await;

    let probe = HttpProbe::new(config()).await.unwrap();
    let outcome = probe.probe_host(&host_of(&server)).await;

    let live = outcome.live().unwrap();
    assert_eq!(live.final_url, format!("{}/loop", server.uri()));
    assert_eq!(live.redirects, 1);
    assert_eq!(live.status_code, Some(302));
}

#[tokio::test]
async fn redirects_stop_at_the_limit() {
    let server = MockServer::start().await;
    redirect(&server, "/", "/r1").await;
    redirect(&server, "/r1", "/r2").await;
    redirect(&server, "/r2", "/r3").await;
    Mock::given(method("GET"))
        .and(path("/r3"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let probe = HttpProbe::new(ProbeConfig {
        max_redirects: 2,
        ..config()
    })
    .await
    .unwrap();
    let outcome = probe.probe_host(&host_of(&server)).await;

    let live = outcome.live().unwrap();
    assert_eq!(live.final_url, format!("{}/r2", server.uri()));
    assert_eq!(live.redirects, 2);
}

#[tokio::test]
async fn dead_redirect_target_keeps_the_last_reached_url() {
    let server = MockServer::start().await;
    let dead = closed_port().await;
    redirect(&server, "/", &format!("http://127.0.0.1:{dead}/")).await;

    let probe = HttpProbe::new(config()).await.unwrap();
    let outcome = probe.probe_host(&host_of(&server)).await;

    let live = outcome.live().unwrap();
    assert_eq!(live.final_url, format!("{}/", server.uri()));
    assert_eq!(live.status_code, Some(302));
    assert_eq!(live.redirects, 0);
}

#[tokio::test]
async fn refused_port_is_reported_as_a_failure() {
    let port = closed_port().await;
    let candidates: CandidateList = CandidateHost::new(&format!("127.0.0.1:{port}"), None)
        .into_iter()
        .collect();

    let prober = Prober::new(config()).await.unwrap();
    let report = prober.probe(candidates, &Shutdown::new()).await;

    assert!(report.live.is_empty());
    assert_eq!(report.probed, 1);
    assert_eq!(report.failed(), 1);
    let attempts = &report.dead[0].attempts;
    assert_eq!(attempts.len(), 2);
    assert_eq!(
        attempts[1].failure_reason,
        Some(FailureReason::ConnectionRefused)
    );
    assert_eq!(report.failure_counts().get("refused"), Some(&1));
}

#[tokio::test]
async fn unresolvable_name_is_a_dns_failure() {
    let host = CandidateHost::new("no-such-host.invalid", None).unwrap();
    let probe = HttpProbe::new(ProbeConfig {
        timeout: Duration::from_secs(1),
        ..ProbeConfig::default()
    })
    .await
    .unwrap();

    let outcome = probe.probe_host(&host).await;

    assert_eq!(outcome.resolved, None);
    assert_eq!(outcome.attempts.len(), 1);
    assert_eq!(outcome.attempts[0].scheme, Scheme::Https);
    assert_eq!(
        outcome.attempts[0].failure_reason,
        Some(FailureReason::DnsFailure)
    );
}

#[tokio::test]
async fn hosts_landing_on_the_same_service_are_reported_once() {
    let target = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/app/login"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&target)
        .await;
    let landing = format!("{}/app/login", target.uri());

    let first = MockServer::start().await;
    let second = MockServer::start().await;
    redirect(&first, "/", &landing).await;
    redirect(&second, "/", &format!("{landing}?from=second")).await;

    let candidates: CandidateList = [host_of(&first), host_of(&second)].into_iter().collect();
    let prober = Prober::new(config()).await.unwrap();
    let report = prober.probe(candidates, &Shutdown::new()).await;

    assert_eq!(report.probed, 2);
    assert_eq!(report.live.len(), 1);
    assert_eq!(report.duplicates, 1);
    assert!(report.live[0].final_url.starts_with(&landing));
}

#[tokio::test]
async fn empty_candidate_list_gives_an_empty_report() {
    let prober = Prober::with_probe(Sleepy::new(Duration::ZERO), 5);
    let report = prober.probe(CandidateList::new(), &Shutdown::new()).await;

    assert_eq!(report.probed, 0);
    assert!(report.live.is_empty());
    assert_eq!(report.failed(), 0);
}

/// Answers every host after a fixed delay and records peak concurrency.
struct Sleepy {
    delay: Duration,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl Sleepy {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl HostProbe for Sleepy {
    async fn probe_host(&self, host: &CandidateHost) -> HostOutcome {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        HostOutcome {
            hostname: host.hostname.clone(),
            resolved: None,
            attempts: vec![ProbeResult {
                hostname: host.hostname.clone(),
                scheme: Scheme::Https,
                final_url: format!("https://{}/", host.hostname),
                status_code: Some(200),
                alive: true,
                failure_reason: None,
                redirects: 0,
                server: None,
                title: None,
            }],
        }
    }
}

fn many_hosts(n: usize) -> CandidateList {
    (0..n)
        .filter_map(|i| CandidateHost::new(&format!("h{i}.example.com"), None))
        .collect()
}

#[tokio::test]
async fn never_more_probes_in_flight_than_the_limit() {
    let sleepy = Sleepy::new(Duration::from_millis(20));
    let peak = Arc::clone(&sleepy.peak);
    let prober = Prober::with_probe(sleepy, 5);

    let started = Instant::now();
    let report = prober.probe(many_hosts(100), &Shutdown::new()).await;

    let elapsed = started.elapsed();
    assert_eq!(report.probed, 100);
    assert_eq!(report.live.len(), 100);
    assert_eq!(peak.load(Ordering::SeqCst), 5);
    // 100 hosts, 5 at a time, 20ms each: 400ms when the pool stays full.
    assert!(elapsed >= Duration::from_millis(380));
    assert!(elapsed < Duration::from_millis(1200), "took {elapsed:?}");
}

#[tokio::test]
async fn shutdown_stops_new_probes_but_keeps_finished_ones() {
    let prober = Prober::with_probe(Sleepy::new(Duration::from_millis(50)), 2);
    let shutdown = Shutdown::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(120)).await;
        trigger.trigger();
    });

    let report = prober.probe(many_hosts(20), &shutdown).await;

    assert!(report.probed > 0);
    assert!(report.probed < 20);
    assert!(report.skipped > 0);
    assert_eq!(report.probed + report.skipped, 20);
    assert_eq!(report.live.len(), report.probed);
}
