use std::time::Duration;

use reconprobe::artifact;
use reconprobe::enumerator::Enumerator;
use reconprobe::error::RunError;
use reconprobe::lookup::{LookupClient, LookupConfig};
use reconprobe::pipeline::Pipeline;
use reconprobe::prober::{ProbeConfig, Prober};
use reconprobe::scope::ScopeInput;
use reconprobe::shutdown::Shutdown;
use tokio::net::TcpListener;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

async fn pipeline(lookup: &MockServer) -> Pipeline {
    let client = LookupClient::new(LookupConfig {
        endpoint: lookup.uri(),
        api_key: Some("k".to_owned()),
        pacing: false,
        backoff_base: Duration::from_millis(10),
        ..LookupConfig::default()
    })
    .unwrap();
    let prober = Prober::new(ProbeConfig {
        timeout: Duration::from_secs(2),
        ..ProbeConfig::default()
    })
    .await
    .unwrap();

    Pipeline::new(prober, Shutdown::new()).with_enumerator(Enumerator::new(client, 2))
}

#[tokio::test]
async fn scope_to_report() {
    let web = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<title>Portal</title>"))
        .mount(&web)
        .await;
    let live = format!("127.0.0.1:{}", web.address().port());
    let dead = format!("127.0.0.1:{}", closed_port().await);

    let lookup = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sb/example.com"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(format!(";;Entries: 3/3\n{live}\n{dead}\n{live}\n")),
        )
        .mount(&lookup)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let candidates_path = dir.path().join("candidates.txt");
    let pipeline = pipeline(&lookup).await.with_candidates_output(&candidates_path);

    let scope: ScopeInput = "example.com".parse().unwrap();
    let summary = pipeline.run(&scope).await.unwrap();

    assert_eq!(summary.candidates, 2);
    let stats = &summary.enumeration.as_ref().unwrap().stats;
    assert_eq!(stats.records, 3);
    assert_eq!(summary.report.live.len(), 1);
    assert_eq!(summary.report.failed(), 1);
    assert!(summary.is_partial());

    let saved = std::fs::read_to_string(&candidates_path).unwrap();
    assert_eq!(saved, format!("{live}\n{dead}\n"));

    let report_path = dir.path().join("live.jsonl");
    artifact::save_report(&summary.report, &report_path).unwrap();
    let line = std::fs::read_to_string(&report_path).unwrap();
    let record: serde_json::Value = serde_json::from_str(line.trim_end()).unwrap();
    assert_eq!(record["url"], format!("http://{live}/"));
    assert_eq!(record["statusCode"], 200);
    assert_eq!(record["scheme"], "http");
    assert_eq!(record["title"], "Portal");
}

#[tokio::test]
async fn enumerate_only_writes_candidates_and_probes_nothing() {
    let lookup = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sb/example.com"))
        .respond_with(ResponseTemplate::new(200).set_body_string("b.example.com\na.example.com\n"))
        .mount(&lookup)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("hosts.txt");
    let pipeline = pipeline(&lookup).await.with_candidates_output(&out);

    let scope: ScopeInput = "example.com".parse().unwrap();
    let enumeration = pipeline.enumerate_only(&scope).await.unwrap();
    assert_eq!(enumeration.candidates.len(), 2);

    let back = artifact::load_candidates(&out).unwrap();
    assert_eq!(
        back.hostnames().collect::<Vec<_>>(),
        ["b.example.com", "a.example.com"]
    );
}

#[tokio::test]
async fn auth_failure_stops_the_run() {
    let lookup = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&lookup)
        .await;

    let scope: ScopeInput = "example.com".parse().unwrap();
    let err = pipeline(&lookup).await.run(&scope).await.unwrap_err();
    assert!(matches!(err, RunError::Auth(_)));
}
