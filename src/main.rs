use std::time::Duration;

use colored::Colorize;
use futures::future;
use itertools::Itertools;
use log::{debug, warn};
use reconprobe::artifact;
use reconprobe::enumerator::{Enumeration, Enumerator};
use reconprobe::error::ConfigError;
use reconprobe::input::{Config, Opts};
use reconprobe::lookup::LookupClient;
use reconprobe::pipeline::{Pipeline, RunSummary};
use reconprobe::prober::Prober;
use reconprobe::shutdown::Shutdown;
use reconprobe::{banner, detail, output, warning};
use tokio::time;

// Average value for Ubuntu
#[cfg(unix)]
const DEFAULT_FILE_DESCRIPTORS_LIMIT: u64 = 8000;
// Sockets kept back for lookups, DNS and stdio.
const RESERVED_FILE_DESCRIPTORS: u64 = 100;

#[cfg(not(tarpaulin_include))]
#[tokio::main]
async fn main() {
    env_logger::init();

    let code = match run().await {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("{} {e:#}", "[!]".red().bold());
            1
        }
    };
    std::process::exit(code);
}

#[cfg(not(tarpaulin_include))]
async fn run() -> anyhow::Result<()> {
    let mut opts: Opts = Opts::read();
    let config = Config::read(opts.config_path.clone())?;
    opts.merge(&config);

    debug!(
        "Main() `opts` arguments are {:?}",
        Opts {
            api_key: opts.api_key.as_ref().map(|_| "<redacted>".to_owned()),
            ..opts.clone()
        }
    );

    if !opts.greppable && !opts.accessible && !opts.no_banner {
        banner!();
    }

    let scope = opts.scope()?;
    if scope.is_none() && opts.input.is_none() {
        return Err(ConfigError::NoTarget.into());
    }

    let ulimit = adjust_ulimit_size(&opts);
    let concurrency = infer_batch_size(&opts, ulimit);

    let shutdown = Shutdown::new();
    watch_for_shutdown(shutdown.clone(), opts.run_timeout);

    let prober = Prober::new(opts.probe_config(concurrency))
        .await?
        .with_progress(!opts.greppable && !opts.accessible);
    let mut pipeline = Pipeline::new(prober, shutdown.clone());
    if let Some(path) = &opts.candidates {
        pipeline = pipeline.with_candidates_output(path);
    }

    let summary = match (&opts.input, scope) {
        (Some(path), _) => {
            let candidates = artifact::load_candidates(path)?;
            detail!(
                format!("Read {} candidates from {}", candidates.len(), path.display()),
                opts.greppable,
                opts.accessible
            );
            pipeline.run_from_candidates(candidates).await
        }
        (None, Some(scope)) => {
            let client = LookupClient::new(opts.lookup_config())?;
            let pipeline = pipeline.with_enumerator(Enumerator::new(client, opts.lookup_concurrency));
            detail!(
                format!("Enumerating {scope} ({} lookups)", scope.lookup_count()),
                opts.greppable,
                opts.accessible
            );

            if opts.enumerate_only {
                let enumeration = pipeline.enumerate_only(&scope).await?;
                print_enumeration(&opts, &enumeration);
                if opts.candidates.is_none() {
                    for hostname in enumeration.candidates.hostnames() {
                        println!("{hostname}");
                    }
                }
                return Ok(());
            }
            pipeline.run(&scope).await?
        }
        (None, None) => return Err(ConfigError::NoTarget.into()),
    };

    print_summary(&opts, &summary);
    if let Some(path) = &opts.output {
        artifact::save_report(&summary.report, path)?;
        detail!(
            format!("Wrote {} live hosts to {}", summary.report.live.len(), path.display()),
            opts.greppable,
            opts.accessible
        );
    }
    if shutdown.is_triggered() {
        warning!(
            "The run was stopped early, results are incomplete.",
            opts.greppable,
            opts.accessible
        );
    }
    Ok(())
}

/// Triggers `shutdown` on Ctrl-C or once `run_timeout` seconds have passed.
/// A second Ctrl-C exits at once.
#[cfg(not(tarpaulin_include))]
fn watch_for_shutdown(shutdown: Shutdown, run_timeout: Option<u64>) {
    tokio::spawn(async move {
        let deadline = async {
            match run_timeout {
                Some(secs) => time::sleep(Duration::from_secs(secs)).await,
                None => future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => warn!("Interrupted, letting work in flight finish"),
            () = deadline => warn!("Run timeout reached, letting work in flight finish"),
        }
        shutdown.trigger();

        if tokio::signal::ctrl_c().await.is_ok() {
            std::process::exit(130);
        }
    });
}

#[cfg(not(tarpaulin_include))]
fn print_enumeration(opts: &Opts, enumeration: &Enumeration) {
    let stats = &enumeration.stats;
    detail!(
        format!(
            "{} unique hosts from {} records, {} lookups over {} pages",
            enumeration.candidates.len(),
            stats.records,
            stats.queries,
            stats.pages
        ),
        opts.greppable,
        opts.accessible
    );
    if stats.failed_queries > 0 {
        warning!(
            format!(
                "{} lookups lost results ({} malformed pages)",
                stats.failed_queries, stats.malformed_pages
            ),
            opts.greppable,
            opts.accessible
        );
    }
    for failure in &enumeration.failures {
        debug!("{}: {}", failure.target, failure.error);
    }
}

#[cfg(not(tarpaulin_include))]
fn print_summary(opts: &Opts, summary: &RunSummary) {
    if let Some(enumeration) = &summary.enumeration {
        print_enumeration(opts, enumeration);
    }

    let report = &summary.report;
    for live in &report.live {
        if opts.greppable {
            println!("{}", live.final_url);
            continue;
        }
        let status = live
            .status_code
            .map_or_else(|| "-".to_owned(), |s| s.to_string());
        let mut line = format!("{} [{status}]", live.final_url);
        if let Some(server) = &live.server {
            line.push_str(&format!(" [{server}]"));
        }
        if let Some(title) = &live.title {
            line.push_str(&format!(" {title}"));
        }
        if opts.accessible {
            output!(line, opts.greppable, opts.accessible);
        } else {
            output!(line.green(), opts.greppable, opts.accessible);
        }
    }

    detail!(
        format!(
            "{} of {} hosts live, {} dead, {} duplicates",
            report.live.len(),
            summary.candidates,
            report.failed(),
            report.duplicates
        ),
        opts.greppable,
        opts.accessible
    );
    let counts = report.failure_counts();
    if !counts.is_empty() {
        let counts = counts
            .iter()
            .map(|(reason, n)| format!("{reason}: {n}"))
            .join(", ");
        detail!(format!("Failures by reason: {counts}"), opts.greppable, opts.accessible);
    }
    for host in &report.internal {
        warning!(
            format!("{} resolves to internal address {}", host.hostname, host.ip),
            opts.greppable,
            opts.accessible
        );
    }
    if report.skipped > 0 {
        warning!(
            format!("{} hosts were never probed", report.skipped),
            opts.greppable,
            opts.accessible
        );
    }
}

#[cfg(unix)]
fn adjust_ulimit_size(opts: &Opts) -> u64 {
    use rlimit::Resource;

    if let Some(limit) = opts.ulimit {
        if Resource::NOFILE.set(limit, limit).is_ok() {
            detail!(
                format!("Automatically increasing ulimit value to {limit}."),
                opts.greppable,
                opts.accessible
            );
        } else {
            warning!("ERROR. Failed to set ulimit value.", opts.greppable, opts.accessible);
        }
    }

    let (soft, _) = Resource::NOFILE
        .get()
        .unwrap_or((DEFAULT_FILE_DESCRIPTORS_LIMIT, DEFAULT_FILE_DESCRIPTORS_LIMIT));
    soft
}

#[cfg(not(unix))]
fn adjust_ulimit_size(_opts: &Opts) -> u64 {
    u64::MAX
}

/// Caps the probe concurrency so every in-flight probe can hold a socket.
fn infer_batch_size(opts: &Opts, ulimit: u64) -> usize {
    let ceiling = usize::try_from(ulimit.saturating_sub(RESERVED_FILE_DESCRIPTORS))
        .unwrap_or(usize::MAX)
        .max(1);
    let requested = opts.batch_size.max(1);

    if requested > ceiling {
        warning!(
            format!("File limit {ulimit} is too low for {requested} concurrent probes, using {ceiling}."),
            opts.greppable,
            opts.accessible
        );
        if opts.ulimit.is_none() {
            detail!(
                "Raise the limit with --ulimit to probe faster.",
                opts.greppable,
                opts.accessible
            );
        }
        return ceiling;
    }
    requested
}
