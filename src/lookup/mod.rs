//! Client for the remote host lookup service.
//!
//! A query is exposed as a lazy stream of pages. Every page is fetched by a
//! pure function of its URL, so the stream holds nothing but the cursor and
//! a page can be fetched again on its own.
mod page;

pub use page::{parse_page, strip_ansi, ParsedPage, Record};

use std::collections::HashSet;
use std::fmt;
use std::net::IpAddr;
use std::time::Duration;

use futures::stream::{self, Stream};
use log::{debug, warn};
use reqwest::header::{HeaderMap, HeaderValue, RETRY_AFTER};
use reqwest::{Response, StatusCode};
use tokio::time;
use url::Url;

use crate::candidates::CandidateHost;
use crate::error::{ConfigError, LookupError};
use crate::shutdown::Shutdown;

pub const DEFAULT_ENDPOINT: &str = "https://ip.thc.org";
pub const API_KEY_HEADER: &str = "x-api-key";

/// Tunables for [`LookupClient`].
#[derive(Debug, Clone)]
pub struct LookupConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub page_size: u32,
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub request_timeout: Duration,
    /// Sleep between pages according to the advertised request budget.
    pub pacing: bool,
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_owned(),
            api_key: None,
            page_size: 100,
            max_retries: 5,
            backoff_base: Duration::from_millis(500),
            backoff_max: Duration::from_secs(30),
            request_timeout: Duration::from_secs(30),
            pacing: true,
        }
    }
}

/// What a single query asks the service about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupTarget {
    /// Subdomains of a root domain.
    Domain(String),
    /// Host names seen on one address.
    Ip(IpAddr),
}

impl fmt::Display for LookupTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Domain(domain) => f.write_str(domain),
            Self::Ip(ip) => write!(f, "{ip}"),
        }
    }
}

/// One successfully parsed page of results.
#[derive(Debug, Clone)]
pub struct Page {
    pub url: String,
    pub hosts: Vec<CandidateHost>,
    pub total: Option<u64>,
    pub rate_limit: Option<u32>,
    pub next: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LookupClient {
    http: reqwest::Client,
    endpoint: String,
    config: LookupConfig,
}

impl LookupClient {
    /// Builds a client. Fails without touching the network when the API key
    /// is missing or the endpoint is not an http(s) URL.
    pub fn new(config: LookupConfig) -> Result<Self, ConfigError> {
        let api_key = config
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or(ConfigError::MissingApiKey)?;

        let endpoint = config.endpoint.trim_end_matches('/').to_owned();
        match Url::parse(&endpoint) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            _ => return Err(ConfigError::InvalidEndpoint(config.endpoint)),
        }

        let mut key = HeaderValue::from_str(api_key)
            .map_err(|e| ConfigError::HttpClient(format!("API key is not a valid header: {e}")))?;
        key.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert(API_KEY_HEADER, key);

        let http = reqwest::Client::builder()
            .user_agent(concat!("reconprobe/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;

        Ok(Self {
            http,
            endpoint,
            config,
        })
    }

    pub fn config(&self) -> &LookupConfig {
        &self.config
    }

    /// URL of the first page for `target`.
    pub fn first_page_url(&self, target: &LookupTarget) -> String {
        let size = self.config.page_size;
        match target {
            LookupTarget::Domain(domain) => format!("{}/sb/{domain}?l={size}", self.endpoint),
            LookupTarget::Ip(ip) => format!("{}/{ip}?l={size}", self.endpoint),
        }
    }

    /// Lazily walks every page of `target`.
    ///
    /// Malformed pages come out as [`LookupError::MalformedPage`] and the walk
    /// goes on when the page still named a successor. Any other error ends
    /// the stream. A continuation that points back at a page already visited
    /// also ends it. Once `shutdown` fires the stream yields
    /// [`LookupError::Cancelled`] instead of the next page and ends.
    pub fn query(
        &self,
        target: LookupTarget,
        shutdown: &Shutdown,
    ) -> impl Stream<Item = Result<Page, LookupError>> + '_ {
        let first = self.first_page_url(&target);
        let state = (Some(first), HashSet::new());
        let shutdown = shutdown.clone();

        stream::unfold(state, move |(cursor, mut visited)| {
            let target = target.clone();
            let shutdown = shutdown.clone();
            async move {
                let url = cursor?;
                if shutdown.is_triggered() {
                    debug!("Stopped paging {target} on shutdown");
                    let cancelled = Err(LookupError::Cancelled { retries: 0 });
                    return Some((cancelled, (None, visited)));
                }
                visited.insert(url.clone());

                let (item, next) = match self.fetch_page(&url, &target, &shutdown).await {
                    Ok((page, problem)) => {
                        let next = page.next.clone().filter(|n| !visited.contains(n));
                        if next.is_some() && self.config.pacing {
                            pause(pacing_delay(page.rate_limit), &shutdown).await;
                        }
                        let item = match problem {
                            Some(reason) => Err(LookupError::MalformedPage { url, reason }),
                            None => Ok(page),
                        };
                        (item, next)
                    }
                    Err(e) => (Err(e), None),
                };

                Some((item, (next, visited)))
            }
        })
    }

    /// Fetches and parses one page, retrying rate limits and transient
    /// failures with exponential backoff. The second element carries the
    /// reason the page was malformed, in which case it has no hosts.
    ///
    /// Once `shutdown` fires no retry is sent and the page ends with
    /// [`LookupError::Cancelled`].
    pub async fn fetch_page(
        &self,
        url: &str,
        target: &LookupTarget,
        shutdown: &Shutdown,
    ) -> Result<(Page, Option<String>), LookupError> {
        let body = self.fetch_body(url, shutdown).await?;

        let parsed = match String::from_utf8(body) {
            Ok(text) => parse_page(&text, &self.endpoint),
            Err(_) => ParsedPage {
                problem: Some("response body is not UTF-8".to_owned()),
                ..ParsedPage::default()
            },
        };

        if let Some(foreign) = &parsed.foreign_next {
            warn!("Ignoring next page link outside {}: {foreign}", self.endpoint);
        }

        let default_ip = match target {
            LookupTarget::Ip(ip) => Some(*ip),
            LookupTarget::Domain(_) => None,
        };
        let hosts = if parsed.problem.is_some() {
            Vec::new()
        } else {
            parsed
                .records
                .iter()
                .filter_map(|r| CandidateHost::new(&r.hostname, r.ip.or(default_ip)))
                .collect()
        };

        debug!(
            "Page {} for {}: {} hosts, total {:?}, budget {:?}",
            url,
            target,
            hosts.len(),
            parsed.total,
            parsed.rate_limit
        );

        let page = Page {
            url: url.to_owned(),
            hosts,
            total: parsed.total,
            rate_limit: parsed.rate_limit,
            next: parsed.next,
        };
        Ok((page, parsed.problem))
    }

    async fn fetch_body(&self, url: &str, shutdown: &Shutdown) -> Result<Vec<u8>, LookupError> {
        let max_retries = self.config.max_retries;
        let mut attempt = 0;

        loop {
            let failure = match self.http.get(url).send().await {
                Ok(response) => match response.status() {
                    StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                        return Err(LookupError::Auth {
                            status: response.status().as_u16(),
                        });
                    }
                    StatusCode::TOO_MANY_REQUESTS => {
                        if attempt >= max_retries {
                            return Err(LookupError::RateLimitExhausted { retries: attempt });
                        }
                        let wait = self
                            .backoff(attempt)
                            .max(retry_after(&response).unwrap_or_default())
                            .min(self.config.backoff_max);
                        warn!("Rate limited on {url}, retry {} in {wait:?}", attempt + 1);
                        if !pause(wait, shutdown).await {
                            return Err(LookupError::Cancelled { retries: attempt });
                        }
                        attempt += 1;
                        continue;
                    }
                    status if status.is_server_error() => format!("HTTP {status}"),
                    status if !status.is_success() => {
                        return Err(LookupError::Transport {
                            retries: attempt,
                            message: format!("HTTP {status}"),
                        });
                    }
                    _ => match response.bytes().await {
                        Ok(bytes) => return Ok(bytes.to_vec()),
                        Err(e) => e.to_string(),
                    },
                },
                Err(e) => e.to_string(),
            };

            if attempt >= max_retries {
                return Err(LookupError::Transport {
                    retries: attempt,
                    message: failure,
                });
            }
            let wait = self.backoff(attempt);
            warn!("Request for {url} failed ({failure}), retry {} in {wait:?}", attempt + 1);
            if !pause(wait, shutdown).await {
                return Err(LookupError::Cancelled { retries: attempt });
            }
            attempt += 1;
        }
    }

    /// `base * 2^attempt`, capped at the configured maximum.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.config
            .backoff_base
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.config.backoff_max)
    }
}

/// Sleeps for `wait` unless `shutdown` fires first. Returns whether the
/// full wait elapsed.
async fn pause(wait: Duration, shutdown: &Shutdown) -> bool {
    tokio::select! {
        biased;
        () = shutdown.triggered() => false,
        () = time::sleep(wait) => true,
    }
}

fn retry_after(response: &Response) -> Option<Duration> {
    let seconds = response.headers().get(RETRY_AFTER)?.to_str().ok()?;
    seconds.trim().parse().ok().map(Duration::from_secs)
}

/// Spreads requests out as the advertised budget shrinks.
pub fn pacing_delay(remaining: Option<u32>) -> Duration {
    match remaining {
        None => Duration::from_millis(2100),
        Some(n) if n >= 50 => Duration::from_millis(100),
        Some(n) if n >= 20 => Duration::from_millis(500),
        Some(n) if n >= 10 => Duration::from_secs(1),
        Some(n) => Duration::from_millis(2200 - u64::from(n) * 100),
    }
}
