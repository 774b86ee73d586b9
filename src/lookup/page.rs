//! Parser for the line oriented lookup response format.
//!
//! ```text
//! ;;Entries: 100/2345
//! ;;Rate Limit: You can make 248 requests ...
//! ;;Next Page: https://ip.thc.org/sb/example.com?l=100&c=...
//! www.example.com
//! mail.example.com 93.184.216.34
//! ```
use std::net::IpAddr;

use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

use crate::scope::normalize_hostname;

static ANSI_ESCAPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\x1B(?:\[[0-?]*[ -/]*[@-~]|\([AB0-2]|[@-Z\\-_][0-?]*[ -/]*[@-~])")
        .expect("static regex")
});

static RATE_LIMIT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"You can make (\d+)").expect("static regex"));

/// One host line of a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub hostname: String,
    pub ip: Option<IpAddr>,
}

/// Everything we could read from one response body.
///
/// `problem` is set when the page cannot be trusted; its records must then be
/// discarded, but `next` is still honoured when it was readable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedPage {
    pub records: Vec<Record>,
    pub total: Option<u64>,
    pub rate_limit: Option<u32>,
    pub next: Option<String>,
    /// A continuation link that was dropped because it leaves the endpoint.
    pub foreign_next: Option<String>,
    pub problem: Option<String>,
}

pub fn strip_ansi(line: &str) -> String {
    ANSI_ESCAPE.replace_all(line, "").trim().to_owned()
}

/// Parses a page body. Continuation links that do not point below
/// `endpoint` are ignored; the API key goes out with every page request.
pub fn parse_page(body: &str, endpoint: &str) -> ParsedPage {
    let mut page = ParsedPage::default();
    let endpoint = Url::parse(endpoint).ok();

    for raw_line in body.lines() {
        let line = strip_ansi(raw_line);
        if line.is_empty() {
            continue;
        }

        if let Some(rest) = line.strip_prefix(";;Entries:") {
            match parse_entries(rest) {
                Some(total) => page.total = Some(total),
                None => page.note_problem(format!("unreadable entries header '{line}'")),
            }
        } else if line.starts_with(";;Rate Limit:") {
            page.rate_limit = RATE_LIMIT
                .captures(&line)
                .and_then(|c| c[1].parse().ok());
        } else if let Some(rest) = line.strip_prefix(";;Next Page:") {
            let candidate = strip_ansi(rest);
            if endpoint.as_ref().is_some_and(|e| is_below(e, &candidate)) {
                page.next = Some(candidate);
            } else {
                page.foreign_next = Some(candidate);
            }
        } else if line.starts_with(";;") {
            continue;
        } else {
            match parse_record(&line) {
                Some(record) => page.records.push(record),
                None => page.note_problem(format!("invalid host record '{line}'")),
            }
        }
    }

    page
}

/// Same scheme, host and port as `endpoint`, no credentials, and a path
/// inside the endpoint's path.
fn is_below(endpoint: &Url, candidate: &str) -> bool {
    let Ok(url) = Url::parse(candidate) else {
        return false;
    };
    if url.scheme() != endpoint.scheme()
        || url.host_str() != endpoint.host_str()
        || url.port_or_known_default() != endpoint.port_or_known_default()
        || !url.username().is_empty()
        || url.password().is_some()
    {
        return false;
    }

    let base = endpoint.path().trim_end_matches('/');
    base.is_empty()
        || url.path() == base
        || url
            .path()
            .strip_prefix(base)
            .is_some_and(|rest| rest.starts_with('/'))
}

impl ParsedPage {
    fn note_problem(&mut self, reason: String) {
        if self.problem.is_none() {
            self.problem = Some(reason);
        }
    }
}

/// `;;Entries: 100/2345` -> 2345
fn parse_entries(rest: &str) -> Option<u64> {
    rest.split('/').nth(1)?.split_whitespace().next()?.parse().ok()
}

fn parse_record(line: &str) -> Option<Record> {
    let mut fields = line.split_whitespace();
    let hostname = normalize_hostname(fields.next()?)?;
    let ip = fields.next().and_then(|f| f.parse().ok());
    Some(Record { hostname, ip })
}
