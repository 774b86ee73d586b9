//! Reading and writing the files a run leaves behind: the candidate list
//! between the two stages and the JSON Lines report at the end.
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::net::IpAddr;
use std::path::Path;

use log::{debug, warn};
use serde_derive::Serialize;

use crate::candidates::{CandidateHost, CandidateList};
use crate::error::ArtifactError;
use crate::prober::{LiveHostReport, ProbeResult};

/// One line of the final report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRecord<'a> {
    pub url: &'a str,
    pub status_code: Option<u16>,
    pub scheme: &'a str,
    pub hostname: &'a str,
    pub server: Option<&'a str>,
    pub title: Option<&'a str>,
}

impl<'a> From<&'a ProbeResult> for ReportRecord<'a> {
    fn from(result: &'a ProbeResult) -> Self {
        // A redirect may have switched schemes; report where we ended up.
        let scheme = match result.final_url.split_once("://") {
            Some((scheme, _)) => scheme,
            None => result.scheme.as_str(),
        };
        Self {
            url: &result.final_url,
            status_code: result.status_code,
            scheme,
            hostname: &result.hostname,
            server: result.server.as_deref(),
            title: result.title.as_deref(),
        }
    }
}

/// Writes `hostname` or `hostname<TAB>ip` per candidate, in list order.
pub fn write_candidates<W: Write>(list: &CandidateList, mut out: W) -> io::Result<()> {
    for host in list {
        match host.source_ip {
            Some(ip) => writeln!(out, "{}\t{ip}", host.hostname)?,
            None => writeln!(out, "{}", host.hostname)?,
        }
    }
    out.flush()
}

/// Reads a candidate list. Blank lines and `#` comments are skipped, lines
/// that are not host names are logged and dropped, duplicates collapse.
pub fn read_candidates<R: BufRead>(input: R) -> io::Result<CandidateList> {
    let mut list = CandidateList::new();
    for (number, line) in input.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let mut fields = line.split_whitespace();
        let hostname = fields.next().unwrap_or_default();
        let ip = fields.next().and_then(|f| f.parse::<IpAddr>().ok());
        match CandidateHost::new(hostname, ip) {
            Some(host) => {
                list.insert(host);
            }
            None => warn!("Skipping line {}: '{line}' is not a host name", number + 1),
        }
    }
    Ok(list)
}

pub fn save_candidates(list: &CandidateList, path: &Path) -> Result<(), ArtifactError> {
    let write_err = |source| ArtifactError::Write {
        path: path.to_path_buf(),
        source,
    };
    let file = File::create(path).map_err(write_err)?;
    write_candidates(list, BufWriter::new(file)).map_err(write_err)?;
    debug!("Wrote {} candidates to {}", list.len(), path.display());
    Ok(())
}

pub fn load_candidates(path: &Path) -> Result<CandidateList, ArtifactError> {
    let read_err = |source| ArtifactError::Read {
        path: path.to_path_buf(),
        source,
    };
    let file = File::open(path).map_err(read_err)?;
    let list = read_candidates(BufReader::new(file)).map_err(read_err)?;
    debug!("Read {} candidates from {}", list.len(), path.display());
    Ok(list)
}

/// Writes one JSON object per live result.
pub fn write_report<W: Write>(report: &LiveHostReport, mut out: W) -> Result<(), ArtifactError> {
    for result in &report.live {
        serde_json::to_writer(&mut out, &ReportRecord::from(result))?;
        out.write_all(b"\n").map_err(|source| ArtifactError::Write {
            path: "<report>".into(),
            source,
        })?;
    }
    out.flush().map_err(|source| ArtifactError::Write {
        path: "<report>".into(),
        source,
    })
}

pub fn save_report(report: &LiveHostReport, path: &Path) -> Result<(), ArtifactError> {
    let file = File::create(path).map_err(|source| ArtifactError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    write_report(report, BufWriter::new(file)).map_err(|e| match e {
        ArtifactError::Write { source, .. } => ArtifactError::Write {
            path: path.to_path_buf(),
            source,
        },
        other => other,
    })
}
