//! Candidate hosts and the ordered, deduplicated list that carries them from
//! enumeration to probing.
use std::collections::HashSet;
use std::net::IpAddr;

use chrono::{DateTime, Utc};

use crate::scope::normalize_hostname;

/// A host name found by enumeration, not yet known to be live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateHost {
    pub hostname: String,
    pub source_ip: Option<IpAddr>,
    pub discovered_at: DateTime<Utc>,
}

impl CandidateHost {
    /// Normalises `raw` (see [`normalize_hostname`]) and stamps it with the
    /// current time. `None` when `raw` is not a usable host.
    pub fn new(raw: &str, source_ip: Option<IpAddr>) -> Option<Self> {
        Some(Self {
            hostname: normalize_hostname(raw)?,
            source_ip,
            discovered_at: Utc::now(),
        })
    }

    fn key(&self) -> String {
        self.hostname.to_ascii_lowercase()
    }
}

/// Insertion ordered set of [`CandidateHost`], unique on host name.
///
/// The first record seen for a name wins; later duplicates (in any letter
/// case) are dropped along with their auxiliary fields.
///
/// ```rust
/// # use reconprobe::candidates::{CandidateHost, CandidateList};
/// let mut list = CandidateList::new();
/// assert!(list.insert(CandidateHost::new("a.example.com", None).unwrap()));
/// assert!(!list.insert(CandidateHost::new("A.EXAMPLE.com", None).unwrap()));
/// assert_eq!(list.len(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct CandidateList {
    hosts: Vec<CandidateHost>,
    seen: HashSet<String>,
}

impl CandidateList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `host` unless its name is already present. Returns whether it was
    /// added.
    pub fn insert(&mut self, host: CandidateHost) -> bool {
        if !self.seen.insert(host.key()) {
            return false;
        }
        self.hosts.push(host);
        true
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, CandidateHost> {
        self.hosts.iter()
    }

    pub fn hostnames(&self) -> impl Iterator<Item = &str> + '_ {
        self.hosts.iter().map(|h| h.hostname.as_str())
    }

    pub fn contains(&self, hostname: &str) -> bool {
        self.seen.contains(&hostname.to_ascii_lowercase())
    }
}

impl Extend<CandidateHost> for CandidateList {
    fn extend<T: IntoIterator<Item = CandidateHost>>(&mut self, iter: T) {
        for host in iter {
            self.insert(host);
        }
    }
}

impl FromIterator<CandidateHost> for CandidateList {
    fn from_iter<T: IntoIterator<Item = CandidateHost>>(iter: T) -> Self {
        let mut list = Self::new();
        list.extend(iter);
        list
    }
}

impl IntoIterator for CandidateList {
    type Item = CandidateHost;
    type IntoIter = std::vec::IntoIter<CandidateHost>;

    fn into_iter(self) -> Self::IntoIter {
        self.hosts.into_iter()
    }
}

impl<'a> IntoIterator for &'a CandidateList {
    type Item = &'a CandidateHost;
    type IntoIter = std::slice::Iter<'a, CandidateHost>;

    fn into_iter(self) -> Self::IntoIter {
        self.hosts.iter()
    }
}
