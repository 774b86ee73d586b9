//! Turns a scope into a deduplicated candidate list by driving lookup
//! queries.
use std::pin::pin;

use futures::{future, stream, StreamExt};
use log::{debug, info, warn};

use crate::candidates::{CandidateHost, CandidateList};
use crate::error::{LookupError, RunError};
use crate::lookup::{LookupClient, LookupTarget};
use crate::scope::ScopeInput;
use crate::shutdown::Shutdown;

/// Bookkeeping about one enumeration, reported alongside the results.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnumerationStats {
    pub queries: usize,
    pub failed_queries: usize,
    pub pages: usize,
    pub malformed_pages: usize,
    /// Records returned by the service, duplicates included.
    pub records: usize,
}

/// A query that lost some or all of its results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryFailure {
    pub target: LookupTarget,
    pub error: LookupError,
}

#[derive(Debug, Clone, Default)]
pub struct Enumeration {
    pub candidates: CandidateList,
    pub stats: EnumerationStats,
    pub failures: Vec<QueryFailure>,
    /// The shutdown signal fired before every query was issued.
    pub cancelled: bool,
}

struct QueryOutcome {
    target: LookupTarget,
    hosts: Vec<CandidateHost>,
    pages: usize,
    errors: Vec<LookupError>,
    cancelled: bool,
}

/// Every lookup a scope expands to, in scope order. A range yields one query
/// per address, network and broadcast addresses included.
pub fn lookup_targets(scope: &ScopeInput) -> Box<dyn Iterator<Item = LookupTarget> + Send + '_> {
    match scope {
        ScopeInput::RootDomain(domain) => {
            Box::new(std::iter::once(LookupTarget::Domain(domain.clone())))
        }
        ScopeInput::SingleIp(_) | ScopeInput::IpRange(_) => {
            Box::new(scope.addresses().map(LookupTarget::Ip))
        }
    }
}

#[derive(Debug)]
pub struct Enumerator {
    client: LookupClient,
    concurrency: usize,
}

impl Enumerator {
    /// `concurrency` bounds how many queries are in flight at once. Results
    /// are still merged in query order.
    pub fn new(client: LookupClient, concurrency: usize) -> Self {
        Self {
            client,
            concurrency: concurrency.max(1),
        }
    }

    /// Runs every query of `scope` and merges the results.
    ///
    /// Partial failures are recorded and the list is returned anyway. An
    /// authentication failure aborts at once, and an empty list with at least
    /// one failed query is reported as [`RunError::TotalEnumerationFailure`].
    pub async fn enumerate(
        &self,
        scope: &ScopeInput,
        shutdown: &Shutdown,
    ) -> Result<Enumeration, RunError> {
        let expected = scope.lookup_count();
        info!("Enumerating {scope} with {expected} lookup(s)");

        let mut outcomes = pin!(stream::iter(lookup_targets(scope))
            .take_while(|_| future::ready(!shutdown.is_triggered()))
            .map(|target| self.run_query(target, shutdown))
            .buffered(self.concurrency));

        let mut enumeration = Enumeration::default();
        while let Some(outcome) = outcomes.next().await {
            let stats = &mut enumeration.stats;
            stats.queries += 1;
            stats.pages += outcome.pages;
            stats.records += outcome.hosts.len();
            enumeration.cancelled |= outcome.cancelled;

            if let Some(fatal) = outcome.errors.iter().find(|e| e.is_fatal()) {
                return Err(RunError::Auth(fatal.clone()));
            }
            if !outcome.errors.is_empty() {
                stats.failed_queries += 1;
            }
            for error in outcome.errors {
                if matches!(error, LookupError::MalformedPage { .. }) {
                    stats.malformed_pages += 1;
                }
                warn!("Lookup {} lost results: {error}", outcome.target);
                enumeration.failures.push(QueryFailure {
                    target: outcome.target.clone(),
                    error,
                });
            }

            enumeration.candidates.extend(outcome.hosts);
        }

        enumeration.cancelled |= (enumeration.stats.queries as u128) < expected;
        if enumeration.cancelled {
            warn!(
                "Enumeration stopped early after {} of {expected} lookups",
                enumeration.stats.queries
            );
        }

        info!(
            "Enumeration of {scope} found {} unique hosts in {} records",
            enumeration.candidates.len(),
            enumeration.stats.records
        );

        if enumeration.candidates.is_empty() && enumeration.stats.failed_queries > 0 {
            return Err(RunError::TotalEnumerationFailure {
                queries: enumeration.stats.queries,
                failed_queries: enumeration.stats.failed_queries,
            });
        }
        Ok(enumeration)
    }

    async fn run_query(&self, target: LookupTarget, shutdown: &Shutdown) -> QueryOutcome {
        let mut outcome = QueryOutcome {
            target: target.clone(),
            hosts: Vec::new(),
            pages: 0,
            errors: Vec::new(),
            cancelled: false,
        };

        let mut pages = pin!(self.client.query(target, shutdown));
        while let Some(page) = pages.next().await {
            if let Err(LookupError::Cancelled { retries }) = page {
                debug!("{}: cancelled after {retries} retries", outcome.target);
                outcome.cancelled = true;
                break;
            }
            outcome.pages += 1;
            match page {
                Ok(page) => {
                    debug!("{}: {} hosts from {}", outcome.target, page.hosts.len(), page.url);
                    outcome.hosts.extend(page.hosts);
                }
                Err(e) => {
                    let fatal = e.is_fatal();
                    outcome.errors.push(e);
                    if fatal {
                        break;
                    }
                }
            }
        }

        outcome
    }
}
