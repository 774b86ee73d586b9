//! Chains enumeration and probing, or runs either stage on its own.
use std::path::PathBuf;

use log::info;

use crate::artifact;
use crate::candidates::CandidateList;
use crate::enumerator::{Enumeration, Enumerator};
use crate::error::{ConfigError, RunError};
use crate::prober::{HostProbe, HttpProbe, LiveHostReport, Prober};
use crate::scope::ScopeInput;
use crate::shutdown::Shutdown;

/// What a run produced.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    /// Present when the run enumerated. Its candidate list has been handed
    /// to the prober and is empty; the stats are intact.
    pub enumeration: Option<Enumeration>,
    pub candidates: usize,
    pub report: LiveHostReport,
}

impl RunSummary {
    /// Something was lost along the way: failed lookups, dead hosts, or a
    /// cancelled stage.
    pub fn is_partial(&self) -> bool {
        let enumeration_partial = self
            .enumeration
            .as_ref()
            .is_some_and(|e| e.cancelled || e.stats.failed_queries > 0);
        enumeration_partial || self.report.failed() > 0 || self.report.skipped > 0
    }
}

pub struct Pipeline<P = HttpProbe> {
    enumerator: Option<Enumerator>,
    prober: Prober<P>,
    shutdown: Shutdown,
    candidates_out: Option<PathBuf>,
}

impl<P: HostProbe> Pipeline<P> {
    /// A pipeline that can only probe. Add an [`Enumerator`] with
    /// [`Pipeline::with_enumerator`] to run from a scope.
    pub fn new(prober: Prober<P>, shutdown: Shutdown) -> Self {
        Self {
            enumerator: None,
            prober,
            shutdown,
            candidates_out: None,
        }
    }

    #[must_use]
    pub fn with_enumerator(mut self, enumerator: Enumerator) -> Self {
        self.enumerator = Some(enumerator);
        self
    }

    /// Also write the candidate list to `path` once enumeration is done.
    #[must_use]
    pub fn with_candidates_output(mut self, path: impl Into<PathBuf>) -> Self {
        self.candidates_out = Some(path.into());
        self
    }

    pub const fn shutdown(&self) -> &Shutdown {
        &self.shutdown
    }

    /// Enumerates `scope` and writes the candidate artifact when configured.
    pub async fn enumerate_only(&self, scope: &ScopeInput) -> Result<Enumeration, RunError> {
        let enumerator = self.enumerator.as_ref().ok_or(ConfigError::NoEnumerator)?;
        let enumeration = enumerator.enumerate(scope, &self.shutdown).await?;

        if let Some(path) = &self.candidates_out {
            artifact::save_candidates(&enumeration.candidates, path)?;
            info!(
                "Saved {} candidates to {}",
                enumeration.candidates.len(),
                path.display()
            );
        }
        Ok(enumeration)
    }

    /// Enumerates `scope` then probes what was found.
    pub async fn run(&self, scope: &ScopeInput) -> Result<RunSummary, RunError> {
        let mut enumeration = self.enumerate_only(scope).await?;
        let candidates = std::mem::take(&mut enumeration.candidates);

        let mut summary = self.run_from_candidates(candidates).await;
        summary.enumeration = Some(enumeration);
        Ok(summary)
    }

    /// Probes an existing candidate list, e.g. one read back from disk.
    pub async fn run_from_candidates(&self, candidates: CandidateList) -> RunSummary {
        let count = candidates.len();
        let report = if self.shutdown.is_triggered() {
            LiveHostReport {
                skipped: count,
                ..LiveHostReport::default()
            }
        } else {
            self.prober.probe(candidates, &self.shutdown).await
        };

        RunSummary {
            enumeration: None,
            candidates: count,
            report,
        }
    }
}
