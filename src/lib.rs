//! This crate exposes the internal functionality of the `reconprobe` asset
//! discovery tool.
//!
//! A run has two stages. The [`Enumerator`](crate::enumerator::Enumerator)
//! turns a [`ScopeInput`](crate::scope::ScopeInput) (one IP, a CIDR block or
//! a root domain) into a [`CandidateList`](crate::candidates::CandidateList)
//! by paging through a remote host lookup service. The
//! [`Prober`](crate::prober::Prober) then checks every candidate over HTTPS,
//! falling back to HTTP, and keeps the ones that answer.
//! [`Pipeline`](crate::pipeline::Pipeline) chains the two, or runs probing
//! alone from a candidate file written by an earlier run.
//!
//! ## Architecture Overview
//!
//! 1. **Scope parsing**: the target is validated and ranges are bounded
//! 2. **Enumeration**: one lookup per domain or address, paginated and rate
//!    limited, merged into an ordered set of host names
//! 3. **Probing**: a fixed size pool of per host tasks with manual redirect
//!    handling
//! 4. **Reporting**: live hosts deduplicated by service and written as JSON
//!    Lines
//!
//! Failures of single lookups or hosts never abort a run; they are counted
//! and reported next to the results.
//!
//! ## Basic Usage Example
//!
//! Probing a hand written candidate list:
//!
//! ```rust,no_run
//! use reconprobe::artifact::read_candidates;
//! use reconprobe::pipeline::Pipeline;
//! use reconprobe::prober::{ProbeConfig, Prober};
//! use reconprobe::shutdown::Shutdown;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let candidates = read_candidates("www.example.com\napi.example.com\n".as_bytes())?;
//! let prober = Prober::new(ProbeConfig::default()).await?;
//! let pipeline = Pipeline::new(prober, Shutdown::new());
//!
//! let summary = pipeline.run_from_candidates(candidates).await;
//! for live in &summary.report.live {
//!     println!("{} {:?}", live.final_url, live.status_code);
//! }
//! # Ok(())
//! # }
//! ```
#![allow(clippy::needless_doctest_main)]

pub mod tui;

pub mod input;

pub mod error;

pub mod scope;

pub mod candidates;

pub mod lookup;

pub mod enumerator;

pub mod prober;

pub mod artifact;

pub mod shutdown;

pub mod pipeline;
