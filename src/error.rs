//! Error taxonomy shared by the enumeration and probing stages.
//!
//! Only [`ConfigError`] and the fatal [`RunError`] variants ever abort a run.
//! Everything per page or per host is captured next to the item it concerns
//! ([`LookupError`] inside the enumeration stats, [`FailureReason`] on each
//! probe result) and only counted.
//!
//! [`FailureReason`]: crate::prober::FailureReason
use std::path::PathBuf;

use thiserror::Error;

/// Problems with user supplied input, detected before any network activity.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("'{0}' is not an IP address, CIDR block or domain name")]
    InvalidScope(String),

    #[error("'{input}' is not a valid CIDR block: {reason}")]
    InvalidCidr { input: String, reason: String },

    #[error("'{0}' is not a valid domain name")]
    InvalidDomain(String),

    #[error("{cidr} spans {addresses} addresses, the limit is {limit}")]
    RangeTooLarge {
        cidr: String,
        addresses: u128,
        limit: u128,
    },

    #[error("no API key configured for the lookup service")]
    MissingApiKey,

    #[error("invalid lookup endpoint '{0}'")]
    InvalidEndpoint(String),

    #[error("could not build HTTP client: {0}")]
    HttpClient(String),

    #[error("invalid configuration file {path}: {reason}")]
    ConfigFile { path: String, reason: String },

    #[error("nothing to do: give a scope or a candidate file with --input")]
    NoTarget,

    #[error("enumeration needs a lookup client, this pipeline can only probe")]
    NoEnumerator,
}

/// Failure of a single lookup query or page.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LookupError {
    /// The service rejected our credentials. Fatal for the whole run.
    #[error("lookup service rejected the API key (HTTP {status})")]
    Auth { status: u16 },

    #[error("still rate limited after {retries} retries")]
    RateLimitExhausted { retries: u32 },

    #[error("transport failure after {retries} retries: {message}")]
    Transport { retries: u32, message: String },

    #[error("malformed page {url}: {reason}")]
    MalformedPage { url: String, reason: String },

    /// The run was cancelled while this query waited to retry.
    #[error("cancelled after {retries} retries")]
    Cancelled { retries: u32 },
}

impl LookupError {
    /// Whether this error must stop the whole run.
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Auth { .. })
    }
}

/// Reading or writing one of the run artifacts failed.
#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("could not read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not serialize report record: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Errors that abort a pipeline run.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("authentication failed: {0}")]
    Auth(LookupError),

    #[error("enumeration found nothing and {failed_queries} of {queries} lookups failed")]
    TotalEnumerationFailure { queries: usize, failed_queries: usize },

    #[error(transparent)]
    Artifact(#[from] ArtifactError),
}
