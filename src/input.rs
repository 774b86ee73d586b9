//! Provides a means to read, parse and hold configuration options for runs.
use clap::Parser;
use serde_derive::Deserialize;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;
use crate::lookup::{LookupConfig, DEFAULT_ENDPOINT};
use crate::prober::{ProbeConfig, COMMON_WEB_PORTS, DEFAULT_PORTS};
use crate::scope::ScopeInput;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "reconprobe",
    version = env!("CARGO_PKG_VERSION"),
    max_term_width = 120,
    help_template = "{bin} {version}\n{about}\n\nUSAGE:\n    {usage}\n\nOPTIONS:\n{options}",
)]
#[allow(clippy::struct_excessive_bools)]
/// Enumerate the host names behind an IP, CIDR block or domain, then find
/// out which of them serve HTTP(S).
/// Only point this at infrastructure you are allowed to test.
pub struct Opts {
    /// The IP address, CIDR block or root domain to enumerate.
    pub scope: Option<String>,

    /// Skip enumeration and probe the hosts listed in this file, one per line.
    #[arg(short, long, conflicts_with_all = ["scope", "enumerate_only"])]
    pub input: Option<PathBuf>,

    /// Write the enumerated candidate hosts to this file.
    #[arg(long)]
    pub candidates: Option<PathBuf>,

    /// Write the live hosts as JSON Lines to this file.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Stop after enumeration. Candidates go to --candidates, or stdout.
    #[arg(long)]
    pub enumerate_only: bool,

    /// Whether to ignore the configuration file or not.
    #[arg(short, long)]
    pub no_config: bool,

    /// Hide the banner
    #[arg(long)]
    pub no_banner: bool,

    /// Custom path to config file
    #[arg(short, long, value_parser)]
    pub config_path: Option<PathBuf>,

    /// Greppable mode. Only print live URLs, one per line.
    #[arg(short, long)]
    pub greppable: bool,

    /// Accessible mode. Turns off features which negatively affect screen readers.
    #[arg(long)]
    pub accessible: bool,

    /// A comma-delimited list or file of DNS resolvers used when the system
    /// resolver cannot resolve a candidate.
    #[arg(long)]
    pub resolver: Option<String>,

    /// Comma separated ports probed on hosts given without one. 443 and 80
    /// are tried as the HTTPS then HTTP pair. Example: 443,80,8080
    #[arg(short, long, value_delimiter = ',', conflicts_with = "common_ports")]
    pub ports: Option<Vec<u16>>,

    /// Probe the common web ports 80, 443, 8080, 8443, 8000, 3000, 8081, 8444.
    #[arg(long)]
    pub common_ports: bool,

    /// How many hosts are probed at the same time. Capped below the open
    /// file limit.
    #[arg(short, long, default_value = "20")]
    pub batch_size: usize,

    /// The timeout in milliseconds for resolving a host and for each request.
    #[arg(short, long, default_value = "5000")]
    pub timeout: u64,

    /// Redirects followed per probe.
    #[arg(long, default_value = "5")]
    pub max_redirects: usize,

    /// Retries of a rate limited or failing lookup request.
    #[arg(long, default_value = "5")]
    pub retries: u32,

    /// First retry delay in milliseconds, doubled on every retry.
    #[arg(long, default_value = "500")]
    pub backoff_base: u64,

    /// Upper bound in milliseconds for any retry delay.
    #[arg(long, default_value = "30000")]
    pub backoff_max: u64,

    /// Lookups in flight at once when enumerating a range.
    #[arg(long, default_value = "4")]
    pub lookup_concurrency: usize,

    /// Results requested per lookup page.
    #[arg(long, default_value = "100")]
    pub page_size: u32,

    /// Do not slow down between pages as the request budget shrinks.
    #[arg(long)]
    pub no_pacing: bool,

    /// Base URL of the lookup service.
    #[arg(long, default_value = DEFAULT_ENDPOINT)]
    pub endpoint: String,

    /// API key for the lookup service.
    #[arg(long, env = "RECONPROBE_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Largest range, in addresses, accepted as a scope.
    #[arg(long, default_value = "65536")]
    pub max_range: u64,

    /// Stop starting new work after this many seconds and report what was found.
    #[arg(long)]
    pub run_timeout: Option<u64>,

    /// Automatically ups the ULIMIT with the value you provided.
    #[arg(short, long)]
    pub ulimit: Option<u64>,
}

#[cfg(not(tarpaulin_include))]
impl Opts {
    pub fn read() -> Self {
        Opts::parse()
    }

    /// Reads the command line arguments into an Opts struct and merge
    /// values found within the user configuration file.
    pub fn merge(&mut self, config: &Config) {
        if !self.no_config {
            self.merge_required(config);
            self.merge_optional(config);
        }
    }

    fn merge_required(&mut self, config: &Config) {
        macro_rules! merge_required {
            ($($field: ident),+) => {
                $(
                    if let Some(e) = &config.$field {
                        self.$field = e.clone();
                    }
                )+
            }
        }

        merge_required!(
            greppable,
            accessible,
            batch_size,
            timeout,
            max_redirects,
            retries,
            backoff_base,
            backoff_max,
            lookup_concurrency,
            page_size,
            no_pacing,
            endpoint,
            max_range,
            common_ports
        );
    }

    /// Optional values from the file only fill in what the command line
    /// left unset.
    fn merge_optional(&mut self, config: &Config) {
        macro_rules! merge_optional {
            ($($field: ident),+) => {
                $(
                    if self.$field.is_none() && config.$field.is_some() {
                        self.$field = config.$field.clone();
                    }
                )+
            }
        }

        merge_optional!(api_key, resolver, ports, ulimit, run_timeout, candidates, output);
    }

    /// The parsed scope, if one was given.
    pub fn scope(&self) -> Result<Option<ScopeInput>, ConfigError> {
        let Some(raw) = &self.scope else {
            return Ok(None);
        };
        let scope: ScopeInput = raw.parse()?;
        scope.ensure_within(u128::from(self.max_range))?;
        Ok(Some(scope))
    }

    pub fn lookup_config(&self) -> LookupConfig {
        LookupConfig {
            endpoint: self.endpoint.clone(),
            api_key: self.api_key.clone(),
            page_size: self.page_size,
            max_retries: self.retries,
            backoff_base: Duration::from_millis(self.backoff_base),
            backoff_max: Duration::from_millis(self.backoff_max),
            pacing: !self.no_pacing,
            ..LookupConfig::default()
        }
    }

    /// Probe settings with `concurrency` already capped by the caller.
    pub fn probe_config(&self, concurrency: usize) -> ProbeConfig {
        ProbeConfig {
            concurrency,
            timeout: Duration::from_millis(self.timeout),
            max_redirects: self.max_redirects,
            resolver: self.resolver.clone(),
            ports: self.probe_ports(),
            ..ProbeConfig::default()
        }
    }
}

#[cfg(not(tarpaulin_include))]
impl Opts {
    fn probe_ports(&self) -> Vec<u16> {
        if self.common_ports {
            return COMMON_WEB_PORTS.to_vec();
        }
        match &self.ports {
            Some(ports) if !ports.is_empty() => ports.clone(),
            _ => DEFAULT_PORTS.to_vec(),
        }
    }
}

impl Default for Opts {
    fn default() -> Self {
        Self {
            scope: None,
            input: None,
            candidates: None,
            output: None,
            enumerate_only: false,
            no_config: true,
            no_banner: false,
            config_path: None,
            greppable: true,
            accessible: false,
            resolver: None,
            ports: None,
            common_ports: false,
            batch_size: 20,
            timeout: 5000,
            max_redirects: 5,
            retries: 5,
            backoff_base: 500,
            backoff_max: 30_000,
            lookup_concurrency: 4,
            page_size: 100,
            no_pacing: false,
            endpoint: DEFAULT_ENDPOINT.to_owned(),
            api_key: None,
            max_range: 65_536,
            run_timeout: None,
            ulimit: None,
        }
    }
}

/// Struct used to deserialize the options specified within our config file.
/// These will be further merged with our command line arguments in order to
/// generate the final Opts struct.
#[cfg(not(tarpaulin_include))]
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    greppable: Option<bool>,
    accessible: Option<bool>,
    batch_size: Option<usize>,
    timeout: Option<u64>,
    max_redirects: Option<usize>,
    retries: Option<u32>,
    backoff_base: Option<u64>,
    backoff_max: Option<u64>,
    lookup_concurrency: Option<usize>,
    page_size: Option<u32>,
    no_pacing: Option<bool>,
    endpoint: Option<String>,
    max_range: Option<u64>,
    common_ports: Option<bool>,
    api_key: Option<String>,
    resolver: Option<String>,
    ports: Option<Vec<u16>>,
    ulimit: Option<u64>,
    run_timeout: Option<u64>,
    candidates: Option<PathBuf>,
    output: Option<PathBuf>,
}

#[cfg(not(tarpaulin_include))]
#[allow(clippy::doc_link_with_quotes)]
impl Config {
    /// Reads the configuration file with TOML format and parses it into a
    /// Config struct. A missing file is an empty config.
    ///
    /// # Format
    ///
    /// api_key = "..."
    /// batch_size = 50
    /// timeout = 3000
    /// endpoint = "https://ip.thc.org"
    /// no_pacing = false
    /// ports = [443, 80, 8080]
    ///
    pub fn read(custom_config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let Some(config_path) = custom_config_path.or_else(default_config_path) else {
            return Ok(Self::default());
        };
        if !config_path.exists() {
            return Ok(Self::default());
        }

        let file_error = |reason: String| ConfigError::ConfigFile {
            path: config_path.display().to_string(),
            reason,
        };
        let content = fs::read_to_string(&config_path).map_err(|e| file_error(e.to_string()))?;
        toml::from_str(&content).map_err(|e| file_error(e.to_string()))
    }
}

/// Constructs default path to config toml
pub fn default_config_path() -> Option<PathBuf> {
    let mut config_path = dirs::home_dir()?;
    config_path.push(".reconprobe.toml");
    Some(config_path)
}
