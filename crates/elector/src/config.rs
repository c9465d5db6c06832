//! Elector configuration

use crate::error::{ElectorError, Result};
use elector_types::ElectionKey;
use serde::Deserialize;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_ELECTION_ADDRESS: &str = "0.0.0.0:27070";
pub const DEFAULT_PROBE_ADDRESS: &str = "0.0.0.0:28080";
pub const DEFAULT_METRICS_ADDRESS: &str = "0.0.0.0:29090";

/// Interval of the safety-net reconciliation timer
pub const DEFAULT_RESYNC_INTERVAL: Duration = Duration::from_secs(60);
/// Delay before retrying a failed reconciliation
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(10);
/// Deadline for a single store call
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(2);

/// Accepted values for the log level
pub const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = ElectorError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(ElectorError::config(format!(
                "unsupported log format '{}'",
                other
            ))),
        }
    }
}

/// Timing of one candidate's reconciliation loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateConfig {
    pub election: ElectionKey,
    pub resync_interval: Duration,
    pub retry_interval: Duration,
    pub store_timeout: Duration,
}

impl CandidateConfig {
    pub fn new(election: ElectionKey) -> Self {
        Self {
            election,
            resync_interval: DEFAULT_RESYNC_INTERVAL,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }
}

/// Full process configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ElectorConfig {
    /// Election to take part in
    pub election: ElectionKey,
    /// Override for the candidate identity (defaults to the host name)
    #[serde(default)]
    pub identity: Option<String>,
    /// Address of the election API
    pub election_address: SocketAddr,
    /// Address of the health probes
    pub probe_address: SocketAddr,
    /// Address of the metrics endpoint
    pub metrics_address: SocketAddr,
    pub resync_interval: Duration,
    pub retry_interval: Duration,
    pub store_timeout: Duration,
    #[serde(default)]
    pub log_format: LogFormat,
    pub log_level: String,
}

impl Default for ElectorConfig {
    fn default() -> Self {
        Self {
            election: ElectionKey::new("", ""),
            identity: None,
            election_address: parse_addr(DEFAULT_ELECTION_ADDRESS),
            probe_address: parse_addr(DEFAULT_PROBE_ADDRESS),
            metrics_address: parse_addr(DEFAULT_METRICS_ADDRESS),
            resync_interval: DEFAULT_RESYNC_INTERVAL,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            store_timeout: DEFAULT_STORE_TIMEOUT,
            log_format: LogFormat::Text,
            log_level: "info".to_string(),
        }
    }
}

fn parse_addr(addr: &str) -> SocketAddr {
    addr.parse()
        .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 0)))
}

impl ElectorConfig {
    /// Reject configurations the elector cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.election.name.is_empty() || self.election.namespace.is_empty() {
            return Err(ElectorError::config(
                "both --election and --election-namespace are required options",
            ));
        }
        self.election.validate()?;

        if self.resync_interval.is_zero() || self.retry_interval.is_zero() {
            return Err(ElectorError::config(
                "resync and retry intervals must be greater than zero",
            ));
        }
        if self.store_timeout.is_zero() || self.store_timeout >= self.resync_interval {
            return Err(ElectorError::config(format!(
                "store timeout {:?} must be positive and shorter than the resync interval {:?}",
                self.store_timeout, self.resync_interval
            )));
        }
        if !LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(ElectorError::config(format!(
                "unable to parse log level '{}', expected one of: {}",
                self.log_level,
                LOG_LEVELS.join(", ")
            )));
        }
        if let Some(identity) = &self.identity {
            if identity.trim().is_empty() {
                return Err(ElectorError::config("identity must not be blank"));
            }
        }

        Ok(())
    }

    /// Reconciliation settings for the candidate
    pub fn candidate(&self) -> CandidateConfig {
        CandidateConfig {
            election: self.election.clone(),
            resync_interval: self.resync_interval,
            retry_interval: self.retry_interval,
            store_timeout: self.store_timeout,
        }
    }
}
