//! Leader election over a shared record store
//!
//! Every replica runs a [`Candidate`] that makes sure exactly one election
//! record exists and reports who holds it, and an [`Official`] that serves
//! the current holder over HTTP, both on demand and as a live feed.

pub mod candidate;
pub mod config;
pub mod error;
pub mod health;
pub mod logging;
pub mod metrics;
pub mod official;
pub mod server;
pub mod store;
pub mod stream;

pub use candidate::Candidate;
pub use config::{CandidateConfig, ElectorConfig, LogFormat};
pub use error::{ElectorError, Result, StoreError};
pub use metrics::{MetricsSink, NoopMetrics, PrometheusMetrics};
pub use official::{Official, Subscription};
pub use store::{ElectionStore, LeaseStore, MemoryStore, StoreEvent};
pub use stream::{result_stream, ResultPublisher, ResultSubscriber};

use health::ReadinessCheck;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Name this process takes part as: the explicit override, else the host name
pub fn resolve_identity_name(explicit: Option<String>) -> Result<String> {
    let name = explicit
        .or_else(|| std::env::var("HOSTNAME").ok())
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|contents| contents.trim().to_string())
        })
        .filter(|name| !name.trim().is_empty())
        .ok_or_else(|| ElectorError::setup("unable to get hostname"))?;
    Ok(name.trim().to_string())
}

/// A candidate, its official and their HTTP surfaces, wired together
pub struct Elector {
    config: ElectorConfig,
    identity: String,
    store: Arc<dyn ElectionStore>,
    metrics: Arc<PrometheusMetrics>,
}

impl Elector {
    /// Assemble an elector on top of an existing store
    pub fn new(
        config: ElectorConfig,
        identity: impl Into<String>,
        store: Arc<dyn ElectionStore>,
        metrics: Arc<PrometheusMetrics>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            identity: identity.into(),
            store,
            metrics,
        })
    }

    /// Assemble an elector backed by Kubernetes Leases
    pub async fn connect(config: ElectorConfig) -> Result<Self> {
        config.validate()?;
        let identity = resolve_identity_name(config.identity.clone())?;
        let client = kube::Client::try_default().await?;
        let metrics = Arc::new(PrometheusMetrics::new()?);
        Self::new(config, identity, Arc::new(LeaseStore::new(client)), metrics)
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Run until `cancel` fires or a component fails.
    ///
    /// A failing component cancels the others; its error is returned.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        tracing::info!(
            election = %self.config.election,
            identity = %self.identity,
            "Elector starting"
        );

        let election_listener = server::bind("election", self.config.election_address).await?;
        let probe_listener = server::bind("probe", self.config.probe_address).await?;
        let metrics_listener = server::bind("metrics", self.config.metrics_address).await?;

        let (publisher, results) = result_stream();
        let candidate = Arc::new(Candidate::new(
            self.config.candidate(),
            self.identity.clone(),
            self.store.clone(),
            self.metrics.clone(),
            publisher,
        ));
        let official = Arc::new(Official::new());
        let checks: Vec<Arc<dyn ReadinessCheck>> = vec![candidate.clone(), official.clone()];

        let mut tasks = JoinSet::new();
        {
            let cancel = cancel.clone();
            tasks.spawn(async move { candidate.run(cancel).await });
        }
        {
            let cancel = cancel.clone();
            let official = official.clone();
            tasks.spawn(async move { official.run(results, cancel).await });
        }
        tasks.spawn(server::serve(
            "election",
            election_listener,
            server::election_router(official),
            cancel.clone(),
        ));
        tasks.spawn(server::serve(
            "probe",
            probe_listener,
            health::probe_router(checks),
            cancel.clone(),
        ));
        tasks.spawn(server::serve(
            "metrics",
            metrics_listener,
            server::metrics_router(self.metrics.clone()),
            cancel.clone(),
        ));

        let mut failure = None;
        while let Some(joined) = tasks.join_next().await {
            let outcome = joined
                .map_err(|e| ElectorError::internal(format!("task failed: {}", e)))
                .and_then(|result| result);
            match outcome {
                Ok(()) | Err(ElectorError::Cancelled) => {}
                Err(e) => {
                    tracing::error!(error = %e, "Elector component failed");
                    cancel.cancel();
                    failure.get_or_insert(e);
                }
            }
        }

        tracing::info!("Elector stopped");
        failure.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_identity_wins() {
        assert_eq!(
            resolve_identity_name(Some(" app-0 ".to_string())).unwrap(),
            "app-0"
        );
    }

    #[test]
    fn test_elector_rejects_invalid_config() {
        let metrics = Arc::new(PrometheusMetrics::new().unwrap());
        let result = Elector::new(
            ElectorConfig::default(),
            "app-0",
            Arc::new(MemoryStore::new()),
            metrics,
        );
        assert!(matches!(result, Err(ElectorError::Config(_))));
    }
}
