//! Election candidate
//!
//! A candidate makes sure exactly one election record exists for its key
//! and reports every holder it observes. Reconciliation runs on a resync
//! timer, on change notifications from the store, and on a short retry
//! timer after a failed round. Each round is idempotent, so redundant
//! triggers only cost a store read.

use crate::{
    config::CandidateConfig,
    error::{ElectorError, Result, StoreError},
    health::ReadinessCheck,
    metrics::MetricsSink,
    store::{ChangeStream, ElectionStore, StoreEvent},
    stream::ResultPublisher,
};
use elector_types::{CandidateIdentity, ElectionRecord, ResultEvent};
use futures::{stream, Future, StreamExt};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::{
    sync::Mutex,
    time::{self, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

/// Resource type reported when an election record is written
pub const RECORD_RESOURCE_TYPE: &str = "lease";

/// What woke the reconciliation loop
#[derive(Debug)]
enum Trigger {
    Resync,
    Retry,
    Change(StoreEvent),
}

/// One process's participation in an election
pub struct Candidate {
    config: CandidateConfig,
    name: String,
    store: Arc<dyn ElectionStore>,
    metrics: Arc<dyn MetricsSink>,
    results: ResultPublisher,
    /// Resolved identity; the mutex serializes setup
    identity: Mutex<Option<CandidateIdentity>>,
    /// Serializes campaigns within this process
    campaign_lock: Mutex<()>,
    ready: AtomicBool,
}

impl Candidate {
    /// Create a candidate that will take part as `name`
    pub fn new(
        config: CandidateConfig,
        name: impl Into<String>,
        store: Arc<dyn ElectionStore>,
        metrics: Arc<dyn MetricsSink>,
        results: ResultPublisher,
    ) -> Self {
        Self {
            config,
            name: name.into(),
            store,
            metrics,
            results,
            identity: Mutex::new(None),
            campaign_lock: Mutex::new(()),
            ready: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CandidateConfig {
        &self.config
    }

    /// Fails until the identity has been resolved
    pub fn ready(&self) -> Result<()> {
        if self.ready.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(ElectorError::NotReady("candidate has not completed setup"))
        }
    }

    /// Resolve this candidate's identity, once.
    ///
    /// Failure is fatal to the candidate: without an identity no claim
    /// can be valid.
    pub async fn setup(&self) -> Result<CandidateIdentity> {
        let mut identity = self.identity.lock().await;
        if let Some(resolved) = identity.as_ref() {
            return Ok(resolved.clone());
        }

        let resolved = self
            .bounded(self.store.resolve_self(&self.config.election, &self.name))
            .await
            .map_err(|e| {
                ElectorError::setup(format!("unable to resolve identity '{}': {}", self.name, e))
            })?;

        info!(
            identity = %resolved.name,
            owner = %resolved.owner_reference.name,
            "Candidate identity resolved"
        );
        *identity = Some(resolved.clone());
        self.ready.store(true, Ordering::Release);
        Ok(resolved)
    }

    /// One reconciliation round: find the holder, campaigning if there is
    /// none, and publish it.
    pub async fn reconcile(&self) -> Result<ResultEvent> {
        let identity = self.setup().await?;

        debug!("Checking election record");
        let record = match self.bounded(self.store.get(&self.config.election)).await {
            Ok(record) => record,
            Err(ElectorError::Store(StoreError::NotFound)) => {
                info!("No existing election record, running campaign");
                self.campaign(&identity).await?
            }
            Err(e) => return Err(e),
        };

        Ok(self.observe(&identity, &record))
    }

    /// Try to create the election record as `identity`.
    ///
    /// Returns the record in force afterwards: ours if we won, the
    /// winner's if we lost.
    pub async fn campaign(&self, identity: &CandidateIdentity) -> Result<ElectionRecord> {
        let _campaign = self.campaign_lock.lock().await;

        // A round that held the lock before us may already have settled it
        match self.bounded(self.store.get(&self.config.election)).await {
            Ok(record) => return Ok(record),
            Err(ElectorError::Store(StoreError::NotFound)) => {}
            Err(e) => return Err(e),
        }

        let record = ElectionRecord::claim(&self.config.election, identity);
        match self.bounded(self.store.create(&record)).await {
            Ok(()) => {
                self.metrics.election_won();
                self.metrics.record_written(RECORD_RESOURCE_TYPE);
                info!("Won election");
                Ok(record)
            }
            Err(ElectorError::Store(e)) if e.is_contention() => {
                self.metrics.election_lost();
                info!(reason = %e, "Lost election");
                self.bounded(self.store.get(&self.config.election)).await
            }
            Err(e) => Err(e),
        }
    }

    fn observe(&self, identity: &CandidateIdentity, record: &ElectionRecord) -> ResultEvent {
        let event = ResultEvent::observed(record.holder_identity.clone());
        debug!(
            holder = %event.holder_identity,
            leader = identity.is_holder(&event.holder_identity),
            "Observed election holder"
        );
        self.results.publish(event.clone());
        event
    }

    /// Run a store call under the per-call deadline
    async fn bounded<T>(
        &self,
        call: impl Future<Output = std::result::Result<T, StoreError>>,
    ) -> Result<T> {
        match time::timeout(self.config.store_timeout, call).await {
            Ok(result) => result.map_err(ElectorError::from),
            Err(_) => Err(ElectorError::Timeout(self.config.store_timeout)),
        }
    }

    async fn open_watch(&self) -> ChangeStream {
        match self.bounded(self.store.watch(&self.config.election)).await {
            Ok(changes) => changes,
            Err(e) => {
                warn!(error = %e, "Unable to watch election record, relying on resync");
                stream::pending().boxed()
            }
        }
    }

    /// Take part in the election until `cancel` fires.
    ///
    /// Only a setup failure or cancellation ends the loop; a failed round
    /// is retried after the retry interval or on the next trigger.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let span = tracing::info_span!(
            "candidate",
            component = "Candidate",
            election = %self.config.election,
            identity = %self.name
        );
        self.run_loop(cancel).instrument(span).await
    }

    async fn run_loop(&self, cancel: CancellationToken) -> Result<()> {
        tokio::select! {
            _ = cancel.cancelled() => return Err(ElectorError::Cancelled),
            identity = self.setup() => { identity?; }
        }

        let mut changes = self.open_watch().await;
        let mut resync = time::interval(self.config.resync_interval);
        resync.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let retry = time::sleep(self.config.retry_interval);
        tokio::pin!(retry);
        let mut retry_armed = false;

        loop {
            let trigger = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Candidate stopping");
                    return Err(ElectorError::Cancelled);
                }
                change = changes.next() => match change {
                    Some(Ok(event)) => Trigger::Change(event),
                    Some(Err(e)) => {
                        warn!(error = %e, "Election watch error");
                        continue;
                    }
                    None => {
                        warn!("Election watch ended, relying on resync");
                        changes = stream::pending().boxed();
                        continue;
                    }
                },
                _ = &mut retry, if retry_armed => Trigger::Retry,
                _ = resync.tick() => Trigger::Resync,
            };
            debug!(?trigger, "Reconciling");

            let round = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Candidate stopping");
                    return Err(ElectorError::Cancelled);
                }
                round = self.reconcile() => round,
            };

            match round {
                Ok(_) => retry_armed = false,
                Err(e) => {
                    if e.is_transient() {
                        warn!(
                            error = %e,
                            retry_in = ?self.config.retry_interval,
                            "Reconciliation failed"
                        );
                    } else {
                        error!(
                            error = %e,
                            retry_in = ?self.config.retry_interval,
                            "Reconciliation failed"
                        );
                    }
                    retry
                        .as_mut()
                        .reset(Instant::now() + self.config.retry_interval);
                    retry_armed = true;
                }
            }
        }
    }
}

impl ReadinessCheck for Candidate {
    fn component(&self) -> &'static str {
        "candidate"
    }

    fn check(&self) -> Result<()> {
        self.ready()
    }
}
