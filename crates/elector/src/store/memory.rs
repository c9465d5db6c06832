//! In-process election store
//!
//! Shared between several candidates to simulate a cluster. Every
//! operation takes one lock, which gives the same create-if-absent
//! guarantee a real coordination service provides.

use crate::{
    error::StoreError,
    store::{ChangeStream, ElectionStore, StoreEvent, StoreResult},
};
use async_trait::async_trait;
use elector_types::{CandidateIdentity, ElectionKey, ElectionRecord, OwnerReference};
use futures::StreamExt;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};

const EVENT_BUFFER: usize = 64;

#[derive(Default)]
struct State {
    records: HashMap<ElectionKey, ElectionRecord>,
    unknown_identities: HashSet<String>,
    failing_gets: usize,
    failing_creates: usize,
    latency: Option<Duration>,
    gets: usize,
    creates: usize,
}

/// Clonable handle to one in-memory store
#[derive(Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
    events: broadcast::Sender<(ElectionKey, StoreEvent)>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            state: Arc::new(Mutex::new(State::default())),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A panic while holding the lock leaves the maps consistent
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn notify(&self, key: &ElectionKey, event: StoreEvent) {
        // No subscribers is fine
        let _ = self.events.send((key.clone(), event));
    }

    /// Current record under `key`, bypassing fault injection
    pub fn record(&self, key: &ElectionKey) -> Option<ElectionRecord> {
        self.lock().records.get(key).cloned()
    }

    /// Write a record directly, as an operator or another system would
    pub fn insert(&self, record: ElectionRecord) {
        let key = record.key.clone();
        let previous = self.lock().records.insert(key.clone(), record.clone());
        match previous {
            Some(_) => self.notify(&key, StoreEvent::Updated(record)),
            None => self.notify(&key, StoreEvent::Created(record)),
        }
    }

    /// Delete the record under `key`
    pub fn delete(&self, key: &ElectionKey) -> Option<ElectionRecord> {
        let removed = self.lock().records.remove(key);
        if removed.is_some() {
            self.notify(key, StoreEvent::Deleted(key.clone()));
        }
        removed
    }

    /// Garbage-collect every record owned by `owner_name`, as happens when
    /// the owning runtime unit is removed
    pub fn delete_owned_by(&self, owner_name: &str) -> Vec<ElectionKey> {
        let removed: Vec<ElectionKey> = {
            let mut state = self.lock();
            let owned: Vec<ElectionKey> = state
                .records
                .values()
                .filter(|record| {
                    record
                        .owner_reference
                        .as_ref()
                        .is_some_and(|owner| owner.name == owner_name)
                })
                .map(|record| record.key.clone())
                .collect();
            for key in &owned {
                state.records.remove(key);
            }
            owned
        };

        for key in &removed {
            self.notify(key, StoreEvent::Deleted(key.clone()));
        }
        removed
    }

    /// Make `resolve_self` fail for `name`
    pub fn forget_identity(&self, name: impl Into<String>) {
        self.lock().unknown_identities.insert(name.into());
    }

    /// Fail the next `count` reads with `StoreError::Unavailable`
    pub fn fail_next_gets(&self, count: usize) {
        self.lock().failing_gets = count;
    }

    /// Fail the next `count` creates with `StoreError::Unavailable`
    pub fn fail_next_creates(&self, count: usize) {
        self.lock().failing_creates = count;
    }

    /// Delay every call by `latency`
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.lock().latency = latency;
    }

    /// Number of `get` calls served, failed ones included
    pub fn get_calls(&self) -> usize {
        self.lock().gets
    }

    /// Number of `create` calls served, failed ones included
    pub fn create_calls(&self) -> usize {
        self.lock().creates
    }

    async fn simulate_latency(&self) {
        let latency = self.lock().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl ElectionStore for MemoryStore {
    async fn get(&self, key: &ElectionKey) -> StoreResult<ElectionRecord> {
        self.simulate_latency().await;

        let mut state = self.lock();
        state.gets += 1;
        if state.failing_gets > 0 {
            state.failing_gets -= 1;
            return Err(StoreError::unavailable("injected read failure"));
        }
        state.records.get(key).cloned().ok_or(StoreError::NotFound)
    }

    async fn create(&self, record: &ElectionRecord) -> StoreResult<()> {
        self.simulate_latency().await;

        {
            let mut state = self.lock();
            state.creates += 1;
            if state.failing_creates > 0 {
                state.failing_creates -= 1;
                return Err(StoreError::unavailable("injected write failure"));
            }
            if state.records.contains_key(&record.key) {
                return Err(StoreError::AlreadyExists);
            }
            state.records.insert(record.key.clone(), record.clone());
        }

        self.notify(&record.key, StoreEvent::Created(record.clone()));
        Ok(())
    }

    async fn watch(&self, key: &ElectionKey) -> StoreResult<ChangeStream> {
        let key = key.clone();
        let stream = BroadcastStream::new(self.events.subscribe()).filter_map(move |item| {
            let event = match item {
                Ok((changed, event)) if changed == key => Some(Ok(event)),
                Ok(_) => None,
                Err(BroadcastStreamRecvError::Lagged(_)) => Some(Ok(StoreEvent::Resynced)),
            };
            futures::future::ready(event)
        });
        Ok(stream.boxed())
    }

    async fn resolve_self(&self, key: &ElectionKey, name: &str) -> StoreResult<CandidateIdentity> {
        self.simulate_latency().await;

        if self.lock().unknown_identities.contains(name) {
            return Err(StoreError::NotFound);
        }
        Ok(CandidateIdentity::new(
            name,
            OwnerReference {
                api_version: "v1".to_string(),
                kind: "Pod".to_string(),
                name: name.to_string(),
                uid: format!("{}-{}", key.namespace, name),
            },
        ))
    }
}
