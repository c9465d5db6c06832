//! Coordination store contract
//!
//! The candidate only needs four things from the store: read the election
//! record, create it if absent, watch it for changes and resolve the
//! running process's own identity. Atomicity of create-if-absent is the
//! store's job; everything built on top assumes it holds.

pub mod lease;
pub mod memory;

pub use lease::LeaseStore;
pub use memory::MemoryStore;

use crate::error::StoreError;
use async_trait::async_trait;
use elector_types::{CandidateIdentity, ElectionKey, ElectionRecord};
use futures::stream::BoxStream;

/// Result type for store calls
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Best-effort change feed for one election key
pub type ChangeStream = BoxStream<'static, StoreResult<StoreEvent>>;

/// Change notification for a watched election key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    Created(ElectionRecord),
    Updated(ElectionRecord),
    Deleted(ElectionKey),
    /// The feed restarted or lagged; notifications may have been missed
    Resynced,
}

/// Strongly consistent record service holding the election record
#[async_trait]
pub trait ElectionStore: Send + Sync {
    /// Read the record, `StoreError::NotFound` if absent
    async fn get(&self, key: &ElectionKey) -> StoreResult<ElectionRecord>;

    /// Atomically create the record unless one exists
    async fn create(&self, record: &ElectionRecord) -> StoreResult<()>;

    /// Subscribe to changes of the record under `key`
    async fn watch(&self, key: &ElectionKey) -> StoreResult<ChangeStream>;

    /// Resolve the identity named `name` taking part in the election under
    /// `key`, including the owner handle used for record garbage collection
    async fn resolve_self(&self, key: &ElectionKey, name: &str) -> StoreResult<CandidateIdentity>;
}
