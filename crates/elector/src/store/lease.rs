//! Kubernetes `Lease` backed election store

use crate::{
    error::StoreError,
    store::{ChangeStream, ElectionStore, StoreEvent, StoreResult},
};
use async_trait::async_trait;
use chrono::Utc;
use elector_types::{CandidateIdentity, ElectionKey, ElectionRecord, OwnerReference};
use futures::StreamExt;
use k8s_openapi::{
    api::{
        coordination::v1::{Lease, LeaseSpec},
        core::v1::Pod,
    },
    apimachinery::pkg::apis::meta::v1::{self as meta, MicroTime, ObjectMeta},
};
use kube::{
    api::{Api, PostParams},
    client::Client,
    runtime::{watcher, WatchStreamExt},
};

/// Election records stored as `coordination.k8s.io/v1` Leases
#[derive(Clone)]
pub struct LeaseStore {
    client: Client,
}

impl LeaseStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn leases(&self, namespace: &str) -> Api<Lease> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// Translate a Lease into an election record
pub fn record_from_lease(key: &ElectionKey, lease: Lease) -> StoreResult<ElectionRecord> {
    let spec = lease.spec.unwrap_or_default();
    let holder_identity = spec
        .holder_identity
        .filter(|holder| !holder.is_empty())
        .ok_or_else(|| StoreError::unavailable(format!("lease {} has no holder identity", key)))?;

    let acquire_time = spec
        .acquire_time
        .map(|time| time.0)
        .or(lease.metadata.creation_timestamp.map(|time| time.0))
        .unwrap_or_else(Utc::now);

    let owner_reference = lease
        .metadata
        .owner_references
        .unwrap_or_default()
        .into_iter()
        .next()
        .map(|owner| OwnerReference {
            api_version: owner.api_version,
            kind: owner.kind,
            name: owner.name,
            uid: owner.uid,
        });

    Ok(ElectionRecord {
        key: key.clone(),
        holder_identity,
        acquire_time,
        owner_reference,
    })
}

/// Build the Lease submitted for an election record
pub fn lease_from_record(record: &ElectionRecord) -> Lease {
    let owner_references = record.owner_reference.as_ref().map(|owner| {
        vec![meta::OwnerReference {
            api_version: owner.api_version.clone(),
            kind: owner.kind.clone(),
            name: owner.name.clone(),
            uid: owner.uid.clone(),
            ..Default::default()
        }]
    });

    Lease {
        metadata: ObjectMeta {
            name: Some(record.key.name.clone()),
            namespace: Some(record.key.namespace.clone()),
            owner_references,
            ..Default::default()
        },
        spec: Some(LeaseSpec {
            holder_identity: Some(record.holder_identity.clone()),
            acquire_time: Some(MicroTime(record.acquire_time)),
            ..Default::default()
        }),
    }
}

#[async_trait]
impl ElectionStore for LeaseStore {
    async fn get(&self, key: &ElectionKey) -> StoreResult<ElectionRecord> {
        let lease = self.leases(&key.namespace).get(&key.name).await?;
        record_from_lease(key, lease)
    }

    async fn create(&self, record: &ElectionRecord) -> StoreResult<()> {
        let lease = lease_from_record(record);
        self.leases(&record.key.namespace)
            .create(&PostParams::default(), &lease)
            .await?;
        tracing::debug!(election = %record.key, "Created Lease");
        Ok(())
    }

    async fn watch(&self, key: &ElectionKey) -> StoreResult<ChangeStream> {
        let config = watcher::Config::default().fields(&format!("metadata.name={}", key.name));
        let key = key.clone();

        let stream = watcher(self.leases(&key.namespace), config)
            .default_backoff()
            .map(move |event| match event {
                Ok(watcher::Event::Applied(lease)) => {
                    record_from_lease(&key, lease).map(StoreEvent::Updated)
                }
                Ok(watcher::Event::Deleted(_)) => Ok(StoreEvent::Deleted(key.clone())),
                Ok(watcher::Event::Restarted(_)) => Ok(StoreEvent::Resynced),
                Err(err) => Err(StoreError::unavailable(err.to_string())),
            });

        Ok(stream.boxed())
    }

    async fn resolve_self(&self, key: &ElectionKey, name: &str) -> StoreResult<CandidateIdentity> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &key.namespace);
        let pod = pods.get(name).await?;

        let uid = pod
            .metadata
            .uid
            .ok_or_else(|| StoreError::unavailable(format!("pod {} has no uid", name)))?;

        Ok(CandidateIdentity::new(
            name,
            OwnerReference {
                api_version: "v1".to_string(),
                kind: "Pod".to_string(),
                name: pod.metadata.name.unwrap_or_else(|| name.to_string()),
                uid,
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

    fn key() -> ElectionKey {
        ElectionKey::new("team", "app")
    }

    fn record() -> ElectionRecord {
        ElectionRecord::claim(
            &key(),
            &CandidateIdentity::new(
                "app-0",
                OwnerReference {
                    api_version: "v1".to_string(),
                    kind: "Pod".to_string(),
                    name: "app-0".to_string(),
                    uid: "9a2e".to_string(),
                },
            ),
        )
    }

    #[test]
    fn test_lease_from_record() {
        let lease = lease_from_record(&record());

        assert_eq!(lease.metadata.name.as_deref(), Some("app"));
        assert_eq!(lease.metadata.namespace.as_deref(), Some("team"));
        let owners = lease.metadata.owner_references.clone().unwrap();
        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].kind, "Pod");
        assert_eq!(owners[0].uid, "9a2e");
        assert_eq!(
            lease.spec.unwrap().holder_identity.as_deref(),
            Some("app-0")
        );
    }

    #[test]
    fn test_record_survives_lease_translation() {
        let original = record();
        let translated = record_from_lease(&key(), lease_from_record(&original)).unwrap();
        assert_eq!(translated, original);
    }

    #[test]
    fn test_lease_without_holder_is_rejected() {
        let lease = Lease {
            metadata: ObjectMeta {
                name: Some("app".to_string()),
                ..Default::default()
            },
            spec: Some(LeaseSpec::default()),
        };
        assert!(matches!(
            record_from_lease(&key(), lease),
            Err(StoreError::Unavailable(_))
        ));
    }

    #[test]
    fn test_acquire_time_falls_back_to_creation() {
        let created = Utc::now() - chrono::Duration::minutes(5);
        let lease = Lease {
            metadata: ObjectMeta {
                name: Some("app".to_string()),
                creation_timestamp: Some(Time(created)),
                ..Default::default()
            },
            spec: Some(LeaseSpec {
                holder_identity: Some("app-1".to_string()),
                ..Default::default()
            }),
        };

        let record = record_from_lease(&key(), lease).unwrap();
        assert_eq!(record.holder_identity, "app-1");
        assert_eq!(record.acquire_time, created);
        assert!(record.owner_reference.is_none());
    }
}
