//! Election record and candidate identity types

use crate::error::{TypeError, TypeResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

const MAX_NAME_LENGTH: usize = 253;

/// Scope and name identifying one election
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ElectionKey {
    /// Scope the election record lives in (a Kubernetes namespace)
    pub namespace: String,
    /// Name of the election record
    pub name: String,
}

impl ElectionKey {
    /// Create a new election key
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Check that both parts are present and usable as object names
    pub fn validate(&self) -> TypeResult<()> {
        validate_name("election namespace", &self.namespace)?;
        validate_name("election name", &self.name)
    }
}

impl fmt::Display for ElectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// DNS-1123 subdomain check, the naming rule for namespaced objects
fn validate_name(field: &'static str, value: &str) -> TypeResult<()> {
    if value.is_empty() {
        return Err(TypeError::Empty(field));
    }

    let invalid = |reason| TypeError::InvalidName {
        field,
        value: value.to_string(),
        reason,
    };

    if value.len() > MAX_NAME_LENGTH {
        return Err(invalid("longer than 253 characters"));
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.')
    {
        return Err(invalid("only lowercase alphanumerics, '-' and '.' are allowed"));
    }
    let alnum = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit();
    if !value.starts_with(alnum) || !value.ends_with(alnum) {
        return Err(invalid("must start and end with an alphanumeric character"));
    }

    Ok(())
}

/// Backlink from an election record to the runtime unit owning it.
///
/// The store garbage-collects the record when the owner is removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerReference {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub uid: String,
}

/// Identity of this process in the election, resolved once at setup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateIdentity {
    /// Stable identity written as the holder when this candidate wins
    pub name: String,
    /// Owner of any record this candidate creates
    pub owner_reference: OwnerReference,
}

impl CandidateIdentity {
    pub fn new(name: impl Into<String>, owner_reference: OwnerReference) -> Self {
        Self {
            name: name.into(),
            owner_reference,
        }
    }

    /// Whether the given holder identity refers to this candidate
    pub fn is_holder(&self, holder_identity: &str) -> bool {
        self.name == holder_identity
    }
}

/// The distributed lock object. Its existence designates the leader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElectionRecord {
    pub key: ElectionKey,
    pub holder_identity: String,
    pub acquire_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_reference: Option<OwnerReference>,
}

impl ElectionRecord {
    /// Build the record a candidate submits when campaigning
    pub fn claim(key: &ElectionKey, candidate: &CandidateIdentity) -> Self {
        Self {
            key: key.clone(),
            holder_identity: candidate.name.clone(),
            acquire_time: Utc::now(),
            owner_reference: Some(candidate.owner_reference.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner() -> OwnerReference {
        OwnerReference {
            api_version: "v1".to_string(),
            kind: "Pod".to_string(),
            name: "app-0".to_string(),
            uid: "4f1c".to_string(),
        }
    }

    #[test]
    fn test_key_display() {
        let key = ElectionKey::new("team", "app");
        assert_eq!(key.to_string(), "team/app");
    }

    #[test]
    fn test_key_validation() {
        assert!(ElectionKey::new("team", "app.leader-1").validate().is_ok());
        assert_eq!(
            ElectionKey::new("", "app").validate(),
            Err(TypeError::Empty("election namespace"))
        );
        assert_eq!(
            ElectionKey::new("team", "").validate(),
            Err(TypeError::Empty("election name"))
        );
        assert!(ElectionKey::new("team", "App").validate().is_err());
        assert!(ElectionKey::new("team", "-app").validate().is_err());
        assert!(ElectionKey::new("team", &"a".repeat(254)).validate().is_err());
    }

    #[test]
    fn test_claim_uses_candidate_identity() {
        let key = ElectionKey::new("team", "app");
        let candidate = CandidateIdentity::new("app-0", owner());
        let record = ElectionRecord::claim(&key, &candidate);

        assert_eq!(record.key, key);
        assert_eq!(record.holder_identity, "app-0");
        assert_eq!(record.owner_reference, Some(owner()));
        assert!(candidate.is_holder(&record.holder_identity));
        assert!(!candidate.is_holder("app-1"));
    }

    #[test]
    fn test_owner_reference_wire_names() {
        let json = serde_json::to_value(owner()).unwrap();
        assert_eq!(json["apiVersion"], "v1");
        assert_eq!(json["uid"], "4f1c");
    }
}
