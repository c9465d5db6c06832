//! Election results as produced by candidates and served to consumers

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// One observation of the current holder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultEvent {
    pub holder_identity: String,
    pub observed_at: DateTime<Utc>,
}

impl ResultEvent {
    /// An observation made now
    pub fn observed(holder_identity: impl Into<String>) -> Self {
        Self {
            holder_identity: holder_identity.into(),
            observed_at: Utc::now(),
        }
    }
}

/// Externally visible election state: holder and time of last change.
///
/// Empty fields are omitted, so a view with no result serializes as `{}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastView {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_update: String,
}

impl BroadcastView {
    /// Whether no election result has been recorded yet
    pub fn is_empty(&self) -> bool {
        self.name.is_empty()
    }
}

impl From<&ResultEvent> for BroadcastView {
    fn from(event: &ResultEvent) -> Self {
        Self {
            name: event.holder_identity.clone(),
            last_update: event.observed_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_empty_view_serializes_without_fields() {
        let view = BroadcastView::default();
        assert!(view.is_empty());
        assert_eq!(serde_json::to_string(&view).unwrap(), "{}");
    }

    #[test]
    fn test_view_from_event() {
        let event = ResultEvent {
            holder_identity: "app-0".to_string(),
            observed_at: Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 5).unwrap(),
        };
        let view = BroadcastView::from(&event);

        assert_eq!(view.name, "app-0");
        assert_eq!(view.last_update, "2024-03-01T12:30:05Z");
        assert_eq!(
            serde_json::to_string(&view).unwrap(),
            r#"{"name":"app-0","last_update":"2024-03-01T12:30:05Z"}"#
        );
    }
}
