//! On-the-wire task representation (spec.md §6).
//!
//! This is the JSON object actually stored in the key-value store, distinct
//! from [`flowforge_shared::models::Task`]: it carries `queued_on` both as
//! an ISO-8601 string (for readability/compat) and as a Unix timestamp
//! (`queued_on_ts`) so the queue store can sort organizations by score
//! without re-parsing a timestamp string on every push/pop.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireTask {
    #[serde(rename = "type")]
    pub kind: String,
    pub org_id: i64,
    pub task: Value,
    /// Unix timestamp (seconds) mirroring `queued_on`, used as the sort key
    /// for the active-orgs structure.
    pub queued_on_ts: i64,
}

impl WireTask {
    pub fn new(kind: impl Into<String>, org_id: i64, task: Value, queued_on: DateTime<Utc>) -> Self {
        Self {
            kind: kind.into(),
            org_id,
            task,
            queued_on_ts: queued_on.timestamp(),
        }
    }

    pub fn queued_on(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.queued_on_ts, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json_with_type_rename() {
        let wire = WireTask::new("start_flow", 7, serde_json::json!({"a": 1}), Utc::now());
        let encoded = serde_json::to_string(&wire).unwrap();
        assert!(encoded.contains("\"type\":\"start_flow\""));
        let decoded: WireTask = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.kind, "start_flow");
        assert_eq!(decoded.org_id, 7);
    }
}
