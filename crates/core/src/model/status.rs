use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{MirrorError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HostReport {
    pub up: bool,
    #[serde(alias = "msg")]
    pub message: String,
}

/// Aggregate up/down report for every host of one cluster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ClusterStatus(pub BTreeMap<String, HostReport>);

impl ClusterStatus {
    /// Strict: a malformed report must not be recorded.
    pub fn parse(value: Value) -> Result<Self> {
        if !value.is_object() {
            return Err(MirrorError::Payload(
                "cluster status is not a mapping".to_string(),
            ));
        }
        let hosts: BTreeMap<String, HostReport> = serde_json::from_value(value)
            .map_err(|e| MirrorError::Payload(format!("bad cluster status entry: {e}")))?;
        if hosts.is_empty() {
            return Err(MirrorError::Payload("cluster status is empty".to_string()));
        }
        Ok(Self(hosts))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &HostReport)> {
        self.0.iter()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HostStatusRow {
    pub hostname: String,
    pub is_up: bool,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn accepts_msg_alias() {
        let status = ClusterStatus::parse(json!({
            "fu-c2f11-11-01": {"up": true, "msg": "ok"},
            "fu-c2f11-11-02": {"up": false, "message": "ssh timeout"}
        }))
        .unwrap();
        assert_eq!(status.len(), 2);
        assert_eq!(status.0["fu-c2f11-11-01"].message, "ok");
        assert!(!status.0["fu-c2f11-11-02"].up);
    }

    #[test]
    fn rejects_malformed_reports() {
        assert!(ClusterStatus::parse(json!({})).is_err());
        assert!(ClusterStatus::parse(json!([1])).is_err());
        assert!(ClusterStatus::parse(json!({"h": {"up": true}})).is_err());
        assert!(ClusterStatus::parse(json!({"h": {"msg": "x"}})).is_err());
        assert!(ClusterStatus::parse(json!({"h": "up"})).is_err());
    }
}
