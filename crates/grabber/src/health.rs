use chrono::Utc;
use dqmirror_core::config::Mirror;
use dqmirror_core::error::Result;
use dqmirror_core::model::ClusterStatus;
use dqmirror_store::Store;
use tracing::debug;

use crate::client::TelemetrySource;

/// Fetches one cluster report and appends it to the host status history.
/// Nothing is written unless the whole report is well formed.
pub async fn poll_cluster<S: TelemetrySource>(
    source: &S,
    store: &Store,
    mirror: Mirror,
) -> Result<usize> {
    debug!(cluster = %mirror, "requesting cluster status");
    let raw = source.cluster_status(mirror).await?;
    let status = ClusterStatus::parse(raw)?;
    store.record_host_status(&status, Utc::now())?;
    debug!(cluster = %mirror, hosts = status.len(), "recorded cluster status");
    Ok(status.len())
}

#[cfg(test)]
mod tests {
    use dqmirror_core::error::MirrorError;
    use dqmirror_core::host::MonitoredHost;
    use serde_json::{Value, json};

    use super::*;
    use crate::protocol::SyncResponse;

    struct StaticStatus(Value);

    impl TelemetrySource for StaticStatus {
        async fn sync(&self, _host: &MonitoredHost, _known_rev: i64) -> Result<SyncResponse> {
            Err(MirrorError::Internal("unused".to_string()))
        }

        async fn documents(&self, _host: &MonitoredHost, _ids: &[String]) -> Result<Vec<Value>> {
            Err(MirrorError::Internal("unused".to_string()))
        }

        async fn cluster_status(&self, _mirror: Mirror) -> Result<Value> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn valid_report_is_recorded() {
        let store = Store::open_in_memory().unwrap();
        let source = StaticStatus(json!({
            "dqmfu-c2b01-45-01": {"up": true, "msg": ""},
            "dqmfu-c2b02-45-01": {"up": false, "msg": "ssh failed"}
        }));
        let hosts = poll_cluster(&source, &store, Mirror::Playback).await.unwrap();
        assert_eq!(hosts, 2);
        let latest = store.latest_host_statuses().unwrap();
        assert_eq!(latest.len(), 2);
        assert!(!latest[1].is_up);
    }

    #[tokio::test]
    async fn malformed_report_writes_nothing() {
        let store = Store::open_in_memory().unwrap();
        for bad in [
            json!({}),
            json!({"h": {"up": true}}),
            json!({"a": {"up": true, "msg": "ok"}, "b": {"msg": "no flag"}}),
        ] {
            let res = poll_cluster(&StaticStatus(bad), &store, Mirror::Production).await;
            assert!(matches!(res, Err(MirrorError::Payload(_))));
        }
        assert_eq!(store.status().unwrap().host_status_count, 0);
    }
}
