use chrono_tz::Tz;
use dqmirror_core::error::{MirrorError, Result};
use dqmirror_core::host::{HostCategory, MonitoredHost};
use dqmirror_core::model::{GraphRecord, Header, RunRecord};
use dqmirror_store::Store;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::client::TelemetrySource;
use crate::protocol::{MAX_HEADERS_PER_SYNC, RevisionMark};

/// Producer documents other than file analysis carry nothing we mirror.
const PRODUCER_TAG: &str = "analyze_files";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostOutcome {
    NoNewData,
    Synced,
    /// The rest of the host's batch was dropped; the next pass resumes from
    /// the stored cursor.
    Aborted(String),
    /// Shutdown was requested before the batch was done.
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFailure {
    pub id: String,
    pub error: String,
}

#[derive(Debug, Clone)]
pub struct SyncReport {
    pub host: String,
    pub category: HostCategory,
    pub known_rev: i64,
    pub headers: usize,
    pub persisted: usize,
    pub skipped: usize,
    pub failures: Vec<RecordFailure>,
    pub outcome: HostOutcome,
}

impl SyncReport {
    fn new(host: &MonitoredHost) -> Self {
        Self {
            host: host.name.clone(),
            category: host.category,
            known_rev: 0,
            headers: 0,
            persisted: 0,
            skipped: 0,
            failures: Vec::new(),
            outcome: HostOutcome::NoNewData,
        }
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self.outcome, HostOutcome::Aborted(_))
    }

    fn abort(&mut self, err: &MirrorError) {
        warn!(host = %self.host, error = %err, "host pass aborted");
        self.outcome = HostOutcome::Aborted(err.to_string());
    }
}

enum Persisted {
    Stored,
    Skipped,
}

/// One pass over one host: fetch headers past the stored cursor, then fetch
/// and persist each document in order. `shutdown` is checked between headers.
pub async fn sync_host<S: TelemetrySource>(
    source: &S,
    store: &Store,
    host: &MonitoredHost,
    tz: Tz,
    shutdown: &watch::Receiver<bool>,
) -> SyncReport {
    let mut report = SyncReport::new(host);

    report.known_rev = match store.latest_revision(host) {
        Ok(rev) => rev.unwrap_or(0),
        Err(err) => {
            report.abort(&err);
            return report;
        }
    };
    info!(host = %host.name, known_rev = report.known_rev, "updating host");

    let batch = match source.sync(host, report.known_rev).await {
        Ok(batch) => batch,
        Err(err) => {
            report.abort(&err);
            return report;
        }
    };
    report.headers = batch.headers.len();
    if batch.headers.is_empty() {
        debug!(host = %host.name, "no new data");
        return report;
    }
    debug!(
        host = %host.name,
        headers = report.headers,
        total_sent = ?batch.total_sent,
        remote_rev = ?batch.rev.map(RevisionMark::upper),
        "received headers"
    );
    if report.headers >= MAX_HEADERS_PER_SYNC {
        info!(host = %host.name, "batch is full; more headers wait for the next pass");
    }
    report.outcome = HostOutcome::Synced;

    for (i, header) in batch.headers.iter().enumerate() {
        if host.is_producer() && !header.id.contains(PRODUCER_TAG) {
            report.skipped += 1;
            continue;
        }
        if *shutdown.borrow() {
            info!(host = %host.name, done = i, of = report.headers, "stopping mid-batch");
            report.outcome = HostOutcome::Stopped;
            break;
        }
        debug!(host = %host.name, id = %header.id, n = i + 1, of = report.headers, "processing header");

        let document = match fetch_document(source, host, &header.id).await {
            Ok(Some(document)) => document,
            Ok(None) => {
                warn!(host = %host.name, id = %header.id, "no document returned; skipping");
                report.failures.push(RecordFailure {
                    id: header.id.clone(),
                    error: "no document returned".to_string(),
                });
                continue;
            }
            Err(err) => {
                report.abort(&err);
                break;
            }
        };

        match persist(store, host, header, &document, tz) {
            Ok(Persisted::Stored) => report.persisted += 1,
            Ok(Persisted::Skipped) => report.skipped += 1,
            Err(err) => {
                warn!(host = %host.name, id = %header.id, error = %err, "record not stored");
                report.failures.push(RecordFailure {
                    id: header.id.clone(),
                    error: err.to_string(),
                });
            }
        }
    }

    report
}

/// Sequential pass over `hosts`; one failing host never stops the others.
/// Hosts not yet started when `shutdown` flips get no report.
pub async fn sync_hosts<S: TelemetrySource>(
    source: &S,
    store: &Store,
    hosts: &[MonitoredHost],
    tz: Tz,
    shutdown: &watch::Receiver<bool>,
) -> Vec<SyncReport> {
    let mut reports = Vec::with_capacity(hosts.len());
    for host in hosts {
        if *shutdown.borrow() {
            break;
        }
        reports.push(sync_host(source, store, host, tz, shutdown).await);
    }
    reports
}

/// `Ok(None)` when the remote answered but had nothing for `id`.
async fn fetch_document<S: TelemetrySource>(
    source: &S,
    host: &MonitoredHost,
    id: &str,
) -> Result<Option<Value>> {
    let documents = source.documents(host, &[id.to_string()]).await?;
    Ok(documents.into_iter().next())
}

fn persist(
    store: &Store,
    host: &MonitoredHost,
    header: &Header,
    document: &Value,
    tz: Tz,
) -> Result<Persisted> {
    if host.is_producer() {
        match GraphRecord::from_payload(header, document, host, tz)? {
            Some(graph) => store.upsert_graph(&graph).map(|_| Persisted::Stored),
            None => {
                debug!(id = %header.id, "document has no extra section");
                Ok(Persisted::Skipped)
            }
        }
    } else {
        let record = RunRecord::from_payload(header, document, host, tz)?;
        store.upsert_run(&record).map(|_| Persisted::Stored)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use dqmirror_core::config::Mirror;
    use dqmirror_core::query::RunFilters;
    use dqmirror_core::time::DEFAULT_TIMEZONE;
    use serde_json::json;

    use super::*;
    use crate::protocol::SyncResponse;

    /// Serves headers past the requested revision and documents by id.
    #[derive(Default)]
    struct FakeSource {
        headers: Vec<Header>,
        documents: HashMap<String, Value>,
        fail_documents: bool,
        requested: Mutex<Vec<String>>,
    }

    impl TelemetrySource for FakeSource {
        async fn sync(&self, _host: &MonitoredHost, known_rev: i64) -> Result<SyncResponse> {
            Ok(SyncResponse {
                headers: self
                    .headers
                    .iter()
                    .filter(|h| h.rev.unwrap_or(0) > known_rev)
                    .cloned()
                    .collect(),
                rev: None,
                total_sent: None,
            })
        }

        async fn documents(&self, _host: &MonitoredHost, ids: &[String]) -> Result<Vec<Value>> {
            if self.fail_documents {
                return Err(MirrorError::Transport("connection reset".to_string()));
            }
            self.requested.lock().unwrap().extend(ids.iter().cloned());
            Ok(ids
                .iter()
                .filter_map(|id| self.documents.get(id).cloned())
                .collect())
        }

        async fn cluster_status(&self, _mirror: Mirror) -> Result<Value> {
            Ok(json!({}))
        }
    }

    fn header(id: &str, rev: i64, run: i64, host: &str) -> Header {
        Header {
            rev: Some(rev),
            run: Some(run),
            hostname: Some(host.to_string()),
            tag: Some("beam_dqm_sourceclient-live".to_string()),
            timestamp: Some(json!(1666000000.0)),
            ..Header::new(id)
        }
    }

    fn running() -> watch::Receiver<bool> {
        watch::channel(false).1
    }

    fn prefixes() -> Vec<String> {
        vec!["bu".to_string(), "dqmrubu".to_string()]
    }

    #[tokio::test]
    async fn consumer_pass_persists_and_advances_cursor() {
        let store = Store::open_in_memory().unwrap();
        let host = MonitoredHost::new("fu-c2f11-11-01", &prefixes());
        let mut source = FakeSource {
            headers: vec![
                header("a", 3, 100, "fu-c2f11-11-01"),
                header("b", 7, 100, "fu-c2f11-11-01"),
                header("c", 5, 101, "fu-c2f11-11-01"),
            ],
            ..FakeSource::default()
        };
        for id in ["a", "b", "c"] {
            source
                .documents
                .insert(id.to_string(), json!({"exit_code": 0, "events_total": 1}));
        }

        let report = sync_host(&source, &store, &host, DEFAULT_TIMEZONE, &running()).await;
        assert_eq!(report.outcome, HostOutcome::Synced);
        assert_eq!(report.persisted, 3);
        assert_eq!(store.latest_revision(&host).unwrap(), Some(7));

        let again = sync_host(&source, &store, &host, DEFAULT_TIMEZONE, &running()).await;
        assert_eq!(again.known_rev, 7);
        assert_eq!(again.outcome, HostOutcome::NoNewData);
        assert_eq!(store.status().unwrap().runs_count, 3);
    }

    #[tokio::test]
    async fn producer_skips_non_analysis_ids() {
        let store = Store::open_in_memory().unwrap();
        let host = MonitoredHost::new("bu-c2f11-09-01", &prefixes());
        let mut source = FakeSource {
            headers: vec![
                header("dqm-source-state-x", 1, 5, "bu-c2f11-09-01"),
                header("dqm-files-bu-analyze_files-run5", 2, 5, "bu-c2f11-09-01"),
            ],
            ..FakeSource::default()
        };
        source.documents.insert(
            "dqm-files-bu-analyze_files-run5".to_string(),
            json!({"extra": {"streams": {"streamA": {}}, "global_start": 1.0}}),
        );

        let report = sync_host(&source, &store, &host, DEFAULT_TIMEZONE, &running()).await;
        assert_eq!(report.skipped, 1);
        assert_eq!(report.persisted, 1);
        assert_eq!(
            *source.requested.lock().unwrap(),
            vec!["dqm-files-bu-analyze_files-run5".to_string()]
        );
        assert_eq!(store.latest_revision(&host).unwrap(), Some(2));
        assert!(store.graph_for_run(5).unwrap().is_some());
    }

    #[tokio::test]
    async fn record_failures_do_not_stop_the_batch() {
        let store = Store::open_in_memory().unwrap();
        let host = MonitoredHost::new("fu-c2f11-11-01", &prefixes());
        let mut source = FakeSource {
            headers: vec![
                header("bad", 1, 9, "fu-c2f11-11-01"),
                header("good", 2, 9, "fu-c2f11-11-01"),
            ],
            ..FakeSource::default()
        };
        source.documents.insert("bad".to_string(), json!("not an object"));
        source
            .documents
            .insert("good".to_string(), json!({"exit_code": 1}));

        let report = sync_host(&source, &store, &host, DEFAULT_TIMEZONE, &running()).await;
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].id, "bad");
        assert_eq!(report.persisted, 1);
        assert!(!report.is_aborted());

        let bad = store
            .runs_in_range(
                9,
                9,
                RunFilters {
                    bad_only: true,
                    with_lumi_only: false,
                },
            )
            .unwrap();
        assert_eq!(bad.len(), 1);
    }

    #[tokio::test]
    async fn transport_failure_aborts_host_and_keeps_cursor() {
        let store = Store::open_in_memory().unwrap();
        let host = MonitoredHost::new("fu-c2f11-11-01", &prefixes());
        let source = FakeSource {
            headers: vec![header("a", 4, 1, "fu-c2f11-11-01")],
            fail_documents: true,
            ..FakeSource::default()
        };

        let report = sync_host(&source, &store, &host, DEFAULT_TIMEZONE, &running()).await;
        assert!(report.is_aborted());
        assert_eq!(report.persisted, 0);
        assert_eq!(store.latest_revision(&host).unwrap(), None);
    }

    #[tokio::test]
    async fn missing_document_is_skipped_and_later_headers_land() {
        let store = Store::open_in_memory().unwrap();
        let host = MonitoredHost::new("fu-c2f11-11-01", &prefixes());
        let mut source = FakeSource {
            headers: vec![
                header("a", 1, 1, "fu-c2f11-11-01"),
                header("gone", 2, 1, "fu-c2f11-11-01"),
                header("c", 3, 1, "fu-c2f11-11-01"),
            ],
            ..FakeSource::default()
        };
        source.documents.insert("a".to_string(), json!({}));
        source.documents.insert("c".to_string(), json!({}));

        let reports = sync_hosts(
            &source,
            &store,
            &[host.clone()],
            DEFAULT_TIMEZONE,
            &running(),
        )
        .await;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].outcome, HostOutcome::Synced);
        assert_eq!(reports[0].persisted, 2);
        assert_eq!(reports[0].failures.len(), 1);
        assert_eq!(reports[0].failures[0].id, "gone");
        assert_eq!(store.latest_revision(&host).unwrap(), Some(3));

        // the cursor moved past the missing document
        let again = sync_host(&source, &store, &host, DEFAULT_TIMEZONE, &running()).await;
        assert_eq!(again.outcome, HostOutcome::NoNewData);
        assert_eq!(store.status().unwrap().runs_count, 2);
    }

    #[tokio::test]
    async fn shutdown_stops_before_the_next_host() {
        let store = Store::open_in_memory().unwrap();
        let hosts = vec![
            MonitoredHost::new("fu-c2f11-11-01", &prefixes()),
            MonitoredHost::new("fu-c2f11-11-02", &prefixes()),
        ];
        let source = FakeSource {
            headers: vec![header("a", 1, 1, "fu-c2f11-11-01")],
            ..FakeSource::default()
        };
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();

        let reports = sync_hosts(&source, &store, &hosts, DEFAULT_TIMEZONE, &rx).await;
        assert!(reports.is_empty());
        assert!(source.requested.lock().unwrap().is_empty());
    }
}
