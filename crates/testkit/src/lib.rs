//! Fixtures and an in-process stand-in for the remote telemetry gateway.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use axum::extract::{Query, State};
use axum::http::header::COOKIE;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};

pub fn consumer_header(id: &str, host: &str, rev: i64, run: i64) -> Value {
    json!({
        "_id": id,
        "_rev": rev,
        "run": run,
        "hostname": host,
        "tag": "beam_dqm_sourceclient-live",
        "type": "dqm-source-state",
        "timestamp": 1666000000.25,
    })
}

pub fn consumer_document(exit_code: i64, events_total: i64) -> Value {
    json!({
        "exit_code": exit_code,
        "events_total": events_total,
        "events_rate": 12.5,
        "cmssw_run": 358788,
        "cmssw_lumi": 4,
        "cmdline": [
            "cmsRun",
            "/dqmdata/dqm_cmssw/current_production/CMSSW_13_0_3/src/beam_dqm_sourceclient-live_cfg.py",
            "runInputDir=/tmp",
            "runkey=pp_run"
        ],
        "fi_state": "running",
        "extra": {
            "ps_info": {"VmRSS": "1563224 kB"},
            "stdlog_start": ["%MSG-i start\n", "begin processing\n"],
            "stdlog_end": ["end processing\n"]
        }
    })
}

pub fn producer_header(host: &str, rev: i64, run: i64) -> Value {
    json!({
        "_id": format!("dqm-files-{host}-analyze_files-run{run}"),
        "_rev": rev,
        "run": run,
        "hostname": host,
        "tag": "analyze_files",
        "type": "dqm-files",
        "timestamp": 1579729985.921526,
    })
}

pub fn producer_document(run: i64) -> Value {
    json!({
        "run": run,
        "extra": {
            "global_start": 1579722020.7529602,
            "global_start_source": "global_file",
            "timestamp": 1579729985.921526,
            "lumi": 23.31,
            "streams": {
                "streamDQM": {"lumis": [1, 2, 3], "mtimes": [10.0, 33.5, 56.1], "evt_processed": [100, 120, 90]},
                "streamDQMHistograms": {"lumis": [1, 2], "mtimes": [11.0, 34.0], "evt_processed": [0, 0]}
            }
        }
    })
}

#[derive(Default)]
struct StubHost {
    headers: Vec<Value>,
    documents: HashMap<String, Value>,
}

#[derive(Default)]
struct StubData {
    gateway: String,
    secret: Option<(String, String)>,
    hosts: HashMap<String, StubHost>,
    clusters: HashMap<String, Value>,
    failing: HashSet<String>,
    requests: Vec<String>,
}

/// Serves the `sync_proxy`, `redirect` and `cr/exe` endpoints from in-memory
/// records. Cloning shares the same data.
#[derive(Clone, Default)]
pub struct StubRemote {
    inner: Arc<Mutex<StubData>>,
}

#[derive(Deserialize)]
struct RedirectParams {
    path: String,
    #[allow(dead_code)]
    port: Option<u16>,
}

#[derive(Deserialize)]
struct ClusterParams {
    cluster: String,
    what: String,
}

#[derive(Deserialize)]
struct Envelope {
    messages: Vec<String>,
}

impl StubRemote {
    pub fn new(gateway: &str) -> Self {
        let stub = Self::default();
        stub.data().gateway = gateway.to_string();
        stub
    }

    pub fn with_secret(self, name: &str, value: &str) -> Self {
        self.data().secret = Some((name.to_string(), value.to_string()));
        self
    }

    pub fn add_record(&self, host: &str, header: Value, document: Value) {
        let mut data = self.data();
        let entry = data.hosts.entry(host.to_string()).or_default();
        if let Some(id) = header.get("_id").and_then(Value::as_str) {
            entry.documents.insert(id.to_string(), document);
        }
        entry.headers.push(header);
    }

    pub fn set_cluster_status(&self, cluster: &str, status: Value) {
        self.data().clusters.insert(cluster.to_string(), status);
    }

    /// Every request for `host` answers 502 from now on.
    pub fn fail_host(&self, host: &str) {
        self.data().failing.insert(host.to_string());
    }

    /// `host:event` for every request served so far.
    pub fn requests(&self) -> Vec<String> {
        self.data().requests.clone()
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/sync_proxy", post(gateway_handler))
            .route("/redirect", post(redirect_handler))
            .route("/cr/exe", get(cluster_handler))
            .with_state(self.clone())
    }

    pub async fn spawn(&self) -> anyhow::Result<SocketAddr> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let router = self.router();
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        Ok(addr)
    }

    fn data(&self) -> MutexGuard<'_, StubData> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        let data = self.data();
        let Some((name, value)) = &data.secret else {
            return true;
        };
        let expected = format!("{name}={value}");
        headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .any(|pair| pair.trim() == expected)
    }

    fn answer(&self, host: &str, headers: &HeaderMap, body: &str) -> (StatusCode, Json<Value>) {
        if !self.authorized(headers) {
            return (StatusCode::FORBIDDEN, Json(json!({"error": "forbidden"})));
        }
        let Some(inner) = serde_json::from_str::<Envelope>(body)
            .ok()
            .and_then(|env| env.messages.into_iter().next())
            .and_then(|msg| serde_json::from_str::<Value>(&msg).ok())
        else {
            return (StatusCode::BAD_REQUEST, Json(json!({"error": "bad envelope"})));
        };
        let event = inner
            .get("event")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let mut data = self.data();
        data.requests.push(format!("{host}:{event}"));
        if data.failing.contains(host) {
            return (StatusCode::BAD_GATEWAY, Json(json!({"error": "unreachable"})));
        }
        let stub_host = data.hosts.entry(host.to_string()).or_default();

        let payload = match event.as_str() {
            "sync_request" => {
                let known_rev = match inner.get("known_rev") {
                    Some(Value::Number(n)) => n.as_i64().unwrap_or(0),
                    Some(Value::String(s)) => s.parse().unwrap_or(0),
                    _ => 0,
                };
                let mut newer: Vec<Value> = stub_host
                    .headers
                    .iter()
                    .filter(|h| rev_of(h) > known_rev)
                    .cloned()
                    .collect();
                newer.sort_by_key(rev_of);
                newer.truncate(1000);
                let last = newer.last().map(rev_of).unwrap_or(known_rev);
                json!({"headers": newer, "rev": [known_rev, last], "total_sent": newer.len()})
            }
            "request_documents" => {
                let documents: Vec<Value> = inner
                    .get("ids")
                    .and_then(Value::as_array)
                    .into_iter()
                    .flatten()
                    .filter_map(Value::as_str)
                    .filter_map(|id| stub_host.documents.get(id).cloned())
                    .collect();
                json!({"documents": documents})
            }
            _ => return (StatusCode::BAD_REQUEST, Json(json!({"error": "unknown event"}))),
        };

        (
            StatusCode::OK,
            Json(json!({"messages": [payload.to_string()]})),
        )
    }
}

fn rev_of(header: &Value) -> i64 {
    header.get("_rev").and_then(Value::as_i64).unwrap_or(0)
}

async fn gateway_handler(
    State(stub): State<StubRemote>,
    headers: HeaderMap,
    body: String,
) -> (StatusCode, Json<Value>) {
    let gateway = stub.data().gateway.clone();
    stub.answer(&gateway, &headers, &body)
}

async fn redirect_handler(
    State(stub): State<StubRemote>,
    Query(params): Query<RedirectParams>,
    headers: HeaderMap,
    body: String,
) -> (StatusCode, Json<Value>) {
    stub.answer(&params.path, &headers, &body)
}

async fn cluster_handler(
    State(stub): State<StubRemote>,
    Query(params): Query<ClusterParams>,
) -> (StatusCode, Json<Value>) {
    if params.what != "get_cluster_status" {
        return (StatusCode::BAD_REQUEST, Json(json!({"error": "unknown action"})));
    }
    let mut data = stub.data();
    data.requests
        .push(format!("{}:get_cluster_status", params.cluster));
    match data.clusters.get(&params.cluster) {
        Some(status) => (StatusCode::OK, Json(status.clone())),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "unknown cluster"})),
        ),
    }
}
