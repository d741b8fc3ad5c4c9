use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::{Query, State};
use axum::http::{Method, StatusCode};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use chrono_tz::Tz;
use dqmirror_core::config::Mirror;
use dqmirror_core::error::{MirrorError, Result};
use dqmirror_core::query::{
    ClusterResponse, GraphResponse, LogsResponse, RunFilters, RunView, TimelineResponse,
};
use dqmirror_core::view::{
    censored_graph, cluster_overview, join_log_lines, mirror_snapshot, short_client_names,
    timeline,
};
use dqmirror_store::Store;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::Level;

use crate::protocol::{ApiRequest, ApiResponse};

#[derive(Clone)]
pub struct QueryState {
    stores: Arc<HashMap<Mirror, Store>>,
    tz: Tz,
}

impl QueryState {
    pub fn new(stores: HashMap<Mirror, Store>, tz: Tz) -> Self {
        Self {
            stores: Arc::new(stores),
            tz,
        }
    }
}

pub fn router(state: QueryState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS]);
    Router::new()
        .route("/api", get(api))
        .route("/dqm/dqm-square-k8/api", get(api))
        .layer(cors)
        .layer(
            TraceLayer::new_for_http()
                .on_request(tower_http::trace::DefaultOnRequest::new().level(Level::DEBUG))
                .on_response(tower_http::trace::DefaultOnResponse::new().level(Level::INFO)),
        )
        .with_state(state)
}

pub async fn run_query_http_server(
    state: QueryState,
    addr: SocketAddr,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind query http listener {addr}"))?;
    tracing::info!(%addr, "query api listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
        })
        .await
        .context("query http server")?;
    Ok(())
}

async fn api(
    State(state): State<QueryState>,
    Query(params): Query<HashMap<String, String>>,
) -> (StatusCode, Json<ApiResponse>) {
    let selector = params.get("db").map(String::as_str).unwrap_or_default();
    let resolved = Mirror::from_selector(selector).and_then(|mirror| {
        let req = ApiRequest::from_params(&params)?;
        Ok((mirror, req))
    });
    let (mirror, req) = match resolved {
        Ok(v) => v,
        Err(err) => return error_response(StatusCode::BAD_REQUEST, &err),
    };
    let Some(store) = state.stores.get(&mirror) else {
        let err = MirrorError::InvalidArgument(format!("{mirror} mirror is not served here"));
        return error_response(StatusCode::NOT_FOUND, &err);
    };

    tracing::debug!(%mirror, what = req.what(), "query");
    match handle_request(req, store, state.tz) {
        Ok(resp) => (StatusCode::OK, Json(resp)),
        Err(err) => {
            tracing::warn!(%mirror, error = %err, "query failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, &err)
        }
    }
}

fn error_response(status: StatusCode, err: &MirrorError) -> (StatusCode, Json<ApiResponse>) {
    (status, Json(ApiResponse::Error(err.to_string())))
}

pub fn handle_request(req: ApiRequest, store: &Store, tz: Tz) -> Result<ApiResponse> {
    match req {
        ApiRequest::Run { run } => {
            let rows = store.runs_in_range(run, run, RunFilters::default())?;
            let (next, prev) = store.adjacent_runs(run)?;
            Ok(ApiResponse::Run(RunView {
                run,
                next,
                prev,
                snapshot: mirror_snapshot(&rows, Utc::now()),
            }))
        }
        ApiRequest::Graph { run } => {
            let graph = store.graph_for_run(run)?.map(censored_graph);
            Ok(ApiResponse::Graph(GraphResponse { graph }))
        }
        ApiRequest::Runs(r) => {
            let rows = store.runs_in_range(r.range.from, r.range.to, r.filters)?;
            Ok(ApiResponse::Runs(TimelineResponse {
                runs: timeline(&rows, tz),
            }))
        }
        ApiRequest::Clients(range) => {
            let names = store.clients_in_range(range.from, range.to)?;
            Ok(ApiResponse::Clients(short_client_names(names)))
        }
        ApiRequest::Info => store.status().map(ApiResponse::Info),
        ApiRequest::Logs { id } => {
            let logs = store.run_logs(&id)?.unwrap_or_default();
            Ok(ApiResponse::Logs(LogsResponse {
                id,
                stdlog_start: logs.stdlog_start.as_deref().map(join_log_lines),
                stdlog_end: logs.stdlog_end.as_deref().map(join_log_lines),
            }))
        }
        ApiRequest::ClusterStatus => {
            let rows = store.latest_host_statuses()?;
            Ok(ApiResponse::ClusterStatus(ClusterResponse {
                hosts: cluster_overview(&rows, tz),
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use chrono::TimeZone;
    use dqmirror_core::model::{ClusterStatus, GraphRecord, HostReport, RunRecord, RunRow};
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;

    fn record(id: &str, run: i64, exit_code: i64) -> RunRecord {
        RunRecord {
            row: RunRow {
                id: id.to_string(),
                client: "beam_dqm_sourceclient-live".to_string(),
                run,
                rev: 1,
                hostname: "dqmfu-c2b01-45-01".to_string(),
                exit_code: Some(exit_code),
                events_total: Some(42),
                events_rate: Some(1.0),
                cmssw_run: Some(run),
                cmssw_lumi: Some(2),
                client_path: "/opt/CMSSW_13_0_3/src/beam_cfg.py".to_string(),
                run_key: "runkey=pp_run".to_string(),
                fi_state: "running".to_string(),
                timestamp: Utc.with_ymd_and_hms(2023, 5, 1, 12, 0, 0).unwrap(),
                vmrss: "1 kB".to_string(),
            },
            stdlog_start: r#"["first\n","second\n"]"#.to_string(),
            stdlog_end: String::new(),
        }
    }

    fn fixture() -> (QueryState, Store) {
        let store = Store::open_in_memory().unwrap();
        for (id, run, exit) in [("a", 10, 0), ("b", 20, 1), ("c", 30, 0)] {
            store.upsert_run(&record(id, run, exit)).unwrap();
        }
        let stores = HashMap::from([(Mirror::Production, store.clone())]);
        (QueryState::new(stores, chrono_tz::UTC), store)
    }

    async fn get(state: QueryState, uri: &str) -> (StatusCode, Value) {
        let resp = router(state)
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn get_run_reports_neighbours() {
        let (state, _) = fixture();
        let (status, body) = get(state, "/api?what=get_run&run=20").await;
        assert_eq!(status, StatusCode::OK);
        let run = &body["Run"];
        assert_eq!(run["next"], 30);
        assert_eq!(run["prev"], 10);
        assert_eq!(run["snapshot"]["clients"][0]["client"], "beam");
        assert_eq!(run["snapshot"]["clients"][0]["host"], "dqmfu..01");
    }

    #[tokio::test]
    async fn get_runs_accepts_reversed_bounds() {
        let (state, _) = fixture();
        let (status, body) =
            get(state, "/api?what=get_runs&from=30&to=10&bad_only=1&db=production").await;
        assert_eq!(status, StatusCode::OK);
        let runs = body["Runs"]["runs"].as_object().unwrap();
        assert_eq!(runs.keys().collect::<Vec<_>>(), vec!["20"]);
    }

    #[tokio::test]
    async fn malformed_integer_is_a_bad_request() {
        let (state, _) = fixture();
        let (status, body) = get(state, "/api?what=get_graph&run=ten").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["Error"].as_str().unwrap().contains("run"));
    }

    #[tokio::test]
    async fn unserved_mirror_is_not_found() {
        let (state, _) = fixture();
        let (status, _) = get(state, "/api?what=get_info&db=playback").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (state, _) = fixture();
        let (status, _) = get(state, "/api?what=get_info&db=staging").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn logs_and_clients() {
        let (state, _) = fixture();
        let (_, body) = get(state.clone(), "/api?what=get_logs&id=a").await;
        assert_eq!(body["Logs"]["stdlog_start"], "first\nsecond\n");

        let (_, body) = get(state.clone(), "/api?what=get_logs&id=missing").await;
        assert!(body["Logs"]["stdlog_start"].is_null());

        let (_, body) = get(state, "/api?what=get_clients&from=0&to=100").await;
        assert_eq!(body["Clients"], serde_json::json!(["beam"]));
    }

    #[tokio::test]
    async fn cluster_status_is_censored() {
        let (state, store) = fixture();
        let mut hosts = std::collections::BTreeMap::new();
        hosts.insert(
            "dqmfu-c2b02-45-01".to_string(),
            HostReport {
                up: true,
                message: "ok".to_string(),
            },
        );
        store
            .record_host_status(&ClusterStatus(hosts), Utc::now())
            .unwrap();
        let (_, body) = get(state, "/api?what=get_cluster_status").await;
        assert_eq!(body["ClusterStatus"]["hosts"][0]["host"], "dqmfu..01");
        assert_eq!(body["ClusterStatus"]["hosts"][0]["up"], true);
    }

    #[tokio::test]
    async fn graph_hostname_is_censored() {
        let (state, store) = fixture();
        let at = Utc.with_ymd_and_hms(2023, 5, 1, 12, 0, 0).unwrap();
        store
            .upsert_graph(&GraphRecord {
                run: 20,
                rev: 3,
                id: "dqm-files-bu-c2f11-09-01-analyze_files-run20".to_string(),
                timestamp: at,
                global_start: at,
                stream_data: r#"{"streamDQM": {"lumis": [1]}}"#.to_string(),
                hostname: "bu-c2f11-09-01".to_string(),
            })
            .unwrap();
        let (status, body) = get(state, "/api?what=get_graph&run=20").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["Graph"]["graph"]["hostname"], "bu..01");
        assert!(body["Graph"]["graph"]["streams"]["streamDQM"].is_object());
    }
}
