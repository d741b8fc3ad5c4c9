use std::collections::HashMap;

use dqmirror_core::config::Mirror;
use dqmirror_core::error::{MirrorError, Result};
use dqmirror_core::query::{
    ClusterResponse, GraphResponse, LogsResponse, RunFilters, RunRange, RunView, RunsRequest,
    StoreStatus, TimelineResponse,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ApiRequest {
    Run { run: i64 },
    Graph { run: i64 },
    Runs(RunsRequest),
    Clients(RunRange),
    Info,
    Logs { id: String },
    ClusterStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ApiResponse {
    Run(RunView),
    Graph(GraphResponse),
    Runs(TimelineResponse),
    Clients(Vec<String>),
    Info(StoreStatus),
    Logs(LogsResponse),
    ClusterStatus(ClusterResponse),
    Error(String),
}

impl ApiRequest {
    pub fn what(&self) -> &'static str {
        match self {
            Self::Run { .. } => "get_run",
            Self::Graph { .. } => "get_graph",
            Self::Runs(_) => "get_runs",
            Self::Clients(_) => "get_clients",
            Self::Info => "get_info",
            Self::Logs { .. } => "get_logs",
            Self::ClusterStatus => "get_cluster_status",
        }
    }

    /// Builds a request from `/api` query parameters. Numeric parameters
    /// default to 0 but must be integers when present.
    pub fn from_params(params: &HashMap<String, String>) -> Result<Self> {
        let what = params
            .get("what")
            .ok_or_else(|| MirrorError::InvalidArgument("missing 'what' parameter".to_string()))?;
        let int = |key: &str| int_param(params, key);
        match what.as_str() {
            "get_run" => Ok(Self::Run { run: int("run")? }),
            "get_graph" => Ok(Self::Graph { run: int("run")? }),
            "get_runs" => Ok(Self::Runs(RunsRequest {
                range: RunRange::new(int("from")?, int("to")?),
                filters: RunFilters {
                    bad_only: int("bad_only")? != 0,
                    with_lumi_only: int("ls")? != 0,
                },
            })),
            "get_clients" => Ok(Self::Clients(RunRange::new(int("from")?, int("to")?))),
            "get_info" => Ok(Self::Info),
            "get_logs" => Ok(Self::Logs {
                id: params.get("id").cloned().unwrap_or_default(),
            }),
            "get_cluster_status" => Ok(Self::ClusterStatus),
            other => Err(MirrorError::InvalidArgument(format!(
                "unknown query: {other}"
            ))),
        }
    }

    /// Inverse of [`ApiRequest::from_params`], used by the CLI client.
    pub fn to_params(&self, mirror: Mirror) -> Vec<(&'static str, String)> {
        let mut out = vec![("what", self.what().to_string()), ("db", mirror.to_string())];
        match self {
            Self::Run { run } | Self::Graph { run } => out.push(("run", run.to_string())),
            Self::Runs(req) => {
                out.push(("from", req.range.from.to_string()));
                out.push(("to", req.range.to.to_string()));
                out.push(("bad_only", u8::from(req.filters.bad_only).to_string()));
                out.push(("ls", u8::from(req.filters.with_lumi_only).to_string()));
            }
            Self::Clients(range) => {
                out.push(("from", range.from.to_string()));
                out.push(("to", range.to.to_string()));
            }
            Self::Logs { id } => out.push(("id", id.clone())),
            Self::Info | Self::ClusterStatus => {}
        }
        out
    }
}

fn int_param(params: &HashMap<String, String>, key: &str) -> Result<i64> {
    match params.get(key).map(|v| v.trim()) {
        None | Some("") => Ok(0),
        Some(raw) => raw.parse().map_err(|_| {
            MirrorError::InvalidArgument(format!("parameter '{key}' is not an integer: {raw}"))
        }),
    }
}
