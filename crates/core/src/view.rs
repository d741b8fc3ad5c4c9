//! Read-side shaping of stored rows for the dashboard and CLI. Everything here
//! is pure; hostnames never leave this module uncensored.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::host::censor_hostname;
use crate::model::{GraphRow, HostStatusRow, RunRow};
use crate::time::format_local;

const CLIENT_SUFFIX: &str = "_dqm_sourceclient-live";
const RESERVED_CLIENT: &str = "__init__";
const RUN_KEY_PREFIX: &str = "runkey=";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub cmssw_run: Option<i64>,
    pub run_key: String,
    pub cmssw_version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientDetail {
    pub host: String,
    pub events_total: Option<i64>,
    pub lumi: Option<i64>,
    pub state: String,
    pub exit_code: Option<i64>,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunTimeline {
    pub run_data: RunSummary,
    pub clients: BTreeMap<String, Vec<ClientDetail>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientStatus {
    pub timestamp_ms: i64,
    pub elapsed_secs: f64,
    pub host: String,
    pub exit_code: Option<i64>,
    pub client: String,
    pub lumi: Option<i64>,
    pub vmrss: String,
    pub events_total: Option<i64>,
    pub id: String,
    pub events_rate: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RunGlobals {
    pub cmssw_version: String,
    pub run_key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct MirrorSnapshot {
    pub globals: Option<RunGlobals>,
    pub clients: Vec<ClientStatus>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostOverview {
    pub host: String,
    pub up: bool,
    pub message: String,
    pub updated_at: String,
}

pub fn short_client_name(name: &str) -> &str {
    name.strip_suffix(CLIENT_SUFFIX).unwrap_or(name)
}

/// Empty names and the reserved `__init__` job never show up in views.
pub fn is_listed_client(name: &str) -> bool {
    !name.is_empty() && name != RESERVED_CLIENT
}

pub fn short_client_names<I, S>(names: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    names
        .into_iter()
        .filter(|n| is_listed_client(n.as_ref()))
        .map(|n| short_client_name(n.as_ref()).to_string())
        .collect()
}

/// `/opt/CMSSW_12_4_9/src/x.py` gives `12_4_9`.
pub fn cmssw_version(client_path: &str) -> String {
    client_path
        .split('/')
        .find(|segment| segment.contains("CMSSW"))
        .and_then(|segment| segment.split_once("CMSSW_"))
        .map(|(_, version)| version.to_string())
        .unwrap_or_default()
}

pub fn strip_run_key(run_key: &str) -> String {
    run_key
        .strip_prefix(RUN_KEY_PREFIX)
        .unwrap_or(run_key)
        .to_string()
}

/// Log blobs are stored as the JSON text of a list of lines; anything else is
/// returned as is.
pub fn join_log_lines(blob: &str) -> String {
    match serde_json::from_str::<Vec<String>>(blob) {
        Ok(lines) => lines.concat(),
        Err(_) => blob.to_string(),
    }
}

/// Groups rows by run and short client name. The run summary reflects the
/// last row seen for each run.
pub fn timeline(rows: &[RunRow], tz: Tz) -> BTreeMap<i64, RunTimeline> {
    let mut out: BTreeMap<i64, RunTimeline> = BTreeMap::new();
    for row in rows.iter().filter(|r| is_listed_client(&r.client)) {
        let summary = RunSummary {
            cmssw_run: row.cmssw_run,
            run_key: strip_run_key(&row.run_key),
            cmssw_version: cmssw_version(&row.client_path),
        };
        let detail = ClientDetail {
            host: censor_hostname(&row.hostname),
            events_total: row.events_total,
            lumi: row.cmssw_lumi,
            state: row.fi_state.clone(),
            exit_code: row.exit_code,
            timestamp: format_local(row.timestamp, tz),
        };

        let entry = out.entry(row.run).or_insert_with(|| RunTimeline {
            run_data: summary.clone(),
            clients: BTreeMap::new(),
        });
        entry.run_data = summary;
        entry
            .clients
            .entry(short_client_name(&row.client).to_string())
            .or_default()
            .push(detail);
    }
    out
}

/// Per-client status of a single run as seen at `now`.
pub fn mirror_snapshot(rows: &[RunRow], now: DateTime<Utc>) -> MirrorSnapshot {
    let listed: Vec<&RunRow> = rows.iter().filter(|r| is_listed_client(&r.client)).collect();
    let globals = listed.first().map(|row| RunGlobals {
        cmssw_version: cmssw_version(&row.client_path),
        run_key: strip_run_key(&row.run_key),
    });
    let clients = listed
        .into_iter()
        .map(|row| ClientStatus {
            timestamp_ms: row.timestamp.timestamp_millis(),
            elapsed_secs: (now - row.timestamp).num_milliseconds() as f64 / 1000.0,
            host: censor_hostname(&row.hostname),
            exit_code: row.exit_code,
            client: short_client_name(&row.client).to_string(),
            lumi: row.cmssw_lumi,
            vmrss: row.vmrss.clone(),
            events_total: row.events_total,
            id: row.id.clone(),
            events_rate: row.events_rate,
        })
        .collect();
    MirrorSnapshot { globals, clients }
}

pub fn cluster_overview(rows: &[HostStatusRow], tz: Tz) -> Vec<HostOverview> {
    rows.iter()
        .map(|row| HostOverview {
            host: censor_hostname(&row.hostname),
            up: row.is_up,
            message: row.message.clone().unwrap_or_default(),
            updated_at: format_local(row.created_at, tz),
        })
        .collect()
}

pub fn censored_graph(mut graph: GraphRow) -> GraphRow {
    graph.hostname = censor_hostname(&graph.hostname);
    graph
}
