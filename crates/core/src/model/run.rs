use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{MirrorError, Result};
use crate::host::MonitoredHost;
use crate::model::header::{Header, value_as_f64, value_as_i64};
use crate::time::timestamp_or_sentinel;

/// Value stored for numeric fields the upstream document omits.
pub const MISSING_NUMBER: i64 = -1;

/// One client job instance on one host, as stored in `runs` (log blobs excluded).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunRow {
    pub id: String,
    pub client: String,
    pub run: i64,
    pub rev: i64,
    pub hostname: String,
    pub exit_code: Option<i64>,
    pub events_total: Option<i64>,
    pub events_rate: Option<f64>,
    pub cmssw_run: Option<i64>,
    pub cmssw_lumi: Option<i64>,
    pub client_path: String,
    pub run_key: String,
    pub fi_state: String,
    pub timestamp: DateTime<Utc>,
    pub vmrss: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunRecord {
    #[serde(flatten)]
    pub row: RunRow,
    pub stdlog_start: String,
    pub stdlog_end: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RunLogs {
    pub stdlog_start: Option<String>,
    pub stdlog_end: Option<String>,
}

impl RunRecord {
    /// Builds a run row from a consumer header and its document. Individual
    /// fields that fail to parse fall back to defaults; only a non-object
    /// document is rejected. Rows without a hostname are filed under the
    /// polled host so its cursor still advances.
    pub fn from_payload(
        header: &Header,
        document: &Value,
        host: &MonitoredHost,
        tz: Tz,
    ) -> Result<Self> {
        let doc = document.as_object().ok_or_else(|| {
            MirrorError::Payload(format!("document for {} is not an object", header.id))
        })?;
        let extra = doc.get("extra").and_then(Value::as_object);

        let (client_path, run_key) = parse_cmdline(doc.get("cmdline"));
        let vmrss = extra
            .and_then(|e| e.get("ps_info"))
            .and_then(|p| p.get("VmRSS"))
            .map(text_of)
            .unwrap_or_default();

        let row = RunRow {
            id: header.id.clone(),
            client: header.tag.clone().unwrap_or_default(),
            run: header.run.unwrap_or(MISSING_NUMBER),
            rev: header.rev.unwrap_or(MISSING_NUMBER),
            hostname: header.hostname_or(host),
            exit_code: int_field(doc, "exit_code"),
            events_total: int_field(doc, "events_total"),
            events_rate: float_field(doc, "events_rate"),
            cmssw_run: int_field(doc, "cmssw_run"),
            cmssw_lumi: int_field(doc, "cmssw_lumi"),
            client_path,
            run_key,
            fi_state: doc.get("fi_state").map(text_of).unwrap_or_default(),
            timestamp: timestamp_or_sentinel(header.timestamp.as_ref(), tz),
            vmrss,
        };

        Ok(Self {
            row,
            stdlog_start: log_blob(extra, "stdlog_start"),
            stdlog_end: log_blob(extra, "stdlog_end"),
        })
    }
}

/// Missing keys take the upstream default, explicit nulls stay null.
fn int_field(doc: &Map<String, Value>, key: &str) -> Option<i64> {
    match doc.get(key) {
        None => Some(MISSING_NUMBER),
        Some(Value::Null) => None,
        Some(v) => Some(value_as_i64(v).unwrap_or(MISSING_NUMBER)),
    }
}

fn float_field(doc: &Map<String, Value>, key: &str) -> Option<f64> {
    match doc.get(key) {
        None => Some(MISSING_NUMBER as f64),
        Some(Value::Null) => None,
        Some(v) => Some(value_as_f64(v).unwrap_or(MISSING_NUMBER as f64)),
    }
}

fn parse_cmdline(cmdline: Option<&Value>) -> (String, String) {
    let Some(items) = cmdline.and_then(Value::as_array) else {
        return (String::new(), String::new());
    };
    let client_path = items
        .get(1)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let run_key = items
        .iter()
        .filter_map(Value::as_str)
        .find(|item| item.contains("runkey"))
        .unwrap_or_default()
        .to_string();
    (client_path, run_key)
}

fn log_blob(extra: Option<&Map<String, Value>>, key: &str) -> String {
    extra
        .and_then(|e| e.get(key))
        .map(text_of)
        .unwrap_or_default()
}

fn text_of(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
