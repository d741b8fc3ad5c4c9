use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{MirrorError, Result};
use crate::host::MonitoredHost;
use crate::model::header::Header;
use crate::model::run::MISSING_NUMBER;
use crate::time::timestamp_or_sentinel;

/// Per-run file delivery summary published by a producer host; keyed by run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphRecord {
    pub run: i64,
    pub rev: i64,
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub global_start: DateTime<Utc>,
    /// JSON text of the stream name -> stream stats mapping.
    pub stream_data: String,
    pub hostname: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphRow {
    pub run: i64,
    pub rev: i64,
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub global_start: DateTime<Utc>,
    pub streams: Map<String, Value>,
    pub hostname: String,
}

impl GraphRecord {
    /// Returns `Ok(None)` for documents without an `extra` section; those carry
    /// no delivery data and are skipped.
    pub fn from_payload(
        header: &Header,
        document: &Value,
        host: &MonitoredHost,
        tz: Tz,
    ) -> Result<Option<Self>> {
        let Some(extra) = document
            .get("extra")
            .and_then(Value::as_object)
            .filter(|e| !e.is_empty())
        else {
            return Ok(None);
        };

        let run = header
            .run
            .filter(|run| *run != 0)
            .ok_or_else(|| MirrorError::Payload(format!("no run for header id {}", header.id)))?;

        let stream_data = match extra.get("streams") {
            Some(streams @ Value::Object(_)) => streams.to_string(),
            _ => "{}".to_string(),
        };

        Ok(Some(Self {
            run,
            rev: header.rev.unwrap_or(MISSING_NUMBER),
            id: header.id.clone(),
            timestamp: timestamp_or_sentinel(extra.get("timestamp"), tz),
            global_start: timestamp_or_sentinel(extra.get("global_start"), tz),
            stream_data,
            hostname: header.hostname_or(host),
        }))
    }
}

pub fn decode_streams(stream_data: &str) -> Map<String, Value> {
    match serde_json::from_str::<Value>(stream_data) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}
