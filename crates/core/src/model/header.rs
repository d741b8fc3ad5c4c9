use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::host::MonitoredHost;

/// Lightweight record descriptor returned by a sync request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Header {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", default, deserialize_with = "lenient_i64")]
    pub rev: Option<i64>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub run: Option<i64>,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub timestamp: Option<Value>,
}

impl Header {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            rev: None,
            run: None,
            hostname: None,
            tag: None,
            kind: None,
            timestamp: None,
        }
    }

    /// The header's hostname, or the polled host's stored name when absent.
    pub fn hostname_or(&self, host: &MonitoredHost) -> String {
        match self.hostname.as_deref() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => host.store_name().to_string(),
        }
    }
}

/// Numbers may arrive as JSON numbers or numeric strings; anything else is
/// treated as absent rather than failing the whole batch.
fn lenient_i64<'de, D>(deserializer: D) -> std::result::Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(value_as_i64))
}

pub(crate) fn value_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

pub(crate) fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}
