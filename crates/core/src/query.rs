use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::GraphRow;
use crate::view::{HostOverview, MirrorSnapshot, RunTimeline};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFilters {
    /// Only rows with a non-zero or missing exit code.
    pub bad_only: bool,
    /// Only rows that have processed at least one lumisection.
    pub with_lumi_only: bool,
}

/// Inclusive run range, always stored with `from <= to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRange {
    pub from: i64,
    pub to: i64,
}

impl RunRange {
    pub fn new(a: i64, b: i64) -> Self {
        Self {
            from: a.min(b),
            to: a.max(b),
        }
    }

    pub fn is_single(&self) -> bool {
        self.from == self.to
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunBounds {
    pub min: i64,
    pub max: i64,
}

impl From<(i64, i64)> for RunBounds {
    fn from((min, max): (i64, i64)) -> Self {
        Self { min, max }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunsRequest {
    pub range: RunRange,
    pub filters: RunFilters,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunView {
    pub run: i64,
    pub next: Option<i64>,
    pub prev: Option<i64>,
    pub snapshot: MirrorSnapshot,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineResponse {
    pub runs: BTreeMap<i64, RunTimeline>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphResponse {
    pub graph: Option<GraphRow>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogsResponse {
    pub id: String,
    pub stdlog_start: Option<String>,
    pub stdlog_end: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterResponse {
    pub hosts: Vec<HostOverview>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreStatus {
    pub db_path: String,
    pub db_size_bytes: u64,
    pub runs_count: usize,
    pub graphs_count: usize,
    pub hostnames_count: usize,
    pub host_status_count: usize,
    pub bounds: Option<RunBounds>,
    pub newest_run_ts: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_is_normalized() {
        let range = RunRange::new(400, 100);
        assert_eq!(range, RunRange { from: 100, to: 400 });
        assert!(!range.is_single());
        assert!(RunRange::new(7, 7).is_single());
    }
}
