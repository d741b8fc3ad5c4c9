use chrono::{DateTime, NaiveDateTime, Utc};
use dqmirror_core::error::{MirrorError, Result};
use dqmirror_core::host::MonitoredHost;
use dqmirror_core::model::graph::decode_streams;
use dqmirror_core::model::{GraphRow, HostStatusRow, RunLogs, RunRow};
use dqmirror_core::query::{RunFilters, RunRange};
use duckdb::{OptionalExt, Row, params};

use crate::Store;
use crate::schema::RUN_COLUMNS;
use crate::write::{aggregate_min_max, read_min_max};

impl Store {
    /// Highest revision stored for a host; producers are tracked through
    /// `graphs`, consumers through `runs`.
    pub fn latest_revision(&self, host: &MonitoredHost) -> Result<Option<i64>> {
        let sql = if host.is_producer() {
            "SELECT MAX(rev) FROM graphs WHERE hostname = ?"
        } else {
            "SELECT MAX(rev) FROM runs WHERE hostname = ?"
        };
        let conn = self.conn();
        conn.query_row(sql, params![host.store_name()], |row| {
            row.get::<_, Option<i64>>(0)
        })
        .map_err(|e| MirrorError::Store(format!("latest revision for {} failed: {e}", host.name)))
    }

    /// Rows in `[from, to]` without log blobs. A single run is ordered by
    /// `(client, id)`, a range by `(run, client, id)`.
    pub fn runs_in_range(&self, from: i64, to: i64, filters: RunFilters) -> Result<Vec<RunRow>> {
        let range = RunRange::new(from, to);
        let mut predicates = String::new();
        if filters.bad_only {
            predicates.push_str(" AND (exit_code <> 0 OR exit_code IS NULL)");
        }
        if filters.with_lumi_only {
            predicates.push_str(" AND cmssw_lumi > 0");
        }
        let order = if range.is_single() {
            "client, id"
        } else {
            "run, client, id"
        };
        let sql = format!(
            "SELECT {RUN_COLUMNS} FROM runs WHERE run BETWEEN ? AND ?{predicates} ORDER BY {order}"
        );

        let conn = self.conn();
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| MirrorError::Store(format!("prepare runs query failed: {e}")))?;
        let rows = stmt
            .query_map(params![range.from, range.to], map_run_row)
            .map_err(|e| MirrorError::Store(format!("query runs failed: {e}")))?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(|e| MirrorError::Store(format!("map run row failed: {e}")))?);
        }
        Ok(out)
    }

    pub fn graph_for_run(&self, run: i64) -> Result<Option<GraphRow>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT run, rev, id, timestamp, global_start, stream_data, hostname
             FROM graphs WHERE run = ?",
            params![run],
            |row| {
                Ok(GraphRow {
                    run: row.get(0)?,
                    rev: row.get(1)?,
                    id: row.get(2)?,
                    timestamp: naive_to_utc(row.get::<_, NaiveDateTime>(3)?),
                    global_start: naive_to_utc(row.get::<_, NaiveDateTime>(4)?),
                    streams: decode_streams(&row.get::<_, String>(5)?),
                    hostname: row.get(6)?,
                })
            },
        )
        .optional()
        .map_err(|e| MirrorError::Store(format!("graph for run {run} failed: {e}")))
    }

    /// Cached bounds when present, otherwise the live aggregate. A read never
    /// populates the cache.
    pub fn min_max_runs(&self) -> Result<Option<(i64, i64)>> {
        let conn = self.conn();
        match read_min_max(&conn)? {
            Some(bounds) => Ok(Some(bounds)),
            None => aggregate_min_max(&conn),
        }
    }

    /// `(next, prev)`: the smallest run above and the largest run below `run`.
    pub fn adjacent_runs(&self, run: i64) -> Result<(Option<i64>, Option<i64>)> {
        let conn = self.conn();
        conn.query_row(
            "SELECT (SELECT MIN(run) FROM runs WHERE run > ?),
                    (SELECT MAX(run) FROM runs WHERE run < ?)",
            params![run, run],
            |row| Ok((row.get::<_, Option<i64>>(0)?, row.get::<_, Option<i64>>(1)?)),
        )
        .map_err(|e| MirrorError::Store(format!("adjacent runs for {run} failed: {e}")))
    }

    /// Distinct raw client names in a run range, sorted.
    pub fn clients_in_range(&self, from: i64, to: i64) -> Result<Vec<String>> {
        let range = RunRange::new(from, to);
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT DISTINCT client FROM runs WHERE run BETWEEN ? AND ? ORDER BY client")
            .map_err(|e| MirrorError::Store(format!("prepare clients query failed: {e}")))?;
        let rows = stmt
            .query_map(params![range.from, range.to], |row| row.get::<_, String>(0))
            .map_err(|e| MirrorError::Store(format!("query clients failed: {e}")))?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(|e| MirrorError::Store(format!("map client row failed: {e}")))?);
        }
        Ok(out)
    }

    pub fn run_logs(&self, id: &str) -> Result<Option<RunLogs>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT stdlog_start, stdlog_end FROM runs WHERE id = ?",
            params![id],
            |row| {
                Ok(RunLogs {
                    stdlog_start: row.get(0)?,
                    stdlog_end: row.get(1)?,
                })
            },
        )
        .optional()
        .map_err(|e| MirrorError::Store(format!("logs for {id} failed: {e}")))
    }

    /// Most recent status row per known host, ordered by hostname.
    pub fn latest_host_statuses(&self) -> Result<Vec<HostStatusRow>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT h.name, s.is_up, s.message, s.created_at
                 FROM host_statuses s
                 JOIN hostnames h ON h.id = s.host_id
                 QUALIFY ROW_NUMBER() OVER (
                   PARTITION BY s.host_id ORDER BY s.created_at DESC, s.id DESC
                 ) = 1
                 ORDER BY h.name",
            )
            .map_err(|e| MirrorError::Store(format!("prepare host status query failed: {e}")))?;
        let rows = stmt
            .query_map([], |row| {
                Ok(HostStatusRow {
                    hostname: row.get(0)?,
                    is_up: row.get(1)?,
                    message: row.get(2)?,
                    created_at: naive_to_utc(row.get::<_, NaiveDateTime>(3)?),
                })
            })
            .map_err(|e| MirrorError::Store(format!("query host statuses failed: {e}")))?;

        let mut out = Vec::new();
        for row in rows {
            out.push(
                row.map_err(|e| MirrorError::Store(format!("map host status row failed: {e}")))?,
            );
        }
        Ok(out)
    }
}

fn map_run_row(row: &Row<'_>) -> duckdb::Result<RunRow> {
    Ok(RunRow {
        id: row.get(0)?,
        client: row.get(1)?,
        run: row.get(2)?,
        rev: row.get(3)?,
        hostname: row.get(4)?,
        exit_code: row.get(5)?,
        events_total: row.get(6)?,
        events_rate: row.get(7)?,
        cmssw_run: row.get(8)?,
        cmssw_lumi: row.get(9)?,
        client_path: row.get(10)?,
        run_key: row.get(11)?,
        fi_state: row.get(12)?,
        timestamp: naive_to_utc(row.get::<_, NaiveDateTime>(13)?),
        vmrss: row.get(14)?,
    })
}

fn naive_to_utc(ts: NaiveDateTime) -> DateTime<Utc> {
    ts.and_utc()
}
