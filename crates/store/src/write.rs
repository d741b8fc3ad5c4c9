use chrono::{DateTime, Utc};
use dqmirror_core::error::{MirrorError, Result};
use dqmirror_core::model::{ClusterStatus, GraphRecord, RunRecord};
use duckdb::{OptionalExt, Transaction, params};

use crate::Store;
use crate::schema::MIN_MAX_KEY;

impl Store {
    /// Replaces the row with the same id and widens the cached run bounds,
    /// both in one transaction.
    pub fn upsert_run(&self, record: &RunRecord) -> Result<()> {
        let row = &record.row;
        let mut conn = self.conn();
        let tx = conn
            .transaction()
            .map_err(|e| MirrorError::Store(format!("begin tx failed: {e}")))?;

        tx.execute(
            "INSERT OR REPLACE INTO runs
             (id, client, run, rev, hostname, exit_code, events_total, events_rate, cmssw_run,
              cmssw_lumi, client_path, run_key, fi_state, timestamp, vmrss, stdlog_start, stdlog_end)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                row.id,
                row.client,
                row.run,
                row.rev,
                row.hostname,
                row.exit_code,
                row.events_total,
                row.events_rate,
                row.cmssw_run,
                row.cmssw_lumi,
                row.client_path,
                row.run_key,
                row.fi_state,
                row.timestamp.naive_utc(),
                row.vmrss,
                record.stdlog_start,
                record.stdlog_end,
            ],
        )
        .map_err(|e| MirrorError::Store(format!("upsert run {} failed: {e}", row.id)))?;

        if row.run > 0 {
            widen_min_max(&tx, row.run)?;
        }

        tx.commit()
            .map_err(|e| MirrorError::Store(format!("commit run {} failed: {e}", row.id)))
    }

    pub fn upsert_graph(&self, graph: &GraphRecord) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn
            .transaction()
            .map_err(|e| MirrorError::Store(format!("begin tx failed: {e}")))?;

        tx.execute(
            "INSERT OR REPLACE INTO graphs
             (run, rev, id, timestamp, global_start, stream_data, hostname)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                graph.run,
                graph.rev,
                graph.id,
                graph.timestamp.naive_utc(),
                graph.global_start.naive_utc(),
                graph.stream_data,
                graph.hostname,
            ],
        )
        .map_err(|e| MirrorError::Store(format!("upsert graph for run {} failed: {e}", graph.run)))?;

        tx.commit()
            .map_err(|e| MirrorError::Store(format!("commit graph {} failed: {e}", graph.run)))
    }

    /// Appends one status row per host, creating hostname rows on first sight.
    pub fn record_host_status(
        &self,
        status: &ClusterStatus,
        observed_at: DateTime<Utc>,
    ) -> Result<()> {
        if status.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn();
        let tx = conn
            .transaction()
            .map_err(|e| MirrorError::Store(format!("begin tx failed: {e}")))?;

        {
            let mut insert_name = tx
                .prepare("INSERT INTO hostnames (name) VALUES (?) ON CONFLICT DO NOTHING")
                .map_err(|e| MirrorError::Store(format!("prepare hostname insert failed: {e}")))?;
            let mut insert_status = tx
                .prepare(
                    "INSERT INTO host_statuses (host_id, is_up, message, created_at)
                     SELECT id, ?, ?, ? FROM hostnames WHERE name = ?",
                )
                .map_err(|e| MirrorError::Store(format!("prepare status insert failed: {e}")))?;

            let observed_at = observed_at.naive_utc();
            for (hostname, report) in status.iter() {
                insert_name
                    .execute(params![hostname])
                    .map_err(|e| MirrorError::Store(format!("insert hostname failed: {e}")))?;
                insert_status
                    .execute(params![report.up, report.message, observed_at, hostname])
                    .map_err(|e| {
                        MirrorError::Store(format!("insert status for {hostname} failed: {e}"))
                    })?;
            }
        }

        tx.commit()
            .map_err(|e| MirrorError::Store(format!("commit host statuses failed: {e}")))
    }
}

/// Cold cache is primed from the table (which already holds the new row);
/// a warm cache only ever grows.
fn widen_min_max(tx: &Transaction<'_>, run: i64) -> Result<()> {
    let bounds = match read_min_max(tx)? {
        Some((min, max)) if run >= min && run <= max => return Ok(()),
        Some((min, max)) => (min.min(run), max.max(run)),
        None => match aggregate_min_max(tx)? {
            Some(bounds) => bounds,
            None => (run, run),
        },
    };
    tracing::debug!(min = bounds.0, max = bounds.1, "run bounds widened");
    write_min_max(tx, bounds)
}

pub(crate) fn read_min_max(conn: &duckdb::Connection) -> Result<Option<(i64, i64)>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT data FROM meta WHERE name = ?",
            params![MIN_MAX_KEY],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| MirrorError::Store(format!("read run bounds failed: {e}")))?;
    Ok(raw.as_deref().and_then(parse_bounds))
}

pub(crate) fn aggregate_min_max(conn: &duckdb::Connection) -> Result<Option<(i64, i64)>> {
    conn.query_row(
        "SELECT MIN(run), MAX(run) FROM runs WHERE run > 0",
        [],
        |row| Ok((row.get::<_, Option<i64>>(0)?, row.get::<_, Option<i64>>(1)?)),
    )
    .map(|pair| match pair {
        (Some(min), Some(max)) => Some((min, max)),
        _ => None,
    })
    .map_err(|e| MirrorError::Store(format!("aggregate run bounds failed: {e}")))
}

pub(crate) fn write_min_max(conn: &duckdb::Connection, (min, max): (i64, i64)) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO meta (name, data) VALUES (?, ?)",
        params![MIN_MAX_KEY, format!("[{min},{max}]")],
    )
    .map(|_| ())
    .map_err(|e| MirrorError::Store(format!("write run bounds failed: {e}")))
}

fn parse_bounds(raw: &str) -> Option<(i64, i64)> {
    let pair: Vec<i64> = serde_json::from_str(raw).ok()?;
    match pair.as_slice() {
        [min, max] => Some((*min, *max)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;
    use crate::test_support::run_record;

    #[test]
    fn replacing_a_run_keeps_one_row() {
        let store = Store::open_in_memory().unwrap();
        let mut record = run_record("a", 100, 1);
        store.upsert_run(&record).unwrap();
        record.row.events_total = Some(99);
        record.row.rev = 2;
        store.upsert_run(&record).unwrap();

        assert_eq!(store.status().unwrap().runs_count, 1);
        let rows = store.runs_in_range(100, 100, Default::default()).unwrap();
        assert_eq!(rows[0].events_total, Some(99));
        assert_eq!(rows[0].rev, 2);
    }

    #[test]
    fn graphs_overwrite_by_run() {
        let store = Store::open_in_memory().unwrap();
        let ts = Utc.with_ymd_and_hms(2020, 1, 22, 20, 0, 0).unwrap();
        let mut graph = GraphRecord {
            run: 334388,
            rev: 1,
            id: "first".to_string(),
            timestamp: ts,
            global_start: ts,
            stream_data: "{}".to_string(),
            hostname: "bu-c2f11-09-01".to_string(),
        };
        store.upsert_graph(&graph).unwrap();
        graph.id = "second".to_string();
        graph.rev = 2;
        graph.stream_data = json!({"streamDQM": {"lumis": [1]}}).to_string();
        store.upsert_graph(&graph).unwrap();

        assert_eq!(store.status().unwrap().graphs_count, 1);
        let row = store.graph_for_run(334388).unwrap().unwrap();
        assert_eq!(row.id, "second");
        assert!(row.streams.contains_key("streamDQM"));
    }

    #[test]
    fn run_bounds_only_widen() {
        let store = Store::open_in_memory().unwrap();
        for (i, run) in [500, 100, 900].into_iter().enumerate() {
            store.upsert_run(&run_record(&format!("r{i}"), run, 1)).unwrap();
        }
        assert_eq!(store.min_max_runs().unwrap(), Some((100, 900)));

        store.upsert_run(&run_record("inner", 400, 1)).unwrap();
        assert_eq!(store.min_max_runs().unwrap(), Some((100, 900)));
    }

    #[test]
    fn non_positive_runs_skip_bounds() {
        let store = Store::open_in_memory().unwrap();
        store.upsert_run(&run_record("missing", -1, 1)).unwrap();
        assert_eq!(store.min_max_runs().unwrap(), None);
        store.upsert_run(&run_record("real", 42, 1)).unwrap();
        assert_eq!(store.min_max_runs().unwrap(), Some((42, 42)));
    }

    #[test]
    fn host_status_rows_append() {
        let store = Store::open_in_memory().unwrap();
        let status = ClusterStatus::parse(json!({
            "fu-c2f11-11-01": {"up": true, "msg": "ok"},
            "fu-c2f11-11-02": {"up": false, "msg": "unreachable"}
        }))
        .unwrap();
        let t0 = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
        store.record_host_status(&status, t0).unwrap();
        store
            .record_host_status(&status, t0 + chrono::Duration::seconds(30))
            .unwrap();

        let st = store.status().unwrap();
        assert_eq!(st.hostnames_count, 2);
        assert_eq!(st.host_status_count, 4);
    }

    #[test]
    fn bounds_text_parses_pair_only() {
        assert_eq!(parse_bounds("[3,7]"), Some((3, 7)));
        assert_eq!(parse_bounds("[3]"), None);
        assert_eq!(parse_bounds("garbage"), None);
    }
}
