use std::time::Duration;

use chrono::Utc;
use dqmirror_core::error::{MirrorError, Result};
use duckdb::params;

use crate::Store;
use crate::schema::MIN_MAX_KEY;
use crate::write::{aggregate_min_max, write_min_max};

impl Store {
    /// Drops host status history older than `ttl`. Hostname rows stay.
    pub fn prune_host_statuses(&self, ttl: Duration) -> Result<usize> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(ttl)
                .map_err(|e| MirrorError::Internal(format!("ttl conversion failed: {e}")))?;

        let conn = self.conn();
        conn.execute(
            "DELETE FROM host_statuses WHERE created_at < ?",
            params![cutoff.naive_utc()],
        )
        .map_err(|e| MirrorError::Store(format!("retention host status delete failed: {e}")))
    }

    /// Recomputes the cached run bounds from `runs` and persists them; an
    /// empty table clears the cache.
    pub fn rebuild_min_max_cache(&self) -> Result<Option<(i64, i64)>> {
        let mut conn = self.conn();
        let tx = conn
            .transaction()
            .map_err(|e| MirrorError::Store(format!("begin tx failed: {e}")))?;

        let bounds = aggregate_min_max(&tx)?;
        match bounds {
            Some(bounds) => write_min_max(&tx, bounds)?,
            None => {
                tx.execute("DELETE FROM meta WHERE name = ?", params![MIN_MAX_KEY])
                    .map_err(|e| MirrorError::Store(format!("clear run bounds failed: {e}")))?;
            }
        }

        tx.commit()
            .map_err(|e| MirrorError::Store(format!("commit run bounds failed: {e}")))?;
        Ok(bounds)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::{TimeZone, Utc};
    use dqmirror_core::model::ClusterStatus;
    use serde_json::json;

    use crate::Store;
    use crate::test_support::run_record;

    #[test]
    fn ttl_prunes_old_statuses() {
        let store = Store::open_in_memory().unwrap();
        let status = ClusterStatus::parse(json!({"fu-a": {"up": true, "msg": "ok"}})).unwrap();
        let old = Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap();
        store.record_host_status(&status, old).unwrap();
        store.record_host_status(&status, Utc::now()).unwrap();

        let removed = store.prune_host_statuses(Duration::from_secs(3600)).unwrap();
        assert_eq!(removed, 1);
        let st = store.status().unwrap();
        assert_eq!(st.host_status_count, 1);
        assert_eq!(st.hostnames_count, 1);
    }

    #[test]
    fn rebuild_recomputes_bounds() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.rebuild_min_max_cache().unwrap(), None);

        for run in [50, 20, 80] {
            store.upsert_run(&run_record(&format!("r{run}"), run, 1)).unwrap();
        }
        {
            let conn = store.conn();
            conn.execute("DELETE FROM runs WHERE run = 80", []).unwrap();
        }
        // stale until rebuilt
        assert_eq!(store.min_max_runs().unwrap(), Some((20, 80)));
        assert_eq!(store.rebuild_min_max_cache().unwrap(), Some((20, 50)));
        assert_eq!(store.min_max_runs().unwrap(), Some((20, 50)));
    }
}
