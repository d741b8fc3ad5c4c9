pub mod db;
pub mod query;
pub mod retention;
pub mod schema;
pub mod write;

pub use db::Store;

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::{TimeZone, Utc};
    use dqmirror_core::model::{RunRecord, RunRow};

    pub(crate) fn run_record(id: &str, run: i64, rev: i64) -> RunRecord {
        RunRecord {
            row: RunRow {
                id: id.to_string(),
                client: "beam_dqm_sourceclient-live".to_string(),
                run,
                rev,
                hostname: "fu-c2f11-11-01".to_string(),
                exit_code: Some(0),
                events_total: Some(10),
                events_rate: Some(1.5),
                cmssw_run: Some(run),
                cmssw_lumi: Some(1),
                client_path: "/opt/CMSSW_13_0_3/src/beam.py".to_string(),
                run_key: "runkey=pp_run".to_string(),
                fi_state: "running".to_string(),
                timestamp: Utc.with_ymd_and_hms(2023, 5, 1, 12, 0, 0).unwrap(),
                vmrss: "1 GB".to_string(),
            },
            stdlog_start: "start".to_string(),
            stdlog_end: "end".to_string(),
        }
    }
}
