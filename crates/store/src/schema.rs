// No secondary indexes on `runs` or `graphs`: DuckDB rejects INSERT OR REPLACE
// on rows whose indexed columns change.
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS runs (
  id TEXT PRIMARY KEY,
  client TEXT NOT NULL,
  run BIGINT NOT NULL,
  rev BIGINT NOT NULL,
  hostname TEXT NOT NULL,
  exit_code BIGINT,
  events_total BIGINT,
  events_rate DOUBLE,
  cmssw_run BIGINT,
  cmssw_lumi BIGINT,
  client_path TEXT NOT NULL,
  run_key TEXT NOT NULL,
  fi_state TEXT NOT NULL,
  timestamp TIMESTAMP NOT NULL,
  vmrss TEXT NOT NULL,
  stdlog_start TEXT NOT NULL,
  stdlog_end TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS graphs (
  run BIGINT PRIMARY KEY,
  rev BIGINT NOT NULL,
  id TEXT NOT NULL,
  timestamp TIMESTAMP NOT NULL,
  global_start TIMESTAMP NOT NULL,
  stream_data TEXT NOT NULL,
  hostname TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS meta (
  name TEXT PRIMARY KEY,
  data TEXT NOT NULL
);

CREATE SEQUENCE IF NOT EXISTS hostnames_id_seq;
CREATE SEQUENCE IF NOT EXISTS host_statuses_id_seq;

CREATE TABLE IF NOT EXISTS hostnames (
  id BIGINT PRIMARY KEY DEFAULT nextval('hostnames_id_seq'),
  name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS host_statuses (
  id BIGINT PRIMARY KEY DEFAULT nextval('host_statuses_id_seq'),
  host_id BIGINT NOT NULL,
  is_up BOOLEAN NOT NULL,
  message TEXT,
  created_at TIMESTAMP NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_host_statuses_host_created ON host_statuses(host_id, created_at);
CREATE INDEX IF NOT EXISTS idx_host_statuses_created ON host_statuses(created_at);
"#;

pub const MIN_MAX_KEY: &str = "min_max_runs";

/// Column list shared by every `runs` read that skips the log blobs.
pub const RUN_COLUMNS: &str = "id, client, run, rev, hostname, exit_code, events_total, events_rate, \
     cmssw_run, cmssw_lumi, client_path, run_key, fi_state, timestamp, vmrss";
