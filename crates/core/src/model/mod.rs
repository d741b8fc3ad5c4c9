pub mod graph;
pub mod header;
pub mod run;
pub mod status;

pub use graph::{GraphRecord, GraphRow};
pub use header::Header;
pub use run::{RunLogs, RunRecord, RunRow};
pub use status::{ClusterStatus, HostReport, HostStatusRow};
