pub mod client;
pub mod health;
pub mod protocol;
pub mod scheduler;
pub mod sync;

pub use client::{RemoteClient, RemoteConfig, TelemetrySource};
pub use scheduler::{Scheduler, SchedulerConfig};
pub use sync::{HostOutcome, SyncReport, sync_host, sync_hosts};
