use std::sync::Arc;
use std::time::Duration;

use chrono_tz::Tz;
use dqmirror_core::config::{Config, Mirror};
use dqmirror_core::host::{HostCategory, MonitoredHost};
use dqmirror_store::Store;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::client::TelemetrySource;
use crate::health::poll_cluster;
use crate::sync::sync_hosts;

const RETENTION_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub info_interval: Duration,
    pub status_interval: Duration,
    pub status_retention: Duration,
    pub retention_interval: Duration,
    pub timezone: Tz,
}

impl From<&Config> for SchedulerConfig {
    fn from(cfg: &Config) -> Self {
        Self {
            info_interval: cfg.info_interval,
            status_interval: cfg.status_interval,
            status_retention: cfg.status_retention,
            retention_interval: RETENTION_INTERVAL,
            timezone: cfg.timezone,
        }
    }
}

struct MirrorTarget {
    mirror: Mirror,
    store: Store,
    hosts: Vec<MonitoredHost>,
}

/// Owns the polling tasks of every configured mirror. Per mirror: one sync
/// loop per host category, one cluster health loop and one retention loop,
/// all sharing the mirror's store.
pub struct Scheduler<S> {
    source: Arc<S>,
    cfg: SchedulerConfig,
    targets: Vec<MirrorTarget>,
}

impl<S: TelemetrySource + 'static> Scheduler<S> {
    pub fn new(source: S, cfg: SchedulerConfig) -> Self {
        Self {
            source: Arc::new(source),
            cfg,
            targets: Vec::new(),
        }
    }

    pub fn add_mirror(&mut self, mirror: Mirror, store: Store, hosts: Vec<MonitoredHost>) {
        self.targets.push(MirrorTarget {
            mirror,
            store,
            hosts,
        });
    }

    /// Starts every loop. Loops stop once `shutdown` flips to `true` or its
    /// sender goes away; a sync pass stops after the remote call in flight.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();
        for target in self.targets {
            match target.store.rebuild_min_max_cache() {
                Ok(bounds) => info!(mirror = %target.mirror, ?bounds, "rebuilt run bounds"),
                Err(err) => warn!(mirror = %target.mirror, error = ?err, "run bounds rebuild failed"),
            }

            for category in [HostCategory::Producer, HostCategory::Consumer] {
                let hosts: Vec<MonitoredHost> = target
                    .hosts
                    .iter()
                    .filter(|h| h.category == category)
                    .cloned()
                    .collect();
                if hosts.is_empty() {
                    continue;
                }
                handles.push(tokio::spawn(sync_loop(
                    self.source.clone(),
                    target.store.clone(),
                    target.mirror,
                    category,
                    hosts,
                    self.cfg.timezone,
                    self.cfg.info_interval,
                    shutdown.clone(),
                )));
            }

            handles.push(tokio::spawn(health_loop(
                self.source.clone(),
                target.store.clone(),
                target.mirror,
                self.cfg.status_interval,
                shutdown.clone(),
            )));

            handles.push(tokio::spawn(retention_loop(
                target.store,
                target.mirror,
                self.cfg.status_retention,
                self.cfg.retention_interval,
                shutdown.clone(),
            )));
        }
        handles
    }
}

#[allow(clippy::too_many_arguments)]
async fn sync_loop<S: TelemetrySource>(
    source: Arc<S>,
    store: Store,
    mirror: Mirror,
    category: HostCategory,
    hosts: Vec<MonitoredHost>,
    tz: Tz,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(%mirror, %category, hosts = hosts.len(), "sync loop started");
    loop {
        let reports = sync_hosts(source.as_ref(), &store, &hosts, tz, &shutdown).await;
        let persisted: usize = reports.iter().map(|r| r.persisted).sum();
        let failures: usize = reports.iter().map(|r| r.failures.len()).sum();
        let aborted = reports.iter().filter(|r| r.is_aborted()).count();
        if failures > 0 || aborted > 0 {
            warn!(%mirror, %category, persisted, failures, aborted, "sync pass finished with errors");
        } else {
            debug!(%mirror, %category, persisted, "sync pass finished");
        }

        if wait_or_shutdown(interval, &mut shutdown).await {
            break;
        }
    }
    info!(%mirror, %category, "sync loop stopped");
}

async fn health_loop<S: TelemetrySource>(
    source: Arc<S>,
    store: Store,
    mirror: Mirror,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if let Err(err) = poll_cluster(source.as_ref(), &store, mirror).await {
            warn!(%mirror, error = %err, "cluster status pass failed");
        }
        if wait_or_shutdown(interval, &mut shutdown).await {
            break;
        }
    }
    info!(%mirror, "health loop stopped");
}

async fn retention_loop(
    store: Store,
    mirror: Mirror,
    ttl: Duration,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    while !wait_or_shutdown(interval, &mut shutdown).await {
        match store.prune_host_statuses(ttl) {
            Ok(0) => {}
            Ok(removed) => debug!(%mirror, removed, "pruned host status history"),
            Err(err) => warn!(%mirror, error = ?err, "retention task failed"),
        }
    }
}

/// Sleeps for `period`; returns `true` when the loop should stop instead.
async fn wait_or_shutdown(period: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    if *shutdown.borrow() {
        return true;
    }
    tokio::select! {
        _ = tokio::time::sleep(period) => false,
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
    }
}
