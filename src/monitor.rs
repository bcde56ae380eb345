//! The periodic loops that feed [`SharedState`], plus the feed publisher.
//!
//! Loops run for the lifetime of the process and never wait on each other.
//! A failed cycle is logged and the previous value stays in place.

use crate::collectors::blockdev;
use crate::collectors::diskstats::read_diskstats;
use crate::config::Config;
use crate::domain::activity::IoActivitySampler;
use crate::domain::pool_activity::PoolActivityAggregator;
use crate::domain::topology::TopologyReconciler;
use crate::state::{SharedState, Snapshot};
use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::{interval, Interval, MissedTickBehavior};

fn ticker(period_ms: u64) -> Interval {
    let mut ticker = interval(Duration::from_millis(period_ms.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

pub struct Monitor {
    config: Arc<Config>,
    state: SharedState,
}

impl Monitor {
    pub fn new(config: Arc<Config>, state: SharedState) -> Self {
        Self { config, state }
    }

    /// Spawn the three sampling loops.
    pub fn spawn(&self) -> Vec<JoinHandle<()>> {
        vec![
            tokio::spawn(activity_loop(self.config.clone(), self.state.clone())),
            tokio::spawn(topology_loop(self.config.clone(), self.state.clone())),
            tokio::spawn(pool_activity_loop(self.config.clone(), self.state.clone())),
        ]
    }

    /// Spawn the loop that rewrites the feed file.
    pub fn spawn_publisher(&self, output: PathBuf) -> JoinHandle<()> {
        tokio::spawn(publish_loop(
            self.config.general.publish_interval_ms,
            self.state.clone(),
            output,
        ))
    }
}

async fn activity_loop(config: Arc<Config>, state: SharedState) {
    let mut sampler = IoActivitySampler::new(config.activity.cooldown_ticks);
    let mut ticker = ticker(config.general.activity_interval_ms);
    let mut source_ok = true;

    loop {
        ticker.tick().await;
        let activity = match read_diskstats(&config.paths.diskstats).await {
            Ok(sample) => {
                if !source_ok {
                    info!("{} readable again", config.paths.diskstats.display());
                    source_ok = true;
                }
                sampler.observe(&sample)
            }
            Err(e) => {
                if source_ok {
                    warn!("Cannot read {}: {}", config.paths.diskstats.display(), e);
                    source_ok = false;
                }
                sampler.idle()
            }
        };
        state.publish_activity(activity);
    }
}

async fn topology_loop(config: Arc<Config>, state: SharedState) {
    let mut ticker = ticker(config.general.topology_interval_ms);
    let mut reconciler = TopologyReconciler::new(config);

    loop {
        ticker.tick().await;
        let started = Instant::now();
        match reconciler.scan().await {
            Ok(scan) => {
                debug!("Topology scan took {:?}", started.elapsed());
                state.publish_topology(scan);
            }
            Err(e) => error!("Topology scan failed, keeping previous snapshot: {:#}", e),
        }
    }
}

async fn pool_activity_loop(config: Arc<Config>, state: SharedState) {
    let mut aggregator =
        PoolActivityAggregator::new(config.activity.smoothing_window, config.activity.history_len);
    let mut ticker = ticker(config.general.pool_sample_interval_ms);
    let refresh_every = Duration::from_millis(config.general.topology_interval_ms);

    let mut members: HashMap<String, String> = HashMap::new();
    let mut members_at: Option<Instant> = None;
    let mut last_sample = Instant::now();

    loop {
        ticker.tick().await;

        if members_at.map_or(true, |t| t.elapsed() >= refresh_every) {
            match blockdev::zfs_member_pools(config.general.command_timeout()).await {
                Ok(m) => {
                    debug!("{} ZFS member devices", m.len());
                    members = m;
                }
                Err(e) => debug!("Pool membership unavailable: {}", e),
            }
            members_at = Some(Instant::now());
        }

        let sample = match read_diskstats(&config.paths.diskstats).await {
            Ok(s) => s,
            Err(e) => {
                debug!("Pool sample skipped: {}", e);
                continue;
            }
        };

        let now = Instant::now();
        aggregator.observe(&sample, &members, now.duration_since(last_sample));
        last_sample = now;
        state.publish_pool_activity(aggregator.history());
    }
}

async fn publish_loop(period_ms: u64, state: SharedState, output: PathBuf) {
    let mut ticker = ticker(period_ms);
    let mut last_version = None;

    loop {
        ticker.tick().await;
        let snapshot = state.snapshot();
        if last_version == Some(snapshot.version) {
            continue;
        }
        match write_feed(&output, &snapshot).await {
            Ok(()) => last_version = Some(snapshot.version),
            Err(e) => error!("{:#}", e),
        }
    }
}

/// Write the snapshot as JSON next to `path` and rename it into place, so
/// pollers never see a half-written file.
pub async fn write_feed(path: &Path, snapshot: &Snapshot) -> Result<()> {
    let json = serde_json::to_vec_pretty(snapshot).context("Failed to serialize snapshot")?;

    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, &json)
        .await
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("Failed to move feed into {}", path.display()))?;
    Ok(())
}
