use super::{derive_leaf_state, resolve_disk_id, PoolHealth, PoolHealthEntry};
use crate::collectors::command;
use crate::domain::device::HealthState;
use crate::error::ProbeError;
use log::{debug, info};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// One pool as returned by `midclt call pool.query`.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiPool {
    pub name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default = "default_healthy")]
    pub healthy: bool,
    #[serde(default)]
    pub scan: Option<ApiScan>,
    #[serde(default)]
    pub topology: Option<ApiTopology>,
}

fn default_healthy() -> bool {
    true
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiScan {
    #[serde(default)]
    pub function: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
}

impl ApiScan {
    /// A resilver, rebuild or repair that has not finished.
    pub fn is_active_remediation(&self) -> bool {
        let function = self.function.as_deref().unwrap_or("");
        let state = self.state.as_deref().unwrap_or("FINISHED");
        matches!(function, "RESILVER" | "REBUILD" | "REPAIR")
            && !matches!(state, "FINISHED" | "CANCELED")
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiTopology {
    #[serde(default)]
    pub data: Vec<Vdev>,
    #[serde(default)]
    pub cache: Vec<Vdev>,
    #[serde(default)]
    pub log: Vec<Vdev>,
    #[serde(default)]
    pub spare: Vec<Vdev>,
}

impl ApiTopology {
    /// Top-level vdevs in traversal order: data, cache, log, spare.
    fn groups(&self) -> impl Iterator<Item = &Vdev> {
        self.data
            .iter()
            .chain(&self.cache)
            .chain(&self.log)
            .chain(&self.spare)
    }
}

/// A node of the vdev tree; nodes without children are leaf disks.
#[derive(Debug, Clone, Deserialize)]
pub struct Vdev {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default = "default_vdev_status")]
    pub status: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub stats: Option<VdevStats>,
    #[serde(default)]
    pub children: Vec<Vdev>,
}

fn default_vdev_status() -> String {
    "ONLINE".to_string()
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default)]
pub struct VdevStats {
    pub read_errors: u64,
    pub write_errors: u64,
    pub checksum_errors: u64,
}

impl Vdev {
    /// Device identity from the leaf path: the partition UUID for
    /// by-partuuid paths, otherwise the kernel name.
    fn disk_id(&self) -> Option<&str> {
        let path = self.path.as_deref()?;
        if !path.contains("/dev/") {
            return None;
        }
        path.rsplit('/').next().filter(|s| !s.is_empty())
    }
}

pub(super) async fn query(program: &str, timeout: Duration) -> Result<Vec<ApiPool>, ProbeError> {
    let output = command::run(program, &["call", "pool.query"], timeout).await?;
    Ok(serde_json::from_str(&output)?)
}

/// Pool name -> effective state as shown on the dashboard.
fn pool_state(pool: &ApiPool) -> String {
    if pool.healthy {
        return "ONLINE".to_string();
    }
    match pool.status.as_str() {
        "FAULTED" | "UNAVAIL" => "FAULTED".to_string(),
        other => other.to_string(),
    }
}

/// Walk every pool's vdev tree and derive per-disk health.
pub fn resolve_pools(pools: &[ApiPool], uuid_to_dev: &HashMap<String, String>) -> PoolHealth {
    let mut health = PoolHealth::default();

    for pool in pools {
        let state = pool_state(pool);
        health.pool_states.insert(pool.name.clone(), state.clone());

        let mut walker = LeafWalker {
            pool: &pool.name,
            pool_state: &state,
            uuid_to_dev,
            next_index: 0,
            health: &mut health,
        };
        if let Some(topology) = &pool.topology {
            for vdev in topology.groups() {
                walker.visit(vdev);
            }
        }

        if let Some(scan) = pool.scan.as_ref().filter(|s| s.is_active_remediation()) {
            info!(
                "Pool {} has active {} ({})",
                pool.name,
                scan.function.as_deref().unwrap_or("?"),
                scan.state.as_deref().unwrap_or("?")
            );
            health.mark_pool_resilvering(&pool.name);
        }
    }

    health
}

struct LeafWalker<'a> {
    pool: &'a str,
    pool_state: &'a str,
    uuid_to_dev: &'a HashMap<String, String>,
    next_index: u32,
    health: &'a mut PoolHealth,
}

impl LeafWalker<'_> {
    fn visit(&mut self, vdev: &Vdev) {
        if !vdev.children.is_empty() {
            for child in &vdev.children {
                self.visit(child);
            }
            return;
        }

        let Some(id) = vdev.disk_id() else {
            debug!("{}: leaf {:?} has no device path", self.pool, vdev.kind);
            return;
        };

        self.next_index += 1;
        let device = resolve_disk_id(id, self.uuid_to_dev);
        let stats = vdev.stats.unwrap_or_default();
        let total = stats.read_errors + stats.write_errors + stats.checksum_errors;
        let state = derive_leaf_state(self.pool_state, &vdev.status, false, total);

        if state != HealthState::Online {
            debug!(
                "{}: {} is {:?} (status {}, R:{} W:{} C:{})",
                self.pool,
                device,
                state,
                vdev.status,
                stats.read_errors,
                stats.write_errors,
                stats.checksum_errors
            );
        }

        self.health.insert(
            &device,
            PoolHealthEntry {
                pool: self.pool.to_string(),
                index: self.next_index,
                state,
                read_errors: stats.read_errors,
                write_errors: stats.write_errors,
                checksum_errors: stats.checksum_errors,
                pool_state: self.pool_state.to_string(),
                vdev_status: vdev.status.clone(),
            },
        );
    }
}
