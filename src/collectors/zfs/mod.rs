//! ZFS pool membership and health per whole-disk device.
//!
//! Two sources: the TrueNAS middleware (`midclt call pool.query`) which
//! returns the vdev tree as JSON, and `zpool status` text as a fallback.
//! Both produce the same [`PoolHealth`] map keyed by base device name.

mod api;
mod status;

pub use api::{resolve_pools, ApiPool, ApiScan, ApiTopology, Vdev, VdevStats};
pub use status::parse_zpool_status;

use crate::config::ApiRetry;
use crate::domain::device::{base_device_name, HealthState};
use crate::error::ProbeError;
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolHealthEntry {
    pub pool: String,
    pub index: u32,
    pub state: HealthState,
    pub read_errors: u64,
    pub write_errors: u64,
    pub checksum_errors: u64,
    pub pool_state: String,
    /// Raw leaf status as reported by the API; empty on the CLI path
    pub vdev_status: String,
}

/// Resolver output for one scan cycle. Never merged with an earlier cycle.
#[derive(Clone, Debug, Default)]
pub struct PoolHealth {
    pub devices: HashMap<String, PoolHealthEntry>,
    pub pool_states: BTreeMap<String, String>,
}

impl PoolHealth {
    /// Pool-level remediation dominates leaf-level reporting.
    pub fn mark_pool_resilvering(&mut self, pool: &str) {
        for (dev, entry) in self.devices.iter_mut().filter(|(_, e)| e.pool == pool) {
            debug!("{} marked RESILVERING by active scan on {}", dev, pool);
            entry.state = HealthState::Resilvering;
        }
    }

    /// Assign the next leaf of `pool`; keys are always base device names.
    pub(crate) fn insert(&mut self, device: &str, entry: PoolHealthEntry) {
        self.devices.insert(base_device_name(device).to_string(), entry);
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ApiStatus {
    pub available: bool,
    pub error_message: String,
}

/// Turn a leaf's raw identity (partition UUID or kernel name) into the
/// base device name it lives on.
pub fn resolve_disk_id(id: &str, uuid_to_dev: &HashMap<String, String>) -> String {
    let dev = uuid_to_dev.get(id).map(String::as_str).unwrap_or(id);
    base_device_name(dev).to_string()
}

pub(crate) fn pool_is_failed(pool_state: &str) -> bool {
    matches!(pool_state, "FAULTED" | "SUSPENDED")
}

/// Leaf state, first match wins:
/// failed pool, rebuild in progress, leaf gone, error counters, own status.
pub(crate) fn derive_leaf_state(
    pool_state: &str,
    vdev_status: &str,
    repairing: bool,
    total_errors: u64,
) -> HealthState {
    if pool_is_failed(pool_state) {
        HealthState::Faulted
    } else if repairing || matches!(vdev_status, "REBUILDING" | "RESILVERING") {
        HealthState::Resilvering
    } else if matches!(vdev_status, "UNAVAIL" | "REMOVED") {
        HealthState::Faulted
    } else if total_errors > 0 {
        HealthState::Degraded
    } else {
        HealthState::from_vdev_status(vdev_status)
    }
}

const API_PROGRAM: &str = "midclt";
const ZPOOL_PROGRAM: &str = "zpool";

pub struct ZfsResolver {
    retry: ApiRetry,
    timeout: Duration,
    api_program: String,
    zpool_program: String,
    api_disabled: bool,
    status: ApiStatus,
}

impl ZfsResolver {
    pub fn new(retry: ApiRetry, timeout: Duration) -> Self {
        Self {
            retry,
            timeout,
            api_program: API_PROGRAM.to_string(),
            zpool_program: ZPOOL_PROGRAM.to_string(),
            api_disabled: false,
            status: ApiStatus::default(),
        }
    }

    /// Use other executables for the management API and `zpool`.
    pub fn with_programs(mut self, api: impl Into<String>, zpool: impl Into<String>) -> Self {
        self.api_program = api.into();
        self.zpool_program = zpool.into();
        self
    }

    pub fn api_status(&self) -> ApiStatus {
        self.status.clone()
    }

    /// Pool membership and health for every leaf disk, keyed by base device.
    ///
    /// Tries the management API first and falls back to `zpool status`.
    /// A failure of both yields an empty map.
    pub async fn resolve(&mut self, uuid_to_dev: &HashMap<String, String>) -> PoolHealth {
        if !self.api_disabled {
            match api::query(&self.api_program, self.timeout).await {
                Ok(pools) => {
                    self.status = ApiStatus {
                        available: true,
                        error_message: String::new(),
                    };
                    return resolve_pools(&pools, uuid_to_dev);
                }
                Err(e) => self.record_api_failure(&e),
            }
        }

        match status::query(&self.zpool_program, self.timeout).await {
            Ok(text) => parse_zpool_status(&text, uuid_to_dev),
            Err(e) => {
                warn!("zpool status unavailable: {}", e);
                PoolHealth::default()
            }
        }
    }

    fn record_api_failure(&mut self, err: &ProbeError) {
        let message = match err {
            ProbeError::NotFound(_) => "TrueNAS API (midclt) not found".to_string(),
            ProbeError::Timeout { .. } => "TrueNAS API timeout".to_string(),
            ProbeError::Json(_) => "TrueNAS API response invalid".to_string(),
            other => format!("TrueNAS API error: {}", other),
        };

        let disable = match self.retry {
            ApiRetry::EveryCycle => false,
            ApiRetry::DisableOnMissing => err.is_missing(),
            ApiRetry::DisableOnFailure => true,
        };

        if err.is_missing() {
            debug!("{}, using zpool status", message);
        } else {
            warn!("{}, falling back to zpool status", message);
        }
        if disable {
            info!("Management API disabled for this process ({:?})", self.retry);
            self.api_disabled = true;
        }

        self.status = ApiStatus {
            available: false,
            error_message: message,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use tempfile::TempDir;

    #[test]
    fn failed_pool_overrides_everything() {
        for status in ["ONLINE", "RESILVERING", "UNAVAIL", "DEGRADED"] {
            assert_eq!(derive_leaf_state("FAULTED", status, true, 9), HealthState::Faulted);
            assert_eq!(derive_leaf_state("SUSPENDED", status, false, 0), HealthState::Faulted);
        }
    }

    #[test]
    fn checksum_error_degrades_online_leaf() {
        assert_eq!(derive_leaf_state("ONLINE", "ONLINE", false, 1), HealthState::Degraded);
    }

    #[test]
    fn rebuild_beats_missing_and_errors() {
        assert_eq!(derive_leaf_state("DEGRADED", "REBUILDING", false, 3), HealthState::Resilvering);
        assert_eq!(derive_leaf_state("DEGRADED", "UNAVAIL", false, 3), HealthState::Faulted);
        assert_eq!(derive_leaf_state("ONLINE", "ONLINE", true, 3), HealthState::Resilvering);
    }

    #[test]
    fn clean_leaf_passes_status_through() {
        assert_eq!(derive_leaf_state("ONLINE", "ONLINE", false, 0), HealthState::Online);
        assert_eq!(derive_leaf_state("DEGRADED", "OFFLINE", false, 0), HealthState::Offline);
    }

    #[test]
    fn disk_ids_resolve_through_partuuid_map() {
        let map = HashMap::from([(
            "0b1c4f0e-1111-2222-3333-444455556666".to_string(),
            "sdc".to_string(),
        )]);
        assert_eq!(resolve_disk_id("0b1c4f0e-1111-2222-3333-444455556666", &map), "sdc");
        assert_eq!(resolve_disk_id("sdd2", &map), "sdd");
    }

    #[test]
    fn missing_api_is_sticky_by_default() {
        let mut resolver = ZfsResolver::new(ApiRetry::DisableOnMissing, Duration::from_secs(1));
        resolver.record_api_failure(&ProbeError::NotFound("midclt".into()));
        assert!(resolver.api_disabled);
        assert!(!resolver.api_status().available);

        let mut resolver = ZfsResolver::new(ApiRetry::DisableOnMissing, Duration::from_secs(1));
        resolver.record_api_failure(&ProbeError::Timeout {
            program: "midclt".into(),
            timeout: Duration::from_secs(5),
        });
        assert!(!resolver.api_disabled);
        assert_eq!(resolver.api_status().error_message, "TrueNAS API timeout");
    }

    #[test]
    fn every_cycle_never_disables() {
        let mut resolver = ZfsResolver::new(ApiRetry::EveryCycle, Duration::from_secs(1));
        resolver.record_api_failure(&ProbeError::NotFound("midclt".into()));
        assert!(!resolver.api_disabled);
    }

    const ZPOOL_STATUS: &str = "\
  pool: tank
 state: ONLINE
config:

\tNAME        STATE     READ WRITE CKSUM
\ttank        ONLINE       0     0     0
\t  mirror-0  ONLINE       0     0     0
\t    sda     ONLINE       0     0     0
\t    sdb     ONLINE       0     0     2
";

    fn script(dir: &Path, name: &str, body: &str) -> String {
        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    fn zpool_fixture(dir: &Path) -> String {
        let text = dir.join("status.txt");
        fs::write(&text, ZPOOL_STATUS).unwrap();
        script(dir, "zpool", &format!("cat '{}'", text.display()))
    }

    #[tokio::test]
    async fn failing_api_falls_back_to_zpool_status() {
        let tmp = TempDir::new().unwrap();
        let midclt = script(tmp.path(), "midclt", "echo 'connection refused' >&2; exit 1");
        let mut resolver = ZfsResolver::new(ApiRetry::DisableOnMissing, Duration::from_secs(2))
            .with_programs(midclt, zpool_fixture(tmp.path()));

        let health = resolver.resolve(&HashMap::new()).await;
        assert_eq!(health.devices.len(), 2);
        assert_eq!(health.devices["sdb"].state, HealthState::Degraded);
        assert_eq!(health.pool_states["tank"], "ONLINE");

        let status = resolver.api_status();
        assert!(!status.available);
        assert!(status.error_message.starts_with("TrueNAS API error"));
        // Not a missing tool: the API is retried next cycle.
        assert!(!resolver.api_disabled);
    }

    #[tokio::test]
    async fn malformed_api_json_falls_back() {
        let tmp = TempDir::new().unwrap();
        let midclt = script(tmp.path(), "midclt", "echo '[{\"name\": '");
        let mut resolver = ZfsResolver::new(ApiRetry::DisableOnFailure, Duration::from_secs(2))
            .with_programs(midclt, zpool_fixture(tmp.path()));

        let health = resolver.resolve(&HashMap::new()).await;
        assert_eq!(health.devices["sda"].pool, "tank");
        assert_eq!(resolver.api_status().error_message, "TrueNAS API response invalid");
        assert!(resolver.api_disabled);
    }

    #[tokio::test]
    async fn api_result_is_used_when_available() {
        let tmp = TempDir::new().unwrap();
        let json = tmp.path().join("pools.json");
        fs::write(
            &json,
            r#"[{"name": "tank", "status": "ONLINE", "healthy": true,
                 "topology": {"data": [{"type": "DISK", "status": "ONLINE",
                                        "path": "/dev/sdc1", "children": []}]}}]"#,
        )
        .unwrap();
        let midclt = script(tmp.path(), "midclt", &format!("cat '{}'", json.display()));
        let mut resolver = ZfsResolver::new(ApiRetry::DisableOnMissing, Duration::from_secs(2))
            .with_programs(midclt, tmp.path().join("no-zpool").to_string_lossy());

        let health = resolver.resolve(&HashMap::new()).await;
        assert_eq!(health.devices.len(), 1);
        assert_eq!(health.devices["sdc"].index, 1);
        assert!(resolver.api_status().available);
    }

    #[tokio::test]
    async fn both_sources_missing_gives_empty_map() {
        let tmp = TempDir::new().unwrap();
        let mut resolver = ZfsResolver::new(ApiRetry::DisableOnMissing, Duration::from_secs(1))
            .with_programs(
                tmp.path().join("midclt").to_string_lossy(),
                tmp.path().join("zpool").to_string_lossy(),
            );

        let health = resolver.resolve(&HashMap::new()).await;
        assert!(health.devices.is_empty());
        assert!(health.pool_states.is_empty());
        assert!(resolver.api_disabled);
        assert_eq!(resolver.api_status().error_message, "TrueNAS API (midclt) not found");
    }
}
