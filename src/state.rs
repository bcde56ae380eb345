//! Shared snapshot container.
//!
//! Each periodic loop owns one field and replaces it wholesale; readers get a
//! copy with the activity flags merged into the bay records.

use crate::collectors::zfs::ApiStatus;
use crate::domain::device::ControllerRecord;
use crate::domain::pool_activity::PoolHistory;
use crate::domain::topology::TopologyScan;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// The externally visible aggregate, as published to the feed.
#[derive(Clone, Debug, Serialize)]
pub struct Snapshot {
    pub hostname: String,
    pub last_update: DateTime<Utc>,
    pub version: u64,
    pub topology: BTreeMap<String, ControllerRecord>,
    pub io_activity: BTreeMap<String, bool>,
    pub pool_activity: BTreeMap<String, PoolHistory>,
    pub pool_states: BTreeMap<String, String>,
    pub api_status: ApiStatus,
}

#[derive(Default)]
struct Inner {
    version: u64,
    last_update: Option<DateTime<Utc>>,
    topology: BTreeMap<String, ControllerRecord>,
    pool_states: BTreeMap<String, String>,
    api_status: ApiStatus,
    io_activity: HashMap<String, bool>,
    pool_activity: BTreeMap<String, PoolHistory>,
}

impl Inner {
    fn touch(&mut self) {
        self.version += 1;
        self.last_update = Some(Utc::now());
    }
}

#[derive(Clone)]
pub struct SharedState {
    hostname: Arc<str>,
    inner: Arc<RwLock<Inner>>,
}

impl SharedState {
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: Arc::from(hostname.into()),
            inner: Arc::new(RwLock::new(Inner::default())),
        }
    }

    // A writer that panicked mid-update still left whole values behind, so
    // the poisoned guard is safe to reuse.
    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn publish_topology(&self, scan: TopologyScan) {
        let mut inner = self.write();
        inner.topology = scan.controllers;
        inner.pool_states = scan.pool_states;
        inner.api_status = scan.api_status;
        inner.touch();
    }

    pub fn publish_activity(&self, activity: HashMap<String, bool>) {
        let mut inner = self.write();
        inner.io_activity = activity;
        inner.touch();
    }

    pub fn publish_pool_activity(&self, history: BTreeMap<String, PoolHistory>) {
        let mut inner = self.write();
        inner.pool_activity = history;
        inner.touch();
    }

    pub fn version(&self) -> u64 {
        self.read().version
    }

    /// Copy of the current state. Bays whose device is in the activity map
    /// carry its flag.
    pub fn snapshot(&self) -> Snapshot {
        let inner = self.read();

        let mut topology = inner.topology.clone();
        for bay in topology.values_mut().flat_map(|c| c.bays.iter_mut()) {
            bay.active = !bay.device_name.is_empty()
                && inner.io_activity.get(&bay.device_name).copied().unwrap_or(false);
        }

        Snapshot {
            hostname: self.hostname.to_string(),
            last_update: inner.last_update.unwrap_or_else(Utc::now),
            version: inner.version,
            topology,
            io_activity: inner.io_activity.iter().map(|(k, v)| (k.clone(), *v)).collect(),
            pool_activity: inner.pool_activity.clone(),
            pool_states: inner.pool_states.clone(),
            api_status: inner.api_status.clone(),
        }
    }
}

/// Host name for the feed, falling back to "localhost".
pub fn local_hostname() -> String {
    match nix::unistd::gethostname() {
        Ok(name) => name.to_string_lossy().into_owned(),
        Err(e) => {
            log::warn!("gethostname failed: {}", e);
            "localhost".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::pci::PciAddress;
    use crate::domain::device::{BayStatus, CapacityEstimate};

    fn scan_with_disk(device: &str) -> TopologyScan {
        let addr: PciAddress = "0000:03:00.0".parse().unwrap();
        let mut ctrl = ControllerRecord::new(addr, CapacityEstimate::fixed(2));
        ctrl.bays[1].status = BayStatus::Present;
        ctrl.bays[1].device_name = device.to_string();

        let mut controllers = BTreeMap::new();
        controllers.insert(addr.key(), ctrl);
        TopologyScan {
            controllers,
            ..Default::default()
        }
    }

    #[test]
    fn snapshot_merges_activity_into_bays() {
        let state = SharedState::new("nas01");
        state.publish_topology(scan_with_disk("sdb"));
        state.publish_activity(HashMap::from([("sdb".to_string(), true), ("sdz".to_string(), true)]));

        let snap = state.snapshot();
        let bays = &snap.topology["0000-03-00-0"].bays;
        assert!(bays[1].active);
        assert!(!bays[0].active);
        assert_eq!(snap.hostname, "nas01");
        assert_eq!(snap.io_activity.len(), 2);
    }

    #[test]
    fn readers_get_a_copy() {
        let state = SharedState::new("nas01");
        state.publish_topology(scan_with_disk("sdb"));
        let before = state.snapshot();

        state.publish_topology(TopologyScan::default());
        assert_eq!(before.topology.len(), 1);
        assert!(state.snapshot().topology.is_empty());
    }

    #[test]
    fn every_publish_bumps_the_version() {
        let state = SharedState::new("nas01");
        assert_eq!(state.version(), 0);
        state.publish_activity(HashMap::new());
        state.publish_pool_activity(BTreeMap::new());
        state.publish_topology(TopologyScan::default());
        assert_eq!(state.version(), 3);
        assert_eq!(state.snapshot().version, 3);
    }

    #[test]
    fn serializes_feed_shape() {
        let state = SharedState::new("nas01");
        state.publish_topology(scan_with_disk("sdb"));
        let json = serde_json::to_value(state.snapshot()).unwrap();

        for key in [
            "hostname",
            "last_update",
            "version",
            "topology",
            "io_activity",
            "pool_activity",
            "pool_states",
            "api_status",
        ] {
            assert!(json.get(key).is_some(), "missing {}", key);
        }
        let bay = &json["topology"]["0000-03-00-0"]["bays"][1];
        assert_eq!(bay["status"], "PRESENT");
        assert_eq!(bay["label"], "BAY 2");
        assert_eq!(bay["pool_state"], "");
        assert_eq!(bay["vdev_status"], "");
    }
}
