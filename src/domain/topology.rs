use crate::collectors::blockdev::{self, DeviceIdentity};
use crate::collectors::bypath::{read_partuuid_map, resolve_device_name, scan_by_path};
use crate::collectors::enclosure::SysfsInspector;
use crate::collectors::pci::{classify_controller, ControllerClass, PciAddress};
use crate::collectors::zfs::{ApiStatus, PoolHealth, PoolHealthEntry, ZfsResolver};
use crate::config::Config;
use crate::domain::capacity::CapacityEstimator;
use crate::domain::device::{
    base_device_name, BayRecord, BayStatus, CapacityEstimate, ControllerRecord, HealthState,
};
use anyhow::{Context, Result};
use log::{debug, warn};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Result of one full topology cycle.
#[derive(Clone, Debug, Default)]
pub struct TopologyScan {
    /// Controller key (dash form of the PCI address) -> controller
    pub controllers: BTreeMap<String, ControllerRecord>,
    pub pool_states: BTreeMap<String, String>,
    pub api_status: ApiStatus,
}

/// A disk found behind a controller during this cycle.
#[derive(Clone, Debug, Default)]
pub struct DiscoveredDisk {
    pub device_name: String,
    pub identity: DeviceIdentity,
}

/// Builds the bay grids for one cycle. Controllers are created fresh; no
/// state carries over from earlier cycles.
#[derive(Default)]
pub struct TopologyBuilder {
    controllers: BTreeMap<String, ControllerRecord>,
}

impl TopologyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_controller(&self, addr: &PciAddress) -> bool {
        self.controllers.contains_key(&addr.key())
    }

    pub fn add_controller(&mut self, addr: PciAddress, capacity: CapacityEstimate, name: Option<String>) {
        let mut record = ControllerRecord::new(addr, capacity);
        record.name = name;
        self.controllers.insert(addr.key(), record);
    }

    /// Mark a bay PRESENT, growing the grid when discovery finds a higher
    /// index than the estimated capacity.
    pub fn place(
        &mut self,
        addr: &PciAddress,
        bay_index: usize,
        disk: DiscoveredDisk,
        health: Option<&PoolHealthEntry>,
    ) {
        let controller = self
            .controllers
            .entry(addr.key())
            .or_insert_with(|| ControllerRecord::new(*addr, CapacityEstimate::unknown()));

        if bay_index >= controller.bays.len() {
            debug!(
                "{}: bay {} beyond estimated {} bays, growing grid",
                addr, bay_index, controller.capacity.max_bays
            );
        }
        controller.ensure_bay(bay_index);

        let bay = &mut controller.bays[bay_index];
        if bay.is_present() {
            warn!(
                "{}: bay {} claimed by both {} and {}",
                addr, bay_index, bay.device_name, disk.device_name
            );
        }

        let mut record = BayRecord {
            status: BayStatus::Present,
            serial: disk.identity.serial,
            size_bytes: disk.identity.size_bytes,
            device_name: disk.device_name,
            state: HealthState::Unallocated,
            ..BayRecord::empty(bay_index)
        };
        if let Some(h) = health {
            record.pool_name = h.pool.clone();
            record.pool_index = Some(h.index);
            record.state = h.state;
            record.read_errors = h.read_errors;
            record.write_errors = h.write_errors;
            record.checksum_errors = h.checksum_errors;
            record.pool_state = h.pool_state.clone();
            record.vdev_status = h.vdev_status.clone();
        }
        *bay = record;
    }

    /// Pad every grid to its estimated capacity and hand the map over.
    pub fn finish(mut self) -> BTreeMap<String, ControllerRecord> {
        for controller in self.controllers.values_mut() {
            controller.pad_to_capacity();
        }
        self.controllers
    }
}

/// Maps by-path disks onto controllers and bays, decorated with pool health.
pub struct TopologyReconciler {
    config: Arc<Config>,
    estimator: CapacityEstimator,
    resolver: ZfsResolver,
}

impl TopologyReconciler {
    pub fn new(config: Arc<Config>) -> Self {
        let estimator = CapacityEstimator::new(
            SysfsInspector::new(&config.paths.sysfs_root),
            config.general.vendor_timeout(),
        );
        let resolver = ZfsResolver::new(config.zfs.api_retry, config.general.command_timeout());
        Self::with_parts(config, estimator, resolver)
    }

    pub fn with_parts(config: Arc<Config>, estimator: CapacityEstimator, resolver: ZfsResolver) -> Self {
        Self {
            config,
            estimator,
            resolver,
        }
    }

    /// Run one full cycle. An error leaves the caller's previous snapshot
    /// in place; partial results are never returned.
    pub async fn scan(&mut self) -> Result<TopologyScan> {
        let paths = &self.config.paths;

        let uuid_to_dev = read_partuuid_map(&paths.by_partuuid_dir);
        let health: PoolHealth = self.resolver.resolve(&uuid_to_dev).await;

        let entries = scan_by_path(&paths.by_path_dir)
            .with_context(|| format!("Failed to list {}", paths.by_path_dir.display()))?;

        let mut builder = TopologyBuilder::new();
        let mut classes: HashMap<PciAddress, ControllerClass> = HashMap::new();

        for entry in entries {
            let addr = entry.controller;
            let class = *classes
                .entry(addr)
                .or_insert_with(|| classify_controller(&paths.sysfs_root, &addr));
            if !class.is_physical() {
                debug!("Skipping {} on {:?} controller {}", entry.name, class, addr);
                continue;
            }

            // Capacity is estimated once per controller per cycle.
            if !builder.has_controller(&addr) {
                let overrides = self.config.controller_override(&addr.to_string());
                let capacity = self.estimator.estimate(&addr, overrides).await;
                builder.add_controller(addr, capacity, overrides.and_then(|o| o.name.clone()));
            }

            let Some(device_name) = resolve_device_name(&entry.link) else {
                warn!("{}: dangling by-path link", entry.name);
                continue;
            };

            let identity = match blockdev::identity(&entry.link, self.config.general.command_timeout()).await {
                Ok(id) => id,
                Err(e) => {
                    debug!("{}: identity lookup failed: {}", device_name, e);
                    DeviceIdentity::default()
                }
            };

            let pool = health.devices.get(base_device_name(&device_name));
            debug!(
                "{} -> {} bay {} ({})",
                device_name,
                addr,
                entry.bay_index,
                pool.map(|p| p.pool.as_str()).unwrap_or("unallocated")
            );

            builder.place(
                &addr,
                entry.bay_index,
                DiscoveredDisk {
                    device_name,
                    identity,
                },
                pool,
            );
        }

        let controllers = builder.finish();
        debug!(
            "Topology: {} controllers, {} present bays",
            controllers.len(),
            controllers.values().map(|c| c.present_count()).sum::<usize>()
        );

        Ok(TopologyScan {
            controllers,
            pool_states: health.pool_states,
            api_status: self.resolver.api_status(),
        })
    }
}
