use crate::collectors::pci::PciAddress;
use serde::Serialize;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BayStatus {
    #[default]
    Empty,
    Present,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthState {
    Online,
    Degraded,
    Faulted,
    Offline,
    Resilvering,
    Unallocated,
    #[default]
    Unknown,
}

impl HealthState {
    /// Map a ZFS vdev status word onto the display states.
    pub fn from_vdev_status(status: &str) -> Self {
        match status.trim().to_ascii_uppercase().as_str() {
            "ONLINE" => HealthState::Online,
            "DEGRADED" => HealthState::Degraded,
            "FAULTED" | "UNAVAIL" | "REMOVED" => HealthState::Faulted,
            "OFFLINE" => HealthState::Offline,
            "RESILVERING" | "REBUILDING" => HealthState::Resilvering,
            _ => HealthState::Unknown,
        }
    }
}

/// Upper bound on bays per controller, for both estimates and discovered
/// bay numbers.
pub const MAX_BAYS: usize = 4096;

/// One physical drive slot.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct BayRecord {
    pub bay_index: usize,
    pub label: String,
    pub status: BayStatus,
    pub serial: String,
    pub size_bytes: u64,
    pub device_name: String,
    pub pool_name: String,
    pub pool_index: Option<u32>,
    pub state: HealthState,
    pub read_errors: u64,
    pub write_errors: u64,
    pub checksum_errors: u64,
    /// State of the owning pool; empty when unallocated
    pub pool_state: String,
    /// Raw leaf status from the management API; empty on the CLI path
    pub vdev_status: String,
    pub active: bool,
}

impl BayRecord {
    pub fn empty(bay_index: usize) -> Self {
        Self {
            bay_index,
            label: format!("BAY {}", bay_index + 1),
            ..Self::default()
        }
    }

    pub fn is_present(&self) -> bool {
        self.status == BayStatus::Present
    }
}

/// Output of the capacity estimator for one controller.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CapacityEstimate {
    pub max_bays: usize,
    pub has_backplane: bool,
    pub port_count: usize,
    pub capacity_unknown: bool,
}

impl CapacityEstimate {
    pub fn unknown() -> Self {
        Self {
            capacity_unknown: true,
            ..Self::default()
        }
    }

    pub fn fixed(max_bays: usize) -> Self {
        Self {
            max_bays,
            ..Self::default()
        }
    }
}

/// One physical storage controller and its bay grid.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ControllerRecord {
    pub pci_address: PciAddress,
    pub name: Option<String>,
    #[serde(flatten)]
    pub capacity: CapacityEstimate,
    pub bays: Vec<BayRecord>,
}

impl ControllerRecord {
    /// New controller with `max_bays` empty placeholders (none when the
    /// capacity is unknown).
    pub fn new(pci_address: PciAddress, capacity: CapacityEstimate) -> Self {
        let bays = (0..capacity.max_bays).map(BayRecord::empty).collect();
        Self {
            pci_address,
            name: None,
            capacity,
            bays,
        }
    }

    /// Grow the grid with empty bays until `index` is addressable.
    pub fn ensure_bay(&mut self, index: usize) {
        while self.bays.len() <= index {
            let next = self.bays.len();
            self.bays.push(BayRecord::empty(next));
        }
    }

    /// Pad up to the estimated capacity so the display grid stays stable.
    pub fn pad_to_capacity(&mut self) {
        if self.capacity.max_bays > 0 {
            self.ensure_bay(self.capacity.max_bays - 1);
        }
    }

    pub fn present_count(&self) -> usize {
        self.bays.iter().filter(|b| b.is_present()).count()
    }
}

/// Reduce a block device or partition name to its whole-disk name.
///
/// `sda1` -> `sda`, `nvme0n1p2` -> `nvme0n1`, `nvme0n1` -> `nvme0n1`.
pub fn base_device_name(name: &str) -> &str {
    let name = name.rsplit('/').next().unwrap_or(name);

    // Names whose whole-disk form already ends in a digit use a pN suffix.
    if ["nvme", "mmcblk", "loop", "nbd"].iter().any(|p| name.starts_with(p)) {
        if let Some(idx) = name.rfind('p') {
            let suffix = &name[idx + 1..];
            let disk = &name[..idx];
            if disk.ends_with(|c: char| c.is_ascii_digit())
                && !suffix.is_empty()
                && suffix.chars().all(|c| c.is_ascii_digit())
            {
                return &name[..idx];
            }
        }
        return name;
    }

    name.trim_end_matches(|c: char| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_only_trailing_digits() {
        assert_eq!(base_device_name("sda1"), "sda");
        assert_eq!(base_device_name("sdab12"), "sdab");
        assert_eq!(base_device_name("sda"), "sda");
        assert_eq!(base_device_name("vdb3"), "vdb");
    }

    #[test]
    fn nvme_partitions_reduce_to_namespace() {
        assert_eq!(base_device_name("nvme0n1p1"), "nvme0n1");
        assert_eq!(base_device_name("nvme0n1"), "nvme0n1");
        assert_eq!(base_device_name("loop0"), "loop0");
        assert_eq!(base_device_name("mmcblk0p2"), "mmcblk0");
        assert_eq!(
            base_device_name(base_device_name("nvme0n1p1")),
            base_device_name("nvme0n1")
        );
    }

    #[test]
    fn accepts_device_paths() {
        assert_eq!(base_device_name("/dev/sdc2"), "sdc");
    }

    #[test]
    fn vdev_status_mapping() {
        assert_eq!(HealthState::from_vdev_status("ONLINE"), HealthState::Online);
        assert_eq!(HealthState::from_vdev_status("REMOVED"), HealthState::Faulted);
        assert_eq!(HealthState::from_vdev_status("AVAIL"), HealthState::Unknown);
    }

    #[test]
    fn grid_grows_and_pads() {
        let addr = "0000:00:10.0".parse().unwrap();
        let mut ctrl = ControllerRecord::new(addr, CapacityEstimate::fixed(4));
        assert_eq!(ctrl.bays.len(), 4);

        ctrl.ensure_bay(5);
        assert_eq!(ctrl.bays.len(), 6);
        ctrl.pad_to_capacity();
        assert_eq!(ctrl.bays.len(), 6);
        assert!(ctrl.bays.iter().enumerate().all(|(i, b)| b.bay_index == i));
        assert_eq!(ctrl.bays[5].label, "BAY 6");
    }

    #[test]
    fn unknown_capacity_starts_empty() {
        let addr = "0000:00:10.0".parse().unwrap();
        let mut ctrl = ControllerRecord::new(addr, CapacityEstimate::unknown());
        assert!(ctrl.bays.is_empty());
        ctrl.pad_to_capacity();
        assert!(ctrl.bays.is_empty());
    }
}
