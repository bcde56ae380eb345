/// Backplane, host adapter and SAS phy discovery through sysfs.
///
/// Uses the kernel's enclosure class (SES backplanes) to count drive slots
/// per port, and the sas_host / scsi_host / sas_phy classes to count the
/// ports and lanes that belong to one PCI controller.
/// Reference: Documentation/ABI/testing/sysfs-class-enclosure

use crate::collectors::pci::PciAddress;
use log::debug;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackplaneInfo {
    pub slots_per_port: usize,
    pub port_count: usize,
}

impl BackplaneInfo {
    pub fn max_bays(&self) -> usize {
        if self.port_count > 0 {
            self.port_count.saturating_mul(self.slots_per_port)
        } else {
            self.slots_per_port
        }
    }
}

pub struct SysfsInspector {
    root: PathBuf,
}

impl SysfsInspector {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Slot count of the first enclosure wired to `addr`, with the number of
    /// host ports on the same controller.
    pub fn backplane(&self, addr: &PciAddress) -> Option<BackplaneInfo> {
        let slots_per_port = self
            .class_entries_of("enclosure", addr)
            .into_iter()
            .map(|enclosure| count_slots(&enclosure))
            .find(|&n| n > 0)?;

        let port_count = match self.class_entries_of("sas_host", addr).len() {
            0 => self.class_entries_of("scsi_host", addr).len(),
            n => n,
        };

        debug!(
            "{}: backplane with {} slots per port, {} ports",
            addr, slots_per_port, port_count
        );
        Some(BackplaneInfo {
            slots_per_port,
            port_count,
        })
    }

    /// Number of SAS phys (lanes) on the controller.
    pub fn phy_count(&self, addr: &PciAddress) -> usize {
        let phys = self.class_entries_of("sas_phy", addr).len();
        if phys > 0 {
            debug!("{}: {} SAS phys", addr, phys);
        }
        phys
    }

    /// Entries of /sys/class/<class> whose device link resolves under `addr`.
    fn class_entries_of(&self, class: &str, addr: &PciAddress) -> Vec<PathBuf> {
        let dir = self.root.join("class").join(class);
        let Ok(read) = fs::read_dir(&dir) else {
            return Vec::new();
        };

        let needle = addr.to_string();
        let mut entries: Vec<PathBuf> = read
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|entry| resolves_under(entry, &needle))
            .collect();
        entries.sort();
        entries
    }
}

fn resolves_under(entry: &Path, needle: &str) -> bool {
    fs::canonicalize(entry.join("device"))
        .map(|target| target.to_string_lossy().contains(needle))
        .unwrap_or(false)
}

/// Slots are the enclosure's sub-directories exposing a `device` link or a
/// `status` file.
fn count_slots(enclosure: &Path) -> usize {
    let Ok(read) = fs::read_dir(enclosure) else {
        return 0;
    };
    read.filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir() && (p.join("device").exists() || p.join("status").exists()))
        .filter(|p| p.file_name().map(|n| n != "device").unwrap_or(false))
        .count()
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use tempfile::TempDir;

    const HBA: &str = "0000:03:00.0";

    fn addr(s: &str) -> PciAddress {
        s.parse().unwrap()
    }

    #[test]
    fn bay_product_saturates() {
        let huge = BackplaneInfo {
            slots_per_port: usize::MAX,
            port_count: 2,
        };
        assert_eq!(huge.max_bays(), usize::MAX);
        let plain = BackplaneInfo {
            slots_per_port: 12,
            port_count: 0,
        };
        assert_eq!(plain.max_bays(), 12);
    }

    #[test]
    fn backplane_slots_times_ports() {
        let tmp = TempDir::new().unwrap();
        enclosure(tmp.path(), "0:0:8:0", HBA, 4);
        class_entry(tmp.path(), "sas_host", "host0", HBA, "host0");
        class_entry(tmp.path(), "sas_host", "host1", HBA, "host1");
        class_entry(tmp.path(), "scsi_host", "host0", HBA, "host0/scsi_host");

        let info = SysfsInspector::new(tmp.path()).backplane(&addr(HBA)).unwrap();
        assert_eq!(info.slots_per_port, 4);
        assert_eq!(info.port_count, 2);
        assert_eq!(info.max_bays(), 8);
    }

    #[test]
    fn scsi_hosts_count_when_no_sas_hosts() {
        let tmp = TempDir::new().unwrap();
        enclosure(tmp.path(), "0:0:8:0", HBA, 12);
        class_entry(tmp.path(), "scsi_host", "host0", HBA, "host0");

        let info = SysfsInspector::new(tmp.path()).backplane(&addr(HBA)).unwrap();
        assert_eq!((info.port_count, info.max_bays()), (1, 12));
    }

    #[test]
    fn enclosure_on_other_controller_is_ignored() {
        let tmp = TempDir::new().unwrap();
        enclosure(tmp.path(), "0:0:8:0", "0000:04:00.0", 4);
        assert!(SysfsInspector::new(tmp.path()).backplane(&addr(HBA)).is_none());
    }

    #[test]
    fn counts_phys_for_controller_only() {
        let tmp = TempDir::new().unwrap();
        for i in 0..8 {
            let name = format!("phy-0:{}", i);
            class_entry(tmp.path(), "sas_phy", &name, HBA, &format!("host0/{}", name));
        }
        class_entry(tmp.path(), "sas_phy", "phy-1:0", "0000:04:00.0", "host1/phy-1:0");

        let inspector = SysfsInspector::new(tmp.path());
        assert_eq!(inspector.phy_count(&addr(HBA)), 8);
        assert_eq!(inspector.phy_count(&addr("0000:05:00.0")), 0);
    }
}
