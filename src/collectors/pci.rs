use log::debug;
use serde::{Serialize, Serializer};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

/// PCI bus:device.function address with its domain.
///
/// Accepts the kernel's colon/dot form (`0000:00:10.0`) and the dash-only
/// form used for filesystem-safe keys (`0000-00-10-0`). Both parse to the
/// same value and always display in colon/dot form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PciAddress {
    pub domain: u16,
    pub bus: u8,
    pub device: u8,
    pub function: u8,
}

impl PciAddress {
    /// Dash-separated form, safe for file names and DOM ids.
    pub fn key(&self) -> String {
        format!(
            "{:04x}-{:02x}-{:02x}-{:x}",
            self.domain, self.bus, self.device, self.function
        )
    }

    /// True if the given (vendor formatted) address names the same
    /// bus/device/function. Vendor tools print things like `00h:03h:00h:00h`
    /// or `00:03:00:00`, so only the last three hex fields are compared.
    pub fn matches_vendor_format(&self, text: &str) -> bool {
        let fields: Vec<u32> = text
            .split(|c: char| c == ':' || c == '.' || c == '-' || c.is_whitespace())
            .map(|f| f.trim().trim_end_matches(['h', 'H']))
            .filter(|f| !f.is_empty())
            .filter_map(|f| u32::from_str_radix(f, 16).ok())
            .collect();

        if fields.len() < 3 {
            return false;
        }
        let tail = &fields[fields.len() - 3..];
        tail[0] == u32::from(self.bus)
            && tail[1] == u32::from(self.device)
            && tail[2] == u32::from(self.function)
    }
}

impl FromStr for PciAddress {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split([':', '.', '-']).collect();
        if parts.len() != 4 {
            return Err(format!("not a PCI address: {}", s));
        }

        let hex = |p: &str, max: u32| -> Result<u32, String> {
            let v = u32::from_str_radix(p, 16).map_err(|e| format!("{}: {}", s, e))?;
            if v > max {
                return Err(format!("{}: field {} out of range", s, p));
            }
            Ok(v)
        };

        Ok(PciAddress {
            domain: hex(parts[0], 0xffff)? as u16,
            bus: hex(parts[1], 0xff)? as u8,
            device: hex(parts[2], 0x1f)? as u8,
            function: hex(parts[3], 0x7)? as u8,
        })
    }
}

impl fmt::Display for PciAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04x}:{:02x}:{:02x}.{:x}",
            self.domain, self.bus, self.device, self.function
        )
    }
}

impl Serialize for PciAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Normalise either textual encoding to colon/dot form.
/// Strings that are not PCI addresses come back trimmed and lowercased.
pub fn normalize_pci(s: &str) -> String {
    match s.parse::<PciAddress>() {
        Ok(addr) => addr.to_string(),
        Err(_) => s.trim().to_ascii_lowercase(),
    }
}

// Paravirtualised / hypervisor storage vendors.
const VIRTUAL_VENDORS: &[u32] = &[
    0x1af4, // Red Hat (virtio)
    0x1b36, // Red Hat (QEMU emulated devices)
    0x15ad, // VMware
    0x80ee, // VirtualBox
    0x1414, // Microsoft Hyper-V
    0x5853, // XenSource
    0x1ab8, // Parallels
];

// Intel PIIX IDE functions that hypervisors emulate.
const EMULATED_IDE: &[(u32, u32)] = &[(0x8086, 0x7010), (0x8086, 0x7111)];

const PCI_CLASS_MASS_STORAGE: u32 = 0x01;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerClass {
    Physical,
    Virtual,
    NotStorage,
}

impl ControllerClass {
    pub fn is_physical(self) -> bool {
        self == ControllerClass::Physical
    }
}

/// Classify a PCI function from its sysfs vendor/device/class ids.
///
/// Anything that cannot be read is reported as virtual so that unverifiable
/// hardware never shows up as a bay grid.
pub fn classify_controller(sysfs_root: &Path, addr: &PciAddress) -> ControllerClass {
    let dev_dir = sysfs_root.join("bus/pci/devices").join(addr.to_string());

    let read_id = |name: &str| -> Option<u32> {
        let raw = fs::read_to_string(dev_dir.join(name)).ok()?;
        let raw = raw.trim();
        u32::from_str_radix(raw.trim_start_matches("0x"), 16).ok()
    };

    let (vendor, device, class) = match (read_id("vendor"), read_id("device"), read_id("class")) {
        (Some(v), Some(d), Some(c)) => (v, d, c),
        _ => {
            debug!("{}: PCI ids unreadable, treating as virtual", addr);
            return ControllerClass::Virtual;
        }
    };

    if VIRTUAL_VENDORS.contains(&vendor) || EMULATED_IDE.contains(&(vendor, device)) {
        debug!("{}: {:04x}:{:04x} is a virtual controller", addr, vendor, device);
        return ControllerClass::Virtual;
    }

    if class >> 16 != PCI_CLASS_MASS_STORAGE {
        debug!("{}: class {:06x} is not mass storage", addr, class);
        return ControllerClass::NotStorage;
    }

    ControllerClass::Physical
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_ids(root: &Path, addr: &str, vendor: &str, device: &str, class: &str) {
        let dir = root.join("bus/pci/devices").join(addr);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("vendor"), format!("{}\n", vendor)).unwrap();
        fs::write(dir.join("device"), format!("{}\n", device)).unwrap();
        fs::write(dir.join("class"), format!("{}\n", class)).unwrap();
    }

    #[test]
    fn both_encodings_normalize_equal() {
        assert_eq!(normalize_pci("0000:00:10.0"), normalize_pci("0000-00-10-0"));
        assert_eq!(normalize_pci("0000-00-10-0"), "0000:00:10.0");
        assert_eq!(normalize_pci("0000:3B:00.1"), "0000:3b:00.1");
    }

    #[test]
    fn normalize_is_idempotent() {
        for raw in ["0000:00:10.0", "0000-af-1f-7", "not-a-pci", "  0000:01:00.0 "] {
            let once = normalize_pci(raw);
            assert_eq!(normalize_pci(&once), once);
        }
    }

    #[test]
    fn key_round_trips_through_parse() {
        let addr: PciAddress = "0000:03:00.0".parse().unwrap();
        assert_eq!(addr.key(), "0000-03-00-0");
        assert_eq!(addr.key().parse::<PciAddress>().unwrap(), addr);
    }

    #[test]
    fn rejects_out_of_range_fields() {
        assert!("0000:00:20.0".parse::<PciAddress>().is_err());
        assert!("0000:00:10.8".parse::<PciAddress>().is_err());
        assert!("00:10.0".parse::<PciAddress>().is_err());
    }

    #[test]
    fn vendor_formats_match_on_bus_device_function() {
        let addr: PciAddress = "0000:03:00.0".parse().unwrap();
        assert!(addr.matches_vendor_format("00h:03h:00h:00h"));
        assert!(addr.matches_vendor_format("00:03:00:00"));
        assert!(!addr.matches_vendor_format("00h:04h:00h:00h"));
        assert!(!addr.matches_vendor_format("N/A"));
    }

    #[test]
    fn virtio_controller_is_virtual() {
        let tmp = TempDir::new().unwrap();
        write_ids(tmp.path(), "0000:00:05.0", "0x1af4", "0x1001", "0x010000");
        let addr = "0000:00:05.0".parse().unwrap();
        assert_eq!(classify_controller(tmp.path(), &addr), ControllerClass::Virtual);
    }

    #[test]
    fn emulated_piix_ide_is_virtual() {
        let tmp = TempDir::new().unwrap();
        write_ids(tmp.path(), "0000:00:01.1", "0x8086", "0x7010", "0x010180");
        let addr = "0000:00:01.1".parse().unwrap();
        assert_eq!(classify_controller(tmp.path(), &addr), ControllerClass::Virtual);
    }

    #[test]
    fn lsi_hba_is_physical_and_nic_is_not_storage() {
        let tmp = TempDir::new().unwrap();
        write_ids(tmp.path(), "0000:03:00.0", "0x1000", "0x0097", "0x010700");
        write_ids(tmp.path(), "0000:04:00.0", "0x8086", "0x1521", "0x020000");
        let hba = "0000:03:00.0".parse().unwrap();
        let nic = "0000:04:00.0".parse().unwrap();
        assert_eq!(classify_controller(tmp.path(), &hba), ControllerClass::Physical);
        assert_eq!(classify_controller(tmp.path(), &nic), ControllerClass::NotStorage);
    }

    #[test]
    fn unreadable_ids_default_to_virtual() {
        let tmp = TempDir::new().unwrap();
        let addr = "0000:09:00.0".parse().unwrap();
        assert_eq!(classify_controller(tmp.path(), &addr), ControllerClass::Virtual);
    }
}
