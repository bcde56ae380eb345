use crate::collectors::pci::PciAddress;
use crate::domain::device::{base_device_name, MAX_BAYS};
use crate::error::ProbeError;
use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

static PCI_IN_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[0-9a-fA-F]{4}:[0-9a-fA-F]{2}:[0-9a-fA-F]{2}\.[0-7]").expect("static regex")
});

const BAY_PREFIXES: &[&str] = &["phy", "ata", "sas", "port", "slot", "exp"];

static BAY_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:phy|ata|sas|port|slot|exp)(\d+)").expect("static regex"));

/// A whole-disk entry of /dev/disk/by-path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ByPathEntry {
    pub name: String,
    pub link: PathBuf,
    pub controller: PciAddress,
    pub bay_index: usize,
}

/// Controller address embedded in a by-path name. The last address is the
/// one closest to the disk when the path crosses PCI bridges.
pub fn controller_of(name: &str) -> Option<PciAddress> {
    PCI_IN_NAME
        .find_iter(name)
        .last()
        .and_then(|m| m.as_str().parse().ok())
}

/// Bay index from a lane/port token such as `phy3`, `ata2` or `slot11`.
/// Newer udev splits the number into its own segment (`ata-2`, `ata-2.0`),
/// which counts too. The last token in the name wins; no token means bay 0.
pub fn bay_index_of(name: &str) -> usize {
    let segments: Vec<&str> = name.split('-').collect();
    let mut bay = None;

    for (i, segment) in segments.iter().enumerate() {
        if let Some(caps) = BAY_TOKEN.captures_iter(segment).last() {
            bay = Some(digits_value(&caps[1]));
        } else if BAY_PREFIXES.contains(segment) {
            if let Some(n) = segments.get(i + 1).and_then(|next| leading_number(next)) {
                bay = Some(n);
            }
        }
    }
    bay.unwrap_or(0)
}

fn leading_number(segment: &str) -> Option<usize> {
    let digits: String = segment.chars().take_while(|c| c.is_ascii_digit()).collect();
    (!digits.is_empty()).then(|| digits_value(&digits))
}

// Digit runs too long for usize saturate; parse_entry rejects them.
fn digits_value(digits: &str) -> usize {
    digits.parse().unwrap_or(usize::MAX)
}

/// Parse one by-path entry name. Partitions, names without a PCI address
/// and bay numbers of [`MAX_BAYS`] or more are skipped.
pub fn parse_entry(name: &str, link: PathBuf) -> Option<ByPathEntry> {
    if name.contains("-part") {
        return None;
    }
    let controller = controller_of(name)?;
    let bay_index = bay_index_of(name);
    if bay_index >= MAX_BAYS {
        warn!("{}: bay {} out of range, skipping", name, bay_index);
        return None;
    }
    Some(ByPathEntry {
        name: name.to_string(),
        link,
        controller,
        bay_index,
    })
}

/// List whole-disk by-path symlinks.
pub fn scan_by_path(dir: &Path) -> Result<Vec<ByPathEntry>, ProbeError> {
    let mut entries: Vec<ByPathEntry> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_symlink()).unwrap_or(false))
        .filter_map(|e| {
            let name = e.file_name().to_string_lossy().into_owned();
            parse_entry(&name, e.path())
        })
        .collect();

    entries.sort_by(|a, b| a.name.cmp(&b.name));
    debug!("{} by-path disk entries in {}", entries.len(), dir.display());
    Ok(entries)
}

/// Kernel device name a symlink points at (`sdb` for `../../sdb`).
pub fn resolve_device_name(link: &Path) -> Option<String> {
    let target = fs::canonicalize(link).ok()?;
    target.file_name().map(|n| n.to_string_lossy().into_owned())
}

/// Partition UUID -> base device name, from /dev/disk/by-partuuid.
pub fn read_partuuid_map(dir: &Path) -> HashMap<String, String> {
    let Ok(read) = fs::read_dir(dir) else {
        debug!("{} not present", dir.display());
        return HashMap::new();
    };

    read.filter_map(|e| e.ok())
        .filter_map(|e| {
            let uuid = e.file_name().to_string_lossy().into_owned();
            let dev = resolve_device_name(&e.path())?;
            Some((uuid, base_device_name(&dev).to_string()))
        })
        .collect()
}
