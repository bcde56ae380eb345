use crate::collectors::pci::normalize_pci;
use anyhow::{bail, Context, Result};
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/bayview/bayview.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub activity: ActivityConfig,

    #[serde(default)]
    pub zfs: ZfsConfig,

    /// Per-controller capacity overrides, keyed by PCI address in either
    /// `0000:00:10.0` or `0000-00-10-0` form.
    #[serde(default)]
    pub controllers: BTreeMap<String, ControllerOverride>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Bay topology rescan period
    pub topology_interval_ms: u64,
    /// Busy-LED sampling period
    pub activity_interval_ms: u64,
    /// Pool throughput sampling period
    pub pool_sample_interval_ms: u64,
    /// How often the JSON feed file is rewritten
    pub publish_interval_ms: u64,
    /// Timeout for the ZFS management API, zpool and lsblk
    pub command_timeout_ms: u64,
    /// Timeout for vendor HBA utilities
    pub vendor_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub sysfs_root: PathBuf,
    pub by_path_dir: PathBuf,
    pub by_partuuid_dir: PathBuf,
    pub diskstats: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivityConfig {
    /// Samples a device stays "busy" after its counters last moved
    pub cooldown_ticks: u8,
    /// Pool throughput samples averaged into one history point
    pub smoothing_window: usize,
    /// History points kept per pool
    pub history_len: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ZfsConfig {
    pub api_retry: ApiRetry,
}

/// When to give the management API another chance after it failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiRetry {
    /// A missing API binary disables the API for the process lifetime;
    /// transient failures are retried on the next cycle.
    #[default]
    DisableOnMissing,
    /// Always try the API first.
    EveryCycle,
    /// Any API failure disables it for the process lifetime.
    DisableOnFailure,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerOverride {
    /// Display label for the chassis
    #[serde(default)]
    pub name: Option<String>,
    /// Fixed bay count; wins over every detection source
    #[serde(default)]
    pub max_bays: Option<usize>,
    #[serde(default)]
    pub ports: Option<usize>,
    #[serde(default)]
    pub lanes_per_port: Option<usize>,
}

// ── Defaults ─────────────────────────────────────────────────────────

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            topology_interval_ms: 5000,
            activity_interval_ms: 100,
            pool_sample_interval_ms: 50,
            publish_interval_ms: 1000,
            command_timeout_ms: 5000,
            vendor_timeout_ms: 3000,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            sysfs_root: PathBuf::from("/sys"),
            by_path_dir: PathBuf::from("/dev/disk/by-path"),
            by_partuuid_dir: PathBuf::from("/dev/disk/by-partuuid"),
            diskstats: PathBuf::from("/proc/diskstats"),
        }
    }
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            cooldown_ticks: 2,
            smoothing_window: 100,
            history_len: 150,
        }
    }
}

impl GeneralConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn vendor_timeout(&self) -> Duration {
        Duration::from_millis(self.vendor_timeout_ms)
    }
}

// ── Load ─────────────────────────────────────────────────────────────

impl Config {
    /// Load from `path`. A missing file yields defaults; a broken one is an error.
    pub fn load(path: &Path) -> Result<Self> {
        let text = match fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No config at {}, using defaults", path.display());
                return Ok(Config::default());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()))
            }
        };

        Self::from_toml(&text).with_context(|| format!("Invalid config {}", path.display()))
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let mut cfg: Config = toml::from_str(text)?;
        cfg.normalize_controller_keys()?;
        Ok(cfg)
    }

    /// Rewrite override keys into colon/dot form so lookups can use either
    /// textual encoding.
    fn normalize_controller_keys(&mut self) -> Result<()> {
        let mut normalized = BTreeMap::new();
        for (raw, entry) in std::mem::take(&mut self.controllers) {
            let key = normalize_pci(&raw);
            if normalized.insert(key.clone(), entry).is_some() {
                bail!("controller {} is configured twice", key);
            }
        }
        self.controllers = normalized;
        Ok(())
    }

    pub fn controller_override(&self, pci: &str) -> Option<&ControllerOverride> {
        self.controllers.get(&normalize_pci(pci))
    }
}
