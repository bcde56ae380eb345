use super::{derive_leaf_state, resolve_disk_id, PoolHealth, PoolHealthEntry};
use crate::collectors::command;
use crate::domain::device::HealthState;
use crate::error::ProbeError;
use log::{debug, info};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

// Partition UUID or kernel disk name as printed in the config tree.
const DISK_ID: &str = r"([0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}|nvme\d+n\d+(?:p\d+)?|sd[a-z]+\d*|vd[a-z]+\d*)";

static DISK_WITH_ERRORS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"{}\s+(ONLINE|DEGRADED|FAULTED|OFFLINE)\s+(\d+)\s+(\d+)\s+(\d+)",
        DISK_ID
    ))
    .expect("static regex")
});

static DISK_MISSING: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!(r"{}\s+(UNAVAIL|REMOVED)", DISK_ID)).expect("static regex"));

static SCAN_ACTIVE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)scan:\s+(resilver|rebuild|repair|scrub)\s+in\s+progress").expect("static regex")
});

pub(super) async fn query(program: &str, timeout: Duration) -> Result<String, ProbeError> {
    command::run(program, &["status", "-v", "-p"], timeout).await
}

struct PoolCursor {
    name: String,
    state: String,
    next_index: u32,
}

/// Parse `zpool status -v -p` output.
///
/// Disk rows are recognised by pattern, in order of appearance, so the
/// pool index matches the order `zpool status` prints them.
pub fn parse_zpool_status(output: &str, uuid_to_dev: &HashMap<String, String>) -> PoolHealth {
    let mut health = PoolHealth::default();
    let mut scanning: BTreeSet<String> = BTreeSet::new();
    let mut current: Option<PoolCursor> = None;

    for line in output.lines() {
        let line = line.trim();

        if let Some(name) = line.strip_prefix("pool:") {
            current = Some(PoolCursor {
                name: name.trim().to_string(),
                state: "ONLINE".to_string(),
                next_index: 0,
            });
            continue;
        }

        let Some(pool) = current.as_mut() else {
            continue;
        };

        if let Some(state) = line.strip_prefix("state:") {
            pool.state = state.trim().to_string();
            health.pool_states.insert(pool.name.clone(), pool.state.clone());
            debug!("Pool {} state: {}", pool.name, pool.state);
            continue;
        }

        if line.starts_with("scan:") {
            if SCAN_ACTIVE.is_match(line) {
                info!("Pool {} has an active resilver/repair operation", pool.name);
                scanning.insert(pool.name.clone());
            }
            continue;
        }

        // The pool's own row in the config tree is not a disk.
        if line.split_whitespace().next() == Some(pool.name.as_str()) {
            continue;
        }

        if let Some(caps) = DISK_WITH_ERRORS.captures(line) {
            if line.contains("STATE") {
                continue;
            }
            let counter = |i: usize| caps[i].parse::<u64>().unwrap_or(0);
            let (read, write, cksum) = (counter(3), counter(4), counter(5));
            let lower = line.to_ascii_lowercase();
            let repairing = ["resilvering", "repairing", "replacing"]
                .iter()
                .any(|w| lower.contains(w));

            pool.next_index += 1;
            let state = derive_leaf_state(&pool.state, &caps[2], repairing, read + write + cksum);
            health.insert(
                &resolve_disk_id(&caps[1], uuid_to_dev),
                PoolHealthEntry {
                    pool: pool.name.clone(),
                    index: pool.next_index,
                    state,
                    read_errors: read,
                    write_errors: write,
                    checksum_errors: cksum,
                    pool_state: pool.state.clone(),
                    vdev_status: String::new(),
                },
            );
            continue;
        }

        if let Some(caps) = DISK_MISSING.captures(line) {
            pool.next_index += 1;
            health.insert(
                &resolve_disk_id(&caps[1], uuid_to_dev),
                PoolHealthEntry {
                    pool: pool.name.clone(),
                    index: pool.next_index,
                    state: HealthState::Faulted,
                    read_errors: 0,
                    write_errors: 0,
                    checksum_errors: 0,
                    pool_state: pool.state.clone(),
                    vdev_status: String::new(),
                },
            );
        }
    }

    for pool in &scanning {
        health.mark_pool_resilvering(pool);
    }

    health
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEALTHY: &str = "
  pool: tank
 state: ONLINE
  scan: scrub repaired 0B in 00:10:02 with 0 errors on Sun Mar  2 00:34:03 2025
config:

\tNAME                                      STATE     READ WRITE CKSUM
\ttank                                      ONLINE       0     0     0
\t  raidz2-0                                ONLINE       0     0     0
\t    1f8e2a44-9c3b-4d7e-8a11-0c2b3d4e5f60  ONLINE       0     0     0
\t    sdb2                                  ONLINE       0     0     2
\t    sdc2                                  ONLINE       0     0     0
\t    sdd2                                  REMOVED      0     0     0

errors: No known data errors

  pool: boot-pool
 state: ONLINE
config:

\tNAME        STATE     READ WRITE CKSUM
\tboot-pool   ONLINE       0     0     0
\t  nvme0n1p3 ONLINE       0     0     0
";

    fn uuid_map() -> HashMap<String, String> {
        HashMap::from([(
            "1f8e2a44-9c3b-4d7e-8a11-0c2b3d4e5f60".to_string(),
            "sda".to_string(),
        )])
    }

    #[test]
    fn parses_disks_in_order() {
        let health = parse_zpool_status(HEALTHY, &uuid_map());

        assert_eq!(health.devices["sda"].index, 1);
        assert_eq!(health.devices["sda"].state, HealthState::Online);
        assert_eq!(health.devices["sdb"].state, HealthState::Degraded);
        assert_eq!(health.devices["sdb"].checksum_errors, 2);
        assert_eq!(health.devices["sdc"].index, 3);
        assert_eq!(health.devices["sdd"].state, HealthState::Faulted);
        assert_eq!(health.devices["sdd"].index, 4);
    }

    #[test]
    fn index_restarts_per_pool() {
        let health = parse_zpool_status(HEALTHY, &uuid_map());
        let nvme = &health.devices["nvme0n1"];
        assert_eq!((nvme.pool.as_str(), nvme.index), ("boot-pool", 1));
        assert_eq!(health.pool_states.len(), 2);
    }

    #[test]
    fn active_resilver_marks_whole_pool() {
        let text = HEALTHY.replace(
            "scan: scrub repaired 0B in 00:10:02 with 0 errors on Sun Mar  2 00:34:03 2025",
            "scan: resilver in progress since Sun Mar  2 00:34:03 2025",
        );
        let health = parse_zpool_status(&text, &uuid_map());

        for dev in ["sda", "sdb", "sdc", "sdd"] {
            assert_eq!(health.devices[dev].state, HealthState::Resilvering, "{}", dev);
        }
        assert_eq!(health.devices["nvme0n1"].state, HealthState::Online);
    }

    #[test]
    fn replacing_row_is_resilvering() {
        let text = "  pool: tank\n state: DEGRADED\n\tsde2  ONLINE  0 0 0  (resilvering)\n";
        let health = parse_zpool_status(text, &HashMap::new());
        assert_eq!(health.devices["sde"].state, HealthState::Resilvering);
    }

    #[test]
    fn suspended_pool_faults_disks() {
        let text = "  pool: tank\n state: SUSPENDED\n\tsdf  ONLINE  0 0 0\n";
        let health = parse_zpool_status(text, &HashMap::new());
        assert_eq!(health.devices["sdf"].state, HealthState::Faulted);
        assert_eq!(health.pool_states["tank"], "SUSPENDED");
    }

    #[test]
    fn garbage_yields_empty_map() {
        let health = parse_zpool_status("no pools available\n", &HashMap::new());
        assert!(health.devices.is_empty());
        assert!(health.pool_states.is_empty());
    }
}
