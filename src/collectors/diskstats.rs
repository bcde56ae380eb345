use crate::error::ProbeError;
use std::collections::HashMap;
use std::path::Path;

pub const SECTOR_BYTES: u64 = 512;

/// Cumulative sector counters for one /proc/diskstats row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SectorCounters {
    pub sectors_read: u64,
    pub sectors_written: u64,
}

impl SectorCounters {
    pub fn total(&self) -> u64 {
        self.sectors_read.saturating_add(self.sectors_written)
    }
}

/// Parse /proc/diskstats text into device name -> counters.
///
/// Columns: 2 = name, 5 = sectors read, 9 = sectors written.
/// Rows that are too short or unparsable are skipped.
pub fn parse_diskstats(content: &str) -> HashMap<String, SectorCounters> {
    let mut map = HashMap::new();

    for line in content.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 10 {
            continue;
        }

        let (Ok(read), Ok(written)) = (fields[5].parse::<u64>(), fields[9].parse::<u64>()) else {
            continue;
        };

        map.insert(
            fields[2].to_string(),
            SectorCounters {
                sectors_read: read,
                sectors_written: written,
            },
        );
    }

    map
}

pub async fn read_diskstats(path: &Path) -> Result<HashMap<String, SectorCounters>, ProbeError> {
    let content = tokio::fs::read_to_string(path).await?;
    Ok(parse_diskstats(&content))
}
