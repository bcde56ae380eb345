use crate::collectors::diskstats::{SectorCounters, SECTOR_BYTES};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;

/// Smoothed read/write throughput history for one pool, in bytes per second.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct PoolHistory {
    pub read: VecDeque<f64>,
    pub write: VecDeque<f64>,
}

#[derive(Default)]
struct PoolWindow {
    read: VecDeque<f64>,
    write: VecDeque<f64>,
    history: PoolHistory,
}

/// Turns raw per-device sector counters into per-pool throughput history.
///
/// Each sample is rated against the previous one, summed per pool, pushed
/// through a `smoothing_window` rolling mean and then appended to a
/// `history_len` ring used for charting.
pub struct PoolActivityAggregator {
    smoothing_window: usize,
    history_len: usize,
    previous: HashMap<String, SectorCounters>,
    pools: BTreeMap<String, PoolWindow>,
}

impl PoolActivityAggregator {
    pub fn new(smoothing_window: usize, history_len: usize) -> Self {
        Self {
            smoothing_window: smoothing_window.max(1),
            history_len: history_len.max(1),
            previous: HashMap::new(),
            pools: BTreeMap::new(),
        }
    }

    fn trim_history<T>(history: &mut VecDeque<T>, max_size: usize) {
        while history.len() > max_size {
            history.pop_front();
        }
    }

    /// Feed one sample. `members` maps base device name to pool name;
    /// devices outside it are ignored.
    pub fn observe(
        &mut self,
        sample: &HashMap<String, SectorCounters>,
        members: &HashMap<String, String>,
        elapsed: Duration,
    ) {
        let secs = elapsed.as_secs_f64();
        let mut totals: BTreeMap<&str, (f64, f64)> = BTreeMap::new();
        for pool in members.values() {
            totals.entry(pool.as_str()).or_default();
        }

        if secs > 0.0 {
            for (dev, pool) in members {
                let (Some(now), Some(before)) = (sample.get(dev), self.previous.get(dev)) else {
                    continue;
                };
                let read = now.sectors_read.saturating_sub(before.sectors_read) * SECTOR_BYTES;
                let written = now.sectors_written.saturating_sub(before.sectors_written) * SECTOR_BYTES;

                let entry = totals.entry(pool.as_str()).or_default();
                entry.0 += read as f64 / secs;
                entry.1 += written as f64 / secs;
            }
        }

        self.previous = sample.clone();

        // Pools that no longer have members drop out of the feed.
        self.pools.retain(|pool, _| totals.contains_key(pool.as_str()));

        for (pool, (read, write)) in totals {
            let window = self.pools.entry(pool.to_string()).or_default();

            window.read.push_back(read);
            Self::trim_history(&mut window.read, self.smoothing_window);
            window.write.push_back(write);
            Self::trim_history(&mut window.write, self.smoothing_window);

            let read_mean = mean(&window.read);
            let write_mean = mean(&window.write);

            window.history.read.push_back(read_mean);
            Self::trim_history(&mut window.history.read, self.history_len);
            window.history.write.push_back(write_mean);
            Self::trim_history(&mut window.history.write, self.history_len);
        }
    }

    pub fn history(&self) -> BTreeMap<String, PoolHistory> {
        self.pools
            .iter()
            .map(|(pool, w)| (pool.clone(), w.history.clone()))
            .collect()
    }
}

fn mean(values: &VecDeque<f64>) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}
