use crate::collectors::diskstats::SectorCounters;
use std::collections::HashMap;

/// Debounced per-device "recently busy" flag.
///
/// A device is active for `cooldown_ticks` samples after its cumulative
/// sector count last increased, so short bursts stay visible at coarse
/// polling rates instead of flickering.
pub struct IoActivitySampler {
    cooldown_ticks: u8,
    last_totals: HashMap<String, u64>,
    cooldowns: HashMap<String, u8>,
}

impl IoActivitySampler {
    pub fn new(cooldown_ticks: u8) -> Self {
        Self {
            cooldown_ticks,
            last_totals: HashMap::new(),
            cooldowns: HashMap::new(),
        }
    }

    /// Feed one diskstats sample and return the current busy map.
    pub fn observe(&mut self, sample: &HashMap<String, SectorCounters>) -> HashMap<String, bool> {
        for (dev, counters) in sample {
            let total = counters.total();
            let previous = self.last_totals.insert(dev.clone(), total).unwrap_or(total);
            let cooldown = self.cooldowns.entry(dev.clone()).or_insert(0);

            if total > previous {
                *cooldown = self.cooldown_ticks;
            } else if *cooldown > 0 {
                *cooldown -= 1;
            }
        }

        // Devices that vanished from the kernel table stop being reported.
        self.last_totals.retain(|dev, _| sample.contains_key(dev));
        self.cooldowns.retain(|dev, _| sample.contains_key(dev));

        self.current()
    }

    /// An unreadable stats source counts as all-idle.
    pub fn idle(&mut self) -> HashMap<String, bool> {
        self.cooldowns.values_mut().for_each(|c| *c = 0);
        self.current()
    }

    fn current(&self) -> HashMap<String, bool> {
        self.cooldowns
            .iter()
            .map(|(dev, ticks)| (dev.clone(), *ticks > 0))
            .collect()
    }
}
