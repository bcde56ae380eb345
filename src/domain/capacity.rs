use crate::collectors::enclosure::SysfsInspector;
use crate::collectors::pci::PciAddress;
use crate::collectors::vendor;
use crate::config::ControllerOverride;
use crate::domain::device::{CapacityEstimate, MAX_BAYS};
use log::{debug, info, warn};
use std::time::Duration;

/// Capacity sources in the order they are tried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapacitySource {
    Override,
    Backplane,
    Phys,
    VendorTool,
    OverridePorts,
}

pub const RESOLUTION_ORDER: [CapacitySource; 5] = [
    CapacitySource::Override,
    CapacitySource::Backplane,
    CapacitySource::Phys,
    CapacitySource::VendorTool,
    CapacitySource::OverridePorts,
];

/// Estimates how many drive bays a controller exposes.
pub struct CapacityEstimator {
    sysfs: SysfsInspector,
    vendor_timeout: Duration,
    use_vendor_tools: bool,
}

impl CapacityEstimator {
    pub fn new(sysfs: SysfsInspector, vendor_timeout: Duration) -> Self {
        Self {
            sysfs,
            vendor_timeout,
            use_vendor_tools: true,
        }
    }

    /// Skip the vendor utility probe (hosts or tests without them).
    pub fn without_vendor_tools(mut self) -> Self {
        self.use_vendor_tools = false;
        self
    }

    /// Walk the sources in [`RESOLUTION_ORDER`]; the first one that answers
    /// wins. Nothing answering means the capacity is unknown.
    pub async fn estimate(
        &self,
        addr: &PciAddress,
        overrides: Option<&ControllerOverride>,
    ) -> CapacityEstimate {
        for source in RESOLUTION_ORDER {
            if let Some(estimate) = self.probe(source, addr, overrides).await {
                if estimate.max_bays > MAX_BAYS {
                    warn!(
                        "{}: {:?} reports {} bays, above the {} limit, ignoring",
                        addr, source, estimate.max_bays, MAX_BAYS
                    );
                    continue;
                }
                info!(
                    "{}: {} bays from {:?} (backplane: {}, ports: {})",
                    addr, estimate.max_bays, source, estimate.has_backplane, estimate.port_count
                );
                return estimate;
            }
            debug!("{}: no capacity from {:?}", addr, source);
        }

        info!("{}: capacity unknown, grid follows discovered bays", addr);
        CapacityEstimate::unknown()
    }

    async fn probe(
        &self,
        source: CapacitySource,
        addr: &PciAddress,
        overrides: Option<&ControllerOverride>,
    ) -> Option<CapacityEstimate> {
        match source {
            CapacitySource::Override => overrides
                .and_then(|o| o.max_bays)
                .filter(|&n| n > 0)
                .map(CapacityEstimate::fixed),

            CapacitySource::Backplane => self.sysfs.backplane(addr).map(|bp| CapacityEstimate {
                max_bays: bp.max_bays(),
                has_backplane: true,
                port_count: bp.port_count,
                capacity_unknown: false,
            }),

            CapacitySource::Phys => {
                Some(self.sysfs.phy_count(addr))
                    .filter(|&n| n > 0)
                    .map(CapacityEstimate::fixed)
            }

            CapacitySource::VendorTool => {
                if !self.use_vendor_tools {
                    return None;
                }
                vendor::phy_count(addr, self.vendor_timeout)
                    .await
                    .map(CapacityEstimate::fixed)
            }

            CapacitySource::OverridePorts => {
                let o = overrides?;
                let Some(bays) = o.ports?.checked_mul(o.lanes_per_port?) else {
                    warn!("{}: ports x lanes_per_port overflows, ignoring", addr);
                    return None;
                };
                (bays > 0).then(|| CapacityEstimate {
                    max_bays: bays,
                    has_backplane: false,
                    port_count: o.ports.unwrap_or(0),
                    capacity_unknown: false,
                })
            }
        }
    }
}
