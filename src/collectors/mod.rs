pub mod blockdev;
pub mod bypath;
pub mod command;
pub mod diskstats;
pub mod enclosure;
pub mod pci;
pub mod vendor;
pub mod zfs;

pub use blockdev::DeviceIdentity;
pub use bypath::ByPathEntry;
pub use diskstats::SectorCounters;
pub use enclosure::SysfsInspector;
pub use pci::{ControllerClass, PciAddress};
pub use zfs::{ApiStatus, PoolHealth, PoolHealthEntry, ZfsResolver};
