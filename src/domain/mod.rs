pub mod activity;
pub mod capacity;
pub mod device;
pub mod pool_activity;
pub mod topology;

pub use activity::IoActivitySampler;
pub use capacity::CapacityEstimator;
pub use device::{BayRecord, BayStatus, CapacityEstimate, ControllerRecord, HealthState};
pub use pool_activity::{PoolActivityAggregator, PoolHistory};
pub use topology::{TopologyReconciler, TopologyScan};
