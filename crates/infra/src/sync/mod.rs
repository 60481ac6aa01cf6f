//! Background services around the sync queue

pub mod maintenance;

pub use maintenance::{MaintenanceConfig, MaintenanceService, MaintenanceStats};
