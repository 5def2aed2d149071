//! Long-lived service handles constructed at startup and threaded through
//! the HTTP surface and the pipeline.

pub mod deal_monitor;
pub mod miner_assignment;
pub mod stats;

pub use deal_monitor::DealStatusMonitor;
pub use miner_assignment::MinerAssignmentService;
pub use stats::StatsService;
