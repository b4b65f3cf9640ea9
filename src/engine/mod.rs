//! Background loops: lease monitor, worker registry, worker runtime.

pub mod monitor;
pub mod registry;
pub mod worker;

pub use monitor::{LeaseMonitor, MonitorConfig, SweepReport};
pub use registry::WorkerRegistry;
pub use worker::{Handler, Worker, WorkerConfig};
