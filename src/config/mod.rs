//! Configuration types and loading.
//!
//! - `HubConfig`: top-level configuration with validation
//! - `SchedulerConfig`: admission caps, retention, loop timing
//! - `BusConfig`: inbox sizing and overflow behaviour
//! - `ReportingConfig`: where completion reports go

mod settings;

pub use settings::{BusConfig, HubConfig, OverflowPolicy, ReportingConfig, SchedulerConfig};
