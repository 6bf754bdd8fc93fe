//! Process bootstrap for the mammoth job worker: configuration, logging and
//! the demonstration work handler.

pub mod config;
pub mod simulated;
pub mod telemetry;

// Re-export main types
pub use config::MammothConfig;
pub use simulated::{SimulatedWork, SimulatedWorkConfig};
pub use telemetry::{init_telemetry, TelemetryConfig};
