//! Execution manager and router configuration.

use serde::{Deserialize, Serialize};

/// Tuning knobs for the execution manager and order router.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Capacity of the broadcast event bus.
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,
    /// Window an order has to reach a terminal or partially-filled state
    /// before it is flagged degraded.
    #[serde(default = "default_submission_timeout_secs")]
    pub submission_timeout_secs: u64,
    /// Interval at which the router polls the venue for order state.
    #[serde(default = "default_monitor_poll_interval_ms")]
    pub monitor_poll_interval_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            event_bus_capacity: default_event_bus_capacity(),
            submission_timeout_secs: default_submission_timeout_secs(),
            monitor_poll_interval_ms: default_monitor_poll_interval_ms(),
        }
    }
}

const fn default_event_bus_capacity() -> usize {
    256
}

const fn default_submission_timeout_secs() -> u64 {
    30
}

const fn default_monitor_poll_interval_ms() -> u64 {
    100
}
