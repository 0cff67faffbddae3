//! Reconciliation configuration for periodic venue state sync.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Configuration for the periodic position reconciliation pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationConfig {
    /// Enable periodic reconciliation.
    #[serde(default = "default_reconciliation_enabled")]
    pub enabled: bool,
    /// Reconciliation interval in seconds.
    #[serde(default = "default_reconciliation_interval")]
    pub interval_secs: u64,
    /// Adopt the venue's quantity as authoritative after reporting a
    /// discrepancy. Discrepancies are always reported first.
    #[serde(default)]
    pub auto_sync: bool,
    /// Quantity differences at or below this tolerance are ignored.
    #[serde(default)]
    pub qty_tolerance: Decimal,
    /// Quantity-mismatch deltas at or above this fraction of the larger
    /// side are classified critical instead of warning.
    #[serde(default = "default_critical_delta_ratio")]
    pub critical_delta_ratio: Decimal,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            enabled: default_reconciliation_enabled(),
            interval_secs: default_reconciliation_interval(),
            auto_sync: false,
            qty_tolerance: Decimal::ZERO,
            critical_delta_ratio: default_critical_delta_ratio(),
        }
    }
}

const fn default_reconciliation_enabled() -> bool {
    true
}

const fn default_reconciliation_interval() -> u64 {
    300
}

fn default_critical_delta_ratio() -> Decimal {
    // 10%
    Decimal::new(1, 1)
}
