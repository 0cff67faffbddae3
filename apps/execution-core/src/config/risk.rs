//! Risk limit configuration.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::Instrument;
use crate::router::validation::RiskLimits;

/// Per-account trading constraints, read-only at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Maximum quantity for a single order.
    #[serde(default = "default_max_position_size")]
    pub max_position_size: Decimal,
    /// Maximum notional value for a single order.
    #[serde(default = "default_max_order_value")]
    pub max_order_value: Decimal,
    /// Maximum orders per trading day (UTC midnight boundary).
    #[serde(default = "default_max_daily_orders")]
    pub max_daily_orders: u32,
    /// Maximum distinct open positions.
    #[serde(default = "default_max_open_positions")]
    pub max_open_positions: u32,
    /// Maximum aggregate exposure over equity.
    #[serde(default = "default_max_leverage")]
    pub max_leverage: Decimal,
    /// Maximum tolerated drawdown fraction before auto-execution halts.
    #[serde(default = "default_max_drawdown")]
    pub max_drawdown: Decimal,
    /// Minimum cash the account must retain after a hypothetical fill.
    #[serde(default = "default_min_account_balance")]
    pub min_account_balance: Decimal,
    /// Tradeable instruments. Empty means no allow-list is enforced.
    #[serde(default)]
    pub allowed_instruments: Vec<String>,
    /// Instruments that must never be traded.
    #[serde(default)]
    pub denied_instruments: Vec<String>,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_position_size: default_max_position_size(),
            max_order_value: default_max_order_value(),
            max_daily_orders: default_max_daily_orders(),
            max_open_positions: default_max_open_positions(),
            max_leverage: default_max_leverage(),
            max_drawdown: default_max_drawdown(),
            min_account_balance: default_min_account_balance(),
            allowed_instruments: Vec::new(),
            denied_instruments: Vec::new(),
        }
    }
}

impl RiskConfig {
    /// Convert to the internal `RiskLimits` type used by the order router.
    #[must_use]
    pub fn to_risk_limits(&self) -> RiskLimits {
        RiskLimits {
            max_position_size: self.max_position_size,
            max_order_value: self.max_order_value,
            max_daily_orders: self.max_daily_orders,
            max_open_positions: self.max_open_positions,
            max_leverage: self.max_leverage,
            max_drawdown: self.max_drawdown,
            min_account_balance: self.min_account_balance,
            allowed_instruments: self
                .allowed_instruments
                .iter()
                .map(Instrument::new)
                .collect(),
            denied_instruments: self
                .denied_instruments
                .iter()
                .map(Instrument::new)
                .collect(),
        }
    }
}

fn default_max_position_size() -> Decimal {
    Decimal::from(1_000)
}

fn default_max_order_value() -> Decimal {
    Decimal::from(100_000)
}

const fn default_max_daily_orders() -> u32 {
    100
}

const fn default_max_open_positions() -> u32 {
    10
}

fn default_max_leverage() -> Decimal {
    Decimal::TWO
}

fn default_max_drawdown() -> Decimal {
    // 25%
    Decimal::new(25, 2)
}

fn default_min_account_balance() -> Decimal {
    Decimal::from(1_000)
}
