//! Paper trading venue configuration.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Commission schedule: a flat per-unit fee plus a percentage of notional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommissionConfig {
    /// Flat fee charged per unit traded.
    #[serde(default)]
    pub per_unit: Decimal,
    /// Fraction of fill notional charged as fee (0.0005 = 5 bps).
    #[serde(default)]
    pub pct_of_notional: Decimal,
}

/// Parameters of the paper trading venue simulation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperVenueConfig {
    /// Starting cash for the simulated account.
    #[serde(default = "default_initial_capital")]
    pub initial_capital: Decimal,
    /// Commission schedule applied to every fill.
    #[serde(default)]
    pub commission: CommissionConfig,
    /// Adverse fill offset as a fraction of reference price
    /// (0.0005 = 0.05%).
    #[serde(default = "default_slippage_pct")]
    pub slippage_pct: Decimal,
    /// Artificial delay between accepting an order and filling it.
    #[serde(default = "default_fill_delay_ms")]
    pub fill_delay_ms: u64,
    /// Probability that a pending order is rejected outright.
    #[serde(default)]
    pub reject_probability: f64,
    /// Probability that a fill arrives in two tranches instead of one.
    #[serde(default)]
    pub partial_fill_probability: f64,
    /// Per-tick fraction bound of the simulated price walk.
    #[serde(default = "default_walk_volatility_pct")]
    pub walk_volatility_pct: f64,
    /// Interval between simulated price ticks.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Seed for the venue's random source. Fixing it makes a simulation
    /// reproducible; `None` seeds from entropy.
    #[serde(default)]
    pub rng_seed: Option<u64>,
}

impl Default for PaperVenueConfig {
    fn default() -> Self {
        Self {
            initial_capital: default_initial_capital(),
            commission: CommissionConfig::default(),
            slippage_pct: default_slippage_pct(),
            fill_delay_ms: default_fill_delay_ms(),
            reject_probability: 0.0,
            partial_fill_probability: 0.0,
            walk_volatility_pct: default_walk_volatility_pct(),
            tick_interval_ms: default_tick_interval_ms(),
            rng_seed: None,
        }
    }
}

fn default_initial_capital() -> Decimal {
    Decimal::from(100_000)
}

fn default_slippage_pct() -> Decimal {
    // 0.05%
    Decimal::new(5, 4)
}

const fn default_fill_delay_ms() -> u64 {
    10
}

const fn default_walk_volatility_pct() -> f64 {
    0.001
}

const fn default_tick_interval_ms() -> u64 {
    500
}
