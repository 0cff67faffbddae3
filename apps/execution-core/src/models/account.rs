//! Account balance snapshot.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Cash/equity snapshot as reported by the venue.
///
/// The venue is the only writer of balance state; every other component
/// reads or derives from snapshots of this struct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountBalance {
    /// Settled cash.
    pub cash: Decimal,
    /// Cash plus mark-to-market of open positions.
    pub equity: Decimal,
    /// Unrealized P&L across open positions.
    pub unrealized_pnl: Decimal,
    /// Realized P&L since account inception.
    pub realized_pnl: Decimal,
    /// Capital available for new orders.
    pub buying_power: Decimal,
}

impl AccountBalance {
    /// A flat account funded with the given cash.
    #[must_use]
    pub const fn with_cash(cash: Decimal) -> Self {
        Self {
            cash,
            equity: cash,
            unrealized_pnl: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            buying_power: cash,
        }
    }
}
