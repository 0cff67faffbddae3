//! Running execution statistics.

use rust_decimal::Decimal;
use serde::Serialize;

/// Counters and ratios folded in as orders and trades complete.
///
/// Each completed order or closed trade is folded in once, at the moment
/// it happens; nothing is ever recomputed from history. Drawdown is
/// measured against a running peak of baseline equity plus cumulative
/// net realized P&L.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionStats {
    /// Orders accepted by the venue.
    pub orders_submitted: u64,
    /// Orders that reached full fill.
    pub orders_filled: u64,
    /// Orders the venue rejected.
    pub orders_rejected: u64,
    /// Orders cancelled before completing.
    pub orders_cancelled: u64,
    /// Closed trades with positive net P&L.
    pub winning_trades: u64,
    /// Closed trades with negative net P&L.
    pub losing_trades: u64,
    /// All closed trades, including flat ones.
    pub total_trades: u64,
    /// Sum of positive net P&L across closed trades.
    pub gross_profit: Decimal,
    /// Sum of absolute negative net P&L across closed trades.
    pub gross_loss: Decimal,
    /// Cumulative net realized P&L.
    pub net_realized_pnl: Decimal,
    /// Commission paid across closed trades.
    pub total_commission: Decimal,
    /// Equity the drawdown is measured against.
    pub baseline_equity: Decimal,
    /// Running peak of baseline plus cumulative net realized P&L.
    pub peak_equity: Decimal,
    /// Largest peak-to-trough fraction observed so far.
    pub max_drawdown: Decimal,
    /// Drawdown fraction from the running peak right now.
    pub current_drawdown: Decimal,
}

impl ExecutionStats {
    /// Start a fresh fold from the given baseline equity.
    #[must_use]
    pub const fn new(baseline_equity: Decimal) -> Self {
        Self {
            orders_submitted: 0,
            orders_filled: 0,
            orders_rejected: 0,
            orders_cancelled: 0,
            winning_trades: 0,
            losing_trades: 0,
            total_trades: 0,
            gross_profit: Decimal::ZERO,
            gross_loss: Decimal::ZERO,
            net_realized_pnl: Decimal::ZERO,
            total_commission: Decimal::ZERO,
            baseline_equity,
            peak_equity: baseline_equity,
            max_drawdown: Decimal::ZERO,
            current_drawdown: Decimal::ZERO,
        }
    }

    /// Count an order accepted by the venue.
    pub const fn record_submitted(&mut self) {
        self.orders_submitted += 1;
    }

    /// Count an order that reached full fill.
    pub const fn record_filled(&mut self) {
        self.orders_filled += 1;
    }

    /// Count an order the venue rejected.
    pub const fn record_rejected(&mut self) {
        self.orders_rejected += 1;
    }

    /// Count an order cancelled before completing.
    pub const fn record_cancelled(&mut self) {
        self.orders_cancelled += 1;
    }

    /// Fold in a closed trade and advance the drawdown state.
    pub fn record_closed_trade(&mut self, net_pnl: Decimal, commission: Decimal) {
        self.total_trades += 1;
        self.total_commission += commission;
        self.net_realized_pnl += net_pnl;
        if net_pnl > Decimal::ZERO {
            self.winning_trades += 1;
            self.gross_profit += net_pnl;
        } else if net_pnl < Decimal::ZERO {
            self.losing_trades += 1;
            self.gross_loss += net_pnl.abs();
        }

        let equity = self.equity();
        if equity > self.peak_equity {
            self.peak_equity = equity;
        }
        self.current_drawdown = if self.peak_equity > Decimal::ZERO {
            (self.peak_equity - equity) / self.peak_equity
        } else {
            Decimal::ZERO
        };
        if self.current_drawdown > self.max_drawdown {
            self.max_drawdown = self.current_drawdown;
        }
    }

    /// Baseline equity plus cumulative net realized P&L.
    #[must_use]
    pub fn equity(&self) -> Decimal {
        self.baseline_equity + self.net_realized_pnl
    }

    /// Fraction of submitted orders that fully filled.
    #[must_use]
    pub fn fill_rate(&self) -> Decimal {
        if self.orders_submitted == 0 {
            Decimal::ZERO
        } else {
            Decimal::from(self.orders_filled) / Decimal::from(self.orders_submitted)
        }
    }

    /// Fraction of closed trades with positive net P&L.
    #[must_use]
    pub fn win_rate(&self) -> Decimal {
        if self.total_trades == 0 {
            Decimal::ZERO
        } else {
            Decimal::from(self.winning_trades) / Decimal::from(self.total_trades)
        }
    }

    /// Gross profit over gross loss. Absent until there is a loss.
    #[must_use]
    pub fn profit_factor(&self) -> Option<Decimal> {
        if self.gross_loss > Decimal::ZERO {
            Some(self.gross_profit / self.gross_loss)
        } else {
            None
        }
    }
}
