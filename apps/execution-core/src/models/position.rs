//! Positions derived from fills, and the reconciliation classifications
//! used when local and venue views of them diverge.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::order::{Fill, Instrument, Side};

/// Direction of an open position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionDirection {
    /// Profits when price rises.
    Long,
    /// Profits when price falls.
    Short,
}

impl PositionDirection {
    /// Sign applied to P&L: +1 for long, -1 for short.
    #[must_use]
    pub const fn sign(&self) -> Decimal {
        match self {
            Self::Long => Decimal::ONE,
            Self::Short => Decimal::NEGATIVE_ONE,
        }
    }

    /// Order side that opens or adds to this position.
    #[must_use]
    pub const fn entry_side(&self) -> Side {
        match self {
            Self::Long => Side::Buy,
            Self::Short => Side::Sell,
        }
    }

    /// Order side that reduces or closes this position.
    #[must_use]
    pub const fn exit_side(&self) -> Side {
        match self {
            Self::Long => Side::Sell,
            Self::Short => Side::Buy,
        }
    }
}

impl fmt::Display for PositionDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Long => write!(f, "LONG"),
            Self::Short => write!(f, "SHORT"),
        }
    }
}

/// Net open exposure in one instrument, derived from fills.
///
/// Quantity is always positive; the direction carries the sign. The entry
/// price is the volume-weighted average of the fills contributing to the
/// currently open quantity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagedPosition {
    /// Instrument held.
    pub instrument: Instrument,
    /// Long or short.
    pub direction: PositionDirection,
    /// Open quantity (positive).
    pub quantity: Decimal,
    /// Volume-weighted average entry price.
    pub entry_price: Decimal,
    /// Most recent mark price.
    pub current_price: Decimal,
    /// Protective stop level, when one is tracked.
    pub stop_loss: Option<Decimal>,
    /// Commission accumulated across entry and exit fills.
    pub commission_paid: Decimal,
    /// Realized P&L accumulated from reducing fills so far.
    pub realized_pnl: Decimal,
    /// Quantity closed so far by reducing fills.
    pub closed_quantity: Decimal,
    /// Notional value of reducing fills, for the exit VWAP.
    pub exit_notional: Decimal,
    /// When the position was opened.
    pub opened_at: DateTime<Utc>,
    /// When the position last changed.
    pub updated_at: DateTime<Utc>,
}

impl ManagedPosition {
    /// Open a position from its first entry fill.
    #[must_use]
    pub fn open(
        instrument: Instrument,
        direction: PositionDirection,
        fill: &Fill,
        stop_loss: Option<Decimal>,
    ) -> Self {
        Self {
            instrument,
            direction,
            quantity: fill.quantity,
            entry_price: fill.price,
            current_price: fill.price,
            stop_loss,
            commission_paid: fill.commission,
            realized_pnl: Decimal::ZERO,
            closed_quantity: Decimal::ZERO,
            exit_notional: Decimal::ZERO,
            opened_at: fill.timestamp,
            updated_at: fill.timestamp,
        }
    }

    /// Fold an additional same-side fill into the entry VWAP.
    pub fn apply_entry_fill(&mut self, fill: &Fill) {
        let new_quantity = self.quantity + fill.quantity;
        self.entry_price =
            (self.entry_price * self.quantity + fill.notional()) / new_quantity;
        self.quantity = new_quantity;
        self.commission_paid += fill.commission;
        self.current_price = fill.price;
        self.updated_at = fill.timestamp;
    }

    /// Apply a reducing fill, returning the realized P&L delta it
    /// contributes. The caller ensures `fill.quantity <= self.quantity`.
    pub fn apply_exit_fill(&mut self, fill: &Fill) -> Decimal {
        let delta = (fill.price - self.entry_price) * fill.quantity * self.direction.sign()
            - fill.commission;
        self.realized_pnl += delta;
        self.quantity -= fill.quantity;
        self.closed_quantity += fill.quantity;
        self.exit_notional += fill.notional();
        self.commission_paid += fill.commission;
        self.current_price = fill.price;
        self.updated_at = fill.timestamp;
        delta
    }

    /// Update the mark price without touching realized P&L.
    pub fn update_price(&mut self, price: Decimal) {
        self.current_price = price;
        self.updated_at = Utc::now();
    }

    /// Unrealized P&L at the current mark:
    /// `(current - entry) x quantity x direction_sign - commission`.
    #[must_use]
    pub fn unrealized_pnl(&self) -> Decimal {
        (self.current_price - self.entry_price) * self.quantity * self.direction.sign()
            - self.commission_paid
    }

    /// Notional exposure at the current mark.
    #[must_use]
    pub fn notional_exposure(&self) -> Decimal {
        self.quantity * self.current_price
    }

    /// Quantity with the direction sign applied, as venues report it.
    #[must_use]
    pub fn signed_quantity(&self) -> Decimal {
        self.quantity * self.direction.sign()
    }

    /// Returns true once reducing fills have consumed the whole position.
    #[must_use]
    pub fn is_flat(&self) -> bool {
        self.quantity.is_zero()
    }

    /// Freeze this position into its immutable closed record.
    #[must_use]
    pub fn into_closed(self, closed_at: DateTime<Utc>) -> ClosedPosition {
        let exit_price = if self.closed_quantity.is_zero() {
            self.current_price
        } else {
            self.exit_notional / self.closed_quantity
        };
        ClosedPosition {
            instrument: self.instrument,
            direction: self.direction,
            quantity: self.closed_quantity,
            entry_price: self.entry_price,
            exit_price,
            realized_pnl: self.realized_pnl,
            commission_paid: self.commission_paid,
            opened_at: self.opened_at,
            closed_at,
        }
    }
}

/// Immutable record of a fully closed position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedPosition {
    /// Instrument that was held.
    pub instrument: Instrument,
    /// Direction that was held.
    pub direction: PositionDirection,
    /// Total quantity closed.
    pub quantity: Decimal,
    /// Volume-weighted entry price.
    pub entry_price: Decimal,
    /// Volume-weighted exit price.
    pub exit_price: Decimal,
    /// Final realized P&L, net of commission. Set once, never mutated.
    pub realized_pnl: Decimal,
    /// Total commission across the position's life.
    pub commission_paid: Decimal,
    /// When the position was opened.
    pub opened_at: DateTime<Utc>,
    /// When the position was closed.
    pub closed_at: DateTime<Utc>,
}

/// A position as the venue reports it. Quantity is signed: negative
/// means short.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VenuePosition {
    /// Instrument held at the venue.
    pub instrument: Instrument,
    /// Signed quantity.
    pub quantity: Decimal,
    /// Venue's average entry price.
    pub avg_entry_price: Decimal,
}

/// How a reconciliation pass classifies one divergence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscrepancyKind {
    /// Tracked locally, absent at the venue. Likely a missed fill
    /// notification on the close side.
    LocalOnly,
    /// Present at the venue, untracked locally. Likely a missed open.
    VenueOnly,
    /// Both sides hold the instrument but quantities differ.
    QuantityMismatch,
}

impl fmt::Display for DiscrepancyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LocalOnly => write!(f, "LOCAL_ONLY"),
            Self::VenueOnly => write!(f, "VENUE_ONLY"),
            Self::QuantityMismatch => write!(f, "QUANTITY_MISMATCH"),
        }
    }
}

/// Severity of a reconciliation discrepancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscrepancySeverity {
    /// Informational only.
    Info,
    /// Needs attention but trading can continue.
    Warning,
    /// Likely missed event or material quantity divergence.
    Critical,
}

impl fmt::Display for DiscrepancySeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Warning => write!(f, "WARNING"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// One divergence between the local position set and the venue's.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Discrepancy {
    /// Instrument the divergence concerns.
    pub instrument: Instrument,
    /// Classification of the divergence.
    pub kind: DiscrepancyKind,
    /// Severity, scaled by the size of the delta for quantity mismatches.
    pub severity: DiscrepancySeverity,
    /// Locally tracked signed quantity, when a local position exists.
    pub local_quantity: Option<Decimal>,
    /// Venue-reported signed quantity, when a venue position exists.
    pub venue_quantity: Option<Decimal>,
    /// Absolute quantity difference between the two views.
    pub delta: Decimal,
    /// When the reconciliation pass detected this.
    pub detected_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    fn fill(price: Decimal, quantity: Decimal, commission: Decimal) -> Fill {
        Fill {
            price,
            quantity,
            commission,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn open_takes_first_fill_values() {
        let position = ManagedPosition::open(
            Instrument::from("ETH-USD"),
            PositionDirection::Long,
            &fill(dec!(2000), dec!(5), dec!(1)),
            Some(dec!(1900)),
        );
        assert_eq!(position.quantity, dec!(5));
        assert_eq!(position.entry_price, dec!(2000));
        assert_eq!(position.stop_loss, Some(dec!(1900)));
        assert_eq!(position.realized_pnl, Decimal::ZERO);
    }

    #[test]
    fn entry_fills_update_vwap() {
        let mut position = ManagedPosition::open(
            Instrument::from("ETH-USD"),
            PositionDirection::Long,
            &fill(dec!(2000), dec!(5), dec!(1)),
            None,
        );
        position.apply_entry_fill(&fill(dec!(2100), dec!(5), dec!(1)));
        // (2000*5 + 2100*5) / 10 = 2050
        assert_eq!(position.entry_price, dec!(2050));
        assert_eq!(position.quantity, dec!(10));
        assert_eq!(position.commission_paid, dec!(2));
    }

    #[test]
    fn unrealized_pnl_long() {
        let mut position = ManagedPosition::open(
            Instrument::from("ETH-USD"),
            PositionDirection::Long,
            &fill(dec!(2000), dec!(10), dec!(2)),
            None,
        );
        position.update_price(dec!(2050));
        // (2050 - 2000) * 10 - 2 = 498
        assert_eq!(position.unrealized_pnl(), dec!(498));
    }

    #[test]
    fn unrealized_pnl_short_gains_when_price_falls() {
        let mut position = ManagedPosition::open(
            Instrument::from("ETH-USD"),
            PositionDirection::Short,
            &fill(dec!(2000), dec!(10), dec!(2)),
            None,
        );
        position.update_price(dec!(1950));
        // (1950 - 2000) * 10 * -1 - 2 = 498
        assert_eq!(position.unrealized_pnl(), dec!(498));
        assert_eq!(position.signed_quantity(), dec!(-10));
    }

    #[test]
    fn exit_fill_realizes_pnl_and_reduces() {
        let mut position = ManagedPosition::open(
            Instrument::from("ETH-USD"),
            PositionDirection::Long,
            &fill(dec!(2000), dec!(10), dec!(2)),
            None,
        );
        let delta = position.apply_exit_fill(&fill(dec!(2100), dec!(4), dec!(1)));
        // (2100 - 2000) * 4 - 1 = 399
        assert_eq!(delta, dec!(399));
        assert_eq!(position.quantity, dec!(6));
        assert!(!position.is_flat());

        position.apply_exit_fill(&fill(dec!(2100), dec!(6), dec!(1)));
        assert!(position.is_flat());
        // 399 + (2100-2000)*6 - 1 = 998
        assert_eq!(position.realized_pnl, dec!(998));
    }

    #[test]
    fn closed_record_freezes_realized_and_exit_vwap() {
        let mut position = ManagedPosition::open(
            Instrument::from("ETH-USD"),
            PositionDirection::Long,
            &fill(dec!(2000), dec!(10), dec!(0)),
            None,
        );
        position.apply_exit_fill(&fill(dec!(2100), dec!(5), dec!(0)));
        position.apply_exit_fill(&fill(dec!(2200), dec!(5), dec!(0)));
        let closed_at = Utc::now();
        let closed = position.into_closed(closed_at);
        assert_eq!(closed.quantity, dec!(10));
        // (2100*5 + 2200*5) / 10 = 2150
        assert_eq!(closed.exit_price, dec!(2150));
        // (2150 - 2000) * 10 = 1500
        assert_eq!(closed.realized_pnl, dec!(1500));
        assert_eq!(closed.closed_at, closed_at);
    }

    #[test]
    fn severity_ordering() {
        assert!(DiscrepancySeverity::Critical > DiscrepancySeverity::Warning);
        assert!(DiscrepancySeverity::Warning > DiscrepancySeverity::Info);
    }
}
