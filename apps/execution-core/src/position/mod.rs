//! Local position tracking.
//!
//! The manager derives open positions from fills, recomputes unrealized
//! P&L on price updates, and freezes an immutable closed record when a
//! position is fully consumed. It never touches account balance: cash and
//! equity belong to the venue, this module only reads and derives.

pub mod reconciliation;

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;

use crate::events::EventBus;
use crate::models::{
    ClosedPosition, ExecutionEvent, Fill, Instrument, ManagedPosition, PositionDirection,
    VenuePosition,
};
use crate::router::PortfolioView;

pub use reconciliation::{ReconciliationReport, Reconciler, diff_positions};

/// Errors from position bookkeeping.
#[derive(Debug, Error)]
pub enum PositionError {
    /// No open position for the instrument.
    #[error("no open position for {0}")]
    NotFound(Instrument),
    /// An entry fill arrived for the opposite direction.
    #[error("position for {instrument} is {existing}, cannot apply {attempted} entry")]
    DirectionConflict {
        /// Instrument concerned.
        instrument: Instrument,
        /// Direction of the tracked position.
        existing: PositionDirection,
        /// Direction the entry fill implied.
        attempted: PositionDirection,
    },
    /// A reducing fill was larger than the open quantity.
    #[error(
        "exit fill quantity {fill_quantity} exceeds open quantity {open_quantity} for {instrument}"
    )]
    ExitExceedsPosition {
        /// Instrument concerned.
        instrument: Instrument,
        /// Quantity of the reducing fill.
        fill_quantity: Decimal,
        /// Quantity actually open.
        open_quantity: Decimal,
    },
}

/// Outcome of applying a reducing fill.
#[derive(Debug, Clone)]
pub enum ExitOutcome {
    /// The fill consumed part of the position.
    Reduced {
        /// Position after the reduction.
        position: ManagedPosition,
        /// Realized P&L contributed by this fill.
        realized_delta: Decimal,
    },
    /// The fill consumed the remainder; the record moved to history.
    Closed {
        /// The frozen closed record.
        position: ClosedPosition,
        /// Realized P&L contributed by this fill.
        realized_delta: Decimal,
    },
}

impl ExitOutcome {
    /// Realized P&L delta of the fill, whichever branch it took.
    #[must_use]
    pub const fn realized_delta(&self) -> Decimal {
        match self {
            Self::Reduced { realized_delta, .. } | Self::Closed { realized_delta, .. } => {
                *realized_delta
            }
        }
    }

    /// The closed record, when the fill closed the position.
    #[must_use]
    pub const fn closed(&self) -> Option<&ClosedPosition> {
        match self {
            Self::Closed { position, .. } => Some(position),
            Self::Reduced { .. } => None,
        }
    }
}

/// Aggregate snapshot across open positions and closed history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortfolioStats {
    /// Number of open positions.
    pub open_count: usize,
    /// Number of closed positions in history.
    pub closed_count: usize,
    /// Sum of absolute notional exposure at current marks.
    pub gross_exposure: Decimal,
    /// Sum of unrealized P&L across open positions.
    pub unrealized_pnl: Decimal,
    /// Realized P&L: closed history plus partial reductions still open.
    pub realized_pnl: Decimal,
    /// Commission accumulated across everything tracked.
    pub commission_paid: Decimal,
}

/// Tracks open positions and immutable closed history.
pub struct PositionManager {
    open: RwLock<HashMap<Instrument, ManagedPosition>>,
    closed: RwLock<Vec<ClosedPosition>>,
    events: EventBus,
}

impl PositionManager {
    /// Create an empty manager publishing to the given bus.
    #[must_use]
    pub fn new(events: EventBus) -> Self {
        Self {
            open: RwLock::new(HashMap::new()),
            closed: RwLock::new(Vec::new()),
            events,
        }
    }

    /// Apply an entry fill: open a new position or fold into the
    /// volume-weighted entry of the existing same-direction one.
    ///
    /// Emits POSITION_OPENED when the fill created the position.
    ///
    /// # Errors
    ///
    /// `PositionError::DirectionConflict` when a position in the other
    /// direction is already open.
    pub fn apply_entry_fill(
        &self,
        instrument: &Instrument,
        direction: PositionDirection,
        fill: &Fill,
        stop_loss: Option<Decimal>,
    ) -> Result<ManagedPosition, PositionError> {
        let mut open = self.write_open();
        let (snapshot, created) = match open.get_mut(instrument) {
            Some(position) => {
                if position.direction != direction {
                    return Err(PositionError::DirectionConflict {
                        instrument: instrument.clone(),
                        existing: position.direction,
                        attempted: direction,
                    });
                }
                position.apply_entry_fill(fill);
                if stop_loss.is_some() {
                    position.stop_loss = stop_loss;
                }
                (position.clone(), false)
            }
            None => {
                let position =
                    ManagedPosition::open(instrument.clone(), direction, fill, stop_loss);
                open.insert(instrument.clone(), position.clone());
                (position, true)
            }
        };
        drop(open);

        if created {
            tracing::info!(
                instrument = %snapshot.instrument,
                direction = %snapshot.direction,
                quantity = %snapshot.quantity,
                entry_price = %snapshot.entry_price,
                "position opened"
            );
            self.events
                .publish(ExecutionEvent::position_opened(&snapshot));
        } else {
            tracing::debug!(
                instrument = %snapshot.instrument,
                quantity = %snapshot.quantity,
                entry_price = %snapshot.entry_price,
                "position increased"
            );
        }
        Ok(snapshot)
    }

    /// Apply a reducing fill and realize its P&L.
    ///
    /// When the fill consumes the full open quantity the record is
    /// frozen, appended to closed history, and POSITION_CLOSED is
    /// emitted.
    ///
    /// # Errors
    ///
    /// `PositionError::NotFound` when nothing is open for the
    /// instrument, `PositionError::ExitExceedsPosition` when the fill is
    /// larger than the open quantity (state is left untouched).
    pub fn apply_exit_fill(
        &self,
        instrument: &Instrument,
        fill: &Fill,
    ) -> Result<ExitOutcome, PositionError> {
        let mut open = self.write_open();
        let Some(position) = open.get_mut(instrument) else {
            return Err(PositionError::NotFound(instrument.clone()));
        };
        if fill.quantity > position.quantity {
            return Err(PositionError::ExitExceedsPosition {
                instrument: instrument.clone(),
                fill_quantity: fill.quantity,
                open_quantity: position.quantity,
            });
        }

        let realized_delta = position.apply_exit_fill(fill);
        if position.is_flat() {
            let removed = open.remove(instrument);
            drop(open);
            let closed = removed
                .map(|p| p.into_closed(fill.timestamp))
                .ok_or_else(|| PositionError::NotFound(instrument.clone()))?;
            self.write_closed().push(closed.clone());
            tracing::info!(
                instrument = %closed.instrument,
                realized_pnl = %closed.realized_pnl,
                quantity = %closed.quantity,
                "position closed"
            );
            self.events
                .publish(ExecutionEvent::position_closed(&closed));
            Ok(ExitOutcome::Closed {
                position: closed,
                realized_delta,
            })
        } else {
            let snapshot = position.clone();
            drop(open);
            tracing::debug!(
                instrument = %snapshot.instrument,
                remaining = %snapshot.quantity,
                realized_delta = %realized_delta,
                "position reduced"
            );
            Ok(ExitOutcome::Reduced {
                position: snapshot,
                realized_delta,
            })
        }
    }

    /// Update the mark price of an open position, returning its new
    /// unrealized P&L. Realized P&L is never touched by price updates.
    pub fn update_price(&self, instrument: &Instrument, price: Decimal) -> Option<Decimal> {
        let mut open = self.write_open();
        let position = open.get_mut(instrument)?;
        position.update_price(price);
        Some(position.unrealized_pnl())
    }

    /// Replace the stop level tracked on an open position.
    ///
    /// # Errors
    ///
    /// `PositionError::NotFound` when nothing is open for the instrument.
    pub fn set_stop_loss(
        &self,
        instrument: &Instrument,
        stop_loss: Option<Decimal>,
    ) -> Result<(), PositionError> {
        let mut open = self.write_open();
        let position = open
            .get_mut(instrument)
            .ok_or_else(|| PositionError::NotFound(instrument.clone()))?;
        position.stop_loss = stop_loss;
        Ok(())
    }

    /// Snapshot of one open position.
    #[must_use]
    pub fn get(&self, instrument: &Instrument) -> Option<ManagedPosition> {
        self.read_open().get(instrument).cloned()
    }

    /// Snapshot of all open positions, ordered by instrument.
    #[must_use]
    pub fn open_positions(&self) -> Vec<ManagedPosition> {
        let mut positions: Vec<ManagedPosition> = self.read_open().values().cloned().collect();
        positions.sort_by(|a, b| a.instrument.cmp(&b.instrument));
        positions
    }

    /// Snapshot of closed history, oldest first.
    #[must_use]
    pub fn closed_positions(&self) -> Vec<ClosedPosition> {
        self.read_closed().clone()
    }

    /// Diff the locally tracked open set against a venue-reported list.
    ///
    /// Pure classification over read snapshots; discrepancies are
    /// returned, not acted on.
    #[must_use]
    pub fn reconcile(
        &self,
        venue_positions: &[VenuePosition],
        config: &crate::config::ReconciliationConfig,
    ) -> Vec<crate::models::Discrepancy> {
        diff_positions(&self.open_positions(), venue_positions, config)
    }

    /// Aggregate statistics over open positions and closed history.
    #[must_use]
    pub fn portfolio_stats(&self) -> PortfolioStats {
        let open = self.read_open();
        let closed = self.read_closed();
        let mut stats = PortfolioStats {
            open_count: open.len(),
            closed_count: closed.len(),
            gross_exposure: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            commission_paid: Decimal::ZERO,
        };
        for position in open.values() {
            stats.gross_exposure += position.notional_exposure().abs();
            stats.unrealized_pnl += position.unrealized_pnl();
            stats.realized_pnl += position.realized_pnl;
            stats.commission_paid += position.commission_paid;
        }
        for record in closed.iter() {
            stats.realized_pnl += record.realized_pnl;
            stats.commission_paid += record.commission_paid;
        }
        stats
    }

    /// Adopt a venue-only position as local truth.
    fn adopt_venue_position(&self, venue: &VenuePosition) -> Option<ManagedPosition> {
        let direction = direction_of(venue.quantity)?;
        let snapshot = ManagedPosition {
            instrument: venue.instrument.clone(),
            direction,
            quantity: venue.quantity.abs(),
            entry_price: venue.avg_entry_price,
            current_price: venue.avg_entry_price,
            stop_loss: None,
            commission_paid: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            closed_quantity: Decimal::ZERO,
            exit_notional: Decimal::ZERO,
            opened_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        };
        self.write_open()
            .insert(venue.instrument.clone(), snapshot.clone());
        self.events
            .publish(ExecutionEvent::position_opened(&snapshot));
        Some(snapshot)
    }

    /// Drop a local-only position the venue does not know about.
    fn force_close(&self, instrument: &Instrument) -> Option<ClosedPosition> {
        let removed = self.write_open().remove(instrument)?;
        let closed = removed.into_closed(chrono::Utc::now());
        self.write_closed().push(closed.clone());
        self.events.publish(ExecutionEvent::position_closed(&closed));
        Some(closed)
    }

    /// Overwrite local quantity (and direction, if it flipped) with the
    /// venue-reported value.
    fn force_quantity(&self, venue: &VenuePosition) -> Option<ManagedPosition> {
        let direction = direction_of(venue.quantity)?;
        let mut open = self.write_open();
        let position = open.get_mut(&venue.instrument)?;
        position.quantity = venue.quantity.abs();
        if position.direction != direction {
            position.direction = direction;
            position.entry_price = venue.avg_entry_price;
        }
        position.updated_at = chrono::Utc::now();
        Some(position.clone())
    }

    fn read_open(&self) -> RwLockReadGuard<'_, HashMap<Instrument, ManagedPosition>> {
        self.open.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_open(&self) -> RwLockWriteGuard<'_, HashMap<Instrument, ManagedPosition>> {
        self.open.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_closed(&self) -> RwLockReadGuard<'_, Vec<ClosedPosition>> {
        self.closed.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_closed(&self) -> RwLockWriteGuard<'_, Vec<ClosedPosition>> {
        self.closed.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PortfolioView for PositionManager {
    fn open_position_count(&self) -> u32 {
        self.read_open().len() as u32
    }

    fn gross_exposure(&self) -> Decimal {
        self.read_open()
            .values()
            .map(|p| p.notional_exposure().abs())
            .sum()
    }
}

fn direction_of(signed_quantity: Decimal) -> Option<PositionDirection> {
    if signed_quantity > Decimal::ZERO {
        Some(PositionDirection::Long)
    } else if signed_quantity < Decimal::ZERO {
        Some(PositionDirection::Short)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
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

    fn manager() -> PositionManager {
        PositionManager::new(EventBus::new(32))
    }

    #[test]
    fn entry_then_full_exit_round_trips_to_history() {
        let manager = manager();
        let instrument = Instrument::from("ACME");

        manager
            .apply_entry_fill(
                &instrument,
                PositionDirection::Long,
                &fill(dec!(150), dec!(100), dec!(1)),
                None,
            )
            .unwrap();
        assert_eq!(manager.open_positions().len(), 1);

        let outcome = manager
            .apply_exit_fill(&instrument, &fill(dec!(155), dec!(100), dec!(1)))
            .unwrap();
        let closed = outcome.closed().expect("position should close");
        // (155 - 150) * 100 - 1 = 499
        assert_eq!(outcome.realized_delta(), dec!(499));
        assert_eq!(closed.realized_pnl, dec!(499));
        assert_eq!(closed.quantity, dec!(100));
        assert_eq!(closed.instrument, instrument);

        assert!(manager.open_positions().is_empty());
        let history = manager.closed_positions();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].instrument, instrument);
    }

    #[test]
    fn second_entry_updates_vwap_without_reopening() {
        let manager = manager();
        let instrument = Instrument::from("ACME");
        let mut rx = manager.events.subscribe();

        manager
            .apply_entry_fill(
                &instrument,
                PositionDirection::Long,
                &fill(dec!(100), dec!(10), dec!(0)),
                None,
            )
            .unwrap();
        let position = manager
            .apply_entry_fill(
                &instrument,
                PositionDirection::Long,
                &fill(dec!(110), dec!(10), dec!(0)),
                None,
            )
            .unwrap();
        assert_eq!(position.entry_price, dec!(105));
        assert_eq!(position.quantity, dec!(20));

        // Only the first fill opened the position.
        let mut opened = 0;
        while let Ok(event) = rx.try_recv() {
            if event.event_type() == "POSITION_OPENED" {
                opened += 1;
            }
        }
        assert_eq!(opened, 1);
    }

    #[test]
    fn exit_without_position_is_an_error() {
        let manager = manager();
        let err = manager
            .apply_exit_fill(&Instrument::from("ACME"), &fill(dec!(100), dec!(1), dec!(0)))
            .unwrap_err();
        assert!(matches!(err, PositionError::NotFound(_)));
    }

    #[test]
    fn opposite_direction_entry_is_rejected() {
        let manager = manager();
        let instrument = Instrument::from("ACME");
        manager
            .apply_entry_fill(
                &instrument,
                PositionDirection::Long,
                &fill(dec!(100), dec!(10), dec!(0)),
                None,
            )
            .unwrap();
        let err = manager
            .apply_entry_fill(
                &instrument,
                PositionDirection::Short,
                &fill(dec!(100), dec!(10), dec!(0)),
                None,
            )
            .unwrap_err();
        assert!(matches!(err, PositionError::DirectionConflict { .. }));
        assert_eq!(manager.get(&instrument).unwrap().quantity, dec!(10));
    }

    #[test]
    fn oversized_exit_leaves_state_untouched() {
        let manager = manager();
        let instrument = Instrument::from("ACME");
        manager
            .apply_entry_fill(
                &instrument,
                PositionDirection::Long,
                &fill(dec!(100), dec!(10), dec!(0)),
                None,
            )
            .unwrap();
        let err = manager
            .apply_exit_fill(&instrument, &fill(dec!(100), dec!(20), dec!(0)))
            .unwrap_err();
        assert!(matches!(err, PositionError::ExitExceedsPosition { .. }));
        assert_eq!(manager.get(&instrument).unwrap().quantity, dec!(10));
        assert!(manager.closed_positions().is_empty());
    }

    #[test]
    fn partial_exit_keeps_position_open() {
        let manager = manager();
        let instrument = Instrument::from("ACME");
        manager
            .apply_entry_fill(
                &instrument,
                PositionDirection::Long,
                &fill(dec!(100), dec!(10), dec!(0)),
                None,
            )
            .unwrap();
        let outcome = manager
            .apply_exit_fill(&instrument, &fill(dec!(110), dec!(4), dec!(0)))
            .unwrap();
        assert!(outcome.closed().is_none());
        assert_eq!(outcome.realized_delta(), dec!(40));
        assert_eq!(manager.get(&instrument).unwrap().quantity, dec!(6));
    }

    #[test]
    fn price_update_recomputes_unrealized_only() {
        let manager = manager();
        let instrument = Instrument::from("ACME");
        manager
            .apply_entry_fill(
                &instrument,
                PositionDirection::Long,
                &fill(dec!(100), dec!(10), dec!(2)),
                None,
            )
            .unwrap();
        let unrealized = manager.update_price(&instrument, dec!(105)).unwrap();
        // (105 - 100) * 10 - 2 = 48
        assert_eq!(unrealized, dec!(48));
        assert_eq!(manager.get(&instrument).unwrap().realized_pnl, Decimal::ZERO);
    }

    #[test]
    fn portfolio_stats_aggregate_open_and_closed() {
        let manager = manager();
        let a = Instrument::from("AAA");
        let b = Instrument::from("BBB");
        manager
            .apply_entry_fill(
                &a,
                PositionDirection::Long,
                &fill(dec!(100), dec!(10), dec!(1)),
                None,
            )
            .unwrap();
        manager
            .apply_entry_fill(
                &b,
                PositionDirection::Short,
                &fill(dec!(50), dec!(20), dec!(1)),
                None,
            )
            .unwrap();
        manager
            .apply_exit_fill(&b, &fill(dec!(45), dec!(20), dec!(1)))
            .unwrap();

        let stats = manager.portfolio_stats();
        assert_eq!(stats.open_count, 1);
        assert_eq!(stats.closed_count, 1);
        assert_eq!(stats.gross_exposure, dec!(1000));
        // Short 20 @ 50 exited at 45: (45-50)*20*-1 - 1 = 99
        assert_eq!(stats.realized_pnl, dec!(99));
        assert_eq!(stats.commission_paid, dec!(3));
    }

    #[test]
    fn portfolio_view_reports_count_and_exposure() {
        let manager = manager();
        let instrument = Instrument::from("ACME");
        manager
            .apply_entry_fill(
                &instrument,
                PositionDirection::Short,
                &fill(dec!(200), dec!(5), dec!(0)),
                None,
            )
            .unwrap();
        assert_eq!(manager.open_position_count(), 1);
        assert_eq!(manager.gross_exposure(), dec!(1000));
    }
}
