//! Signal-driven execution orchestration.
//!
//! The manager sits between the upstream strategy framework and the
//! order router. It converts entry, exit, and stop-adjustment signals
//! into routed orders, keeps the position manager in step with venue
//! outcomes, folds running statistics off the event stream, and halts
//! auto-execution when the drawdown limit is breached or local
//! accounting diverges from the venue.

pub mod stats;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use rust_decimal::Decimal;
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::events::EventBus;
use crate::models::events::OrderFilled;
use crate::models::{
    EntrySignal, ExecutionEvent, ExitSignal, Fill, Instrument, ManagedPosition, Order,
    OrderPurpose, OrderRequest, OrderStatus, OrderType, OrderUpdate, PositionDirection,
    RiskLimitBreached, Side, SignalEvent, StopAdjustment,
};
use crate::position::{ExitOutcome, PortfolioStats, PositionError, PositionManager};
use crate::router::{OrderRouter, RouterError};

pub use stats::ExecutionStats;

/// Errors surfaced by the execution manager.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Auto-execution is disabled; mutating calls are refused.
    #[error("auto-execution is disabled, {0} refused")]
    Halted(String),
    /// Order routing failed.
    #[error("order routing failed: {0}")]
    Router(#[from] RouterError),
    /// Position bookkeeping failed.
    #[error("position bookkeeping failed: {0}")]
    Position(#[from] PositionError),
}

/// Converts upstream signals into routed orders and keeps local
/// position and statistics state in step with venue outcomes.
pub struct ExecutionManager {
    router: OrderRouter,
    positions: Arc<PositionManager>,
    events: EventBus,
    stats: Mutex<ExecutionStats>,
    tracked_stops: Mutex<HashMap<Instrument, String>>,
    instrument_locks: Mutex<HashMap<Instrument, Arc<AsyncMutex<()>>>>,
    event_rx: Mutex<Option<broadcast::Receiver<ExecutionEvent>>>,
    auto_execution: AtomicBool,
    max_drawdown: Decimal,
}

impl ExecutionManager {
    /// Build a manager over the given router and position manager.
    ///
    /// `baseline_equity` anchors the drawdown fold; `max_drawdown` is
    /// the fraction beyond which auto-execution halts.
    #[must_use]
    pub fn new(
        router: OrderRouter,
        positions: Arc<PositionManager>,
        events: EventBus,
        baseline_equity: Decimal,
        max_drawdown: Decimal,
    ) -> Self {
        let event_rx = events.subscribe();
        Self {
            router,
            positions,
            events,
            stats: Mutex::new(ExecutionStats::new(baseline_equity)),
            tracked_stops: Mutex::new(HashMap::new()),
            instrument_locks: Mutex::new(HashMap::new()),
            event_rx: Mutex::new(Some(event_rx)),
            auto_execution: AtomicBool::new(true),
            max_drawdown,
        }
    }

    /// Spawn the event loop as a background task.
    pub fn spawn_event_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move { manager.run_event_loop().await })
    }

    /// Fold execution events into the running statistics and book fills
    /// from tracked protective stops as they complete.
    ///
    /// The subscription is taken at construction time, so events
    /// published before this loop starts are still observed.
    pub async fn run_event_loop(&self) {
        let mut rx = self
            .lock_event_rx()
            .take()
            .unwrap_or_else(|| self.events.subscribe());
        loop {
            match rx.recv().await {
                Ok(event) => self.fold_event(&event),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "event loop lagged, statistics may undercount");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    /// Dispatch one upstream signal to its handler.
    ///
    /// # Errors
    ///
    /// Propagates the handler's error.
    pub async fn handle_signal(&self, signal: &SignalEvent) -> Result<(), EngineError> {
        match signal {
            SignalEvent::EntrySignal(entry) => self.handle_entry_signal(entry).await,
            SignalEvent::ExitSignal(exit) => self.handle_exit_signal(exit).await,
            SignalEvent::StopAdjustment(adjustment) => {
                self.handle_stop_adjustment(adjustment).await
            }
        }
    }

    /// Open (or add to) a position from an entry signal.
    ///
    /// Submits a market order, waits for the terminal outcome, books the
    /// fills, and places a linked protective stop sized to the filled
    /// quantity when the signal carried a stop level. A failed stop
    /// placement leaves the entry standing and is logged, not unwound.
    ///
    /// # Errors
    ///
    /// `EngineError::Halted` when auto-execution is disabled,
    /// `EngineError::Position` when the signal conflicts with the open
    /// direction, `EngineError::Router` when routing fails.
    pub async fn handle_entry_signal(&self, signal: &EntrySignal) -> Result<(), EngineError> {
        self.ensure_enabled(Some(&signal.instrument), "entry signal")?;
        let lock = self.instrument_lock(&signal.instrument);
        let _guard = lock.lock().await;

        if let Some(existing) = self.positions.get(&signal.instrument) {
            if existing.direction != signal.direction {
                let error = PositionError::DirectionConflict {
                    instrument: signal.instrument.clone(),
                    existing: existing.direction,
                    attempted: signal.direction,
                };
                tracing::warn!(instrument = %signal.instrument, %error, "entry signal refused");
                self.events.publish(ExecutionEvent::error(
                    Some(signal.instrument.clone()),
                    None,
                    error.to_string(),
                ));
                return Err(error.into());
            }
        }

        let request = OrderRequest {
            instrument: signal.instrument.clone(),
            side: signal.direction.entry_side(),
            order_type: OrderType::Market,
            quantity: signal.quantity,
            limit_price: None,
            stop_price: None,
            reference_price: signal.price,
            purpose: OrderPurpose::Entry,
            metadata: signal.metadata.clone(),
        };
        let order = self.router.submit_and_await(request).await?;

        if !order.fills.is_empty() {
            self.apply_entry_fills(
                &signal.instrument,
                signal.direction,
                &order.fills,
                signal.stop_loss,
            )?;
        }

        if let Some(stop_level) = signal.stop_loss {
            let filled = order.filled_quantity();
            if filled > Decimal::ZERO {
                self.place_protective_stop(
                    &signal.instrument,
                    signal.direction,
                    filled,
                    stop_level,
                    signal.price,
                )
                .await;
            }
        }
        Ok(())
    }

    /// Close the open position for an exit signal.
    ///
    /// Submits an opposite-side market order for the full open quantity,
    /// books the closing fills, and cancels the tracked protective stop.
    ///
    /// # Errors
    ///
    /// `EngineError::Position` with `PositionError::NotFound` when no
    /// position is open (an upstream ordering fault, reported as an
    /// EXECUTION_ERROR event), otherwise as `handle_entry_signal`.
    pub async fn handle_exit_signal(&self, signal: &ExitSignal) -> Result<(), EngineError> {
        self.ensure_enabled(Some(&signal.instrument), "exit signal")?;
        let lock = self.instrument_lock(&signal.instrument);
        let _guard = lock.lock().await;

        let Some(position) = self.positions.get(&signal.instrument) else {
            let message = format!("exit signal for {} but no position is open", signal.instrument);
            tracing::warn!(instrument = %signal.instrument, reason = %signal.reason, "exit signal without position");
            self.events.publish(ExecutionEvent::error(
                Some(signal.instrument.clone()),
                None,
                message,
            ));
            return Err(PositionError::NotFound(signal.instrument.clone()).into());
        };

        // Untracked before the order goes out so the event loop cannot
        // book the same stop fill twice.
        let tracked_stop = self.lock_stops().remove(&signal.instrument);

        let request = OrderRequest {
            instrument: signal.instrument.clone(),
            side: position.direction.exit_side(),
            order_type: OrderType::Market,
            quantity: position.quantity,
            limit_price: None,
            stop_price: None,
            reference_price: signal.price,
            purpose: OrderPurpose::Exit,
            metadata: serde_json::json!({ "reason": signal.reason }),
        };
        match self.router.submit_and_await(request).await {
            Ok(order) => {
                if !order.fills.is_empty() {
                    self.apply_exit_fills(&signal.instrument, &order.fills)?;
                }
                if let Some(stop_id) = tracked_stop {
                    match self.positions.get(&signal.instrument) {
                        None => {
                            self.cancel_tracked_stop(&signal.instrument, &stop_id).await;
                        }
                        // The exit did not fully close (venue rejection
                        // or a partial that got cancelled): the stop
                        // stays working, resized to what remains.
                        Some(remaining) => {
                            let update = OrderUpdate {
                                quantity: Some(remaining.quantity),
                                ..OrderUpdate::default()
                            };
                            if let Err(error) =
                                self.router.modify_order(&stop_id, &update).await
                            {
                                tracing::warn!(
                                    instrument = %signal.instrument,
                                    %error,
                                    "stop not resized after incomplete exit"
                                );
                            }
                            self.lock_stops().insert(signal.instrument.clone(), stop_id);
                        }
                    }
                }
                Ok(())
            }
            Err(error) => {
                if let Some(stop_id) = tracked_stop {
                    self.lock_stops().insert(signal.instrument.clone(), stop_id);
                }
                Err(error.into())
            }
        }
    }

    /// Move the protective stop for an open position.
    ///
    /// Cancels the tracked stop, then places a new one at the updated
    /// level sized to the open quantity. A stop that filled before the
    /// cancel is authoritative: its fills are booked and no new stop is
    /// placed.
    ///
    /// # Errors
    ///
    /// `EngineError::Position` with `PositionError::NotFound` when no
    /// position is open for the instrument.
    pub async fn handle_stop_adjustment(
        &self,
        signal: &StopAdjustment,
    ) -> Result<(), EngineError> {
        self.ensure_enabled(Some(&signal.instrument), "stop adjustment")?;
        let lock = self.instrument_lock(&signal.instrument);
        let _guard = lock.lock().await;

        if self.positions.get(&signal.instrument).is_none() {
            let message = format!(
                "stop adjustment for {} but no position is open",
                signal.instrument
            );
            tracing::warn!(instrument = %signal.instrument, reason = %signal.reason, "stop adjustment without position");
            self.events.publish(ExecutionEvent::error(
                Some(signal.instrument.clone()),
                None,
                message,
            ));
            return Err(PositionError::NotFound(signal.instrument.clone()).into());
        }

        if let Some(stop_id) = self.lock_stops().remove(&signal.instrument) {
            self.cancel_tracked_stop(&signal.instrument, &stop_id).await;
        }

        // The old stop may have closed the position while the cancel ran.
        let Some(position) = self.positions.get(&signal.instrument) else {
            tracing::info!(instrument = %signal.instrument, "position closed during stop adjustment");
            return Ok(());
        };

        let placed = self
            .place_protective_stop(
                &signal.instrument,
                position.direction,
                position.quantity,
                signal.new_stop,
                position.current_price,
            )
            .await;
        if placed {
            if let Err(error) = self
                .positions
                .set_stop_loss(&signal.instrument, Some(signal.new_stop))
            {
                tracing::debug!(instrument = %signal.instrument, %error, "stop level not recorded");
            }
        }
        Ok(())
    }

    /// Submit an order outside the signal flow.
    ///
    /// Market orders are awaited to their terminal state and their fills
    /// booked; resting orders are returned pending and left to the
    /// venue, with reconciliation folding their outcome in later.
    ///
    /// # Errors
    ///
    /// `EngineError::Halted` when auto-execution is disabled, otherwise
    /// routing and bookkeeping errors.
    pub async fn submit_order(&self, request: OrderRequest) -> Result<Order, EngineError> {
        self.ensure_enabled(Some(&request.instrument), "manual order")?;
        let lock = self.instrument_lock(&request.instrument);
        let _guard = lock.lock().await;

        if request.order_type == OrderType::Market {
            let instrument = request.instrument.clone();
            let purpose = request.purpose;
            let side = request.side;
            let order = self.router.submit_and_await(request).await?;
            if !order.fills.is_empty() {
                if purpose.is_reducing() {
                    self.apply_exit_fills(&instrument, &order.fills)?;
                } else {
                    let direction = match side {
                        Side::Buy => PositionDirection::Long,
                        Side::Sell => PositionDirection::Short,
                    };
                    self.apply_entry_fills(&instrument, direction, &order.fills, None)?;
                }
            }
            Ok(order)
        } else {
            let order = self.router.submit_order(request).await?;
            Ok(order)
        }
    }

    /// Cancel a working order. Stays live while auto-execution is halted.
    ///
    /// # Errors
    ///
    /// Propagates routing errors; a cancel losing the race to a fill is
    /// not an error.
    pub async fn cancel_order(&self, order_id: &str) -> Result<Order, EngineError> {
        let order = self.router.cancel_order(order_id).await?;
        if order.status == OrderStatus::Cancelled {
            self.lock_stops()
                .retain(|_, tracked| tracked.as_str() != order_id);
        }
        Ok(order)
    }

    /// Snapshot of open positions.
    #[must_use]
    pub fn open_positions(&self) -> Vec<ManagedPosition> {
        self.positions.open_positions()
    }

    /// Aggregate portfolio statistics.
    #[must_use]
    pub fn portfolio_stats(&self) -> PortfolioStats {
        self.positions.portfolio_stats()
    }

    /// Snapshot of the running execution statistics.
    #[must_use]
    pub fn stats(&self) -> ExecutionStats {
        self.lock_stats().clone()
    }

    /// Order id of the tracked protective stop, when one is working.
    #[must_use]
    pub fn tracked_stop(&self, instrument: &Instrument) -> Option<String> {
        self.lock_stops().get(instrument).cloned()
    }

    /// Whether signal handling is currently armed.
    #[must_use]
    pub fn auto_execution_enabled(&self) -> bool {
        self.auto_execution.load(Ordering::SeqCst)
    }

    /// Re-arm signal handling after a halt. External intervention only;
    /// nothing in the engine calls this.
    pub fn resume_auto_execution(&self) {
        self.auto_execution.store(true, Ordering::SeqCst);
        tracing::info!("auto-execution re-enabled");
    }

    fn fold_event(&self, event: &ExecutionEvent) {
        match event {
            ExecutionEvent::OrderSubmitted(_) => self.lock_stats().record_submitted(),
            ExecutionEvent::OrderFilled(filled) => {
                self.lock_stats().record_filled();
                self.on_order_filled(filled);
            }
            ExecutionEvent::OrderRejected(_) => self.lock_stats().record_rejected(),
            ExecutionEvent::OrderCancelled(_) => self.lock_stats().record_cancelled(),
            ExecutionEvent::PositionOpened(_)
            | ExecutionEvent::PositionClosed(_)
            | ExecutionEvent::RiskLimitBreached(_)
            | ExecutionEvent::PositionDiscrepancy(_)
            | ExecutionEvent::ExecutionError(_) => {}
        }
    }

    /// Book the fill of a tracked protective stop.
    fn on_order_filled(&self, filled: &OrderFilled) {
        let tracked = {
            let mut stops = self.lock_stops();
            if stops
                .get(&filled.instrument)
                .is_some_and(|id| *id == filled.order_id)
            {
                stops.remove(&filled.instrument);
                true
            } else {
                false
            }
        };
        if !tracked {
            return;
        }

        tracing::info!(
            instrument = %filled.instrument,
            order_id = %filled.order_id,
            price = %filled.average_price,
            "protective stop filled"
        );
        let fill = Fill {
            price: filled.average_price,
            quantity: filled.quantity,
            commission: filled.commission,
            timestamp: filled.occurred_at,
        };
        match self.positions.apply_exit_fill(&filled.instrument, &fill) {
            Ok(outcome) => self.note_exit_outcome(&outcome),
            Err(error) => self.book_fault(&filled.instrument, Some(&filled.order_id), &error),
        }
    }

    async fn place_protective_stop(
        &self,
        instrument: &Instrument,
        direction: PositionDirection,
        quantity: Decimal,
        stop_level: Decimal,
        reference_price: Decimal,
    ) -> bool {
        let request = OrderRequest {
            instrument: instrument.clone(),
            side: direction.exit_side(),
            order_type: OrderType::Stop,
            quantity,
            limit_price: None,
            stop_price: Some(stop_level),
            reference_price,
            purpose: OrderPurpose::StopLoss,
            metadata: serde_json::Value::Null,
        };
        match self.router.submit_order(request).await {
            Ok(order) => {
                tracing::info!(
                    instrument = %instrument,
                    order_id = %order.id,
                    stop = %stop_level,
                    quantity = %quantity,
                    "protective stop placed"
                );
                self.lock_stops().insert(instrument.clone(), order.id);
                true
            }
            Err(error) => {
                tracing::warn!(
                    instrument = %instrument,
                    %error,
                    "protective stop not placed, position is unprotected"
                );
                false
            }
        }
    }

    async fn cancel_tracked_stop(&self, instrument: &Instrument, order_id: &str) {
        match self.router.cancel_order(order_id).await {
            Ok(order) => {
                if order.status == OrderStatus::Filled {
                    tracing::warn!(
                        instrument = %instrument,
                        order_id,
                        "stop filled before cancel, venue outcome stands"
                    );
                    for fill in &order.fills {
                        match self.positions.apply_exit_fill(instrument, fill) {
                            Ok(outcome) => self.note_exit_outcome(&outcome),
                            Err(error) => {
                                tracing::warn!(
                                    instrument = %instrument,
                                    %error,
                                    "stop fill not booked locally, next reconciliation settles it"
                                );
                                break;
                            }
                        }
                    }
                } else {
                    tracing::debug!(instrument = %instrument, order_id, status = %order.status, "tracked stop cancelled");
                }
            }
            Err(error) => {
                tracing::warn!(instrument = %instrument, order_id, %error, "tracked stop cancel failed");
            }
        }
    }

    fn apply_entry_fills(
        &self,
        instrument: &Instrument,
        direction: PositionDirection,
        fills: &[Fill],
        stop_loss: Option<Decimal>,
    ) -> Result<(), EngineError> {
        for fill in fills {
            if let Err(error) =
                self.positions
                    .apply_entry_fill(instrument, direction, fill, stop_loss)
            {
                self.book_fault(instrument, None, &error);
                return Err(error.into());
            }
        }
        Ok(())
    }

    fn apply_exit_fills(&self, instrument: &Instrument, fills: &[Fill]) -> Result<(), EngineError> {
        for fill in fills {
            match self.positions.apply_exit_fill(instrument, fill) {
                Ok(outcome) => self.note_exit_outcome(&outcome),
                Err(error) => {
                    self.book_fault(instrument, None, &error);
                    return Err(error.into());
                }
            }
        }
        Ok(())
    }

    /// A fill the venue reported could not be booked locally. Position
    /// truth is now in question, so auto-execution halts.
    fn book_fault(&self, instrument: &Instrument, order_id: Option<&str>, error: &PositionError) {
        tracing::error!(instrument = %instrument, %error, "fill could not be booked");
        self.events.publish(ExecutionEvent::error(
            Some(instrument.clone()),
            order_id.map(str::to_string),
            format!("fill could not be booked: {error}"),
        ));
        self.halt("position accounting fault");
    }

    /// Fold a closed trade and trip the drawdown kill-switch when the
    /// running drawdown crosses the configured limit.
    fn note_exit_outcome(&self, outcome: &ExitOutcome) {
        let ExitOutcome::Closed { position, .. } = outcome else {
            return;
        };
        let (current_drawdown, limit_hit) = {
            let mut stats = self.lock_stats();
            stats.record_closed_trade(position.realized_pnl, position.commission_paid);
            (
                stats.current_drawdown,
                self.max_drawdown > Decimal::ZERO
                    && stats.current_drawdown > self.max_drawdown,
            )
        };
        if limit_hit && self.halt("max drawdown exceeded") {
            self.events
                .publish(ExecutionEvent::RiskLimitBreached(RiskLimitBreached {
                    instrument: position.instrument.clone(),
                    code: "MAX_DRAWDOWN_EXCEEDED".to_string(),
                    message: format!(
                        "drawdown {current_drawdown} exceeds limit {}",
                        self.max_drawdown
                    ),
                    observed: Some(current_drawdown.to_string()),
                    limit: Some(self.max_drawdown.to_string()),
                    occurred_at: Utc::now(),
                }));
        }
    }

    /// Disable auto-execution. Returns true on the enabled-to-disabled
    /// transition so callers can report it exactly once.
    fn halt(&self, reason: &str) -> bool {
        let was_enabled = self.auto_execution.swap(false, Ordering::SeqCst);
        if was_enabled {
            tracing::error!(reason, "auto-execution disabled");
        }
        was_enabled
    }

    fn ensure_enabled(
        &self,
        instrument: Option<&Instrument>,
        context: &str,
    ) -> Result<(), EngineError> {
        if self.auto_execution.load(Ordering::SeqCst) {
            return Ok(());
        }
        tracing::warn!(context, "auto-execution is disabled, refusing work");
        self.events.publish(ExecutionEvent::error(
            instrument.cloned(),
            None,
            format!("auto-execution is disabled, {context} refused"),
        ));
        Err(EngineError::Halted(context.to_string()))
    }

    fn instrument_lock(&self, instrument: &Instrument) -> Arc<AsyncMutex<()>> {
        let mut locks = self
            .instrument_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        locks.entry(instrument.clone()).or_default().clone()
    }

    fn lock_stats(&self) -> MutexGuard<'_, ExecutionStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_stops(&self) -> MutexGuard<'_, HashMap<Instrument, String>> {
        self.tracked_stops
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_event_rx(&self) -> MutexGuard<'_, Option<broadcast::Receiver<ExecutionEvent>>> {
        self.event_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
