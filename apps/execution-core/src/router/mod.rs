//! Order routing.
//!
//! The router is the single path between trading intent and the venue:
//! synchronous fail-fast risk validation, venue submission with bounded
//! retry of transport errors, then asynchronous lifecycle monitoring
//! until the venue reports a terminal state. Each order produces exactly
//! one terminal event (ORDER_FILLED, ORDER_CANCELLED, or ORDER_REJECTED),
//! emitted by the monitor task regardless of who observed the transition
//! first.

pub mod retry;
pub mod validation;

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use thiserror::Error;
use tokio::sync::{Notify, oneshot};

use crate::config::{EngineConfig, RetryConfig};
use crate::events::EventBus;
use crate::models::{
    ExecutionEvent, Instrument, Order, OrderRequest, OrderStatus, OrderType, OrderUpdate,
    RiskLimitBreached,
};
use crate::venue::{CancelOutcome, ExecutionVenue, VenueError};

pub use retry::{BackoffSchedule, with_retry};
pub use validation::{RejectionReason, RiskLimits, RiskValidator, ValidationContext};

/// Errors from the order router.
#[derive(Debug, Error)]
pub enum RouterError {
    /// Pre-trade validation failed; the order never reached the venue.
    #[error("order rejected by risk checks: {0}")]
    Rejected(RejectionReason),
    /// The venue failed the operation.
    #[error("venue error: {0}")]
    Venue(#[from] VenueError),
    /// Monitoring saw no progress within the submission window.
    #[error("order {order_id} made no progress within {timeout_secs}s")]
    MonitorTimeout {
        /// The degraded order.
        order_id: String,
        /// The configured window.
        timeout_secs: u64,
    },
}

impl RouterError {
    /// The rejection reason, when validation caused the failure.
    #[must_use]
    pub const fn rejection(&self) -> Option<&RejectionReason> {
        match self {
            Self::Rejected(reason) => Some(reason),
            Self::Venue(_) | Self::MonitorTimeout { .. } => None,
        }
    }
}

/// Read-only portfolio inputs for pre-trade validation.
pub trait PortfolioView: Send + Sync {
    /// Number of distinct open positions.
    fn open_position_count(&self) -> u32;
    /// Aggregate absolute notional exposure of open positions.
    fn gross_exposure(&self) -> Decimal;
}

/// Orders placed since the last UTC midnight boundary.
///
/// The count is tied to the stored date, so a day rollover resets it on
/// the next read no matter how long the process has been up.
#[derive(Debug, Clone, Copy)]
struct DailyOrderCounter {
    day: NaiveDate,
    used: u32,
}

impl DailyOrderCounter {
    const fn new(today: NaiveDate) -> Self {
        Self {
            day: today,
            used: 0,
        }
    }

    fn roll(&mut self, today: NaiveDate) {
        if self.day != today {
            self.day = today;
            self.used = 0;
        }
    }

    fn used_today(&mut self, today: NaiveDate) -> u32 {
        self.roll(today);
        self.used
    }
}

struct RouterInner {
    venue: Arc<dyn ExecutionVenue>,
    validator: RiskValidator,
    portfolio: Arc<dyn PortfolioView>,
    events: EventBus,
    retry: RetryConfig,
    submission_timeout: Duration,
    poll_interval: Duration,
    daily_counter: Mutex<DailyOrderCounter>,
    reconcile_trigger: Arc<Notify>,
}

/// Routes orders to the venue and monitors them to completion.
#[derive(Clone)]
pub struct OrderRouter {
    inner: Arc<RouterInner>,
}

impl OrderRouter {
    /// Create a router over a venue.
    #[must_use]
    pub fn new(
        venue: Arc<dyn ExecutionVenue>,
        limits: RiskLimits,
        portfolio: Arc<dyn PortfolioView>,
        events: EventBus,
        retry: RetryConfig,
        engine: &EngineConfig,
    ) -> Self {
        Self {
            inner: Arc::new(RouterInner {
                venue,
                validator: RiskValidator::new(limits),
                portfolio,
                events,
                retry,
                submission_timeout: Duration::from_secs(engine.submission_timeout_secs),
                poll_interval: Duration::from_millis(engine.monitor_poll_interval_ms),
                daily_counter: Mutex::new(DailyOrderCounter::new(Utc::now().date_naive())),
                reconcile_trigger: Arc::new(Notify::new()),
            }),
        }
    }

    /// Notified whenever a degraded order needs an out-of-band
    /// reconciliation pass.
    #[must_use]
    pub fn reconcile_signal(&self) -> Arc<Notify> {
        Arc::clone(&self.inner.reconcile_trigger)
    }

    /// Orders counted against today's budget so far.
    #[must_use]
    pub fn daily_orders_used(&self) -> u32 {
        self.lock_counter().used_today(Utc::now().date_naive())
    }

    /// Run the pre-trade checks without submitting.
    ///
    /// This is a pure query: no events are emitted and no daily budget
    /// is consumed.
    ///
    /// # Errors
    ///
    /// `RouterError::Rejected` when a check fails, `RouterError::Venue`
    /// when the account snapshot cannot be fetched.
    pub async fn validate_order(&self, request: &OrderRequest) -> Result<(), RouterError> {
        let context = self.validation_context().await?;
        self.inner
            .validator
            .validate(request, &context)
            .map_err(RouterError::Rejected)
    }

    /// Validate and submit an order, returning as soon as the venue
    /// accepts it. Lifecycle monitoring continues in a background task
    /// that emits the terminal event. Use this for resting orders
    /// (stops, limits) that may stay open indefinitely.
    ///
    /// # Errors
    ///
    /// `RouterError::Rejected` when validation fails (a
    /// RISK_LIMIT_BREACHED event is emitted and the venue is never
    /// called), `RouterError::Venue` when submission fails after
    /// retries.
    pub async fn submit_order(&self, request: OrderRequest) -> Result<Order, RouterError> {
        let (order, _monitor) = self.submit_inner(request).await?;
        Ok(order)
    }

    /// Validate, submit, and wait for the venue to report a terminal
    /// state. Used for marketable orders where the caller needs the
    /// outcome (entry and exit flows).
    ///
    /// # Errors
    ///
    /// As [`Self::submit_order`], plus `RouterError::MonitorTimeout`
    /// when the order makes no progress within the submission window.
    pub async fn submit_and_await(&self, request: OrderRequest) -> Result<Order, RouterError> {
        let (order, monitor) = self.submit_inner(request).await?;
        match monitor.await {
            Ok(outcome) => outcome,
            Err(_) => Err(RouterError::Venue(VenueError::Internal(format!(
                "monitor task dropped for order {}",
                order.id
            )))),
        }
    }

    /// Forward a cancel to the venue and re-read the authoritative
    /// state. A cancel that lost the race to a fill is a no-op: the
    /// filled order is returned unchanged and no extra event is emitted
    /// (the monitor owns the terminal event).
    ///
    /// # Errors
    ///
    /// `RouterError::Venue` when the venue does not know the order or
    /// the transport fails after retries.
    pub async fn cancel_order(&self, order_id: &str) -> Result<Order, RouterError> {
        let outcome = with_retry(&self.inner.retry, "cancel_order", || {
            self.inner.venue.cancel_order(order_id)
        })
        .await
        .map_err(|e| {
            self.emit_error(None, Some(order_id.to_string()), format!("cancel failed: {e}"));
            e
        })?;

        let order = with_retry(&self.inner.retry, "get_order", || {
            self.inner.venue.get_order(order_id)
        })
        .await?;

        match outcome {
            CancelOutcome::Cancelled => {
                tracing::info!(order_id = %order_id, "cancel accepted by venue");
            }
            CancelOutcome::AlreadyTerminal(status) => {
                tracing::info!(order_id = %order_id, status = %status, "cancel was a no-op, order already terminal");
            }
        }
        Ok(order)
    }

    /// Modify a working order after re-validating its size and value.
    ///
    /// # Errors
    ///
    /// `RouterError::Rejected` when the modified shape fails the
    /// single-order checks, `RouterError::Venue` when the venue refuses
    /// the change.
    pub async fn modify_order(
        &self,
        order_id: &str,
        update: &OrderUpdate,
    ) -> Result<Order, RouterError> {
        let current = with_retry(&self.inner.retry, "get_order", || {
            self.inner.venue.get_order(order_id)
        })
        .await?;

        let quantity = update.quantity.unwrap_or(current.quantity);
        let price = update
            .limit_price
            .or(update.stop_price)
            .or(current.limit_price)
            .or(current.stop_price);
        if let Err(reason) = self.inner.validator.validate_modification(quantity, price) {
            self.emit_breach(&current.instrument, &reason);
            return Err(RouterError::Rejected(reason));
        }

        let order = with_retry(&self.inner.retry, "modify_order", || {
            self.inner.venue.modify_order(order_id, update)
        })
        .await
        .map_err(|e| {
            self.emit_error(
                Some(current.instrument.clone()),
                Some(order_id.to_string()),
                format!("modify failed: {e}"),
            );
            e
        })?;
        tracing::info!(order_id = %order_id, "order modified");
        Ok(order)
    }

    async fn submit_inner(
        &self,
        request: OrderRequest,
    ) -> Result<(Order, oneshot::Receiver<Result<Order, RouterError>>), RouterError> {
        let context = self.validation_context().await.map_err(|e| {
            self.emit_error(
                Some(request.instrument.clone()),
                None,
                format!("account snapshot unavailable: {e}"),
            );
            e
        })?;

        if let Err(reason) = self.inner.validator.validate(&request, &context) {
            self.emit_breach(&request.instrument, &reason);
            return Err(RouterError::Rejected(reason));
        }

        // Validation read a snapshot; the reservation is the atomic
        // gate against concurrent submissions spending the same slot.
        if let Err(reason) = self.try_reserve_daily_slot() {
            self.emit_breach(&request.instrument, &reason);
            return Err(RouterError::Rejected(reason));
        }

        let submitted = with_retry(&self.inner.retry, "submit_order", || {
            self.inner.venue.submit_order(&request)
        })
        .await;
        let order = match submitted {
            Ok(order) => order,
            Err(e) => {
                // Never reached the venue, so the slot is returned.
                self.release_daily_slot();
                self.emit_error(
                    Some(request.instrument.clone()),
                    None,
                    format!("submission failed: {e}"),
                );
                return Err(e.into());
            }
        };

        tracing::info!(
            order_id = %order.id,
            instrument = %order.instrument,
            side = %order.side,
            quantity = %order.quantity,
            venue = self.inner.venue.venue_name(),
            "order submitted"
        );
        self.inner.events.publish(ExecutionEvent::submitted(&order));

        let monitor = self.spawn_monitor(order.clone());
        Ok((order, monitor))
    }

    fn spawn_monitor(&self, order: Order) -> oneshot::Receiver<Result<Order, RouterError>> {
        let (tx, rx) = oneshot::channel();
        let router = self.clone();
        tokio::spawn(async move {
            let outcome = router.monitor_order(&order).await;
            let _ = tx.send(outcome);
        });
        rx
    }

    /// Observe venue-reported state until terminal, then emit the
    /// terminal event exactly once.
    ///
    /// The no-progress window only applies to market orders: a resting
    /// limit or stop staying pending is its normal state, not a fault.
    /// Once any fill lands the window no longer applies either.
    async fn monitor_order(&self, order: &Order) -> Result<Order, RouterError> {
        let progressed = if order.order_type == OrderType::Market {
            let window = self.inner.submission_timeout;
            match tokio::time::timeout(window, self.await_progress(&order.id)).await {
                Ok(result) => result.map_err(|e| self.monitor_venue_error(order, e))?,
                Err(_) => return Err(self.degrade(order, window)),
            }
        } else {
            self.await_progress(&order.id)
                .await
                .map_err(|e| self.monitor_venue_error(order, e))?
        };

        let final_order = if progressed.is_terminal() {
            progressed
        } else {
            self.await_terminal(&order.id)
                .await
                .map_err(|e| self.monitor_venue_error(order, e))?
        };

        let event = match final_order.status {
            OrderStatus::Filled => Some(ExecutionEvent::filled(&final_order)),
            OrderStatus::Cancelled => Some(ExecutionEvent::cancelled(&final_order)),
            OrderStatus::Rejected => Some(ExecutionEvent::rejected(&final_order)),
            OrderStatus::Pending | OrderStatus::PartiallyFilled => None,
        };
        if let Some(event) = event {
            tracing::info!(
                order_id = %final_order.id,
                status = %final_order.status,
                filled = %final_order.filled_quantity(),
                "order reached terminal state"
            );
            self.inner.events.publish(event);
        }
        Ok(final_order)
    }

    /// Poll until the order is terminal or has at least one fill.
    async fn await_progress(&self, order_id: &str) -> Result<Order, VenueError> {
        loop {
            let order = with_retry(&self.inner.retry, "get_order", || {
                self.inner.venue.get_order(order_id)
            })
            .await?;
            if order.is_terminal() || order.status == OrderStatus::PartiallyFilled {
                return Ok(order);
            }
            tokio::time::sleep(self.inner.poll_interval).await;
        }
    }

    /// Poll until the order is terminal.
    async fn await_terminal(&self, order_id: &str) -> Result<Order, VenueError> {
        loop {
            let order = with_retry(&self.inner.retry, "get_order", || {
                self.inner.venue.get_order(order_id)
            })
            .await?;
            if order.is_terminal() {
                return Ok(order);
            }
            tokio::time::sleep(self.inner.poll_interval).await;
        }
    }

    fn degrade(&self, order: &Order, window: Duration) -> RouterError {
        let timeout_secs = window.as_secs();
        tracing::warn!(
            order_id = %order.id,
            instrument = %order.instrument,
            timeout_secs,
            "order degraded, requesting out-of-band reconciliation"
        );
        self.emit_error(
            Some(order.instrument.clone()),
            Some(order.id.clone()),
            format!("order degraded: no progress within {timeout_secs}s"),
        );
        self.inner.reconcile_trigger.notify_one();
        RouterError::MonitorTimeout {
            order_id: order.id.clone(),
            timeout_secs,
        }
    }

    fn monitor_venue_error(&self, order: &Order, error: VenueError) -> RouterError {
        self.emit_error(
            Some(order.instrument.clone()),
            Some(order.id.clone()),
            format!("lifecycle monitoring failed: {error}"),
        );
        RouterError::Venue(error)
    }

    async fn validation_context(&self) -> Result<ValidationContext, VenueError> {
        let balance = with_retry(&self.inner.retry, "get_account_balance", || {
            self.inner.venue.get_account_balance()
        })
        .await?;
        Ok(ValidationContext {
            cash: balance.cash,
            equity: balance.equity,
            buying_power: balance.buying_power,
            open_positions: self.inner.portfolio.open_position_count(),
            gross_exposure: self.inner.portfolio.gross_exposure(),
            daily_orders_used: self.lock_counter().used_today(Utc::now().date_naive()),
        })
    }

    fn lock_counter(&self) -> std::sync::MutexGuard<'_, DailyOrderCounter> {
        self.inner
            .daily_counter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn try_reserve_daily_slot(&self) -> Result<(), RejectionReason> {
        let max = self.inner.validator.limits().max_daily_orders;
        let mut counter = self.lock_counter();
        let today = Utc::now().date_naive();
        counter.roll(today);
        if counter.used >= max {
            return Err(RejectionReason {
                code: "DAILY_ORDER_LIMIT_REACHED".to_string(),
                message: format!("{} orders already placed today, limit is {max}", counter.used),
                observed: Some(counter.used.to_string()),
                limit: Some(max.to_string()),
            });
        }
        counter.used += 1;
        Ok(())
    }

    fn release_daily_slot(&self) {
        let mut counter = self.lock_counter();
        counter.used = counter.used.saturating_sub(1);
    }

    fn emit_breach(&self, instrument: &Instrument, reason: &RejectionReason) {
        tracing::warn!(
            instrument = %instrument,
            code = %reason.code,
            message = %reason.message,
            "order rejected by risk checks"
        );
        self.inner
            .events
            .publish(ExecutionEvent::RiskLimitBreached(RiskLimitBreached {
                instrument: instrument.clone(),
                code: reason.code.clone(),
                message: reason.message.clone(),
                observed: reason.observed.clone(),
                limit: reason.limit.clone(),
                occurred_at: Utc::now(),
            }));
    }

    fn emit_error(&self, instrument: Option<Instrument>, order_id: Option<String>, message: String) {
        self.inner
            .events
            .publish(ExecutionEvent::error(instrument, order_id, message));
    }
}
