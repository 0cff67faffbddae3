//! Paper trading venue.
//!
//! Deterministic-parameter, stochastic-outcome reference implementation of
//! [`ExecutionVenue`]: fills are simulated against an internal price walk
//! with configurable slippage, commission, fill delay, and reject/partial
//! probabilities. The random source is seedable so simulations reproduce.
//!
//! The venue owns the authoritative cash/equity bookkeeping. Every fill
//! adjusts cash by `-(price x quantity x side_sign) - commission`; equity
//! is cash plus mark-to-market of the venue's own book. No other component
//! mutates balance state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::prelude::Signed;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::config::PaperVenueConfig;
use crate::models::{
    AccountBalance, Fill, Instrument, Order, OrderRequest, OrderType, OrderUpdate, Side,
    VenuePosition,
};

use super::price_walk::PriceWalk;
use super::{CancelOutcome, ExecutionVenue, VenueError};

/// Outcome drawn for an order at submission time. Drawing under the state
/// lock, in submission order, keeps seeded runs reproducible regardless of
/// how the fill tasks later interleave.
#[derive(Debug, Clone, Copy)]
struct FillPlan {
    reject: bool,
    /// First-tranche fraction when the fill splits in two. Only market
    /// orders split; resting limit/stop orders fill in one piece.
    partial_fraction: Option<f64>,
}

/// The venue's own book entry for one instrument. Quantity is signed.
#[derive(Debug, Clone)]
struct BookPosition {
    quantity: Decimal,
    avg_price: Decimal,
}

struct PaperState {
    orders: HashMap<String, Order>,
    plans: HashMap<String, FillPlan>,
    book: HashMap<Instrument, BookPosition>,
    walk: PriceWalk,
    cash: Decimal,
    realized_pnl: Decimal,
    rng: StdRng,
}

struct Inner {
    config: PaperVenueConfig,
    state: Mutex<PaperState>,
}

/// Simulated execution venue backed by an internal price walk.
#[derive(Clone)]
pub struct PaperVenue {
    inner: Arc<Inner>,
}

impl PaperVenue {
    /// Create a paper venue from its configuration.
    #[must_use]
    pub fn new(config: PaperVenueConfig) -> Self {
        let rng = config
            .rng_seed
            .map_or_else(StdRng::from_os_rng, StdRng::seed_from_u64);
        let state = PaperState {
            orders: HashMap::new(),
            plans: HashMap::new(),
            book: HashMap::new(),
            walk: PriceWalk::new(config.walk_volatility_pct),
            cash: config.initial_capital,
            realized_pnl: Decimal::ZERO,
            rng,
        };
        Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(state),
            }),
        }
    }

    /// Interval between simulated price ticks, from the venue config.
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.inner.config.tick_interval_ms)
    }

    /// Step the price walk once, sweeping resting limit/stop orders that
    /// the new marks make executable. Returns the new marks.
    ///
    /// # Errors
    ///
    /// Returns `VenueError::Internal` if the venue state lock is poisoned.
    pub fn tick(&self) -> Result<Vec<(Instrument, Decimal)>, VenueError> {
        let mut state = self.lock()?;
        let marks = {
            let PaperState { walk, rng, .. } = &mut *state;
            walk.step_all(rng)
        };
        self.sweep_resting(&mut state);
        Ok(marks)
    }

    /// Pin an instrument's mark exactly and sweep resting orders against
    /// it. Used for market-data injection and in tests.
    ///
    /// # Errors
    ///
    /// Returns `VenueError::Internal` if the venue state lock is poisoned.
    pub fn set_price(&self, instrument: &Instrument, price: Decimal) -> Result<(), VenueError> {
        let mut state = self.lock()?;
        state.walk.set_price(instrument, price);
        self.sweep_resting(&mut state);
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, PaperState>, VenueError> {
        self.inner
            .state
            .lock()
            .map_err(|_| VenueError::Internal("venue state lock poisoned".to_string()))
    }

    fn commission_for(&self, quantity: Decimal, price: Decimal) -> Decimal {
        let schedule = &self.inner.config.commission;
        schedule.per_unit * quantity + schedule.pct_of_notional * price * quantity
    }

    fn slipped_price(&self, mark: Decimal, side: Side) -> Decimal {
        let offset = self.inner.config.slippage_pct;
        match side {
            Side::Buy => mark * (Decimal::ONE + offset),
            Side::Sell => mark * (Decimal::ONE - offset),
        }
    }

    /// Resolve a submitted order once its fill delay has elapsed.
    fn resolve_order(&self, order_id: &str) {
        let mut state = match self.lock() {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(order_id = %order_id, error = %e, "fill task lost venue state");
                return;
            }
        };
        let plan = state
            .plans
            .remove(order_id)
            .unwrap_or(FillPlan {
                reject: false,
                partial_fraction: None,
            });
        let Some(order) = state.orders.get(order_id).cloned() else {
            return;
        };
        if !order.status.can_fill() {
            // Cancelled while the fill delay was sleeping.
            return;
        }

        if plan.reject {
            if let Some(o) = state.orders.get_mut(order_id) {
                if let Err(e) = o.mark_rejected("simulated venue rejection") {
                    tracing::warn!(order_id = %order_id, error = %e, "reject draw lost race");
                } else {
                    tracing::info!(order_id = %order_id, instrument = %o.instrument, "paper venue rejected order");
                }
            }
            return;
        }

        let Some(mark) = state.walk.mark(&order.instrument) else {
            tracing::warn!(order_id = %order_id, "no mark price for instrument");
            return;
        };

        match order.order_type {
            OrderType::Market => {
                let price = self.slipped_price(mark, order.side);
                let leaves = order.leaves_quantity();
                let first = plan
                    .partial_fraction
                    .and_then(Decimal::from_f64_retain)
                    .map(|f| (leaves * f).round_dp(8))
                    .filter(|q| q > &Decimal::ZERO && q < &leaves);
                match first {
                    Some(first_quantity) => {
                        self.execute_fill(&mut state, order_id, price, first_quantity);
                        self.schedule_completion(order_id.to_string());
                    }
                    None => self.execute_fill(&mut state, order_id, price, leaves),
                }
            }
            // Limit and stop orders rest until a mark makes them
            // executable; the initial resolution is just the first check.
            OrderType::Limit | OrderType::Stop => {
                self.try_fill_resting(&mut state, &order, mark);
            }
        }
    }

    /// Second tranche of a partially filled market order.
    fn complete_partial(&self, order_id: &str) {
        let mut state = match self.lock() {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(order_id = %order_id, error = %e, "completion task lost venue state");
                return;
            }
        };
        let Some(order) = state.orders.get(order_id).cloned() else {
            return;
        };
        if !order.status.can_fill() {
            return;
        }
        let Some(mark) = state.walk.mark(&order.instrument) else {
            return;
        };
        let price = self.slipped_price(mark, order.side);
        self.execute_fill(&mut state, order_id, price, order.leaves_quantity());
    }

    fn schedule_completion(&self, order_id: String) {
        let venue = self.clone();
        let delay = Duration::from_millis(venue.inner.config.fill_delay_ms);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            venue.complete_partial(&order_id);
        });
    }

    /// Check whether a resting limit/stop order is executable at `mark`
    /// and fill it completely if so.
    fn try_fill_resting(&self, state: &mut PaperState, order: &Order, mark: Decimal) {
        let price = self.slipped_price(mark, order.side);
        let executable = match (order.order_type, order.side) {
            (OrderType::Limit, Side::Buy) => {
                order.limit_price.is_some_and(|limit| price <= limit)
            }
            (OrderType::Limit, Side::Sell) => {
                order.limit_price.is_some_and(|limit| price >= limit)
            }
            (OrderType::Stop, Side::Sell) => {
                order.stop_price.is_some_and(|stop| mark <= stop)
            }
            (OrderType::Stop, Side::Buy) => {
                order.stop_price.is_some_and(|stop| mark >= stop)
            }
            (OrderType::Market, _) => true,
        };
        if executable {
            self.execute_fill(state, &order.id, price, order.leaves_quantity());
        }
    }

    /// Re-check every resting order against current marks.
    fn sweep_resting(&self, state: &mut PaperState) {
        let resting: Vec<Order> = state
            .orders
            .values()
            .filter(|o| o.status.can_fill() && o.order_type != OrderType::Market)
            .cloned()
            .collect();
        for order in resting {
            if let Some(mark) = state.walk.mark(&order.instrument) {
                self.try_fill_resting(state, &order, mark);
            }
        }
    }

    /// Apply one fill: order record, venue book, and cash, atomically
    /// under the state lock. A buy the account cannot cover is rejected
    /// (or cancelled, if already partially filled) instead of executed.
    fn execute_fill(
        &self,
        state: &mut PaperState,
        order_id: &str,
        price: Decimal,
        quantity: Decimal,
    ) {
        let Some(order) = state.orders.get(order_id) else {
            return;
        };
        let side = order.side;
        let instrument = order.instrument.clone();
        let commission = self.commission_for(quantity, price);

        if side == Side::Buy && price * quantity + commission > state.cash {
            if let Some(o) = state.orders.get_mut(order_id) {
                let result = if o.fills.is_empty() {
                    o.mark_rejected("insufficient funds")
                } else {
                    o.mark_cancelled()
                };
                if let Err(e) = result {
                    tracing::warn!(order_id = %order_id, error = %e, "failed to fail underfunded order");
                } else {
                    tracing::warn!(
                        order_id = %order_id,
                        instrument = %instrument,
                        required = %(price * quantity + commission),
                        cash = %state.cash,
                        "insufficient funds for fill"
                    );
                }
            }
            return;
        }

        let fill = Fill {
            price,
            quantity,
            commission,
            timestamp: Utc::now(),
        };
        if let Some(o) = state.orders.get_mut(order_id) {
            if let Err(e) = o.apply_fill(fill) {
                tracing::warn!(order_id = %order_id, error = %e, "fill rejected by order record");
                return;
            }
        }
        state.cash -= price * quantity * side.sign() + commission;
        Self::apply_to_book(state, &instrument, side, quantity, price);
        tracing::debug!(
            order_id = %order_id,
            instrument = %instrument,
            side = %side,
            price = %price,
            quantity = %quantity,
            commission = %commission,
            "paper fill"
        );
    }

    /// Fold a fill into the venue's signed book, realizing P&L on any
    /// reduced quantity.
    fn apply_to_book(
        state: &mut PaperState,
        instrument: &Instrument,
        side: Side,
        quantity: Decimal,
        price: Decimal,
    ) {
        let signed = quantity * side.sign();
        let Some(position) = state.book.get_mut(instrument) else {
            state.book.insert(
                instrument.clone(),
                BookPosition {
                    quantity: signed,
                    avg_price: price,
                },
            );
            return;
        };

        if position.quantity.signum() == signed.signum() {
            // Same direction: grow the position, blend the average.
            let new_quantity = position.quantity + signed;
            position.avg_price = (position.avg_price * position.quantity.abs()
                + price * quantity)
                / new_quantity.abs();
            position.quantity = new_quantity;
            return;
        }

        // Opposite direction: reduce, possibly crossing through zero.
        let reduced = quantity.min(position.quantity.abs());
        state.realized_pnl +=
            (price - position.avg_price) * reduced * position.quantity.signum();
        position.quantity += signed;
        if position.quantity.is_zero() {
            state.book.remove(instrument);
        } else if position.quantity.signum() == signed.signum() {
            // Crossed through zero: the remainder is a fresh position.
            position.avg_price = price;
        }
    }

    fn balance_from(&self, state: &PaperState) -> AccountBalance {
        let mut market_value = Decimal::ZERO;
        let mut unrealized = Decimal::ZERO;
        for (instrument, position) in &state.book {
            let mark = state
                .walk
                .mark(instrument)
                .unwrap_or(position.avg_price);
            market_value += position.quantity * mark;
            unrealized += (mark - position.avg_price) * position.quantity;
        }
        AccountBalance {
            cash: state.cash,
            equity: state.cash + market_value,
            unrealized_pnl: unrealized,
            realized_pnl: state.realized_pnl,
            buying_power: state.cash,
        }
    }
}

#[async_trait]
impl ExecutionVenue for PaperVenue {
    async fn submit_order(&self, request: &OrderRequest) -> Result<Order, VenueError> {
        request
            .validate()
            .map_err(|e| VenueError::InvalidRequest(e.to_string()))?;

        let mut state = self.lock()?;
        state
            .walk
            .observe(&request.instrument, request.reference_price);

        let order = Order::new(Uuid::new_v4().to_string(), request.clone());
        let plan = {
            let config = &self.inner.config;
            let reject = config.reject_probability > 0.0
                && state.rng.random::<f64>() < config.reject_probability;
            let partial_fraction = (!reject
                && config.partial_fill_probability > 0.0
                && state.rng.random::<f64>() < config.partial_fill_probability)
                .then(|| state.rng.random_range(0.25..=0.75));
            FillPlan {
                reject,
                partial_fraction,
            }
        };
        state.plans.insert(order.id.clone(), plan);
        state.orders.insert(order.id.clone(), order.clone());
        drop(state);

        tracing::info!(
            order_id = %order.id,
            instrument = %order.instrument,
            side = %order.side,
            order_type = %order.order_type,
            quantity = %order.quantity,
            "paper venue accepted order"
        );

        let venue = self.clone();
        let order_id = order.id.clone();
        let delay = Duration::from_millis(self.inner.config.fill_delay_ms);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            venue.resolve_order(&order_id);
        });

        Ok(order)
    }

    async fn cancel_order(&self, order_id: &str) -> Result<CancelOutcome, VenueError> {
        let mut state = self.lock()?;
        let Some(order) = state.orders.get_mut(order_id) else {
            return Err(VenueError::OrderNotFound(order_id.to_string()));
        };
        if order.status.is_terminal() {
            // Fill (or earlier cancel/reject) won the race; report the
            // terminal state rather than an error.
            return Ok(CancelOutcome::AlreadyTerminal(order.status));
        }
        order
            .mark_cancelled()
            .map_err(|e| VenueError::Internal(e.to_string()))?;
        tracing::info!(order_id = %order_id, "paper venue cancelled order");
        Ok(CancelOutcome::Cancelled)
    }

    async fn modify_order(
        &self,
        order_id: &str,
        update: &OrderUpdate,
    ) -> Result<Order, VenueError> {
        let mut state = self.lock()?;
        let Some(order) = state.orders.get_mut(order_id) else {
            return Err(VenueError::OrderNotFound(order_id.to_string()));
        };
        if order.status.is_terminal() {
            return Err(VenueError::NotModifiable {
                order_id: order_id.to_string(),
                reason: format!("order is terminal ({})", order.status),
            });
        }
        if let Some(quantity) = update.quantity {
            let filled = order.filled_quantity();
            if quantity <= filled {
                return Err(VenueError::NotModifiable {
                    order_id: order_id.to_string(),
                    reason: format!("new quantity {quantity} not above filled {filled}"),
                });
            }
            order.quantity = quantity;
        }
        if let Some(limit_price) = update.limit_price {
            if limit_price <= Decimal::ZERO {
                return Err(VenueError::InvalidRequest(
                    "limit price must be positive".to_string(),
                ));
            }
            order.limit_price = Some(limit_price);
        }
        if let Some(stop_price) = update.stop_price {
            if stop_price <= Decimal::ZERO {
                return Err(VenueError::InvalidRequest(
                    "stop price must be positive".to_string(),
                ));
            }
            order.stop_price = Some(stop_price);
        }
        order.updated_at = Utc::now();
        let updated = order.clone();
        self.sweep_resting(&mut state);
        Ok(updated)
    }

    async fn get_order(&self, order_id: &str) -> Result<Order, VenueError> {
        let state = self.lock()?;
        state
            .orders
            .get(order_id)
            .cloned()
            .ok_or_else(|| VenueError::OrderNotFound(order_id.to_string()))
    }

    async fn get_positions(&self) -> Result<Vec<VenuePosition>, VenueError> {
        let state = self.lock()?;
        let mut positions: Vec<VenuePosition> = state
            .book
            .iter()
            .filter(|(_, p)| !p.quantity.is_zero())
            .map(|(instrument, p)| VenuePosition {
                instrument: instrument.clone(),
                quantity: p.quantity,
                avg_entry_price: p.avg_price,
            })
            .collect();
        positions.sort_by(|a, b| a.instrument.cmp(&b.instrument));
        Ok(positions)
    }

    async fn get_account_balance(&self) -> Result<AccountBalance, VenueError> {
        let state = self.lock()?;
        Ok(self.balance_from(&state))
    }

    fn venue_name(&self) -> &'static str {
        "paper"
    }

    async fn health_check(&self) -> Result<(), VenueError> {
        self.lock().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;
    use crate::models::{OrderPurpose, OrderStatus};

    fn quiet_config() -> PaperVenueConfig {
        PaperVenueConfig {
            initial_capital: dec!(100000),
            slippage_pct: Decimal::ZERO,
            fill_delay_ms: 0,
            walk_volatility_pct: 0.0,
            rng_seed: Some(42),
            ..PaperVenueConfig::default()
        }
    }

    fn market_buy(instrument: &str, quantity: Decimal, reference: Decimal) -> OrderRequest {
        OrderRequest {
            instrument: Instrument::from(instrument),
            side: Side::Buy,
            order_type: OrderType::Market,
            quantity,
            limit_price: None,
            stop_price: None,
            reference_price: reference,
            purpose: OrderPurpose::Entry,
            metadata: serde_json::Value::Null,
        }
    }

    async fn wait_terminal(venue: &PaperVenue, order_id: &str) -> Order {
        for _ in 0..200 {
            let order = venue.get_order(order_id).await.unwrap();
            if order.is_terminal() {
                return order;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("order {order_id} never reached a terminal state");
    }

    #[tokio::test]
    async fn market_buy_fills_with_slippage_and_commission() {
        let mut config = quiet_config();
        config.slippage_pct = dec!(0.0005);
        config.commission.per_unit = dec!(0.01);
        let venue = PaperVenue::new(config);

        let order = venue
            .submit_order(&market_buy("ACME", dec!(100), dec!(150)))
            .await
            .unwrap();
        assert_eq!(order.status, OrderStatus::Pending);

        let done = wait_terminal(&venue, &order.id).await;
        assert_eq!(done.status, OrderStatus::Filled);
        // 150 * 1.0005 = 150.075
        assert_eq!(done.average_fill_price(), Some(dec!(150.075)));
        // 100 units * 0.01/unit
        assert_eq!(done.total_commission(), dec!(1.00));

        let positions = venue.get_positions().await.unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].quantity, dec!(100));
        assert_eq!(positions[0].avg_entry_price, dec!(150.075));

        let balance = venue.get_account_balance().await.unwrap();
        // 100000 - 15007.50 - 1.00
        assert_eq!(balance.cash, dec!(84991.50));
        // Mark is still 150, so equity is initial capital minus the
        // 7.50 slippage cost and 1.00 commission.
        assert_eq!(balance.equity, dec!(99991.50));
    }

    #[tokio::test]
    async fn sell_fill_increases_cash() {
        let venue = PaperVenue::new(quiet_config());
        let buy = venue
            .submit_order(&market_buy("ACME", dec!(10), dec!(100)))
            .await
            .unwrap();
        wait_terminal(&venue, &buy.id).await;

        let mut request = market_buy("ACME", dec!(10), dec!(100));
        request.side = Side::Sell;
        request.purpose = OrderPurpose::Exit;
        let sell = venue.submit_order(&request).await.unwrap();
        wait_terminal(&venue, &sell.id).await;

        let balance = venue.get_account_balance().await.unwrap();
        assert_eq!(balance.cash, dec!(100000));
        assert!(venue.get_positions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reject_probability_one_rejects_everything() {
        let mut config = quiet_config();
        config.reject_probability = 1.0;
        let venue = PaperVenue::new(config);

        let order = venue
            .submit_order(&market_buy("ACME", dec!(1), dec!(100)))
            .await
            .unwrap();
        let done = wait_terminal(&venue, &order.id).await;
        assert_eq!(done.status, OrderStatus::Rejected);
        assert_eq!(
            done.reject_reason.as_deref(),
            Some("simulated venue rejection")
        );
        assert!(venue.get_positions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn partial_fill_probability_one_splits_fill() {
        let mut config = quiet_config();
        config.partial_fill_probability = 1.0;
        let venue = PaperVenue::new(config);

        let order = venue
            .submit_order(&market_buy("ACME", dec!(100), dec!(50)))
            .await
            .unwrap();
        let done = wait_terminal(&venue, &order.id).await;
        assert_eq!(done.status, OrderStatus::Filled);
        assert!(done.fills.len() >= 2, "expected a split fill");
        assert_eq!(done.filled_quantity(), dec!(100));
    }

    #[tokio::test]
    async fn cancel_before_fill_wins() {
        let mut config = quiet_config();
        config.fill_delay_ms = 5_000;
        let venue = PaperVenue::new(config);

        let order = venue
            .submit_order(&market_buy("ACME", dec!(1), dec!(100)))
            .await
            .unwrap();
        let outcome = venue.cancel_order(&order.id).await.unwrap();
        assert_eq!(outcome, CancelOutcome::Cancelled);
        let done = venue.get_order(&order.id).await.unwrap();
        assert_eq!(done.status, OrderStatus::Cancelled);
    }

    #[tokio::test]
    async fn cancel_after_fill_reports_terminal_state() {
        let venue = PaperVenue::new(quiet_config());
        let order = venue
            .submit_order(&market_buy("ACME", dec!(1), dec!(100)))
            .await
            .unwrap();
        wait_terminal(&venue, &order.id).await;

        let outcome = venue.cancel_order(&order.id).await.unwrap();
        assert_eq!(outcome, CancelOutcome::AlreadyTerminal(OrderStatus::Filled));
        // Idempotent: repeated cancels keep returning the same state.
        let again = venue.cancel_order(&order.id).await.unwrap();
        assert_eq!(again, CancelOutcome::AlreadyTerminal(OrderStatus::Filled));
    }

    #[tokio::test]
    async fn cancel_unknown_order_is_not_found() {
        let venue = PaperVenue::new(quiet_config());
        let err = venue.cancel_order("missing").await.unwrap_err();
        assert!(matches!(err, VenueError::OrderNotFound(_)));
    }

    #[tokio::test]
    async fn limit_order_rests_until_price_crosses() {
        let venue = PaperVenue::new(quiet_config());
        let mut request = market_buy("ACME", dec!(10), dec!(100));
        request.order_type = OrderType::Limit;
        request.limit_price = Some(dec!(95));

        let order = venue.submit_order(&request).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let still_open = venue.get_order(&order.id).await.unwrap();
        assert_eq!(still_open.status, OrderStatus::Pending);

        venue
            .set_price(&Instrument::from("ACME"), dec!(94))
            .unwrap();
        let done = venue.get_order(&order.id).await.unwrap();
        assert_eq!(done.status, OrderStatus::Filled);
        assert!(done.average_fill_price().unwrap() <= dec!(95));
    }

    #[tokio::test]
    async fn stop_sell_triggers_when_price_drops() {
        let venue = PaperVenue::new(quiet_config());
        let buy = venue
            .submit_order(&market_buy("ACME", dec!(10), dec!(100)))
            .await
            .unwrap();
        wait_terminal(&venue, &buy.id).await;

        let mut stop = market_buy("ACME", dec!(10), dec!(100));
        stop.side = Side::Sell;
        stop.order_type = OrderType::Stop;
        stop.stop_price = Some(dec!(95));
        stop.purpose = OrderPurpose::StopLoss;
        let order = venue.submit_order(&stop).await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(
            venue.get_order(&order.id).await.unwrap().status,
            OrderStatus::Pending
        );

        venue
            .set_price(&Instrument::from("ACME"), dec!(94))
            .unwrap();
        let done = venue.get_order(&order.id).await.unwrap();
        assert_eq!(done.status, OrderStatus::Filled);
        assert!(venue.get_positions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn modify_updates_working_order() {
        let mut config = quiet_config();
        config.fill_delay_ms = 5_000;
        let venue = PaperVenue::new(config);
        let mut request = market_buy("ACME", dec!(10), dec!(100));
        request.order_type = OrderType::Limit;
        request.limit_price = Some(dec!(90));
        let order = venue.submit_order(&request).await.unwrap();

        let update = OrderUpdate {
            quantity: Some(dec!(20)),
            limit_price: Some(dec!(92)),
            stop_price: None,
        };
        let updated = venue.modify_order(&order.id, &update).await.unwrap();
        assert_eq!(updated.quantity, dec!(20));
        assert_eq!(updated.limit_price, Some(dec!(92)));
    }

    #[tokio::test]
    async fn modify_terminal_order_fails() {
        let venue = PaperVenue::new(quiet_config());
        let order = venue
            .submit_order(&market_buy("ACME", dec!(1), dec!(100)))
            .await
            .unwrap();
        wait_terminal(&venue, &order.id).await;

        let err = venue
            .modify_order(&order.id, &OrderUpdate::default())
            .await
            .unwrap_err();
        assert!(matches!(err, VenueError::NotModifiable { .. }));
    }

    #[tokio::test]
    async fn underfunded_buy_is_rejected() {
        let mut config = quiet_config();
        config.initial_capital = dec!(1000);
        let venue = PaperVenue::new(config);
        let order = venue
            .submit_order(&market_buy("ACME", dec!(100), dec!(150)))
            .await
            .unwrap();
        let done = wait_terminal(&venue, &order.id).await;
        assert_eq!(done.status, OrderStatus::Rejected);
        assert_eq!(done.reject_reason.as_deref(), Some("insufficient funds"));

        let balance = venue.get_account_balance().await.unwrap();
        assert_eq!(balance.cash, dec!(1000));
    }

    #[tokio::test]
    async fn seeded_runs_reproduce_outcomes() {
        async fn outcomes(seed: u64) -> Vec<OrderStatus> {
            let mut config = quiet_config();
            config.reject_probability = 0.5;
            config.rng_seed = Some(seed);
            let venue = PaperVenue::new(config);
            let mut statuses = Vec::new();
            for _ in 0..10 {
                let order = venue
                    .submit_order(&market_buy("ACME", dec!(1), dec!(100)))
                    .await
                    .unwrap();
                statuses.push(wait_terminal(&venue, &order.id).await.status);
            }
            statuses
        }

        let first = outcomes(7).await;
        let second = outcomes(7).await;
        assert_eq!(first, second);
        assert!(first.iter().all(OrderStatus::is_terminal));
    }
}
