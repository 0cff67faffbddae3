//! Orders, fills, and the requests that create them.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::lifecycle::OrderLifecycle;

/// Instrument identifier (e.g. "BTC-USD", "AAPL").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Instrument(String);

impl Instrument {
    /// Create a new instrument identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Instrument {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Instrument {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Side {
    /// Buy.
    Buy,
    /// Sell.
    Sell,
}

impl Side {
    /// Sign applied to cash flow and exposure: +1 for buy, -1 for sell.
    #[must_use]
    pub const fn sign(&self) -> Decimal {
        match self {
            Self::Buy => Decimal::ONE,
            Self::Sell => Decimal::NEGATIVE_ONE,
        }
    }

    /// The opposite side.
    #[must_use]
    pub const fn opposite(&self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    /// Execute at the current market price.
    Market,
    /// Execute at the limit price or better.
    Limit,
    /// Trigger a market order when the stop price is touched.
    Stop,
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Market => write!(f, "MARKET"),
            Self::Limit => write!(f, "LIMIT"),
            Self::Stop => write!(f, "STOP"),
        }
    }
}

/// Order status.
///
/// Transitions are one-directional: `Pending -> [PartiallyFilled]* ->
/// {Filled | Cancelled | Rejected}`. Terminal orders are immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Accepted by the venue, no fills yet.
    Pending,
    /// At least one fill, remaining quantity still open.
    PartiallyFilled,
    /// Fully filled.
    Filled,
    /// Cancelled before the full quantity filled.
    Cancelled,
    /// Rejected by the venue.
    Rejected,
}

impl OrderStatus {
    /// Returns true if the order is in a terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Filled | Self::Cancelled | Self::Rejected)
    }

    /// Returns true if the order can still receive fills.
    #[must_use]
    pub const fn can_fill(&self) -> bool {
        matches!(self, Self::Pending | Self::PartiallyFilled)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::PartiallyFilled => write!(f, "PARTIALLY_FILLED"),
            Self::Filled => write!(f, "FILLED"),
            Self::Cancelled => write!(f, "CANCELLED"),
            Self::Rejected => write!(f, "REJECTED"),
        }
    }
}

/// Why an order exists, relative to the position it affects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderPurpose {
    /// Opens or adds to a position.
    Entry,
    /// Closes an open position.
    Exit,
    /// Protective stop attached to an open position.
    StopLoss,
}

impl OrderPurpose {
    /// Exit and stop orders reduce exposure rather than add to it.
    #[must_use]
    pub const fn is_reducing(&self) -> bool {
        matches!(self, Self::Exit | Self::StopLoss)
    }
}

/// One execution (full or partial) against an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fill {
    /// Execution price.
    pub price: Decimal,
    /// Executed quantity.
    pub quantity: Decimal,
    /// Commission charged for this fill.
    pub commission: Decimal,
    /// When the fill occurred.
    pub timestamp: DateTime<Utc>,
}

impl Fill {
    /// Notional value of this fill (price x quantity).
    #[must_use]
    pub fn notional(&self) -> Decimal {
        self.price * self.quantity
    }
}

/// Parameters for creating an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    /// Instrument to trade.
    pub instrument: Instrument,
    /// Buy or sell.
    pub side: Side,
    /// Market, limit, or stop.
    pub order_type: OrderType,
    /// Requested quantity (must be positive).
    pub quantity: Decimal,
    /// Limit price (required for limit orders).
    pub limit_price: Option<Decimal>,
    /// Stop trigger price (required for stop orders).
    pub stop_price: Option<Decimal>,
    /// Reference price used for risk valuation of market orders.
    pub reference_price: Decimal,
    /// Relation of this order to the position it affects.
    pub purpose: OrderPurpose,
    /// Free-form metadata carried through from the originating signal.
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl OrderRequest {
    /// Validate the request shape before it is priced against risk limits.
    ///
    /// # Errors
    ///
    /// Returns `OrderError::InvalidRequest` when the quantity is not
    /// positive or a required price is missing.
    pub fn validate(&self) -> Result<(), OrderError> {
        if self.quantity <= Decimal::ZERO {
            return Err(OrderError::InvalidRequest(format!(
                "quantity must be positive, got {}",
                self.quantity
            )));
        }
        match self.order_type {
            OrderType::Limit => {
                if self.limit_price.is_none_or(|p| p <= Decimal::ZERO) {
                    return Err(OrderError::InvalidRequest(
                        "limit orders require a positive limit price".to_string(),
                    ));
                }
            }
            OrderType::Stop => {
                if self.stop_price.is_none_or(|p| p <= Decimal::ZERO) {
                    return Err(OrderError::InvalidRequest(
                        "stop orders require a positive stop price".to_string(),
                    ));
                }
            }
            OrderType::Market => {}
        }
        if self.reference_price <= Decimal::ZERO {
            return Err(OrderError::InvalidRequest(format!(
                "reference price must be positive, got {}",
                self.reference_price
            )));
        }
        Ok(())
    }

    /// Price used to value the order for risk checks: the limit or stop
    /// price when present, otherwise the reference price.
    #[must_use]
    pub fn effective_price(&self) -> Decimal {
        self.limit_price
            .or(self.stop_price)
            .unwrap_or(self.reference_price)
    }

    /// Notional value of the request at its effective price.
    #[must_use]
    pub fn notional(&self) -> Decimal {
        self.quantity * self.effective_price()
    }
}

/// Updates that can be applied to a working (non-terminal) order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderUpdate {
    /// New total quantity.
    pub quantity: Option<Decimal>,
    /// New limit price.
    pub limit_price: Option<Decimal>,
    /// New stop trigger price.
    pub stop_price: Option<Decimal>,
}

impl OrderUpdate {
    /// Returns true if no field is being changed.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.quantity.is_none() && self.limit_price.is_none() && self.stop_price.is_none()
    }
}

/// A requested trade instruction and its execution record.
///
/// Fills are append-only and owned exclusively by the order; once the
/// status is terminal no further mutation is permitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Venue-assigned order identifier.
    pub id: String,
    /// Instrument being traded.
    pub instrument: Instrument,
    /// Buy or sell.
    pub side: Side,
    /// Market, limit, or stop.
    pub order_type: OrderType,
    /// Requested quantity.
    pub quantity: Decimal,
    /// Limit price, if any.
    pub limit_price: Option<Decimal>,
    /// Stop trigger price, if any.
    pub stop_price: Option<Decimal>,
    /// Relation of this order to the position it affects.
    pub purpose: OrderPurpose,
    /// Current lifecycle status.
    pub status: OrderStatus,
    /// Ordered list of executions against this order.
    pub fills: Vec<Fill>,
    /// Venue-supplied reason when the order was rejected.
    pub reject_reason: Option<String>,
    /// Metadata carried through from the originating signal.
    #[serde(default)]
    pub metadata: serde_json::Value,
    /// When the order was created.
    pub created_at: DateTime<Utc>,
    /// When the order last changed.
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Create a pending order from a validated request.
    #[must_use]
    pub fn new(id: impl Into<String>, request: OrderRequest) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            instrument: request.instrument,
            side: request.side,
            order_type: request.order_type,
            quantity: request.quantity,
            limit_price: request.limit_price,
            stop_price: request.stop_price,
            purpose: request.purpose,
            status: OrderStatus::Pending,
            fills: Vec::new(),
            reject_reason: None,
            metadata: request.metadata,
            created_at: now,
            updated_at: now,
        }
    }

    /// Total quantity filled so far.
    #[must_use]
    pub fn filled_quantity(&self) -> Decimal {
        self.fills.iter().map(|f| f.quantity).sum()
    }

    /// Quantity still open.
    #[must_use]
    pub fn leaves_quantity(&self) -> Decimal {
        self.quantity - self.filled_quantity()
    }

    /// Volume-weighted average fill price, or `None` before the first fill.
    #[must_use]
    pub fn average_fill_price(&self) -> Option<Decimal> {
        let filled = self.filled_quantity();
        if filled.is_zero() {
            return None;
        }
        let notional: Decimal = self.fills.iter().map(Fill::notional).sum();
        Some(notional / filled)
    }

    /// Total commission across all fills.
    #[must_use]
    pub fn total_commission(&self) -> Decimal {
        self.fills.iter().map(|f| f.commission).sum()
    }

    /// Returns true if the order is in a terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Apply a fill, moving the order to partially-filled or filled.
    ///
    /// # Errors
    ///
    /// Returns an error when the fill quantity is not positive, exceeds
    /// the remaining quantity, or the order cannot legally receive fills.
    pub fn apply_fill(&mut self, fill: Fill) -> Result<(), OrderError> {
        if fill.quantity <= Decimal::ZERO {
            return Err(OrderError::InvalidRequest(format!(
                "fill quantity must be positive, got {}",
                fill.quantity
            )));
        }
        let remaining = self.leaves_quantity();
        if fill.quantity > remaining {
            return Err(OrderError::FillExceedsRemaining {
                order_id: self.id.clone(),
                fill_quantity: fill.quantity,
                remaining,
            });
        }
        let next = if fill.quantity == remaining {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };
        OrderLifecycle::validate_transition(self.status, next)?;
        self.fills.push(fill);
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Mark the order cancelled.
    ///
    /// # Errors
    ///
    /// Returns an error when the order is already terminal.
    pub fn mark_cancelled(&mut self) -> Result<(), OrderError> {
        OrderLifecycle::validate_transition(self.status, OrderStatus::Cancelled)?;
        self.status = OrderStatus::Cancelled;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Mark the order rejected with the venue-supplied reason.
    ///
    /// # Errors
    ///
    /// Returns an error when the order is not pending.
    pub fn mark_rejected(&mut self, reason: impl Into<String>) -> Result<(), OrderError> {
        OrderLifecycle::validate_transition(self.status, OrderStatus::Rejected)?;
        self.status = OrderStatus::Rejected;
        self.reject_reason = Some(reason.into());
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// Errors raised by order construction and mutation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderError {
    /// The requested state transition is not legal.
    #[error("invalid state transition from {from} to {to}: {reason}")]
    InvalidStateTransition {
        /// State the order was in.
        from: OrderStatus,
        /// State the transition attempted to reach.
        to: OrderStatus,
        /// Why the transition is not allowed.
        reason: String,
    },
    /// A fill would exceed the order's remaining quantity.
    #[error("fill of {fill_quantity} exceeds remaining {remaining} on order {order_id}")]
    FillExceedsRemaining {
        /// Order the fill was applied to.
        order_id: String,
        /// Quantity of the offending fill.
        fill_quantity: Decimal,
        /// Quantity that was still open.
        remaining: Decimal,
    },
    /// The request itself is malformed.
    #[error("invalid order request: {0}")]
    InvalidRequest(String),
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    fn market_request(quantity: Decimal) -> OrderRequest {
        OrderRequest {
            instrument: Instrument::from("BTC-USD"),
            side: Side::Buy,
            order_type: OrderType::Market,
            quantity,
            limit_price: None,
            stop_price: None,
            reference_price: dec!(100),
            purpose: OrderPurpose::Entry,
            metadata: serde_json::Value::Null,
        }
    }

    fn fill(price: Decimal, quantity: Decimal) -> Fill {
        Fill {
            price,
            quantity,
            commission: dec!(0.10),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn new_order_starts_pending() {
        let order = Order::new("o-1", market_request(dec!(10)));
        assert_eq!(order.status, OrderStatus::Pending);
        assert!(order.fills.is_empty());
        assert_eq!(order.leaves_quantity(), dec!(10));
    }

    #[test]
    fn partial_then_full_fill() {
        let mut order = Order::new("o-1", market_request(dec!(10)));
        order.apply_fill(fill(dec!(100), dec!(4))).unwrap();
        assert_eq!(order.status, OrderStatus::PartiallyFilled);
        assert_eq!(order.filled_quantity(), dec!(4));

        order.apply_fill(fill(dec!(101), dec!(6))).unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.leaves_quantity(), Decimal::ZERO);
    }

    #[test]
    fn average_fill_price_is_volume_weighted() {
        let mut order = Order::new("o-1", market_request(dec!(10)));
        order.apply_fill(fill(dec!(100), dec!(4))).unwrap();
        order.apply_fill(fill(dec!(110), dec!(6))).unwrap();
        // (100*4 + 110*6) / 10 = 106
        assert_eq!(order.average_fill_price(), Some(dec!(106)));
    }

    #[test]
    fn fill_cannot_exceed_remaining() {
        let mut order = Order::new("o-1", market_request(dec!(10)));
        let err = order.apply_fill(fill(dec!(100), dec!(11))).unwrap_err();
        assert!(matches!(err, OrderError::FillExceedsRemaining { .. }));
        assert_eq!(order.status, OrderStatus::Pending);
        assert!(order.fills.is_empty());
    }

    #[test]
    fn filled_order_rejects_further_mutation() {
        let mut order = Order::new("o-1", market_request(dec!(5)));
        order.apply_fill(fill(dec!(100), dec!(5))).unwrap();
        assert!(order.mark_cancelled().is_err());
        assert!(order.mark_rejected("late").is_err());
        assert!(order.apply_fill(fill(dec!(100), dec!(1))).is_err());
    }

    #[test]
    fn cancel_partially_filled_keeps_fills() {
        let mut order = Order::new("o-1", market_request(dec!(10)));
        order.apply_fill(fill(dec!(100), dec!(3))).unwrap();
        order.mark_cancelled().unwrap();
        assert_eq!(order.status, OrderStatus::Cancelled);
        assert_eq!(order.filled_quantity(), dec!(3));
    }

    #[test]
    fn limit_request_requires_limit_price() {
        let mut request = market_request(dec!(1));
        request.order_type = OrderType::Limit;
        assert!(request.validate().is_err());
        request.limit_price = Some(dec!(99));
        assert!(request.validate().is_ok());
    }

    #[test]
    fn non_positive_quantity_is_invalid() {
        assert!(market_request(Decimal::ZERO).validate().is_err());
        assert!(market_request(dec!(-5)).validate().is_err());
    }

    #[test]
    fn effective_price_prefers_limit() {
        let mut request = market_request(dec!(1));
        assert_eq!(request.effective_price(), dec!(100));
        request.limit_price = Some(dec!(95));
        assert_eq!(request.effective_price(), dec!(95));
    }

    #[test]
    fn status_serializes_screaming_snake() {
        let json = serde_json::to_string(&OrderStatus::PartiallyFilled).unwrap();
        assert_eq!(json, "\"PARTIALLY_FILLED\"");
    }

    mod properties {
        use proptest::prelude::*;

        use super::*;

        proptest! {
            // Whatever fill sequence the venue produces, accepted fills
            // never overfill the order and the status tracks the ledger.
            #[test]
            fn fills_never_exceed_order_quantity(
                quantity in 1u32..=1_000,
                attempts in proptest::collection::vec((1u32..=400, 50u32..=150), 1..20),
            ) {
                let mut order = Order::new("o-prop", market_request(Decimal::from(quantity)));
                for (fill_quantity, price) in attempts {
                    let _ = order.apply_fill(fill(
                        Decimal::from(price),
                        Decimal::from(fill_quantity),
                    ));
                    prop_assert!(order.filled_quantity() <= order.quantity);
                    prop_assert!(order.leaves_quantity() >= Decimal::ZERO);
                }
                if order.leaves_quantity().is_zero() {
                    prop_assert_eq!(order.status, OrderStatus::Filled);
                } else if order.fills.is_empty() {
                    prop_assert_eq!(order.status, OrderStatus::Pending);
                } else {
                    prop_assert_eq!(order.status, OrderStatus::PartiallyFilled);
                }
            }
        }
    }
}
