//! Execution events published for downstream observers.
//!
//! Every state transition in the execution layer emits exactly one of
//! these; observers (UI, logging, statistics) subscribe via the event bus.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::order::{Instrument, Order, OrderPurpose, OrderType, Side};
use super::position::{ClosedPosition, Discrepancy, ManagedPosition, PositionDirection};

/// All execution events, tagged for the wire as SCREAMING_SNAKE_CASE.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionEvent {
    /// An order was accepted by the venue and is now working.
    OrderSubmitted(OrderSubmitted),
    /// An order reached its full quantity.
    OrderFilled(OrderFilled),
    /// The venue rejected an order.
    OrderRejected(OrderRejected),
    /// An order was cancelled before filling completely.
    OrderCancelled(OrderCancelled),
    /// A new position was opened.
    PositionOpened(PositionOpened),
    /// An open position was fully closed.
    PositionClosed(PositionClosed),
    /// A pre-trade risk check failed; the order never reached the venue.
    RiskLimitBreached(RiskLimitBreached),
    /// Reconciliation found local and venue state diverging.
    PositionDiscrepancy(Discrepancy),
    /// A failure that is not a venue rejection or risk breach.
    ExecutionError(ExecutionError),
}

impl ExecutionEvent {
    /// Wire name of the event type.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::OrderSubmitted(_) => "ORDER_SUBMITTED",
            Self::OrderFilled(_) => "ORDER_FILLED",
            Self::OrderRejected(_) => "ORDER_REJECTED",
            Self::OrderCancelled(_) => "ORDER_CANCELLED",
            Self::PositionOpened(_) => "POSITION_OPENED",
            Self::PositionClosed(_) => "POSITION_CLOSED",
            Self::RiskLimitBreached(_) => "RISK_LIMIT_BREACHED",
            Self::PositionDiscrepancy(_) => "POSITION_DISCREPANCY",
            Self::ExecutionError(_) => "EXECUTION_ERROR",
        }
    }

    /// Instrument the event concerns, when it concerns exactly one.
    #[must_use]
    pub const fn instrument(&self) -> Option<&Instrument> {
        match self {
            Self::OrderSubmitted(e) => Some(&e.instrument),
            Self::OrderFilled(e) => Some(&e.instrument),
            Self::OrderRejected(e) => Some(&e.instrument),
            Self::OrderCancelled(e) => Some(&e.instrument),
            Self::PositionOpened(e) => Some(&e.instrument),
            Self::PositionClosed(e) => Some(&e.instrument),
            Self::RiskLimitBreached(e) => Some(&e.instrument),
            Self::PositionDiscrepancy(d) => Some(&d.instrument),
            Self::ExecutionError(e) => e.instrument.as_ref(),
        }
    }

    /// Order id attached to the event, when there is one.
    #[must_use]
    pub fn order_id(&self) -> Option<&str> {
        match self {
            Self::OrderSubmitted(e) => Some(&e.order_id),
            Self::OrderFilled(e) => Some(&e.order_id),
            Self::OrderRejected(e) => Some(&e.order_id),
            Self::OrderCancelled(e) => Some(&e.order_id),
            Self::ExecutionError(e) => e.order_id.as_deref(),
            Self::PositionOpened(_)
            | Self::PositionClosed(_)
            | Self::RiskLimitBreached(_)
            | Self::PositionDiscrepancy(_) => None,
        }
    }

    /// When the event occurred.
    #[must_use]
    pub const fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            Self::OrderSubmitted(e) => e.occurred_at,
            Self::OrderFilled(e) => e.occurred_at,
            Self::OrderRejected(e) => e.occurred_at,
            Self::OrderCancelled(e) => e.occurred_at,
            Self::PositionOpened(e) => e.occurred_at,
            Self::PositionClosed(e) => e.occurred_at,
            Self::RiskLimitBreached(e) => e.occurred_at,
            Self::PositionDiscrepancy(d) => d.detected_at,
            Self::ExecutionError(e) => e.occurred_at,
        }
    }

    /// Build an ORDER_SUBMITTED event from a working order.
    #[must_use]
    pub fn submitted(order: &Order) -> Self {
        Self::OrderSubmitted(OrderSubmitted {
            order_id: order.id.clone(),
            instrument: order.instrument.clone(),
            side: order.side,
            order_type: order.order_type,
            purpose: order.purpose,
            quantity: order.quantity,
            limit_price: order.limit_price,
            stop_price: order.stop_price,
            occurred_at: Utc::now(),
        })
    }

    /// Build an ORDER_FILLED event from a terminally filled order.
    #[must_use]
    pub fn filled(order: &Order) -> Self {
        Self::OrderFilled(OrderFilled {
            order_id: order.id.clone(),
            instrument: order.instrument.clone(),
            side: order.side,
            purpose: order.purpose,
            quantity: order.filled_quantity(),
            average_price: order.average_fill_price().unwrap_or_default(),
            commission: order.total_commission(),
            occurred_at: Utc::now(),
        })
    }

    /// Build an ORDER_REJECTED event from a venue-rejected order.
    #[must_use]
    pub fn rejected(order: &Order) -> Self {
        Self::OrderRejected(OrderRejected {
            order_id: order.id.clone(),
            instrument: order.instrument.clone(),
            reason: order
                .reject_reason
                .clone()
                .unwrap_or_else(|| "rejected by venue".to_string()),
            occurred_at: Utc::now(),
        })
    }

    /// Build an ORDER_CANCELLED event from a cancelled order.
    #[must_use]
    pub fn cancelled(order: &Order) -> Self {
        Self::OrderCancelled(OrderCancelled {
            order_id: order.id.clone(),
            instrument: order.instrument.clone(),
            filled_quantity: order.filled_quantity(),
            occurred_at: Utc::now(),
        })
    }

    /// Build a POSITION_OPENED event from a freshly opened position.
    #[must_use]
    pub fn position_opened(position: &ManagedPosition) -> Self {
        Self::PositionOpened(PositionOpened {
            instrument: position.instrument.clone(),
            direction: position.direction,
            quantity: position.quantity,
            entry_price: position.entry_price,
            stop_loss: position.stop_loss,
            occurred_at: Utc::now(),
        })
    }

    /// Build a POSITION_CLOSED event from a closed record.
    #[must_use]
    pub fn position_closed(closed: &ClosedPosition) -> Self {
        Self::PositionClosed(PositionClosed {
            instrument: closed.instrument.clone(),
            direction: closed.direction,
            quantity: closed.quantity,
            entry_price: closed.entry_price,
            exit_price: closed.exit_price,
            realized_pnl: closed.realized_pnl,
            occurred_at: Utc::now(),
        })
    }

    /// Build an EXECUTION_ERROR event.
    #[must_use]
    pub fn error(
        instrument: Option<Instrument>,
        order_id: Option<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::ExecutionError(ExecutionError {
            instrument,
            order_id,
            message: message.into(),
            occurred_at: Utc::now(),
        })
    }
}

/// Payload for ORDER_SUBMITTED.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderSubmitted {
    /// Venue order id.
    pub order_id: String,
    /// Instrument being traded.
    pub instrument: Instrument,
    /// Buy or sell.
    pub side: Side,
    /// Market, limit, or stop.
    pub order_type: OrderType,
    /// Relation of the order to the position it affects.
    pub purpose: OrderPurpose,
    /// Requested quantity.
    pub quantity: Decimal,
    /// Limit price, if any.
    pub limit_price: Option<Decimal>,
    /// Stop price, if any.
    pub stop_price: Option<Decimal>,
    /// When the event occurred.
    pub occurred_at: DateTime<Utc>,
}

/// Payload for ORDER_FILLED.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderFilled {
    /// Venue order id.
    pub order_id: String,
    /// Instrument traded.
    pub instrument: Instrument,
    /// Buy or sell.
    pub side: Side,
    /// Relation of the order to the position it affects.
    pub purpose: OrderPurpose,
    /// Total filled quantity.
    pub quantity: Decimal,
    /// Volume-weighted average fill price.
    pub average_price: Decimal,
    /// Total commission across fills.
    pub commission: Decimal,
    /// When the event occurred.
    pub occurred_at: DateTime<Utc>,
}

/// Payload for ORDER_REJECTED.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRejected {
    /// Venue order id.
    pub order_id: String,
    /// Instrument the order was for.
    pub instrument: Instrument,
    /// Venue-supplied rejection reason.
    pub reason: String,
    /// When the event occurred.
    pub occurred_at: DateTime<Utc>,
}

/// Payload for ORDER_CANCELLED.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderCancelled {
    /// Venue order id.
    pub order_id: String,
    /// Instrument the order was for.
    pub instrument: Instrument,
    /// Quantity that had filled before the cancel.
    pub filled_quantity: Decimal,
    /// When the event occurred.
    pub occurred_at: DateTime<Utc>,
}

/// Payload for POSITION_OPENED.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionOpened {
    /// Instrument held.
    pub instrument: Instrument,
    /// Long or short.
    pub direction: PositionDirection,
    /// Opened quantity.
    pub quantity: Decimal,
    /// Volume-weighted entry price.
    pub entry_price: Decimal,
    /// Protective stop level, when one was requested.
    pub stop_loss: Option<Decimal>,
    /// When the event occurred.
    pub occurred_at: DateTime<Utc>,
}

/// Payload for POSITION_CLOSED.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionClosed {
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
    /// Final realized P&L, net of commission.
    pub realized_pnl: Decimal,
    /// When the event occurred.
    pub occurred_at: DateTime<Utc>,
}

/// Payload for RISK_LIMIT_BREACHED.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskLimitBreached {
    /// Instrument the rejected request was for.
    pub instrument: Instrument,
    /// Machine-readable code of the failed check.
    pub code: String,
    /// Human-readable description of the breach.
    pub message: String,
    /// Observed value that failed the check, when numeric.
    pub observed: Option<String>,
    /// Configured limit the value was checked against.
    pub limit: Option<String>,
    /// When the event occurred.
    pub occurred_at: DateTime<Utc>,
}

/// Payload for EXECUTION_ERROR.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionError {
    /// Instrument involved, when the failure has one.
    pub instrument: Option<Instrument>,
    /// Order involved, when the failure has one.
    pub order_id: Option<String>,
    /// What failed.
    pub message: String,
    /// When the event occurred.
    pub occurred_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;
    use crate::models::order::{OrderRequest, OrderStatus};

    fn sample_order() -> Order {
        Order::new(
            "o-7",
            OrderRequest {
                instrument: Instrument::from("BTC-USD"),
                side: Side::Buy,
                order_type: OrderType::Market,
                quantity: dec!(2),
                limit_price: None,
                stop_price: None,
                reference_price: dec!(40000),
                purpose: OrderPurpose::Entry,
                metadata: serde_json::Value::Null,
            },
        )
    }

    #[test]
    fn submitted_event_serializes_with_wire_tag() {
        let event = ExecutionEvent::submitted(&sample_order());
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "ORDER_SUBMITTED");
        assert_eq!(json["order_id"], "o-7");
        assert_eq!(json["instrument"], "BTC-USD");
        assert_eq!(event.event_type(), "ORDER_SUBMITTED");
    }

    #[test]
    fn rejected_event_carries_reason() {
        let mut order = sample_order();
        order.mark_rejected("simulated rejection").unwrap();
        assert_eq!(order.status, OrderStatus::Rejected);
        let event = ExecutionEvent::rejected(&order);
        let ExecutionEvent::OrderRejected(payload) = &event else {
            panic!("expected rejection payload");
        };
        assert_eq!(payload.reason, "simulated rejection");
        assert_eq!(event.order_id(), Some("o-7"));
    }

    #[test]
    fn error_event_without_order_context() {
        let event = ExecutionEvent::error(None, None, "venue unreachable");
        assert_eq!(event.instrument(), None);
        assert_eq!(event.order_id(), None);
        assert_eq!(event.event_type(), "EXECUTION_ERROR");
    }

    #[test]
    fn events_round_trip_through_json() {
        let event = ExecutionEvent::error(
            Some(Instrument::from("ETH-USD")),
            Some("o-9".to_string()),
            "timeout",
        );
        let json = serde_json::to_string(&event).unwrap();
        let back: ExecutionEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}
