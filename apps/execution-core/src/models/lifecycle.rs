//! Order lifecycle state machine.
//!
//! Shared by every venue implementation: transition legality is encoded
//! once here so an illegal move is a typed error, never a silent write.

use super::order::{OrderError, OrderStatus};

/// Validates order status transitions.
///
/// `Pending -> [PartiallyFilled]* -> {Filled | Cancelled | Rejected}`.
/// A cancel racing a fill is resolved by the venue before it reaches this
/// table, so there is no pending-cancel state: the venue reports whichever
/// terminal state actually won.
pub struct OrderLifecycle;

impl OrderLifecycle {
    /// Check if a status transition is valid.
    #[must_use]
    pub fn is_valid_transition(from: OrderStatus, to: OrderStatus) -> bool {
        matches!(
            (from, to),
            // From Pending
            (OrderStatus::Pending, OrderStatus::PartiallyFilled)
                | (OrderStatus::Pending, OrderStatus::Filled)
                | (OrderStatus::Pending, OrderStatus::Cancelled)
                | (OrderStatus::Pending, OrderStatus::Rejected)
                // From PartiallyFilled
                | (OrderStatus::PartiallyFilled, OrderStatus::PartiallyFilled)
                | (OrderStatus::PartiallyFilled, OrderStatus::Filled)
                | (OrderStatus::PartiallyFilled, OrderStatus::Cancelled)
        )
    }

    /// Validate a status transition.
    ///
    /// # Errors
    ///
    /// Returns `OrderError::InvalidStateTransition` if the transition is
    /// not legal.
    pub fn validate_transition(from: OrderStatus, to: OrderStatus) -> Result<(), OrderError> {
        if Self::is_valid_transition(from, to) {
            Ok(())
        } else {
            Err(OrderError::InvalidStateTransition {
                from,
                to,
                reason: Self::transition_error_reason(from, to),
            })
        }
    }

    /// Human-readable reason for an invalid transition.
    #[must_use]
    pub fn transition_error_reason(from: OrderStatus, to: OrderStatus) -> String {
        match from {
            OrderStatus::Filled => format!("order is already filled, cannot transition to {to}"),
            OrderStatus::Cancelled => format!("order is cancelled, cannot transition to {to}"),
            OrderStatus::Rejected => format!("order was rejected, cannot transition to {to}"),
            _ => format!("invalid transition from {from} to {to}"),
        }
    }

    /// All valid next states from a given state.
    #[must_use]
    pub fn valid_next_states(from: OrderStatus) -> Vec<OrderStatus> {
        match from {
            OrderStatus::Pending => vec![
                OrderStatus::PartiallyFilled,
                OrderStatus::Filled,
                OrderStatus::Cancelled,
                OrderStatus::Rejected,
            ],
            OrderStatus::PartiallyFilled => vec![
                OrderStatus::PartiallyFilled,
                OrderStatus::Filled,
                OrderStatus::Cancelled,
            ],
            // Terminal states
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected => vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case(OrderStatus::Pending, OrderStatus::PartiallyFilled, true)]
    #[test_case(OrderStatus::Pending, OrderStatus::Filled, true)]
    #[test_case(OrderStatus::Pending, OrderStatus::Cancelled, true)]
    #[test_case(OrderStatus::Pending, OrderStatus::Rejected, true)]
    #[test_case(OrderStatus::PartiallyFilled, OrderStatus::PartiallyFilled, true)]
    #[test_case(OrderStatus::PartiallyFilled, OrderStatus::Filled, true)]
    #[test_case(OrderStatus::PartiallyFilled, OrderStatus::Cancelled, true)]
    #[test_case(OrderStatus::PartiallyFilled, OrderStatus::Rejected, false)]
    #[test_case(OrderStatus::Filled, OrderStatus::Cancelled, false)]
    #[test_case(OrderStatus::Cancelled, OrderStatus::Filled, false)]
    #[test_case(OrderStatus::Rejected, OrderStatus::Pending, false)]
    #[test_case(OrderStatus::Filled, OrderStatus::Pending, false)]
    fn transition_table(from: OrderStatus, to: OrderStatus, expected: bool) {
        assert_eq!(OrderLifecycle::is_valid_transition(from, to), expected);
    }

    #[test]
    fn no_transitions_from_terminal_states() {
        for terminal in [
            OrderStatus::Filled,
            OrderStatus::Cancelled,
            OrderStatus::Rejected,
        ] {
            assert!(OrderLifecycle::valid_next_states(terminal).is_empty());
        }
    }

    #[test]
    fn validate_transition_returns_error_for_invalid() {
        let result =
            OrderLifecycle::validate_transition(OrderStatus::Filled, OrderStatus::Cancelled);
        let Err(OrderError::InvalidStateTransition { reason, .. }) = result else {
            panic!("expected InvalidStateTransition");
        };
        assert!(reason.contains("already filled"));
    }

    #[test]
    fn rejection_only_from_pending() {
        assert!(OrderLifecycle::is_valid_transition(
            OrderStatus::Pending,
            OrderStatus::Rejected
        ));
        assert!(!OrderLifecycle::is_valid_transition(
            OrderStatus::PartiallyFilled,
            OrderStatus::Rejected
        ));
    }
}
