//! Execution venue boundary.
//!
//! `ExecutionVenue` is the pluggable contract a real broker adapter must
//! satisfy to replace the paper venue. The rest of the system holds the
//! trait object and never branches on which venue is behind it.

mod paper;
mod price_walk;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{AccountBalance, Order, OrderRequest, OrderStatus, OrderUpdate, VenuePosition};

pub use paper::PaperVenue;
pub use price_walk::PriceWalk;

/// Errors surfaced by a venue.
#[derive(Debug, Clone, Error)]
pub enum VenueError {
    /// Transport-class failure (network, timeout). Retryable.
    #[error("venue transport failure: {0}")]
    Transport(String),

    /// The request itself is malformed.
    #[error("invalid order request: {0}")]
    InvalidRequest(String),

    /// No order with the given id exists at the venue.
    #[error("order {0} not found at venue")]
    OrderNotFound(String),

    /// The order cannot be modified in its current state.
    #[error("order {order_id} is not modifiable: {reason}")]
    NotModifiable {
        /// Order the modify targeted.
        order_id: String,
        /// Why the modify was refused.
        reason: String,
    },

    /// Venue-internal fault.
    #[error("venue internal error: {0}")]
    Internal(String),
}

impl VenueError {
    /// Transport failures are transient and worth retrying; everything
    /// else is a definitive answer from the venue.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

/// Result of a cancel request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The order was cancelled before it could fill completely.
    Cancelled,
    /// The order had already reached a terminal state; the cancel is a
    /// no-op and the terminal state stands.
    AlreadyTerminal(OrderStatus),
}

impl CancelOutcome {
    /// Returns true if the cancel actually took effect.
    #[must_use]
    pub const fn accepted(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// An abstract execution destination.
///
/// The venue owns order ids, fills, and all balance state. Callers submit
/// requests and observe venue-reported order state until terminal.
#[async_trait]
pub trait ExecutionVenue: Send + Sync {
    /// Submit an order. Returns the order in its initial pending state;
    /// fills and rejections arrive asynchronously via `get_order`.
    async fn submit_order(&self, request: &OrderRequest) -> Result<Order, VenueError>;

    /// Request cancellation of a working order.
    ///
    /// A cancel that loses the race against a fill returns
    /// `CancelOutcome::AlreadyTerminal` with the winning state.
    async fn cancel_order(&self, order_id: &str) -> Result<CancelOutcome, VenueError>;

    /// Modify a working order's quantity, limit price, or stop price.
    async fn modify_order(&self, order_id: &str, update: &OrderUpdate)
    -> Result<Order, VenueError>;

    /// Current state of an order, including all fills so far.
    async fn get_order(&self, order_id: &str) -> Result<Order, VenueError>;

    /// The venue's authoritative open positions.
    async fn get_positions(&self) -> Result<Vec<VenuePosition>, VenueError>;

    /// The venue's authoritative account balance.
    async fn get_account_balance(&self) -> Result<AccountBalance, VenueError>;

    /// Name of the venue, for logs and events.
    fn venue_name(&self) -> &'static str;

    /// Verify the venue is reachable.
    async fn health_check(&self) -> Result<(), VenueError>;
}
