// Allow unwrap/expect in tests - tests should panic on unexpected errors
// Allow test-specific patterns and pedantic lints in test code
#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Execution Core - Rust Library
//!
//! Execution integration layer for the Tiller trading system: turns
//! upstream strategy signals into risk-checked orders on a pluggable
//! execution venue and keeps local position state reconciled with
//! venue truth.
//!
//! # Architecture
//!
//! Signal flow runs through four layers:
//!
//! - **Models** (`models`): orders, fills, positions, signals, and the
//!   typed execution events every layer publishes.
//! - **Venue** (`venue`): the [`venue::ExecutionVenue`] trait and the
//!   seedable paper venue that simulates fills against a price walk.
//! - **Router** (`router`): fail-fast risk validation, bounded retry of
//!   transport errors, and lifecycle monitoring to exactly one terminal
//!   event per order.
//! - **Engine** (`engine`): the [`engine::ExecutionManager`], which
//!   converts entry/exit/stop signals into orders, tracks protective
//!   stops, folds running statistics off the event bus, and halts
//!   auto-execution on drawdown breach or accounting divergence.
//!
//! Position accounting (`position`) and periodic venue reconciliation
//! (`position::reconciliation`) sit beside the engine; the broadcast
//! event bus (`events`) ties the layers together.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

/// Configuration loading and validation.
pub mod config;

/// Signal-driven execution orchestration and running statistics.
pub mod engine;

/// Typed broadcast bus for execution events.
pub mod events;

/// Core data model: orders, fills, positions, signals, events.
pub mod models;

/// Logging initialization.
pub mod observability;

/// Position accounting and venue reconciliation.
pub mod position;

/// Order routing: validation, submission, lifecycle monitoring.
pub mod router;

/// Execution venue trait and the paper venue implementation.
pub mod venue;

// Model re-exports
pub use models::{
    ClosedPosition, Discrepancy, DiscrepancyKind, DiscrepancySeverity, EntrySignal,
    ExecutionEvent, ExitSignal, Fill, Instrument, ManagedPosition, Order, OrderPurpose,
    OrderRequest, OrderStatus, OrderType, PositionDirection, Side, SignalEvent, StopAdjustment,
    VenuePosition,
};

// Layer re-exports
pub use config::{Config, ConfigError, load_config};
pub use engine::{EngineError, ExecutionManager, ExecutionStats};
pub use events::EventBus;
pub use position::{PositionError, PositionManager, ReconciliationReport, Reconciler};
pub use router::{OrderRouter, PortfolioView, RiskLimits, RouterError};
pub use venue::{ExecutionVenue, PaperVenue, VenueError};
