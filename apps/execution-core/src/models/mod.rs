//! Core data model: orders, fills, positions, balances, signals, events.

pub mod account;
pub mod events;
pub mod lifecycle;
pub mod order;
pub mod position;
pub mod signal;

pub use account::AccountBalance;
pub use events::{ExecutionEvent, RiskLimitBreached};
pub use lifecycle::OrderLifecycle;
pub use order::{
    Fill, Instrument, Order, OrderError, OrderPurpose, OrderRequest, OrderStatus, OrderType,
    OrderUpdate, Side,
};
pub use position::{
    ClosedPosition, Discrepancy, DiscrepancyKind, DiscrepancySeverity, ManagedPosition,
    PositionDirection, VenuePosition,
};
pub use signal::{EntrySignal, ExitSignal, SignalEvent, StopAdjustment};
