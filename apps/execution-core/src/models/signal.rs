//! Inbound signal events from the upstream strategy framework.
//!
//! The upstream framework is an external collaborator; this module only
//! defines the three event shapes it is consumed as.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::order::Instrument;
use super::position::PositionDirection;

/// A signal event from the upstream framework.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalEvent {
    /// Open (or add to) a position.
    EntrySignal(EntrySignal),
    /// Close the open position for an instrument.
    ExitSignal(ExitSignal),
    /// Move the protective stop for an instrument.
    StopAdjustment(StopAdjustment),
}

impl SignalEvent {
    /// Instrument the signal concerns.
    #[must_use]
    pub const fn instrument(&self) -> &Instrument {
        match self {
            Self::EntrySignal(s) => &s.instrument,
            Self::ExitSignal(s) => &s.instrument,
            Self::StopAdjustment(s) => &s.instrument,
        }
    }
}

/// Request to open a position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntrySignal {
    /// Instrument to enter.
    pub instrument: Instrument,
    /// Long or short.
    pub direction: PositionDirection,
    /// Reference price at signal time.
    pub price: Decimal,
    /// Quantity to enter.
    pub quantity: Decimal,
    /// Optional protective stop level to place after the entry fills.
    #[serde(default)]
    pub stop_loss: Option<Decimal>,
    /// Free-form strategy metadata, carried onto the order.
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Request to close the open position for an instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitSignal {
    /// Instrument to exit.
    pub instrument: Instrument,
    /// Why the strategy wants out (carried into events and logs).
    pub reason: String,
    /// Reference price at signal time.
    pub price: Decimal,
}

/// Request to move the protective stop for an instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopAdjustment {
    /// Instrument whose stop moves.
    pub instrument: Instrument,
    /// New stop level.
    pub new_stop: Decimal,
    /// Why the stop is moving.
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn entry_signal_deserializes_from_tagged_json() {
        let json = r#"{
            "type": "ENTRY_SIGNAL",
            "instrument": "BTC-USD",
            "direction": "LONG",
            "price": "42000.5",
            "quantity": "0.25",
            "stop_loss": "41000",
            "metadata": {"strategy": "breakout"}
        }"#;
        let event: SignalEvent = serde_json::from_str(json).unwrap();
        let SignalEvent::EntrySignal(entry) = event else {
            panic!("expected entry signal");
        };
        assert_eq!(entry.instrument.as_str(), "BTC-USD");
        assert_eq!(entry.direction, PositionDirection::Long);
        assert_eq!(entry.price, dec!(42000.5));
        assert_eq!(entry.stop_loss, Some(dec!(41000)));
    }

    #[test]
    fn stop_adjustment_round_trips() {
        let event = SignalEvent::StopAdjustment(StopAdjustment {
            instrument: Instrument::from("ETH-USD"),
            new_stop: dec!(1900),
            reason: "trail".to_string(),
        });
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"STOP_ADJUSTMENT\""));
        let back: SignalEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn exit_signal_missing_optional_fields_is_fine() {
        let json = r#"{"type":"EXIT_SIGNAL","instrument":"BTC-USD","reason":"regime flip","price":"41000"}"#;
        let event: SignalEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.instrument().as_str(), "BTC-USD");
    }
}
