//! Pre-trade risk validation.
//!
//! Every order passes a fixed sequence of synchronous checks before it is
//! allowed to reach the venue. Validation is fail-fast: the first failed
//! check produces the rejection and later checks never run.

use std::collections::HashSet;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::{Instrument, OrderRequest};

/// Account-level trading constraints enforced by the order router.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskLimits {
    /// Maximum quantity for a single order.
    pub max_position_size: Decimal,
    /// Maximum notional value for a single order.
    pub max_order_value: Decimal,
    /// Maximum orders per trading day.
    pub max_daily_orders: u32,
    /// Maximum distinct open positions.
    pub max_open_positions: u32,
    /// Maximum aggregate exposure over equity.
    pub max_leverage: Decimal,
    /// Maximum tolerated drawdown fraction before auto-execution halts.
    pub max_drawdown: Decimal,
    /// Minimum cash the account must retain after a hypothetical fill.
    pub min_account_balance: Decimal,
    /// Tradeable instruments. Empty means no allow-list is enforced.
    pub allowed_instruments: HashSet<Instrument>,
    /// Instruments that must never be traded.
    pub denied_instruments: HashSet<Instrument>,
}

impl Default for RiskLimits {
    fn default() -> Self {
        crate::config::RiskConfig::default().to_risk_limits()
    }
}

/// Why an order failed pre-trade validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectionReason {
    /// Rejection code (e.g. `"ORDER_VALUE_EXCEEDED"`).
    pub code: String,
    /// Human-readable message naming the failed check.
    pub message: String,
    /// Observed value that violated the constraint.
    pub observed: Option<String>,
    /// Configured limit.
    pub limit: Option<String>,
}

impl RejectionReason {
    fn new(
        code: &str,
        message: String,
        observed: impl ToString,
        limit: impl ToString,
    ) -> Self {
        Self {
            code: code.to_string(),
            message,
            observed: Some(observed.to_string()),
            limit: Some(limit.to_string()),
        }
    }
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Account and portfolio state the checks are evaluated against.
///
/// The router assembles this from the venue balance, the position
/// manager, and its own daily counter immediately before validation.
#[derive(Debug, Clone, Default)]
pub struct ValidationContext {
    /// Venue-reported cash.
    pub cash: Decimal,
    /// Venue-reported equity.
    pub equity: Decimal,
    /// Venue-reported buying power.
    pub buying_power: Decimal,
    /// Number of distinct open positions.
    pub open_positions: u32,
    /// Aggregate absolute notional exposure of open positions.
    pub gross_exposure: Decimal,
    /// Orders already submitted since the last midnight boundary.
    pub daily_orders_used: u32,
}

/// Runs the pre-trade check sequence against a set of limits.
#[derive(Debug, Clone)]
pub struct RiskValidator {
    limits: RiskLimits,
}

impl RiskValidator {
    /// Create a validator with the given limits.
    #[must_use]
    pub const fn new(limits: RiskLimits) -> Self {
        Self { limits }
    }

    /// The limits this validator enforces.
    #[must_use]
    pub const fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    /// Validate an order request against the current account state.
    ///
    /// Checks run in a fixed order and the first failure wins:
    /// position size, order value, daily order count, open position
    /// count, account balance, buying power, leverage, instrument
    /// allow/deny lists.
    ///
    /// # Errors
    ///
    /// Returns the [`RejectionReason`] of the first failed check.
    pub fn validate(
        &self,
        request: &OrderRequest,
        context: &ValidationContext,
    ) -> Result<(), RejectionReason> {
        if let Some(reason) = self
            .check_position_size(request)
            .or_else(|| self.check_order_value(request))
            .or_else(|| self.check_daily_orders(context))
            .or_else(|| self.check_open_positions(request, context))
            .or_else(|| self.check_account_balance(request, context))
            .or_else(|| self.check_buying_power(request, context))
            .or_else(|| self.check_leverage(request, context))
            .or_else(|| self.check_instrument(request))
        {
            return Err(reason);
        }
        Ok(())
    }

    /// Re-validate the size and value of a modified working order.
    ///
    /// Only the single-order checks apply: a modification does not
    /// consume daily budget or change the open-position count. Market
    /// orders carry no resting price, so value is checked only when a
    /// limit or stop price is known.
    ///
    /// # Errors
    ///
    /// Returns the [`RejectionReason`] of the first failed check.
    pub fn validate_modification(
        &self,
        quantity: Decimal,
        price: Option<Decimal>,
    ) -> Result<(), RejectionReason> {
        if quantity > self.limits.max_position_size {
            return Err(RejectionReason::new(
                "POSITION_SIZE_EXCEEDED",
                format!(
                    "modified quantity {} exceeds max position size {}",
                    quantity, self.limits.max_position_size
                ),
                quantity,
                self.limits.max_position_size,
            ));
        }
        if let Some(price) = price {
            let value = quantity * price;
            if value > self.limits.max_order_value {
                return Err(RejectionReason::new(
                    "ORDER_VALUE_EXCEEDED",
                    format!(
                        "modified order value {} exceeds max order value {}",
                        value, self.limits.max_order_value
                    ),
                    value,
                    self.limits.max_order_value,
                ));
            }
        }
        Ok(())
    }

    fn check_position_size(&self, request: &OrderRequest) -> Option<RejectionReason> {
        if request.quantity > self.limits.max_position_size {
            return Some(RejectionReason::new(
                "POSITION_SIZE_EXCEEDED",
                format!(
                    "requested quantity {} exceeds max position size {}",
                    request.quantity, self.limits.max_position_size
                ),
                request.quantity,
                self.limits.max_position_size,
            ));
        }
        None
    }

    fn check_order_value(&self, request: &OrderRequest) -> Option<RejectionReason> {
        let value = request.notional();
        if value > self.limits.max_order_value {
            return Some(RejectionReason::new(
                "ORDER_VALUE_EXCEEDED",
                format!(
                    "order value {} exceeds max order value {}",
                    value, self.limits.max_order_value
                ),
                value,
                self.limits.max_order_value,
            ));
        }
        None
    }

    fn check_daily_orders(&self, context: &ValidationContext) -> Option<RejectionReason> {
        if context.daily_orders_used >= self.limits.max_daily_orders {
            return Some(RejectionReason::new(
                "DAILY_ORDER_LIMIT_REACHED",
                format!(
                    "{} orders already placed today, limit is {}",
                    context.daily_orders_used, self.limits.max_daily_orders
                ),
                context.daily_orders_used,
                self.limits.max_daily_orders,
            ));
        }
        None
    }

    /// Reducing orders (exits, stops) are exempt: they can only shrink
    /// the open set.
    fn check_open_positions(
        &self,
        request: &OrderRequest,
        context: &ValidationContext,
    ) -> Option<RejectionReason> {
        if request.purpose.is_reducing() {
            return None;
        }
        if context.open_positions >= self.limits.max_open_positions {
            return Some(RejectionReason::new(
                "OPEN_POSITION_LIMIT_REACHED",
                format!(
                    "{} positions already open, limit is {}",
                    context.open_positions, self.limits.max_open_positions
                ),
                context.open_positions,
                self.limits.max_open_positions,
            ));
        }
        None
    }

    fn check_account_balance(
        &self,
        request: &OrderRequest,
        context: &ValidationContext,
    ) -> Option<RejectionReason> {
        let cash_after = context.cash - request.notional() * request.side.sign();
        if cash_after < self.limits.min_account_balance {
            return Some(RejectionReason::new(
                "INSUFFICIENT_ACCOUNT_BALANCE",
                format!(
                    "cash after fill {} would fall below minimum balance {}",
                    cash_after, self.limits.min_account_balance
                ),
                cash_after,
                self.limits.min_account_balance,
            ));
        }
        None
    }

    fn check_buying_power(
        &self,
        request: &OrderRequest,
        context: &ValidationContext,
    ) -> Option<RejectionReason> {
        let value = request.notional();
        if value > context.buying_power {
            return Some(RejectionReason::new(
                "INSUFFICIENT_BUYING_POWER",
                format!(
                    "order value {} exceeds available buying power {}",
                    value, context.buying_power
                ),
                value,
                context.buying_power,
            ));
        }
        None
    }

    fn check_leverage(
        &self,
        request: &OrderRequest,
        context: &ValidationContext,
    ) -> Option<RejectionReason> {
        let projected = if request.purpose.is_reducing() {
            context.gross_exposure
        } else {
            context.gross_exposure + request.notional()
        };
        if context.equity <= Decimal::ZERO {
            return Some(RejectionReason::new(
                "LEVERAGE_EXCEEDED",
                "account equity is not positive".to_string(),
                context.equity,
                self.limits.max_leverage,
            ));
        }
        let leverage = projected / context.equity;
        if leverage > self.limits.max_leverage {
            return Some(RejectionReason::new(
                "LEVERAGE_EXCEEDED",
                format!(
                    "projected leverage {leverage} exceeds max leverage {}",
                    self.limits.max_leverage
                ),
                leverage,
                self.limits.max_leverage,
            ));
        }
        None
    }

    fn check_instrument(&self, request: &OrderRequest) -> Option<RejectionReason> {
        let instrument = &request.instrument;
        if !self.limits.allowed_instruments.is_empty()
            && !self.limits.allowed_instruments.contains(instrument)
        {
            return Some(RejectionReason::new(
                "INSTRUMENT_NOT_ALLOWED",
                format!("{instrument} is not in the allow-list"),
                instrument,
                "allow-list",
            ));
        }
        if self.limits.denied_instruments.contains(instrument) {
            return Some(RejectionReason::new(
                "INSTRUMENT_NOT_ALLOWED",
                format!("{instrument} is on the deny-list"),
                instrument,
                "deny-list",
            ));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;
    use crate::models::{OrderPurpose, OrderType, Side};

    fn limits() -> RiskLimits {
        RiskLimits {
            max_position_size: dec!(1000),
            max_order_value: dec!(50000),
            max_daily_orders: 100,
            max_open_positions: 10,
            max_leverage: dec!(2),
            max_drawdown: dec!(0.25),
            min_account_balance: dec!(1000),
            allowed_instruments: HashSet::new(),
            denied_instruments: HashSet::new(),
        }
    }

    fn healthy_context() -> ValidationContext {
        ValidationContext {
            cash: dec!(100000),
            equity: dec!(100000),
            buying_power: dec!(100000),
            open_positions: 0,
            gross_exposure: Decimal::ZERO,
            daily_orders_used: 0,
        }
    }

    fn market_buy(quantity: Decimal, price: Decimal) -> OrderRequest {
        OrderRequest {
            instrument: Instrument::from("ACME"),
            side: Side::Buy,
            order_type: OrderType::Market,
            quantity,
            limit_price: None,
            stop_price: None,
            reference_price: price,
            purpose: OrderPurpose::Entry,
            metadata: serde_json::Value::Null,
        }
    }

    #[test]
    fn healthy_order_passes_all_checks() {
        let validator = RiskValidator::new(limits());
        let result = validator.validate(&market_buy(dec!(100), dec!(150)), &healthy_context());
        assert!(result.is_ok());
    }

    #[test]
    fn oversized_quantity_fails_first() {
        let validator = RiskValidator::new(limits());
        // Quantity violates check 1 and value violates check 2; the
        // position-size failure must win.
        let reason = validator
            .validate(&market_buy(dec!(5000), dec!(150)), &healthy_context())
            .unwrap_err();
        assert_eq!(reason.code, "POSITION_SIZE_EXCEEDED");
        assert_eq!(reason.observed.as_deref(), Some("5000"));
        assert_eq!(reason.limit.as_deref(), Some("1000"));
    }

    #[test]
    fn order_value_above_limit_is_rejected() {
        let validator = RiskValidator::new(limits());
        // 1000 x 100 = 100,000 > 50,000
        let reason = validator
            .validate(&market_buy(dec!(1000), dec!(100)), &healthy_context())
            .unwrap_err();
        assert_eq!(reason.code, "ORDER_VALUE_EXCEEDED");
        assert_eq!(reason.observed.as_deref(), Some("100000"));
    }

    #[test]
    fn daily_order_budget_exhaustion_is_rejected() {
        let validator = RiskValidator::new(limits());
        let mut context = healthy_context();
        context.daily_orders_used = 100;
        let reason = validator
            .validate(&market_buy(dec!(1), dec!(100)), &context)
            .unwrap_err();
        assert_eq!(reason.code, "DAILY_ORDER_LIMIT_REACHED");
    }

    #[test]
    fn open_position_limit_blocks_entries_only() {
        let validator = RiskValidator::new(limits());
        let mut context = healthy_context();
        context.open_positions = 10;

        let reason = validator
            .validate(&market_buy(dec!(1), dec!(100)), &context)
            .unwrap_err();
        assert_eq!(reason.code, "OPEN_POSITION_LIMIT_REACHED");

        let mut exit = market_buy(dec!(1), dec!(100));
        exit.side = Side::Sell;
        exit.purpose = OrderPurpose::Exit;
        assert!(validator.validate(&exit, &context).is_ok());
    }

    #[test]
    fn balance_floor_applies_to_hypothetical_fill() {
        let validator = RiskValidator::new(limits());
        let mut context = healthy_context();
        context.cash = dec!(11000);
        // 11000 - 10050 = 950 < 1000 minimum
        let reason = validator
            .validate(&market_buy(dec!(100.5), dec!(100)), &context)
            .unwrap_err();
        assert_eq!(reason.code, "INSUFFICIENT_ACCOUNT_BALANCE");
    }

    #[test]
    fn buying_power_limits_order_value() {
        let validator = RiskValidator::new(limits());
        let mut context = healthy_context();
        context.cash = dec!(100000);
        context.buying_power = dec!(5000);
        let reason = validator
            .validate(&market_buy(dec!(100), dec!(100)), &context)
            .unwrap_err();
        assert_eq!(reason.code, "INSUFFICIENT_BUYING_POWER");
    }

    #[test]
    fn leverage_counts_projected_exposure() {
        let validator = RiskValidator::new(limits());
        let mut context = healthy_context();
        context.equity = dec!(10000);
        context.gross_exposure = dec!(15000);
        // (15000 + 10000) / 10000 = 2.5 > 2
        let reason = validator
            .validate(&market_buy(dec!(100), dec!(100)), &context)
            .unwrap_err();
        assert_eq!(reason.code, "LEVERAGE_EXCEEDED");

        // A reducing order does not add exposure: 1.5 <= 2 passes.
        let mut exit = market_buy(dec!(100), dec!(100));
        exit.side = Side::Sell;
        exit.purpose = OrderPurpose::Exit;
        assert!(validator.validate(&exit, &context).is_ok());
    }

    #[test]
    fn allow_list_excludes_unlisted_instruments() {
        let mut limits = limits();
        limits.allowed_instruments.insert(Instrument::from("ACME"));
        let validator = RiskValidator::new(limits);

        assert!(validator
            .validate(&market_buy(dec!(1), dec!(100)), &healthy_context())
            .is_ok());

        let mut other = market_buy(dec!(1), dec!(100));
        other.instrument = Instrument::from("OTHER");
        let reason = validator
            .validate(&other, &healthy_context())
            .unwrap_err();
        assert_eq!(reason.code, "INSTRUMENT_NOT_ALLOWED");
    }

    #[test]
    fn deny_list_always_wins() {
        let mut limits = limits();
        limits.denied_instruments.insert(Instrument::from("ACME"));
        let validator = RiskValidator::new(limits);
        let reason = validator
            .validate(&market_buy(dec!(1), dec!(100)), &healthy_context())
            .unwrap_err();
        assert_eq!(reason.code, "INSTRUMENT_NOT_ALLOWED");
        assert_eq!(reason.limit.as_deref(), Some("deny-list"));
    }

    #[test]
    fn modification_rechecks_size_and_value() {
        let validator = RiskValidator::new(limits());
        assert!(validator.validate_modification(dec!(100), Some(dec!(100))).is_ok());

        let reason = validator
            .validate_modification(dec!(2000), Some(dec!(10)))
            .unwrap_err();
        assert_eq!(reason.code, "POSITION_SIZE_EXCEEDED");

        let reason = validator
            .validate_modification(dec!(600), Some(dec!(100)))
            .unwrap_err();
        assert_eq!(reason.code, "ORDER_VALUE_EXCEEDED");

        // No known price: only the size check can apply.
        assert!(validator.validate_modification(dec!(600), None).is_ok());
    }

    #[test]
    fn limit_price_is_used_for_valuation() {
        let validator = RiskValidator::new(limits());
        let mut request = market_buy(dec!(600), dec!(100));
        request.order_type = OrderType::Limit;
        // 600 x 90 = 54,000 > 50,000 even though 600 x 100 reference
        // would also fail; the limit price is the binding valuation.
        request.limit_price = Some(dec!(90));
        let reason = validator
            .validate(&request, &healthy_context())
            .unwrap_err();
        assert_eq!(reason.code, "ORDER_VALUE_EXCEEDED");
        assert_eq!(reason.observed.as_deref(), Some("54000"));
    }
}
