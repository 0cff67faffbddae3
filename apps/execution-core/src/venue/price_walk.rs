//! Simulated per-instrument price walk for the paper venue.

use std::collections::HashMap;

use rand::Rng;
use rust_decimal::Decimal;

use crate::models::Instrument;

/// A bounded random walk per instrument.
///
/// Each instrument's price is seeded from the first reference price the
/// venue sees for it, then perturbed by up to `volatility_pct` per tick.
#[derive(Debug)]
pub struct PriceWalk {
    prices: HashMap<Instrument, Decimal>,
    volatility_pct: f64,
}

impl PriceWalk {
    /// Create an empty walk with the given per-tick volatility bound.
    #[must_use]
    pub fn new(volatility_pct: f64) -> Self {
        Self {
            prices: HashMap::new(),
            volatility_pct,
        }
    }

    /// Record a reference price for an instrument if none is tracked yet.
    pub fn observe(&mut self, instrument: &Instrument, reference: Decimal) {
        self.prices
            .entry(instrument.clone())
            .or_insert(reference);
    }

    /// Pin an instrument's price exactly (market-data injection).
    pub fn set_price(&mut self, instrument: &Instrument, price: Decimal) {
        self.prices.insert(instrument.clone(), price);
    }

    /// Current mark for an instrument, if one is tracked.
    #[must_use]
    pub fn mark(&self, instrument: &Instrument) -> Option<Decimal> {
        self.prices.get(instrument).copied()
    }

    /// Step every tracked instrument once, returning the new marks.
    pub fn step_all<R: Rng>(&mut self, rng: &mut R) -> Vec<(Instrument, Decimal)> {
        let mut marks = Vec::with_capacity(self.prices.len());
        for (instrument, price) in &mut self.prices {
            if self.volatility_pct > 0.0 {
                let step = rng.random_range(-self.volatility_pct..=self.volatility_pct);
                let factor =
                    Decimal::from_f64_retain(1.0 + step).unwrap_or(Decimal::ONE);
                *price *= factor;
            }
            marks.push((instrument.clone(), *price));
        }
        marks.sort_by(|a, b| a.0.cmp(&b.0));
        marks
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn observe_keeps_first_reference() {
        let mut walk = PriceWalk::new(0.0);
        let btc = Instrument::from("BTC-USD");
        walk.observe(&btc, dec!(40000));
        walk.observe(&btc, dec!(99999));
        assert_eq!(walk.mark(&btc), Some(dec!(40000)));
    }

    #[test]
    fn set_price_overrides() {
        let mut walk = PriceWalk::new(0.0);
        let btc = Instrument::from("BTC-USD");
        walk.observe(&btc, dec!(40000));
        walk.set_price(&btc, dec!(41000));
        assert_eq!(walk.mark(&btc), Some(dec!(41000)));
    }

    #[test]
    fn zero_volatility_walk_is_flat() {
        let mut walk = PriceWalk::new(0.0);
        let btc = Instrument::from("BTC-USD");
        walk.observe(&btc, dec!(40000));
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..10 {
            walk.step_all(&mut rng);
        }
        assert_eq!(walk.mark(&btc), Some(dec!(40000)));
    }

    #[test]
    fn seeded_walk_is_reproducible() {
        let run = |seed: u64| {
            let mut walk = PriceWalk::new(0.01);
            let btc = Instrument::from("BTC-USD");
            walk.observe(&btc, dec!(40000));
            let mut rng = StdRng::seed_from_u64(seed);
            for _ in 0..50 {
                walk.step_all(&mut rng);
            }
            walk.mark(&btc)
        };
        assert_eq!(run(42), run(42));
        assert_ne!(run(42), run(43));
    }

    #[test]
    fn steps_stay_within_bound() {
        let mut walk = PriceWalk::new(0.01);
        let btc = Instrument::from("BTC-USD");
        walk.observe(&btc, dec!(1000));
        let mut rng = StdRng::seed_from_u64(9);
        let mut prev = dec!(1000);
        for _ in 0..100 {
            walk.step_all(&mut rng);
            let mark = walk.mark(&btc).unwrap();
            let ratio = (mark - prev).abs() / prev;
            assert!(ratio <= dec!(0.0101));
            prev = mark;
        }
    }
}
