//! Pure betting analytics: odds conversion, expected value, and
//! fractional-Kelly stake sizing.
//!
//! Every function here is deterministic and side-effect free —
//! identical inputs always produce identical outputs, with no I/O and
//! no shared state, so callers may invoke them concurrently without
//! coordination.

use rust_decimal::Decimal;

// ---------------------------------------------------------------------------
// Odds conversion
// ---------------------------------------------------------------------------

/// Implied probability of an American-odds price.
///
/// For `price > 0`: 100 / (price + 100).
/// For `price < 0`: |price| / (|price| + 100).
pub fn implied_probability(price: i32) -> f64 {
    if price > 0 {
        100.0 / (price as f64 + 100.0)
    } else {
        let p = price.abs() as f64;
        p / (p + 100.0)
    }
}

/// Decimal-odds multiplier of an American-odds price.
///
/// `price/100 + 1` for positive prices, `100/|price| + 1` for negative.
pub fn decimal_odds(price: i32) -> f64 {
    if price > 0 {
        price as f64 / 100.0 + 1.0
    } else {
        100.0 / price.abs() as f64 + 1.0
    }
}

/// Exact decimal-odds multiplier for payout math.
///
/// Settlement multiplies stakes by this, so it stays in `Decimal`
/// rather than round-tripping through floats.
pub fn payout_odds(price: i32) -> Decimal {
    let hundred = Decimal::from(100);
    if price > 0 {
        Decimal::from(price) / hundred + Decimal::ONE
    } else {
        hundred / Decimal::from(price.abs()) + Decimal::ONE
    }
}

// ---------------------------------------------------------------------------
// American-odds cents scale
// ---------------------------------------------------------------------------

/// Position of a price on the linear cents scale.
///
/// American odds are gapped at ±100 (−100 and +100 are the same
/// price), so the scale maps `p ≤ −100 → p + 100` and
/// `p ≥ 100 → p − 100`. −105 and +105 are 10 cents apart.
fn price_position(price: i32) -> i32 {
    if price <= -100 {
        price + 100
    } else if price >= 100 {
        price - 100
    } else {
        // Not a valid American price; treat as already linear.
        price
    }
}

/// Cents moved between two prices on the same outcome.
///
/// Positive when the price shortened from `from` to `to` — that is,
/// the implied probability rose. Sign agrees with the implied
/// probability delta.
pub fn cents_moved(from: i32, to: i32) -> i32 {
    price_position(from) - price_position(to)
}

// ---------------------------------------------------------------------------
// Expected value
// ---------------------------------------------------------------------------

/// Expected value of a stake at the given price and win probability.
///
/// `profit_if_win = stake × (d − 1)`;
/// `EV = p × profit_if_win − (1 − p) × stake`.
pub fn expected_value(stake: f64, win_probability: f64, price: i32) -> f64 {
    let d = decimal_odds(price);
    let profit_if_win = stake * (d - 1.0);
    win_probability * profit_if_win - (1.0 - win_probability) * stake
}

// ---------------------------------------------------------------------------
// Kelly sizing
// ---------------------------------------------------------------------------

/// Recommended stake under fractional Kelly.
///
/// Kelly formula: f* = (bp − q) / b
/// where:
///   b = net odds (decimal odds − 1)
///   p = estimated win probability
///   q = 1 − p
///
/// A negative f* is clamped to zero (the odds don't justify a bet);
/// the result scales linearly with `kelly_fraction`.
pub fn kelly_stake(bankroll: f64, win_probability: f64, price: i32, kelly_fraction: f64) -> f64 {
    if bankroll <= 0.0 {
        return 0.0;
    }

    let b = decimal_odds(price) - 1.0;
    if b <= 0.0 {
        return 0.0;
    }

    let q = 1.0 - win_probability;
    let full_kelly = (b * win_probability - q) / b;

    if full_kelly <= 0.0 {
        return 0.0;
    }

    bankroll * full_kelly * kelly_fraction
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const EPS: f64 = 1e-9;

    // -- Implied probability --

    #[test]
    fn test_implied_probability_negative_price() {
        // -110 → 110 / 210
        assert!((implied_probability(-110) - 110.0 / 210.0).abs() < EPS);
    }

    #[test]
    fn test_implied_probability_positive_price() {
        // +145 → 100 / 245
        assert!((implied_probability(145) - 100.0 / 245.0).abs() < EPS);
    }

    #[test]
    fn test_implied_probability_even_odds() {
        assert!((implied_probability(100) - 0.5).abs() < EPS);
        assert!((implied_probability(-100) - 0.5).abs() < EPS);
    }

    #[test]
    fn test_implied_probability_heavy_favorite() {
        // -400 → 400/500 = 0.8
        assert!((implied_probability(-400) - 0.8).abs() < EPS);
    }

    // -- Decimal odds --

    #[test]
    fn test_decimal_odds() {
        assert!((decimal_odds(150) - 2.5).abs() < EPS);
        assert!((decimal_odds(-110) - (100.0 / 110.0 + 1.0)).abs() < EPS);
        assert!((decimal_odds(100) - 2.0).abs() < EPS);
        assert!((decimal_odds(-100) - 2.0).abs() < EPS);
    }

    #[test]
    fn test_payout_odds_exact() {
        assert_eq!(payout_odds(150), dec!(2.5));
        assert_eq!(payout_odds(100), dec!(2));
        // -110 payout on $100 rounds to the cent as $190.91
        let gross = (payout_odds(-110) * dec!(100)).round_dp(2);
        assert_eq!(gross, dec!(190.91));
    }

    #[test]
    fn test_decimal_odds_consistency() {
        use rust_decimal::prelude::ToPrimitive;

        // The f64 and Decimal paths agree to float precision.
        for price in [-250, -110, -100, 100, 120, 365] {
            let approx = payout_odds(price).to_f64().unwrap();
            assert!((decimal_odds(price) - approx).abs() < 1e-9, "price {price}");
        }
    }

    // -- Cents scale --

    #[test]
    fn test_cents_moved_same_sign() {
        assert_eq!(cents_moved(-110, -120), 10);
        assert_eq!(cents_moved(-120, -110), -10);
        assert_eq!(cents_moved(120, 110), 10);
    }

    #[test]
    fn test_cents_moved_across_even() {
        // -105 → +105 crosses the ±100 gap once: 10 cents, prob fell.
        assert_eq!(cents_moved(-105, 105), -10);
        assert_eq!(cents_moved(105, -105), 10);
        assert_eq!(cents_moved(-100, 100), 0);
    }

    #[test]
    fn test_cents_moved_sign_matches_probability() {
        for (from, to) in [(-110, -125), (-110, 105), (130, 110), (100, -115)] {
            let cents = cents_moved(from, to);
            let dp = implied_probability(to) - implied_probability(from);
            assert_eq!(
                cents.signum() as f64,
                dp.signum(),
                "cents sign disagrees with probability delta for {from} → {to}",
            );
        }
    }

    #[test]
    fn test_cents_moved_unchanged() {
        assert_eq!(cents_moved(-110, -110), 0);
    }

    // -- Expected value --

    #[test]
    fn test_expected_value_standard_case() {
        // $100 at -110 with true p = 0.55:
        // profit_if_win = 100 × 0.90909… = 90.909…
        // EV = 0.55 × 90.909… − 0.45 × 100 = $5.00
        let ev = expected_value(100.0, 0.55, -110);
        assert!((ev - 5.0).abs() < EPS, "EV was {ev}");
    }

    #[test]
    fn test_expected_value_zero_at_fair_price() {
        // Betting at exactly the implied probability is EV-neutral.
        let p = implied_probability(-110);
        assert!(expected_value(100.0, p, -110).abs() < EPS);
    }

    #[test]
    fn test_expected_value_negative_below_fair() {
        assert!(expected_value(100.0, 0.40, -110) < 0.0);
    }

    #[test]
    fn test_expected_value_scales_with_stake() {
        let ev1 = expected_value(100.0, 0.55, -110);
        let ev2 = expected_value(200.0, 0.55, -110);
        assert!((ev2 - 2.0 * ev1).abs() < EPS);
    }

    #[test]
    fn test_expected_value_positive_price() {
        // $50 at +120, p = 0.5: EV = 0.5×60 − 0.5×50 = 5.0
        let ev = expected_value(50.0, 0.5, 120);
        assert!((ev - 5.0).abs() < EPS);
    }

    // -- Kelly sizing --

    #[test]
    fn test_kelly_standard_case() {
        // $1000 at -110, p = 0.55, quarter Kelly:
        // b = 0.90909…, full = (b×0.55 − 0.45)/b = 0.055
        // stake = 1000 × 0.055 × 0.25 = $13.75
        let stake = kelly_stake(1000.0, 0.55, -110, 0.25);
        assert!((stake - 13.75).abs() < EPS, "stake was {stake}");
    }

    #[test]
    fn test_kelly_scales_linearly_with_fraction() {
        let quarter = kelly_stake(1000.0, 0.55, -110, 0.25);
        let half = kelly_stake(1000.0, 0.55, -110, 0.50);
        assert!((half - 2.0 * quarter).abs() < EPS);
    }

    #[test]
    fn test_kelly_clamps_negative_edge() {
        // Even odds at p = 0.5 is a zero-edge bet; both terms are
        // exact in binary so the clamp fires deterministically.
        assert_eq!(kelly_stake(1000.0, 0.5, 100, 0.25), 0.0);
        assert_eq!(kelly_stake(1000.0, 0.40, -110, 0.25), 0.0);
    }

    #[test]
    fn test_kelly_zero_bankroll() {
        assert_eq!(kelly_stake(0.0, 0.55, -110, 0.25), 0.0);
        assert_eq!(kelly_stake(-50.0, 0.55, -110, 0.25), 0.0);
    }

    #[test]
    fn test_kelly_nonnegative() {
        for p in [0.0, 0.2, 0.5, 0.55, 0.8, 1.0] {
            for price in [-300, -110, 100, 150, 400] {
                assert!(kelly_stake(1000.0, p, price, 0.25) >= 0.0);
            }
        }
    }

    #[test]
    fn test_kelly_full_fraction_certain_win() {
        // p = 1.0 → full Kelly = 1.0 regardless of price.
        let stake = kelly_stake(1000.0, 1.0, 150, 1.0);
        assert!((stake - 1000.0).abs() < EPS);
    }
}
