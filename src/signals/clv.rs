//! Closing line value.
//!
//! Compares the price a bettor locked in against where the market
//! closed. Bets do not name a bookmaker, so the close is taken as the
//! consensus (arithmetic mean) across every book whose series carries
//! a closing tag for the bet's side.
//!
//! Sign conventions:
//! - `clv_prob > 0`: the bettor's price implies less probability than
//!   the close, i.e. they beat the market.
//! - `clv_cents > 0`: the price moved toward the bettor's side after
//!   they bet.
//! - `clv_points = opening_line - closing_line`: positive when the
//!   closing line sits below the opener — for spreads the favorite got
//!   more expensive, for totals the number came down.

use rust_decimal::Decimal;
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

use super::SignalConfig;
use crate::analytics;
use crate::types::{Bet, MarketKind, Quote};

/// Derived CLV for one settled or pending bet. Ephemeral; recomputed
/// on read and backfilled onto the bet row after settlement.
#[derive(Debug, Clone, PartialEq)]
pub struct ClvReport {
    pub clv_prob: f64,
    pub clv_cents: i32,
    /// Only for spread/total markets with line data on both tags.
    pub clv_points: Option<Decimal>,
    pub opening_line: Option<Decimal>,
    pub closing_line: Option<Decimal>,
    pub beat_closing_line: bool,
    /// Books contributing to the closing consensus.
    pub bookmakers: usize,
}

impl fmt::Display for ClvReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CLV {:+.4} prob / {:+} cents across {} books",
            self.clv_prob, self.clv_cents, self.bookmakers,
        )?;
        if let Some(points) = self.clv_points {
            write!(f, " / {points:+} points")?;
        }
        if self.beat_closing_line {
            write!(f, " (beat the close)")?;
        }
        Ok(())
    }
}

/// Compute CLV for a bet from its side's quote history. Returns None
/// while no closing quote exists; an absent value is reported rather
/// than a guessed one.
pub fn compute(bet: &Bet, quotes: &[Quote], config: &SignalConfig) -> Option<ClvReport> {
    let closings: Vec<&Quote> = quotes.iter().filter(|q| q.is_closing).collect();
    if closings.is_empty() {
        debug!(bet_id = %bet.id, "No closing quote yet; CLV unavailable");
        return None;
    }

    let bet_prob = analytics::implied_probability(bet.price);
    let closing_prob = closings
        .iter()
        .map(|q| analytics::implied_probability(q.price))
        .sum::<f64>()
        / closings.len() as f64;
    let clv_prob = closing_prob - bet_prob;

    let clv_cents = (closings
        .iter()
        .map(|q| analytics::cents_moved(bet.price, q.price) as f64)
        .sum::<f64>()
        / closings.len() as f64)
        .round() as i32;

    // Line movement needs both tags from the same book.
    let (opening_line, closing_line, clv_points) = if bet.market.has_line() {
        let openings: HashMap<&str, &Quote> = quotes
            .iter()
            .filter(|q| q.is_opening)
            .map(|q| (q.bookmaker.as_str(), q))
            .collect();
        let pairs: Vec<(Decimal, Decimal)> = closings
            .iter()
            .filter_map(|close| {
                let open = openings.get(close.bookmaker.as_str())?;
                Some((open.line?, close.line?))
            })
            .collect();
        if pairs.is_empty() {
            (None, None, None)
        } else {
            let count = Decimal::from(pairs.len() as i64);
            let open = (pairs.iter().map(|(o, _)| o).sum::<Decimal>() / count).round_dp(2);
            let close = (pairs.iter().map(|(_, c)| c).sum::<Decimal>() / count).round_dp(2);
            (Some(open), Some(close), Some(open - close))
        }
    } else {
        (None, None, None)
    };

    let beat_closing_line = match bet.market {
        MarketKind::Moneyline => clv_cents != 0,
        MarketKind::Spread | MarketKind::Total => clv_points
            .map(|p| p.abs() >= config.clv_points_threshold)
            .unwrap_or(false),
    };

    Some(ClvReport {
        clv_prob,
        clv_cents,
        clv_points,
        opening_line,
        closing_line,
        beat_closing_line,
        bookmakers: closings.len(),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
