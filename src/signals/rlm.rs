//! Reverse line movement detection.
//!
//! RLM is the line moving against the side holding the majority of
//! tickets: the public piles onto one team while the books make that
//! team cheaper, which usually means sharp money took the other side.
//!
//! Real ticket-split data is an external input this engine cannot
//! derive from quotes. When it is absent the detector reports
//! `Unavailable` — it never invents a public percentage.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

use super::SignalConfig;
use crate::analytics;
use crate::types::Quote;

/// Externally supplied public-betting split for one market.
#[derive(Debug, Clone)]
pub struct TicketSplit {
    /// The side holding the majority of tickets.
    pub outcome_name: String,
    /// Fraction of tickets on that side, 0..1.
    pub ticket_pct: f64,
    pub as_of: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RlmStatus {
    /// The line moved against the public side.
    Flagged,
    NotFlagged,
    /// Ticket data missing, or no quotes for the public side.
    Unavailable,
}

impl fmt::Display for RlmStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RlmStatus::Flagged => write!(f, "flagged"),
            RlmStatus::NotFlagged => write!(f, "not flagged"),
            RlmStatus::Unavailable => write!(f, "unavailable"),
        }
    }
}

/// Outcome of one RLM evaluation.
#[derive(Debug, Clone)]
pub struct RlmReport {
    pub status: RlmStatus,
    pub majority_outcome: Option<String>,
    pub ticket_pct: Option<f64>,
    /// Mean implied-probability move of the public side over the
    /// lookback window, averaged across books. Negative = against the
    /// public.
    pub prob_move: Option<f64>,
}

impl RlmReport {
    fn unavailable() -> Self {
        Self {
            status: RlmStatus::Unavailable,
            majority_outcome: None,
            ticket_pct: None,
            prob_move: None,
        }
    }
}

impl fmt::Display for RlmReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.majority_outcome, self.prob_move) {
            (Some(outcome), Some(moved)) => write!(
                f,
                "RLM {} ({} holds {:.0}% of tickets, line moved {:+.4})",
                self.status,
                outcome,
                self.ticket_pct.unwrap_or(0.0) * 100.0,
                moved,
            ),
            _ => write!(f, "RLM {}", self.status),
        }
    }
}

/// Evaluate reverse line movement for one market. `quotes` is the full
/// market history; only the public side's pregame series matter.
pub fn evaluate(
    quotes: &[Quote],
    tickets: Option<&TicketSplit>,
    config: &SignalConfig,
) -> RlmReport {
    let Some(tickets) = tickets else {
        debug!("No ticket-split data; RLM unavailable");
        return RlmReport::unavailable();
    };

    let side: Vec<&Quote> = quotes
        .iter()
        .filter(|q| !q.is_live && q.outcome_name == tickets.outcome_name)
        .collect();
    if side.is_empty() {
        debug!(outcome = %tickets.outcome_name, "No quotes for the public side; RLM unavailable");
        return RlmReport::unavailable();
    }

    if tickets.ticket_pct <= 0.5 {
        // Not a majority; nothing to move against.
        return RlmReport {
            status: RlmStatus::NotFlagged,
            majority_outcome: Some(tickets.outcome_name.clone()),
            ticket_pct: Some(tickets.ticket_pct),
            prob_move: None,
        };
    }

    let window_end = side
        .iter()
        .map(|q| q.observed_at)
        .max()
        .unwrap_or_else(Utc::now);
    let cutoff = window_end - config.rlm_lookback;

    let mut per_book: HashMap<&str, Vec<&Quote>> = HashMap::new();
    for &quote in &side {
        per_book.entry(quote.bookmaker.as_str()).or_default().push(quote);
    }

    let mut moves: Vec<f64> = Vec::new();
    for track in per_book.values() {
        // Baseline: the book's line as of the window start, or its
        // first quote when the series began inside the window.
        let start = track
            .iter()
            .rev()
            .find(|q| q.observed_at <= cutoff)
            .or_else(|| track.first())
            .copied();
        let end = track.last().copied();
        if let (Some(start), Some(end)) = (start, end) {
            moves.push(
                analytics::implied_probability(end.price)
                    - analytics::implied_probability(start.price),
            );
        }
    }

    let prob_move = moves.iter().sum::<f64>() / moves.len() as f64;
    let status = if prob_move <= -config.rlm_min_prob_move {
        debug!(
            outcome = %tickets.outcome_name,
            ticket_pct = tickets.ticket_pct,
            prob_move,
            "Reverse line movement flagged"
        );
        RlmStatus::Flagged
    } else {
        RlmStatus::NotFlagged
    };

    RlmReport {
        status,
        majority_outcome: Some(tickets.outcome_name.clone()),
        ticket_pct: Some(tickets.ticket_pct),
        prob_move: Some(prob_move),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
