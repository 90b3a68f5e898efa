//! Market signal detection.
//!
//! Every signal here is derived, advisory, and recomputable from line
//! history on demand. Nothing in this module is settlement-grade
//! truth; settlement reads final scores, not signals.

pub mod clv;
pub mod rlm;
pub mod steam;

use anyhow::Result;
use chrono::Duration;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::config::SignalsConfig;
use crate::history::LineHistory;
use crate::types::{Bet, MarketKind};

pub use clv::ClvReport;
pub use rlm::{RlmReport, RlmStatus, TicketSplit};
pub use steam::SteamAlert;

// ---------------------------------------------------------------------------
// Configuration (defaults — overridden by config.toml at runtime)
// ---------------------------------------------------------------------------

/// Signal thresholds. All of these are tunable heuristics carried over
/// from betting practice, not derived laws; treat the defaults as
/// starting points.
#[derive(Debug, Clone)]
pub struct SignalConfig {
    /// |opening − closing| line movement that counts as beating the
    /// close on spread/total markets.
    pub clv_points_threshold: Decimal,
    /// Independent books that must move together for a steam alert.
    pub steam_min_bookmakers: usize,
    /// Minimum line move per book to count toward steam (spread/total).
    pub steam_min_points: Decimal,
    /// Minimum price move per book to count toward steam (moneyline).
    pub steam_min_cents: i32,
    /// Window within which correlated moves count as one steam event.
    pub steam_window: Duration,
    /// How far back reverse-line-movement looks for the line's drift.
    pub rlm_lookback: Duration,
    /// Implied-probability drop against the public side that flags RLM.
    pub rlm_min_prob_move: f64,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            clv_points_threshold: dec!(0.5),
            steam_min_bookmakers: 3,
            steam_min_points: dec!(0.5),
            steam_min_cents: 10,
            steam_window: Duration::minutes(10),
            rlm_lookback: Duration::minutes(60),
            rlm_min_prob_move: 0.01,
        }
    }
}

impl From<&SignalsConfig> for SignalConfig {
    fn from(cfg: &SignalsConfig) -> Self {
        let defaults = SignalConfig::default();
        Self {
            clv_points_threshold: Decimal::from_f64_retain(cfg.clv_points_threshold)
                .unwrap_or(defaults.clv_points_threshold),
            steam_min_bookmakers: cfg.steam_min_bookmakers,
            steam_min_points: Decimal::from_f64_retain(cfg.steam_min_points)
                .unwrap_or(defaults.steam_min_points),
            steam_min_cents: cfg.steam_min_cents,
            steam_window: Duration::minutes(cfg.steam_window_minutes),
            rlm_lookback: Duration::minutes(cfg.rlm_lookback_minutes),
            rlm_min_prob_move: cfg.rlm_min_prob_move,
        }
    }
}

// ---------------------------------------------------------------------------
// Detector facade
// ---------------------------------------------------------------------------

/// Reads line history and runs the pure detectors over it.
#[derive(Clone)]
pub struct SignalDetector {
    history: LineHistory,
    config: SignalConfig,
}

impl SignalDetector {
    pub fn new(history: LineHistory, config: SignalConfig) -> Self {
        Self { history, config }
    }

    pub fn config(&self) -> &SignalConfig {
        &self.config
    }

    /// Closing line value for one bet. None while no closing quote
    /// exists for the bet's side of the market.
    pub async fn clv_for_bet(&self, bet: &Bet) -> Result<Option<ClvReport>> {
        let entries = self
            .history
            .history(&bet.event_id, bet.market, &bet.selection.to_string())
            .await?;
        let quotes: Vec<_> = entries.into_iter().map(|e| e.quote).collect();
        Ok(clv::compute(bet, &quotes, &self.config))
    }

    /// Steam alerts across all outcomes of one market.
    pub async fn steam_moves(
        &self,
        event_id: &str,
        market: MarketKind,
    ) -> Result<Vec<SteamAlert>> {
        let quotes = self.history.quotes_for_market(event_id, market).await?;
        Ok(steam::detect(&quotes, &self.config))
    }

    /// Reverse line movement for one market, given (optional) external
    /// ticket-split data. Without that data the answer is always
    /// `Unavailable` — never a fabricated percentage.
    pub async fn reverse_line_movement(
        &self,
        event_id: &str,
        market: MarketKind,
        tickets: Option<&TicketSplit>,
    ) -> Result<RlmReport> {
        let quotes = self.history.quotes_for_market(event_id, market).await?;
        Ok(rlm::evaluate(&quotes, tickets, &self.config))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
