//! Bet settlement.
//!
//! Consumes final outcomes and moves pending bets to their terminal
//! state, paying out through the bankroll ledger. This module owns the
//! `pending → {win, loss, push}` transition exclusively: the bet row
//! update, the payout ledger row, and the cached balance change commit
//! as one transaction, guarded so that only the first writer wins.
//! CLV backfill runs after commit and is best-effort.

use anyhow::{Context, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::Row;
use std::fmt;
use tracing::{debug, info, warn};

use crate::analytics;
use crate::history::LineHistory;
use crate::ingest::GameResult;
use crate::ledger;
use crate::signals::SignalDetector;
use crate::storage::Database;
use crate::types::{
    Bet, BetOutcome, EventStatus, FinalOutcome, MarketKind, Selection, SettlementResult,
    TransactionType,
};

// ---------------------------------------------------------------------------
// Outcome determination (pure)
// ---------------------------------------------------------------------------

/// Decide win/loss/push for one bet against a final outcome.
///
/// Returns None when the outcome cannot decide the bet: feed not
/// final, team names that match neither side, a line market missing
/// its line, or a selection that makes no sense for the market. The
/// bet stays pending in every such case; this function never guesses.
pub fn determine_outcome(bet: &Bet, outcome: &FinalOutcome) -> Option<BetOutcome> {
    if !outcome.completed {
        return None;
    }
    match bet.market {
        MarketKind::Moneyline => {
            let team = match &bet.selection {
                Selection::Team(team) => team,
                _ => return None,
            };
            // Confirm the team played before reading the winner, so a
            // tie cannot push a bet on an unrelated team.
            outcome.margin_for(team)?;
            Some(match outcome.winner() {
                Some(winner) if bet.selection.is_team(winner) => BetOutcome::Win,
                Some(_) => BetOutcome::Loss,
                None => BetOutcome::Push,
            })
        }
        MarketKind::Spread => {
            let line = bet.line?;
            let team = match &bet.selection {
                Selection::Team(team) => team,
                _ => return None,
            };
            let margin = Decimal::from(outcome.margin_for(team)?);
            let covered_by = margin + line;
            Some(if covered_by > Decimal::ZERO {
                BetOutcome::Win
            } else if covered_by < Decimal::ZERO {
                BetOutcome::Loss
            } else {
                BetOutcome::Push
            })
        }
        MarketKind::Total => {
            let line = bet.line?;
            let over = match &bet.selection {
                Selection::Over => true,
                Selection::Under => false,
                Selection::Team(_) => return None,
            };
            let total = Decimal::from(outcome.total_points());
            Some(if total == line {
                BetOutcome::Push
            } else if (total > line) == over {
                BetOutcome::Win
            } else {
                BetOutcome::Loss
            })
        }
    }
}

/// Gross amount returned for a settled bet: stake times decimal odds
/// on a win (rounded to cents), the stake back on a push, zero
/// otherwise.
pub fn gross_return(outcome: BetOutcome, stake: Decimal, price: i32) -> Decimal {
    match outcome {
        BetOutcome::Win => (stake * analytics::payout_odds(price)).round_dp(2),
        BetOutcome::Push => stake,
        BetOutcome::Loss | BetOutcome::Pending => Decimal::ZERO,
    }
}

// ---------------------------------------------------------------------------
// Settlement results
// ---------------------------------------------------------------------------

/// Outcome of one settlement attempt. Retries and races surface as
/// ordinary variants, not errors.
#[derive(Debug, Clone)]
pub enum SettleResult {
    /// This writer performed the terminal transition.
    Settled(SettlementResult),
    /// Another writer got there first; nothing was written.
    AlreadySettled,
    /// The outcome feed could not decide the bet; it stays pending.
    AwaitingResult,
}

/// Result of settling every pending bet on one event.
#[derive(Debug, Clone)]
pub struct SweepReport {
    pub event_id: String,
    pub settled: Vec<SettlementResult>,
    pub already_settled: usize,
    pub awaiting: usize,
    pub failed: Vec<FailedSettlement>,
    pub total_paid_out: Decimal,
}

#[derive(Debug, Clone)]
pub struct FailedSettlement {
    pub bet_id: String,
    pub reason: String,
}

impl SweepReport {
    fn new(event_id: &str) -> Self {
        Self {
            event_id: event_id.to_string(),
            settled: Vec::new(),
            already_settled: 0,
            awaiting: 0,
            failed: Vec::new(),
            total_paid_out: Decimal::ZERO,
        }
    }
}

impl fmt::Display for SweepReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} settled, {} already settled, {} awaiting, {} failed, ${} paid out",
            self.event_id,
            self.settled.len(),
            self.already_settled,
            self.awaiting,
            self.failed.len(),
            self.total_paid_out,
        )
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Applies final outcomes to pending bets.
#[derive(Clone)]
pub struct SettlementEngine {
    db: Database,
    history: LineHistory,
    signals: SignalDetector,
}

impl SettlementEngine {
    pub fn new(db: Database, history: LineHistory, signals: SignalDetector) -> Self {
        Self {
            db,
            history,
            signals,
        }
    }

    /// Settle one bet against a final outcome.
    ///
    /// The terminal transition, the payout ledger row, and the cached
    /// balance update commit together. The `outcome = 'pending'` guard
    /// on the update means a concurrent or retried attempt observes
    /// zero affected rows and backs out without writing anything.
    pub async fn settle_bet(&self, bet: &Bet, outcome: &FinalOutcome) -> Result<SettleResult> {
        let Some(decided) = determine_outcome(bet, outcome) else {
            if outcome.completed {
                warn!(
                    bet_id = %bet.id,
                    market = %bet.market,
                    selection = %bet.selection,
                    outcome = %outcome,
                    "Final outcome cannot decide bet, leaving pending"
                );
            } else {
                debug!(bet_id = %bet.id, "Outcome not final yet");
            }
            return Ok(SettleResult::AwaitingResult);
        };
        let actual_return = gross_return(decided, bet.stake, bet.price);
        let settled_at = Utc::now();

        let mut tx = self.db.pool().begin().await?;
        let updated = sqlx::query(
            r#"
            UPDATE bets SET outcome = ?, actual_return = ?, settled_at = ?
            WHERE id = ? AND outcome = 'pending'
            "#,
        )
        .bind(decided.to_string())
        .bind(actual_return.to_string())
        .bind(settled_at)
        .bind(&bet.id)
        .execute(&mut *tx)
        .await
        .context("Failed to transition bet")?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            debug!(bet_id = %bet.id, "Bet already settled, skipping");
            return Ok(SettleResult::AlreadySettled);
        }

        // Exactly one payout row per settlement, amount zero on a
        // loss, so the audit trail shows one balance adjustment per
        // settled bet.
        ledger::append_transaction(
            &mut tx,
            &bet.user_id,
            actual_return,
            TransactionType::Payout,
            Some(&bet.id),
            None,
        )
        .await?;
        tx.commit().await?;

        info!(
            bet_id = %bet.id,
            user_id = %bet.user_id,
            outcome = %decided,
            actual_return = %actual_return,
            "Bet settled"
        );

        if let Err(e) = self.backfill_clv(bet).await {
            warn!(bet_id = %bet.id, error = %e, "CLV backfill failed");
        }

        Ok(SettleResult::Settled(SettlementResult {
            bet_id: bet.id.clone(),
            outcome: decided,
            actual_return,
        }))
    }

    /// Settle every pending bet recorded against one event. Per-bet
    /// failures are collected in the report; the sweep always runs to
    /// the end of the batch.
    pub async fn settle_event(&self, outcome: &FinalOutcome) -> Result<SweepReport> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM bets
            WHERE event_id = ? AND outcome = 'pending'
            ORDER BY placed_at ASC
            "#,
        )
        .bind(&outcome.event_id)
        .fetch_all(self.db.pool())
        .await
        .context("Failed to load pending bets")?;

        let mut report = SweepReport::new(&outcome.event_id);
        for row in &rows {
            let bet = match ledger::row_to_bet(row) {
                Ok(bet) => bet,
                Err(e) => {
                    let bet_id: String = row.get("id");
                    warn!(bet_id, error = %e, "Unreadable bet row skipped");
                    report.failed.push(FailedSettlement {
                        bet_id,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            match self.settle_bet(&bet, outcome).await {
                Ok(SettleResult::Settled(result)) => {
                    report.total_paid_out += result.actual_return;
                    report.settled.push(result);
                }
                Ok(SettleResult::AlreadySettled) => report.already_settled += 1,
                Ok(SettleResult::AwaitingResult) => report.awaiting += 1,
                Err(e) => {
                    warn!(bet_id = %bet.id, error = %e, "Settlement failed");
                    report.failed.push(FailedSettlement {
                        bet_id: bet.id.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!(
            event_id = %outcome.event_id,
            settled = report.settled.len(),
            already_settled = report.already_settled,
            awaiting = report.awaiting,
            failed = report.failed.len(),
            paid_out = %report.total_paid_out,
            "Settlement sweep complete"
        );
        Ok(report)
    }

    /// Apply a batch of provider game results: match each completed
    /// result to an open event by team names, tag closing quotes, mark
    /// the event completed, and settle its bets. Results that match no
    /// open event are skipped; they will match once the odds feed has
    /// seen the game.
    pub async fn apply_results(&self, results: &[GameResult]) -> Result<Vec<SweepReport>> {
        let open = self.history.open_events().await?;
        let mut reports = Vec::new();

        for result in results {
            if !result.completed {
                continue;
            }
            let Some(event) = open.iter().find(|e| result.matches_event(e)) else {
                debug!(game = %result, "Final result matches no open event");
                continue;
            };

            // Closing tags must exist before settlement so the CLV
            // backfill inside settle_bet can see them.
            let tagged = self.history.mark_closing(&event.id).await?;
            self.history
                .set_event_status(&event.id, EventStatus::Completed)
                .await?;
            info!(
                event_id = %event.id,
                home = %event.home_team,
                away = %event.away_team,
                closing_quotes = tagged,
                "Event completed"
            );

            reports.push(self.settle_event(&result.to_outcome(&event.id)).await?);
        }
        Ok(reports)
    }

    /// Recompute CLV for a settled bet and write it onto the bet row.
    /// While no closing quote exists the fields stay NULL; callers see
    /// "no closing line available" rather than a fabricated number.
    async fn backfill_clv(&self, bet: &Bet) -> Result<()> {
        let Some(report) = self.signals.clv_for_bet(bet).await? else {
            debug!(bet_id = %bet.id, "No closing quote yet, CLV left unset");
            return Ok(());
        };

        sqlx::query(
            r#"
            UPDATE bets
            SET opening_line = ?, closing_line = ?, clv_prob = ?, clv_points = ?,
                beat_closing_line = ?
            WHERE id = ?
            "#,
        )
        .bind(report.opening_line.map(|l| l.to_string()))
        .bind(report.closing_line.map(|l| l.to_string()))
        .bind(report.clv_prob)
        .bind(report.clv_points.map(|p| p.to_string()))
        .bind(report.beat_closing_line)
        .bind(&bet.id)
        .execute(self.db.pool())
        .await
        .context("Failed to write CLV fields")?;

        info!(bet_id = %bet.id, clv = %report, "CLV backfilled");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
