//! End-to-end pipeline tests.
//!
//! Scripted feed implementations drive the real components — ingest
//! normalizer, line history, ledger, and settlement engine — over an
//! in-memory database, from quote board to paid-out balance.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::VecDeque;
use std::sync::Mutex;

use linesmith::history::LineHistory;
use linesmith::ingest::{GameResult, Normalizer, OutcomeFeed, QuoteFeed};
use linesmith::ledger::Ledger;
use linesmith::settlement::SettlementEngine;
use linesmith::signals::{SignalConfig, SignalDetector};
use linesmith::storage::Database;
use linesmith::types::{
    Bet, BetOutcome, Event, EventStatus, MarketKind, Quote, Selection, TransactionType,
};

/// Deterministic odds feed: serves one scripted board snapshot per
/// fetch, then empty boards.
struct ScriptedBoard {
    batches: Mutex<VecDeque<(Vec<Event>, Vec<Quote>)>>,
}

impl ScriptedBoard {
    fn new(batches: Vec<(Vec<Event>, Vec<Quote>)>) -> Self {
        Self {
            batches: Mutex::new(batches.into()),
        }
    }
}

#[async_trait]
impl QuoteFeed for ScriptedBoard {
    async fn fetch_quotes(&self, _sport_key: &str) -> Result<(Vec<Event>, Vec<Quote>)> {
        Ok(self.batches.lock().unwrap().pop_front().unwrap_or_default())
    }

    fn name(&self) -> &str {
        "scripted-board"
    }
}

/// Deterministic results feed with a fixed scoreline set.
struct ScriptedScoreboard {
    results: Vec<GameResult>,
}

#[async_trait]
impl OutcomeFeed for ScriptedScoreboard {
    async fn fetch_results(&self) -> Result<Vec<GameResult>> {
        Ok(self.results.clone())
    }

    fn name(&self) -> &str {
        "scripted-scoreboard"
    }
}

struct Stack {
    history: LineHistory,
    ledger: Ledger,
    normalizer: Normalizer,
    engine: SettlementEngine,
}

async fn build_stack() -> Stack {
    let db = Database::connect_in_memory().await.unwrap();
    db.migrate().await.unwrap();

    let history = LineHistory::new(db.clone());
    let ledger = Ledger::new(db.clone());
    let signals = SignalDetector::new(history.clone(), SignalConfig::default());
    // These tests replay board snapshots from hours back; widen the
    // staleness window so ingestion accepts them.
    let normalizer = Normalizer::new(history.clone(), 24 * 60);
    let engine = SettlementEngine::new(db.clone(), history.clone(), signals);

    Stack {
        history,
        ledger,
        normalizer,
        engine,
    }
}

fn make_event(id: &str, commence_time: DateTime<Utc>) -> Event {
    Event {
        id: id.to_string(),
        sport_key: "basketball_nba".to_string(),
        home_team: "Boston Celtics".to_string(),
        away_team: "Denver Nuggets".to_string(),
        commence_time,
        status: EventStatus::Scheduled,
    }
}

fn make_quote(
    event_id: &str,
    market: MarketKind,
    outcome_name: &str,
    price: i32,
    line: Option<Decimal>,
    observed_at: DateTime<Utc>,
) -> Quote {
    Quote {
        event_id: event_id.to_string(),
        market,
        outcome_name: outcome_name.to_string(),
        bookmaker: "draftkings".to_string(),
        price,
        line,
        observed_at,
        is_opening: false,
        is_closing: false,
        is_live: false,
    }
}

fn make_bet(
    id: &str,
    event_id: &str,
    market: MarketKind,
    selection: Selection,
    line: Option<Decimal>,
    stake: Decimal,
    price: i32,
) -> Bet {
    Bet {
        id: id.to_string(),
        user_id: "user-1".to_string(),
        event_id: event_id.to_string(),
        market,
        selection,
        line,
        stake,
        price,
        outcome: BetOutcome::Pending,
        placed_at: Utc::now(),
        opening_line: None,
        closing_line: None,
        clv_prob: None,
        clv_points: None,
        beat_closing_line: None,
        actual_return: None,
        settled_at: None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_board_to_payout_flow() {
        let stack = build_stack().await;
        let now = Utc::now();
        let commence = now - Duration::hours(3);
        let event = make_event("evt-100", commence);

        // Two polling cycles: the opener, then a full-point move an
        // hour later. Both snapshots land before tip-off.
        let board = ScriptedBoard::new(vec![
            (
                vec![event.clone()],
                vec![
                    make_quote(
                        "evt-100",
                        MarketKind::Spread,
                        "Boston Celtics",
                        -110,
                        Some(dec!(-4.5)),
                        now - Duration::hours(5),
                    ),
                    make_quote(
                        "evt-100",
                        MarketKind::Spread,
                        "Denver Nuggets",
                        -110,
                        Some(dec!(4.5)),
                        now - Duration::hours(5),
                    ),
                ],
            ),
            (
                vec![event.clone()],
                vec![
                    make_quote(
                        "evt-100",
                        MarketKind::Spread,
                        "Boston Celtics",
                        -110,
                        Some(dec!(-5.5)),
                        now - Duration::hours(4),
                    ),
                    make_quote(
                        "evt-100",
                        MarketKind::Spread,
                        "Denver Nuggets",
                        -110,
                        Some(dec!(5.5)),
                        now - Duration::hours(4),
                    ),
                ],
            ),
        ]);

        for _ in 0..2 {
            let (events, quotes) = board.fetch_quotes("basketball_nba").await.unwrap();
            let report = stack.normalizer.ingest(&events, &quotes).await.unwrap();
            assert_eq!(report.accepted, 2);
        }

        let entries = stack
            .history
            .history("evt-100", MarketKind::Spread, "Boston Celtics")
            .await
            .unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].quote.is_opening);

        // Two tickets on opposite sides of the spread.
        stack.ledger.open_account("user-1", dec!(1000)).await.unwrap();
        stack
            .ledger
            .place_bet(&make_bet(
                "bet-flow-1",
                "evt-100",
                MarketKind::Spread,
                Selection::Team("Boston Celtics".to_string()),
                Some(dec!(-4.5)),
                dec!(100),
                -110,
            ))
            .await
            .unwrap();
        stack
            .ledger
            .place_bet(&make_bet(
                "bet-flow-2",
                "evt-100",
                MarketKind::Spread,
                Selection::Team("Denver Nuggets".to_string()),
                Some(dec!(4.5)),
                dec!(50),
                -110,
            ))
            .await
            .unwrap();
        assert_eq!(stack.ledger.balance("user-1").await.unwrap(), dec!(850));

        // Celtics win by 8: -4.5 covers, +4.5 does not.
        let scoreboard = ScriptedScoreboard {
            results: vec![GameResult {
                provider_game_id: "0022500042".to_string(),
                home_team: "Boston Celtics".to_string(),
                away_team: "Denver Nuggets".to_string(),
                home_score: 112,
                away_score: 104,
                completed: true,
            }],
        };
        let results = scoreboard.fetch_results().await.unwrap();
        let reports = stack.engine.apply_results(&results).await.unwrap();

        assert_eq!(reports.len(), 1);
        let report = &reports[0];
        assert_eq!(report.event_id, "evt-100");
        assert_eq!(report.settled.len(), 2);
        assert!(report.failed.is_empty());
        assert_eq!(report.total_paid_out, dec!(190.91));

        let win = report
            .settled
            .iter()
            .find(|s| s.bet_id == "bet-flow-1")
            .unwrap();
        assert_eq!(win.outcome, BetOutcome::Win);
        assert_eq!(win.actual_return, dec!(190.91));
        let loss = report
            .settled
            .iter()
            .find(|s| s.bet_id == "bet-flow-2")
            .unwrap();
        assert_eq!(loss.outcome, BetOutcome::Loss);
        assert_eq!(loss.actual_return, Decimal::ZERO);

        // Money landed and the ledger replays clean.
        assert_eq!(stack.ledger.balance("user-1").await.unwrap(), dec!(1040.91));
        assert!(stack.ledger.reconcile("user-1").await.unwrap().is_clean());
        let rows = stack.ledger.transactions("user-1").await.unwrap();
        assert_eq!(rows.len(), 5);
        assert_eq!(rows[0].transaction_type, TransactionType::Deposit);
        let payout = rows
            .iter()
            .find(|r| r.bet_id.as_deref() == Some("bet-flow-1")
                && r.transaction_type == TransactionType::Payout)
            .unwrap();
        assert_eq!(payout.amount, dec!(190.91));

        // Event is closed out and the CLV fields were backfilled from
        // the tagged closing quotes.
        let stored_event = stack.history.event("evt-100").await.unwrap().unwrap();
        assert_eq!(stored_event.status, EventStatus::Completed);
        assert!(stack.history.open_events().await.unwrap().is_empty());

        let winner = stack.ledger.bet("bet-flow-1").await.unwrap().unwrap();
        assert_eq!(winner.outcome, BetOutcome::Win);
        assert_eq!(winner.actual_return, Some(dec!(190.91)));
        assert!(winner.settled_at.is_some());
        assert_eq!(winner.opening_line, Some(dec!(-4.5)));
        assert_eq!(winner.closing_line, Some(dec!(-5.5)));
        assert_eq!(winner.clv_points, Some(dec!(1.00)));
        assert_eq!(winner.beat_closing_line, Some(true));
        assert_eq!(winner.clv_prob, Some(0.0));

        let loser = stack.ledger.bet("bet-flow-2").await.unwrap().unwrap();
        assert_eq!(loser.actual_return, Some(Decimal::ZERO));
        assert_eq!(loser.opening_line, Some(dec!(4.5)));
        assert_eq!(loser.closing_line, Some(dec!(5.5)));
        assert_eq!(loser.clv_points, Some(dec!(-1.00)));

        // Replaying the same scoreboard is a no-op: the event is no
        // longer open.
        let again = stack.engine.apply_results(&results).await.unwrap();
        assert!(again.is_empty());
        assert_eq!(stack.ledger.transactions("user-1").await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_unfinished_game_settles_nothing() {
        let stack = build_stack().await;
        let now = Utc::now();
        let event = make_event("evt-200", now - Duration::hours(1));
        let quotes = vec![make_quote(
            "evt-200",
            MarketKind::Spread,
            "Boston Celtics",
            -110,
            Some(dec!(-4.5)),
            now - Duration::hours(2),
        )];
        stack.normalizer.ingest(&[event], &quotes).await.unwrap();

        stack.ledger.open_account("user-1", dec!(500)).await.unwrap();
        stack
            .ledger
            .place_bet(&make_bet(
                "bet-200",
                "evt-200",
                MarketKind::Spread,
                Selection::Team("Boston Celtics".to_string()),
                Some(dec!(-4.5)),
                dec!(100),
                -110,
            ))
            .await
            .unwrap();

        // Halftime score: nothing may settle.
        let scoreboard = ScriptedScoreboard {
            results: vec![GameResult {
                provider_game_id: "0022500043".to_string(),
                home_team: "Boston Celtics".to_string(),
                away_team: "Denver Nuggets".to_string(),
                home_score: 58,
                away_score: 52,
                completed: false,
            }],
        };
        let results = scoreboard.fetch_results().await.unwrap();
        let reports = stack.engine.apply_results(&results).await.unwrap();
        assert!(reports.is_empty());

        let stored = stack.ledger.bet("bet-200").await.unwrap().unwrap();
        assert_eq!(stored.outcome, BetOutcome::Pending);
        assert_eq!(stack.ledger.balance("user-1").await.unwrap(), dec!(400));
        assert_eq!(stack.history.open_events().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_total_on_the_number_refunds_stake() {
        let stack = build_stack().await;
        let now = Utc::now();
        let event = make_event("evt-300", now - Duration::hours(1));
        let quotes = vec![make_quote(
            "evt-300",
            MarketKind::Total,
            "Over",
            -110,
            Some(dec!(220)),
            now - Duration::hours(2),
        )];
        stack.normalizer.ingest(&[event], &quotes).await.unwrap();

        stack.ledger.open_account("user-1", dec!(500)).await.unwrap();
        stack
            .ledger
            .place_bet(&make_bet(
                "bet-300",
                "evt-300",
                MarketKind::Total,
                Selection::Over,
                Some(dec!(220)),
                dec!(50),
                -110,
            ))
            .await
            .unwrap();

        // 112 + 108 lands exactly on 220.
        let scoreboard = ScriptedScoreboard {
            results: vec![GameResult {
                provider_game_id: "0022500044".to_string(),
                home_team: "Boston Celtics".to_string(),
                away_team: "Denver Nuggets".to_string(),
                home_score: 112,
                away_score: 108,
                completed: true,
            }],
        };
        let results = scoreboard.fetch_results().await.unwrap();
        let reports = stack.engine.apply_results(&results).await.unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].total_paid_out, dec!(50));

        assert_eq!(stack.ledger.balance("user-1").await.unwrap(), dec!(500));
        assert!(stack.ledger.reconcile("user-1").await.unwrap().is_clean());

        let rows = stack.ledger.transactions("user-1").await.unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[2].transaction_type, TransactionType::Payout);
        assert_eq!(rows[2].amount, dec!(50));

        let stored = stack.ledger.bet("bet-300").await.unwrap().unwrap();
        assert_eq!(stored.outcome, BetOutcome::Push);
        assert_eq!(stored.actual_return, Some(dec!(50)));
        // Single quote in the series: it is both opener and closer, so
        // CLV is exactly flat.
        assert_eq!(stored.clv_points, Some(Decimal::ZERO));
        assert_eq!(stored.beat_closing_line, Some(false));
    }

    #[tokio::test]
    async fn test_flipped_home_away_result_still_settles() {
        let stack = build_stack().await;
        let now = Utc::now();
        let event = make_event("evt-400", now - Duration::hours(2));
        let quotes = vec![make_quote(
            "evt-400",
            MarketKind::Moneyline,
            "Boston Celtics",
            120,
            None,
            now - Duration::hours(3),
        )];
        stack.normalizer.ingest(&[event], &quotes).await.unwrap();

        stack.ledger.open_account("user-1", dec!(500)).await.unwrap();
        stack
            .ledger
            .place_bet(&make_bet(
                "bet-400",
                "evt-400",
                MarketKind::Moneyline,
                Selection::Team("Boston Celtics".to_string()),
                None,
                dec!(100),
                120,
            ))
            .await
            .unwrap();

        // The scoreboard lists the teams the other way round; matching
        // still goes through and the right side gets paid.
        let scoreboard = ScriptedScoreboard {
            results: vec![GameResult {
                provider_game_id: "0022500045".to_string(),
                home_team: "Denver Nuggets".to_string(),
                away_team: "Boston Celtics".to_string(),
                home_score: 104,
                away_score: 112,
                completed: true,
            }],
        };
        let results = scoreboard.fetch_results().await.unwrap();
        let reports = stack.engine.apply_results(&results).await.unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].settled.len(), 1);

        assert_eq!(stack.ledger.balance("user-1").await.unwrap(), dec!(620));
        let stored = stack.ledger.bet("bet-400").await.unwrap().unwrap();
        assert_eq!(stored.outcome, BetOutcome::Win);
        assert_eq!(stored.actual_return, Some(dec!(220.00)));
        // Moneyline carries no line; the unmoved price yields flat CLV.
        assert_eq!(stored.opening_line, None);
        assert_eq!(stored.clv_prob, Some(0.0));
        assert_eq!(stored.beat_closing_line, Some(false));
    }
}
