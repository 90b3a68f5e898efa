//! Quote ingestion.
//!
//! Feed clients pull raw provider payloads and convert them into
//! canonical [`Quote`]s; the [`Normalizer`] then applies batch
//! staleness rejection and writes through the line history store,
//! which handles per-series deduplication and opening tags.

pub mod oddsapi;
pub mod scoreboard;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::fmt;
use tracing::{info, warn};

use crate::history::{LineHistory, Recorded};
use crate::types::{Event, FinalOutcome, LinesmithError, Quote};

// ---------------------------------------------------------------------------
// Feed traits
// ---------------------------------------------------------------------------

/// A source of betting quotes for one sport.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QuoteFeed: Send + Sync {
    /// Fetch the current odds board for a sport, already converted to
    /// canonical events and quotes.
    async fn fetch_quotes(&self, sport_key: &str) -> Result<(Vec<Event>, Vec<Quote>)>;

    /// Feed name for logging.
    fn name(&self) -> &str;
}

/// A source of final game results.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OutcomeFeed: Send + Sync {
    /// Fetch today's results, completed or in progress.
    async fn fetch_results(&self) -> Result<Vec<GameResult>>;

    /// Feed name for logging.
    fn name(&self) -> &str;
}

/// One game's scoreline as reported by a results feed. Carries the
/// provider's own game id; matching against our event ids happens by
/// team names at settlement time.
#[derive(Debug, Clone)]
pub struct GameResult {
    pub provider_game_id: String,
    pub home_team: String,
    pub away_team: String,
    pub home_score: i64,
    pub away_score: i64,
    pub completed: bool,
}

impl GameResult {
    /// Whether this result belongs to the given event. Results and
    /// odds feeds disagree on game ids, so matching goes by team
    /// names; home/away order is not trusted either, since
    /// neutral-site listings flip it.
    pub fn matches_event(&self, event: &Event) -> bool {
        let straight = self.home_team.eq_ignore_ascii_case(&event.home_team)
            && self.away_team.eq_ignore_ascii_case(&event.away_team);
        let flipped = self.home_team.eq_ignore_ascii_case(&event.away_team)
            && self.away_team.eq_ignore_ascii_case(&event.home_team);
        straight || flipped
    }

    /// Re-key this result under one of our event ids.
    pub fn to_outcome(&self, event_id: &str) -> FinalOutcome {
        FinalOutcome {
            event_id: event_id.to_string(),
            home_team: self.home_team.clone(),
            away_team: self.away_team.clone(),
            home_score: self.home_score,
            away_score: self.away_score,
            completed: self.completed,
        }
    }
}

impl fmt::Display for GameResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} @ {} {}{}",
            self.away_team,
            self.away_score,
            self.home_team,
            self.home_score,
            if self.completed { " (final)" } else { "" },
        )
    }
}

// ---------------------------------------------------------------------------
// Normalizer
// ---------------------------------------------------------------------------

/// Outcome of one ingested batch.
#[derive(Debug, Clone, Copy, Default)]
pub struct IngestReport {
    pub events: usize,
    pub accepted: usize,
    pub deduplicated: usize,
    pub total: usize,
}

impl fmt::Display for IngestReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} events, {} quotes accepted, {} duplicates ({} in batch)",
            self.events, self.accepted, self.deduplicated, self.total,
        )
    }
}

/// Validates provider batches and writes them through the history
/// store.
#[derive(Clone)]
pub struct Normalizer {
    history: LineHistory,
    staleness: Duration,
}

impl Normalizer {
    pub fn new(history: LineHistory, staleness_minutes: i64) -> Self {
        Self {
            history,
            staleness: Duration::minutes(staleness_minutes),
        }
    }

    /// Ingest one provider batch. The batch is rejected whole when a
    /// majority of its quotes predate the staleness threshold; a feed
    /// that far behind is not trusted for any of its rows.
    pub async fn ingest(&self, events: &[Event], quotes: &[Quote]) -> Result<IngestReport> {
        let total = quotes.len();
        let cutoff = Utc::now() - self.staleness;
        let stale = quotes.iter().filter(|q| q.observed_at < cutoff).count();
        if stale * 2 > total {
            warn!(stale, total, "Batch rejected as stale");
            return Err(LinesmithError::StaleBatch { stale, total }.into());
        }

        for event in events {
            self.history.upsert_event(event).await?;
        }

        let mut report = IngestReport {
            events: events.len(),
            total,
            ..Default::default()
        };
        for quote in quotes {
            match self.history.record(quote).await? {
                Recorded::Inserted => report.accepted += 1,
                Recorded::Deduplicated => report.deduplicated += 1,
            }
        }

        info!(
            events = report.events,
            accepted = report.accepted,
            deduplicated = report.deduplicated,
            total = report.total,
            "Batch ingested"
        );
        Ok(report)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;
    use crate::types::{EventStatus, MarketKind};
    use chrono::DateTime;
    use rust_decimal_macros::dec;

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

    fn make_quote(event_id: &str, price: i32, observed_at: DateTime<Utc>) -> Quote {
        Quote {
            event_id: event_id.to_string(),
            market: MarketKind::Spread,
            outcome_name: "Boston Celtics".to_string(),
            bookmaker: "draftkings".to_string(),
            price,
            line: Some(dec!(-4.5)),
            observed_at,
            is_opening: false,
            is_closing: false,
            is_live: false,
        }
    }

    async fn normalizer() -> Normalizer {
        let db = Database::connect_in_memory().await.unwrap();
        db.migrate().await.unwrap();
        Normalizer::new(LineHistory::new(db), 30)
    }

    #[tokio::test]
    async fn test_fresh_batch_accepted() {
        let normalizer = normalizer().await;
        let now = Utc::now();
        let events = vec![make_event("evt-1", now + Duration::hours(3))];
        let quotes = vec![
            make_quote("evt-1", -110, now - Duration::minutes(2)),
            make_quote("evt-1", -110, now - Duration::minutes(1)),
        ];

        let report = normalizer.ingest(&events, &quotes).await.unwrap();
        assert_eq!(report.events, 1);
        assert_eq!(report.accepted, 1);
        assert_eq!(report.deduplicated, 1);
        assert_eq!(report.total, 2);
    }

    #[tokio::test]
    async fn test_stale_majority_rejects_whole_batch() {
        let normalizer = normalizer().await;
        let now = Utc::now();
        let events = vec![make_event("evt-1", now + Duration::hours(3))];
        let quotes = vec![
            make_quote("evt-1", -110, now - Duration::hours(2)),
            make_quote("evt-1", -112, now - Duration::hours(3)),
            make_quote("evt-1", -114, now - Duration::minutes(1)),
        ];

        let err = normalizer.ingest(&events, &quotes).await.unwrap_err();
        match err.downcast_ref::<LinesmithError>() {
            Some(LinesmithError::StaleBatch { stale, total }) => {
                assert_eq!(*stale, 2);
                assert_eq!(*total, 3);
            }
            other => panic!("Unexpected error: {other:?}"),
        }

        // Nothing from the batch may land, fresh rows included.
        let entries = normalizer
            .history
            .history("evt-1", MarketKind::Spread, "Boston Celtics")
            .await
            .unwrap();
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn test_stale_minority_tolerated() {
        let normalizer = normalizer().await;
        let now = Utc::now();
        let events = vec![make_event("evt-1", now + Duration::hours(3))];
        let quotes = vec![
            make_quote("evt-1", -110, now - Duration::hours(2)),
            make_quote("evt-1", -112, now - Duration::minutes(5)),
            make_quote("evt-1", -114, now - Duration::minutes(1)),
        ];

        let report = normalizer.ingest(&events, &quotes).await.unwrap();
        assert_eq!(report.accepted, 3);
    }

    #[tokio::test]
    async fn test_empty_batch_is_a_noop() {
        let normalizer = normalizer().await;
        let report = normalizer.ingest(&[], &[]).await.unwrap();
        assert_eq!(report.total, 0);
        assert_eq!(report.accepted, 0);
    }

    #[test]
    fn test_result_matches_event_by_team_names() {
        let event = make_event("evt-1", Utc::now());
        let result = GameResult {
            provider_game_id: "0022400123".to_string(),
            home_team: "Boston Celtics".to_string(),
            away_team: "Denver Nuggets".to_string(),
            home_score: 110,
            away_score: 102,
            completed: true,
        };
        assert!(result.matches_event(&event));

        // Home/away flipped still matches.
        let mut flipped = result.clone();
        std::mem::swap(&mut flipped.home_team, &mut flipped.away_team);
        assert!(flipped.matches_event(&event));

        let mut other = result.clone();
        other.away_team = "LA Lakers".to_string();
        assert!(!other.matches_event(&event));
    }

    #[test]
    fn test_result_to_outcome_rekeys_event_id() {
        let result = GameResult {
            provider_game_id: "0022400123".to_string(),
            home_team: "Boston Celtics".to_string(),
            away_team: "Denver Nuggets".to_string(),
            home_score: 110,
            away_score: 102,
            completed: true,
        };
        let outcome = result.to_outcome("evt-1");
        assert_eq!(outcome.event_id, "evt-1");
        assert_eq!(outcome.winner(), Some("Boston Celtics"));
        assert_eq!(outcome.total_points(), 212);
    }

    #[tokio::test]
    async fn test_ingest_through_mock_feed() {
        let normalizer = normalizer().await;
        let now = Utc::now();

        let mut feed = MockQuoteFeed::new();
        feed.expect_fetch_quotes()
            .withf(|sport| sport == "basketball_nba")
            .returning(move |_| {
                Ok((
                    vec![make_event("evt-9", now + Duration::hours(1))],
                    vec![make_quote("evt-9", -105, now)],
                ))
            });
        feed.expect_name().return_const("mock".to_string());

        let (events, quotes) = feed.fetch_quotes("basketball_nba").await.unwrap();
        let report = normalizer.ingest(&events, &quotes).await.unwrap();
        assert_eq!(report.accepted, 1);
        assert_eq!(feed.name(), "mock");
    }
}
