//! Line history store: append-only quote ledger with opening/closing
//! identification.
//!
//! Quotes are write-once. The only post-insert mutations are the
//! opening tag (which follows the earliest observation for a series,
//! even under out-of-order arrival) and the closing tag (set once by
//! `mark_closing`, then immutable). Everything else — movement,
//! signals, CLV — is derived on read.
//!
//! A "series" is one (event, market, bookmaker, outcome) price
//! history.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::collections::HashMap;
use std::str::FromStr;
use tracing::{debug, info};

use crate::analytics;
use crate::storage::Database;
use crate::types::{
    Event, EventStatus, LineHistoryEntry, LinesmithError, MarketKind, Movement, Quote,
};

/// Result of recording a single quote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recorded {
    Inserted,
    /// Identical to the most recent stored quote for the series; not
    /// written.
    Deduplicated,
}

/// Append-only store of canonical quotes and the events they belong to.
#[derive(Clone)]
pub struct LineHistory {
    db: Database,
}

impl LineHistory {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    // -- Events ----------------------------------------------------------

    /// Insert or refresh an event's identity. Status is preserved on
    /// conflict; commence times occasionally shift before tip-off, so
    /// those update.
    pub async fn upsert_event(&self, event: &Event) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO events (id, sport_key, home_team, away_team, commence_time, status)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (id) DO UPDATE SET
                sport_key = excluded.sport_key,
                home_team = excluded.home_team,
                away_team = excluded.away_team,
                commence_time = excluded.commence_time
            "#,
        )
        .bind(&event.id)
        .bind(&event.sport_key)
        .bind(&event.home_team)
        .bind(&event.away_team)
        .bind(event.commence_time)
        .bind(event.status.to_string())
        .execute(self.db.pool())
        .await
        .context("Failed to upsert event")?;
        Ok(())
    }

    /// Look up an event by id.
    pub async fn event(&self, event_id: &str) -> Result<Option<Event>> {
        let row = sqlx::query("SELECT * FROM events WHERE id = ?")
            .bind(event_id)
            .fetch_optional(self.db.pool())
            .await
            .context("Failed to fetch event")?;
        row.map(|r| row_to_event(&r)).transpose()
    }

    /// Update an event's lifecycle status.
    pub async fn set_event_status(&self, event_id: &str, status: EventStatus) -> Result<()> {
        sqlx::query("UPDATE events SET status = ? WHERE id = ?")
            .bind(status.to_string())
            .bind(event_id)
            .execute(self.db.pool())
            .await
            .context("Failed to update event status")?;
        Ok(())
    }

    /// Events that have not yet been settled/completed.
    pub async fn open_events(&self) -> Result<Vec<Event>> {
        let rows = sqlx::query(
            "SELECT * FROM events WHERE status != 'completed' ORDER BY commence_time",
        )
        .fetch_all(self.db.pool())
        .await
        .context("Failed to fetch open events")?;
        rows.iter().map(row_to_event).collect()
    }

    // -- Quotes ----------------------------------------------------------

    /// Append one quote. Skips the insert when the quote is identical
    /// (price and line) to the most recent stored quote for its
    /// series. Maintains the opening tag and the live marker.
    pub async fn record(&self, quote: &Quote) -> Result<Recorded> {
        let mut tx = self.db.pool().begin().await?;

        // Dedup against the most recent quote of the series.
        let last = sqlx::query(
            r#"
            SELECT price, line FROM quotes
            WHERE event_id = ? AND market_key = ? AND bookmaker = ? AND outcome_name = ?
            ORDER BY observed_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(&quote.event_id)
        .bind(quote.market.as_str())
        .bind(&quote.bookmaker)
        .bind(&quote.outcome_name)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(row) = last {
            let last_price: i32 = row.get("price");
            let last_line = parse_opt_decimal(row.get::<Option<String>, _>("line"))?;
            if last_price == quote.price && last_line == quote.line {
                debug!(
                    event_id = %quote.event_id,
                    bookmaker = %quote.bookmaker,
                    outcome = %quote.outcome_name,
                    "Duplicate quote skipped"
                );
                return Ok(Recorded::Deduplicated);
            }
        }

        // Live marker: observed at/after the event's commence time.
        let commence: Option<DateTime<Utc>> =
            sqlx::query("SELECT commence_time FROM events WHERE id = ?")
                .bind(&quote.event_id)
                .fetch_optional(&mut *tx)
                .await?
                .map(|r| r.get("commence_time"));
        let is_live = commence.is_some_and(|c| quote.observed_at >= c);

        // Opening tag follows the earliest observation of the series.
        let current_opening = sqlx::query(
            r#"
            SELECT id, observed_at FROM quotes
            WHERE event_id = ? AND market_key = ? AND bookmaker = ? AND outcome_name = ?
              AND is_opening = 1
            "#,
        )
        .bind(&quote.event_id)
        .bind(quote.market.as_str())
        .bind(&quote.bookmaker)
        .bind(&quote.outcome_name)
        .fetch_optional(&mut *tx)
        .await?;

        let is_opening = match current_opening {
            None => true,
            Some(row) => {
                let opened_at: DateTime<Utc> = row.get("observed_at");
                if quote.observed_at < opened_at {
                    let prior_id: i64 = row.get("id");
                    sqlx::query("UPDATE quotes SET is_opening = 0 WHERE id = ?")
                        .bind(prior_id)
                        .execute(&mut *tx)
                        .await?;
                    true
                } else {
                    false
                }
            }
        };

        sqlx::query(
            r#"
            INSERT INTO quotes
                (event_id, market_key, outcome_name, bookmaker, price, line,
                 observed_at, is_opening, is_closing, is_live)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0, ?)
            "#,
        )
        .bind(&quote.event_id)
        .bind(quote.market.as_str())
        .bind(&quote.outcome_name)
        .bind(&quote.bookmaker)
        .bind(quote.price)
        .bind(quote.line.map(|l| l.to_string()))
        .bind(quote.observed_at)
        .bind(is_opening)
        .bind(is_live)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Recorded::Inserted)
    }

    /// Ordered quote history for (event, market, outcome) across all
    /// bookmakers, each entry carrying its movement since that
    /// bookmaker's opening quote.
    pub async fn history(
        &self,
        event_id: &str,
        market: MarketKind,
        outcome_name: &str,
    ) -> Result<Vec<LineHistoryEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM quotes
            WHERE event_id = ? AND market_key = ? AND outcome_name = ?
            ORDER BY observed_at ASC, id ASC
            "#,
        )
        .bind(event_id)
        .bind(market.as_str())
        .bind(outcome_name)
        .fetch_all(self.db.pool())
        .await
        .context("Failed to fetch quote history")?;

        let quotes: Vec<Quote> = rows.iter().map(row_to_quote).collect::<Result<_>>()?;

        let openings: HashMap<String, Quote> = quotes
            .iter()
            .filter(|q| q.is_opening)
            .map(|q| (q.bookmaker.clone(), q.clone()))
            .collect();

        Ok(quotes
            .into_iter()
            .map(|quote| {
                let movement_from_open = if quote.is_opening {
                    None
                } else {
                    openings.get(&quote.bookmaker).map(|open| Movement {
                        cents: analytics::cents_moved(open.price, quote.price),
                        points: match (open.line, quote.line) {
                            (Some(from), Some(to)) => Some(to - from),
                            _ => None,
                        },
                    })
                };
                LineHistoryEntry {
                    quote,
                    movement_from_open,
                }
            })
            .collect())
    }

    /// All quotes for an (event, market) pair, every outcome and
    /// bookmaker, observation order. Detector input.
    pub async fn quotes_for_market(
        &self,
        event_id: &str,
        market: MarketKind,
    ) -> Result<Vec<Quote>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM quotes
            WHERE event_id = ? AND market_key = ?
            ORDER BY observed_at ASC, id ASC
            "#,
        )
        .bind(event_id)
        .bind(market.as_str())
        .fetch_all(self.db.pool())
        .await
        .context("Failed to fetch market quotes")?;
        rows.iter().map(row_to_quote).collect()
    }

    /// Tag the closing quote of every series of this event: the last
    /// quote observed strictly before commence time. Series already
    /// carrying a closing tag are left untouched, as are quotes at or
    /// after commence ("live" quotes). Returns how many series were
    /// tagged.
    pub async fn mark_closing(&self, event_id: &str) -> Result<usize> {
        let event = self
            .event(event_id)
            .await?
            .ok_or_else(|| LinesmithError::UnknownEvent(event_id.to_string()))?;

        let series = sqlx::query(
            r#"
            SELECT DISTINCT market_key, bookmaker, outcome_name
            FROM quotes WHERE event_id = ?
            "#,
        )
        .bind(event_id)
        .fetch_all(self.db.pool())
        .await
        .context("Failed to enumerate quote series")?;

        let mut tagged = 0usize;
        for s in &series {
            let market_key: String = s.get("market_key");
            let bookmaker: String = s.get("bookmaker");
            let outcome_name: String = s.get("outcome_name");

            let already = sqlx::query(
                r#"
                SELECT 1 FROM quotes
                WHERE event_id = ? AND market_key = ? AND bookmaker = ? AND outcome_name = ?
                  AND is_closing = 1
                LIMIT 1
                "#,
            )
            .bind(event_id)
            .bind(&market_key)
            .bind(&bookmaker)
            .bind(&outcome_name)
            .fetch_optional(self.db.pool())
            .await?;
            if already.is_some() {
                continue;
            }

            let result = sqlx::query(
                r#"
                UPDATE quotes SET is_closing = 1
                WHERE id = (
                    SELECT id FROM quotes
                    WHERE event_id = ? AND market_key = ? AND bookmaker = ? AND outcome_name = ?
                      AND observed_at < ?
                    ORDER BY observed_at DESC, id DESC
                    LIMIT 1
                )
                "#,
            )
            .bind(event_id)
            .bind(&market_key)
            .bind(&bookmaker)
            .bind(&outcome_name)
            .bind(event.commence_time)
            .execute(self.db.pool())
            .await?;

            tagged += result.rows_affected() as usize;
        }

        info!(event_id, series = series.len(), tagged, "Closing quotes tagged");
        Ok(tagged)
    }

    /// The opening quote of a series, if any quotes exist.
    pub async fn opening_quote(
        &self,
        event_id: &str,
        market: MarketKind,
        bookmaker: &str,
        outcome_name: &str,
    ) -> Result<Option<Quote>> {
        self.tagged_quote(event_id, market, bookmaker, outcome_name, "is_opening")
            .await
    }

    /// The closing quote of a series. None until `mark_closing` has
    /// run for the event (or when every quote arrived post-commence).
    pub async fn closing_quote(
        &self,
        event_id: &str,
        market: MarketKind,
        bookmaker: &str,
        outcome_name: &str,
    ) -> Result<Option<Quote>> {
        self.tagged_quote(event_id, market, bookmaker, outcome_name, "is_closing")
            .await
    }

    async fn tagged_quote(
        &self,
        event_id: &str,
        market: MarketKind,
        bookmaker: &str,
        outcome_name: &str,
        flag: &str,
    ) -> Result<Option<Quote>> {
        let sql = format!(
            r#"
            SELECT * FROM quotes
            WHERE event_id = ? AND market_key = ? AND bookmaker = ? AND outcome_name = ?
              AND {flag} = 1
            LIMIT 1
            "#,
        );
        let row = sqlx::query(&sql)
            .bind(event_id)
            .bind(market.as_str())
            .bind(bookmaker)
            .bind(outcome_name)
            .fetch_optional(self.db.pool())
            .await
            .context("Failed to fetch tagged quote")?;
        row.map(|r| row_to_quote(&r)).transpose()
    }
}

// -- Row mapping ---------------------------------------------------------

fn row_to_event(row: &SqliteRow) -> Result<Event> {
    let status: String = row.get("status");
    Ok(Event {
        id: row.get("id"),
        sport_key: row.get("sport_key"),
        home_team: row.get("home_team"),
        away_team: row.get("away_team"),
        commence_time: row.get("commence_time"),
        status: status.parse()?,
    })
}

pub(crate) fn row_to_quote(row: &SqliteRow) -> Result<Quote> {
    let market: String = row.get("market_key");
    Ok(Quote {
        event_id: row.get("event_id"),
        market: market.parse()?,
        outcome_name: row.get("outcome_name"),
        bookmaker: row.get("bookmaker"),
        price: row.get("price"),
        line: parse_opt_decimal(row.get::<Option<String>, _>("line"))?,
        observed_at: row.get("observed_at"),
        is_opening: row.get("is_opening"),
        is_closing: row.get("is_closing"),
        is_live: row.get("is_live"),
    })
}

pub(crate) fn parse_opt_decimal(text: Option<String>) -> Result<Option<Decimal>> {
    text.map(|t| {
        Decimal::from_str(&t).with_context(|| format!("Invalid decimal in storage: {t}"))
    })
    .transpose()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
