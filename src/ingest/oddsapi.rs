//! The Odds API integration.
//!
//! Pulls American-odds boards (moneyline, spread, total) across US
//! bookmakers and converts them into canonical quotes.
//!
//! API docs: https://the-odds-api.com/liveapi/guides/v4/
//! Base URL: https://api.the-odds-api.com/v4/
//! Auth: `apiKey` query parameter; quota counted per market region.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::QuoteFeed;
use crate::types::{Event, EventStatus, MarketKind, Quote};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

const BASE_URL: &str = "https://api.the-odds-api.com/v4";
const FEED_NAME: &str = "the-odds-api";

/// Markets requested on every odds call.
const MARKETS: &str = "h2h,spreads,totals";

// ---------------------------------------------------------------------------
// API response types (The Odds API JSON → Rust)
// ---------------------------------------------------------------------------

/// One game with its odds board, as returned by `/v4/sports/{sport}/odds`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawEvent {
    pub id: String,
    pub sport_key: String,
    #[serde(default)]
    pub sport_title: String,
    pub commence_time: DateTime<Utc>,
    pub home_team: String,
    pub away_team: String,
    #[serde(default)]
    pub bookmakers: Vec<RawBookmaker>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawBookmaker {
    pub key: String,
    #[serde(default)]
    pub title: String,
    /// When this bookmaker's board was last refreshed upstream.
    #[serde(default)]
    pub last_update: Option<DateTime<Utc>>,
    #[serde(default)]
    pub markets: Vec<RawMarket>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawMarket {
    /// "h2h" | "spreads" | "totals" (plus keys we do not ingest).
    pub key: String,
    #[serde(default)]
    pub last_update: Option<DateTime<Utc>>,
    #[serde(default)]
    pub outcomes: Vec<RawOutcome>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawOutcome {
    /// Team name, or "Over"/"Under" for totals.
    pub name: String,
    /// American price. The API sends JSON numbers; tolerate floats.
    pub price: f64,
    /// Spread/total line.
    #[serde(default)]
    pub point: Option<f64>,
}

// ---------------------------------------------------------------------------
// Conversion
// ---------------------------------------------------------------------------

impl RawEvent {
    pub fn to_event(&self) -> Event {
        Event {
            id: self.id.clone(),
            sport_key: self.sport_key.clone(),
            home_team: self.home_team.clone(),
            away_team: self.away_team.clone(),
            commence_time: self.commence_time,
            status: EventStatus::Scheduled,
        }
    }

    /// Flatten the odds board into canonical quotes. Unknown market
    /// keys and unparseable prices are skipped with a warning rather
    /// than failing the event.
    pub fn to_quotes(&self, fetched_at: DateTime<Utc>) -> Vec<Quote> {
        let mut quotes = Vec::new();
        for bookmaker in &self.bookmakers {
            for market in &bookmaker.markets {
                let kind: MarketKind = match market.key.parse() {
                    Ok(kind) => kind,
                    Err(_) => {
                        warn!(
                            event_id = %self.id,
                            market_key = %market.key,
                            "Skipping unrecognized market key"
                        );
                        continue;
                    }
                };
                let observed_at = market
                    .last_update
                    .or(bookmaker.last_update)
                    .unwrap_or(fetched_at);

                for outcome in &market.outcomes {
                    let Some(price) = american_price(outcome.price) else {
                        warn!(
                            event_id = %self.id,
                            bookmaker = %bookmaker.key,
                            outcome = %outcome.name,
                            price = outcome.price,
                            "Skipping outcome with invalid American price"
                        );
                        continue;
                    };
                    quotes.push(Quote {
                        event_id: self.id.clone(),
                        market: kind,
                        outcome_name: outcome.name.clone(),
                        bookmaker: bookmaker.key.clone(),
                        price,
                        line: outcome.point.and_then(Decimal::from_f64_retain),
                        observed_at,
                        is_opening: false,
                        is_closing: false,
                        is_live: false,
                    });
                }
            }
        }
        quotes
    }
}

/// Validate and round a provider price to integer American odds.
/// American prices are always at least 100 in magnitude.
fn american_price(raw: f64) -> Option<i32> {
    if !raw.is_finite() {
        return None;
    }
    let price = raw.round() as i32;
    if price.abs() < 100 {
        return None;
    }
    Some(price)
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// The Odds API feed client.
pub struct TheOddsApiClient {
    http: Client,
    api_key: SecretString,
    regions: String,
}

impl TheOddsApiClient {
    pub fn new(api_key: SecretString, regions: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .user_agent("LINESMITH/0.1.0 (odds-ingest)")
            .build()
            .context("Failed to build HTTP client for The Odds API")?;

        Ok(Self {
            http,
            api_key,
            regions: regions.to_string(),
        })
    }

    async fn fetch_odds(&self, sport_key: &str) -> Result<Vec<RawEvent>> {
        let url = format!("{BASE_URL}/sports/{}/odds", urlencoding::encode(sport_key));
        debug!(url = %url, sport = sport_key, "Fetching odds board");

        let resp = self
            .http
            .get(&url)
            .query(&[
                ("apiKey", self.api_key.expose_secret().as_str()),
                ("regions", self.regions.as_str()),
                ("markets", MARKETS),
                ("oddsFormat", "american"),
                ("dateFormat", "iso"),
            ])
            .send()
            .await
            .context("Odds API request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Odds API error {status}: {body}");
        }

        let events: Vec<RawEvent> = resp
            .json()
            .await
            .context("Failed to parse Odds API response")?;
        Ok(events)
    }
}

// ---------------------------------------------------------------------------
// QuoteFeed trait implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl QuoteFeed for TheOddsApiClient {
    async fn fetch_quotes(&self, sport_key: &str) -> Result<(Vec<Event>, Vec<Quote>)> {
        let raw = self.fetch_odds(sport_key).await?;
        let fetched_at = Utc::now();

        let events: Vec<Event> = raw.iter().map(RawEvent::to_event).collect();
        let quotes: Vec<Quote> = raw
            .iter()
            .flat_map(|event| event.to_quotes(fetched_at))
            .collect();

        info!(
            sport = sport_key,
            events = events.len(),
            quotes = quotes.len(),
            "Odds board fetched"
        );
        Ok((events, quotes))
    }

    fn name(&self) -> &str {
        FEED_NAME
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
