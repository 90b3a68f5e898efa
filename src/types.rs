//! Shared types for the LINESMITH engine.
//!
//! These types form the data model used across all modules.
//! They are designed to be stable so that ingest, history, signal,
//! settlement, and ledger modules can depend on them without
//! circular references.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Markets & selections
// ---------------------------------------------------------------------------

/// The kind of betting market a quote or bet refers to.
///
/// This is the dispatch key for settlement: every win/loss/push rule
/// branches on it exactly once, in `settlement::determine_outcome`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketKind {
    Moneyline,
    Spread,
    Total,
}

impl MarketKind {
    /// All known market kinds (useful for iteration).
    pub const ALL: &'static [MarketKind] = &[
        MarketKind::Moneyline,
        MarketKind::Spread,
        MarketKind::Total,
    ];

    /// Canonical name used in storage and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketKind::Moneyline => "moneyline",
            MarketKind::Spread => "spread",
            MarketKind::Total => "total",
        }
    }

    /// The market key used by odds providers ("h2h" | "spreads" | "totals").
    pub fn provider_key(&self) -> &'static str {
        match self {
            MarketKind::Moneyline => "h2h",
            MarketKind::Spread => "spreads",
            MarketKind::Total => "totals",
        }
    }

    /// Whether this market carries a point line (spread/total).
    pub fn has_line(&self) -> bool {
        !matches!(self, MarketKind::Moneyline)
    }
}

impl fmt::Display for MarketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Parse a market kind from either the canonical name or the
/// provider key (case-insensitive).
impl std::str::FromStr for MarketKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "moneyline" | "h2h" | "ml" => Ok(MarketKind::Moneyline),
            "spread" | "spreads" => Ok(MarketKind::Spread),
            "total" | "totals" => Ok(MarketKind::Total),
            _ => Err(anyhow::anyhow!("Unknown market kind: {s}")),
        }
    }
}

/// The side of a market a quote or bet is on.
///
/// Moneyline and spread selections name a team; total selections are
/// over/under. Stored as plain text ("Over", "Under", or the team name).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Selection {
    Team(String),
    Over,
    Under,
}

impl Selection {
    /// Parse from stored/provider text. "Over"/"Under" are reserved
    /// words; anything else is a team name.
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "over" => Selection::Over,
            "under" => Selection::Under,
            _ => Selection::Team(s.to_string()),
        }
    }

    /// Whether this selection names the given team (case-insensitive).
    pub fn is_team(&self, team: &str) -> bool {
        match self {
            Selection::Team(name) => name.eq_ignore_ascii_case(team),
            _ => false,
        }
    }
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selection::Team(name) => write!(f, "{name}"),
            Selection::Over => write!(f, "Over"),
            Selection::Under => write!(f, "Under"),
        }
    }
}

// ---------------------------------------------------------------------------
// Quotes & line history
// ---------------------------------------------------------------------------

/// A canonical betting-line quote. Immutable once recorded: the only
/// fields ever touched after insert are the opening/closing tags, and
/// those are managed exclusively by the line history store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub event_id: String,
    pub market: MarketKind,
    /// Outcome the price is for (team name, "Over", "Under").
    pub outcome_name: String,
    pub bookmaker: String,
    /// American odds (e.g. -110, +145).
    pub price: i32,
    /// Point line for spread/total markets; None for moneyline.
    pub line: Option<Decimal>,
    pub observed_at: DateTime<Utc>,
    /// Earliest quote for this (event, market, bookmaker, outcome).
    pub is_opening: bool,
    /// Latest quote strictly before the event's commence time.
    /// Set only by `mark_closing`, immutable once set.
    pub is_closing: bool,
    /// Observed at or after commence time; informational only.
    pub is_live: bool,
}

impl Quote {
    /// Implied probability of this quote's price.
    pub fn implied_probability(&self) -> f64 {
        crate::analytics::implied_probability(self.price)
    }

    /// Storage key shared by quotes in the same price series.
    pub fn series_key(&self) -> (&str, MarketKind, &str, &str) {
        (
            self.event_id.as_str(),
            self.market,
            self.bookmaker.as_str(),
            self.outcome_name.as_str(),
        )
    }
}

impl fmt::Display for Quote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let price_str = if self.price > 0 {
            format!("+{}", self.price)
        } else {
            format!("{}", self.price)
        };
        match self.line {
            Some(line) => write!(
                f,
                "[{}] {} {} {} {} @ {}",
                self.bookmaker, self.market, self.outcome_name, line, price_str, self.observed_at,
            ),
            None => write!(
                f,
                "[{}] {} {} {} @ {}",
                self.bookmaker, self.market, self.outcome_name, price_str, self.observed_at,
            ),
        }
    }
}

/// Movement of a quote relative to the opening quote of its series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Movement {
    /// Price movement in American-odds cents (positive = price
    /// shortened, i.e. implied probability rose since open).
    pub cents: i32,
    /// Point-line movement for spread/total (current - opening).
    pub points: Option<Decimal>,
}

impl fmt::Display for Movement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.points {
            Some(p) => write!(f, "{:+}¢ / {:+} pts", self.cents, p),
            None => write!(f, "{:+}¢", self.cents),
        }
    }
}

/// A quote joined with its movement since the series opened.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineHistoryEntry {
    pub quote: Quote,
    /// None for the opening quote itself.
    pub movement_from_open: Option<Movement>,
}

// ---------------------------------------------------------------------------
// Events & final outcomes
// ---------------------------------------------------------------------------

/// Lifecycle of an external game/match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Scheduled,
    Live,
    Completed,
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventStatus::Scheduled => write!(f, "scheduled"),
            EventStatus::Live => write!(f, "live"),
            EventStatus::Completed => write!(f, "completed"),
        }
    }
}

impl std::str::FromStr for EventStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "scheduled" => Ok(EventStatus::Scheduled),
            "live" => Ok(EventStatus::Live),
            "completed" => Ok(EventStatus::Completed),
            _ => Err(anyhow::anyhow!("Unknown event status: {s}")),
        }
    }
}

/// An external game/match that markets and bets reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    /// Provider sport key, e.g. "basketball_nba".
    pub sport_key: String,
    pub home_team: String,
    pub away_team: String,
    pub commence_time: DateTime<Utc>,
    pub status: EventStatus,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} @ {} ({}, {})",
            self.sport_key, self.away_team, self.home_team, self.commence_time, self.status,
        )
    }
}

impl Event {
    /// Whether a quote observed at `at` counts as pre-game.
    pub fn is_pregame(&self, at: DateTime<Utc>) -> bool {
        at < self.commence_time
    }
}

/// Normalized completion facts from the outcome feed.
///
/// `completed` must be true before settlement will act on it; a feed
/// row with missing scores never becomes a `FinalOutcome`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalOutcome {
    pub event_id: String,
    pub home_team: String,
    pub away_team: String,
    pub home_score: i64,
    pub away_score: i64,
    pub completed: bool,
}

impl FinalOutcome {
    /// The winning team, or None on a tie.
    pub fn winner(&self) -> Option<&str> {
        match self.home_score.cmp(&self.away_score) {
            std::cmp::Ordering::Greater => Some(self.home_team.as_str()),
            std::cmp::Ordering::Less => Some(self.away_team.as_str()),
            std::cmp::Ordering::Equal => None,
        }
    }

    /// Combined final score (for total markets).
    pub fn total_points(&self) -> i64 {
        self.home_score + self.away_score
    }

    /// Score differential from the named team's perspective
    /// (positive = that team won by the margin). None if the team is
    /// not part of this outcome.
    pub fn margin_for(&self, team: &str) -> Option<i64> {
        if self.home_team.eq_ignore_ascii_case(team) {
            Some(self.home_score - self.away_score)
        } else if self.away_team.eq_ignore_ascii_case(team) {
            Some(self.away_score - self.home_score)
        } else {
            None
        }
    }
}

impl fmt::Display for FinalOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} — {} {}{}",
            self.away_team,
            self.away_score,
            self.home_team,
            self.home_score,
            if self.completed { " (final)" } else { "" },
        )
    }
}

// ---------------------------------------------------------------------------
// Bets
// ---------------------------------------------------------------------------

/// Bet lifecycle state. `Pending` is the only non-terminal state;
/// a bet transitions out of it exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BetOutcome {
    Pending,
    Win,
    Loss,
    Push,
}

impl BetOutcome {
    /// Whether this state admits no further transitions.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, BetOutcome::Pending)
    }
}

impl fmt::Display for BetOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BetOutcome::Pending => write!(f, "pending"),
            BetOutcome::Win => write!(f, "win"),
            BetOutcome::Loss => write!(f, "loss"),
            BetOutcome::Push => write!(f, "push"),
        }
    }
}

impl std::str::FromStr for BetOutcome {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(BetOutcome::Pending),
            "win" | "won" => Ok(BetOutcome::Win),
            "loss" | "lost" => Ok(BetOutcome::Loss),
            "push" => Ok(BetOutcome::Push),
            _ => Err(anyhow::anyhow!("Unknown bet outcome: {s}")),
        }
    }
}

/// A recorded wager. Created `pending` by the bet-logging path;
/// the terminal transition belongs exclusively to the settlement
/// engine. Once `settled_at` is set the row is immutable apart from
/// best-effort CLV backfill.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bet {
    pub id: String,
    pub user_id: String,
    pub event_id: String,
    pub market: MarketKind,
    pub selection: Selection,
    /// The line taken at placement (spread/total); None for moneyline.
    pub line: Option<Decimal>,
    pub stake: Decimal,
    /// American odds taken at placement.
    pub price: i32,
    pub outcome: BetOutcome,
    pub placed_at: DateTime<Utc>,
    /// CLV backfill fields; None until a closing quote exists.
    pub opening_line: Option<Decimal>,
    pub closing_line: Option<Decimal>,
    pub clv_prob: Option<f64>,
    pub clv_points: Option<Decimal>,
    pub beat_closing_line: Option<bool>,
    /// Gross amount returned at settlement: stake × decimal odds on a
    /// win, stake on a push, zero on a loss.
    pub actual_return: Option<Decimal>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl Bet {
    /// Whether this bet has reached a terminal state.
    pub fn is_settled(&self) -> bool {
        self.outcome.is_terminal()
    }

    /// Implied probability of the price taken.
    pub fn implied_probability(&self) -> f64 {
        crate::analytics::implied_probability(self.price)
    }

    /// Net profit of a settled bet (actual_return - stake).
    pub fn net_profit(&self) -> Option<Decimal> {
        self.actual_return.map(|r| r - self.stake)
    }

    /// Helper to build a test bet with sensible defaults.
    #[cfg(test)]
    pub fn sample() -> Self {
        Bet {
            id: "bet-001".to_string(),
            user_id: "user-1".to_string(),
            event_id: "evt-001".to_string(),
            market: MarketKind::Spread,
            selection: Selection::Team("Boston Celtics".to_string()),
            line: Some(Decimal::new(-45, 1)),
            stake: Decimal::new(10000, 2),
            price: -110,
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
}

impl fmt::Display for Bet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let price_str = if self.price > 0 {
            format!("+{}", self.price)
        } else {
            format!("{}", self.price)
        };
        match self.line {
            Some(line) => write!(
                f,
                "[{}] {} {} {} {} ${} ({})",
                self.user_id, self.market, self.selection, line, price_str, self.stake, self.outcome,
            ),
            None => write!(
                f,
                "[{}] {} {} {} ${} ({})",
                self.user_id, self.market, self.selection, price_str, self.stake, self.outcome,
            ),
        }
    }
}

/// Settlement result surfaced to outbound collaborators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementResult {
    pub bet_id: String,
    pub outcome: BetOutcome,
    pub actual_return: Decimal,
}

impl fmt::Display for SettlementResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} (return ${})",
            self.bet_id, self.outcome, self.actual_return,
        )
    }
}

// ---------------------------------------------------------------------------
// Bankroll ledger
// ---------------------------------------------------------------------------

/// Category of a ledger row. Wagers are negative amounts, payouts and
/// deposits positive; adjustments carry either sign but always a note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Deposit,
    Withdrawal,
    Wager,
    Payout,
    Adjustment,
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionType::Deposit => write!(f, "deposit"),
            TransactionType::Withdrawal => write!(f, "withdrawal"),
            TransactionType::Wager => write!(f, "wager"),
            TransactionType::Payout => write!(f, "payout"),
            TransactionType::Adjustment => write!(f, "adjustment"),
        }
    }
}

impl std::str::FromStr for TransactionType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "deposit" => Ok(TransactionType::Deposit),
            "withdrawal" => Ok(TransactionType::Withdrawal),
            "wager" => Ok(TransactionType::Wager),
            "payout" => Ok(TransactionType::Payout),
            "adjustment" => Ok(TransactionType::Adjustment),
            _ => Err(anyhow::anyhow!("Unknown transaction type: {s}")),
        }
    }
}

/// An immutable bankroll ledger row. Never edited post-insert; the
/// cached account balance is always reproducible by summing these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BankrollTransaction {
    pub id: String,
    pub user_id: String,
    /// Signed amount applied to the balance.
    pub amount: Decimal,
    pub transaction_type: TransactionType,
    /// Cached balance immediately after this row was applied.
    pub balance_after: Decimal,
    pub bet_id: Option<String>,
    /// Required for adjustments; optional elsewhere.
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl fmt::Display for BankrollTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {:+} → balance ${}",
            self.user_id, self.transaction_type, self.amount, self.balance_after,
        )
    }
}

/// Result of comparing a user's cached balance against a full ledger
/// replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftReport {
    pub user_id: String,
    pub cached: Decimal,
    pub replayed: Decimal,
}

impl DriftReport {
    /// Cached minus replayed. Zero when the invariant holds.
    pub fn drift(&self) -> Decimal {
        self.cached - self.replayed
    }

    pub fn is_clean(&self) -> bool {
        self.cached == self.replayed
    }
}

impl fmt::Display for DriftReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_clean() {
            write!(f, "[{}] balance ${} verified", self.user_id, self.cached)
        } else {
            write!(
                f,
                "[{}] DRIFT: cached ${} vs replayed ${} (delta {:+})",
                self.user_id,
                self.cached,
                self.replayed,
                self.drift(),
            )
        }
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for LINESMITH.
#[derive(Debug, thiserror::Error)]
pub enum LinesmithError {
    #[error("Stale batch rejected: {stale} of {total} quotes predate the staleness threshold")]
    StaleBatch { stale: usize, total: usize },

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Unknown market key: {0}")]
    UnknownMarket(String),

    #[error("Unknown event: {0}")]
    UnknownEvent(String),

    #[error("Outcome feed incomplete for event {event_id}")]
    IncompleteOutcome { event_id: String },

    #[error("Bet {bet_id} already settled")]
    AlreadySettled { bet_id: String },

    #[error("Insufficient funds: need ${needed}, have ${available}")]
    InsufficientFunds { needed: Decimal, available: Decimal },

    #[error("Ledger drift for {user_id}: cached ${cached} vs replayed ${replayed}")]
    LedgerDrift {
        user_id: String,
        cached: Decimal,
        replayed: Decimal,
    },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
