//! Steam move detection.
//!
//! A steam move is the same side of the same market moving sharply at
//! several independent books inside a short window — the classic
//! footprint of sharp money hitting the market. Detection compares
//! each quote to its series' state at the start of the window, so a
//! book that walks its line up in quarter-point steps still counts.
//!
//! Live (post-commence) quotes are excluded: in-play lines chase the
//! scoreboard, not sharp action.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use tracing::debug;

use super::SignalConfig;
use crate::analytics;
use crate::types::{MarketKind, Quote};

/// Direction of a correlated move. For spread/total markets this is
/// the line itself; for moneylines it is implied probability (up =
/// price shortening).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveDirection {
    Up,
    Down,
}

impl fmt::Display for MoveDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MoveDirection::Up => write!(f, "up"),
            MoveDirection::Down => write!(f, "down"),
        }
    }
}

/// One detected steam event. Advisory and recomputable.
#[derive(Debug, Clone, Serialize)]
pub struct SteamAlert {
    pub event_id: String,
    pub market: MarketKind,
    pub outcome_name: String,
    pub direction: MoveDirection,
    pub bookmakers: Vec<String>,
    pub detected_at: DateTime<Utc>,
}

impl fmt::Display for SteamAlert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "steam on {} {} ({}): {} books moved {} at {}",
            self.event_id,
            self.market,
            self.outcome_name,
            self.bookmakers.len(),
            self.direction,
            self.detected_at.format("%H:%M:%S"),
        )
    }
}

/// A significant single-book move, the raw material for steam.
#[derive(Debug, Clone)]
struct Move {
    outcome_name: String,
    bookmaker: String,
    direction: MoveDirection,
    at: DateTime<Utc>,
}

/// Scan one market's quotes for correlated moves. At most one alert
/// per (outcome, direction), anchored at the moment the bookmaker
/// count first reaches the threshold.
pub fn detect(quotes: &[Quote], config: &SignalConfig) -> Vec<SteamAlert> {
    let pregame: Vec<&Quote> = quotes.iter().filter(|q| !q.is_live).collect();
    let Some(first) = pregame.first() else {
        return Vec::new();
    };
    let event_id = first.event_id.clone();
    let market = first.market;

    // Series keyed by (outcome, bookmaker), in observation order.
    let mut series: HashMap<(String, String), Vec<&Quote>> = HashMap::new();
    for &quote in &pregame {
        series
            .entry((quote.outcome_name.clone(), quote.bookmaker.clone()))
            .or_default()
            .push(quote);
    }

    let mut moves: Vec<Move> = Vec::new();
    for ((outcome_name, bookmaker), track) in &series {
        for (i, current) in track.iter().enumerate() {
            let window_start = current.observed_at - config.steam_window;
            // Net move versus the series' earliest quote inside the
            // window, so incremental walks still register.
            let Some(base) = track[..i].iter().find(|q| q.observed_at > window_start) else {
                continue;
            };
            if let Some(direction) = significant_move(base, current, market, config) {
                moves.push(Move {
                    outcome_name: outcome_name.clone(),
                    bookmaker: bookmaker.clone(),
                    direction,
                    at: current.observed_at,
                });
            }
        }
    }
    moves.sort_by_key(|m| m.at);

    let mut alerts: Vec<SteamAlert> = Vec::new();
    let mut fired: HashSet<(String, MoveDirection)> = HashSet::new();
    for trigger in &moves {
        let key = (trigger.outcome_name.clone(), trigger.direction);
        if fired.contains(&key) {
            continue;
        }
        let window_start = trigger.at - config.steam_window;
        let books: HashSet<&str> = moves
            .iter()
            .filter(|m| {
                m.outcome_name == trigger.outcome_name
                    && m.direction == trigger.direction
                    && m.at > window_start
                    && m.at <= trigger.at
            })
            .map(|m| m.bookmaker.as_str())
            .collect();
        if books.len() >= config.steam_min_bookmakers {
            let mut bookmakers: Vec<String> = books.into_iter().map(String::from).collect();
            bookmakers.sort();
            debug!(
                event_id = %event_id,
                outcome = %trigger.outcome_name,
                direction = %trigger.direction,
                books = bookmakers.len(),
                "Steam move detected"
            );
            alerts.push(SteamAlert {
                event_id: event_id.clone(),
                market,
                outcome_name: trigger.outcome_name.clone(),
                direction: trigger.direction,
                bookmakers,
                detected_at: trigger.at,
            });
            fired.insert(key);
        }
    }
    alerts
}

/// Direction of the base→current move when it clears the configured
/// magnitude, else None.
fn significant_move(
    base: &Quote,
    current: &Quote,
    market: MarketKind,
    config: &SignalConfig,
) -> Option<MoveDirection> {
    if market.has_line() {
        let delta = current.line? - base.line?;
        if delta >= config.steam_min_points {
            Some(MoveDirection::Up)
        } else if delta <= -config.steam_min_points {
            Some(MoveDirection::Down)
        } else {
            None
        }
    } else {
        let cents = analytics::cents_moved(base.price, current.price);
        if cents >= config.steam_min_cents {
            Some(MoveDirection::Up)
        } else if cents <= -config.steam_min_cents {
            Some(MoveDirection::Down)
        } else {
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
