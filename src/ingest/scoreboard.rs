//! NBA live scoreboard integration.
//!
//! Fetches today's scoreboard from the NBA CDN and reports final
//! scorelines for settlement. Games still in progress come back with
//! `completed = false` and are left alone by the settlement sweep.
//!
//! Endpoint: https://cdn.nba.com/static/json/liveData/scoreboard/todaysScoreboard_00.json
//! Auth: none; the feed is public.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info};

use super::{GameResult, OutcomeFeed};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

const SCOREBOARD_URL: &str =
    "https://cdn.nba.com/static/json/liveData/scoreboard/todaysScoreboard_00.json";
const FEED_NAME: &str = "nba-scoreboard";

/// `gameStatus` value for a finished game (1 scheduled, 2 live, 3 final).
const STATUS_FINAL: i64 = 3;

// ---------------------------------------------------------------------------
// API response types (NBA CDN JSON → Rust)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ScoreboardResponse {
    scoreboard: Scoreboard,
}

#[derive(Debug, Deserialize)]
struct Scoreboard {
    #[serde(default)]
    games: Vec<RawGame>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawGame {
    game_id: String,
    #[serde(default)]
    game_status: i64,
    #[serde(default)]
    game_status_text: String,
    home_team: RawTeam,
    away_team: RawTeam,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTeam {
    #[serde(default)]
    team_city: String,
    #[serde(default)]
    team_name: String,
    #[serde(default)]
    team_tricode: String,
    #[serde(default)]
    score: i64,
}

// ---------------------------------------------------------------------------
// Conversion
// ---------------------------------------------------------------------------

impl RawTeam {
    /// Full team name ("Boston Celtics"), matching how odds feeds
    /// label outcomes. Falls back to the tricode when city/name are
    /// absent.
    fn full_name(&self) -> String {
        if self.team_city.is_empty() || self.team_name.is_empty() {
            self.team_tricode.clone()
        } else {
            format!("{} {}", self.team_city, self.team_name)
        }
    }
}

impl RawGame {
    /// "Final" covers regulation and overtime ("Final/OT"); the
    /// numeric status is authoritative when present.
    fn is_final(&self) -> bool {
        self.game_status == STATUS_FINAL || self.game_status_text.trim().starts_with("Final")
    }

    fn to_result(&self) -> GameResult {
        GameResult {
            provider_game_id: self.game_id.clone(),
            home_team: self.home_team.full_name(),
            away_team: self.away_team.full_name(),
            home_score: self.home_team.score,
            away_score: self.away_team.score,
            completed: self.is_final(),
        }
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// NBA scoreboard feed client.
pub struct NbaScoreboardClient {
    http: Client,
}

impl NbaScoreboardClient {
    pub fn new() -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .user_agent("LINESMITH/0.1.0 (results-ingest)")
            .build()
            .context("Failed to build HTTP client for NBA scoreboard")?;
        Ok(Self { http })
    }
}

// ---------------------------------------------------------------------------
// OutcomeFeed trait implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl OutcomeFeed for NbaScoreboardClient {
    async fn fetch_results(&self) -> Result<Vec<GameResult>> {
        debug!(url = SCOREBOARD_URL, "Fetching NBA scoreboard");

        let resp = self
            .http
            .get(SCOREBOARD_URL)
            .send()
            .await
            .context("NBA scoreboard request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("NBA scoreboard error {status}: {body}");
        }

        let board: ScoreboardResponse = resp
            .json()
            .await
            .context("Failed to parse NBA scoreboard response")?;

        let results: Vec<GameResult> = board.scoreboard.games.iter().map(RawGame::to_result).collect();
        info!(
            games = results.len(),
            finals = results.iter().filter(|r| r.completed).count(),
            "Scoreboard fetched"
        );
        Ok(results)
    }

    fn name(&self) -> &str {
        FEED_NAME
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
    {
      "scoreboard": {
        "gameDate": "2025-03-14",
        "games": [
          {
            "gameId": "0022400912",
            "gameStatus": 3,
            "gameStatusText": "Final",
            "homeTeam": { "teamCity": "Boston", "teamName": "Celtics", "teamTricode": "BOS", "score": 118 },
            "awayTeam": { "teamCity": "Denver", "teamName": "Nuggets", "teamTricode": "DEN", "score": 112 }
          },
          {
            "gameId": "0022400913",
            "gameStatus": 2,
            "gameStatusText": "Q3 4:12",
            "homeTeam": { "teamCity": "Phoenix", "teamName": "Suns", "teamTricode": "PHX", "score": 77 },
            "awayTeam": { "teamCity": "Dallas", "teamName": "Mavericks", "teamTricode": "DAL", "score": 80 }
          },
          {
            "gameId": "0022400914",
            "gameStatus": 3,
            "gameStatusText": "Final/OT",
            "homeTeam": { "teamCity": "Miami", "teamName": "Heat", "teamTricode": "MIA", "score": 130 },
            "awayTeam": { "teamCity": "Atlanta", "teamName": "Hawks", "teamTricode": "ATL", "score": 130 }
          }
        ]
      }
    }
    "#;

    fn sample_games() -> Vec<RawGame> {
        let board: ScoreboardResponse = serde_json::from_str(SAMPLE).unwrap();
        board.scoreboard.games
    }

    #[test]
    fn test_deserialize_scoreboard() {
        let games = sample_games();
        assert_eq!(games.len(), 3);
        assert_eq!(games[0].game_id, "0022400912");
        assert_eq!(games[0].home_team.score, 118);
    }

    #[test]
    fn test_full_name_composition() {
        let games = sample_games();
        assert_eq!(games[0].home_team.full_name(), "Boston Celtics");
        assert_eq!(games[0].away_team.full_name(), "Denver Nuggets");

        let bare = RawTeam {
            team_city: String::new(),
            team_name: String::new(),
            team_tricode: "BOS".to_string(),
            score: 0,
        };
        assert_eq!(bare.full_name(), "BOS");
    }

    #[test]
    fn test_final_detection() {
        let games = sample_games();
        assert!(games[0].is_final());
        assert!(!games[1].is_final());
        // Overtime finals count.
        assert!(games[2].is_final());
    }

    #[test]
    fn test_to_result() {
        let result = sample_games()[0].to_result();
        assert_eq!(result.provider_game_id, "0022400912");
        assert_eq!(result.home_team, "Boston Celtics");
        assert_eq!(result.home_score, 118);
        assert_eq!(result.away_score, 112);
        assert!(result.completed);
    }

    #[test]
    fn test_in_progress_game_not_completed() {
        let result = sample_games()[1].to_result();
        assert!(!result.completed);
        assert_eq!(result.home_score, 77);
    }

    #[test]
    fn test_new_client() {
        let client = NbaScoreboardClient::new().unwrap();
        assert_eq!(client.name(), "nba-scoreboard");
    }
}
