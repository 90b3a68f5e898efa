//! Dashboard API route handlers.
//!
//! All endpoints return JSON and read straight from the shared
//! database; nothing here caches or mutates. State is shared via
//! `Arc<DashboardState>`.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;

use crate::history::LineHistory;
use crate::ledger::Ledger;
use crate::signals::{SignalDetector, SteamAlert};
use crate::types::{BankrollTransaction, Bet, Event, LineHistoryEntry, MarketKind};

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Shared state accessible by all route handlers.
pub struct DashboardState {
    pub history: LineHistory,
    pub ledger: Ledger,
    pub signals: SignalDetector,
}

impl DashboardState {
    pub fn new(history: LineHistory, ledger: Ledger, signals: SignalDetector) -> Self {
        Self {
            history,
            ledger,
            signals,
        }
    }
}

pub type AppState = Arc<DashboardState>;

// ---------------------------------------------------------------------------
// Request/response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub market: String,
    pub outcome: String,
}

#[derive(Debug, Deserialize)]
pub struct SteamQuery {
    pub market: String,
}

#[derive(Debug, Deserialize)]
pub struct BetsQuery {
    pub user_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BankrollResponse {
    pub user_id: String,
    pub balance: Decimal,
    pub replayed: Decimal,
    /// Whether the cached balance matches a full ledger replay.
    pub verified: bool,
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// GET /api/events
pub async fn get_events(State(state): State<AppState>) -> Result<Json<Vec<Event>>, ApiError> {
    Ok(Json(state.history.open_events().await?))
}

/// GET /api/events/:event_id/history?market=&outcome=
pub async fn get_event_history(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<LineHistoryEntry>>, ApiError> {
    let market = parse_market(&query.market)?;
    require_event(&state, &event_id).await?;
    let entries = state
        .history
        .history(&event_id, market, &query.outcome)
        .await?;
    Ok(Json(entries))
}

/// GET /api/events/:event_id/signals/steam?market=
pub async fn get_event_steam(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
    Query(query): Query<SteamQuery>,
) -> Result<Json<Vec<SteamAlert>>, ApiError> {
    let market = parse_market(&query.market)?;
    require_event(&state, &event_id).await?;
    Ok(Json(state.signals.steam_moves(&event_id, market).await?))
}

/// GET /api/bets?user_id=
pub async fn get_bets(
    State(state): State<AppState>,
    Query(query): Query<BetsQuery>,
) -> Result<Json<Vec<Bet>>, ApiError> {
    Ok(Json(state.ledger.bets_for_user(&query.user_id).await?))
}

/// GET /api/users/:user_id/bankroll
pub async fn get_bankroll(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<BankrollResponse>, ApiError> {
    require_account(&state, &user_id).await?;
    let report = state.ledger.reconcile(&user_id).await?;
    Ok(Json(BankrollResponse {
        user_id,
        balance: report.cached,
        replayed: report.replayed,
        verified: report.is_clean(),
    }))
}

/// GET /api/users/:user_id/ledger
pub async fn get_ledger(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<BankrollTransaction>>, ApiError> {
    require_account(&state, &user_id).await?;
    Ok(Json(state.ledger.transactions(&user_id).await?))
}

fn parse_market(raw: &str) -> Result<MarketKind, ApiError> {
    raw.parse::<MarketKind>()
        .map_err(|e| ApiError::BadRequest(e.to_string()))
}

async fn require_event(state: &DashboardState, event_id: &str) -> Result<(), ApiError> {
    match state.history.event(event_id).await? {
        Some(_) => Ok(()),
        None => Err(ApiError::NotFound(format!("No event {event_id}"))),
    }
}

async fn require_account(state: &DashboardState, user_id: &str) -> Result<(), ApiError> {
    match state.ledger.find_balance(user_id).await? {
        Some(_) => Ok(()),
        None => Err(ApiError::NotFound(format!("No account for user {user_id}"))),
    }
}

// ---------------------------------------------------------------------------
// Error handling
// ---------------------------------------------------------------------------

/// API error surface. Internal errors are logged server-side and
/// reported to the client without detail.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Internal(anyhow::Error),
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Internal(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Internal(e) => {
                error!(error = %e, "Dashboard request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal error".to_string(),
                )
            }
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::SignalConfig;
    use crate::storage::Database;
    use rust_decimal_macros::dec;

    async fn test_state() -> AppState {
        let db = Database::connect_in_memory().await.unwrap();
        db.migrate().await.unwrap();
        let history = LineHistory::new(db.clone());
        let signals = SignalDetector::new(history.clone(), SignalConfig::default());
        Arc::new(DashboardState::new(
            history,
            Ledger::new(db),
            signals,
        ))
    }

    #[test]
    fn test_bankroll_response_serializes() {
        let resp = BankrollResponse {
            user_id: "user-1".to_string(),
            balance: dec!(400.00),
            replayed: dec!(400.00),
            verified: true,
        };
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("\"verified\":true"));
        assert!(json.contains("400"));
    }

    #[test]
    fn test_parse_market_accepts_provider_keys() {
        assert_eq!(parse_market("spread").unwrap(), MarketKind::Spread);
        assert_eq!(parse_market("h2h").unwrap(), MarketKind::Moneyline);
        assert!(parse_market("parlay").is_err());
    }

    #[tokio::test]
    async fn test_get_bets_empty_for_unknown_user() {
        let state = test_state().await;
        let Json(bets) = get_bets(
            State(state),
            Query(BetsQuery {
                user_id: "nobody".to_string(),
            }),
        )
        .await
        .unwrap();
        assert!(bets.is_empty());
    }

    #[tokio::test]
    async fn test_get_bankroll_unknown_user_is_not_found() {
        let state = test_state().await;
        let err = get_bankroll(State(state), Path("nobody".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_get_bankroll_reports_verified_balance() {
        let state = test_state().await;
        state.ledger.open_account("user-1", dec!(250)).await.unwrap();

        let Json(resp) = get_bankroll(State(state), Path("user-1".to_string()))
            .await
            .unwrap();
        assert_eq!(resp.balance, dec!(250));
        assert!(resp.verified);
    }
}
