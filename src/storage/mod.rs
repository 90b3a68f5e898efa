//! SQLite persistence: pool management and schema migration.
//!
//! Owns the connection pool and the schema. Domain modules (history,
//! ledger, settlement) run their own queries against the shared pool;
//! this module only guarantees the tables exist.
//!
//! Column conventions: money and point-lines are TEXT holding decimal
//! strings (sqlx's SQLite driver has no Decimal support), American
//! prices are INTEGER, timestamps are chrono `DateTime<Utc>` TEXT.

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

/// Shared handle to the SQLite database. Cheap to clone.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Connect to a SQLite URL, creating the file if missing.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .with_context(|| format!("Invalid database URL: {url}"))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to connect to database: {url}"))?;

        Ok(Self { pool })
    }

    /// In-memory database for tests. Single connection — an in-memory
    /// SQLite database exists per connection.
    pub async fn connect_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .context("Failed to open in-memory database")?;
        Ok(Self { pool })
    }

    /// The underlying pool, for modules running their own queries.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create all tables and indexes. Idempotent.
    pub async fn migrate(&self) -> Result<()> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS events (
                id TEXT PRIMARY KEY,
                sport_key TEXT NOT NULL,
                home_team TEXT NOT NULL,
                away_team TEXT NOT NULL,
                commence_time TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'scheduled'
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS quotes (
                id INTEGER PRIMARY KEY,
                event_id TEXT NOT NULL,
                market_key TEXT NOT NULL,
                outcome_name TEXT NOT NULL,
                bookmaker TEXT NOT NULL,
                price INTEGER NOT NULL,
                line TEXT,
                observed_at TEXT NOT NULL,
                is_opening INTEGER NOT NULL DEFAULT 0,
                is_closing INTEGER NOT NULL DEFAULT 0,
                is_live INTEGER NOT NULL DEFAULT 0
            )
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS idx_quotes_series
                ON quotes (event_id, market_key, bookmaker, outcome_name, observed_at)
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS idx_quotes_event
                ON quotes (event_id, market_key, observed_at)
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS bets (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                event_id TEXT NOT NULL,
                market_key TEXT NOT NULL,
                selection TEXT NOT NULL,
                line TEXT,
                stake TEXT NOT NULL,
                price INTEGER NOT NULL,
                outcome TEXT NOT NULL DEFAULT 'pending',
                placed_at TEXT NOT NULL,
                opening_line TEXT,
                closing_line TEXT,
                clv_prob REAL,
                clv_points TEXT,
                beat_closing_line INTEGER,
                actual_return TEXT,
                settled_at TEXT
            )
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS idx_bets_event_outcome
                ON bets (event_id, outcome)
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS idx_bets_user
                ON bets (user_id, placed_at)
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS accounts (
                user_id TEXT PRIMARY KEY,
                balance TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS bankroll_transactions (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                amount TEXT NOT NULL,
                transaction_type TEXT NOT NULL,
                balance_after TEXT NOT NULL,
                bet_id TEXT,
                note TEXT,
                created_at TEXT NOT NULL
            )
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS idx_transactions_user
                ON bankroll_transactions (user_id, created_at)
            "#,
        ];

        for statement in statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .context("Migration statement failed")?;
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
