//! Bankroll ledger: append-only transaction log plus a cached balance
//! per account.
//!
//! Every balance change is one ledger row; rows are never edited or
//! deleted. Replaying a user's rows must reproduce the cached balance,
//! and `reconcile` verifies exactly that. Corrections enter as
//! explicit adjustment rows with a note, never as edits to history.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use std::str::FromStr;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::history::parse_opt_decimal;
use crate::storage::Database;
use crate::types::{BankrollTransaction, Bet, DriftReport, LinesmithError, TransactionType};

/// Account and transaction operations over the shared database.
#[derive(Clone)]
pub struct Ledger {
    db: Database,
}

impl Ledger {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    // -- Accounts --------------------------------------------------------

    /// Create an account. A non-zero opening balance is booked as a
    /// deposit row so that replay starts clean.
    pub async fn open_account(&self, user_id: &str, opening_balance: Decimal) -> Result<()> {
        sqlx::query("INSERT INTO accounts (user_id, balance, created_at) VALUES (?, ?, ?)")
            .bind(user_id)
            .bind(Decimal::ZERO.to_string())
            .bind(Utc::now())
            .execute(self.db.pool())
            .await
            .with_context(|| format!("Failed to create account for {user_id}"))?;

        if opening_balance > Decimal::ZERO {
            self.deposit(user_id, opening_balance).await?;
        }
        info!(user_id, %opening_balance, "Account opened");
        Ok(())
    }

    /// Cached balance for an account.
    pub async fn balance(&self, user_id: &str) -> Result<Decimal> {
        match self.find_balance(user_id).await? {
            Some(balance) => Ok(balance),
            None => bail!("No account for user {user_id}"),
        }
    }

    /// Cached balance, or None for an unknown account.
    pub async fn find_balance(&self, user_id: &str) -> Result<Option<Decimal>> {
        let row = sqlx::query("SELECT balance FROM accounts WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(self.db.pool())
            .await?;
        row.map(|r| Ok(Decimal::from_str(&r.get::<String, _>("balance"))?))
            .transpose()
    }

    // -- Money movement --------------------------------------------------

    pub async fn deposit(&self, user_id: &str, amount: Decimal) -> Result<BankrollTransaction> {
        if amount <= Decimal::ZERO {
            bail!("Deposit amount must be positive, got {amount}");
        }
        let mut tx = self.db.pool().begin().await?;
        let txn =
            append_transaction(&mut tx, user_id, amount, TransactionType::Deposit, None, None)
                .await?;
        tx.commit().await?;
        Ok(txn)
    }

    pub async fn withdraw(&self, user_id: &str, amount: Decimal) -> Result<BankrollTransaction> {
        if amount <= Decimal::ZERO {
            bail!("Withdrawal amount must be positive, got {amount}");
        }
        let mut tx = self.db.pool().begin().await?;
        let available = balance_in_tx(&mut tx, user_id).await?;
        if available < amount {
            return Err(LinesmithError::InsufficientFunds {
                needed: amount,
                available,
            }
            .into());
        }
        let txn = append_transaction(
            &mut tx,
            user_id,
            -amount,
            TransactionType::Withdrawal,
            None,
            None,
        )
        .await?;
        tx.commit().await?;
        Ok(txn)
    }

    /// Persist a new bet and debit its stake in one transaction. The
    /// bet row and its wager row commit together or not at all.
    pub async fn place_bet(&self, bet: &Bet) -> Result<BankrollTransaction> {
        if bet.stake <= Decimal::ZERO {
            bail!("Stake must be positive, got {}", bet.stake);
        }
        let mut tx = self.db.pool().begin().await?;
        let available = balance_in_tx(&mut tx, &bet.user_id).await?;
        if available < bet.stake {
            return Err(LinesmithError::InsufficientFunds {
                needed: bet.stake,
                available,
            }
            .into());
        }

        sqlx::query(
            r#"
            INSERT INTO bets
                (id, user_id, event_id, market_key, selection, line, stake, price,
                 outcome, placed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&bet.id)
        .bind(&bet.user_id)
        .bind(&bet.event_id)
        .bind(bet.market.as_str())
        .bind(bet.selection.to_string())
        .bind(bet.line.map(|l| l.to_string()))
        .bind(bet.stake.to_string())
        .bind(bet.price)
        .bind(bet.outcome.to_string())
        .bind(bet.placed_at)
        .execute(&mut *tx)
        .await
        .context("Failed to insert bet")?;

        let txn = append_transaction(
            &mut tx,
            &bet.user_id,
            -bet.stake,
            TransactionType::Wager,
            Some(&bet.id),
            None,
        )
        .await?;
        tx.commit().await?;

        info!(
            bet_id = %bet.id,
            user_id = %bet.user_id,
            stake = %bet.stake,
            price = bet.price,
            "Bet placed"
        );
        Ok(txn)
    }

    /// Manual balance correction. The note is mandatory: adjustments
    /// exist to leave an audit trail.
    pub async fn apply_adjustment(
        &self,
        user_id: &str,
        amount: Decimal,
        note: &str,
    ) -> Result<BankrollTransaction> {
        if note.trim().is_empty() {
            bail!("Adjustment requires a note");
        }
        let mut tx = self.db.pool().begin().await?;
        let txn = append_transaction(
            &mut tx,
            user_id,
            amount,
            TransactionType::Adjustment,
            None,
            Some(note),
        )
        .await?;
        tx.commit().await?;
        warn!(user_id, %amount, note, "Adjustment applied");
        Ok(txn)
    }

    // -- Reads -----------------------------------------------------------

    pub async fn bet(&self, bet_id: &str) -> Result<Option<Bet>> {
        let row = sqlx::query("SELECT * FROM bets WHERE id = ?")
            .bind(bet_id)
            .fetch_optional(self.db.pool())
            .await?;
        row.map(|r| row_to_bet(&r)).transpose()
    }

    pub async fn bets_for_user(&self, user_id: &str) -> Result<Vec<Bet>> {
        let rows = sqlx::query("SELECT * FROM bets WHERE user_id = ? ORDER BY placed_at DESC")
            .bind(user_id)
            .fetch_all(self.db.pool())
            .await?;
        rows.iter().map(row_to_bet).collect()
    }

    /// Full transaction history for an account, oldest first.
    pub async fn transactions(&self, user_id: &str) -> Result<Vec<BankrollTransaction>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM bankroll_transactions
            WHERE user_id = ?
            ORDER BY created_at ASC, rowid ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(self.db.pool())
        .await?;
        rows.iter().map(row_to_transaction).collect()
    }

    // -- Reconciliation --------------------------------------------------

    /// Sum of all ledger rows for an account, computed in exact
    /// decimal arithmetic.
    pub async fn replayed_balance(&self, user_id: &str) -> Result<Decimal> {
        let rows = sqlx::query("SELECT amount FROM bankroll_transactions WHERE user_id = ?")
            .bind(user_id)
            .fetch_all(self.db.pool())
            .await?;
        let mut total = Decimal::ZERO;
        for row in rows {
            total += Decimal::from_str(&row.get::<String, _>("amount"))?;
        }
        Ok(total)
    }

    /// Compare cached balance against ledger replay for one account.
    pub async fn reconcile(&self, user_id: &str) -> Result<DriftReport> {
        let report = DriftReport {
            user_id: user_id.to_string(),
            cached: self.balance(user_id).await?,
            replayed: self.replayed_balance(user_id).await?,
        };
        if report.is_clean() {
            info!(user_id, balance = %report.cached, "Ledger verified");
        } else {
            error!(
                user_id,
                cached = %report.cached,
                replayed = %report.replayed,
                drift = %report.drift(),
                "Ledger drift detected"
            );
        }
        Ok(report)
    }

    /// Reconcile every account. Returns all reports; callers filter
    /// for drift.
    pub async fn reconcile_all(&self) -> Result<Vec<DriftReport>> {
        let rows = sqlx::query("SELECT user_id FROM accounts ORDER BY user_id")
            .fetch_all(self.db.pool())
            .await?;
        let mut reports = Vec::with_capacity(rows.len());
        for row in rows {
            let user_id: String = row.get("user_id");
            reports.push(self.reconcile(&user_id).await?);
        }
        Ok(reports)
    }

    /// Book an adjustment row equal to the current drift so that
    /// replay matches the cached balance again. The cached balance is
    /// what the funds guard trusts, so the ledger side absorbs the
    /// correction. No-op when the account is clean.
    pub async fn repair_drift(
        &self,
        user_id: &str,
        note: &str,
    ) -> Result<Option<BankrollTransaction>> {
        if note.trim().is_empty() {
            bail!("Drift repair requires a note");
        }
        let report = self.reconcile(user_id).await?;
        if report.is_clean() {
            return Ok(None);
        }

        let txn = BankrollTransaction {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            amount: report.drift(),
            transaction_type: TransactionType::Adjustment,
            balance_after: report.cached,
            bet_id: None,
            note: Some(note.to_string()),
            created_at: Utc::now(),
        };
        insert_transaction_row(self.db.pool(), &txn).await?;
        warn!(user_id, amount = %txn.amount, note, "Drift repaired via adjustment row");
        Ok(Some(txn))
    }
}

// -- Shared write path ---------------------------------------------------

/// Append one ledger row and move the cached balance, inside the
/// caller's transaction. Settlement uses this to pair payouts with bet
/// transitions atomically.
pub(crate) async fn append_transaction(
    conn: &mut SqliteConnection,
    user_id: &str,
    amount: Decimal,
    transaction_type: TransactionType,
    bet_id: Option<&str>,
    note: Option<&str>,
) -> Result<BankrollTransaction> {
    let balance = balance_in_tx(conn, user_id).await?;
    let txn = BankrollTransaction {
        id: Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        amount,
        transaction_type,
        balance_after: balance + amount,
        bet_id: bet_id.map(str::to_string),
        note: note.map(str::to_string),
        created_at: Utc::now(),
    };

    insert_transaction_row(&mut *conn, &txn).await?;
    sqlx::query("UPDATE accounts SET balance = ? WHERE user_id = ?")
        .bind(txn.balance_after.to_string())
        .bind(user_id)
        .execute(conn)
        .await?;
    Ok(txn)
}

async fn insert_transaction_row<'e, E>(executor: E, txn: &BankrollTransaction) -> Result<()>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO bankroll_transactions
            (id, user_id, amount, transaction_type, balance_after, bet_id, note, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&txn.id)
    .bind(&txn.user_id)
    .bind(txn.amount.to_string())
    .bind(txn.transaction_type.to_string())
    .bind(txn.balance_after.to_string())
    .bind(&txn.bet_id)
    .bind(&txn.note)
    .bind(txn.created_at)
    .execute(executor)
    .await
    .context("Failed to insert ledger row")?;
    Ok(())
}

async fn balance_in_tx(conn: &mut SqliteConnection, user_id: &str) -> Result<Decimal> {
    let row = sqlx::query("SELECT balance FROM accounts WHERE user_id = ?")
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await?;
    match row {
        Some(r) => Ok(Decimal::from_str(&r.get::<String, _>("balance"))?),
        None => bail!("No account for user {user_id}"),
    }
}

// -- Row mapping ---------------------------------------------------------

pub(crate) fn row_to_bet(row: &SqliteRow) -> Result<Bet> {
    let market: String = row.get("market_key");
    let selection: String = row.get("selection");
    let outcome: String = row.get("outcome");
    Ok(Bet {
        id: row.get("id"),
        user_id: row.get("user_id"),
        event_id: row.get("event_id"),
        market: market.parse()?,
        selection: crate::types::Selection::parse(&selection),
        line: parse_opt_decimal(row.get::<Option<String>, _>("line"))?,
        stake: Decimal::from_str(&row.get::<String, _>("stake"))?,
        price: row.get("price"),
        outcome: outcome.parse()?,
        placed_at: row.get("placed_at"),
        opening_line: parse_opt_decimal(row.get::<Option<String>, _>("opening_line"))?,
        closing_line: parse_opt_decimal(row.get::<Option<String>, _>("closing_line"))?,
        clv_prob: row.get("clv_prob"),
        clv_points: parse_opt_decimal(row.get::<Option<String>, _>("clv_points"))?,
        beat_closing_line: row.get("beat_closing_line"),
        actual_return: parse_opt_decimal(row.get::<Option<String>, _>("actual_return"))?,
        settled_at: row.get("settled_at"),
    })
}

fn row_to_transaction(row: &SqliteRow) -> Result<BankrollTransaction> {
    let transaction_type: String = row.get("transaction_type");
    Ok(BankrollTransaction {
        id: row.get("id"),
        user_id: row.get("user_id"),
        amount: Decimal::from_str(&row.get::<String, _>("amount"))?,
        transaction_type: transaction_type.parse()?,
        balance_after: Decimal::from_str(&row.get::<String, _>("balance_after"))?,
        bet_id: row.get("bet_id"),
        note: row.get("note"),
        created_at: row.get("created_at"),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
