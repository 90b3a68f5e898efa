//! LINESMITH — Market Signal & Settlement Engine
//!
//! Entry point. Loads configuration, initialises structured logging,
//! opens the database, and runs the ingest/settlement/reconcile loops
//! with graceful shutdown.

use anyhow::{bail, Result};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use linesmith::config;
use linesmith::dashboard::{self, DashboardState};
use linesmith::history::LineHistory;
use linesmith::ingest::oddsapi::TheOddsApiClient;
use linesmith::ingest::scoreboard::NbaScoreboardClient;
use linesmith::ingest::{IngestReport, Normalizer, OutcomeFeed, QuoteFeed};
use linesmith::ledger::Ledger;
use linesmith::settlement::SettlementEngine;
use linesmith::signals::{SignalConfig, SignalDetector};
use linesmith::storage::Database;

const BANNER: &str = r#"
 _     ___ _   _ _____ ____  __  __ ___ _____ _   _
| |   |_ _| \ | | ____/ ___||  \/  |_ _|_   _| | | |
| |    | ||  \| |  _| \___ \| |\/| || |  | | | |_| |
| |___ | || |\  | |___ ___) | |  | || |  | | |  _  |
|_____|___|_| \_|_____|____/|_|  |_|___| |_| |_| |_|

  Market Signal & Settlement Engine
  v0.1.0 — Ingest / Signals / Settlement / Ledger
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    // Load configuration from TOML
    let cfg = config::AppConfig::load("config.toml")?;

    // Initialise structured logging
    init_logging(&cfg);

    // Print startup banner
    println!("{BANNER}");
    info!(
        sports = ?cfg.ingest.sports,
        ingest_interval_secs = cfg.ingest.interval_secs,
        sweep_interval_secs = cfg.settlement.sweep_interval_secs,
        database = %cfg.database.url,
        "LINESMITH starting up"
    );

    // -- Storage ----------------------------------------------------------

    let db = Database::connect(&cfg.database.url).await?;
    db.migrate().await?;

    // -- Initialise components -------------------------------------------

    let history = LineHistory::new(db.clone());
    let ledger = Ledger::new(db.clone());
    let signals = SignalDetector::new(history.clone(), SignalConfig::from(&cfg.signals));
    let normalizer = Normalizer::new(history.clone(), cfg.ingest.staleness_minutes);
    let engine = SettlementEngine::new(db.clone(), history.clone(), signals.clone());

    // Feed clients
    let odds_feed = match cfg.ingest.odds_api_key() {
        Some(key) => Some(TheOddsApiClient::new(key, &cfg.ingest.regions)?),
        None => {
            warn!(
                env = %cfg.ingest.odds_api_key_env,
                "No odds API key configured — quote ingestion disabled"
            );
            None
        }
    };
    let scoreboard = NbaScoreboardClient::new()?;

    // Dashboard
    if cfg.dashboard.enabled {
        let state = Arc::new(DashboardState::new(
            history.clone(),
            ledger.clone(),
            signals.clone(),
        ));
        dashboard::spawn_dashboard(state, cfg.dashboard.port);
        info!(port = cfg.dashboard.port, "Dashboard listening");
    }

    // -- Main loop -------------------------------------------------------

    let mut ingest_timer =
        tokio::time::interval(Duration::from_secs(cfg.ingest.interval_secs));
    let mut sweep_timer =
        tokio::time::interval(Duration::from_secs(cfg.settlement.sweep_interval_secs));
    let mut reconcile_timer =
        tokio::time::interval(Duration::from_secs(cfg.settlement.reconcile_interval_secs));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(
        ingest_secs = cfg.ingest.interval_secs,
        sweep_secs = cfg.settlement.sweep_interval_secs,
        reconcile_secs = cfg.settlement.reconcile_interval_secs,
        "Entering main loop. Press Ctrl+C to stop."
    );

    loop {
        tokio::select! {
            _ = ingest_timer.tick() => {
                if let Some(feed) = &odds_feed {
                    match run_ingest_cycle(feed, &normalizer, &cfg.ingest.sports).await {
                        Ok(report) => log_ingest_report(&report),
                        Err(e) => error!(error = %e, "Ingest cycle failed — continuing to next"),
                    }
                }
            }
            _ = sweep_timer.tick() => {
                if let Err(e) = run_settlement_sweep(&scoreboard, &engine).await {
                    error!(error = %e, "Settlement sweep failed — continuing to next");
                }
            }
            _ = reconcile_timer.tick() => {
                if let Err(e) = run_reconcile(&ledger).await {
                    error!(error = %e, "Reconciliation failed — continuing to next");
                }
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received.");
                break;
            }
        }
    }

    info!("LINESMITH shut down cleanly.");
    Ok(())
}

/// Pull every configured sport's odds board concurrently and write
/// the batches through the normalizer. A dead sport feed must not
/// block the others, so fetch and staleness failures are logged per
/// sport; the cycle only errors when every sport failed.
async fn run_ingest_cycle(
    feed: &dyn QuoteFeed,
    normalizer: &Normalizer,
    sports: &[String],
) -> Result<IngestReport> {
    let boards =
        futures::future::join_all(sports.iter().map(|sport| feed.fetch_quotes(sport))).await;

    let mut totals = IngestReport::default();
    let mut failed = 0usize;

    for (sport, board) in sports.iter().zip(boards) {
        let (events, quotes) = match board {
            Ok(batch) => batch,
            Err(e) => {
                warn!(sport = %sport, feed = feed.name(), error = %e, "Quote fetch failed");
                failed += 1;
                continue;
            }
        };
        match normalizer.ingest(&events, &quotes).await {
            Ok(report) => {
                totals.events += report.events;
                totals.accepted += report.accepted;
                totals.deduplicated += report.deduplicated;
                totals.total += report.total;
            }
            Err(e) => {
                warn!(sport = %sport, error = %e, "Batch rejected");
                failed += 1;
            }
        }
    }

    if failed == sports.len() && !sports.is_empty() {
        bail!("All {failed} sport feeds failed");
    }
    Ok(totals)
}

/// Pull the scoreboard, close out finished events, and pay winners.
async fn run_settlement_sweep(
    feed: &dyn OutcomeFeed,
    engine: &SettlementEngine,
) -> Result<()> {
    let results = feed.fetch_results().await?;
    if results.is_empty() {
        return Ok(());
    }

    let reports = engine.apply_results(&results).await?;
    let settled: usize = reports.iter().map(|r| r.settled.len()).sum();
    if settled > 0 {
        let paid: Decimal = reports.iter().map(|r| r.total_paid_out).sum();
        info!(
            events = reports.len(),
            settled,
            paid = %paid,
            "Settlement sweep complete"
        );
    }
    Ok(())
}

/// Replay every account's ledger against its cached balance.
async fn run_reconcile(ledger: &Ledger) -> Result<()> {
    let reports = ledger.reconcile_all().await?;
    let drifted = reports.iter().filter(|r| !r.is_clean()).count();
    if drifted > 0 {
        error!(accounts = reports.len(), drifted, "Ledger drift detected");
    } else {
        info!(accounts = reports.len(), "All ledgers verified");
    }
    Ok(())
}

/// Log a human-readable ingest summary.
fn log_ingest_report(report: &IngestReport) {
    info!(
        events = report.events,
        accepted = report.accepted,
        deduplicated = report.deduplicated,
        total = report.total,
        "Ingest cycle complete"
    );
}

/// Initialise the `tracing` subscriber.
fn init_logging(cfg: &config::AppConfig) {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("linesmith=info"));

    let json_logging = std::env::var("LINESMITH_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }

    let _ = cfg;
}
