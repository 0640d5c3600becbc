use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use grid_ingestor::{
    models::{series::SeriesKey, window::FetchWindow},
    providers::grid_rest::GridRestProvider,
};
use series_sync::{
    config::{self, NormalizationReport, SyncConfig},
    coordinator::{Coordinator, CoordinatorSettings, RunOutcome},
    coverage::{self, ExpectedSlots},
    db::{Db, migrate},
    raw_store::{RawStore, SqliteRawStore},
    run_lock::{RunLockStore, SqliteRunLockStore},
    watermark::{SqliteWatermarkStore, WatermarkStore},
};
use shared_utils::env::get_env_var;
use tokio::{signal, sync::watch};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser)]
#[command(version, about = "Grid series sync CLI")]
struct Cli {
    /// Sync configuration file.
    #[arg(long, short, value_name = "FILE", default_value = "series_sync.toml", global = true)]
    config: PathBuf,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Apply pending schema migrations.
    Migrate,
    /// Ingest every configured series (or the ones given) up to the horizon.
    Run {
        /// Restrict the run to these series, e.g. `generation/NL`.
        #[arg(long = "series", value_name = "DOMAIN/REGION")]
        series: Vec<SeriesKey>,
        /// Exclusive end of the window; defaults to today's market midnight.
        #[arg(long)]
        until: Option<DateTime<Utc>>,
    },
    /// Watermark and stored span of every configured series.
    Status,
    /// Missing slots of one series.
    Gaps {
        #[arg(long, value_name = "DOMAIN/REGION")]
        series: SeriesKey,
        #[arg(long)]
        from: DateTime<Utc>,
        /// Defaults to today's market midnight.
        #[arg(long)]
        to: Option<DateTime<Utc>>,
    },
    /// Audit trail of overwritten observations.
    Corrections {
        #[arg(long, value_name = "DOMAIN/REGION")]
        series: SeriesKey,
    },
    Watermark(WatermarkCmd),
}

#[derive(Args)]
struct WatermarkCmd {
    #[command(subcommand)]
    sub: WatermarkSub,
}

#[derive(Subcommand)]
enum WatermarkSub {
    /// Forget the watermark of a series; the next run starts over.
    Reset {
        #[arg(long, value_name = "DOMAIN/REGION")]
        series: SeriesKey,
    },
}

fn init_tracing() {
    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

fn load_config(path: &Path) -> Result<SyncConfig> {
    let (mut cfg, report) = config::load_config_path(path)?;
    if report != NormalizationReport::default() {
        info!(?report, "config normalized");
    }
    if let Ok(url) = get_env_var("DATABASE_URL") {
        cfg.database_url = url;
    }
    Ok(cfg)
}

fn build_coordinator(cfg: &SyncConfig, db: &Db) -> Result<Coordinator> {
    let provider = GridRestProvider::new(&cfg.provider).context("failed to set up provider")?;
    let settings = CoordinatorSettings {
        chunk_months: cfg.chunk_months,
        retry: cfg.retry_policy(),
        request_timeout: cfg.provider.request_timeout(),
        initial_lookback_years: cfg.initial_lookback_years,
        market_timezone: cfg.timezone()?,
        lock_stale_after: cfg.lock_stale_after(),
    };

    let mut coordinator = Coordinator::new(
        Arc::new(provider),
        Arc::new(SqliteWatermarkStore::new(db.clone())),
        Arc::new(SqliteRawStore::new(db.clone())),
    )
    .with_rules(cfg.rules()?)
    .with_settings(settings)
    .with_run_locks(Arc::new(SqliteRunLockStore::new(db.clone())));

    for s in &cfg.series {
        if let Some(start) = s.start {
            coordinator = coordinator.with_initial_start(SeriesKey::new(s.domain, &s.region)?, start);
        }
    }
    Ok(coordinator)
}

fn horizon(cfg: &SyncConfig, explicit: Option<DateTime<Utc>>) -> Result<DateTime<Utc>> {
    match explicit {
        Some(ts) => Ok(ts),
        None => Ok(series_sync::tz::day_floor_in(cfg.timezone()?, Utc::now())?),
    }
}

fn print_outcome(key: &SeriesKey, outcome: &RunOutcome) {
    match outcome {
        RunOutcome::Done(r) => println!(
            "{key}: done, {} written ({} corrected, {} unchanged, {} rejected), watermark {}",
            r.merge.written(),
            r.merge.corrected,
            r.merge.unchanged,
            r.rejected,
            r.watermark_after
                .map_or_else(|| "-".to_string(), |w| w.to_rfc3339())
        ),
        RunOutcome::Failed { error, .. } => println!("{key}: failed: {error}"),
        RunOutcome::Aborted { error, .. } => println!("{key}: aborted: {error}"),
        RunOutcome::AlreadyRunning(_) => println!("{key}: already running"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();
    let cli = Cli::parse();
    let cfg = load_config(&cli.config)?;

    match cli.cmd {
        Cmd::Migrate => {
            let applied = migrate::run_all(&cfg.database_url)?;
            info!(applied, database = %cfg.database_url, "migrations applied");
        }

        Cmd::Run { series, until } => {
            migrate::run_all(&cfg.database_url)?;
            let db = Db::open(&cfg.database_url)?;
            let coordinator = Arc::new(build_coordinator(&cfg, &db)?);
            let series = if series.is_empty() {
                cfg.series_keys()?
            } else {
                series
            };
            let until = horizon(&cfg, until)?;

            let (cancel_tx, cancel_rx) = watch::channel(false);
            tokio::spawn(async move {
                if signal::ctrl_c().await.is_ok() {
                    warn!("Ctrl-C received, cancelling runs");
                    let _ = cancel_tx.send(true);
                }
            });

            let outcomes = coordinator.run_all(series, until, cancel_rx).await;
            for (key, outcome) in &outcomes {
                print_outcome(key, outcome);
            }
            let incomplete = outcomes.iter().filter(|(_, o)| !o.is_done()).count();
            if incomplete > 0 {
                anyhow::bail!("{incomplete} series did not complete");
            }
        }

        Cmd::Status => {
            let db = Db::open(&cfg.database_url)?;
            let watermarks = SqliteWatermarkStore::new(db.clone());
            let raw = SqliteRawStore::new(db.clone());
            let leases = SqliteRunLockStore::new(db).list().await?;
            for key in cfg.series_keys()? {
                let wm = watermarks.get(&key).await?;
                let summary = raw.summary(&key).await?;
                println!(
                    "{key}: watermark {}, {} rows, first {}, last {}",
                    wm.map_or_else(|| "-".to_string(), |w| w.last_complete.to_rfc3339()),
                    summary.rows,
                    summary.first.map_or_else(|| "-".to_string(), |t| t.to_rfc3339()),
                    summary.last.map_or_else(|| "-".to_string(), |t| t.to_rfc3339()),
                );
                if let Some(lease) = leases.iter().find(|l| l.series == key) {
                    println!(
                        "{key}: running under {} since {}",
                        lease.holder,
                        lease.acquired_at.to_rfc3339()
                    );
                }
            }
        }

        Cmd::Gaps { series, from, to } => {
            let db = Db::open(&cfg.database_url)?;
            let raw = SqliteRawStore::new(db);
            let to = horizon(&cfg, to)?;
            let resolution = cfg.rules()?.get(series.domain).resolution;
            let window = FetchWindow::starting_at(series.clone(), from, to);
            let expected = ExpectedSlots::for_window(&window, resolution);
            let present = raw.timestamps(&series, from, to).await?;
            let ranges = coverage::missing_ranges(&expected, present);
            if ranges.is_empty() {
                println!("{series}: no gaps in {window}");
            }
            for (start, end) in ranges {
                println!("{series}: missing [{}, {})", start.to_rfc3339(), end.to_rfc3339());
            }
        }

        Cmd::Corrections { series } => {
            let db = Db::open(&cfg.database_url)?;
            let raw = SqliteRawStore::new(db);
            for c in raw.corrections(&series).await? {
                println!(
                    "{} {} rev {}: {} -> {} (at {})",
                    c.series,
                    c.timestamp.to_rfc3339(),
                    c.revision,
                    c.previous_payload,
                    c.new_payload,
                    c.corrected_at.to_rfc3339()
                );
            }
        }

        Cmd::Watermark(WatermarkCmd {
            sub: WatermarkSub::Reset { series },
        }) => {
            let db = Db::open(&cfg.database_url)?;
            let removed = SqliteWatermarkStore::new(db).reset(&series).await?;
            if removed {
                println!("{series}: watermark reset");
            } else {
                println!("{series}: no watermark stored");
            }
        }
    }

    Ok(())
}
