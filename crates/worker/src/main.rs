//! Souq Background Worker
//!
//! Handles scheduled jobs including:
//! - Grace reconciliation sweep (on start + fixed interval)
//! - Subscription expiry refresh (same cadence as the sweep)
//! - Quota invariant checks (daily at 2:30 UTC)
//! - Health check heartbeat (every 5 minutes)

use std::sync::Arc;
use std::time::Duration;

use souq_quota::QuotaService;
use sqlx::postgres::PgPoolOptions;
use time::OffsetDateTime;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

/// Worker scheduling configuration, read once at startup.
///
/// The sweep interval and the run-on-start behavior are deployment-level
/// knobs, not part of the quota logic itself.
#[derive(Debug, Clone)]
struct WorkerConfig {
    sweep_interval: Duration,
    sweep_on_start: bool,
}

impl WorkerConfig {
    fn from_env() -> Self {
        let sweep_interval_secs = std::env::var("SWEEP_INTERVAL_SECS")
            .ok()
            .and_then(|raw| raw.parse::<u64>().ok())
            .unwrap_or(3600);
        let sweep_on_start = std::env::var("SWEEP_RUN_ON_START")
            .ok()
            .and_then(|raw| raw.parse::<bool>().ok())
            .unwrap_or(true);
        Self {
            sweep_interval: Duration::from_secs(sweep_interval_secs.max(1)),
            sweep_on_start,
        }
    }
}

/// Create a database connection pool
async fn create_db_pool() -> anyhow::Result<sqlx::PgPool> {
    #[allow(clippy::expect_used)] // Fail-fast on startup if required config is missing
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&database_url)
        .await?;

    info!("Database pool created");
    Ok(pool)
}

/// One combined reconciliation pass: refresh lapsed subscriptions first so
/// their grace windows exist, then sweep the lapsed grace windows.
async fn run_reconciliation(quota: &QuotaService) {
    let now = OffsetDateTime::now_utc();

    match quota.subscriptions.refresh_expired(now).await {
        Ok(summary) => info!(
            checked = summary.checked,
            transitioned = summary.transitioned,
            errors = summary.errors,
            "Subscription expiry refresh complete"
        ),
        Err(e) => error!(error = %e, "Subscription expiry refresh failed, will retry next run"),
    }

    if let Err(e) = quota.sweep.run(now).await {
        // Per-account outcomes are logged inside run(); this is batch selection
        error!(error = %e, "Grace sweep failed, will retry next run");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Load environment
    dotenvy::dotenv().ok();

    info!("Starting Souq Worker");

    let config = WorkerConfig::from_env();
    let pool = create_db_pool().await?;

    let quota = match QuotaService::from_env(pool.clone()) {
        Ok(q) => Arc::new(q),
        Err(e) => {
            // If the artifact store isn't configured, run in minimal mode
            warn!(error = %e, "Failed to create quota service - running in minimal mode");
            info!("Worker running without quota reconciliation");

            loop {
                tokio::time::sleep(Duration::from_secs(60)).await;
                info!("Worker heartbeat (minimal mode)");
            }
        }
    };

    let mut scheduler = JobScheduler::new().await?;

    // Run once at startup so a restart never extends a lapsed grace window
    if config.sweep_on_start {
        info!("Running startup reconciliation pass");
        run_reconciliation(&quota).await;
    }

    // Job 1: Grace sweep + expiry refresh at the configured interval
    let sweep_quota = quota.clone();
    scheduler
        .add(Job::new_repeated_async(
            config.sweep_interval,
            move |_uuid, _l| {
                let quota = sweep_quota.clone();
                Box::pin(async move {
                    info!("Running scheduled reconciliation pass");
                    run_reconciliation(&quota).await;
                })
            },
        )?)
        .await?;
    info!(
        interval_secs = config.sweep_interval.as_secs(),
        "Scheduled: grace reconciliation sweep"
    );

    // Job 2: Invariant checks (daily at 2:30 UTC)
    let invariant_quota = quota.clone();
    scheduler
        .add(Job::new_async("0 30 2 * * *", move |_uuid, _l| {
            let quota = invariant_quota.clone();
            Box::pin(async move {
                info!("Running quota invariant checks");
                match quota.invariants.run_all_checks().await {
                    Ok(summary) => {
                        if summary.healthy {
                            info!(checks_run = summary.checks_run, "All quota invariants hold");
                        } else {
                            for violation in &summary.violations {
                                warn!(
                                    invariant = %violation.invariant,
                                    severity = %violation.severity,
                                    accounts = ?violation.account_ids,
                                    "{}",
                                    violation.description
                                );
                            }
                            warn!(
                                checks_failed = summary.checks_failed,
                                violations = summary.violations.len(),
                                "Quota invariant violations found"
                            );
                        }
                    }
                    Err(e) => error!(error = %e, "Invariant checks failed"),
                }
            })
        })?)
        .await?;
    info!("Scheduled: quota invariant checks (daily at 2:30 UTC)");

    // Job 3: Health check heartbeat (every 5 minutes)
    scheduler
        .add(Job::new_async("0 */5 * * * *", |_uuid, _l| {
            Box::pin(async move {
                info!("Worker heartbeat - all systems operational");
            })
        })?)
        .await?;
    info!("Scheduled: health check heartbeat (every 5 minutes)");

    info!("Starting job scheduler");
    scheduler.start().await?;

    info!("Souq Worker started successfully with 3 scheduled jobs");

    // The scheduler runs jobs in background tasks; stop it cleanly on SIGINT
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, stopping scheduler");
    scheduler.shutdown().await?;
    info!("Souq Worker stopped");

    Ok(())
}
