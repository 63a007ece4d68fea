//! Coda Background Worker
//!
//! Handles scheduled jobs:
//! - Fundraiser settlement (every 15 minutes): pays out or cancels the
//!   pledges of campaigns whose end date has passed
//! - Health check heartbeat (every 5 minutes)

use std::sync::Arc;
use std::time::Duration;

use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

use coda_commerce::{CommerceStore, PgCommerceStore, PledgeService, SettlementResult};

fn log_settlement_results(results: &[SettlementResult]) {
    let succeeded = results.iter().filter(|r| r.goal_met).count();
    let failed = results.len() - succeeded;
    let pledges_paid: u64 = results.iter().map(|r| r.pledges_paid).sum();
    let pledges_cancelled: u64 = results.iter().map(|r| r.pledges_cancelled).sum();

    info!(
        settled = results.len(),
        succeeded = succeeded,
        failed = failed,
        pledges_paid = pledges_paid,
        pledges_cancelled = pledges_cancelled,
        "Fundraiser settlement cycle complete"
    );
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

    info!("Starting Coda Worker");

    let database_url = std::env::var("DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;
    let pool = coda_shared::create_pool(&database_url).await?;
    info!("Database pool created");

    let store: Arc<dyn CommerceStore> = Arc::new(PgCommerceStore::new(pool));
    let pledges = Arc::new(PledgeService::new(store));

    let scheduler = JobScheduler::new().await?;

    // Job 1: Settle ended fundraisers (every 15 minutes)
    let settlement_service = Arc::clone(&pledges);
    scheduler
        .add(Job::new_async("0 */15 * * * *", move |_uuid, _l| {
            let service = Arc::clone(&settlement_service);
            Box::pin(async move {
                info!("Running fundraiser settlement job");
                match service.settle_due_fundraisers().await {
                    Ok(results) => log_settlement_results(&results),
                    Err(e) => error!(error = %e, "Fundraiser settlement cycle failed"),
                }
            })
        })?)
        .await?;
    info!("Scheduled: Fundraiser settlement (every 15 minutes)");

    // Job 2: Health check heartbeat (every 5 minutes)
    scheduler
        .add(Job::new_async("0 */5 * * * *", |_uuid, _l| {
            Box::pin(async move {
                info!("Worker heartbeat - all systems operational");
            })
        })?)
        .await?;
    info!("Scheduled: Health check heartbeat (every 5 minutes)");

    // Run settlement once on startup so a long-stopped worker catches up
    // without waiting for the next tick.
    match pledges.settle_due_fundraisers().await {
        Ok(results) => log_settlement_results(&results),
        Err(e) => error!(error = %e, "Startup settlement run failed"),
    }

    info!("Starting job scheduler");
    scheduler.start().await?;

    // Keep the main task running; the scheduler runs jobs in background
    // tasks.
    loop {
        tokio::time::sleep(Duration::from_secs(3600)).await;
    }
}
