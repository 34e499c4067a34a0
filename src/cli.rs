//! # CLI Execution Functions
//!
//! Kept out of `main.rs` so the entry point stays a thin router. Each
//! function resolves configuration before touching the database, so a bad
//! flag fails fast without a connection attempt.

use anyhow::Result;
use hashlist_consolidator::config::{self, ConfigFile, Overrides};
use hashlist_consolidator::db::Database;
use hashlist_consolidator::{analyzer, CycleOutcome, Scheduler, SchedulerConfig};
use std::sync::Arc;
use tokio::runtime::Runtime;
use tracing::info;

use super::Cli;

fn scheduler_config(cli: &Cli) -> Result<SchedulerConfig> {
    let file = cli.config.as_deref().map(ConfigFile::load).transpose()?;
    let overrides = Overrides {
        delay_secs: cli.delay_secs,
        tmp_dir: cli.tmp_dir.clone(),
        stale_parsing_secs: cli.stale_parsing_secs,
    };
    config::resolve(file.as_ref(), &overrides)
}

async fn connect(cli: &Cli) -> Result<Database> {
    let database_url = cli.database_url.as_deref().ok_or_else(|| {
        anyhow::anyhow!("DATABASE_URL is required (set via --database-url or env)")
    })?;
    Database::connect(database_url).await
}

/// Run the loop until SIGINT/SIGTERM stops it or a cycle fails.
pub fn run_scheduler(rt: &Runtime, cli: &Cli) -> Result<()> {
    let config = scheduler_config(cli)?;
    rt.block_on(async {
        let database = connect(cli).await?;
        let scheduler = Scheduler::new(Arc::new(database), config);

        let handle = scheduler.handle();
        tokio::spawn(async move {
            shutdown_signal().await;
            handle.stop();
        });

        scheduler.run().await
    })
}

pub fn run_once(rt: &Runtime, cli: &Cli) -> Result<()> {
    let config = scheduler_config(cli)?;
    rt.block_on(async {
        let database = connect(cli).await?;
        let scheduler = Scheduler::new(Arc::new(database), config);
        match scheduler.run_cycle().await? {
            CycleOutcome::Idle => println!("No common hashlist needs rebuilding"),
            CycleOutcome::ClaimLost(c) => println!(
                "Hashlist #{} (alg {}) was claimed by another role, deferred",
                c.hashlist_id, c.alg_id
            ),
            CycleOutcome::Built(report) => println!(
                "Rebuilt hashlist #{} (alg {}): {} lines -> {}",
                report.hashlist_id,
                report.alg_id,
                report.lines_written,
                report.path.display()
            ),
        }
        Ok(())
    })
}

pub fn run_coverage(rt: &Runtime, cli: &Cli) -> Result<()> {
    rt.block_on(async {
        let database = connect(cli).await?;
        let report = analyzer::coverage_report(&database).await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        Ok(())
    })
}

pub fn run_recover(rt: &Runtime, cli: &Cli) -> Result<()> {
    let mut config = scheduler_config(cli)?;
    if config.stale_parsing_after.is_none() {
        // An explicit `recover` with the sweep disabled resets every stuck list.
        config.stale_parsing_after = Some(std::time::Duration::ZERO);
    }
    rt.block_on(async {
        let database = connect(cli).await?;
        let scheduler = Scheduler::new(Arc::new(database), config);
        let reset = scheduler.recover_stale().await?;
        println!("Reset {} hashlist(s) from parsing to ready", reset);
        Ok(())
    })
}

pub fn run_migrate(rt: &Runtime, cli: &Cli) -> Result<()> {
    rt.block_on(async {
        let database = connect(cli).await?;
        database.migrate().await?;
        info!("hash inventory schema applied");
        Ok(())
    })
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("received SIGINT, stopping after current cycle"),
                    _ = sigterm.recv() => info!("received SIGTERM, stopping after current cycle"),
                }
            }
            Err(_) => {
                ctrl_c.await.ok();
                info!("received SIGINT, stopping after current cycle");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("received SIGINT, stopping after current cycle");
    }
}
