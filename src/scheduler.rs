//! # Scheduler — The Consolidation Loop
//!
//! One long-lived task: select, maybe build, sleep, repeat. Cycles never
//! overlap within a process. Coordination with other roles happens only
//! through hashlist and task status fields, so two schedulers against the same
//! store avoid each other on a best-effort basis, not by mutual exclusion.
//!
//! ## Failure contract
//!
//! Any error inside a cycle ends [`Scheduler::run`]: it is logged once with
//! the candidate's ids (when one was selected) and returned to the caller.
//! Restarting is the supervisor's job.
//!
//! ## Stopping and waking
//!
//! [`SchedulerHandle::stop`] clears the running flag; the loop exits before
//! its next cycle. A cycle already in progress, including a long export, runs
//! to completion. [`SchedulerHandle::wake`] ends the current sleep early so
//! an upload or ingestion role can request a prompt re-check.

use crate::builder::{self, BuildOutcome, BuildReport};
use crate::config::SchedulerConfig;
use crate::selector::{self, Candidate};
use crate::store::HashStore;
use anyhow::{anyhow, Result};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

/// What one cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// No algorithm needed (or was allowed) a rebuild.
    Idle,
    Built(BuildReport),
    /// A candidate was selected but another role claimed it first.
    ClaimLost(Candidate),
}

/// Error context attached to every failed cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleFailure {
    pub candidate: Option<Candidate>,
}

impl fmt::Display for CycleFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.candidate {
            Some(c) => write!(
                f,
                "consolidation of alg {} into hashlist {} failed",
                c.alg_id, c.hashlist_id
            ),
            None => f.write_str("candidate selection failed"),
        }
    }
}

/// Cloneable remote control for a running scheduler.
#[derive(Clone)]
pub struct SchedulerHandle {
    running: Arc<AtomicBool>,
    wake: Arc<Notify>,
}

impl SchedulerHandle {
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.wake.notify_one();
    }

    pub fn wake(&self) {
        self.wake.notify_one();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

pub struct Scheduler {
    store: Arc<dyn HashStore>,
    config: SchedulerConfig,
    running: Arc<AtomicBool>,
    wake: Arc<Notify>,
}

impl Scheduler {
    pub fn new(store: Arc<dyn HashStore>, config: SchedulerConfig) -> Self {
        Scheduler {
            store,
            config,
            running: Arc::new(AtomicBool::new(true)),
            wake: Arc::new(Notify::new()),
        }
    }

    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            running: Arc::clone(&self.running),
            wake: Arc::clone(&self.wake),
        }
    }

    /// One select-then-build pass.
    pub async fn run_cycle(&self) -> Result<CycleOutcome> {
        let store = self.store.as_ref();
        let candidate = selector::select_candidate(store)
            .await
            .map_err(|e| e.context(CycleFailure { candidate: None }))?;

        let Some(candidate) = candidate else {
            debug!("no common hashlist needs rebuilding");
            return Ok(CycleOutcome::Idle);
        };

        let outcome = builder::build(store, &candidate, &self.config.tmp_dir)
            .await
            .map_err(|e| {
                e.context(CycleFailure {
                    candidate: Some(candidate),
                })
            })?;
        Ok(match outcome {
            BuildOutcome::Built(report) => CycleOutcome::Built(report),
            BuildOutcome::ClaimLost => CycleOutcome::ClaimLost(candidate),
        })
    }

    /// Reset common lists abandoned in `parsing`. No-op when disabled.
    pub async fn recover_stale(&self) -> Result<u64> {
        let Some(after) = self.config.stale_parsing_after else {
            return Ok(0);
        };
        let secs = i32::try_from(after.as_secs())
            .map_err(|_| anyhow!("stale parsing threshold {}s is out of range", after.as_secs()))?;
        let reset = self.store.recover_stale_parsing(secs).await?;
        if reset > 0 {
            warn!(count = reset, stale_secs = secs, "reset abandoned parsing hashlists to ready");
        }
        Ok(reset)
    }

    /// Loop until stopped or a cycle fails.
    pub async fn run(&self) -> Result<()> {
        self.config.validate()?;
        info!(
            delay_secs = self.config.delay.as_secs(),
            tmp_dir = %self.config.tmp_dir.display(),
            "hashlist consolidation scheduler starting"
        );

        if let Err(e) = self.recover_stale().await {
            let msg = format!("{:#}", e);
            error!(error = %msg, "startup recovery sweep failed");
            return Err(e);
        }

        while self.running.load(Ordering::SeqCst) {
            match self.run_cycle().await {
                Ok(CycleOutcome::Built(report)) => {
                    info!(hashlist_id = report.hashlist_id, alg_id = report.alg_id, "done");
                }
                Ok(CycleOutcome::ClaimLost(c)) => {
                    debug!(alg_id = c.alg_id, hashlist_id = c.hashlist_id, "claim lost");
                }
                Ok(CycleOutcome::Idle) => {}
                Err(e) => {
                    let candidate = e.downcast_ref::<CycleFailure>().and_then(|f| f.candidate);
                    let msg = format!("{:#}", e);
                    error!(
                        alg_id = candidate.map(|c| c.alg_id),
                        hashlist_id = candidate.map(|c| c.hashlist_id),
                        error = %msg,
                        "scheduler stopped after failure"
                    );
                    return Err(e);
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.delay) => {}
                _ = self.wake.notified() => {}
            }
        }

        info!("hashlist consolidation scheduler stopped");
        Ok(())
    }
}
