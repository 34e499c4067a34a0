//! # Builder — Rebuilding a Common Hashlist
//!
//! Turns a selected [`Candidate`] into a flat file of every uncracked hash of
//! its algorithm and hands that file to the dispatcher.
//!
//! ```text
//! ready ──claim──> parsing ──purge──> (export to tmp_dir/<random>) ──hand off──> wait
//! ```
//!
//! Between the claim and the hand-off the hashlist's rows and metadata belong
//! to the scheduler alone. A failure in that window leaves the list in
//! `parsing`; the scheduler's startup sweep is what brings it back.
//!
//! Old artifacts are never removed here.

use crate::selector::Candidate;
use crate::store::HashStore;
use anyhow::{anyhow, Context, Result};
use futures::TryStreamExt;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{info, warn};

/// Separator between hash and salt in exported lines.
pub const DELIMITER: &str = "UNIQUEDELIMITER";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildReport {
    pub alg_id: i64,
    pub hashlist_id: i64,
    pub path: PathBuf,
    pub lines_written: u64,
    pub lines_skipped: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    Built(BuildReport),
    /// The hashlist left `ready` before it could be claimed.
    ClaimLost,
}

/// Normalise one export row. Returns `None` for rows that must not reach
/// the file: blank ones and the bare delimiter (a salted row whose hash and
/// salt were both empty).
pub fn export_line(raw: &str) -> Option<&str> {
    let line = raw.trim();
    if line.is_empty() || line == DELIMITER {
        None
    } else {
        Some(line)
    }
}

/// Claim, purge, export and hand off the candidate's common hashlist.
pub async fn build(
    store: &dyn HashStore,
    candidate: &Candidate,
    tmp_dir: &Path,
) -> Result<BuildOutcome> {
    let Candidate {
        alg_id,
        hashlist_id,
        ..
    } = *candidate;

    // Mark as parsing first so the dispatcher does not pick it up mid-build.
    if !store.claim_for_parsing(hashlist_id).await? {
        warn!(alg_id, hashlist_id, "hashlist left ready before claim, deferring");
        return Ok(BuildOutcome::ClaimLost);
    }

    info!(hashlist_id, "deleting old hashes");
    store
        .purge_hashlist(hashlist_id)
        .await
        .with_context(|| format!("purging hashlist {}", hashlist_id))?;

    info!(hashlist_id, alg_id, "exporting hashes to file");
    let salted = store.alg_has_salts(alg_id).await?;
    let (path, lines_written, lines_skipped) = export_to_file(store, alg_id, salted, tmp_dir)
        .await
        .with_context(|| format!("exporting hashes of alg {} to {}", alg_id, tmp_dir.display()))?;

    let path_str = path
        .to_str()
        .ok_or_else(|| anyhow!("non UTF-8 export path {}", path.display()))?;
    store
        .hand_off(hashlist_id, path_str)
        .await
        .with_context(|| format!("handing off hashlist {}", hashlist_id))?;

    info!(
        hashlist_id,
        alg_id,
        path = %path.display(),
        lines = lines_written,
        skipped = lines_skipped,
        "common hashlist ready"
    );
    Ok(BuildOutcome::Built(BuildReport {
        alg_id,
        hashlist_id,
        path,
        lines_written,
        lines_skipped,
    }))
}

/// Stream the algorithm's export rows into a new randomly named file under
/// `tmp_dir`. Returns (path, written, skipped).
async fn export_to_file(
    store: &dyn HashStore,
    alg_id: i64,
    salted: bool,
    tmp_dir: &Path,
) -> Result<(PathBuf, u64, u64)> {
    tokio::fs::create_dir_all(tmp_dir).await?;
    let path = tmp_dir.join(uuid::Uuid::new_v4().simple().to_string());
    let file = tokio::fs::File::create(&path).await?;
    let mut out = BufWriter::new(file);

    let delimiter = salted.then_some(DELIMITER);
    let mut rows = store.export_hash_lines(alg_id, delimiter);
    let mut written = 0u64;
    let mut skipped = 0u64;
    while let Some(row) = rows.try_next().await? {
        match export_line(&row) {
            Some(line) => {
                out.write_all(line.as_bytes()).await?;
                out.write_all(b"\n").await?;
                written += 1;
            }
            None => skipped += 1,
        }
    }
    out.flush().await?;
    Ok((path, written, skipped))
}
