//! # Analyzer — Per-Algorithm Coverage
//!
//! Answers three questions for the selector:
//!
//! - how many distinct uncracked hashes each algorithm has outside the
//!   common lists (the *target* a common list should hold),
//! - which hashlist is the common list for an algorithm (creating it lazily),
//! - how many rows a given hashlist currently holds.

use crate::builder::DELIMITER;
use crate::db::{AlgUncracked, NewCommonHashlist};
use crate::store::HashStore;
use anyhow::{anyhow, bail, Context, Result};
use serde::Serialize;
use tracing::info;

/// Target vs. current row count for one algorithm's common list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Coverage {
    pub alg_id: i64,
    pub common_hashlist_id: Option<i64>,
    pub target: i64,
    pub current: i64,
}

impl Coverage {
    pub fn is_current(&self) -> bool {
        self.target == self.current
    }
}

/// Distinct uncracked hash count per algorithm, excluding common lists.
///
/// Algorithms with no uncracked hashes do not appear.
pub async fn uncracked_counts_by_algorithm(store: &dyn HashStore) -> Result<Vec<AlgUncracked>> {
    let counts = store
        .uncracked_counts_by_alg()
        .await
        .context("counting uncracked hashes by algorithm")?;
    Ok(counts.into_iter().filter(|c| c.uncracked > 0).collect())
}

/// Find the common hashlist for `alg_id`, creating `All-<alg name>` if absent.
///
/// Safe to race: when the insert loses to a concurrent creator the existing
/// row is re-read, so every caller ends up with the same id.
pub async fn resolve_or_create_common_hashlist(store: &dyn HashStore, alg_id: i64) -> Result<i64> {
    // 0 is the "not a common list" marker in common_by_alg.
    if alg_id <= 0 {
        bail!("algorithm id {} cannot own a common hashlist", alg_id);
    }
    if let Some(id) = store.common_hashlist_id(alg_id).await? {
        return Ok(id);
    }

    let alg_name = store
        .alg_name(alg_id)
        .await?
        .ok_or_else(|| anyhow!("algorithm {} not found", alg_id))?;
    let have_salts = store.alg_has_salts(alg_id).await?;
    let new = NewCommonHashlist {
        name: format!("All-{}", alg_name),
        alg_id,
        have_salts,
        delimiter: DELIMITER.to_string(),
    };

    if let Some(id) = store
        .insert_common_hashlist(&new)
        .await
        .with_context(|| format!("creating common hashlist for alg {}", alg_id))?
    {
        info!(alg_id, hashlist_id = id, name = %new.name, have_salts, "created common hashlist");
        return Ok(id);
    }

    store
        .common_hashlist_id(alg_id)
        .await?
        .ok_or_else(|| anyhow!("common hashlist for alg {} vanished after insert conflict", alg_id))
}

/// Rows currently stored in a hashlist.
pub async fn uncracked_count_in_hashlist(store: &dyn HashStore, hashlist_id: i64) -> Result<i64> {
    store
        .count_hashes_in_hashlist(hashlist_id)
        .await
        .with_context(|| format!("counting hashes of hashlist {}", hashlist_id))
}

/// Coverage report for every algorithm with uncracked hashes. Read-only:
/// does not create missing common lists.
pub async fn coverage_report(store: &dyn HashStore) -> Result<Vec<Coverage>> {
    let mut report = Vec::new();
    for AlgUncracked { alg_id, uncracked } in uncracked_counts_by_algorithm(store).await? {
        let common_hashlist_id = store.common_hashlist_id(alg_id).await?;
        let current = match common_hashlist_id {
            Some(id) => uncracked_count_in_hashlist(store, id).await?,
            None => 0,
        };
        report.push(Coverage {
            alg_id,
            common_hashlist_id,
            target: uncracked,
            current,
        });
    }
    Ok(report)
}
