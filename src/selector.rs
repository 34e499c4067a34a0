//! # Selector — Picking At Most One Algorithm Per Cycle
//!
//! Walks algorithms in the order the analyzer returns them and picks the
//! first whose common list is stale and not touched by any other role. The
//! deferral rules read status fields owned by other roles and never write
//! them; a deferred algorithm is simply reconsidered next cycle.

use crate::analyzer::{
    resolve_or_create_common_hashlist, uncracked_count_in_hashlist, uncracked_counts_by_algorithm,
};
use crate::db::HashlistStatus;
use crate::store::HashStore;
use anyhow::{anyhow, Result};
use serde::Serialize;
use std::fmt;
use tracing::info;

/// An algorithm whose common list should be rebuilt now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Candidate {
    pub alg_id: i64,
    pub hashlist_id: i64,
    pub current: i64,
    pub target: i64,
}

/// Everything the deferral rules look at for one algorithm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlgSnapshot {
    pub alg_id: i64,
    pub hashlist_id: i64,
    pub current: i64,
    pub target: i64,
    pub output_in_flight: bool,
    pub in_work: bool,
    pub status: HashlistStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Skip {
    /// Row count already matches the target.
    UpToDate,
    /// Results for this algorithm are waiting for or undergoing ingestion.
    OutputInFlight,
    /// A cracking task is working on the common list.
    InWork,
    /// The common list is not `ready` (being rebuilt, waiting, consumed).
    NotReady(HashlistStatus),
}

impl fmt::Display for Skip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Skip::UpToDate => f.write_str("up to date"),
            Skip::OutputInFlight => f.write_str("output parsing or waiting for parse"),
            Skip::InWork => f.write_str("in work"),
            Skip::NotReady(status) => write!(f, "not ready ({})", status),
        }
    }
}

/// Apply the deferral rules in order. `None` means build.
pub fn evaluate(snapshot: &AlgSnapshot) -> Option<Skip> {
    if snapshot.current == snapshot.target {
        return Some(Skip::UpToDate);
    }
    if snapshot.output_in_flight {
        return Some(Skip::OutputInFlight);
    }
    if snapshot.in_work {
        return Some(Skip::InWork);
    }
    if snapshot.status != HashlistStatus::Ready {
        return Some(Skip::NotReady(snapshot.status));
    }
    None
}

/// Scan algorithms and return the first buildable one, if any.
pub async fn select_candidate(store: &dyn HashStore) -> Result<Option<Candidate>> {
    let targets = uncracked_counts_by_algorithm(store).await?;
    if targets.is_empty() {
        return Ok(None);
    }

    for target in targets {
        let alg_id = target.alg_id;
        let hashlist_id = resolve_or_create_common_hashlist(store, alg_id).await?;
        let current = uncracked_count_in_hashlist(store, hashlist_id).await?;

        // Cheap check first; the rest only matters for stale lists.
        if current == target.uncracked {
            continue;
        }

        let output_in_flight = store.alg_has_output_in_flight(alg_id).await?;
        let in_work = store.hashlists_in_work().await?.contains(&hashlist_id);
        let status = store
            .hashlist_status(hashlist_id)
            .await?
            .ok_or_else(|| anyhow!("common hashlist {} disappeared", hashlist_id))?;

        let snapshot = AlgSnapshot {
            alg_id,
            hashlist_id,
            current,
            target: target.uncracked,
            output_in_flight,
            in_work,
            status,
        };

        match evaluate(&snapshot) {
            Some(Skip::UpToDate) => continue,
            Some(reason) => {
                info!(alg_id, hashlist_id, %status, reason = %reason, "skipping alg");
                continue;
            }
            None => {
                info!(
                    alg_id,
                    hashlist_id,
                    current,
                    target = target.uncracked,
                    "selected alg for common list build"
                );
                return Ok(Some(Candidate {
                    alg_id,
                    hashlist_id,
                    current,
                    target: target.uncracked,
                }));
            }
        }
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    fn snapshot() -> AlgSnapshot {
        AlgSnapshot {
            alg_id: 1,
            hashlist_id: 7,
            current: 0,
            target: 3,
            output_in_flight: false,
            in_work: false,
            status: HashlistStatus::Ready,
        }
    }

    #[test]
    fn stale_ready_list_is_built() {
        assert_eq!(evaluate(&snapshot()), None);
    }

    #[test]
    fn matching_count_is_skipped_first() {
        let s = AlgSnapshot {
            current: 3,
            output_in_flight: true,
            status: HashlistStatus::Work,
            ..snapshot()
        };
        assert_eq!(evaluate(&s), Some(Skip::UpToDate));
    }

    #[test]
    fn output_in_flight_defers() {
        let s = AlgSnapshot {
            output_in_flight: true,
            ..snapshot()
        };
        assert_eq!(evaluate(&s), Some(Skip::OutputInFlight));
    }

    #[test]
    fn in_work_defers_even_when_status_ready() {
        let s = AlgSnapshot {
            in_work: true,
            ..snapshot()
        };
        assert_eq!(evaluate(&s), Some(Skip::InWork));
    }

    #[test]
    fn every_non_ready_status_defers() {
        for status in [
            HashlistStatus::Parsing,
            HashlistStatus::Wait,
            HashlistStatus::Work,
            HashlistStatus::WaitOutParse,
            HashlistStatus::OutParsing,
        ] {
            let s = AlgSnapshot {
                status,
                ..snapshot()
            };
            assert_eq!(evaluate(&s), Some(Skip::NotReady(status)));
        }
    }

    #[test]
    fn shrinking_target_still_triggers_build() {
        // Hashes cracked since the last build: current > target.
        let s = AlgSnapshot {
            current: 5,
            target: 2,
            ..snapshot()
        };
        assert_eq!(evaluate(&s), None);
    }

    #[tokio::test]
    async fn empty_inventory_yields_no_candidate() {
        let store = MemoryStore::new();
        assert_eq!(select_candidate(&store).await.unwrap(), None);
    }

    #[tokio::test]
    async fn deferred_alg_falls_through_to_next() {
        let store = MemoryStore::new();
        store.add_alg(1, "MD5");
        store.add_alg(2, "SHA1");
        let a = store.add_hashlist("a", 1, false);
        let b = store.add_hashlist("b", 2, false);
        store.add_hash(a, "h1", None, false);
        store.add_hash(b, "h2", None, false);
        store.add_task_work(a, "outparsing");

        let candidate = select_candidate(&store).await.unwrap().unwrap();
        assert_eq!(candidate.alg_id, 2);
        assert_eq!(candidate.target, 1);
        assert_eq!(candidate.current, 0);
    }

    #[tokio::test]
    async fn first_eligible_alg_wins() {
        let store = MemoryStore::new();
        store.add_alg(1, "MD5");
        store.add_alg(2, "SHA1");
        let a = store.add_hashlist("a", 1, false);
        let b = store.add_hashlist("b", 2, false);
        store.add_hash(a, "h1", None, false);
        store.add_hash(b, "h2", None, false);

        let candidate = select_candidate(&store).await.unwrap().unwrap();
        assert_eq!(candidate.alg_id, 1);
        // Scanning stops at the first candidate.
        assert_eq!(store.common_hashlists(1).len(), 1);
        assert!(store.common_hashlists(2).is_empty());
    }
}
