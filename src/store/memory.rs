//! In-process [`HashStore`] backed by plain collections behind a mutex.
//!
//! Mirrors the PostgreSQL queries closely enough for the scheduler to be
//! exercised end to end without a database: the `common_by_alg` uniqueness
//! constraint, the conditional `ready → parsing` claim, and insertion-ordered
//! export. Every status write is appended to a history log so tests can
//! assert on transitions a concurrent reader would have seen.

use super::HashStore;
use crate::db::{AlgUncracked, HashlistRow, HashlistStatus, NewCommonHashlist, TaskStatus};
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone)]
struct MemHash {
    id: i64,
    hashlist_id: i64,
    hash: String,
    salt: Option<String>,
    cracked: bool,
    summ: String,
}

#[derive(Debug, Clone)]
struct MemHashlist {
    row: HashlistRow,
    cracked: i64,
    uncracked: i64,
}

#[derive(Debug, Default)]
struct MemState {
    algs: BTreeMap<i64, String>,
    hashlists: BTreeMap<i64, MemHashlist>,
    hashes: Vec<MemHash>,
    task_works: Vec<(i64, i64, TaskStatus)>,
    next_hashlist_id: i64,
    next_hash_id: i64,
    next_task_id: i64,
    history: Vec<(i64, HashlistStatus)>,
    failing: HashSet<&'static str>,
}

impl MemState {
    fn check(&self, op: &'static str) -> Result<()> {
        if self.failing.contains(op) {
            bail!("injected failure in {}", op);
        }
        Ok(())
    }

    fn set_status(&mut self, hashlist_id: i64, status: HashlistStatus) {
        if let Some(hl) = self.hashlists.get_mut(&hashlist_id) {
            hl.row.status = status.as_str().to_string();
            self.history.push((hashlist_id, status));
        }
    }

    fn is_common(&self, hashlist_id: i64) -> bool {
        self.hashlists
            .get(&hashlist_id)
            .map(|hl| hl.row.common_by_alg != 0)
            .unwrap_or(false)
    }

    fn alg_of(&self, hashlist_id: i64) -> Option<i64> {
        self.hashlists.get(&hashlist_id).map(|hl| hl.row.alg_id)
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_alg(&self, alg_id: i64, name: &str) {
        self.lock().algs.insert(alg_id, name.to_string());
    }

    /// Add an ordinary uploaded hashlist in status `ready`.
    pub fn add_hashlist(&self, name: &str, alg_id: i64, have_salts: bool) -> i64 {
        self.insert_hashlist(name, alg_id, have_salts, 0)
    }

    /// Add a common hashlist directly, bypassing the analyzer.
    pub fn add_common_hashlist(&self, alg_id: i64, have_salts: bool) -> i64 {
        let name = format!("All-{}", alg_id);
        self.insert_hashlist(&name, alg_id, have_salts, alg_id)
    }

    fn insert_hashlist(&self, name: &str, alg_id: i64, have_salts: bool, common_by_alg: i64) -> i64 {
        let mut state = self.lock();
        state.next_hashlist_id += 1;
        let id = state.next_hashlist_id;
        state.hashlists.insert(
            id,
            MemHashlist {
                row: HashlistRow {
                    id,
                    name: name.to_string(),
                    alg_id,
                    have_salts,
                    delimiter: String::new(),
                    parsed: true,
                    tmp_path: String::new(),
                    status: HashlistStatus::Ready.as_str().to_string(),
                    when_loaded: Utc::now(),
                    claimed_at: None,
                    common_by_alg,
                },
                cracked: 0,
                uncracked: 0,
            },
        );
        id
    }

    /// Add a hash row. The dedup key is derived from hash and salt.
    pub fn add_hash(&self, hashlist_id: i64, hash: &str, salt: Option<&str>, cracked: bool) -> i64 {
        let summ = format!("{}:{}", hash, salt.unwrap_or(""));
        self.add_hash_with_summ(hashlist_id, hash, salt, cracked, &summ)
    }

    pub fn add_hash_with_summ(
        &self,
        hashlist_id: i64,
        hash: &str,
        salt: Option<&str>,
        cracked: bool,
        summ: &str,
    ) -> i64 {
        let mut state = self.lock();
        state.next_hash_id += 1;
        let id = state.next_hash_id;
        state.hashes.push(MemHash {
            id,
            hashlist_id,
            hash: hash.to_string(),
            salt: salt.map(str::to_string),
            cracked,
            summ: summ.to_string(),
        });
        if let Some(hl) = state.hashlists.get_mut(&hashlist_id) {
            if cracked {
                hl.cracked += 1;
            } else {
                hl.uncracked += 1;
            }
        }
        id
    }

    pub fn add_task_work(&self, hashlist_id: i64, status: &str) -> i64 {
        let mut state = self.lock();
        state.next_task_id += 1;
        let id = state.next_task_id;
        state.task_works.push((id, hashlist_id, TaskStatus::from(status)));
        id
    }

    /// Overwrite a hashlist's status as another role would.
    pub fn set_hashlist_status(&self, hashlist_id: i64, status: HashlistStatus) {
        self.lock().set_status(hashlist_id, status);
    }

    /// Pretend the current `parsing` claim was taken `secs` ago.
    pub fn backdate_claim(&self, hashlist_id: i64, secs: i64) {
        let claimed_at = chrono::Duration::try_seconds(secs)
            .and_then(|ago| Utc::now().checked_sub_signed(ago))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let mut state = self.lock();
        if let Some(hl) = state.hashlists.get_mut(&hashlist_id) {
            hl.row.claimed_at = Some(claimed_at);
        }
    }

    /// Make every subsequent call to `op` fail.
    pub fn fail_on(&self, op: &'static str) {
        self.lock().failing.insert(op);
    }

    pub fn hashlist(&self, hashlist_id: i64) -> Option<HashlistRow> {
        self.lock().hashlists.get(&hashlist_id).map(|hl| hl.row.clone())
    }

    /// (cracked, uncracked) counters of a hashlist.
    pub fn counters(&self, hashlist_id: i64) -> Option<(i64, i64)> {
        self.lock()
            .hashlists
            .get(&hashlist_id)
            .map(|hl| (hl.cracked, hl.uncracked))
    }

    pub fn common_hashlists(&self, alg_id: i64) -> Vec<i64> {
        self.lock()
            .hashlists
            .values()
            .filter(|hl| hl.row.common_by_alg == alg_id)
            .map(|hl| hl.row.id)
            .collect()
    }

    /// Every status written so far, in order.
    pub fn status_history(&self, hashlist_id: i64) -> Vec<HashlistStatus> {
        self.lock()
            .history
            .iter()
            .filter(|(id, _)| *id == hashlist_id)
            .map(|(_, status)| *status)
            .collect()
    }
}

#[async_trait]
impl HashStore for MemoryStore {
    async fn uncracked_counts_by_alg(&self) -> Result<Vec<AlgUncracked>> {
        let state = self.lock();
        state.check("uncracked_counts_by_alg")?;
        let mut keys: BTreeMap<i64, BTreeSet<&str>> = BTreeMap::new();
        for h in state.hashes.iter().filter(|h| !h.cracked) {
            if state.is_common(h.hashlist_id) {
                continue;
            }
            if let Some(alg_id) = state.alg_of(h.hashlist_id) {
                keys.entry(alg_id).or_default().insert(h.summ.as_str());
            }
        }
        Ok(keys
            .into_iter()
            .map(|(alg_id, summs)| AlgUncracked {
                alg_id,
                uncracked: summs.len() as i64,
            })
            .collect())
    }

    async fn common_hashlist_id(&self, alg_id: i64) -> Result<Option<i64>> {
        let state = self.lock();
        state.check("common_hashlist_id")?;
        Ok(state
            .hashlists
            .values()
            .find(|hl| hl.row.common_by_alg == alg_id)
            .map(|hl| hl.row.id))
    }

    async fn alg_name(&self, alg_id: i64) -> Result<Option<String>> {
        let state = self.lock();
        state.check("alg_name")?;
        Ok(state.algs.get(&alg_id).cloned())
    }

    async fn alg_has_salts(&self, alg_id: i64) -> Result<bool> {
        let state = self.lock();
        state.check("alg_has_salts")?;
        Ok(state
            .hashlists
            .values()
            .any(|hl| hl.row.alg_id == alg_id && hl.row.have_salts))
    }

    async fn insert_common_hashlist(&self, new: &NewCommonHashlist) -> Result<Option<i64>> {
        let mut state = self.lock();
        state.check("insert_common_hashlist")?;
        if state
            .hashlists
            .values()
            .any(|hl| hl.row.common_by_alg == new.alg_id)
        {
            return Ok(None);
        }
        state.next_hashlist_id += 1;
        let id = state.next_hashlist_id;
        state.hashlists.insert(
            id,
            MemHashlist {
                row: HashlistRow {
                    id,
                    name: new.name.clone(),
                    alg_id: new.alg_id,
                    have_salts: new.have_salts,
                    delimiter: new.delimiter.clone(),
                    parsed: false,
                    tmp_path: String::new(),
                    status: HashlistStatus::Ready.as_str().to_string(),
                    when_loaded: Utc::now(),
                    claimed_at: None,
                    common_by_alg: new.alg_id,
                },
                cracked: 0,
                uncracked: 0,
            },
        );
        Ok(Some(id))
    }

    async fn count_hashes_in_hashlist(&self, hashlist_id: i64) -> Result<i64> {
        let state = self.lock();
        state.check("count_hashes_in_hashlist")?;
        Ok(state
            .hashes
            .iter()
            .filter(|h| h.hashlist_id == hashlist_id)
            .count() as i64)
    }

    async fn hashlist_status(&self, hashlist_id: i64) -> Result<Option<HashlistStatus>> {
        let state = self.lock();
        state.check("hashlist_status")?;
        state
            .hashlists
            .get(&hashlist_id)
            .map(|hl| hl.row.status())
            .transpose()
    }

    async fn hashlists_in_work(&self) -> Result<Vec<i64>> {
        let state = self.lock();
        state.check("hashlists_in_work")?;
        let ids: BTreeSet<i64> = state
            .task_works
            .iter()
            .filter(|(_, _, status)| *status == TaskStatus::Work)
            .map(|(_, hashlist_id, _)| *hashlist_id)
            .collect();
        Ok(ids.into_iter().collect())
    }

    async fn alg_has_output_in_flight(&self, alg_id: i64) -> Result<bool> {
        let state = self.lock();
        state.check("alg_has_output_in_flight")?;
        Ok(state.task_works.iter().any(|(_, hashlist_id, status)| {
            state.alg_of(*hashlist_id) == Some(alg_id) && status.is_output_in_flight()
        }))
    }

    async fn claim_for_parsing(&self, hashlist_id: i64) -> Result<bool> {
        let mut state = self.lock();
        state.check("claim_for_parsing")?;
        let claimable = state
            .hashlists
            .get(&hashlist_id)
            .map(|hl| hl.row.status == HashlistStatus::Ready.as_str())
            .unwrap_or(false);
        if !claimable {
            return Ok(false);
        }
        state.set_status(hashlist_id, HashlistStatus::Parsing);
        if let Some(hl) = state.hashlists.get_mut(&hashlist_id) {
            hl.row.parsed = false;
            hl.row.claimed_at = Some(Utc::now());
        }
        Ok(true)
    }

    async fn purge_hashlist(&self, hashlist_id: i64) -> Result<()> {
        let mut state = self.lock();
        state.check("purge_hashlist")?;
        state.hashes.retain(|h| h.hashlist_id != hashlist_id);
        if let Some(hl) = state.hashlists.get_mut(&hashlist_id) {
            hl.cracked = 0;
            hl.uncracked = 0;
        }
        Ok(())
    }

    fn export_hash_lines<'a>(
        &'a self,
        alg_id: i64,
        delimiter: Option<&'a str>,
    ) -> BoxStream<'a, Result<String>> {
        let state = self.lock();
        if let Err(e) = state.check("export_hash_lines") {
            return stream::once(async move { Err(e) }).boxed();
        }
        let mut rows: Vec<&MemHash> = state
            .hashes
            .iter()
            .filter(|h| !h.cracked)
            .filter(|h| state.alg_of(h.hashlist_id) == Some(alg_id))
            .filter(|h| !state.is_common(h.hashlist_id))
            .collect();
        rows.sort_by_key(|h| h.id);
        let lines: Vec<Result<String>> = rows
            .into_iter()
            .map(|h| match delimiter {
                Some(delim) => Ok(format!(
                    "{}{}{}",
                    h.hash,
                    delim,
                    h.salt.as_deref().unwrap_or("")
                )),
                None => Ok(h.hash.clone()),
            })
            .collect();
        stream::iter(lines).boxed()
    }

    async fn hand_off(&self, hashlist_id: i64, tmp_path: &str) -> Result<()> {
        let mut state = self.lock();
        state.check("hand_off")?;
        let parsing = state
            .hashlists
            .get(&hashlist_id)
            .map(|hl| hl.row.status == HashlistStatus::Parsing.as_str())
            .unwrap_or(false);
        if !parsing {
            bail!("hashlist {} is no longer parsing, hand-off dropped", hashlist_id);
        }
        state.set_status(hashlist_id, HashlistStatus::Wait);
        if let Some(hl) = state.hashlists.get_mut(&hashlist_id) {
            hl.row.tmp_path = tmp_path.to_string();
            hl.row.when_loaded = Utc::now();
            hl.row.claimed_at = None;
        }
        Ok(())
    }

    async fn recover_stale_parsing(&self, stale_seconds: i32) -> Result<u64> {
        let mut state = self.lock();
        state.check("recover_stale_parsing")?;
        let cutoff: DateTime<Utc> = chrono::Duration::try_seconds(i64::from(stale_seconds))
            .and_then(|after| Utc::now().checked_sub_signed(after))
            .ok_or_else(|| anyhow!("stale threshold of {}s is out of range", stale_seconds))?;
        let stale: Vec<i64> = state
            .hashlists
            .values()
            .filter(|hl| hl.row.common_by_alg != 0)
            .filter(|hl| hl.row.status == HashlistStatus::Parsing.as_str())
            .filter(|hl| hl.row.claimed_at.map(|at| at < cutoff).unwrap_or(true))
            .map(|hl| hl.row.id)
            .collect();
        for id in &stale {
            state.set_status(*id, HashlistStatus::Ready);
            if let Some(hl) = state.hashlists.get_mut(id) {
                hl.row.parsed = false;
                hl.row.claimed_at = None;
            }
        }
        Ok(stale.len() as u64)
    }
}
