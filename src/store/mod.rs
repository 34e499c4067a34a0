//! # Store — The Scheduler's View of the Hash Inventory
//!
//! [`HashStore`] is the narrow set of queries the consolidation core needs.
//! [`Database`](crate::db::Database) implements it against PostgreSQL;
//! [`memory::MemoryStore`] implements it in-process for tests (built with
//! `cfg(test)` or the `test-util` feature).
//!
//! Every method is a single blocking round-trip from the caller's point of
//! view. Nothing here spans a transaction across calls, so every
//! check-then-act sequence built on top of it is best-effort only.

#[cfg(any(test, feature = "test-util"))]
pub mod memory;

use crate::db::{AlgUncracked, Database, HashlistStatus, NewCommonHashlist};
use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;

#[async_trait]
pub trait HashStore: Send + Sync {
    /// Distinct uncracked dedup keys per algorithm, excluding common lists.
    async fn uncracked_counts_by_alg(&self) -> Result<Vec<AlgUncracked>>;

    async fn common_hashlist_id(&self, alg_id: i64) -> Result<Option<i64>>;

    async fn alg_name(&self, alg_id: i64) -> Result<Option<String>>;

    async fn alg_has_salts(&self, alg_id: i64) -> Result<bool>;

    /// Insert a common hashlist; `None` if the algorithm already has one.
    async fn insert_common_hashlist(&self, new: &NewCommonHashlist) -> Result<Option<i64>>;

    async fn count_hashes_in_hashlist(&self, hashlist_id: i64) -> Result<i64>;

    async fn hashlist_status(&self, hashlist_id: i64) -> Result<Option<HashlistStatus>>;

    /// Hashlist ids bound to a TaskWork in status `work`.
    async fn hashlists_in_work(&self) -> Result<Vec<i64>>;

    /// Any TaskWork of this algorithm in `waitoutparse` or `outparsing`.
    async fn alg_has_output_in_flight(&self, alg_id: i64) -> Result<bool>;

    /// Compare-and-set `ready → parsing`. `false` means the claim was lost.
    async fn claim_for_parsing(&self, hashlist_id: i64) -> Result<bool>;

    /// Delete the hashlist's rows and zero its cracked/uncracked counters.
    async fn purge_hashlist(&self, hashlist_id: i64) -> Result<()>;

    /// Raw export rows for an algorithm; see [`Database::export_hash_lines`].
    fn export_hash_lines<'a>(
        &'a self,
        alg_id: i64,
        delimiter: Option<&'a str>,
    ) -> BoxStream<'a, Result<String>>;

    /// `parsing → wait` with the new artifact path and a fresh load time.
    /// Errors if the hashlist is no longer `parsing`.
    async fn hand_off(&self, hashlist_id: i64, tmp_path: &str) -> Result<()>;

    /// Reset common lists stuck in `parsing` longer than `stale_seconds`.
    async fn recover_stale_parsing(&self, stale_seconds: i32) -> Result<u64>;
}

#[async_trait]
impl HashStore for Database {
    async fn uncracked_counts_by_alg(&self) -> Result<Vec<AlgUncracked>> {
        Database::uncracked_counts_by_alg(self).await
    }

    async fn common_hashlist_id(&self, alg_id: i64) -> Result<Option<i64>> {
        Database::common_hashlist_id(self, alg_id).await
    }

    async fn alg_name(&self, alg_id: i64) -> Result<Option<String>> {
        Database::alg_name(self, alg_id).await
    }

    async fn alg_has_salts(&self, alg_id: i64) -> Result<bool> {
        Database::alg_has_salts(self, alg_id).await
    }

    async fn insert_common_hashlist(&self, new: &NewCommonHashlist) -> Result<Option<i64>> {
        Database::insert_common_hashlist(self, new).await
    }

    async fn count_hashes_in_hashlist(&self, hashlist_id: i64) -> Result<i64> {
        Database::count_hashes_in_hashlist(self, hashlist_id).await
    }

    async fn hashlist_status(&self, hashlist_id: i64) -> Result<Option<HashlistStatus>> {
        Database::hashlist_status(self, hashlist_id).await
    }

    async fn hashlists_in_work(&self) -> Result<Vec<i64>> {
        Database::hashlists_in_work(self).await
    }

    async fn alg_has_output_in_flight(&self, alg_id: i64) -> Result<bool> {
        Database::alg_has_output_in_flight(self, alg_id).await
    }

    async fn claim_for_parsing(&self, hashlist_id: i64) -> Result<bool> {
        Database::claim_for_parsing(self, hashlist_id).await
    }

    async fn purge_hashlist(&self, hashlist_id: i64) -> Result<()> {
        Database::purge_hashlist(self, hashlist_id).await
    }

    fn export_hash_lines<'a>(
        &'a self,
        alg_id: i64,
        delimiter: Option<&'a str>,
    ) -> BoxStream<'a, Result<String>> {
        Database::export_hash_lines(self, alg_id, delimiter)
    }

    async fn hand_off(&self, hashlist_id: i64, tmp_path: &str) -> Result<()> {
        Database::hand_off(self, hashlist_id, tmp_path).await
    }

    async fn recover_stale_parsing(&self, stale_seconds: i32) -> Result<u64> {
        Database::recover_stale_parsing(self, stale_seconds).await
    }
}
