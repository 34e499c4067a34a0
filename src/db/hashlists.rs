//! Hashlist lookups and status transitions.
//!
//! The scheduler only ever writes to a common hashlist, and only across the
//! window it claims for itself:
//!
//! 1. `claim_for_parsing`: compare-and-set `ready → parsing`
//! 2. `purge_hashlist` (in [`super::hashes`]): drop stale rows, zero counters
//! 3. `hand_off`: `parsing → wait` with the new artifact path
//!
//! `recover_stale_parsing` resets lists left in `parsing` by a crashed run.

use super::{Database, HashlistRow, HashlistStatus, NewCommonHashlist};
use anyhow::{bail, Result};

impl Database {
    /// Id of the common hashlist for an algorithm, if one exists.
    pub async fn common_hashlist_id(&self, alg_id: i64) -> Result<Option<i64>> {
        let id: Option<i64> =
            sqlx::query_scalar("SELECT id FROM hashlists WHERE common_by_alg = $1")
                .bind(alg_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(id)
    }

    /// Display name of an algorithm.
    pub async fn alg_name(&self, alg_id: i64) -> Result<Option<String>> {
        let name: Option<String> = sqlx::query_scalar("SELECT name FROM algs WHERE id = $1")
            .bind(alg_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(name)
    }

    /// Whether any hashlist of the algorithm carries salts.
    pub async fn alg_has_salts(&self, alg_id: i64) -> Result<bool> {
        let salted: bool = sqlx::query_scalar(
            "SELECT COALESCE(bool_or(have_salts), FALSE) FROM hashlists WHERE alg_id = $1",
        )
        .bind(alg_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(salted)
    }

    /// Insert a common hashlist. Returns `None` when another writer already
    /// holds the `common_by_alg` slot for this algorithm.
    pub async fn insert_common_hashlist(&self, new: &NewCommonHashlist) -> Result<Option<i64>> {
        let id: Option<i64> = sqlx::query_scalar(
            "INSERT INTO hashlists (name, alg_id, have_salts, delimiter, parsed, tmp_path,
                                    status, when_loaded, common_by_alg)
             VALUES ($1, $2, $3, $4, FALSE, '', 'ready', NOW(), $2)
             ON CONFLICT (common_by_alg) WHERE common_by_alg <> 0 DO NOTHING
             RETURNING id",
        )
        .bind(&new.name)
        .bind(new.alg_id)
        .bind(new.have_salts)
        .bind(&new.delimiter)
        .fetch_optional(&self.pool)
        .await?;
        Ok(id)
    }

    /// Fetch a single hashlist row.
    pub async fn get_hashlist(&self, hashlist_id: i64) -> Result<Option<HashlistRow>> {
        let row = sqlx::query_as::<_, HashlistRow>(
            "SELECT id, name, alg_id, have_salts, delimiter, parsed, tmp_path, status,
                    when_loaded, claimed_at, common_by_alg
             FROM hashlists WHERE id = $1",
        )
        .bind(hashlist_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Current status of a hashlist.
    pub async fn hashlist_status(&self, hashlist_id: i64) -> Result<Option<HashlistStatus>> {
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM hashlists WHERE id = $1")
                .bind(hashlist_id)
                .fetch_optional(&self.pool)
                .await?;
        status.map(|s| s.parse()).transpose()
    }

    /// Move a hashlist from `ready` to `parsing` and clear `parsed`.
    ///
    /// Returns `false` if the row was no longer `ready`; some other role got
    /// there between the candidate check and this write.
    pub async fn claim_for_parsing(&self, hashlist_id: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE hashlists SET status = 'parsing', parsed = FALSE, claimed_at = NOW()
             WHERE id = $1 AND status = 'ready'",
        )
        .bind(hashlist_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Publish a rebuilt artifact: `parsing → wait`, new path, fresh `when_loaded`.
    ///
    /// Fails if the list is no longer `parsing`, e.g. a recovery sweep reset
    /// it mid-build; whatever state followed is left alone.
    pub async fn hand_off(&self, hashlist_id: i64, tmp_path: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE hashlists SET status = 'wait', tmp_path = $2, when_loaded = NOW(),
                                  claimed_at = NULL
             WHERE id = $1 AND status = 'parsing'",
        )
        .bind(hashlist_id)
        .bind(tmp_path)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() != 1 {
            bail!("hashlist {} is no longer parsing, hand-off dropped", hashlist_id);
        }
        Ok(())
    }

    /// Reset common hashlists stuck in `parsing` for longer than `stale_seconds`
    /// back to `ready`. Returns the number of rows reset.
    pub async fn recover_stale_parsing(&self, stale_seconds: i32) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE hashlists SET status = 'ready', parsed = FALSE, claimed_at = NULL
             WHERE common_by_alg <> 0
               AND status = 'parsing'
               AND (claimed_at IS NULL
                    OR claimed_at < NOW() - make_interval(secs => $1::double precision))",
        )
        .bind(stale_seconds)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
