//! Hash row aggregation, purge, and export streaming.

use super::{AlgUncracked, Database};
use anyhow::Result;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};

impl Database {
    /// Distinct uncracked dedup keys per algorithm, counted over every
    /// hashlist that is not itself a common list.
    pub async fn uncracked_counts_by_alg(&self) -> Result<Vec<AlgUncracked>> {
        let rows = sqlx::query_as::<_, AlgUncracked>(
            "SELECT hl.alg_id, COUNT(DISTINCT h.summ) AS uncracked
             FROM hashes h
             JOIN hashlists hl ON hl.id = h.hashlist_id
             WHERE NOT h.cracked AND hl.common_by_alg = 0
             GROUP BY hl.alg_id
             ORDER BY hl.alg_id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Number of hash rows stored in a hashlist.
    pub async fn count_hashes_in_hashlist(&self, hashlist_id: i64) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(id) FROM hashes WHERE hashlist_id = $1")
            .bind(hashlist_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Delete every hash row of a hashlist and zero its counters.
    pub async fn purge_hashlist(&self, hashlist_id: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM hashes WHERE hashlist_id = $1")
            .bind(hashlist_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE hashlists SET cracked = 0, uncracked = 0 WHERE id = $1")
            .bind(hashlist_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Stream every uncracked hash of an algorithm from non-common hashlists.
    ///
    /// With `delimiter = Some(d)` each row is `hash || d || salt` (NULL salt
    /// becomes empty); otherwise the bare hash. Rows come back in insertion
    /// order and are not trimmed or filtered here.
    pub fn export_hash_lines<'a>(
        &'a self,
        alg_id: i64,
        delimiter: Option<&'a str>,
    ) -> BoxStream<'a, Result<String>> {
        let rows = match delimiter {
            Some(delim) => sqlx::query_scalar::<_, String>(
                "SELECT h.hash || $2 || COALESCE(h.salt, '')
                 FROM hashes h
                 JOIN hashlists hl ON hl.id = h.hashlist_id
                 WHERE hl.alg_id = $1 AND hl.common_by_alg = 0 AND NOT h.cracked
                 ORDER BY h.id",
            )
            .bind(alg_id)
            .bind(delim)
            .fetch(&self.pool),
            None => sqlx::query_scalar::<_, String>(
                "SELECT h.hash
                 FROM hashes h
                 JOIN hashlists hl ON hl.id = h.hashlist_id
                 WHERE hl.alg_id = $1 AND hl.common_by_alg = 0 AND NOT h.cracked
                 ORDER BY h.id",
            )
            .bind(alg_id)
            .fetch(&self.pool),
        };
        rows.map_err(anyhow::Error::from).boxed()
    }
}
