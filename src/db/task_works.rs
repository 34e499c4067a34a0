//! Read-only view of cracking work. Rows here belong to the task executor
//! and the result ingester; the scheduler never writes them.

use super::Database;
use anyhow::Result;

impl Database {
    /// Hashlist ids currently claimed by a TaskWork in status `work`.
    pub async fn hashlists_in_work(&self) -> Result<Vec<i64>> {
        let ids: Vec<i64> = sqlx::query_scalar(
            "SELECT DISTINCT hashlist_id FROM task_works WHERE status = 'work' ORDER BY hashlist_id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    /// Whether any hashlist of the algorithm has results waiting for, or
    /// undergoing, ingestion.
    pub async fn alg_has_output_in_flight(&self, alg_id: i64) -> Result<bool> {
        let found: bool = sqlx::query_scalar(
            "SELECT EXISTS (
                 SELECT 1 FROM task_works t
                 JOIN hashlists hl ON hl.id = t.hashlist_id
                 WHERE hl.alg_id = $1 AND t.status IN ('waitoutparse', 'outparsing')
             )",
        )
        .bind(alg_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(found)
    }
}
