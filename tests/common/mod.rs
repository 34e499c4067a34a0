//! Shared test helpers for integration tests.

#![allow(dead_code)]

use hashlist_consolidator::db::{Database, HashlistStatus};
use hashlist_consolidator::store::memory::MemoryStore;
use std::path::Path;
use tokio::sync::OnceCell;

/// Returns the test database URL from the `TEST_DATABASE_URL` environment variable.
/// Panics if the variable is not set.
pub fn test_db_url() -> String {
    std::env::var("TEST_DATABASE_URL")
        .expect("TEST_DATABASE_URL must be set for integration tests")
}

/// Returns true if the test database URL is configured.
pub fn has_test_db() -> bool {
    std::env::var("TEST_DATABASE_URL").is_ok()
}

/// One-time schema initialization.
static SCHEMA_INIT: OnceCell<()> = OnceCell::const_new();

/// Connect to the test database, apply the schema once, and empty every table.
pub async fn setup_test_db() -> Database {
    let db = Database::connect(&test_db_url())
        .await
        .expect("Failed to connect to test database");
    SCHEMA_INIT
        .get_or_init(|| async {
            db.migrate().await.expect("schema migration failed");
        })
        .await;
    truncate_all_tables(db.pool()).await;
    db
}

/// Truncate all tables to ensure test isolation.
pub async fn truncate_all_tables(pool: &sqlx::PgPool) {
    sqlx::raw_sql("TRUNCATE TABLE task_works, hashes, hashlists, algs RESTART IDENTITY CASCADE")
        .execute(pool)
        .await
        .unwrap();
}

/// Play the hashlist loader's part: load a handed-off export file back into
/// the common list's rows and mark it `ready` again.
pub fn load_export_into(store: &MemoryStore, hashlist_id: i64, path: &Path) {
    let content = std::fs::read_to_string(path).unwrap();
    for line in content.lines() {
        match line.split_once(hashlist_consolidator::DELIMITER) {
            Some((hash, salt)) => store.add_hash(hashlist_id, hash, Some(salt), false),
            None => store.add_hash(hashlist_id, line, None, false),
        };
    }
    store.set_hashlist_status(hashlist_id, HashlistStatus::Ready);
}

/// Names of the files in a directory.
pub fn files_in(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}
