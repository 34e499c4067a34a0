//! # Database — PostgreSQL Hash Inventory Store
//!
//! Async access to the shared hash inventory via `sqlx::PgPool`. Every role in
//! the cluster (upload loader, task dispatcher, result ingester, and the
//! consolidation scheduler) reads and writes the same tables; coordination
//! happens purely through the `status` columns.
//!
//! ## Schema
//!
//! - `algs`: id, name
//! - `hashlists`: id, name, alg_id, have_salts, delimiter, parsed, tmp_path,
//!   status, cracked, uncracked, when_loaded, claimed_at, common_by_alg
//! - `hashes`: id, hashlist_id, hash, salt, cracked, summ (dedup key)
//! - `task_works`: id, hashlist_id, status
//!
//! ## Module Structure
//!
//! - [`hashlists`] — common hashlist lookup/creation and status transitions
//! - [`hashes`] — uncracked counts, purge, export streaming
//! - [`task_works`] — read-only view of active cracking work

mod hashes;
mod hashlists;
mod task_works;

use anyhow::Result;
use serde::Serialize;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use std::fmt;
use std::str::FromStr;

/// Schema applied by [`Database::migrate`].
const SCHEMA_SQL: &str = include_str!("../../migrations/001_hash_inventory.sql");

// ── Status vocabulary ───────────────────────────────────────────

/// Hashlist status. Doubles as a cooperative lock shared by every role.
///
/// | Value | Owner | Meaning |
/// |-------|-------|---------|
/// | `ready` | nobody | idle; consolidatable and claimable |
/// | `parsing` | scheduler | common list is being rebuilt |
/// | `wait` | dispatcher | rebuilt file ready for pickup |
/// | `work` | executor | claimed by a cracking task |
/// | `waitoutparse` | ingester | result file awaiting ingestion |
/// | `outparsing` | ingester | result file being ingested |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HashlistStatus {
    Ready,
    Parsing,
    Wait,
    Work,
    WaitOutParse,
    OutParsing,
}

impl HashlistStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HashlistStatus::Ready => "ready",
            HashlistStatus::Parsing => "parsing",
            HashlistStatus::Wait => "wait",
            HashlistStatus::Work => "work",
            HashlistStatus::WaitOutParse => "waitoutparse",
            HashlistStatus::OutParsing => "outparsing",
        }
    }
}

impl fmt::Display for HashlistStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashlistStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ready" => Ok(HashlistStatus::Ready),
            "parsing" => Ok(HashlistStatus::Parsing),
            "wait" => Ok(HashlistStatus::Wait),
            "work" => Ok(HashlistStatus::Work),
            "waitoutparse" => Ok(HashlistStatus::WaitOutParse),
            "outparsing" => Ok(HashlistStatus::OutParsing),
            other => Err(anyhow::anyhow!("unknown hashlist status '{}'", other)),
        }
    }
}

/// TaskWork status as far as the scheduler cares. Anything else the executor
/// writes (queued, done, ...) maps to `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum TaskStatus {
    Work,
    WaitOutParse,
    OutParsing,
    Other(String),
}

impl TaskStatus {
    /// Results are still being folded back into hash rows.
    pub fn is_output_in_flight(&self) -> bool {
        matches!(self, TaskStatus::WaitOutParse | TaskStatus::OutParsing)
    }
}

impl From<&str> for TaskStatus {
    fn from(s: &str) -> Self {
        match s {
            "work" => TaskStatus::Work,
            "waitoutparse" => TaskStatus::WaitOutParse,
            "outparsing" => TaskStatus::OutParsing,
            other => TaskStatus::Other(other.to_string()),
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Work => f.write_str("work"),
            TaskStatus::WaitOutParse => f.write_str("waitoutparse"),
            TaskStatus::OutParsing => f.write_str("outparsing"),
            TaskStatus::Other(s) => f.write_str(s),
        }
    }
}

// ── Row types ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct HashlistRow {
    pub id: i64,
    pub name: String,
    pub alg_id: i64,
    pub have_salts: bool,
    pub delimiter: String,
    pub parsed: bool,
    pub tmp_path: String,
    pub status: String,
    pub when_loaded: chrono::DateTime<chrono::Utc>,
    pub claimed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub common_by_alg: i64,
}

impl HashlistRow {
    pub fn status(&self) -> Result<HashlistStatus> {
        self.status.parse()
    }
}

/// Distinct uncracked hashes of one algorithm outside common lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct AlgUncracked {
    pub alg_id: i64,
    pub uncracked: i64,
}

/// Fields written when a common hashlist is created lazily.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCommonHashlist {
    pub name: String,
    pub alg_id: i64,
    pub have_salts: bool,
    pub delimiter: String,
}

// ── Database struct and connection ──────────────────────────────

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connect to PostgreSQL using the provided database URL.
    ///
    /// The URL is parsed by hand so percent-encoded credentials survive intact.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let url = url::Url::parse(database_url)?;
        let username = urlencoding::decode(url.username())?.into_owned();
        let password = url
            .password()
            .map(|p| urlencoding::decode(p).map(|s| s.into_owned()))
            .transpose()?;
        let mut opts = PgConnectOptions::new()
            .host(url.host_str().unwrap_or("localhost"))
            .port(url.port().unwrap_or(5432))
            .database(url.path().trim_start_matches('/'))
            .username(&username);
        if let Some(ref pw) = password {
            opts = opts.password(pw);
        }
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect_with(opts)
            .await?;
        Ok(Database { pool })
    }

    /// Get a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Health check: execute `SELECT 1` to verify database connectivity.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }

    /// Apply the hash inventory schema. Idempotent.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────────
