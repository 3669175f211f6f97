//! Durable persistence for the orchestrator.
//!
//! A single SQLite database holds job and project rows; the per-project step
//! cache lives on the filesystem next to the other project artifacts. All
//! writes are synchronous with respect to the caller.

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;

mod error;
mod jobs;
mod projects;
mod schema;
mod step_cache;

pub use error::StoreError;
pub use jobs::JobStore;
pub use projects::ProjectStore;
pub use step_cache::{steps, StepCache};

/// Handle bundling the substores over one connection pool. Cheap to clone.
#[derive(Clone)]
pub struct Store {
    pool: Pool<Sqlite>,
    pub jobs: JobStore,
    pub projects: ProjectStore,
}

impl Store {
    /// Open (creating if missing) the database at `path` and bootstrap the
    /// schema.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        Self::from_pool(pool).await
    }

    /// Open a SQLite URL (`sqlite:/path/to/file.db`).
    pub async fn open_url(url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(sqlx::Error::from)?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        Self::from_pool(pool).await
    }

    /// In-memory store for tests. A single connection keeps every caller on
    /// the same database.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(":memory:")
            .await?;
        Self::from_pool(pool).await
    }

    async fn from_pool(pool: Pool<Sqlite>) -> Result<Self, StoreError> {
        schema::init(&pool).await?;
        Ok(Self {
            jobs: JobStore::new(pool.clone()),
            projects: ProjectStore::new(pool.clone()),
            pool,
        })
    }

    /// Liveness check used by the supervisor's database probe.
    pub async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}
