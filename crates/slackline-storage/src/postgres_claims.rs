// PostgreSQL claim store
//
// A claim is an upsert on `event_claims`: the insert wins for a new key, the
// conflict branch only takes over a row whose claim has expired. Postgres
// serializes conflicting upserts on the primary key, so exactly one concurrent
// caller gets a row back.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{debug, error, info, instrument};

use slackline_core::traits::{ClaimStore, StoreError};

/// Claim store backed by PostgreSQL
///
/// # Example
///
/// ```ignore
/// let store = PostgresClaimStore::connect("postgres://localhost/slackline").await?;
/// store.migrate().await?;
/// ```
#[derive(Clone)]
pub struct PostgresClaimStore {
    pool: PgPool,
}

impl PostgresClaimStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect a small pool; claims are one short statement each
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the bundled migrations
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Delete expired claims, returning how many were removed
    #[instrument(skip(self))]
    pub async fn purge_expired(&self) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM event_claims WHERE expires_at <= now()")
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to purge claims: {}", e);
                map_error(e)
            })?;

        let removed = result.rows_affected();
        if removed > 0 {
            info!(removed, "purged expired claims");
        }
        Ok(removed)
    }
}

#[async_trait]
impl ClaimStore for PostgresClaimStore {
    #[instrument(skip(self, owner))]
    async fn set_if_absent(
        &self,
        key: &str,
        owner: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO event_claims (claim_key, owner, claimed_at, expires_at)
            VALUES ($1, $2, now(), now() + make_interval(secs => $3))
            ON CONFLICT (claim_key) DO UPDATE
                SET owner = EXCLUDED.owner,
                    claimed_at = EXCLUDED.claimed_at,
                    expires_at = EXCLUDED.expires_at
                WHERE event_claims.expires_at <= now()
            RETURNING claim_key
            "#,
        )
        .bind(key)
        .bind(owner)
        .bind(ttl.as_secs_f64())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to insert claim: {}", e);
            map_error(e)
        })?;

        let claimed = row.is_some();
        debug!(key, claimed, "postgres claim");
        Ok(claimed)
    }

    fn backend(&self) -> &'static str {
        "postgres"
    }
}

fn map_error(e: sqlx::Error) -> StoreError {
    match e {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
            StoreError::Connection(e.to_string())
        }
        other => StoreError::Command(other.to_string()),
    }
}

impl std::fmt::Debug for PostgresClaimStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresClaimStore").finish_non_exhaustive()
    }
}
